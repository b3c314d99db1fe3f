//! Fakes of the collaborators of a player.
#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use tokio::sync::oneshot;

use pandora_bridge::{
    backend::{Backend, BackendId, PlaybackState, Status, Tag},
    config::{BandFilter, Config, Credentials, Options},
    error::{Error, Result},
    host::{Host, MemoryHost},
    player::Player,
    tokens::SessionToken,
    track::{Station, StationId, Track},
    upstream::StationSource,
};

pub fn track(station: StationId, id: u64, fetch_time: SystemTime) -> Track {
    Track {
        uri: format!("/pandora/station_id={station}/track_id={id}"),
        station_id: station,
        artist: format!("Artist {id}"),
        album: format!("Album {id}"),
        title: format!("Title {id}"),
        album_art: format!("http://art.example.com/{id}.jpg"),
        real_uri: format!("http://10.0.0.1/{station}/{id}.mp3").parse().unwrap(),
        station_token: format!("station-{station}"),
        track_token: format!("token-{station}-{id}"),
        fetch_time,
    }
}

pub fn options(max_station_tracks: u64) -> Options {
    Options {
        email: Some("listener@example.com".to_string()),
        password: Some("hunter2".to_string()),
        max_station_tracks: Some(serde_json::json!(max_station_tracks)),
        ..Default::default()
    }
}

pub fn config(max_station_tracks: u64) -> Config {
    Config::from_options(&options(max_station_tracks)).value
}

/// Upstream that serves freshly numbered tracks, up to `available` per
/// fetch.
pub struct FakeSource {
    pub stations: Vec<Station>,
    pub available: usize,
    /// Age of fetched tracks.
    pub age: Duration,
    pub hang: AtomicBool,
    pub fetches: AtomicUsize,
    /// Successful logins.
    pub logins: AtomicUsize,
    pub login_attempts: AtomicUsize,
    /// Number of upcoming logins that fail as if upstream were down.
    pub failing_logins: AtomicUsize,
    /// Rejects every login as if the credentials were wrong.
    pub reject_logins: AtomicBool,
    pub token_ttl: Duration,
    pub feedback: Mutex<Vec<(String, bool)>>,
    next_ids: Mutex<HashMap<StationId, u64>>,
}

impl FakeSource {
    pub fn new(available: usize) -> Self {
        Self {
            stations: vec![
                Station::new(0, "Jazz Radio", "http://art.example.com/jazz.jpg"),
                Station::new(1, "Funk Radio", "http://art.example.com/funk.jpg"),
            ],
            available,
            age: Duration::ZERO,
            hang: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
            logins: AtomicUsize::new(0),
            login_attempts: AtomicUsize::new(0),
            failing_logins: AtomicUsize::new(0),
            reject_logins: AtomicBool::new(false),
            token_ttl: Duration::from_secs(4 * 60 * 60),
            feedback: Mutex::new(Vec::new()),
            next_ids: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_age(mut self, age: Duration) -> Self {
        self.age = age;
        self
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StationSource for FakeSource {
    async fn authenticate(&self, credentials: &Credentials) -> Result<SessionToken> {
        self.login_attempts.fetch_add(1, Ordering::SeqCst);
        if !credentials.is_complete() || self.reject_logins.load(Ordering::SeqCst) {
            return Err(Error::unauthenticated("invalid credentials"));
        }
        let failing = self
            .failing_logins
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(Error::unavailable("login service down"));
        }

        self.logins.fetch_add(1, Ordering::SeqCst);
        Ok(SessionToken::new("session", SystemTime::now() + self.token_ttl))
    }

    async fn list_stations(&self) -> Result<Vec<Station>> {
        Ok(self.stations.clone())
    }

    async fn fetch_tracks(
        &self,
        station_id: StationId,
        max_count: usize,
        _band_filter: &BandFilter,
    ) -> Result<Vec<Track>> {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let fetch_time = SystemTime::now() - self.age;
        let mut next_ids = self.next_ids.lock().unwrap();
        let next = next_ids.entry(station_id).or_default();

        let count = max_count.min(self.available);
        let tracks = (0..count)
            .map(|_| {
                let id = *next;
                *next += 1;
                track(station_id, id, fetch_time)
            })
            .collect();
        Ok(tracks)
    }

    async fn send_feedback(&self, track_token: &str, thumbs_down: bool) -> Result<()> {
        self.feedback
            .lock()
            .unwrap()
            .push((track_token.to_string(), thumbs_down));
        Ok(())
    }
}

/// Backend that records commands and finishes tracks on demand.
#[derive(Default)]
pub struct FakeBackend {
    pub commands: Mutex<Vec<String>>,
    pub state: Mutex<PlaybackState>,
    pub fail_enqueue: AtomicBool,
    subscribers: Mutex<Vec<oneshot::Sender<()>>>,
    next_id: AtomicUsize,
}

impl FakeBackend {
    fn record(&self, command: impl Into<String>) {
        self.commands.lock().unwrap().push(command.into());
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.split(' ').next() == Some(command))
            .count()
    }

    pub fn subscribers(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap()
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    /// Reports the current track as finished.
    pub fn finish(&self) {
        self.state.lock().unwrap().status = Status::Stop;
        for tx in self.subscribers.lock().unwrap().drain(..) {
            let _ = tx.send(());
        }
    }

    pub fn set_state(&self, status: Status, elapsed: Duration) {
        let mut state = self.state.lock().unwrap();
        state.status = status;
        state.elapsed = elapsed;
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn clear(&self) -> Result<()> {
        self.record("clear");
        Ok(())
    }

    async fn enqueue(&self, uri: &str) -> Result<BackendId> {
        if self.fail_enqueue.load(Ordering::SeqCst) {
            return Err(Error::unavailable("stream address rejected"));
        }
        self.record(format!("addid {uri}"));
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst) as BackendId)
    }

    async fn tag(&self, id: BackendId, tag: Tag, value: &str) -> Result<()> {
        self.record(format!("addtagid {id} {tag} {value}"));
        Ok(())
    }

    async fn play(&self) -> Result<()> {
        self.record("play");
        self.set_state(Status::Play, Duration::ZERO);
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.record("pause");
        self.state.lock().unwrap().status = Status::Pause;
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.record("resume");
        self.state.lock().unwrap().status = Status::Play;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.record("stop");
        self.set_state(Status::Stop, Duration::ZERO);
        Ok(())
    }

    async fn state(&self) -> Result<PlaybackState> {
        Ok(*self.state.lock().unwrap())
    }

    fn on_track_finished(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    fn unsubscribe_all(&self) {
        self.subscribers.lock().unwrap().clear();
    }
}

pub struct Fixture {
    pub source: Arc<FakeSource>,
    pub backend: Arc<FakeBackend>,
    pub host: Arc<MemoryHost>,
    pub player: Player,
}

impl Fixture {
    pub fn new(config: Config, source: FakeSource) -> Self {
        let source = Arc::new(source);
        let backend = Arc::new(FakeBackend::default());
        let host = Arc::new(MemoryHost::new());
        let player = Player::new(
            config,
            Arc::clone(&source) as Arc<dyn StationSource>,
            Arc::clone(&backend) as Arc<dyn Backend>,
            Arc::clone(&host) as Arc<dyn Host>,
        );

        Self {
            source,
            backend,
            host,
            player,
        }
    }

    pub fn queue_uris(&self) -> Vec<String> {
        self.host.queue().into_iter().map(|item| item.uri).collect()
    }
}

/// Lets spawned tasks run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
