//! The playback session controller.
//!
//! A [`Player`] ties the upstream station source, the playback daemon and
//! the host together. It plays one track at a time: the host owns the
//! queue and advances through it, asking the player to
//! [`clear_and_play`](Player::clear_and_play) each track of this service.
//! Every operation, including those of the background timers, runs under
//! the single session lock.

use std::{
    fmt,
    ops::ControlFlow,
    sync::{Arc, Weak},
    time::{Duration, SystemTime},
};

use tokio::{sync::Mutex, time::Instant};

use crate::{
    backend::{Backend, Status, Tag},
    config::{Config, Options, Validated},
    debounce::{Action, Press},
    error::{Error, Result},
    host::{queue_index, BrowseItem, BrowseSource, Host, Navigation, QueueItem, StateSnapshot, ToastLevel},
    queue::{self, Origin, Reconciler},
    session::{CurrentStation, Session, TransportState},
    timers::{self, StallDetector},
    tokens::SessionToken,
    track::{parse_station_uri, station_uri, StationId, Track, TrackUri, ROOT_URI, SERVICE_NAME},
    upstream::{self, StationSource},
};

/// Title of toasts about playback.
const TOAST_TITLE: &str = "Pandora";

/// Title of toasts about settings.
const OPTIONS_TOAST_TITLE: &str = "Pandora Options";

const CREDENTIALS_MISSING: &str = "Need email address and password. See plugin settings.";

/// Delay between the staggered removals of old tracks.
const REMOVAL_STAGGER: Duration = Duration::from_secs(10);

struct Inner {
    source: Arc<dyn StationSource>,
    backend: Arc<dyn Backend>,
    host: Arc<dyn Host>,
    session: Mutex<Session>,
    stall: std::sync::Mutex<StallDetector>,
}

#[derive(Clone)]
pub struct Player {
    inner: Arc<Inner>,
}

impl fmt::Debug for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Player").finish_non_exhaustive()
    }
}

impl Player {
    #[must_use]
    pub fn new(
        config: Config,
        source: Arc<dyn StationSource>,
        backend: Arc<dyn Backend>,
        host: Arc<dyn Host>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                backend,
                host,
                session: Mutex::new(Session::new(config)),
                stall: std::sync::Mutex::new(StallDetector::default()),
            }),
        }
    }

    fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    fn upgrade(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn host(&self) -> &dyn Host {
        &*self.inner.host
    }

    fn backend(&self) -> &dyn Backend {
        &*self.inner.backend
    }

    fn toast(&self, level: ToastLevel, message: &str) {
        self.host().toast(level, TOAST_TITLE, message);
    }

    /// Shows a toast after `delay`, unless the session shuts down first.
    fn toast_later(&self, session: &Session, level: ToastLevel, message: &'static str, delay: Duration) {
        let host = Arc::clone(&self.inner.host);
        let token = session.cancel.child_token();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => host.toast(level, OPTIONS_TOAST_TITLE, message),
            }
        });
    }

    fn push_state(&self, session: &Session) {
        if let Some(snapshot) = &session.snapshot {
            self.host().push_state(snapshot);
        }
    }

    /// Current transport state of the session.
    pub async fn transport(&self) -> TransportState {
        self.inner.session.lock().await.transport
    }

    /// Station whose tracks are being played, if any.
    pub async fn current_station(&self) -> Option<CurrentStation> {
        self.inner.session.lock().await.station.clone()
    }

    /// Registers with the host and sets up the session.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` when no credentials were configured, and
    /// upstream errors when logging in or listing stations failed.
    pub async fn start(&self) -> Result<()> {
        self.host().add_browse_source(&BrowseSource::default());

        let mut session = self.inner.session.lock().await;
        if let Err(e) = session.config.validate_credentials() {
            error!("{e}");
            self.toast(ToastLevel::Error, CREDENTIALS_MISSING);
            return Err(e);
        }

        self.setup_locked(&mut session).await
    }

    async fn setup_locked(&self, session: &mut Session) -> Result<()> {
        if let Err(e) = self.login_locked(session).await {
            error!("logging in failed: {e}");
            let message = if e.is_configuration() {
                "Login rejected. Check email address and password in plugin settings."
            } else {
                "Could not log in"
            };
            self.toast(ToastLevel::Error, message);
            return Err(e);
        }

        self.start_timers(session);
        self.flush_locked(session);

        info!(
            "started with {} stations, keeping {} tracks per station",
            session.stations.len(),
            session.config.max_station_tracks
        );
        Ok(())
    }

    async fn login_locked(&self, session: &mut Session) -> Result<()> {
        let timeout = session.config.upstream_timeout;

        let token = upstream::with_deadline(
            timeout,
            self.inner.source.authenticate(&session.config.credentials),
        )
        .await?;
        debug!("session token expires in {}s", token.time_to_live().as_secs());
        session.token = Some(token);

        let stations = upstream::with_deadline(timeout, self.inner.source.list_stations()).await?;
        if stations
            .iter()
            .enumerate()
            .any(|(i, station)| usize::try_from(station.id).ok() != Some(i))
        {
            warn!("station ids do not follow catalog order");
        }
        session.stations = stations;

        Ok(())
    }

    /// Cancels timers and deferred removals, removes this service's items
    /// from the queue, stops playback and unregisters from the host.
    ///
    /// # Errors
    ///
    /// Returns the backend error when stopping failed; teardown completes
    /// regardless.
    pub async fn shutdown(&self) -> Result<()> {
        let mut session = self.inner.session.lock().await;

        session.cancel_all();
        self.flush_locked(&mut session);
        let result = self.stop_locked(&mut session).await;

        self.host().remove_browse_source(&BrowseSource::default().name);
        info!("shut down");

        result
    }

    /// Removes every item of this service from the queue.
    fn flush_locked(&self, session: &mut Session) {
        session.cancel_removals();

        let (ours, theirs): (Vec<QueueItem>, Vec<QueueItem>) =
            self.host().queue().into_iter().partition(QueueItem::is_ours);
        if ours.is_empty() {
            return;
        }

        debug!("flushing {} tracks from the queue", ours.len());
        if theirs.is_empty() {
            self.host().clear_queue();
        } else {
            self.host().clear_add_queue(theirs);
        }
    }

    /// Browses `uri`: the root lists the stations, a station URI queues
    /// fresh tracks of that station and starts playing the first.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for URIs of other shapes, `NotFound` for
    /// unknown stations, and upstream errors when no tracks could be
    /// fetched.
    pub async fn browse(&self, uri: &str) -> Result<Navigation> {
        let mut session = self.inner.session.lock().await;

        if uri == ROOT_URI {
            let items = session
                .stations
                .iter()
                .map(|station| BrowseItem {
                    service: SERVICE_NAME.to_string(),
                    item_type: "station".to_string(),
                    title: station.name.clone(),
                    name: station.name.clone(),
                    artist: String::new(),
                    album: String::new(),
                    album_art: station.album_art.clone(),
                    icon: "fa fa-folder-open-o".to_string(),
                    uri: station_uri(station.id),
                })
                .collect();
            return Ok(Navigation::Stations(items));
        }

        let Some(id) = parse_station_uri(uri) else {
            return Err(Error::invalid_argument(format!("failed to match uri: {uri}")));
        };

        let tracks = self.select_station_locked(&mut session, id).await?;
        let first = tracks[0].clone();
        if let Some(index) = queue_index(&self.host().queue(), &first.uri) {
            self.host().set_position(index);
        }
        self.clear_and_play_locked(&mut session, first, Origin::ManualBrowse)
            .await?;

        Ok(Navigation::Tracks(tracks))
    }

    /// Makes `id` the current station and queues a fresh batch of its
    /// tracks. Returns the queued tracks, never empty.
    async fn select_station_locked(&self, session: &mut Session, id: StationId) -> Result<Vec<Track>> {
        let name = session
            .station(id)
            .map(|station| station.name.clone())
            .ok_or_else(|| Error::not_found(format!("no station with id {id}")))?;

        let changed = session.station.as_ref().map(|station| station.id) != Some(id);
        session.station = Some(CurrentStation {
            id,
            name: name.clone(),
        });
        if changed && session.config.flush_on_station_change {
            self.flush_locked(session);
        }

        if session.token.as_ref().is_some_and(SessionToken::is_expired) {
            info!("session token expired; logging in again before fetching");
            self.login_locked(session).await?;
        }

        let fetched = upstream::with_deadline(
            session.config.upstream_timeout,
            self.inner.source.fetch_tracks(
                id,
                session.config.max_station_tracks,
                &session.config.band_filter,
            ),
        )
        .await;

        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                error!("fetching tracks of {name} failed: {e}");
                self.toast(ToastLevel::Error, &format!("Failed to load tracks from {name}"));
                return Err(e);
            }
        };

        let queue = self.host().queue();
        let band_filter = session.config.band_filter.clone();
        let Some(station) = session.station_mut(id) else {
            return Err(Error::not_found(format!("no station with id {id}")));
        };
        let tracks = queue::dedup(fetched, &queue, station, &band_filter);
        for track in &tracks {
            station.remember(track.track_token.clone());
        }

        session.last_uri = None;
        session.last_fetched.clone_from(&tracks);

        if tracks.is_empty() {
            self.toast(ToastLevel::Error, &format!("Failed to load tracks from {name}"));
            return Err(Error::unavailable(format!("failed to load tracks from {name}")));
        }

        self.host()
            .add_queue_items(tracks.iter().cloned().map(QueueItem::from_track).collect());
        info!("queued {} tracks of {name}", tracks.len());

        Ok(tracks)
    }

    /// Resolves a queue URI of this service to its track record.
    ///
    /// Returns an empty list when the track is neither queued nor part of
    /// the last fetched batch.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when `uri` is not a track URI.
    pub async fn explode_uri(&self, uri: &str) -> Result<Vec<Track>> {
        if let Err(e) = uri.parse::<TrackUri>() {
            self.toast(ToastLevel::Error, &e.error.to_string());
            return Err(e);
        }

        let session = self.inner.session.lock().await;
        let track = self
            .host()
            .queue()
            .into_iter()
            .filter_map(|item| item.track)
            .chain(session.last_fetched.iter().cloned())
            .find(|track| track.uri == uri);

        Ok(track.into_iter().collect())
    }

    /// Validates and applies new settings.
    ///
    /// A warning about invalid values is shown right away. When credentials
    /// were entered for the first time the session is set up; when they
    /// changed, the player logs in again.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` when credentials are missing, and upstream
    /// errors when logging in failed.
    pub async fn save_settings(&self, options: &Options) -> Result<()> {
        let Validated {
            value: config,
            warning,
        } = Config::from_options(options);
        if let Some(warning) = warning {
            self.host().toast(ToastLevel::Info, OPTIONS_TOAST_TITLE, &warning);
        }

        let mut session = self.inner.session.lock().await;
        let credentials_changed = config.credentials != session.config.credentials;
        session.debouncer.set_replay_enabled(config.replay_on_double_back);
        session.config = config;

        if let Err(e) = session.config.validate_credentials() {
            error!("{e}");
            self.toast_later(
                &session,
                ToastLevel::Error,
                CREDENTIALS_MISSING,
                Duration::from_secs(6),
            );
            return Err(e);
        }

        if session.token.is_none() {
            self.setup_locked(&mut session).await?;
        } else if credentials_changed {
            self.login_locked(&mut session).await?;
            self.start_reauth(&mut session);
        }

        self.toast_later(
            &session,
            ToastLevel::Success,
            "Plugin Options Saved",
            Duration::from_secs(5),
        );
        Ok(())
    }

    /// Plays `track` on the backend and tops up the queue.
    ///
    /// Failures are not returned; they skip to the next track instead.
    ///
    /// # Errors
    ///
    /// Returns an error only when skipping failed as well.
    pub async fn clear_and_play(&self, track: Track, origin: Origin) -> Result<()> {
        let mut session = self.inner.session.lock().await;
        self.clear_and_play_locked(&mut session, track, origin).await
    }

    async fn clear_and_play_locked(&self, session: &mut Session, track: Track, origin: Origin) -> Result<()> {
        info!("playing {track} after {origin}");

        if let Err(e) = self.load_and_play(session, &track, origin).await {
            error!("playing {track} failed: {e}");
            self.toast(ToastLevel::Error, &format!("Could not play {}", track.title));
            return self.skip_locked(session).await;
        }

        Ok(())
    }

    async fn load_and_play(&self, session: &mut Session, track: &Track, origin: Origin) -> Result<()> {
        session.liveness.stop();
        self.backend().clear().await?;

        if let Some(last_uri) = session.last_uri.take() {
            let same_station = session.station.as_ref().map(|station| station.id) == Some(track.station_id);
            if last_uri != track.uri && same_station {
                self.remove_track(session, &last_uri, false);
            }
        }

        let name = session.station(track.station_id).map_or_else(
            || {
                warn!("{track} is of unknown station {}", track.station_id);
                String::new()
            },
            |station| station.name.clone(),
        );
        session.station = Some(CurrentStation {
            id: track.station_id,
            name,
        });
        session.last_uri = Some(track.uri.clone());

        let stream = self.stream_address(track, session.config.use_proxy_workaround).await;
        let id = self.backend().enqueue(&stream).await?;
        for (tag, value) in [
            (Tag::Artist, &track.artist),
            (Tag::Album, &track.album),
            (Tag::Title, &track.title),
        ] {
            self.backend().tag(id, tag, value).await?;
        }

        self.backend().unsubscribe_all();
        self.listen_for_finish(session);
        self.backend().play().await?;

        session.transport = TransportState::Playing;
        session.snapshot = Some(StateSnapshot::playing(track));
        self.push_state(session);

        self.start_liveness(session);

        self.reconcile(session, &track.uri, origin).await
    }

    /// Address to hand to the backend for `track`.
    async fn stream_address(&self, track: &Track, use_proxy_workaround: bool) -> String {
        if !use_proxy_workaround {
            return track.real_uri.to_string();
        }

        match upstream::resolve_stream_host(&track.real_uri).await {
            Ok(resolved) => {
                debug!("resolved {} to {resolved}", track.real_uri);
                resolved.to_string()
            }
            Err(e) => {
                error!("resolving {} failed: {e}", track.real_uri);
                self.toast(ToastLevel::Error, "Could not resolve stream address");
                track.real_uri.to_string()
            }
        }
    }

    async fn reconcile(&self, session: &mut Session, current_uri: &str, origin: Origin) -> Result<()> {
        let Some(station) = session.station.as_ref().map(|station| station.id) else {
            return Ok(());
        };
        let Some(station) = usize::try_from(station)
            .ok()
            .and_then(|i| session.stations.get_mut(i))
        else {
            warn!("not reconciling the queue for unknown station {station}");
            return Ok(());
        };

        let reconciler = Reconciler {
            host: &*self.inner.host,
            source: &*self.inner.source,
            config: &session.config,
        };
        let outcome = reconciler
            .ensure_upcoming_tracks(station, current_uri, origin, session.snapshot.as_ref())
            .await?;

        if !outcome.fetched.is_empty() {
            session.last_fetched = outcome.fetched;
        }
        self.schedule_removals(session, outcome.evictions);

        Ok(())
    }

    /// Schedules removal of the oldest tracks of the current station so
    /// that at most `min(sq_pos, excess)` of them go, staggered by ten
    /// seconds each. Returns the number of scheduled removals.
    pub async fn remove_old_track_block(&self, sq_pos: usize, excess: usize) -> usize {
        let session = self.inner.session.lock().await;
        let Some(station) = session.station.as_ref().map(|station| station.id) else {
            return 0;
        };

        let uris = queue::eviction_candidates(&self.host().queue(), station, sq_pos, excess);
        self.schedule_removals(&session, uris)
    }

    fn schedule_removals(&self, session: &Session, uris: Vec<String>) -> usize {
        let count = uris.len();
        if count > 0 {
            debug!("removing {count} old tracks");
        }

        for (i, uri) in uris.into_iter().enumerate() {
            let delay = REMOVAL_STAGGER.saturating_mul(u32::try_from(i + 1).unwrap_or(u32::MAX));
            let token = session.removals.child_token();
            let weak = self.downgrade();

            tokio::spawn(async move {
                tokio::select! {
                    biased;
                    () = token.cancelled() => {}
                    () = tokio::time::sleep(delay) => {
                        if let Some(player) = Self::upgrade(&weak) {
                            let session = player.inner.session.lock().await;
                            if !token.is_cancelled() {
                                player.remove_track(&session, &uri, true);
                            }
                        }
                    }
                }
            });
        }

        count
    }

    /// Removes the queue item with `uri`, unless it is the current one or,
    /// with `only_older`, queued after it. Returns whether it was removed.
    fn remove_track(&self, session: &Session, uri: &str, only_older: bool) -> bool {
        let position = self.host().position();
        let index = queue_index(&self.host().queue(), uri);

        match index {
            Some(index) if index != position && (!only_older || index < position) => {
                debug!("removing {uri} at queue index {index}");
                self.host().remove_queue_item(index);
                self.push_state(session);
                true
            }
            _ => {
                debug!("not removing {uri} at queue index {index:?}");
                false
            }
        }
    }

    /// Subscribes once to the backend finishing the current track.
    fn listen_for_finish(&self, session: &Session) {
        let finished = self.backend().on_track_finished();
        let token = session.cancel.child_token();
        let weak = self.downgrade();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                result = finished => {
                    if result.is_ok() {
                        if let Some(player) = Self::upgrade(&weak) {
                            player.on_track_finished().await;
                        }
                    }
                }
            }
        });
    }

    /// Handles the backend finishing a track. Keeps listening only while
    /// the item at the queue cursor belongs to this service.
    pub async fn on_track_finished(&self) {
        let mut session = self.inner.session.lock().await;

        let position = self.host().position();
        match self.host().queue().get(position) {
            Some(item) if item.is_ours() => self.listen_for_finish(&session),
            _ => {
                info!("queue moved on to another service; no longer listening");
            }
        }

        match self.backend().state().await {
            Ok(state) => {
                session.transport = match state.status {
                    Status::Play => TransportState::Playing,
                    Status::Pause => TransportState::Paused,
                    Status::Stop => TransportState::Stopped,
                };
                if let Some(snapshot) = session.snapshot.as_mut() {
                    snapshot.status = state.status;
                    snapshot.set_seek(state.elapsed);
                }
                self.push_state(&session);
            }
            Err(e) => warn!("reading backend state failed: {e}"),
        }
    }

    /// # Errors
    ///
    /// Returns the backend error when stopping failed.
    pub async fn stop(&self) -> Result<()> {
        let mut session = self.inner.session.lock().await;
        self.stop_locked(&mut session).await
    }

    async fn stop_locked(&self, session: &mut Session) -> Result<()> {
        self.backend().unsubscribe_all();
        session.last_uri = None;

        self.backend().stop().await?;

        session.transport = TransportState::Stopped;
        if let Some(snapshot) = session.snapshot.as_mut() {
            snapshot.status = Status::Stop;
        }
        self.push_state(session);
        Ok(())
    }

    /// Pauses playback. Does nothing unless playing.
    ///
    /// # Errors
    ///
    /// Returns the backend error when pausing failed.
    pub async fn pause(&self) -> Result<()> {
        let mut session = self.inner.session.lock().await;
        if session.transport != TransportState::Playing {
            debug!("not pausing while {}", session.transport);
            return Ok(());
        }

        self.backend().unsubscribe_all();
        session.liveness.stop();
        self.backend().pause().await?;

        session.transport = TransportState::Paused;
        let seek = self.host().seek();
        if let Some(snapshot) = session.snapshot.as_mut() {
            snapshot.status = Status::Pause;
            snapshot.set_seek(seek);
        }
        self.push_state(&session);
        Ok(())
    }

    /// Resumes paused playback. Does nothing unless paused.
    ///
    /// # Errors
    ///
    /// Returns the backend error when resuming failed.
    pub async fn resume(&self) -> Result<()> {
        let mut session = self.inner.session.lock().await;
        if session.transport != TransportState::Paused {
            debug!("not resuming while {}", session.transport);
            return Ok(());
        }

        self.backend().unsubscribe_all();
        self.listen_for_finish(&session);
        self.backend().resume().await?;
        self.start_liveness(&mut session);

        session.transport = TransportState::Playing;
        if let Some(snapshot) = session.snapshot.as_mut() {
            snapshot.status = Status::Play;
        }
        self.push_state(&session);
        Ok(())
    }

    /// Goes back one track, or replays the current track when pressed long
    /// after the last press. Presses in quick succession are ignored.
    ///
    /// # Errors
    ///
    /// Returns the backend error when stopping failed.
    pub async fn previous(&self) -> Result<()> {
        self.navigate(Action::Previous).await
    }

    /// Stops the current track so that the host advances, rating it down
    /// first when so configured. Presses in quick succession are ignored.
    ///
    /// # Errors
    ///
    /// Returns the backend error when stopping failed.
    pub async fn next(&self) -> Result<()> {
        self.navigate(Action::Next).await
    }

    /// Stops the current track so that the host advances. Unlike
    /// [`next`](Self::next), this is never debounced.
    ///
    /// # Errors
    ///
    /// Returns the backend error when stopping failed.
    pub async fn skip(&self) -> Result<()> {
        let mut session = self.inner.session.lock().await;
        self.skip_locked(&mut session).await
    }

    async fn skip_locked(&self, session: &mut Session) -> Result<()> {
        info!("skipping to the next track");
        self.stop_locked(session).await
    }

    async fn navigate(&self, action: Action) -> Result<()> {
        let mut session = self.inner.session.lock().await;

        let press = session.debouncer.classify(action, Instant::now());
        if press == Press::Spaz {
            return Ok(());
        }

        self.backend().unsubscribe_all();
        session.last_uri = None;

        let queue = self.host().queue();
        let position = self.host().position();

        match (action, press) {
            (Action::Previous, Press::Replay) => {
                self.host().reset_seek();
                self.play_at_locked(&mut session, &queue, position).await
            }

            (Action::Previous, _) if !self.host().is_random() => {
                if queue.is_empty() {
                    return self.stop_locked(&mut session).await;
                }
                let position = (position + queue.len() - 1) % queue.len();
                self.host().set_position(position);
                self.play_at_locked(&mut session, &queue, position).await
            }

            // Let the host pick a random track.
            (Action::Previous, _) => self.stop_locked(&mut session).await,

            (Action::Next, _) => {
                self.stop_locked(&mut session).await?;
                if session.config.next_is_thumbs_down {
                    self.thumbs_down_locked(&session, &queue, position).await;
                }
                Ok(())
            }

            (Action::Skip, _) => self.skip_locked(&mut session).await,
        }
    }

    async fn play_at_locked(&self, session: &mut Session, queue: &[QueueItem], position: usize) -> Result<()> {
        match queue.get(position).and_then(|item| item.track.clone()) {
            Some(track) => {
                self.clear_and_play_locked(session, track, Origin::ContinuousPlayback)
                    .await
            }
            None => self.stop_locked(session).await,
        }
    }

    /// Removes the item at `position` and rates its track down upstream.
    async fn thumbs_down_locked(&self, session: &Session, queue: &[QueueItem], position: usize) {
        let Some(track) = queue
            .get(position)
            .filter(|item| item.is_ours())
            .and_then(|item| item.track.as_ref())
        else {
            return;
        };

        self.host().remove_queue_item(position);

        if let Err(e) = upstream::with_deadline(
            session.config.upstream_timeout,
            self.inner.source.send_feedback(&track.track_token, true),
        )
        .await
        {
            warn!("rating {track} down failed: {e}");
            self.toast(ToastLevel::Warning, &format!("Could not rate down {}", track.title));
        } else {
            info!("rated {track} down");
        }
    }

    fn start_timers(&self, session: &mut Session) {
        self.start_reauth(session);

        let weak = self.downgrade();
        let interval = session.config.reaper_interval;
        session.reaper.start(&session.cancel, move |token| {
            timers::every(interval, token, move || {
                let weak = weak.clone();
                async move {
                    match Self::upgrade(&weak) {
                        Some(player) => {
                            player.reap_stale_tracks().await;
                            ControlFlow::Continue(())
                        }
                        None => ControlFlow::Break(()),
                    }
                }
            })
        });
    }

    fn start_reauth(&self, session: &mut Session) {
        let weak = self.downgrade();
        session
            .reauth
            .start(&session.cancel, move |token| Self::reauth_loop(weak, token));
    }

    async fn reauth_loop(weak: Weak<Inner>, token: tokio_util::sync::CancellationToken) {
        let mut failures = 0;

        loop {
            let delay = if failures == 0 {
                let Some(player) = Self::upgrade(&weak) else {
                    return;
                };
                let session = player.inner.session.lock().await;
                timers::reauth_delay(session.token.as_ref())
            } else {
                timers::retry_delay(failures - 1)
            };
            debug!("re-authenticating in {}s", delay.as_secs());

            tokio::select! {
                biased;
                () = token.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }

            let Some(player) = Self::upgrade(&weak) else {
                return;
            };
            match player.reauthenticate().await {
                Ok(()) => failures = 0,
                Err(e) => {
                    failures += 1;
                    warn!("re-authentication failed {failures} times: {e}");
                }
            }
        }
    }

    /// Logs in again with the stored credentials.
    ///
    /// The session lock is not held while waiting for upstream.
    async fn reauthenticate(&self) -> Result<()> {
        let (credentials, timeout) = {
            let session = self.inner.session.lock().await;
            (
                session.config.credentials.clone(),
                session.config.upstream_timeout,
            )
        };

        let token =
            upstream::with_deadline(timeout, self.inner.source.authenticate(&credentials)).await?;
        info!("re-authenticated");

        self.inner.session.lock().await.token = Some(token);
        Ok(())
    }

    /// Removes tracks of this service whose stream addresses grew too old.
    async fn reap_stale_tracks(&self) {
        let session = self.inner.session.lock().await;

        let stale = timers::stale_indices(
            &self.host().queue(),
            self.host().position(),
            SystemTime::now(),
            session.config.track_max_age,
        );
        if stale.is_empty() {
            return;
        }

        for index in &stale {
            self.host().remove_queue_item(*index);
        }
        info!("removed {} stale tracks", stale.len());
        self.push_state(&session);
    }

    fn start_liveness(&self, session: &mut Session) {
        *self
            .inner
            .stall
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = StallDetector::default();

        let weak = self.downgrade();
        let interval = session.config.liveness_interval;
        session.liveness.start(&session.cancel, move |token| {
            timers::every(interval, token, move || {
                let weak = weak.clone();
                async move {
                    match Self::upgrade(&weak) {
                        Some(player) => {
                            player.check_liveness().await;
                            ControlFlow::Continue(())
                        }
                        None => ControlFlow::Break(()),
                    }
                }
            })
        });
    }

    /// Skips the current track when the backend stopped advancing it.
    async fn check_liveness(&self) {
        let mut session = self.inner.session.lock().await;

        let state = match self.backend().state().await {
            Ok(state) => state,
            Err(e) => {
                warn!("reading backend state failed: {e}");
                return;
            }
        };

        let stalled = self
            .inner
            .stall
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .observe(&state, Instant::now(), session.config.stall_threshold);

        if stalled {
            warn!(
                "stream stalled at {}s for {}s",
                state.elapsed.as_secs(),
                session.config.stall_threshold.as_secs()
            );
            if let Err(e) = self.skip_locked(&mut session).await {
                error!("skipping a stalled stream failed: {e}");
            }
        }
    }
}
