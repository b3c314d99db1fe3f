//! State of a playback session.
//!
//! A [`Session`] is owned by the [`Player`](crate::player::Player) behind a
//! single lock. Everything that mutates the queue or the transport does so
//! while holding it.

use std::fmt;

use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    debounce::Debouncer,
    host::StateSnapshot,
    timers::Timer,
    tokens::SessionToken,
    track::{Station, StationId, Track},
};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Playing => write!(f, "playing"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// The station whose tracks are currently being played.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CurrentStation {
    pub id: StationId,
    pub name: String,
}

#[derive(Debug)]
pub struct Session {
    pub config: Config,
    pub station: Option<CurrentStation>,

    /// Queue URI of the track last handed to the backend.
    pub last_uri: Option<String>,

    pub debouncer: Debouncer,
    pub transport: TransportState,

    /// State last pushed to the host.
    pub snapshot: Option<StateSnapshot>,

    /// Station catalog; a station's id is its index.
    pub stations: Vec<Station>,

    /// Tracks added by the last fetch.
    pub last_fetched: Vec<Track>,

    pub token: Option<SessionToken>,

    /// Cancelled on shutdown; parent of everything spawned.
    pub cancel: CancellationToken,

    /// Cancelled on shutdown and when the queue is flushed.
    pub removals: CancellationToken,

    pub reauth: Timer,
    pub reaper: Timer,
    pub liveness: Timer,
}

impl Session {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let cancel = CancellationToken::new();
        let removals = cancel.child_token();

        Self {
            debouncer: Debouncer::new(config.replay_on_double_back),
            config,
            station: None,
            last_uri: None,
            transport: TransportState::default(),
            snapshot: None,
            stations: Vec::new(),
            last_fetched: Vec::new(),
            token: None,
            cancel,
            removals,
            reauth: Timer::new("re-authentication"),
            reaper: Timer::new("stale track reaper"),
            liveness: Timer::new("stream liveness"),
        }
    }

    #[must_use]
    pub fn station(&self, id: StationId) -> Option<&Station> {
        usize::try_from(id).ok().and_then(|i| self.stations.get(i))
    }

    pub fn station_mut(&mut self, id: StationId) -> Option<&mut Station> {
        usize::try_from(id).ok().and_then(|i| self.stations.get_mut(i))
    }

    /// Cancels pending deferred removals and arms a fresh set.
    pub fn cancel_removals(&mut self) {
        self.removals.cancel();
        self.removals = self.cancel.child_token();
    }

    /// Cancels everything spawned for this session and arms a fresh root,
    /// so that the session can be started again.
    pub fn cancel_all(&mut self) {
        self.reauth.stop();
        self.reaper.stop();
        self.liveness.stop();
        self.cancel.cancel();

        self.cancel = CancellationToken::new();
        self.removals = self.cancel.child_token();
    }
}
