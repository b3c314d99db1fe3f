//! The host media player the bridge plugs into.
//!
//! The host owns the shared play queue, the queue cursor and the global
//! transport state shown to users. Items in the queue may belong to any
//! service; the bridge only ever touches its own. [`MemoryHost`] keeps all of
//! it in process for standalone use.

use std::{
    fmt,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use serde::Serialize;

use crate::{
    backend::Status,
    track::{StationId, Track, ROOT_URI, SERVICE_NAME},
};

/// An entry of the shared play queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueItem {
    /// Service that owns this item.
    pub service: String,
    pub uri: String,
    pub station: Option<StationId>,
    /// Track record, for items of this service only.
    pub track: Option<Track>,
}

impl QueueItem {
    #[must_use]
    pub fn from_track(track: Track) -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
            uri: track.uri.clone(),
            station: Some(track.station_id),
            track: Some(track),
        }
    }

    /// An item of another service.
    #[must_use]
    pub fn foreign(service: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            uri: uri.into(),
            station: None,
            track: None,
        }
    }

    #[must_use]
    pub fn is_ours(&self) -> bool {
        self.service == SERVICE_NAME
    }

    /// Whether this is an item of this service on `station`.
    #[must_use]
    pub fn is_on_station(&self, station: StationId) -> bool {
        self.is_ours() && self.station == Some(station)
    }
}

impl fmt::Display for QueueItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.track {
            Some(track) => track.fmt(f),
            None => write!(f, "{}: {}", self.service, self.uri),
        }
    }
}

/// Transport and metadata state as pushed to the host.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub status: Status,
    pub title: String,
    pub artist: String,
    pub album: String,
    #[serde(rename = "albumart")]
    pub album_art: String,
    /// Stream address of the track, not its queue identity.
    pub uri: String,
    /// Position in milliseconds.
    pub seek: u64,
    pub service: String,
    pub track_type: &'static str,
    pub bitdepth: &'static str,
    pub samplerate: &'static str,
}

impl StateSnapshot {
    /// A snapshot of `track` playing from the start.
    #[must_use]
    pub fn playing(track: &Track) -> Self {
        Self {
            status: Status::Play,
            title: track.title.clone(),
            artist: track.artist.clone(),
            album: track.album.clone(),
            album_art: track.album_art.clone(),
            uri: track.real_uri.to_string(),
            seek: 0,
            service: SERVICE_NAME.to_string(),
            track_type: "mp3",
            bitdepth: "16 bit",
            samplerate: "44.1 KHz",
        }
    }

    pub fn set_seek(&mut self, seek: Duration) {
        self.seek = u64::try_from(seek.as_millis()).unwrap_or(u64::MAX);
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for ToastLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Success => write!(f, "success"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Entry of the host's browse menu pointing at this service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BrowseSource {
    pub name: String,
    pub uri: String,
    #[serde(rename = "albumart")]
    pub album_art: String,
    pub icon: String,
    pub plugin_type: String,
    pub plugin_name: String,
}

impl Default for BrowseSource {
    fn default() -> Self {
        Self {
            name: "Pandora Radio".to_string(),
            uri: ROOT_URI.to_string(),
            album_art: "/albumart?sourceicon=music_service/pandora/pandora.png".to_string(),
            icon: "fa fa-microphone".to_string(),
            plugin_type: "music_service".to_string(),
            plugin_name: SERVICE_NAME.to_string(),
        }
    }
}

/// A navigable entry of a browse listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowseItem {
    pub service: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub title: String,
    pub name: String,
    pub artist: String,
    pub album: String,
    #[serde(rename = "albumart")]
    pub album_art: String,
    pub icon: String,
    pub uri: String,
}

/// Result of browsing a URI of this service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Navigation {
    /// The station catalog; each entry browses into a station.
    Stations(Vec<BrowseItem>),
    /// Tracks of a station that were queued and started.
    Tracks(Vec<Track>),
}

/// The host's queue and transport surface.
///
/// Indices are positions in the shared queue at the time of the call.
pub trait Host: Send + Sync {
    fn queue(&self) -> Vec<QueueItem>;
    fn add_queue_items(&self, items: Vec<QueueItem>);
    fn move_queue_item(&self, from: usize, to: usize);
    fn remove_queue_item(&self, index: usize);
    /// Replaces the whole queue.
    fn clear_add_queue(&self, items: Vec<QueueItem>);
    fn clear_queue(&self);

    /// Index of the current item.
    fn position(&self) -> usize;
    fn set_position(&self, index: usize);
    /// Whether the host plays the queue in random order.
    fn is_random(&self) -> bool;

    fn seek(&self) -> Duration;
    fn reset_seek(&self);

    fn push_state(&self, state: &StateSnapshot);
    fn toast(&self, level: ToastLevel, title: &str, message: &str);

    fn add_browse_source(&self, source: &BrowseSource);
    fn remove_browse_source(&self, name: &str);
}

/// Index of the first queue item with `uri`.
#[must_use]
pub fn queue_index(queue: &[QueueItem], uri: &str) -> Option<usize> {
    queue.iter().position(|item| item.uri == uri)
}

#[derive(Debug, Default)]
struct MemoryState {
    queue: Vec<QueueItem>,
    position: usize,
    random: bool,
    seek: Duration,
    states: Vec<StateSnapshot>,
    toasts: Vec<(ToastLevel, String)>,
    sources: Vec<BrowseSource>,
}

/// A host that keeps everything in memory.
///
/// The cursor follows the current item when items are moved or removed
/// around it, like a real queue view would.
#[derive(Debug, Default)]
pub struct MemoryHost {
    state: Mutex<MemoryState>,
}

impl MemoryHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> T {
        f(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn set_random(&self, random: bool) {
        self.with(|state| state.random = random);
    }

    pub fn set_seek(&self, seek: Duration) {
        self.with(|state| state.seek = seek);
    }

    /// Every state pushed so far, oldest first.
    #[must_use]
    pub fn pushed_states(&self) -> Vec<StateSnapshot> {
        self.with(|state| state.states.clone())
    }

    /// Every toast shown so far, oldest first.
    #[must_use]
    pub fn toasts(&self) -> Vec<(ToastLevel, String)> {
        self.with(|state| state.toasts.clone())
    }

    #[must_use]
    pub fn browse_sources(&self) -> Vec<BrowseSource> {
        self.with(|state| state.sources.clone())
    }
}

impl Host for MemoryHost {
    fn queue(&self) -> Vec<QueueItem> {
        self.with(|state| state.queue.clone())
    }

    fn add_queue_items(&self, items: Vec<QueueItem>) {
        self.with(|state| state.queue.extend(items));
    }

    fn move_queue_item(&self, from: usize, to: usize) {
        self.with(|state| {
            if from >= state.queue.len() {
                return;
            }

            let item = state.queue.remove(from);
            let to = to.min(state.queue.len());
            state.queue.insert(to, item);

            let position = state.position;
            state.position = if position == from {
                to
            } else if from < position && position <= to {
                position - 1
            } else if to <= position && position < from {
                position + 1
            } else {
                position
            };
        });
    }

    fn remove_queue_item(&self, index: usize) {
        self.with(|state| {
            if index >= state.queue.len() {
                return;
            }

            state.queue.remove(index);
            if index < state.position {
                state.position -= 1;
            }
            state.position = state.position.min(state.queue.len().saturating_sub(1));
        });
    }

    fn clear_add_queue(&self, items: Vec<QueueItem>) {
        self.with(|state| {
            state.queue = items;
            state.position = 0;
        });
    }

    fn clear_queue(&self) {
        self.with(|state| {
            state.queue.clear();
            state.position = 0;
        });
    }

    fn position(&self) -> usize {
        self.with(|state| state.position)
    }

    fn set_position(&self, index: usize) {
        self.with(|state| state.position = index);
    }

    fn is_random(&self) -> bool {
        self.with(|state| state.random)
    }

    fn seek(&self) -> Duration {
        self.with(|state| state.seek)
    }

    fn reset_seek(&self) {
        self.with(|state| state.seek = Duration::ZERO);
    }

    fn push_state(&self, snapshot: &StateSnapshot) {
        self.with(|state| state.states.push(snapshot.clone()));
    }

    fn toast(&self, level: ToastLevel, title: &str, message: &str) {
        info!("{level} toast from {title}: {message}");
        self.with(|state| state.toasts.push((level, message.to_string())));
    }

    fn add_browse_source(&self, source: &BrowseSource) {
        self.with(|state| {
            state.sources.retain(|known| known.name != source.name);
            state.sources.push(source.clone());
        });
    }

    fn remove_browse_source(&self, name: &str) {
        self.with(|state| state.sources.retain(|known| known.name != name));
    }
}
