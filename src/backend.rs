//! The playback daemon, as driven by the bridge.
//!
//! The daemon owns decoding and output. The bridge only ever has a single
//! track loaded: it clears the daemon, enqueues the stream of the track to
//! play, tags it so that the daemon reports sensible metadata, and plays it.
//! [`Mpd`](crate::mpd::Mpd) implements this trait for the Music Player
//! Daemon.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::error::Result;

/// Identifier the daemon assigns to an enqueued song.
pub type BackendId = u64;

/// Metadata fields that can be attached to an enqueued stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Tag {
    Artist,
    Album,
    Title,
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Artist => write!(f, "artist"),
            Self::Album => write!(f, "album"),
            Self::Title => write!(f, "title"),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Stop,
    Play,
    Pause,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stop => write!(f, "stop"),
            Self::Play => write!(f, "play"),
            Self::Pause => write!(f, "pause"),
        }
    }
}

/// Snapshot of the daemon's transport.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaybackState {
    pub status: Status,
    /// Time played of the current song.
    pub elapsed: Duration,
    /// Id of the current song, if any.
    pub song: Option<BackendId>,
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn clear(&self) -> Result<()>;
    async fn enqueue(&self, uri: &str) -> Result<BackendId>;
    async fn tag(&self, id: BackendId, tag: Tag, value: &str) -> Result<()>;
    async fn play(&self) -> Result<()>;
    async fn pause(&self) -> Result<()>;
    async fn resume(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    async fn state(&self) -> Result<PlaybackState>;

    /// Subscribes once to the next time the current track finishes.
    ///
    /// The receiver resolves when the daemon reports the track as done, and
    /// errors when the subscription was dropped by
    /// [`unsubscribe_all`](Self::unsubscribe_all).
    fn on_track_finished(&self) -> oneshot::Receiver<()>;

    /// Drops every outstanding track-finished subscription.
    fn unsubscribe_all(&self);
}
