//! Station and track records as served by the upstream radio service.
//!
//! A [`Track`] is immutable once fetched. Its [`uri`](Track::uri) is the
//! stable identity under which it lives in the shared play queue, while
//! [`real_uri`](Track::real_uri) is the resolved stream address that expires
//! after a while.

use std::{
    collections::VecDeque,
    fmt,
    str::FromStr,
    sync::LazyLock,
    time::{Duration, SystemTime},
};

use regex_lite::Regex;
use serde::Serialize;
use url::Url;

use crate::error::{Error, Result};

/// Name under which this service registers with the host.
pub const SERVICE_NAME: &str = "pandora";

/// Root of the browse tree and prefix of every queue URI.
pub const ROOT_URI: &str = "/pandora";

/// Index of a station in the user's station catalog.
pub type StationId = u32;

/// Queue identity of a track: `/pandora/station_id=<int>/track_id=<int>`.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct TrackUri {
    pub station_id: StationId,
    pub track_id: u64,
}

static TRACK_URI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/pandora/station_id=(\d+)/track_id=(\d+)$").expect("invalid track uri pattern")
});

static STATION_URI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/pandora/station_id=(\d+)$").expect("invalid station uri pattern"));

impl TrackUri {
    #[must_use]
    pub fn new(station_id: StationId, track_id: u64) -> Self {
        Self {
            station_id,
            track_id,
        }
    }
}

impl FromStr for TrackUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let captures = TRACK_URI
            .captures(s)
            .ok_or_else(|| Error::invalid_argument(format!("could not resolve uri: {s}")))?;

        Ok(Self::new(captures[1].parse()?, captures[2].parse()?))
    }
}

impl fmt::Display for TrackUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{ROOT_URI}/station_id={}/track_id={}",
            self.station_id, self.track_id
        )
    }
}

/// Parses a station browse URI of the form `/pandora/station_id=<int>`.
///
/// Returns `None` when the URI does not name a station.
#[must_use]
pub fn parse_station_uri(uri: &str) -> Option<StationId> {
    STATION_URI
        .captures(uri)
        .and_then(|captures| captures[1].parse().ok())
}

/// Browse URI of a station.
#[must_use]
pub fn station_uri(id: StationId) -> String {
    format!("{ROOT_URI}/station_id={id}")
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub uri: String,
    pub station_id: StationId,
    pub artist: String,
    pub album: String,
    pub title: String,
    pub album_art: String,
    pub real_uri: Url,
    #[serde(skip)]
    pub station_token: String,
    #[serde(skip)]
    pub track_token: String,
    #[serde(skip)]
    pub fetch_time: SystemTime,
}

impl Track {
    /// How long ago this track was fetched from upstream.
    ///
    /// A clock that went backwards counts as zero age.
    #[must_use]
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.fetch_time).unwrap_or(Duration::ZERO)
    }

    /// Whether the track is older than `max_age`, after which its stream
    /// address should be considered dead.
    #[must_use]
    pub fn is_stale(&self, now: SystemTime, max_age: Duration) -> bool {
        self.age(now) > max_age
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: \"{} - {}\"", self.uri, self.artist, self.title)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Station {
    pub id: StationId,
    pub name: String,
    pub album_art: String,

    /// Track tokens served recently, oldest first.
    recent_tokens: VecDeque<String>,
}

impl Station {
    /// Number of served track tokens remembered per station.
    pub const RECENT_TOKENS: usize = 64;

    #[must_use]
    pub fn new(id: StationId, name: impl Into<String>, album_art: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            album_art: album_art.into(),
            recent_tokens: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn recently_served(&self, track_token: &str) -> bool {
        self.recent_tokens.iter().any(|token| token == track_token)
    }

    /// Remembers a served track token, forgetting the oldest one when full.
    pub fn remember(&mut self, track_token: impl Into<String>) {
        if self.recent_tokens.len() == Self::RECENT_TOKENS {
            self.recent_tokens.pop_front();
        }
        self.recent_tokens.push_back(track_token.into());
    }
}

impl fmt::Display for Station {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: \"{}\"", self.id, self.name)
    }
}
