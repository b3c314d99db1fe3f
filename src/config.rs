//! Plugin configuration and the settings surface exposed to the host.
//!
//! The host hands settings over as loosely typed [`Options`], straight from
//! its settings form or from a TOML file. [`Config::from_options`] validates
//! them into a [`Config`], replacing invalid values with defaults and
//! reporting a user-visible warning for each replacement.
//!
//! # Example
//!
//! ```toml
//! email = "listener@example.com"
//! password = "hunter2"
//! max_station_tracks = 20
//! band_filter = "Nickelback%Creed"
//! flush_on_station_change = true
//! ```

use std::{fmt, fs, path::Path, time::Duration};

use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use veil::Redact;

use crate::error::{Error, Result};

/// Upstream account credentials.
#[derive(Clone, Default, Redact, PartialEq, Eq, Hash, Deserialize)]
pub struct Credentials {
    #[redact(partial)]
    pub email: String,
    #[redact]
    pub password: String,
    pub is_pandora_one: bool,
}

impl Credentials {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.email.is_empty() && !self.password.is_empty()
    }
}

/// Band names whose tracks are never enqueued.
///
/// Entries are matched as case-insensitive substrings of the track artist.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct BandFilter(Vec<String>);

impl BandFilter {
    /// Separator between entries in the textual form.
    pub const DELIMITER: char = '%';

    /// Parses a `%`-separated exclusion list. The empty string is a valid,
    /// empty filter.
    #[must_use]
    pub fn parse(filter: &str) -> Self {
        Self(
            filter
                .split(Self::DELIMITER)
                .map(str::trim)
                .filter(|band| !band.is_empty())
                .map(str::to_lowercase)
                .collect(),
        )
    }

    #[must_use]
    pub fn excludes(&self, artist: &str) -> bool {
        let artist = artist.to_lowercase();
        self.0.iter().any(|band| artist.contains(band.as_str()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for BandFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bands = self.0.iter();
        if let Some(first) = bands.next() {
            write!(f, "{first}")?;
        }
        for band in bands {
            write!(f, "{}{band}", Self::DELIMITER)?;
        }
        Ok(())
    }
}

/// A validated value, with the warning to show when the input was replaced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validated<T> {
    pub value: T,
    pub warning: Option<String>,
}

/// Settings as submitted by the host, before validation.
///
/// Keys are accepted in snake case as well as in the camel case the host's
/// settings form uses.
#[serde_as]
#[derive(Clone, Default, Redact, Deserialize)]
#[serde(default)]
pub struct Options {
    #[redact(partial)]
    pub email: Option<String>,
    #[redact]
    pub password: Option<String>,
    #[serde(alias = "isPandoraOne")]
    pub is_pandora_one: bool,
    #[serde(alias = "useCurl302WorkAround", alias = "useProxyWorkaround")]
    pub use_proxy_workaround: bool,
    #[serde(alias = "nextIsThumbsDown")]
    pub next_is_thumbs_down: bool,
    #[serde(alias = "superPrevious", alias = "replayOnDoubleBack")]
    pub replay_on_double_back: bool,
    #[serde(alias = "flushThem", alias = "flushOnStationChange")]
    pub flush_on_station_change: bool,
    /// Kept untyped: the host form may submit a number, a string or nothing.
    #[serde(alias = "maxStationTracks")]
    pub max_station_tracks: Option<serde_json::Value>,
    #[serde(alias = "bandFilter")]
    pub band_filter: Option<String>,

    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub reaper_interval: Option<Duration>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub track_max_age: Option<Duration>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub liveness_interval: Option<Duration>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub stall_threshold: Option<Duration>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub upstream_timeout: Option<Duration>,
}

impl Options {
    /// Maximum size of a settings file. Anything larger is not ours.
    const MAX_FILE_SIZE: u64 = 16 * 1024;

    /// Reads options from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is suspiciously large or
    /// is not valid TOML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Prevent out-of-memory condition: the settings file should be small.
        let file_size = fs::metadata(path)?.len();
        if file_size > Self::MAX_FILE_SIZE {
            return Err(Error::invalid_argument(format!(
                "{} is too large ({file_size} bytes)",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(Into::into)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub credentials: Credentials,

    /// Number of tracks per station to keep queued ahead.
    pub max_station_tracks: usize,
    pub band_filter: BandFilter,

    /// Resolve stream hosts to an address before handing URLs to the
    /// backend, for daemons that cannot follow the redirects.
    pub use_proxy_workaround: bool,
    pub next_is_thumbs_down: bool,
    pub flush_on_station_change: bool,
    pub replay_on_double_back: bool,

    pub reaper_interval: Duration,
    pub track_max_age: Duration,
    pub liveness_interval: Duration,
    pub stall_threshold: Duration,
    pub upstream_timeout: Duration,
}

impl Config {
    pub const MAX_STATION_TRACKS_DEFAULT: usize = 16;
    pub const MAX_STATION_TRACKS_MIN: usize = 8;

    pub const REAPER_INTERVAL: Duration = Duration::from_secs(5 * 60);
    pub const TRACK_MAX_AGE: Duration = Duration::from_secs(50 * 60);
    pub const LIVENESS_INTERVAL: Duration = Duration::from_secs(5);
    pub const STALL_THRESHOLD: Duration = Duration::from_secs(20);
    pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

    /// Validates host options into a configuration.
    ///
    /// Invalid values are replaced by their defaults; the returned warning,
    /// if any, should be shown to the user once.
    #[must_use]
    pub fn from_options(options: &Options) -> Validated<Self> {
        let max_station_tracks = validate_max_station_tracks(options.max_station_tracks.as_ref());

        let config = Self {
            credentials: Credentials {
                email: options.email.clone().unwrap_or_default(),
                password: options.password.clone().unwrap_or_default(),
                is_pandora_one: options.is_pandora_one,
            },
            max_station_tracks: max_station_tracks.value,
            band_filter: validate_band_filter(options.band_filter.as_deref()),
            use_proxy_workaround: options.use_proxy_workaround,
            next_is_thumbs_down: options.next_is_thumbs_down,
            flush_on_station_change: options.flush_on_station_change,
            replay_on_double_back: options.replay_on_double_back,
            reaper_interval: options.reaper_interval.unwrap_or(Self::REAPER_INTERVAL),
            track_max_age: options.track_max_age.unwrap_or(Self::TRACK_MAX_AGE),
            liveness_interval: options
                .liveness_interval
                .filter(|interval| !interval.is_zero())
                .unwrap_or(Self::LIVENESS_INTERVAL),
            stall_threshold: options.stall_threshold.unwrap_or(Self::STALL_THRESHOLD),
            upstream_timeout: options
                .upstream_timeout
                .filter(|timeout| !timeout.is_zero())
                .unwrap_or(Self::UPSTREAM_TIMEOUT),
        };

        Validated {
            value: config,
            warning: max_station_tracks.warning,
        }
    }

    /// Checks that credentials were provided at all.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` when the email address or password is
    /// missing.
    pub fn validate_credentials(&self) -> Result<()> {
        if self.credentials.is_complete() {
            Ok(())
        } else {
            Err(Error::unauthenticated(
                "need email address and password; see plugin settings",
            ))
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_options(&Options::default()).value
    }
}

/// Validates the number of tracks to keep queued per station.
///
/// Values of at least [`Config::MAX_STATION_TRACKS_MIN`] are kept. Anything
/// else, including input that is not a number, yields
/// [`Config::MAX_STATION_TRACKS_DEFAULT`] and a warning. Strings are read up
/// to the first non-digit, so `"20 tracks"` is 20.
#[must_use]
pub fn validate_max_station_tracks(input: Option<&serde_json::Value>) -> Validated<usize> {
    let parsed = input.and_then(|value| match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            // Truncate fractions like the host form does.
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        serde_json::Value::String(s) => parse_leading_int(s),
        _ => None,
    });

    let head = "Invalid Song Maximum!";
    let tail = format!(
        "Setting to default ({}).",
        Config::MAX_STATION_TRACKS_DEFAULT
    );

    match parsed {
        Some(n) if n >= Config::MAX_STATION_TRACKS_MIN as i64 => Validated {
            value: usize::try_from(n).unwrap_or(Config::MAX_STATION_TRACKS_DEFAULT),
            warning: None,
        },
        Some(_) => Validated {
            value: Config::MAX_STATION_TRACKS_DEFAULT,
            warning: Some(format!(
                "{head}\nShould be at least {}\n{tail}",
                Config::MAX_STATION_TRACKS_MIN
            )),
        },
        None => Validated {
            value: Config::MAX_STATION_TRACKS_DEFAULT,
            warning: Some(format!("{head}\n{tail}")),
        },
    }
}

/// Validates the band filter. A missing filter is an empty filter.
#[must_use]
pub fn validate_band_filter(input: Option<&str>) -> BandFilter {
    BandFilter::parse(input.unwrap_or_default())
}

/// Parses an optionally signed integer prefix, ignoring leading whitespace.
fn parse_leading_int(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s.strip_prefix('+').unwrap_or(s)),
    };

    let end = digits
        .find(|chr: char| !chr.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }

    // Saturate absurdly long inputs instead of rejecting them.
    let value = digits[..end].parse::<i64>().unwrap_or(i64::MAX);
    Some(sign * value)
}
