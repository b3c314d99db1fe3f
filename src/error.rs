//! Errors of the bridge.
//!
//! An [`Error`] pairs an [`ErrorKind`] with its cause. Kinds are a subset of
//! the gRPC status codes, chosen for how callers react to them:
//!
//! * [`ErrorKind::Unauthenticated`] and [`ErrorKind::PermissionDenied`] need
//!   the user to fix the settings, see [`Error::is_configuration`].
//! * [`ErrorKind::Unavailable`] and [`ErrorKind::Aborted`] are lost
//!   connections that are worth another attempt, see [`Error::is_transient`].
//! * [`ErrorKind::DeadlineExceeded`] is an upstream call that hung.
//! * [`ErrorKind::InvalidArgument`] and [`ErrorKind::NotFound`] are URIs and
//!   stations that do not resolve.
//!
//! ```rust
//! use pandora_bridge::error::{Error, ErrorKind, Result};
//!
//! fn station_name(id: u32) -> Result<String> {
//!     Err(Error::not_found(format!("no station with id {id}")))
//! }
//!
//! assert_eq!(station_name(3).unwrap_err().kind, ErrorKind::NotFound);
//! ```

use std::{fmt, io};

use thiserror::Error;

type Cause = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub error: Cause,
}

pub type Result<T> = std::result::Result<T, Error>;

#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
#[repr(u32)]
pub enum ErrorKind {
    #[error("unknown")]
    Unknown = 2,

    /// Input that can never succeed, such as a malformed URI.
    #[error("invalid argument")]
    InvalidArgument = 3,

    /// An upstream or backend call did not complete in time.
    #[error("deadline exceeded")]
    DeadlineExceeded = 4,

    #[error("not found")]
    NotFound = 5,

    #[error("permission denied")]
    PermissionDenied = 7,

    /// The backend refused a command in its current state.
    #[error("failed precondition")]
    FailedPrecondition = 9,

    /// A connection broke halfway through a command.
    #[error("aborted")]
    Aborted = 10,

    /// The upstream service or the playback daemon cannot be reached.
    #[error("unavailable")]
    Unavailable = 14,

    /// A peer answered with something we cannot make sense of.
    #[error("data loss")]
    DataLoss = 15,

    /// Missing or rejected credentials.
    #[error("unauthenticated")]
    Unauthenticated = 16,
}

macro_rules! constructor {
    ($($name:ident => $kind:ident),+ $(,)?) => {
        $(
            pub fn $name<E: Into<Cause>>(error: E) -> Self {
                Self::new(ErrorKind::$kind, error)
            }
        )+
    };
}

impl Error {
    pub fn new<E: Into<Cause>>(kind: ErrorKind, error: E) -> Self {
        Self {
            kind,
            error: error.into(),
        }
    }

    constructor! {
        aborted => Aborted,
        data_loss => DataLoss,
        deadline_exceeded => DeadlineExceeded,
        failed_precondition => FailedPrecondition,
        invalid_argument => InvalidArgument,
        not_found => NotFound,
        permission_denied => PermissionDenied,
        unauthenticated => Unauthenticated,
        unavailable => Unavailable,
        unknown => Unknown,
    }

    /// Whether the user has to change the settings for this to go away.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Unauthenticated | ErrorKind::PermissionDenied
        )
    }

    /// Whether the connection was lost and a fresh one may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, ErrorKind::Unavailable | ErrorKind::Aborted)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.kind)?;
        fmt::Display::fmt(&self.error, f)
    }
}

/// Most of these come from the MPD socket; the rest from reading the
/// settings file.
impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => Self::not_found(e),
            io::ErrorKind::PermissionDenied => Self::permission_denied(e),
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::NotConnected => Self::unavailable(e),
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::Interrupted => Self::aborted(e),
            io::ErrorKind::TimedOut => Self::deadline_exceeded(e),
            io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => Self::data_loss(e),
            io::ErrorKind::InvalidInput => Self::invalid_argument(e),
            _ => Self::unknown(e),
        }
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Self::deadline_exceeded(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(e: std::num::ParseIntError) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_details() {
        let err = Error::invalid_argument("failed to match uri: /spotify");
        assert_eq!(err.to_string(), "invalid argument: failed to match uri: /spotify");
    }

    #[test]
    fn lost_mpd_connections_are_transient() {
        for kind in [
            io::ErrorKind::ConnectionRefused,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::BrokenPipe,
        ] {
            assert!(Error::from(io::Error::new(kind, "mpd")).is_transient());
        }

        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "closed");
        assert_eq!(Error::from(eof).kind, ErrorKind::DataLoss);
        assert!(!Error::failed_precondition("ACK [2@0] {play} bad song index").is_transient());
    }

    #[test]
    fn configuration_errors_are_flagged() {
        assert!(Error::unauthenticated("no password").is_configuration());
        assert!(!Error::unavailable("fetch failed").is_configuration());
    }
}
