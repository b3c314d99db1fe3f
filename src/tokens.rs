use std::{
    fmt,
    time::{Duration, SystemTime},
};

use veil::Redact;

/// Upstream session token as handed out by
/// [`StationSource::authenticate`](crate::upstream::StationSource::authenticate).
#[derive(Clone, Redact, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionToken {
    #[redact]
    pub token: String,
    pub expires_at: SystemTime,
}

impl SessionToken {
    #[must_use]
    pub fn new(token: impl Into<String>, expires_at: SystemTime) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    #[must_use]
    pub fn time_to_live(&self) -> Duration {
        self.expires_at
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO)
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        SystemTime::now() >= self.expires_at
    }

    /// Time to wait before renewing this token, waking `threshold` before
    /// actual expiration so that calls in flight do not see it expire.
    #[must_use]
    pub fn renew_in(&self, threshold: Duration) -> Duration {
        self.time_to_live().saturating_sub(threshold)
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token)
    }
}
