//! Background timers of a playback session.
//!
//! A [`Timer`] owns the cancellation handle of one spawned task. Starting a
//! running timer restarts it; stopping is idempotent and may happen before
//! the timer was ever started. The decisions the timers make are kept in
//! plain functions here so that they can be tested without a runtime.

use std::{
    future::Future,
    ops::ControlFlow,
    time::{Duration, SystemTime},
};

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    backend::{BackendId, PlaybackState, Status},
    host::QueueItem,
    tokens::SessionToken,
};

#[derive(Debug)]
pub struct Timer {
    name: &'static str,
    token: Option<CancellationToken>,
}

impl Timer {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self { name, token: None }
    }

    /// Spawns `task` with a child of `parent`, stopping a previous run.
    pub fn start<F, Fut>(&mut self, parent: &CancellationToken, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let restarted = self.is_running();
        self.stop();

        let token = parent.child_token();
        tokio::spawn(task(token.clone()));
        self.token = Some(token);

        if restarted {
            debug!("{} timer restarted", self.name);
        } else {
            debug!("{} timer started", self.name);
        }
    }

    pub fn stop(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
            debug!("{} timer stopped", self.name);
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.token.as_ref().is_some_and(|token| !token.is_cancelled())
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Shortest period of a periodic timer.
const MIN_PERIOD: Duration = Duration::from_secs(1);

/// Calls `tick` every `period` until cancelled or until `tick` breaks.
///
/// The first tick happens one period from now.
pub async fn every<F, Fut>(period: Duration, token: CancellationToken, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ControlFlow<()>>,
{
    let period = period.max(MIN_PERIOD);
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            () = token.cancelled() => break,

            _ = interval.tick() => {
                if tick().await.is_break() {
                    break;
                }
            }
        }
    }
}

/// Time before token expiry at which to re-authenticate.
pub const REAUTH_AHEAD: Duration = Duration::from_secs(60);

/// Shortest wait between two re-authentications, for tokens that live no
/// longer than [`REAUTH_AHEAD`].
pub const REAUTH_MIN_DELAY: Duration = Duration::from_secs(10);

/// How long to wait before re-authenticating.
#[must_use]
pub fn reauth_delay(token: Option<&SessionToken>) -> Duration {
    token
        .map_or(Duration::ZERO, |token| token.renew_in(REAUTH_AHEAD))
        .max(REAUTH_MIN_DELAY)
}

/// Back-off after the `attempt`-th failed re-authentication, counting from
/// zero: 30 seconds doubling up to 10 minutes, plus up to a quarter of
/// jitter.
#[must_use]
pub fn retry_delay(attempt: u32) -> Duration {
    const BASE_SECS: u64 = 30;
    const MAX_SECS: u64 = 10 * 60;

    let secs = BASE_SECS
        .saturating_mul(1 << attempt.min(5))
        .min(MAX_SECS);
    let jitter = fastrand::u64(0..=secs * 250);

    Duration::from_secs(secs) + Duration::from_millis(jitter)
}

/// Tells whether the backend stopped advancing a playing stream.
#[derive(Clone, Debug, Default)]
pub struct StallDetector {
    last: Option<Sample>,
}

#[derive(Copy, Clone, Debug)]
struct Sample {
    song: Option<BackendId>,
    elapsed: Duration,
    since: Instant,
}

impl StallDetector {
    /// Samples `state` at `now`. Returns `true` once the elapsed time of the
    /// same playing song did not advance for `threshold`; detection then
    /// starts over.
    pub fn observe(&mut self, state: &PlaybackState, now: Instant, threshold: Duration) -> bool {
        if state.status != Status::Play {
            self.last = None;
            return false;
        }

        match self.last {
            Some(last) if last.song == state.song && last.elapsed == state.elapsed => {
                if now.saturating_duration_since(last.since) >= threshold {
                    self.last = None;
                    return true;
                }
            }
            _ => {
                self.last = Some(Sample {
                    song: state.song,
                    elapsed: state.elapsed,
                    since: now,
                });
            }
        }

        false
    }
}

/// Indices of this service's items fetched longer than `max_age` ago, in
/// descending order. The item at `position` is never included.
#[must_use]
pub fn stale_indices(
    queue: &[QueueItem],
    position: usize,
    now: SystemTime,
    max_age: Duration,
) -> Vec<usize> {
    let mut indices: Vec<usize> = queue
        .iter()
        .enumerate()
        .filter(|(i, item)| {
            *i != position
                && item.is_ours()
                && item
                    .track
                    .as_ref()
                    .is_some_and(|track| track.is_stale(now, max_age))
        })
        .map(|(i, _)| i)
        .collect();

    indices.reverse();
    indices
}
