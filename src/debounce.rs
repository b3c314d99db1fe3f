//! Debouncing of media buttons.
//!
//! Users tend to hammer next and previous. Presses that follow each other
//! too quickly are dropped to keep the daemon from being flooded, and a
//! lone press of previous can be turned into a replay of the current track.

use std::{fmt, time::Duration};

use tokio::time::Instant;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Previous,
    Next,
    /// Advance after a failure. Not a button press.
    Skip,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Previous => write!(f, "previous"),
            Self::Next => write!(f, "next"),
            Self::Skip => write!(f, "skip"),
        }
    }
}

/// How a press was classified.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Press {
    /// Perform the pressed action.
    Action(Action),
    /// Pressed too soon after the previous press; ignore.
    Spaz,
    /// Restart the current track instead of going back.
    Replay,
}

impl fmt::Display for Press {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Action(action) => action.fmt(f),
            Self::Spaz => write!(f, "spaz"),
            Self::Replay => write!(f, "replay"),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Debouncer {
    last_press: Option<Instant>,
    replay_enabled: bool,
}

impl Debouncer {
    /// Presses closer together than this are ignored.
    pub const SPAZ_PRESS: Duration = Duration::from_millis(250);

    /// A previous press this long after the last press replays the track.
    pub const REPLAY_PRESS: Duration = Duration::from_millis(1500);

    #[must_use]
    pub fn new(replay_enabled: bool) -> Self {
        Self {
            last_press: None,
            replay_enabled,
        }
    }

    pub fn set_replay_enabled(&mut self, enabled: bool) {
        self.replay_enabled = enabled;
    }

    /// Classifies a press at `now` and records it as the last press.
    pub fn classify(&mut self, action: Action, now: Instant) -> Press {
        // No earlier press counts as one long ago.
        let elapsed = self
            .last_press
            .map_or(Duration::MAX, |last| now.saturating_duration_since(last));
        self.last_press = Some(now);

        let press = if elapsed < Self::SPAZ_PRESS {
            debug!(
                "{action} pressed within {}ms of the last press",
                Self::SPAZ_PRESS.as_millis()
            );
            Press::Spaz
        } else if action == Action::Previous && elapsed > Self::REPLAY_PRESS && self.replay_enabled
        {
            Press::Replay
        } else {
            Press::Action(action)
        };

        debug!("user chose {press}");
        press
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACTIONS: [Action; 3] = [Action::Previous, Action::Next, Action::Skip];

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn rapid_presses_are_spaz() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(true);

        assert_eq!(
            debouncer.classify(Action::Next, start),
            Press::Action(Action::Next)
        );
        assert_eq!(debouncer.classify(Action::Next, start + ms(100)), Press::Spaz);
        // The ignored press still counts as the last press.
        assert_eq!(
            debouncer.classify(Action::Previous, start + ms(300)),
            Press::Spaz
        );
    }

    #[test]
    fn late_previous_replays_when_enabled() {
        let start = Instant::now();

        let mut debouncer = Debouncer::new(true);
        debouncer.classify(Action::Next, start);
        assert_eq!(
            debouncer.classify(Action::Previous, start + ms(1501)),
            Press::Replay
        );

        let mut debouncer = Debouncer::new(false);
        debouncer.classify(Action::Next, start);
        assert_eq!(
            debouncer.classify(Action::Previous, start + ms(1501)),
            Press::Action(Action::Previous)
        );
    }

    #[test]
    fn previous_between_thresholds_passes_through() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(true);
        debouncer.classify(Action::Next, start);
        assert_eq!(
            debouncer.classify(Action::Previous, start + ms(1000)),
            Press::Action(Action::Previous)
        );
    }

    #[test]
    fn first_press_is_never_spaz() {
        let mut debouncer = Debouncer::new(true);
        assert_eq!(debouncer.classify(Action::Previous, Instant::now()), Press::Replay);
    }

    #[test]
    fn randomized_sequences_follow_the_rules() {
        let mut rng = fastrand::Rng::with_seed(0x5eed);

        for replay_enabled in [false, true] {
            let start = Instant::now();
            let mut debouncer = Debouncer::new(replay_enabled);
            let mut now = start;
            let mut last: Option<Instant> = None;

            for _ in 0..2000 {
                now += ms(rng.u64(0..3000));
                let action = ACTIONS[rng.usize(..ACTIONS.len())];
                let press = debouncer.classify(action, now);

                let expected = match last.map(|last| now - last) {
                    Some(elapsed) if elapsed < ms(250) => Press::Spaz,
                    Some(elapsed)
                        if action == Action::Previous && elapsed > ms(1500) && replay_enabled =>
                    {
                        Press::Replay
                    }
                    None if action == Action::Previous && replay_enabled => Press::Replay,
                    _ => Press::Action(action),
                };
                assert_eq!(press, expected);
                last = Some(now);
            }
        }
    }
}
