//! Process signals for the binary.
//!
//! Ctrl-C and SIGTERM end the bridge. Only Ctrl-C is available outside of
//! Unix.

use std::fmt;

use crate::error::Result;

#[cfg(unix)]
use tokio::signal::unix::{signal, Signal, SignalKind};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Received {
    Interrupt,
    Terminate,
}

impl fmt::Display for Received {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => write!(f, "Ctrl+C"),
            Self::Terminate => write!(f, "SIGTERM"),
        }
    }
}

pub struct Signals {
    #[cfg(unix)]
    terminate: Signal,
}

impl Signals {
    /// Registers the signal handlers.
    ///
    /// # Errors
    ///
    /// Returns an error when a handler cannot be registered.
    pub fn new() -> Result<Self> {
        #[cfg(unix)]
        {
            Ok(Self {
                terminate: signal(SignalKind::terminate())?,
            })
        }

        #[cfg(not(unix))]
        Ok(Self {})
    }

    /// Waits for the next signal.
    pub async fn recv(&mut self) -> Received {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => Received::Interrupt,
                _ = self.terminate.recv() => Received::Terminate,
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            Received::Interrupt
        }
    }
}
