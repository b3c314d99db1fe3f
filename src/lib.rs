//! Bridges Pandora radio stations into the play queue of a host media
//! player, playing the streams on MPD.
//!
//! The [`player::Player`] is the entry point. It is driven by the host and
//! talks to three collaborators: a [`upstream::StationSource`] for station
//! and track data, a [`backend::Backend`] such as [`mpd::Mpd`] for playback
//! and a [`host::Host`] that owns the shared queue.
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod backend;
pub mod config;
pub mod debounce;
pub mod error;
pub mod host;
pub mod mpd;
pub mod player;
pub mod queue;
pub mod session;
pub mod signal;
pub mod timers;
pub mod tokens;
pub mod track;
pub mod upstream;
