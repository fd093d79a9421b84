//! keepwaked - keep the display awake, manually or on a daily schedule.
//!
//! The daemon owns a [`controller::Controller`] and drives it from a single
//! event loop. Users toggle it through a session `DBus` interface; the OS
//! hold is a systemd-logind inhibitor lock.

pub mod clock;
pub mod config;
pub mod controller;
pub mod daemon;
pub mod period;
pub mod power;
pub mod service;
