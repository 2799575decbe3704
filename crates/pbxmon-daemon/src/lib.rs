//! pbxmon-daemon: call correlation and presence read model.
//! Consumes canonical events, tracks in-progress calls through their
//! lifecycle, drives per-call duration tickers, and projects per-extension
//! presence with version-based change tracking.

pub mod correlator;
pub mod ticker;

pub use correlator::{ApplyOutcome, CallCorrelator, PresenceChange, PresenceUpdate, StateVersion};
pub use pbxmon_core::types;
pub use ticker::{ManualTicks, TickScheduler};
