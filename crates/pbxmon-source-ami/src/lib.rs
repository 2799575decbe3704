//! pbxmon-source-ami: push-channel source for PBX manager events.
//! Normalizes raw event payloads into `CanonicalEvent` and parses the
//! endpoint list used to seed presence.

pub mod endpoints;
pub mod translate;

pub use pbxmon_core::types;
pub use translate::{translate, translate_line};
