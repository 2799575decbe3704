//! pbxmon-core: canonical PBX event model, call/presence types, and the
//! pure presence projector. No IO, no async.

pub mod duration;
pub mod presence;
pub mod types;

pub use duration::{elapsed_secs, format_duration};
pub use presence::{ColorToken, IconToken, PresenceView, normalize_state, project};
pub use types::{
    ActiveCall, CallSnapshot, CallStatus, CanonicalEvent, EndpointPresence, EventKind, PbxError,
    TickerHandle,
};
