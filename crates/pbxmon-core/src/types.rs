use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::duration::{elapsed_secs, format_duration};
use crate::presence::{self, PresenceView};

/// Caller-ID value the PBX reports when a number is not known.
pub const UNKNOWN_CALLER_ID: &str = "<unknown>";

/// Dialplan extension used for generic routing legs (never a real callee).
pub const ROUTING_EXTEN: &str = "s";

/// Device state assumed for an extension before any device event arrives.
pub const IDLE_DEVICE_STATE: &str = "NOT_INUSE";

/// Whether an extension value names a real endpoint.
pub fn is_known_extension(ext: Option<&str>) -> bool {
    ext.is_some_and(|e| !e.trim().is_empty() && e != UNKNOWN_CALLER_ID)
}

// ─── Event ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NewChannel,
    DialState,
    DialEnd,
    Hangup,
    DeviceStateChange,
}

impl EventKind {
    pub const ALL: [Self; 5] = [
        Self::NewChannel,
        Self::DialState,
        Self::DialEnd,
        Self::Hangup,
        Self::DeviceStateChange,
    ];

    /// Manager-interface event name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewChannel => "Newchannel",
            Self::DialState => "DialState",
            Self::DialEnd => "DialEnd",
            Self::Hangup => "Hangup",
            Self::DeviceStateChange => "DeviceStateChange",
        }
    }

    /// Kinds that belong to a call and must carry a linked-call id.
    pub fn is_call_event(self) -> bool {
        !matches!(self, Self::DeviceStateChange)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = PbxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "newchannel" => Ok(Self::NewChannel),
            "dialstate" => Ok(Self::DialState),
            "dialend" => Ok(Self::DialEnd),
            "hangup" => Ok(Self::Hangup),
            "devicestatechange" => Ok(Self::DeviceStateChange),
            _ => Err(PbxError::UnknownEventKind(s.to_owned())),
        }
    }
}

/// Normalized push-channel event. Produced by the event normalizer,
/// consumed by the call correlator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub kind: EventKind,
    /// Linked-call id shared by every leg of one call. Empty for device events.
    pub call_id: String,
    /// Leg reporting the event.
    pub channel_id: String,
    /// Destination leg named by a dial event.
    pub dest_channel_id: Option<String>,
    pub caller_extension: Option<String>,
    pub callee_extension: Option<String>,
    pub dial_status: Option<String>,
    pub device_state: Option<String>,
    /// Extension a device-state event refers to.
    pub extension: Option<String>,
    /// Receive time on the daemon's clock. Call durations and ticks are
    /// measured against this.
    pub timestamp: DateTime<Utc>,
    /// Time reported by the PBX, kept for logging only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pbx_timestamp: Option<DateTime<Utc>>,
}

impl CanonicalEvent {
    /// Empty event of the given kind; normalizers fill the rest.
    pub fn new(kind: EventKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            call_id: String::new(),
            channel_id: String::new(),
            dest_channel_id: None,
            caller_extension: None,
            callee_extension: None,
            dial_status: None,
            device_state: None,
            extension: None,
            timestamp,
            pbx_timestamp: None,
        }
    }

    /// Device-state event for `extension`.
    pub fn device_state(
        extension: impl Into<String>,
        state: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            extension: Some(extension.into()),
            device_state: Some(state.into()),
            ..Self::new(EventKind::DeviceStateChange, timestamp)
        }
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), PbxError> {
        if self.kind.is_call_event() {
            if self.call_id.trim().is_empty() {
                return Err(PbxError::MissingCallId { kind: self.kind });
            }
        } else {
            if !is_known_extension(self.extension.as_deref()) {
                return Err(PbxError::InvalidEvent(
                    "device state event without extension".to_owned(),
                ));
            }
            if self.device_state.is_none() {
                return Err(PbxError::InvalidEvent(
                    "device state event without state".to_owned(),
                ));
            }
        }
        Ok(())
    }

    /// Dial status compared case-insensitively.
    pub fn dial_status_is(&self, status: &str) -> bool {
        self.dial_status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case(status))
    }
}

// ─── Call ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Calling,
    Ringing,
    Connected,
}

impl CallStatus {
    /// Raw state string used when the call overlay replaces device state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Calling => "CALLING",
            Self::Ringing => "RINGING",
            Self::Connected => "CONNECTED",
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque id of a running duration ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TickerHandle(pub u64);

impl fmt::Display for TickerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ticker-{}", self.0)
    }
}

/// An in-progress call, keyed by its linked-call id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveCall {
    pub id: String,
    pub caller_extension: String,
    /// Unknown until a dial attempt names a destination.
    pub callee_extension: Option<String>,
    pub status: CallStatus,
    /// Legs still open.
    pub channels: BTreeSet<String>,
    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub ticker: Option<TickerHandle>,
}

impl ActiveCall {
    pub fn new(
        id: impl Into<String>,
        caller_extension: impl Into<String>,
        status: CallStatus,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            caller_extension: caller_extension.into(),
            callee_extension: None,
            status,
            channels: BTreeSet::new(),
            started_at,
            answered_at: None,
            ticker: None,
        }
    }

    /// True if `ext` is the caller or the callee.
    pub fn involves(&self, ext: &str) -> bool {
        self.caller_extension == ext || self.callee_extension.as_deref() == Some(ext)
    }

    /// True if this call currently shows an overlay on `ext`. The callee is
    /// only annotated once its phone rings.
    pub fn overlays(&self, ext: &str) -> bool {
        if self.caller_extension == ext {
            return true;
        }
        self.callee_extension.as_deref() == Some(ext)
            && matches!(self.status, CallStatus::Ringing | CallStatus::Connected)
    }

    /// Participants, caller first.
    pub fn participants(&self) -> Vec<&str> {
        let mut out = vec![self.caller_extension.as_str()];
        if let Some(callee) = self.callee_extension.as_deref()
            && callee != self.caller_extension
        {
            out.push(callee);
        }
        out
    }

    /// `mm:ss` since answer, `None` before the call connects.
    pub fn duration(&self, now: DateTime<Utc>) -> Option<String> {
        self.answered_at
            .map(|answered| format_duration(elapsed_secs(answered, now)))
    }
}

/// Row of the active-call snapshot handed to the view layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSnapshot {
    pub id: String,
    pub caller: String,
    pub callee: Option<String>,
    pub status: CallStatus,
    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub duration: String,
}

impl CallSnapshot {
    pub fn from_call(call: &ActiveCall, now: DateTime<Utc>) -> Self {
        Self {
            id: call.id.clone(),
            caller: call.caller_extension.clone(),
            callee: call.callee_extension.clone(),
            status: call.status,
            started_at: call.started_at,
            answered_at: call.answered_at,
            duration: call.duration(now).unwrap_or_else(|| format_duration(0)),
        }
    }
}

// ─── Presence ─────────────────────────────────────────────────────

/// One row of a full endpoint listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EndpointSeed {
    #[serde(alias = "Extension")]
    pub extension: String,
    #[serde(default, alias = "Name")]
    pub name: Option<String>,
    #[serde(default, alias = "State")]
    pub state: Option<String>,
}

/// Per-extension presence record. Created on first sight, never removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointPresence {
    pub extension: String,
    /// Display name from the endpoint listing.
    #[serde(default)]
    pub name: Option<String>,
    /// Last device state reported for the extension.
    pub raw_state: String,
    /// Overlay from an active call; overrides `raw_state` when set.
    pub call_state: Option<CallStatus>,
    /// Peer and direction, plus duration once connected.
    pub call_annotation: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl EndpointPresence {
    pub fn new(extension: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            extension: extension.into(),
            name: None,
            raw_state: IDLE_DEVICE_STATE.to_owned(),
            call_state: None,
            call_annotation: None,
            last_updated: now,
        }
    }

    /// State the projector sees: the call overlay wins over device state.
    pub fn effective_state(&self) -> &str {
        match self.call_state {
            Some(status) => status.as_str(),
            None => &self.raw_state,
        }
    }

    /// Rendering-ready status.
    pub fn view(&self) -> PresenceView {
        presence::project(self.effective_state(), self.call_annotation.as_deref())
    }

    pub fn clear_call(&mut self) {
        self.call_state = None;
        self.call_annotation = None;
    }
}

// ─── Error ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PbxError {
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("{kind} event without linked call id")]
    MissingCallId { kind: EventKind },

    #[error("unknown event kind: {0}")]
    UnknownEventKind(String),
}

// ─── Tests ────────────────────────────────────────────────────────
