//! Presence projection: raw device/call state → label, color, icon.
//!
//! Priority order:
//! 1. Call lifecycle states (`CALLING`, `RINGING`, `CONNECTED`)
//! 2. `NOT INUSE` / `NOT IN USE` → Available
//! 3. `UNAVAILABLE` → Unavailable
//! 4. Anything else → Busy
//!
//! The Busy fallback also covers states the PBX reports as unknown or invalid.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorToken {
    Available,
    Busy,
    Unavailable,
    Calling,
    Ringing,
    Connected,
}

impl ColorToken {
    pub const ALL: [Self; 6] = [
        Self::Available,
        Self::Busy,
        Self::Unavailable,
        Self::Calling,
        Self::Ringing,
        Self::Connected,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Available => "Available",
            Self::Busy => "Busy",
            Self::Unavailable => "Unavailable",
            Self::Calling => "Calling",
            Self::Ringing => "Ringing",
            Self::Connected => "Connected",
        }
    }

    /// Dashboard color.
    pub fn hex(self) -> &'static str {
        match self {
            Self::Available => "#28a745",
            Self::Busy => "#ffc107",
            Self::Unavailable => "#dc3545",
            Self::Calling => "#ff9900",
            Self::Ringing => "#ffcc00",
            Self::Connected => "#00cc66",
        }
    }

    /// Human color name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Available | Self::Connected => "green",
            Self::Busy | Self::Ringing => "yellow",
            Self::Unavailable => "red",
            Self::Calling => "orange",
        }
    }

    /// SGR sequence for terminal rendering.
    pub fn ansi(self) -> &'static str {
        match self {
            Self::Available => "\x1b[32m",
            Self::Busy => "\x1b[33m",
            Self::Unavailable => "\x1b[31m",
            Self::Calling => "\x1b[38;5;208m",
            Self::Ringing => "\x1b[1;33m",
            Self::Connected => "\x1b[1;32m",
        }
    }

    pub fn icon(self) -> IconToken {
        match self {
            Self::Available => IconToken::Telephone,
            Self::Busy => IconToken::TelephoneMinus,
            Self::Unavailable => IconToken::TelephoneX,
            Self::Calling => IconToken::TelephoneOutbound,
            Self::Ringing => IconToken::TelephoneVibrate,
            Self::Connected => IconToken::Headset,
        }
    }
}

impl fmt::Display for ColorToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IconToken {
    Telephone,
    TelephoneX,
    TelephoneMinus,
    TelephoneOutbound,
    TelephoneVibrate,
    Headset,
}

/// Rendering-ready presence status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceView {
    pub label: String,
    pub color: ColorToken,
    pub icon: IconToken,
    pub annotation: Option<String>,
}

/// Uppercase and turn underscores into spaces, then trim.
pub fn normalize_state(raw: &str) -> String {
    raw.to_uppercase().replace('_', " ").trim().to_owned()
}

/// Classify a raw state string into a color token.
pub fn classify(raw: &str) -> ColorToken {
    match normalize_state(raw).as_str() {
        "CALLING" => ColorToken::Calling,
        "RINGING" => ColorToken::Ringing,
        "CONNECTED" => ColorToken::Connected,
        "NOT INUSE" | "NOT IN USE" => ColorToken::Available,
        "UNAVAILABLE" => ColorToken::Unavailable,
        _ => ColorToken::Busy,
    }
}

/// Project a raw state plus optional call annotation into a view.
pub fn project(raw_state: &str, call_annotation: Option<&str>) -> PresenceView {
    let color = classify(raw_state);
    PresenceView {
        label: color.label().to_owned(),
        color,
        icon: color.icon(),
        annotation: call_annotation.map(str::to_owned),
    }
}

/// Device states the PBX reports as a consequence of call activity.
///
/// When a call ends these are superseded by the idle state; anything else
/// (unavailable, invalid, unknown) is kept.
pub fn is_call_induced(raw: &str) -> bool {
    matches!(
        normalize_state(raw).as_str(),
        "INUSE" | "IN USE" | "RINGING" | "RINGINUSE" | "ONHOLD" | "ON HOLD" | "BUSY"
    )
}
