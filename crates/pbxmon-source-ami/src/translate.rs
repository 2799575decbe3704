//! Event translation from push-channel payloads to [`CanonicalEvent`].
//!
//! Accepted shapes:
//! - flat manager event: `{"Event": "Hangup", "Linkedid": ..., ...}`
//! - wrapped: `{"data": {...}}`
//! - bridge envelope: `{"event": "DialState", "data": {...}}`
//! - bare device tuple: `{"Device": "PJSIP/150", "State": "INUSE"}`
//!
//! Anything else is dropped. Drops are logged at debug level only.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use pbxmon_core::types::{CanonicalEvent, EventKind};

/// Manager event reporting a hint's numeric extension state.
const EXTENSION_STATUS_EVENT: &str = "ExtensionStatus";

/// Translate one raw payload. Returns `None` when the payload is not a
/// routable event.
///
/// The event is stamped with `now`, the receiver's clock. A manager
/// `Timestamp` header is carried in `pbx_timestamp` but never drives timing.
pub fn translate(raw: &Value, now: DateTime<Utc>) -> Option<CanonicalEvent> {
    let (body, envelope_name) = unwrap_envelope(raw)?;
    let mut event = translate_body(body, envelope_name, now)?;
    event.pbx_timestamp = parse_timestamp(body);
    Some(event)
}

fn translate_body(
    body: &Map<String, Value>,
    envelope_name: Option<&str>,
    timestamp: DateTime<Utc>,
) -> Option<CanonicalEvent> {
    let event_name = field(body, "Event").or(envelope_name);

    if field(body, "Event").is_none() && body.contains_key("Device") && body.contains_key("State")
    {
        return device_state_event(body, timestamp);
    }

    let Some(name) = event_name else {
        tracing::debug!("dropping payload without event name");
        return None;
    };

    if name.eq_ignore_ascii_case(EXTENSION_STATUS_EVENT) {
        return extension_status_event(body, timestamp);
    }

    let kind = match name.parse::<EventKind>() {
        Ok(kind) => kind,
        Err(_) => {
            tracing::debug!("dropping unhandled event type {name}");
            return None;
        }
    };

    if kind == EventKind::DeviceStateChange {
        return device_state_event(body, timestamp);
    }

    call_event(kind, body, timestamp)
}

/// Parse one NDJSON line and translate it. Blank and malformed lines are
/// dropped.
pub fn translate_line(line: &str, now: DateTime<Utc>) -> Option<CanonicalEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => translate(&value, now),
        Err(e) => {
            tracing::debug!("dropping malformed event line: {e}");
            None
        }
    }
}

/// Split the optional `{event, data}` envelope. Returns the inner object and
/// the envelope's event name, if any.
fn unwrap_envelope(raw: &Value) -> Option<(&Map<String, Value>, Option<&str>)> {
    let outer = raw.as_object()?;
    let envelope_name = ["event", "name"]
        .iter()
        .find_map(|key| outer.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty());

    match outer.get("data") {
        Some(Value::Object(inner)) => Some((inner, envelope_name)),
        _ => Some((outer, envelope_name)),
    }
}

/// Non-empty trimmed string field. Numeric values are not coerced.
fn field<'a>(body: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    body.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn owned(body: &Map<String, Value>, key: &str) -> Option<String> {
    field(body, key).map(str::to_owned)
}

/// Manager `Timestamp` header: epoch seconds with a fractional part, sent as
/// a string or a number.
fn parse_timestamp(body: &Map<String, Value>) -> Option<DateTime<Utc>> {
    let secs = match body.get("Timestamp")? {
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Number(n) => n.as_f64()?,
        _ => return None,
    };
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let (whole, nanos) = (secs.trunc() as i64, (secs.fract() * 1e9) as u32);
    DateTime::from_timestamp(whole, nanos)
}

/// Extension from a device string such as `PJSIP/150`.
fn extension_from_device(device: &str) -> Option<&str> {
    let mut parts = device.split('/');
    parts.next()?;
    parts.next().map(str::trim).filter(|s| !s.is_empty())
}

fn device_state_event(
    body: &Map<String, Value>,
    timestamp: DateTime<Utc>,
) -> Option<CanonicalEvent> {
    let device = field(body, "Device")?;
    let Some(extension) = extension_from_device(device) else {
        tracing::debug!("dropping device state for unroutable device {device}");
        return None;
    };
    let state = field(body, "State")?;
    Some(CanonicalEvent::device_state(extension, state, timestamp))
}

/// Map a numeric extension state to its device-state spelling.
pub fn extension_state_name(status: i64) -> &'static str {
    match status {
        0 => "NOT_INUSE",
        1 => "INUSE",
        2 => "BUSY",
        4 => "UNAVAILABLE",
        8 => "RINGING",
        16 => "ONHOLD",
        _ => "UNKNOWN",
    }
}

fn extension_status_event(
    body: &Map<String, Value>,
    timestamp: DateTime<Utc>,
) -> Option<CanonicalEvent> {
    let extension = field(body, "Exten")?;
    let status = match body.get("Status")? {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    Some(CanonicalEvent::device_state(
        extension,
        extension_state_name(status),
        timestamp,
    ))
}

fn call_event(
    kind: EventKind,
    body: &Map<String, Value>,
    timestamp: DateTime<Utc>,
) -> Option<CanonicalEvent> {
    let Some(call_id) = owned(body, "Linkedid") else {
        tracing::debug!("dropping {kind} without Linkedid");
        return None;
    };

    let callee_extension = match kind {
        EventKind::NewChannel => owned(body, "Exten"),
        _ => owned(body, "DestCallerIDNum").or_else(|| owned(body, "DestExten")),
    };

    let dial_status = match kind {
        EventKind::DialState | EventKind::DialEnd => owned(body, "DialStatus"),
        _ => None,
    };

    Some(CanonicalEvent {
        call_id,
        channel_id: owned(body, "Uniqueid").unwrap_or_default(),
        dest_channel_id: owned(body, "DestUniqueid"),
        caller_extension: owned(body, "CallerIDNum"),
        callee_extension,
        dial_status,
        ..CanonicalEvent::new(kind, timestamp)
    })
}
