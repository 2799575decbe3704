//! Call correlator: event-driven read model for calls and presence.
//!
//! Canonical events are applied one at a time, in delivery order. Calls are
//! keyed by linked-call id and move through `Calling → Ringing → Connected`
//! until their last open leg hangs up. Every transition re-derives the
//! presence overlay of the call's participants.
//!
//! Push semantics are modeled two ways: registered listeners are invoked
//! synchronously for every presence update, and a version-based change log
//! lets clients poll `changes_since(version)`.
//!
//! Single-threaded and deterministic. No IO or async; timers are delegated
//! to a [`TickScheduler`].

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use pbxmon_core::duration::format_duration;
use pbxmon_core::presence::{PresenceView, is_call_induced};
use pbxmon_core::types::{
    ActiveCall, CallSnapshot, CallStatus, CanonicalEvent, EndpointPresence, EndpointSeed,
    EventKind, IDLE_DEVICE_STATE, ROUTING_EXTEN, TickerHandle, is_known_extension,
};

use crate::ticker::TickScheduler;

const DIAL_RINGING: &str = "RINGING";
const DIAL_ANSWER: &str = "ANSWER";

/// Monotonic version counter for change tracking.
pub type StateVersion = u64;

/// Change log entry for a presence update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenceChange {
    pub version: StateVersion,
    pub extension: String,
    pub timestamp: DateTime<Utc>,
}

/// Presence update delivered to listeners and returned from `apply`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenceUpdate {
    pub version: StateVersion,
    pub extension: String,
    pub view: PresenceView,
    pub timestamp: DateTime<Utc>,
}

/// Result of applying one event or tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub presence_updates: Vec<PresenceUpdate>,
    pub calls_started: usize,
    pub calls_ended: usize,
    /// Event was dropped (invalid, or referenced an unknown call).
    pub ignored: bool,
}

impl ApplyOutcome {
    fn ignored() -> Self {
        Self {
            ignored: true,
            ..Self::default()
        }
    }

    /// Extensions whose presence changed, in update order.
    pub fn changed_extensions(&self) -> Vec<&str> {
        self.presence_updates
            .iter()
            .map(|u| u.extension.as_str())
            .collect()
    }
}

type PresenceListener = Box<dyn FnMut(&PresenceUpdate) + Send>;

/// In-memory call and presence state for one monitoring session.
pub struct CallCorrelator<S> {
    /// In-progress calls, keyed by linked-call id.
    calls: HashMap<String, ActiveCall>,
    /// Per-extension presence, created lazily.
    presence: HashMap<String, EndpointPresence>,
    scheduler: S,
    version: StateVersion,
    changes: Vec<PresenceChange>,
    /// Listeners with an optional extension filter.
    listeners: Vec<(Option<String>, PresenceListener)>,
}

impl<S: fmt::Debug> fmt::Debug for CallCorrelator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallCorrelator")
            .field("calls", &self.calls)
            .field("presence", &self.presence)
            .field("scheduler", &self.scheduler)
            .field("version", &self.version)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl<S: TickScheduler> CallCorrelator<S> {
    pub fn new(scheduler: S) -> Self {
        Self {
            calls: HashMap::new(),
            presence: HashMap::new(),
            scheduler,
            version: 0,
            changes: Vec::new(),
            listeners: Vec::new(),
        }
    }

    /// Register a listener for presence updates. With `Some(extension)` the
    /// listener only sees updates for that extension.
    pub fn subscribe<F>(&mut self, extension: Option<&str>, listener: F)
    where
        F: FnMut(&PresenceUpdate) + Send + 'static,
    {
        self.listeners
            .push((extension.map(str::to_owned), Box::new(listener)));
    }

    /// Apply one canonical event. The event's timestamp is used as "now".
    pub fn apply(&mut self, event: &CanonicalEvent) -> ApplyOutcome {
        if let Err(e) = event.validate() {
            tracing::debug!("dropping event: {e}");
            return ApplyOutcome::ignored();
        }

        match event.kind {
            EventKind::NewChannel => self.on_new_channel(event),
            EventKind::DialState => self.on_dial_state(event),
            EventKind::DialEnd => self.on_dial_end(event),
            EventKind::Hangup => self.on_hangup(event),
            EventKind::DeviceStateChange => self.on_device_state(event),
        }
    }

    /// Deliver a duration tick for `call_id`. Ticks from a handle that is no
    /// longer the call's current ticker are dropped.
    pub fn on_tick(
        &mut self,
        call_id: &str,
        handle: TickerHandle,
        now: DateTime<Utc>,
    ) -> ApplyOutcome {
        let Some(call) = self.calls.get(call_id) else {
            tracing::debug!("tick {handle} for ended call {call_id}");
            return ApplyOutcome::ignored();
        };
        if call.ticker != Some(handle) || call.status != CallStatus::Connected {
            tracing::debug!("stale tick {handle} for call {call_id}");
            return ApplyOutcome::ignored();
        }

        let mut outcome = ApplyOutcome::default();
        self.apply_call_overlay(call_id, now, &mut outcome);
        outcome
    }

    /// Start the duration ticker for a call, cancelling any ticker it
    /// already has. Returns `None` for unknown calls.
    pub fn start_ticker(&mut self, call_id: &str) -> Option<TickerHandle> {
        let call = self.calls.get_mut(call_id)?;
        if let Some(previous) = call.ticker.take() {
            self.scheduler.cancel(previous);
        }
        let handle = self.scheduler.start(call_id);
        call.ticker = Some(handle);
        tracing::debug!("started {handle} for call {call_id}");
        Some(handle)
    }

    /// Drop every active call (tickers cancelled, overlays released) while
    /// keeping device states. Used when the push channel reconnects and the
    /// call picture can no longer be trusted.
    pub fn reset_calls(&mut self, now: DateTime<Utc>) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();
        let mut ids: Vec<String> = self.calls.keys().cloned().collect();
        ids.sort();

        let mut ended = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(mut call) = self.calls.remove(&id) {
                if let Some(handle) = call.ticker.take() {
                    self.scheduler.cancel(handle);
                }
                ended.push(call);
            }
        }

        for call in &ended {
            self.release_participants(call, now, &mut outcome);
        }
        outcome.calls_ended = ended.len();
        if !ended.is_empty() {
            tracing::info!("reset {} active calls", ended.len());
        }
        outcome
    }

    /// Seed presence from a full endpoint listing. Extensions without a
    /// reported state keep their current (or idle) device state; a missing
    /// name keeps the current one.
    pub fn seed_endpoints<I>(&mut self, endpoints: I, now: DateTime<Utc>) -> ApplyOutcome
    where
        I: IntoIterator<Item = EndpointSeed>,
    {
        let mut outcome = ApplyOutcome::default();
        for seed in endpoints {
            if !is_known_extension(Some(seed.extension.as_str())) {
                continue;
            }
            self.update_presence(&seed.extension, now, &mut outcome, |p| {
                if let Some(state) = seed.state {
                    p.raw_state = state;
                }
                if seed.name.is_some() {
                    p.name = seed.name;
                }
            });
        }
        outcome
    }

    // ── Event handlers ─────────────────────────────────────────────

    fn on_new_channel(&mut self, event: &CanonicalEvent) -> ApplyOutcome {
        let now = event.timestamp;

        if let Some(call) = self.calls.get_mut(&event.call_id) {
            if !event.channel_id.is_empty() {
                call.channels.insert(event.channel_id.clone());
            }
            tracing::debug!(
                "call {} gained leg {} ({} open)",
                event.call_id,
                event.channel_id,
                call.channels.len()
            );
            return ApplyOutcome::default();
        }

        let caller = event.caller_extension.as_deref();
        if !is_known_extension(caller) {
            tracing::debug!("new channel {} without caller", event.channel_id);
            return ApplyOutcome::ignored();
        }
        if event.callee_extension.as_deref() == Some(ROUTING_EXTEN) {
            tracing::debug!("new channel {} is a routing leg", event.channel_id);
            return ApplyOutcome::ignored();
        }

        let caller = caller.unwrap_or_default();
        let mut call = ActiveCall::new(&event.call_id, caller, CallStatus::Calling, now);
        if is_known_extension(event.callee_extension.as_deref()) {
            call.callee_extension = event.callee_extension.clone();
        }
        if !event.channel_id.is_empty() {
            call.channels.insert(event.channel_id.clone());
        }

        tracing::info!(
            "new call {}: {} → {}",
            call.id,
            call.caller_extension,
            call.callee_extension.as_deref().unwrap_or("?")
        );
        self.calls.insert(event.call_id.clone(), call);

        let mut outcome = ApplyOutcome {
            calls_started: 1,
            ..ApplyOutcome::default()
        };
        self.apply_call_overlay(&event.call_id, now, &mut outcome);
        outcome
    }

    fn on_dial_state(&mut self, event: &CanonicalEvent) -> ApplyOutcome {
        let now = event.timestamp;
        let ringing = event.dial_status_is(DIAL_RINGING);
        let mut outcome = ApplyOutcome::default();

        if !self.calls.contains_key(&event.call_id) {
            // A ringing dial can introduce a call whose new-channel event was
            // never seen, as long as it names the caller.
            if !ringing || !is_known_extension(event.caller_extension.as_deref()) {
                tracing::debug!("dial state for unknown call {}", event.call_id);
                return ApplyOutcome::ignored();
            }
            let caller = event.caller_extension.clone().unwrap_or_default();
            let call = ActiveCall::new(&event.call_id, caller, CallStatus::Ringing, now);
            tracing::info!("new call {} first seen ringing", call.id);
            self.calls.insert(event.call_id.clone(), call);
            outcome.calls_started = 1;
        }

        let replaced_callee = self.merge_dial_fields(event);

        if let Some(call) = self.calls.get_mut(&event.call_id) {
            if ringing && call.status == CallStatus::Calling {
                call.status = CallStatus::Ringing;
            }
            tracing::debug!(
                "call {} dial state {}: {} → {}",
                call.id,
                event.dial_status.as_deref().unwrap_or("-"),
                call.caller_extension,
                call.callee_extension.as_deref().unwrap_or("?")
            );
        }

        if let Some(previous) = replaced_callee {
            self.release_extension(&previous, now, &mut outcome);
        }
        self.apply_call_overlay(&event.call_id, now, &mut outcome);
        outcome
    }

    fn on_dial_end(&mut self, event: &CanonicalEvent) -> ApplyOutcome {
        let now = event.timestamp;

        let Some(call) = self.calls.get(&event.call_id) else {
            tracing::debug!("dial end for unknown call {}", event.call_id);
            return ApplyOutcome::ignored();
        };
        if !event.dial_status_is(DIAL_ANSWER) {
            tracing::debug!(
                "call {} dial ended with {}",
                event.call_id,
                event.dial_status.as_deref().unwrap_or("-")
            );
            return ApplyOutcome::default();
        }
        if call.status == CallStatus::Connected {
            tracing::debug!("call {} already connected", event.call_id);
            return ApplyOutcome::default();
        }

        let mut outcome = ApplyOutcome::default();
        let replaced_callee = self.merge_dial_fields(event);
        if let Some(call) = self.calls.get_mut(&event.call_id) {
            call.status = CallStatus::Connected;
            call.answered_at = Some(now);
            tracing::info!(
                "call {} connected: {} → {}",
                call.id,
                call.caller_extension,
                call.callee_extension.as_deref().unwrap_or("?")
            );
        }
        self.start_ticker(&event.call_id);

        if let Some(previous) = replaced_callee {
            self.release_extension(&previous, now, &mut outcome);
        }
        self.apply_call_overlay(&event.call_id, now, &mut outcome);
        outcome
    }

    fn on_hangup(&mut self, event: &CanonicalEvent) -> ApplyOutcome {
        let Some(call) = self.calls.get_mut(&event.call_id) else {
            tracing::debug!("hangup for unknown call {}", event.call_id);
            return ApplyOutcome::ignored();
        };

        call.channels.remove(&event.channel_id);
        if !call.channels.is_empty() {
            tracing::debug!(
                "leg {} hung up, call {} has {} open legs",
                event.channel_id,
                event.call_id,
                call.channels.len()
            );
            return ApplyOutcome::default();
        }

        // Handle is cleared before the call is removed.
        if let Some(handle) = call.ticker.take() {
            self.scheduler.cancel(handle);
        }
        let Some(call) = self.calls.remove(&event.call_id) else {
            return ApplyOutcome::default();
        };

        tracing::info!(
            "call {} ended: {} → {}",
            call.id,
            call.caller_extension,
            call.callee_extension.as_deref().unwrap_or("?")
        );

        let mut outcome = ApplyOutcome {
            calls_ended: 1,
            ..ApplyOutcome::default()
        };
        self.release_participants(&call, event.timestamp, &mut outcome);
        outcome
    }

    fn on_device_state(&mut self, event: &CanonicalEvent) -> ApplyOutcome {
        let (Some(extension), Some(state)) = (&event.extension, &event.device_state) else {
            return ApplyOutcome::ignored();
        };
        let mut outcome = ApplyOutcome::default();
        self.update_presence(extension, event.timestamp, &mut outcome, |p| {
            p.raw_state = state.clone();
        });
        outcome
    }

    // ── Call helpers ───────────────────────────────────────────────

    /// Merge channel ids and the destination extension of a dial event.
    /// Returns the previous callee when a different one replaced it.
    fn merge_dial_fields(&mut self, event: &CanonicalEvent) -> Option<String> {
        let call = self.calls.get_mut(&event.call_id)?;

        if !event.channel_id.is_empty() {
            call.channels.insert(event.channel_id.clone());
        }
        if let Some(dest) = event.dest_channel_id.as_deref()
            && !dest.is_empty()
        {
            call.channels.insert(dest.to_owned());
        }

        let callee = event.callee_extension.as_deref();
        if !is_known_extension(callee) || callee == Some(call.caller_extension.as_str()) {
            return None;
        }
        let previous = call.callee_extension.replace(callee.unwrap_or_default().to_owned());
        previous.filter(|p| Some(p.as_str()) != callee)
    }

    /// Re-derive the presence overlay of a call's participants.
    fn apply_call_overlay(&mut self, call_id: &str, now: DateTime<Utc>, outcome: &mut ApplyOutcome) {
        let Some(call) = self.calls.get(call_id) else {
            return;
        };

        let caller = call.caller_extension.clone();
        let callee = call.callee_extension.clone();
        let status = call.status;
        let duration = call.duration(now);

        match status {
            CallStatus::Calling | CallStatus::Ringing => {
                let annotation = callee.as_ref().map(|c| format!("→ {c}"));
                self.update_presence(&caller, now, outcome, |p| {
                    p.call_state = Some(CallStatus::Calling);
                    p.call_annotation = annotation;
                });
                if status == CallStatus::Ringing
                    && let Some(callee) = callee
                {
                    let annotation = format!("← {caller}");
                    self.update_presence(&callee, now, outcome, |p| {
                        p.call_state = Some(CallStatus::Ringing);
                        p.call_annotation = Some(annotation);
                    });
                }
            }
            CallStatus::Connected => {
                let duration = duration.unwrap_or_else(|| format_duration(0));
                let peer = callee.clone().unwrap_or_else(|| "?".to_owned());
                let annotation = format!("↔ {peer} ({duration})");
                self.update_presence(&caller, now, outcome, |p| {
                    p.call_state = Some(CallStatus::Connected);
                    p.call_annotation = Some(annotation);
                });
                if let Some(callee) = callee {
                    let annotation = format!("↔ {caller} ({duration})");
                    self.update_presence(&callee, now, outcome, |p| {
                        p.call_state = Some(CallStatus::Connected);
                        p.call_annotation = Some(annotation);
                    });
                }
            }
        }
    }

    /// Release the overlay of every participant of an ended call.
    fn release_participants(
        &mut self,
        call: &ActiveCall,
        now: DateTime<Utc>,
        outcome: &mut ApplyOutcome,
    ) {
        for extension in call.participants() {
            self.release_extension(extension, now, outcome);
        }
    }

    /// Clear an extension's call overlay. If another call still overlays it,
    /// that call's overlay is re-applied instead. Call-induced device states
    /// revert to idle; independent ones (unavailable, unknown) stay.
    fn release_extension(&mut self, extension: &str, now: DateTime<Utc>, outcome: &mut ApplyOutcome) {
        let other_call = self
            .active_calls()
            .into_iter()
            .find(|c| c.overlays(extension))
            .map(|c| c.id.clone());

        if let Some(call_id) = other_call {
            self.apply_call_overlay(&call_id, now, outcome);
            return;
        }

        self.update_presence(extension, now, outcome, |p| {
            p.clear_call();
            if is_call_induced(&p.raw_state) {
                p.raw_state = IDLE_DEVICE_STATE.to_owned();
            }
        });
    }

    // ── Presence helpers ───────────────────────────────────────────

    /// Mutate (creating if needed) an extension's presence and publish an
    /// update when its visible state changed.
    fn update_presence<F>(
        &mut self,
        extension: &str,
        now: DateTime<Utc>,
        outcome: &mut ApplyOutcome,
        mutate: F,
    ) where
        F: FnOnce(&mut EndpointPresence),
    {
        let mut created = false;
        let entry = self
            .presence
            .entry(extension.to_owned())
            .or_insert_with(|| {
                created = true;
                EndpointPresence::new(extension, now)
            });

        let before = (
            entry.raw_state.clone(),
            entry.call_state,
            entry.call_annotation.clone(),
            entry.name.clone(),
        );
        mutate(entry);
        entry.last_updated = now;

        let changed = created
            || before.0 != entry.raw_state
            || before.1 != entry.call_state
            || before.2 != entry.call_annotation
            || before.3 != entry.name;
        if !changed {
            return;
        }

        let view = entry.view();
        self.publish(extension, view, now, outcome);
    }

    fn publish(
        &mut self,
        extension: &str,
        view: PresenceView,
        now: DateTime<Utc>,
        outcome: &mut ApplyOutcome,
    ) {
        self.version += 1;
        self.changes.push(PresenceChange {
            version: self.version,
            extension: extension.to_owned(),
            timestamp: now,
        });

        let update = PresenceUpdate {
            version: self.version,
            extension: extension.to_owned(),
            view,
            timestamp: now,
        };
        for (filter, listener) in &mut self.listeners {
            if filter.as_deref().is_none_or(|f| f == extension) {
                listener(&update);
            }
        }
        outcome.presence_updates.push(update);
    }

    // ── Client API ─────────────────────────────────────────────────

    /// Presence of one extension.
    pub fn presence(&self, extension: &str) -> Option<&EndpointPresence> {
        self.presence.get(extension)
    }

    /// All presence records, sorted by extension.
    pub fn list_presence(&self) -> Vec<&EndpointPresence> {
        let mut out: Vec<_> = self.presence.values().collect();
        out.sort_by(|a, b| a.extension.cmp(&b.extension));
        out
    }

    /// Active calls ordered by start time (ties broken by call id).
    pub fn active_calls(&self) -> Vec<&ActiveCall> {
        let mut out: Vec<_> = self.calls.values().collect();
        out.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    /// Active-call snapshot rows with durations as of `now`.
    pub fn call_snapshots(&self, now: DateTime<Utc>) -> Vec<CallSnapshot> {
        self.active_calls()
            .into_iter()
            .map(|c| CallSnapshot::from_call(c, now))
            .collect()
    }

    pub fn get_call(&self, call_id: &str) -> Option<&ActiveCall> {
        self.calls.get(call_id)
    }

    pub fn call_count(&self) -> usize {
        self.calls.len()
    }

    /// Changes since a given version (for `presence_changed`).
    pub fn changes_since(&self, since_version: StateVersion) -> Vec<&PresenceChange> {
        let start = self.changes.partition_point(|c| c.version <= since_version);
        self.changes[start..].iter().collect()
    }

    /// Remove change entries with version <= `before_version`.
    pub fn trim_changes_before(&mut self, before_version: StateVersion) {
        self.changes.retain(|c| c.version > before_version);
    }

    /// Current presence version.
    pub fn version(&self) -> StateVersion {
        self.version
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }
}
