//! Duration ticker contract.
//!
//! The correlator owns one optional [`TickerHandle`] per connected call and
//! asks a [`TickScheduler`] to start or cancel the repeating timer. Each
//! tick is delivered back through `CallCorrelator::on_tick` with the handle
//! that produced it, so ticks from a cancelled timer can be recognized and
//! dropped.

use std::collections::BTreeMap;

use pbxmon_core::types::TickerHandle;

/// Starts and cancels per-call repeating timers.
pub trait TickScheduler {
    /// Start a repeating timer for `call_id` and return its handle.
    fn start(&mut self, call_id: &str) -> TickerHandle;

    /// Cancel a timer. Cancelling an unknown or already-cancelled handle is
    /// a no-op.
    fn cancel(&mut self, handle: TickerHandle);
}

/// Scheduler that records timers without running them. Ticks are driven by
/// calling `on_tick` directly (replays and tests).
#[derive(Debug, Default)]
pub struct ManualTicks {
    next_id: u64,
    active: BTreeMap<TickerHandle, String>,
    started: u64,
    cancelled: u64,
}

impl ManualTicks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of timers currently running.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Running timers for one call.
    pub fn active_for(&self, call_id: &str) -> Vec<TickerHandle> {
        self.active
            .iter()
            .filter(|(_, id)| id.as_str() == call_id)
            .map(|(handle, _)| *handle)
            .collect()
    }

    pub fn is_active(&self, handle: TickerHandle) -> bool {
        self.active.contains_key(&handle)
    }

    /// Total timers ever started.
    pub fn started(&self) -> u64 {
        self.started
    }

    /// Total timers actually cancelled.
    pub fn cancelled(&self) -> u64 {
        self.cancelled
    }
}

impl TickScheduler for ManualTicks {
    fn start(&mut self, call_id: &str) -> TickerHandle {
        self.next_id += 1;
        self.started += 1;
        let handle = TickerHandle(self.next_id);
        self.active.insert(handle, call_id.to_owned());
        handle
    }

    fn cancel(&mut self, handle: TickerHandle) {
        if self.active.remove(&handle).is_some() {
            self.cancelled += 1;
        }
    }
}
