//! Tokio-backed duration ticker: one interval task per connected call.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};

use pbxmon_core::types::TickerHandle;
use pbxmon_daemon::TickScheduler;

use crate::pipeline::PipelineMsg;

/// Spawns a repeating task per ticker that feeds `PipelineMsg::Tick` back
/// into the pipeline. Must be driven from inside a tokio runtime.
#[derive(Debug)]
pub struct TokioTicks {
    tx: mpsc::Sender<PipelineMsg>,
    period: Duration,
    next_id: u64,
    tasks: HashMap<TickerHandle, AbortHandle>,
}

impl TokioTicks {
    pub fn new(tx: mpsc::Sender<PipelineMsg>, period: Duration) -> Self {
        Self {
            tx,
            period,
            next_id: 0,
            tasks: HashMap::new(),
        }
    }

    /// Number of ticker tasks not yet cancelled.
    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }
}

impl TickScheduler for TokioTicks {
    fn start(&mut self, call_id: &str) -> TickerHandle {
        self.next_id += 1;
        let handle = TickerHandle(self.next_id);
        let tx = self.tx.clone();
        let call_id = call_id.to_owned();
        let period = self.period;

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately; the answer already published 00:00.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let msg = PipelineMsg::Tick {
                    call_id: call_id.clone(),
                    handle,
                };
                if tx.send(msg).await.is_err() {
                    break;
                }
            }
        });

        self.tasks.insert(handle, task.abort_handle());
        handle
    }

    fn cancel(&mut self, handle: TickerHandle) {
        if let Some(task) = self.tasks.remove(&handle) {
            task.abort();
            tracing::debug!("cancelled {handle}");
        }
    }
}

impl Drop for TokioTicks {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}
