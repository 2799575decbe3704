//! Event pipeline: wires event sources → translate → correlator.
//! Runs as a tokio task that owns every state mutation; ingest and ticker
//! tasks only talk to it through the `PipelineMsg` channel.

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc};
use tokio::time::Duration;

use pbxmon_core::types::TickerHandle;
use pbxmon_daemon::CallCorrelator;
use pbxmon_source_ami::endpoints::{EndpointSeed, parse_endpoint_list};
use pbxmon_source_ami::translate_line;

use crate::cli::{DaemonOpts, ReconnectPolicy};
use crate::ticker::TokioTicks;
use crate::{ingest, server};

/// Pipeline channel capacity.
const CHANNEL_CAPACITY: usize = 1024;

/// Change log entries kept for `presence_changed` polling.
const CHANGE_RETENTION: u64 = 4096;

/// Messages consumed by the pipeline task, processed strictly in order.
#[derive(Debug)]
pub enum PipelineMsg {
    /// One raw NDJSON line from an event source.
    Raw(String),
    /// Duration tick from a running ticker.
    Tick {
        call_id: String,
        handle: TickerHandle,
    },
    /// The push bridge connected again after the first connection.
    Reconnected,
}

/// Shared daemon state protected by a mutex.
#[derive(Debug)]
pub struct DaemonState {
    pub correlator: CallCorrelator<TokioTicks>,
    /// Lines that translated and were accepted by the correlator.
    pub events_applied: u64,
    /// Lines dropped as unroutable, invalid, or for unknown calls.
    pub events_dropped: u64,
    pub reconnects: u64,
}

impl DaemonState {
    pub fn new(ticks: TokioTicks) -> Self {
        Self {
            correlator: CallCorrelator::new(ticks),
            events_applied: 0,
            events_dropped: 0,
            reconnects: 0,
        }
    }
}

/// Apply one pipeline message to the state.
pub(crate) fn handle_msg(
    state: &mut DaemonState,
    msg: PipelineMsg,
    policy: ReconnectPolicy,
    now: DateTime<Utc>,
) {
    match msg {
        PipelineMsg::Raw(line) => match translate_line(&line, now) {
            Some(event) => {
                if let Some(pbx_time) = event.pbx_timestamp {
                    tracing::trace!(
                        "{} received {}ms after PBX time",
                        event.kind,
                        (now - pbx_time).num_milliseconds()
                    );
                }
                let outcome = state.correlator.apply(&event);
                if outcome.ignored {
                    state.events_dropped += 1;
                } else {
                    state.events_applied += 1;
                }
            }
            None => state.events_dropped += 1,
        },
        PipelineMsg::Tick { call_id, handle } => {
            state.correlator.on_tick(&call_id, handle, now);
        }
        PipelineMsg::Reconnected => {
            state.reconnects += 1;
            match policy {
                ReconnectPolicy::ResetCalls => {
                    let outcome = state.correlator.reset_calls(now);
                    tracing::info!(
                        "push bridge reconnected, dropped {} active calls",
                        outcome.calls_ended
                    );
                }
                ReconnectPolicy::Keep => {
                    tracing::info!("push bridge reconnected, keeping state");
                }
            }
        }
    }

    let version = state.correlator.version();
    if version > CHANGE_RETENTION {
        state.correlator.trim_changes_before(version - CHANGE_RETENTION);
    }
}

/// Read an endpoint listing file for the startup presence refresh.
pub(crate) fn load_endpoints(path: &str) -> anyhow::Result<Vec<EndpointSeed>> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read endpoint listing {path}"))?;
    let seeds = parse_endpoint_list(&body)
        .with_context(|| format!("invalid endpoint listing {path}"))?;
    Ok(seeds)
}

async fn run_pipeline(
    mut rx: mpsc::Receiver<PipelineMsg>,
    state: Arc<Mutex<DaemonState>>,
    policy: ReconnectPolicy,
) {
    while let Some(msg) = rx.recv().await {
        let mut st = state.lock().await;
        handle_msg(&mut st, msg, policy, Utc::now());
    }
}

/// Run the daemon: starts the pipeline, event ingest and UDS server, waits
/// for a shutdown signal.
pub async fn run_daemon(opts: DaemonOpts, socket_path: &str) -> anyhow::Result<()> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let period = Duration::from_millis(opts.tick_interval_ms.max(1));
    let state = Arc::new(Mutex::new(DaemonState::new(TokioTicks::new(
        tx.clone(),
        period,
    ))));

    if let Some(ref path) = opts.endpoints {
        let seeds = load_endpoints(path)?;
        let mut st = state.lock().await;
        let outcome = st.correlator.seed_endpoints(seeds, Utc::now());
        tracing::info!(
            "seeded {} extensions from {path}",
            outcome.presence_updates.len()
        );
    }

    // Start event ingest
    let ingest_handle = match (opts.events.clone(), opts.push_socket.clone()) {
        (Some(source), _) => {
            let tx = tx.clone();
            tokio::spawn(async move {
                match ingest::run_events(&source, tx).await {
                    Ok(count) => {
                        tracing::info!("event source {source} finished after {count} lines");
                    }
                    Err(e) => tracing::error!("event source {source} failed: {e}"),
                }
            })
        }
        (None, Some(push_socket)) => {
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Err(e) = ingest::run_push_socket(&push_socket, tx).await {
                    tracing::error!("push socket error: {e}");
                }
            })
        }
        (None, None) => anyhow::bail!("no event source: pass --events or --push-socket"),
    };
    drop(tx);

    // Start UDS server
    let server_state = Arc::clone(&state);
    let server_socket = socket_path.to_string();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::run_server(&server_socket, server_state).await {
            tracing::error!("UDS server error: {e}");
        }
    });

    // Start pipeline
    let pipeline_state = Arc::clone(&state);
    let policy = opts.on_reconnect;
    let pipeline_handle = tokio::spawn(async move {
        run_pipeline(rx, pipeline_state, policy).await;
    });

    // Wait for shutdown signal (ctrl-c or SIGTERM)
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            tracing::info!("received ctrl-c, shutting down");
        }
    };

    tokio::select! {
        () = shutdown => {}
        _ = pipeline_handle => {
            tracing::warn!("pipeline exited unexpectedly");
        }
        _ = server_handle => {
            tracing::warn!("server exited unexpectedly");
        }
    }

    ingest_handle.abort();

    // Cleanup sockets
    let _ = std::fs::remove_file(socket_path);
    if let Some(ref push_socket) = opts.push_socket {
        let _ = std::fs::remove_file(push_socket);
    }
    tracing::info!("daemon stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbxmon_core::presence::ColorToken;

    fn new_state() -> (DaemonState, mpsc::Receiver<PipelineMsg>) {
        let (tx, rx) = mpsc::channel(64);
        let ticks = TokioTicks::new(tx, Duration::from_secs(3600));
        (DaemonState::new(ticks), rx)
    }

    fn raw(line: &str) -> PipelineMsg {
        PipelineMsg::Raw(line.to_string())
    }

    fn feed(state: &mut DaemonState, lines: &[&str], policy: ReconnectPolicy) {
        for line in lines {
            handle_msg(state, raw(line), policy, Utc::now());
        }
    }

    const CALL: &[&str] = &[
        r#"{"Event":"Newchannel","Uniqueid":"l1","Linkedid":"C1","CallerIDNum":"100","Exten":"200"}"#,
        r#"{"event":"DialState","data":{"Uniqueid":"l1","DestUniqueid":"l2","Linkedid":"C1","CallerIDNum":"100","DestCallerIDNum":"200","DialStatus":"RINGING"}}"#,
        r#"{"Event":"DialEnd","Uniqueid":"l1","DestUniqueid":"l2","Linkedid":"C1","DialStatus":"ANSWER"}"#,
    ];

    #[tokio::test]
    async fn raw_lines_drive_correlator() {
        let (mut state, _rx) = new_state();
        feed(&mut state, CALL, ReconnectPolicy::ResetCalls);

        assert_eq!(state.events_applied, 3);
        let call = state.correlator.get_call("C1").expect("call");
        assert!(call.ticker.is_some());
        assert_eq!(state.correlator.scheduler().active_count(), 1);

        let view = state.correlator.presence("200").expect("presence").view();
        assert_eq!(view.color, ColorToken::Connected);
    }

    #[tokio::test]
    async fn garbage_and_unknown_calls_count_as_dropped() {
        let (mut state, _rx) = new_state();
        feed(
            &mut state,
            &[
                "not json",
                r#"{"Event":"VarSet","Linkedid":"C1"}"#,
                r#"{"Event":"Hangup","Uniqueid":"l1","Linkedid":"C9"}"#,
            ],
            ReconnectPolicy::ResetCalls,
        );
        assert_eq!(state.events_dropped, 3);
        assert_eq!(state.events_applied, 0);
        assert_eq!(state.correlator.version(), 0);
    }

    #[tokio::test]
    async fn tick_message_refreshes_annotation() {
        let (mut state, _rx) = new_state();
        feed(&mut state, CALL, ReconnectPolicy::ResetCalls);
        let handle = state
            .correlator
            .get_call("C1")
            .and_then(|c| c.ticker)
            .expect("ticker");

        let later = Utc::now() + chrono::Duration::seconds(65);
        handle_msg(
            &mut state,
            PipelineMsg::Tick {
                call_id: "C1".into(),
                handle,
            },
            ReconnectPolicy::ResetCalls,
            later,
        );
        let annotation = state
            .correlator
            .presence("100")
            .and_then(|p| p.call_annotation.clone())
            .expect("annotation");
        assert!(annotation.starts_with("↔ 200 (01:0"), "got {annotation}");
    }

    #[tokio::test]
    async fn durations_use_receive_clock_not_pbx_clock() {
        let (mut state, _rx) = new_state();
        let received = Utc::now();
        let policy = ReconnectPolicy::ResetCalls;
        for line in [
            r#"{"Event":"Newchannel","Uniqueid":"l1","Linkedid":"C1","CallerIDNum":"100","Exten":"200","Timestamp":"1600000000.0"}"#,
            r#"{"Event":"DialEnd","Uniqueid":"l1","DestUniqueid":"l2","Linkedid":"C1","DestCallerIDNum":"200","DialStatus":"ANSWER","Timestamp":"1600000000.0"}"#,
        ] {
            handle_msg(&mut state, raw(line), policy, received);
        }
        let handle = state
            .correlator
            .get_call("C1")
            .and_then(|c| c.ticker)
            .expect("ticker");

        handle_msg(
            &mut state,
            PipelineMsg::Tick {
                call_id: "C1".into(),
                handle,
            },
            policy,
            received + chrono::Duration::seconds(1),
        );
        let annotation = state
            .correlator
            .presence("100")
            .and_then(|p| p.call_annotation.clone())
            .expect("annotation");
        assert_eq!(annotation, "↔ 200 (00:01)");
    }

    #[tokio::test]
    async fn reconnect_resets_calls_by_default() {
        let (mut state, _rx) = new_state();
        feed(&mut state, CALL, ReconnectPolicy::ResetCalls);
        feed(
            &mut state,
            &[r#"{"Device":"PJSIP/150","State":"UNAVAILABLE"}"#],
            ReconnectPolicy::ResetCalls,
        );

        handle_msg(
            &mut state,
            PipelineMsg::Reconnected,
            ReconnectPolicy::ResetCalls,
            Utc::now(),
        );

        assert_eq!(state.reconnects, 1);
        assert_eq!(state.correlator.call_count(), 0);
        assert_eq!(state.correlator.scheduler().active_count(), 0);
        let view = state.correlator.presence("150").expect("presence").view();
        assert_eq!(view.color, ColorToken::Unavailable);
    }

    #[tokio::test]
    async fn reconnect_keep_leaves_calls() {
        let (mut state, _rx) = new_state();
        feed(&mut state, CALL, ReconnectPolicy::Keep);
        handle_msg(
            &mut state,
            PipelineMsg::Reconnected,
            ReconnectPolicy::Keep,
            Utc::now(),
        );
        assert_eq!(state.correlator.call_count(), 1);
    }

    #[test]
    fn load_endpoints_reports_missing_file() {
        let err = load_endpoints("/nonexistent/pbxmon/endpoints.json").expect_err("missing");
        assert!(err.to_string().contains("cannot read endpoint listing"));
    }
}
