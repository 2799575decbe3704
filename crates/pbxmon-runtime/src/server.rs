//! UDS JSON-RPC server: minimal hand-rolled implementation.
//! Connection-per-request, newline-delimited JSON.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::Mutex;

use pbxmon_core::presence::{ColorToken, IconToken};
use pbxmon_core::types::{CallStatus, EndpointPresence};

use crate::pipeline::DaemonState;

/// Presence row as served to clients.
#[derive(Debug, Serialize)]
struct PresenceRow<'a> {
    extension: &'a str,
    name: Option<&'a str>,
    label: String,
    color: ColorToken,
    /// Human color name ("green", "yellow", ...).
    color_name: &'static str,
    hex: &'static str,
    icon: IconToken,
    annotation: Option<String>,
    raw_state: &'a str,
    call_state: Option<CallStatus>,
    last_updated: chrono::DateTime<Utc>,
}

impl<'a> PresenceRow<'a> {
    fn from_presence(p: &'a EndpointPresence) -> Self {
        let view = p.view();
        Self {
            extension: &p.extension,
            name: p.name.as_deref(),
            label: view.label,
            color: view.color,
            color_name: view.color.name(),
            hex: view.color.hex(),
            icon: view.icon,
            annotation: view.annotation,
            raw_state: &p.raw_state,
            call_state: p.call_state,
            last_updated: p.last_updated,
        }
    }
}

/// Create the socket directory (0700), clear a stale socket, bind, and
/// restrict the socket to the owner (0600).
pub(crate) async fn bind_socket(socket_path: &str) -> anyhow::Result<UnixListener> {
    let socket_dir = std::path::Path::new(socket_path)
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid socket path"))?;

    std::fs::create_dir_all(socket_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_dir, std::fs::Permissions::from_mode(0o700))?;
    }

    // Check for stale socket
    if std::path::Path::new(socket_path).exists() {
        if tokio::net::UnixStream::connect(socket_path).await.is_err() {
            std::fs::remove_file(socket_path)?;
            tracing::info!("removed stale socket at {socket_path}");
        } else {
            anyhow::bail!("another process is already listening at {socket_path}");
        }
    }

    let listener = UnixListener::bind(socket_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(listener)
}

/// Run the UDS JSON-RPC server.
pub async fn run_server(socket_path: &str, state: Arc<Mutex<DaemonState>>) -> anyhow::Result<()> {
    let listener = bind_socket(socket_path).await?;
    tracing::info!("UDS server listening on {socket_path}");

    loop {
        let (stream, _) = listener.accept().await?;
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                tracing::debug!("connection error: {e}");
            }
        });
    }
}

async fn handle_connection(
    stream: tokio::net::UnixStream,
    state: Arc<Mutex<DaemonState>>,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let request: serde_json::Value = serde_json::from_str(line.trim())?;
    let method = request["method"].as_str().unwrap_or("");
    let id = request["id"].clone();
    let params = &request["params"];

    let result = match method {
        "list_presence" => {
            let st = state.lock().await;
            build_presence_list(&st)
        }
        "get_presence" => match params["extension"].as_str() {
            Some(extension) => {
                let st = state.lock().await;
                build_presence(&st, extension)
            }
            None => {
                return write_error(&mut writer, -32602, "missing param: extension", id).await;
            }
        },
        "list_calls" => {
            let st = state.lock().await;
            build_call_list(&st)
        }
        "presence_changed" => {
            let since_version = params["since_version"].as_u64().unwrap_or(0);
            let st = state.lock().await;
            build_presence_changed(&st, since_version)
        }
        _ => {
            return write_error(&mut writer, -32601, "method not found", id).await;
        }
    };

    let response = serde_json::json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id,
    });
    let mut resp = serde_json::to_string(&response)?;
    resp.push('\n');
    writer.write_all(resp.as_bytes()).await?;

    Ok(())
}

async fn write_error(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    code: i64,
    message: &str,
    id: serde_json::Value,
) -> anyhow::Result<()> {
    let error_response = serde_json::json!({
        "jsonrpc": "2.0",
        "error": {"code": code, "message": message},
        "id": id,
    });
    let mut resp = serde_json::to_string(&error_response)?;
    resp.push('\n');
    writer.write_all(resp.as_bytes()).await?;
    Ok(())
}

/// All presence rows, sorted by extension.
pub(crate) fn build_presence_list(state: &DaemonState) -> serde_json::Value {
    let rows: Vec<PresenceRow<'_>> = state
        .correlator
        .list_presence()
        .into_iter()
        .map(PresenceRow::from_presence)
        .collect();
    serde_json::to_value(rows).unwrap_or(serde_json::Value::Null)
}

/// One presence row, or `null` for an extension never seen.
pub(crate) fn build_presence(state: &DaemonState, extension: &str) -> serde_json::Value {
    state
        .correlator
        .presence(extension)
        .map(PresenceRow::from_presence)
        .and_then(|row| serde_json::to_value(row).ok())
        .unwrap_or(serde_json::Value::Null)
}

/// Active calls with durations as of now.
pub(crate) fn build_call_list(state: &DaemonState) -> serde_json::Value {
    let calls = state.correlator.call_snapshots(Utc::now());
    serde_json::to_value(calls).unwrap_or(serde_json::Value::Null)
}

/// Build a `presence_changed` response: changes since a given version with
/// the current presence of each changed extension.
///
/// Returns the current version for the client to use in subsequent
/// `presence_changed` calls.
pub(crate) fn build_presence_changed(state: &DaemonState, since_version: u64) -> serde_json::Value {
    let changes = state.correlator.changes_since(since_version);
    let current_version = state.correlator.version();

    let mut entries = Vec::new();
    for change in &changes {
        let mut entry = serde_json::json!({
            "version": change.version,
            "extension": change.extension,
            "timestamp": change.timestamp,
        });
        if let Some(presence) = state.correlator.presence(&change.extension) {
            let row = PresenceRow::from_presence(presence);
            entry["presence"] = serde_json::to_value(row).unwrap_or(serde_json::Value::Null);
        }
        entries.push(entry);
    }

    serde_json::json!({
        "changes": entries,
        "version": current_version,
        "stats": {
            "events_applied": state.events_applied,
            "events_dropped": state.events_dropped,
            "reconnects": state.reconnects,
            "active_calls": state.correlator.call_count(),
            "active_tickers": state.correlator.scheduler().active_count(),
        },
    })
}
