//! `pbxmon watch`: live-refresh presence and call view.

use std::time::Duration;

use chrono::Utc;

use crate::client::rpc_call;
use crate::cmd_calls::format_call_table;
use crate::cmd_ls::format_presence_table;
use crate::context::{dim, resolve_color};

/// Entry point for `pbxmon watch`.
pub async fn cmd_watch(socket_path: &str, interval: u64, color: &str) -> anyhow::Result<()> {
    let use_color = resolve_color(color);

    loop {
        // Clear screen + cursor home
        print!("\x1b[2J\x1b[H");

        match render_frame(socket_path, use_color).await {
            Ok(frame) => println!("{frame}"),
            Err(e) => println!("Cannot connect to daemon: {e}"),
        }

        println!("\n{}", dim("pbxmon watch: Ctrl-C to quit", use_color));

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(interval.max(1))) => {}
            _ = tokio::signal::ctrl_c() => { break; }
        }
    }

    Ok(())
}

async fn render_frame(socket_path: &str, use_color: bool) -> anyhow::Result<String> {
    let presence = rpc_call(socket_path, "list_presence", serde_json::json!({})).await?;
    let calls = rpc_call(socket_path, "list_calls", serde_json::json!({})).await?;
    let presence = presence.as_array().cloned().unwrap_or_default();
    let calls = calls.as_array().cloned().unwrap_or_default();
    Ok(compose_frame(&presence, &calls, use_color))
}

pub(crate) fn compose_frame(
    presence: &[serde_json::Value],
    calls: &[serde_json::Value],
    use_color: bool,
) -> String {
    let mut frame = format_presence_table(presence, Utc::now(), use_color);
    if frame.is_empty() {
        frame.push_str("(no extensions seen yet)");
    }
    frame.push_str("\n\n");
    let call_table = format_call_table(calls, use_color);
    if call_table.is_empty() {
        frame.push_str("(no active calls)");
    } else {
        frame.push_str(&call_table);
    }
    frame
}
