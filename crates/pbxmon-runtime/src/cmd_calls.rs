//! `pbxmon calls`: active call list.

use crate::client::rpc_call;
use crate::context::{dim, pad, paint, parse_color_token};

const PARTY_WIDTH: usize = 8;
const STATUS_WIDTH: usize = 11;

/// Entry point for `pbxmon calls`.
pub async fn cmd_calls(socket_path: &str, use_color: bool) -> anyhow::Result<()> {
    let calls = rpc_call(socket_path, "list_calls", serde_json::json!({})).await?;
    let arr = calls.as_array().cloned().unwrap_or_default();

    let output = format_call_table(&arr, use_color);
    if output.is_empty() {
        println!("(no active calls)");
    } else {
        println!("{output}");
    }
    Ok(())
}

/// Render call snapshots, oldest first (the daemon's order).
pub(crate) fn format_call_table(calls: &[serde_json::Value], use_color: bool) -> String {
    if calls.is_empty() {
        return String::new();
    }

    let mut lines = Vec::with_capacity(calls.len() + 1);
    lines.push(dim(
        &format!(
            "{}{}{}DURATION",
            pad("FROM", PARTY_WIDTH),
            pad("TO", PARTY_WIDTH),
            pad("STATUS", STATUS_WIDTH)
        ),
        use_color,
    ));

    for call in calls {
        let caller = call["caller"].as_str().unwrap_or("?");
        let callee = call["callee"].as_str().unwrap_or("?");
        let status = call["status"].as_str().unwrap_or("?");
        let token = parse_color_token(status);
        let duration = if status == "connected" {
            call["duration"].as_str().unwrap_or("")
        } else {
            ""
        };

        lines.push(format!(
            "{}{}{}{}",
            pad(caller, PARTY_WIDTH),
            pad(callee, PARTY_WIDTH),
            paint(&pad(status, STATUS_WIDTH), token, use_color),
            duration
        ));
    }

    lines.join("\n")
}
