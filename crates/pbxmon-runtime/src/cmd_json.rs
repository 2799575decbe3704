//! `pbxmon json`: machine-readable JSON output.

use crate::client::rpc_call;

/// Schema version of the `json` output.
const SCHEMA_VERSION: u64 = 1;

/// Entry point for `pbxmon json`.
pub async fn cmd_json(socket_path: &str) -> anyhow::Result<()> {
    let presence = rpc_call(socket_path, "list_presence", serde_json::json!({})).await?;
    let calls = rpc_call(socket_path, "list_calls", serde_json::json!({})).await?;
    let changed = rpc_call(
        socket_path,
        "presence_changed",
        serde_json::json!({"since_version": u64::MAX}),
    )
    .await?;

    let output = build_json_output(&presence, &calls, &changed);
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Combine RPC results into the v1 schema.
pub(crate) fn build_json_output(
    presence: &serde_json::Value,
    calls: &serde_json::Value,
    changed: &serde_json::Value,
) -> serde_json::Value {
    let presence = presence.as_array().cloned().unwrap_or_default();
    let calls = calls.as_array().cloned().unwrap_or_default();

    serde_json::json!({
        "version": SCHEMA_VERSION,
        "state_version": changed["version"],
        "stats": changed["stats"],
        "presence": presence,
        "calls": calls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_schema_v1() {
        let presence = serde_json::json!([{"extension": "100", "label": "Available"}]);
        let calls = serde_json::json!([]);
        let changed = serde_json::json!({
            "changes": [],
            "version": 7,
            "stats": {"events_applied": 3},
        });

        let out = build_json_output(&presence, &calls, &changed);
        assert_eq!(out["version"], 1);
        assert_eq!(out["state_version"], 7);
        assert_eq!(out["stats"]["events_applied"], 3);
        assert_eq!(out["presence"][0]["extension"], "100");
        assert_eq!(out["calls"], serde_json::json!([]));
    }

    #[test]
    fn non_array_results_become_empty() {
        let out = build_json_output(
            &serde_json::Value::Null,
            &serde_json::Value::Null,
            &serde_json::json!({}),
        );
        assert_eq!(out["presence"], serde_json::json!([]));
        assert_eq!(out["calls"], serde_json::json!([]));
    }
}
