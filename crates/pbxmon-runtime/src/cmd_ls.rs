//! `pbxmon ls`: per-extension presence table.

use chrono::{DateTime, Utc};

use crate::client::rpc_call;
use crate::context::{dim, pad, paint, parse_color_token, relative_time};

const EXT_WIDTH: usize = 8;
const NAME_WIDTH: usize = 16;
const STATUS_WIDTH: usize = 13;
const NOTE_WIDTH: usize = 20;

/// Entry point for `pbxmon ls`.
pub async fn cmd_ls(socket_path: &str, use_color: bool) -> anyhow::Result<()> {
    let presence = rpc_call(socket_path, "list_presence", serde_json::json!({})).await?;
    let arr = presence.as_array().cloned().unwrap_or_default();

    let output = format_presence_table(&arr, Utc::now(), use_color);
    if output.is_empty() {
        println!("(no extensions seen yet)");
    } else {
        println!("{output}");
    }
    Ok(())
}

/// Render presence rows as an aligned table. Empty input renders nothing.
pub(crate) fn format_presence_table(
    rows: &[serde_json::Value],
    now: DateTime<Utc>,
    use_color: bool,
) -> String {
    if rows.is_empty() {
        return String::new();
    }

    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(dim(
        &format!(
            "{}{}{}{}UPDATED",
            pad("EXT", EXT_WIDTH),
            pad("NAME", NAME_WIDTH),
            pad("STATUS", STATUS_WIDTH),
            pad("NOTE", NOTE_WIDTH)
        ),
        use_color,
    ));

    for row in rows {
        let extension = row["extension"].as_str().unwrap_or("?");
        let name = row["name"].as_str().unwrap_or("");
        let label = row["label"].as_str().unwrap_or("?");
        let token = row["color"].as_str().and_then(parse_color_token);
        let note = row["annotation"].as_str().unwrap_or("");
        let updated = row["last_updated"]
            .as_str()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| relative_time((now - ts.with_timezone(&Utc)).num_seconds()))
            .unwrap_or_default();

        // Pad before painting so escape codes don't skew alignment.
        lines.push(format!(
            "{}{}{}{}{}",
            pad(extension, EXT_WIDTH),
            pad(name, NAME_WIDTH),
            paint(&pad(label, STATUS_WIDTH), token, use_color),
            pad(note, NOTE_WIDTH),
            dim(&updated, use_color)
        ));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 5, 0)
            .single()
            .expect("valid datetime")
    }

    fn row(ext: &str, label: &str, color: &str, note: Option<&str>) -> serde_json::Value {
        serde_json::json!({
            "extension": ext,
            "label": label,
            "color": color,
            "annotation": note,
            "last_updated": "2026-03-02T09:00:00Z",
        })
    }

    #[test]
    fn empty_rows_render_nothing() {
        assert_eq!(format_presence_table(&[], now(), false), "");
    }

    #[test]
    fn plain_table_has_header_and_rows() {
        let rows = vec![
            row("100", "Connected", "connected", Some("↔ 200 (01:05)")),
            row("150", "Unavailable", "unavailable", None),
        ];
        let out = format_presence_table(&rows, now(), false);
        let lines: Vec<&str> = out.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("EXT"));
        assert!(lines[1].starts_with("100"));
        assert!(lines[1].contains("Connected"));
        assert!(lines[1].contains("↔ 200 (01:05)"));
        assert!(lines[1].ends_with("5m"));
        assert!(lines[2].contains("Unavailable"));
        assert!(!out.contains('\x1b'), "no ANSI when color is off");
    }

    #[test]
    fn endpoint_name_is_shown() {
        let mut named = row("100", "Available", "available", None);
        named["name"] = serde_json::json!("Front Desk");
        let rows = vec![named, row("150", "Unavailable", "unavailable", None)];
        let out = format_presence_table(&rows, now(), false);
        let lines: Vec<&str> = out.lines().collect();

        assert!(lines[0].contains("NAME"));
        assert!(lines[1].starts_with("100     Front Desk"));
        assert!(lines[2].starts_with("150     "));
        assert_eq!(lines[1].find("Available"), lines[2].find("Unavailable"));
    }

    #[test]
    fn colored_table_paints_status() {
        let rows = vec![row("150", "Unavailable", "unavailable", None)];
        let out = format_presence_table(&rows, now(), true);
        assert!(out.contains("\x1b[31mUnavailable"));
    }
}
