//! Display helpers for CLI output: color resolution, painting, padding.

use pbxmon_core::presence::ColorToken;

const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";

/// Resolve --color flag to bool.
pub fn resolve_color(color: &str) -> bool {
    use std::io::IsTerminal;
    match color {
        "always" => true,
        "never" => false,
        _ => std::io::stdout().is_terminal(),
    }
}

/// Parse a serialized color token (`"available"`, `"busy"`, ...).
pub fn parse_color_token(s: &str) -> Option<ColorToken> {
    ColorToken::ALL
        .into_iter()
        .find(|t| t.label().eq_ignore_ascii_case(s))
}

/// Wrap `text` in the token's ANSI color when color is on.
pub fn paint(text: &str, token: Option<ColorToken>, use_color: bool) -> String {
    match token {
        Some(t) if use_color => format!("{}{text}{RESET}", t.ansi()),
        _ => text.to_string(),
    }
}

pub fn dim(text: &str, use_color: bool) -> String {
    if use_color {
        format!("{DIM}{text}{RESET}")
    } else {
        text.to_string()
    }
}

/// Left-align to `width` display characters.
pub fn pad(text: &str, width: usize) -> String {
    let len = text.chars().count();
    if len >= width {
        text.to_string()
    } else {
        format!("{text}{}", " ".repeat(width - len))
    }
}

/// Relative-time helper: seconds -> human string.
pub fn relative_time(seconds: i64) -> String {
    let s = seconds.unsigned_abs();
    if s < 60 {
        "just now".to_string()
    } else if s < 3600 {
        format!("{}m", s / 60)
    } else if s < 86400 {
        format!("{}h", s / 3600)
    } else {
        format!("{}d", s / 86400)
    }
}
