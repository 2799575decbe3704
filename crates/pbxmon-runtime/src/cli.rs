//! CLI definition using clap derive.

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "pbxmon", about = "PBX extension presence and call monitor")]
pub struct Cli {
    /// UDS socket path (default: /tmp/pbxmon-$USER/pbxmond.sock)
    #[arg(long, short = 's', global = true, env = "PBXMON_SOCKET")]
    pub socket_path: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the daemon (event pipeline + UDS server)
    Daemon(DaemonOpts),
    /// Show presence for every known extension
    Ls(ViewOpts),
    /// Show active calls
    Calls(ViewOpts),
    /// Presence and calls as JSON
    Json,
    /// Live-refresh presence and call view
    Watch(WatchOpts),
}

/// What to do with active calls when the push bridge reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReconnectPolicy {
    /// Drop active calls and their tickers; keep device states.
    ResetCalls,
    /// Leave state untouched.
    Keep,
}

#[derive(clap::Args)]
pub struct DaemonOpts {
    /// Read NDJSON events from a file, or `-` for stdin
    #[arg(long, conflicts_with = "push_socket")]
    pub events: Option<String>,

    /// Accept NDJSON events from a push bridge on this Unix socket
    #[arg(long, env = "PBXMON_PUSH_SOCKET")]
    pub push_socket: Option<String>,

    /// Endpoint listing used to seed presence at startup
    #[arg(long, env = "PBXMON_ENDPOINTS")]
    pub endpoints: Option<String>,

    /// Duration ticker period in milliseconds
    #[arg(long, default_value = "1000")]
    pub tick_interval_ms: u64,

    /// Behavior when the push bridge reconnects
    #[arg(long, value_enum, default_value = "reset-calls")]
    pub on_reconnect: ReconnectPolicy,
}

#[derive(clap::Args, Default)]
pub struct ViewOpts {
    /// Color output: auto, always, never
    #[arg(long, default_value = "auto")]
    pub color: String,
}

#[derive(clap::Args)]
pub struct WatchOpts {
    /// Refresh interval in seconds
    #[arg(long, default_value = "1")]
    pub interval: u64,

    /// Color output: auto, always, never
    #[arg(long, default_value = "auto")]
    pub color: String,
}

/// Default socket path using $USER for per-user isolation.
pub fn default_socket_path() -> String {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return format!("{dir}/pbxmon/pbxmond.sock");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("/tmp/pbxmon-{user}/pbxmond.sock")
}
