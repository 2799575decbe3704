//! pbxmon: PBX presence and call monitor runtime binary.
//! Single-process binary embedding the event pipeline, correlator and query
//! server in-process, plus the CLI views that talk to it.

use clap::Parser;

mod cli;
mod client;
mod cmd_calls;
mod cmd_json;
mod cmd_ls;
mod cmd_watch;
mod context;
mod ingest;
mod pipeline;
mod server;
mod ticker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let command = args
        .command
        .unwrap_or_else(|| cli::Command::Ls(cli::ViewOpts::default()));
    let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);

    match command {
        cli::Command::Daemon(opts) => {
            let filter = std::env::var("PBXMON_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .with_writer(std::io::stderr)
                .init();

            tracing::info!("pbxmon daemon starting");
            pipeline::run_daemon(opts, &socket_path).await?;
        }
        cli::Command::Ls(opts) => {
            let use_color = context::resolve_color(&opts.color);
            cmd_ls::cmd_ls(&socket_path, use_color).await?;
        }
        cli::Command::Calls(opts) => {
            let use_color = context::resolve_color(&opts.color);
            cmd_calls::cmd_calls(&socket_path, use_color).await?;
        }
        cli::Command::Json => {
            cmd_json::cmd_json(&socket_path).await?;
        }
        cli::Command::Watch(opts) => {
            cmd_watch::cmd_watch(&socket_path, opts.interval, &opts.color).await?;
        }
    }

    Ok(())
}
