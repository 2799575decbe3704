//! Event ingest: NDJSON lines from a file, stdin, or a push bridge socket.
//!
//! Lines are forwarded untouched as `PipelineMsg::Raw`; translation happens
//! in the pipeline so every source shares the same drop accounting.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

use crate::pipeline::PipelineMsg;
use crate::server::bind_socket;

/// Forward every non-blank line of `reader` into the pipeline. Returns the
/// number of lines forwarded.
pub(crate) async fn forward_lines<R>(reader: R, tx: &mpsc::Sender<PipelineMsg>) -> anyhow::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut count = 0;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        tx.send(PipelineMsg::Raw(line))
            .await
            .map_err(|_| anyhow::anyhow!("pipeline closed"))?;
        count += 1;
    }
    Ok(count)
}

/// Read events from a file path, or stdin when `source` is `-`.
pub async fn run_events(source: &str, tx: mpsc::Sender<PipelineMsg>) -> anyhow::Result<u64> {
    if source == "-" {
        tracing::info!("reading events from stdin");
        return forward_lines(tokio::io::stdin(), &tx).await;
    }
    let file = tokio::fs::File::open(source)
        .await
        .map_err(|e| anyhow::anyhow!("cannot open event file {source}: {e}"))?;
    tracing::info!("reading events from {source}");
    forward_lines(file, &tx).await
}

/// Accept push bridge connections on a Unix socket. Every connection after
/// the first is reported as a reconnect before its lines are forwarded.
pub async fn run_push_socket(socket_path: &str, tx: mpsc::Sender<PipelineMsg>) -> anyhow::Result<()> {
    let listener = bind_socket(socket_path).await?;
    tracing::info!("push bridge socket listening on {socket_path}");

    let mut connections: u64 = 0;
    loop {
        let (stream, _) = listener.accept().await?;
        connections += 1;
        if connections > 1 {
            tx.send(PipelineMsg::Reconnected)
                .await
                .map_err(|_| anyhow::anyhow!("pipeline closed"))?;
        }
        tracing::info!("push bridge connected (connection {connections})");

        let tx = tx.clone();
        tokio::spawn(async move {
            match forward_lines(stream, &tx).await {
                Ok(count) => tracing::info!("push bridge disconnected after {count} lines"),
                Err(e) => tracing::warn!("push bridge connection error: {e}"),
            }
        });
    }
}
