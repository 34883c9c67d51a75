//! Demo backend for the livefeed client.
//!
//! Serves `ws://127.0.0.1:<port>/ws/<session>` and walks each connected
//! session through the stages of a file-processing pipeline, pushing one
//! `processing_event` per step.
//!
//! Run it, then follow a session:
//!   cargo run -p pipeline-feed -- --port 8000 --interval-ms 500 --drop-after 6
//!   cargo run -p livefeed-cli -- f1 --base ws://127.0.0.1:8000/ws
//!
//! `--drop-after N` cuts every connection without a close frame after N
//! events, which exercises the client's reconnect path.

mod server;

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pipeline_feed=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let port: u16 = parse_arg(&args, "--port").unwrap_or(8000);
    let interval = tick_interval(&args);
    let drop_after = parse_arg(&args, "--drop-after");

    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    tracing::info!("Starting pipeline feed on {}", addr);
    if let Some(n) = drop_after {
        tracing::info!("Dropping connections after {} events", n);
    }

    server::run(
        addr,
        server::Options {
            interval,
            drop_after,
        },
    )
    .await
}

/// `--interval-ms`, never below 1ms.
fn tick_interval(args: &[String]) -> Duration {
    let millis: u64 = parse_arg(args, "--interval-ms").unwrap_or(1000);
    Duration::from_millis(millis.max(1))
}

fn parse_arg<T: FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}
