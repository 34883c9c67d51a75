//! `livefeed`: follow one session's event channel from the terminal.
//!
//!   livefeed f1 --base ws://localhost:8000/ws --type processing_event
//!
//! Every matching message is printed as one JSON line on stdout; connection
//! status goes to the log on stderr.

mod config;
mod session;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::config::FileConfig;
use crate::session::{FeedSession, Outcome};

#[derive(Debug, Parser)]
#[command(name = "livefeed", version, about = "Follow a livefeed event channel")]
struct Cli {
    /// Session (file) id whose channel to follow
    session: String,

    /// Base websocket URL; the session id is appended as a path segment
    #[arg(long, env = "LIVEFEED_BASE")]
    base: Option<String>,

    /// Message type to print; repeatable
    #[arg(long = "type", value_name = "TYPE")]
    types: Vec<String>,

    /// TOML configuration file
    #[arg(long, env = "LIVEFEED_CONFIG")]
    config: Option<PathBuf>,

    /// JSON message to send once connected
    #[arg(long, value_name = "JSON")]
    send: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("livefeed=info".parse()?))
        .init();

    let cli = Cli::parse();
    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let settings = file.resolve(cli.base, cli.types);

    let outgoing = cli
        .send
        .as_deref()
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()
        .context("--send is not valid JSON")?;

    let session = FeedSession::open(&settings, &cli.session)?;
    tracing::info!("Following {}", session.endpoint());
    session.start().await?;
    if let Some(message) = outgoing {
        session.send(&message)?;
    }

    match session.run().await? {
        Outcome::Interrupted | Outcome::Ended => Ok(()),
        Outcome::Exhausted(reason) => anyhow::bail!("connection lost: {reason}"),
    }
}
