//! A followed session: the client plus the subscriptions the CLI owns.

use anyhow::Context;
use livefeed_client::{ConnectionStatus, Endpoint, InboundMessage, RealtimeClient, Subscription};
use serde::Serialize;
use std::io::Write;
use tokio::sync::broadcast::error::RecvError;

use crate::config::Settings;

/// Why [`FeedSession::run`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Ctrl-C; the connection was closed on the way out.
    Interrupted,
    /// Retries ran out.
    Exhausted(String),
    /// The connection closed without an error.
    Ended,
}

pub struct FeedSession {
    client: RealtimeClient,
    subscriptions: Vec<Subscription>,
}

impl FeedSession {
    /// Build the client and subscribe to every configured type. Nothing is
    /// connected yet.
    pub fn open(settings: &Settings, session_id: &str) -> anyhow::Result<Self> {
        let endpoint = Endpoint::for_session(&settings.base, session_id)
            .with_context(|| format!("invalid endpoint for session '{session_id}'"))?;
        let client = RealtimeClient::new(endpoint, settings.client.clone());
        let subscriptions = settings
            .types
            .iter()
            .map(|message_type| client.subscribe(message_type.as_str(), print_line))
            .collect();
        Ok(Self {
            client,
            subscriptions,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.client.endpoint()
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.client
            .connect()
            .await
            .with_context(|| format!("failed to connect to {}", self.client.endpoint()))
    }

    pub fn send(&self, message: &impl Serialize) -> anyhow::Result<()> {
        self.client.send(message)?;
        Ok(())
    }

    /// Follow the channel until Ctrl-C or until the connection gives up.
    pub async fn run(self) -> anyhow::Result<Outcome> {
        let mut updates = self.client.status_updates();
        let outcome = loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    signal.context("failed to listen for Ctrl-C")?;
                    tracing::info!("Interrupted, closing connection");
                    break Outcome::Interrupted;
                }
                update = updates.recv() => match update {
                    Ok(status) => {
                        log_status(&status);
                        if let Some(outcome) = settled(&status) {
                            break outcome;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!("Skipped {} status updates", skipped);
                        if let Some(outcome) = settled(&self.client.status()) {
                            break outcome;
                        }
                    }
                    Err(RecvError::Closed) => break Outcome::Ended,
                },
            }
        };
        self.close().await;
        Ok(outcome)
    }

    async fn close(self) {
        for subscription in &self.subscriptions {
            self.client.unsubscribe(subscription);
        }
        if let Err(e) = self.client.disconnect().await {
            tracing::debug!("Disconnect failed: {}", e);
        }
    }
}

fn print_line(message: &InboundMessage) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, message)?;
    writeln!(stdout)?;
    Ok(())
}

fn log_status(status: &ConnectionStatus) {
    if status.connected {
        tracing::info!("Connected");
    } else if status.reconnecting {
        tracing::warn!("Connection lost, reconnecting");
    } else if let Some(error) = &status.last_error {
        tracing::error!("Disconnected: {}", error);
    } else {
        tracing::info!("Disconnected");
    }
}

/// Terminal statuses end the session.
fn settled(status: &ConnectionStatus) -> Option<Outcome> {
    if status.connected || status.reconnecting {
        return None;
    }
    Some(match &status.last_error {
        Some(error) => Outcome::Exhausted(error.clone()),
        None => Outcome::Ended,
    })
}
