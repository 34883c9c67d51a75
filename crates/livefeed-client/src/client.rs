//! The client handle.

use livefeed_core::{ConnectionState, ConnectionStatus, Endpoint, InboundMessage};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::config::ClientConfig;
use crate::connection::{Command, Lifecycle, StatusPublisher, Supervisor};
use crate::diagnostics::{DiagnosticSink, LogDiagnostics};
use crate::error::{ClientError, ClientResult};
use crate::reconnect::{ReconnectPolicy, RetryState};
use crate::registry::{Subscription, SubscriptionRegistry};
use crate::router::MessageRouter;
use crate::transport::{Connector, LinkSender, TransportAdapter, WsConnector};

const COMMAND_BUFFER: usize = 16;

/// Handle to one real-time channel.
///
/// Cheap to clone; every clone talks to the same connection. The background
/// tasks stop once the last clone is dropped.
///
/// ```rust,no_run
/// use livefeed_client::{ClientConfig, RealtimeClient};
/// use livefeed_core::Endpoint;
///
/// # async fn example() -> anyhow::Result<()> {
/// let endpoint = Endpoint::for_session("ws://localhost:8000/ws", "f1")?;
/// let client = RealtimeClient::new(endpoint, ClientConfig::default());
///
/// let _events = client.subscribe("processing_event", |message| {
///     println!("{}", message.payload());
///     Ok(())
/// });
/// client.connect().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RealtimeClient {
    endpoint: Endpoint,
    commands: mpsc::Sender<Command>,
    link: LinkSender,
    registry: Arc<SubscriptionRegistry>,
    status: watch::Receiver<ConnectionStatus>,
    status_updates: broadcast::Sender<ConnectionStatus>,
    lifecycle: watch::Receiver<Lifecycle>,
}

impl RealtimeClient {
    /// A client using the default websocket connector.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(endpoint: Endpoint, config: ClientConfig) -> Self {
        Self::builder(endpoint).config(config).build()
    }

    pub fn builder(endpoint: Endpoint) -> ClientBuilder<WsConnector> {
        ClientBuilder {
            endpoint,
            config: ClientConfig::default(),
            connector: WsConnector,
            diagnostics: Arc::new(LogDiagnostics),
        }
    }

    /// Open the connection, waiting for the handshake.
    ///
    /// Calls made while a connect is already in flight wait for that same
    /// attempt; calls made while open return immediately.
    pub async fn connect(&self) -> ClientResult<()> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(Command::Connect(reply))
            .await
            .map_err(|_| ClientError::Stopped)?;
        outcome.await.map_err(|_| ClientError::Stopped)?
    }

    /// Close the connection and cancel any pending retry or connect.
    pub async fn disconnect(&self) -> ClientResult<()> {
        let (done, finished) = oneshot::channel();
        self.commands
            .send(Command::Disconnect(done))
            .await
            .map_err(|_| ClientError::Stopped)?;
        finished.await.map_err(|_| ClientError::Stopped)
    }

    /// Serialize `message` as JSON and send it.
    ///
    /// Never waits; fails with `NotOpen` unless the connection is open.
    /// Nothing is buffered for later delivery.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> ClientResult<()> {
        let frame = serde_json::to_string(message).map_err(ClientError::Encode)?;
        self.link.send(frame)?;
        Ok(())
    }

    /// Call `callback` for every message of `message_type`.
    pub fn subscribe<F>(&self, message_type: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&InboundMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.registry.subscribe(message_type, callback)
    }

    /// Stop calling a subscriber. Safe to call more than once.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.registry.unsubscribe(subscription);
    }

    /// Latest status snapshot.
    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Every status snapshot published from now on.
    pub fn status_updates(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.status_updates.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle.borrow().state
    }

    pub fn retry_state(&self) -> RetryState {
        self.lifecycle.borrow().retry
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

/// Builds a [`RealtimeClient`] with a custom connector or diagnostics sink.
pub struct ClientBuilder<C> {
    endpoint: Endpoint,
    config: ClientConfig,
    connector: C,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl<C: Connector> ClientBuilder<C> {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn connector<D: Connector>(self, connector: D) -> ClientBuilder<D> {
        ClientBuilder {
            endpoint: self.endpoint,
            config: self.config,
            connector,
            diagnostics: self.diagnostics,
        }
    }

    pub fn diagnostics(mut self, sink: impl DiagnosticSink) -> Self {
        self.diagnostics = Arc::new(sink);
        self
    }

    /// Spawn the connection and router tasks. Must be called inside a tokio
    /// runtime. The client starts `Idle`.
    pub fn build(self) -> RealtimeClient {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (closures_tx, closures_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());
        let (updates_tx, _) = broadcast::channel(self.config.status_buffer.max(1));
        let (lifecycle_tx, lifecycle_rx) = watch::channel(Lifecycle::default());

        let registry = Arc::new(SubscriptionRegistry::new());
        let router = MessageRouter::new(registry.clone(), self.diagnostics);
        tokio::spawn(router.run(frames_rx));

        let transport = TransportAdapter::new(
            self.connector,
            self.config.connect_timeout(),
            frames_tx,
            closures_tx,
        );
        let link = transport.sender();
        let supervisor = Supervisor::new(
            self.endpoint.clone(),
            transport,
            ReconnectPolicy::from_config(&self.config.reconnect),
            lifecycle_tx,
            StatusPublisher::new(status_tx, updates_tx.clone()),
        );
        tokio::spawn(supervisor.run(commands_rx, closures_rx));

        RealtimeClient {
            endpoint: self.endpoint,
            commands: commands_tx,
            link,
            registry,
            status: status_rx,
            status_updates: updates_tx,
            lifecycle: lifecycle_rx,
        }
    }
}
