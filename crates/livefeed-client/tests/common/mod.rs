//! Test support: an in-memory connector.
//!
//! Each connect builds a `tokio::io::duplex` pipe, runs a real websocket
//! handshake over it and hands the server half to the test, so close codes
//! and framing behave exactly as they would over TCP.

#![allow(dead_code)]

use futures_util::SinkExt;
use livefeed_client::{
    ClientConfig, ConnectionStatus, Connector, Endpoint, InboundMessage, RealtimeClient,
    TransportError,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

pub type ServerSide = WebSocketStream<DuplexStream>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Accept,
    Refuse,
    Stall,
}

#[derive(Clone)]
pub struct MemoryConnector {
    inner: Arc<Inner>,
}

struct Inner {
    mode: Mutex<Mode>,
    attempts: Mutex<Vec<Instant>>,
    accepted: mpsc::UnboundedSender<ServerSide>,
}

impl MemoryConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerSide>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let connector = Self {
            inner: Arc::new(Inner {
                mode: Mutex::new(Mode::Accept),
                attempts: Mutex::new(Vec::new()),
                accepted,
            }),
        };
        (connector, rx)
    }

    pub fn set_mode(&self, mode: Mode) {
        *self.inner.mode.lock().unwrap() = mode;
    }

    /// When each connect was attempted.
    pub fn attempts(&self) -> Vec<Instant> {
        self.inner.attempts.lock().unwrap().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.inner.attempts.lock().unwrap().len()
    }
}

impl Connector for MemoryConnector {
    type Stream = DuplexStream;

    async fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> Result<WebSocketStream<DuplexStream>, TransportError> {
        self.inner.attempts.lock().unwrap().push(Instant::now());
        let mode = *self.inner.mode.lock().unwrap();
        match mode {
            Mode::Refuse => return Err(TransportError::Connect("connection refused".into())),
            Mode::Stall => std::future::pending::<()>().await,
            Mode::Accept => {}
        }

        let (client, server) = tokio::io::duplex(64 * 1024);
        let accept = tokio::spawn(tokio_tungstenite::accept_async(server));
        let (ws, _response) = tokio_tungstenite::client_async(endpoint.url(), client)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let server = accept
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let _ = self.inner.accepted.send(server);
        Ok(ws)
    }
}

pub fn endpoint() -> Endpoint {
    Endpoint::for_session("ws://pipeline.test/ws", "f1").unwrap()
}

/// A client on the in-memory connector with default settings.
pub fn client(connector: &MemoryConnector) -> RealtimeClient {
    RealtimeClient::builder(endpoint())
        .config(ClientConfig::default())
        .connector(connector.clone())
        .build()
}

/// A subscriber that forwards every message into a channel.
pub fn forwarding() -> (
    mpsc::UnboundedReceiver<InboundMessage>,
    impl Fn(&InboundMessage) -> anyhow::Result<()> + Send + Sync + 'static,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (rx, move |message: &InboundMessage| {
        tx.send(message.clone())?;
        Ok(())
    })
}

pub async fn send_text(server: &mut ServerSide, text: &str) {
    server
        .send(Message::Text(text.to_string().into()))
        .await
        .unwrap();
}

pub async fn next_status(updates: &mut broadcast::Receiver<ConnectionStatus>) -> ConnectionStatus {
    tokio::time::timeout(Duration::from_secs(120), updates.recv())
        .await
        .expect("status update")
        .unwrap()
}

pub fn elapsed_ms(from: Instant, to: Instant) -> u128 {
    to.duration_since(from).as_millis()
}
