//! Transport adapter.
//!
//! Owns at most one websocket link at a time. Each opened link is driven by
//! its own pump task:
//! - inbound data frames go onto the frame channel read by the router
//! - the end of the link is reported once on the closure channel, tagged
//!   with the link's generation so superseded links can be told apart
//!
//! Sending never waits on the network: frames are handed to the pump through
//! an unbounded queue, and fail with [`TransportError::NotOpen`] when no link
//! is live.

use futures_util::{SinkExt, StreamExt};
use livefeed_core::{CLOSE_NO_STATUS, CLOSE_NORMAL, CloseReason, Endpoint};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::TransportError;

/// One raw inbound frame.
pub type Frame = Vec<u8>;

/// Establishes websocket connections.
pub trait Connector: Send + Sync + 'static {
    /// Underlying byte stream.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Connect and complete the websocket handshake.
    fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> impl Future<Output = Result<WebSocketStream<Self::Stream>, TransportError>> + Send;
}

/// Connects over TCP with `tokio_tungstenite::connect_async`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    type Stream = MaybeTlsStream<TcpStream>;

    async fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> Result<WebSocketStream<Self::Stream>, TransportError> {
        let (ws, _response) = tokio_tungstenite::connect_async(endpoint.url())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(ws)
    }
}

/// End-of-link notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Closure {
    pub generation: u64,
    pub reason: CloseReason,
}

impl Closure {
    pub fn code(&self) -> u16 {
        self.reason.code()
    }

    pub fn was_clean(&self) -> bool {
        self.reason.is_clean()
    }
}

enum Outbound {
    Frame(String),
    Close { code: u16, reason: String },
}

struct LiveLink {
    generation: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl LiveLink {
    fn close(self, code: u16, reason: &str) {
        // The pump may already be gone, in which case it has reported its closure.
        let _ = self.outbound.send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

/// Shared handle to the live link, used to send without going through the
/// connection task.
#[derive(Clone, Default)]
pub struct LinkSender {
    slot: Arc<Mutex<Option<LiveLink>>>,
}

impl LinkSender {
    /// Queue a text frame on the live link.
    pub fn send(&self, frame: String) -> Result<(), TransportError> {
        let slot = self.lock();
        let link = slot.as_ref().ok_or(TransportError::NotOpen)?;
        link.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| TransportError::NotOpen)
    }

    pub fn is_open(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|link| !link.outbound.is_closed())
    }

    fn lock(&self) -> MutexGuard<'_, Option<LiveLink>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn replace(&self, link: LiveLink) -> Option<LiveLink> {
        self.lock().replace(link)
    }

    fn take(&self) -> Option<LiveLink> {
        self.lock().take()
    }

    fn take_generation(&self, generation: u64) -> Option<LiveLink> {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|link| link.generation == generation) {
            slot.take()
        } else {
            None
        }
    }
}

/// Wraps a [`Connector`] and the single live link it produced.
pub struct TransportAdapter<C> {
    connector: Arc<C>,
    link: LinkSender,
    frames: mpsc::UnboundedSender<Frame>,
    closures: mpsc::UnboundedSender<Closure>,
    connect_timeout: Duration,
    generations: Arc<AtomicU64>,
}

impl<C> Clone for TransportAdapter<C> {
    fn clone(&self) -> Self {
        Self {
            connector: self.connector.clone(),
            link: self.link.clone(),
            frames: self.frames.clone(),
            closures: self.closures.clone(),
            connect_timeout: self.connect_timeout,
            generations: self.generations.clone(),
        }
    }
}

impl<C: Connector> TransportAdapter<C> {
    pub fn new(
        connector: C,
        connect_timeout: Duration,
        frames: mpsc::UnboundedSender<Frame>,
        closures: mpsc::UnboundedSender<Closure>,
    ) -> Self {
        Self {
            connector: Arc::new(connector),
            link: LinkSender::default(),
            frames,
            closures,
            connect_timeout,
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Open a new link, closing the current one first.
    ///
    /// Returns the generation assigned to the new link.
    pub async fn open(&self, endpoint: &Endpoint) -> Result<u64, TransportError> {
        self.close(CLOSE_NORMAL, "superseded");

        let ws = tokio::time::timeout(self.connect_timeout, self.connector.connect(endpoint))
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout))??;

        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let link = LiveLink {
            generation,
            outbound: outbound_tx,
        };
        if let Some(previous) = self.link.replace(link) {
            previous.close(CLOSE_NORMAL, "superseded");
        }

        tokio::spawn(pump(
            ws,
            outbound_rx,
            generation,
            self.frames.clone(),
            self.closures.clone(),
        ));

        tracing::debug!("Opened link {} to {}", generation, endpoint);
        Ok(generation)
    }

    /// Queue a text frame on the live link.
    pub fn send(&self, frame: String) -> Result<(), TransportError> {
        self.link.send(frame)
    }

    /// Close the live link. Calling it again, or with no link, does nothing.
    pub fn close(&self, code: u16, reason: &str) {
        if let Some(link) = self.link.take() {
            tracing::debug!("Closing link {} ({})", link.generation, code);
            link.close(code, reason);
        }
    }

    /// Forget a link whose closure has been reported.
    pub fn release(&self, generation: u64) {
        self.link.take_generation(generation);
    }

    pub fn is_open(&self) -> bool {
        self.link.is_open()
    }

    /// A cloneable sender bound to whichever link is live.
    pub fn sender(&self) -> LinkSender {
        self.link.clone()
    }
}

async fn pump<S>(
    mut ws: WebSocketStream<S>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    generation: u64,
    frames: mpsc::UnboundedSender<Frame>,
    closures: mpsc::UnboundedSender<Closure>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let reason = loop {
        tokio::select! {
            command = outbound.recv() => match command {
                Some(Outbound::Frame(text)) => {
                    if let Err(e) = ws.send(Message::Text(text.into())).await {
                        break CloseReason::NetworkError(format!("send failed: {e}"));
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    if let Err(e) = ws.close(Some(frame)).await {
                        tracing::debug!("Close handshake on link {} failed: {}", generation, e);
                    }
                    break CloseReason::ClientRequested;
                }
                // Adapter dropped.
                None => {
                    let _ = ws.close(None).await;
                    break CloseReason::ClientRequested;
                }
            },

            message = ws.next() => match message {
                Some(Ok(Message::Close(frame))) => {
                    // Flush the queued close reply so the peer sees a completed handshake.
                    if let Err(e) = ws.close(None).await {
                        tracing::trace!("Close reply on link {}: {}", generation, e);
                    }
                    break classify_close(frame);
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(message)) => {
                    let _ = frames.send(message.into_data().to_vec());
                }
                Some(Err(e)) => break CloseReason::NetworkError(e.to_string()),
                None => break CloseReason::NetworkError("connection dropped".to_string()),
            },
        }
    };

    tracing::debug!("Link {} ended: {}", generation, reason);
    let _ = closures.send(Closure { generation, reason });
}

fn classify_close(frame: Option<CloseFrame>) -> CloseReason {
    match frame {
        Some(frame) => CloseReason::ServerClosed {
            code: u16::from(frame.code),
            reason: frame.reason.as_str().to_string(),
        },
        None => CloseReason::ServerClosed {
            code: CLOSE_NO_STATUS,
            reason: String::new(),
        },
    }
}
