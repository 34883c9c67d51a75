//! Real-time update client for livefeed.
//!
//! One [`RealtimeClient`] follows one event channel over a websocket:
//!
//! - the transport adapter owns the single live link and reports how it ended
//! - the connection state machine reconnects after unexpected closures with
//!   bounded exponential backoff, and publishes [`ConnectionStatus`] snapshots
//! - the message router parses each frame and hands it to the subscribers
//!   registered for its `type`
//!
//! Failures that only concern one frame or one subscriber are reported to a
//! [`DiagnosticSink`]; failures of the connection show up as status changes.

mod client;
mod config;
mod connection;
mod diagnostics;
mod error;
mod reconnect;
mod registry;
mod router;
mod transport;

pub use client::{ClientBuilder, RealtimeClient};
pub use config::{ClientConfig, ReconnectConfig};
pub use diagnostics::{DiagnosticSink, LogDiagnostics};
pub use error::{ClientError, ClientResult, TransportError};
pub use reconnect::{ReconnectPolicy, RetryState};
pub use registry::{Callback, Subscription, SubscriptionRegistry};
pub use router::MessageRouter;
pub use transport::{Closure, Connector, Frame, LinkSender, TransportAdapter, WsConnector};

pub use livefeed_core::{
    CloseReason, ConnectionState, ConnectionStatus, Endpoint, InboundMessage,
};
