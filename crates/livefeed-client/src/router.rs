//! Inbound frame dispatch.

use livefeed_core::InboundMessage;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::diagnostics::DiagnosticSink;
use crate::error::ClientError;
use crate::registry::SubscriptionRegistry;
use crate::transport::Frame;

/// Parses frames and hands them to the subscribers of their type.
///
/// Nothing that goes wrong here reaches the transport: bad frames and failing
/// subscribers are reported to the diagnostics sink and dispatch carries on.
#[derive(Clone)]
pub struct MessageRouter {
    registry: Arc<SubscriptionRegistry>,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl MessageRouter {
    pub fn new(registry: Arc<SubscriptionRegistry>, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            registry,
            diagnostics,
        }
    }

    /// Parse one raw frame and dispatch it.
    pub fn handle_frame(&self, raw: &[u8]) {
        match InboundMessage::from_slice(raw) {
            Ok(message) => {
                self.dispatch(&message);
            }
            Err(e) => self.diagnostics.report(&ClientError::MalformedMessage(e)),
        }
    }

    /// Deliver a message to every active subscriber of its type.
    ///
    /// Returns how many subscribers accepted it.
    pub fn dispatch(&self, message: &InboundMessage) -> usize {
        let mut delivered = 0;

        for subscription in self.registry.snapshot(message.kind()) {
            if !subscription.is_active() {
                continue;
            }

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| subscription.invoke(message)));
            let reason = match outcome {
                Ok(Ok(())) => {
                    delivered += 1;
                    continue;
                }
                Ok(Err(e)) => format!("{e:#}"),
                Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
            };

            self.diagnostics.report(&ClientError::SubscriberFailure {
                message_type: message.kind().to_string(),
                reason,
            });
        }

        tracing::trace!("Delivered '{}' to {} subscribers", message.kind(), delivered);
        delivered
    }

    /// Consume frames until every sender is gone.
    pub async fn run(self, mut frames: mpsc::UnboundedReceiver<Frame>) {
        while let Some(frame) = frames.recv().await {
            self.handle_frame(&frame);
        }
        tracing::debug!("Frame channel closed, router stopping");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
