//! Subscriber bookkeeping.
//!
//! Subscribers are grouped by message type. Dispatch works on a snapshot of
//! the group taken when the message arrives, so callbacks may subscribe or
//! unsubscribe (themselves or others) while a message is being delivered.
//! A subscription cancelled mid-pass is skipped for the rest of that pass.

use livefeed_core::InboundMessage;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A subscriber callback.
pub type Callback = Box<dyn Fn(&InboundMessage) -> anyhow::Result<()> + Send + Sync>;

struct Entry {
    id: u64,
    message_type: String,
    active: AtomicBool,
    callback: Callback,
}

/// Handle returned by [`SubscriptionRegistry::subscribe`].
#[derive(Clone)]
pub struct Subscription {
    entry: Arc<Entry>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.entry.id
    }

    pub fn message_type(&self) -> &str {
        &self.entry.message_type
    }

    /// False once the subscription has been cancelled.
    pub fn is_active(&self) -> bool {
        self.entry.active.load(Ordering::Acquire)
    }

    pub(crate) fn invoke(&self, message: &InboundMessage) -> anyhow::Result<()> {
        (self.entry.callback)(message)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.entry.id)
            .field("message_type", &self.entry.message_type)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Message type → subscribers, in registration order.
#[derive(Default)]
pub struct SubscriptionRegistry {
    next_id: AtomicU64,
    groups: Mutex<HashMap<String, Vec<Subscription>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for messages of `message_type`.
    pub fn subscribe<F>(&self, message_type: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&InboundMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let message_type = message_type.into();
        let subscription = Subscription {
            entry: Arc::new(Entry {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                message_type: message_type.clone(),
                active: AtomicBool::new(true),
                callback: Box::new(callback),
            }),
        };

        self.lock()
            .entry(message_type)
            .or_default()
            .push(subscription.clone());

        tracing::debug!(
            "Subscribed #{} to '{}'",
            subscription.id(),
            subscription.message_type()
        );
        subscription
    }

    /// Cancel a subscription. Cancelling twice is a no-op.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        if !subscription.entry.active.swap(false, Ordering::AcqRel) {
            return;
        }

        let mut groups = self.lock();
        if let Some(group) = groups.get_mut(subscription.message_type()) {
            group.retain(|s| s.id() != subscription.id());
            if group.is_empty() {
                groups.remove(subscription.message_type());
            }
        }
        tracing::debug!(
            "Unsubscribed #{} from '{}'",
            subscription.id(),
            subscription.message_type()
        );
    }

    /// The subscribers registered for `message_type` right now.
    pub fn snapshot(&self, message_type: &str) -> Vec<Subscription> {
        self.lock().get(message_type).cloned().unwrap_or_default()
    }

    pub fn subscriber_count(&self, message_type: &str) -> usize {
        self.lock().get(message_type).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Subscription>>> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
