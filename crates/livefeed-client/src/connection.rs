//! Connection state machine.
//!
//! A single supervisor task owns the lifecycle state. Everything that can
//! change it arrives on one `select!` loop, so transitions never interleave:
//!
//! - caller commands (`connect`, `disconnect`)
//! - closure notifications from the transport
//! - completion of the in-flight open attempt
//! - the reconnect timer
//!
//! ```text
//!          connect              opened
//!   Idle ──────────▶ Connecting ───────▶ Open
//!                     │  ▲                │ unexpected close
//!     first attempt   │  │ timer fires    ▼
//!     failed          │  └─────────── Reconnecting
//!                     ▼                   │ retries exhausted
//!                   Closed ◀──────────────┘
//! ```
//!
//! `disconnect()` moves any state to `Closed`, cancelling the timer and any
//! in-flight open.

use futures_util::future::BoxFuture;
use livefeed_core::{CLOSE_NORMAL, ConnectionState, ConnectionStatus, Endpoint};
use std::pin::Pin;
use std::time::SystemTime;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Sleep;

use crate::error::{ClientError, TransportError};
use crate::reconnect::{ReconnectPolicy, RetryState};
use crate::transport::{Closure, Connector, TransportAdapter};

pub(crate) type ConnectReply = oneshot::Sender<Result<(), ClientError>>;

pub(crate) enum Command {
    Connect(ConnectReply),
    Disconnect(oneshot::Sender<()>),
}

/// State and retry counter, as seen from outside the supervisor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Lifecycle {
    pub state: ConnectionState,
    pub retry: RetryState,
}

/// Publishes status snapshots, skipping ones identical to the last.
pub(crate) struct StatusPublisher {
    current: watch::Sender<ConnectionStatus>,
    updates: broadcast::Sender<ConnectionStatus>,
}

impl StatusPublisher {
    pub fn new(
        current: watch::Sender<ConnectionStatus>,
        updates: broadcast::Sender<ConnectionStatus>,
    ) -> Self {
        Self { current, updates }
    }

    fn update(&self, f: impl FnOnce(&mut ConnectionStatus)) {
        let mut next = self.current.borrow().clone();
        f(&mut next);
        if *self.current.borrow() == next {
            return;
        }
        self.current.send_replace(next.clone());
        // No observers is fine.
        let _ = self.updates.send(next);
    }
}

struct Attempt {
    open: BoxFuture<'static, Result<u64, TransportError>>,
    is_retry: bool,
}

pub(crate) struct Supervisor<C> {
    endpoint: Endpoint,
    transport: TransportAdapter<C>,
    policy: ReconnectPolicy,
    state: ConnectionState,
    lifecycle: watch::Sender<Lifecycle>,
    status: StatusPublisher,
    live: Option<u64>,
    attempt: Option<Attempt>,
    retry_timer: Option<Pin<Box<Sleep>>>,
    waiters: Vec<ConnectReply>,
}

impl<C: Connector> Supervisor<C> {
    pub fn new(
        endpoint: Endpoint,
        transport: TransportAdapter<C>,
        policy: ReconnectPolicy,
        lifecycle: watch::Sender<Lifecycle>,
        status: StatusPublisher,
    ) -> Self {
        Self {
            endpoint,
            transport,
            policy,
            state: ConnectionState::Idle,
            lifecycle,
            status,
            live: None,
            attempt: None,
            retry_timer: None,
            waiters: Vec::new(),
        }
    }

    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut closures: mpsc::UnboundedReceiver<Closure>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Connect(reply)) => self.on_connect(reply),
                    Some(Command::Disconnect(done)) => {
                        self.on_disconnect();
                        let _ = done.send(());
                    }
                    None => {
                        self.on_disconnect();
                        break;
                    }
                },

                Some(closure) = closures.recv() => self.on_closure(closure),

                (result, is_retry) = next_open(&mut self.attempt) => {
                    self.attempt = None;
                    self.on_open_result(result, is_retry);
                }

                () = next_tick(&mut self.retry_timer) => {
                    self.retry_timer = None;
                    self.on_retry_due();
                }
            }
        }
        tracing::debug!("Supervisor for {} stopped", self.endpoint);
    }

    fn on_connect(&mut self, reply: ConnectReply) {
        match self.state {
            ConnectionState::Open => {
                let _ = reply.send(Ok(()));
            }
            ConnectionState::Connecting => self.waiters.push(reply),
            ConnectionState::Reconnecting => {
                // Run the pending retry now instead of waiting out the delay.
                self.waiters.push(reply);
                self.retry_timer = None;
                self.begin_attempt(true);
            }
            ConnectionState::Idle | ConnectionState::Closing | ConnectionState::Closed => {
                self.waiters.push(reply);
                self.policy.reset();
                self.begin_attempt(false);
            }
        }
    }

    fn on_disconnect(&mut self) {
        self.retry_timer = None;
        if self.attempt.take().is_some() {
            tracing::debug!("Abandoning in-flight connect to {}", self.endpoint);
        }
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(ClientError::Cancelled));
        }

        match self.state {
            ConnectionState::Idle | ConnectionState::Closed => {
                self.transition(ConnectionState::Closed);
            }
            _ => {
                if self.live.take().is_some() {
                    self.transition(ConnectionState::Closing);
                }
                self.transport.close(CLOSE_NORMAL, "client disconnect");
                self.transition(ConnectionState::Closed);
                self.status.update(|s| {
                    s.connected = false;
                    s.reconnecting = false;
                });
                tracing::info!("Disconnected from {}", self.endpoint);
            }
        }
    }

    fn on_open_result(&mut self, result: Result<u64, TransportError>, is_retry: bool) {
        match result {
            Ok(generation) => {
                self.live = Some(generation);
                self.policy.reset();
                self.transition(ConnectionState::Open);
                self.status.update(|s| {
                    s.connected = true;
                    s.reconnecting = false;
                    s.last_connected_at = Some(SystemTime::now());
                    s.last_error = None;
                });
                tracing::info!("Connected to {}", self.endpoint);
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
            }
            Err(error) if is_retry => {
                tracing::warn!(
                    "Reconnect attempt {}/{} to {} failed: {}",
                    self.policy.state().attempt,
                    self.policy.max_attempts(),
                    self.endpoint,
                    error
                );
                self.schedule_retry();
            }
            Err(error) => {
                tracing::warn!("Failed to connect to {}: {}", self.endpoint, error);
                self.transition(ConnectionState::Closed);
                let message = error.to_string();
                self.status.update(|s| {
                    s.connected = false;
                    s.reconnecting = false;
                    s.last_error = Some(message);
                });
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Err(ClientError::Transport(error.clone())));
                }
            }
        }
    }

    fn on_closure(&mut self, closure: Closure) {
        if self.live != Some(closure.generation) {
            tracing::trace!("Ignoring closure of superseded link {}", closure.generation);
            return;
        }
        self.live = None;
        self.transport.release(closure.generation);

        if !closure.reason.is_unexpected() {
            self.transition(ConnectionState::Closed);
            self.status.update(|s| {
                s.connected = false;
                s.reconnecting = false;
            });
            return;
        }

        tracing::warn!(
            "Connection to {} lost (code {}, clean: {}): {}",
            self.endpoint,
            closure.code(),
            closure.was_clean(),
            closure.reason
        );
        self.schedule_retry();
    }

    fn on_retry_due(&mut self) {
        if self.state == ConnectionState::Reconnecting {
            self.begin_attempt(true);
        }
    }

    fn schedule_retry(&mut self) {
        match self.policy.next_retry() {
            Some(delay) => {
                self.transition(ConnectionState::Reconnecting);
                self.status.update(|s| {
                    s.connected = false;
                    s.reconnecting = true;
                });
                tracing::info!(
                    "Reconnecting to {} in {:?} (attempt {}/{})",
                    self.endpoint,
                    delay,
                    self.policy.state().attempt,
                    self.policy.max_attempts()
                );
                self.retry_timer = Some(Box::pin(tokio::time::sleep(delay)));
            }
            None => {
                let exhausted = ClientError::RetryExhausted;
                tracing::error!("Giving up on {}: {}", self.endpoint, exhausted);
                self.transition(ConnectionState::Closed);
                self.status.update(|s| {
                    s.connected = false;
                    s.reconnecting = false;
                    s.last_error = Some(exhausted.to_string());
                });
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Err(ClientError::RetryExhausted));
                }
            }
        }
    }

    fn begin_attempt(&mut self, is_retry: bool) {
        self.transition(ConnectionState::Connecting);
        let transport = self.transport.clone();
        let endpoint = self.endpoint.clone();
        self.attempt = Some(Attempt {
            open: Box::pin(async move { transport.open(&endpoint).await }),
            is_retry,
        });
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            tracing::debug!("{}: {} -> {}", self.endpoint, self.state, next);
        }
        self.state = next;
        self.lifecycle.send_replace(Lifecycle {
            state: next,
            retry: self.policy.state(),
        });
    }
}

async fn next_open(attempt: &mut Option<Attempt>) -> (Result<u64, TransportError>, bool) {
    match attempt {
        Some(attempt) => ((&mut attempt.open).await, attempt.is_retry),
        None => std::future::pending().await,
    }
}

async fn next_tick(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => std::future::pending().await,
    }
}
