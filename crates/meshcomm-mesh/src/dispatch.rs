//! Per-category dispatch loops.
//!
//! Each joined category gets one loop that drains its subscription for the
//! lifetime of the network: drop deliveries that came from ourselves, decode
//! the rest, append them to the store, notify observers. A loop ends for good
//! when the lifecycle token is cancelled or the subscription fails; its
//! [`LoopHealth`] records why.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use meshcomm_core::{Category, decode_message};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::observers::ObserverRegistry;
use crate::store::MessageStore;
use crate::transport::{Delivery, TopicSubscription};

/// Why a dispatch loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    TransportError(String),
}

/// Lifecycle of a dispatch loop. `Stopped` is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopped(StopReason),
}

impl LoopState {
    pub fn is_running(&self) -> bool {
        matches!(self, LoopState::Running)
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Running => f.write_str("running"),
            LoopState::Stopped(StopReason::Cancelled) => f.write_str("stopped: cancelled"),
            LoopState::Stopped(StopReason::TransportError(e)) => write!(f, "stopped: {e}"),
        }
    }
}

/// Live state and counters of one dispatch loop.
#[derive(Debug)]
pub struct LoopHealth {
    category: Category,
    state: RwLock<LoopState>,
    accepted: AtomicU64,
    self_echo: AtomicU64,
    malformed: AtomicU64,
}

impl LoopHealth {
    pub(crate) fn new(category: Category) -> Self {
        Self {
            category,
            state: RwLock::new(LoopState::Running),
            accepted: AtomicU64::new(0),
            self_echo: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state.read().clone()
    }

    fn stop(&self, reason: StopReason) {
        *self.state.write() = LoopState::Stopped(reason);
    }

    pub fn snapshot(&self) -> TopicHealth {
        TopicHealth {
            category: self.category,
            state: self.state(),
            accepted: self.accepted.load(Ordering::Relaxed),
            self_echo: self.self_echo.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a dispatch loop, for health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicHealth {
    pub category: Category,
    pub state: LoopState,
    /// Messages stored and handed to observers.
    pub accepted: u64,
    /// Deliveries dropped because they came from this node.
    pub self_echo: u64,
    /// Deliveries dropped because they did not decode.
    pub malformed: u64,
}

pub(crate) struct DispatchLoop {
    pub category: Category,
    pub subscription: Box<dyn TopicSubscription>,
    pub local_id: String,
    pub store: Arc<MessageStore>,
    pub observers: Arc<ObserverRegistry>,
    pub health: Arc<LoopHealth>,
    pub cancel: CancellationToken,
}

impl DispatchLoop {
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        debug!(category = %self.category, "dispatch loop started");
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!(category = %self.category, "dispatch loop cancelled");
                    self.health.stop(StopReason::Cancelled);
                    return;
                }
                next = self.subscription.next() => next,
            };

            match next {
                Ok(delivery) => self.handle(delivery),
                Err(e) => {
                    error!(category = %self.category, error = %e, "error receiving message, dispatch loop stopped");
                    self.health.stop(StopReason::TransportError(e.to_string()));
                    return;
                }
            }
        }
    }

    fn handle(&self, delivery: Delivery) {
        if delivery.origin == self.local_id {
            self.health.self_echo.fetch_add(1, Ordering::Relaxed);
            debug!(category = %self.category, "skipping message from ourselves");
            return;
        }

        let message = match decode_message(&delivery.data) {
            Ok(message) => message,
            Err(e) => {
                self.health.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(category = %self.category, origin = %delivery.origin, error = %e, "discarding undecodable message");
                return;
            }
        };

        debug!(
            category = %self.category,
            id = %message.id,
            from = %message.sender.nickname,
            "message received"
        );
        self.store.append(message.clone());
        self.health.accepted.fetch_add(1, Ordering::Relaxed);
        self.observers.notify(&message);
    }
}
