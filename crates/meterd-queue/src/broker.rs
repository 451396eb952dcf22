//! Broker abstraction and the in-process implementation.
//!
//! The [`Broker`] trait is the seam between the dispatcher and the actual
//! transport. [`MemoryBroker`] implements it over tokio channels for tests
//! and single-process deployments; an external broker (AMQP and friends)
//! plugs in behind the same trait.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::BrokerError;
use crate::message::MessageHeaders;

/// Declaration of one queue on the broker.
#[derive(Debug, Clone)]
pub struct QueueDeclaration {
    /// Queue name.
    pub name: String,

    /// Per-message TTL. Expired messages are re-routed to
    /// `dead_letter_to` instead of being delivered from this queue.
    pub message_ttl: Option<Duration>,

    /// Routing target for expired messages. Declaring a retry queue with
    /// `message_ttl` plus `dead_letter_to = main` gives the
    /// park-then-return delay without a timer service.
    pub dead_letter_to: Option<String>,
}

impl QueueDeclaration {
    /// Declare a plain queue with no TTL routing.
    #[must_use]
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message_ttl: None,
            dead_letter_to: None,
        }
    }

    /// Declare a retry queue that parks messages for `ttl` and then routes
    /// them to `target`.
    #[must_use]
    pub fn parking(name: impl Into<String>, ttl: Duration, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message_ttl: Some(ttl),
            dead_letter_to: Some(target.into()),
        }
    }
}

/// One delivered message with its acknowledgement handle.
///
/// Every delivery must be acknowledged exactly once, regardless of how the
/// logical message is routed afterwards; `ack` consumes the delivery so a
/// double-ack cannot compile.
#[derive(Debug)]
pub struct Delivery {
    /// Raw message body.
    pub body: Vec<u8>,

    /// Transport metadata.
    pub headers: MessageHeaders,

    acked: bool,
    queue: String,
}

impl Delivery {
    /// Acknowledge the delivery, removing it from the queue.
    pub fn ack(mut self) {
        self.acked = true;
        tracing::trace!(queue = %self.queue, "Delivery acknowledged");
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if !self.acked {
            tracing::warn!(queue = %self.queue, "Delivery dropped without acknowledgement");
        }
    }
}

/// Message broker contract.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare a queue. Declaring an existing queue is a no-op.
    async fn declare_queue(&self, declaration: QueueDeclaration) -> Result<(), BrokerError>;

    /// Publish a message to a declared queue.
    async fn publish(
        &self,
        queue: &str,
        body: Vec<u8>,
        headers: MessageHeaders,
    ) -> Result<(), BrokerError>;

    /// Begin consuming a declared queue.
    ///
    /// The returned channel holds at most `prefetch` undelivered messages;
    /// a slow consumer backpressures the queue instead of buffering
    /// without bound.
    async fn consume(
        &self,
        queue: &str,
        prefetch: usize,
    ) -> Result<mpsc::Receiver<Delivery>, BrokerError>;
}

/// In-process broker over tokio channels.
///
/// Cheap to clone; all clones share the same queues.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Mutex<HashMap<String, QueueState>>>,
}

struct QueueState {
    message_ttl: Option<Duration>,
    dead_letter_to: Option<String>,
    tx: mpsc::UnboundedSender<(Vec<u8>, MessageHeaders)>,
    rx: Option<mpsc::UnboundedReceiver<(Vec<u8>, MessageHeaders)>>,
}

impl MemoryBroker {
    /// Create a broker with no queues.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, QueueState>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_queue(&self, declaration: QueueDeclaration) -> Result<(), BrokerError> {
        let mut queues = self.lock();
        queues.entry(declaration.name.clone()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            QueueState {
                message_ttl: declaration.message_ttl,
                dead_letter_to: declaration.dead_letter_to,
                tx,
                rx: Some(rx),
            }
        });
        Ok(())
    }

    async fn publish(
        &self,
        queue: &str,
        body: Vec<u8>,
        headers: MessageHeaders,
    ) -> Result<(), BrokerError> {
        // Take what we need under the lock, then release it before any await.
        let (ttl_route, tx) = {
            let queues = self.lock();
            let state = queues
                .get(queue)
                .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?;
            let route = state
                .message_ttl
                .zip(state.dead_letter_to.clone());
            (route, state.tx.clone())
        };

        if let Some((ttl, target)) = ttl_route {
            // Parking queue: the message returns to the target after TTL.
            let broker = self.clone();
            let queue = queue.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(ttl).await;
                if let Err(e) = broker.publish(&target, body, headers).await {
                    tracing::error!(
                        queue = %queue,
                        target = %target,
                        error = %e,
                        "Failed to route parked message"
                    );
                }
            });
            return Ok(());
        }

        tx.send((body, headers))
            .map_err(|_| BrokerError::Closed(queue.to_string()))
    }

    async fn consume(
        &self,
        queue: &str,
        prefetch: usize,
    ) -> Result<mpsc::Receiver<Delivery>, BrokerError> {
        let mut upstream = {
            let mut queues = self.lock();
            let state = queues
                .get_mut(queue)
                .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?;
            state
                .rx
                .take()
                .ok_or_else(|| BrokerError::Closed(queue.to_string()))?
        };

        let (tx, rx) = mpsc::channel(prefetch.max(1));
        let queue_name = queue.to_string();

        // Forward from the unbounded store into the prefetch-bounded
        // delivery channel; send blocks when the consumer is saturated.
        tokio::spawn(async move {
            while let Some((body, headers)) = upstream.recv().await {
                let delivery = Delivery {
                    body,
                    headers,
                    acked: false,
                    queue: queue_name.clone(),
                };
                if tx.send(delivery).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }
}
