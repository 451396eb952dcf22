//! The reliable message dispatcher.
//!
//! Consumes deliveries from a broker, invokes the bound handler, and on
//! failure routes the logical message through its retry ladder or to the
//! dead-letter queue. The delivery itself is acknowledged exactly once per
//! attempt in every branch, decoupled from how many times the logical
//! message is retried.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::alert::AlertSink;
use crate::broker::{Broker, Delivery, QueueDeclaration};
use crate::config::{EventKind, QueueConfig, RetryPolicy};
use crate::error::{DispatchError, HandlerError};
use crate::EventHandler;

/// One event type bound to its handler and queue configuration.
///
/// The binding table is resolved once at startup; per-message processing
/// never looks handlers up dynamically.
#[derive(Clone)]
pub struct QueueBinding {
    /// The event type.
    pub kind: EventKind,

    /// Queue topology and retry policy.
    pub config: QueueConfig,

    /// The handler invoked per message.
    pub handler: Arc<dyn EventHandler>,
}

impl QueueBinding {
    /// Bind an event type to a handler using its standard queue config.
    #[must_use]
    pub fn standard(kind: EventKind, handler: Arc<dyn EventHandler>) -> Self {
        Self {
            kind,
            config: kind.queue_config(),
            handler,
        }
    }
}

/// Dispatches queue messages to handlers with retry and dead-letter routing.
#[derive(Clone)]
pub struct Dispatcher {
    broker: Arc<dyn Broker>,
    alerts: Arc<dyn AlertSink>,
    prefetch: usize,
}

impl Dispatcher {
    /// Create a dispatcher over the given broker and alert sink.
    ///
    /// `prefetch` bounds how many deliveries one queue's workers hold
    /// unprocessed, so a slow consumer cannot starve others sharing the
    /// broker connection.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, alerts: Arc<dyn AlertSink>, prefetch: usize) -> Self {
        Self {
            broker,
            alerts,
            prefetch: prefetch.max(1),
        }
    }

    /// Declare the full topology for one queue: the main queue, any retry
    /// queue(s) parked back to the main queue after their TTL, and the
    /// dead-letter queue (plain, no special routing).
    ///
    /// # Errors
    ///
    /// Returns a validation error for an inconsistent configuration, or a
    /// broker error if declaration fails.
    pub async fn declare_topology(&self, config: &QueueConfig) -> Result<(), DispatchError> {
        config.validate()?;

        self.broker
            .declare_queue(QueueDeclaration::plain(&config.name))
            .await?;

        match &config.retry {
            RetryPolicy::None => {}
            RetryPolicy::Single { queue, ttl, .. } => {
                self.broker
                    .declare_queue(QueueDeclaration::parking(queue, *ttl, &config.name))
                    .await?;
            }
            RetryPolicy::Ladder(rungs) => {
                for rung in rungs {
                    self.broker
                        .declare_queue(QueueDeclaration::parking(
                            &rung.queue,
                            rung.ttl,
                            &config.name,
                        ))
                        .await?;
                }
            }
        }

        if let Some(dead) = &config.dead_letter_queue {
            self.broker
                .declare_queue(QueueDeclaration::plain(dead))
                .await?;
        }

        Ok(())
    }

    /// Declare topology and start consumers for every binding.
    ///
    /// # Errors
    ///
    /// Returns the first configuration or broker error encountered during
    /// startup.
    pub async fn start(&self, bindings: Vec<QueueBinding>) -> Result<DispatcherRunning, DispatchError> {
        let mut tasks = Vec::with_capacity(bindings.len());

        for binding in bindings {
            self.declare_topology(&binding.config).await?;

            let mut deliveries = self
                .broker
                .consume(&binding.config.name, self.prefetch)
                .await?;

            let limit = Arc::new(Semaphore::new(self.prefetch));
            let dispatcher = self.clone();

            tasks.push(tokio::spawn(async move {
                while let Some(delivery) = deliveries.recv().await {
                    let Ok(permit) = limit.clone().acquire_owned().await else {
                        break;
                    };
                    let dispatcher = dispatcher.clone();
                    let binding = binding.clone();
                    tokio::spawn(async move {
                        dispatcher
                            .process(delivery, &binding.config, binding.handler.as_ref())
                            .await;
                        drop(permit);
                    });
                }
            }));
        }

        tracing::info!(consumers = tasks.len(), "Consumers started; waiting for messages");
        Ok(DispatcherRunning { tasks })
    }

    /// Process one delivery through the bound handler.
    ///
    /// Decode failures and schema-invalid payloads are permanent: alerted
    /// and acknowledged without entering the retry ladder, since retrying
    /// will never succeed. Handler failures are routed per the queue's
    /// retry policy.
    pub async fn process(
        &self,
        delivery: Delivery,
        config: &QueueConfig,
        handler: &dyn EventHandler,
    ) {
        let body = match serde_json::from_slice::<serde_json::Value>(&delivery.body) {
            Ok(body) => body,
            Err(e) => {
                self.drop_invalid(&delivery, config, &e.to_string()).await;
                delivery.ack();
                return;
            }
        };

        match handler.handle(body).await {
            Ok(()) => delivery.ack(),
            Err(HandlerError::InvalidPayload(e)) => {
                self.drop_invalid(&delivery, config, &e).await;
                delivery.ack();
            }
            Err(HandlerError::Failed(e)) => {
                tracing::error!(queue = %config.name, error = %e, "Error in handler");
                self.route_failure(delivery, config, &e).await;
            }
        }
    }

    async fn drop_invalid(&self, delivery: &Delivery, config: &QueueConfig, error: &str) {
        let body = String::from_utf8_lossy(&delivery.body);
        self.alerts
            .invalid_payload(&config.name, &body, error)
            .await;
    }

    async fn route_failure(&self, delivery: Delivery, config: &QueueConfig, error: &str) {
        let attempt = delivery.headers.attempt();

        let next_retry = match &config.retry {
            // attempt 0 maps to the first rung.
            RetryPolicy::Ladder(rungs) => rungs.get(attempt as usize).map(|r| r.queue.clone()),
            RetryPolicy::Single {
                queue, max_retries, ..
            } => max_retries
                .map_or(true, |max| attempt < max)
                .then(|| queue.clone()),
            RetryPolicy::None => None,
        };

        if let Some(next) = next_retry {
            let mut headers = delivery.headers.clone();
            headers.set_attempt(attempt + 1);

            tracing::info!(
                queue = %config.name,
                retry_queue = %next,
                attempt = attempt + 1,
                "Retrying message"
            );
            if let Err(e) = self
                .broker
                .publish(&next, delivery.body.clone(), headers)
                .await
            {
                tracing::error!(
                    queue = %config.name,
                    retry_queue = %next,
                    error = %e,
                    "Failed to republish message for retry"
                );
            }
        } else if let Some(dead) = &config.dead_letter_queue {
            let mut headers = delivery.headers.clone();
            headers.set_error_message(error);
            headers.set_original_queue(&config.name);

            tracing::warn!(
                queue = %config.name,
                dead_letter = %dead,
                attempt,
                "Message dead-lettered"
            );
            if let Err(e) = self
                .broker
                .publish(dead, delivery.body.clone(), headers)
                .await
            {
                tracing::error!(
                    dead_letter = %dead,
                    error = %e,
                    "Failed to publish to dead-letter queue"
                );
            }

            // Notify asynchronously; a slow or failing sink must not hold
            // up the dead-letter publish or the ack.
            let alerts = self.alerts.clone();
            let queue = dead.clone();
            let body = String::from_utf8_lossy(&delivery.body).into_owned();
            let error = error.to_string();
            tokio::spawn(async move {
                alerts.dead_letter(&queue, &body, attempt, &error).await;
            });
        } else {
            // Deliberate for event types with no configured retry policy.
            tracing::debug!(
                queue = %config.name,
                "No retry or dead-letter configured; dropping message"
            );
        }

        delivery.ack();
    }
}

/// Handle to running consumers.
pub struct DispatcherRunning {
    tasks: Vec<JoinHandle<()>>,
}

impl DispatcherRunning {
    /// Stop all consumers.
    pub fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
    }

    /// Wait for consumers to exit on their own (broker closed).
    pub async fn join(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}
