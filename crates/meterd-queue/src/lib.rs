//! Reliable message dispatch for meterd.
//!
//! This crate provides the queue consumer framework that guarantees each
//! event is processed at least once with bounded, backoff-based retries
//! and a terminal dead-letter path:
//!
//! - **Envelope**: [`MessageHeaders`] carrying retry metadata
//! - **Topology**: [`QueueConfig`] with single-retry or ladder policies
//! - **Broker seam**: [`Broker`] trait plus the in-process [`MemoryBroker`]
//! - **Dispatch**: [`Dispatcher`] with prefetch-bounded workers
//! - **Alerts**: [`AlertSink`] notified on dead-letter and invalid payloads
//! - **Handlers**: [`UsageCommitHandler`] for the `usage_commits` queue
//!
//! Retry delay comes from the broker itself: a retry queue is declared so
//! messages parked in it return to the main queue after their TTL, which
//! gives backoff without a timer service.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod alert;
pub mod broker;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod message;

pub use alert::{AlertSink, TracingAlertSink};
pub use broker::{Broker, Delivery, MemoryBroker, QueueDeclaration};
pub use config::{EventKind, QueueConfig, RetryPolicy, RetryRung};
pub use dispatcher::{Dispatcher, DispatcherRunning, QueueBinding};
pub use error::{BrokerError, ConfigError, DispatchError, HandlerError};
pub use handlers::{standard_bindings, UsageCommitHandler};
pub use message::{header, MessageHeaders};

use async_trait::async_trait;

/// A queue message handler: one method, one event type.
///
/// Handlers receive the decoded JSON body and classify their failures:
/// [`HandlerError::InvalidPayload`] is permanent (alert and drop),
/// [`HandlerError::Failed`] is transient (retry ladder, then dead-letter).
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Process one message body.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] classifying the failure for routing.
    async fn handle(&self, body: serde_json::Value) -> Result<(), HandlerError>;
}
