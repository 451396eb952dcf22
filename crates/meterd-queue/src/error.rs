//! Error types for meterd queue dispatch.

/// Errors from queue configuration validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A queue name is empty.
    #[error("queue name must not be empty")]
    EmptyQueueName,

    /// A single retry queue was configured without a positive TTL.
    #[error("retry queue {queue} requires a positive ttl")]
    ZeroTtl {
        /// The offending queue.
        queue: String,
    },

    /// A retry ladder was configured with no rungs.
    #[error("retry ladder for {queue} must contain at least one entry")]
    EmptyLadder {
        /// The main queue whose ladder is empty.
        queue: String,
    },

    /// `max_retries` was configured as zero.
    #[error("max_retries for {queue} must be positive when set")]
    ZeroMaxRetries {
        /// The offending queue.
        queue: String,
    },
}

/// Errors from the broker.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The queue has not been declared.
    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    /// The queue's consumer side has gone away.
    #[error("queue closed: {0}")]
    Closed(String),
}

/// Errors returned from an event handler.
///
/// The distinction drives the dispatcher's routing: invalid payloads are
/// permanent (alert and drop), failures are transient (retry ladder, then
/// dead-letter).
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The body does not match the expected schema; retrying will never
    /// succeed.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Transient processing failure; eligible for retry.
    #[error("handler failed: {0}")]
    Failed(String),
}

/// Errors from dispatcher startup.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Queue configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Broker operation failed.
    #[error(transparent)]
    Broker(#[from] BrokerError),
}
