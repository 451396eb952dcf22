//! Error types for the metering engine.

use meterd_store::StoreError;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur in engine operations.
///
/// Expected business outcomes (denials, replays, missing records) are
/// never errors; they are carried in the outcome types. Only malformed
/// input and infrastructure failures surface here.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Client input failed boundary validation. Never retried.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The persistence layer failed.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}
