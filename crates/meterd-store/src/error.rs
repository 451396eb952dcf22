//! Error types for meterd storage.

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("not found")]
    NotFound,

    /// A record with the same idempotency key already exists.
    ///
    /// Raised when a concurrent duplicate validation loses the insert race;
    /// the caller re-reads the winning record and treats the request as a
    /// replay.
    #[error("duplicate record for request {client_request_id}")]
    DuplicateRecord {
        /// The client request ID that collided.
        client_request_id: String,
    },
}
