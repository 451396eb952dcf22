//! Queue message envelope and delivery metadata.
//!
//! Retry bookkeeping rides in transport headers, never in the body: a
//! republished body is byte-identical to the original publication.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Well-known header names.
pub mod header {
    /// Number of retry republishes this logical message has been through.
    pub const RETRY_ATTEMPT: &str = "x-retry-attempt";

    /// Error text attached when a message is dead-lettered.
    pub const ERROR_MESSAGE: &str = "x-error-message";

    /// Name of the originating main queue, attached on dead-letter.
    pub const ORIGINAL_QUEUE: &str = "x-original-queue";
}

/// String-keyed transport metadata carried alongside a message body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeaders(BTreeMap<String, String>);

impl MessageHeaders {
    /// Create an empty header map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a header value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Set a header value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// The retry attempt count, defaulting to 0 when absent or unparsable.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.get(header::RETRY_ATTEMPT)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Set the retry attempt count.
    pub fn set_attempt(&mut self, attempt: u32) {
        self.insert(header::RETRY_ATTEMPT, attempt.to_string());
    }

    /// The dead-letter error text, if attached.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.get(header::ERROR_MESSAGE)
    }

    /// Attach the dead-letter error text.
    pub fn set_error_message(&mut self, error: impl Into<String>) {
        self.insert(header::ERROR_MESSAGE, error);
    }

    /// The originating main queue, if attached.
    #[must_use]
    pub fn original_queue(&self) -> Option<&str> {
        self.get(header::ORIGINAL_QUEUE)
    }

    /// Attach the originating main queue name.
    pub fn set_original_queue(&mut self, queue: impl Into<String>) {
        self.insert(header::ORIGINAL_QUEUE, queue);
    }
}
