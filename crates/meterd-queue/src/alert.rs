//! Alert sink for dead-letter and malformed-payload events.
//!
//! The sink is an external collaborator (ops email, pager, chat webhook);
//! implementations own their delivery and error handling, so the dispatcher
//! can fire and forget.

use async_trait::async_trait;

/// Notified when messages terminate abnormally.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// A message exhausted its retries and was dead-lettered.
    async fn dead_letter(&self, queue_name: &str, message_body: &str, attempt_count: u32, error: &str);

    /// A message body failed schema validation and was dropped.
    async fn invalid_payload(&self, queue_name: &str, message_body: &str, error: &str);
}

/// Default sink that emits structured log events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn dead_letter(&self, queue_name: &str, message_body: &str, attempt_count: u32, error: &str) {
        tracing::error!(
            queue = queue_name,
            attempt_count,
            error,
            body = message_body,
            "Message dead-lettered"
        );
    }

    async fn invalid_payload(&self, queue_name: &str, message_body: &str, error: &str) {
        tracing::error!(
            queue = queue_name,
            error,
            body = message_body,
            "Invalid message payload dropped"
        );
    }
}
