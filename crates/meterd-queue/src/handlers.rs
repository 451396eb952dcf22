//! Event handlers for consumed queues.

use std::sync::Arc;

use async_trait::async_trait;

use meterd_engine::{CommitRequest, EngineError, MeteringEngine};

use crate::config::EventKind;
use crate::dispatcher::QueueBinding;
use crate::error::HandlerError;
use crate::EventHandler;

/// Handles asynchronous usage commit messages.
///
/// The payload shape is identical to the synchronous commit call
/// ([`CommitRequest`]); schema failures are permanent, engine storage
/// failures trigger the retry ladder, and business rejections (ownership
/// mismatch) are logged without retry since they cannot succeed later.
pub struct UsageCommitHandler {
    engine: Arc<MeteringEngine>,
}

impl UsageCommitHandler {
    /// Create a handler over the shared engine.
    #[must_use]
    pub fn new(engine: Arc<MeteringEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl EventHandler for UsageCommitHandler {
    async fn handle(&self, body: serde_json::Value) -> Result<(), HandlerError> {
        let request: CommitRequest = serde_json::from_value(body)
            .map_err(|e| HandlerError::InvalidPayload(e.to_string()))?;
        request.validate().map_err(HandlerError::InvalidPayload)?;

        let record_id = request.record_id;
        tracing::info!(record_id = %record_id, "Processing usage commit message");

        match self.engine.commit(request).await {
            Ok(outcome) if outcome.ok => {
                tracing::info!(
                    record_id = %record_id,
                    message = %outcome.message,
                    "Usage commit processed"
                );
                Ok(())
            }
            Ok(outcome) => {
                // Rejections (ownership mismatch) won't succeed on retry.
                tracing::warn!(
                    record_id = %record_id,
                    message = %outcome.message,
                    "Usage commit rejected"
                );
                Ok(())
            }
            Err(EngineError::InvalidRequest(e)) => Err(HandlerError::InvalidPayload(e)),
            Err(e) => Err(HandlerError::Failed(e.to_string())),
        }
    }
}

/// The startup binding table: event type → handler + queue configuration.
#[must_use]
pub fn standard_bindings(engine: Arc<MeteringEngine>) -> Vec<QueueBinding> {
    vec![QueueBinding::standard(
        EventKind::UsageCommit,
        Arc::new(UsageCommitHandler::new(engine)),
    )]
}
