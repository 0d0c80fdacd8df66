//! Error types for the batching queue.

use parley_core::error::ParleyError;

/// Errors returned synchronously by `WindowScheduler::enqueue`.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue key must not be empty")]
    InvalidKey,
    #[error("invalid fragment: {0}")]
    InvalidFragment(String),
    #[error("scheduler is shut down")]
    ShuttingDown,
}

/// Errors raised by a flush handler.
///
/// The scheduler logs these and otherwise treats the flush as completed.
#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    #[error("flush handler failed: {0}")]
    Failed(String),
    #[error("flush handler panicked: {0}")]
    Panicked(String),
}

impl From<QueueError> for ParleyError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::ShuttingDown => ParleyError::ShuttingDown,
            other => ParleyError::Queue(other.to_string()),
        }
    }
}

impl From<ParleyError> for FlushError {
    fn from(err: ParleyError) -> Self {
        FlushError::Failed(err.to_string())
    }
}
