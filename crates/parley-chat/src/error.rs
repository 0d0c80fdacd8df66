//! Error types for the conversation layer.

use parley_core::error::ParleyError;
use parley_queue::{FlushError, QueueError};

/// Errors from inbound handling and batch processing.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("assistant error: {0}")]
    Assistant(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("transcription error: {0}")]
    Transcription(String),
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

impl From<ParleyError> for ChatError {
    fn from(err: ParleyError) -> Self {
        match err {
            ParleyError::Assistant(msg) => ChatError::Assistant(msg),
            ParleyError::Transport(msg) => ChatError::Transport(msg),
            ParleyError::Transcription(msg) => ChatError::Transcription(msg),
            other => ChatError::Storage(other.to_string()),
        }
    }
}

impl From<ChatError> for ParleyError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::InvalidMessage(msg) => ParleyError::Api(msg),
            ChatError::Storage(msg) => ParleyError::Storage(msg),
            ChatError::Assistant(msg) => ParleyError::Assistant(msg),
            ChatError::Transport(msg) => ParleyError::Transport(msg),
            ChatError::Transcription(msg) => ParleyError::Transcription(msg),
            ChatError::Queue(e) => e.into(),
        }
    }
}

impl From<ChatError> for FlushError {
    fn from(err: ChatError) -> Self {
        FlushError::Failed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_error_display() {
        assert_eq!(
            ChatError::InvalidMessage("missing sender".to_string()).to_string(),
            "invalid message: missing sender"
        );
        assert_eq!(
            ChatError::Assistant("run expired".to_string()).to_string(),
            "assistant error: run expired"
        );
        assert_eq!(
            ChatError::Queue(QueueError::ShuttingDown).to_string(),
            "queue error: scheduler is shut down"
        );
    }

    #[test]
    fn test_from_parley_error() {
        let err: ChatError = ParleyError::Storage("locked".to_string()).into();
        assert!(matches!(err, ChatError::Storage(_)));

        let err: ChatError = ParleyError::Transport("socket closed".to_string()).into();
        assert!(matches!(err, ChatError::Transport(_)));
    }

    #[test]
    fn test_into_parley_error() {
        let err: ParleyError = ChatError::Queue(QueueError::ShuttingDown).into();
        assert!(matches!(err, ParleyError::ShuttingDown));

        let err: ParleyError = ChatError::InvalidMessage("bad".to_string()).into();
        assert!(matches!(err, ParleyError::Api(_)));
    }

    #[test]
    fn test_into_flush_error() {
        let err: FlushError = ChatError::Assistant("down".to_string()).into();
        assert_eq!(err.to_string(), "flush handler failed: assistant error: down");
    }
}
