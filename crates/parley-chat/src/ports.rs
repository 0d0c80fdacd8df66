//! Collaborator traits for the assistant, the chat transport and speech
//! transcription, plus the in-process implementations the service ships
//! with.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use parley_core::types::Media;
use serde::Serialize;
use tracing::info;

use crate::error::ChatError;

// =============================================================================
// Assistant
// =============================================================================

/// Terminal status of an assistant run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// The run is still waiting on an action nobody can perform.
    RequiresAction,
    Failed,
    Expired,
    Cancelled,
    Incomplete,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Failed => "failed",
            RunStatus::Expired => "expired",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Incomplete => "incomplete",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of driving a run to a terminal status.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub error: Option<String>,
    pub usage: Option<serde_json::Value>,
}

/// Who the run is for. Passed through to tool execution.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub chat_id: String,
    pub display_name: Option<String>,
}

/// Conversational assistant backend.
///
/// Threads hold the conversation; a run makes the assistant answer
/// everything added since the previous run. Tool calls are resolved inside
/// `run`.
#[async_trait]
pub trait Assistant: Send + Sync {
    async fn create_thread(&self) -> Result<String, ChatError>;

    async fn add_text(&self, thread_id: &str, text: &str) -> Result<(), ChatError>;

    /// Upload an image for vision use. Returns the assistant-side file id.
    async fn upload_image(&self, media: &Media) -> Result<String, ChatError>;

    async fn add_image(&self, thread_id: &str, file_id: &str, caption: &str)
        -> Result<(), ChatError>;

    async fn run(&self, thread_id: &str, context: &RunContext) -> Result<RunOutcome, ChatError>;

    /// Text of the newest assistant message in the thread.
    async fn latest_reply(&self, thread_id: &str) -> Result<String, ChatError>;

    /// System instructions the assistant currently runs with.
    async fn instructions(&self) -> Result<String, ChatError>;

    async fn update_instructions(&self, instructions: &str) -> Result<(), ChatError>;
}

#[derive(Debug, Default)]
struct EchoThread {
    pending: Vec<String>,
    replies: Vec<String>,
}

/// In-process assistant that acknowledges what it received.
///
/// Each run answers with a short markdown summary of the entries added
/// since the previous run. The terminal status is configurable.
pub struct EchoAssistant {
    status: RunStatus,
    instructions: Mutex<String>,
    threads: Mutex<HashMap<String, EchoThread>>,
    uploads: Mutex<u64>,
    runs: Mutex<u64>,
}

impl Default for EchoAssistant {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoAssistant {
    pub fn new() -> Self {
        Self::with_status(RunStatus::Completed)
    }

    /// An assistant whose runs always end with `status`.
    pub fn with_status(status: RunStatus) -> Self {
        Self {
            status,
            instructions: Mutex::new(String::new()),
            threads: Mutex::new(HashMap::new()),
            uploads: Mutex::new(0),
            runs: Mutex::new(0),
        }
    }

    /// Number of threads created so far.
    pub fn thread_count(&self) -> usize {
        self.threads.lock().map(|t| t.len()).unwrap_or(0)
    }

    fn push(&self, thread_id: &str, entry: String) -> Result<(), ChatError> {
        let mut threads = self
            .threads
            .lock()
            .map_err(|e| ChatError::Assistant(format!("thread lock poisoned: {}", e)))?;
        let thread = threads
            .get_mut(thread_id)
            .ok_or_else(|| ChatError::Assistant(format!("unknown thread {}", thread_id)))?;
        thread.pending.push(entry);
        Ok(())
    }

    fn next_id(counter: &Mutex<u64>, prefix: &str) -> Result<String, ChatError> {
        let mut n = counter
            .lock()
            .map_err(|e| ChatError::Assistant(format!("counter lock poisoned: {}", e)))?;
        *n += 1;
        Ok(format!("{}_{:06}", prefix, *n))
    }
}

#[async_trait]
impl Assistant for EchoAssistant {
    async fn create_thread(&self) -> Result<String, ChatError> {
        let mut threads = self
            .threads
            .lock()
            .map_err(|e| ChatError::Assistant(format!("thread lock poisoned: {}", e)))?;
        let id = format!("thread_{:06}", threads.len() + 1);
        threads.insert(id.clone(), EchoThread::default());
        Ok(id)
    }

    async fn add_text(&self, thread_id: &str, text: &str) -> Result<(), ChatError> {
        self.push(thread_id, text.to_string())
    }

    async fn upload_image(&self, media: &Media) -> Result<String, ChatError> {
        if media.data.is_empty() {
            return Err(ChatError::Assistant("cannot upload an empty image".to_string()));
        }
        Self::next_id(&self.uploads, "file")
    }

    async fn add_image(
        &self,
        thread_id: &str,
        file_id: &str,
        caption: &str,
    ) -> Result<(), ChatError> {
        let entry = if caption.is_empty() {
            format!("[image {}]", file_id)
        } else {
            format!("[image {}: {}]", file_id, caption)
        };
        self.push(thread_id, entry)
    }

    async fn run(&self, thread_id: &str, _context: &RunContext) -> Result<RunOutcome, ChatError> {
        let run_id = Self::next_id(&self.runs, "run")?;
        let mut threads = self
            .threads
            .lock()
            .map_err(|e| ChatError::Assistant(format!("thread lock poisoned: {}", e)))?;
        let thread = threads
            .get_mut(thread_id)
            .ok_or_else(|| ChatError::Assistant(format!("unknown thread {}", thread_id)))?;

        let entries = std::mem::take(&mut thread.pending);
        if self.status == RunStatus::Completed {
            thread.replies.push(format!(
                "**Received** {} message(s): {}",
                entries.len(),
                entries.join(" / ")
            ));
        }

        let error = match self.status {
            RunStatus::Completed | RunStatus::RequiresAction => None,
            other => Some(format!("run {}", other)),
        };
        Ok(RunOutcome {
            run_id,
            status: self.status,
            error,
            usage: Some(serde_json::json!({ "entries": entries.len() })),
        })
    }

    async fn latest_reply(&self, thread_id: &str) -> Result<String, ChatError> {
        let threads = self
            .threads
            .lock()
            .map_err(|e| ChatError::Assistant(format!("thread lock poisoned: {}", e)))?;
        threads
            .get(thread_id)
            .and_then(|t| t.replies.last().cloned())
            .ok_or_else(|| ChatError::Assistant(format!("no reply in thread {}", thread_id)))
    }

    async fn instructions(&self) -> Result<String, ChatError> {
        self.instructions
            .lock()
            .map(|i| i.clone())
            .map_err(|e| ChatError::Assistant(format!("instructions lock poisoned: {}", e)))
    }

    async fn update_instructions(&self, instructions: &str) -> Result<(), ChatError> {
        let mut current = self
            .instructions
            .lock()
            .map_err(|e| ChatError::Assistant(format!("instructions lock poisoned: {}", e)))?;
        *current = instructions.to_string();
        Ok(())
    }
}

// =============================================================================
// Outbound transport
// =============================================================================

/// Sends text messages to a chat address.
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn send(&self, to: &str, text: &str) -> Result<(), ChatError>;
}

/// Outbound that only writes messages to the log.
pub struct LogOutbound;

#[async_trait]
impl Outbound for LogOutbound {
    async fn send(&self, to: &str, text: &str) -> Result<(), ChatError> {
        if to.trim().is_empty() {
            return Err(ChatError::Transport("recipient must not be empty".to_string()));
        }
        info!(to = %to, chars = text.chars().count(), "Outbound message");
        Ok(())
    }
}

/// Outbound that keeps every sent message in memory.
#[derive(Default)]
pub struct RecordingOutbound {
    sent: Mutex<Vec<(String, String)>>,
    fail_for: Mutex<Vec<String>>,
}

impl RecordingOutbound {
    pub fn new() -> Self {
        Self::default()
    }

    /// All `(to, text)` pairs sent so far, oldest first.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Messages sent to one recipient.
    pub fn sent_to(&self, to: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(recipient, _)| recipient == to)
            .map(|(_, text)| text)
            .collect()
    }

    /// Make every send to `to` fail.
    pub fn fail_for(&self, to: &str) {
        if let Ok(mut fail) = self.fail_for.lock() {
            fail.push(to.to_string());
        }
    }
}

#[async_trait]
impl Outbound for RecordingOutbound {
    async fn send(&self, to: &str, text: &str) -> Result<(), ChatError> {
        let failing = self
            .fail_for
            .lock()
            .map(|f| f.iter().any(|r| r == to))
            .unwrap_or(false);
        if failing {
            return Err(ChatError::Transport(format!("delivery to {} failed", to)));
        }
        self.sent
            .lock()
            .map_err(|e| ChatError::Transport(format!("outbox lock poisoned: {}", e)))?
            .push((to.to_string(), text.to_string()));
        Ok(())
    }
}

// =============================================================================
// Transcription
// =============================================================================

/// Speech-to-text for voice notes.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, data: &[u8], mime_type: &str) -> Result<String, ChatError>;
}

/// Transcriber used when no speech backend is configured.
pub struct UnavailableTranscriber;

#[async_trait]
impl Transcriber for UnavailableTranscriber {
    async fn transcribe(&self, _data: &[u8], mime_type: &str) -> Result<String, ChatError> {
        Err(ChatError::Transcription(format!(
            "no transcriber configured for {}",
            mime_type
        )))
    }
}
