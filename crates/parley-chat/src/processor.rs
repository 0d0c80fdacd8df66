//! Batch processing: the flush handler behind every conversation key.
//!
//! A flushed batch is persisted unit by unit, pushed into the user's
//! assistant thread, answered by one assistant run, and the reply is sent
//! back to the chat.

use std::sync::Arc;

use async_trait::async_trait;
use parley_core::types::{Batch, Unit};
use parley_queue::{FlushError, FlushHandler};
use parley_storage::{
    MediaMeta, MessageRepository, MessageStatus, NewMessage, RunMeta, UserRepository,
};
use tracing::{debug, info, warn};

use crate::alerts::{infra_error_report, run_failure_report, Notifier, RunFailure};
use crate::error::ChatError;
use crate::format::whatsapp_text;
use crate::ports::{Assistant, Outbound, RunContext, RunStatus};

/// Upload purpose recorded for images sent to the assistant.
pub const VISION_PURPOSE: &str = "vision";

/// What happened to a processed batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    pub run_status: RunStatus,
    /// Text sent back to the chat, if any.
    pub reply: Option<String>,
    /// Number of message records written.
    pub records: usize,
}

pub struct BatchProcessor {
    users: Arc<UserRepository>,
    messages: Arc<MessageRepository>,
    assistant: Arc<dyn Assistant>,
    outbound: Arc<dyn Outbound>,
    notifier: Arc<Notifier>,
    requires_action_reply: String,
}

impl BatchProcessor {
    pub fn new(
        users: Arc<UserRepository>,
        messages: Arc<MessageRepository>,
        assistant: Arc<dyn Assistant>,
        outbound: Arc<dyn Outbound>,
        notifier: Arc<Notifier>,
        requires_action_reply: impl Into<String>,
    ) -> Self {
        Self {
            users,
            messages,
            assistant,
            outbound,
            notifier,
            requires_action_reply: requires_action_reply.into(),
        }
    }

    /// Flush handler for one sender, carrying their display name.
    pub fn handler_for(self: &Arc<Self>, display_name: Option<String>) -> Arc<dyn FlushHandler> {
        Arc::new(SenderHandler {
            processor: Arc::clone(self),
            display_name,
        })
    }

    /// Process one flushed batch for `chat_id`.
    pub async fn process(
        &self,
        chat_id: &str,
        display_name: Option<&str>,
        batch: &Batch,
    ) -> Result<ProcessOutcome, ChatError> {
        if batch.is_empty() {
            return Err(ChatError::InvalidMessage("batch has no units".to_string()));
        }

        let user = self.users.find_or_create_by_phone(chat_id, display_name)?;
        let thread_id = match user.thread_id.clone() {
            Some(thread_id) => thread_id,
            None => {
                let thread_id = self.assistant.create_thread().await?;
                self.users.set_thread(&user.id, &thread_id)?;
                debug!(chat_id = %chat_id, thread_id = %thread_id, "Created assistant thread");
                thread_id
            }
        };

        let mut record_ids = Vec::with_capacity(batch.len());
        for unit in &batch.units {
            let mut record = NewMessage {
                user_id: user.id.clone(),
                phone: user.phone.clone(),
                kind: unit.kind(),
                text: None,
                caption: None,
                thread_id: Some(thread_id.clone()),
                media: None,
            };

            match unit {
                Unit::Text { text } => {
                    record.text = Some(text.clone());
                    record_ids.push(self.messages.create_incoming(&record)?);
                    self.assistant.add_text(&thread_id, text).await?;
                }
                Unit::Image { caption, media } => {
                    record.caption = Some(caption.clone()).filter(|c| !c.is_empty());
                    record.media = Some(MediaMeta {
                        mime_type: media.mime_type.clone(),
                        filename: media.filename.clone(),
                        size_bytes: media.size_bytes,
                        file_id: None,
                        purpose: None,
                    });
                    let id = self.messages.create_incoming(&record)?;
                    record_ids.push(id.clone());

                    let file_id = self.assistant.upload_image(media).await?;
                    self.messages.set_media_file(&id, &file_id, VISION_PURPOSE)?;
                    self.assistant.add_image(&thread_id, &file_id, caption).await?;
                }
            }
        }

        let context = RunContext {
            chat_id: chat_id.to_string(),
            display_name: display_name.map(str::to_string),
        };
        let run = self.assistant.run(&thread_id, &context).await?;
        info!(
            chat_id = %chat_id,
            run_id = %run.run_id,
            status = %run.status,
            units = batch.len(),
            "Assistant run finished"
        );

        let raw_reply = match run.status {
            RunStatus::Completed => Some(self.assistant.latest_reply(&thread_id).await?),
            RunStatus::RequiresAction => Some(self.requires_action_reply.clone()),
            _ => {
                self.notifier.alert_agents(chat_id).await;
                let report = run_failure_report(&RunFailure {
                    user: chat_id,
                    display_name,
                    thread_id: Some(&thread_id),
                    run_id: Some(&run.run_id),
                    run_status: run.status.as_str(),
                    run_error: run.error.as_deref(),
                    units: &batch.units,
                });
                self.notifier.notify_support(&report).await;
                None
            }
        };

        let reply = raw_reply
            .map(|text| whatsapp_text(&text))
            .filter(|text| !text.trim().is_empty());
        if let Some(text) = &reply {
            self.outbound.send(chat_id, text).await?;
        }

        let completed = run.status == RunStatus::Completed;
        let status = if completed {
            MessageStatus::Answered
        } else {
            MessageStatus::Error
        };

        if let Some((last, earlier)) = record_ids.split_last() {
            for id in earlier {
                self.messages.set_status(id, status)?;
            }
            self.messages.set_run_meta(
                last,
                &RunMeta {
                    run_id: Some(run.run_id.clone()),
                    run_status: Some(run.status.as_str().to_string()),
                    run_error: run.error.clone(),
                    usage: run.usage.clone(),
                },
            )?;
            match (&reply, completed) {
                (Some(text), true) => self.messages.set_response(last, text, status)?,
                _ => self.messages.set_status(last, status)?,
            }
        }

        Ok(ProcessOutcome {
            run_status: run.status,
            reply,
            records: record_ids.len(),
        })
    }

    /// Tell agents and support that a batch could not be processed.
    async fn report_failure(&self, chat_id: &str, display_name: Option<&str>, error: &ChatError) {
        self.notifier.alert_agents(chat_id).await;
        let report = infra_error_report(
            "🚨 Batch processing error",
            "process",
            chat_id,
            display_name,
            error,
        );
        self.notifier.notify_support(&report).await;
    }
}

/// Flush handler bound to one sender.
struct SenderHandler {
    processor: Arc<BatchProcessor>,
    display_name: Option<String>,
}

#[async_trait]
impl FlushHandler for SenderHandler {
    async fn flush(&self, key: &str, batch: Batch) -> Result<(), FlushError> {
        let display_name = self.display_name.as_deref();
        match self.processor.process(key, display_name, &batch).await {
            Ok(outcome) => {
                debug!(
                    key = %key,
                    status = %outcome.run_status,
                    replied = outcome.reply.is_some(),
                    "Batch processed"
                );
                Ok(())
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Batch processing failed");
                self.processor.report_failure(key, display_name, &e).await;
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{EchoAssistant, RecordingOutbound, RunOutcome};
    use parley_core::types::{FragmentKind, Media};
    use parley_storage::Database;

    const CHAT: &str = "584241234567@c.us";
    const SUPPORT: &str = "573000000000@c.us";
    const AGENT: &str = "584240000000@c.us";

    struct Fixture {
        processor: Arc<BatchProcessor>,
        assistant: Arc<EchoAssistant>,
        outbound: Arc<RecordingOutbound>,
        users: Arc<UserRepository>,
        messages: Arc<MessageRepository>,
    }

    fn fixture(status: RunStatus) -> Fixture {
        let db = Arc::new(Database::in_memory().unwrap());
        let users = Arc::new(UserRepository::new(Arc::clone(&db)));
        let messages = Arc::new(MessageRepository::new(db));
        let assistant = Arc::new(EchoAssistant::with_status(status));
        let outbound = Arc::new(RecordingOutbound::new());
        let notifier = Arc::new(Notifier::new(outbound.clone(), &[SUPPORT], &[AGENT]));
        let processor = Arc::new(BatchProcessor::new(
            Arc::clone(&users),
            Arc::clone(&messages),
            assistant.clone(),
            outbound.clone(),
            notifier,
            "I need to do something I can't do yet.",
        ));
        Fixture {
            processor,
            assistant,
            outbound,
            users,
            messages,
        }
    }

    fn batch(units: Vec<Unit>) -> Batch {
        Batch {
            fragment_count: units.len(),
            first_arrival: 0,
            last_arrival: units.len().saturating_sub(1) as u64,
            units,
            sequence: 1,
        }
    }

    fn image_unit(caption: &str) -> Unit {
        Unit::Image {
            caption: caption.to_string(),
            media: Media::new(vec![7; 16], "image/jpeg", "image.jpeg"),
        }
    }

    #[tokio::test]
    async fn test_completed_run_replies_and_records() {
        let f = fixture(RunStatus::Completed);
        let outcome = f
            .processor
            .process(
                CHAT,
                Some("Ana"),
                &batch(vec![Unit::text("hola, precio?"), image_unit("menu")]),
            )
            .await
            .unwrap();

        assert_eq!(outcome.run_status, RunStatus::Completed);
        assert_eq!(outcome.records, 2);
        let reply = outcome.reply.unwrap();
        assert!(reply.starts_with("*Received* 2 message(s)"));
        assert_eq!(f.outbound.sent_to(CHAT), vec![reply.clone()]);

        let records = f.messages.list_by_phone(CHAT, 10).unwrap();
        assert_eq!(records.len(), 2);
        // Newest first: the image is the last unit of the batch.
        let last = &records[0];
        assert_eq!(last.kind, FragmentKind::Image);
        assert_eq!(last.status, MessageStatus::Answered);
        assert_eq!(last.assistant_response.as_deref(), Some(reply.as_str()));
        assert!(last.run.run_id.is_some());
        let media = last.media.as_ref().unwrap();
        assert_eq!(media.purpose.as_deref(), Some(VISION_PURPOSE));
        assert!(media.file_id.is_some());

        let first = &records[1];
        assert_eq!(first.text.as_deref(), Some("hola, precio?"));
        assert_eq!(first.status, MessageStatus::Answered);
        assert!(first.assistant_response.is_none());

        let user = f.users.find_by_phone(CHAT).unwrap().unwrap();
        assert_eq!(user.display_name.as_deref(), Some("Ana"));
        assert!(user.thread_id.is_some());
    }

    #[tokio::test]
    async fn test_thread_is_reused() {
        let f = fixture(RunStatus::Completed);
        f.processor
            .process(CHAT, None, &batch(vec![Unit::text("one")]))
            .await
            .unwrap();
        f.processor
            .process(CHAT, None, &batch(vec![Unit::text("two")]))
            .await
            .unwrap();
        assert_eq!(f.assistant.thread_count(), 1);
        assert_eq!(f.outbound.sent_to(CHAT).len(), 2);
    }

    #[tokio::test]
    async fn test_failed_run_alerts_without_reply() {
        let f = fixture(RunStatus::Expired);
        let outcome = f
            .processor
            .process(CHAT, None, &batch(vec![Unit::text("a"), Unit::text("b")]))
            .await
            .unwrap();

        assert_eq!(outcome.run_status, RunStatus::Expired);
        assert!(outcome.reply.is_none());
        assert!(f.outbound.sent_to(CHAT).is_empty());
        assert_eq!(f.outbound.sent_to(AGENT).len(), 1);
        let support = f.outbound.sent_to(SUPPORT);
        assert_eq!(support.len(), 1);
        assert!(support[0].contains("Run status: expired"));
        assert!(support[0].contains("T1=\"a\" | T2=\"b\""));

        let records = f.messages.list_by_phone(CHAT, 10).unwrap();
        assert!(records.iter().all(|r| r.status == MessageStatus::Error));
        assert_eq!(records[0].run.run_status.as_deref(), Some("expired"));
        assert!(records[0].assistant_response.is_none());
    }

    #[tokio::test]
    async fn test_requires_action_sends_fallback() {
        let f = fixture(RunStatus::RequiresAction);
        let outcome = f
            .processor
            .process(CHAT, None, &batch(vec![Unit::text("book a table")]))
            .await
            .unwrap();

        assert_eq!(
            outcome.reply.as_deref(),
            Some("I need to do something I can't do yet.")
        );
        assert_eq!(f.outbound.sent_to(CHAT).len(), 1);
        assert!(f.outbound.sent_to(SUPPORT).is_empty());

        let records = f.messages.list_by_phone(CHAT, 10).unwrap();
        assert_eq!(records[0].status, MessageStatus::Error);
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let f = fixture(RunStatus::Completed);
        let err = f
            .processor
            .process(CHAT, None, &batch(Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidMessage(_)));
    }

    struct BrokenAssistant;

    #[async_trait]
    impl Assistant for BrokenAssistant {
        async fn create_thread(&self) -> Result<String, ChatError> {
            Err(ChatError::Assistant("service unavailable".to_string()))
        }
        async fn add_text(&self, _: &str, _: &str) -> Result<(), ChatError> {
            unreachable!()
        }
        async fn upload_image(&self, _: &Media) -> Result<String, ChatError> {
            unreachable!()
        }
        async fn add_image(&self, _: &str, _: &str, _: &str) -> Result<(), ChatError> {
            unreachable!()
        }
        async fn run(&self, _: &str, _: &RunContext) -> Result<RunOutcome, ChatError> {
            unreachable!()
        }
        async fn latest_reply(&self, _: &str) -> Result<String, ChatError> {
            unreachable!()
        }
        async fn instructions(&self) -> Result<String, ChatError> {
            unreachable!()
        }
        async fn update_instructions(&self, _: &str) -> Result<(), ChatError> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn test_handler_reports_processing_error() {
        let db = Arc::new(Database::in_memory().unwrap());
        let outbound = Arc::new(RecordingOutbound::new());
        let notifier = Arc::new(Notifier::new(outbound.clone(), &[SUPPORT], &[AGENT]));
        let processor = Arc::new(BatchProcessor::new(
            Arc::new(UserRepository::new(Arc::clone(&db))),
            Arc::new(MessageRepository::new(db)),
            Arc::new(BrokenAssistant),
            outbound.clone(),
            notifier,
            "fallback",
        ));

        let handler = processor.handler_for(Some("Luis".to_string()));
        let result = handler.flush(CHAT, batch(vec![Unit::text("hola")])).await;

        assert!(matches!(result, Err(FlushError::Failed(_))));
        assert_eq!(outbound.sent_to(AGENT).len(), 1);
        let support = outbound.sent_to(SUPPORT);
        assert_eq!(support.len(), 1);
        assert!(support[0].contains("User: Luis (584241234567@c.us)"));
        assert!(support[0].contains("service unavailable"));
        assert!(outbound.sent_to(CHAT).is_empty());
    }
}
