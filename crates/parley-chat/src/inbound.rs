//! Inbound message pipeline.
//!
//! Filters raw chat messages, routes agent messages to admin commands,
//! normalizes the rest into fragments and enqueues them under the sender's
//! chat id.

use std::fmt;
use std::sync::Arc;

use parley_core::error::ParleyError;
use parley_core::types::{Fragment, Media};
use parley_queue::WindowScheduler;
use parley_storage::{SettingsRepository, UserRepository};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::admin::AdminHandler;
use crate::alerts::{infra_error_report, Notifier};
use crate::error::ChatError;
use crate::ports::Transcriber;
use crate::processor::BatchProcessor;

const STATUS_BROADCAST: &str = "status@broadcast";
const GROUP_SUFFIX: &str = "@g.us";

/// Message type as reported by the chat transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundKind {
    Chat,
    Image,
    /// Voice notes and audio files.
    Audio,
    Sticker,
    #[serde(other)]
    Other,
}

/// Downloaded media attached to an inbound message.
#[derive(Clone, PartialEq, Eq)]
pub struct InboundMedia {
    pub data: Vec<u8>,
    /// MIME type as sent by the transport, possibly with parameters.
    pub mime_type: String,
    pub filename: Option<String>,
}

impl fmt::Debug for InboundMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundMedia")
            .field("mime_type", &self.mime_type)
            .field("filename", &self.filename)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Sender chat id, e.g. `584241234567@c.us`.
    pub from: String,
    pub kind: InboundKind,
    pub body: Option<String>,
    pub caption: Option<String>,
    /// Display name the sender set in their profile.
    pub push_name: Option<String>,
    pub is_status: bool,
    pub media: Option<InboundMedia>,
}

impl InboundMessage {
    /// A plain text message.
    pub fn chat(from: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            kind: InboundKind::Chat,
            body: Some(body.into()),
            caption: None,
            push_name: None,
            is_status: false,
            media: None,
        }
    }
}

/// Why a message was dropped without being queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    StatusBroadcast,
    Group,
    BotDisabled,
    UserMuted,
    Sticker,
    /// Nothing left after trimming.
    Empty,
    NoMedia,
    Unsupported,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IgnoreReason::StatusBroadcast => "status_broadcast",
            IgnoreReason::Group => "group",
            IgnoreReason::BotDisabled => "bot_disabled",
            IgnoreReason::UserMuted => "user_muted",
            IgnoreReason::Sticker => "sticker",
            IgnoreReason::Empty => "empty",
            IgnoreReason::NoMedia => "no_media",
            IgnoreReason::Unsupported => "unsupported",
        };
        f.write_str(s)
    }
}

/// What the pipeline did with a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InboundOutcome {
    Queued,
    Ignored { reason: IgnoreReason },
    /// Handled as an admin command; `reply` is what the agent was sent.
    Admin { reply: Option<String> },
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Filter,
    Admin,
    Normalize,
    Enqueue,
}

impl Phase {
    fn as_str(&self) -> &'static str {
        match self {
            Phase::Filter => "filter",
            Phase::Admin => "admin",
            Phase::Normalize => "normalize",
            Phase::Enqueue => "enqueue",
        }
    }
}

enum Normalized {
    Fragment(Fragment),
    Ignored(IgnoreReason),
}

/// Strip MIME parameters: `image/jpeg; q=1` → `image/jpeg`.
pub fn normalize_mime(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

pub struct InboundPipeline {
    scheduler: WindowScheduler,
    processor: Arc<BatchProcessor>,
    admin: AdminHandler,
    settings: Arc<SettingsRepository>,
    users: Arc<UserRepository>,
    transcriber: Arc<dyn Transcriber>,
    notifier: Arc<Notifier>,
}

impl InboundPipeline {
    pub fn new(
        scheduler: WindowScheduler,
        processor: Arc<BatchProcessor>,
        admin: AdminHandler,
        settings: Arc<SettingsRepository>,
        users: Arc<UserRepository>,
        transcriber: Arc<dyn Transcriber>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            scheduler,
            processor,
            admin,
            settings,
            users,
            transcriber,
            notifier,
        }
    }

    pub fn scheduler(&self) -> &WindowScheduler {
        &self.scheduler
    }

    /// Run one inbound message through the pipeline.
    ///
    /// Failures are reported to agents and support before being returned.
    pub async fn handle(&self, msg: InboundMessage) -> Result<InboundOutcome, ChatError> {
        if msg.from.trim().is_empty() {
            return Err(ChatError::InvalidMessage("missing sender".to_string()));
        }

        match self.accept(&msg).await {
            Ok(outcome) => {
                if let InboundOutcome::Ignored { reason } = &outcome {
                    debug!(from = %msg.from, reason = %reason, "Inbound message ignored");
                }
                Ok(outcome)
            }
            Err((phase, e)) => {
                error!(from = %msg.from, phase = phase.as_str(), error = %e, "Inbound pipeline failed");
                self.notifier.alert_agents(&msg.from).await;
                let report = infra_error_report(
                    "🚨 Inbound pipeline error",
                    phase.as_str(),
                    &msg.from,
                    msg.push_name.as_deref(),
                    &e,
                );
                self.notifier.notify_support(&report).await;
                Err(e)
            }
        }
    }

    async fn accept(&self, msg: &InboundMessage) -> Result<InboundOutcome, (Phase, ChatError)> {
        if msg.is_status || msg.from == STATUS_BROADCAST {
            return Ok(ignored(IgnoreReason::StatusBroadcast));
        }
        if msg.from.ends_with(GROUP_SUFFIX) {
            return Ok(ignored(IgnoreReason::Group));
        }

        if self.notifier.is_agent(&msg.from) {
            let text = msg.body.as_deref().unwrap_or_default();
            let reply = self
                .admin
                .handle(&msg.from, text)
                .await
                .map_err(|e| (Phase::Admin, e))?;
            return Ok(InboundOutcome::Admin { reply });
        }

        let filter = |e: ParleyError| (Phase::Filter, ChatError::from(e));
        if !self.settings.is_bot_active().map_err(filter)? {
            return Ok(ignored(IgnoreReason::BotDisabled));
        }
        if !self.users.is_bot_enabled(&msg.from).map_err(filter)? {
            return Ok(ignored(IgnoreReason::UserMuted));
        }

        let fragment = match self.normalize(msg).await.map_err(|e| (Phase::Normalize, e))? {
            Normalized::Fragment(fragment) => fragment,
            Normalized::Ignored(reason) => return Ok(ignored(reason)),
        };

        let handler = self.processor.handler_for(msg.push_name.clone());
        self.scheduler
            .enqueue(&msg.from, fragment, handler)
            .map_err(|e| (Phase::Enqueue, ChatError::from(e)))?;
        Ok(InboundOutcome::Queued)
    }

    async fn normalize(&self, msg: &InboundMessage) -> Result<Normalized, ChatError> {
        match msg.kind {
            InboundKind::Chat => {
                return Ok(match non_blank(msg.body.as_deref()) {
                    Some(text) => Normalized::Fragment(Fragment::text(text)),
                    None => Normalized::Ignored(IgnoreReason::Empty),
                });
            }
            InboundKind::Sticker => return Ok(Normalized::Ignored(IgnoreReason::Sticker)),
            InboundKind::Image | InboundKind::Audio | InboundKind::Other => {}
        }

        let media = match &msg.media {
            Some(media) if !media.data.is_empty() => media,
            _ if msg.kind == InboundKind::Other => {
                return Ok(Normalized::Ignored(IgnoreReason::Unsupported))
            }
            _ => return Ok(Normalized::Ignored(IgnoreReason::NoMedia)),
        };

        let mime = normalize_mime(&media.mime_type);
        if mime.starts_with("audio/") {
            let text = self.transcriber.transcribe(&media.data, &mime).await?;
            debug!(from = %msg.from, chars = text.chars().count(), "Audio transcribed");
            return Ok(match non_blank(Some(&text)) {
                Some(text) => Normalized::Fragment(Fragment::text(text)),
                None => Normalized::Ignored(IgnoreReason::Empty),
            });
        }

        if let Some(subtype) = mime.strip_prefix("image/") {
            let caption = non_blank(msg.body.as_deref())
                .or_else(|| non_blank(msg.caption.as_deref()))
                .unwrap_or_default();
            let filename = non_blank(media.filename.as_deref())
                .map(str::to_string)
                .unwrap_or_else(|| format!("image.{}", subtype));
            let media = Media::new(media.data.clone(), mime, filename);
            return Ok(Normalized::Fragment(Fragment::image(caption, media)));
        }

        Ok(Normalized::Ignored(IgnoreReason::Unsupported))
    }
}

fn ignored(reason: IgnoreReason) -> InboundOutcome {
    InboundOutcome::Ignored { reason }
}
