//! Conversation layer for Parley.
//!
//! Turns inbound chat messages into queue fragments, handles agent admin
//! commands, and processes flushed batches against the assistant before
//! replying through the outbound transport.

pub mod admin;
pub mod alerts;
pub mod date_stamp;
pub mod error;
pub mod format;
pub mod inbound;
pub mod phone;
pub mod ports;
pub mod processor;

pub use admin::{AdminCommand, AdminHandler};
pub use alerts::Notifier;
pub use date_stamp::DateStamper;
pub use error::ChatError;
pub use format::whatsapp_text;
pub use inbound::{IgnoreReason, InboundKind, InboundMedia, InboundMessage, InboundOutcome, InboundPipeline};
pub use ports::{
    Assistant, EchoAssistant, LogOutbound, Outbound, RecordingOutbound, RunContext, RunOutcome,
    RunStatus, Transcriber, UnavailableTranscriber,
};
pub use processor::{BatchProcessor, ProcessOutcome};
