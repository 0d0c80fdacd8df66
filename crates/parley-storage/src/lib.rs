//! Parley Storage crate - SQLite persistence for users, message records
//! and global settings.
//!
//! Provides a WAL-mode SQLite database with versioned migrations and one
//! repository per table.

pub mod db;
pub mod messages;
pub mod migrations;
pub mod settings;
pub mod users;

pub use db::Database;
pub use messages::{MediaMeta, MessageRecord, MessageRepository, MessageStatus, NewMessage, RunMeta};
pub use settings::SettingsRepository;
pub use users::{User, UserRepository};
