//! Persisted records of flushed units and their assistant outcome.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

use parley_core::error::ParleyError;
use parley_core::types::FragmentKind;

use crate::db::{storage_err, Database};
use crate::users::from_unix;

/// Processing status of a message record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Answered,
    Error,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Answered => "answered",
            MessageStatus::Error => "error",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = ParleyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MessageStatus::Pending),
            "answered" => Ok(MessageStatus::Answered),
            "error" => Ok(MessageStatus::Error),
            other => Err(ParleyError::Storage(format!(
                "Unknown message status: {}",
                other
            ))),
        }
    }
}

/// Media metadata stored alongside an image record. Bytes are never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MediaMeta {
    pub mime_type: String,
    pub filename: String,
    pub size_bytes: usize,
    /// Assistant-side file id, set after upload.
    pub file_id: Option<String>,
    pub purpose: Option<String>,
}

/// Outcome of an assistant run, attached to the last record of a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunMeta {
    pub run_id: Option<String>,
    pub run_status: Option<String>,
    pub run_error: Option<String>,
    pub usage: Option<serde_json::Value>,
}

/// Fields for a freshly flushed unit.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub user_id: String,
    pub phone: String,
    pub kind: FragmentKind,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub thread_id: Option<String>,
    pub media: Option<MediaMeta>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageRecord {
    pub id: String,
    pub user_id: String,
    pub phone: String,
    pub kind: FragmentKind,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub status: MessageStatus,
    pub thread_id: Option<String>,
    pub media: Option<MediaMeta>,
    pub assistant_response: Option<String>,
    pub run: RunMeta,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const MESSAGE_COLUMNS: &str = "id, user_id, phone, kind, text, caption, status, thread_id,
     media_mime_type, media_filename, media_size_bytes, media_file_id, media_purpose,
     assistant_response, run_id, run_status, run_error, run_usage, created_at, updated_at";

fn parse_kind(kind: &str) -> FragmentKind {
    match kind {
        "image" => FragmentKind::Image,
        _ => FragmentKind::Text,
    }
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
    let kind: String = row.get(3)?;
    let status: String = row.get(6)?;
    let media_mime: Option<String> = row.get(8)?;
    let usage: Option<String> = row.get(17)?;

    let media = match media_mime {
        Some(mime_type) => Some(MediaMeta {
            mime_type,
            filename: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
            size_bytes: row.get::<_, Option<i64>>(10)?.unwrap_or(0).max(0) as usize,
            file_id: row.get(11)?,
            purpose: row.get(12)?,
        }),
        None => None,
    };

    Ok(MessageRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        phone: row.get(2)?,
        kind: parse_kind(&kind),
        text: row.get(4)?,
        caption: row.get(5)?,
        status: status.parse().unwrap_or(MessageStatus::Error),
        thread_id: row.get(7)?,
        media,
        assistant_response: row.get(13)?,
        run: RunMeta {
            run_id: row.get(14)?,
            run_status: row.get(15)?,
            run_error: row.get(16)?,
            usage: usage.and_then(|u| serde_json::from_str(&u).ok()),
        },
        created_at: from_unix(row.get(18)?),
        updated_at: from_unix(row.get(19)?),
    })
}

/// Repository for per-unit message records.
pub struct MessageRepository {
    db: Arc<Database>,
}

impl MessageRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Store a new record with status `pending`. Returns its id.
    pub fn create_incoming(&self, message: &NewMessage) -> Result<String, ParleyError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        let media = message.media.as_ref();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, user_id, phone, kind, text, caption, status, thread_id,
                    media_mime_type, media_filename, media_size_bytes, media_file_id, media_purpose,
                    created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
                params![
                    id,
                    message.user_id,
                    message.phone,
                    message.kind.to_string(),
                    message.text,
                    message.caption,
                    message.thread_id,
                    media.map(|m| m.mime_type.as_str()),
                    media.map(|m| m.filename.as_str()),
                    media.map(|m| m.size_bytes as i64),
                    media.and_then(|m| m.file_id.as_deref()),
                    media.and_then(|m| m.purpose.as_deref()),
                    now,
                ],
            )
            .map_err(storage_err("Failed to create message"))?;
            Ok(())
        })?;

        Ok(id)
    }

    pub fn set_status(&self, id: &str, status: MessageStatus) -> Result<(), ParleyError> {
        self.update(
            id,
            "UPDATE messages SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), Utc::now().timestamp(), id],
        )
    }

    /// Store the assistant reply and the final status.
    pub fn set_response(
        &self,
        id: &str,
        response: &str,
        status: MessageStatus,
    ) -> Result<(), ParleyError> {
        self.update(
            id,
            "UPDATE messages SET assistant_response = ?1, status = ?2, updated_at = ?3
             WHERE id = ?4",
            params![response, status.as_str(), Utc::now().timestamp(), id],
        )
    }

    pub fn set_run_meta(&self, id: &str, run: &RunMeta) -> Result<(), ParleyError> {
        let usage = match &run.usage {
            Some(value) => Some(serde_json::to_string(value)?),
            None => None,
        };
        self.update(
            id,
            "UPDATE messages SET run_id = ?1, run_status = ?2, run_error = ?3, run_usage = ?4,
                updated_at = ?5
             WHERE id = ?6",
            params![
                run.run_id,
                run.run_status,
                run.run_error,
                usage,
                Utc::now().timestamp(),
                id
            ],
        )
    }

    /// Record the assistant-side file for an uploaded image.
    pub fn set_media_file(&self, id: &str, file_id: &str, purpose: &str) -> Result<(), ParleyError> {
        self.update(
            id,
            "UPDATE messages SET media_file_id = ?1, media_purpose = ?2, updated_at = ?3
             WHERE id = ?4",
            params![file_id, purpose, Utc::now().timestamp(), id],
        )
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<MessageRecord>, ParleyError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS),
                params![id],
                row_to_message,
            )
            .optional()
            .map_err(storage_err("Failed to load message"))
        })
    }

    /// Most recent records for a phone, newest first.
    pub fn list_by_phone(&self, phone: &str, limit: u32) -> Result<Vec<MessageRecord>, ParleyError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM messages WHERE phone = ?1
                     ORDER BY created_at DESC, rowid DESC LIMIT ?2",
                    MESSAGE_COLUMNS
                ))
                .map_err(storage_err("Failed to prepare message query"))?;

            let rows = stmt
                .query_map(params![phone, limit], row_to_message)
                .map_err(storage_err("Failed to list messages"))?;

            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(storage_err("Failed to read message row"))
        })
    }

    fn update(
        &self,
        id: &str,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<(), ParleyError> {
        self.db.with_conn(|conn| {
            let updated = conn
                .execute(sql, params)
                .map_err(storage_err("Failed to update message"))?;
            if updated == 0 {
                return Err(ParleyError::Storage(format!("Message {} not found", id)));
            }
            Ok(())
        })
    }
}
