//! Chat participants and their per-user bot switch.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

use parley_core::error::ParleyError;

use crate::db::{storage_err, Database};

/// A chat participant, keyed by JID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: String,
    pub phone: String,
    pub display_name: Option<String>,
    /// Assistant conversation thread, created lazily on first flush.
    pub thread_id: Option<String>,
    pub bot_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) fn from_unix(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        phone: row.get(1)?,
        display_name: row.get(2)?,
        thread_id: row.get(3)?,
        bot_enabled: row.get::<_, i64>(4)? != 0,
        created_at: from_unix(row.get(5)?),
        updated_at: from_unix(row.get(6)?),
    })
}

const USER_COLUMNS: &str =
    "id, phone, display_name, thread_id, bot_enabled, created_at, updated_at";

/// Repository for chat participants.
pub struct UserRepository {
    db: Arc<Database>,
}

impl UserRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Fetch the user for `phone`, creating it when missing.
    ///
    /// A non-empty `display_name` overwrites the stored one.
    pub fn find_or_create_by_phone(
        &self,
        phone: &str,
        display_name: Option<&str>,
    ) -> Result<User, ParleyError> {
        let display_name = display_name.map(str::trim).filter(|n| !n.is_empty());
        let now = Utc::now().timestamp();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, phone, display_name, bot_enabled, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4, ?4)
                 ON CONFLICT(phone) DO UPDATE SET
                    display_name = COALESCE(excluded.display_name, users.display_name),
                    updated_at = CASE WHEN excluded.display_name IS NULL
                                      THEN users.updated_at ELSE excluded.updated_at END",
                params![Uuid::new_v4().to_string(), phone, display_name, now],
            )
            .map_err(storage_err("Failed to upsert user"))?;

            conn.query_row(
                &format!("SELECT {} FROM users WHERE phone = ?1", USER_COLUMNS),
                params![phone],
                row_to_user,
            )
            .map_err(storage_err("Failed to load user"))
        })
    }

    pub fn find_by_phone(&self, phone: &str) -> Result<Option<User>, ParleyError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM users WHERE phone = ?1", USER_COLUMNS),
                params![phone],
                row_to_user,
            )
            .optional()
            .map_err(storage_err("Failed to load user"))
        })
    }

    /// Record the assistant thread for a user.
    pub fn set_thread(&self, user_id: &str, thread_id: &str) -> Result<(), ParleyError> {
        self.db.with_conn(|conn| {
            let updated = conn
                .execute(
                    "UPDATE users SET thread_id = ?1, updated_at = ?2 WHERE id = ?3",
                    params![thread_id, Utc::now().timestamp(), user_id],
                )
                .map_err(storage_err("Failed to set thread"))?;
            if updated == 0 {
                return Err(ParleyError::Storage(format!("User {} not found", user_id)));
            }
            Ok(())
        })
    }

    /// Whether the bot answers `phone`. Unknown users are enabled.
    pub fn is_bot_enabled(&self, phone: &str) -> Result<bool, ParleyError> {
        Ok(self
            .find_by_phone(phone)?
            .map(|user| user.bot_enabled)
            .unwrap_or(true))
    }

    /// Mute or unmute the bot for `phone`, creating the user when missing.
    pub fn set_bot_enabled(&self, phone: &str, enabled: bool) -> Result<User, ParleyError> {
        let now = Utc::now().timestamp();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, phone, bot_enabled, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(phone) DO UPDATE SET
                    bot_enabled = excluded.bot_enabled,
                    updated_at = excluded.updated_at",
                params![Uuid::new_v4().to_string(), phone, enabled as i64, now],
            )
            .map_err(storage_err("Failed to set bot flag"))?;

            conn.query_row(
                &format!("SELECT {} FROM users WHERE phone = ?1", USER_COLUMNS),
                params![phone],
                row_to_user,
            )
            .map_err(storage_err("Failed to load user"))
        })
    }
}
