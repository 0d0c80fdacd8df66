//! Global bot switch.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use parley_core::error::ParleyError;

use crate::db::{storage_err, Database};

/// Repository for the single-row settings table.
pub struct SettingsRepository {
    db: Arc<Database>,
}

impl SettingsRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Whether the bot answers anyone. Defaults to true until first set.
    pub fn is_bot_active(&self) -> Result<bool, ParleyError> {
        self.db.with_conn(|conn| {
            let active: Option<i64> = conn
                .query_row("SELECT bot_active FROM settings WHERE id = 1", [], |row| {
                    row.get(0)
                })
                .optional()
                .map_err(storage_err("Failed to read settings"))?;
            Ok(active.map(|v| v != 0).unwrap_or(true))
        })
    }

    /// Turn the bot on or off globally. Returns the stored value.
    pub fn set_bot_active(&self, active: bool) -> Result<bool, ParleyError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO settings (id, bot_active, updated_at) VALUES (1, ?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET
                    bot_active = excluded.bot_active,
                    updated_at = excluded.updated_at",
                params![active as i64, Utc::now().timestamp()],
            )
            .map_err(storage_err("Failed to write settings"))?;
            Ok(())
        })?;
        tracing::info!(active, "Bot active flag updated");
        Ok(active)
    }
}
