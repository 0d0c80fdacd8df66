//! Database schema migrations.
//!
//! Applies the initial schema: users, messages, settings and the
//! schema_migrations tracking table.

use rusqlite::Connection;
use tracing::info;

use parley_core::error::ParleyError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), ParleyError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| ParleyError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| ParleyError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<(), ParleyError> {
    conn.execute_batch(
        "
        -- One row per chat participant, keyed by JID.
        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY NOT NULL,
            phone           TEXT NOT NULL UNIQUE,
            display_name    TEXT,
            thread_id       TEXT,
            bot_enabled     INTEGER NOT NULL DEFAULT 1,
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL
        );

        -- One row per flushed unit.
        CREATE TABLE IF NOT EXISTS messages (
            id                  TEXT PRIMARY KEY NOT NULL,
            user_id             TEXT NOT NULL,
            phone               TEXT NOT NULL,
            kind                TEXT NOT NULL DEFAULT 'text'
                                CHECK (kind IN ('text', 'image')),
            text                TEXT,
            caption             TEXT,
            status              TEXT NOT NULL DEFAULT 'pending'
                                CHECK (status IN ('pending', 'answered', 'error')),
            thread_id           TEXT,
            media_mime_type     TEXT,
            media_filename      TEXT,
            media_size_bytes    INTEGER,
            media_file_id       TEXT,
            media_purpose       TEXT,
            assistant_response  TEXT,
            run_id              TEXT,
            run_status          TEXT,
            run_error           TEXT,
            run_usage           TEXT,
            created_at          INTEGER NOT NULL,
            updated_at          INTEGER NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_messages_phone
            ON messages (phone, created_at DESC);

        CREATE INDEX IF NOT EXISTS idx_messages_status
            ON messages (status);

        -- Single-row global settings.
        CREATE TABLE IF NOT EXISTS settings (
            id              INTEGER PRIMARY KEY CHECK (id = 1),
            bot_active      INTEGER NOT NULL DEFAULT 1,
            updated_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        INSERT INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| ParleyError::Storage(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_message_status_is_constrained() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO users (id, phone, created_at, updated_at) VALUES ('u1', 'p', 0, 0)",
            [],
        )
        .unwrap();

        let result = conn.execute(
            "INSERT INTO messages (id, user_id, phone, status, created_at, updated_at)
             VALUES ('m1', 'u1', 'p', 'bogus', 0, 0)",
            [],
        );
        assert!(result.is_err());
    }
}
