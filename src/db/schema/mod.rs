// src/db/schema/mod.rs
// Database schema and migrations (§6.3).

mod fts;

pub use fts::rebuild_messages_fts;

use rusqlite::Connection;

const CURRENT_SCHEMA_VERSION: i64 = 1;

/// Run all schema setup and migrations. Idempotent: safe to call on every
/// pool open.
pub fn run_all_migrations(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(SCHEMA)?;
    fts::migrate_messages_fts(conn)?;
    record_schema_version(conn)?;
    Ok(())
}

fn record_schema_version(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO metadata (key, value) VALUES ('schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value
         WHERE CAST(excluded.value AS INTEGER) > CAST(metadata.value AS INTEGER)",
        [CURRENT_SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

/// Core table schema. Participants, messages, conversations, and metadata —
/// the four tables named by §6.3. `semantic_vector` is reserved and unused
/// (no real vector search is implemented; see spec Non-goals).
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS participants (
    id               TEXT PRIMARY KEY,
    capabilities     TEXT NOT NULL DEFAULT '[]',
    status           TEXT NOT NULL DEFAULT 'active',
    last_seen        TEXT NOT NULL,
    default_priority TEXT NOT NULL DEFAULT 'M',
    preferences      TEXT NOT NULL DEFAULT '{}',
    created_at       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_participants_status ON participants(status);

CREATE TABLE IF NOT EXISTS messages (
    id                  TEXT PRIMARY KEY,
    thread_id           TEXT NOT NULL,
    from_participant     TEXT NOT NULL REFERENCES participants(id),
    to_participants      TEXT NOT NULL,       -- JSON array of participant ids
    type                TEXT NOT NULL,
    priority            TEXT NOT NULL,
    status              TEXT NOT NULL DEFAULT 'pending',
    subject             TEXT NOT NULL,
    summary             TEXT NOT NULL,
    content_ref         TEXT,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL,
    expires_at          TEXT,
    response_required   INTEGER NOT NULL DEFAULT 0,
    dependencies        TEXT NOT NULL DEFAULT '[]',  -- JSON array of message ids
    tags                TEXT NOT NULL DEFAULT '[]',  -- JSON array of tags
    suggested_approach  TEXT,
    resolution_status   TEXT,
    resolved_at         TEXT,
    resolved_by         TEXT,
    semantic_vector     BLOB
);
CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id);
CREATE INDEX IF NOT EXISTS idx_messages_from ON messages(from_participant);
CREATE INDEX IF NOT EXISTS idx_messages_status ON messages(status);
CREATE INDEX IF NOT EXISTS idx_messages_priority ON messages(priority);
CREATE INDEX IF NOT EXISTS idx_messages_created ON messages(created_at);
CREATE INDEX IF NOT EXISTS idx_messages_expires ON messages(expires_at);

CREATE TABLE IF NOT EXISTS conversations (
    thread_id           TEXT PRIMARY KEY,
    participants        TEXT NOT NULL DEFAULT '[]', -- JSON array
    topic               TEXT,
    tags                TEXT NOT NULL DEFAULT '[]',
    created_at          TEXT NOT NULL,
    last_activity        TEXT NOT NULL,
    status              TEXT NOT NULL DEFAULT 'active',
    resolution_summary  TEXT,
    message_count       INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_conversations_status ON conversations(status);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_all_migrations(&conn).unwrap();
        run_all_migrations(&conn).unwrap();

        let version: String = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = 'schema_version'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION.to_string());
    }
}
