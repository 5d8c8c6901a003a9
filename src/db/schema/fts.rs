// src/db/schema/fts.rs
// Full-text search (FTS5) over message subject + summary, kept in sync via
// triggers on the `messages` table (content sidecars are not indexed).

use rusqlite::Connection;

pub fn migrate_messages_fts(conn: &Connection) -> anyhow::Result<()> {
    let exists: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='messages_fts'",
            [],
            |_| Ok(true),
        )
        .unwrap_or(false);

    if !exists {
        tracing::info!("creating messages_fts full-text index");
        conn.execute_batch(
            "CREATE VIRTUAL TABLE messages_fts USING fts5(
                id UNINDEXED, subject, summary, tags,
                content='messages', content_rowid='rowid',
                tokenize='porter unicode61 remove_diacritics 1'
            );

            CREATE TRIGGER messages_fts_ai AFTER INSERT ON messages BEGIN
                INSERT INTO messages_fts(rowid, id, subject, summary, tags)
                VALUES (new.rowid, new.id, new.subject, new.summary, new.tags);
            END;

            CREATE TRIGGER messages_fts_ad AFTER DELETE ON messages BEGIN
                INSERT INTO messages_fts(messages_fts, rowid, id, subject, summary, tags)
                VALUES ('delete', old.rowid, old.id, old.subject, old.summary, old.tags);
            END;

            CREATE TRIGGER messages_fts_au AFTER UPDATE ON messages BEGIN
                INSERT INTO messages_fts(messages_fts, rowid, id, subject, summary, tags)
                VALUES ('delete', old.rowid, old.id, old.subject, old.summary, old.tags);
                INSERT INTO messages_fts(rowid, id, subject, summary, tags)
                VALUES (new.rowid, new.id, new.subject, new.summary, new.tags);
            END;",
        )?;
        rebuild_messages_fts(conn)?;
    }

    Ok(())
}

/// Rebuild the FTS index from the `messages` table. Used after a bulk
/// migration, or if the index is ever suspected to have drifted.
pub fn rebuild_messages_fts(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("INSERT INTO messages_fts(messages_fts) VALUES ('rebuild')", [])?;
    Ok(())
}
