// src/db/participants.rs
// Participant registry storage (C3, §4.2).

use super::row::{json_list_str, parse_participant};
use crate::domain::{Participant, ParticipantStatus, Priority};
use crate::error::{EngineError, Result};
use crate::utils::{format_ts, now};
use rusqlite::{params, Connection, OptionalExtension};

pub fn register_sync(
    conn: &Connection,
    id: &str,
    capabilities: &[String],
    default_priority: Priority,
) -> Result<Participant> {
    let exists: bool = conn
        .query_row("SELECT 1 FROM participants WHERE id = ?1", [id], |_| Ok(true))
        .optional()?
        .unwrap_or(false);
    if exists {
        return Err(EngineError::AlreadyExists(format!(
            "participant '{id}' already exists"
        )));
    }

    let ts = now();
    conn.execute(
        "INSERT INTO participants (id, capabilities, status, last_seen, default_priority, preferences, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, '{}', ?6)",
        params![
            id,
            json_list_str(capabilities),
            ParticipantStatus::Active.as_str(),
            format_ts(ts),
            default_priority.as_str(),
            format_ts(ts),
        ],
    )?;

    get_sync(conn, id)?.ok_or_else(|| EngineError::Other(anyhow::anyhow!("just-inserted participant vanished")))
}

pub fn get_sync(conn: &Connection, id: &str) -> Result<Option<Participant>> {
    conn.query_row(
        "SELECT id, capabilities, status, last_seen, default_priority, preferences, created_at
         FROM participants WHERE id = ?1",
        [id],
        parse_participant,
    )
    .optional()
    .map_err(EngineError::from)
}

pub fn exists_sync(conn: &Connection, id: &str) -> Result<bool> {
    Ok(get_sync(conn, id)?.is_some())
}

pub fn list_sync(conn: &Connection, status: Option<ParticipantStatus>) -> Result<Vec<Participant>> {
    let sql = "SELECT id, capabilities, status, last_seen, default_priority, preferences, created_at
               FROM participants WHERE (?1 IS NULL OR status = ?1) ORDER BY id";
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params![status.map(|s| s.as_str())], parse_participant)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn update_last_seen_sync(conn: &Connection, id: &str) -> Result<()> {
    let updated = conn.execute(
        "UPDATE participants SET last_seen = ?1 WHERE id = ?2",
        params![format_ts(now()), id],
    )?;
    if updated == 0 {
        return Err(EngineError::not_found(format!("participant '{id}' not found")));
    }
    Ok(())
}

/// Apply a partial update (only `Some` fields are touched). Validation of the
/// merged record is the caller's responsibility.
pub struct ParticipantUpdate {
    pub capabilities: Option<Vec<String>>,
    pub status: Option<ParticipantStatus>,
    pub default_priority: Option<Priority>,
    pub preferences: Option<serde_json::Value>,
}

pub fn update_sync(conn: &Connection, id: &str, update: &ParticipantUpdate) -> Result<Participant> {
    let current = get_sync(conn, id)?
        .ok_or_else(|| EngineError::not_found(format!("participant '{id}' not found")))?;

    let capabilities = update
        .capabilities
        .clone()
        .unwrap_or(current.capabilities);
    let status = update.status.unwrap_or(current.status);
    let default_priority = update.default_priority.unwrap_or(current.default_priority);
    let preferences = update
        .preferences
        .clone()
        .unwrap_or(current.preferences);

    conn.execute(
        "UPDATE participants SET capabilities = ?1, status = ?2, default_priority = ?3, preferences = ?4
         WHERE id = ?5",
        params![
            json_list_str(&capabilities),
            status.as_str(),
            default_priority.as_str(),
            serde_json::to_string(&preferences).unwrap_or_else(|_| "{}".to_string()),
            id,
        ],
    )?;

    get_sync(conn, id)?.ok_or_else(|| EngineError::not_found(format!("participant '{id}' not found")))
}

pub fn deactivate_sync(conn: &Connection, id: &str) -> Result<Participant> {
    update_sync(
        conn,
        id,
        &ParticipantUpdate {
            capabilities: None,
            status: Some(ParticipantStatus::Inactive),
            default_priority: None,
            preferences: None,
        },
    )
}

/// Count messages where `id` is `from` or appears in `to` with an active status.
pub fn active_message_count_sync(conn: &Connection, id: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM messages
         WHERE status IN ('pending', 'read', 'responded')
           AND (from_participant = ?1 OR to_participants LIKE '%' || ?2 || '%')",
        params![id, format!("\"{id}\"")],
        |row| row.get(0),
    )
    .map_err(EngineError::from)
}

pub fn remove_sync(conn: &Connection, id: &str) -> Result<()> {
    let active = active_message_count_sync(conn, id)?;
    if active > 0 {
        return Err(EngineError::Conflict(format!(
            "participant '{id}' has {active} active message(s)"
        )));
    }
    let deleted = conn.execute("DELETE FROM participants WHERE id = ?1", [id])?;
    if deleted == 0 {
        return Err(EngineError::not_found(format!("participant '{id}' not found")));
    }
    Ok(())
}

pub fn cleanup_stale_sync(conn: &Connection, days_inactive: i64) -> Result<u64> {
    let cutoff = format_ts(now() - chrono::Duration::days(days_inactive));
    let deleted = conn.execute(
        "DELETE FROM participants WHERE status = 'inactive' AND last_seen < ?1",
        [cutoff],
    )?;
    Ok(deleted as u64)
}

#[cfg(test)]
mod participants_tests {
    use super::*;
    use crate::db::schema::run_all_migrations;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_all_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn register_then_get_round_trips() {
        let conn = setup();
        let p = register_sync(&conn, "@backend", &["dev".into()], Priority::M).unwrap();
        assert_eq!(p.status, ParticipantStatus::Active);
        assert_eq!(p.default_priority, Priority::M);

        let fetched = get_sync(&conn, "@backend").unwrap().unwrap();
        assert_eq!(fetched.id, "@backend");
    }

    #[test]
    fn register_twice_fails_already_exists() {
        let conn = setup();
        register_sync(&conn, "@backend", &[], Priority::M).unwrap();
        let err = register_sync(&conn, "@backend", &[], Priority::M).unwrap_err();
        assert!(matches!(err, EngineError::AlreadyExists(_)));
    }

    #[test]
    fn deactivate_then_cleanup_stale_removes_it() {
        let conn = setup();
        register_sync(&conn, "@mobile", &[], Priority::M).unwrap();
        deactivate_sync(&conn, "@mobile").unwrap();
        conn.execute(
            "UPDATE participants SET last_seen = ?1 WHERE id = '@mobile'",
            [format_ts(now() - chrono::Duration::days(100))],
        )
        .unwrap();

        let removed = cleanup_stale_sync(&conn, 90).unwrap();
        assert_eq!(removed, 1);
        assert!(get_sync(&conn, "@mobile").unwrap().is_none());
    }

    #[test]
    fn remove_with_active_messages_is_conflict() {
        let conn = setup();
        register_sync(&conn, "@backend", &[], Priority::M).unwrap();
        register_sync(&conn, "@mobile", &[], Priority::M).unwrap();
        crate::db::messages::test_insert_minimal(&conn, "@backend", &["@mobile".to_string()]);

        let err = remove_sync(&conn, "@backend").unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }
}
