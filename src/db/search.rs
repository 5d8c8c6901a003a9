// src/db/search.rs
// Storage-level search primitives backing the Indexing Engine (C5, §4.4).
// Query sanitization, mode selection, and scoring live in `crate::indexing`;
// this module only knows how to run the three kinds of SQL against the
// `messages`/`messages_fts` tables and return raw rows with their engine rank.

use super::row::parse_message;
use crate::domain::Message;
use crate::error::{EngineError, Result};
use crate::utils::format_ts;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

pub struct SearchHit {
    pub message: Message,
    /// Raw FTS `rank` (negative; smaller is more relevant), or `None` for
    /// tag/substring modes, which the caller scores positionally.
    pub fts_rank: Option<f64>,
}

const SELECT_COLUMNS: &str = "m.id, m.thread_id, m.from_participant, m.to_participants, m.type, m.priority, m.status,
    m.subject, m.summary, m.content_ref, m.created_at, m.updated_at, m.expires_at,
    m.response_required, m.dependencies, m.tags, m.suggested_approach,
    m.resolution_status, m.resolved_at, m.resolved_by";

/// Full-text search over subject+summary using an already-sanitized FTS5
/// MATCH expression.
pub fn fts_search_sync(
    conn: &Connection,
    match_expr: &str,
    participant: &str,
    date_from: Option<DateTime<Utc>>,
    date_to: Option<DateTime<Utc>>,
    limit: i64,
) -> Result<Vec<SearchHit>> {
    let sql = format!(
        "SELECT {SELECT_COLUMNS}, bm25(messages_fts) AS rank
         FROM messages_fts
         JOIN messages m ON m.rowid = messages_fts.rowid
         WHERE messages_fts MATCH ?1
           AND (m.from_participant = ?2 OR m.to_participants LIKE '%' || ?3 || '%')
           AND (?4 IS NULL OR m.created_at >= ?4)
           AND (?5 IS NULL OR m.created_at <= ?5)
         ORDER BY rank
         LIMIT ?6"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            rusqlite::params![
                match_expr,
                participant,
                format!("\"{participant}\""),
                date_from.map(format_ts),
                date_to.map(format_ts),
                limit,
            ],
            |row| {
                let rank: f64 = row.get("rank")?;
                Ok((parse_message(row)?, rank))
            },
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows
        .into_iter()
        .map(|(message, rank)| SearchHit {
            message,
            fts_rank: Some(rank),
        })
        .collect())
}

pub fn tag_search_sync(
    conn: &Connection,
    tags: &[String],
    participant: &str,
    date_from: Option<DateTime<Utc>>,
    date_to: Option<DateTime<Utc>>,
    limit: i64,
) -> Result<Vec<Message>> {
    if tags.is_empty() {
        return Ok(Vec::new());
    }
    let conditions: Vec<String> = tags
        .iter()
        .map(|_| "m.tags LIKE '%' || ? || '%'".to_string())
        .collect();
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM messages m
         WHERE ({}) AND (m.from_participant = ? OR m.to_participants LIKE '%' || ? || '%')
           AND (? IS NULL OR m.created_at >= ?) AND (? IS NULL OR m.created_at <= ?)
         ORDER BY m.created_at DESC LIMIT ?",
        conditions.join(" OR ")
    );

    let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    for tag in tags {
        args.push(Box::new(format!("\"{tag}\"")));
    }
    args.push(Box::new(participant.to_string()));
    args.push(Box::new(format!("\"{participant}\"")));
    let from_ts = date_from.map(format_ts);
    args.push(Box::new(from_ts.clone()));
    args.push(Box::new(from_ts));
    let to_ts = date_to.map(format_ts);
    args.push(Box::new(to_ts.clone()));
    args.push(Box::new(to_ts));
    args.push(Box::new(limit));

    let mut stmt = conn.prepare(&sql)?;
    let params_ref: Vec<&dyn rusqlite::ToSql> = args.iter().map(|b| b.as_ref()).collect();
    let rows = stmt
        .query_map(params_ref.as_slice(), parse_message)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn substring_search_sync(
    conn: &Connection,
    query: &str,
    participant: &str,
    date_from: Option<DateTime<Utc>>,
    date_to: Option<DateTime<Utc>>,
    limit: i64,
) -> Result<Vec<Message>> {
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM messages m
         WHERE (m.subject LIKE '%' || ?1 || '%' OR m.summary LIKE '%' || ?1 || '%')
           AND (m.from_participant = ?2 OR m.to_participants LIKE '%' || ?3 || '%')
           AND (?4 IS NULL OR m.created_at >= ?4) AND (?5 IS NULL OR m.created_at <= ?5)
         ORDER BY m.created_at DESC LIMIT ?6"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            rusqlite::params![
                query,
                participant,
                format!("\"{participant}\""),
                date_from.map(format_ts),
                date_to.map(format_ts),
                limit,
            ],
            parse_message,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Distinct tags visible to `participant`, filtered by substring match,
/// ordered by descending usage count.
pub fn tag_suggestions_sync(
    conn: &Connection,
    query: &str,
    participant: &str,
    limit: i64,
) -> Result<Vec<(String, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT tags FROM messages WHERE from_participant = ?1 OR to_participants LIKE '%' || ?2 || '%'",
    )?;
    let rows: Vec<String> = stmt
        .query_map(
            rusqlite::params![participant, format!("\"{participant}\"")],
            |row| row.get(0),
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut counts: std::collections::HashMap<String, i64> = std::collections::HashMap::new();
    for tags_json in rows {
        for tag in super::row::json_list(&tags_json) {
            if query.is_empty() || tag.to_lowercase().contains(&query.to_lowercase()) {
                *counts.entry(tag).or_insert(0) += 1;
            }
        }
    }

    let mut pairs: Vec<(String, i64)> = counts.into_iter().collect();
    pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    pairs.truncate(limit.max(0) as usize);
    Ok(pairs)
}

pub struct TypeStatus {
    pub r#type: String,
    pub priority: String,
    pub status: String,
    pub created_at: String,
    pub resolved_at: Option<String>,
    pub response_required: bool,
    pub received: bool,
}

/// Raw rows feeding `crate::indexing::stats`: everything the participant
/// sent or received within the window. `received` distinguishes which side
/// matched, since a message the participant *sent* doesn't target them.
pub fn stats_rows_sync(
    conn: &Connection,
    participant: &str,
    since: DateTime<Utc>,
) -> Result<Vec<TypeStatus>> {
    let mut stmt = conn.prepare(
        "SELECT type, priority, status, created_at, resolved_at, response_required,
                to_participants LIKE '%' || ?2 || '%' AS received
         FROM messages
         WHERE (from_participant = ?1 OR to_participants LIKE '%' || ?2 || '%')
           AND created_at >= ?3",
    )?;
    let rows = stmt
        .query_map(
            rusqlite::params![participant, format!("\"{participant}\""), format_ts(since)],
            |row| {
                Ok(TypeStatus {
                    r#type: row.get(0)?,
                    priority: row.get(1)?,
                    status: row.get(2)?,
                    created_at: row.get(3)?,
                    resolved_at: row.get(4)?,
                    response_required: row.get::<_, i64>(5)? != 0,
                    received: row.get::<_, i64>(6)? != 0,
                })
            },
        )?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(EngineError::from)?;
    Ok(rows)
}

pub fn sent_received_counts_sync(conn: &Connection, participant: &str, since: DateTime<Utc>) -> Result<(i64, i64)> {
    let sent: i64 = conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE from_participant = ?1 AND created_at >= ?2",
        rusqlite::params![participant, format_ts(since)],
        |row| row.get(0),
    )?;
    let received: i64 = conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE to_participants LIKE '%' || ?1 || '%' AND created_at >= ?2",
        rusqlite::params![format!("\"{participant}\""), format_ts(since)],
        |row| row.get(0),
    )?;
    Ok((sent, received))
}
