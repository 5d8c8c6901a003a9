// src/db/row.rs
// Shared helpers for converting between SQLite rows and domain types.

use crate::domain::{
    Conversation, ConversationStatus, Message, MessageStatus, MessageType, Participant,
    ParticipantStatus, Priority, ResolutionStatus,
};
use chrono::{DateTime, Utc};
use rusqlite::Row;
use std::str::FromStr;

pub fn parse_ts(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

pub fn json_list(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}

pub fn json_list_str(v: &[String]) -> String {
    serde_json::to_string(v).unwrap_or_else(|_| "[]".to_string())
}

fn parse_enum<T: FromStr>(s: &str, col: usize) -> rusqlite::Result<T> {
    T::from_str(s).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            col,
            rusqlite::types::Type::Text,
            "unrecognized enum value".into(),
        )
    })
}

pub fn parse_participant(row: &Row) -> rusqlite::Result<Participant> {
    let capabilities: String = row.get("capabilities")?;
    let preferences: String = row.get("preferences")?;
    let last_seen: String = row.get("last_seen")?;
    let created_at: String = row.get("created_at")?;
    let status: String = row.get("status")?;
    let default_priority: String = row.get("default_priority")?;

    Ok(Participant {
        id: row.get("id")?,
        capabilities: json_list(&capabilities),
        status: parse_enum(&status, 1)?,
        last_seen: parse_ts(&last_seen)?,
        default_priority: parse_enum(&default_priority, 4)?,
        preferences: serde_json::from_str(&preferences).unwrap_or(serde_json::Value::Null),
        created_at: parse_ts(&created_at)?,
    })
}

pub fn parse_message(row: &Row) -> rusqlite::Result<Message> {
    let to_participants: String = row.get("to_participants")?;
    let r#type: String = row.get("type")?;
    let priority: String = row.get("priority")?;
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let expires_at: Option<String> = row.get("expires_at")?;
    let dependencies: String = row.get("dependencies")?;
    let tags: String = row.get("tags")?;
    let suggested_approach: Option<String> = row.get("suggested_approach")?;
    let resolution_status: Option<String> = row.get("resolution_status")?;
    let resolved_at: Option<String> = row.get("resolved_at")?;

    Ok(Message {
        id: row.get("id")?,
        thread_id: row.get("thread_id")?,
        from: row.get("from_participant")?,
        to: json_list(&to_participants),
        r#type: parse_enum(&r#type, 0)?,
        priority: parse_enum(&priority, 0)?,
        status: parse_enum(&status, 0)?,
        subject: row.get("subject")?,
        summary: row.get("summary")?,
        content_ref: row.get("content_ref")?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
        expires_at: expires_at.map(|s| parse_ts(&s)).transpose()?,
        response_required: row.get::<_, i64>("response_required")? != 0,
        dependencies: json_list(&dependencies),
        tags: json_list(&tags),
        suggested_approach: suggested_approach
            .and_then(|s| serde_json::from_str(&s).ok()),
        resolution_status: resolution_status
            .map(|s| parse_enum(&s, 0))
            .transpose()?,
        resolved_at: resolved_at.map(|s| parse_ts(&s)).transpose()?,
        resolved_by: row.get("resolved_by")?,
        content: None,
    })
}

pub fn parse_conversation(row: &Row) -> rusqlite::Result<Conversation> {
    let participants: String = row.get("participants")?;
    let tags: String = row.get("tags")?;
    let created_at: String = row.get("created_at")?;
    let last_activity: String = row.get("last_activity")?;
    let status: String = row.get("status")?;

    Ok(Conversation {
        thread_id: row.get("thread_id")?,
        participants: json_list(&participants),
        topic: row.get("topic")?,
        tags: json_list(&tags),
        created_at: parse_ts(&created_at)?,
        last_activity: parse_ts(&last_activity)?,
        status: parse_enum(&status, 0)?,
        resolution_summary: row.get("resolution_summary")?,
        message_count: row.get("message_count")?,
    })
}
