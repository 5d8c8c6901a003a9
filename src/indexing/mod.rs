// src/indexing/mod.rs
// Indexing Engine (C5, §4.4): FTS query preparation, tag-based search,
// stats, and related-message lookup. Raw SQL lives in `crate::db::search`;
// this module owns query sanitization, mode selection, and scoring.

use crate::db::search::{self, SearchHit};
use crate::db::DatabasePool;
use crate::domain::{Message, Priority};
use crate::error::Result;
use crate::utils::now;
use chrono::{DateTime, Utc};
use std::sync::Arc;

const TECHNOLOGY_KEYWORDS: &[&str] = &[
    "api", "database", "auth", "security", "frontend", "backend", "ui", "bug", "performance",
];

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "this", "that", "from", "have", "will", "your", "what", "when",
];

#[derive(Debug, Clone)]
pub struct SearchMatch {
    pub message: Message,
    pub relevance_score: f64,
    pub match_context: String,
}

#[derive(Default)]
pub struct SearchFilters {
    pub semantic: bool,
    pub tags: Vec<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub limit: i64,
}

impl SearchFilters {
    fn clamp_limit(limit: i64) -> i64 {
        if limit <= 0 {
            10
        } else {
            limit.min(50)
        }
    }
}

/// Sanitize free-text into an FTS5 MATCH expression per §4.4: strip
/// characters outside word-chars/whitespace/`-`, collapse whitespace, then
/// build a prefix query for one word or an OR-of-phrase-and-terms for many.
/// Empty sanitized input yields `None` (no matches).
pub fn build_fts_expression(query: &str) -> Option<String> {
    let sanitized: String = query
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() || c == '-' { c } else { ' ' })
        .collect();
    let words: Vec<&str> = sanitized.split_whitespace().collect();

    match words.len() {
        0 => None,
        1 => Some(format!("\"{}\"*", words[0])),
        _ => {
            let phrase = words.join(" ");
            let ors = words.iter().map(|w| format!("\"{w}\"")).collect::<Vec<_>>().join(" OR ");
            Some(format!("(\"{phrase}\") OR ({ors})"))
        }
    }
}

/// Normalize a raw FTS `bm25` rank (negative; smaller = better) into
/// `[0, 1]`: `max(0, min(1, 1 + rank))`.
fn normalize_fts_rank(rank: f64) -> f64 {
    (1.0 + rank).clamp(0.0, 1.0)
}

/// A ~100-character window centered on the first query word found in
/// `subject`+`summary`, or empty if none is found.
fn match_context(subject: &str, summary: &str, query: &str) -> String {
    let haystack = format!("{subject} {summary}");
    let lower = haystack.to_lowercase();
    let first_word = query.split_whitespace().next().unwrap_or("").to_lowercase();
    if first_word.is_empty() {
        return String::new();
    }
    let Some(pos) = lower.find(&first_word) else {
        return String::new();
    };

    let start = pos.saturating_sub(40);
    let end = (pos + first_word.len() + 60).min(haystack.len());
    let start = floor_char_boundary(&haystack, start);
    let end = ceil_char_boundary(&haystack, end);
    haystack[start..end].trim().to_string()
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

#[derive(Clone)]
pub struct Indexer {
    pool: Arc<DatabasePool>,
}

impl Indexer {
    pub fn new(pool: Arc<DatabasePool>) -> Self {
        Self { pool }
    }

    /// §4.4 `search`: three modes chosen in order (semantic FTS, tag, then
    /// substring), scored and windowed uniformly.
    pub async fn search(&self, query: &str, filters: SearchFilters, requester: &str) -> Result<Vec<SearchMatch>> {
        let limit = SearchFilters::clamp_limit(filters.limit);
        let requester = requester.to_string();

        if filters.semantic && !query.trim().is_empty() {
            let Some(expr) = build_fts_expression(query) else {
                return Ok(Vec::new());
            };
            let query_owned = query.to_string();
            let (date_from, date_to) = (filters.date_from, filters.date_to);
            let hits: Vec<SearchHit> = self
                .pool
                .run(move |conn| search::fts_search_sync(conn, &expr, &requester, date_from, date_to, limit))
                .await?;
            return Ok(hits
                .into_iter()
                .map(|hit| {
                    let score = hit.fts_rank.map(normalize_fts_rank).unwrap_or(0.0);
                    let context = match_context(&hit.message.subject, &hit.message.summary, &query_owned);
                    SearchMatch {
                        message: hit.message,
                        relevance_score: score,
                        match_context: context,
                    }
                })
                .collect());
        }

        if !filters.tags.is_empty() {
            let tags = filters.tags.clone();
            let (date_from, date_to) = (filters.date_from, filters.date_to);
            let rows = self
                .pool
                .run(move |conn| search::tag_search_sync(conn, &tags, &requester, date_from, date_to, limit))
                .await?;
            return Ok(score_by_position(rows, ""));
        }

        if !query.trim().is_empty() {
            let query_owned = query.to_string();
            let (date_from, date_to) = (filters.date_from, filters.date_to);
            let rows = self
                .pool
                .run(move |conn| search::substring_search_sync(conn, &query_owned, &requester, date_from, date_to, limit))
                .await?;
            let query_for_context = query.to_string();
            return Ok(score_by_position(rows, &query_for_context));
        }

        Ok(Vec::new())
    }

    /// Derive supplemental tags from subject+summary and rewrite the row's
    /// tags if any were added. FTS content stays in sync via triggers; this
    /// only concerns the `tags` column.
    pub async fn index_message(&self, message_id: &str) -> Result<()> {
        let message_id = message_id.to_string();
        let pool = self.pool.clone();
        let message = pool
            .run({
                let id = message_id.clone();
                move |conn| crate::db::messages::get_by_id_sync(conn, &id)
            })
            .await?;
        let Some(message) = message else { return Ok(()) };

        let derived = derive_tags(&message);
        let mut merged = message.tags.clone();
        let mut changed = false;
        for tag in derived {
            if !merged.contains(&tag) {
                merged.push(tag);
                changed = true;
            }
        }
        if changed {
            self.pool
                .run(move |conn| crate::db::messages::update_tags_sync(conn, &message_id, &merged))
                .await?;
        }
        Ok(())
    }

    pub async fn tag_suggestions(&self, query: &str, requester: &str, limit: i64) -> Result<Vec<String>> {
        let query = query.to_string();
        let requester = requester.to_string();
        let limit = if limit <= 0 { 10 } else { limit };
        let pairs = self
            .pool
            .run(move |conn| crate::db::search::tag_suggestions_sync(conn, &query, &requester, limit))
            .await?;
        Ok(pairs.into_iter().map(|(tag, _)| tag).collect())
    }

    pub async fn stats(&self, participant: &str, days: i64) -> Result<Stats> {
        let since = now() - chrono::Duration::days(days.max(1));
        let participant_owned = participant.to_string();
        let (sent, received) = self
            .pool
            .run({
                let participant = participant_owned.clone();
                move |conn| crate::db::search::sent_received_counts_sync(conn, &participant, since)
            })
            .await?;

        let rows = self
            .pool
            .run(move |conn| crate::db::search::stats_rows_sync(conn, &participant_owned, since))
            .await?;

        Ok(compute_stats(sent, received, rows))
    }

    /// §4.4 `related`: keyword-extract from the source message, OR them
    /// together, reuse the FTS path, drop the original id.
    pub async fn related(&self, message_id: &str, requester: &str, limit: i64) -> Result<Vec<SearchMatch>> {
        let message_id_owned = message_id.to_string();
        let message = self
            .pool
            .run(move |conn| crate::db::messages::get_by_id_sync(conn, &message_id_owned))
            .await?;
        let Some(message) = message else { return Ok(Vec::new()) };

        let keywords = extract_keywords(&format!("{} {}", message.subject, message.summary));
        if keywords.is_empty() {
            return Ok(Vec::new());
        }
        let query = keywords.join(" ");
        let mut matches = self
            .search(
                &query,
                SearchFilters {
                    semantic: true,
                    limit,
                    ..Default::default()
                },
                requester,
            )
            .await?;
        matches.retain(|m| m.message.id != message_id);
        Ok(matches)
    }
}

fn score_by_position(rows: Vec<Message>, query: &str) -> Vec<SearchMatch> {
    rows.into_iter()
        .enumerate()
        .map(|(i, message)| {
            let context = match_context(&message.subject, &message.summary, query);
            SearchMatch {
                message,
                relevance_score: (1.0 - 0.1 * i as f64).max(0.0),
                match_context: context,
            }
        })
        .collect()
}

fn derive_tags(message: &Message) -> Vec<String> {
    let haystack = format!("{} {}", message.subject, message.summary).to_lowercase();
    let mut tags: Vec<String> = TECHNOLOGY_KEYWORDS
        .iter()
        .filter(|kw| haystack.contains(*kw))
        .map(|kw| kw.to_string())
        .collect();
    if message.priority == Priority::Critical {
        tags.push("urgent".to_string());
    }
    tags.push(message.r#type.as_str().to_string());
    tags
}

fn extract_keywords(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut seen = std::collections::HashSet::new();
    lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 3 && !STOP_WORDS.contains(w))
        .filter(|w| seen.insert(w.to_string()))
        .map(|w| w.to_string())
        .collect()
}

pub struct Stats {
    pub sent: i64,
    pub received: i64,
    pub by_type: std::collections::HashMap<String, i64>,
    pub by_priority: std::collections::HashMap<String, i64>,
    pub by_status: std::collections::HashMap<String, i64>,
    pub response_rate: f64,
    pub mean_response_hours: Option<f64>,
}

fn compute_stats(sent: i64, received: i64, rows: Vec<search::TypeStatus>) -> Stats {
    let mut by_type = std::collections::HashMap::new();
    let mut by_priority = std::collections::HashMap::new();
    let mut by_status = std::collections::HashMap::new();
    let mut response_required_total = 0i64;
    let mut response_required_resolved = 0i64;
    let mut response_hours = Vec::new();

    for row in &rows {
        *by_type.entry(row.r#type.clone()).or_insert(0) += 1;
        *by_priority.entry(row.priority.clone()).or_insert(0) += 1;
        *by_status.entry(row.status.clone()).or_insert(0) += 1;

        if row.response_required && row.received {
            response_required_total += 1;
            if matches!(row.status.as_str(), "responded" | "resolved") {
                response_required_resolved += 1;
            }
        }

        if let Some(resolved_at) = &row.resolved_at {
            if let (Ok(created), Ok(resolved)) = (
                DateTime::parse_from_rfc3339(&row.created_at),
                DateTime::parse_from_rfc3339(resolved_at),
            ) {
                let hours = (resolved - created).num_milliseconds() as f64 / 3_600_000.0;
                if hours >= 0.0 {
                    response_hours.push(hours);
                }
            }
        }
    }

    let response_rate = if response_required_total > 0 {
        response_required_resolved as f64 / response_required_total as f64
    } else {
        0.0
    };
    let mean_response_hours = if response_hours.is_empty() {
        None
    } else {
        Some(response_hours.iter().sum::<f64>() / response_hours.len() as f64)
    };

    Stats {
        sent,
        received,
        by_type,
        by_priority,
        by_status,
        response_rate,
        mean_response_hours,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_word_is_prefix_query() {
        assert_eq!(build_fts_expression("login").as_deref(), Some("\"login\"*"));
    }

    #[test]
    fn multi_word_builds_phrase_and_or() {
        let expr = build_fts_expression("login endpoint").unwrap();
        assert!(expr.contains("login endpoint"));
        assert!(expr.contains("\"login\" OR \"endpoint\""));
    }

    #[test]
    fn empty_query_has_no_expression() {
        assert!(build_fts_expression("!!!").is_none());
    }

    #[test]
    fn fts_rank_normalizes_into_unit_range() {
        assert_eq!(normalize_fts_rank(-1.0), 0.0);
        assert_eq!(normalize_fts_rank(0.0), 1.0);
        assert_eq!(normalize_fts_rank(-5.0), 0.0);
    }

    #[test]
    fn keyword_extraction_drops_stop_words_and_short_tokens() {
        let kws = extract_keywords("The login endpoint is down, what should we do");
        assert!(kws.contains(&"login".to_string()));
        assert!(kws.contains(&"endpoint".to_string()));
        assert!(!kws.contains(&"the".to_string()));
        assert!(!kws.iter().any(|w| w.len() <= 3));
    }
}
