// src/compaction/mod.rs
// Compaction Engine (C5, §4.5): summarize / consolidate / archive thread
// strategies, auto-compact sweep, and token/size accounting.

use crate::datadir::DataDir;
use crate::db::messages::{self as store, NewMessage};
use crate::db::{conversations, DatabasePool};
use crate::domain::{ConversationStatus, Message, MessageStatus, MessageType, Priority};
use crate::error::{EngineError, Result};
use crate::lock;
use crate::messages::sidecar;
use crate::utils::now;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Summarize,
    Consolidate,
    Archive,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Summarize => "summarize",
            Strategy::Consolidate => "consolidate",
            Strategy::Archive => "archive",
        }
    }
}

impl std::str::FromStr for Strategy {
    type Err = EngineError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "summarize" => Ok(Strategy::Summarize),
            "consolidate" => Ok(Strategy::Consolidate),
            "archive" => Ok(Strategy::Archive),
            other => Err(EngineError::validation(format!("unknown compaction strategy '{other}'"))),
        }
    }
}

pub struct CompactionOptions {
    pub strategy: Strategy,
    pub preserve_decisions: bool,
    pub preserve_critical: bool,
}

impl Default for CompactionOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::Summarize,
            preserve_decisions: true,
            preserve_critical: true,
        }
    }
}

pub struct CompactionResult {
    pub thread_id: String,
    pub original_count: usize,
    pub compacted_count: usize,
    pub space_saved_bytes: i64,
    pub summary: Option<String>,
}

#[derive(Clone)]
pub struct Compactor {
    pool: Arc<DatabasePool>,
    data_dir: DataDir,
}

impl Compactor {
    pub fn new(pool: Arc<DatabasePool>, data_dir: DataDir) -> Self {
        Self { pool, data_dir }
    }

    fn row_size(&self, m: &Message) -> i64 {
        let db_size = m.subject.len() + m.summary.len() + m.tags.join(",").len();
        let sidecar_size = m
            .content_ref
            .as_ref()
            .and_then(|rel| std::fs::metadata(self.data_dir.root().join(rel)).ok())
            .map(|meta| meta.len())
            .unwrap_or(0);
        db_size as i64 + sidecar_size as i64
    }

    async fn acquire_lock(&self) -> Result<lock::LockGuard> {
        let lock_path = self.data_dir.lock_path();
        tokio::task::spawn_blocking(move || lock::acquire(&lock_path))
            .await
            .map_err(|e| EngineError::Other(anyhow::anyhow!(e)))?
    }

    /// §4.5 precondition: `requester` must appear as `from` or in `to` of at
    /// least one message in the thread. No admin bypass in the core contract.
    pub async fn compact_thread(
        &self,
        thread_id: &str,
        options: CompactionOptions,
        requester: &str,
    ) -> Result<CompactionResult> {
        let thread_id_owned = thread_id.to_string();
        let messages = self
            .pool
            .run(move |conn| store::thread_messages_sync(conn, &thread_id_owned))
            .await?;
        if messages.is_empty() {
            return Err(EngineError::not_found(format!("thread '{thread_id}' has no messages")));
        }
        let is_member = messages
            .iter()
            .any(|m| m.from == requester || m.to.iter().any(|t| t == requester));
        if !is_member {
            return Err(EngineError::permission(
                "requester must appear in at least one message of the thread",
            ));
        }

        let pre_size: i64 = messages.iter().map(|m| self.row_size(m)).sum();

        let _guard = self.acquire_lock().await?;
        let result = match options.strategy {
            Strategy::Summarize => self.summarize(thread_id, &messages, &options).await?,
            Strategy::Consolidate => self.consolidate(thread_id, &messages, &options).await?,
            Strategy::Archive => self.archive(thread_id, &messages).await?,
        };

        Ok(CompactionResult {
            space_saved_bytes: (pre_size - result.post_size).max(0),
            thread_id: thread_id.to_string(),
            original_count: messages.len(),
            compacted_count: result.compacted_count,
            summary: result.summary_text,
        })
    }

    async fn summarize(
        &self,
        thread_id: &str,
        messages: &[Message],
        options: &CompactionOptions,
    ) -> Result<StrategyOutcome> {
        let buckets = bucketize(messages);
        let text = compose_summary(messages, &buckets, options);

        let ts = now();
        let sidecar_path = self.data_dir.archive_dir_for(ts);
        std::fs::create_dir_all(&sidecar_path)?;
        let file_name = format!("{thread_id}-summary-{}.md", ts.timestamp_millis());
        let file_path = sidecar_path.join(&file_name);
        std::fs::write(&file_path, &text)?;
        let content_ref = file_path
            .strip_prefix(self.data_dir.root())
            .unwrap_or(&file_path)
            .to_string_lossy()
            .replace('\\', "/");

        let first = &messages[0];
        let common_tags = common_tags(messages);
        let mut tags = vec!["compacted".to_string(), "summary".to_string()];
        tags.extend(common_tags);

        let summary_id = format!("{thread_id}-SUMMARY");
        let new_message = NewMessage {
            id: summary_id,
            thread_id: thread_id.to_string(),
            from: "@system".to_string(),
            to: first.to.clone(),
            r#type: first.r#type,
            priority: first.priority,
            subject: format!("Summary: {}", first.subject),
            summary: text.clone(),
            content_ref: Some(content_ref),
            created_at: ts,
            expires_at: None,
            response_required: false,
            dependencies: vec![],
            tags,
            suggested_approach: None,
        };

        let ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();
        let inserted = self
            .pool
            .run(move |conn| {
                for id in &ids {
                    store::mark_archived_sync(conn, id, ts)?;
                }
                store::insert_sync(conn, &new_message)
            })
            .await?;

        Ok(StrategyOutcome {
            compacted_count: 1,
            post_size: self.row_size(&inserted),
            summary_text: Some(text),
        })
    }

    async fn consolidate(
        &self,
        thread_id: &str,
        messages: &[Message],
        options: &CompactionOptions,
    ) -> Result<StrategyOutcome> {
        let mut passthrough = Vec::new();
        let mut groups: HashMap<(String, String, String), Vec<&Message>> = HashMap::new();

        for m in messages {
            if options.preserve_critical && m.priority == Priority::Critical {
                passthrough.push(m);
                continue;
            }
            groups
                .entry((m.from.clone(), m.r#type.as_str().to_string(), m.priority.as_str().to_string()))
                .or_default()
                .push(m);
        }

        let mut synthetic: Vec<NewMessage> = Vec::new();
        let mut archived_ids: Vec<String> = Vec::new();

        for group in groups.into_values() {
            if group.len() == 1 {
                continue;
            }
            let first = group[0];
            let subject = if group.len() > 2 {
                format!("Consolidated: {} (+{} more)", first.subject, group.len() - 2)
            } else {
                format!("Consolidated: {}", first.subject)
            };
            let mut summary = format!("Consolidated {} messages:\n\n", group.len());
            for (i, m) in group.iter().enumerate() {
                let excerpt: String = m.summary.chars().take(200).collect();
                summary.push_str(&format!("{}. {excerpt}\n", i + 1));
            }

            let mut tags = first.tags.clone();
            tags.push("consolidated".to_string());

            synthetic.push(NewMessage {
                id: format!("{}-CONSOLIDATED", first.id),
                thread_id: thread_id.to_string(),
                from: first.from.clone(),
                to: first.to.clone(),
                r#type: first.r#type,
                priority: first.priority,
                subject,
                summary,
                content_ref: None,
                created_at: first.created_at,
                expires_at: None,
                response_required: false,
                dependencies: vec![],
                tags,
                suggested_approach: None,
            });
            archived_ids.extend(group.iter().map(|m| m.id.clone()));
        }

        let ts = now();
        let synth_for_insert = synthetic;
        let archived_for_insert = archived_ids;
        let inserted: Vec<Message> = self
            .pool
            .run(move |conn| {
                for id in &archived_for_insert {
                    store::mark_archived_sync(conn, id, ts)?;
                }
                let mut out = Vec::new();
                for m in &synth_for_insert {
                    out.push(store::insert_sync(conn, m)?);
                }
                Ok(out)
            })
            .await?;

        let post_size: i64 = inserted.iter().map(|m| self.row_size(m)).sum::<i64>()
            + passthrough.iter().copied().map(|m| self.row_size(m)).sum::<i64>();

        Ok(StrategyOutcome {
            compacted_count: inserted.len() + passthrough.len(),
            post_size,
            summary_text: None,
        })
    }

    async fn archive(&self, thread_id: &str, messages: &[Message]) -> Result<StrategyOutcome> {
        let ts = now();
        for m in messages {
            if let Some(content_ref) = &m.content_ref {
                if let Err(e) = sidecar::archive_sidecar(&self.data_dir, content_ref, ts) {
                    tracing::warn!(message_id = %m.id, error = %e, "failed to archive sidecar during compaction");
                }
            }
        }

        let ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();
        self.pool
            .run(move |conn| {
                for id in &ids {
                    store::mark_archived_sync(conn, id, ts)?;
                }
                Ok(())
            })
            .await?;

        let thread_id_owned = thread_id.to_string();
        self.pool
            .run(move |conn| {
                conversations::mark_status_sync(
                    conn,
                    &thread_id_owned,
                    ConversationStatus::Archived,
                    Some("Archived by compaction"),
                    ts,
                )
            })
            .await?;

        Ok(StrategyOutcome {
            compacted_count: messages.len(),
            post_size: 0,
            summary_text: None,
        })
    }

    /// §4.5 `auto_compact`: sweep resolved conversations older than the
    /// cutoff, acting as `@system`. Per-thread failures are logged and do
    /// not abort the sweep.
    pub async fn auto_compact(&self, older_than_days: i64, strategy: Strategy) -> Result<Vec<CompactionResult>> {
        let cutoff = now() - chrono::Duration::days(older_than_days.max(0));
        let stale = self
            .pool
            .run(move |conn| conversations::resolved_older_than_sync(conn, cutoff))
            .await?;

        let mut results = Vec::new();
        for conv in stale {
            let options = CompactionOptions {
                strategy,
                ..Default::default()
            };
            match self.compact_thread(&conv.thread_id, options, "@system").await {
                Ok(result) => results.push(result),
                Err(e) => tracing::warn!(thread_id = %conv.thread_id, error = %e, "auto-compact failed for thread"),
            }
        }
        Ok(results)
    }

    /// §4.5 `calculate_token_usage`: rough token estimate and bucketed
    /// recommendations.
    pub async fn calculate_token_usage(&self, participant: &str) -> Result<TokenUsage> {
        let participant = participant.to_string();
        let messages = self
            .pool
            .run({
                let participant = participant.clone();
                move |conn| {
                    let filter = store::MessageFilter {
                        participant: Some(participant.clone()),
                        status: vec![],
                        r#type: vec![],
                        priority: vec![],
                        since: None,
                        thread_id: None,
                        active_only: false,
                        limit: 100_000,
                    };
                    store::query_sync(conn, &filter, &participant)
                }
            })
            .await?;

        let mut total_tokens: i64 = 0;
        let mut by_status: HashMap<String, i64> = HashMap::new();
        let mut by_priority: HashMap<String, i64> = HashMap::new();

        for m in &messages {
            let sidecar_size = m
                .content_ref
                .as_ref()
                .and_then(|rel| std::fs::metadata(self.data_dir.root().join(rel)).ok())
                .map(|meta| meta.len())
                .unwrap_or(0);
            let tokens = ((m.subject.len() + m.summary.len()) as u64 + sidecar_size).div_ceil(4);
            total_tokens += tokens as i64;
            *by_status.entry(m.status.as_str().to_string()).or_insert(0) += tokens as i64;
            *by_priority.entry(m.priority.as_str().to_string()).or_insert(0) += tokens as i64;
        }

        let archived_tokens = by_status.get("archived").copied().unwrap_or(0);
        let low_priority_tokens = by_priority.get("L").copied().unwrap_or(0);

        let mut recommendations = Vec::new();
        if total_tokens > 50_000 {
            recommendations.push("total token usage is high; consider compacting older threads".to_string());
        }
        if total_tokens > 0 && archived_tokens as f64 / total_tokens as f64 > 0.3 {
            recommendations.push("archived messages make up over 30% of usage; run archive compaction".to_string());
        }
        if total_tokens > 0 && low_priority_tokens as f64 / total_tokens as f64 > 0.4 {
            recommendations.push("low-priority messages make up over 40% of usage; consider consolidation".to_string());
        }

        Ok(TokenUsage {
            total_tokens,
            by_status,
            by_priority,
            recommendations,
        })
    }
}

struct StrategyOutcome {
    compacted_count: usize,
    post_size: i64,
    summary_text: Option<String>,
}

pub struct TokenUsage {
    pub total_tokens: i64,
    pub by_status: HashMap<String, i64>,
    pub by_priority: HashMap<String, i64>,
    pub recommendations: Vec<String>,
}

#[derive(Default)]
struct Buckets<'a> {
    critical: Vec<&'a Message>,
    decisions: Vec<&'a Message>,
    resolved: Vec<&'a Message>,
    responses: Vec<&'a Message>,
    other: Vec<&'a Message>,
}

/// First matching bucket wins, in this order: critical, decisions, resolved,
/// responses, other.
fn bucketize(messages: &[Message]) -> Buckets<'_> {
    let mut buckets = Buckets::default();
    for m in messages {
        if m.priority == Priority::Critical {
            buckets.critical.push(m);
        } else if m.tags.iter().any(|t| t.contains("decision")) || m.subject.to_lowercase().contains("decision") {
            buckets.decisions.push(m);
        } else if m.status == MessageStatus::Resolved {
            buckets.resolved.push(m);
        } else if m.tags.iter().any(|t| t.starts_with("response_to:")) {
            buckets.responses.push(m);
        } else {
            buckets.other.push(m);
        }
    }
    buckets
}

fn compose_summary(messages: &[Message], buckets: &Buckets<'_>, options: &CompactionOptions) -> String {
    let mut out = format!(
        "# Thread Summary\nCompacted {} messages from {} exchanges.\n",
        messages.len(),
        messages.len()
    );

    let mut section = |title: &str, items: &[&Message], include: bool| {
        if !include || items.is_empty() {
            return;
        }
        out.push_str(&format!("\n## {title} ({})\n", items.len()));
        for m in items {
            let excerpt: String = m.summary.chars().take(150).collect();
            out.push_str(&format!("- {}: {excerpt}\n", m.subject));
        }
    };

    section("Critical Issues", &buckets.critical, true);
    section("Decisions Made", &buckets.decisions, options.preserve_decisions);
    section("Resolved Items", &buckets.resolved, true);
    section("Responses", &buckets.responses, true);
    section("Other Communications", &buckets.other, true);

    out
}

fn common_tags(messages: &[Message]) -> Vec<String> {
    let threshold = (0.25 * messages.len() as f64).ceil() as usize;
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for m in messages {
        for tag in &m.tags {
            *counts.entry(tag.as_str()).or_insert(0) += 1;
        }
    }
    let mut tags: Vec<String> = counts
        .into_iter()
        .filter(|(_, count)| *count >= threshold.max(1))
        .map(|(tag, _)| tag.to_string())
        .collect();
    tags.sort();
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_tags_requires_quarter_of_messages() {
        let mk = |tags: &[&str]| Message {
            id: "X".into(),
            thread_id: "X-thread".into(),
            from: "@a".into(),
            to: vec!["@b".into()],
            r#type: MessageType::Update,
            priority: Priority::M,
            status: MessageStatus::Pending,
            subject: "s".into(),
            summary: "s".into(),
            content_ref: None,
            created_at: now(),
            updated_at: now(),
            expires_at: None,
            response_required: false,
            dependencies: vec![],
            tags: tags.iter().map(|s| s.to_string()).collect(),
            suggested_approach: None,
            resolution_status: None,
            resolved_at: None,
            resolved_by: None,
            content: None,
        };
        let messages = vec![mk(&["shared"]), mk(&["shared"]), mk(&["shared"]), mk(&["rare"])];
        let tags = common_tags(&messages);
        assert!(tags.contains(&"shared".to_string()));
        assert!(!tags.contains(&"rare".to_string()));
    }
}
