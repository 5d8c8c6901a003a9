// src/messages/mod.rs
// Message Manager (C4, §4.3): message lifecycle, threads, sidecar content,
// expiry archival, thread close. This is the main async facade; storage
// primitives live in `crate::db::messages`/`crate::db::conversations`, and
// the inline/sidecar split and cycle check live in sibling modules.

pub mod sidecar;
pub mod validation;

use crate::datadir::DataDir;
use crate::db::messages::{self as store, MessageFilter, NewMessage};
use crate::db::{conversations, DatabasePool};
use crate::domain::{ConversationStatus, DetailLevel, Message, MessageStatus, MessageType, Priority, ResolutionStatus};
use crate::error::{EngineError, Result};
use crate::lock::{self, LockGuard};
use crate::participants::{self, Registry};
use crate::utils::{format_ts, generate_message_id, now, thread_id_for};
use std::sync::Arc;

pub struct CreateInput {
    pub to: Vec<String>,
    pub r#type: MessageType,
    pub priority: Priority,
    pub subject: String,
    pub content: String,
    pub response_required: bool,
    pub expires_in_hours: f64,
    pub tags: Vec<String>,
    pub suggested_approach: Option<serde_json::Value>,
}

impl Default for CreateInput {
    fn default() -> Self {
        Self {
            to: Vec::new(),
            r#type: MessageType::Update,
            priority: Priority::M,
            subject: String::new(),
            content: String::new(),
            response_required: true,
            expires_in_hours: 168.0,
            tags: Vec::new(),
            suggested_approach: None,
        }
    }
}

#[derive(Default)]
pub struct GetFilter {
    pub participant: Option<String>,
    pub status: Vec<MessageStatus>,
    pub r#type: Vec<MessageType>,
    pub priority: Vec<Priority>,
    pub since_hours: Option<f64>,
    pub thread_id: Option<String>,
    pub limit: i64,
    pub active_only: bool,
    pub detail_level: DetailLevel,
}

impl GetFilter {
    fn clamp_limit(limit: i64) -> i64 {
        if limit <= 0 {
            20
        } else {
            limit.min(100)
        }
    }
}

#[derive(Clone)]
pub struct Manager {
    pool: Arc<DatabasePool>,
    data_dir: DataDir,
    registry: Arc<Registry>,
}

impl Manager {
    pub fn new(pool: Arc<DatabasePool>, data_dir: DataDir, registry: Arc<Registry>) -> Self {
        Self { pool, data_dir, registry }
    }

    async fn acquire_lock(&self) -> Result<LockGuard> {
        let lock_path = self.data_dir.lock_path();
        tokio::task::spawn_blocking(move || lock::acquire(&lock_path))
            .await
            .map_err(|e| EngineError::Other(anyhow::anyhow!(e)))?
    }

    pub async fn create(&self, input: CreateInput, from: &str) -> Result<Message> {
        validation::validate_subject(&input.subject)?;
        validation::validate_to(&input.to)?;

        let (from_p, recipients) = self.registry.send_eligibility(from, &input.to).await?;
        if !participants::can_send(&from_p, &recipients) {
            return Err(EngineError::permission(format!(
                "'{from}' may not send to all of {:?}",
                input.to
            )));
        }
        for (id, status) in &recipients {
            if id != participants::BROADCAST_PSEUDO_ID && status.is_none() {
                return Err(EngineError::not_found(format!("recipient '{id}' is not registered")));
            }
        }

        let (dependencies, tags) = validation::extract_dependencies(&input.tags);

        let ts = now();
        let id = generate_message_id(input.r#type.as_str(), ts);
        let thread_id = thread_id_for(&id);
        let summary = sidecar::compute_summary(&input.content);
        let expires_at = if input.expires_in_hours > 0.0 {
            Some(ts + chrono::Duration::milliseconds((input.expires_in_hours * 3_600_000.0) as i64))
        } else {
            None
        };

        let _guard = self.acquire_lock().await?;

        let content_ref = sidecar::write_if_oversized(&self.data_dir, &thread_id, &id, &input.content)?;

        let new_message = NewMessage {
            id: id.clone(),
            thread_id,
            from: from.to_string(),
            to: input.to,
            r#type: input.r#type,
            priority: input.priority,
            subject: input.subject,
            summary,
            content_ref,
            created_at: ts,
            expires_at,
            response_required: input.response_required,
            dependencies: dependencies.clone(),
            tags,
            suggested_approach: input.suggested_approach,
        };

        let inserted = self
            .pool
            .run(move |conn| {
                if !dependencies.is_empty() {
                    let edges = store::dependency_edges_sync(conn)?;
                    validation::check_acyclic(&id, &dependencies, &edges)?;
                }
                store::insert_sync(conn, &new_message)
            })
            .await?;

        Ok(inserted)
    }

    pub async fn get(&self, filter: GetFilter, requester: &str) -> Result<Vec<Message>> {
        let since = filter
            .since_hours
            .map(|h| now() - chrono::Duration::milliseconds((h * 3_600_000.0) as i64));
        let store_filter = MessageFilter {
            participant: filter.participant.clone(),
            status: filter.status.clone(),
            r#type: filter.r#type.clone(),
            priority: filter.priority.clone(),
            since,
            thread_id: filter.thread_id.clone(),
            active_only: filter.active_only,
            limit: GetFilter::clamp_limit(filter.limit),
        };
        let requester = requester.to_string();
        let mut rows = self
            .pool
            .run({
                let requester = requester.clone();
                move |conn| store::query_sync(conn, &store_filter, &requester)
            })
            .await?;

        if filter.detail_level == DetailLevel::Full {
            for m in &mut rows {
                m.content = Some(sidecar::read_full_content(&self.data_dir, m.content_ref.as_deref(), &m.summary));
            }
        }
        Ok(rows)
    }

    pub async fn get_by_id(&self, id: &str, requester: &str, detail_level: DetailLevel) -> Result<Option<Message>> {
        let id_owned = id.to_string();
        let mut message = self
            .pool
            .run(move |conn| store::get_by_id_sync(conn, &id_owned))
            .await?;

        if let Some(m) = &message {
            let requester_p = self.registry.require(requester).await?;
            if !participants::can_access_message(&requester_p, &m.from, &m.to) {
                return Err(EngineError::permission("not authorized to view this message"));
            }
        }

        if let Some(m) = &mut message {
            if detail_level == DetailLevel::Full {
                m.content = Some(sidecar::read_full_content(&self.data_dir, m.content_ref.as_deref(), &m.summary));
            }
        }
        Ok(message)
    }

    pub async fn respond(
        &self,
        message_id: &str,
        content: String,
        resolution_status: Option<ResolutionStatus>,
        responder: &str,
    ) -> Result<Message> {
        let original = self
            .get_by_id(message_id, responder, DetailLevel::Index)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("message '{message_id}' not found")))?;

        if !original.to.iter().any(|t| t == responder) {
            return Err(EngineError::permission("only an addressed recipient may respond"));
        }

        let ts = now();
        let _guard = self.acquire_lock().await?;

        let message_id_owned = message_id.to_string();
        let responder_owned = responder.to_string();
        self.pool
            .run(move |conn| {
                store::mark_responded_sync(conn, &message_id_owned, resolution_status, &responder_owned, ts)
            })
            .await?;

        let response = self
            .create(
                CreateInput {
                    to: vec![original.from.clone()],
                    r#type: original.r#type,
                    priority: original.priority,
                    subject: format!("Re: {}", original.subject),
                    content,
                    response_required: false,
                    expires_in_hours: 168.0,
                    tags: vec![format!("response_to:{message_id}")],
                    suggested_approach: None,
                },
                responder,
            )
            .await?;

        Ok(response)
    }

    pub async fn resolve(
        &self,
        message_id: &str,
        resolver: &str,
        resolution_status: ResolutionStatus,
    ) -> Result<Message> {
        let original = self
            .get_by_id(message_id, resolver, DetailLevel::Index)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("message '{message_id}' not found")))?;

        if original.from != resolver && !original.to.iter().any(|t| t == resolver) {
            return Err(EngineError::permission("only sender or recipient may resolve"));
        }

        // A terminal message is not further mutated by resolve; re-asserting
        // resolution on an already-resolved (or archived/cancelled) message
        // just returns the existing state unchanged.
        if original.status.is_terminal() {
            return Ok(original);
        }

        let ts = now();
        let _guard = self.acquire_lock().await?;
        let message_id_owned = message_id.to_string();
        let resolver_owned = resolver.to_string();
        self.pool
            .run(move |conn| store::mark_resolved_sync(conn, &message_id_owned, resolution_status, &resolver_owned, ts))
            .await?;

        self.get_by_id(message_id, resolver, DetailLevel::Index)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("message '{message_id}' not found")))
    }

    pub async fn close_thread(
        &self,
        thread_id_or_message_id: &str,
        closer: &str,
        resolution_status: ResolutionStatus,
        final_summary: Option<String>,
    ) -> Result<usize> {
        let thread_id_for_lookup = thread_id_or_message_id.to_string();
        let thread_id = self
            .pool
            .run(move |conn| store::resolve_thread_id_sync(conn, &thread_id_for_lookup))
            .await?;

        let thread_id_for_members = thread_id.clone();
        let members = self
            .pool
            .run(move |conn| store::thread_member_ids_sync(conn, &thread_id_for_members))
            .await?;
        let is_member = members.iter().any(|(from, to_json)| {
            from == closer || crate::db::row::json_list(to_json).iter().any(|t| t == closer)
        });
        if !is_member {
            return Err(EngineError::permission(
                "closer must appear in at least one message of the thread",
            ));
        }

        let ts = now();
        let _guard = self.acquire_lock().await?;

        let thread_id_for_close = thread_id.clone();
        let closer_owned = closer.to_string();
        let transitioned = self
            .pool
            .run(move |conn| {
                store::close_thread_messages_sync(conn, &thread_id_for_close, resolution_status, &closer_owned, ts)
            })
            .await?;

        let thread_id_for_status = thread_id.clone();
        self.pool
            .run(move |conn| {
                conversations::mark_status_sync(
                    conn,
                    &thread_id_for_status,
                    ConversationStatus::Resolved,
                    None,
                    ts,
                )
            })
            .await?;

        if let Some(summary) = final_summary {
            self.create(
                CreateInput {
                    to: vec![participants::BROADCAST_PSEUDO_ID.to_string()],
                    r#type: MessageType::Update,
                    priority: Priority::L,
                    subject: format!("Thread Closed: {thread_id}"),
                    content: summary,
                    response_required: false,
                    expires_in_hours: 168.0,
                    tags: vec!["thread-closed".to_string(), format!("resolution-{}", resolution_status.as_str())],
                    suggested_approach: None,
                },
                closer,
            )
            .await?;
        }

        Ok(transitioned.len())
    }

    /// §4.3 `archive_expired`: per-file sidecar-move failures are logged and
    /// do not abort the batch.
    pub async fn archive_expired(&self) -> Result<usize> {
        let ts = now();
        let expired = self.pool.run(move |conn| store::expired_sync(conn, ts)).await?;
        if expired.is_empty() {
            return Ok(0);
        }

        let _guard = self.acquire_lock().await?;
        let mut archived = 0usize;
        for m in &expired {
            if let Some(content_ref) = &m.content_ref {
                match sidecar::archive_sidecar(&self.data_dir, content_ref, ts) {
                    Ok(_) => {}
                    Err(e) => tracing::warn!(message_id = %m.id, error = %e, "failed to archive sidecar"),
                }
            }
            let id = m.id.clone();
            self.pool.run(move |conn| store::mark_archived_sync(conn, &id, ts)).await?;
            archived += 1;
        }
        Ok(archived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabasePool;

    async fn setup() -> (Manager, Arc<Registry>) {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        let registry = Arc::new(Registry::new(pool.clone()));
        registry.register("@backend", vec![], Priority::M).await.unwrap();
        registry.register("@mobile", vec![], Priority::M).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        // Leak the tempdir for the duration of the test process; acceptable
        // in a `#[cfg(test)]` module that exercises a handful of cases.
        let data_dir = DataDir::new(dir.keep());
        (Manager::new(pool, data_dir, registry.clone()), registry)
    }

    #[tokio::test]
    async fn create_then_fetch_matches_scenario_1() {
        let (mgr, _registry) = setup().await;
        let created = mgr
            .create(
                CreateInput {
                    to: vec!["@mobile".to_string()],
                    r#type: MessageType::Contract,
                    priority: Priority::H,
                    subject: "API change".to_string(),
                    content: "Please update the login endpoint".to_string(),
                    ..Default::default()
                },
                "@backend",
            )
            .await
            .unwrap();

        assert_eq!(created.thread_id, format!("{}-thread", created.id));
        assert_eq!(created.status, MessageStatus::Pending);
        assert!(created.content_ref.is_none());
        assert_eq!(created.summary, "Please update the login endpoint");

        let for_mobile = mgr.get(GetFilter::default(), "@mobile").await.unwrap();
        assert_eq!(for_mobile.len(), 1);
    }

    #[tokio::test]
    async fn large_content_round_trips_through_sidecar() {
        let (mgr, _registry) = setup().await;
        let content = "x".repeat(2000);
        let created = mgr
            .create(
                CreateInput {
                    to: vec!["@mobile".to_string()],
                    subject: "Large".to_string(),
                    content: content.clone(),
                    ..Default::default()
                },
                "@backend",
            )
            .await
            .unwrap();

        assert!(created.content_ref.is_some());
        assert_eq!(created.summary, format!("{}...", "x".repeat(500)));

        let full = mgr
            .get_by_id(&created.id, "@mobile", DetailLevel::Full)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(full.content.as_deref(), Some(content.as_str()));
    }

    #[tokio::test]
    async fn respond_transitions_original_to_responded() {
        let (mgr, _registry) = setup().await;
        let created = mgr
            .create(
                CreateInput {
                    to: vec!["@mobile".to_string()],
                    r#type: MessageType::Q,
                    priority: Priority::H,
                    subject: "question".to_string(),
                    content: "ping".to_string(),
                    ..Default::default()
                },
                "@backend",
            )
            .await
            .unwrap();

        let response = mgr
            .respond(&created.id, "pong".to_string(), None, "@mobile")
            .await
            .unwrap();
        assert_eq!(response.to, vec!["@backend".to_string()]);

        let original = mgr
            .get_by_id(&created.id, "@mobile", DetailLevel::Index)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(original.status, MessageStatus::Responded);
    }
}
