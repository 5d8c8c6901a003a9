// src/dispatch/mod.rs
// Tool Dispatcher (C7, §4.6, §6.1): the MCP-facing surface. Each tool method
// resolves the calling participant, refreshes its `last_seen`, validates
// arguments, delegates to the Participant Registry / Message Manager /
// Indexing Engine / Compaction Engine, and formats a plain-text result.
//
// Grounded in the teacher's `#[tool_router]`/`#[tool]` pattern: tool methods
// take `Parameters<Req>` and return `Result<String, String>` — a human
// readable success string, or a human readable error string labeled per the
// error-handling contract in §7.

pub mod requests;

use crate::compaction::{CompactionOptions, Compactor, Strategy};
use crate::db::DatabasePool;
use crate::domain::{DetailLevel, MessageStatus, MessageType, Priority, ResolutionStatus};
use crate::error::EngineError;
use crate::indexing::{Indexer, SearchFilters};
use crate::messages::{CreateInput, GetFilter, Manager};
use crate::participants::Registry;
use requests::*;

use rmcp::{
    handler::server::{router::tool::ToolRouter, tool::ToolCallContext, wrapper::Parameters},
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam,
        ServerCapabilities, ServerInfo,
    },
    schemars,
    service::{RequestContext, RoleServer},
    tool, tool_router, ErrorData, ServerHandler,
};
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

/// Render an `EngineError` the way §7 asks for: a labeled, single-line
/// message the caller can branch on without parsing free text.
fn fail(e: EngineError) -> String {
    format!("[{}] {}", e.label(), e)
}

fn parse_priority(s: &str) -> std::result::Result<Priority, String> {
    Priority::from_str(s).map_err(|e| format!("[Validation] {e}"))
}

fn parse_type(s: &str) -> std::result::Result<MessageType, String> {
    MessageType::from_str(s).map_err(|e| format!("[Validation] {e}"))
}

fn parse_status_list(list: &[String]) -> std::result::Result<Vec<MessageStatus>, String> {
    list.iter()
        .map(|s| MessageStatus::from_str(s).map_err(|e| format!("[Validation] {e}")))
        .collect()
}

fn parse_type_list(list: &[String]) -> std::result::Result<Vec<MessageType>, String> {
    list.iter()
        .map(|s| MessageType::from_str(s).map_err(|e| format!("[Validation] {e}")))
        .collect()
}

fn parse_priority_list(list: &[String]) -> std::result::Result<Vec<Priority>, String> {
    list.iter()
        .map(|s| Priority::from_str(s).map_err(|e| format!("[Validation] {e}")))
        .collect()
}

fn parse_resolution(s: &str) -> std::result::Result<ResolutionStatus, String> {
    ResolutionStatus::from_str(s).map_err(|e| format!("[Validation] {e}"))
}

fn parse_detail_level(s: Option<&str>) -> DetailLevel {
    match s {
        Some("index") => DetailLevel::Index,
        Some("summary") => DetailLevel::Summary,
        _ => DetailLevel::Full,
    }
}

#[derive(Clone)]
pub struct CcpServer {
    pool: Arc<DatabasePool>,
    registry: Arc<Registry>,
    messages: Manager,
    indexer: Indexer,
    compactor: Compactor,
    /// The participant this process acts as, per §4.6 step 1-2 ("resolve
    /// participant, refresh last_seen").
    identity: String,
    tool_router: ToolRouter<Self>,
}

impl CcpServer {
    pub fn new(
        pool: Arc<DatabasePool>,
        registry: Arc<Registry>,
        messages: Manager,
        indexer: Indexer,
        compactor: Compactor,
        identity: String,
    ) -> Self {
        Self {
            pool,
            registry,
            messages,
            indexer,
            compactor,
            identity,
            tool_router: Self::tool_router(),
        }
    }

    async fn touch_identity(&self) -> std::result::Result<(), String> {
        self.registry
            .require(&self.identity)
            .await
            .map_err(fail)?;
        self.registry
            .update_last_seen(&self.identity)
            .await
            .map_err(fail)?;
        Ok(())
    }
}

#[tool_router]
impl CcpServer {
    #[tool(description = "Send a coordination message to one or more participants (or @all).")]
    async fn ccp_send_message(
        &self,
        Parameters(req): Parameters<SendMessageRequest>,
    ) -> Result<String, String> {
        self.touch_identity().await?;
        let r#type = parse_type(&req.r#type)?;
        let priority = parse_priority(&req.priority)?;

        let message = self
            .messages
            .create(
                CreateInput {
                    to: req.to,
                    r#type,
                    priority,
                    subject: req.subject,
                    content: req.content,
                    response_required: req.response_required.unwrap_or(true),
                    expires_in_hours: req.expires_in_hours.unwrap_or(168.0),
                    tags: req.tags.unwrap_or_default(),
                    suggested_approach: req.suggested_approach,
                },
                &self.identity,
            )
            .await
            .map_err(fail)?;

        self.indexer.index_message(&message.id).await.map_err(fail)?;

        Ok(format!(
            "sent {} to {:?} in thread {} (status: {})",
            message.id, message.to, message.thread_id, message.status
        ))
    }

    #[tool(description = "List messages visible to the caller, with optional filters.")]
    async fn ccp_get_messages(
        &self,
        Parameters(req): Parameters<GetMessagesRequest>,
    ) -> Result<String, String> {
        self.touch_identity().await?;

        if let Some(other) = &req.participant {
            if other != &self.identity {
                let requester = self.registry.require(&self.identity).await.map_err(fail)?;
                if !crate::participants::is_admin(&requester) {
                    return Err(fail(EngineError::permission(
                        "only an admin may list another participant's messages",
                    )));
                }
            }
        }

        let filter = GetFilter {
            participant: req.participant.or_else(|| Some(self.identity.clone())),
            status: req
                .status
                .as_deref()
                .map(parse_status_list)
                .transpose()?
                .unwrap_or_default(),
            r#type: req
                .r#type
                .as_deref()
                .map(parse_type_list)
                .transpose()?
                .unwrap_or_default(),
            priority: req
                .priority
                .as_deref()
                .map(parse_priority_list)
                .transpose()?
                .unwrap_or_default(),
            since_hours: req.since_hours,
            thread_id: req.thread_id,
            limit: req.limit.unwrap_or(20),
            active_only: req.active_only.unwrap_or(true),
            detail_level: parse_detail_level(req.detail_level.as_deref()),
        };

        let messages = self
            .messages
            .get(filter, &self.identity)
            .await
            .map_err(fail)?;

        if messages.is_empty() {
            return Ok("no messages match that filter".to_string());
        }
        let lines: Vec<String> = messages
            .iter()
            .map(|m| {
                format!(
                    "{} [{}|{}] {} -> {:?}: {}",
                    m.id, m.priority, m.status, m.from, m.to, m.subject
                )
            })
            .collect();
        Ok(lines.join("\n"))
    }

    #[tool(description = "Respond to a message you are addressed on.")]
    async fn ccp_respond_message(
        &self,
        Parameters(req): Parameters<RespondMessageRequest>,
    ) -> Result<String, String> {
        self.touch_identity().await?;
        let resolution_status = req
            .resolution_status
            .as_deref()
            .map(parse_resolution)
            .transpose()?;

        let response = self
            .messages
            .respond(&req.message_id, req.content, resolution_status, &self.identity)
            .await
            .map_err(fail)?;

        Ok(format!(
            "response {} sent to {:?} (original {} marked responded)",
            response.id, response.to, req.message_id
        ))
    }

    #[tool(description = "Close a thread: transition its messages to resolved/archived and optionally broadcast a final summary.")]
    async fn ccp_close_thread(
        &self,
        Parameters(req): Parameters<CloseThreadRequest>,
    ) -> Result<String, String> {
        self.touch_identity().await?;
        let resolution_status = parse_resolution(&req.resolution_status)?;

        let count = self
            .messages
            .close_thread(&req.thread_id, &self.identity, resolution_status, req.final_summary)
            .await
            .map_err(fail)?;

        Ok(format!("closed thread {}: {count} message(s) transitioned", req.thread_id))
    }

    #[tool(description = "Full-text / tag / substring search over messages visible to the caller.")]
    async fn ccp_search_messages(
        &self,
        Parameters(req): Parameters<SearchMessagesRequest>,
    ) -> Result<String, String> {
        self.touch_identity().await?;

        let filters = SearchFilters {
            semantic: req.semantic.unwrap_or(true),
            tags: req.tags.unwrap_or_default(),
            date_from: req.date_range.as_ref().and_then(|r| r.from),
            date_to: req.date_range.as_ref().and_then(|r| r.to),
            limit: req.limit.unwrap_or(10),
        };

        let matches = self
            .indexer
            .search(&req.query, filters, &self.identity)
            .await
            .map_err(fail)?;

        if matches.is_empty() {
            return Ok("no matches".to_string());
        }
        let lines: Vec<String> = matches
            .iter()
            .map(|m| {
                format!(
                    "{} (score {:.2}): {} — \"{}\"",
                    m.message.id, m.relevance_score, m.message.subject, m.match_context
                )
            })
            .collect();
        Ok(lines.join("\n"))
    }

    #[tool(description = "Compact a resolved/noisy thread: summarize, consolidate, or archive it.")]
    async fn ccp_compact_thread(
        &self,
        Parameters(req): Parameters<CompactThreadRequest>,
    ) -> Result<String, String> {
        self.touch_identity().await?;
        let strategy = req
            .strategy
            .as_deref()
            .map(Strategy::from_str)
            .transpose()
            .map_err(fail)?
            .unwrap_or(Strategy::Summarize);

        let options = CompactionOptions {
            strategy,
            preserve_decisions: req.preserve_decisions.unwrap_or(true),
            preserve_critical: req.preserve_critical.unwrap_or(true),
        };

        let result = self
            .compactor
            .compact_thread(&req.thread_id, options, &self.identity)
            .await
            .map_err(fail)?;

        Ok(format!(
            "compacted {} via {}: {} -> {} message(s), saved ~{} bytes",
            result.thread_id,
            strategy.as_str(),
            result.original_count,
            result.compacted_count,
            result.space_saved_bytes
        ))
    }

    #[tool(description = "Sweep resolved conversations older than a cutoff and compact each.")]
    async fn ccp_archive_resolved(
        &self,
        Parameters(req): Parameters<ArchiveResolvedRequest>,
    ) -> Result<String, String> {
        self.touch_identity().await?;
        let strategy = if req.create_summary.unwrap_or(true) {
            Strategy::Summarize
        } else {
            Strategy::Archive
        };

        let results = self
            .compactor
            .auto_compact(req.older_than_days.unwrap_or(30), strategy)
            .await
            .map_err(fail)?;

        let expired = self.messages.archive_expired().await.map_err(fail)?;

        Ok(format!(
            "auto-compacted {} resolved thread(s); archived {} expired message(s)",
            results.len(),
            expired
        ))
    }

    #[tool(description = "Usage statistics for a participant over a timeframe.")]
    async fn ccp_get_stats(
        &self,
        Parameters(req): Parameters<GetStatsRequest>,
    ) -> Result<String, String> {
        self.touch_identity().await?;
        let participant = req.participant.unwrap_or_else(|| self.identity.clone());
        if participant != self.identity {
            let requester = self.registry.require(&self.identity).await.map_err(fail)?;
            if !crate::participants::is_admin(&requester) {
                return Err(fail(EngineError::permission(
                    "only an admin may view another participant's stats",
                )));
            }
        }
        let stats = self
            .indexer
            .stats(&participant, req.timeframe_days.unwrap_or(7))
            .await
            .map_err(fail)?;

        let mut out = format!(
            "{participant}: sent {}, received {}, response rate {:.0}%",
            stats.sent,
            stats.received,
            stats.response_rate * 100.0
        );
        if let Some(hours) = stats.mean_response_hours {
            out.push_str(&format!(", mean response time {hours:.1}h"));
        }
        if req.include_participants.unwrap_or(false) {
            let usage = self
                .compactor
                .calculate_token_usage(&participant)
                .await
                .map_err(fail)?;
            out.push_str(&format!("\ntoken usage: {}", usage.total_tokens));
            for rec in &usage.recommendations {
                out.push_str(&format!("\n- {rec}"));
            }
        }
        Ok(out)
    }

    #[tool(description = "Register a new participant (admin only).")]
    async fn ccp_register_participant(
        &self,
        Parameters(req): Parameters<RegisterParticipantRequest>,
    ) -> Result<String, String> {
        let requester = self.registry.require(&self.identity).await.map_err(fail)?;
        if !crate::participants::is_admin(&requester) {
            return Err(fail(EngineError::permission(
                "only an admin may register participants",
            )));
        }
        let default_priority = req
            .default_priority
            .as_deref()
            .map(parse_priority)
            .transpose()?
            .unwrap_or(Priority::M);

        let participant = self
            .registry
            .register(&req.participant_id, req.capabilities, default_priority)
            .await
            .map_err(fail)?;

        Ok(format!("registered {}", participant.id))
    }

    #[tool(description = "Identify the participant this session acts as.")]
    async fn ccp_whoami(&self) -> Result<String, String> {
        let p = self.registry.require(&self.identity).await.map_err(fail)?;
        Ok(format!(
            "{} (status: {}, capabilities: {:?})",
            p.id, p.status, p.capabilities
        ))
    }

    #[tool(description = "List the available coordination tools and what they do.")]
    async fn ccp_help(&self) -> Result<String, String> {
        Ok(self
            .tool_router
            .list_all()
            .iter()
            .map(|t| format!("{}: {}", t.name, t.description.clone().unwrap_or_default()))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    #[tool(description = "Print a short setup guide for configuring a data directory and identity.")]
    async fn ccp_setup_guide(&self) -> Result<String, String> {
        Ok(concat!(
            "1. Set CCP_DATA_DIR (or accept the default .coordination) for this project.\n",
            "2. Set CCP_PARTICIPANT_ID to the identity this process acts as.\n",
            "3. Register the identity with ccp_register_participant if it's new (admin required).\n",
            "4. Run `ccp serve` to start the message bus over stdio.",
        )
        .to_string())
    }
}

impl ServerHandler for CcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "ccp".into(),
                title: Some("Coordination Protocol message bus".into()),
                version: env!("CARGO_PKG_VERSION").into(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "A local multi-participant coordination message bus. Call ccp_whoami first, \
                 then ccp_help for the full tool list."
                    .into(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = std::result::Result<ListToolsResult, ErrorData>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult {
            tools: self.tool_router.list_all(),
            next_cursor: None,
            meta: None,
        }))
    }

    #[allow(clippy::manual_async_fn)]
    fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = std::result::Result<CallToolResult, ErrorData>> + Send + '_ {
        async move {
            let ctx = ToolCallContext::new(self, request, context);
            self.tool_router.call(ctx).await
        }
    }
}
