// src/dispatch/requests.rs
// Request argument shapes for the tool surface (§6.1). Enum-valued fields
// are carried as strings here and parsed (with a `Validation` error on a bad
// value) inside the handler, mirroring how the wire format has no native
// enum type.

use schemars::JsonSchema;
use serde::Deserialize;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SendMessageRequest {
    #[schemars(description = "Recipient participant ids")]
    pub to: Vec<String>,
    #[schemars(description = "Message type: arch|contract|sync|update|q|emergency|broadcast")]
    pub r#type: String,
    #[schemars(description = "Priority: CRITICAL|H|M|L")]
    pub priority: String,
    #[schemars(description = "Subject line, max 200 characters")]
    pub subject: String,
    #[schemars(description = "Message body")]
    pub content: String,
    #[schemars(description = "Whether a response is expected (default true)")]
    pub response_required: Option<bool>,
    #[schemars(description = "Hours until expiry (default 168)")]
    pub expires_in_hours: Option<f64>,
    #[schemars(description = "Free-form tags; `depends:<id>` entries become dependencies")]
    pub tags: Option<Vec<String>>,
    #[schemars(description = "Opaque structured hint, passed through verbatim")]
    pub suggested_approach: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetMessagesRequest {
    pub participant: Option<String>,
    pub status: Option<Vec<String>>,
    pub r#type: Option<Vec<String>>,
    pub priority: Option<Vec<String>>,
    pub since_hours: Option<f64>,
    pub thread_id: Option<String>,
    #[schemars(description = "Default 20, max 100")]
    pub limit: Option<i64>,
    #[schemars(description = "index|summary|full, default full")]
    pub detail_level: Option<String>,
    #[schemars(description = "Exclude resolved/archived/cancelled; default true")]
    pub active_only: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RespondMessageRequest {
    pub message_id: String,
    pub content: String,
    #[schemars(description = "partial|complete|requires_followup|blocked")]
    pub resolution_status: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CloseThreadRequest {
    pub thread_id: String,
    pub resolution_status: String,
    pub final_summary: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DateRange {
    pub from: Option<chrono::DateTime<chrono::Utc>>,
    pub to: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchMessagesRequest {
    pub query: String,
    #[schemars(description = "Default true")]
    pub semantic: Option<bool>,
    pub tags: Option<Vec<String>>,
    pub date_range: Option<DateRange>,
    pub participants: Option<Vec<String>>,
    #[schemars(description = "Default 10, max 50")]
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CompactThreadRequest {
    pub thread_id: String,
    #[schemars(description = "summarize|consolidate|archive, default summarize")]
    pub strategy: Option<String>,
    pub preserve_decisions: Option<bool>,
    pub preserve_critical: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ArchiveResolvedRequest {
    pub older_than_days: Option<i64>,
    pub preserve_critical: Option<bool>,
    pub create_summary: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetStatsRequest {
    pub participant: Option<String>,
    #[schemars(description = "Default 7")]
    pub timeframe_days: Option<i64>,
    pub include_participants: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RegisterParticipantRequest {
    pub participant_id: String,
    pub capabilities: Vec<String>,
    #[schemars(description = "Default M")]
    pub default_priority: Option<String>,
}
