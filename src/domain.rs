// src/domain.rs
// Core data model shared by the db layer and the domain-facing managers
// (§3). Enums round-trip to/from the TEXT columns they're stored in.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:expr),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!(concat!(stringify!($name), " '{}' is not recognized"), other)),
                }
            }
        }
    };
}

string_enum!(Priority {
    Critical => "CRITICAL",
    H => "H",
    M => "M",
    L => "L",
});

impl Priority {
    /// Lower rank sorts first: CRITICAL < H < M < L.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Critical => 0,
            Priority::H => 1,
            Priority::M => 2,
            Priority::L => 3,
        }
    }
}

string_enum!(MessageType {
    Arch => "arch",
    Contract => "contract",
    Sync => "sync",
    Update => "update",
    Q => "q",
    Emergency => "emergency",
    Broadcast => "broadcast",
});

string_enum!(MessageStatus {
    Pending => "pending",
    Read => "read",
    Responded => "responded",
    Resolved => "resolved",
    Archived => "archived",
    Cancelled => "cancelled",
});

impl MessageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageStatus::Resolved | MessageStatus::Archived | MessageStatus::Cancelled
        )
    }
}

string_enum!(ResolutionStatus {
    Partial => "partial",
    Complete => "complete",
    RequiresFollowup => "requires_followup",
    Blocked => "blocked",
});

string_enum!(ParticipantStatus {
    Active => "active",
    Inactive => "inactive",
    Maintenance => "maintenance",
});

string_enum!(ConversationStatus {
    Active => "active",
    Resolved => "resolved",
    Archived => "archived",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    Index,
    Summary,
    #[default]
    Full,
}

/// A participant record (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub capabilities: Vec<String>,
    pub status: ParticipantStatus,
    pub last_seen: DateTime<Utc>,
    pub default_priority: Priority,
    pub preferences: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Participant {
    pub fn is_admin(&self) -> bool {
        self.capabilities.iter().any(|c| c == "admin" || c == "system")
    }
}

/// A message (§3). `content` is populated only at `DetailLevel::Full`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub from: String,
    pub to: Vec<String>,
    pub r#type: MessageType,
    pub priority: Priority,
    pub status: MessageStatus,
    pub subject: String,
    pub summary: String,
    pub content_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub response_required: bool,
    pub dependencies: Vec<String>,
    pub tags: Vec<String>,
    pub suggested_approach: Option<serde_json::Value>,
    pub resolution_status: Option<ResolutionStatus>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// A conversation/thread rollup (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub thread_id: String,
    pub participants: Vec<String>,
    pub topic: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub status: ConversationStatus,
    pub resolution_summary: Option<String>,
    pub message_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_rank_orders_critical_first() {
        let mut ps = vec![Priority::L, Priority::M, Priority::Critical, Priority::H];
        ps.sort_by_key(|p| p.rank());
        assert_eq!(ps, vec![Priority::Critical, Priority::H, Priority::M, Priority::L]);
    }

    #[test]
    fn message_status_terminal_set() {
        assert!(MessageStatus::Resolved.is_terminal());
        assert!(MessageStatus::Archived.is_terminal());
        assert!(MessageStatus::Cancelled.is_terminal());
        assert!(!MessageStatus::Pending.is_terminal());
        assert!(!MessageStatus::Responded.is_terminal());
    }

    #[test]
    fn round_trips_through_str() {
        assert_eq!(Priority::from_str("H").unwrap(), Priority::H);
        assert_eq!(Priority::H.as_str(), "H");
        assert!(Priority::from_str("bogus").is_err());
    }
}
