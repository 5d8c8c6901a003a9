// src/participants/mod.rs
// Participant Registry (C3, §4.2): authorization predicates plus the async
// facade over `db::participants`. This is the boundary other components call
// through — nothing outside this module talks to the `participants` table
// directly.

use crate::db::participants::{self, ParticipantUpdate};
use crate::db::DatabasePool;
use crate::domain::{Participant, ParticipantStatus, Priority};
use crate::error::{EngineError, Result};
use regex::Regex;
use std::sync::{Arc, LazyLock};

static ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@[A-Za-z][A-Za-z0-9_-]{0,30}$").unwrap());

const RESERVED_IDS: &[&str] = &["@system", "@admin", "@root", "@null", "@undefined"];

/// `@all` is a broadcast pseudo-recipient used by `close_thread`'s final
/// summary (§9 Open Questions); it never satisfies `ID_PATTERN` and is never
/// registered as a participant. It is special-cased in `can_send` below
/// rather than inserted into the registry.
pub const BROADCAST_PSEUDO_ID: &str = "@all";

pub fn validate_participant_id(id: &str) -> Result<()> {
    if id == BROADCAST_PSEUDO_ID {
        return Ok(());
    }
    if !ID_PATTERN.is_match(id) {
        return Err(EngineError::validation(format!(
            "'{id}' is not a valid participant id"
        )));
    }
    if RESERVED_IDS.contains(&id) {
        return Err(EngineError::validation(format!(
            "'{id}' is reserved and cannot be registered"
        )));
    }
    Ok(())
}

/// §4.2 authorization predicates. These are intentionally simple — any
/// conformant implementation may substitute a richer policy behind this
/// interface (see SPEC_FULL.md's note on the reserved security subsystem).
pub fn is_admin(p: &Participant) -> bool {
    p.is_admin()
}

pub fn can_access_message(p: &Participant, from: &str, to: &[String]) -> bool {
    is_admin(p) || p.id == from || to.iter().any(|t| t == &p.id)
}

/// `from` must be active; every element of `to` must be registered and not
/// `inactive`. `@all` always satisfies the `to`-side check (it is a
/// broadcast, not a mailbox that can go stale).
pub fn can_send(from: &Participant, to: &[(String, Option<ParticipantStatus>)]) -> bool {
    if from.status != ParticipantStatus::Active {
        return false;
    }
    to.iter().all(|(id, status)| {
        id == BROADCAST_PSEUDO_ID || matches!(status, Some(s) if *s != ParticipantStatus::Inactive)
    })
}

#[derive(Clone)]
pub struct Registry {
    pool: Arc<DatabasePool>,
}

impl Registry {
    pub fn new(pool: Arc<DatabasePool>) -> Self {
        Self { pool }
    }

    pub async fn register(
        &self,
        id: &str,
        capabilities: Vec<String>,
        default_priority: Priority,
    ) -> Result<Participant> {
        validate_participant_id(id)?;
        let id = id.to_string();
        self.pool
            .run(move |conn| participants::register_sync(conn, &id, &capabilities, default_priority))
            .await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Participant>> {
        let id = id.to_string();
        self.pool.run(move |conn| participants::get_sync(conn, &id)).await
    }

    pub async fn require(&self, id: &str) -> Result<Participant> {
        self.get(id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("participant '{id}' not found")))
    }

    pub async fn list(&self, status: Option<ParticipantStatus>) -> Result<Vec<Participant>> {
        self.pool.run(move |conn| participants::list_sync(conn, status)).await
    }

    pub async fn update_last_seen(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.pool
            .run(move |conn| participants::update_last_seen_sync(conn, &id))
            .await
    }

    /// `requester == id` OR `requester` is admin.
    pub async fn update(
        &self,
        id: &str,
        update: ParticipantUpdate,
        requester: &Participant,
    ) -> Result<Participant> {
        if requester.id != id && !is_admin(requester) {
            return Err(EngineError::permission(
                "only the participant or an admin may update this record",
            ));
        }
        let id = id.to_string();
        self.pool.run(move |conn| participants::update_sync(conn, &id, &update)).await
    }

    pub async fn deactivate(&self, id: &str, requester: &Participant) -> Result<Participant> {
        if requester.id != id && !is_admin(requester) {
            return Err(EngineError::permission(
                "only the participant or an admin may deactivate this record",
            ));
        }
        let id = id.to_string();
        self.pool.run(move |conn| participants::deactivate_sync(conn, &id)).await
    }

    pub async fn remove(&self, id: &str, requester: &Participant) -> Result<()> {
        if !is_admin(requester) {
            return Err(EngineError::permission("only an admin may remove a participant"));
        }
        let id = id.to_string();
        self.pool.run(move |conn| participants::remove_sync(conn, &id)).await
    }

    pub async fn cleanup_stale(&self, days_inactive: i64) -> Result<u64> {
        self.pool
            .run(move |conn| participants::cleanup_stale_sync(conn, days_inactive))
            .await
    }

    /// Resolve the send-side status for each recipient, used by `can_send`.
    pub async fn send_eligibility(
        &self,
        from_id: &str,
        to: &[String],
    ) -> Result<(Participant, Vec<(String, Option<ParticipantStatus>)>)> {
        let from = self.require(from_id).await?;
        let mut resolved = Vec::with_capacity(to.len());
        for id in to {
            if id == BROADCAST_PSEUDO_ID {
                resolved.push((id.clone(), None));
                continue;
            }
            let status = self.get(id).await?.map(|p| p.status);
            resolved.push((id.clone(), status));
        }
        Ok((from, resolved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_ids_rejected() {
        assert!(validate_participant_id("@system").is_err());
        assert!(validate_participant_id("@backend").is_ok());
    }

    #[test]
    fn broadcast_pseudo_id_is_allowed_through_validation() {
        assert!(validate_participant_id(BROADCAST_PSEUDO_ID).is_ok());
    }

    #[test]
    fn malformed_ids_rejected() {
        assert!(validate_participant_id("backend").is_err());
        assert!(validate_participant_id("@1backend").is_err());
        assert!(validate_participant_id(&format!("@{}", "a".repeat(40))).is_err());
    }
}
