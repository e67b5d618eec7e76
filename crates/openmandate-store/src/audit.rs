//! Append-only audit trail
//!
//! One record per protocol transition, appended before the transition's
//! side effects are visible to the next step. Records are hash-chained per
//! session with SHA-256; `verify_chain` recomputes the chain without
//! re-running the state machine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use openmandate_types::{MandateId, MessageId, RecordId, SessionId, SessionState};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Hash of the (absent) record before the first one in a chain
const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// What a record is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditSubject {
    Mandate { mandate_id: MandateId },
    Message { message_id: MessageId },
    Session,
}

/// Outcome of a protocol transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AuditOutcome {
    Accepted {
        from: SessionState,
        to: SessionState,
    },
    Rejected {
        reason: String,
    },
}

impl AuditOutcome {
    /// Whether the transition was accepted
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// A record before it is appended (the trail assigns index and chain hash)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAuditRecord {
    pub session_id: SessionId,
    pub subject: AuditSubject,
    pub outcome: AuditOutcome,
}

/// One appended audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub record_id: RecordId,
    pub session_id: SessionId,
    /// Position within the session's trail, starting at 0
    pub step_index: u32,
    pub subject: AuditSubject,
    pub outcome: AuditOutcome,
    pub recorded_at: DateTime<Utc>,
    /// Hash of the previous record in this session's chain
    pub previous_hash: String,
    /// Hash over this record's content and the previous hash
    pub hash: String,
}

impl AuditRecord {
    fn content_hash(
        previous_hash: &str,
        session_id: &SessionId,
        step_index: u32,
        subject: &AuditSubject,
        outcome: &AuditOutcome,
        recorded_at: &DateTime<Utc>,
    ) -> String {
        let subject = serde_json::to_string(subject).unwrap_or_default();
        let outcome = serde_json::to_string(outcome).unwrap_or_default();
        let content = format!(
            "{previous_hash}:{session_id}:{step_index}:{subject}:{outcome}:{}",
            recorded_at.timestamp_millis()
        );
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Recompute this record's hash from its fields
    pub fn compute_hash(&self) -> String {
        Self::content_hash(
            &self.previous_hash,
            &self.session_id,
            self.step_index,
            &self.subject,
            &self.outcome,
            &self.recorded_at,
        )
    }
}

/// Audit trail collaborator
#[async_trait]
pub trait AuditTrail: Send + Sync {
    /// Append a record; never fails for a well-formed record
    async fn record(&self, record: NewAuditRecord) -> AuditRecord;

    /// Full transition history for a session, ordered by step index
    async fn query(&self, session_id: &SessionId) -> Vec<AuditRecord>;

    /// Recompute and check the session's hash chain
    async fn verify_chain(&self, session_id: &SessionId) -> bool;
}

/// In-memory audit trail
#[derive(Default)]
pub struct InMemoryAuditTrail {
    records: RwLock<HashMap<SessionId, Vec<AuditRecord>>>,
}

impl InMemoryAuditTrail {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditTrail for InMemoryAuditTrail {
    async fn record(&self, record: NewAuditRecord) -> AuditRecord {
        let mut records = self.records.write().await;
        let chain = records.entry(record.session_id.clone()).or_default();
        let step_index = chain.len() as u32;
        let previous_hash = chain
            .last()
            .map(|r| r.hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        let recorded_at = Utc::now();
        let hash = AuditRecord::content_hash(
            &previous_hash,
            &record.session_id,
            step_index,
            &record.subject,
            &record.outcome,
            &recorded_at,
        );
        let appended = AuditRecord {
            record_id: RecordId::new(),
            session_id: record.session_id,
            step_index,
            subject: record.subject,
            outcome: record.outcome,
            recorded_at,
            previous_hash,
            hash,
        };
        debug!(
            session = %appended.session_id,
            step = appended.step_index,
            accepted = appended.outcome.is_accepted(),
            "audit record appended"
        );
        chain.push(appended.clone());
        appended
    }

    async fn query(&self, session_id: &SessionId) -> Vec<AuditRecord> {
        self.records
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn verify_chain(&self, session_id: &SessionId) -> bool {
        let records = self.records.read().await;
        let Some(chain) = records.get(session_id) else {
            return true;
        };
        let mut previous = GENESIS_HASH.to_string();
        for (index, record) in chain.iter().enumerate() {
            if record.step_index != index as u32
                || record.previous_hash != previous
                || record.hash != record.compute_hash()
            {
                return false;
            }
            previous = record.hash.clone();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accepted(session_id: &SessionId, from: SessionState, to: SessionState) -> NewAuditRecord {
        NewAuditRecord {
            session_id: session_id.clone(),
            subject: AuditSubject::Mandate {
                mandate_id: MandateId::new(),
            },
            outcome: AuditOutcome::Accepted { from, to },
        }
    }

    #[tokio::test]
    async fn test_step_index_increments() {
        let trail = InMemoryAuditTrail::new();
        let session = SessionId::new();
        let first = trail
            .record(accepted(&session, SessionState::Opened, SessionState::IntentCreated))
            .await;
        let second = trail
            .record(accepted(
                &session,
                SessionState::IntentCreated,
                SessionState::CartProposed,
            ))
            .await;
        assert_eq!(first.step_index, 0);
        assert_eq!(second.step_index, 1);
        assert_eq!(second.previous_hash, first.hash);
    }

    #[tokio::test]
    async fn test_chain_verifies() {
        let trail = InMemoryAuditTrail::new();
        let session = SessionId::new();
        for _ in 0..5 {
            trail
                .record(accepted(&session, SessionState::Opened, SessionState::IntentCreated))
                .await;
        }
        assert!(trail.verify_chain(&session).await);
    }

    #[tokio::test]
    async fn test_tampered_chain_fails_verification() {
        let trail = InMemoryAuditTrail::new();
        let session = SessionId::new();
        trail
            .record(accepted(&session, SessionState::Opened, SessionState::IntentCreated))
            .await;
        trail
            .record(accepted(
                &session,
                SessionState::IntentCreated,
                SessionState::CartProposed,
            ))
            .await;

        {
            let mut records = trail.records.write().await;
            let chain = records.get_mut(&session).unwrap();
            chain[0].outcome = AuditOutcome::Rejected {
                reason: "forged".to_string(),
            };
        }
        assert!(!trail.verify_chain(&session).await);
    }

    #[tokio::test]
    async fn test_sessions_are_independent_chains() {
        let trail = InMemoryAuditTrail::new();
        let a = SessionId::new();
        let b = SessionId::new();
        let first_a = trail
            .record(accepted(&a, SessionState::Opened, SessionState::IntentCreated))
            .await;
        let first_b = trail
            .record(accepted(&b, SessionState::Opened, SessionState::IntentCreated))
            .await;
        assert_eq!(first_a.previous_hash, GENESIS_HASH);
        assert_eq!(first_b.previous_hash, GENESIS_HASH);
        assert_eq!(trail.query(&a).await.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_session_chain_verifies() {
        let trail = InMemoryAuditTrail::new();
        assert!(trail.verify_chain(&SessionId::new()).await);
    }
}
