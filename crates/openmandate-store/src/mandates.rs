//! Mandate store
//!
//! Insert-once by mandate id. A duplicate insert is an error rather than an
//! overwrite; revising a signed mandate means storing a superseding mandate
//! under a fresh id. Signature attachment is the one permitted update, and
//! only when the canonical payload bytes are unchanged.

use async_trait::async_trait;
use openmandate_crypto::canonical_bytes;
use openmandate_types::{Mandate, MandateError, MandateId, Result, SessionId};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Mandate store collaborator
#[async_trait]
pub trait MandateStore: Send + Sync {
    /// Insert a mandate for a session; fails on a duplicate id
    async fn insert(&self, session_id: &SessionId, mandate: Mandate) -> Result<()>;

    /// Get a mandate by id
    async fn get(&self, mandate_id: &MandateId) -> Result<Mandate>;

    /// Replace the stored copy with a signed copy of the same mandate.
    /// Fails if the canonical payload bytes differ from what was stored.
    async fn attach_signatures(&self, mandate: &Mandate) -> Result<()>;

    /// All mandates recorded for a session, in insertion order
    async fn for_session(&self, session_id: &SessionId) -> Vec<Mandate>;
}

#[derive(Default)]
struct StoreInner {
    mandates: HashMap<MandateId, (SessionId, Mandate)>,
    by_session: HashMap<SessionId, Vec<MandateId>>,
}

/// In-memory mandate store
#[derive(Default)]
pub struct InMemoryMandateStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryMandateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MandateStore for InMemoryMandateStore {
    async fn insert(&self, session_id: &SessionId, mandate: Mandate) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.mandates.contains_key(&mandate.mandate_id) {
            return Err(MandateError::DuplicateMandate {
                mandate_id: mandate.mandate_id.to_string(),
            });
        }
        inner
            .by_session
            .entry(session_id.clone())
            .or_default()
            .push(mandate.mandate_id.clone());
        inner
            .mandates
            .insert(mandate.mandate_id.clone(), (session_id.clone(), mandate));
        Ok(())
    }

    async fn get(&self, mandate_id: &MandateId) -> Result<Mandate> {
        let inner = self.inner.read().await;
        inner
            .mandates
            .get(mandate_id)
            .map(|(_, m)| m.clone())
            .ok_or_else(|| MandateError::MandateNotFound {
                mandate_id: mandate_id.to_string(),
            })
    }

    async fn attach_signatures(&self, mandate: &Mandate) -> Result<()> {
        let mut inner = self.inner.write().await;
        let Some((_, stored)) = inner.mandates.get_mut(&mandate.mandate_id) else {
            return Err(MandateError::MandateNotFound {
                mandate_id: mandate.mandate_id.to_string(),
            });
        };
        let stored_bytes = canonical_bytes(stored).map_err(|e| {
            MandateError::validation("mandate", e.to_string())
        })?;
        let update_bytes = canonical_bytes(mandate).map_err(|e| {
            MandateError::validation("mandate", e.to_string())
        })?;
        if stored_bytes != update_bytes {
            return Err(MandateError::SignatureMismatch {
                signer: mandate
                    .signature
                    .as_ref()
                    .map(|s| s.signer.to_string())
                    .unwrap_or_default(),
                reason: "payload differs from the stored mandate".to_string(),
            });
        }
        *stored = mandate.clone();
        Ok(())
    }

    async fn for_session(&self, session_id: &SessionId) -> Vec<Mandate> {
        let inner = self.inner.read().await;
        inner
            .by_session
            .get(session_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.mandates.get(id).map(|(_, m)| m.clone()))
            .collect()
    }
}
