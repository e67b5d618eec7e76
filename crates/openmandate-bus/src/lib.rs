//! OpenMandate Bus - typed envelope routing between the three agents
//!
//! Routing is identity-based: an envelope is delivered only to its declared
//! receiver, there is no broadcast. Delivery is at-least-once; idempotent
//! processing is guaranteed upstream by the engine's id deduplication.
//! Inboxes are append-only with a per-agent cursor, so the full ordered
//! history stays available for audit replay after consumption.

use chrono::{DateTime, Utc};
use openmandate_types::{AgentId, Envelope, MessageId, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, warn};

/// Bus error types
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// Malformed envelope; not enqueued
    #[error("Invalid envelope: {field} - {reason}")]
    Validation { field: String, reason: String },

    /// Receiver identity is not registered
    #[error("No route to receiver {receiver}")]
    Routing { receiver: String },

    /// Agent identity is not registered on the receive side
    #[error("Agent {agent} is not registered")]
    UnknownAgent { agent: String },

    /// The deadline passed before a message arrived
    #[error("Receive deadline passed for agent {agent}")]
    DeadlinePassed { agent: String },
}

/// Acknowledgement returned to the sender on successful enqueue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub message_id: MessageId,
    pub receiver: AgentId,
    pub delivered_at: DateTime<Utc>,
}

struct Inbox {
    queue: Vec<Envelope>,
    cursor: usize,
    notify: Arc<Notify>,
}

impl Inbox {
    fn new() -> Self {
        Self {
            queue: Vec::new(),
            cursor: 0,
            notify: Arc::new(Notify::new()),
        }
    }
}

#[derive(Default)]
struct BusInner {
    inboxes: HashMap<AgentId, Inbox>,
    history: Vec<Envelope>,
}

/// In-process message bus between registered agents
#[derive(Default)]
pub struct MessageBus {
    inner: RwLock<BusInner>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent identity so envelopes can be routed to it
    pub async fn register(&self, agent: AgentId) {
        let mut inner = self.inner.write().await;
        inner.inboxes.entry(agent).or_insert_with(Inbox::new);
    }

    fn validate(envelope: &Envelope) -> Result<(), BusError> {
        if envelope.sender_agent.is_empty() {
            return Err(BusError::Validation {
                field: "sender_agent".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if envelope.receiver_agent.is_empty() {
            return Err(BusError::Validation {
                field: "receiver_agent".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Enqueue an envelope for its declared receiver
    pub async fn send(&self, envelope: Envelope) -> Result<DeliveryReceipt, BusError> {
        Self::validate(&envelope)?;
        let mut inner = self.inner.write().await;
        let Some(inbox) = inner.inboxes.get_mut(&envelope.receiver_agent) else {
            warn!(receiver = %envelope.receiver_agent, "dropping envelope for unknown receiver");
            return Err(BusError::Routing {
                receiver: envelope.receiver_agent.to_string(),
            });
        };
        let receipt = DeliveryReceipt {
            message_id: envelope.message_id.clone(),
            receiver: envelope.receiver_agent.clone(),
            delivered_at: Utc::now(),
        };
        debug!(
            message = %envelope.message_id,
            sender = %envelope.sender_agent,
            receiver = %envelope.receiver_agent,
            payload = envelope.payload.name(),
            "envelope enqueued"
        );
        inbox.queue.push(envelope.clone());
        // notify_one stores a permit when nobody is parked, so a receiver
        // arriving after this send still wakes immediately
        inbox.notify.notify_one();
        inner.history.push(envelope);
        Ok(receipt)
    }

    /// Pull the next undelivered envelope for an agent, if any
    pub async fn try_recv(&self, agent: &AgentId) -> Result<Option<Envelope>, BusError> {
        let mut inner = self.inner.write().await;
        let Some(inbox) = inner.inboxes.get_mut(agent) else {
            return Err(BusError::UnknownAgent {
                agent: agent.to_string(),
            });
        };
        if inbox.cursor < inbox.queue.len() {
            let envelope = inbox.queue[inbox.cursor].clone();
            inbox.cursor += 1;
            Ok(Some(envelope))
        } else {
            Ok(None)
        }
    }

    /// Wait for the next envelope until a deadline. This is the suspension
    /// point of the protocol: a pending wait resolves into an error when the
    /// deadline (typically the session expiry) passes.
    pub async fn recv_deadline(
        &self,
        agent: &AgentId,
        deadline: DateTime<Utc>,
    ) -> Result<Envelope, BusError> {
        loop {
            let notify = {
                let inner = self.inner.read().await;
                let Some(inbox) = inner.inboxes.get(agent) else {
                    return Err(BusError::UnknownAgent {
                        agent: agent.to_string(),
                    });
                };
                inbox.notify.clone()
            };
            if let Some(envelope) = self.try_recv(agent).await? {
                return Ok(envelope);
            }
            let remaining = deadline - Utc::now();
            let Ok(remaining) = remaining.to_std() else {
                return Err(BusError::DeadlinePassed {
                    agent: agent.to_string(),
                });
            };
            if tokio::time::timeout(remaining, notify.notified()).await.is_err() {
                return Err(BusError::DeadlinePassed {
                    agent: agent.to_string(),
                });
            }
        }
    }

    /// Full ordered inbox history for an agent, ignoring its cursor.
    /// Restartable iteration for audit replay, not live subscription.
    pub async fn replay(&self, agent: &AgentId) -> Result<Vec<Envelope>, BusError> {
        let inner = self.inner.read().await;
        inner
            .inboxes
            .get(agent)
            .map(|inbox| inbox.queue.clone())
            .ok_or_else(|| BusError::UnknownAgent {
                agent: agent.to_string(),
            })
    }

    /// All envelopes sent within a session, in send order
    pub async fn session_history(&self, session_id: &SessionId) -> Vec<Envelope> {
        let inner = self.inner.read().await;
        inner
            .history
            .iter()
            .filter(|env| &env.session_id == session_id)
            .cloned()
            .collect()
    }
}
