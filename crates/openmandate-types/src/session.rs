//! Sessions - the bounded lifetime of one purchase transaction
//!
//! A session owns its mandate chain and message log by id reference. All
//! mutation goes through the protocol engine's single-writer-per-session
//! discipline; nothing else touches a session directly.

use crate::{AgentId, Amount, MandateId, MessageId, PaymentToken, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol states for a purchase session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Opened,
    IntentCreated,
    CartProposed,
    CartAccepted,
    PaymentTokenIssued,
    PaymentMandateCreated,
    PaymentSigned,
    Authorized,
    Captured,
    Closed,
    Failed,
}

impl SessionState {
    /// Whether the state admits no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// Wire name of the state
    pub fn name(&self) -> &'static str {
        match self {
            Self::Opened => "OPENED",
            Self::IntentCreated => "INTENT_CREATED",
            Self::CartProposed => "CART_PROPOSED",
            Self::CartAccepted => "CART_ACCEPTED",
            Self::PaymentTokenIssued => "PAYMENT_TOKEN_ISSUED",
            Self::PaymentMandateCreated => "PAYMENT_MANDATE_CREATED",
            Self::PaymentSigned => "PAYMENT_SIGNED",
            Self::Authorized => "AUTHORIZED",
            Self::Captured => "CAPTURED",
            Self::Closed => "CLOSED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The three named participants of a purchase session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participants {
    pub shopper: AgentId,
    pub merchant: AgentId,
    pub provider: AgentId,
}

impl Participants {
    pub fn new(shopper: AgentId, merchant: AgentId, provider: AgentId) -> Self {
        Self {
            shopper,
            merchant,
            provider,
        }
    }

    /// Whether an agent participates in the session
    pub fn contains(&self, agent: &AgentId) -> bool {
        &self.shopper == agent || &self.merchant == agent || &self.provider == agent
    }
}

/// Engine bookkeeping accumulated while the session advances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SessionContext {
    /// Current intent mandate
    pub intent: Option<MandateId>,
    /// Proposed (then accepted) cart mandate
    pub cart: Option<MandateId>,
    /// Payment mandate
    pub payment: Option<MandateId>,
    /// Token issued by the provider for this session
    pub token: Option<PaymentToken>,
    /// Amount the provider authorized; capture must match it exactly
    pub authorized_amount: Option<Amount>,
}

/// One purchase transaction tracked by the protocol engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub participants: Participants,
    pub state: SessionState,
    /// Mandate ids in creation order
    pub mandate_chain: Vec<MandateId>,
    /// Envelope ids in processing order
    pub message_log: Vec<MessageId>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Reason the session failed, when state is FAILED
    pub failure: Option<String>,
    pub context: SessionContext,
}

impl Session {
    /// Open a new session in OPENED state
    pub fn open(participants: Participants, expires_at: DateTime<Utc>) -> Self {
        Self {
            session_id: SessionId::new(),
            participants,
            state: SessionState::Opened,
            mandate_chain: Vec::new(),
            message_log: Vec::new(),
            created_at: Utc::now(),
            expires_at,
            failure: None,
            context: SessionContext::default(),
        }
    }

    /// Whether the session is past its expiry at the given processing time
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Whether a mandate id is already part of the chain (replay detection)
    pub fn has_mandate(&self, mandate_id: &MandateId) -> bool {
        self.mandate_chain.contains(mandate_id)
    }

    /// Whether a message id was already processed (replay detection)
    pub fn has_message(&self, message_id: &MessageId) -> bool {
        self.message_log.contains(message_id)
    }
}

/// Session status exposed to presentation layers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: SessionId,
    pub state: SessionState,
    pub mandate_chain: Vec<MandateId>,
    pub failure: Option<String>,
}
