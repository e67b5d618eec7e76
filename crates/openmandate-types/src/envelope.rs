//! Transport envelopes between agents
//!
//! An envelope wraps a mandate or a control payload with sender/receiver
//! identities and session correlation. Envelopes are immutable once sent;
//! routing never mutates the payload.

use crate::{
    AgentId, Amount, CaptureId, ChallengeId, Currency, Mandate, MandateError, MandateId,
    MerchantId, MessageId, ReceiptId, Result, SessionId, Signature, Sku, TransactionId, UserId,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A product offer quoted to the shopper in a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductOffer {
    pub sku: Sku,
    pub name: String,
    pub unit_price: Amount,
    pub merchant: MerchantId,
    pub category: String,
    /// How long the quoted price is valid
    pub quote_expires_at: DateTime<Utc>,
}

/// Receipt for a captured payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureReceipt {
    pub capture_id: CaptureId,
    pub transaction_id: TransactionId,
    pub receipt_id: ReceiptId,
    pub amount: Amount,
    pub currency: Currency,
    pub captured_at: DateTime<Utc>,
    /// Date the captured funds settle
    pub settlement_date: NaiveDate,
}

/// Closed set of non-mandate messages the purchase flow needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlPayload {
    /// Shopper asks the merchant for matching products
    ProductQuery {
        query: String,
        category: Option<String>,
        max_results: usize,
    },
    /// Merchant answers a product query
    ProductListing { offers: Vec<ProductOffer> },
    /// Shopper asks the merchant to build a cart for a selection
    CartRequest { sku: Sku, quantity: u32 },
    /// Shopper tells the merchant the proposed cart was accepted
    CartAccepted { cart_ref: MandateId },
    /// Shopper asks the provider for a payment credential token
    TokenRequest {
        user_id: UserId,
        payment_method_id: String,
    },
    /// Provider delivers the minted token
    TokenIssued { token: crate::PaymentToken },
    /// Provider challenges the shopper (code sent out of band)
    OtpChallenge { challenge_id: ChallengeId },
    /// Shopper answers an OTP challenge
    OtpSubmit {
        challenge_id: ChallengeId,
        code: String,
    },
    /// Provider reports a successful capture
    CaptureCompleted { receipt: CaptureReceipt },
    /// Provider acknowledges settlement, closing the session
    SettlementAck { transaction_id: TransactionId },
    /// A participant aborts the session
    Abort { reason: String },
}

impl ControlPayload {
    /// Short name for logging and trace output
    pub fn name(&self) -> &'static str {
        match self {
            Self::ProductQuery { .. } => "product_query",
            Self::ProductListing { .. } => "product_listing",
            Self::CartRequest { .. } => "cart_request",
            Self::CartAccepted { .. } => "cart_accepted",
            Self::TokenRequest { .. } => "token_request",
            Self::TokenIssued { .. } => "token_issued",
            Self::OtpChallenge { .. } => "otp_challenge",
            Self::OtpSubmit { .. } => "otp_submit",
            Self::CaptureCompleted { .. } => "capture_completed",
            Self::SettlementAck { .. } => "settlement_ack",
            Self::Abort { .. } => "abort",
        }
    }
}

/// Envelope payload: a mandate or a control message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "payload_kind", rename_all = "snake_case")]
pub enum EnvelopePayload {
    Mandate(Mandate),
    Control(ControlPayload),
}

impl EnvelopePayload {
    /// Short name for logging and trace output
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mandate(_) => "mandate",
            Self::Control(control) => control.name(),
        }
    }
}

/// Security block on an envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SecurityBlock {
    pub signature: Option<Signature>,
}

/// The transport wrapper carrying a payload between two named agents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: MessageId,
    pub session_id: SessionId,
    pub sender_agent: AgentId,
    pub receiver_agent: AgentId,
    pub timestamp: DateTime<Utc>,
    pub payload: EnvelopePayload,
    pub security: SecurityBlock,
}

impl Envelope {
    /// Create an envelope; sender and receiver must be non-empty
    pub fn new(
        session_id: SessionId,
        sender_agent: AgentId,
        receiver_agent: AgentId,
        payload: EnvelopePayload,
    ) -> Result<Self> {
        if sender_agent.is_empty() {
            return Err(MandateError::validation(
                "sender_agent",
                "must not be empty",
            ));
        }
        if receiver_agent.is_empty() {
            return Err(MandateError::validation(
                "receiver_agent",
                "must not be empty",
            ));
        }
        Ok(Self {
            message_id: MessageId::new(),
            session_id,
            sender_agent,
            receiver_agent,
            timestamp: Utc::now(),
            payload,
            security: SecurityBlock::default(),
        })
    }

    /// Attach the sender's signature over the canonical envelope encoding
    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.security.signature = Some(signature);
        self
    }

    /// The carried mandate, if any
    pub fn mandate(&self) -> Option<&Mandate> {
        match &self.payload {
            EnvelopePayload::Mandate(m) => Some(m),
            EnvelopePayload::Control(_) => None,
        }
    }

    /// The carried control payload, if any
    pub fn control(&self) -> Option<&ControlPayload> {
        match &self.payload {
            EnvelopePayload::Control(c) => Some(c),
            EnvelopePayload::Mandate(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_requires_named_parties() {
        let err = Envelope::new(
            SessionId::new(),
            AgentId::new(""),
            AgentId::new("merchant_agent"),
            EnvelopePayload::Control(ControlPayload::Abort {
                reason: "test".to_string(),
            }),
        )
        .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_control_payload_round_trip() {
        let env = Envelope::new(
            SessionId::new(),
            AgentId::new("shopper_agent"),
            AgentId::new("merchant_agent"),
            EnvelopePayload::Control(ControlPayload::ProductQuery {
                query: "laptop".to_string(),
                category: Some("electronics".to_string()),
                max_results: 3,
            }),
        )
        .unwrap();
        let json = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, env);
        assert_eq!(back.payload.name(), "product_query");
    }
}
