//! Protocol events
//!
//! The closed set of events the engine accepts. Each carries the evidence
//! its guard needs; the engine re-checks that evidence rather than trusting
//! the sender.

use openmandate_payments::Authorization;
use openmandate_types::{AgentId, CaptureReceipt, Mandate, MandateId, PaymentToken};

/// An event submitted to the protocol engine
#[derive(Debug, Clone)]
pub enum ProtocolEvent {
    /// Shopper submits the Intent mandate opening the flow
    IntentReceived { mandate: Mandate },
    /// Merchant proposes a signed Cart mandate
    CartReceived { mandate: Mandate },
    /// Shopper accepts the proposed cart
    CartAccepted {
        cart_ref: MandateId,
        accepted_by: AgentId,
    },
    /// Provider issues a payment credential token
    TokenIssued {
        requested_by: AgentId,
        token: PaymentToken,
    },
    /// Shopper creates the Payment mandate against the accepted cart
    PaymentCreated { mandate: Mandate },
    /// Shopper's device signs the payment mandate
    DeviceSigned { mandate: Mandate },
    /// Provider authorizes and countersigns the payment mandate
    ProviderAuthorized {
        mandate: Mandate,
        authorization: Authorization,
    },
    /// Provider captures the authorized amount
    CaptureExecuted { receipt: CaptureReceipt },
    /// Provider acknowledges settlement
    SettlementAcknowledged,
    /// A participant aborts the session
    Abort { reason: String },
}

impl ProtocolEvent {
    /// Short name for logging and protocol-violation reporting
    pub fn name(&self) -> &'static str {
        match self {
            Self::IntentReceived { .. } => "intent_received",
            Self::CartReceived { .. } => "cart_received",
            Self::CartAccepted { .. } => "cart_accepted",
            Self::TokenIssued { .. } => "token_issued",
            Self::PaymentCreated { .. } => "payment_created",
            Self::DeviceSigned { .. } => "device_signed",
            Self::ProviderAuthorized { .. } => "provider_authorized",
            Self::CaptureExecuted { .. } => "capture_executed",
            Self::SettlementAcknowledged => "settlement_acknowledged",
            Self::Abort { .. } => "abort",
        }
    }

    /// The mandate id this event would add to the session chain, if any.
    /// Used for replay detection: a chained id is ignored, not re-applied.
    pub fn new_mandate_id(&self) -> Option<&MandateId> {
        match self {
            Self::IntentReceived { mandate }
            | Self::CartReceived { mandate }
            | Self::PaymentCreated { mandate } => Some(&mandate.mandate_id),
            _ => None,
        }
    }
}
