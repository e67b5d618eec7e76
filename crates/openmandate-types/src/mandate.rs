//! Mandate model - Intent, Cart and Payment mandates
//!
//! A mandate is a signed, immutable statement of intent or authorization
//! exchanged between agents. Constructors validate required fields up front;
//! once a signature is attached the signed byte range is fixed, and any
//! revision takes a fresh `mandate_id` with a `supersedes` back-reference.

use crate::{
    AgentId, Amount, Currency, MandateError, MandateId, MerchantId, Result, Signature, Sku, UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of a mandate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MandateKind {
    Intent,
    Cart,
    Payment,
}

impl fmt::Display for MandateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Intent => write!(f, "intent"),
            Self::Cart => write!(f, "cart"),
            Self::Payment => write!(f, "payment"),
        }
    }
}

/// Which merchants an intent allows carts from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MerchantPolicy {
    /// Any merchant may propose a cart
    #[default]
    Any,
    /// Only the listed merchants may propose a cart
    Allowlist(Vec<MerchantId>),
}

impl MerchantPolicy {
    /// Whether a merchant is allowed under this policy
    pub fn allows(&self, merchant: &MerchantId) -> bool {
        match self {
            Self::Any => true,
            Self::Allowlist(merchants) => merchants.contains(merchant),
        }
    }
}

/// Constraints the shopper places on an intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentConstraints {
    /// Maximum cart total the shopper will accept
    pub price_ceiling: Amount,
    /// Optional product category restriction
    pub category: Option<String>,
    /// Merchant allowlist policy
    #[serde(default)]
    pub merchants: MerchantPolicy,
}

impl IntentConstraints {
    /// Ceiling-only constraints, any merchant
    pub fn ceiling(price_ceiling: Amount) -> Self {
        Self {
            price_ceiling,
            category: None,
            merchants: MerchantPolicy::Any,
        }
    }
}

/// Payload of an Intent mandate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentPayload {
    pub user_id: UserId,
    pub item_description: String,
    pub constraints: IntentConstraints,
}

/// A single cart line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub sku: Sku,
    pub description: String,
    /// Catalog category, matched against the intent's category constraint
    pub category: String,
    pub quantity: u32,
    pub unit_price: Amount,
}

impl LineItem {
    /// Line total with overflow checking
    pub fn line_total(&self) -> Result<Amount> {
        self.unit_price.checked_mul(self.quantity)
    }
}

/// Fulfillment commitments the merchant signs up to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentTerms {
    /// Service-level agreement, e.g. "2-3 business days"
    pub sla: String,
    /// Return window in days
    pub return_window_days: u32,
    /// Warranty description
    pub warranty: String,
}

impl Default for FulfillmentTerms {
    fn default() -> Self {
        Self {
            sla: "2-3 business days".to_string(),
            return_window_days: 30,
            warranty: "1 year manufacturer warranty".to_string(),
        }
    }
}

/// Payload of a Cart mandate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartPayload {
    /// The owning Intent mandate
    pub intent_ref: MandateId,
    pub merchant_id: MerchantId,
    pub line_items: Vec<LineItem>,
    pub total: Amount,
    pub fulfillment_terms: FulfillmentTerms,
}

/// Opaque provider-issued payment credential token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentToken {
    /// Opaque token value
    pub token: String,
    /// Payment method the token was minted for
    pub payment_method_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PaymentToken {
    /// Whether the token is past its expiry at the given processing time
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Payload of a Payment mandate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentPayload {
    /// The accepted Cart mandate
    pub cart_ref: MandateId,
    pub payment_token: PaymentToken,
    pub amount: Amount,
    pub currency: Currency,
}

/// Closed set of mandate payloads, matched exhaustively in the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MandatePayload {
    Intent(IntentPayload),
    Cart(CartPayload),
    Payment(PaymentPayload),
}

impl MandatePayload {
    /// The kind this payload belongs to
    pub fn kind(&self) -> MandateKind {
        match self {
            Self::Intent(_) => MandateKind::Intent,
            Self::Cart(_) => MandateKind::Cart,
            Self::Payment(_) => MandateKind::Payment,
        }
    }
}

/// A mandate: id, kind, validity window, payload and signature slots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mandate {
    pub mandate_id: MandateId,
    pub kind: MandateKind,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub payload: MandatePayload,
    /// Mandate this one revises, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<MandateId>,
    /// Primary signature (merchant for carts, shopper device for payments)
    pub signature: Option<Signature>,
    /// Provider countersignature (payment mandates only)
    pub countersignature: Option<Signature>,
}

impl Mandate {
    fn build(payload: MandatePayload, expires_at: DateTime<Utc>) -> Result<Self> {
        let created_at = Utc::now();
        if expires_at <= created_at {
            return Err(MandateError::validation(
                "expires_at",
                "must be strictly after created_at",
            ));
        }
        Ok(Self {
            mandate_id: MandateId::new(),
            kind: payload.kind(),
            created_at,
            expires_at,
            payload,
            supersedes: None,
            signature: None,
            countersignature: None,
        })
    }

    /// Create an Intent mandate
    pub fn intent(
        user_id: UserId,
        item_description: impl Into<String>,
        constraints: IntentConstraints,
        expires_at: DateTime<Utc>,
    ) -> Result<Self> {
        if user_id.is_empty() {
            return Err(MandateError::validation("user_id", "must not be empty"));
        }
        let item_description = item_description.into();
        if item_description.is_empty() {
            return Err(MandateError::validation(
                "item_description",
                "must not be empty",
            ));
        }
        Self::build(
            MandatePayload::Intent(IntentPayload {
                user_id,
                item_description,
                constraints,
            }),
            expires_at,
        )
    }

    /// Create a Cart mandate; the total is computed from the line items
    pub fn cart(
        intent_ref: MandateId,
        merchant_id: MerchantId,
        line_items: Vec<LineItem>,
        fulfillment_terms: FulfillmentTerms,
        expires_at: DateTime<Utc>,
    ) -> Result<Self> {
        if merchant_id.is_empty() {
            return Err(MandateError::validation("merchant_id", "must not be empty"));
        }
        if line_items.is_empty() {
            return Err(MandateError::validation("line_items", "must not be empty"));
        }
        for item in &line_items {
            if item.quantity == 0 {
                return Err(MandateError::validation("quantity", "must be at least 1"));
            }
        }
        let total = Amount::checked_sum(
            line_items
                .iter()
                .map(|item| item.line_total())
                .collect::<Result<Vec<_>>>()?,
        )?;
        Self::build(
            MandatePayload::Cart(CartPayload {
                intent_ref,
                merchant_id,
                line_items,
                total,
                fulfillment_terms,
            }),
            expires_at,
        )
    }

    /// Create a Payment mandate
    pub fn payment(
        cart_ref: MandateId,
        payment_token: PaymentToken,
        amount: Amount,
        currency: Currency,
        expires_at: DateTime<Utc>,
    ) -> Result<Self> {
        if payment_token.token.is_empty() {
            return Err(MandateError::validation(
                "payment_token",
                "must not be empty",
            ));
        }
        Self::build(
            MandatePayload::Payment(PaymentPayload {
                cart_ref,
                payment_token,
                amount,
                currency,
            }),
            expires_at,
        )
    }

    /// Start a revision of this mandate: fresh id, fresh validity window,
    /// back-reference to the superseded id, signatures cleared
    pub fn superseded_by(&self, expires_at: DateTime<Utc>) -> Result<Self> {
        let mut revised = Self::build(self.payload.clone(), expires_at)?;
        revised.supersedes = Some(self.mandate_id.clone());
        Ok(revised)
    }

    /// Whether the mandate is past its expiry at the given processing time
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Whether the mandate carries its primary signature
    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// The intent payload, if this is an Intent mandate
    pub fn as_intent(&self) -> Option<&IntentPayload> {
        match &self.payload {
            MandatePayload::Intent(p) => Some(p),
            _ => None,
        }
    }

    /// The cart payload, if this is a Cart mandate
    pub fn as_cart(&self) -> Option<&CartPayload> {
        match &self.payload {
            MandatePayload::Cart(p) => Some(p),
            _ => None,
        }
    }

    /// The payment payload, if this is a Payment mandate
    pub fn as_payment(&self) -> Option<&PaymentPayload> {
        match &self.payload {
            MandatePayload::Payment(p) => Some(p),
            _ => None,
        }
    }

    /// Attach the primary signature. Fails if one is already present;
    /// re-signing requires a superseding mandate.
    pub fn with_signature(mut self, signature: Signature) -> Result<Self> {
        if self.signature.is_some() {
            return Err(MandateError::validation(
                "signature",
                "mandate is already signed",
            ));
        }
        self.signature = Some(signature);
        Ok(self)
    }

    /// Attach the provider countersignature (payment mandates only)
    pub fn with_countersignature(mut self, signature: Signature) -> Result<Self> {
        if self.kind != MandateKind::Payment {
            return Err(MandateError::validation(
                "countersignature",
                "only payment mandates carry a countersignature",
            ));
        }
        if self.countersignature.is_some() {
            return Err(MandateError::validation(
                "countersignature",
                "mandate is already countersigned",
            ));
        }
        self.countersignature = Some(signature);
        Ok(self)
    }
}

/// A request to create an intent, resolved externally from natural language
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRequest {
    pub user_id: UserId,
    pub item_description: String,
    pub constraints: IntentConstraints,
}
