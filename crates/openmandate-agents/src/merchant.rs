//! Merchant Agent - quotes products, proposes signed carts, fulfills
//!
//! The merchant flow:
//! 1. Answers product queries from its catalog
//! 2. Builds and signs Cart mandates, reserving inventory
//! 3. Kicks off fulfillment with a tracking number after settlement

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use openmandate_bus::MessageBus;
use openmandate_crypto::SignatureService;
use openmandate_protocol::{ProtocolEngine, ProtocolEvent};
use openmandate_types::{
    AgentId, ControlPayload, Envelope, EnvelopePayload, FulfillmentId, FulfillmentTerms, LineItem,
    Mandate, MandateError, MandateId, MerchantId, ReservationId, Session, SessionId, Sku,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::{AgentError, Catalog, Result};

/// One reserved cart line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemReservation {
    pub sku: Sku,
    pub quantity: u32,
}

/// An inventory hold for a proposed cart
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryReservation {
    pub reservation_id: ReservationId,
    pub cart_ref: MandateId,
    pub items: Vec<ItemReservation>,
    pub expires_at: DateTime<Utc>,
}

impl InventoryReservation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// A fulfillment order opened after settlement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FulfillmentOrder {
    pub fulfillment_id: FulfillmentId,
    pub cart_ref: MandateId,
    pub merchant_id: MerchantId,
    pub tracking_number: String,
    pub shipping_method: String,
    pub created_at: DateTime<Utc>,
    pub estimated_shipping: DateTime<Utc>,
}

/// The Merchant Agent
pub struct MerchantAgent {
    id: AgentId,
    merchant_id: MerchantId,
    bus: Arc<MessageBus>,
    engine: Arc<ProtocolEngine>,
    signatures: SignatureService,
    catalog: Catalog,
    /// Proposed carts by session, kept until fulfillment
    carts: Mutex<HashMap<SessionId, Mandate>>,
    reservations: Mutex<HashMap<SessionId, InventoryReservation>>,
    /// How long an inventory hold lasts
    reservation_ttl: Duration,
}

impl MerchantAgent {
    pub fn new(
        id: AgentId,
        merchant_id: MerchantId,
        bus: Arc<MessageBus>,
        engine: Arc<ProtocolEngine>,
        signatures: SignatureService,
        catalog: Catalog,
    ) -> Self {
        Self {
            id,
            merchant_id,
            bus,
            engine,
            signatures,
            catalog,
            carts: Mutex::new(HashMap::new()),
            reservations: Mutex::new(HashMap::new()),
            reservation_ttl: Duration::hours(24),
        }
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn merchant_id(&self) -> &MerchantId {
        &self.merchant_id
    }

    /// Answer the next product query in the inbox with a listing
    pub async fn handle_product_query(&self, session: &Session) -> Result<usize> {
        let envelope = self.recv(session).await?;
        let Some(ControlPayload::ProductQuery {
            query,
            category,
            max_results,
        }) = envelope.control()
        else {
            return Err(unexpected("product_query", &envelope));
        };
        let offers = self
            .catalog
            .search(query, category.as_deref(), *max_results);
        info!(
            session = %session.session_id,
            query,
            matches = offers.len(),
            "product query answered"
        );
        let count = offers.len();
        self.send(
            session,
            &envelope.sender_agent,
            EnvelopePayload::Control(ControlPayload::ProductListing { offers }),
        )
        .await?;
        Ok(count)
    }

    /// Build, sign and propose a cart for the next cart request, holding
    /// inventory for it
    pub async fn propose_cart(&self, session: &Session) -> Result<Mandate> {
        let envelope = self.recv(session).await?;
        let Some(ControlPayload::CartRequest { sku, quantity }) = envelope.control() else {
            return Err(unexpected("cart_request", &envelope));
        };
        let line_item = self.validate_item(sku, *quantity)?;

        let intent_ref = self
            .engine
            .snapshot(&session.session_id)
            .await?
            .context
            .intent
            .ok_or_else(|| MandateError::validation("session", "no intent on record"))?;
        let cart = Mandate::cart(
            intent_ref,
            self.merchant_id.clone(),
            vec![line_item],
            FulfillmentTerms::default(),
            Utc::now() + Duration::days(1),
        )?;
        let signature = self.signatures.sign_mandate(&cart, &self.id)?;
        let cart = cart.with_signature(signature)?;

        self.reserve_inventory(&session.session_id, &cart).await?;
        self.carts
            .lock()
            .await
            .insert(session.session_id.clone(), cart.clone());

        let reply = self
            .send(
                session,
                &envelope.sender_agent,
                EnvelopePayload::Mandate(cart.clone()),
            )
            .await?;
        self.engine
            .apply(
                &session.session_id,
                Some(reply.message_id),
                ProtocolEvent::CartReceived {
                    mandate: cart.clone(),
                },
            )
            .await?;
        info!(session = %session.session_id, cart = %cart.mandate_id, "cart proposed");
        Ok(cart)
    }

    /// Consume the shopper's acceptance notice
    pub async fn confirm_acceptance(&self, session: &Session) -> Result<MandateId> {
        let envelope = self.recv(session).await?;
        match envelope.control() {
            Some(ControlPayload::CartAccepted { cart_ref }) => Ok(cart_ref.clone()),
            _ => Err(unexpected("cart_accepted", &envelope)),
        }
    }

    /// The inventory hold for a session, if one is live
    pub async fn reservation(&self, session_id: &SessionId) -> Option<InventoryReservation> {
        self.reservations.lock().await.get(session_id).cloned()
    }

    /// Wait for the settlement notice, then open a fulfillment order for
    /// the signed cart
    pub async fn fulfill_order(&self, session: &Session) -> Result<FulfillmentOrder> {
        let envelope = self.recv(session).await?;
        let Some(ControlPayload::SettlementAck { .. }) = envelope.control() else {
            return Err(unexpected("settlement_ack", &envelope));
        };
        let cart = self
            .carts
            .lock()
            .await
            .get(&session.session_id)
            .cloned()
            .ok_or_else(|| MandateError::validation("session", "no proposed cart on record"))?;
        if !cart.is_signed() {
            return Err(MandateError::validation("cart", "cart mandate is not signed").into());
        }
        let now = Utc::now();
        let order = FulfillmentOrder {
            fulfillment_id: FulfillmentId::new(),
            cart_ref: cart.mandate_id.clone(),
            merchant_id: self.merchant_id.clone(),
            tracking_number: tracking_number(),
            shipping_method: "standard_shipping".to_string(),
            created_at: now,
            estimated_shipping: now + Duration::days(2),
        };
        info!(
            session = %session.session_id,
            tracking = %order.tracking_number,
            "fulfillment initiated"
        );
        self.reservations.lock().await.remove(&session.session_id);
        Ok(order)
    }

    fn validate_item(&self, sku: &Sku, quantity: u32) -> Result<LineItem> {
        let product = self
            .catalog
            .get(sku)
            .ok_or_else(|| AgentError::ProductNotFound {
                sku: sku.to_string(),
            })?;
        if quantity > product.stock {
            return Err(AgentError::InsufficientStock {
                sku: sku.to_string(),
                available: product.stock,
                requested: quantity,
            });
        }
        Ok(LineItem {
            sku: product.sku.clone(),
            description: product.name.clone(),
            category: product.category.clone(),
            quantity,
            unit_price: product.unit_price,
        })
    }

    async fn reserve_inventory(&self, session_id: &SessionId, cart: &Mandate) -> Result<()> {
        let payload = cart
            .as_cart()
            .ok_or_else(|| MandateError::validation("cart", "not a cart mandate"))?;
        let reservation = InventoryReservation {
            reservation_id: ReservationId::new(),
            cart_ref: cart.mandate_id.clone(),
            items: payload
                .line_items
                .iter()
                .map(|item| ItemReservation {
                    sku: item.sku.clone(),
                    quantity: item.quantity,
                })
                .collect(),
            expires_at: Utc::now() + self.reservation_ttl,
        };
        info!(
            session = %session_id,
            reservation = %reservation.reservation_id,
            items = reservation.items.len(),
            "inventory reserved"
        );
        self.reservations
            .lock()
            .await
            .insert(session_id.clone(), reservation);
        Ok(())
    }

    async fn send(
        &self,
        session: &Session,
        receiver: &AgentId,
        payload: EnvelopePayload,
    ) -> Result<Envelope> {
        let envelope = Envelope::new(
            session.session_id.clone(),
            self.id.clone(),
            receiver.clone(),
            payload,
        )?;
        let signature = self.signatures.sign_envelope(&envelope, &self.id)?;
        let envelope = envelope.with_signature(signature);
        self.bus.send(envelope.clone()).await?;
        Ok(envelope)
    }

    async fn recv(&self, session: &Session) -> Result<Envelope> {
        let envelope = self.bus.recv_deadline(&self.id, session.expires_at).await?;
        if !self.signatures.verify_envelope(&envelope) {
            return Err(MandateError::SignatureMismatch {
                signer: envelope.sender_agent.to_string(),
                reason: "envelope signature did not verify".to_string(),
            }
            .into());
        }
        Ok(envelope)
    }
}

fn tracking_number() -> String {
    format!(
        "TRACK{}",
        &Uuid::new_v4().simple().to_string()[..8].to_uppercase()
    )
}

fn unexpected(expected: &str, envelope: &Envelope) -> AgentError {
    AgentError::UnexpectedMessage {
        expected: expected.to_string(),
        got: envelope.payload.name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reservation_expiry() {
        let reservation = InventoryReservation {
            reservation_id: ReservationId::new(),
            cart_ref: MandateId::new(),
            items: vec![ItemReservation {
                sku: Sku::new("laptop_003"),
                quantity: 1,
            }],
            expires_at: Utc::now() + Duration::hours(24),
        };
        assert!(!reservation.is_expired(Utc::now()));
        assert!(reservation.is_expired(Utc::now() + Duration::hours(25)));
    }

    #[test]
    fn test_tracking_number_shape() {
        let tracking = tracking_number();
        assert!(tracking.starts_with("TRACK"));
        assert_eq!(tracking.len(), "TRACK".len() + 8);
        assert!(tracking["TRACK".len()..]
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }
}
