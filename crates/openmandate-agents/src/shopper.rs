//! Shopper Agent - opens the purchase and signs what it agrees to
//!
//! The shopper flow:
//! 1. Creates the Intent mandate from a resolved request
//! 2. Queries products and asks the merchant for a cart
//! 3. Evaluates and accepts the proposed cart
//! 4. Requests a payment token, creates and device-signs the Payment mandate
//! 5. Answers the provider's OTP challenge

use std::sync::Arc;

use chrono::{Duration, Utc};
use openmandate_bus::MessageBus;
use openmandate_crypto::SignatureService;
use openmandate_protocol::{ProtocolEngine, ProtocolEvent};
use openmandate_types::{
    AgentId, CaptureReceipt, ChallengeId, ControlPayload, Currency, Envelope, EnvelopePayload,
    IntentRequest, Mandate, MandateError, PaymentToken, ProductOffer, Session, Sku, UserId,
};
use tracing::info;

use crate::{AgentError, Result};

/// The Shopper Agent
pub struct ShopperAgent {
    id: AgentId,
    user_id: UserId,
    bus: Arc<MessageBus>,
    engine: Arc<ProtocolEngine>,
    signatures: SignatureService,
}

impl ShopperAgent {
    pub fn new(
        id: AgentId,
        user_id: UserId,
        bus: Arc<MessageBus>,
        engine: Arc<ProtocolEngine>,
        signatures: SignatureService,
    ) -> Self {
        Self {
            id,
            user_id,
            bus,
            engine,
            signatures,
        }
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Create the Intent mandate and open the flow with it
    pub async fn create_intent(
        &self,
        session: &Session,
        request: IntentRequest,
        valid_for: Duration,
    ) -> Result<Mandate> {
        let mandate = Mandate::intent(
            request.user_id,
            request.item_description,
            request.constraints,
            Utc::now() + valid_for,
        )?;
        info!(session = %session.session_id, mandate = %mandate.mandate_id, "intent created");
        let envelope = self
            .send(
                session,
                &session.participants.merchant,
                EnvelopePayload::Mandate(mandate.clone()),
            )
            .await?;
        self.engine
            .apply(
                &session.session_id,
                Some(envelope.message_id),
                ProtocolEvent::IntentReceived {
                    mandate: mandate.clone(),
                },
            )
            .await?;
        Ok(mandate)
    }

    /// Ask the merchant for matching products
    pub async fn request_products(
        &self,
        session: &Session,
        query: &str,
        category: Option<&str>,
        max_results: usize,
    ) -> Result<()> {
        self.send(
            session,
            &session.participants.merchant,
            EnvelopePayload::Control(ControlPayload::ProductQuery {
                query: query.to_string(),
                category: category.map(str::to_string),
                max_results,
            }),
        )
        .await?;
        Ok(())
    }

    /// Wait for the merchant's product listing
    pub async fn receive_products(&self, session: &Session) -> Result<Vec<ProductOffer>> {
        let envelope = self.recv(session).await?;
        match envelope.control() {
            Some(ControlPayload::ProductListing { offers }) => Ok(offers.clone()),
            _ => Err(unexpected("product_listing", &envelope)),
        }
    }

    /// Ask the merchant to build a cart for a selection
    pub async fn request_cart(
        &self,
        session: &Session,
        sku: Sku,
        quantity: u32,
    ) -> Result<()> {
        self.send(
            session,
            &session.participants.merchant,
            EnvelopePayload::Control(ControlPayload::CartRequest { sku, quantity }),
        )
        .await?;
        Ok(())
    }

    /// Wait for the merchant's proposed cart mandate
    pub async fn receive_cart(&self, session: &Session) -> Result<Mandate> {
        let envelope = self.recv(session).await?;
        match envelope.mandate() {
            Some(mandate) if mandate.as_cart().is_some() => Ok(mandate.clone()),
            _ => Err(unexpected("cart mandate", &envelope)),
        }
    }

    /// Check a proposed cart against the originating intent before
    /// accepting it. The engine enforces the same guards; this is the
    /// shopper's own walk-away point.
    pub fn evaluate_cart(&self, session: &Session, intent: &Mandate, cart: &Mandate) -> Result<()> {
        let constraints = intent
            .as_intent()
            .map(|p| &p.constraints)
            .ok_or_else(|| MandateError::validation("intent", "not an intent mandate"))?;
        let payload = cart
            .as_cart()
            .ok_or_else(|| MandateError::validation("cart", "not a cart mandate"))?;
        if cart.is_expired(Utc::now()) {
            return Err(AgentError::CartRejected {
                reason: "cart offer has expired".to_string(),
            });
        }
        if payload.total > constraints.price_ceiling {
            return Err(AgentError::CartRejected {
                reason: format!(
                    "total {} is above the ceiling {}",
                    payload.total, constraints.price_ceiling
                ),
            });
        }
        if let Some(category) = &constraints.category {
            if let Some(item) = payload
                .line_items
                .iter()
                .find(|item| !item.category.eq_ignore_ascii_case(category))
            {
                return Err(AgentError::CartRejected {
                    reason: format!("item {} is outside the category {category}", item.sku),
                });
            }
        }
        if !constraints.merchants.allows(&payload.merchant_id) {
            return Err(AgentError::CartRejected {
                reason: format!("merchant {} is not allowed", payload.merchant_id),
            });
        }
        if !self
            .signatures
            .verify_mandate(cart, &session.participants.merchant)
        {
            return Err(AgentError::CartRejected {
                reason: "merchant signature did not verify".to_string(),
            });
        }
        Ok(())
    }

    /// Accept the proposed cart
    pub async fn accept_cart(&self, session: &Session, cart: &Mandate) -> Result<()> {
        let envelope = self
            .send(
                session,
                &session.participants.merchant,
                EnvelopePayload::Control(ControlPayload::CartAccepted {
                    cart_ref: cart.mandate_id.clone(),
                }),
            )
            .await?;
        self.engine
            .apply(
                &session.session_id,
                Some(envelope.message_id),
                ProtocolEvent::CartAccepted {
                    cart_ref: cart.mandate_id.clone(),
                    accepted_by: self.id.clone(),
                },
            )
            .await?;
        Ok(())
    }

    /// Ask the provider for a payment credential token
    pub async fn request_token(&self, session: &Session, payment_method_id: &str) -> Result<()> {
        self.send(
            session,
            &session.participants.provider,
            EnvelopePayload::Control(ControlPayload::TokenRequest {
                user_id: self.user_id.clone(),
                payment_method_id: payment_method_id.to_string(),
            }),
        )
        .await?;
        Ok(())
    }

    /// Wait for the minted token
    pub async fn receive_token(&self, session: &Session) -> Result<PaymentToken> {
        let envelope = self.recv(session).await?;
        match envelope.control() {
            Some(ControlPayload::TokenIssued { token }) => Ok(token.clone()),
            _ => Err(unexpected("token_issued", &envelope)),
        }
    }

    /// Create the Payment mandate against the accepted cart
    pub async fn create_payment_mandate(
        &self,
        session: &Session,
        cart: &Mandate,
        token: PaymentToken,
        valid_for: Duration,
    ) -> Result<Mandate> {
        let total = cart
            .as_cart()
            .map(|c| c.total)
            .ok_or_else(|| MandateError::validation("cart", "not a cart mandate"))?;
        let mandate = Mandate::payment(
            cart.mandate_id.clone(),
            token,
            total,
            Currency::USD,
            Utc::now() + valid_for,
        )?;
        let envelope = self
            .send(
                session,
                &session.participants.provider,
                EnvelopePayload::Mandate(mandate.clone()),
            )
            .await?;
        self.engine
            .apply(
                &session.session_id,
                Some(envelope.message_id),
                ProtocolEvent::PaymentCreated {
                    mandate: mandate.clone(),
                },
            )
            .await?;
        Ok(mandate)
    }

    /// Sign the payment mandate on the shopper's device
    pub async fn sign_on_device(&self, session: &Session, mandate: Mandate) -> Result<Mandate> {
        let signature = self.signatures.sign_mandate(&mandate, &self.id)?;
        let signed = mandate.with_signature(signature)?;
        info!(session = %session.session_id, mandate = %signed.mandate_id, "payment mandate device-signed");
        let envelope = self
            .send(
                session,
                &session.participants.provider,
                EnvelopePayload::Mandate(signed.clone()),
            )
            .await?;
        self.engine
            .apply(
                &session.session_id,
                Some(envelope.message_id),
                ProtocolEvent::DeviceSigned {
                    mandate: signed.clone(),
                },
            )
            .await?;
        Ok(signed)
    }

    /// Wait for the provider's OTP challenge
    pub async fn receive_otp_challenge(&self, session: &Session) -> Result<ChallengeId> {
        let envelope = self.recv(session).await?;
        match envelope.control() {
            Some(ControlPayload::OtpChallenge { challenge_id }) => Ok(challenge_id.clone()),
            _ => Err(unexpected("otp_challenge", &envelope)),
        }
    }

    /// Answer an OTP challenge
    pub async fn submit_otp(
        &self,
        session: &Session,
        challenge_id: ChallengeId,
        code: &str,
    ) -> Result<()> {
        self.send(
            session,
            &session.participants.provider,
            EnvelopePayload::Control(ControlPayload::OtpSubmit {
                challenge_id,
                code: code.to_string(),
            }),
        )
        .await?;
        Ok(())
    }

    /// Wait for the capture receipt
    pub async fn receive_receipt(&self, session: &Session) -> Result<CaptureReceipt> {
        let envelope = self.recv(session).await?;
        match envelope.control() {
            Some(ControlPayload::CaptureCompleted { receipt }) => Ok(receipt.clone()),
            _ => Err(unexpected("capture_completed", &envelope)),
        }
    }

    /// Walk away from the purchase
    pub async fn abort(&self, session: &Session, reason: &str) -> Result<()> {
        let envelope = self
            .send(
                session,
                &session.participants.merchant,
                EnvelopePayload::Control(ControlPayload::Abort {
                    reason: reason.to_string(),
                }),
            )
            .await?;
        let result = self
            .engine
            .apply(
                &session.session_id,
                Some(envelope.message_id),
                ProtocolEvent::Abort {
                    reason: reason.to_string(),
                },
            )
            .await;
        match result {
            Err(MandateError::Aborted { .. }) => Ok(()),
            Err(other) => Err(other.into()),
            Ok(_) => Ok(()),
        }
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

fn unexpected(expected: &str, envelope: &Envelope) -> AgentError {
    AgentError::UnexpectedMessage {
        expected: expected.to_string(),
        got: envelope.payload.name().to_string(),
    }
}
