//! OpenMandate Demo - the scripted 13-step purchase
//!
//! Wires the three agents over one bus and one engine and drives a complete
//! purchase: intent, product query, signed cart, acceptance, token, payment
//! mandate, device signature, OTP, authorization, capture, settlement and
//! fulfillment. A run always yields a report; session-scoped failures show
//! up as a FAILED final state with the failure reason, never as a panic.

use std::sync::Arc;

use chrono::Duration;
use openmandate_agents::{
    AgentError, Catalog, CredentialsProviderAgent, FulfillmentOrder, MerchantAgent, ShopperAgent,
    UserDirectory,
};
use openmandate_bus::MessageBus;
use openmandate_crypto::{InMemoryKeyStore, SignatureService};
use openmandate_payments::{
    AuthorizationPolicy, OtpService, PaymentAuthorizer, StaticCode, WeightedRiskScorer,
};
use openmandate_protocol::ProtocolEngine;
use openmandate_store::{AuditRecord, AuditTrail, InMemoryAuditTrail, InMemoryMandateStore};
use openmandate_types::{
    AgentId, Amount, CaptureReceipt, IntentConstraints, IntentRequest, MerchantId, Participants,
    Session, SessionId, SessionState, SessionStatus, Sku, UserId,
};
use tracing::{info, warn};

/// What a demo run should buy
#[derive(Debug, Clone)]
pub struct PurchaseRequest {
    pub user_id: UserId,
    pub item_description: String,
    pub price_ceiling: Amount,
    pub sku: Sku,
    pub quantity: u32,
    pub payment_method_id: String,
    pub otp_code: String,
}

impl PurchaseRequest {
    /// The canonical demo purchase: a student laptop under a $1000 ceiling
    pub fn demo() -> Self {
        Self {
            user_id: UserId::new("user_bugs_bunny"),
            item_description: "a laptop for school".to_string(),
            price_ceiling: Amount::from_cents(100_000),
            sku: Sku::new("laptop_003"),
            quantity: 1,
            payment_method_id: "pm_amex_8888".to_string(),
            otp_code: "123".to_string(),
        }
    }
}

/// What happened in one run
#[derive(Debug, Clone)]
pub struct FlowReport {
    pub session_id: SessionId,
    pub final_state: SessionState,
    pub audit_records: Vec<AuditRecord>,
    pub chain_verified: bool,
    pub captured: Option<CaptureReceipt>,
    pub fulfillment: Option<FulfillmentOrder>,
    pub failure: Option<String>,
}

/// The wired-up three-party purchase flow
pub struct PurchaseFlow {
    engine: Arc<ProtocolEngine>,
    audit: Arc<InMemoryAuditTrail>,
    participants: Participants,
    shopper: ShopperAgent,
    merchant: MerchantAgent,
    provider: CredentialsProviderAgent,
}

impl PurchaseFlow {
    /// Wire the flow with seeded catalog, users and the demo OTP source
    pub async fn new() -> Self {
        let participants = Participants::new(
            AgentId::new("shopper_agent"),
            AgentId::new("merchant_agent"),
            AgentId::new("credentials_provider"),
        );

        let keystore = Arc::new(InMemoryKeyStore::new());
        keystore.generate(participants.shopper.clone());
        keystore.generate(participants.merchant.clone());
        keystore.generate(participants.provider.clone());
        let signatures = SignatureService::new(keystore);

        let mandates = Arc::new(InMemoryMandateStore::new());
        let audit = Arc::new(InMemoryAuditTrail::new());
        let engine = Arc::new(ProtocolEngine::new(
            mandates,
            audit.clone(),
            signatures.clone(),
        ));

        let bus = Arc::new(MessageBus::new());
        bus.register(participants.shopper.clone()).await;
        bus.register(participants.merchant.clone()).await;
        bus.register(participants.provider.clone()).await;

        let shopper = ShopperAgent::new(
            participants.shopper.clone(),
            UserId::new("user_bugs_bunny"),
            bus.clone(),
            engine.clone(),
            signatures.clone(),
        );
        let merchant = MerchantAgent::new(
            participants.merchant.clone(),
            MerchantId::new("generic_merchant"),
            bus.clone(),
            engine.clone(),
            signatures.clone(),
            Catalog::seeded(),
        );
        let provider = CredentialsProviderAgent::new(
            participants.provider.clone(),
            bus,
            engine.clone(),
            signatures,
            UserDirectory::seeded(),
            OtpService::new(Box::new(StaticCode::demo())),
            PaymentAuthorizer::new(
                Box::new(WeightedRiskScorer::default()),
                AuthorizationPolicy::default(),
            ),
            audit.clone(),
        );

        Self {
            engine,
            audit,
            participants,
            shopper,
            merchant,
            provider,
        }
    }

    pub fn participants(&self) -> &Participants {
        &self.participants
    }

    /// Run one purchase end to end. Session-scoped failures come back in
    /// the report, not as an error.
    pub async fn run(&self, request: PurchaseRequest) -> FlowReport {
        let session = self.engine.open_session(self.participants.clone()).await;
        info!(session = %session.session_id, sku = %request.sku, "purchase flow started");

        let outcome = self.drive(&session, &request).await;
        if let Err(err) = &outcome {
            warn!(session = %session.session_id, error = %err, "purchase flow stopped");
        }
        let (captured, fulfillment) = outcome.unwrap_or((None, None));
        self.report(&session, captured, fulfillment).await
    }

    async fn drive(
        &self,
        session: &Session,
        request: &PurchaseRequest,
    ) -> Result<(Option<CaptureReceipt>, Option<FulfillmentOrder>), AgentError> {
        // 1-2: intent
        let intent = self
            .shopper
            .create_intent(
                session,
                IntentRequest {
                    user_id: request.user_id.clone(),
                    item_description: request.item_description.clone(),
                    constraints: IntentConstraints::ceiling(request.price_ceiling),
                },
                Duration::hours(12),
            )
            .await?;

        // 3: product discovery
        self.shopper
            .request_products(session, &request.item_description, Some("electronics"), 10)
            .await?;
        self.merchant.handle_product_query(session).await?;
        let offers = self.shopper.receive_products(session).await?;
        info!(offers = offers.len(), "products quoted");

        // 4: cart proposal
        self.shopper
            .request_cart(session, request.sku.clone(), request.quantity)
            .await?;
        self.merchant.propose_cart(session).await?;
        let cart = self.shopper.receive_cart(session).await?;

        // 5-6: evaluation and acceptance; a rejected cart is a clean
        // walk-away, aborting the session
        match self.shopper.evaluate_cart(session, &intent, &cart) {
            Ok(()) => {}
            Err(AgentError::CartRejected { reason }) => {
                self.shopper.abort(session, &reason).await?;
                return Ok((None, None));
            }
            Err(other) => return Err(other),
        }
        self.shopper.accept_cart(session, &cart).await?;
        self.merchant.confirm_acceptance(session).await?;

        // 7: payment credential token
        self.shopper
            .request_token(session, &request.payment_method_id)
            .await?;
        self.provider.issue_token(session).await?;
        let token = self.shopper.receive_token(session).await?;

        // 8-9: payment mandate, device signature
        let payment = self
            .shopper
            .create_payment_mandate(session, &cart, token, Duration::hours(1))
            .await?;
        self.provider.receive_payment_mandate(session).await?;
        self.shopper.sign_on_device(session, payment).await?;
        // The provider authorizes from its own received copy
        let signed = self.provider.receive_payment_mandate(session).await?;

        // 10: OTP challenge and answer
        self.provider.challenge_otp(session).await?;
        let challenge_id = self.shopper.receive_otp_challenge(session).await?;
        self.shopper
            .submit_otp(session, challenge_id, &request.otp_code)
            .await?;

        // 11: authorization with countersignature
        let authorization = self.provider.authorize(session, signed).await?;

        // 12: capture
        let receipt = self.provider.capture(session, &authorization).await?;
        self.shopper.receive_receipt(session).await?;

        // 13: settlement and fulfillment
        self.provider.settle(session, &receipt).await?;
        let fulfillment = self.merchant.fulfill_order(session).await?;

        Ok((Some(receipt), Some(fulfillment)))
    }

    async fn report(
        &self,
        session: &Session,
        captured: Option<CaptureReceipt>,
        fulfillment: Option<FulfillmentOrder>,
    ) -> FlowReport {
        let status = self
            .engine
            .status(&session.session_id)
            .await
            .unwrap_or_else(|_| SessionStatus {
                session_id: session.session_id.clone(),
                state: session.state,
                mandate_chain: session.mandate_chain.clone(),
                failure: None,
            });
        FlowReport {
            session_id: session.session_id.clone(),
            final_state: status.state,
            audit_records: self.audit.query(&session.session_id).await,
            chain_verified: self.audit.verify_chain(&session.session_id).await,
            captured,
            fulfillment,
            failure: status.failure,
        }
    }
}
