//! Protocol engine
//!
//! Owns the session registry and drives every transition through the same
//! path: guard, mutate, audit, in that order, under the session's lock.
//! Illegal (state, event) pairs are protocol violations and leave the
//! session untouched; guard failures inside a legal pair fail the session
//! and are themselves audited.

use crate::event::ProtocolEvent;
use chrono::{Duration, Utc};
use openmandate_crypto::SignatureService;
use openmandate_payments::Authorization;
use openmandate_store::{
    AuditOutcome, AuditRecord, AuditSubject, AuditTrail, MandateStore, NewAuditRecord,
};
use openmandate_types::{
    AgentId, CaptureReceipt, Mandate, MandateError, MandateId, MessageId, Participants,
    PaymentToken, Result, Session, SessionId, SessionState, SessionStatus,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// Engine tuning knobs
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Risk scores at or above this fail authorization
    pub risk_threshold: f64,
    /// How long a session stays live after opening
    pub session_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            risk_threshold: 0.7,
            session_ttl: Duration::hours(24),
        }
    }
}

/// Outcome of applying an event
#[derive(Debug, Clone)]
pub enum Transition {
    /// The event advanced the session
    Accepted {
        from: SessionState,
        to: SessionState,
        record: AuditRecord,
    },
    /// Replay of an already-processed mandate or message; ignored
    Duplicate,
}

impl Transition {
    /// The state the session reached, if the event advanced it
    pub fn new_state(&self) -> Option<SessionState> {
        match self {
            Self::Accepted { to, .. } => Some(*to),
            Self::Duplicate => None,
        }
    }
}

/// The mandate protocol state machine
pub struct ProtocolEngine {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<Session>>>>,
    mandates: Arc<dyn MandateStore>,
    audit: Arc<dyn AuditTrail>,
    signatures: SignatureService,
    config: EngineConfig,
}

impl ProtocolEngine {
    /// Engine with default configuration
    pub fn new(
        mandates: Arc<dyn MandateStore>,
        audit: Arc<dyn AuditTrail>,
        signatures: SignatureService,
    ) -> Self {
        Self::with_config(mandates, audit, signatures, EngineConfig::default())
    }

    /// Engine with explicit configuration
    pub fn with_config(
        mandates: Arc<dyn MandateStore>,
        audit: Arc<dyn AuditTrail>,
        signatures: SignatureService,
        config: EngineConfig,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            mandates,
            audit,
            signatures,
            config,
        }
    }

    /// Open a session in OPENED state and return a snapshot of it
    pub async fn open_session(&self, participants: Participants) -> Session {
        let session = Session::open(participants, Utc::now() + self.config.session_ttl);
        info!(session = %session.session_id, "session opened");
        self.sessions.write().await.insert(
            session.session_id.clone(),
            Arc::new(Mutex::new(session.clone())),
        );
        session
    }

    /// Current status of a session
    pub async fn status(&self, session_id: &SessionId) -> Result<SessionStatus> {
        let session = self.snapshot(session_id).await?;
        Ok(SessionStatus {
            session_id: session.session_id,
            state: session.state,
            mandate_chain: session.mandate_chain,
            failure: session.failure,
        })
    }

    /// Snapshot of the full session record
    pub async fn snapshot(&self, session_id: &SessionId) -> Result<Session> {
        let handle = self.handle(session_id).await?;
        let session = handle.lock().await;
        Ok(session.clone())
    }

    /// Apply an event to a session.
    ///
    /// Replayed mandates and messages come back `Duplicate` without a second
    /// audit record. An event that is not legal in the current state returns
    /// `ProtocolViolation` and leaves the session untouched. A guard failure
    /// inside a legal pair appends a rejected audit record, moves the session
    /// to FAILED and returns the failure.
    pub async fn apply(
        &self,
        session_id: &SessionId,
        source_message: Option<MessageId>,
        event: ProtocolEvent,
    ) -> Result<Transition> {
        let handle = self.handle(session_id).await?;
        let mut session = handle.lock().await;

        // Replay detection before anything else: a duplicate is ignored even
        // once the session is terminal.
        if let Some(mandate_id) = event.new_mandate_id() {
            if session.has_mandate(mandate_id) {
                info!(session = %session_id, mandate = %mandate_id, "replayed mandate ignored");
                return Ok(Transition::Duplicate);
            }
        }
        if let Some(message_id) = &source_message {
            if session.has_message(message_id) {
                info!(session = %session_id, message = %message_id, "replayed message ignored");
                return Ok(Transition::Duplicate);
            }
        }

        if session.state.is_terminal() {
            return Err(violation(&session, &event));
        }

        let now = Utc::now();
        if session.is_expired(now) {
            let err = MandateError::Expired {
                subject: session.session_id.to_string(),
                expired_at: session.expires_at.to_rfc3339(),
            };
            return Err(self
                .fail(&mut session, source_message, AuditSubject::Session, err)
                .await);
        }

        match (session.state, event) {
            (SessionState::Opened, ProtocolEvent::IntentReceived { mandate }) => {
                self.intent_received(&mut session, source_message, mandate)
                    .await
            }
            (SessionState::IntentCreated, ProtocolEvent::CartReceived { mandate }) => {
                self.cart_received(&mut session, source_message, mandate)
                    .await
            }
            (
                SessionState::CartProposed,
                ProtocolEvent::CartAccepted {
                    cart_ref,
                    accepted_by,
                },
            ) => {
                self.cart_accepted(&mut session, source_message, cart_ref, accepted_by)
                    .await
            }
            (
                SessionState::CartAccepted,
                ProtocolEvent::TokenIssued {
                    requested_by,
                    token,
                },
            ) => {
                self.token_issued(&mut session, source_message, requested_by, token)
                    .await
            }
            (SessionState::PaymentTokenIssued, ProtocolEvent::PaymentCreated { mandate }) => {
                self.payment_created(&mut session, source_message, mandate)
                    .await
            }
            (SessionState::PaymentMandateCreated, ProtocolEvent::DeviceSigned { mandate }) => {
                self.device_signed(&mut session, source_message, mandate)
                    .await
            }
            (
                SessionState::PaymentSigned,
                ProtocolEvent::ProviderAuthorized {
                    mandate,
                    authorization,
                },
            ) => {
                self.provider_authorized(&mut session, source_message, mandate, authorization)
                    .await
            }
            (SessionState::Authorized, ProtocolEvent::CaptureExecuted { receipt }) => {
                self.capture_executed(&mut session, source_message, receipt)
                    .await
            }
            (SessionState::Captured, ProtocolEvent::SettlementAcknowledged) => Ok(self
                .accept(
                    &mut session,
                    source_message,
                    AuditSubject::Session,
                    SessionState::Closed,
                )
                .await),
            (_, ProtocolEvent::Abort { reason }) => {
                let err = MandateError::Aborted { reason };
                Err(self
                    .fail(&mut session, source_message, AuditSubject::Session, err)
                    .await)
            }
            (_, event) => Err(violation(&session, &event)),
        }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    async fn intent_received(
        &self,
        session: &mut Session,
        source: Option<MessageId>,
        mandate: Mandate,
    ) -> Result<Transition> {
        let Some(_) = mandate.as_intent() else {
            return Err(MandateError::validation("mandate", "expected an intent mandate"));
        };
        let subject = AuditSubject::Mandate {
            mandate_id: mandate.mandate_id.clone(),
        };
        if mandate.is_expired(Utc::now()) {
            let err = expired(&mandate);
            return Err(self.fail(session, source, subject, err).await);
        }
        let mandate_id = mandate.mandate_id.clone();
        self.mandates.insert(&session.session_id, mandate).await?;
        session.mandate_chain.push(mandate_id.clone());
        session.context.intent = Some(mandate_id);
        Ok(self
            .accept(session, source, subject, SessionState::IntentCreated)
            .await)
    }

    async fn cart_received(
        &self,
        session: &mut Session,
        source: Option<MessageId>,
        mandate: Mandate,
    ) -> Result<Transition> {
        let Some(cart) = mandate.as_cart() else {
            return Err(MandateError::validation("mandate", "expected a cart mandate"));
        };
        let subject = AuditSubject::Mandate {
            mandate_id: mandate.mandate_id.clone(),
        };
        if mandate.is_expired(Utc::now()) {
            let err = expired(&mandate);
            return Err(self.fail(session, source, subject, err).await);
        }
        let intent_id = self.context_intent(session)?;
        if cart.intent_ref != intent_id {
            let err = MandateError::constraint("cart does not reference the session's intent");
            return Err(self.fail(session, source, subject, err).await);
        }
        let intent = self.mandates.get(&intent_id).await?;
        let constraints = intent
            .as_intent()
            .map(|p| p.constraints.clone())
            .ok_or_else(|| MandateError::validation("intent", "stored mandate is not an intent"))?;
        if !constraints.merchants.allows(&cart.merchant_id) {
            let err = MandateError::constraint(format!(
                "merchant {} is not allowed by the intent",
                cart.merchant_id
            ));
            return Err(self.fail(session, source, subject, err).await);
        }
        if !self
            .signatures
            .verify_mandate(&mandate, &session.participants.merchant)
        {
            let err = MandateError::SignatureMismatch {
                signer: session.participants.merchant.to_string(),
                reason: "cart mandate signature did not verify".to_string(),
            };
            return Err(self.fail(session, source, subject, err).await);
        }
        let mandate_id = mandate.mandate_id.clone();
        self.mandates.insert(&session.session_id, mandate).await?;
        session.mandate_chain.push(mandate_id.clone());
        session.context.cart = Some(mandate_id);
        Ok(self
            .accept(session, source, subject, SessionState::CartProposed)
            .await)
    }

    async fn cart_accepted(
        &self,
        session: &mut Session,
        source: Option<MessageId>,
        cart_ref: MandateId,
        accepted_by: AgentId,
    ) -> Result<Transition> {
        let subject = AuditSubject::Mandate {
            mandate_id: cart_ref.clone(),
        };
        if accepted_by != session.participants.shopper {
            let err = MandateError::constraint("only the shopper may accept the cart");
            return Err(self.fail(session, source, subject, err).await);
        }
        if session.context.cart.as_ref() != Some(&cart_ref) {
            let err = MandateError::constraint("acceptance does not reference the proposed cart");
            return Err(self.fail(session, source, subject, err).await);
        }
        let cart_mandate = self.mandates.get(&cart_ref).await?;
        if cart_mandate.is_expired(Utc::now()) {
            let err = expired(&cart_mandate);
            return Err(self.fail(session, source, subject, err).await);
        }
        let cart = cart_mandate
            .as_cart()
            .ok_or_else(|| MandateError::validation("cart", "stored mandate is not a cart"))?;
        let intent_id = self.context_intent(session)?;
        let intent = self.mandates.get(&intent_id).await?;
        let constraints = intent
            .as_intent()
            .map(|p| p.constraints.clone())
            .ok_or_else(|| MandateError::validation("intent", "stored mandate is not an intent"))?;
        let total = cart.total;
        let ceiling = constraints.price_ceiling;
        if total > ceiling {
            let err = MandateError::constraint(format!(
                "cart total {total} exceeds the intent price ceiling {ceiling}"
            ));
            return Err(self.fail(session, source, subject, err).await);
        }
        if let Some(category) = &constraints.category {
            if let Some(item) = cart
                .line_items
                .iter()
                .find(|item| !item.category.eq_ignore_ascii_case(category))
            {
                let err = MandateError::constraint(format!(
                    "cart item {} is outside the intent category {category}",
                    item.sku
                ));
                return Err(self.fail(session, source, subject, err).await);
            }
        }
        Ok(self
            .accept(session, source, subject, SessionState::CartAccepted)
            .await)
    }

    async fn token_issued(
        &self,
        session: &mut Session,
        source: Option<MessageId>,
        requested_by: AgentId,
        token: PaymentToken,
    ) -> Result<Transition> {
        let subject = audit_subject(&source);
        if requested_by != session.participants.shopper {
            let err = MandateError::constraint("only the shopper may request a payment token");
            return Err(self.fail(session, source, subject, err).await);
        }
        if token.is_expired(Utc::now()) {
            let err = MandateError::Expired {
                subject: format!("payment token for {}", token.payment_method_id),
                expired_at: token.expires_at.to_rfc3339(),
            };
            return Err(self.fail(session, source, subject, err).await);
        }
        session.context.token = Some(token);
        Ok(self
            .accept(session, source, subject, SessionState::PaymentTokenIssued)
            .await)
    }

    async fn payment_created(
        &self,
        session: &mut Session,
        source: Option<MessageId>,
        mandate: Mandate,
    ) -> Result<Transition> {
        let Some(payment) = mandate.as_payment() else {
            return Err(MandateError::validation("mandate", "expected a payment mandate"));
        };
        let subject = AuditSubject::Mandate {
            mandate_id: mandate.mandate_id.clone(),
        };
        if mandate.is_expired(Utc::now()) {
            let err = expired(&mandate);
            return Err(self.fail(session, source, subject, err).await);
        }
        if session.context.cart.as_ref() != Some(&payment.cart_ref) {
            let err = MandateError::constraint("payment does not reference the accepted cart");
            return Err(self.fail(session, source, subject, err).await);
        }
        let cart_mandate = self.mandates.get(&payment.cart_ref).await?;
        let total = cart_mandate
            .as_cart()
            .map(|c| c.total)
            .ok_or_else(|| MandateError::validation("cart", "stored mandate is not a cart"))?;
        if payment.amount != total {
            let err = MandateError::constraint(format!(
                "payment amount {} does not match the cart total {total}",
                payment.amount
            ));
            return Err(self.fail(session, source, subject, err).await);
        }
        let token_matches = session
            .context
            .token
            .as_ref()
            .map(|t| t.token == payment.payment_token.token)
            .unwrap_or(false);
        if !token_matches {
            let err = MandateError::constraint("payment does not carry the issued token");
            return Err(self.fail(session, source, subject, err).await);
        }
        let mandate_id = mandate.mandate_id.clone();
        self.mandates.insert(&session.session_id, mandate).await?;
        session.mandate_chain.push(mandate_id.clone());
        session.context.payment = Some(mandate_id);
        Ok(self
            .accept(session, source, subject, SessionState::PaymentMandateCreated)
            .await)
    }

    async fn device_signed(
        &self,
        session: &mut Session,
        source: Option<MessageId>,
        mandate: Mandate,
    ) -> Result<Transition> {
        let subject = AuditSubject::Mandate {
            mandate_id: mandate.mandate_id.clone(),
        };
        if session.context.payment.as_ref() != Some(&mandate.mandate_id) {
            let err = MandateError::constraint("signature is not over the session's payment mandate");
            return Err(self.fail(session, source, subject, err).await);
        }
        if !self
            .signatures
            .verify_mandate(&mandate, &session.participants.shopper)
        {
            let err = MandateError::SignatureMismatch {
                signer: session.participants.shopper.to_string(),
                reason: "payment mandate signature did not verify".to_string(),
            };
            return Err(self.fail(session, source, subject, err).await);
        }
        if let Err(err) = self.mandates.attach_signatures(&mandate).await {
            if err.fails_session() {
                return Err(self.fail(session, source, subject, err).await);
            }
            return Err(err);
        }
        Ok(self
            .accept(session, source, subject, SessionState::PaymentSigned)
            .await)
    }

    async fn provider_authorized(
        &self,
        session: &mut Session,
        source: Option<MessageId>,
        mandate: Mandate,
        authorization: Authorization,
    ) -> Result<Transition> {
        let subject = AuditSubject::Mandate {
            mandate_id: mandate.mandate_id.clone(),
        };
        if session.context.payment.as_ref() != Some(&mandate.mandate_id) {
            let err = MandateError::constraint(
                "authorization is not over the session's payment mandate",
            );
            return Err(self.fail(session, source, subject, err).await);
        }
        if !authorization.otp_verified {
            let err = MandateError::OtpRejected {
                challenge_id: authorization.challenge_id.to_string(),
            };
            return Err(self.fail(session, source, subject, err).await);
        }
        if authorization.risk_score >= self.config.risk_threshold {
            let err = MandateError::RiskExceeded {
                score: authorization.risk_score,
                threshold: self.config.risk_threshold,
            };
            return Err(self.fail(session, source, subject, err).await);
        }
        let payment_amount = mandate
            .as_payment()
            .map(|p| p.amount)
            .ok_or_else(|| MandateError::validation("mandate", "expected a payment mandate"))?;
        if authorization.amount != payment_amount {
            let err = MandateError::constraint(format!(
                "authorized amount {} does not match the payment amount {payment_amount}",
                authorization.amount
            ));
            return Err(self.fail(session, source, subject, err).await);
        }
        if !self
            .signatures
            .verify_countersignature(&mandate, &session.participants.provider)
        {
            let err = MandateError::SignatureMismatch {
                signer: session.participants.provider.to_string(),
                reason: "payment mandate countersignature did not verify".to_string(),
            };
            return Err(self.fail(session, source, subject, err).await);
        }
        if let Err(err) = self.mandates.attach_signatures(&mandate).await {
            if err.fails_session() {
                return Err(self.fail(session, source, subject, err).await);
            }
            return Err(err);
        }
        session.context.authorized_amount = Some(authorization.amount);
        Ok(self
            .accept(session, source, subject, SessionState::Authorized)
            .await)
    }

    async fn capture_executed(
        &self,
        session: &mut Session,
        source: Option<MessageId>,
        receipt: CaptureReceipt,
    ) -> Result<Transition> {
        let subject = audit_subject(&source);
        let authorized = session
            .context
            .authorized_amount
            .ok_or_else(|| MandateError::validation("session", "no authorized amount on record"))?;
        if receipt.amount != authorized {
            let err = MandateError::CaptureMismatch {
                authorized: authorized.to_string(),
                requested: receipt.amount.to_string(),
            };
            return Err(self.fail(session, source, subject, err).await);
        }
        Ok(self
            .accept(session, source, subject, SessionState::Captured)
            .await)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn handle(&self, session_id: &SessionId) -> Result<Arc<Mutex<Session>>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| MandateError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    fn context_intent(&self, session: &Session) -> Result<MandateId> {
        session
            .context
            .intent
            .clone()
            .ok_or_else(|| MandateError::validation("session", "no intent on record"))
    }

    /// Record the source message, mutate the state and append the accepted
    /// audit record, all under the caller's session lock
    async fn accept(
        &self,
        session: &mut Session,
        source: Option<MessageId>,
        subject: AuditSubject,
        to: SessionState,
    ) -> Transition {
        if let Some(message_id) = source {
            session.message_log.push(message_id);
        }
        let from = session.state;
        session.state = to;
        info!(session = %session.session_id, %from, %to, "transition accepted");
        let record = self
            .audit
            .record(NewAuditRecord {
                session_id: session.session_id.clone(),
                subject,
                outcome: AuditOutcome::Accepted { from, to },
            })
            .await;
        Transition::Accepted { from, to, record }
    }

    /// A guard failure inside a legal transition: audit the rejection, park
    /// the session in FAILED and hand the failure back to the caller
    async fn fail(
        &self,
        session: &mut Session,
        source: Option<MessageId>,
        subject: AuditSubject,
        err: MandateError,
    ) -> MandateError {
        if let Some(message_id) = source {
            session.message_log.push(message_id);
        }
        warn!(
            session = %session.session_id,
            state = %session.state,
            reason = err.failure_reason(),
            "guard failed, session moves to FAILED"
        );
        session.state = SessionState::Failed;
        session.failure = Some(err.to_string());
        self.audit
            .record(NewAuditRecord {
                session_id: session.session_id.clone(),
                subject,
                outcome: AuditOutcome::Rejected {
                    reason: err.failure_reason().to_string(),
                },
            })
            .await;
        err
    }
}

fn violation(session: &Session, event: &ProtocolEvent) -> MandateError {
    MandateError::ProtocolViolation {
        state: session.state.name().to_string(),
        event: event.name().to_string(),
    }
}

fn expired(mandate: &Mandate) -> MandateError {
    MandateError::Expired {
        subject: mandate.mandate_id.to_string(),
        expired_at: mandate.expires_at.to_rfc3339(),
    }
}

fn audit_subject(source: &Option<MessageId>) -> AuditSubject {
    match source {
        Some(message_id) => AuditSubject::Message {
            message_id: message_id.clone(),
        },
        None => AuditSubject::Session,
    }
}
