//! Credentials Provider Agent - tokens, OTP, authorization, capture
//!
//! The provider flow:
//! 1. Mints single-session payment credential tokens against the user
//!    directory
//! 2. Receives the payment mandate, challenges the shopper with an OTP
//! 3. Authorizes (OTP + risk) and countersigns the payment mandate
//! 4. Captures the authorized amount and acknowledges settlement

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use openmandate_bus::MessageBus;
use openmandate_crypto::SignatureService;
use openmandate_payments::{Authorization, OtpService, PaymentAuthorizer};
use openmandate_protocol::{ProtocolEngine, ProtocolEvent};
use openmandate_store::AuditTrail;
use openmandate_types::{
    AgentId, CaptureReceipt, ChallengeId, ControlPayload, Envelope, EnvelopePayload, Mandate,
    MandateError, PaymentToken, Session, UserId,
};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::info;

use crate::{AgentError, Result, UserDirectory};

/// The Credentials Provider Agent
pub struct CredentialsProviderAgent {
    id: AgentId,
    bus: Arc<MessageBus>,
    engine: Arc<ProtocolEngine>,
    signatures: SignatureService,
    directory: UserDirectory,
    otp: OtpService,
    authorizer: PaymentAuthorizer,
    audit: Arc<dyn AuditTrail>,
    /// Captures this provider has processed, newest last
    history: Mutex<Vec<CaptureReceipt>>,
}

impl CredentialsProviderAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: AgentId,
        bus: Arc<MessageBus>,
        engine: Arc<ProtocolEngine>,
        signatures: SignatureService,
        directory: UserDirectory,
        otp: OtpService,
        authorizer: PaymentAuthorizer,
        audit: Arc<dyn AuditTrail>,
    ) -> Self {
        Self {
            id,
            bus,
            engine,
            signatures,
            directory,
            otp,
            authorizer,
            audit,
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    /// Answer the next token request with a minted payment credential token
    pub async fn issue_token(&self, session: &Session) -> Result<PaymentToken> {
        let envelope = self.recv(session).await?;
        let Some(ControlPayload::TokenRequest {
            user_id,
            payment_method_id,
        }) = envelope.control()
        else {
            return Err(unexpected("token_request", &envelope));
        };
        let method = self.directory.payment_method(user_id, payment_method_id)?;
        if !method.verified {
            return Err(MandateError::validation(
                "payment_method",
                "method is not verified",
            )
            .into());
        }
        let token = mint_token(user_id, payment_method_id, Utc::now());
        info!(
            session = %session.session_id,
            payment_method = payment_method_id,
            "payment credential token issued"
        );
        let reply = self
            .send(
                session,
                &envelope.sender_agent,
                EnvelopePayload::Control(ControlPayload::TokenIssued {
                    token: token.clone(),
                }),
            )
            .await?;
        self.engine
            .apply(
                &session.session_id,
                Some(reply.message_id),
                ProtocolEvent::TokenIssued {
                    requested_by: envelope.sender_agent.clone(),
                    token: token.clone(),
                },
            )
            .await?;
        Ok(token)
    }

    /// Receive a payment mandate envelope from the shopper
    pub async fn receive_payment_mandate(&self, session: &Session) -> Result<Mandate> {
        let envelope = self.recv(session).await?;
        match envelope.mandate() {
            Some(mandate) if mandate.as_payment().is_some() => Ok(mandate.clone()),
            _ => Err(unexpected("payment mandate", &envelope)),
        }
    }

    /// Challenge the shopper with an OTP, modelling a code sent to the
    /// phone on file
    pub async fn challenge_otp(&self, session: &Session) -> Result<ChallengeId> {
        let challenge = self.otp.issue(session.session_id.clone()).await;
        self.send(
            session,
            &session.participants.shopper,
            EnvelopePayload::Control(ControlPayload::OtpChallenge {
                challenge_id: challenge.challenge_id.clone(),
            }),
        )
        .await?;
        Ok(challenge.challenge_id)
    }

    /// Consume the shopper's OTP answer, evaluate risk, countersign the
    /// payment mandate and submit the authorization to the engine
    pub async fn authorize(&self, session: &Session, mandate: Mandate) -> Result<Authorization> {
        let envelope = self.recv(session).await?;
        let Some(ControlPayload::OtpSubmit { challenge_id, code }) = envelope.control() else {
            return Err(unexpected("otp_submit", &envelope));
        };
        let payment = mandate
            .as_payment()
            .ok_or_else(|| MandateError::validation("mandate", "not a payment mandate"))?;
        let history = self.audit.query(&session.session_id).await;
        let authorization = self
            .authorizer
            .evaluate(
                &self.otp,
                session.session_id.clone(),
                payment.amount,
                payment.currency,
                challenge_id,
                code,
                &history,
            )
            .await;

        let countersignature = self.signatures.sign_mandate(&mandate, &self.id)?;
        let countersigned = mandate.with_countersignature(countersignature)?;
        self.engine
            .apply(
                &session.session_id,
                Some(envelope.message_id.clone()),
                ProtocolEvent::ProviderAuthorized {
                    mandate: countersigned,
                    authorization: authorization.clone(),
                },
            )
            .await?;
        info!(
            session = %session.session_id,
            auth_code = %authorization.auth_code,
            risk = authorization.risk_score,
            "payment authorized"
        );
        Ok(authorization)
    }

    /// Capture the authorized amount and report the receipt to the shopper
    pub async fn capture(
        &self,
        session: &Session,
        authorization: &Authorization,
    ) -> Result<CaptureReceipt> {
        let receipt = self.authorizer.capture(authorization, authorization.amount)?;
        let envelope = self
            .send(
                session,
                &session.participants.shopper,
                EnvelopePayload::Control(ControlPayload::CaptureCompleted {
                    receipt: receipt.clone(),
                }),
            )
            .await?;
        self.engine
            .apply(
                &session.session_id,
                Some(envelope.message_id),
                ProtocolEvent::CaptureExecuted {
                    receipt: receipt.clone(),
                },
            )
            .await?;
        self.history.lock().await.push(receipt.clone());
        info!(
            session = %session.session_id,
            transaction = %receipt.transaction_id,
            amount = %receipt.amount,
            "payment captured"
        );
        Ok(receipt)
    }

    /// Acknowledge settlement, closing the session, and notify the merchant
    pub async fn settle(&self, session: &Session, receipt: &CaptureReceipt) -> Result<()> {
        let envelope = self
            .send(
                session,
                &session.participants.merchant,
                EnvelopePayload::Control(ControlPayload::SettlementAck {
                    transaction_id: receipt.transaction_id.clone(),
                }),
            )
            .await?;
        self.engine
            .apply(
                &session.session_id,
                Some(envelope.message_id),
                ProtocolEvent::SettlementAcknowledged,
            )
            .await?;
        info!(
            session = %session.session_id,
            settlement_date = %receipt.settlement_date,
            "settlement acknowledged"
        );
        Ok(())
    }

    /// Captures processed by this provider, oldest first
    pub async fn transaction_history(&self) -> Vec<CaptureReceipt> {
        self.history.lock().await.clone()
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

/// Opaque token derived from the method, the user and the minting instant
fn mint_token(user_id: &UserId, payment_method_id: &str, now: DateTime<Utc>) -> PaymentToken {
    let mut hasher = Sha256::new();
    hasher.update(format!("{payment_method_id}:{user_id}:{now}").as_bytes());
    let digest = hex::encode(hasher.finalize());
    PaymentToken {
        token: format!("cred_token_{}", &digest[..32]),
        payment_method_id: payment_method_id.to_string(),
        issued_at: now,
        expires_at: now + Duration::hours(1),
    }
}

fn unexpected(expected: &str, envelope: &Envelope) -> AgentError {
    AgentError::UnexpectedMessage {
        expected: expected.to_string(),
        got: envelope.payload.name().to_string(),
    }
}
