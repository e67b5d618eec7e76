//! Payment authorization and capture
//!
//! The authorizer evaluates an OTP answer and a risk score into an
//! `Authorization` the protocol engine can enforce its guards against, and
//! turns an authorization into a capture receipt when the amounts match
//! exactly.

use crate::{OtpService, RiskScorer};
use chrono::{Duration, Utc};
use openmandate_store::AuditRecord;
use openmandate_types::{
    Amount, CaptureId, CaptureReceipt, ChallengeId, Currency, MandateError, ReceiptId, Result,
    SessionId, TransactionId,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Authorization policy knobs
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AuthorizationPolicy {
    /// Scores at or above this fail authorization
    pub risk_threshold: f64,
    /// How long funds stay settleable after capture
    pub settlement_days: i64,
}

impl Default for AuthorizationPolicy {
    fn default() -> Self {
        Self {
            risk_threshold: 0.7,
            settlement_days: 2,
        }
    }
}

/// The provider's authorization decision inputs, as evaluated facts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Authorization {
    pub session_id: SessionId,
    pub challenge_id: ChallengeId,
    pub amount: Amount,
    pub currency: Currency,
    pub auth_code: String,
    pub risk_score: f64,
    pub otp_verified: bool,
    pub authorized_at: chrono::DateTime<Utc>,
}

/// Evaluates OTP answers and risk into authorizations, and captures them
pub struct PaymentAuthorizer {
    scorer: Box<dyn RiskScorer>,
    policy: AuthorizationPolicy,
}

impl PaymentAuthorizer {
    pub fn new(scorer: Box<dyn RiskScorer>, policy: AuthorizationPolicy) -> Self {
        Self { scorer, policy }
    }

    pub fn policy(&self) -> AuthorizationPolicy {
        self.policy
    }

    /// Evaluate an OTP answer and the session history into an authorization
    /// record. The record carries the facts; enforcement of the guards
    /// (OTP verified, risk below threshold) belongs to the protocol engine.
    pub async fn evaluate(
        &self,
        otp: &OtpService,
        session_id: SessionId,
        amount: Amount,
        currency: Currency,
        challenge_id: &ChallengeId,
        code: &str,
        history: &[AuditRecord],
    ) -> Authorization {
        let otp_verified = otp.verify(challenge_id, code).await;
        let risk_score = self.scorer.score(amount, history);
        info!(
            session = %session_id,
            otp_verified,
            risk_score,
            "authorization evaluated"
        );
        Authorization {
            session_id,
            challenge_id: challenge_id.clone(),
            amount,
            currency,
            auth_code: format!("AUTH{}", &Uuid::new_v4().simple().to_string()[..8].to_uppercase()),
            risk_score,
            otp_verified,
            authorized_at: Utc::now(),
        }
    }

    /// Strict authorization: evaluate and enforce the guards locally.
    /// Used where no engine sits between the caller and the decision.
    pub async fn authorize(
        &self,
        otp: &OtpService,
        session_id: SessionId,
        amount: Amount,
        currency: Currency,
        challenge_id: &ChallengeId,
        code: &str,
        history: &[AuditRecord],
    ) -> Result<Authorization> {
        let authorization = self
            .evaluate(otp, session_id, amount, currency, challenge_id, code, history)
            .await;
        if !authorization.otp_verified {
            return Err(MandateError::OtpRejected {
                challenge_id: challenge_id.to_string(),
            });
        }
        if authorization.risk_score >= self.policy.risk_threshold {
            return Err(MandateError::RiskExceeded {
                score: authorization.risk_score,
                threshold: self.policy.risk_threshold,
            });
        }
        Ok(authorization)
    }

    /// Capture an authorized amount. The requested amount must match the
    /// authorized amount exactly.
    pub fn capture(&self, authorization: &Authorization, amount: Amount) -> Result<CaptureReceipt> {
        if amount != authorization.amount {
            return Err(MandateError::CaptureMismatch {
                authorized: authorization.amount.to_string(),
                requested: amount.to_string(),
            });
        }
        let captured_at = Utc::now();
        Ok(CaptureReceipt {
            capture_id: CaptureId::new(),
            transaction_id: TransactionId::new(),
            receipt_id: ReceiptId::new(),
            amount,
            currency: authorization.currency,
            captured_at,
            settlement_date: (captured_at + Duration::days(self.policy.settlement_days))
                .date_naive(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RiskScorer, StaticCode, WeightedRiskScorer};
    use openmandate_store::AuditRecord;

    struct FixedScore(f64);

    impl RiskScorer for FixedScore {
        fn score(&self, _amount: Amount, _history: &[AuditRecord]) -> f64 {
            self.0
        }
    }

    fn authorizer() -> PaymentAuthorizer {
        PaymentAuthorizer::new(
            Box::new(WeightedRiskScorer::default()),
            AuthorizationPolicy::default(),
        )
    }

    fn otp() -> OtpService {
        OtpService::new(Box::new(StaticCode::demo()))
    }

    #[tokio::test]
    async fn test_authorize_happy_path() {
        let authorizer = authorizer();
        let otp = otp();
        let session = SessionId::new();
        let challenge = otp.issue(session.clone()).await;

        let authorization = authorizer
            .authorize(
                &otp,
                session,
                Amount::from_cents(78_900),
                Currency::USD,
                &challenge.challenge_id,
                "123",
                &[],
            )
            .await
            .unwrap();
        assert!(authorization.otp_verified);
        assert!(authorization.auth_code.starts_with("AUTH"));
    }

    #[tokio::test]
    async fn test_wrong_otp_rejected() {
        let authorizer = authorizer();
        let otp = otp();
        let session = SessionId::new();
        let challenge = otp.issue(session.clone()).await;

        let err = authorizer
            .authorize(
                &otp,
                session,
                Amount::from_cents(78_900),
                Currency::USD,
                &challenge.challenge_id,
                "999",
                &[],
            )
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "OTP_REJECTED");
    }

    #[tokio::test]
    async fn test_high_risk_rejected() {
        let authorizer = PaymentAuthorizer::new(
            Box::new(WeightedRiskScorer::default()),
            AuthorizationPolicy {
                risk_threshold: 0.05,
                settlement_days: 2,
            },
        );
        let otp = otp();
        let session = SessionId::new();
        let challenge = otp.issue(session.clone()).await;

        let err = authorizer
            .authorize(
                &otp,
                session,
                Amount::from_cents(400_000),
                Currency::USD,
                &challenge.challenge_id,
                "123",
                &[],
            )
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "RISK_EXCEEDED");
    }

    #[tokio::test]
    async fn test_score_at_threshold_rejected() {
        let authorizer = PaymentAuthorizer::new(
            Box::new(FixedScore(0.7)),
            AuthorizationPolicy::default(),
        );
        let otp = otp();
        let session = SessionId::new();
        let challenge = otp.issue(session.clone()).await;

        let err = authorizer
            .authorize(
                &otp,
                session,
                Amount::from_cents(78_900),
                Currency::USD,
                &challenge.challenge_id,
                "123",
                &[],
            )
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "RISK_EXCEEDED");
    }

    #[tokio::test]
    async fn test_capture_requires_exact_amount() {
        let authorizer = authorizer();
        let otp = otp();
        let session = SessionId::new();
        let challenge = otp.issue(session.clone()).await;
        let authorization = authorizer
            .authorize(
                &otp,
                session,
                Amount::from_cents(78_900),
                Currency::USD,
                &challenge.challenge_id,
                "123",
                &[],
            )
            .await
            .unwrap();

        let err = authorizer
            .capture(&authorization, Amount::from_cents(78_901))
            .unwrap_err();
        assert_eq!(err.error_code(), "CAPTURE_MISMATCH");

        let receipt = authorizer
            .capture(&authorization, Amount::from_cents(78_900))
            .unwrap();
        assert_eq!(receipt.amount, Amount::from_cents(78_900));
        assert!(receipt.settlement_date > receipt.captured_at.date_naive());
    }
}
