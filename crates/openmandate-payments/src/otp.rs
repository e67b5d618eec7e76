//! OTP challenges
//!
//! A challenge is single-use, session-scoped and TTL-bounded. The first
//! verification attempt consumes it whatever the outcome; expired challenges
//! fail closed. Codes come from a pluggable source so the demo's fixed
//! "123" and a real random source share one service.

use chrono::{DateTime, Duration, Utc};
use openmandate_types::{ChallengeId, SessionId};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Source of challenge codes
pub trait CodeSource: Send + Sync {
    fn next_code(&self) -> String;
}

/// Fixed code, for deterministic demo and test runs
pub struct StaticCode(pub String);

impl StaticCode {
    /// The original demo code
    pub fn demo() -> Self {
        Self("123".to_string())
    }
}

impl CodeSource for StaticCode {
    fn next_code(&self) -> String {
        self.0.clone()
    }
}

/// Random numeric code of a fixed number of digits
pub struct RandomNumericCode {
    pub digits: u32,
}

impl CodeSource for RandomNumericCode {
    fn next_code(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..self.digits)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect()
    }
}

/// An issued OTP challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpChallenge {
    pub challenge_id: ChallengeId,
    pub session_id: SessionId,
    /// The code sent to the user out of band
    pub code: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies single-use challenges
pub struct OtpService {
    challenges: RwLock<HashMap<ChallengeId, OtpChallenge>>,
    source: Box<dyn CodeSource>,
    ttl: Duration,
}

impl OtpService {
    /// Service with a 5-minute challenge window
    pub fn new(source: Box<dyn CodeSource>) -> Self {
        Self::with_ttl(source, Duration::minutes(5))
    }

    pub fn with_ttl(source: Box<dyn CodeSource>, ttl: Duration) -> Self {
        Self {
            challenges: RwLock::new(HashMap::new()),
            source,
            ttl,
        }
    }

    /// Issue a challenge scoped to a session
    pub async fn issue(&self, session_id: SessionId) -> OtpChallenge {
        let issued_at = Utc::now();
        let challenge = OtpChallenge {
            challenge_id: ChallengeId::new(),
            session_id,
            code: self.source.next_code(),
            issued_at,
            expires_at: issued_at + self.ttl,
        };
        debug!(challenge = %challenge.challenge_id, session = %challenge.session_id, "otp challenge issued");
        self.challenges
            .write()
            .await
            .insert(challenge.challenge_id.clone(), challenge.clone());
        challenge
    }

    /// Verify a code against a challenge. The challenge is consumed by the
    /// first call whatever the outcome; a second call with any code fails,
    /// and an expired challenge fails closed.
    pub async fn verify(&self, challenge_id: &ChallengeId, code: &str) -> bool {
        let Some(challenge) = self.challenges.write().await.remove(challenge_id) else {
            warn!(challenge = %challenge_id, "otp verification against unknown or consumed challenge");
            return false;
        };
        if Utc::now() > challenge.expires_at {
            warn!(challenge = %challenge_id, "otp challenge expired");
            return false;
        }
        challenge.code == code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> OtpService {
        OtpService::new(Box::new(StaticCode::demo()))
    }

    #[tokio::test]
    async fn test_correct_code_verifies_once() {
        let service = service();
        let challenge = service.issue(SessionId::new()).await;
        assert!(service.verify(&challenge.challenge_id, "123").await);
        // consumed: even the correct code fails now
        assert!(!service.verify(&challenge.challenge_id, "123").await);
    }

    #[tokio::test]
    async fn test_wrong_code_consumes_challenge() {
        let service = service();
        let challenge = service.issue(SessionId::new()).await;
        assert!(!service.verify(&challenge.challenge_id, "999").await);
        assert!(!service.verify(&challenge.challenge_id, "123").await);
    }

    #[tokio::test]
    async fn test_expired_challenge_fails_closed() {
        let service = OtpService::with_ttl(Box::new(StaticCode::demo()), Duration::milliseconds(-1));
        let challenge = service.issue(SessionId::new()).await;
        assert!(!service.verify(&challenge.challenge_id, "123").await);
    }

    #[tokio::test]
    async fn test_unknown_challenge_fails() {
        let service = service();
        assert!(!service.verify(&ChallengeId::new(), "123").await);
    }

    #[test]
    fn test_random_code_has_requested_digits() {
        let source = RandomNumericCode { digits: 6 };
        let code = source.next_code();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }
}
