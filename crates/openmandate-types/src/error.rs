//! Error taxonomy for OpenMandate
//!
//! Five base categories (validation, protocol violation, signature mismatch,
//! routing, expiry) plus the domain variants the engine and subsystems
//! report through them. No error is fatal to the process; every failure is
//! session-scoped.

use thiserror::Error;

/// Result type for OpenMandate operations
pub type Result<T> = std::result::Result<T, MandateError>;

/// OpenMandate error types
#[derive(Debug, Clone, Error)]
pub enum MandateError {
    // ========================================================================
    // Validation
    // ========================================================================

    /// Malformed input; fails fast, nothing partially applied
    #[error("Invalid input: {field} - {reason}")]
    Validation { field: String, reason: String },

    /// Amount overflow during arithmetic
    #[error("Amount overflow during arithmetic operation")]
    AmountOverflow,

    /// Mandate id already recorded in the store
    #[error("Mandate {mandate_id} already exists")]
    DuplicateMandate { mandate_id: String },

    // ========================================================================
    // Protocol
    // ========================================================================

    /// Legal event arriving in the wrong state; session unaffected
    #[error("Protocol violation: event {event} not legal in state {state}")]
    ProtocolViolation { state: String, event: String },

    /// Session id unknown to the registry
    #[error("Session {session_id} not found")]
    SessionNotFound { session_id: String },

    /// Mandate id unknown to the store
    #[error("Mandate {mandate_id} not found")]
    MandateNotFound { mandate_id: String },

    // ========================================================================
    // Integrity
    // ========================================================================

    /// Tampered payload or wrong signer; the mandate is rejected
    #[error("Signature mismatch for signer {signer}: {reason}")]
    SignatureMismatch { signer: String, reason: String },

    // ========================================================================
    // Routing
    // ========================================================================

    /// Unknown participant; the message is dropped and the sender notified
    #[error("No route to receiver {receiver}")]
    Routing { receiver: String },

    // ========================================================================
    // Expiry
    // ========================================================================

    /// Mandate or session past its expires_at at processing time
    #[error("{subject} expired at {expired_at}")]
    Expired { subject: String, expired_at: String },

    // ========================================================================
    // Guard failures
    // ========================================================================

    /// Cart or requester violates the originating intent's constraints
    #[error("Constraint violation: {reason}")]
    ConstraintViolation { reason: String },

    /// OTP challenge rejected (wrong code, consumed, or expired)
    #[error("OTP challenge {challenge_id} rejected")]
    OtpRejected { challenge_id: String },

    /// Risk score above the authorization threshold
    #[error("Risk score {score:.3} exceeds threshold {threshold:.3}")]
    RiskExceeded { score: f64, threshold: f64 },

    /// Capture amount does not exactly match the authorized amount
    #[error("Capture mismatch: authorized {authorized}, requested {requested}")]
    CaptureMismatch { authorized: String, requested: String },

    /// Session explicitly aborted by a participant
    #[error("Session aborted: {reason}")]
    Aborted { reason: String },
}

impl MandateError {
    /// Create a validation error
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a constraint violation
    pub fn constraint(reason: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            reason: reason.into(),
        }
    }

    /// Get an error code for audit records and reporting
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::AmountOverflow => "AMOUNT_OVERFLOW",
            Self::DuplicateMandate { .. } => "DUPLICATE_MANDATE",
            Self::ProtocolViolation { .. } => "PROTOCOL_VIOLATION",
            Self::SessionNotFound { .. } => "SESSION_NOT_FOUND",
            Self::MandateNotFound { .. } => "MANDATE_NOT_FOUND",
            Self::SignatureMismatch { .. } => "SIGNATURE_MISMATCH",
            Self::Routing { .. } => "ROUTING_ERROR",
            Self::Expired { .. } => "EXPIRED",
            Self::ConstraintViolation { .. } => "CONSTRAINT_VIOLATION",
            Self::OtpRejected { .. } => "OTP_REJECTED",
            Self::RiskExceeded { .. } => "RISK_EXCEEDED",
            Self::CaptureMismatch { .. } => "CAPTURE_MISMATCH",
            Self::Aborted { .. } => "ABORTED",
        }
    }

    /// The short reason recorded in the audit trail when a guard failure
    /// fails a session
    pub fn failure_reason(&self) -> &'static str {
        match self {
            Self::Expired { .. } => "expired",
            Self::SignatureMismatch { .. } => "signature_mismatch",
            Self::ConstraintViolation { .. } => "constraint_violation",
            Self::OtpRejected { .. } => "otp_rejected",
            Self::RiskExceeded { .. } => "risk_exceeded",
            Self::CaptureMismatch { .. } => "capture_mismatch",
            Self::Aborted { .. } => "aborted",
            _ => "guard_failure",
        }
    }

    /// Whether this failure is session-fatal when raised inside a legal
    /// transition. Protocol violations and validation errors leave the
    /// session unaffected; guard failures move it to FAILED.
    pub fn fails_session(&self) -> bool {
        matches!(
            self,
            Self::Expired { .. }
                | Self::SignatureMismatch { .. }
                | Self::ConstraintViolation { .. }
                | Self::OtpRejected { .. }
                | Self::RiskExceeded { .. }
                | Self::CaptureMismatch { .. }
                | Self::Aborted { .. }
        )
    }
}
