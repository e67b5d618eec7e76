//! OpenMandate Payments - authorization, risk scoring and OTP challenges
//!
//! Risk scoring is a pure function of observable inputs; the OTP code
//! source and the scorer are pluggable so the deterministic demo values can
//! be swapped for real ones without touching the engine.

pub mod authorize;
pub mod otp;
pub mod risk;

pub use authorize::{Authorization, AuthorizationPolicy, PaymentAuthorizer};
pub use otp::{CodeSource, OtpChallenge, OtpService, RandomNumericCode, StaticCode};
pub use risk::{RiskScorer, WeightedRiskScorer};
