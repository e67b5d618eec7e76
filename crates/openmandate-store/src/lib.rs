//! OpenMandate Store - mandate store and append-only audit trail
//!
//! Mandates are stored once, keyed by id, and referenced by sessions -
//! the single source of truth for verification. The audit trail is
//! append-only and hash-chained per session, so the trail itself is
//! tamper-evident.

pub mod audit;
pub mod mandates;

pub use audit::{
    AuditOutcome, AuditRecord, AuditSubject, AuditTrail, InMemoryAuditTrail, NewAuditRecord,
};
pub use mandates::{InMemoryMandateStore, MandateStore};
