//! OpenMandate Types - Canonical domain types for the mandate protocol
//!
//! This crate contains all foundational types for OpenMandate with zero
//! dependencies on other openmandate crates. It defines the complete type
//! system for:
//!
//! - Identity types (MandateId, SessionId, MessageId, etc.)
//! - Minor-unit amounts with checked arithmetic
//! - Intent / Cart / Payment mandates and their payloads
//! - Transport envelopes and the closed control-payload set
//! - Sessions and the protocol state enumeration
//! - The error taxonomy shared by every layer
//!
//! # Architectural Invariants
//!
//! These types support the core OpenMandate protocol invariants:
//!
//! 1. A signed mandate payload is immutable; revisions take a fresh
//!    `mandate_id` and a `supersedes` back-reference
//! 2. Sessions reference mandates and messages by id, never by embedding,
//!    so the store remains the single source of truth for verification
//! 3. Payload variants form a closed set with exhaustive matching - an
//!    unrecognized kind is a construction-time error, not a runtime surprise

pub mod identity;
pub mod currency;
pub mod amount;
pub mod signature;
pub mod mandate;
pub mod envelope;
pub mod session;
pub mod error;

pub use identity::*;
pub use currency::*;
pub use amount::*;
pub use signature::*;
pub use mandate::*;
pub use envelope::*;
pub use session::*;
pub use error::*;

/// Version of the OpenMandate types schema
pub const TYPES_VERSION: &str = "0.1.0";
