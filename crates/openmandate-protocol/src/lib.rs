//! OpenMandate Protocol - the mandate state machine
//!
//! Drives a purchase through the 13-step flow as an explicit transition
//! table: `OPENED → INTENT_CREATED → CART_PROPOSED → CART_ACCEPTED →
//! PAYMENT_TOKEN_ISSUED → PAYMENT_MANDATE_CREATED → PAYMENT_SIGNED →
//! AUTHORIZED → CAPTURED → CLOSED`, with `FAILED` reachable from any
//! non-terminal state. Every transition validates its guard, mutates the
//! session and appends an audit record - in that order, atomically per
//! session.

pub mod engine;
pub mod event;

pub use engine::{EngineConfig, ProtocolEngine, Transition};
pub use event::ProtocolEvent;
