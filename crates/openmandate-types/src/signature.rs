//! Signature data carried on mandates and envelopes
//!
//! This is the wire shape only. Signing and verification live in
//! `openmandate-crypto`; the signature value is opaque hex from whichever
//! scheme produced it, and a value produced under one scheme never verifies
//! under another.

use crate::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The scheme that produced a signature value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemeKind {
    /// SHA-256 keyed digest over the canonical payload (deterministic stamp)
    KeyedDigest,
    /// Ed25519 over the canonical payload
    Ed25519,
}

impl fmt::Display for SchemeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyedDigest => write!(f, "keyed_digest"),
            Self::Ed25519 => write!(f, "ed25519"),
        }
    }
}

/// An integrity stamp over a canonical payload encoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Scheme that produced the value
    pub scheme: SchemeKind,
    /// Declared signer identity
    pub signer: AgentId,
    /// Hex-encoded signature bytes
    pub value: String,
    /// Timestamp of signing
    pub signed_at: DateTime<Utc>,
}
