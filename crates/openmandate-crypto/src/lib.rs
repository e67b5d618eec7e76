//! OpenMandate Crypto - deterministic integrity stamping over canonical
//! mandate encodings
//!
//! Signing keys come from a `KeyStore` collaborator. The scheme is
//! pluggable: the default is a SHA-256 keyed digest (a deterministic
//! integrity stamp, not a full PKI), with Ed25519 available behind the same
//! trait. `verify` returns false - never errors - for tampered payloads,
//! unknown signers, or malformed signatures.

pub mod canonical;
pub mod keystore;
pub mod scheme;
pub mod service;

pub use canonical::canonical_bytes;
pub use keystore::{InMemoryKeyStore, KeyStore};
pub use scheme::{Ed25519Scheme, KeyedDigest, SignatureScheme};
pub use service::SignatureService;

use thiserror::Error;

/// Result type for crypto operations
pub type CryptoResult<T> = std::result::Result<T, CryptoError>;

/// Crypto error types
#[derive(Debug, Clone, Error)]
pub enum CryptoError {
    /// No signing key registered for the identity
    #[error("No signing key for identity {identity}")]
    UnknownSigner { identity: String },

    /// The payload could not be canonically encoded
    #[error("Canonical encoding failed: {0}")]
    Canonicalization(String),
}
