//! Pluggable signature schemes
//!
//! Both schemes are deterministic for a given (seed, payload) pair so tests
//! are reproducible. A value produced under one scheme never verifies under
//! another; the scheme kind is part of the signature and checked first.

use crate::keystore::SEED_LEN;
use ed25519_dalek::{Signature as Ed25519Signature, Signer, SigningKey, Verifier};
use openmandate_types::SchemeKind;
use sha2::{Digest, Sha256};

/// Domain separation tag for the keyed-digest scheme
const KEYED_DIGEST_TAG: &[u8] = b"openmandate.v1.keyed_digest";

/// A deterministic signature scheme over canonical payload bytes
pub trait SignatureScheme: Send + Sync {
    /// Which kind of signature this scheme produces
    fn kind(&self) -> SchemeKind;

    /// Produce the hex-encoded signature value
    fn sign(&self, seed: &[u8; SEED_LEN], payload: &[u8]) -> String;

    /// Verify a hex-encoded signature value; false on any mismatch or
    /// malformed input, never an error
    fn verify(&self, seed: &[u8; SEED_LEN], payload: &[u8], value: &str) -> bool;
}

/// SHA-256 keyed digest: hash(tag || seed || payload)
///
/// This is the integrity stamp the protocol engine relies on by default. It
/// models tamper detection, not non-repudiation.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyedDigest;

impl SignatureScheme for KeyedDigest {
    fn kind(&self) -> SchemeKind {
        SchemeKind::KeyedDigest
    }

    fn sign(&self, seed: &[u8; SEED_LEN], payload: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(KEYED_DIGEST_TAG);
        hasher.update(seed);
        hasher.update(payload);
        hex::encode(hasher.finalize())
    }

    fn verify(&self, seed: &[u8; SEED_LEN], payload: &[u8], value: &str) -> bool {
        self.sign(seed, payload) == value
    }
}

/// Ed25519 keypair derived deterministically from the stored seed
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Scheme;

impl SignatureScheme for Ed25519Scheme {
    fn kind(&self) -> SchemeKind {
        SchemeKind::Ed25519
    }

    fn sign(&self, seed: &[u8; SEED_LEN], payload: &[u8]) -> String {
        let key = SigningKey::from_bytes(seed);
        hex::encode(key.sign(payload).to_bytes())
    }

    fn verify(&self, seed: &[u8; SEED_LEN], payload: &[u8], value: &str) -> bool {
        let Ok(bytes) = hex::decode(value) else {
            return false;
        };
        if bytes.len() != 64 {
            return false;
        }
        let mut raw = [0u8; 64];
        raw.copy_from_slice(&bytes);
        let signature = Ed25519Signature::from_bytes(&raw);
        let key = SigningKey::from_bytes(seed);
        key.verifying_key().verify(payload, &signature).is_ok()
    }
}
