//! Signature service
//!
//! Signs and verifies canonical encodings on behalf of agent identities.
//! Signing fails only when the identity has no key; verification never
//! errors - tampered payloads, unknown signers, wrong declared signers and
//! scheme mismatches all come back false.

use crate::{canonical_bytes, CryptoError, CryptoResult, KeyStore, KeyedDigest, SignatureScheme};
use chrono::Utc;
use openmandate_types::{AgentId, Envelope, Mandate, Signature};
use std::sync::Arc;

/// Signature service over a key store and a pluggable scheme
#[derive(Clone)]
pub struct SignatureService {
    keystore: Arc<dyn KeyStore>,
    scheme: Arc<dyn SignatureScheme>,
}

impl SignatureService {
    /// Service with the default keyed-digest scheme
    pub fn new(keystore: Arc<dyn KeyStore>) -> Self {
        Self::with_scheme(keystore, Arc::new(KeyedDigest))
    }

    /// Service with an explicit scheme
    pub fn with_scheme(keystore: Arc<dyn KeyStore>, scheme: Arc<dyn SignatureScheme>) -> Self {
        Self { keystore, scheme }
    }

    /// Sign raw payload bytes on behalf of an identity
    pub fn sign_bytes(&self, payload: &[u8], signer: &AgentId) -> CryptoResult<Signature> {
        let seed = self
            .keystore
            .seed(signer)
            .ok_or_else(|| CryptoError::UnknownSigner {
                identity: signer.to_string(),
            })?;
        Ok(Signature {
            scheme: self.scheme.kind(),
            signer: signer.clone(),
            value: self.scheme.sign(&seed, payload),
            signed_at: Utc::now(),
        })
    }

    /// Verify raw payload bytes against a signature and an expected signer
    pub fn verify_bytes(&self, payload: &[u8], signature: &Signature, signer: &AgentId) -> bool {
        if signature.scheme != self.scheme.kind() {
            return false;
        }
        if &signature.signer != signer {
            return false;
        }
        let Some(seed) = self.keystore.seed(signer) else {
            return false;
        };
        self.scheme.verify(&seed, payload, &signature.value)
    }

    /// Sign a mandate's canonical encoding
    pub fn sign_mandate(&self, mandate: &Mandate, signer: &AgentId) -> CryptoResult<Signature> {
        self.sign_bytes(&canonical_bytes(mandate)?, signer)
    }

    /// Verify a mandate's primary signature against an expected signer
    pub fn verify_mandate(&self, mandate: &Mandate, signer: &AgentId) -> bool {
        let Some(signature) = &mandate.signature else {
            return false;
        };
        let Ok(payload) = canonical_bytes(mandate) else {
            return false;
        };
        self.verify_bytes(&payload, signature, signer)
    }

    /// Verify a mandate's provider countersignature
    pub fn verify_countersignature(&self, mandate: &Mandate, signer: &AgentId) -> bool {
        let Some(signature) = &mandate.countersignature else {
            return false;
        };
        let Ok(payload) = canonical_bytes(mandate) else {
            return false;
        };
        self.verify_bytes(&payload, signature, signer)
    }

    /// Sign an envelope's canonical encoding
    pub fn sign_envelope(&self, envelope: &Envelope, signer: &AgentId) -> CryptoResult<Signature> {
        self.sign_bytes(&canonical_bytes(envelope)?, signer)
    }

    /// Verify an envelope's security signature against its declared sender
    pub fn verify_envelope(&self, envelope: &Envelope) -> bool {
        let Some(signature) = &envelope.security.signature else {
            return false;
        };
        let Ok(payload) = canonical_bytes(envelope) else {
            return false;
        };
        self.verify_bytes(&payload, signature, &envelope.sender_agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Ed25519Scheme, InMemoryKeyStore};
    use chrono::Duration;
    use openmandate_types::{Amount, IntentConstraints, UserId};

    fn service() -> (SignatureService, AgentId) {
        let keystore = Arc::new(InMemoryKeyStore::new());
        let identity = AgentId::new("merchant_agent");
        keystore.generate(identity.clone());
        (SignatureService::new(keystore), identity)
    }

    fn sample_mandate() -> Mandate {
        Mandate::intent(
            UserId::new("u1"),
            "laptop",
            IntentConstraints::ceiling(Amount::from_cents(100_000)),
            Utc::now() + Duration::days(1),
        )
        .unwrap()
    }

    #[test]
    fn test_sign_then_verify() {
        let (service, identity) = service();
        let sig = service.sign_bytes(b"payload", &identity).unwrap();
        assert!(service.verify_bytes(b"payload", &sig, &identity));
    }

    #[test]
    fn test_single_bit_mutation_fails() {
        let (service, identity) = service();
        let sig = service.sign_bytes(b"payload", &identity).unwrap();
        let mut tampered = b"payload".to_vec();
        tampered[0] ^= 0x01;
        assert!(!service.verify_bytes(&tampered, &sig, &identity));
    }

    #[test]
    fn test_unknown_signer_cannot_sign() {
        let (service, _) = service();
        assert!(service
            .sign_bytes(b"payload", &AgentId::new("stranger"))
            .is_err());
    }

    #[test]
    fn test_mismatched_declared_signer_is_false() {
        let keystore = Arc::new(InMemoryKeyStore::new());
        let a = AgentId::new("agent_a");
        let b = AgentId::new("agent_b");
        keystore.generate(a.clone());
        keystore.generate(b.clone());
        let service = SignatureService::new(keystore);

        let sig = service.sign_bytes(b"payload", &a).unwrap();
        assert!(!service.verify_bytes(b"payload", &sig, &b));
    }

    #[test]
    fn test_scheme_mismatch_is_false() {
        let keystore = Arc::new(InMemoryKeyStore::new());
        let identity = AgentId::new("agent_a");
        keystore.generate(identity.clone());
        let digest = SignatureService::new(keystore.clone());
        let ed25519 = SignatureService::with_scheme(keystore, Arc::new(Ed25519Scheme));

        let sig = digest.sign_bytes(b"payload", &identity).unwrap();
        assert!(!ed25519.verify_bytes(b"payload", &sig, &identity));
    }

    #[test]
    fn test_mandate_signature_survives_signing_state() {
        let (service, identity) = service();
        let mandate = sample_mandate();
        let sig = service.sign_mandate(&mandate, &identity).unwrap();
        // Attaching the signature does not change the canonical bytes
        let signed = mandate.with_signature(sig).unwrap();
        assert!(service.verify_mandate(&signed, &identity));
    }

    #[test]
    fn test_mandate_payload_tamper_detected() {
        let (service, identity) = service();
        let mandate = sample_mandate();
        let sig = service.sign_mandate(&mandate, &identity).unwrap();
        let mut signed = mandate.with_signature(sig).unwrap();
        if let openmandate_types::MandatePayload::Intent(intent) = &mut signed.payload {
            intent.item_description = "yacht".to_string();
        }
        assert!(!service.verify_mandate(&signed, &identity));
    }

    #[test]
    fn test_unsigned_mandate_is_false() {
        let (service, identity) = service();
        assert!(!service.verify_mandate(&sample_mandate(), &identity));
    }
}
