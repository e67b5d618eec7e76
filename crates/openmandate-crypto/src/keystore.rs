//! Key store collaborator
//!
//! Signing keys are 32-byte seeds looked up by agent identity. The in-memory
//! implementation is the default collaborator; anything that can hand out
//! seeds per identity can stand in for it.

use openmandate_types::AgentId;
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::RwLock;

/// Length of a signing seed in bytes
pub const SEED_LEN: usize = 32;

/// Key store collaborator returning signing seeds by identity
pub trait KeyStore: Send + Sync {
    /// The signing seed for an identity, if one is registered
    fn seed(&self, identity: &AgentId) -> Option<[u8; SEED_LEN]>;
}

/// In-memory key store
#[derive(Default)]
pub struct InMemoryKeyStore {
    seeds: RwLock<HashMap<AgentId, [u8; SEED_LEN]>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an explicit seed for an identity
    pub fn register(&self, identity: AgentId, seed: [u8; SEED_LEN]) {
        let mut seeds = self.seeds.write().unwrap_or_else(|e| e.into_inner());
        seeds.insert(identity, seed);
    }

    /// Generate and register a random seed for an identity
    pub fn generate(&self, identity: AgentId) -> [u8; SEED_LEN] {
        let mut seed = [0u8; SEED_LEN];
        OsRng.fill_bytes(&mut seed);
        self.register(identity, seed);
        seed
    }
}

impl KeyStore for InMemoryKeyStore {
    fn seed(&self, identity: &AgentId) -> Option<[u8; SEED_LEN]> {
        let seeds = self.seeds.read().unwrap_or_else(|e| e.into_inner());
        seeds.get(identity).copied()
    }
}
