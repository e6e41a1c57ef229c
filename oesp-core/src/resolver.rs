//! Peer resolution: recipient DID to its current X25519 key-agreement public key.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::did::is_did;
use crate::error::OespError;

pub trait PeerResolver: Send + Sync {
    /// Fails with [`OespError::ResolveFailed`] when the peer is unknown.
    fn resolve(&self, did: &str) -> Result<[u8; 32], OespError>;
}

/// Resolver backed by an in-memory directory.
#[derive(Debug, Default)]
pub struct MemoryResolver {
    peers: RwLock<HashMap<String, [u8; 32]>>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a peer's key-agreement key.
    pub fn insert(&self, did: impl Into<String>, kex_public_key: [u8; 32]) {
        self.peers.write().insert(did.into(), kex_public_key);
    }

    pub fn remove(&self, did: &str) -> Option<[u8; 32]> {
        self.peers.write().remove(did)
    }
}

impl PeerResolver for MemoryResolver {
    fn resolve(&self, did: &str) -> Result<[u8; 32], OespError> {
        if !is_did(did) {
            return Err(OespError::InvalidDid(did.to_string()));
        }
        self.peers
            .read()
            .get(did)
            .copied()
            .ok_or_else(|| OespError::ResolveFailed(did.to_string()))
    }
}
