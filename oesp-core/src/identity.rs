//! Identity: Ed25519 signing keypair plus X25519 key-agreement keypair, behind a keystore trait.

use std::fmt;
use std::sync::Arc;

use ed25519_dalek::{Signer, SigningKey};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use crate::did::derive_did;
use crate::error::OespError;

/// Holder of a principal's private keys. Private material never leaves the implementation;
/// callers get public keys, signatures and Diffie-Hellman outputs.
pub trait Keystore: Send + Sync {
    fn signing_public_key(&self) -> [u8; 32];

    fn sign(&self, message: &[u8]) -> Result<[u8; 64], OespError>;

    fn kex_public_key(&self) -> [u8; 32];

    /// X25519 with the keystore's key-agreement secret.
    fn diffie_hellman(&self, their_public: &[u8; 32]) -> Result<[u8; 32], OespError>;

    fn did(&self) -> String {
        derive_did(&self.signing_public_key())
    }
}

/// Supplies the local identity, creating it on first use.
pub trait IdentityProvider: Send + Sync {
    fn get_or_create(&self) -> Result<Arc<dyn Keystore>, OespError>;
}

/// Keystore held in process memory. Secrets are zeroized on drop by the dalek types.
pub struct MemoryKeystore {
    signing: SigningKey,
    kex_secret: StaticSecret,
    kex_public: X25519PublicKey,
}

impl MemoryKeystore {
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        let kex_secret = StaticSecret::random_from_rng(OsRng);
        let kex_public = X25519PublicKey::from(&kex_secret);
        Self {
            signing,
            kex_secret,
            kex_public,
        }
    }

    /// Restore from raw 32-byte secrets (Ed25519 seed, X25519 scalar).
    pub fn from_secrets(signing_seed: [u8; 32], kex_secret: [u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(&signing_seed);
        let kex_secret = StaticSecret::from(kex_secret);
        let kex_public = X25519PublicKey::from(&kex_secret);
        Self {
            signing,
            kex_secret,
            kex_public,
        }
    }
}

impl fmt::Debug for MemoryKeystore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryKeystore")
            .field("did", &self.did())
            .finish_non_exhaustive()
    }
}

impl Keystore for MemoryKeystore {
    fn signing_public_key(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    fn sign(&self, message: &[u8]) -> Result<[u8; 64], OespError> {
        Ok(self.signing.sign(message).to_bytes())
    }

    fn kex_public_key(&self) -> [u8; 32] {
        self.kex_public.to_bytes()
    }

    fn diffie_hellman(&self, their_public: &[u8; 32]) -> Result<[u8; 32], OespError> {
        let shared = self
            .kex_secret
            .diffie_hellman(&X25519PublicKey::from(*their_public));
        if !shared.was_contributory() {
            return Err(OespError::KexFailed);
        }
        Ok(shared.to_bytes())
    }
}

/// Creates one in-memory identity lazily and hands out the same one afterwards.
#[derive(Default)]
pub struct MemoryIdentityProvider {
    slot: Mutex<Option<Arc<MemoryKeystore>>>,
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keystore(keystore: MemoryKeystore) -> Self {
        Self {
            slot: Mutex::new(Some(Arc::new(keystore))),
        }
    }
}

impl IdentityProvider for MemoryIdentityProvider {
    fn get_or_create(&self) -> Result<Arc<dyn Keystore>, OespError> {
        let mut slot = self.slot.lock();
        let keystore: Arc<dyn Keystore> = slot
            .get_or_insert_with(|| Arc::new(MemoryKeystore::generate()))
            .clone();
        Ok(keystore)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{CryptoProvider, SoftwareCrypto};

    #[test]
    fn did_derives_from_signing_key() {
        let ks = MemoryKeystore::generate();
        assert_eq!(ks.did(), derive_did(&ks.signing_public_key()));
    }

    #[test]
    fn key_agreement_symmetric() {
        let a = MemoryKeystore::generate();
        let b = MemoryKeystore::generate();
        let ab = a.diffie_hellman(&b.kex_public_key()).unwrap();
        let ba = b.diffie_hellman(&a.kex_public_key()).unwrap();
        assert_eq!(ab, ba);
    }

    #[test]
    fn low_order_point_rejected() {
        let a = MemoryKeystore::generate();
        assert_eq!(a.diffie_hellman(&[0u8; 32]), Err(OespError::KexFailed));
    }

    #[test]
    fn signature_verifies_with_public_key() {
        let ks = MemoryKeystore::generate();
        let sig = ks.sign(b"payload").unwrap();
        let crypto = SoftwareCrypto::new();
        assert!(crypto.verify(&ks.signing_public_key(), b"payload", &sig));
        assert!(!crypto.verify(&ks.signing_public_key(), b"payloaD", &sig));
    }

    #[test]
    fn restore_from_secrets_is_stable() {
        let a = MemoryKeystore::from_secrets([1u8; 32], [2u8; 32]);
        let b = MemoryKeystore::from_secrets([1u8; 32], [2u8; 32]);
        assert_eq!(a.did(), b.did());
        assert_eq!(a.kex_public_key(), b.kex_public_key());
    }

    #[test]
    fn provider_returns_same_identity() {
        let provider = MemoryIdentityProvider::new();
        let first = provider.get_or_create().unwrap();
        let second = provider.get_or_create().unwrap();
        assert_eq!(first.did(), second.did());
    }
}
