//! Crypto capability consumed by the codec, plus the software backend.
//!
//! Sealed session keys: `ek = ephemeral_pub (32) || ChaCha20-Poly1305(k, nonce=0, session_key)`
//! with `k = HKDF-SHA256(ikm = X25519(eph, recipient), salt = ephemeral_pub || recipient_pub)`.
//! Each ephemeral key seals exactly one message, so the fixed nonce is never reused under a key.
//! This construction is not libsodium's `crypto_box_seal` (XSalsa20-Poly1305 with a BLAKE2b
//! nonce), although both are declared as `kex: "X25519"`. An `ek` from one cannot be opened by
//! the other.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};
use zeroize::Zeroizing;

use crate::error::OespError;
use crate::identity::Keystore;

pub const ENC_ALG: &str = "CHACHA20-POLY1305";
pub const KEX_ALG: &str = "X25519";
pub const SIG_ALG: &str = "Ed25519";

pub const NONCE_LEN: usize = 12;
pub const SESSION_KEY_LEN: usize = 32;

const SEAL_INFO: &[u8] = b"oesp-sealed-key-v1";
const SEAL_OVERHEAD: usize = 32 + 16;

/// Output of an AEAD encryption. `tag` is set only by primitives that return it detached.
#[derive(Debug, Clone)]
pub struct AeadOutput {
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub tag: Option<Vec<u8>>,
}

/// Hashing, signature verification, key sealing, AEAD and randomness.
/// Signing and key agreement live on [`Keystore`] so private keys stay with their holder.
pub trait CryptoProvider: Send + Sync {
    fn sha256(&self, data: &[u8]) -> [u8; 32];

    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool;

    /// Seal `plaintext` so only the holder of `recipient_public`'s private key can open it.
    fn seal(&self, recipient_public: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, OespError>;

    /// Open a sealed payload using the keystore's key-agreement key.
    fn open(&self, keystore: &dyn Keystore, sealed: &[u8]) -> Result<Vec<u8>, OespError>;

    /// Encrypt under a fresh nonce. The tag may stay at the end of `ciphertext` or be returned
    /// in `tag`; a detached tag goes into the envelope's `tag` field.
    fn aead_encrypt(
        &self,
        key: &[u8; SESSION_KEY_LEN],
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<AeadOutput, OespError>;

    /// `ciphertext` always ends with the tag. When `aead_encrypt` returned a detached tag,
    /// the codec appends it to the ciphertext before this call.
    fn aead_decrypt(
        &self,
        key: &[u8; SESSION_KEY_LEN],
        nonce: &[u8],
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, OespError>;

    fn random_bytes(&self, len: usize) -> Vec<u8>;
}

/// Pure-Rust backend: ChaCha20-Poly1305 (tag embedded), X25519 sealing, Ed25519, OS RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareCrypto;

impl SoftwareCrypto {
    pub fn new() -> Self {
        SoftwareCrypto
    }
}

fn seal_key(
    shared: &[u8; 32],
    ephemeral_pub: &[u8; 32],
    recipient_pub: &[u8; 32],
) -> Result<Zeroizing<[u8; 32]>, OespError> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(ephemeral_pub);
    salt[32..].copy_from_slice(recipient_pub);
    let hk = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut key = Zeroizing::new([0u8; 32]);
    hk.expand(SEAL_INFO, key.as_mut())
        .map_err(|_| OespError::KexFailed)?;
    Ok(key)
}

impl CryptoProvider for SoftwareCrypto {
    fn sha256(&self, data: &[u8]) -> [u8; 32] {
        Sha256::digest(data).into()
    }

    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        let Ok(pk_bytes) = <[u8; 32]>::try_from(public_key) else {
            return false;
        };
        let Ok(vk) = VerifyingKey::from_bytes(&pk_bytes) else {
            return false;
        };
        let Ok(sig) = Signature::from_slice(signature) else {
            return false;
        };
        vk.verify(message, &sig).is_ok()
    }

    fn seal(&self, recipient_public: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, OespError> {
        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_pub = X25519PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&X25519PublicKey::from(*recipient_public));
        if !shared.was_contributory() {
            return Err(OespError::KexFailed);
        }
        let key = seal_key(shared.as_bytes(), ephemeral_pub.as_bytes(), recipient_public)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
        let sealed = cipher
            .encrypt(&Nonce::default(), plaintext)
            .map_err(|_| OespError::KexFailed)?;
        let mut out = Vec::with_capacity(32 + sealed.len());
        out.extend_from_slice(ephemeral_pub.as_bytes());
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn open(&self, keystore: &dyn Keystore, sealed: &[u8]) -> Result<Vec<u8>, OespError> {
        if sealed.len() < SEAL_OVERHEAD {
            return Err(OespError::KexFailed);
        }
        let mut ephemeral_pub = [0u8; 32];
        ephemeral_pub.copy_from_slice(&sealed[..32]);
        let shared = Zeroizing::new(keystore.diffie_hellman(&ephemeral_pub)?);
        let recipient_pub = keystore.kex_public_key();
        let key = seal_key(&shared, &ephemeral_pub, &recipient_pub)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
        cipher
            .decrypt(&Nonce::default(), &sealed[32..])
            .map_err(|_| OespError::DecryptionFailed)
    }

    fn aead_encrypt(
        &self,
        key: &[u8; SESSION_KEY_LEN],
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<AeadOutput, OespError> {
        let cipher = ChaCha20Poly1305::new(key.into());
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
            .map_err(|_| OespError::EncryptionFailed)?;
        Ok(AeadOutput {
            nonce: nonce.to_vec(),
            ciphertext,
            tag: None,
        })
    }

    fn aead_decrypt(
        &self,
        key: &[u8; SESSION_KEY_LEN],
        nonce: &[u8],
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, OespError> {
        if nonce.len() != NONCE_LEN {
            return Err(OespError::DecryptionFailed);
        }
        let cipher = ChaCha20Poly1305::new(key.into());
        cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
            .map_err(|_| OespError::DecryptionFailed)
    }

    fn random_bytes(&self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        OsRng.fill_bytes(&mut buf);
        buf
    }
}
