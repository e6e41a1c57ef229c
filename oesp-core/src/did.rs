//! DID derivation: `oesp:did:` + lowercase unpadded base32 of SHA-256(signing public key).

use data_encoding::BASE32_NOPAD;
use sha2::{Digest, Sha256};

pub const DID_PREFIX: &str = "oesp:did:";

/// Base32 length of a 32-byte digest without padding.
const DID_BODY_LEN: usize = 52;

/// Derive the DID of a signing public key. Pure and deterministic.
pub fn derive_did(signing_public_key: &[u8]) -> String {
    let digest = Sha256::digest(signing_public_key);
    let body = BASE32_NOPAD.encode(&digest).to_ascii_lowercase();
    format!("{DID_PREFIX}{body}")
}

/// Shape check: prefix plus 52 characters of the lowercase base32 alphabet.
pub fn is_did(s: &str) -> bool {
    match s.strip_prefix(DID_PREFIX) {
        Some(body) => {
            body.len() == DID_BODY_LEN
                && body
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || (b'2'..=b'7').contains(&b))
        }
        None => false,
    }
}
