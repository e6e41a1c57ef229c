//! Integrity: SHA-256 over whole transfers and single chunks.

use sha2::{Digest, Sha256};

use crate::b64;

/// Hash a payload. Returns 32-byte digest.
pub fn hash_payload(payload: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hasher.finalize().into()
}

/// Verify payload against expected hash.
pub fn verify_payload(payload: &[u8], expected_hash: &[u8; 32]) -> bool {
    hash_payload(payload) == *expected_hash
}

/// Standard Base64 of the payload hash, as carried in START frames and sync commits.
pub fn hash_b64(payload: &[u8]) -> String {
    b64::std_encode(&hash_payload(payload))
}

/// Base64url of a chunk hash, as carried in upload headers.
pub fn chunk_hash_b64url(chunk: &[u8]) -> String {
    b64::url_encode(&hash_payload(chunk))
}
