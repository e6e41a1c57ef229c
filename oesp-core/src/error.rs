//! Envelope error taxonomy. Every kind stays distinct so callers can branch on it.

/// Errors raised by the envelope codec and its collaborators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OespError {
    #[error("invalid envelope format: {0}")]
    InvalidFormat(String),
    #[error("envelope expired at {exp}, now {now}")]
    Expired { exp: i64, now: i64 },
    #[error("timestamp {ts} too far from now {now}")]
    ClockSkew { ts: i64, now: i64 },
    #[error("sender DID does not match its signing key")]
    DidMismatch,
    #[error("invalid DID: {0}")]
    InvalidDid(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("replay detected for message {mid}")]
    Replay { mid: String },
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("failed to resolve {0}")]
    ResolveFailed(String),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("key exchange failed")]
    KexFailed,
}

impl OespError {
    /// Stable machine-readable code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            OespError::InvalidFormat(_) => "INVALID_FORMAT",
            OespError::Expired { .. } => "EXPIRED",
            OespError::ClockSkew { .. } => "CLOCK_SKEW",
            OespError::DidMismatch | OespError::InvalidDid(_) => "INVALID_DID",
            OespError::InvalidSignature => "INVALID_SIGNATURE",
            OespError::Replay { .. } => "REPLAY",
            OespError::DecryptionFailed => "DECRYPTION_FAILED",
            OespError::EncryptionFailed => "ENCRYPTION_FAILED",
            OespError::ResolveFailed(_) => "RESOLVE_FAILED",
            OespError::UnsupportedAlg(_) => "UNSUPPORTED_ALG",
            OespError::Storage(_) => "STORAGE_ERROR",
            OespError::KexFailed => "KEX_FAILED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct_for_security_kinds() {
        let kinds = [
            OespError::InvalidFormat("x".into()),
            OespError::Expired { exp: 1, now: 2 },
            OespError::InvalidSignature,
            OespError::Replay { mid: "m".into() },
            OespError::DecryptionFailed,
        ];
        let codes: std::collections::HashSet<_> = kinds.iter().map(|e| e.code()).collect();
        assert_eq!(codes.len(), kinds.len());
    }
}
