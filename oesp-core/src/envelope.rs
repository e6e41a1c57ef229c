//! Envelope v1 wire record and token form `OESP1.<base64url(canonical JSON)>`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::b64;
use crate::canonical::{canonical_json_bytes, canonical_json_bytes_excluding};
use crate::error::OespError;

pub const TOKEN_PREFIX: &str = "OESP1.";
pub const ENVELOPE_VERSION: u64 = 1;
pub const DEFAULT_TYP: &str = "oesp.envelope";

/// Keys left out of the AEAD associated data.
const AAD_EXCLUDED: &[&str] = &["ct", "iv", "sig", "tag"];
/// Keys left out of the signed header.
const SIG_EXCLUDED: &[&str] = &["sig"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub did: String,
    /// Ed25519 signing public key, base64url.
    #[serde(rename = "pub")]
    pub public_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub did: String,
}

/// One sealed, signed message. Byte fields hold unpadded base64url text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub v: u64,
    pub typ: String,
    pub mid: String,
    pub sid: String,
    pub ts: i64,
    pub exp: i64,
    #[serde(rename = "from")]
    pub sender: Sender,
    #[serde(rename = "to")]
    pub recipient: Recipient,
    pub enc: String,
    pub kex: String,
    pub ek: String,
    pub iv: String,
    pub ct: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub sig_alg: String,
    pub sig: String,
}

impl Envelope {
    pub fn to_value(&self) -> Value {
        let mut value = json!({
            "v": self.v,
            "typ": self.typ,
            "mid": self.mid,
            "sid": self.sid,
            "ts": self.ts,
            "exp": self.exp,
            "from": { "did": self.sender.did, "pub": self.sender.public_key },
            "to": { "did": self.recipient.did },
            "enc": self.enc,
            "kex": self.kex,
            "ek": self.ek,
            "iv": self.iv,
            "ct": self.ct,
            "sig_alg": self.sig_alg,
            "sig": self.sig,
        });
        if let (Some(tag), Value::Object(map)) = (&self.tag, &mut value) {
            map.insert("tag".to_string(), Value::String(tag.clone()));
        }
        value
    }

    /// Associated data bound into the AEAD: the header without ciphertext, nonce, tag and signature.
    pub fn aad(&self) -> Vec<u8> {
        canonical_json_bytes_excluding(&self.to_value(), AAD_EXCLUDED)
    }

    /// Signed bytes: canonical envelope without `sig`, followed by the raw ciphertext.
    pub fn signing_input(&self, raw_ciphertext: &[u8]) -> Vec<u8> {
        let mut input = canonical_json_bytes_excluding(&self.to_value(), SIG_EXCLUDED);
        input.extend_from_slice(raw_ciphertext);
        input
    }

    pub fn to_token(&self) -> String {
        let payload = canonical_json_bytes(&self.to_value());
        format!("{TOKEN_PREFIX}{}", b64::url_encode(&payload))
    }

    /// Decode a base64url byte field, reporting the field name on failure.
    pub fn field_bytes(name: &str, value: &str) -> Result<Vec<u8>, OespError> {
        b64::url_decode(value)
            .map_err(|e| OespError::InvalidFormat(format!("field {name}: {e}")))
    }
}

/// Strip the prefix, base64url-decode and parse. Every failure is a format error.
pub fn parse_token(token: &str) -> Result<Envelope, OespError> {
    let payload = token
        .strip_prefix(TOKEN_PREFIX)
        .ok_or_else(|| OespError::InvalidFormat("missing OESP1. prefix".into()))?;
    let json = b64::url_decode(payload.trim())
        .map_err(|e| OespError::InvalidFormat(format!("token payload: {e}")))?;
    serde_json::from_slice(&json)
        .map_err(|e| OespError::InvalidFormat(format!("envelope structure: {e}")))
}
