//! Envelope codec: pack, verify and unpack OESP tokens.
//!
//! `verify` consumes the replay slot of `(sid, mid)`; `unpack` is `verify` followed by
//! decryption, so a token can be verified or unpacked once, not both. Failures are returned as
//! errors, never as an unverified result.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tracing::debug;
use zeroize::Zeroizing;

use crate::b64;
use crate::canonical::canonical_json_bytes;
use crate::crypto::{CryptoProvider, SoftwareCrypto, ENC_ALG, KEX_ALG, SESSION_KEY_LEN, SIG_ALG};
use crate::did::derive_did;
use crate::envelope::{
    parse_token, Envelope, Recipient, Sender, DEFAULT_TYP, ENVELOPE_VERSION,
};
use crate::error::OespError;
use crate::freshness::FreshnessGuard;
use crate::identity::Keystore;
use crate::resolver::PeerResolver;

/// Default time-to-live for packed envelopes, in seconds.
pub const DEFAULT_TTL_SECS: u64 = 600;

const MID_LEN: usize = 12;

/// Message body: raw bytes, or a JSON value that is encoded canonically.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Bytes(Vec<u8>),
    Json(Value),
}

impl Body {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Body::Bytes(b) => b,
            Body::Json(v) => canonical_json_bytes(&v),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(b: Vec<u8>) -> Self {
        Body::Bytes(b)
    }
}

impl From<&[u8]> for Body {
    fn from(b: &[u8]) -> Self {
        Body::Bytes(b.to_vec())
    }
}

impl From<Value> for Body {
    fn from(v: Value) -> Self {
        Body::Json(v)
    }
}

/// Options for [`OespClient::pack_with`].
#[derive(Debug, Clone)]
pub struct PackOptions {
    pub ttl_secs: u64,
    pub typ: String,
    /// Issue time override; the system clock when `None`.
    pub now: Option<i64>,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TTL_SECS,
            typ: DEFAULT_TYP.to_string(),
            now: None,
        }
    }
}

/// Checks applied by verify/unpack besides expiry.
#[derive(Debug, Clone)]
pub struct VerifyPolicy {
    /// Reject when `|ts - now|` exceeds this many seconds.
    pub max_clock_skew_secs: Option<u64>,
    /// Reject envelopes whose `typ` differs.
    pub enforce_typ: Option<String>,
}

impl Default for VerifyPolicy {
    fn default() -> Self {
        Self {
            max_clock_skew_secs: None,
            enforce_typ: Some(DEFAULT_TYP.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedEnvelope {
    pub signer_did: String,
    pub envelope: Envelope,
    pub verified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    pub mid: String,
    pub sid: String,
    pub ts: i64,
    pub exp: i64,
    pub from_did: String,
    pub to_did: String,
    pub plaintext: Vec<u8>,
}

/// Byte fields of a parsed envelope, decoded once up front so malformed encodings surface
/// as format errors before any security check.
struct RawFields {
    sender_pub: Vec<u8>,
    ek: Vec<u8>,
    iv: Vec<u8>,
    ct: Vec<u8>,
    tag: Option<Vec<u8>>,
    sig: Vec<u8>,
}

impl RawFields {
    fn decode(env: &Envelope) -> Result<Self, OespError> {
        Ok(Self {
            sender_pub: Envelope::field_bytes("from.pub", &env.sender.public_key)?,
            ek: Envelope::field_bytes("ek", &env.ek)?,
            iv: Envelope::field_bytes("iv", &env.iv)?,
            ct: Envelope::field_bytes("ct", &env.ct)?,
            tag: env
                .tag
                .as_deref()
                .map(|t| Envelope::field_bytes("tag", t))
                .transpose()?,
            sig: Envelope::field_bytes("sig", &env.sig)?,
        })
    }
}

/// Seconds since the Unix epoch.
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// One principal's view of the protocol: its keystore plus the collaborators it consults.
pub struct OespClient {
    keystore: Arc<dyn Keystore>,
    crypto: Arc<dyn CryptoProvider>,
    resolver: Arc<dyn PeerResolver>,
    freshness: Arc<dyn FreshnessGuard>,
    policy: VerifyPolicy,
}

impl OespClient {
    pub fn new(
        keystore: Arc<dyn Keystore>,
        resolver: Arc<dyn PeerResolver>,
        freshness: Arc<dyn FreshnessGuard>,
    ) -> Self {
        Self {
            keystore,
            crypto: Arc::new(SoftwareCrypto::new()),
            resolver,
            freshness,
            policy: VerifyPolicy::default(),
        }
    }

    pub fn with_crypto(mut self, crypto: Arc<dyn CryptoProvider>) -> Self {
        self.crypto = crypto;
        self
    }

    pub fn with_policy(mut self, policy: VerifyPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn did(&self) -> String {
        self.keystore.did()
    }

    pub fn keystore(&self) -> &Arc<dyn Keystore> {
        &self.keystore
    }

    pub fn pack(
        &self,
        to_did: &str,
        body: impl Into<Body>,
        ttl_secs: u64,
    ) -> Result<String, OespError> {
        self.pack_with(
            to_did,
            body,
            &PackOptions {
                ttl_secs,
                ..PackOptions::default()
            },
        )
    }

    pub fn pack_with(
        &self,
        to_did: &str,
        body: impl Into<Body>,
        opts: &PackOptions,
    ) -> Result<String, OespError> {
        let recipient_kex = self.resolver.resolve(to_did)?;

        let mut session_key = Zeroizing::new([0u8; SESSION_KEY_LEN]);
        session_key.copy_from_slice(&self.crypto.random_bytes(SESSION_KEY_LEN));
        let mid = b64::url_encode(&self.crypto.random_bytes(MID_LEN));
        let ek = self.crypto.seal(&recipient_kex, session_key.as_ref())?;

        let now = opts.now.unwrap_or_else(now_secs);
        let ttl = i64::try_from(opts.ttl_secs)
            .map_err(|_| OespError::InvalidFormat("ttl out of range".into()))?;
        let exp = now
            .checked_add(ttl)
            .ok_or_else(|| OespError::InvalidFormat("ttl out of range".into()))?;
        let sid = self.keystore.did();

        let mut env = Envelope {
            v: ENVELOPE_VERSION,
            typ: opts.typ.clone(),
            mid,
            sid: sid.clone(),
            ts: now,
            exp,
            sender: Sender {
                did: sid,
                public_key: b64::url_encode(&self.keystore.signing_public_key()),
            },
            recipient: Recipient {
                did: to_did.to_string(),
            },
            enc: ENC_ALG.to_string(),
            kex: KEX_ALG.to_string(),
            ek: b64::url_encode(&ek),
            iv: String::new(),
            ct: String::new(),
            tag: None,
            sig_alg: SIG_ALG.to_string(),
            sig: String::new(),
        };

        let aad = env.aad();
        let plaintext = Zeroizing::new(body.into().into_bytes());
        let sealed = self.crypto.aead_encrypt(&session_key, &plaintext, &aad)?;
        env.iv = b64::url_encode(&sealed.nonce);
        env.ct = b64::url_encode(&sealed.ciphertext);
        env.tag = sealed.tag.as_deref().map(b64::url_encode);

        let signature = self.keystore.sign(&env.signing_input(&sealed.ciphertext))?;
        env.sig = b64::url_encode(&signature);

        debug!(mid = %env.mid, to = %to_did, exp = env.exp, "packed envelope");
        Ok(env.to_token())
    }

    /// Authenticate a token and consume its replay slot.
    pub fn verify(
        &self,
        token: &str,
        now: i64,
        allow_expired: bool,
    ) -> Result<VerifiedEnvelope, OespError> {
        let env = parse_token(token)?;
        let raw = RawFields::decode(&env)?;
        self.verify_parsed(&env, &raw, now, allow_expired)
            .inspect_err(|e| debug!(code = e.code(), mid = %env.mid, "envelope rejected"))?;
        Ok(VerifiedEnvelope {
            signer_did: env.sender.did.clone(),
            envelope: env,
            verified: true,
        })
    }

    /// Verify, then open the session key and decrypt. No plaintext is returned on any failure.
    pub fn unpack(
        &self,
        token: &str,
        now: i64,
        allow_expired: bool,
    ) -> Result<DecodedMessage, OespError> {
        let env = parse_token(token)?;
        let raw = RawFields::decode(&env)?;
        self.verify_parsed(&env, &raw, now, allow_expired)
            .inspect_err(|e| debug!(code = e.code(), mid = %env.mid, "envelope rejected"))?;

        let opened = Zeroizing::new(self.crypto.open(self.keystore.as_ref(), &raw.ek)?);
        if opened.len() != SESSION_KEY_LEN {
            return Err(OespError::DecryptionFailed);
        }
        let mut session_key = Zeroizing::new([0u8; SESSION_KEY_LEN]);
        session_key.copy_from_slice(&opened);

        let mut ciphertext = raw.ct;
        if let Some(tag) = &raw.tag {
            ciphertext.extend_from_slice(tag);
        }
        let plaintext = self
            .crypto
            .aead_decrypt(&session_key, &raw.iv, &ciphertext, &env.aad())?;

        debug!(mid = %env.mid, from = %env.sender.did, "unpacked envelope");
        Ok(DecodedMessage {
            mid: env.mid,
            sid: env.sid,
            ts: env.ts,
            exp: env.exp,
            from_did: env.sender.did,
            to_did: env.recipient.did,
            plaintext,
        })
    }

    fn verify_parsed(
        &self,
        env: &Envelope,
        raw: &RawFields,
        now: i64,
        allow_expired: bool,
    ) -> Result<(), OespError> {
        check_algorithms(env)?;
        if let Some(typ) = &self.policy.enforce_typ {
            if &env.typ != typ {
                return Err(OespError::InvalidFormat(format!(
                    "unexpected envelope type {}",
                    env.typ
                )));
            }
        }
        if env.exp < env.ts {
            return Err(OespError::InvalidFormat("exp precedes ts".into()));
        }

        if !allow_expired && env.exp < now {
            return Err(OespError::Expired { exp: env.exp, now });
        }
        if let Some(skew) = self.policy.max_clock_skew_secs {
            if env.ts.abs_diff(now) > skew {
                return Err(OespError::ClockSkew { ts: env.ts, now });
            }
        }

        let derived = derive_did(&raw.sender_pub);
        if derived != env.sender.did || derived != env.sid {
            return Err(OespError::DidMismatch);
        }

        let input = env.signing_input(&raw.ct);
        if !self.crypto.verify(&raw.sender_pub, &input, &raw.sig) {
            return Err(OespError::InvalidSignature);
        }

        if !self.freshness.check_and_mark(&env.sid, &env.mid)? {
            return Err(OespError::Replay {
                mid: env.mid.clone(),
            });
        }
        Ok(())
    }
}

fn check_algorithms(env: &Envelope) -> Result<(), OespError> {
    if env.v != ENVELOPE_VERSION {
        return Err(OespError::UnsupportedAlg(format!("envelope version {}", env.v)));
    }
    for (declared, supported) in [
        (&env.enc, ENC_ALG),
        (&env.kex, KEX_ALG),
        (&env.sig_alg, SIG_ALG),
    ] {
        if declared != supported {
            return Err(OespError::UnsupportedAlg(declared.clone()));
        }
    }
    Ok(())
}
