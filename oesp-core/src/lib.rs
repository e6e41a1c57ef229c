//! OESP protocol reference implementation: signed, encrypted envelopes and chunked delivery.
//! Host-driven: no I/O; host passes frames and clock ticks and receives frames to send.

pub mod b64;
pub mod canonical;
pub mod codec;
pub mod crypto;
pub mod did;
pub mod envelope;
pub mod error;
pub mod freshness;
pub mod identity;
pub mod resolver;

pub use codec::{
    now_secs, Body, DecodedMessage, OespClient, PackOptions, VerifiedEnvelope, VerifyPolicy,
    DEFAULT_TTL_SECS,
};
pub use crypto::{CryptoProvider, SoftwareCrypto};
pub use did::{derive_did, is_did, DID_PREFIX};
pub use envelope::{parse_token, Envelope, TOKEN_PREFIX};
pub use error::OespError;
pub use freshness::{FreshnessGuard, MemoryFreshnessGuard};
pub use identity::{IdentityProvider, Keystore, MemoryIdentityProvider, MemoryKeystore};
pub use resolver::{MemoryResolver, PeerResolver};

// Chunked transport.
pub mod chunk;
pub mod config;
pub mod frame;
pub mod integrity;
pub mod receiver;
pub mod sender;
pub mod window;

pub use chunk::{split_into_chunks, IntegrityError, TransferSession};
pub use config::{chunk_size_for_mtu, TransportConfig};
pub use frame::{
    decode_frame, encode_frame, Frame, FrameDecodeError, FrameEncodeError, NackReason, WireFormat,
};
pub use receiver::{Delivery, Receiver, ReceiverOutput};
pub use sender::{SenderEvent, SenderOutput, SenderState, StopAndWaitSender, TransportError};
pub use window::{Commit, Sweep, WindowedSender};
