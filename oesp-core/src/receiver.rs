//! Receiver: frame-driven, never blocks, holds at most one open transfer session.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::chunk::{IntegrityError, TransferSession};
use crate::config::TransportConfig;
use crate::frame::{Caps, Frame, NackReason, CONTROL_ACK};
use crate::sender::TransportError;

/// Capabilities a peer announced in HELLO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerHello {
    pub sid: String,
    pub ver: u8,
    pub did: String,
    pub caps: Caps,
}

/// A completed, integrity-checked transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub sid: String,
    pub mid: String,
    pub payload: Vec<u8>,
}

/// Frames to write back, plus a delivery or a session failure when one just happened.
#[derive(Debug, Default)]
pub struct ReceiverOutput {
    pub frames: Vec<Frame>,
    pub delivered: Option<Delivery>,
    pub failure: Option<TransportError>,
}

impl ReceiverOutput {
    fn reply(frame: Frame) -> Self {
        Self {
            frames: vec![frame],
            ..Self::default()
        }
    }

    fn reject(frame: Frame, err: TransportError) -> Self {
        Self {
            frames: vec![frame],
            delivered: None,
            failure: Some(err),
        }
    }
}

struct OpenSession {
    transfer: TransferSession,
    last_activity: Instant,
}

pub struct Receiver {
    config: TransportConfig,
    session: Option<OpenSession>,
    peer: Option<PeerHello>,
}

impl Receiver {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            session: None,
            peer: None,
        }
    }

    /// Last HELLO seen from the peer.
    pub fn peer(&self) -> Option<&PeerHello> {
        self.peer.as_ref()
    }

    pub fn open_session(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.transfer.sid.as_str())
    }

    pub fn on_frame(&mut self, frame: &Frame, now: Instant) -> ReceiverOutput {
        match frame {
            Frame::Hello { sid, ver, did, caps } => {
                debug!(%sid, %did, max_chunk = caps.max_chunk, "peer hello");
                self.peer = Some(PeerHello {
                    sid: sid.clone(),
                    ver: *ver,
                    did: did.clone(),
                    caps: caps.clone(),
                });
                ReceiverOutput::default()
            }
            Frame::Start {
                sid,
                mid,
                total_len,
                parts,
                sha256,
            } => {
                if let Some(old) = &self.session {
                    if old.transfer.sid != *sid {
                        debug!(old = %old.transfer.sid, new = %sid, "replacing open session");
                    }
                }
                self.session = Some(OpenSession {
                    transfer: TransferSession::new(
                        sid.clone(),
                        mid.clone(),
                        *total_len as usize,
                        *parts,
                        *sha256,
                    ),
                    last_activity: now,
                });
                ReceiverOutput::reply(Frame::ack(sid, CONTROL_ACK))
            }
            Frame::Chunk { sid, seq, data } => {
                let Some(open) = self.session_for(sid) else {
                    return ReceiverOutput::default();
                };
                open.last_activity = now;
                match open.transfer.store(*seq, data.clone()) {
                    Ok(()) => ReceiverOutput::reply(Frame::ack(sid, *seq as i32)),
                    Err(err) => {
                        warn!(%sid, seq, "chunk outside declared parts, dropping session");
                        self.session = None;
                        let at = i32::try_from(*seq).unwrap_or(i32::MAX);
                        ReceiverOutput::reject(
                            Frame::nack(sid, at, NackReason::BadSeq),
                            TransportError::Integrity(err),
                        )
                    }
                }
            }
            Frame::End { sid } => {
                if self.session_for(sid).is_none() {
                    return ReceiverOutput::default();
                }
                let Some(open) = self.session.take() else {
                    return ReceiverOutput::default();
                };
                Self::finish(open.transfer)
            }
            // ACK and NACK belong to the sending side.
            Frame::Ack { .. } | Frame::Nack { .. } => ReceiverOutput::default(),
        }
    }

    /// Drop the open session if it has been idle longer than the configured timeout.
    pub fn on_tick(&mut self, now: Instant) -> ReceiverOutput {
        let idle = match &self.session {
            Some(open) => now.saturating_duration_since(open.last_activity),
            None => return ReceiverOutput::default(),
        };
        if idle < self.config.idle_timeout {
            return ReceiverOutput::default();
        }
        let Some(open) = self.session.take() else {
            return ReceiverOutput::default();
        };
        warn!(sid = %open.transfer.sid, ?idle, "evicting idle session");
        ReceiverOutput {
            failure: Some(TransportError::SessionExpired {
                sid: open.transfer.sid,
            }),
            ..ReceiverOutput::default()
        }
    }

    fn session_for(&mut self, sid: &str) -> Option<&mut OpenSession> {
        self.session
            .as_mut()
            .filter(|open| open.transfer.sid == sid)
    }

    fn finish(transfer: TransferSession) -> ReceiverOutput {
        let sid = transfer.sid.clone();
        match transfer.reassemble() {
            Ok(payload) => {
                info!(%sid, mid = %transfer.mid, len = payload.len(), "transfer complete");
                ReceiverOutput {
                    frames: vec![Frame::ack(&sid, CONTROL_ACK)],
                    delivered: Some(Delivery {
                        sid,
                        mid: transfer.mid,
                        payload,
                    }),
                    failure: None,
                }
            }
            Err(err) => {
                warn!(
                    %sid,
                    %err,
                    received = transfer.received_count(),
                    parts = transfer.parts,
                    "reassembly failed"
                );
                // A missing part means the received count fell short of START's part count.
                let reason = match err {
                    IntegrityError::MissingSequence { .. }
                    | IntegrityError::SequenceOutOfRange { .. } => NackReason::BadSeq,
                    IntegrityError::LengthMismatch { .. } | IntegrityError::HashMismatch => {
                        NackReason::BadHash
                    }
                };
                ReceiverOutput::reject(Frame::nack(&sid, CONTROL_ACK, reason), err.into())
            }
        }
    }
}
