//! Stop-and-wait sender: START, then each CHUNK, then END, each held until its ACK arrives.
//! Host-driven: the host feeds incoming frames and clock ticks and sends the frames returned.

use std::time::Instant;

use tracing::{debug, warn};

use crate::chunk::{split_into_chunks, IntegrityError};
use crate::config::TransportConfig;
use crate::frame::{Caps, Frame, NackReason, CONTROL_ACK, FRAME_VERSION};
use crate::integrity;

/// Errors that end a transfer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("no acknowledgment for {at} after {attempts} attempts")]
    Timeout { at: i32, attempts: u32 },
    #[error("peer rejected {at}: {reason}")]
    Nack { at: i32, reason: NackReason },
    #[error("integrity check failed: {0}")]
    Integrity(#[from] IntegrityError),
    #[error("session {sid} idle too long")]
    SessionExpired { sid: String },
    #[error("transfer cancelled")]
    Cancelled,
    #[error("payload too large for one transfer")]
    TooLarge,
    #[error("link error: {0}")]
    Link(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Idle,
    SentStart,
    SendingChunks { seq: u32 },
    SentEnd,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderEvent {
    Delivered,
    Failed(TransportError),
}

/// Frames to write, plus a terminal event when the transfer just finished.
#[derive(Debug, Default)]
pub struct SenderOutput {
    pub frames: Vec<Frame>,
    pub event: Option<SenderEvent>,
}

impl SenderOutput {
    fn send(frame: Frame) -> Self {
        Self {
            frames: vec![frame],
            event: None,
        }
    }

    fn finished(event: SenderEvent) -> Self {
        Self {
            frames: Vec::new(),
            event: Some(event),
        }
    }
}

/// The frame currently waiting for acknowledgment.
#[derive(Debug)]
struct Pending {
    frame: Frame,
    expect: i32,
    sent_at: Instant,
    attempts: u32,
}

pub struct StopAndWaitSender {
    config: TransportConfig,
    sid: String,
    mid: String,
    total_len: u32,
    hash: [u8; 32],
    chunks: Vec<Vec<u8>>,
    hello: Option<Frame>,
    state: SenderState,
    pending: Option<Pending>,
}

impl StopAndWaitSender {
    /// Prepare a transfer of `payload`, chunked at `config.max_chunk_bytes`.
    pub fn new(
        sid: impl Into<String>,
        mid: impl Into<String>,
        payload: &[u8],
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        let total_len = u32::try_from(payload.len()).map_err(|_| TransportError::TooLarge)?;
        let chunks: Vec<Vec<u8>> = split_into_chunks(payload, config.max_chunk_bytes)
            .into_iter()
            .map(<[u8]>::to_vec)
            .collect();
        // Sequence numbers are acked as i32.
        if i32::try_from(chunks.len()).is_err() {
            return Err(TransportError::TooLarge);
        }
        Ok(Self {
            sid: sid.into(),
            mid: mid.into(),
            total_len,
            hash: integrity::hash_payload(payload),
            chunks,
            hello: None,
            state: SenderState::Idle,
            pending: None,
            config,
        })
    }

    /// Announce `did` and link capabilities in a HELLO ahead of START.
    pub fn with_hello(mut self, did: impl Into<String>, mtu_hint: Option<u32>) -> Self {
        self.hello = Some(Frame::Hello {
            sid: self.sid.clone(),
            ver: FRAME_VERSION,
            did: did.into(),
            caps: Caps {
                max_chunk: u32::try_from(self.config.max_chunk_bytes).unwrap_or(u32::MAX),
                mtu_hint,
            },
        });
        self
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn parts(&self) -> u32 {
        self.chunks.len() as u32
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, SenderState::Done | SenderState::Failed)
    }

    /// When the pending frame times out, if one is pending.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .as_ref()
            .map(|p| p.sent_at + self.config.ack_timeout)
    }

    /// Emit HELLO (if configured) and START. Calling it again has no effect.
    pub fn begin(&mut self, now: Instant) -> SenderOutput {
        if self.state != SenderState::Idle {
            return SenderOutput::default();
        }
        let start = Frame::Start {
            sid: self.sid.clone(),
            mid: self.mid.clone(),
            total_len: self.total_len,
            parts: self.parts(),
            sha256: self.hash,
        };
        debug!(sid = %self.sid, parts = self.parts(), len = self.total_len, "starting transfer");
        let mut out = SenderOutput::default();
        out.frames.extend(self.hello.clone());
        out.frames.extend(self.await_ack(start, CONTROL_ACK, SenderState::SentStart, now).frames);
        out
    }

    /// Feed a frame read from the link. Frames for other sessions, stale ACKs and NACKs for
    /// other frames are ignored.
    pub fn on_frame(&mut self, frame: &Frame, now: Instant) -> SenderOutput {
        if frame.sid() != self.sid || self.is_finished() {
            return SenderOutput::default();
        }
        let Some(expect) = self.pending.as_ref().map(|p| p.expect) else {
            return SenderOutput::default();
        };
        match frame {
            Frame::Ack { ack, .. } if *ack == expect => self.advance(now),
            Frame::Ack { ack, .. } => {
                debug!(sid = %self.sid, ack, expect, "ignoring stale ack");
                SenderOutput::default()
            }
            Frame::Nack { at, reason, .. } if *at == expect => {
                warn!(sid = %self.sid, at, %reason, "transfer rejected by peer");
                self.fail(TransportError::Nack {
                    at: *at,
                    reason: *reason,
                })
            }
            _ => SenderOutput::default(),
        }
    }

    /// Resend the pending frame once its timeout has elapsed; fail after the last attempt.
    pub fn on_tick(&mut self, now: Instant) -> SenderOutput {
        let timeout = self.config.ack_timeout;
        let max_attempts = self.config.max_attempts.max(1);
        let Some(pending) = self.pending.as_mut() else {
            return SenderOutput::default();
        };
        if now.saturating_duration_since(pending.sent_at) < timeout {
            return SenderOutput::default();
        }
        if pending.attempts >= max_attempts {
            let err = TransportError::Timeout {
                at: pending.expect,
                attempts: pending.attempts,
            };
            warn!(sid = %self.sid, %err, "giving up");
            return self.fail(err);
        }
        pending.attempts += 1;
        pending.sent_at = now;
        debug!(sid = %self.sid, at = pending.expect, attempt = pending.attempts, "resending");
        SenderOutput::send(pending.frame.clone())
    }

    /// Abandon the transfer. No frames are sent; the receiver ages its session out.
    pub fn cancel(&mut self) -> SenderOutput {
        if self.is_finished() {
            return SenderOutput::default();
        }
        self.fail(TransportError::Cancelled)
    }

    fn advance(&mut self, now: Instant) -> SenderOutput {
        let next_seq = match self.state {
            SenderState::SentStart => 0,
            SenderState::SendingChunks { seq } => seq + 1,
            SenderState::SentEnd => {
                self.pending = None;
                self.state = SenderState::Done;
                debug!(sid = %self.sid, "transfer acknowledged");
                return SenderOutput::finished(SenderEvent::Delivered);
            }
            _ => return SenderOutput::default(),
        };
        match self.chunks.get(next_seq as usize) {
            Some(data) => {
                let frame = Frame::Chunk {
                    sid: self.sid.clone(),
                    seq: next_seq,
                    data: data.clone(),
                };
                self.await_ack(
                    frame,
                    next_seq as i32,
                    SenderState::SendingChunks { seq: next_seq },
                    now,
                )
            }
            None => {
                let end = Frame::End {
                    sid: self.sid.clone(),
                };
                self.await_ack(end, CONTROL_ACK, SenderState::SentEnd, now)
            }
        }
    }

    fn await_ack(
        &mut self,
        frame: Frame,
        expect: i32,
        state: SenderState,
        now: Instant,
    ) -> SenderOutput {
        self.state = state;
        self.pending = Some(Pending {
            frame: frame.clone(),
            expect,
            sent_at: now,
            attempts: 1,
        });
        SenderOutput::send(frame)
    }

    fn fail(&mut self, err: TransportError) -> SenderOutput {
        self.pending = None;
        self.state = SenderState::Failed;
        SenderOutput::finished(SenderEvent::Failed(err))
    }
}
