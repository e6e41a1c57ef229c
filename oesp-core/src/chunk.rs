//! Chunk manager: split a payload into dense sequence-numbered chunks, collect them, reassemble.

use std::collections::BTreeMap;

use crate::integrity;

/// Default chunk size in bytes for BLE links.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Split a payload into chunks of at most `chunk_size` bytes, in sequence order.
/// An empty payload has no chunks. A zero size falls back to [`DEFAULT_CHUNK_SIZE`].
pub fn split_into_chunks(payload: &[u8], chunk_size: usize) -> Vec<&[u8]> {
    let size = if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    };
    payload.chunks(size).collect()
}

/// Reassembly failures, checked in this order: out-of-range sequence, missing sequence,
/// length, hash.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityError {
    #[error("sequence {seq} outside 0..{parts}")]
    SequenceOutOfRange { seq: u32, parts: u32 },
    #[error("missing sequence {seq}")]
    MissingSequence { seq: u32 },
    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("payload hash mismatch")]
    HashMismatch,
}

/// Receiver-side state of one transfer: what START declared and which parts have arrived.
#[derive(Debug, Clone)]
pub struct TransferSession {
    pub sid: String,
    pub mid: String,
    pub total_len: usize,
    pub parts: u32,
    pub expected_hash: [u8; 32],
    received: BTreeMap<u32, Vec<u8>>,
}

impl TransferSession {
    pub fn new(
        sid: impl Into<String>,
        mid: impl Into<String>,
        total_len: usize,
        parts: u32,
        expected_hash: [u8; 32],
    ) -> Self {
        Self {
            sid: sid.into(),
            mid: mid.into(),
            total_len,
            parts,
            expected_hash,
            received: BTreeMap::new(),
        }
    }

    /// Store a part at its slot. A repeated sequence overwrites the earlier payload.
    pub fn store(&mut self, seq: u32, payload: Vec<u8>) -> Result<(), IntegrityError> {
        if seq >= self.parts {
            return Err(IntegrityError::SequenceOutOfRange {
                seq,
                parts: self.parts,
            });
        }
        self.received.insert(seq, payload);
        Ok(())
    }

    pub fn received_count(&self) -> usize {
        self.received.len()
    }

    pub fn is_complete(&self) -> bool {
        self.received.len() == self.parts as usize
    }

    /// Concatenate parts in sequence order and check length and hash against START.
    pub fn reassemble(&self) -> Result<Vec<u8>, IntegrityError> {
        // Sized from what arrived; `total_len` is peer-declared.
        let received: usize = self.received.values().map(Vec::len).sum();
        let mut out = Vec::with_capacity(received.min(self.total_len));
        for seq in 0..self.parts {
            let part = self
                .received
                .get(&seq)
                .ok_or(IntegrityError::MissingSequence { seq })?;
            out.extend_from_slice(part);
        }
        if out.len() != self.total_len {
            return Err(IntegrityError::LengthMismatch {
                expected: self.total_len,
                actual: out.len(),
            });
        }
        if !integrity::verify_payload(&out, &self.expected_hash) {
            return Err(IntegrityError::HashMismatch);
        }
        Ok(out)
    }
}
