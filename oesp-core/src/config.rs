//! Transport tuning shared by the senders and the receiver.

use std::time::Duration;

use crate::chunk::DEFAULT_CHUNK_SIZE;
use crate::frame::WireFormat;

pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(3000);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_WINDOW_SIZE: usize = 4;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// ATT header bytes taken out of every GATT write.
pub const ATT_HEADER_LEN: usize = 3;

/// Binary CHUNK framing without the sid: tag, sid length, 4-byte sequence.
const BINARY_CHUNK_OVERHEAD: usize = 1 + 1 + 4;
/// JSON CHUNK framing without the sid, sized for a ten-digit sequence number:
/// `{"t":"CHUNK","sid":"","seq":4294967295,"data":""}`.
const JSON_CHUNK_OVERHEAD: usize = 49;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub max_chunk_bytes: usize,
    /// How long a sender waits for an acknowledgment before resending.
    pub ack_timeout: Duration,
    /// Total sends of one frame, first attempt included.
    pub max_attempts: u32,
    /// Chunks in flight at once for the windowed sender.
    pub window_size: usize,
    pub wire_format: WireFormat,
    /// Receiver drops a session that has seen no frame for this long.
    pub idle_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_chunk_bytes: DEFAULT_CHUNK_SIZE,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            window_size: DEFAULT_WINDOW_SIZE,
            wire_format: WireFormat::Json,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl TransportConfig {
    /// Lower `max_chunk_bytes` so a CHUNK frame fits in one write for the given MTU.
    pub fn fit_to_mtu(mut self, mtu: usize, sid_len: usize) -> Self {
        let fitted = chunk_size_for_mtu(mtu, self.wire_format, sid_len);
        self.max_chunk_bytes = self.max_chunk_bytes.min(fitted);
        self
    }
}

/// Largest chunk payload whose encoded CHUNK frame fits in one write of `mtu` bytes.
/// Never returns less than 1; links with tiny MTUs rely on lower-layer fragmentation.
pub fn chunk_size_for_mtu(mtu: usize, format: WireFormat, sid_len: usize) -> usize {
    let room = mtu.saturating_sub(ATT_HEADER_LEN);
    let payload = match format {
        WireFormat::Binary => room.saturating_sub(BINARY_CHUNK_OVERHEAD + sid_len),
        WireFormat::Json => {
            let text = room.saturating_sub(JSON_CHUNK_OVERHEAD + sid_len);
            // Base64 turns every 3 bytes into 4 characters.
            text / 4 * 3
        }
    };
    payload.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{encode_frame, Frame};

    #[test]
    fn defaults_match_ble_profile() {
        let cfg = TransportConfig::default();
        assert_eq!(cfg.max_chunk_bytes, 1024);
        assert_eq!(cfg.ack_timeout, Duration::from_millis(3000));
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.window_size, 4);
        assert_eq!(cfg.wire_format, WireFormat::Json);
    }

    #[test]
    fn binary_chunk_size() {
        assert_eq!(chunk_size_for_mtu(185, WireFormat::Binary, 8), 168);
        assert_eq!(chunk_size_for_mtu(23, WireFormat::Binary, 8), 6);
    }

    #[test]
    fn json_chunk_size_accounts_for_base64() {
        assert_eq!(chunk_size_for_mtu(185, WireFormat::Json, 8), 93);
    }

    #[test]
    fn tiny_mtu_still_makes_progress() {
        assert_eq!(chunk_size_for_mtu(23, WireFormat::Json, 8), 1);
        assert_eq!(chunk_size_for_mtu(0, WireFormat::Binary, 0), 1);
    }

    #[test]
    fn worst_case_frame_fits_mtu() {
        let sid = "abcd1234";
        for format in [WireFormat::Json, WireFormat::Binary] {
            for mtu in [64usize, 185, 247, 512] {
                let size = chunk_size_for_mtu(mtu, format, sid.len());
                let frame = Frame::Chunk {
                    sid: sid.into(),
                    seq: u32::MAX,
                    data: vec![0xab; size],
                };
                let encoded = encode_frame(&frame, format).unwrap();
                assert!(
                    encoded.len() <= mtu - ATT_HEADER_LEN,
                    "{format:?} mtu {mtu}: {} bytes",
                    encoded.len()
                );
            }
        }
    }

    #[test]
    fn fit_to_mtu_only_lowers() {
        let cfg = TransportConfig::default().fit_to_mtu(185, 8);
        assert_eq!(cfg.max_chunk_bytes, 93);
        let cfg = TransportConfig {
            max_chunk_bytes: 20,
            ..TransportConfig::default()
        }
        .fit_to_mtu(185, 8);
        assert_eq!(cfg.max_chunk_bytes, 20);
    }
}
