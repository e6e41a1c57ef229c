//! Transport frames and their two wire forms: JSON text and a compact big-endian binary layout.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Transport frame protocol version, carried in HELLO.
pub const FRAME_VERSION: u8 = 1;

/// Ack index for control frames (START and END), distinct from data sequence numbers.
pub const CONTROL_ACK: i32 = -1;

const TAG_HELLO: u8 = 1;
const TAG_START: u8 = 2;
const TAG_CHUNK: u8 = 3;
const TAG_END: u8 = 4;
const TAG_ACK: u8 = 5;
const TAG_NACK: u8 = 6;

/// Which encoding a link uses. Both ends of a link must agree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    #[default]
    Json,
    Binary,
}

impl std::str::FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(WireFormat::Json),
            "binary" | "bin" => Ok(WireFormat::Binary),
            other => Err(format!("unknown wire format: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NackReason {
    BadHash,
    Timeout,
    BadSeq,
    Unknown,
}

impl NackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            NackReason::BadHash => "BAD_HASH",
            NackReason::Timeout => "TIMEOUT",
            NackReason::BadSeq => "BAD_SEQ",
            NackReason::Unknown => "UNKNOWN",
        }
    }

    /// Unrecognised names map to `Unknown`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "BAD_HASH" => NackReason::BadHash,
            "TIMEOUT" => NackReason::Timeout,
            "BAD_SEQ" => NackReason::BadSeq,
            _ => NackReason::Unknown,
        }
    }

    fn code(self) -> u8 {
        match self {
            NackReason::Unknown => 0,
            NackReason::BadHash => 1,
            NackReason::Timeout => 2,
            NackReason::BadSeq => 3,
        }
    }

    fn from_code(code: u8) -> Self {
        match code {
            1 => NackReason::BadHash,
            2 => NackReason::Timeout,
            3 => NackReason::BadSeq,
            _ => NackReason::Unknown,
        }
    }
}

impl fmt::Display for NackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for NackReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for NackReason {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let name = String::deserialize(d)?;
        Ok(NackReason::from_name(&name))
    }
}

/// Link capabilities advertised in HELLO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caps {
    #[serde(rename = "maxChunk")]
    pub max_chunk: u32,
    #[serde(rename = "mtuHint", default, skip_serializing_if = "Option::is_none")]
    pub mtu_hint: Option<u32>,
}

/// All transport frame types. Every frame names the session it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "UPPERCASE")]
pub enum Frame {
    /// Optional capability announcement before START. Not acknowledged.
    Hello {
        sid: String,
        ver: u8,
        did: String,
        caps: Caps,
    },
    /// Opens a transfer: total length, part count and SHA-256 of the whole payload.
    Start {
        sid: String,
        mid: String,
        #[serde(rename = "totalLen")]
        total_len: u32,
        parts: u32,
        #[serde(with = "hash_b64")]
        sha256: [u8; 32],
    },
    Chunk {
        sid: String,
        seq: u32,
        #[serde(with = "data_b64")]
        data: Vec<u8>,
    },
    End {
        sid: String,
    },
    /// `ack` is a chunk sequence number or [`CONTROL_ACK`].
    Ack {
        sid: String,
        ack: i32,
    },
    Nack {
        sid: String,
        at: i32,
        reason: NackReason,
    },
}

impl Frame {
    pub fn sid(&self) -> &str {
        match self {
            Frame::Hello { sid, .. }
            | Frame::Start { sid, .. }
            | Frame::Chunk { sid, .. }
            | Frame::End { sid }
            | Frame::Ack { sid, .. }
            | Frame::Nack { sid, .. } => sid,
        }
    }

    /// Frame type name as it appears in the JSON `t` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Hello { .. } => "HELLO",
            Frame::Start { .. } => "START",
            Frame::Chunk { .. } => "CHUNK",
            Frame::End { .. } => "END",
            Frame::Ack { .. } => "ACK",
            Frame::Nack { .. } => "NACK",
        }
    }

    pub fn ack(sid: &str, ack: i32) -> Self {
        Frame::Ack {
            sid: sid.to_string(),
            ack,
        }
    }

    pub fn nack(sid: &str, at: i32, reason: NackReason) -> Self {
        Frame::Nack {
            sid: sid.to_string(),
            at,
            reason,
        }
    }
}

mod hash_b64 {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::b64;

    pub fn serialize<S: Serializer>(v: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&b64::std_encode(v))
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let buf = b64::std_decode(&s).map_err(serde::de::Error::custom)?;
        buf.try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

mod data_b64 {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::b64;

    pub fn serialize<S: Serializer>(v: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&b64::std_encode(v))
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        b64::std_decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Error encoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("json encode error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0} longer than 255 bytes")]
    FieldTooLong(&'static str),
}

/// Error decoding a frame. Receivers drop such frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("empty frame")]
    Empty,
    #[error("frame truncated")]
    Truncated,
    #[error("unknown frame tag {0}")]
    UnknownTag(u8),
    #[error("{0} trailing bytes")]
    TrailingBytes(usize),
    #[error("invalid utf-8 in {0}")]
    Utf8(&'static str),
    #[error("json decode error: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn encode_frame(frame: &Frame, format: WireFormat) -> Result<Vec<u8>, FrameEncodeError> {
    match format {
        WireFormat::Json => Ok(serde_json::to_vec(frame)?),
        WireFormat::Binary => encode_binary(frame),
    }
}

pub fn decode_frame(bytes: &[u8], format: WireFormat) -> Result<Frame, FrameDecodeError> {
    if bytes.is_empty() {
        return Err(FrameDecodeError::Empty);
    }
    match format {
        WireFormat::Json => Ok(serde_json::from_slice(bytes)?),
        WireFormat::Binary => decode_binary(bytes),
    }
}

fn put_short(out: &mut Vec<u8>, field: &'static str, s: &str) -> Result<(), FrameEncodeError> {
    let len = u8::try_from(s.len()).map_err(|_| FrameEncodeError::FieldTooLong(field))?;
    out.push(len);
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn encode_binary(frame: &Frame) -> Result<Vec<u8>, FrameEncodeError> {
    let mut out = Vec::with_capacity(16);
    let tag = match frame {
        Frame::Hello { .. } => TAG_HELLO,
        Frame::Start { .. } => TAG_START,
        Frame::Chunk { .. } => TAG_CHUNK,
        Frame::End { .. } => TAG_END,
        Frame::Ack { .. } => TAG_ACK,
        Frame::Nack { .. } => TAG_NACK,
    };
    out.push(tag);
    put_short(&mut out, "sid", frame.sid())?;
    match frame {
        Frame::Hello { ver, did, caps, .. } => {
            out.push(*ver);
            out.extend_from_slice(&caps.max_chunk.to_be_bytes());
            out.extend_from_slice(&caps.mtu_hint.unwrap_or(0).to_be_bytes());
            put_short(&mut out, "did", did)?;
        }
        Frame::Start {
            mid,
            total_len,
            parts,
            sha256,
            ..
        } => {
            out.extend_from_slice(&total_len.to_be_bytes());
            out.extend_from_slice(&parts.to_be_bytes());
            out.extend_from_slice(sha256);
            put_short(&mut out, "mid", mid)?;
        }
        Frame::Chunk { seq, data, .. } => {
            out.extend_from_slice(&seq.to_be_bytes());
            out.extend_from_slice(data);
        }
        Frame::End { .. } => {}
        Frame::Ack { ack, .. } => out.extend_from_slice(&ack.to_be_bytes()),
        Frame::Nack { at, reason, .. } => {
            out.extend_from_slice(&at.to_be_bytes());
            out.push(reason.code());
        }
    }
    Ok(out)
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], FrameDecodeError> {
        let end = self.pos.checked_add(n).ok_or(FrameDecodeError::Truncated)?;
        let slice = self.buf.get(self.pos..end).ok_or(FrameDecodeError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, FrameDecodeError> {
        Ok(self.take(1)?[0])
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], FrameDecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, FrameDecodeError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32, FrameDecodeError> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    fn short_str(&mut self, field: &'static str) -> Result<String, FrameDecodeError> {
        let len = self.u8()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| FrameDecodeError::Utf8(field))
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    fn finish(&self) -> Result<(), FrameDecodeError> {
        match self.buf.len() - self.pos {
            0 => Ok(()),
            n => Err(FrameDecodeError::TrailingBytes(n)),
        }
    }
}

fn decode_binary(bytes: &[u8]) -> Result<Frame, FrameDecodeError> {
    let mut r = Reader { buf: bytes, pos: 0 };
    let tag = r.u8()?;
    if !(TAG_HELLO..=TAG_NACK).contains(&tag) {
        return Err(FrameDecodeError::UnknownTag(tag));
    }
    let sid = r.short_str("sid")?;
    let frame = match tag {
        TAG_HELLO => {
            let ver = r.u8()?;
            let max_chunk = r.u32()?;
            let mtu_hint = r.u32()?;
            let did = r.short_str("did")?;
            Frame::Hello {
                sid,
                ver,
                did,
                caps: Caps {
                    max_chunk,
                    mtu_hint: (mtu_hint != 0).then_some(mtu_hint),
                },
            }
        }
        TAG_START => {
            let total_len = r.u32()?;
            let parts = r.u32()?;
            let sha256 = r.array::<32>()?;
            let mid = r.short_str("mid")?;
            Frame::Start {
                sid,
                mid,
                total_len,
                parts,
                sha256,
            }
        }
        TAG_CHUNK => {
            let seq = r.u32()?;
            let data = r.rest().to_vec();
            Frame::Chunk { sid, seq, data }
        }
        TAG_END => Frame::End { sid },
        TAG_ACK => Frame::Ack { sid, ack: r.i32()? },
        _ => {
            let at = r.i32()?;
            let reason = NackReason::from_code(r.u8()?);
            Frame::Nack { sid, at, reason }
        }
    };
    r.finish()?;
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_frames() -> Vec<Frame> {
        vec![
            Frame::Hello {
                sid: "s1".into(),
                ver: FRAME_VERSION,
                did: "oesp:did:abc".into(),
                caps: Caps {
                    max_chunk: 180,
                    mtu_hint: Some(185),
                },
            },
            Frame::Start {
                sid: "s1".into(),
                mid: "m1".into(),
                total_len: 1000,
                parts: 6,
                sha256: [7u8; 32],
            },
            Frame::Chunk {
                sid: "s1".into(),
                seq: 3,
                data: vec![0, 1, 2, 255],
            },
            Frame::End { sid: "s1".into() },
            Frame::ack("s1", CONTROL_ACK),
            Frame::nack("s1", 4, NackReason::BadSeq),
        ]
    }

    #[test]
    fn both_formats_preserve_every_frame_type() {
        for format in [WireFormat::Json, WireFormat::Binary] {
            for frame in all_frames() {
                let bytes = encode_frame(&frame, format).unwrap();
                assert_eq!(decode_frame(&bytes, format).unwrap(), frame, "{format:?}");
            }
        }
    }

    #[test]
    fn json_field_names() {
        let start = &all_frames()[1];
        let v: serde_json::Value =
            serde_json::from_slice(&encode_frame(start, WireFormat::Json).unwrap()).unwrap();
        assert_eq!(v["t"], "START");
        assert_eq!(v["totalLen"], 1000);
        assert_eq!(v["parts"], 6);
        assert_eq!(v["sha256"], crate::b64::std_encode(&[7u8; 32]));

        let nack = encode_frame(&Frame::nack("s", -1, NackReason::BadHash), WireFormat::Json).unwrap();
        assert_eq!(
            std::str::from_utf8(&nack).unwrap(),
            r#"{"t":"NACK","sid":"s","at":-1,"reason":"BAD_HASH"}"#
        );
    }

    #[test]
    fn json_accepts_frames_from_other_implementations() {
        let raw = br#"{"t":"CHUNK","sid":"ab12","seq":0,"data":"aGk="}"#;
        assert_eq!(
            decode_frame(raw, WireFormat::Json).unwrap(),
            Frame::Chunk {
                sid: "ab12".into(),
                seq: 0,
                data: b"hi".to_vec()
            }
        );
        let hello = br#"{"t":"HELLO","sid":"x","ver":1,"did":"d","caps":{"maxChunk":20}}"#;
        match decode_frame(hello, WireFormat::Json).unwrap() {
            Frame::Hello { caps, .. } => assert_eq!(caps.mtu_hint, None),
            other => panic!("expected HELLO, got {other:?}"),
        }
    }

    #[test]
    fn unknown_nack_reason_maps_to_unknown() {
        let raw = br#"{"t":"NACK","sid":"s","at":2,"reason":"SOMETHING_NEW"}"#;
        assert_eq!(
            decode_frame(raw, WireFormat::Json).unwrap(),
            Frame::nack("s", 2, NackReason::Unknown)
        );
    }

    #[test]
    fn binary_layout_is_big_endian() {
        let bytes = encode_frame(&Frame::ack("ab", CONTROL_ACK), WireFormat::Binary).unwrap();
        assert_eq!(bytes, vec![TAG_ACK, 2, b'a', b'b', 0xff, 0xff, 0xff, 0xff]);
        let chunk = Frame::Chunk {
            sid: "s".into(),
            seq: 258,
            data: vec![9],
        };
        assert_eq!(
            encode_frame(&chunk, WireFormat::Binary).unwrap(),
            vec![TAG_CHUNK, 1, b's', 0, 0, 1, 2, 9]
        );
    }

    #[test]
    fn binary_rejects_malformed_input() {
        assert!(matches!(
            decode_frame(&[], WireFormat::Binary),
            Err(FrameDecodeError::Empty)
        ));
        assert!(matches!(
            decode_frame(&[42, 0], WireFormat::Binary),
            Err(FrameDecodeError::UnknownTag(42))
        ));
        assert!(matches!(
            decode_frame(&[TAG_ACK, 1, b's', 0, 0], WireFormat::Binary),
            Err(FrameDecodeError::Truncated)
        ));
        assert!(matches!(
            decode_frame(&[TAG_END, 1, b's', 0], WireFormat::Binary),
            Err(FrameDecodeError::TrailingBytes(1))
        ));
    }

    #[test]
    fn json_rejects_garbage() {
        assert!(decode_frame(b"not json", WireFormat::Json).is_err());
        assert!(decode_frame(br#"{"t":"BOGUS","sid":"s"}"#, WireFormat::Json).is_err());
        assert!(decode_frame(br#"{"t":"CHUNK","sid":"s","seq":-1,"data":""}"#, WireFormat::Json).is_err());
    }

    #[test]
    fn oversized_sid_rejected_in_binary() {
        let frame = Frame::End { sid: "x".repeat(300) };
        assert!(matches!(
            encode_frame(&frame, WireFormat::Binary),
            Err(FrameEncodeError::FieldTooLong("sid"))
        ));
        assert!(encode_frame(&frame, WireFormat::Json).is_ok());
    }

    #[test]
    fn wire_format_parses_from_config_strings() {
        assert_eq!("JSON".parse::<WireFormat>().unwrap(), WireFormat::Json);
        assert_eq!("binary".parse::<WireFormat>().unwrap(), WireFormat::Binary);
        assert!("xml".parse::<WireFormat>().is_err());
    }
}
