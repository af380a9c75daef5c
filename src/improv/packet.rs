//! Improv frame codec.
//!
//! # Frame Format
//!
//! ```text
//! +--------+---------+------+--------+-------------+----------+
//! | IMPROV | version | type | length | payload     | checksum |
//! | 6 B    | 1 B     | 1 B  | 1 B    | length B    | 1 B      |
//! +--------+---------+------+--------+-------------+----------+
//! ```
//!
//! The checksum is the sum of version, type, length and payload bytes,
//! modulo 256. The `IMPROV` header is not part of the sum.
//!
//! RPC command payloads are `[command id][strings...]` and RPC result
//! payloads are `[strings...]`, where each string is `[len][utf-8 bytes]`.

use super::PacketType;

/// Frame header.
pub const HEADER: &[u8; 6] = b"IMPROV";

/// Protocol version written into every frame.
pub const VERSION: u8 = 0x01;

/// Largest payload a frame can carry.
pub const MAX_PAYLOAD_LEN: usize = 255;

/// Header, version, type, length and checksum bytes.
pub const FRAME_OVERHEAD: usize = HEADER.len() + 4;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImprovPacket {
    pub packet_type: PacketType,
    pub payload: Vec<u8>,
}

/// Frame codec errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// More bytes are needed to finish the frame.
    Incomplete,
    /// Input does not start with the frame header.
    Framing,
    /// Checksum mismatch; `consumed` bytes belong to the bad frame.
    Checksum {
        expected: u8,
        actual: u8,
        consumed: usize,
    },
    /// Well-formed frame of an unknown type.
    UnknownType { packet_type: u8, consumed: usize },
    /// Payload or string does not fit a length byte.
    PayloadTooLong(usize),
}

impl std::fmt::Display for PacketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Incomplete => write!(f, "incomplete frame"),
            Self::Framing => write!(f, "missing frame header"),
            Self::Checksum {
                expected, actual, ..
            } => write!(
                f,
                "checksum mismatch: expected {:#04x}, got {:#04x}",
                expected, actual
            ),
            Self::UnknownType { packet_type, .. } => {
                write!(f, "unknown packet type {:#04x}", packet_type)
            }
            Self::PayloadTooLong(len) => {
                write!(f, "payload too long: {} bytes (max {})", len, MAX_PAYLOAD_LEN)
            }
        }
    }
}

impl std::error::Error for PacketError {}

/// Sum of `bytes` modulo 256.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Build a frame.
pub fn encode(packet_type: PacketType, payload: &[u8]) -> Result<Vec<u8>, PacketError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(PacketError::PayloadTooLong(payload.len()));
    }

    let mut frame = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
    frame.extend_from_slice(HEADER);
    frame.push(VERSION);
    frame.push(packet_type as u8);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    frame.push(checksum(&frame[HEADER.len()..]));
    Ok(frame)
}

/// Decode the frame at the start of `bytes`.
///
/// Returns the packet and the number of bytes it occupied. The version byte
/// is covered by the checksum but not otherwise checked.
pub fn decode(bytes: &[u8]) -> Result<(ImprovPacket, usize), PacketError> {
    let header_len = bytes.len().min(HEADER.len());
    if bytes[..header_len] != HEADER[..header_len] {
        return Err(PacketError::Framing);
    }
    if bytes.len() < HEADER.len() + 3 {
        return Err(PacketError::Incomplete);
    }

    let len = bytes[HEADER.len() + 2] as usize;
    let total = FRAME_OVERHEAD + len;
    if bytes.len() < total {
        return Err(PacketError::Incomplete);
    }

    let expected = checksum(&bytes[HEADER.len()..total - 1]);
    let actual = bytes[total - 1];
    if expected != actual {
        return Err(PacketError::Checksum {
            expected,
            actual,
            consumed: total,
        });
    }

    let type_byte = bytes[HEADER.len() + 1];
    let packet_type = PacketType::try_from(type_byte).map_err(|_| PacketError::UnknownType {
        packet_type: type_byte,
        consumed: total,
    })?;

    let payload_start = HEADER.len() + 3;
    Ok((
        ImprovPacket {
            packet_type,
            payload: bytes[payload_start..payload_start + len].to_vec(),
        },
        total,
    ))
}

/// Encode strings as `[len][bytes]` records.
pub fn encode_strings(strings: &[&str]) -> Result<Vec<u8>, PacketError> {
    let mut out = Vec::new();
    for s in strings {
        if s.len() > u8::MAX as usize {
            return Err(PacketError::PayloadTooLong(s.len()));
        }
        out.push(s.len() as u8);
        out.extend_from_slice(s.as_bytes());
    }
    Ok(out)
}

/// Decode `[len][bytes]` records.
///
/// Stops at the first record whose length runs past the end of `data` or
/// whose bytes are not UTF-8; the records before it are returned.
pub fn decode_strings(data: &[u8]) -> Vec<String> {
    let mut strings = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let len = data[offset] as usize;
        offset += 1;
        let Some(record) = data.get(offset..offset + len) else {
            break;
        };
        match std::str::from_utf8(record) {
            Ok(s) => strings.push(s.to_string()),
            Err(_) => break,
        }
        offset += len;
    }
    strings
}
