//! Frame header parser
//!
//! Splits a hex-encoded CAN frame into its 29-bit J1939 identifier fields and
//! payload. The identifier is carried big-endian in the first four bytes:
//!
//! ```text
//!  28..26    25..24   23..16   15..8    7..0
//! priority | R | DP |   PF   |   PS   |  SA
//! ```
//!
//! PDU2 messages (PF >= 240) are broadcast and PS extends the PGN. PDU1
//! messages are peer-addressed and PS is the destination address.

use crate::types::{DecoderError, FrameHeader, PayloadInt, Result, Timestamp};
use byteorder::{BigEndian, ByteOrder};

/// Number of bytes in the frame header
pub const HEADER_LEN: usize = 4;

/// Lowest PDU-format value of a broadcast (PDU2) message
pub const PDU2_THRESHOLD: u8 = 240;

/// Parse a hex frame with no timestamp
pub fn parse_frame(hex_message: &str) -> Result<FrameHeader> {
    parse_frame_at(hex_message, 0.0)
}

/// Parse a hex frame, recording the caller-supplied timestamp
pub fn parse_frame_at(hex_message: &str, timestamp: Timestamp) -> Result<FrameHeader> {
    let bytes = decode_hex(hex_message)?;
    if bytes.len() < HEADER_LEN {
        return Err(malformed(
            hex_message,
            format!("need at least {} header bytes, got {}", HEADER_LEN, bytes.len()),
        ));
    }

    let (header, payload) = bytes.split_at(HEADER_LEN);
    let id = BigEndian::read_u32(header);

    let source = (id & 0xFF) as u8;
    let pdu_specific = ((id >> 8) & 0xFF) as u8;
    let pdu_format = ((id >> 16) & 0xFF) as u8;
    let reserved_dp = (id >> 24) & 0x03;
    let priority = ((id >> 26) & 0x07) as u8;

    let (pgn, destination) = if pdu_format >= PDU2_THRESHOLD {
        (
            (reserved_dp << 16) | ((pdu_format as u32) << 8) | pdu_specific as u32,
            None,
        )
    } else {
        (
            (reserved_dp << 16) | ((pdu_format as u32) << 8),
            Some(pdu_specific),
        )
    };

    let message_hex = hex_message.to_ascii_uppercase();
    Ok(FrameHeader {
        priority,
        pgn,
        source,
        destination,
        header_hex: message_hex[..HEADER_LEN * 2].to_string(),
        payload_bytes: payload.to_vec(),
        payload_int: PayloadInt::from_payload(payload),
        message_hex,
        timestamp,
    })
}

/// Decode a hex string into bytes, rejecting odd lengths and non-hex digits
pub fn decode_hex(hex_message: &str) -> Result<Vec<u8>> {
    if !hex_message.is_ascii() {
        return Err(malformed(hex_message, "contains non-ASCII characters"));
    }
    if hex_message.len() % 2 != 0 {
        return Err(malformed(
            hex_message,
            format!("odd number of hex digits ({})", hex_message.len()),
        ));
    }

    (0..hex_message.len())
        .step_by(2)
        .map(|i| {
            let pair = &hex_message[i..i + 2];
            if !pair.bytes().all(|c| c.is_ascii_hexdigit()) {
                return Err(malformed(
                    hex_message,
                    format!("invalid hex digits '{}' at position {}", pair, i),
                ));
            }
            u8::from_str_radix(pair, 16)
                .map_err(|e| malformed(hex_message, format!("invalid hex '{}': {}", pair, e)))
        })
        .collect()
}

/// Encode bytes as upper-case hex
pub fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

fn malformed(message: &str, reason: impl Into<String>) -> DecoderError {
    DecoderError::MalformedFrame {
        message: message.to_string(),
        reason: reason.into(),
    }
}
