//! Core types for the ISOBUS decoder library
//!
//! This module defines the values the decoder emits when processing a frame:
//! the parsed frame header, the payload integer, and the decoded result. The
//! decoder is stateless and does not track values across frames.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Frame timestamp in seconds, as supplied by the caller (0.0 when unknown)
pub type Timestamp = f64;

/// Result type for decoder operations
pub type Result<T> = std::result::Result<T, DecoderError>;

/// Errors that can occur during decoding
///
/// A frame with no matching definition is not an error; it decodes to a
/// [`DecodedFrame`] with an empty `spn_vals` map.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecoderError {
    #[error("Malformed frame '{message}': {reason}")]
    MalformedFrame { message: String, reason: String },

    #[error(
        "Ambiguous definition: {count} definitions match PGN {pgn}, source {source_address}, \
         {length} bytes (frame '{message}')"
    )]
    AmbiguousDefinition {
        pgn: u32,
        source_address: u8,
        length: usize,
        count: usize,
        message: String,
    },

    #[error(
        "Field '{spn_name}' out of range: bits {bit_offset}..{} exceed {payload_bits}-bit \
         payload of PGN {pgn} (frame '{message}')",
        .bit_offset + .bit_length
    )]
    FieldOutOfRange {
        spn_name: String,
        pgn: u32,
        bit_offset: usize,
        bit_length: usize,
        payload_bits: usize,
        message: String,
    },

    #[error("Invalid field specification: {0}")]
    InvalidFieldSpec(String),
}

/// Arbitrary-width unsigned integer formed from a frame payload
///
/// The first payload byte is the least significant byte. Payloads of
/// reassembled multi-frame messages routinely exceed 128 bits, so the value
/// is kept as bytes and only narrowed on request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PayloadInt {
    le_bytes: Vec<u8>,
}

impl PayloadInt {
    /// Build from payload bytes in frame order
    pub fn from_payload(payload: &[u8]) -> Self {
        Self {
            le_bytes: payload.to_vec(),
        }
    }

    /// Width of the integer in bits (8 × payload length)
    pub fn bit_width(&self) -> usize {
        self.le_bytes.len() * 8
    }

    /// True if every bit is zero (or the payload is empty)
    pub fn is_zero(&self) -> bool {
        self.le_bytes.iter().all(|&b| b == 0)
    }

    /// Narrow to u64 if the value fits
    pub fn to_u64(&self) -> Option<u64> {
        self.to_u128().and_then(|v| u64::try_from(v).ok())
    }

    /// Narrow to u128 if the value fits
    pub fn to_u128(&self) -> Option<u128> {
        let significant = self
            .le_bytes
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |idx| idx + 1);
        if significant > 16 {
            return None;
        }
        Some(
            self.le_bytes[..significant]
                .iter()
                .rev()
                .fold(0u128, |acc, &b| (acc << 8) | b as u128),
        )
    }

    /// Bytes of the integer, least significant first, zero-padded to `len`
    ///
    /// Returns `None` if a non-zero byte would have to be dropped.
    pub fn to_le_bytes(&self, len: usize) -> Option<Vec<u8>> {
        if self.le_bytes.iter().skip(len).any(|&b| b != 0) {
            return None;
        }
        let mut bytes: Vec<u8> = self.le_bytes.iter().take(len).copied().collect();
        bytes.resize(len, 0);
        Some(bytes)
    }

    /// Decimal rendering, independent of width
    pub fn to_decimal(&self) -> String {
        const BASE: u64 = 1_000_000_000;

        // Little-endian limbs in base 10^9
        let mut limbs: Vec<u64> = vec![0];
        for &byte in self.le_bytes.iter().rev() {
            let mut carry = byte as u64;
            for limb in limbs.iter_mut() {
                let v = *limb * 256 + carry;
                *limb = v % BASE;
                carry = v / BASE;
            }
            while carry > 0 {
                limbs.push(carry % BASE);
                carry /= BASE;
            }
        }

        let mut iter = limbs.iter().rev();
        let mut out = iter.next().map(|l| l.to_string()).unwrap_or_default();
        for limb in iter {
            out.push_str(&format!("{:09}", limb));
        }
        out
    }
}

impl fmt::Display for PayloadInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_decimal())
    }
}

impl Serialize for PayloadInt {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self.to_u64() {
            Some(v) => serializer.serialize_u64(v),
            None => serializer.collect_str(self),
        }
    }
}

/// Parsed CAN frame: J1939 header fields plus payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameHeader {
    /// Message priority (3 bits, 0 = highest)
    pub priority: u8,
    /// Parameter group number (18 bits)
    pub pgn: u32,
    /// Source address of the sending node
    pub source: u8,
    /// Destination address for peer-addressed (PDU1) messages
    pub destination: Option<u8>,
    /// First 4 bytes of the frame as upper-case hex
    #[serde(rename = "header")]
    pub header_hex: String,
    /// Full frame as upper-case hex
    #[serde(rename = "message")]
    pub message_hex: String,
    /// Payload bytes in frame order
    #[serde(serialize_with = "serialize_hex_bytes")]
    pub payload_bytes: Vec<u8>,
    pub payload_int: PayloadInt,
    pub timestamp: Timestamp,
}

impl FrameHeader {
    /// Number of payload bytes
    pub fn payload_len(&self) -> usize {
        self.payload_bytes.len()
    }

    /// Payload bytes as two-character upper-case hex strings
    pub fn payload_hex(&self) -> Vec<String> {
        self.payload_bytes.iter().map(|b| format!("{:02X}", b)).collect()
    }

    /// Convert the timestamp to DateTime<Utc>, if it is representable
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        if !self.timestamp.is_finite() {
            return None;
        }
        let secs = self.timestamp.floor();
        let nsecs = ((self.timestamp - secs) * 1e9).round().min(999_999_999.0) as u32;
        DateTime::from_timestamp(secs as i64, nsecs)
    }
}

fn serialize_hex_bytes<S: Serializer>(
    bytes: &[u8],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(bytes.iter().map(|b| format!("{:02X}", b)))
}

/// A decoded SPN with its raw and physical value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedField {
    pub spn_name: String,
    pub spn_id: Option<String>,
    /// Raw extracted value before sign handling and scaling
    pub raw_value: u64,
    /// Physical value after scale and offset
    pub value: f64,
    pub units: String,
}

/// Result of decoding one frame
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub header: FrameHeader,
    /// PGN of the matched definition; `None` if no definition matched
    pub matched_pgn: Option<u32>,
    pub manufacturer: Option<String>,
    /// Value of the opcode selector, for definitions that have one
    pub opcode: Option<u64>,
    pub fields: Vec<DecodedField>,
    /// Physical values keyed by SPN name; empty if unmatched
    pub spn_vals: BTreeMap<String, f64>,
}

impl DecodedFrame {
    /// Frame with no matching definition
    pub fn unmatched(header: FrameHeader) -> Self {
        Self {
            header,
            matched_pgn: None,
            manufacturer: None,
            opcode: None,
            fields: Vec::new(),
            spn_vals: BTreeMap::new(),
        }
    }

    /// True if a definition matched this frame
    pub fn is_matched(&self) -> bool {
        self.matched_pgn.is_some()
    }

    /// Matched PGN, or the parsed PGN if nothing matched
    pub fn pgn(&self) -> u32 {
        self.matched_pgn.unwrap_or(self.header.pgn)
    }

    /// Look up a physical value by SPN name
    pub fn value(&self, spn_name: &str) -> Option<f64> {
        self.spn_vals.get(spn_name).copied()
    }
}

// Consumers read `pgn` at the top level, so it is serialized as the
// effective PGN rather than the optional matched one.
impl Serialize for DecodedFrame {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("DecodedFrame", 7)?;
        state.serialize_field("header", &self.header)?;
        state.serialize_field("pgn", &self.pgn())?;
        state.serialize_field("matched", &self.is_matched())?;
        state.serialize_field("manufacturer", &self.manufacturer)?;
        state.serialize_field("opcode", &self.opcode)?;
        state.serialize_field("spn_vals", &self.spn_vals)?;
        state.serialize_field("fields", &self.fields)?;
        state.end()
    }
}
