//! Message Decoding Engine
//!
//! Extracts SPN values from frame payloads based on a matched message
//! definition. Handles bit extraction in both layouts, sign interpretation,
//! opcode selection, and physical value conversion.

use crate::definitions::{ByteOrder, FieldSpec, MessageDefinition, ValueType};
use crate::types::{DecodedField, DecodedFrame, DecoderError, FrameHeader, Result};
use std::collections::BTreeMap;

/// Widest field the extractor can return
pub const MAX_FIELD_BITS: usize = 64;

/// Message decoder - extracts SPNs from a parsed frame
pub struct MessageDecoder;

impl MessageDecoder {
    /// Decode every applicable field of `definition` from `header`
    ///
    /// The header is consumed into the returned frame. Any field error aborts
    /// the whole decode; no partial result is returned.
    pub fn decode_message(header: FrameHeader, definition: &MessageDefinition) -> Result<DecodedFrame> {
        let opcode = match &definition.opcode_field {
            Some(selector) => Some(Self::extract_field(&header, definition.pgn, selector)?),
            None => None,
        };

        let mut fields = Vec::new();
        let mut spn_vals = BTreeMap::new();

        for field in definition.fields_for_opcode(opcode) {
            let decoded = Self::decode_field(&header, definition.pgn, field)?;
            spn_vals.insert(decoded.spn_name.clone(), decoded.value);
            fields.push(decoded);
        }

        log::debug!(
            "Decoded PGN {} from source {}: {} fields",
            definition.pgn,
            header.source,
            fields.len()
        );

        Ok(DecodedFrame {
            header,
            matched_pgn: Some(definition.pgn),
            manufacturer: Some(definition.manufacturer.clone()),
            opcode,
            fields,
            spn_vals,
        })
    }

    /// Decode a single field from frame data
    fn decode_field(header: &FrameHeader, pgn: u32, field: &FieldSpec) -> Result<DecodedField> {
        let raw_value = Self::extract_field(header, pgn, field)?;

        Ok(DecodedField {
            spn_name: field.spn_name.clone(),
            spn_id: field.spn_id.clone(),
            raw_value,
            value: Self::physical_value(raw_value, field),
            units: field.units.clone(),
        })
    }

    /// Extract a field's raw unsigned value from the frame payload
    ///
    /// Fails with `FieldOutOfRange` if the field extends past the payload
    /// and with `InvalidFieldSpec` for zero-width or over-wide fields.
    pub fn extract_field(header: &FrameHeader, pgn: u32, field: &FieldSpec) -> Result<u64> {
        let start_bit = field.bit_offset();
        let length = field.bit_length as usize;
        let payload_bits = header.payload_bytes.len() * 8;

        if length == 0 || length > MAX_FIELD_BITS {
            return Err(DecoderError::InvalidFieldSpec(format!(
                "field '{}' has bit length {}, expected 1..={}",
                field.spn_name, length, MAX_FIELD_BITS
            )));
        }

        if start_bit + length > payload_bits {
            log::warn!(
                "Field '{}' requires bits {}..{} but frame only has {} bits",
                field.spn_name,
                start_bit,
                start_bit + length,
                payload_bits
            );
            return Err(DecoderError::FieldOutOfRange {
                spn_name: field.spn_name.clone(),
                pgn,
                bit_offset: start_bit,
                bit_length: length,
                payload_bits,
                message: header.message_hex.clone(),
            });
        }

        Ok(Self::extract_bits(&header.payload_bytes, start_bit, length, field.byte_order))
    }

    /// Extract raw bits in the given layout; bounds are checked by the caller
    fn extract_bits(data: &[u8], start_bit: usize, length: usize, order: ByteOrder) -> u64 {
        match order {
            ByteOrder::LittleEndian => Self::extract_little_endian(data, start_bit, length),
            ByteOrder::BigEndian => Self::extract_big_endian(data, start_bit, length),
        }
    }

    /// Convert a raw value to its physical value
    ///
    /// `raw * scale_factor + offset`, with the raw value read as two's
    /// complement for signed fields. No clamping or rounding.
    pub fn physical_value(raw_value: u64, field: &FieldSpec) -> f64 {
        let raw = match field.value_type {
            ValueType::Unsigned => raw_value as f64,
            ValueType::Signed => Self::sign_extend(raw_value, field.bit_length as usize) as f64,
        };
        raw * field.scale_factor + field.offset
    }

    /// Extract a field with little-endian (Intel) layout
    ///
    /// The payload is one little-endian integer and the field is
    /// `(payload >> start_bit) & mask`. Only the bytes the field touches are
    /// folded, so payloads of any length work.
    fn extract_little_endian(data: &[u8], start_bit: usize, length: usize) -> u64 {
        let window = Self::window(data, start_bit, length);
        let value = window
            .iter()
            .rev()
            .fold(0u128, |acc, &b| (acc << 8) | b as u128);
        ((value >> (start_bit % 8)) & Self::mask(length)) as u64
    }

    /// Extract a field with big-endian (Motorola) layout
    ///
    /// The payload is one bit string, each byte most significant bit first,
    /// and the field is the substring at `start_bit`.
    fn extract_big_endian(data: &[u8], start_bit: usize, length: usize) -> u64 {
        let window = Self::window(data, start_bit, length);
        let value = window.iter().fold(0u128, |acc, &b| (acc << 8) | b as u128);
        let trailing = window.len() * 8 - start_bit % 8 - length;
        ((value >> trailing) & Self::mask(length)) as u64
    }

    /// Bytes covering bits `start_bit..start_bit + length` (at most 9 for a
    /// 64-bit field)
    fn window(data: &[u8], start_bit: usize, length: usize) -> &[u8] {
        &data[start_bit / 8..(start_bit + length + 7) / 8]
    }

    fn mask(length: usize) -> u128 {
        (1u128 << length) - 1
    }

    /// Reinterpret the low `bit_length` bits as two's complement
    fn sign_extend(value: u64, bit_length: usize) -> i64 {
        match bit_length {
            0 => 0,
            64.. => value as i64,
            n => {
                let shift = 64 - n;
                ((value << shift) as i64) >> shift
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::parse_frame;

    fn field(position: &str, bits: u16) -> FieldSpec {
        FieldSpec::new("test", position.parse().unwrap(), bits)
    }

    #[test]
    fn test_extract_little_endian_simple() {
        let data = vec![0xAB, 0xCD, 0xEF, 0x12];
        let value = MessageDecoder::extract_little_endian(&data, 0, 8);
        assert_eq!(value, 0xAB);
    }

    #[test]
    fn test_extract_little_endian_cross_byte() {
        let data = vec![0xAB, 0xCD, 0xEF, 0x12];
        let value = MessageDecoder::extract_little_endian(&data, 0, 16);
        assert_eq!(value, 0xCDAB);
        // High nibble of byte 1 and low nibble of byte 2
        let value = MessageDecoder::extract_little_endian(&data, 4, 8);
        assert_eq!(value, 0xDA);
    }

    #[test]
    fn test_extract_little_endian_matches_payload_shift() {
        // (payload_int >> 3) & 0xFF, payload read little-endian
        let header = parse_frame("60FEF31CD1EE2397FA7C744B").unwrap();
        let payload = header.payload_int.to_u64().unwrap();
        let value = MessageDecoder::extract_little_endian(&header.payload_bytes, 3, 8);
        assert_eq!(value, (payload >> 3) & 0xFF);
        assert_eq!(value, 218);
    }

    #[test]
    fn test_extract_big_endian_simple() {
        let data = vec![0xAB, 0xCD, 0xEF, 0x12];
        let value = MessageDecoder::extract_big_endian(&data, 0, 8);
        assert_eq!(value, 0xAB);
        let value = MessageDecoder::extract_big_endian(&data, 4, 8);
        assert_eq!(value, 0xBC);
        let value = MessageDecoder::extract_big_endian(&data, 10, 3);
        assert_eq!(value, 0b001);
    }

    #[test]
    fn test_extract_full_64_bits() {
        let data = [0xFF; 8];
        assert_eq!(MessageDecoder::extract_little_endian(&data, 0, 64), u64::MAX);
        assert_eq!(MessageDecoder::extract_big_endian(&data, 0, 64), u64::MAX);
    }

    #[test]
    fn test_extraction_is_linear_little_endian() {
        let data = [0x3D, 0x42, 0x23, 0x97, 0x72, 0x2E, 0x72, 0x4B];
        for (n, m) in [(5, 11), (8, 8), (13, 30), (1, 63)] {
            let low = MessageDecoder::extract_little_endian(&data, 0, n);
            let high = MessageDecoder::extract_little_endian(&data, n, m);
            let whole = MessageDecoder::extract_little_endian(&data, 0, n + m);
            assert_eq!(whole, (high << n) | low, "split at {} + {}", n, m);
        }
    }

    #[test]
    fn test_extraction_is_linear_big_endian() {
        let data = [0x3D, 0x42, 0x23, 0x97, 0x72, 0x2E, 0x72, 0x4B];
        for (n, m) in [(5, 11), (8, 8), (13, 30), (1, 63)] {
            let first = MessageDecoder::extract_big_endian(&data, 0, n);
            let second = MessageDecoder::extract_big_endian(&data, n, m);
            let whole = MessageDecoder::extract_big_endian(&data, 0, n + m);
            assert_eq!(whole, (first << m) | second, "split at {} + {}", n, m);
        }
    }

    #[test]
    fn test_extract_field_out_of_range() {
        let header = parse_frame("18FEF31C3D422397").unwrap();
        let err = MessageDecoder::extract_field(&header, 65267, &field("4.1", 16)).unwrap_err();
        match err {
            DecoderError::FieldOutOfRange {
                bit_offset,
                bit_length,
                payload_bits,
                ..
            } => {
                assert_eq!((bit_offset, bit_length, payload_bits), (24, 16, 32));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // Exactly fits
        assert!(MessageDecoder::extract_field(&header, 65267, &field("3.1", 16)).is_ok());
    }

    #[test]
    fn test_extract_field_invalid_length() {
        let header = parse_frame("18FEF31C3D4223973D4223973D422397").unwrap();
        assert!(matches!(
            MessageDecoder::extract_field(&header, 65267, &field("1.1", 0)),
            Err(DecoderError::InvalidFieldSpec(_))
        ));
        assert!(matches!(
            MessageDecoder::extract_field(&header, 65267, &field("1.1", 65)),
            Err(DecoderError::InvalidFieldSpec(_))
        ));
    }

    #[test]
    fn test_physical_value_unsigned() {
        let f = field("1.1", 32).with_scaling(1e-7, -210.0);
        assert_eq!(MessageDecoder::physical_value(2535670333, &f), 43.56703329999999);
    }

    #[test]
    fn test_physical_value_signed() {
        let f = field("1.1", 16).with_scaling(0.5, 10.0).signed();
        // 0xFFFE = -2 as 16-bit two's complement
        assert_eq!(MessageDecoder::physical_value(0xFFFE, &f), 9.0);
        assert_eq!(MessageDecoder::physical_value(0x0004, &f), 12.0);

        let unsigned = field("1.1", 16).with_scaling(0.5, 10.0);
        assert_eq!(MessageDecoder::physical_value(0xFFFE, &unsigned), 32777.0);
    }

    #[test]
    fn test_physical_value_zero_width_signed() {
        let f = field("1.1", 0).with_scaling(2.0, 5.0).signed();
        assert_eq!(MessageDecoder::physical_value(1, &f), 5.0);
        assert_eq!(MessageDecoder::sign_extend(1, 0), 0);
    }

    #[test]
    fn test_extract_from_long_payload() {
        // 49-byte reassembled payload, field straddling bytes 17..26
        let mut data = vec![0u8; 49];
        data[16] = 0xF0;
        data[17..25].copy_from_slice(&[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x08]);
        let value = MessageDecoder::extract_little_endian(&data, 16 * 8 + 4, 64);
        assert_eq!(value, 0x8776_6554_4332_211F);
    }

    #[test]
    fn test_sign_extend_positive() {
        assert_eq!(MessageDecoder::sign_extend(0x7F, 8), 127);
    }

    #[test]
    fn test_sign_extend_negative() {
        assert_eq!(MessageDecoder::sign_extend(0xFF, 8), -1);
        assert_eq!(MessageDecoder::sign_extend(0x8000, 16), -32768);
        assert_eq!(MessageDecoder::sign_extend(u64::MAX, 64), -1);
    }

    #[test]
    fn test_decode_message_with_opcode() {
        let definition = MessageDefinition::new(65280, "John Deere", 28, 4)
            .with_opcode_field(field("1.1", 8))
            .with_field(FieldSpec::new("Status", "2.1".parse().unwrap(), 8))
            .with_field(
                FieldSpec::new("Flow", "3.1".parse().unwrap(), 16)
                    .with_scaling(0.1, 0.0)
                    .with_opcode(1),
            )
            .with_field(
                FieldSpec::new("Temperature", "3.1".parse().unwrap(), 16)
                    .with_scaling(1.0, -40.0)
                    .with_opcode(2),
            );

        let header = parse_frame("18FF001C02073C00").unwrap();
        let decoded = MessageDecoder::decode_message(header, &definition).unwrap();
        assert_eq!(decoded.opcode, Some(2));
        assert_eq!(decoded.value("Status"), Some(7.0));
        assert_eq!(decoded.value("Temperature"), Some(20.0));
        assert_eq!(decoded.value("Flow"), None);
        assert_eq!(decoded.fields.len(), 2);
    }
}
