//! Main decoder API
//!
//! This module provides the primary interface for the decoder library. The
//! free functions decode one frame against a table; the [`Decoder`] struct
//! wraps a swappable table and a configuration and decodes streams of frames.

use crate::config::DecoderConfig;
use crate::definitions::{match_definition, DefinitionTable, SharedTable, TableStats};
use crate::fast_packet::{FastPacketAssembler, ProcessResult};
use crate::header::parse_frame_at;
use crate::message_decoder::MessageDecoder;
use crate::types::{DecodedFrame, FrameHeader, Result, Timestamp};
use std::sync::Arc;

/// Decode a hex frame against a definition table
///
/// A frame with no matching definition decodes successfully with empty
/// `spn_vals`. The table is only read.
///
/// # Example
/// ```
/// use isobus_decoder::{decode, DefinitionTable, FieldSpec, MessageDefinition};
///
/// let table: DefinitionTable = vec![MessageDefinition::new(65267, "John Deere", 28, 8)
///     .with_field(FieldSpec::new("Latitude", "1.1".parse().unwrap(), 32).with_scaling(1e-7, -210.0))]
///     .into_iter()
///     .collect();
///
/// let frame = decode("18FEF31C3D422397722E724B", &table).unwrap();
/// assert_eq!(frame.pgn(), 65267);
/// assert!((frame.value("Latitude").unwrap() - 43.5670333).abs() < 1e-9);
/// ```
pub fn decode(hex_message: &str, table: &DefinitionTable) -> Result<DecodedFrame> {
    decode_at(hex_message, 0.0, table)
}

/// Decode a hex frame, recording the caller-supplied timestamp
pub fn decode_at(
    hex_message: &str,
    timestamp: Timestamp,
    table: &DefinitionTable,
) -> Result<DecodedFrame> {
    let header = parse_frame_at(hex_message, timestamp)?;
    decode_header(header, table)
}

/// Decode an already parsed frame (e.g. a reassembled multi-frame message)
pub fn decode_header(header: FrameHeader, table: &DefinitionTable) -> Result<DecodedFrame> {
    match match_definition(table, &header)? {
        Some(definition) => MessageDecoder::decode_message(header, definition),
        None => Ok(DecodedFrame::unmatched(header)),
    }
}

/// One timestamped input frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    pub timestamp: Timestamp,
    pub hex: String,
}

impl FrameRecord {
    pub fn new(timestamp: Timestamp, hex: impl Into<String>) -> Self {
        Self {
            timestamp,
            hex: hex.into(),
        }
    }
}

/// The main decoder struct - entry point for stream decoding
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    /// Current definition table (swappable)
    table: SharedTable,
    config: DecoderConfig,
}

impl Decoder {
    /// Create a decoder over a table with default configuration
    pub fn new(table: DefinitionTable) -> Self {
        Self::with_config(table, DecoderConfig::default())
    }

    /// Create a decoder over a table with an explicit configuration
    pub fn with_config(table: DefinitionTable, config: DecoderConfig) -> Self {
        Self {
            table: SharedTable::new(table),
            config,
        }
    }

    /// Create a decoder sharing an existing table handle
    pub fn from_shared(table: SharedTable, config: DecoderConfig) -> Self {
        Self { table, config }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Handle to the table, for callers that reload it elsewhere
    pub fn shared_table(&self) -> &SharedTable {
        &self.table
    }

    /// Snapshot of the current table
    pub fn table(&self) -> Arc<DefinitionTable> {
        self.table.snapshot()
    }

    /// Replace the definition table; decodes in flight keep the old one
    pub fn reload(&self, table: DefinitionTable) {
        self.table.swap(table);
    }

    /// Decode one frame against the current table
    pub fn decode(&self, hex_message: &str) -> Result<DecodedFrame> {
        decode(hex_message, &self.table.snapshot())
    }

    /// Decode one timestamped frame against the current table
    pub fn decode_at(&self, hex_message: &str, timestamp: Timestamp) -> Result<DecodedFrame> {
        decode_at(hex_message, timestamp, &self.table.snapshot())
    }

    /// Decode a stream of frames, reassembling multi-frame PGNs
    ///
    /// Fragments of multi-frame messages produce no item until the message
    /// is complete. Every other frame yields exactly one item.
    pub fn decode_stream<I>(&self, frames: I) -> DecodingIterator<I::IntoIter>
    where
        I: IntoIterator<Item = FrameRecord>,
    {
        DecodingIterator::new(frames.into_iter(), self.table.snapshot(), &self.config)
    }

    /// Get statistics about the current definition table
    pub fn table_stats(&self) -> TableStats {
        self.table.snapshot().stats()
    }
}

/// Iterator that decodes frame records into decoded frames
///
/// Each record is:
/// 1. Parsed; parse failures are emitted as errors
/// 2. Routed through the fast-packet assembler if its PGN is multi-frame
/// 3. Matched and decoded against the table snapshot taken at creation
pub struct DecodingIterator<I>
where
    I: Iterator<Item = FrameRecord>,
{
    frames: I,
    table: Arc<DefinitionTable>,
    assembler: FastPacketAssembler,
}

impl<I> DecodingIterator<I>
where
    I: Iterator<Item = FrameRecord>,
{
    fn new(frames: I, table: Arc<DefinitionTable>, config: &DecoderConfig) -> Self {
        Self {
            frames,
            table,
            assembler: FastPacketAssembler::new(config),
        }
    }

    /// Process a single record; `None` means a fragment was consumed
    fn process_record(&mut self, record: FrameRecord) -> Option<Result<DecodedFrame>> {
        let header = match parse_frame_at(&record.hex, record.timestamp) {
            Ok(header) => header,
            Err(e) => return Some(Err(e)),
        };

        if self.assembler.handles(header.pgn) {
            return match self.assembler.process(&header) {
                ProcessResult::MessageComplete(full) => {
                    log::debug!("Reassembled PGN {} ({} bytes)", full.pgn, full.payload_len());
                    Some(decode_header(full, &self.table))
                }
                ProcessResult::FragmentConsumed | ProcessResult::Ignored => None,
            };
        }

        Some(decode_header(header, &self.table))
    }
}

impl<I> Iterator for DecodingIterator<I>
where
    I: Iterator<Item = FrameRecord>,
{
    type Item = Result<DecodedFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(record) = self.frames.next() {
            if let Some(result) = self.process_record(record) {
                return Some(result);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::{FieldSpec, MessageDefinition};
    use crate::types::DecoderError;

    fn vehicle_position_table() -> DefinitionTable {
        vec![MessageDefinition::new(65267, "John Deere", 28, 8)
            .with_field(
                FieldSpec::new("Latitude", "1.1".parse().unwrap(), 32)
                    .with_scaling(1e-7, -210.0)
                    .with_units("deg"),
            )
            .with_field(
                FieldSpec::new("Longitude", "5.1".parse().unwrap(), 32)
                    .with_scaling(1e-7, -210.0)
                    .with_units("deg"),
            )]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_decoder_creation() {
        let decoder = Decoder::default();
        let stats = decoder.table_stats();
        assert_eq!(stats.num_definitions, 0);
        assert_eq!(stats.num_fields, 0);
    }

    #[test]
    fn test_decode_unknown_frame() {
        let decoder = Decoder::new(vehicle_position_table());
        let frame = decoder.decode("18FEF4003D422397722E724B").unwrap();
        assert!(!frame.is_matched());
        assert!(frame.spn_vals.is_empty());
        assert_eq!(frame.pgn(), 65268);
    }

    #[test]
    fn test_decode_malformed_frame() {
        let decoder = Decoder::new(vehicle_position_table());
        assert!(matches!(
            decoder.decode("18FEF31"),
            Err(DecoderError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn test_reload_swaps_table() {
        let decoder = Decoder::new(DefinitionTable::new());
        assert!(!decoder.decode("18FEF31C3D422397722E724B").unwrap().is_matched());

        decoder.reload(vehicle_position_table());
        let frame = decoder.decode_at("18FEF31C3D422397722E724B", 4.0).unwrap();
        assert!(frame.is_matched());
        assert_eq!(frame.header.timestamp, 4.0);
        assert_eq!(decoder.table_stats().num_fields, 2);
    }

    #[test]
    fn test_stream_yields_one_item_per_single_frame() {
        let decoder = Decoder::new(vehicle_position_table());
        let records = vec![
            FrameRecord::new(0.0, "18FEF31C3D422397722E724B"),
            FrameRecord::new(0.1, "nonsense"),
            FrameRecord::new(0.2, "0CF00400FFFF7D30FFFFFFFF"),
        ];

        let results: Vec<_> = decoder.decode_stream(records).collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].as_ref().unwrap().is_matched());
        assert!(results[1].is_err());
        assert!(!results[2].as_ref().unwrap().is_matched());
    }

    #[test]
    fn test_stream_snapshot_is_stable_across_reload() {
        let decoder = Decoder::new(vehicle_position_table());
        let mut stream = decoder.decode_stream(vec![
            FrameRecord::new(0.0, "18FEF31C3D422397722E724B"),
            FrameRecord::new(1.0, "18FEF31C3D422397722E724B"),
        ]);

        assert!(stream.next().unwrap().unwrap().is_matched());
        decoder.reload(DefinitionTable::new());
        assert!(stream.next().unwrap().unwrap().is_matched());
        assert!(!decoder.decode("18FEF31C3D422397722E724B").unwrap().is_matched());
    }
}
