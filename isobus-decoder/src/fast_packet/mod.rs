//! Multi-frame (fast packet) message reassembly
//!
//! Some proprietary PGNs, such as the GNSS position data PGN 129029, are
//! spread across several CAN frames. The first payload byte of each frame
//! carries a frame index (low nibble) and a sequence group (high nibble);
//! the rest is message data. Once every index of a group has arrived, the
//! data is concatenated in index order behind the original header and
//! re-parsed as one long frame.
//!
//! The assembler is the only stateful piece of the library and is owned by
//! the caller; the decoder itself stays stateless.

use crate::config::{DecoderConfig, MAX_FAST_PACKET_FRAMES};
use crate::header::{encode_hex, parse_frame_at};
use crate::types::{FrameHeader, Timestamp};
use std::collections::{BTreeMap, HashMap};

/// Outcome of feeding one frame to the assembler
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessResult {
    /// Frame is not part of a configured multi-frame PGN, or was discarded
    Ignored,
    /// Frame stored; more fragments are needed
    FragmentConsumed,
    /// All fragments received; the reassembled frame is ready to decode
    MessageComplete(FrameHeader),
}

/// Session key: one reassembly per PGN, source and sequence group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SessionKey {
    pgn: u32,
    source: u8,
    group: u8,
}

#[derive(Debug, Default)]
struct Session {
    last_timestamp: Timestamp,
    /// Frame index -> data bytes (first payload byte stripped)
    fragments: BTreeMap<u8, Vec<u8>>,
}

/// Reassembles multi-frame messages from individual frames
#[derive(Debug)]
pub struct FastPacketAssembler {
    /// PGN -> number of frames making up one message
    frame_counts: HashMap<u32, usize>,
    /// Gap (seconds) after which a partial session is discarded
    stale_after: f64,
    sessions: HashMap<SessionKey, Session>,
}

impl FastPacketAssembler {
    /// Create an assembler for the multi-frame PGNs in `config`
    ///
    /// Entries whose frame count cannot be expressed by the 4-bit frame
    /// index are skipped; frames of those PGNs are decoded individually.
    pub fn new(config: &DecoderConfig) -> Self {
        Self {
            frame_counts: config
                .fast_packet
                .iter()
                .filter(|fp| {
                    if !fp.is_valid() {
                        log::warn!(
                            "Skipping multi-frame PGN {}: frame count {} not in 1..={}",
                            fp.pgn,
                            fp.frame_count,
                            MAX_FAST_PACKET_FRAMES
                        );
                    }
                    fp.is_valid()
                })
                .map(|fp| (fp.pgn, fp.frame_count))
                .collect(),
            stale_after: config.fast_packet_stale_secs,
            sessions: HashMap::new(),
        }
    }

    /// True if frames of this PGN must be reassembled before decoding
    pub fn handles(&self, pgn: u32) -> bool {
        self.frame_counts.contains_key(&pgn)
    }

    /// Number of partially received messages
    pub fn pending_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Feed one parsed frame
    pub fn process(&mut self, header: &FrameHeader) -> ProcessResult {
        let Some(&frame_count) = self.frame_counts.get(&header.pgn) else {
            return ProcessResult::Ignored;
        };
        let Some((&sequence, data)) = header.payload_bytes.split_first() else {
            log::debug!("Empty multi-frame fragment for PGN {}", header.pgn);
            return ProcessResult::Ignored;
        };

        let key = SessionKey {
            pgn: header.pgn,
            source: header.source,
            group: sequence >> 4,
        };
        let index = sequence & 0x0F;

        let session = self.sessions.entry(key).or_default();
        if !session.fragments.is_empty()
            && (header.timestamp - session.last_timestamp).abs() > self.stale_after
        {
            log::debug!(
                "Discarding stale fragments for PGN {} group {} ({} held)",
                key.pgn,
                key.group,
                session.fragments.len()
            );
            session.fragments.clear();
        }
        session.last_timestamp = header.timestamp;
        session.fragments.insert(index, data.to_vec());

        if session.fragments.len() < frame_count {
            return ProcessResult::FragmentConsumed;
        }

        let Some(session) = self.sessions.remove(&key) else {
            return ProcessResult::Ignored;
        };
        let complete = (0..frame_count).all(|i| {
            u8::try_from(i)
                .map(|i| session.fragments.contains_key(&i))
                .unwrap_or(false)
        });
        if !complete {
            log::warn!(
                "Multi-frame PGN {} from source {} is missing fragments (have {:?})",
                key.pgn,
                key.source,
                session.fragments.keys().collect::<Vec<_>>()
            );
            return ProcessResult::Ignored;
        }

        let data: Vec<u8> = session.fragments.into_values().flatten().collect();
        let message = format!("{}{}", header.header_hex, encode_hex(&data));
        match parse_frame_at(&message, header.timestamp) {
            Ok(full) => ProcessResult::MessageComplete(full),
            Err(e) => {
                log::warn!("Failed to rebuild multi-frame message: {}", e);
                ProcessResult::Ignored
            }
        }
    }
}
