//! Decoder configuration types
//!
//! This module defines the minimal configuration needed by the decoder
//! library. Definition loading and output handling belong to the
//! application layer.

use serde::{Deserialize, Serialize};

/// PGN of the GNSS position data message
pub const PGN_GNSS_POSITION: u32 = 129029;

/// Configuration for the decoder library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// PGNs that span several frames and must be reassembled first
    #[serde(default = "default_fast_packet")]
    pub fast_packet: Vec<FastPacketPgn>,

    /// Gap in seconds after which a partially received message is dropped
    #[serde(default = "default_stale_secs")]
    pub fast_packet_stale_secs: f64,
}

fn default_fast_packet() -> Vec<FastPacketPgn> {
    vec![FastPacketPgn::new(PGN_GNSS_POSITION, 7)]
}

fn default_stale_secs() -> f64 {
    2.0
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            fast_packet: default_fast_packet(),
            fast_packet_stale_secs: default_stale_secs(),
        }
    }
}

/// Most frames one message can span; the frame index is a 4-bit nibble
pub const MAX_FAST_PACKET_FRAMES: usize = 16;

/// A multi-frame PGN and how many frames make up one message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "RawFastPacketPgn")]
pub struct FastPacketPgn {
    pub pgn: u32,
    pub frame_count: usize,
}

impl FastPacketPgn {
    pub fn new(pgn: u32, frame_count: usize) -> Self {
        Self { pgn, frame_count }
    }

    /// Frame count is in `1..=MAX_FAST_PACKET_FRAMES`
    pub fn is_valid(&self) -> bool {
        (1..=MAX_FAST_PACKET_FRAMES).contains(&self.frame_count)
    }
}

#[derive(Deserialize)]
struct RawFastPacketPgn {
    pgn: u32,
    frame_count: usize,
}

impl TryFrom<RawFastPacketPgn> for FastPacketPgn {
    type Error = String;

    fn try_from(raw: RawFastPacketPgn) -> Result<Self, Self::Error> {
        let fp = Self::new(raw.pgn, raw.frame_count);
        if fp.is_valid() {
            Ok(fp)
        } else {
            Err(format!(
                "PGN {}: frame_count must be in 1..={}, got {}",
                fp.pgn, MAX_FAST_PACKET_FRAMES, fp.frame_count
            ))
        }
    }
}

impl DecoderConfig {
    /// Create a new decoder configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: add or replace a multi-frame PGN
    ///
    /// A frame count outside `1..=16` is logged and leaves the config
    /// unchanged.
    pub fn with_fast_packet_pgn(mut self, pgn: u32, frame_count: usize) -> Self {
        let entry = FastPacketPgn::new(pgn, frame_count);
        if !entry.is_valid() {
            log::warn!(
                "Ignoring multi-frame PGN {}: frame count {} not in 1..={}",
                pgn,
                frame_count,
                MAX_FAST_PACKET_FRAMES
            );
            return self;
        }
        self.fast_packet.retain(|fp| fp.pgn != pgn);
        self.fast_packet.push(entry);
        self
    }

    /// Builder method: disable multi-frame reassembly entirely
    pub fn without_fast_packet(mut self) -> Self {
        self.fast_packet.clear();
        self
    }

    /// Builder method: set the stale window in seconds
    pub fn with_stale_secs(mut self, secs: f64) -> Self {
        self.fast_packet_stale_secs = secs;
        self
    }

    /// Check if frames of a PGN need reassembly
    pub fn is_fast_packet(&self, pgn: u32) -> bool {
        self.fast_packet.iter().any(|fp| fp.pgn == pgn)
    }
}
