//! Output of decoded frames
//!
//! Writes one line per decoded frame, either as JSON or as readable text,
//! and keeps the counts for the end-of-run summary.

use anyhow::Result;
use isobus_decoder::{DecodedFrame, DecoderError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One JSON object per line
    #[default]
    Jsonl,
    /// Human-readable text
    Text,
}

/// Counts for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    /// Frames (or reassembled messages) handed to the writer
    pub frames: usize,
    /// Frames that matched a definition
    pub decoded: usize,
    /// Frames with no matching definition
    pub unknown: usize,
    /// Frames that failed to decode, plus unreadable input lines
    pub errors: usize,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames: {} decoded, {} unknown, {} errors",
            self.frames, self.decoded, self.unknown, self.errors
        )
    }
}

/// Writes decode results to an output stream
pub struct FrameWriter<W: Write> {
    out: W,
    format: OutputFormat,
    skip_unknown: bool,
    summary: Summary,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(out: W, format: OutputFormat, skip_unknown: bool) -> Self {
        Self {
            out,
            format,
            skip_unknown,
            summary: Summary::default(),
        }
    }

    /// Record one decode result; errors are logged and counted, not written
    pub fn write(&mut self, result: std::result::Result<DecodedFrame, DecoderError>) -> Result<()> {
        self.summary.frames += 1;

        let frame = match result {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("{}", e);
                self.summary.errors += 1;
                return Ok(());
            }
        };

        if frame.is_matched() {
            self.summary.decoded += 1;
        } else {
            self.summary.unknown += 1;
            if self.skip_unknown {
                return Ok(());
            }
        }

        match self.format {
            OutputFormat::Jsonl => {
                serde_json::to_writer(&mut self.out, &frame)?;
                writeln!(self.out)?;
            }
            OutputFormat::Text => writeln!(self.out, "{}", format_text(&frame))?,
        }
        Ok(())
    }

    /// Count an input line that never reached the decoder
    pub fn record_input_error(&mut self) {
        self.summary.errors += 1;
    }

    /// Flush output and return the run summary
    pub fn finish(mut self) -> Result<Summary> {
        self.out.flush()?;
        Ok(self.summary)
    }
}

/// One-line text rendering of a decoded frame
pub fn format_text(frame: &DecodedFrame) -> String {
    let header = &frame.header;
    let time = match header.timestamp_utc() {
        Some(ts) if header.timestamp != 0.0 => ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        _ => format!("{:.3}", header.timestamp),
    };

    let mut line = format!(
        "{} PGN {} src {} prio {}",
        time,
        frame.pgn(),
        header.source,
        header.priority
    );

    if !frame.is_matched() {
        line.push_str(&format!(" unknown [{}]", header.payload_hex().join(" ")));
        return line;
    }

    if let Some(manufacturer) = frame.manufacturer.as_deref().filter(|m| !m.is_empty()) {
        line.push_str(&format!(" ({})", manufacturer));
    }
    if let Some(opcode) = frame.opcode {
        line.push_str(&format!(" opcode {}", opcode));
    }

    let values: Vec<String> = frame
        .fields
        .iter()
        .map(|f| {
            if f.units.is_empty() {
                format!("{}={}", f.spn_name, f.value)
            } else {
                format!("{}={} {}", f.spn_name, f.value, f.units)
            }
        })
        .collect();
    if !values.is_empty() {
        line.push_str(": ");
        line.push_str(&values.join(", "));
    }
    line
}
