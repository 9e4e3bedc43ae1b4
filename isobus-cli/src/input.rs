//! Frame log reading
//!
//! One frame per line: either `<hex>` or `<timestamp> <hex> [ignored...]`,
//! separated by tabs or whitespace. Blank lines and `#` comments are skipped.

use isobus_decoder::FrameRecord;
use std::io::BufRead;

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("line {line}: invalid timestamp '{value}'")]
    BadTimestamp { line: usize, value: String },

    #[error("line {line}: read failed: {source}")]
    Io {
        line: usize,
        #[source]
        source: std::io::Error,
    },
}

/// Parse one log line; `None` for blank and comment lines
pub fn parse_line(line: &str, line_no: usize) -> Option<Result<FrameRecord, InputError>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let columns: Vec<&str> = if line.contains('\t') {
        line.split('\t').map(str::trim).collect()
    } else {
        line.split_whitespace().collect()
    };

    let record = match columns.as_slice() {
        [hex] => Ok(FrameRecord::new(0.0, *hex)),
        [timestamp, hex, ..] => timestamp
            .parse::<f64>()
            .map(|ts| FrameRecord::new(ts, *hex))
            .map_err(|_| InputError::BadTimestamp {
                line: line_no,
                value: timestamp.to_string(),
            }),
        [] => return None,
    };
    Some(record)
}

/// Read frame records from a line-oriented source
pub fn read_records<R: BufRead>(reader: R) -> impl Iterator<Item = Result<FrameRecord, InputError>> {
    reader
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| match line {
            Ok(line) => parse_line(&line, idx + 1),
            Err(source) => Some(Err(InputError::Io {
                line: idx + 1,
                source,
            })),
        })
}
