//! Definition matching
//!
//! Selects the layout for a parsed frame. PGN alone is not enough: the same
//! proprietary PGN is reused by different equipment with incompatible
//! layouts, so PGN, source address and payload length must all agree.

use crate::definitions::table::{DefinitionKey, DefinitionTable, MessageDefinition};
use crate::types::{DecoderError, FrameHeader, Result};

/// Find the definition for a frame
///
/// # Returns
/// * `Ok(Some(def))` - exactly one definition matches
/// * `Ok(None)` - no definition matches (unmonitored equipment)
/// * `Err(AmbiguousDefinition)` - the table holds several candidates
pub fn match_definition<'a>(
    table: &'a DefinitionTable,
    header: &FrameHeader,
) -> Result<Option<&'a MessageDefinition>> {
    let key = DefinitionKey::new(header.pgn, header.source, header.payload_len());

    match table.get(&key) {
        [] => {
            log::trace!("No definition for {}", key);
            Ok(None)
        }
        [definition] => Ok(Some(definition)),
        candidates => Err(DecoderError::AmbiguousDefinition {
            pgn: key.pgn,
            source_address: key.source_address,
            length: key.length,
            count: candidates.len(),
            message: header.message_hex.clone(),
        }),
    }
}
