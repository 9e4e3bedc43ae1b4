//! Definition file loading
//!
//! Reads message definitions from TOML, JSON or CSV files and builds the
//! decoder's table. Definitions whose fields do not fit their declared
//! payload are rejected here, before any frame is decoded.
//!
//! CSV tables carry one row per SPN; rows sharing `pgn_id`, `manufacturer`,
//! `pgn_length_bytes` and `source_address` form one definition, and a row
//! named `PGN usage opcode` becomes its opcode selector.

use anyhow::{bail, Context, Result};
use isobus_decoder::{
    ByteOrder, DefinitionTable, FieldSpec, MessageDefinition, StartPosition, ValueType,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Widest field the decoder can extract
const MAX_FIELD_BITS: usize = 64;

/// On-disk layout: an array of `[[definition]]` tables
#[derive(Debug, Deserialize)]
struct DefinitionFile {
    #[serde(default, rename = "definition")]
    definitions: Vec<MessageDefinition>,
}

/// SPN name of the opcode selector row in CSV tables (case-insensitive)
const OPCODE_SPN_NAME: &str = "PGN usage opcode";

/// One CSV row: the definition it belongs to plus one SPN
#[derive(Debug, Deserialize)]
struct DefinitionRow {
    pgn_id: u32,
    #[serde(default)]
    manufacturer: String,
    pgn_length_bytes: usize,
    source_address: u8,
    opcode: Option<u64>,
    spn_id: Option<String>,
    spn_name: String,
    #[serde(default)]
    spn_description: String,
    spn_start_position: StartPosition,
    spn_bit_length: u16,
    scale_factor: Option<f64>,
    offset: Option<f64>,
    #[serde(default)]
    units: String,
    byte_order: Option<ByteOrder>,
    value_type: Option<ValueType>,
}

impl DefinitionRow {
    fn is_selector(&self) -> bool {
        self.spn_name.eq_ignore_ascii_case(OPCODE_SPN_NAME)
    }

    fn into_field(self) -> FieldSpec {
        FieldSpec {
            spn_id: self.spn_id.filter(|id| !id.is_empty()),
            spn_name: self.spn_name,
            spn_description: self.spn_description,
            start_position: self.spn_start_position,
            bit_length: self.spn_bit_length,
            scale_factor: self.scale_factor.unwrap_or(1.0),
            offset: self.offset.unwrap_or(0.0),
            units: self.units,
            byte_order: self.byte_order.unwrap_or_default(),
            value_type: self.value_type.unwrap_or_default(),
            opcode: self.opcode,
        }
    }
}

/// Reasons a definition is rejected at load time
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DefinitionError {
    #[error(
        "PGN {pgn} (source {source_address}): field '{field}' ends at bit {end_bit}, \
         past the {payload_bits}-bit payload"
    )]
    FieldOutOfBounds {
        pgn: u32,
        source_address: u8,
        field: String,
        end_bit: usize,
        payload_bits: usize,
    },

    #[error("PGN {pgn} (source {source_address}): field '{field}' has bit length {bit_length}")]
    BadBitLength {
        pgn: u32,
        source_address: u8,
        field: String,
        bit_length: u16,
    },

    #[error("PGN {pgn} (source {source_address}): field '{field}' has an opcode but no opcode field")]
    OpcodeWithoutSelector {
        pgn: u32,
        source_address: u8,
        field: String,
    },
}

/// Check that every field of a definition fits its payload
pub fn validate_definition(definition: &MessageDefinition) -> Result<(), DefinitionError> {
    let check = |field: &FieldSpec| {
        let bits = field.bit_length as usize;
        if bits == 0 || bits > MAX_FIELD_BITS {
            return Err(DefinitionError::BadBitLength {
                pgn: definition.pgn,
                source_address: definition.source_address,
                field: field.spn_name.clone(),
                bit_length: field.bit_length,
            });
        }
        if field.end_bit() > definition.payload_bits() {
            return Err(DefinitionError::FieldOutOfBounds {
                pgn: definition.pgn,
                source_address: definition.source_address,
                field: field.spn_name.clone(),
                end_bit: field.end_bit(),
                payload_bits: definition.payload_bits(),
            });
        }
        Ok(())
    };

    if let Some(selector) = &definition.opcode_field {
        check(selector)?;
    }
    for field in &definition.fields {
        check(field)?;
        if field.opcode.is_some() && definition.opcode_field.is_none() {
            return Err(DefinitionError::OpcodeWithoutSelector {
                pgn: definition.pgn,
                source_address: definition.source_address,
                field: field.spn_name.clone(),
            });
        }
    }
    Ok(())
}

/// Parse definitions from file content, choosing the format by extension
pub fn parse_definitions(content: &str, path: &Path) -> Result<Vec<MessageDefinition>> {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase());

    let definitions = match extension.as_deref() {
        Some("toml") => {
            toml::from_str::<DefinitionFile>(content)
                .with_context(|| format!("Failed to parse TOML definitions: {:?}", path))?
                .definitions
        }
        Some("json") => {
            serde_json::from_str::<DefinitionFile>(content)
                .with_context(|| format!("Failed to parse JSON definitions: {:?}", path))?
                .definitions
        }
        Some("csv") => parse_csv_definitions(content, path)?,
        _ => bail!("Unsupported definition file format: {:?}", path),
    };

    for definition in &definitions {
        validate_definition(definition)
            .with_context(|| format!("Invalid definition in {:?}", path))?;
    }

    Ok(definitions)
}

/// Group CSV rows into definitions, keeping first-seen order
fn parse_csv_definitions(content: &str, path: &Path) -> Result<Vec<MessageDefinition>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(content.as_bytes());

    let mut definitions: Vec<MessageDefinition> = Vec::new();
    let mut groups: HashMap<(u32, String, usize, u8), usize> = HashMap::new();

    for row in reader.deserialize::<DefinitionRow>() {
        let row = row.with_context(|| format!("Failed to parse CSV definitions: {:?}", path))?;

        let group = (
            row.pgn_id,
            row.manufacturer.clone(),
            row.pgn_length_bytes,
            row.source_address,
        );
        let idx = *groups.entry(group).or_insert_with(|| {
            definitions.push(MessageDefinition::new(
                row.pgn_id,
                row.manufacturer.clone(),
                row.source_address,
                row.pgn_length_bytes,
            ));
            definitions.len() - 1
        });
        let definition = &mut definitions[idx];

        if row.is_selector() {
            if definition.opcode_field.is_some() {
                bail!(
                    "{:?}: PGN {} (source {}) has more than one opcode row",
                    path,
                    definition.pgn,
                    definition.source_address
                );
            }
            let mut selector = row.into_field();
            selector.opcode = None;
            definition.opcode_field = Some(selector);
        } else {
            definition.fields.push(row.into_field());
        }
    }

    Ok(definitions)
}

/// Load definitions from a single file
pub fn load_definition_file(path: &Path) -> Result<Vec<MessageDefinition>> {
    log::info!("Loading definitions: {:?}", path);

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read definition file: {:?}", path))?;
    let definitions = parse_definitions(&content, path)?;

    log::info!("Loaded {} definitions from {:?}", definitions.len(), path);
    Ok(definitions)
}

/// Load every file into one table
pub fn load_table(paths: &[PathBuf]) -> Result<DefinitionTable> {
    let mut table = DefinitionTable::new();
    for path in paths {
        table.extend(load_definition_file(path)?);
    }

    for key in table.ambiguous_keys() {
        log::warn!("Ambiguous definitions for {}; matching frames will fail", key);
    }
    Ok(table)
}
