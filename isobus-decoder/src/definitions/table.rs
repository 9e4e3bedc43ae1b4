//! Definition table
//!
//! In-memory collection of proprietary message definitions, indexed by the
//! `(pgn, source address, payload length)` triple that selects a layout.

use crate::types::DecoderError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// A proprietary message layout for one PGN, source address and length
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDefinition {
    /// Parameter group number
    pub pgn: u32,
    /// Equipment manufacturer (descriptive only, not a matching key)
    #[serde(default)]
    pub manufacturer: String,
    /// CAN source address the layout is scoped to
    pub source_address: u8,
    /// Expected payload length in bytes
    pub pgn_length_bytes: usize,
    /// Selector field choosing which opcode-specific fields apply
    #[serde(default)]
    pub opcode_field: Option<FieldSpec>,
    /// SPNs carried in this PGN, in definition order
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

impl MessageDefinition {
    /// Create a definition with no fields
    pub fn new(
        pgn: u32,
        manufacturer: impl Into<String>,
        source_address: u8,
        pgn_length_bytes: usize,
    ) -> Self {
        Self {
            pgn,
            manufacturer: manufacturer.into(),
            source_address,
            pgn_length_bytes,
            opcode_field: None,
            fields: Vec::new(),
        }
    }

    /// Builder method: append a field
    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Builder method: set the opcode selector field
    pub fn with_opcode_field(mut self, field: FieldSpec) -> Self {
        self.opcode_field = Some(field);
        self
    }

    /// Table key of this definition
    pub fn key(&self) -> DefinitionKey {
        DefinitionKey {
            pgn: self.pgn,
            source_address: self.source_address,
            length: self.pgn_length_bytes,
        }
    }

    /// Payload size in bits
    pub fn payload_bits(&self) -> usize {
        self.pgn_length_bytes * 8
    }

    /// Fields to decode for the given opcode
    ///
    /// Fields without an opcode always apply. Fields tagged with an opcode
    /// apply only when it equals the extracted selector value.
    pub fn fields_for_opcode(&self, opcode: Option<u64>) -> impl Iterator<Item = &FieldSpec> {
        self.fields
            .iter()
            .filter(move |f| f.opcode.is_none() || f.opcode == opcode)
    }
}

/// One SPN within a message definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(default)]
    pub spn_id: Option<String>,
    pub spn_name: String,
    #[serde(default)]
    pub spn_description: String,
    /// Ones-based byte/bit position of the field's first bit
    pub start_position: StartPosition,
    /// Length in bits
    pub bit_length: u16,
    /// Scale factor to convert raw value to physical value
    #[serde(default = "default_scale")]
    pub scale_factor: f64,
    /// Offset to add after scaling
    #[serde(default)]
    pub offset: f64,
    /// Engineering unit (e.g. "deg", "L/h")
    #[serde(default)]
    pub units: String,
    /// Bit layout of the field within the payload
    #[serde(default)]
    pub byte_order: ByteOrder,
    /// Signed (two's complement) or unsigned raw value
    #[serde(default)]
    pub value_type: ValueType,
    /// Opcode this field belongs to (None = applies to every opcode)
    #[serde(default)]
    pub opcode: Option<u64>,
}

fn default_scale() -> f64 {
    1.0
}

impl FieldSpec {
    /// Create an unsigned little-endian field with unit scale and no offset
    pub fn new(spn_name: impl Into<String>, start_position: StartPosition, bit_length: u16) -> Self {
        Self {
            spn_id: None,
            spn_name: spn_name.into(),
            spn_description: String::new(),
            start_position,
            bit_length,
            scale_factor: 1.0,
            offset: 0.0,
            units: String::new(),
            byte_order: ByteOrder::LittleEndian,
            value_type: ValueType::Unsigned,
            opcode: None,
        }
    }

    /// Builder method: set scale factor and offset
    pub fn with_scaling(mut self, scale_factor: f64, offset: f64) -> Self {
        self.scale_factor = scale_factor;
        self.offset = offset;
        self
    }

    /// Builder method: set units
    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    /// Builder method: set the SPN id
    pub fn with_spn_id(mut self, spn_id: impl Into<String>) -> Self {
        self.spn_id = Some(spn_id.into());
        self
    }

    /// Builder method: set the byte order
    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    /// Builder method: mark the field as signed
    pub fn signed(mut self) -> Self {
        self.value_type = ValueType::Signed;
        self
    }

    /// Builder method: restrict the field to one opcode
    pub fn with_opcode(mut self, opcode: u64) -> Self {
        self.opcode = Some(opcode);
        self
    }

    /// Zero-based bit offset of the field within the payload
    pub fn bit_offset(&self) -> usize {
        self.start_position.bit_offset()
    }

    /// First bit past the end of the field
    pub fn end_bit(&self) -> usize {
        self.bit_offset() + self.bit_length as usize
    }
}

/// Bit layout of a field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    /// Intel layout: the payload is one little-endian integer and bit 1 of
    /// each byte is its least significant bit
    #[default]
    LittleEndian,
    /// Motorola layout: payload bits concatenated most significant first
    BigEndian,
}

/// Raw value interpretation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    #[default]
    Unsigned,
    /// Two's complement over the field's bit length
    Signed,
}

/// Ones-based `byte.bit` start position of a field
///
/// Written as `"<byte>.<bit>"` in definition files; a bare `"<byte>"` means
/// bit 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PositionRepr", into = "String")]
pub struct StartPosition {
    byte: u16,
    bit: u8,
}

impl StartPosition {
    /// Create a start position; `byte >= 1`, `bit` in `1..=8`
    pub fn new(byte: u16, bit: u8) -> Result<Self, DecoderError> {
        if byte == 0 {
            return Err(DecoderError::InvalidFieldSpec(format!(
                "start byte must be >= 1, got {}.{}",
                byte, bit
            )));
        }
        if !(1..=8).contains(&bit) {
            return Err(DecoderError::InvalidFieldSpec(format!(
                "start bit must be in 1..=8, got {}.{}",
                byte, bit
            )));
        }
        Ok(Self { byte, bit })
    }

    pub fn byte(&self) -> u16 {
        self.byte
    }

    pub fn bit(&self) -> u8 {
        self.bit
    }

    /// Zero-based bit offset: `(byte - 1) * 8 + (bit - 1)`
    pub fn bit_offset(&self) -> usize {
        (self.byte as usize - 1) * 8 + (self.bit as usize - 1)
    }
}

impl fmt::Display for StartPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.byte, self.bit)
    }
}

impl FromStr for StartPosition {
    type Err = DecoderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || DecoderError::InvalidFieldSpec(format!("invalid start position '{}'", s));

        let (byte, bit) = match s.split_once('.') {
            Some((byte, bit)) => (byte, bit),
            None => (s, "1"),
        };
        let byte = byte.parse::<u16>().map_err(|_| invalid())?;
        let bit = bit.parse::<u8>().map_err(|_| invalid())?;
        Self::new(byte, bit)
    }
}

impl From<StartPosition> for String {
    fn from(position: StartPosition) -> Self {
        position.to_string()
    }
}

/// Start positions may be written as strings (`"2.3"`) or numbers (`2.3`)
#[derive(Deserialize)]
#[serde(untagged)]
enum PositionRepr {
    Text(String),
    Integer(u16),
    Number(f64),
}

impl TryFrom<PositionRepr> for StartPosition {
    type Error = DecoderError;

    fn try_from(repr: PositionRepr) -> Result<Self, Self::Error> {
        match repr {
            PositionRepr::Text(s) => s.parse(),
            PositionRepr::Integer(byte) => Self::new(byte, 1),
            PositionRepr::Number(n) => format!("{}", n).parse(),
        }
    }
}

/// Lookup key of a definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DefinitionKey {
    pub pgn: u32,
    pub source_address: u8,
    /// Payload length in bytes
    pub length: usize,
}

impl DefinitionKey {
    pub fn new(pgn: u32, source_address: u8, length: usize) -> Self {
        Self {
            pgn,
            source_address,
            length,
        }
    }
}

impl fmt::Display for DefinitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PGN {} / source {} / {} bytes",
            self.pgn, self.source_address, self.length
        )
    }
}

/// The definition table
///
/// Built once by a loader and then only read. Duplicate keys are kept so
/// that matching can report them instead of silently picking one.
#[derive(Debug, Clone, Default)]
pub struct DefinitionTable {
    /// All definitions by key
    /// Key: (pgn, source, length), Value: definitions with that key (normally one)
    definitions: HashMap<DefinitionKey, Vec<MessageDefinition>>,
}

impl DefinitionTable {
    /// Create a new empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a definition to the table
    pub fn insert(&mut self, definition: MessageDefinition) {
        let key = definition.key();
        let entries = self.definitions.entry(key).or_default();
        if !entries.is_empty() {
            log::warn!("Duplicate definition for {}", key);
        }
        entries.push(definition);
    }

    /// All definitions stored under a key
    pub fn get(&self, key: &DefinitionKey) -> &[MessageDefinition] {
        self.definitions
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// All definitions for a PGN, any source or length
    pub fn definitions_for_pgn(&self, pgn: u32) -> impl Iterator<Item = &MessageDefinition> {
        self.definitions
            .iter()
            .filter(move |(key, _)| key.pgn == pgn)
            .flat_map(|(_, defs)| defs.iter())
    }

    /// Iterate over every definition
    pub fn iter(&self) -> impl Iterator<Item = &MessageDefinition> {
        self.definitions.values().flat_map(|defs| defs.iter())
    }

    /// Keys that hold more than one definition
    pub fn ambiguous_keys(&self) -> Vec<DefinitionKey> {
        let mut keys: Vec<DefinitionKey> = self
            .definitions
            .iter()
            .filter(|(_, defs)| defs.len() > 1)
            .map(|(key, _)| *key)
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Number of definitions
    pub fn len(&self) -> usize {
        self.definitions.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Get table statistics
    pub fn stats(&self) -> TableStats {
        TableStats {
            num_definitions: self.len(),
            num_fields: self.iter().map(|def| def.fields.len()).sum(),
            num_keys: self.definitions.len(),
            num_ambiguous_keys: self.ambiguous_keys().len(),
        }
    }
}

impl FromIterator<MessageDefinition> for DefinitionTable {
    fn from_iter<I: IntoIterator<Item = MessageDefinition>>(iter: I) -> Self {
        let mut table = Self::new();
        for definition in iter {
            table.insert(definition);
        }
        table
    }
}

impl Extend<MessageDefinition> for DefinitionTable {
    fn extend<I: IntoIterator<Item = MessageDefinition>>(&mut self, iter: I) {
        for definition in iter {
            self.insert(definition);
        }
    }
}

/// Table statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableStats {
    /// Total number of message definitions
    pub num_definitions: usize,
    /// Total number of field definitions
    pub num_fields: usize,
    /// Number of distinct (pgn, source, length) keys
    pub num_keys: usize,
    /// Keys shared by more than one definition
    pub num_ambiguous_keys: usize,
}
