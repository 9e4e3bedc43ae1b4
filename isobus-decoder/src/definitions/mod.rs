//! Message definition table, matching, and the shared table handle
//!
//! Definitions are loaded by the caller (see the CLI loader) and handed to
//! the decoder as an immutable table.

pub mod matcher;
pub mod shared;
pub mod table;

// Re-export key types for convenience
pub use matcher::match_definition;
pub use shared::SharedTable;
pub use table::{
    ByteOrder, DefinitionKey, DefinitionTable, FieldSpec, MessageDefinition, StartPosition,
    TableStats, ValueType,
};
