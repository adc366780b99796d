//! Storage row model

use rusqlite::types::Value as SqlValue;

/// A row as it lives in a collection table
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    /// Owning user identifier
    pub owner: String,
    /// Client-chosen identity (`id` or `uuid` column)
    pub identity: String,
    /// Server-assigned change time (Unix ms)
    pub change_time: i64,
    /// Tombstone flag
    pub is_deleted: bool,
    /// Payload columns in declared order; semi-structured fields hold JSON text
    pub fields: Vec<(&'static str, SqlValue)>,
}

impl StoredRow {
    /// Raw storage value of a payload column
    pub fn field(&self, name: &str) -> Option<&SqlValue> {
        self.fields
            .iter()
            .find(|(column, _)| *column == name)
            .map(|(_, value)| value)
    }
}
