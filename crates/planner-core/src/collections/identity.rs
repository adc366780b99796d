//! Identity field capability

use serde_json::Value;

use crate::models::WireDocument;

/// The client-chosen identity field of a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityField {
    /// Simple per-owner identity stored in the `id` column
    Id,
    /// Identity stored in `uuid`, guarded by a named `(user_id, uuid)`
    /// constraint while the table keys rows by its own surrogate
    Uuid,
}

impl IdentityField {
    /// Storage column and wire field name
    pub const fn column(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Uuid => "uuid",
        }
    }

    /// Read the identity out of a wire document
    pub fn get(self, doc: &WireDocument) -> Option<&str> {
        doc.get(self.column()).and_then(Value::as_str)
    }

    /// Return `doc` with its identity set to `value`
    #[must_use]
    pub fn with(self, mut doc: WireDocument, value: impl Into<String>) -> WireDocument {
        doc.insert(self.column().to_string(), Value::String(value.into()));
        doc
    }
}
