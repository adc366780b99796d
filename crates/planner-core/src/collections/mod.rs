//! Collection registry
//!
//! Static per-collection configuration. This is the only place that knows
//! which identity column a collection uses, which uniqueness constraint
//! guards it, and which payload fields it stores, so the pull and push
//! handlers stay collection-agnostic.

mod identity;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

pub use identity::IdentityField;

/// Storage column holding the owner's user identifier.
pub const OWNER_COLUMN: &str = "user_id";
/// Storage column holding the server-assigned change time (Unix ms).
pub const CHANGE_TIME_COLUMN: &str = "updated_at";
/// Storage column holding the tombstone flag.
pub const TOMBSTONE_COLUMN: &str = "is_deleted";
/// Wire field carrying the tombstone flag.
pub const WIRE_TOMBSTONE_FIELD: &str = "deleted";

/// A replicated, user-owned collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Folders,
    Items,
    Planner,
    Semesters,
}

impl Collection {
    /// Every registered collection, in migration order.
    pub const ALL: [Self; 4] = [Self::Folders, Self::Items, Self::Planner, Self::Semesters];

    /// Wire name of the collection
    pub fn name(self) -> &'static str {
        self.config().name
    }

    /// Static configuration for this collection
    pub fn config(self) -> &'static CollectionConfig {
        match self {
            Self::Folders => &FOLDERS,
            Self::Items => &ITEMS,
            Self::Planner => &PLANNER,
            Self::Semesters => &SEMESTERS,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Collection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|collection| collection.name() == s)
            .ok_or_else(|| Error::UnknownCollection(s.to_string()))
    }
}

/// Shape of a semi-structured field on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonShape {
    /// Ordered list, empty default `[]`
    List,
    /// Object, empty default `{}`
    Object,
}

/// How a payload field is represented on the wire and in storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Real,
    /// Stored as `0`/`1`
    Boolean,
    /// Structured on the wire, JSON text in storage
    Json(JsonShape),
}

/// A declared payload field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldSpec {
    const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

/// Registry entry for one collection
#[derive(Debug)]
pub struct CollectionConfig {
    /// Wire name used in routes
    pub name: &'static str,
    /// Storage table
    pub table: &'static str,
    /// Client-chosen identity field
    pub identity: IdentityField,
    /// Named `(user_id, identity)` uniqueness constraint, when the table
    /// keys rows by a surrogate instead
    pub unique_constraint: Option<&'static str>,
    /// Pull ordering, most significant first (all ascending)
    pub order_by: [&'static str; 2],
    /// Declared payload fields
    pub fields: &'static [FieldSpec],
}

impl CollectionConfig {
    /// Look up a declared payload field by name
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Columns forming the upsert conflict target
    pub fn conflict_target(&self) -> [&'static str; 2] {
        [OWNER_COLUMN, self.identity.column()]
    }
}

static FOLDERS: CollectionConfig = CollectionConfig {
    name: "folders",
    table: "folders",
    identity: IdentityField::Id,
    unique_constraint: None,
    order_by: [CHANGE_TIME_COLUMN, "id"],
    fields: &[
        FieldSpec::new("name", FieldKind::Text),
        FieldSpec::new("color", FieldKind::Text),
        FieldSpec::new("position", FieldKind::Integer),
        FieldSpec::new("item_ids", FieldKind::Json(JsonShape::List)),
    ],
};

static ITEMS: CollectionConfig = CollectionConfig {
    name: "items",
    table: "items",
    identity: IdentityField::Id,
    unique_constraint: None,
    order_by: [CHANGE_TIME_COLUMN, "id"],
    fields: &[
        FieldSpec::new("title", FieldKind::Text),
        FieldSpec::new("course_code", FieldKind::Text),
        FieldSpec::new("credits", FieldKind::Real),
        FieldSpec::new("folder_id", FieldKind::Text),
        FieldSpec::new("completed", FieldKind::Boolean),
        FieldSpec::new("tags", FieldKind::Json(JsonShape::List)),
        FieldSpec::new("details", FieldKind::Json(JsonShape::Object)),
    ],
};

static PLANNER: CollectionConfig = CollectionConfig {
    name: "planner",
    table: "planner",
    identity: IdentityField::Uuid,
    unique_constraint: Some("planner_user_id_uuid_key"),
    order_by: [CHANGE_TIME_COLUMN, "uuid"],
    fields: &[
        FieldSpec::new("name", FieldKind::Text),
        FieldSpec::new("major", FieldKind::Text),
        FieldSpec::new("is_default", FieldKind::Boolean),
        FieldSpec::new("semester_uuids", FieldKind::Json(JsonShape::List)),
        FieldSpec::new("settings", FieldKind::Json(JsonShape::Object)),
    ],
};

static SEMESTERS: CollectionConfig = CollectionConfig {
    name: "semesters",
    table: "semesters",
    identity: IdentityField::Uuid,
    unique_constraint: Some("semesters_user_id_uuid_key"),
    order_by: [CHANGE_TIME_COLUMN, "uuid"],
    fields: &[
        FieldSpec::new("planner_uuid", FieldKind::Text),
        FieldSpec::new("term", FieldKind::Text),
        FieldSpec::new("year", FieldKind::Integer),
        FieldSpec::new("notes", FieldKind::Text),
        FieldSpec::new("course_ids", FieldKind::Json(JsonShape::List)),
    ],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_collections() {
        for collection in Collection::ALL {
            let parsed: Collection = collection.name().parse().unwrap();
            assert_eq!(parsed, collection);
        }
    }

    #[test]
    fn test_parse_unknown_collection() {
        let err = "courses".parse::<Collection>().unwrap_err();
        assert!(matches!(err, Error::UnknownCollection(name) if name == "courses"));
    }

    #[test]
    fn test_identity_regimes() {
        assert_eq!(Collection::Folders.config().identity, IdentityField::Id);
        assert_eq!(Collection::Items.config().unique_constraint, None);
        assert_eq!(Collection::Planner.config().identity, IdentityField::Uuid);
        assert_eq!(
            Collection::Semesters.config().unique_constraint,
            Some("semesters_user_id_uuid_key")
        );
    }

    #[test]
    fn test_order_by_ends_with_identity() {
        for collection in Collection::ALL {
            let config = collection.config();
            assert_eq!(config.order_by[0], CHANGE_TIME_COLUMN);
            assert_eq!(config.order_by[1], config.identity.column());
        }
    }

    #[test]
    fn test_fields_do_not_shadow_reserved_columns() {
        for collection in Collection::ALL {
            let config = collection.config();
            for reserved in [
                OWNER_COLUMN,
                CHANGE_TIME_COLUMN,
                TOMBSTONE_COLUMN,
                WIRE_TOMBSTONE_FIELD,
                config.identity.column(),
            ] {
                assert!(config.field(reserved).is_none(), "{collection}.{reserved}");
            }
        }
    }
}
