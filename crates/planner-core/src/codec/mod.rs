//! Field codec
//!
//! Maps wire documents to storage rows and back. Each declared field kind
//! carries its own encode/decode pair; semi-structured fields travel as
//! lists/objects on the wire and as JSON text in storage.
//!
//! `decode(encode(doc)) == doc` holds for every valid document: all
//! semi-structured fields present, no explicit `null` scalars, and integral
//! numbers written as integers.

use rusqlite::types::Value as SqlValue;
use serde_json::{Map, Number, Value};

use crate::collections::{
    CollectionConfig, FieldKind, JsonShape, CHANGE_TIME_COLUMN, OWNER_COLUMN, TOMBSTONE_COLUMN,
    WIRE_TOMBSTONE_FIELD,
};
use crate::error::{Error, Result};
use crate::models::{StoredRow, WireDocument};

/// Largest integer an `f64` represents exactly.
const MAX_EXACT_FLOAT_INT: f64 = 9_007_199_254_740_992.0;

/// Project a stored row into its wire shape.
///
/// Owner and change time are dropped; the tombstone becomes `deleted`.
pub fn decode(config: &CollectionConfig, row: &StoredRow) -> Result<WireDocument> {
    let mut doc = Map::new();
    doc.insert(
        config.identity.column().to_string(),
        Value::String(row.identity.clone()),
    );

    for spec in config.fields {
        let stored = row.field(spec.name).cloned().unwrap_or(SqlValue::Null);
        if let Some(value) = spec.kind.decode(spec.name, stored)? {
            doc.insert(spec.name.to_string(), value);
        }
    }

    doc.insert(
        WIRE_TOMBSTONE_FIELD.to_string(),
        Value::Bool(row.is_deleted),
    );
    Ok(doc)
}

/// Flatten a wire document into a storage row owned by `owner`.
///
/// The tombstone is only set when the document says `deleted: true`.
pub fn encode(
    config: &CollectionConfig,
    owner: &str,
    doc: &WireDocument,
    change_time: i64,
) -> Result<StoredRow> {
    let identity = config
        .identity
        .get(doc)
        .filter(|identity| !identity.is_empty())
        .ok_or_else(|| {
            Error::InvalidInput(format!(
                "{} document is missing a non-empty `{}`",
                config.name,
                config.identity.column()
            ))
        })?
        .to_string();

    for key in doc.keys() {
        if RESERVED_COLUMNS.contains(&key.as_str()) {
            return Err(Error::InvalidInput(format!(
                "{} document sets server-managed field `{key}`",
                config.name
            )));
        }
        if !is_known_field(config, key) {
            return Err(Error::InvalidInput(format!(
                "{} document has unknown field `{key}`",
                config.name
            )));
        }
    }

    let is_deleted = tombstone_flag(doc)?.unwrap_or(false);

    let fields = config
        .fields
        .iter()
        .map(|spec| {
            let value = doc.get(spec.name).unwrap_or(&Value::Null);
            spec.kind
                .encode(spec.name, value)
                .map(|encoded| (spec.name, encoded))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(StoredRow {
        owner: owner.to_string(),
        identity,
        change_time,
        is_deleted,
        fields,
    })
}

/// Read the wire tombstone flag, rejecting non-boolean values.
pub fn tombstone_flag(doc: &WireDocument) -> Result<Option<bool>> {
    match doc.get(WIRE_TOMBSTONE_FIELD) {
        None => Ok(None),
        Some(Value::Bool(flag)) => Ok(Some(*flag)),
        Some(_) => Err(Error::InvalidInput(format!(
            "`{WIRE_TOMBSTONE_FIELD}` must be a boolean"
        ))),
    }
}

fn is_known_field(config: &CollectionConfig, key: &str) -> bool {
    key == config.identity.column() || key == WIRE_TOMBSTONE_FIELD || config.field(key).is_some()
}

/// Storage-only columns never accepted from or emitted to clients.
pub const RESERVED_COLUMNS: [&str; 3] = [OWNER_COLUMN, CHANGE_TIME_COLUMN, TOMBSTONE_COLUMN];

impl JsonShape {
    /// Empty value substituted for a missing stored field
    pub fn empty(self) -> Value {
        match self {
            Self::List => Value::Array(Vec::new()),
            Self::Object => Value::Object(Map::new()),
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Self::List => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::List => "a list",
            Self::Object => "an object",
        }
    }
}

impl FieldKind {
    /// Wire value to storage value
    pub fn encode(self, name: &str, value: &Value) -> Result<SqlValue> {
        if value.is_null() {
            return Ok(SqlValue::Null);
        }

        let encoded = match (self, value) {
            (Self::Text, Value::String(text)) => Some(SqlValue::Text(text.clone())),
            (Self::Integer, Value::Number(number)) => number.as_i64().map(SqlValue::Integer),
            (Self::Real, Value::Number(number)) => number.as_f64().map(SqlValue::Real),
            (Self::Boolean, Value::Bool(flag)) => Some(SqlValue::Integer(i64::from(*flag))),
            (Self::Json(shape), Value::String(text)) => {
                // Already-encoded text passes through once it parses to the declared shape.
                serde_json::from_str::<Value>(text)
                    .ok()
                    .filter(|parsed| shape.matches(parsed))
                    .map(|_| SqlValue::Text(text.clone()))
            }
            (Self::Json(shape), structured) if shape.matches(structured) => {
                Some(SqlValue::Text(serde_json::to_string(structured)?))
            }
            _ => None,
        };

        encoded.ok_or_else(|| {
            Error::InvalidInput(format!("field `{name}` must be {}", self.expected()))
        })
    }

    /// Storage value to wire value; `None` means the field is omitted
    pub fn decode(self, name: &str, value: SqlValue) -> Result<Option<Value>> {
        let decoded = match (self, value) {
            (Self::Json(shape), SqlValue::Null) => Some(shape.empty()),
            (_, SqlValue::Null) => return Ok(None),
            (Self::Text, SqlValue::Text(text)) => Some(Value::String(text)),
            (Self::Integer, SqlValue::Integer(number)) => Some(Value::from(number)),
            (Self::Real, SqlValue::Integer(number)) => Some(Value::from(number)),
            (Self::Real, SqlValue::Real(number)) => canonical_number(number),
            (Self::Boolean, SqlValue::Integer(flag)) => Some(Value::Bool(flag != 0)),
            (Self::Json(shape), SqlValue::Text(text)) => {
                let parsed = serde_json::from_str::<Value>(&text).map_err(|error| {
                    Error::Codec(format!("field `{name}` holds invalid JSON: {error}"))
                })?;
                if !shape.matches(&parsed) {
                    return Err(Error::Codec(format!(
                        "field `{name}` must decode to {}",
                        shape.label()
                    )));
                }
                Some(parsed)
            }
            _ => None,
        };

        decoded.map(Some).ok_or_else(|| {
            Error::Codec(format!(
                "field `{name}` has a stored value that is not {}",
                self.expected()
            ))
        })
    }

    const fn expected(self) -> &'static str {
        match self {
            Self::Text => "a string",
            Self::Integer => "an integer",
            Self::Real => "a number",
            Self::Boolean => "a boolean",
            Self::Json(shape) => shape.label(),
        }
    }
}

/// Integral reals go back on the wire as integers, matching how clients
/// serialize them.
#[allow(clippy::cast_possible_truncation)]
fn canonical_number(number: f64) -> Option<Value> {
    if number.fract() == 0.0 && number.abs() < MAX_EXACT_FLOAT_INT {
        return Some(Value::from(number as i64));
    }
    Number::from_f64(number).map(Value::Number)
}
