//! Column values and property maps.
//!
//! # Responsibility
//! - Define the storage-neutral value shape exchanged between entities,
//!   the change tracker and the SQLite store.
//! - Provide typed accessors that reject malformed persisted data.
//!
//! # Invariants
//! - Timestamps are epoch milliseconds stored as `Value::Integer`.
//! - Identity and foreign-key columns are always `Value::Uuid`.

use super::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Storage kind of one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    Uuid,
    Text,
    Integer,
    Bool,
    Blob,
}

impl ColumnKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uuid => "uuid",
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Bool => "bool",
            Self::Blob => "blob",
        }
    }
}

/// Static column descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub nullable: bool,
}

impl Column {
    pub const fn required(name: &'static str, kind: ColumnKind) -> Self {
        Self {
            name,
            kind,
            nullable: false,
        }
    }

    pub const fn optional(name: &'static str, kind: ColumnKind) -> Self {
        Self {
            name,
            kind,
            nullable: true,
        }
    }
}

/// One column value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Text(String),
    Blob(Vec<u8>),
    Uuid(Uuid),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns whether this value can be stored in a column of `kind`.
    pub fn fits(&self, column: &Column) -> bool {
        match (self, column.kind) {
            (Self::Null, _) => column.nullable,
            (Self::Bool(_), ColumnKind::Bool)
            | (Self::Integer(_), ColumnKind::Integer)
            | (Self::Text(_), ColumnKind::Text)
            | (Self::Blob(_), ColumnKind::Blob)
            | (Self::Uuid(_), ColumnKind::Uuid) => true,
            _ => false,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value:?}"),
            Self::Blob(bytes) => {
                write!(f, "0x")?;
                for byte in bytes {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Self::Uuid(value) => write!(f, "{value}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Blob(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Column-name keyed value map for one entity instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PropertyValues {
    values: BTreeMap<&'static str, Value>,
}

impl PropertyValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets one column value, replacing any previous value.
    pub fn set(&mut self, column: &'static str, value: impl Into<Value>) {
        self.values.insert(column, value.into());
    }

    /// Builder-style variant of [`PropertyValues::set`].
    pub fn with(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.values.remove(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.values.iter().map(|(name, value)| (*name, value))
    }

    fn required(&self, column: &'static str) -> ModelResult<&Value> {
        self.values
            .get(column)
            .ok_or(ModelError::MissingColumn(column))
    }

    pub fn require_uuid(&self, column: &'static str) -> ModelResult<Uuid> {
        match self.required(column)? {
            Value::Uuid(value) => Ok(*value),
            other => Err(invalid(column, ColumnKind::Uuid, other)),
        }
    }

    pub fn require_text(&self, column: &'static str) -> ModelResult<String> {
        match self.required(column)? {
            Value::Text(value) => Ok(value.clone()),
            other => Err(invalid(column, ColumnKind::Text, other)),
        }
    }

    pub fn optional_text(&self, column: &'static str) -> ModelResult<Option<String>> {
        match self.values.get(column) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Text(value)) => Ok(Some(value.clone())),
            Some(other) => Err(invalid(column, ColumnKind::Text, other)),
        }
    }

    pub fn require_integer(&self, column: &'static str) -> ModelResult<i64> {
        match self.required(column)? {
            Value::Integer(value) => Ok(*value),
            other => Err(invalid(column, ColumnKind::Integer, other)),
        }
    }

    pub fn optional_integer(&self, column: &'static str) -> ModelResult<Option<i64>> {
        match self.values.get(column) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Integer(value)) => Ok(Some(*value)),
            Some(other) => Err(invalid(column, ColumnKind::Integer, other)),
        }
    }

    pub fn require_bool(&self, column: &'static str) -> ModelResult<bool> {
        match self.required(column)? {
            Value::Bool(value) => Ok(*value),
            other => Err(invalid(column, ColumnKind::Bool, other)),
        }
    }

    pub fn require_blob(&self, column: &'static str) -> ModelResult<Vec<u8>> {
        match self.required(column)? {
            Value::Blob(value) => Ok(value.clone()),
            other => Err(invalid(column, ColumnKind::Blob, other)),
        }
    }
}

fn invalid(column: &'static str, expected: ColumnKind, actual: &Value) -> ModelError {
    ModelError::InvalidValue {
        column,
        expected,
        actual: actual.to_string(),
    }
}
