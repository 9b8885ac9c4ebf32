//! Entity model: values, capabilities, relationships and the school schema.
//!
//! # Responsibility
//! - Define the entity contract consumed by the change tracker and store.
//! - Declare optional capabilities (`Auditable`, `SoftDeletable`,
//!   `Concurrent`) as traits implemented per entity type.
//! - Register navigation relationships once, at model-build time.
//!
//! # Invariants
//! - Every entity is identified by a stable `EntityKey`.
//! - Relationship edges always point principal -> dependent.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod capability;
pub mod entity;
#[cfg(test)]
pub(crate) mod fixtures;
pub mod navigation;
pub mod registry;
pub mod school;
pub mod value;

pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while building a model or converting entity values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Entity type was not registered on the model.
    UnknownEntityType(&'static str),
    /// Navigation name is not declared on the source entity type.
    UnknownNavigation { entity: String, navigation: String },
    /// Navigation name is declared twice on one entity type.
    DuplicateNavigation {
        entity: &'static str,
        navigation: &'static str,
    },
    /// Foreign key column is missing or is not a uuid column.
    InvalidForeignKey {
        entity: &'static str,
        column: &'static str,
    },
    /// Navigation path is empty or malformed.
    InvalidNavigationPath(String),
    /// Required column is missing from a value map.
    MissingColumn(&'static str),
    /// Column value does not match the declared kind.
    InvalidValue {
        column: &'static str,
        expected: value::ColumnKind,
        actual: String,
    },
}

impl Display for ModelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownEntityType(name) => write!(f, "entity type is not registered: {name}"),
            Self::UnknownNavigation { entity, navigation } => {
                write!(f, "entity `{entity}` has no navigation `{navigation}`")
            }
            Self::DuplicateNavigation { entity, navigation } => write!(
                f,
                "navigation `{navigation}` is declared twice on entity `{entity}`"
            ),
            Self::InvalidForeignKey { entity, column } => write!(
                f,
                "entity `{entity}` has no uuid foreign key column `{column}`"
            ),
            Self::InvalidNavigationPath(path) => write!(f, "invalid navigation path `{path}`"),
            Self::MissingColumn(column) => write!(f, "missing column value `{column}`"),
            Self::InvalidValue {
                column,
                expected,
                actual,
            } => write!(
                f,
                "column `{column}` expects {} value, got {actual}",
                expected.as_str()
            ),
        }
    }
}

impl Error for ModelError {}
