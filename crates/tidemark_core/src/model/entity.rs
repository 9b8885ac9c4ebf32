//! Entity contract and static entity type descriptors.
//!
//! # Responsibility
//! - Describe how one entity type maps onto one table.
//! - Convert entity instances to and from `PropertyValues`.
//! - Expose capabilities through trait-object accessors so callers can ask
//!   "is this auditable?" without runtime type inspection.
//!
//! # Invariants
//! - `key()` never changes for the lifetime of one tracked instance.
//! - `to_values()` emits every column of the descriptor.

use super::capability::{Auditable, Concurrent, SoftDeletable};
use super::value::{Column, PropertyValues, Value};
use super::ModelResult;
use std::any::Any;
use std::fmt::Debug;
use uuid::Uuid;

/// Stable identity of one entity row.
pub type EntityKey = Uuid;

/// Static mapping of one entity type onto one table.
#[derive(Debug)]
pub struct EntityType {
    /// Logical type name used in diagnostics and navigation lookups.
    pub name: &'static str,
    pub table: &'static str,
    pub key_column: &'static str,
    pub columns: &'static [Column],
}

impl EntityType {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|column| column.name)
    }

    /// Returns whether two descriptors refer to the same entity type.
    pub fn same_as(&self, other: &EntityType) -> bool {
        self.name == other.name
    }
}

/// Persisted record with an identity key and optional capabilities.
pub trait Entity: Any + Debug {
    /// Static descriptor for the implementing type.
    fn descriptor() -> &'static EntityType
    where
        Self: Sized;

    /// Builds an instance from a full value map.
    fn from_values(values: &PropertyValues) -> ModelResult<Self>
    where
        Self: Sized;

    /// Descriptor of this instance's type.
    fn entity_type(&self) -> &'static EntityType;

    fn key(&self) -> EntityKey;

    fn to_values(&self) -> PropertyValues;

    /// Overwrites every column from `values`.
    fn apply_values(&mut self, values: &PropertyValues) -> ModelResult<()>;

    /// Reads a uuid foreign key column, if present and set.
    fn foreign_key(&self, column: &str) -> Option<EntityKey> {
        self.to_values().get(column).and_then(Value::as_uuid)
    }

    fn as_auditable(&self) -> Option<&dyn Auditable> {
        None
    }

    fn as_auditable_mut(&mut self) -> Option<&mut dyn Auditable> {
        None
    }

    fn as_soft_deletable(&self) -> Option<&dyn SoftDeletable> {
        None
    }

    fn as_soft_deletable_mut(&mut self) -> Option<&mut dyn SoftDeletable> {
        None
    }

    fn as_concurrent(&self) -> Option<&dyn Concurrent> {
        None
    }

    fn as_concurrent_mut(&mut self) -> Option<&mut dyn Concurrent> {
        None
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Returns whether the entity is soft-deletable and currently tombstoned.
pub fn is_soft_deleted(entity: &dyn Entity) -> bool {
    entity
        .as_soft_deletable()
        .is_some_and(|soft| soft.is_deleted())
}
