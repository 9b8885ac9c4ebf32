//! Model registry: registered entity types and their relationship edges.
//!
//! # Responsibility
//! - Register entity types in principal-first order.
//! - Keep relationship edges indexed by principal type name.
//! - Resolve navigation paths into relationship hops.
//!
//! # Invariants
//! - Registration order is the write order for inserts/updates and the
//!   reverse of the write order for deletes.
//! - Navigation names are unique per principal type.

use super::entity::{Entity, EntityType};
use super::navigation::{Cardinality, Navigation, NavigationPath, Relationship};
use super::value::{ColumnKind, PropertyValues};
use super::{ModelError, ModelResult};
use std::collections::HashMap;

/// Builds a boxed entity of a registered type from a full value map.
pub type Materializer = fn(&PropertyValues) -> ModelResult<Box<dyn Entity>>;

#[derive(Clone, Copy)]
struct Registration {
    entity_type: &'static EntityType,
    materialize: Materializer,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("entity_type", &self.entity_type.name)
            .finish_non_exhaustive()
    }
}

/// Immutable model shared by every context built on it.
#[derive(Debug, Default)]
pub struct Model {
    registrations: Vec<Registration>,
    edges: HashMap<&'static str, Vec<Relationship>>,
}

impl Model {
    pub fn builder() -> ModelBuilder {
        ModelBuilder::default()
    }

    /// Registered entity types, principal-first.
    pub fn entity_types(&self) -> impl Iterator<Item = &'static EntityType> + '_ {
        self.registrations.iter().map(|r| r.entity_type)
    }

    pub fn contains(&self, entity: &str) -> bool {
        self.registration_index(entity).is_some()
    }

    /// Position of `entity` in registration order.
    pub fn registration_index(&self, entity: &str) -> Option<usize> {
        self.registrations
            .iter()
            .position(|r| r.entity_type.name == entity)
    }

    /// Relationship edges whose principal is `entity`.
    pub fn relationships_from(&self, entity: &str) -> &[Relationship] {
        self.edges.get(entity).map_or(&[], Vec::as_slice)
    }

    pub fn relationship(&self, entity: &str, navigation: &str) -> Option<&Relationship> {
        self.relationships_from(entity)
            .iter()
            .find(|relationship| relationship.name == navigation)
    }

    /// Materializes a boxed entity of `entity_type` from stored values.
    pub fn materialize(
        &self,
        entity_type: &EntityType,
        values: &PropertyValues,
    ) -> ModelResult<Box<dyn Entity>> {
        let registration = self
            .registrations
            .iter()
            .find(|r| r.entity_type.same_as(entity_type))
            .ok_or(ModelError::UnknownEntityType(entity_type.name))?;
        (registration.materialize)(values)
    }

    /// Resolves `path` rooted at `root` into one relationship per hop.
    pub fn resolve(
        &self,
        root: &'static EntityType,
        path: &NavigationPath,
    ) -> ModelResult<Vec<Relationship>> {
        if !self.contains(root.name) {
            return Err(ModelError::UnknownEntityType(root.name));
        }

        let mut current = root;
        let mut hops = Vec::with_capacity(path.segments().len());
        for segment in path.segments() {
            let relationship = self.relationship(current.name, segment).ok_or_else(|| {
                ModelError::UnknownNavigation {
                    entity: current.name.to_string(),
                    navigation: segment.clone(),
                }
            })?;
            current = relationship.dependent;
            hops.push(*relationship);
        }

        if hops.is_empty() {
            return Err(ModelError::InvalidNavigationPath(path.to_string()));
        }
        Ok(hops)
    }
}

/// Model-build-time registration API.
#[derive(Debug, Default)]
pub struct ModelBuilder {
    registrations: Vec<Registration>,
    relationships: Vec<Relationship>,
}

impl ModelBuilder {
    /// Registers entity type `E`. Principals must be registered before their
    /// dependents.
    pub fn entity<E: Entity>(mut self) -> Self {
        self.registrations.push(Registration {
            entity_type: E::descriptor(),
            materialize: materialize_boxed::<E>,
        });
        self
    }

    /// Declares a one-to-many edge `P -> D` keyed by `foreign_key` on `D`.
    pub fn has_many<P: Entity, D: Entity>(
        self,
        navigation: Navigation<P, D>,
        foreign_key: &'static str,
    ) -> Self {
        self.relate(navigation, foreign_key, Cardinality::Many)
    }

    /// Declares a one-to-one edge `P -> D` keyed by `foreign_key` on `D`.
    pub fn has_one<P: Entity, D: Entity>(
        self,
        navigation: Navigation<P, D>,
        foreign_key: &'static str,
    ) -> Self {
        self.relate(navigation, foreign_key, Cardinality::One)
    }

    fn relate<P: Entity, D: Entity>(
        mut self,
        navigation: Navigation<P, D>,
        foreign_key: &'static str,
        cardinality: Cardinality,
    ) -> Self {
        self.relationships.push(Relationship {
            name: navigation.name(),
            principal: P::descriptor(),
            dependent: D::descriptor(),
            foreign_key,
            cardinality,
        });
        self
    }

    /// Validates registrations and freezes the edge list.
    pub fn build(self) -> ModelResult<Model> {
        let mut model = Model {
            registrations: self.registrations,
            edges: HashMap::new(),
        };

        for relationship in self.relationships {
            for entity in [relationship.principal, relationship.dependent] {
                if !model.contains(entity.name) {
                    return Err(ModelError::UnknownEntityType(entity.name));
                }
            }

            let foreign_key_is_uuid = relationship
                .dependent
                .column(relationship.foreign_key)
                .is_some_and(|column| column.kind == ColumnKind::Uuid);
            if !foreign_key_is_uuid {
                return Err(ModelError::InvalidForeignKey {
                    entity: relationship.dependent.name,
                    column: relationship.foreign_key,
                });
            }

            if model
                .relationship(relationship.principal.name, relationship.name)
                .is_some()
            {
                return Err(ModelError::DuplicateNavigation {
                    entity: relationship.principal.name,
                    navigation: relationship.name,
                });
            }

            model
                .edges
                .entry(relationship.principal.name)
                .or_default()
                .push(relationship);
        }

        Ok(model)
    }
}

fn materialize_boxed<E: Entity>(values: &PropertyValues) -> ModelResult<Box<dyn Entity>> {
    Ok(Box::new(E::from_values(values)?))
}
