//! Identity-mapped change tracker.
//!
//! # Responsibility
//! - Own every tracked entity instance of one context.
//! - Record each entry's state and which navigations were eagerly loaded.
//! - Answer "which tracked entities depend on this one" without store reads.
//!
//! # Invariants
//! - At most one live entry per `(entity type, key)`.
//! - `EntryId`s are arena slots that are never reused, so an id held in a
//!   visited set can never alias a later entry.
//! - Entries are enumerated in attach order.

use super::{ContextError, ContextResult};
use crate::model::entity::{Entity, EntityKey, EntityType};
use crate::model::navigation::Relationship;
use crate::model::registry::Model;
use crate::model::value::PropertyValues;
use crate::model::ModelError;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Arena index of one tracked entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntryId(usize);

impl Display for EntryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Pending mutation state of one tracked entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Unchanged,
    Added,
    Modified,
    Deleted,
}

impl EntryState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }
}

#[derive(Debug)]
struct TrackedEntry {
    entity: Box<dyn Entity>,
    state: EntryState,
    loaded_navigations: BTreeSet<&'static str>,
    stamped: bool,
}

/// One navigation of a tracked entry and its currently tracked dependents.
#[derive(Debug, Clone)]
pub struct NavigationEntry {
    pub relationship: Relationship,
    /// Whether the navigation was eagerly loaded from the store.
    pub is_loaded: bool,
    pub dependents: Vec<EntryId>,
}

/// Read-only view over one tracked entry.
#[derive(Clone, Copy)]
pub struct ChangeEntry<'a> {
    id: EntryId,
    tracked: &'a TrackedEntry,
    tracker: &'a ChangeTracker,
}

impl<'a> ChangeEntry<'a> {
    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn state(&self) -> EntryState {
        self.tracked.state
    }

    pub fn entity(&self) -> &'a dyn Entity {
        self.tracked.entity.as_ref()
    }

    pub fn entity_type(&self) -> &'static EntityType {
        self.tracked.entity.entity_type()
    }

    pub fn key(&self) -> EntityKey {
        self.tracked.entity.key()
    }

    pub fn current_values(&self) -> PropertyValues {
        self.tracked.entity.to_values()
    }

    /// Whether an audit pass already stamped this entry since it last
    /// changed state.
    pub fn is_stamped(&self) -> bool {
        self.tracked.stamped
    }

    pub fn navigations(&self) -> Vec<NavigationEntry> {
        self.tracker.navigations(self.id)
    }
}

impl std::fmt::Debug for ChangeEntry<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeEntry")
            .field("id", &self.id)
            .field("entity_type", &self.entity_type().name)
            .field("key", &self.key())
            .field("state", &self.state())
            .finish()
    }
}

/// Restartable iterator over live entries in attach order.
#[derive(Clone)]
pub struct Entries<'a> {
    tracker: &'a ChangeTracker,
    next: usize,
}

impl<'a> Iterator for Entries<'a> {
    type Item = ChangeEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.tracker.slots.len() {
            let id = EntryId(self.next);
            self.next += 1;
            if let Some(entry) = self.tracker.entry(id) {
                return Some(entry);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.tracker.slots.len().saturating_sub(self.next)))
    }
}

/// Change-tracking graph of one persistence context.
#[derive(Debug)]
pub struct ChangeTracker {
    model: Arc<Model>,
    slots: Vec<Option<TrackedEntry>>,
    identity: HashMap<(&'static str, EntityKey), EntryId>,
}

impl ChangeTracker {
    pub fn new(model: Arc<Model>) -> Self {
        Self {
            model,
            slots: Vec::new(),
            identity: HashMap::new(),
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub(crate) fn model_handle(&self) -> Arc<Model> {
        Arc::clone(&self.model)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.identity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identity.is_empty()
    }

    pub fn entries(&self) -> Entries<'_> {
        Entries {
            tracker: self,
            next: 0,
        }
    }

    pub fn entry(&self, id: EntryId) -> Option<ChangeEntry<'_>> {
        self.live(id).map(|tracked| ChangeEntry {
            id,
            tracked,
            tracker: self,
        })
    }

    /// Finds the live entry tracking `(entity_type, key)`.
    pub fn find(&self, entity_type: &EntityType, key: EntityKey) -> Option<EntryId> {
        self.identity.get(&(entity_type.name, key)).copied()
    }

    /// Live entries of one entity type, in attach order.
    pub fn ids_of_type(&self, entity_type: &EntityType) -> Vec<EntryId> {
        self.entries()
            .filter(|entry| entry.entity_type().same_as(entity_type))
            .map(|entry| entry.id())
            .collect()
    }

    /// Starts tracking `entity` in `state`.
    ///
    /// # Errors
    /// - `Model(UnknownEntityType)` when the type is not registered.
    /// - `AlreadyTracked` when another entry already tracks the same key.
    pub fn attach(&mut self, entity: Box<dyn Entity>, state: EntryState) -> ContextResult<EntryId> {
        let entity_type = entity.entity_type();
        if !self.model.contains(entity_type.name) {
            return Err(ModelError::UnknownEntityType(entity_type.name).into());
        }

        let key = entity.key();
        if self.identity.contains_key(&(entity_type.name, key)) {
            return Err(ContextError::AlreadyTracked {
                entity: entity_type.name,
                key,
            });
        }

        let id = EntryId(self.slots.len());
        self.slots.push(Some(TrackedEntry {
            entity,
            state,
            loaded_navigations: BTreeSet::new(),
            stamped: false,
        }));
        self.identity.insert((entity_type.name, key), id);
        Ok(id)
    }

    /// Stops tracking `id` and hands the entity back.
    pub fn detach(&mut self, id: EntryId) -> Option<Box<dyn Entity>> {
        let tracked = self.slots.get_mut(id.0)?.take()?;
        self.identity
            .remove(&(tracked.entity.entity_type().name, tracked.entity.key()));
        Some(tracked.entity)
    }

    pub fn state(&self, id: EntryId) -> Option<EntryState> {
        self.live(id).map(|tracked| tracked.state)
    }

    /// Moves `id` to `state`. A real transition clears the stamped marker so
    /// the next audit pass sees the entry again.
    pub fn set_state(&mut self, id: EntryId, state: EntryState) -> ContextResult<()> {
        let tracked = self.live_mut(id).ok_or(ContextError::EntryNotFound(id))?;
        if tracked.state != state {
            tracked.state = state;
            tracked.stamped = false;
        }
        Ok(())
    }

    pub fn entity(&self, id: EntryId) -> Option<&dyn Entity> {
        self.live(id).map(|tracked| tracked.entity.as_ref())
    }

    pub fn entity_mut(&mut self, id: EntryId) -> Option<&mut dyn Entity> {
        match self.live_mut(id) {
            Some(tracked) => Some(tracked.entity.as_mut()),
            None => None,
        }
    }

    /// Typed copy of the tracked instance.
    pub fn typed<E: Entity + Clone>(&self, id: EntryId) -> Option<E> {
        self.entity(id)?.as_any().downcast_ref::<E>().cloned()
    }

    /// Swaps in a new instance for the same identity.
    pub fn replace_entity(&mut self, id: EntryId, entity: Box<dyn Entity>) -> ContextResult<()> {
        let tracked = self.live_mut(id).ok_or(ContextError::EntryNotFound(id))?;
        let same_identity = tracked.entity.entity_type().same_as(entity.entity_type())
            && tracked.entity.key() == entity.key();
        if !same_identity {
            return Err(ContextError::InvalidData(format!(
                "entry {id} tracks {} {}, refusing to replace it with {} {}",
                tracked.entity.entity_type().name,
                tracked.entity.key(),
                entity.entity_type().name,
                entity.key()
            )));
        }
        tracked.entity = entity;
        tracked.stamped = false;
        Ok(())
    }

    pub fn is_stamped(&self, id: EntryId) -> bool {
        self.live(id).is_some_and(|tracked| tracked.stamped)
    }

    pub(crate) fn set_stamped(&mut self, id: EntryId) {
        if let Some(tracked) = self.live_mut(id) {
            tracked.stamped = true;
        }
    }

    /// Marks pending changes of `id` as persisted.
    pub(crate) fn accept_changes(&mut self, id: EntryId) {
        if let Some(tracked) = self.live_mut(id) {
            tracked.state = EntryState::Unchanged;
            tracked.stamped = false;
        }
    }

    pub fn mark_navigation_loaded(&mut self, id: EntryId, navigation: &'static str) {
        if let Some(tracked) = self.live_mut(id) {
            tracked.loaded_navigations.insert(navigation);
        }
    }

    pub fn is_navigation_loaded(&self, id: EntryId, navigation: &str) -> bool {
        self.live(id)
            .is_some_and(|tracked| tracked.loaded_navigations.contains(navigation))
    }

    /// Tracked dependents of `id` through `relationship`, in attach order.
    ///
    /// Only already tracked entities are considered; nothing is loaded.
    pub fn dependents(&self, id: EntryId, relationship: &Relationship) -> Vec<EntryId> {
        let Some(principal) = self.entity(id) else {
            return Vec::new();
        };
        if !principal.entity_type().same_as(relationship.principal) {
            return Vec::new();
        }

        let principal_key = principal.key();
        self.entries()
            .filter(|entry| entry.entity_type().same_as(relationship.dependent))
            .filter(|entry| entry.entity().foreign_key(relationship.foreign_key) == Some(principal_key))
            .map(|entry| entry.id())
            .collect()
    }

    /// Every declared navigation of `id` with its tracked dependents.
    pub fn navigations(&self, id: EntryId) -> Vec<NavigationEntry> {
        let Some(entity) = self.entity(id) else {
            return Vec::new();
        };
        self.model
            .relationships_from(entity.entity_type().name)
            .iter()
            .map(|relationship| NavigationEntry {
                relationship: *relationship,
                is_loaded: self.is_navigation_loaded(id, relationship.name),
                dependents: self.dependents(id, relationship),
            })
            .collect()
    }

    fn live(&self, id: EntryId) -> Option<&TrackedEntry> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    fn live_mut(&mut self, id: EntryId) -> Option<&mut TrackedEntry> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }
}
