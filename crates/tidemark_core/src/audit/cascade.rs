//! Soft-delete cascade from a principal to its tracked dependents.
//!
//! # Invariants
//! - Only entries already tracked are visited; the store is never read.
//! - Traversal follows principal -> dependent edges only.
//! - Each entry is visited at most once per resolver, so cyclic graphs
//!   terminate.

use super::Stamp;
use crate::context::{ChangeTracker, EntryId, EntryState};
use crate::model::entity::is_soft_deleted;
use std::collections::{HashSet, VecDeque};

/// Worklist traversal shared by every cascade root of one audit pass.
#[derive(Debug, Default)]
pub struct CascadeResolver {
    visited: HashSet<EntryId>,
    worklist: VecDeque<EntryId>,
}

impl CascadeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tombstones every reachable `Unchanged` soft-deletable dependent of
    /// `root` and returns how many were promoted.
    ///
    /// Dependents that are not soft-deletable, already tombstoned, or
    /// already pending are left as they are and not traversed further.
    pub fn cascade_from(
        &mut self,
        tracker: &mut ChangeTracker,
        root: EntryId,
        stamp: &Stamp<'_>,
    ) -> usize {
        self.visited.insert(root);
        self.worklist.push_back(root);

        let mut promoted = 0;
        while let Some(current) = self.worklist.pop_front() {
            let Some(entity) = tracker.entity(current) else {
                continue;
            };
            let relationships = tracker
                .model()
                .relationships_from(entity.entity_type().name)
                .to_vec();

            for relationship in &relationships {
                for dependent in tracker.dependents(current, relationship) {
                    if !self.visited.insert(dependent) {
                        continue;
                    }
                    if tracker.state(dependent) != Some(EntryState::Unchanged) {
                        continue;
                    }
                    if tracker.entity(dependent).is_some_and(is_soft_deleted) {
                        continue;
                    }
                    if apply_soft_delete(tracker, dependent, stamp) {
                        promoted += 1;
                        self.worklist.push_back(dependent);
                    }
                }
            }
        }

        log::debug!("event=cascade module=audit status=ok root={root} promoted={promoted}");
        promoted
    }

    pub fn is_visited(&self, id: EntryId) -> bool {
        self.visited.contains(&id)
    }
}

/// Turns a delete of `id` into a tombstone update stamped with `stamp`.
///
/// Returns `false` when the entry is gone or not soft-deletable.
pub(crate) fn apply_soft_delete(tracker: &mut ChangeTracker, id: EntryId, stamp: &Stamp<'_>) -> bool {
    let Some(entity) = tracker.entity_mut(id) else {
        return false;
    };
    if entity.as_soft_deletable().is_none() {
        return false;
    }

    let deleted_time = match entity.as_auditable_mut() {
        Some(auditable) => {
            auditable.stamp_modified(stamp.actor, stamp.now);
            auditable.audit_info().modified_time.unwrap_or(stamp.now)
        }
        None => stamp.now,
    };
    if let Some(soft) = entity.as_soft_deletable_mut() {
        soft.mark_deleted(deleted_time);
    }

    if tracker.set_state(id, EntryState::Modified).is_err() {
        return false;
    }
    tracker.set_stamped(id);
    true
}
