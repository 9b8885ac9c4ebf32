//! Audit stamper: the pre-commit hook that stamps pending entries.
//!
//! # Responsibility
//! - Stamp `created_*` on added auditable entities and `modified_*` on
//!   modified ones.
//! - Turn deletes of soft-deletable entities into tombstone updates and
//!   cascade them to tracked dependents.
//!
//! # Invariants
//! - Creation fields are written only for `Added` entries.
//! - Deletes of entities without soft delete stay physical deletes and are
//!   not stamped.
//! - Deleting an entity that is already tombstoned is a no-op: the entry
//!   returns to `Unchanged` and keeps its original deletion stamps.
//! - An entry stamped by one pass is skipped by later passes until its
//!   changes are accepted, it changes state, or it is replaced.

use super::cascade::{apply_soft_delete, CascadeResolver};
use super::snapshot::pending_entry_ids;
use super::Stamp;
use crate::actor::{
    resolve_actor_name, AnonymousPrincipal, Clock, FixedPrincipal, PrincipalAccessor, SystemClock,
};
use crate::context::{DbContext, EntryState};
use crate::model::entity::is_soft_deleted;
use serde::Serialize;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Per-pass counts reported by [`AuditStamper::handle`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AuditSummary {
    pub created: usize,
    pub modified: usize,
    pub soft_deleted: usize,
    pub cascaded: usize,
    pub hard_deleted: usize,
    /// Deletes of entries that were already tombstoned; nothing is written.
    pub already_deleted: usize,
}

#[derive(Clone)]
pub struct AuditStamper {
    principal: Arc<dyn PrincipalAccessor>,
    clock: Arc<dyn Clock>,
}

impl Debug for AuditStamper {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditStamper")
            .field("actor", &self.actor_name())
            .finish_non_exhaustive()
    }
}

impl AuditStamper {
    pub fn new(principal: Arc<dyn PrincipalAccessor>, clock: Arc<dyn Clock>) -> Self {
        Self { principal, clock }
    }

    /// Stamper with no principal and the system clock.
    pub fn anonymous() -> Self {
        Self::new(Arc::new(AnonymousPrincipal), Arc::new(SystemClock))
    }

    pub fn for_actor(name: impl Into<String>) -> Self {
        Self::new(Arc::new(FixedPrincipal::new(name)), Arc::new(SystemClock))
    }

    pub fn actor_name(&self) -> String {
        resolve_actor_name(self.principal.as_ref())
    }

    /// Runs one audit pass over the pending entries of `ctx`.
    pub fn handle(&self, ctx: &mut DbContext) -> AuditSummary {
        let mut summary = AuditSummary::default();
        let pending = pending_entry_ids(ctx);
        if pending.is_empty() {
            return summary;
        }

        let actor = self.actor_name();
        let stamp = Stamp {
            actor: &actor,
            now: self.clock.now_ms(),
        };
        let mut cascade = CascadeResolver::new();
        let tracker = ctx.tracker_mut();

        for id in pending {
            if tracker.is_stamped(id) {
                continue;
            }
            let Some(state) = tracker.state(id) else {
                continue;
            };

            match state {
                EntryState::Added => {
                    if let Some(auditable) = tracker
                        .entity_mut(id)
                        .and_then(|entity| entity.as_auditable_mut())
                    {
                        auditable.stamp_created(stamp.actor, stamp.now);
                        summary.created += 1;
                    }
                    tracker.set_stamped(id);
                }
                EntryState::Modified => {
                    if let Some(auditable) = tracker
                        .entity_mut(id)
                        .and_then(|entity| entity.as_auditable_mut())
                    {
                        auditable.stamp_modified(stamp.actor, stamp.now);
                        summary.modified += 1;
                    }
                    tracker.set_stamped(id);
                }
                EntryState::Deleted if tracker.entity(id).is_some_and(is_soft_deleted) => {
                    // Deleting a tombstone again keeps the first deletion.
                    if tracker.set_state(id, EntryState::Unchanged).is_ok() {
                        summary.already_deleted += 1;
                    }
                }
                EntryState::Deleted => {
                    if apply_soft_delete(tracker, id, &stamp) {
                        summary.soft_deleted += 1;
                        summary.cascaded += cascade.cascade_from(tracker, id, &stamp);
                    } else {
                        summary.hard_deleted += 1;
                        tracker.set_stamped(id);
                    }
                }
                EntryState::Unchanged => {}
            }
        }

        log::info!(
            "event=audit_pass module=audit status=ok created={} modified={} soft_deleted={} cascaded={} hard_deleted={} already_deleted={}",
            summary.created,
            summary.modified,
            summary.soft_deleted,
            summary.cascaded,
            summary.hard_deleted,
            summary.already_deleted
        );
        summary
    }

    /// Async entry point for async save paths. Stamping itself never
    /// suspends.
    pub async fn handle_async(&self, ctx: &mut DbContext) -> AuditSummary {
        self.handle(ctx)
    }
}
