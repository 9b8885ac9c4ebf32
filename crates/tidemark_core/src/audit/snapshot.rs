//! Pending-change snapshot over a context's tracker.

use crate::context::{ChangeEntry, DbContext, Entries, EntryId, EntryState};

/// Lazy, restartable view over entries with pending changes, in attach
/// order. Cloning restarts from the clone point.
#[derive(Clone)]
pub struct CurrentEntries<'a> {
    inner: Entries<'a>,
}

impl<'a> Iterator for CurrentEntries<'a> {
    type Item = ChangeEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .by_ref()
            .find(|entry| entry.state() != EntryState::Unchanged)
    }
}

/// Entries of `ctx` whose state is not `Unchanged`.
pub fn current_entries(ctx: &DbContext) -> CurrentEntries<'_> {
    CurrentEntries {
        inner: ctx.tracker().entries(),
    }
}

/// Stable id snapshot of [`current_entries`], taken before mutating.
pub fn pending_entry_ids(ctx: &DbContext) -> Vec<EntryId> {
    current_entries(ctx).map(|entry| entry.id()).collect()
}
