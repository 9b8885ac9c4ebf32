//! Recovery from optimistic-concurrency conflicts.
//!
//! # Responsibility
//! - Explain each conflicting entry as a per-property proposed/database diff.
//! - Revert conflicting entries to the authoritative store values and stop
//!   tracking them.
//!
//! # Invariants
//! - Reloads ignore soft-delete filters.
//! - Each conflicting entry is reloaded at most once.
//! - Entries already detached are skipped.

use crate::context::{
    check_cancelled, CancellationSignal, ConcurrencyConflict, ContextResult, DbContext, EntryId,
};
use crate::model::entity::EntityKey;
use crate::model::value::{PropertyValues, Value};
use serde::Serialize;

/// Authoritative state of one reverted entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevertedEntry {
    pub entity_type: &'static str,
    pub key: EntityKey,
    /// Store values, or `None` when the row no longer exists.
    pub values: Option<PropertyValues>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackReport {
    /// One diagnostic line per differing property or missing row.
    pub message: String,
    pub reverted: Vec<RevertedEntry>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConcurrencyResolver;

impl ConcurrencyResolver {
    /// Reverts every entry named by `conflict` and reports the differences.
    pub fn rollback_entity_changes(
        ctx: &mut DbContext,
        conflict: &ConcurrencyConflict,
    ) -> ContextResult<RollbackReport> {
        let mut lines = Vec::new();
        let mut reverted = Vec::new();
        for id in &conflict.entries {
            if let Some(entry) = revert_entry(ctx, *id, &mut lines)? {
                reverted.push(entry);
            }
        }
        Ok(finish(lines, reverted))
    }

    /// Async variant; suspends before each reload.
    ///
    /// `cancel` is honored before the first entry is touched only. Once
    /// reverting starts every conflicting entry is reverted and detached,
    /// so proposed values never survive a partial rollback.
    pub async fn rollback_entity_changes_async(
        ctx: &mut DbContext,
        conflict: &ConcurrencyConflict,
        cancel: Option<&CancellationSignal>,
    ) -> ContextResult<RollbackReport> {
        check_cancelled(cancel)?;
        let mut lines = Vec::new();
        let mut reverted = Vec::new();
        for id in &conflict.entries {
            tokio::task::yield_now().await;
            if let Some(entry) = revert_entry(ctx, *id, &mut lines)? {
                reverted.push(entry);
            }
        }
        Ok(finish(lines, reverted))
    }
}

fn revert_entry(
    ctx: &mut DbContext,
    id: EntryId,
    lines: &mut Vec<String>,
) -> ContextResult<Option<RevertedEntry>> {
    let Some(entry) = ctx.tracker().entry(id) else {
        return Ok(None);
    };
    let entity_type = entry.entity_type();
    let key = entry.key();
    let proposed = entry.current_values();

    let database = ctx.database_values(id)?;
    match &database {
        None => lines.push(format!(
            "{} {key}: row no longer exists in database",
            entity_type.name
        )),
        Some(stored) => {
            for column in entity_type.columns {
                let proposed_value = proposed.get(column.name).unwrap_or(&Value::Null);
                let database_value = stored.get(column.name).unwrap_or(&Value::Null);
                if proposed_value != database_value {
                    lines.push(format!(
                        "{}.{}: proposed={proposed_value}, database={database_value}",
                        entity_type.name, column.name
                    ));
                }
            }
            if let Some(entity) = ctx.tracker_mut().entity_mut(id) {
                entity.apply_values(stored)?;
            }
        }
    }

    ctx.tracker_mut().detach(id);
    Ok(Some(RevertedEntry {
        entity_type: entity_type.name,
        key,
        values: database,
    }))
}

fn finish(lines: Vec<String>, reverted: Vec<RevertedEntry>) -> RollbackReport {
    log::info!(
        "event=rollback module=concurrency status=ok reverted={} differences={}",
        reverted.len(),
        lines.len()
    );
    RollbackReport {
        message: lines.join("\n"),
        reverted,
    }
}

#[cfg(test)]
mod tests {
    use super::ConcurrencyResolver;
    use crate::context::{ConcurrencyConflict, DbContext, EntryState};
    use crate::db::open_db_in_memory;
    use crate::model::school::{school_model, Student};

    #[test]
    fn missing_row_is_reported_and_detached() {
        let mut ctx = DbContext::new(open_db_in_memory().unwrap(), school_model().unwrap());
        let student = Student::new(uuid::Uuid::new_v4(), "Ada");
        let id = ctx
            .tracker_mut()
            .attach(Box::new(student.clone()), EntryState::Modified)
            .unwrap();

        let report = ConcurrencyResolver::rollback_entity_changes(
            &mut ctx,
            &ConcurrencyConflict { entries: vec![id] },
        )
        .unwrap();

        assert_eq!(
            report.message,
            format!("Student {}: row no longer exists in database", student.id)
        );
        assert_eq!(report.reverted.len(), 1);
        assert!(report.reverted[0].values.is_none());
        assert!(ctx.tracker().is_empty());
    }

    #[test]
    fn already_detached_entries_are_skipped() {
        let mut ctx = DbContext::new(open_db_in_memory().unwrap(), school_model().unwrap());
        let id = ctx
            .tracker_mut()
            .attach(Box::new(Student::new(uuid::Uuid::new_v4(), "Ada")), EntryState::Modified)
            .unwrap();
        ctx.tracker_mut().detach(id);

        let report = ConcurrencyResolver::rollback_entity_changes(
            &mut ctx,
            &ConcurrencyConflict { entries: vec![id] },
        )
        .unwrap();
        assert!(report.message.is_empty());
        assert!(report.reverted.is_empty());
    }
}
