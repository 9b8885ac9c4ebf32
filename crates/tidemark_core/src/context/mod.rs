//! Persistence context: one unit of work over one SQLite connection.
//!
//! # Responsibility
//! - Own the change tracker for the entities loaded or attached in this
//!   unit of work.
//! - Persist pending changes in one transaction with optimistic-token
//!   checks.
//! - Reload authoritative row values on request.
//!
//! # Invariants
//! - Inserts/updates run in model registration order, deletes in reverse.
//! - Every pending write is attempted so all conflicts are reported; any
//!   conflict rolls the whole transaction back.
//! - In-memory tokens and states change only after the transaction commits.

mod cancel;
pub mod store;
pub mod tracker;

pub use cancel::CancellationSignal;
pub use store::RowFilter;
pub use tracker::{ChangeEntry, ChangeTracker, Entries, EntryId, EntryState, NavigationEntry};

use crate::db::DbError;
use crate::model::capability::ROW_VERSION;
use crate::model::entity::{is_soft_deleted, EntityKey, EntityType};
use crate::model::registry::Model;
use crate::model::value::PropertyValues;
use crate::model::ModelError;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use uuid::Uuid;

pub type ContextResult<T> = Result<T, ContextError>;

/// Entries whose writes were rejected by the optimistic-token check or whose
/// rows no longer exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcurrencyConflict {
    pub entries: Vec<EntryId>,
}

impl Display for ConcurrencyConflict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} pending change(s) conflict with the database",
            self.entries.len()
        )
    }
}

#[derive(Debug)]
pub enum ContextError {
    Db(DbError),
    Model(ModelError),
    Concurrency(ConcurrencyConflict),
    Cancelled,
    AlreadyTracked { entity: &'static str, key: EntityKey },
    EntryNotFound(EntryId),
    InvalidData(String),
}

impl Display for ContextError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Model(err) => write!(f, "{err}"),
            Self::Concurrency(conflict) => write!(f, "{conflict}"),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::AlreadyTracked { entity, key } => {
                write!(f, "{entity} {key} is already tracked by this context")
            }
            Self::EntryNotFound(id) => write!(f, "entry {id} is not tracked"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for ContextError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Model(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for ContextError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for ContextError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<ModelError> for ContextError {
    fn from(value: ModelError) -> Self {
        Self::Model(value)
    }
}

/// One pending write captured before the transaction opens.
struct PlannedWrite {
    id: EntryId,
    entity_type: &'static EntityType,
    key: EntityKey,
    state: EntryState,
    values: PropertyValues,
    expected_version: Option<Vec<u8>>,
    new_version: Option<Vec<u8>>,
}

/// Unit of work: a connection plus the change tracker bound to it.
#[derive(Debug)]
pub struct DbContext {
    conn: Connection,
    tracker: ChangeTracker,
}

impl DbContext {
    pub fn new(conn: Connection, model: Arc<Model>) -> Self {
        Self {
            conn,
            tracker: ChangeTracker::new(model),
        }
    }

    pub fn model(&self) -> &Model {
        self.tracker.model()
    }

    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut ChangeTracker {
        &mut self.tracker
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Releases the connection, dropping every tracked entry.
    pub fn into_connection(self) -> Connection {
        self.conn
    }

    /// Reads raw rows without touching the tracker.
    pub fn query_rows(
        &self,
        entity_type: &EntityType,
        filter: &RowFilter,
    ) -> ContextResult<Vec<PropertyValues>> {
        store::select_rows(&self.conn, entity_type, filter)
    }

    /// Loads rows and tracks them as `Unchanged`.
    ///
    /// Keys already tracked resolve to the existing entry; their pending
    /// changes are kept. Soft-deleted rows are skipped unless
    /// `include_deleted`.
    pub fn load_tracked(
        &mut self,
        entity_type: &'static EntityType,
        filter: &RowFilter,
        include_deleted: bool,
    ) -> ContextResult<Vec<EntryId>> {
        let rows = store::select_rows(&self.conn, entity_type, filter)?;
        let model = self.tracker.model_handle();

        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            let key = row.require_uuid(entity_type.key_column)?;
            if let Some(id) = self.tracker.find(entity_type, key) {
                let visible = self
                    .tracker
                    .entity(id)
                    .is_some_and(|entity| include_deleted || !is_soft_deleted(entity));
                if visible {
                    ids.push(id);
                }
                continue;
            }

            let entity = model.materialize(entity_type, &row)?;
            if !include_deleted && is_soft_deleted(entity.as_ref()) {
                continue;
            }
            ids.push(self.tracker.attach(entity, EntryState::Unchanged)?);
        }
        Ok(ids)
    }

    /// Current store values of the row tracked by `id`, ignoring soft-delete
    /// filters. `None` when the row no longer exists.
    pub fn database_values(&self, id: EntryId) -> ContextResult<Option<PropertyValues>> {
        let entry = self.tracker.entry(id).ok_or(ContextError::EntryNotFound(id))?;
        let rows = store::select_rows(&self.conn, entry.entity_type(), &RowFilter::Key(entry.key()))?;
        Ok(rows.into_iter().next())
    }

    /// Persists every pending change in one IMMEDIATE transaction.
    ///
    /// Returns the number of affected rows. On success, concurrent entities
    /// carry their new tokens, `Deleted` entries are detached and the rest
    /// become `Unchanged`.
    ///
    /// # Errors
    /// - `Concurrency` listing every entry whose update/delete matched no row.
    /// - `Db` for any other store failure; nothing is persisted.
    pub fn commit(&mut self) -> ContextResult<usize> {
        let plan = self.plan_writes();
        if plan.is_empty() {
            return Ok(0);
        }

        log::info!(
            "event=commit module=context status=start writes={}",
            plan.len()
        );

        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let mut affected = 0;
        let mut conflicts = Vec::new();
        for write in &plan {
            let changed = match write.state {
                EntryState::Added => store::insert_row(&tx, write.entity_type, &write.values)?,
                EntryState::Modified => store::update_row(
                    &tx,
                    write.entity_type,
                    &write.values,
                    write.expected_version.as_deref(),
                )?,
                EntryState::Deleted => store::delete_row(
                    &tx,
                    write.entity_type,
                    write.key,
                    write.expected_version.as_deref(),
                )?,
                EntryState::Unchanged => 0,
            };
            if changed == 0 && write.state != EntryState::Added {
                conflicts.push(write.id);
            }
            affected += changed;
        }

        if !conflicts.is_empty() {
            tx.rollback()?;
            log::warn!(
                "event=commit module=context status=error reason=concurrency conflicts={}",
                conflicts.len()
            );
            return Err(ContextError::Concurrency(ConcurrencyConflict { entries: conflicts }));
        }
        tx.commit()?;

        for write in plan {
            if write.state == EntryState::Deleted {
                self.tracker.detach(write.id);
                continue;
            }
            if let Some(token) = write.new_version {
                if let Some(concurrent) = self
                    .tracker
                    .entity_mut(write.id)
                    .and_then(|entity| entity.as_concurrent_mut())
                {
                    concurrent.set_row_version(token);
                }
            }
            self.tracker.accept_changes(write.id);
        }

        log::info!("event=commit module=context status=ok affected={affected}");
        Ok(affected)
    }

    /// Async variant of [`DbContext::commit`].
    ///
    /// Cancellation is honored before the transaction opens only.
    pub async fn commit_async(
        &mut self,
        cancel: Option<&CancellationSignal>,
    ) -> ContextResult<usize> {
        check_cancelled(cancel)?;
        tokio::task::yield_now().await;
        check_cancelled(cancel)?;
        self.commit()
    }

    fn plan_writes(&self) -> Vec<PlannedWrite> {
        let model = self.tracker.model();
        let order = |entity_type: &EntityType| {
            model
                .registration_index(entity_type.name)
                .unwrap_or(usize::MAX)
        };

        let mut upserts = Vec::new();
        let mut deletes = Vec::new();
        for entry in self.tracker.entries() {
            let state = entry.state();
            if state == EntryState::Unchanged {
                continue;
            }

            let entity = entry.entity();
            let expected_version = entity
                .as_concurrent()
                .map(|concurrent| concurrent.row_version().to_vec());
            let new_version = match (state, entity.as_concurrent()) {
                (EntryState::Added | EntryState::Modified, Some(_)) => {
                    Some(Uuid::new_v4().as_bytes().to_vec())
                }
                _ => None,
            };

            let mut values = entry.current_values();
            if let Some(token) = &new_version {
                values.set(ROW_VERSION, token.clone());
            }

            let write = PlannedWrite {
                id: entry.id(),
                entity_type: entry.entity_type(),
                key: entry.key(),
                state,
                values,
                expected_version: if state == EntryState::Added {
                    None
                } else {
                    expected_version
                },
                new_version,
            };
            if state == EntryState::Deleted {
                deletes.push(write);
            } else {
                upserts.push(write);
            }
        }

        upserts.sort_by_key(|write| order(write.entity_type));
        deletes.sort_by_key(|write| std::cmp::Reverse(order(write.entity_type)));
        upserts.extend(deletes);
        upserts
    }
}

pub(crate) fn check_cancelled(cancel: Option<&CancellationSignal>) -> ContextResult<()> {
    if cancel.is_some_and(CancellationSignal::is_cancelled) {
        return Err(ContextError::Cancelled);
    }
    Ok(())
}
