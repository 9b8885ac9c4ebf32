//! Generic repository over one entity type of a persistence context.
//!
//! # Responsibility
//! - Provide query, insert, update and delete APIs for any registered
//!   entity type.
//! - Run the audit pass before every commit and recover from concurrency
//!   conflicts by reverting the conflicting entries.
//!
//! # Invariants
//! - Empty batches fail with `InvalidArgument` before any mutation.
//! - Batch operations validate every element before changing tracker state.
//! - Soft-deleted rows are excluded from queries unless filters are ignored.
//! - Updates never change the tracked `created_*` fields.

use crate::audit::AuditStamper;
use crate::concurrency::{ConcurrencyResolver, RevertedEntry};
use crate::context::{
    CancellationSignal, ContextError, DbContext, EntryId, EntryState, RowFilter,
};
use crate::model::capability::AuditInfo;
use crate::model::entity::{is_soft_deleted, Entity, EntityKey};
use crate::model::navigation::{Include, Relationship};
use crate::model::ModelError;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;

pub type RepoResult<T> = Result<T, RepoError>;

/// Conflict outcome of a save: the diff text plus the reverted values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcurrencyError {
    pub message: String,
    pub reverted: Vec<RevertedEntry>,
}

impl Display for ConcurrencyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "concurrency conflict:\n{}", self.message)
    }
}

impl Error for ConcurrencyError {}

#[derive(Debug)]
pub enum RepoError {
    InvalidArgument(String),
    NotFound { entity: &'static str, key: EntityKey },
    AlreadyTracked { entity: &'static str, key: EntityKey },
    Concurrency(ConcurrencyError),
    Context(ContextError),
    Model(ModelError),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArgument(message) => write!(f, "invalid argument: {message}"),
            Self::NotFound { entity, key } => write!(f, "{entity} not found: {key}"),
            Self::AlreadyTracked { entity, key } => {
                write!(f, "{entity} {key} is already tracked")
            }
            Self::Concurrency(err) => write!(f, "{err}"),
            Self::Context(err) => write!(f, "{err}"),
            Self::Model(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Concurrency(err) => Some(err),
            Self::Context(err) => Some(err),
            Self::Model(err) => Some(err),
            Self::InvalidArgument(_) | Self::NotFound { .. } | Self::AlreadyTracked { .. } => None,
        }
    }
}

impl From<ContextError> for RepoError {
    fn from(value: ContextError) -> Self {
        match value {
            ContextError::AlreadyTracked { entity, key } => Self::AlreadyTracked { entity, key },
            ContextError::Model(err) => Self::Model(err),
            other => Self::Context(other),
        }
    }
}

impl From<ModelError> for RepoError {
    fn from(value: ModelError) -> Self {
        Self::Model(value)
    }
}

/// Whether entities of the repository's type stay tracked after a save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrackingMode {
    #[default]
    Tracking,
    /// Entries of the repository's type are detached after a successful save.
    NoTracking,
}

/// Repository contract for entity type `E`.
pub trait Repository<E: Entity + Clone> {
    /// First entity matching `predicate`, with `includes` eagerly loaded.
    fn select(
        &mut self,
        predicate: &dyn Fn(&E) -> bool,
        includes: &[Include<E>],
    ) -> RepoResult<Option<E>>;

    fn select_list(
        &mut self,
        predicate: Option<&dyn Fn(&E) -> bool>,
        includes: &[Include<E>],
    ) -> RepoResult<Vec<E>>;

    /// Entity by key with every reachable navigation loaded.
    fn select_by_key(&mut self, key: EntityKey) -> RepoResult<Option<E>>;

    fn insert(&mut self, entity: E) -> RepoResult<()>;
    fn insert_many(&mut self, entities: Vec<E>) -> RepoResult<()>;
    fn update(&mut self, entity: E) -> RepoResult<()>;
    fn update_many(&mut self, entities: Vec<E>) -> RepoResult<()>;
    fn delete(&mut self, entity: &E) -> RepoResult<()>;
    fn delete_many(&mut self, entities: &[E]) -> RepoResult<()>;
    fn delete_by_key(&mut self, key: EntityKey) -> RepoResult<()>;
    fn delete_many_by_keys(&mut self, keys: &[EntityKey]) -> RepoResult<()>;

    /// Stamps, commits and returns the number of affected rows.
    fn save_changes(&mut self) -> RepoResult<usize>;
}

/// [`Repository`] bound to one context for its lifetime.
pub struct GenericRepository<'ctx, E> {
    ctx: &'ctx mut DbContext,
    stamper: AuditStamper,
    tracking: TrackingMode,
    ignore_filters: bool,
    _entity: PhantomData<fn() -> E>,
}

impl<'ctx, E: Entity + Clone> GenericRepository<'ctx, E> {
    pub fn new(ctx: &'ctx mut DbContext, stamper: AuditStamper) -> Self {
        Self {
            ctx,
            stamper,
            tracking: TrackingMode::default(),
            ignore_filters: false,
            _entity: PhantomData,
        }
    }

    pub fn as_tracking(mut self) -> Self {
        self.tracking = TrackingMode::Tracking;
        self
    }

    pub fn as_no_tracking(mut self) -> Self {
        self.tracking = TrackingMode::NoTracking;
        self
    }

    /// Includes soft-deleted rows in subsequent queries.
    pub fn ignore_query_filters(mut self) -> Self {
        self.ignore_filters = true;
        self
    }

    pub fn with_query_filters(mut self) -> Self {
        self.ignore_filters = false;
        self
    }

    pub fn tracking_mode(&self) -> TrackingMode {
        self.tracking
    }

    pub fn context(&self) -> &DbContext {
        &*self.ctx
    }

    pub fn context_mut(&mut self) -> &mut DbContext {
        &mut *self.ctx
    }

    /// Async variant of [`Repository::save_changes`].
    ///
    /// # Errors
    /// - `Context(Cancelled)` when `cancel` fires before the transaction
    ///   opens. A conflict found by the commit is always rolled back in
    ///   full, whatever the signal does afterwards.
    pub async fn save_changes_async(
        &mut self,
        cancel: Option<&CancellationSignal>,
    ) -> RepoResult<usize> {
        self.stamper.handle_async(self.ctx).await;
        match self.ctx.commit_async(cancel).await {
            Ok(affected) => Ok(self.after_commit(affected)),
            Err(ContextError::Concurrency(conflict)) => {
                log_conflict(conflict.entries.len());
                let report =
                    ConcurrencyResolver::rollback_entity_changes_async(self.ctx, &conflict, None)
                        .await?;
                Err(RepoError::Concurrency(ConcurrencyError {
                    message: report.message,
                    reverted: report.reverted,
                }))
            }
            Err(err) => Err(self.save_failed(err)),
        }
    }

    fn after_commit(&mut self, affected: usize) -> usize {
        let mut detached = 0;
        if self.tracking == TrackingMode::NoTracking {
            for id in self.ctx.tracker().ids_of_type(E::descriptor()) {
                if self.ctx.tracker_mut().detach(id).is_some() {
                    detached += 1;
                }
            }
        }
        log::info!(
            "event=repo_save module=repo status=ok entity={} affected={affected} detached={detached}",
            E::descriptor().name
        );
        affected
    }

    fn save_failed(&self, err: ContextError) -> RepoError {
        log::error!(
            "event=repo_save module=repo status=error entity={} error={err}",
            E::descriptor().name
        );
        err.into()
    }

    fn is_visible(&self, entity: &dyn Entity) -> bool {
        self.ignore_filters || !is_soft_deleted(entity)
    }

    fn resolve_includes(&self, includes: &[Include<E>]) -> RepoResult<Vec<Vec<Relationship>>> {
        includes
            .iter()
            .map(|include| {
                self.ctx
                    .model()
                    .resolve(E::descriptor(), include.navigation_path())
                    .map_err(|err| RepoError::InvalidArgument(format!("include: {err}")))
            })
            .collect()
    }

    /// Tracks visible roots matching `predicate`, stopping at `limit`.
    fn query_roots(
        &mut self,
        predicate: Option<&dyn Fn(&E) -> bool>,
        limit: Option<usize>,
    ) -> RepoResult<Vec<EntryId>> {
        let entity_type = E::descriptor();
        let rows = self.ctx.query_rows(entity_type, &RowFilter::All)?;

        let mut roots = Vec::new();
        for row in rows {
            if limit.is_some_and(|limit| roots.len() >= limit) {
                break;
            }

            let key = row.require_uuid(entity_type.key_column)?;
            let tracked = self.ctx.tracker().find(entity_type, key);
            let candidate = match tracked {
                Some(id) => match self.ctx.tracker().typed::<E>(id) {
                    Some(current) => current,
                    None => continue,
                },
                None => E::from_values(&row)?,
            };

            if !self.is_visible(&candidate) || !predicate.map_or(true, |matches| matches(&candidate)) {
                continue;
            }

            let id = match tracked {
                Some(id) => id,
                None => self
                    .ctx
                    .tracker_mut()
                    .attach(Box::new(candidate), EntryState::Unchanged)?,
            };
            roots.push(id);
        }
        Ok(roots)
    }

    /// Loads `relationship` for every principal in `principals` and marks
    /// the navigation loaded on each.
    fn load_navigation(
        &mut self,
        principals: &[EntryId],
        relationship: &Relationship,
    ) -> RepoResult<Vec<EntryId>> {
        let keys: Vec<EntityKey> = principals
            .iter()
            .filter_map(|id| self.ctx.tracker().entity(*id).map(|entity| entity.key()))
            .collect();

        let loaded = if keys.is_empty() {
            Vec::new()
        } else {
            self.ctx.load_tracked(
                relationship.dependent,
                &RowFilter::ForeignKeyIn {
                    column: relationship.foreign_key,
                    keys,
                },
                self.ignore_filters,
            )?
        };

        for id in principals {
            self.ctx
                .tracker_mut()
                .mark_navigation_loaded(*id, relationship.name);
        }
        Ok(loaded)
    }

    fn load_includes(&mut self, roots: &[EntryId], paths: &[Vec<Relationship>]) -> RepoResult<()> {
        for hops in paths {
            let mut frontier = roots.to_vec();
            for relationship in hops {
                frontier = self.load_navigation(&frontier, relationship)?;
            }
        }
        Ok(())
    }

    /// Loads every navigation reachable from `root`.
    ///
    /// Each tracked entry has its navigations loaded once, however many
    /// paths reach it; entries of one type found in the same round share a
    /// query per relationship.
    fn load_graph(&mut self, root: EntryId) -> RepoResult<()> {
        let model = self.ctx.tracker().model_handle();
        let mut expanded = HashSet::from([root]);
        let mut round = vec![root];

        while !round.is_empty() {
            let mut by_type: Vec<(&'static str, Vec<EntryId>)> = Vec::new();
            for id in round {
                let Some(entity) = self.ctx.tracker().entity(id) else {
                    continue;
                };
                let name = entity.entity_type().name;
                match by_type.iter_mut().find(|(type_name, _)| *type_name == name) {
                    Some((_, ids)) => ids.push(id),
                    None => by_type.push((name, vec![id])),
                }
            }

            let mut next = Vec::new();
            for (type_name, principals) in &by_type {
                for relationship in model.relationships_from(type_name) {
                    for id in self.load_navigation(principals, relationship)? {
                        if expanded.insert(id) {
                            next.push(id);
                        }
                    }
                }
            }
            round = next;
        }
        Ok(())
    }

    /// Tracked entry for `key`, loading the row when it is not tracked yet.
    fn find_or_load(&mut self, key: EntityKey) -> RepoResult<Option<EntryId>> {
        let entity_type = E::descriptor();
        if let Some(id) = self.ctx.tracker().find(entity_type, key) {
            let visible = self
                .ctx
                .tracker()
                .entity(id)
                .is_some_and(|entity| self.is_visible(entity));
            return Ok(visible.then_some(id));
        }

        let loaded = self
            .ctx
            .load_tracked(entity_type, &RowFilter::Key(key), self.ignore_filters)?;
        Ok(loaded.into_iter().next())
    }

    fn typed_list(&self, ids: &[EntryId]) -> Vec<E> {
        ids.iter()
            .filter_map(|id| self.ctx.tracker().typed::<E>(*id))
            .collect()
    }

    fn mark_deleted(&mut self, id: EntryId) -> RepoResult<()> {
        let tracker = self.ctx.tracker_mut();
        if tracker.state(id) == Some(EntryState::Added) {
            tracker.detach(id);
            return Ok(());
        }
        tracker.set_state(id, EntryState::Deleted)?;
        Ok(())
    }
}

fn require_non_empty(len: usize, operation: &str) -> RepoResult<()> {
    if len == 0 {
        return Err(RepoError::InvalidArgument(format!(
            "{operation} requires at least one entity"
        )));
    }
    Ok(())
}

fn log_conflict(entries: usize) {
    log::warn!("event=concurrency_conflict module=repo status=error entries={entries}");
}

impl<E: Entity + Clone> Repository<E> for GenericRepository<'_, E> {
    fn select(
        &mut self,
        predicate: &dyn Fn(&E) -> bool,
        includes: &[Include<E>],
    ) -> RepoResult<Option<E>> {
        let paths = self.resolve_includes(includes)?;
        let roots = self.query_roots(Some(predicate), Some(1))?;
        self.load_includes(&roots, &paths)?;
        Ok(self.typed_list(&roots).into_iter().next())
    }

    fn select_list(
        &mut self,
        predicate: Option<&dyn Fn(&E) -> bool>,
        includes: &[Include<E>],
    ) -> RepoResult<Vec<E>> {
        let paths = self.resolve_includes(includes)?;
        let roots = self.query_roots(predicate, None)?;
        self.load_includes(&roots, &paths)?;
        Ok(self.typed_list(&roots))
    }

    fn select_by_key(&mut self, key: EntityKey) -> RepoResult<Option<E>> {
        let Some(root) = self.find_or_load(key)? else {
            return Ok(None);
        };
        self.load_graph(root)?;
        Ok(self.ctx.tracker().typed::<E>(root))
    }

    fn insert(&mut self, entity: E) -> RepoResult<()> {
        self.insert_many(vec![entity])
    }

    fn insert_many(&mut self, entities: Vec<E>) -> RepoResult<()> {
        require_non_empty(entities.len(), "insert_many")?;

        let entity_type = E::descriptor();
        let mut keys = HashSet::with_capacity(entities.len());
        for entity in &entities {
            let key = entity.key();
            if !keys.insert(key) || self.ctx.tracker().find(entity_type, key).is_some() {
                return Err(RepoError::AlreadyTracked {
                    entity: entity_type.name,
                    key,
                });
            }
        }

        for entity in entities {
            self.ctx
                .tracker_mut()
                .attach(Box::new(entity), EntryState::Added)?;
        }
        Ok(())
    }

    fn update(&mut self, entity: E) -> RepoResult<()> {
        self.update_many(vec![entity])
    }

    fn update_many(&mut self, entities: Vec<E>) -> RepoResult<()> {
        require_non_empty(entities.len(), "update_many")?;

        let mut keys = HashSet::with_capacity(entities.len());
        if let Some(duplicate) = entities.iter().find(|entity| !keys.insert(entity.key())) {
            return Err(RepoError::InvalidArgument(format!(
                "update_many received {} {} more than once",
                E::descriptor().name,
                duplicate.key()
            )));
        }

        for entity in entities {
            let tracker = self.ctx.tracker_mut();
            let Some(id) = tracker.find(E::descriptor(), entity.key()) else {
                tracker.attach(Box::new(entity), EntryState::Modified)?;
                continue;
            };

            let created: Option<AuditInfo> = tracker
                .entity(id)
                .and_then(|tracked| tracked.as_auditable())
                .map(|auditable| auditable.audit_info().clone());
            let mut replacement: Box<dyn Entity> = Box::new(entity);
            if let (Some(created), Some(auditable)) = (created, replacement.as_auditable_mut()) {
                let info = auditable.audit_info_mut();
                info.created_by = created.created_by;
                info.created_time = created.created_time;
            }

            let next = match tracker.state(id) {
                Some(EntryState::Added) => EntryState::Added,
                _ => EntryState::Modified,
            };
            tracker.replace_entity(id, replacement)?;
            tracker.set_state(id, next)?;
        }
        Ok(())
    }

    fn delete(&mut self, entity: &E) -> RepoResult<()> {
        self.delete_many(std::slice::from_ref(entity))
    }

    fn delete_many(&mut self, entities: &[E]) -> RepoResult<()> {
        require_non_empty(entities.len(), "delete_many")?;

        for entity in entities {
            let found = self.ctx.tracker().find(E::descriptor(), entity.key());
            match found {
                Some(id) => self.mark_deleted(id)?,
                None => {
                    self.ctx
                        .tracker_mut()
                        .attach(Box::new(entity.clone()), EntryState::Deleted)?;
                }
            }
        }
        Ok(())
    }

    fn delete_by_key(&mut self, key: EntityKey) -> RepoResult<()> {
        self.delete_many_by_keys(&[key])
    }

    fn delete_many_by_keys(&mut self, keys: &[EntityKey]) -> RepoResult<()> {
        require_non_empty(keys.len(), "delete_many_by_keys")?;

        let mut seen = HashSet::with_capacity(keys.len());
        let mut ids = Vec::with_capacity(keys.len());
        for key in keys {
            if !seen.insert(*key) {
                continue;
            }
            let id = self.find_or_load(*key)?.ok_or(RepoError::NotFound {
                entity: E::descriptor().name,
                key: *key,
            })?;
            ids.push(id);
        }

        for id in &ids {
            if self.ctx.tracker().state(*id) != Some(EntryState::Added) {
                self.load_graph(*id)?;
            }
        }
        for id in ids {
            self.mark_deleted(id)?;
        }
        Ok(())
    }

    fn save_changes(&mut self) -> RepoResult<usize> {
        self.stamper.handle(self.ctx);
        match self.ctx.commit() {
            Ok(affected) => Ok(self.after_commit(affected)),
            Err(ContextError::Concurrency(conflict)) => {
                log_conflict(conflict.entries.len());
                let report = ConcurrencyResolver::rollback_entity_changes(self.ctx, &conflict)?;
                Err(RepoError::Concurrency(ConcurrencyError {
                    message: report.message,
                    reverted: report.reverted,
                }))
            }
            Err(err) => Err(self.save_failed(err)),
        }
    }
}
