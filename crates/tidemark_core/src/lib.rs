//! Audit and soft-delete persistence core for Tidemark.
//! Pending changes are stamped, cascaded and committed through one
//! change-tracking context per unit of work.

pub mod actor;
pub mod audit;
pub mod concurrency;
pub mod context;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;

pub use actor::{
    resolve_actor_name, AnonymousPrincipal, Clock, FixedClock, FixedPrincipal, PrincipalAccessor,
    SystemClock, ANONYMOUS_ACTOR,
};
pub use audit::{current_entries, AuditStamper, AuditSummary, CascadeResolver};
pub use concurrency::{ConcurrencyResolver, RevertedEntry, RollbackReport};
pub use context::{
    CancellationSignal, ChangeEntry, ChangeTracker, ConcurrencyConflict, ContextError,
    ContextResult, DbContext, EntryId, EntryState,
};
pub use db::{open_db, open_db_in_memory, open_db_with_options, ContextOptions, DbError};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::entity::{Entity, EntityKey, EntityType};
pub use model::navigation::{Include, Navigation, NavigationPath};
pub use model::registry::{Model, ModelBuilder};
pub use model::school::{school_model, Address, AttendanceRecord, Classroom, Student};
pub use model::{ModelError, ModelResult};
pub use repo::{
    ConcurrencyError, GenericRepository, RepoError, RepoResult, Repository, TrackingMode,
};

/// Core crate version, reported by the CLI.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
