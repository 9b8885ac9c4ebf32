//! Repository layer over the persistence context.
//!
//! # Responsibility
//! - Define the entity-agnostic data access contract.
//! - Run audit stamping and conflict recovery around every save.
//!
//! # Invariants
//! - Invalid arguments are rejected before any tracker mutation.
//! - Concurrency conflicts surface as `RepoError::Concurrency` with the
//!   reverted store values; other failures propagate unchanged.

pub mod generic_repo;

pub use generic_repo::{
    ConcurrencyError, GenericRepository, RepoError, RepoResult, Repository, TrackingMode,
};
