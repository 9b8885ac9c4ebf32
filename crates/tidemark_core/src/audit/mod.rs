//! Audit bookkeeping applied to pending changes right before commit.
//!
//! # Responsibility
//! - Stamp creation/modification provenance on auditable entities.
//! - Convert deletes of soft-deletable entities into tombstone updates.
//! - Cascade tombstones from a principal to its tracked dependents.
//!
//! # Invariants
//! - One pass resolves the actor and `now` once; every entry stamped by the
//!   pass shares them.
//! - `deleted_time` always equals the `modified_time` written by the same
//!   pass.

pub mod cascade;
pub mod snapshot;
pub mod stamper;

pub use cascade::CascadeResolver;
pub use snapshot::{current_entries, pending_entry_ids, CurrentEntries};
pub use stamper::{AuditStamper, AuditSummary};

/// Actor and instant shared by every entry of one audit pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp<'a> {
    pub actor: &'a str,
    pub now: i64,
}
