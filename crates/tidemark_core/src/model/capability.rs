//! Optional entity capabilities that enable bookkeeping behavior.
//!
//! Capabilities are declared by implementing the trait on the entity type and
//! exposing it through the matching `Entity::as_*` accessor. The audit engine
//! only ever asks through those accessors.

use super::value::PropertyValues;
use super::ModelResult;
use serde::{Deserialize, Serialize};

/// Column name for the creating actor.
pub const CREATED_BY: &str = "created_by";
/// Column name for the creation time (epoch ms).
pub const CREATED_TIME: &str = "created_time";
/// Column name for the last modifying actor.
pub const MODIFIED_BY: &str = "modified_by";
/// Column name for the last modification time (epoch ms).
pub const MODIFIED_TIME: &str = "modified_time";
/// Column name for the soft delete flag.
pub const IS_DELETED: &str = "is_deleted";
/// Column name for the soft delete time (epoch ms).
pub const DELETED_TIME: &str = "deleted_time";
/// Column name for the optimistic concurrency token.
pub const ROW_VERSION: &str = "row_version";

/// Creation/modification provenance carried by auditable entities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditInfo {
    pub created_by: String,
    pub created_time: i64,
    pub modified_by: Option<String>,
    pub modified_time: Option<i64>,
}

impl AuditInfo {
    pub fn write_to(&self, values: &mut PropertyValues) {
        values.set(CREATED_BY, self.created_by.as_str());
        values.set(CREATED_TIME, self.created_time);
        values.set(MODIFIED_BY, self.modified_by.clone());
        values.set(MODIFIED_TIME, self.modified_time);
    }

    pub fn read_from(values: &PropertyValues) -> ModelResult<Self> {
        Ok(Self {
            created_by: values.require_text(CREATED_BY)?,
            created_time: values.require_integer(CREATED_TIME)?,
            modified_by: values.optional_text(MODIFIED_BY)?,
            modified_time: values.optional_integer(MODIFIED_TIME)?,
        })
    }
}

/// Soft delete tombstone carried by soft-deletable entities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftDeleteInfo {
    pub is_deleted: bool,
    pub deleted_time: Option<i64>,
}

impl SoftDeleteInfo {
    pub fn write_to(&self, values: &mut PropertyValues) {
        values.set(IS_DELETED, self.is_deleted);
        values.set(DELETED_TIME, self.deleted_time);
    }

    pub fn read_from(values: &PropertyValues) -> ModelResult<Self> {
        Ok(Self {
            is_deleted: values.require_bool(IS_DELETED)?,
            deleted_time: values.optional_integer(DELETED_TIME)?,
        })
    }
}

/// Entity records who created and last modified it.
pub trait Auditable {
    fn audit_info(&self) -> &AuditInfo;
    fn audit_info_mut(&mut self) -> &mut AuditInfo;

    fn stamp_created(&mut self, actor: &str, now_ms: i64) {
        let info = self.audit_info_mut();
        info.created_by = actor.to_string();
        info.created_time = now_ms;
    }

    fn stamp_modified(&mut self, actor: &str, now_ms: i64) {
        let info = self.audit_info_mut();
        info.modified_by = Some(actor.to_string());
        info.modified_time = Some(now_ms);
    }
}

/// Entity is tombstoned instead of physically removed.
pub trait SoftDeletable {
    fn soft_delete_info(&self) -> &SoftDeleteInfo;
    fn soft_delete_info_mut(&mut self) -> &mut SoftDeleteInfo;

    fn is_deleted(&self) -> bool {
        self.soft_delete_info().is_deleted
    }

    fn mark_deleted(&mut self, deleted_time: i64) {
        let info = self.soft_delete_info_mut();
        info.is_deleted = true;
        info.deleted_time = Some(deleted_time);
    }

    fn restore(&mut self) {
        let info = self.soft_delete_info_mut();
        info.is_deleted = false;
        info.deleted_time = None;
    }
}

/// Entity carries an opaque optimistic-lock token.
///
/// The store replaces the token on every successful insert/update; callers
/// only ever hand back the token they loaded.
pub trait Concurrent {
    fn row_version(&self) -> &[u8];
    fn set_row_version(&mut self, token: Vec<u8>);
}
