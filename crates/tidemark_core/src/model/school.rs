//! School schema: classrooms, students, addresses and attendance records.
//!
//! # Responsibility
//! - Provide the concrete entity types backing the bundled migration.
//! - Exercise every capability combination the audit engine supports.
//!
//! # Invariants
//! - `Classroom` is auditable, soft-deletable and concurrency-checked.
//! - `Student` and `Address` are auditable and soft-deletable.
//! - `AttendanceRecord` has no capability and is always hard deleted.

use super::capability::{
    AuditInfo, Auditable, Concurrent, SoftDeletable, SoftDeleteInfo, CREATED_BY, CREATED_TIME,
    DELETED_TIME, IS_DELETED, MODIFIED_BY, MODIFIED_TIME, ROW_VERSION,
};
use super::entity::{Entity, EntityKey, EntityType};
use super::navigation::Navigation;
use super::registry::Model;
use super::value::{Column, ColumnKind, PropertyValues};
use super::ModelResult;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use uuid::Uuid;

const AUDIT_COLUMNS: [Column; 4] = [
    Column::required(CREATED_BY, ColumnKind::Text),
    Column::required(CREATED_TIME, ColumnKind::Integer),
    Column::optional(MODIFIED_BY, ColumnKind::Text),
    Column::optional(MODIFIED_TIME, ColumnKind::Integer),
];

const SOFT_DELETE_COLUMNS: [Column; 2] = [
    Column::required(IS_DELETED, ColumnKind::Bool),
    Column::optional(DELETED_TIME, ColumnKind::Integer),
];

/// Builds the model for the school schema.
pub fn school_model() -> ModelResult<Arc<Model>> {
    let model = Model::builder()
        .entity::<Classroom>()
        .entity::<Student>()
        .entity::<Address>()
        .entity::<AttendanceRecord>()
        .has_many(Classroom::STUDENTS, "classroom_id")
        .has_many(Classroom::ATTENDANCE, "classroom_id")
        .has_one(Student::ADDRESS, "student_id")
        .build()?;
    Ok(Arc::new(model))
}

/// Classroom aggregate root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classroom {
    pub id: EntityKey,
    pub code: String,
    pub title: Option<String>,
    pub audit: AuditInfo,
    pub soft_delete: SoftDeleteInfo,
    pub row_version: Vec<u8>,
}

impl Classroom {
    pub const TYPE: &'static EntityType = &EntityType {
        name: "Classroom",
        table: "classrooms",
        key_column: "id",
        columns: &[
            Column::required("id", ColumnKind::Uuid),
            Column::required("code", ColumnKind::Text),
            Column::optional("title", ColumnKind::Text),
            AUDIT_COLUMNS[0],
            AUDIT_COLUMNS[1],
            AUDIT_COLUMNS[2],
            AUDIT_COLUMNS[3],
            SOFT_DELETE_COLUMNS[0],
            SOFT_DELETE_COLUMNS[1],
            Column::required(ROW_VERSION, ColumnKind::Blob),
        ],
    };

    pub const STUDENTS: Navigation<Classroom, Student> = Navigation::new("Students");
    pub const ATTENDANCE: Navigation<Classroom, AttendanceRecord> = Navigation::new("Attendance");

    pub fn new(code: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: code.into(),
            title: None,
            audit: AuditInfo::default(),
            soft_delete: SoftDeleteInfo::default(),
            row_version: Vec::new(),
        }
    }
}

impl Entity for Classroom {
    fn descriptor() -> &'static EntityType {
        Self::TYPE
    }

    fn from_values(values: &PropertyValues) -> ModelResult<Self> {
        Ok(Self {
            id: values.require_uuid("id")?,
            code: values.require_text("code")?,
            title: values.optional_text("title")?,
            audit: AuditInfo::read_from(values)?,
            soft_delete: SoftDeleteInfo::read_from(values)?,
            row_version: values.require_blob(ROW_VERSION)?,
        })
    }

    fn entity_type(&self) -> &'static EntityType {
        Self::TYPE
    }

    fn key(&self) -> EntityKey {
        self.id
    }

    fn to_values(&self) -> PropertyValues {
        let mut values = PropertyValues::new()
            .with("id", self.id)
            .with("code", self.code.as_str())
            .with("title", self.title.clone())
            .with(ROW_VERSION, self.row_version.clone());
        self.audit.write_to(&mut values);
        self.soft_delete.write_to(&mut values);
        values
    }

    fn apply_values(&mut self, values: &PropertyValues) -> ModelResult<()> {
        *self = Self::from_values(values)?;
        Ok(())
    }

    fn as_auditable(&self) -> Option<&dyn Auditable> {
        Some(self)
    }

    fn as_auditable_mut(&mut self) -> Option<&mut dyn Auditable> {
        Some(self)
    }

    fn as_soft_deletable(&self) -> Option<&dyn SoftDeletable> {
        Some(self)
    }

    fn as_soft_deletable_mut(&mut self) -> Option<&mut dyn SoftDeletable> {
        Some(self)
    }

    fn as_concurrent(&self) -> Option<&dyn Concurrent> {
        Some(self)
    }

    fn as_concurrent_mut(&mut self) -> Option<&mut dyn Concurrent> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Auditable for Classroom {
    fn audit_info(&self) -> &AuditInfo {
        &self.audit
    }

    fn audit_info_mut(&mut self) -> &mut AuditInfo {
        &mut self.audit
    }
}

impl SoftDeletable for Classroom {
    fn soft_delete_info(&self) -> &SoftDeleteInfo {
        &self.soft_delete
    }

    fn soft_delete_info_mut(&mut self) -> &mut SoftDeleteInfo {
        &mut self.soft_delete
    }
}

impl Concurrent for Classroom {
    fn row_version(&self) -> &[u8] {
        &self.row_version
    }

    fn set_row_version(&mut self, token: Vec<u8>) {
        self.row_version = token;
    }
}

/// Student enrolled in exactly one classroom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: EntityKey,
    pub classroom_id: EntityKey,
    pub name: String,
    pub audit: AuditInfo,
    pub soft_delete: SoftDeleteInfo,
}

impl Student {
    pub const TYPE: &'static EntityType = &EntityType {
        name: "Student",
        table: "students",
        key_column: "id",
        columns: &[
            Column::required("id", ColumnKind::Uuid),
            Column::required("classroom_id", ColumnKind::Uuid),
            Column::required("name", ColumnKind::Text),
            AUDIT_COLUMNS[0],
            AUDIT_COLUMNS[1],
            AUDIT_COLUMNS[2],
            AUDIT_COLUMNS[3],
            SOFT_DELETE_COLUMNS[0],
            SOFT_DELETE_COLUMNS[1],
        ],
    };

    pub const ADDRESS: Navigation<Student, Address> = Navigation::new("Address");

    pub fn new(classroom_id: EntityKey, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            classroom_id,
            name: name.into(),
            audit: AuditInfo::default(),
            soft_delete: SoftDeleteInfo::default(),
        }
    }
}

impl Entity for Student {
    fn descriptor() -> &'static EntityType {
        Self::TYPE
    }

    fn from_values(values: &PropertyValues) -> ModelResult<Self> {
        Ok(Self {
            id: values.require_uuid("id")?,
            classroom_id: values.require_uuid("classroom_id")?,
            name: values.require_text("name")?,
            audit: AuditInfo::read_from(values)?,
            soft_delete: SoftDeleteInfo::read_from(values)?,
        })
    }

    fn entity_type(&self) -> &'static EntityType {
        Self::TYPE
    }

    fn key(&self) -> EntityKey {
        self.id
    }

    fn to_values(&self) -> PropertyValues {
        let mut values = PropertyValues::new()
            .with("id", self.id)
            .with("classroom_id", self.classroom_id)
            .with("name", self.name.as_str());
        self.audit.write_to(&mut values);
        self.soft_delete.write_to(&mut values);
        values
    }

    fn apply_values(&mut self, values: &PropertyValues) -> ModelResult<()> {
        *self = Self::from_values(values)?;
        Ok(())
    }

    fn foreign_key(&self, column: &str) -> Option<EntityKey> {
        (column == "classroom_id").then_some(self.classroom_id)
    }

    fn as_auditable(&self) -> Option<&dyn Auditable> {
        Some(self)
    }

    fn as_auditable_mut(&mut self) -> Option<&mut dyn Auditable> {
        Some(self)
    }

    fn as_soft_deletable(&self) -> Option<&dyn SoftDeletable> {
        Some(self)
    }

    fn as_soft_deletable_mut(&mut self) -> Option<&mut dyn SoftDeletable> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Auditable for Student {
    fn audit_info(&self) -> &AuditInfo {
        &self.audit
    }

    fn audit_info_mut(&mut self) -> &mut AuditInfo {
        &mut self.audit
    }
}

impl SoftDeletable for Student {
    fn soft_delete_info(&self) -> &SoftDeleteInfo {
        &self.soft_delete
    }

    fn soft_delete_info_mut(&mut self) -> &mut SoftDeleteInfo {
        &mut self.soft_delete
    }
}

/// Home address of one student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: EntityKey,
    pub student_id: EntityKey,
    pub street: String,
    pub city: String,
    pub audit: AuditInfo,
    pub soft_delete: SoftDeleteInfo,
}

impl Address {
    pub const TYPE: &'static EntityType = &EntityType {
        name: "Address",
        table: "addresses",
        key_column: "id",
        columns: &[
            Column::required("id", ColumnKind::Uuid),
            Column::required("student_id", ColumnKind::Uuid),
            Column::required("street", ColumnKind::Text),
            Column::required("city", ColumnKind::Text),
            AUDIT_COLUMNS[0],
            AUDIT_COLUMNS[1],
            AUDIT_COLUMNS[2],
            AUDIT_COLUMNS[3],
            SOFT_DELETE_COLUMNS[0],
            SOFT_DELETE_COLUMNS[1],
        ],
    };

    pub fn new(student_id: EntityKey, street: impl Into<String>, city: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            student_id,
            street: street.into(),
            city: city.into(),
            audit: AuditInfo::default(),
            soft_delete: SoftDeleteInfo::default(),
        }
    }
}

impl Entity for Address {
    fn descriptor() -> &'static EntityType {
        Self::TYPE
    }

    fn from_values(values: &PropertyValues) -> ModelResult<Self> {
        Ok(Self {
            id: values.require_uuid("id")?,
            student_id: values.require_uuid("student_id")?,
            street: values.require_text("street")?,
            city: values.require_text("city")?,
            audit: AuditInfo::read_from(values)?,
            soft_delete: SoftDeleteInfo::read_from(values)?,
        })
    }

    fn entity_type(&self) -> &'static EntityType {
        Self::TYPE
    }

    fn key(&self) -> EntityKey {
        self.id
    }

    fn to_values(&self) -> PropertyValues {
        let mut values = PropertyValues::new()
            .with("id", self.id)
            .with("student_id", self.student_id)
            .with("street", self.street.as_str())
            .with("city", self.city.as_str());
        self.audit.write_to(&mut values);
        self.soft_delete.write_to(&mut values);
        values
    }

    fn apply_values(&mut self, values: &PropertyValues) -> ModelResult<()> {
        *self = Self::from_values(values)?;
        Ok(())
    }

    fn as_auditable(&self) -> Option<&dyn Auditable> {
        Some(self)
    }

    fn as_auditable_mut(&mut self) -> Option<&mut dyn Auditable> {
        Some(self)
    }

    fn as_soft_deletable(&self) -> Option<&dyn SoftDeletable> {
        Some(self)
    }

    fn as_soft_deletable_mut(&mut self) -> Option<&mut dyn SoftDeletable> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Auditable for Address {
    fn audit_info(&self) -> &AuditInfo {
        &self.audit
    }

    fn audit_info_mut(&mut self) -> &mut AuditInfo {
        &mut self.audit
    }
}

impl SoftDeletable for Address {
    fn soft_delete_info(&self) -> &SoftDeleteInfo {
        &self.soft_delete
    }

    fn soft_delete_info_mut(&mut self) -> &mut SoftDeleteInfo {
        &mut self.soft_delete
    }
}

/// Free-form attendance note. Carries no bookkeeping capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: EntityKey,
    pub classroom_id: EntityKey,
    pub note: String,
    /// Epoch ms.
    pub recorded_at: i64,
}

impl AttendanceRecord {
    pub const TYPE: &'static EntityType = &EntityType {
        name: "AttendanceRecord",
        table: "attendance_records",
        key_column: "id",
        columns: &[
            Column::required("id", ColumnKind::Uuid),
            Column::required("classroom_id", ColumnKind::Uuid),
            Column::required("note", ColumnKind::Text),
            Column::required("recorded_at", ColumnKind::Integer),
        ],
    };

    pub fn new(classroom_id: EntityKey, note: impl Into<String>, recorded_at: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            classroom_id,
            note: note.into(),
            recorded_at,
        }
    }
}

impl Entity for AttendanceRecord {
    fn descriptor() -> &'static EntityType {
        Self::TYPE
    }

    fn from_values(values: &PropertyValues) -> ModelResult<Self> {
        Ok(Self {
            id: values.require_uuid("id")?,
            classroom_id: values.require_uuid("classroom_id")?,
            note: values.require_text("note")?,
            recorded_at: values.require_integer("recorded_at")?,
        })
    }

    fn entity_type(&self) -> &'static EntityType {
        Self::TYPE
    }

    fn key(&self) -> EntityKey {
        self.id
    }

    fn to_values(&self) -> PropertyValues {
        PropertyValues::new()
            .with("id", self.id)
            .with("classroom_id", self.classroom_id)
            .with("note", self.note.as_str())
            .with("recorded_at", self.recorded_at)
    }

    fn apply_values(&mut self, values: &PropertyValues) -> ModelResult<()> {
        *self = Self::from_values(values)?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
