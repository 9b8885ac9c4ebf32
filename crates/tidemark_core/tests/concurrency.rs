use std::path::Path;
use std::sync::Arc;
use tidemark_core::context::RowFilter;
use tidemark_core::model::value::Value;
use tidemark_core::{
    open_db, school_model, AttendanceRecord, AuditStamper, Classroom, ConcurrencyResolver,
    ContextError, DbContext, Entity, FixedClock, FixedPrincipal, GenericRepository, Model,
    RepoError, Repository, Student,
};

fn stamper(actor: &str, now: i64) -> AuditStamper {
    AuditStamper::new(Arc::new(FixedPrincipal::new(actor)), Arc::new(FixedClock(now)))
}

fn open_context(path: &Path, model: &Arc<Model>) -> DbContext {
    DbContext::new(open_db(path).unwrap(), Arc::clone(model))
}

fn seed_classroom(ctx: &mut DbContext, title: &str) -> Classroom {
    let mut classroom = Classroom::new("A1");
    classroom.title = Some(title.to_string());
    let mut repo = GenericRepository::<Classroom>::new(ctx, stamper("alice", 1_000));
    repo.insert(classroom.clone()).unwrap();
    repo.save_changes().unwrap();
    classroom
}

#[test]
fn stale_update_is_rejected_and_reverted_to_store_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("school.db");
    let model = school_model().unwrap();

    let mut first = open_context(&path, &model);
    let classroom = seed_classroom(&mut first, "Original");
    let mut second = open_context(&path, &model);

    let mut repo_a = GenericRepository::<Classroom>::new(&mut first, stamper("alice", 2_000));
    let mut from_a = repo_a.select_by_key(classroom.id).unwrap().unwrap();
    let mut repo_b = GenericRepository::<Classroom>::new(&mut second, stamper("bob", 3_000));
    let mut from_b = repo_b.select_by_key(classroom.id).unwrap().unwrap();

    from_a.title = Some("From A".to_string());
    repo_a.update(from_a).unwrap();
    assert_eq!(repo_a.save_changes().unwrap(), 1);

    from_b.title = Some("From B".to_string());
    repo_b.update(from_b).unwrap();
    let Err(RepoError::Concurrency(conflict)) = repo_b.save_changes() else {
        panic!("expected concurrency conflict");
    };

    assert!(conflict
        .message
        .contains("Classroom.title: proposed=\"From B\", database=\"From A\""));
    assert!(conflict
        .message
        .contains("Classroom.modified_by: proposed=\"bob\", database=\"alice\""));
    assert!(conflict.message.contains("Classroom.row_version: proposed=0x"));
    assert!(!conflict.message.contains("Classroom.code"));

    assert_eq!(conflict.reverted.len(), 1);
    let reverted = &conflict.reverted[0];
    assert_eq!(reverted.entity_type, "Classroom");
    assert_eq!(reverted.key, classroom.id);
    assert_eq!(
        reverted.values.as_ref().unwrap().get("title"),
        Some(&Value::Text("From A".to_string()))
    );
    assert!(repo_b.context().tracker().is_empty());

    let rows = second
        .query_rows(Classroom::TYPE, &RowFilter::Key(classroom.id))
        .unwrap();
    let stored = Classroom::from_values(&rows[0]).unwrap();
    assert_eq!(stored.title.as_deref(), Some("From A"));
    assert_eq!(stored.audit.modified_by.as_deref(), Some("alice"));
}

#[test]
fn conflict_rolls_back_every_other_pending_write() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("school.db");
    let model = school_model().unwrap();

    let mut first = open_context(&path, &model);
    let classroom = seed_classroom(&mut first, "Original");
    let mut second = open_context(&path, &model);

    let stale = GenericRepository::<Classroom>::new(&mut second, stamper("bob", 3_000))
        .select_by_key(classroom.id)
        .unwrap()
        .unwrap();

    let mut repo_a = GenericRepository::<Classroom>::new(&mut first, stamper("alice", 2_000));
    let mut fresh = repo_a.select_by_key(classroom.id).unwrap().unwrap();
    fresh.title = Some("From A".to_string());
    repo_a.update(fresh).unwrap();
    repo_a.save_changes().unwrap();

    let student = Student::new(classroom.id, "Ada");
    GenericRepository::<Student>::new(&mut second, stamper("bob", 3_000))
        .insert(student.clone())
        .unwrap();
    let mut repo_b = GenericRepository::<Classroom>::new(&mut second, stamper("bob", 3_000));
    let mut stale = stale;
    stale.title = Some("From B".to_string());
    repo_b.update(stale).unwrap();
    assert!(matches!(
        repo_b.save_changes(),
        Err(RepoError::Concurrency(_))
    ));

    let students = second
        .query_rows(Student::TYPE, &RowFilter::Key(student.id))
        .unwrap();
    assert!(students.is_empty());
    assert!(second.tracker().find(Student::TYPE, student.id).is_some());
}

#[test]
fn vanished_row_is_reported_as_missing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("school.db");
    let model = school_model().unwrap();

    let mut first = open_context(&path, &model);
    let classroom = seed_classroom(&mut first, "Original");
    let record = AttendanceRecord::new(classroom.id, "present", 1);
    {
        let mut repo = GenericRepository::<AttendanceRecord>::new(&mut first, stamper("alice", 1_000));
        repo.insert(record.clone()).unwrap();
        repo.save_changes().unwrap();
    }
    let mut second = open_context(&path, &model);
    let mut repo_b = GenericRepository::<AttendanceRecord>::new(&mut second, stamper("bob", 3_000));
    let mut stale = repo_b.select_by_key(record.id).unwrap().unwrap();

    let mut repo_a = GenericRepository::<AttendanceRecord>::new(&mut first, stamper("alice", 2_000));
    repo_a.delete_by_key(record.id).unwrap();
    repo_a.save_changes().unwrap();

    stale.note = "late".to_string();
    repo_b.update(stale).unwrap();
    let Err(RepoError::Concurrency(conflict)) = repo_b.save_changes() else {
        panic!("expected concurrency conflict");
    };
    assert_eq!(
        conflict.message,
        format!("AttendanceRecord {}: row no longer exists in database", record.id)
    );
    assert!(conflict.reverted[0].values.is_none());

    let json = serde_json::to_value(&conflict.reverted).unwrap();
    assert_eq!(json[0]["entity_type"], "AttendanceRecord");
    assert!(json[0]["values"].is_null());
}

#[test]
fn resolver_works_directly_on_a_commit_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("school.db");
    let model = school_model().unwrap();

    let mut first = open_context(&path, &model);
    let classroom = seed_classroom(&mut first, "Original");
    let mut second = open_context(&path, &model);
    GenericRepository::<Classroom>::new(&mut second, stamper("bob", 3_000))
        .select_by_key(classroom.id)
        .unwrap();

    let mut repo_a = GenericRepository::<Classroom>::new(&mut first, stamper("alice", 2_000));
    let mut fresh = repo_a.select_by_key(classroom.id).unwrap().unwrap();
    fresh.code = "A2".to_string();
    repo_a.update(fresh).unwrap();
    repo_a.save_changes().unwrap();

    let id = second.tracker().find(Classroom::TYPE, classroom.id).unwrap();
    second
        .tracker_mut()
        .set_state(id, tidemark_core::EntryState::Deleted)
        .unwrap();
    let Err(ContextError::Concurrency(conflict)) = second.commit() else {
        panic!("expected concurrency conflict");
    };
    assert_eq!(conflict.entries, vec![id]);

    let report = ConcurrencyResolver::rollback_entity_changes(&mut second, &conflict).unwrap();
    assert!(report.message.contains("Classroom.code: proposed=\"A1\", database=\"A2\""));
    assert!(second.tracker().entry(id).is_none());
}
