use std::sync::Arc;
use tidemark_core::context::RowFilter;
use tidemark_core::{
    open_db_in_memory, school_model, Address, AttendanceRecord, AuditStamper, Classroom,
    DbContext, Entity, EntityKey, EntryState, FixedClock, FixedPrincipal, GenericRepository,
    Repository, Student,
};

struct Seeded {
    classroom: Classroom,
    students: Vec<Student>,
    addresses: Vec<Address>,
    record: AttendanceRecord,
}

fn stamper(actor: &str, now: i64) -> AuditStamper {
    AuditStamper::new(Arc::new(FixedPrincipal::new(actor)), Arc::new(FixedClock(now)))
}

fn stored<E: Entity>(ctx: &DbContext, key: EntityKey) -> E {
    let rows = ctx.query_rows(E::descriptor(), &RowFilter::Key(key)).unwrap();
    E::from_values(&rows[0]).unwrap()
}

/// Seeds one classroom with two students, one address each and one
/// attendance record, then returns a fresh context over the same database.
fn seeded_context() -> (DbContext, Seeded) {
    let mut ctx = DbContext::new(open_db_in_memory().unwrap(), school_model().unwrap());
    let classroom = Classroom::new("A1");
    let students = vec![
        Student::new(classroom.id, "Ada"),
        Student::new(classroom.id, "Grace"),
    ];
    let addresses: Vec<Address> = students
        .iter()
        .map(|student| Address::new(student.id, "1 Main St", "Springfield"))
        .collect();
    let record = AttendanceRecord::new(classroom.id, "present", 1);

    let seed = stamper("alice", 1_000);
    GenericRepository::<Classroom>::new(&mut ctx, seed.clone())
        .insert(classroom.clone())
        .unwrap();
    GenericRepository::<Student>::new(&mut ctx, seed.clone())
        .insert_many(students.clone())
        .unwrap();
    GenericRepository::<AttendanceRecord>::new(&mut ctx, seed.clone())
        .insert(record.clone())
        .unwrap();
    let mut repo = GenericRepository::<Address>::new(&mut ctx, seed);
    repo.insert_many(addresses.clone()).unwrap();
    assert_eq!(repo.save_changes().unwrap(), 6);

    let fresh = DbContext::new(ctx.into_connection(), school_model().unwrap());
    (
        fresh,
        Seeded {
            classroom,
            students,
            addresses,
            record,
        },
    )
}

#[test]
fn deleting_root_tombstones_the_loaded_graph_with_one_stamp() {
    let (mut ctx, seeded) = seeded_context();

    let mut repo = GenericRepository::<Classroom>::new(&mut ctx, stamper("bob", 5_000));
    let root = repo.select_by_key(seeded.classroom.id).unwrap().unwrap();
    repo.delete(&root).unwrap();
    assert_eq!(repo.save_changes().unwrap(), 5);

    let classroom: Classroom = stored(&ctx, seeded.classroom.id);
    assert!(classroom.soft_delete.is_deleted);
    assert_eq!(classroom.audit.modified_by.as_deref(), Some("bob"));
    assert_eq!(classroom.soft_delete.deleted_time, Some(5_000));

    for student in &seeded.students {
        let student: Student = stored(&ctx, student.id);
        assert!(student.soft_delete.is_deleted);
        assert_eq!(student.audit.modified_by.as_deref(), Some("bob"));
        assert_eq!(student.audit.modified_time, Some(5_000));
        assert_eq!(student.soft_delete.deleted_time, Some(5_000));
    }
    for address in &seeded.addresses {
        let address: Address = stored(&ctx, address.id);
        assert!(address.soft_delete.is_deleted);
        assert_eq!(address.audit.modified_by.as_deref(), Some("bob"));
        assert_eq!(address.soft_delete.deleted_time, address.audit.modified_time);
    }

    let record: AttendanceRecord = stored(&ctx, seeded.record.id);
    assert_eq!(record, seeded.record);
}

#[test]
fn deleting_one_child_leaves_parent_and_sibling_untouched() {
    let (mut ctx, seeded) = seeded_context();
    GenericRepository::<Classroom>::new(&mut ctx, stamper("bob", 5_000))
        .select_by_key(seeded.classroom.id)
        .unwrap();

    let mut repo = GenericRepository::<Student>::new(&mut ctx, stamper("bob", 5_000));
    repo.delete(&seeded.students[0]).unwrap();
    assert_eq!(repo.save_changes().unwrap(), 2);

    let deleted: Student = stored(&ctx, seeded.students[0].id);
    let deleted_address: Address = stored(&ctx, seeded.addresses[0].id);
    assert!(deleted.soft_delete.is_deleted);
    assert!(deleted_address.soft_delete.is_deleted);

    let classroom: Classroom = stored(&ctx, seeded.classroom.id);
    let sibling: Student = stored(&ctx, seeded.students[1].id);
    let sibling_address: Address = stored(&ctx, seeded.addresses[1].id);
    assert!(!classroom.soft_delete.is_deleted);
    assert_eq!(classroom.audit.modified_by, None);
    assert!(!sibling.soft_delete.is_deleted);
    assert_eq!(sibling.audit.modified_by, None);
    assert!(!sibling_address.soft_delete.is_deleted);
}

#[test]
fn cascade_ignores_dependents_that_were_never_loaded() {
    let (mut ctx, seeded) = seeded_context();

    let mut repo = GenericRepository::<Classroom>::new(&mut ctx, stamper("bob", 5_000));
    let root = repo
        .select(&|classroom: &Classroom| classroom.code == "A1", &[])
        .unwrap()
        .unwrap();
    repo.delete(&root).unwrap();
    assert_eq!(repo.save_changes().unwrap(), 1);

    for student in &seeded.students {
        let student: Student = stored(&ctx, student.id);
        assert!(!student.soft_delete.is_deleted);
    }
}

#[test]
fn stamper_pass_reports_cascaded_entries() {
    let (mut ctx, seeded) = seeded_context();
    GenericRepository::<Classroom>::new(&mut ctx, stamper("bob", 5_000))
        .select_by_key(seeded.classroom.id)
        .unwrap();

    let root = ctx
        .tracker()
        .find(Classroom::TYPE, seeded.classroom.id)
        .unwrap();
    ctx.tracker_mut().set_state(root, EntryState::Deleted).unwrap();

    let summary = stamper("bob", 5_000).handle(&mut ctx);
    assert_eq!(summary.soft_deleted, 1);
    assert_eq!(summary.cascaded, 4);
    assert_eq!(summary.hard_deleted, 0);

    let record = ctx
        .tracker()
        .find(AttendanceRecord::TYPE, seeded.record.id)
        .unwrap();
    assert_eq!(ctx.tracker().state(record), Some(EntryState::Unchanged));
}
