use std::sync::Arc;
use tidemark_core::context::RowFilter;
use tidemark_core::{
    open_db, open_db_in_memory, school_model, AuditStamper, CancellationSignal, Classroom,
    ConcurrencyConflict, ConcurrencyResolver, ContextError, DbContext, EntryState, FixedClock,
    FixedPrincipal, GenericRepository, RepoError, Repository,
};

fn stamper(actor: &str, now: i64) -> AuditStamper {
    AuditStamper::new(Arc::new(FixedPrincipal::new(actor)), Arc::new(FixedClock(now)))
}

#[tokio::test]
async fn async_save_stamps_and_persists() {
    let mut ctx = DbContext::new(open_db_in_memory().unwrap(), school_model().unwrap());
    let classroom = Classroom::new("A1");
    let mut repo = GenericRepository::<Classroom>::new(&mut ctx, stamper("alice", 1_000));
    repo.insert(classroom.clone()).unwrap();

    let signal = CancellationSignal::new();
    assert_eq!(repo.save_changes_async(Some(&signal)).await.unwrap(), 1);

    let rows = ctx
        .query_rows(Classroom::TYPE, &RowFilter::Key(classroom.id))
        .unwrap();
    assert_eq!(rows[0].require_text("created_by").unwrap(), "alice");
}

#[tokio::test]
async fn cancelled_save_writes_nothing() {
    let mut ctx = DbContext::new(open_db_in_memory().unwrap(), school_model().unwrap());
    let classroom = Classroom::new("A1");
    let mut repo = GenericRepository::<Classroom>::new(&mut ctx, stamper("alice", 1_000));
    repo.insert(classroom.clone()).unwrap();

    let signal = CancellationSignal::new();
    signal.clone().cancel();
    let err = repo.save_changes_async(Some(&signal)).await.unwrap_err();
    assert!(matches!(err, RepoError::Context(ContextError::Cancelled)));

    let id = ctx.tracker().find(Classroom::TYPE, classroom.id).unwrap();
    assert_eq!(ctx.tracker().state(id), Some(EntryState::Added));
    assert!(ctx
        .query_rows(Classroom::TYPE, &RowFilter::All)
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn async_conflict_is_reverted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("school.db");
    let model = school_model().unwrap();

    let mut first = DbContext::new(open_db(&path).unwrap(), Arc::clone(&model));
    let classroom = Classroom::new("A1");
    {
        let mut repo = GenericRepository::<Classroom>::new(&mut first, stamper("alice", 1_000));
        repo.insert(classroom.clone()).unwrap();
        repo.save_changes_async(None).await.unwrap();
    }

    let mut second = DbContext::new(open_db(&path).unwrap(), Arc::clone(&model));
    let mut repo_b = GenericRepository::<Classroom>::new(&mut second, stamper("bob", 3_000));
    let mut stale = repo_b.select_by_key(classroom.id).unwrap().unwrap();

    let mut repo_a = GenericRepository::<Classroom>::new(&mut first, stamper("alice", 2_000));
    let mut fresh = repo_a.select_by_key(classroom.id).unwrap().unwrap();
    fresh.title = Some("From A".to_string());
    repo_a.update(fresh).unwrap();
    repo_a.save_changes_async(None).await.unwrap();

    stale.title = Some("From B".to_string());
    repo_b.update(stale).unwrap();
    let Err(RepoError::Concurrency(conflict)) = repo_b.save_changes_async(None).await else {
        panic!("expected concurrency conflict");
    };
    assert!(conflict
        .message
        .contains("Classroom.title: proposed=\"From B\", database=\"From A\""));
}

#[tokio::test]
async fn cancel_after_conflict_still_reverts_every_entry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("school.db");
    let model = school_model().unwrap();

    let mut first = DbContext::new(open_db(&path).unwrap(), Arc::clone(&model));
    let classrooms = vec![Classroom::new("A1"), Classroom::new("A2"), Classroom::new("A3")];
    {
        let mut repo = GenericRepository::<Classroom>::new(&mut first, stamper("alice", 1_000));
        repo.insert_many(classrooms.clone()).unwrap();
        repo.save_changes().unwrap();
    }

    let mut second = DbContext::new(open_db(&path).unwrap(), Arc::clone(&model));
    let mut repo_b = GenericRepository::<Classroom>::new(&mut second, stamper("bob", 3_000));
    let mut stale = repo_b.select_list(None, &[]).unwrap();
    assert_eq!(stale.len(), 3);

    {
        let mut repo_a = GenericRepository::<Classroom>::new(&mut first, stamper("alice", 2_000));
        let mut fresh = repo_a.select_list(None, &[]).unwrap();
        for classroom in &mut fresh {
            classroom.title = Some("A".to_string());
        }
        repo_a.update_many(fresh).unwrap();
        repo_a.save_changes().unwrap();
    }

    for classroom in &mut stale {
        classroom.title = Some("B".to_string());
    }
    repo_b.update_many(stale).unwrap();

    // The signal fires only after the commit has already run.
    let signal = CancellationSignal::new();
    let canceller = signal.clone();
    let (result, ()) = tokio::join!(repo_b.save_changes_async(Some(&signal)), async move {
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        canceller.cancel();
    });
    assert!(signal.is_cancelled());

    let Err(RepoError::Concurrency(conflict)) = result else {
        panic!("expected concurrency conflict");
    };
    assert_eq!(conflict.reverted.len(), 3);
    assert_eq!(conflict.message.matches("proposed=\"B\", database=\"A\"").count(), 3);
    for classroom in &classrooms {
        assert!(repo_b
            .context()
            .tracker()
            .find(Classroom::TYPE, classroom.id)
            .is_none());
    }
    assert!(repo_b.context().tracker().is_empty());
}

#[tokio::test]
async fn async_rollback_cancelled_up_front_touches_nothing() {
    let mut ctx = DbContext::new(open_db_in_memory().unwrap(), school_model().unwrap());
    let mut classroom = Classroom::new("A1");
    classroom.title = Some("Proposed".to_string());
    let id = ctx
        .tracker_mut()
        .attach(Box::new(classroom), EntryState::Modified)
        .unwrap();

    let signal = CancellationSignal::new();
    signal.cancel();
    let conflict = ConcurrencyConflict { entries: vec![id] };
    let err = ConcurrencyResolver::rollback_entity_changes_async(&mut ctx, &conflict, Some(&signal))
        .await
        .unwrap_err();
    assert!(matches!(err, ContextError::Cancelled));

    let untouched = ctx.tracker().typed::<Classroom>(id).unwrap();
    assert_eq!(untouched.title.as_deref(), Some("Proposed"));
    assert_eq!(ctx.tracker().state(id), Some(EntryState::Modified));
}
