//! Demo entry point for the audit pipeline.
//!
//! # Responsibility
//! - Run one insert/delete round trip against an in-memory school database.
//! - Print the resulting rows, including tombstones, as JSON.
//!
//! Usage: `tidemark_cli [actor] [absolute-log-dir]`

use serde_json::json;
use std::error::Error;
use std::process::ExitCode;
use tidemark_core::{
    core_version, default_log_level, init_logging, open_db_in_memory, school_model, Address,
    AuditStamper, Classroom, DbContext, GenericRepository, Repository, Student,
};

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let actor = args.next();
    if let Some(log_dir) = args.next() {
        if let Err(err) = init_logging(default_log_level(), &log_dir) {
            eprintln!("tidemark: {err}");
            return ExitCode::FAILURE;
        }
    }

    let stamper = actor.map_or_else(AuditStamper::anonymous, AuditStamper::for_actor);
    match run(stamper) {
        Ok(report) => {
            println!("{report}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("event=cli_run module=cli status=error error={err}");
            eprintln!("tidemark: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(stamper: AuditStamper) -> Result<String, Box<dyn Error>> {
    let mut ctx = DbContext::new(open_db_in_memory()?, school_model()?);

    let classroom = Classroom::new("A1");
    let students = vec![
        Student::new(classroom.id, "Ada"),
        Student::new(classroom.id, "Grace"),
    ];
    let addresses: Vec<Address> = students
        .iter()
        .map(|student| Address::new(student.id, "1 Main St", "Springfield"))
        .collect();

    GenericRepository::<Classroom>::new(&mut ctx, stamper.clone()).insert(classroom.clone())?;
    GenericRepository::<Student>::new(&mut ctx, stamper.clone()).insert_many(students)?;
    let mut address_repo = GenericRepository::<Address>::new(&mut ctx, stamper.clone());
    address_repo.insert_many(addresses)?;
    let inserted = address_repo.save_changes()?;

    let mut classrooms = GenericRepository::<Classroom>::new(&mut ctx, stamper.clone());
    classrooms.delete_by_key(classroom.id)?;
    let deleted = classrooms.save_changes()?;

    let mut ctx = DbContext::new(ctx.into_connection(), school_model()?);
    let tombstone = GenericRepository::<Classroom>::new(&mut ctx, stamper.clone())
        .ignore_query_filters()
        .select_by_key(classroom.id)?;
    let students = GenericRepository::<Student>::new(&mut ctx, stamper.clone())
        .ignore_query_filters()
        .select_list(None, &[])?;
    let addresses = GenericRepository::<Address>::new(&mut ctx, stamper.clone())
        .ignore_query_filters()
        .select_list(None, &[])?;

    let report = json!({
        "version": core_version(),
        "actor": stamper.actor_name(),
        "inserted_rows": inserted,
        "deleted_rows": deleted,
        "classroom": tombstone,
        "students": students,
        "addresses": addresses,
    });
    Ok(serde_json::to_string_pretty(&report)?)
}
