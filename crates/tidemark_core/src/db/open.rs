//! File and in-memory connection openers.

use super::migrations::apply_migrations;
use super::{ContextOptions, DbError, DbResult};
use rusqlite::Connection;
use std::path::Path;
use std::time::Instant;

#[derive(Clone, Copy)]
enum OpenMode<'a> {
    File(&'a Path),
    Memory,
}

impl OpenMode<'_> {
    fn label(self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Memory => "memory",
        }
    }

    fn connect(self) -> rusqlite::Result<Connection> {
        match self {
            Self::File(path) => Connection::open(path),
            Self::Memory => Connection::open_in_memory(),
        }
    }
}

/// Opens (or creates) the database at `path` with default options.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    open_db_with_options(path, ContextOptions::default())
}

/// Opens (or creates) the database at `path` and migrates it.
///
/// Emits one `db_open` event with the elapsed time and outcome.
pub fn open_db_with_options(
    path: impl AsRef<Path>,
    options: ContextOptions,
) -> DbResult<Connection> {
    open(OpenMode::File(path.as_ref()), options)
}

/// Opens a private in-memory database and migrates it.
///
/// Every call yields an isolated database; two contexts that must observe
/// each other's commits need a shared file opened with [`open_db`].
pub fn open_db_in_memory() -> DbResult<Connection> {
    open(OpenMode::Memory, ContextOptions::default())
}

fn open(mode: OpenMode<'_>, options: ContextOptions) -> DbResult<Connection> {
    let started_at = Instant::now();
    let opened: DbResult<Connection> = mode
        .connect()
        .map_err(DbError::from)
        .and_then(|mut conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.busy_timeout(options.busy_timeout)?;
            apply_migrations(&mut conn)?;
            Ok(conn)
        });

    let elapsed_ms = started_at.elapsed().as_millis();
    match &opened {
        Ok(_) => log::info!(
            "event=db_open module=db status=ok mode={} duration_ms={elapsed_ms}",
            mode.label()
        ),
        Err(err) => log::error!(
            "event=db_open module=db status=error mode={} duration_ms={elapsed_ms} error={err}",
            mode.label()
        ),
    }
    opened
}
