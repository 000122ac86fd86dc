//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Configure connection pragmas required by core behavior.
//! - Trigger schema migrations before returning a usable connection.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON`.
//! - Returned connections have migrations fully applied.
//! - Lock waits are bounded by the configured busy timeout; nothing blocks
//!   indefinitely on a competing writer.

use super::migrations::apply_migrations;
use super::DbResult;
use log::{debug, error};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

/// Busy timeout applied when callers do not pass one explicitly.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5);

/// Opens a SQLite database file with the default lock wait.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    open_db_with_lock_wait(path, DEFAULT_LOCK_WAIT)
}

/// Opens a SQLite database file and applies all pending migrations.
///
/// `lock_wait` bounds how long any statement on this connection waits for a
/// lock held by another connection before failing with `SQLITE_BUSY`.
///
/// # Side effects
/// - Enables WAL journaling so detection scans can read while a merge writes.
/// - Emits `db_open` events: `debug` on success, `error` on failure.
pub fn open_db_with_lock_wait(path: impl AsRef<Path>, lock_wait: Duration) -> DbResult<Connection> {
    let started_at = Instant::now();
    let conn = Connection::open(path).map_err(|err| {
        error!(
            "event=db_open module=db status=error mode=file duration_ms={} error_code=db_open_failed error={}",
            started_at.elapsed().as_millis(),
            err
        );
        err
    })?;
    // WAL is a no-op for some VFS targets; a failure here is not fatal.
    let _ = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get::<_, String>(0));
    finish_open(conn, "file", lock_wait, started_at)
}

/// Opens an in-memory SQLite database and applies all pending migrations.
pub fn open_db_in_memory() -> DbResult<Connection> {
    let started_at = Instant::now();
    let conn = Connection::open_in_memory()?;
    finish_open(conn, "memory", DEFAULT_LOCK_WAIT, started_at)
}

fn finish_open(
    mut conn: Connection,
    mode: &str,
    lock_wait: Duration,
    started_at: Instant,
) -> DbResult<Connection> {
    match bootstrap_connection(&mut conn, lock_wait) {
        Ok(()) => {
            debug!(
                "event=db_open module=db status=ok mode={} lock_wait_ms={} duration_ms={}",
                mode,
                lock_wait.as_millis(),
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_bootstrap_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn bootstrap_connection(conn: &mut Connection, lock_wait: Duration) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(lock_wait)?;
    apply_migrations(conn)?;
    Ok(())
}
