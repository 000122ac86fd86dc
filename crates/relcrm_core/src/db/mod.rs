//! SQLite storage bootstrap and schema migration entry points.
//!
//! # Responsibility
//! - Open and configure SQLite connections for the CRM core.
//! - Apply schema migrations in deterministic order.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - Core code must not read/write CRM data before migrations succeed.
//! - Every connection enforces foreign keys, so deleting a client cascades to
//!   its contacts, activities, reminders and documents.

use thiserror::Error;

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory, open_db_with_lock_wait, DEFAULT_LOCK_WAIT};

pub type DbResult<T> = Result<T, DbError>;

/// Storage bootstrap failure.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("{0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error(
        "database schema version {db_version} is newer than supported {latest_supported}"
    )]
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

impl DbError {
    /// Returns true when SQLite gave up waiting for a lock held elsewhere.
    pub fn is_lock_contention(&self) -> bool {
        match self {
            Self::Sqlite(err) => is_lock_contention(err),
            Self::UnsupportedSchemaVersion { .. } => false,
        }
    }
}

/// Returns true for `SQLITE_BUSY` / `SQLITE_LOCKED` failures.
pub fn is_lock_contention(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}
