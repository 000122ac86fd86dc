//! Schema migrations tracked through `PRAGMA user_version`.
//!
//! # Invariants
//! - Versions are strictly increasing and never reused.
//! - Pending steps run inside one `BEGIN IMMEDIATE` transaction, so two
//!   processes opening a fresh file cannot both apply the same step.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::{Connection, TransactionBehavior};

struct Step {
    version: u32,
    sql: &'static str,
}

const STEPS: &[Step] = &[
    Step {
        version: 1,
        sql: include_str!("0001_clients.sql"),
    },
    Step {
        version: 2,
        sql: include_str!("0002_client_children.sql"),
    },
];

/// Highest schema version this build can open.
pub fn latest_version() -> u32 {
    STEPS.last().map_or(0, |step| step.version)
}

/// Brings the schema up to [`latest_version`].
///
/// # Errors
/// - `UnsupportedSchemaVersion` when the file was written by a newer build.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    if ensure_supported(schema_version(conn)?)? {
        return Ok(());
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    // Another connection may have migrated while we waited for the lock.
    let from = schema_version(&tx)?;
    if ensure_supported(from)? {
        return Ok(());
    }

    let mut applied = 0usize;
    for step in STEPS.iter().filter(|step| step.version > from) {
        tx.execute_batch(step.sql)?;
        tx.pragma_update(None, "user_version", step.version)?;
        applied += 1;
    }
    tx.commit()?;

    info!(
        "event=db_migrate module=db status=ok from_version={} to_version={} steps={}",
        from,
        latest_version(),
        applied
    );
    Ok(())
}

/// Returns `true` when `version` is already current.
fn ensure_supported(version: u32) -> DbResult<bool> {
    let latest = latest_version();
    if version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: version,
            latest_supported: latest,
        });
    }
    Ok(version == latest)
}

fn schema_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}
