//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts for the client aggregate.
//! - Isolate SQLite query details and PII ciphertext from services.
//!
//! # Invariants
//! - Every read and write is scoped to the repository's owning user;
//!   touching another user's row fails with `Ownership`, an unknown id with
//!   `NotFound`.
//! - Write paths validate domain structs before any SQL mutation.
//! - Multi-statement writes run inside a savepoint so they compose with an
//!   enclosing transaction (merge) and stay atomic on their own.

use crate::codec::{CodecError, FieldCodec};
use crate::db::{is_lock_contention, DbError};
use crate::error::ErrorCode;
use crate::model::ValidationError;
use log::{error, warn};
use rusqlite::Connection;
use std::fmt::{Display, Formatter};
use thiserror::Error;
use uuid::Uuid;

pub mod activity_repo;
pub mod client_repo;
pub mod contact_repo;
pub mod document_repo;
pub mod reminder_repo;

use activity_repo::ActivityRepository;
use client_repo::ClientRepository;
use contact_repo::ContactRepository;
use document_repo::DocumentRepository;
use reminder_repo::ReminderRepository;

/// Placeholder returned in place of a PII field that failed to decrypt.
pub const REDACTED: &str = "[redacted]";

pub type RepoResult<T> = Result<T, RepoError>;

/// Every repository contract over one owner-scoped handle.
pub trait CrmRepository:
    ClientRepository + ContactRepository + ActivityRepository + ReminderRepository + DocumentRepository
{
}

impl<T> CrmRepository for T where
    T: ClientRepository
        + ContactRepository
        + ActivityRepository
        + ReminderRepository
        + DocumentRepository
{
}

/// Persisted entity kinds addressable by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Client,
    Contact,
    Activity,
    Reminder,
    Document,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Contact => "contact",
            Self::Activity => "activity",
            Self::Reminder => "reminder",
            Self::Document => "document",
        }
    }

    pub(crate) fn table(self) -> &'static str {
        match self {
            Self::Client => "clients",
            Self::Contact => "client_contacts",
            Self::Activity => "client_activities",
            Self::Reminder => "client_reminders",
            Self::Document => "documents",
        }
    }

    /// Sub-entity kinds owned by a client, in merge reassignment order.
    pub const OWNED: [EntityKind; 4] = [
        EntityKind::Contact,
        EntityKind::Activity,
        EntityKind::Reminder,
        EntityKind::Document,
    ];
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repository error taxonomy.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{entity} not found: {id}")]
    NotFound { entity: EntityKind, id: Uuid },
    #[error("{entity} {id} belongs to another user")]
    Ownership { entity: EntityKind, id: Uuid },
    /// A single-record read hit a PII field that cannot be decrypted.
    #[error("{entity} {id}: {source}")]
    Decryption {
        entity: EntityKind,
        id: Uuid,
        source: CodecError,
    },
    #[error(transparent)]
    Codec(CodecError),
    /// Another connection held the write lock past the configured wait.
    #[error("timed out waiting for a database lock")]
    LockTimeout,
    #[error(transparent)]
    Db(DbError),
    #[error("invalid persisted data: {0}")]
    InvalidData(String),
}

impl RepoError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::Validation,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::Ownership { .. } => ErrorCode::Ownership,
            Self::Decryption { .. } => ErrorCode::Decryption,
            Self::LockTimeout => ErrorCode::ConcurrentModification,
            Self::Codec(_) | Self::Db(_) | Self::InvalidData(_) => ErrorCode::Internal,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        if value.is_lock_contention() {
            Self::LockTimeout
        } else {
            Self::Db(value)
        }
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        if is_lock_contention(&value) {
            Self::LockTimeout
        } else {
            Self::Db(DbError::Sqlite(value))
        }
    }
}

impl From<CodecError> for RepoError {
    fn from(value: CodecError) -> Self {
        Self::Codec(value)
    }
}

/// Runs `body` inside a named savepoint, rolling back to it on error.
pub(crate) fn with_savepoint<T>(
    conn: &Connection,
    name: &str,
    body: impl FnOnce() -> RepoResult<T>,
) -> RepoResult<T> {
    conn.execute_batch(&format!("SAVEPOINT {name};"))?;
    match body() {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE {name};"))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) =
                conn.execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name};"))
            {
                error!(
                    "event=savepoint_rollback module=repo status=error savepoint={} error={}",
                    name, rollback
                );
            }
            Err(err)
        }
    }
}

/// Decrypts an optional PII blob for list reads, substituting [`REDACTED`]
/// and logging instead of failing the whole page.
pub(crate) fn decrypt_or_redact(
    codec: &FieldCodec,
    blob: Option<Vec<u8>>,
    entity: EntityKind,
    id: Uuid,
    field: &'static str,
) -> Option<String> {
    let blob = blob?;
    match codec.decrypt(&blob) {
        Ok(plain) => Some(plain),
        Err(err) => {
            warn!(
                "event=pii_decrypt module=repo status=redacted entity={} id={} field={} error={}",
                entity, id, field, err
            );
            Some(REDACTED.to_string())
        }
    }
}

/// Strict variant for single-record reads.
pub(crate) fn decrypt_strict(
    codec: &FieldCodec,
    blob: Option<Vec<u8>>,
    entity: EntityKind,
    id: Uuid,
) -> RepoResult<Option<String>> {
    match blob {
        Some(blob) => codec
            .decrypt(&blob)
            .map(Some)
            .map_err(|source| RepoError::Decryption { entity, id, source }),
        None => Ok(None),
    }
}

pub(crate) fn parse_uuid(value: &str, column: &str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
