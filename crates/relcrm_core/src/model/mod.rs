//! CRM domain model.
//!
//! # Responsibility
//! - Define plain data structures for the client aggregate and its
//!   sub-entities, independent of storage.
//! - Own field-level validation and tag normalization rules.
//!
//! # Invariants
//! - Every record is identified by a stable UUID and carries its owning user.
//! - Timestamps are Unix epoch milliseconds.
//! - Values held in these structs are always decrypted plaintext.

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

pub mod activity;
pub mod client;
pub mod contact;
pub mod document;
pub mod reminder;

/// Owning user (tenant) identifier.
pub type UserId = Uuid;

/// Returns the current wall clock as epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Field-level validation failure raised before any persistence happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid `{field}`: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub(crate) fn require_text(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }
    Ok(())
}
