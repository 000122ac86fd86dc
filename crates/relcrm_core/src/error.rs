//! Stable error codes shared by every outer surface (HTTP, CLI).
//!
//! Layer-specific error enums map onto these codes; callers branch on the
//! code, never on message text.

use serde::Serialize;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCode {
    #[serde(rename = "ValidationError")]
    Validation,
    #[serde(rename = "NotFoundError")]
    NotFound,
    #[serde(rename = "OwnershipError")]
    Ownership,
    #[serde(rename = "InvalidMergeError")]
    InvalidMerge,
    #[serde(rename = "ConcurrentModificationError")]
    ConcurrentModification,
    #[serde(rename = "DecryptionError")]
    Decryption,
    #[serde(rename = "InternalError")]
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "ValidationError",
            Self::NotFound => "NotFoundError",
            Self::Ownership => "OwnershipError",
            Self::InvalidMerge => "InvalidMergeError",
            Self::ConcurrentModification => "ConcurrentModificationError",
            Self::Decryption => "DecryptionError",
            Self::Internal => "InternalError",
        }
    }

    /// Internal errors carry details that must stay in server logs.
    pub fn is_internal(self) -> bool {
        matches!(self, Self::Internal | Self::Decryption)
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
