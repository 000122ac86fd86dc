//! Document metadata owned by a client. File bytes live in external storage
//! addressed by `storage_key`.

use super::client::ClientId;
use super::{now_epoch_ms, require_text, UserId, ValidationError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type DocumentId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: DocumentId,
    pub client_id: ClientId,
    pub user_id: UserId,
    pub file_type: String,
    pub file_size: u64,
    pub original_name: String,
    pub storage_key: String,
    pub created_at: i64,
}

impl Document {
    pub fn new(client_id: ClientId, user_id: UserId, draft: DocumentDraft) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_id,
            user_id,
            file_type: draft.file_type.trim().to_string(),
            file_size: draft.file_size,
            original_name: draft.original_name.trim().to_string(),
            storage_key: draft.storage_key.trim().to_string(),
            created_at: now_epoch_ms(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("originalName", &self.original_name)?;
        require_text("storageKey", &self.storage_key)?;
        require_text("fileType", &self.file_type)?;
        if i64::try_from(self.file_size).is_err() {
            return Err(ValidationError::new("fileSize", "exceeds storable range"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDraft {
    pub file_type: String,
    pub file_size: u64,
    pub original_name: String,
    pub storage_key: String,
}
