//! Append-only client activity log entries.
//!
//! # Invariants
//! - Activities are never edited after insert; only their `client_id` moves
//!   when the owning client is merged into another.
//! - `content` is PII and persisted only as ciphertext.
//! - Structured metadata must agree with the activity type.

use super::client::ClientId;
use super::{now_epoch_ms, require_text, UserId, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub type ActivityId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Note,
    Call,
    Email,
    Meeting,
    Message,
    StageChange,
    Updated,
    Reminder,
    Other,
}

impl ActivityType {
    pub const ALL: [ActivityType; 9] = [
        ActivityType::Note,
        ActivityType::Call,
        ActivityType::Email,
        ActivityType::Meeting,
        ActivityType::Message,
        ActivityType::StageChange,
        ActivityType::Updated,
        ActivityType::Reminder,
        ActivityType::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Call => "call",
            Self::Email => "email",
            Self::Meeting => "meeting",
            Self::Message => "message",
            Self::StageChange => "stage_change",
            Self::Updated => "updated",
            Self::Reminder => "reminder",
            Self::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

/// Typed metadata per activity kind, with an opaque fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityMetadata {
    #[serde(rename_all = "camelCase")]
    StageChange {
        old_stage_id: String,
        new_stage_id: String,
    },
    /// Audit record written on the keeper by a merge.
    #[serde(rename_all = "camelCase")]
    Merge {
        merged_from_id: ClientId,
        merged_from_name: String,
    },
    #[serde(rename_all = "camelCase")]
    Call {
        duration_minutes: Option<u32>,
        outcome: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Meeting {
        starts_at: Option<i64>,
        location: Option<String>,
    },
    Email {
        subject: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Reminder {
        reminder_id: Uuid,
    },
    Opaque {
        fields: Map<String, Value>,
    },
}

impl ActivityMetadata {
    /// Returns whether this metadata shape may be attached to `kind`.
    pub fn fits(&self, kind: ActivityType) -> bool {
        match self {
            Self::StageChange { .. } => kind == ActivityType::StageChange,
            Self::Merge { .. } => kind == ActivityType::Updated,
            Self::Call { .. } => kind == ActivityType::Call,
            Self::Meeting { .. } => kind == ActivityType::Meeting,
            Self::Email { .. } => kind == ActivityType::Email,
            Self::Reminder { .. } => kind == ActivityType::Reminder,
            Self::Opaque { .. } => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientActivity {
    pub id: ActivityId,
    pub client_id: ClientId,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    pub title: String,
    pub content: String,
    pub metadata: Option<ActivityMetadata>,
    pub created_at: i64,
}

impl ClientActivity {
    pub fn new(
        client_id: ClientId,
        user_id: UserId,
        kind: ActivityType,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_id,
            user_id,
            kind,
            title: title.into(),
            content: String::new(),
            metadata: None,
            created_at: now_epoch_ms(),
        }
    }

    /// Audit entry recording that `loser` was absorbed into `keeper_id`.
    pub fn merge_record(
        keeper_id: ClientId,
        user_id: UserId,
        merged_from_id: ClientId,
        merged_from_name: &str,
    ) -> Self {
        let mut activity = Self::new(
            keeper_id,
            user_id,
            ActivityType::Updated,
            format!("Merged duplicate client \"{merged_from_name}\""),
        );
        activity.metadata = Some(ActivityMetadata::Merge {
            merged_from_id,
            merged_from_name: merged_from_name.to_string(),
        });
        activity
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("title", &self.title)?;
        if let Some(metadata) = &self.metadata {
            if !metadata.fits(self.kind) {
                return Err(ValidationError::new(
                    "metadata",
                    format!("metadata does not match activity type `{}`", self.kind.as_str()),
                ));
            }
        }
        Ok(())
    }
}

/// Caller-supplied activity fields.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityDraft {
    #[serde(rename = "type")]
    pub kind: ActivityType,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub metadata: Option<ActivityMetadata>,
}

#[cfg(test)]
mod tests {
    use super::{ActivityMetadata, ActivityType, ClientActivity};
    use uuid::Uuid;

    #[test]
    fn merge_metadata_serializes_with_camel_case_fields() {
        let from = Uuid::nil();
        let value = serde_json::to_value(ActivityMetadata::Merge {
            merged_from_id: from,
            merged_from_name: "Acme".to_string(),
        })
        .unwrap();
        assert_eq!(value["kind"], "merge");
        assert_eq!(value["mergedFromId"], from.to_string());
        assert_eq!(value["mergedFromName"], "Acme");
    }

    #[test]
    fn mismatched_metadata_fails_validation() {
        let mut activity =
            ClientActivity::new(Uuid::new_v4(), Uuid::new_v4(), ActivityType::Note, "hi");
        activity.metadata = Some(ActivityMetadata::StageChange {
            old_stage_id: "lead".to_string(),
            new_stage_id: "won".to_string(),
        });
        assert_eq!(activity.validate().unwrap_err().field, "metadata");
    }

    #[test]
    fn activity_type_parses_every_db_value() {
        for kind in ActivityType::ALL {
            assert_eq!(ActivityType::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ActivityType::parse("unknown"), None);
    }
}
