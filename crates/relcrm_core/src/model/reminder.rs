//! Due-date reminders attached to a client.
//!
//! Overdue state is derived from `remind_at` and `completed_at` at read
//! time and never stored.

use super::client::ClientId;
use super::{now_epoch_ms, require_text, UserId, ValidationError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ReminderId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientReminder {
    pub id: ReminderId,
    pub client_id: ClientId,
    pub user_id: UserId,
    pub title: String,
    pub description: String,
    pub remind_at: i64,
    pub completed_at: Option<i64>,
    pub created_at: i64,
}

impl ClientReminder {
    pub fn new(
        client_id: ClientId,
        user_id: UserId,
        title: impl Into<String>,
        remind_at: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_id,
            user_id,
            title: title.into(),
            description: String::new(),
            remind_at,
            completed_at: None,
            created_at: now_epoch_ms(),
        }
    }

    /// `remind_at < now && completed_at == null`.
    pub fn is_overdue_at(&self, now_ms: i64) -> bool {
        self.completed_at.is_none() && self.remind_at < now_ms
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("title", &self.title)?;
        if self.remind_at <= 0 {
            return Err(ValidationError::new("remindAt", "must be a positive epoch-ms value"));
        }
        Ok(())
    }
}

/// Reminder plus its derived overdue flag, as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderView {
    #[serde(flatten)]
    pub reminder: ClientReminder,
    pub overdue: bool,
}

impl ReminderView {
    pub fn at(reminder: ClientReminder, now_ms: i64) -> Self {
        let overdue = reminder.is_overdue_at(now_ms);
        Self { reminder, overdue }
    }
}

/// Caller-supplied reminder fields.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub remind_at: i64,
}
