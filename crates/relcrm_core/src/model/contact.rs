//! Client contact person.
//!
//! `email`, `phone` and `whatsapp` are PII: persisted only as ciphertext.

use super::client::ClientId;
use super::{now_epoch_ms, require_text, UserId, ValidationError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ContactId = Uuid;

/// Channel the contact prefers to be reached on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferredContact {
    Email,
    Phone,
    Whatsapp,
    #[default]
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContact {
    pub id: ContactId,
    pub client_id: ClientId,
    pub user_id: UserId,
    pub name: String,
    pub role: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub whatsapp: Option<String>,
    pub is_primary: bool,
    pub preferred_contact: PreferredContact,
    pub notes: String,
    pub created_at: i64,
}

impl ClientContact {
    pub fn new(client_id: ClientId, user_id: UserId, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_id,
            user_id,
            name: name.into(),
            role: String::new(),
            email: None,
            phone: None,
            whatsapp: None,
            is_primary: false,
            preferred_contact: PreferredContact::Any,
            notes: String::new(),
            created_at: now_epoch_ms(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("name", &self.name)?;
        if let Some(email) = self.email.as_deref().map(str::trim) {
            if !email.is_empty() && !email.contains('@') {
                return Err(ValidationError::new("email", "must contain `@`"));
            }
        }
        Ok(())
    }
}

/// Caller-supplied contact fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactDraft {
    pub name: String,
    pub role: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub whatsapp: Option<String>,
    pub is_primary: bool,
    pub preferred_contact: PreferredContact,
    pub notes: String,
}

impl ContactDraft {
    pub fn apply_to(self, contact: &mut ClientContact) {
        contact.name = self.name.trim().to_string();
        contact.role = self.role.trim().to_string();
        contact.email = non_blank(self.email);
        contact.phone = non_blank(self.phone);
        contact.whatsapp = non_blank(self.whatsapp);
        contact.is_primary = self.is_primary;
        contact.preferred_contact = self.preferred_contact;
        contact.notes = self.notes;
    }
}

/// Email and phone values are identifiers; surrounding whitespace is noise.
fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}
