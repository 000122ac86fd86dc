//! Client aggregate root.
//!
//! # Invariants
//! - `name` is never blank.
//! - `tags` holds no two values that are equal ignoring case; the first
//!   spelling seen wins.
//! - Empty string means "not set" for every free-text scalar.

use super::activity::ClientActivity;
use super::contact::ClientContact;
use super::document::Document;
use super::reminder::ReminderView;
use super::{now_epoch_ms, require_text, UserId, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Stable client identifier.
pub type ClientId = Uuid;

/// Relationship priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Vip,
}

/// Postal address block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Address {
    pub line: String,
    pub city: String,
    pub region: String,
    pub postal_code: String,
    pub country: String,
}

/// Social profile links.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SocialLinks {
    pub linkedin: String,
    pub twitter: String,
    pub instagram: String,
    pub facebook: String,
}

/// Client row as persisted, without owned sub-entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: ClientId,
    pub user_id: UserId,
    pub name: String,
    pub company_name: String,
    pub notes: String,
    pub industry: String,
    pub company_size: String,
    pub website: String,
    pub budget_range: String,
    pub client_type: String,
    pub source: String,
    pub stage_id: String,
    pub priority: Priority,
    pub tags: Vec<String>,
    pub address: Address,
    pub social: SocialLinks,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_contacted_at: Option<i64>,
    pub next_followup_at: Option<i64>,
}

impl Client {
    /// Creates a client owned by `user_id` with a generated id.
    pub fn new(user_id: UserId, name: impl Into<String>) -> Self {
        let now = now_epoch_ms();
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: name.into(),
            company_name: String::new(),
            notes: String::new(),
            industry: String::new(),
            company_size: String::new(),
            website: String::new(),
            budget_range: String::new(),
            client_type: String::new(),
            source: String::new(),
            stage_id: String::new(),
            priority: Priority::Medium,
            tags: Vec::new(),
            address: Address::default(),
            social: SocialLinks::default(),
            created_at: now,
            updated_at: now,
            last_contacted_at: None,
            next_followup_at: None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("name", &self.name)?;
        if self.tags.iter().any(|tag| tag.trim().is_empty()) {
            return Err(ValidationError::new("tags", "tag values must not be blank"));
        }
        let mut seen = HashSet::new();
        for tag in &self.tags {
            if !seen.insert(tag_key(tag)) {
                return Err(ValidationError::new(
                    "tags",
                    format!("duplicate tag `{tag}` (tags are case-insensitive)"),
                ));
            }
        }
        Ok(())
    }
}

/// Full client aggregate with decrypted sub-entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientAggregate {
    #[serde(flatten)]
    pub client: Client,
    pub contacts: Vec<ClientContact>,
    /// Newest first.
    pub activities: Vec<ClientActivity>,
    pub reminders: Vec<ReminderView>,
    pub documents: Vec<Document>,
}

impl ClientAggregate {
    /// Primary contact, or the earliest contact when none is flagged.
    pub fn primary_contact(&self) -> Option<&ClientContact> {
        self.contacts
            .iter()
            .find(|contact| contact.is_primary)
            .or_else(|| self.contacts.iter().min_by_key(|c| (c.created_at, c.id)))
    }
}

/// Lightweight list projection for client tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSummary {
    pub id: ClientId,
    pub name: String,
    pub company_name: String,
    pub stage_id: String,
    pub priority: Priority,
    pub tags: Vec<String>,
    pub created_at: i64,
    pub last_contacted_at: Option<i64>,
    pub next_followup_at: Option<i64>,
}

impl From<&Client> for ClientSummary {
    fn from(client: &Client) -> Self {
        Self {
            id: client.id,
            name: client.name.clone(),
            company_name: client.company_name.clone(),
            stage_id: client.stage_id.clone(),
            priority: client.priority,
            tags: client.tags.clone(),
            created_at: client.created_at,
            last_contacted_at: client.last_contacted_at,
            next_followup_at: client.next_followup_at,
        }
    }
}

/// Matching projection of one client: the fields the similarity rules read,
/// with contact PII already decrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCandidate {
    pub id: ClientId,
    pub name: String,
    pub company_name: String,
    pub created_at: i64,
    /// Every contact email, primary first.
    pub emails: Vec<String>,
    pub primary_email: Option<String>,
    pub primary_phone: Option<String>,
}

impl MatchCandidate {
    /// Bare candidate without contact data.
    pub fn named(id: ClientId, name: impl Into<String>, created_at: i64) -> Self {
        Self {
            id,
            name: name.into(),
            company_name: String::new(),
            created_at,
            emails: Vec::new(),
            primary_email: None,
            primary_phone: None,
        }
    }
}

/// Caller-supplied client fields for create and full-replace update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientDraft {
    pub name: String,
    pub company_name: String,
    pub notes: String,
    pub industry: String,
    pub company_size: String,
    pub website: String,
    pub budget_range: String,
    pub client_type: String,
    pub source: String,
    pub stage_id: String,
    pub priority: Option<Priority>,
    pub tags: Vec<String>,
    pub address: Address,
    pub social: SocialLinks,
    pub last_contacted_at: Option<i64>,
    pub next_followup_at: Option<i64>,
}

impl ClientDraft {
    /// Copies draft values onto `client`, normalizing tags.
    pub fn apply_to(self, client: &mut Client) {
        client.name = self.name.trim().to_string();
        client.company_name = self.company_name.trim().to_string();
        client.notes = self.notes;
        client.industry = self.industry.trim().to_string();
        client.company_size = self.company_size.trim().to_string();
        client.website = self.website.trim().to_string();
        client.budget_range = self.budget_range.trim().to_string();
        client.client_type = self.client_type.trim().to_string();
        client.source = self.source.trim().to_string();
        client.stage_id = self.stage_id.trim().to_string();
        client.priority = self.priority.unwrap_or_default();
        client.tags = normalize_tags(&self.tags);
        client.address = self.address;
        client.social = self.social;
        client.last_contacted_at = self.last_contacted_at;
        client.next_followup_at = self.next_followup_at;
    }
}

/// Case-insensitive identity of a tag.
pub fn tag_key(tag: &str) -> String {
    tag.trim().to_lowercase()
}

/// Trims tags, drops blanks and removes case-insensitive duplicates while
/// keeping first-seen order and spelling.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(tags.len());
    for tag in tags {
        let trimmed = tag.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(tag_key(trimmed)) {
            unique.push(trimmed.to_string());
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::{normalize_tags, Client, ClientDraft, Priority};
    use uuid::Uuid;

    #[test]
    fn normalize_tags_dedups_ignoring_case_and_keeps_first_spelling() {
        let tags = vec![
            " VIP ".to_string(),
            "vip".to_string(),
            "".to_string(),
            "Retail".to_string(),
        ];
        assert_eq!(normalize_tags(&tags), vec!["VIP", "Retail"]);
    }

    #[test]
    fn validate_rejects_blank_name_and_duplicate_tags() {
        let mut client = Client::new(Uuid::new_v4(), "   ");
        assert_eq!(client.validate().unwrap_err().field, "name");

        client.name = "Acme".to_string();
        client.tags = vec!["a".to_string(), "A".to_string()];
        assert_eq!(client.validate().unwrap_err().field, "tags");
    }

    #[test]
    fn draft_defaults_priority_to_medium() {
        let mut client = Client::new(Uuid::new_v4(), "x");
        client.priority = Priority::Vip;
        ClientDraft {
            name: " Acme ".to_string(),
            ..ClientDraft::default()
        }
        .apply_to(&mut client);
        assert_eq!(client.name, "Acme");
        assert_eq!(client.priority, Priority::Medium);
    }
}
