//! Atomic merge of two client aggregates.
//!
//! # Responsibility
//! - Fold a loser client into a keeper: move every owned sub-entity,
//!   combine scalar fields, record an audit activity, delete the loser.
//!
//! # Invariants
//! - The whole merge runs in one `BEGIN IMMEDIATE` transaction; any failure
//!   leaves the database exactly as it was.
//! - Both rows are re-read inside the transaction, so the second of two
//!   racing merges sees `NotFound` instead of acting on stale data.
//! - The keeper ends with at most one primary contact; when both sides had
//!   one, the keeper's wins.
//! - Keeper scalar values win; loser values fill only empty keeper fields.

use crate::codec::FieldCodec;
use crate::error::ErrorCode;
use crate::model::activity::{ActivityId, ClientActivity};
use crate::model::client::{normalize_tags, Address, Client, ClientId, SocialLinks};
use crate::model::UserId;
use crate::repo::activity_repo::ActivityRepository;
use crate::repo::client_repo::{ClientRepository, SqliteClientRepository};
use crate::repo::contact_repo::ContactRepository;
use crate::repo::{EntityKind, RepoError};
use log::{info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separator placed between keeper and loser notes.
pub const NOTES_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("invalid merge: {0}")]
    InvalidMerge(&'static str),
    /// Another writer held the database lock past the configured wait.
    #[error("merge could not acquire the write lock in time")]
    ConcurrentModification,
    #[error(transparent)]
    Repo(RepoError),
}

impl MergeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidMerge(_) => ErrorCode::InvalidMerge,
            Self::ConcurrentModification => ErrorCode::ConcurrentModification,
            Self::Repo(err) => err.code(),
        }
    }
}

impl From<RepoError> for MergeError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::LockTimeout => Self::ConcurrentModification,
            other => Self::Repo(other),
        }
    }
}

impl From<rusqlite::Error> for MergeError {
    fn from(value: rusqlite::Error) -> Self {
        RepoError::from(value).into()
    }
}

/// Merge request as received from callers.
///
/// A missing id decodes as the nil UUID so [`MergeCoordinator::merge`]
/// reports it as an invalid merge rather than a malformed body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MergeRequest {
    pub keep_id: ClientId,
    pub lose_id: ClientId,
}

/// Rows moved from loser to keeper, per entity type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MovedCounts {
    pub contacts: usize,
    pub activities: usize,
    pub reminders: usize,
    pub documents: usize,
}

impl MovedCounts {
    fn record(&mut self, entity: EntityKind, moved: usize) {
        match entity {
            EntityKind::Contact => self.contacts = moved,
            EntityKind::Activity => self.activities = moved,
            EntityKind::Reminder => self.reminders = moved,
            EntityKind::Document => self.documents = moved,
            EntityKind::Client => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome {
    pub keeper_id: ClientId,
    pub merged_from_id: ClientId,
    pub merged_from_name: String,
    pub moved: MovedCounts,
    pub audit_activity_id: ActivityId,
}

/// Computes the keeper's post-merge row. Pure; touches no storage.
pub fn plan_merge(keeper: &Client, loser: &Client) -> Client {
    let mut merged = keeper.clone();

    let mut tags = keeper.tags.clone();
    tags.extend(loser.tags.iter().cloned());
    merged.tags = normalize_tags(&tags);

    merged.notes = merge_notes(&keeper.notes, &loser.notes);

    merged.company_name = prefer_keeper(&keeper.company_name, &loser.company_name);
    merged.industry = prefer_keeper(&keeper.industry, &loser.industry);
    merged.company_size = prefer_keeper(&keeper.company_size, &loser.company_size);
    merged.website = prefer_keeper(&keeper.website, &loser.website);
    merged.budget_range = prefer_keeper(&keeper.budget_range, &loser.budget_range);
    merged.client_type = prefer_keeper(&keeper.client_type, &loser.client_type);
    merged.source = prefer_keeper(&keeper.source, &loser.source);
    merged.stage_id = prefer_keeper(&keeper.stage_id, &loser.stage_id);
    merged.address = merge_address(&keeper.address, &loser.address);
    merged.social = merge_social(&keeper.social, &loser.social);

    merged.last_contacted_at = keeper.last_contacted_at.max(loser.last_contacted_at);
    merged.next_followup_at = match (keeper.next_followup_at, loser.next_followup_at) {
        (Some(left), Some(right)) => Some(left.min(right)),
        (left, right) => left.or(right),
    };
    merged
}

fn prefer_keeper(keeper: &str, loser: &str) -> String {
    if keeper.trim().is_empty() {
        loser.to_string()
    } else {
        keeper.to_string()
    }
}

fn merge_notes(keeper: &str, loser: &str) -> String {
    match (keeper.trim().is_empty(), loser.trim().is_empty()) {
        (false, false) => format!("{keeper}{NOTES_SEPARATOR}{loser}"),
        (true, false) => loser.to_string(),
        _ => keeper.to_string(),
    }
}

fn merge_address(keeper: &Address, loser: &Address) -> Address {
    Address {
        line: prefer_keeper(&keeper.line, &loser.line),
        city: prefer_keeper(&keeper.city, &loser.city),
        region: prefer_keeper(&keeper.region, &loser.region),
        postal_code: prefer_keeper(&keeper.postal_code, &loser.postal_code),
        country: prefer_keeper(&keeper.country, &loser.country),
    }
}

fn merge_social(keeper: &SocialLinks, loser: &SocialLinks) -> SocialLinks {
    SocialLinks {
        linkedin: prefer_keeper(&keeper.linkedin, &loser.linkedin),
        twitter: prefer_keeper(&keeper.twitter, &loser.twitter),
        instagram: prefer_keeper(&keeper.instagram, &loser.instagram),
        facebook: prefer_keeper(&keeper.facebook, &loser.facebook),
    }
}

/// Runs merges for one owner over one connection.
pub struct MergeCoordinator<'a> {
    conn: &'a Connection,
    owner: UserId,
    codec: &'a FieldCodec,
}

impl<'a> MergeCoordinator<'a> {
    pub fn new(conn: &'a Connection, owner: UserId, codec: &'a FieldCodec) -> Self {
        Self { conn, owner, codec }
    }

    /// Folds `lose_id` into `keep_id`.
    ///
    /// # Errors
    /// - `InvalidMerge` for nil or identical ids.
    /// - `NotFound`/`Ownership` when either client is missing or foreign,
    ///   including a repeat of an already-applied merge.
    /// - `ConcurrentModification` when the write lock wait times out.
    pub fn merge(&self, keep_id: ClientId, lose_id: ClientId) -> Result<MergeOutcome, MergeError> {
        if keep_id.is_nil() || lose_id.is_nil() {
            return Err(MergeError::InvalidMerge("keepId and loseId are required"));
        }
        if keep_id == lose_id {
            return Err(MergeError::InvalidMerge("cannot merge a client into itself"));
        }

        let result = self.merge_in_transaction(keep_id, lose_id);
        match &result {
            Ok(outcome) => info!(
                "event=client_merge module=service status=ok keeper_id={} loser_id={} contacts={} activities={} reminders={} documents={}",
                keep_id,
                lose_id,
                outcome.moved.contacts,
                outcome.moved.activities,
                outcome.moved.reminders,
                outcome.moved.documents
            ),
            Err(err) => warn!(
                "event=client_merge module=service status=error keeper_id={} loser_id={} code={} error={}",
                keep_id,
                lose_id,
                err.code(),
                err
            ),
        }
        result
    }

    fn merge_in_transaction(
        &self,
        keep_id: ClientId,
        lose_id: ClientId,
    ) -> Result<MergeOutcome, MergeError> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let repo = SqliteClientRepository::new(&tx, self.owner, self.codec);

        let keeper = repo.get_client_row(keep_id)?;
        let loser = repo.get_client_row(lose_id)?;

        // The partial unique index allows one primary per client, so the
        // loser's flag has to go before its contacts move.
        if repo.primary_contact_id(keep_id)?.is_some() {
            repo.clear_primary(lose_id)?;
        }

        let mut moved = MovedCounts::default();
        for entity in EntityKind::OWNED {
            let count = repo.reassign_all(entity, lose_id, keep_id)?;
            moved.record(entity, count);
        }

        let merged = plan_merge(&keeper, &loser);
        repo.update_client(&merged)?;

        let audit = ClientActivity::merge_record(keep_id, self.owner, lose_id, &loser.name);
        repo.append_activity(&audit)?;
        repo.delete_client(lose_id)?;

        tx.commit()?;
        Ok(MergeOutcome {
            keeper_id: keep_id,
            merged_from_id: lose_id,
            merged_from_name: loser.name,
            moved,
            audit_activity_id: audit.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{plan_merge, MergeRequest, NOTES_SEPARATOR};
    use crate::model::client::Client;
    use uuid::Uuid;

    fn pair() -> (Client, Client) {
        let user = Uuid::new_v4();
        (Client::new(user, "Keeper"), Client::new(user, "Loser"))
    }

    #[test]
    fn missing_request_ids_decode_as_nil() {
        let keep = Uuid::new_v4();
        let request: MergeRequest =
            serde_json::from_value(serde_json::json!({ "keepId": keep })).unwrap();
        assert_eq!(request.keep_id, keep);
        assert!(request.lose_id.is_nil());
    }

    #[test]
    fn keeper_scalars_win_and_loser_fills_gaps() {
        let (mut keeper, mut loser) = pair();
        keeper.industry = "Tech".to_string();
        loser.industry = "Retail".to_string();
        loser.website = "https://loser.example".to_string();
        loser.address.city = "Jakarta".to_string();

        let merged = plan_merge(&keeper, &loser);
        assert_eq!(merged.industry, "Tech");
        assert_eq!(merged.website, "https://loser.example");
        assert_eq!(merged.address.city, "Jakarta");
        assert_eq!(merged.name, "Keeper");

        keeper.industry.clear();
        assert_eq!(plan_merge(&keeper, &loser).industry, "Retail");
    }

    #[test]
    fn tags_union_without_case_duplicates() {
        let (mut keeper, mut loser) = pair();
        keeper.tags = vec!["VIP".to_string(), "retail".to_string()];
        loser.tags = vec!["vip".to_string(), "Wholesale".to_string()];
        let merged = plan_merge(&keeper, &loser);
        assert_eq!(merged.tags, vec!["VIP", "retail", "Wholesale"]);
    }

    #[test]
    fn notes_concatenate_only_when_both_present() {
        let (mut keeper, mut loser) = pair();
        keeper.notes = "first".to_string();
        loser.notes = "second".to_string();
        assert_eq!(
            plan_merge(&keeper, &loser).notes,
            format!("first{NOTES_SEPARATOR}second")
        );
        keeper.notes.clear();
        assert_eq!(plan_merge(&keeper, &loser).notes, "second");
    }

    #[test]
    fn contact_dates_take_latest_touch_and_earliest_followup() {
        let (mut keeper, mut loser) = pair();
        keeper.last_contacted_at = Some(100);
        loser.last_contacted_at = Some(200);
        keeper.next_followup_at = None;
        loser.next_followup_at = Some(500);
        let merged = plan_merge(&keeper, &loser);
        assert_eq!(merged.last_contacted_at, Some(200));
        assert_eq!(merged.next_followup_at, Some(500));

        keeper.next_followup_at = Some(300);
        assert_eq!(plan_merge(&keeper, &loser).next_followup_at, Some(300));
    }
}
