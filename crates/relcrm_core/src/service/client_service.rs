//! Client use-case service.
//!
//! # Responsibility
//! - Turn caller drafts into validated domain records and persist them.
//! - Append timeline entries that follow from client edits (stage moves,
//!   touch points).
//! - Return read-back aggregates so callers always see persisted state.
//!
//! # Invariants
//! - Every call is scoped to the repository owner.
//! - Logging a call/email/meeting/message moves `last_contacted_at`
//!   forward, never backward.

use crate::error::ErrorCode;
use crate::model::activity::{ActivityDraft, ActivityMetadata, ActivityType, ClientActivity};
use crate::model::client::{Client, ClientAggregate, ClientDraft, ClientId, ClientSummary};
use crate::model::contact::{ClientContact, ContactDraft, ContactId};
use crate::model::document::{Document, DocumentDraft, DocumentId};
use crate::model::reminder::{ClientReminder, ReminderDraft, ReminderId, ReminderView};
use crate::model::now_epoch_ms;
use crate::repo::client_repo::ClientListQuery;
use crate::repo::{CrmRepository, RepoError};
use log::info;
use thiserror::Error;

/// Service error for client use-cases.
#[derive(Debug, Error)]
pub enum ClientServiceError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    /// Internal consistency mismatch between write and read-back.
    #[error("inconsistent client state: {0}")]
    InconsistentState(&'static str),
}

impl ClientServiceError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Repo(err) => err.code(),
            Self::InconsistentState(_) => ErrorCode::Internal,
        }
    }
}

pub type ClientServiceResult<T> = Result<T, ClientServiceError>;

/// Client service facade over repository implementations.
pub struct ClientService<R: CrmRepository> {
    repo: R,
}

impl<R: CrmRepository> ClientService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub fn create_client(&self, draft: ClientDraft) -> ClientServiceResult<ClientAggregate> {
        let mut client = Client::new(self.repo.owner(), String::new());
        draft.apply_to(&mut client);
        let id = self.repo.create_client(&client)?;
        info!("event=client_create module=service status=ok client_id={id}");
        Ok(self.repo.get_client(id)?)
    }

    pub fn get_client(&self, id: ClientId) -> ClientServiceResult<ClientAggregate> {
        Ok(self.repo.get_client(id)?)
    }

    pub fn list_clients(&self, query: &ClientListQuery) -> ClientServiceResult<Vec<ClientSummary>> {
        Ok(self.repo.list_clients(query)?)
    }

    /// Full-replace update. A changed `stage_id` appends a `stage_change`
    /// activity.
    pub fn update_client(
        &self,
        id: ClientId,
        draft: ClientDraft,
    ) -> ClientServiceResult<ClientAggregate> {
        let mut client = self.repo.get_client_row(id)?;
        let old_stage = client.stage_id.clone();
        draft.apply_to(&mut client);
        self.repo.update_client(&client)?;

        if client.stage_id != old_stage {
            let mut activity = ClientActivity::new(
                id,
                self.repo.owner(),
                ActivityType::StageChange,
                "Stage changed",
            );
            activity.metadata = Some(ActivityMetadata::StageChange {
                old_stage_id: old_stage,
                new_stage_id: client.stage_id.clone(),
            });
            self.repo.append_activity(&activity)?;
        }
        Ok(self.repo.get_client(id)?)
    }

    pub fn delete_client(&self, id: ClientId) -> ClientServiceResult<()> {
        self.repo.delete_client(id)?;
        info!("event=client_delete module=service status=ok client_id={id}");
        Ok(())
    }

    pub fn add_contact(
        &self,
        client_id: ClientId,
        draft: ContactDraft,
    ) -> ClientServiceResult<ClientContact> {
        let mut contact = ClientContact::new(client_id, self.repo.owner(), String::new());
        draft.apply_to(&mut contact);
        let id = self.repo.create_contact(&contact)?;
        Ok(self.repo.get_contact(id)?)
    }

    pub fn update_contact(
        &self,
        id: ContactId,
        draft: ContactDraft,
    ) -> ClientServiceResult<ClientContact> {
        let mut contact = self.repo.get_contact(id)?;
        draft.apply_to(&mut contact);
        self.repo.update_contact(&contact)?;
        Ok(self.repo.get_contact(id)?)
    }

    pub fn delete_contact(&self, id: ContactId) -> ClientServiceResult<()> {
        Ok(self.repo.delete_contact(id)?)
    }

    pub fn list_contacts(&self, client_id: ClientId) -> ClientServiceResult<Vec<ClientContact>> {
        Ok(self.repo.list_contacts(client_id)?)
    }

    pub fn log_activity(
        &self,
        client_id: ClientId,
        draft: ActivityDraft,
    ) -> ClientServiceResult<ClientActivity> {
        let mut activity = ClientActivity::new(client_id, self.repo.owner(), draft.kind, draft.title);
        activity.content = draft.content;
        activity.metadata = draft.metadata;
        self.repo.append_activity(&activity)?;

        if is_touch_point(activity.kind) {
            let mut client = self.repo.get_client_row(client_id)?;
            if client.last_contacted_at.map_or(true, |at| at < activity.created_at) {
                client.last_contacted_at = Some(activity.created_at);
                self.repo.update_client(&client)?;
            }
        }

        self.repo
            .list_activities(client_id, None)?
            .into_iter()
            .find(|stored| stored.id == activity.id)
            .ok_or(ClientServiceError::InconsistentState(
                "appended activity not found in read-back",
            ))
    }

    pub fn list_activities(
        &self,
        client_id: ClientId,
        limit: Option<u32>,
    ) -> ClientServiceResult<Vec<ClientActivity>> {
        Ok(self.repo.list_activities(client_id, limit)?)
    }

    pub fn add_reminder(
        &self,
        client_id: ClientId,
        draft: ReminderDraft,
    ) -> ClientServiceResult<ReminderView> {
        let mut reminder =
            ClientReminder::new(client_id, self.repo.owner(), draft.title.trim(), draft.remind_at);
        reminder.description = draft.description;
        let id = self.repo.create_reminder(&reminder)?;
        self.reminder_view(id)
    }

    pub fn update_reminder(
        &self,
        id: ReminderId,
        draft: ReminderDraft,
    ) -> ClientServiceResult<ReminderView> {
        let mut reminder = self.repo.get_reminder(id)?;
        reminder.title = draft.title.trim().to_string();
        reminder.description = draft.description;
        reminder.remind_at = draft.remind_at;
        self.repo.update_reminder(&reminder)?;
        self.reminder_view(id)
    }

    pub fn complete_reminder(&self, id: ReminderId) -> ClientServiceResult<ReminderView> {
        let now = now_epoch_ms();
        let reminder = self.repo.complete_reminder(id, now)?;
        Ok(ReminderView::at(reminder, now))
    }

    pub fn delete_reminder(&self, id: ReminderId) -> ClientServiceResult<()> {
        Ok(self.repo.delete_reminder(id)?)
    }

    pub fn list_reminders(&self, client_id: ClientId) -> ClientServiceResult<Vec<ReminderView>> {
        Ok(self.repo.list_reminders(client_id)?)
    }

    pub fn add_document(
        &self,
        client_id: ClientId,
        draft: DocumentDraft,
    ) -> ClientServiceResult<Document> {
        let document = Document::new(client_id, self.repo.owner(), draft);
        self.repo.create_document(&document)?;
        self.repo
            .list_documents(client_id)?
            .into_iter()
            .find(|stored| stored.id == document.id)
            .ok_or(ClientServiceError::InconsistentState(
                "created document not found in read-back",
            ))
    }

    pub fn delete_document(&self, id: DocumentId) -> ClientServiceResult<()> {
        Ok(self.repo.delete_document(id)?)
    }

    pub fn list_documents(&self, client_id: ClientId) -> ClientServiceResult<Vec<Document>> {
        Ok(self.repo.list_documents(client_id)?)
    }

    fn reminder_view(&self, id: ReminderId) -> ClientServiceResult<ReminderView> {
        let reminder = self.repo.get_reminder(id)?;
        Ok(ReminderView::at(reminder, now_epoch_ms()))
    }
}

fn is_touch_point(kind: ActivityType) -> bool {
    matches!(
        kind,
        ActivityType::Call | ActivityType::Email | ActivityType::Meeting | ActivityType::Message
    )
}
