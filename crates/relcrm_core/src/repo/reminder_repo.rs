//! Reminder persistence. Overdue flags are computed by callers from
//! `remind_at` and `completed_at`; nothing derived is stored.

use super::client_repo::SqliteClientRepository;
use super::{parse_uuid, EntityKind, RepoError, RepoResult};
use crate::model::client::ClientId;
use crate::model::reminder::{ClientReminder, ReminderId, ReminderView};
use crate::model::{now_epoch_ms, ValidationError};
use rusqlite::{params, Row};

const REMINDER_SELECT_SQL: &str = "SELECT
    id,
    client_id,
    user_id,
    title,
    description,
    remind_at,
    completed_at,
    created_at
FROM client_reminders";

pub trait ReminderRepository {
    fn create_reminder(&self, reminder: &ClientReminder) -> RepoResult<ReminderId>;
    fn update_reminder(&self, reminder: &ClientReminder) -> RepoResult<()>;
    /// Marks the reminder done at `completed_at`; completing twice keeps
    /// the first timestamp.
    fn complete_reminder(&self, id: ReminderId, completed_at: i64) -> RepoResult<ClientReminder>;
    fn delete_reminder(&self, id: ReminderId) -> RepoResult<()>;
    fn get_reminder(&self, id: ReminderId) -> RepoResult<ClientReminder>;
    /// Ordered by `remind_at` ascending, each with its overdue flag.
    fn list_reminders(&self, client_id: ClientId) -> RepoResult<Vec<ReminderView>>;
    /// Open reminders for the owner due before `until_ms`, oldest first.
    fn list_open_reminders(&self, until_ms: i64, limit: u32) -> RepoResult<Vec<ReminderView>>;
}

impl ReminderRepository for SqliteClientRepository<'_> {
    fn create_reminder(&self, reminder: &ClientReminder) -> RepoResult<ReminderId> {
        reminder.validate()?;
        self.ensure_access(EntityKind::Client, reminder.client_id)?;
        if reminder.user_id != self.owner {
            return Err(RepoError::Ownership {
                entity: EntityKind::Reminder,
                id: reminder.id,
            });
        }
        self.conn.execute(
            "INSERT INTO client_reminders (
                id, client_id, user_id, title, description, remind_at, completed_at, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                reminder.id.to_string(),
                reminder.client_id.to_string(),
                self.owner.to_string(),
                reminder.title.trim(),
                reminder.description.as_str(),
                reminder.remind_at,
                reminder.completed_at,
                reminder.created_at,
            ],
        )?;
        Ok(reminder.id)
    }

    fn update_reminder(&self, reminder: &ClientReminder) -> RepoResult<()> {
        reminder.validate()?;
        let current_client = self.ensure_access(EntityKind::Reminder, reminder.id)?;
        if current_client != reminder.client_id {
            return Err(ValidationError::new(
                "clientId",
                "reminders move between clients only through merge",
            )
            .into());
        }
        self.conn.execute(
            "UPDATE client_reminders
             SET title = ?3, description = ?4, remind_at = ?5, completed_at = ?6
             WHERE id = ?1 AND user_id = ?2;",
            params![
                reminder.id.to_string(),
                self.owner.to_string(),
                reminder.title.trim(),
                reminder.description.as_str(),
                reminder.remind_at,
                reminder.completed_at,
            ],
        )?;
        Ok(())
    }

    fn complete_reminder(&self, id: ReminderId, completed_at: i64) -> RepoResult<ClientReminder> {
        self.ensure_access(EntityKind::Reminder, id)?;
        self.conn.execute(
            "UPDATE client_reminders SET completed_at = ?3
             WHERE id = ?1 AND user_id = ?2 AND completed_at IS NULL;",
            params![id.to_string(), self.owner.to_string(), completed_at],
        )?;
        self.get_reminder(id)
    }

    fn delete_reminder(&self, id: ReminderId) -> RepoResult<()> {
        self.ensure_access(EntityKind::Reminder, id)?;
        self.conn.execute(
            "DELETE FROM client_reminders WHERE id = ?1 AND user_id = ?2;",
            params![id.to_string(), self.owner.to_string()],
        )?;
        Ok(())
    }

    fn get_reminder(&self, id: ReminderId) -> RepoResult<ClientReminder> {
        self.ensure_access(EntityKind::Reminder, id)?;
        let mut stmt = self.conn.prepare(&format!(
            "{REMINDER_SELECT_SQL} WHERE id = ?1 AND user_id = ?2;"
        ))?;
        let mut rows = stmt.query(params![id.to_string(), self.owner.to_string()])?;
        if let Some(row) = rows.next()? {
            return parse_reminder_row(row);
        }
        Err(RepoError::NotFound {
            entity: EntityKind::Reminder,
            id,
        })
    }

    fn list_reminders(&self, client_id: ClientId) -> RepoResult<Vec<ReminderView>> {
        self.ensure_access(EntityKind::Client, client_id)?;
        let mut stmt = self.conn.prepare(&format!(
            "{REMINDER_SELECT_SQL}
             WHERE client_id = ?1 AND user_id = ?2
             ORDER BY remind_at ASC, id ASC;"
        ))?;
        let mut rows = stmt.query(params![client_id.to_string(), self.owner.to_string()])?;
        let now = now_epoch_ms();
        let mut reminders = Vec::new();
        while let Some(row) = rows.next()? {
            reminders.push(ReminderView::at(parse_reminder_row(row)?, now));
        }
        Ok(reminders)
    }

    fn list_open_reminders(&self, until_ms: i64, limit: u32) -> RepoResult<Vec<ReminderView>> {
        let mut stmt = self.conn.prepare(&format!(
            "{REMINDER_SELECT_SQL}
             WHERE user_id = ?1 AND completed_at IS NULL AND remind_at < ?2
             ORDER BY remind_at ASC, id ASC
             LIMIT ?3;"
        ))?;
        let mut rows = stmt.query(params![
            self.owner.to_string(),
            until_ms,
            i64::from(limit)
        ])?;
        let now = now_epoch_ms();
        let mut reminders = Vec::new();
        while let Some(row) = rows.next()? {
            reminders.push(ReminderView::at(parse_reminder_row(row)?, now));
        }
        Ok(reminders)
    }
}

fn parse_reminder_row(row: &Row<'_>) -> RepoResult<ClientReminder> {
    let id_text: String = row.get("id")?;
    let client_text: String = row.get("client_id")?;
    let user_text: String = row.get("user_id")?;
    Ok(ClientReminder {
        id: parse_uuid(&id_text, "client_reminders.id")?,
        client_id: parse_uuid(&client_text, "client_reminders.client_id")?,
        user_id: parse_uuid(&user_text, "client_reminders.user_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        remind_at: row.get("remind_at")?,
        completed_at: row.get("completed_at")?,
        created_at: row.get("created_at")?,
    })
}
