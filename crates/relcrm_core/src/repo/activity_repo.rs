//! Append-only activity persistence.
//!
//! There is no update or delete path: rows only change `client_id`, and
//! only through merge reassignment.

use super::client_repo::SqliteClientRepository;
use super::{decrypt_or_redact, parse_uuid, EntityKind, RepoError, RepoResult};
use crate::model::activity::{ActivityId, ActivityMetadata, ActivityType, ClientActivity};
use crate::model::client::ClientId;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Row};
use std::collections::BTreeMap;

pub trait ActivityRepository {
    fn append_activity(&self, activity: &ClientActivity) -> RepoResult<ActivityId>;
    /// Newest first; `limit` of `None` returns the full history.
    fn list_activities(
        &self,
        client_id: ClientId,
        limit: Option<u32>,
    ) -> RepoResult<Vec<ClientActivity>>;
    /// Counts the owner's activities created at or after `since_ms`.
    fn count_activities_by_type(&self, since_ms: i64) -> RepoResult<BTreeMap<ActivityType, u64>>;
}

impl ActivityRepository for SqliteClientRepository<'_> {
    fn append_activity(&self, activity: &ClientActivity) -> RepoResult<ActivityId> {
        activity.validate()?;
        self.ensure_access(EntityKind::Client, activity.client_id)?;
        if activity.user_id != self.owner {
            return Err(RepoError::Ownership {
                entity: EntityKind::Activity,
                id: activity.id,
            });
        }

        let content = self.codec.encrypt_optional(Some(activity.content.as_str()))?;
        let metadata = activity
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| RepoError::InvalidData(format!("cannot encode metadata: {err}")))?;

        self.conn.execute(
            "INSERT INTO client_activities (
                id, client_id, user_id, type, title, content, metadata, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                activity.id.to_string(),
                activity.client_id.to_string(),
                self.owner.to_string(),
                activity.kind.as_str(),
                activity.title.trim(),
                content,
                metadata,
                activity.created_at,
            ],
        )?;
        Ok(activity.id)
    }

    fn list_activities(
        &self,
        client_id: ClientId,
        limit: Option<u32>,
    ) -> RepoResult<Vec<ClientActivity>> {
        self.ensure_access(EntityKind::Client, client_id)?;
        let mut sql = "SELECT id, client_id, user_id, type, title, content, metadata, created_at
             FROM client_activities
             WHERE client_id = ? AND user_id = ?
             ORDER BY created_at DESC, id ASC"
            .to_string();
        let mut bind_values = vec![
            Value::Text(client_id.to_string()),
            Value::Text(self.owner.to_string()),
        ];
        if let Some(limit) = limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut activities = Vec::new();
        while let Some(row) = rows.next()? {
            let mut activity = parse_activity_row(row)?;
            activity.content = decrypt_or_redact(
                self.codec,
                row.get("content")?,
                EntityKind::Activity,
                activity.id,
                "content",
            )
            .unwrap_or_default();
            activities.push(activity);
        }
        Ok(activities)
    }

    fn count_activities_by_type(&self, since_ms: i64) -> RepoResult<BTreeMap<ActivityType, u64>> {
        let mut stmt = self.conn.prepare(
            "SELECT type, COUNT(*) FROM client_activities
             WHERE user_id = ?1 AND created_at >= ?2
             GROUP BY type;",
        )?;
        let mut rows = stmt.query(params![self.owner.to_string(), since_ms])?;
        let mut counts = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let kind_text: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            let kind = ActivityType::parse(&kind_text).ok_or_else(|| {
                RepoError::InvalidData(format!("invalid activity type `{kind_text}`"))
            })?;
            counts.insert(kind, u64::try_from(count).unwrap_or_default());
        }
        Ok(counts)
    }
}

fn parse_activity_row(row: &Row<'_>) -> RepoResult<ClientActivity> {
    let id_text: String = row.get("id")?;
    let client_text: String = row.get("client_id")?;
    let user_text: String = row.get("user_id")?;
    let kind_text: String = row.get("type")?;
    let kind = ActivityType::parse(&kind_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid activity type `{kind_text}`"))
    })?;
    let metadata_text: Option<String> = row.get("metadata")?;
    let metadata = metadata_text
        .as_deref()
        .map(serde_json::from_str::<ActivityMetadata>)
        .transpose()
        .map_err(|err| RepoError::InvalidData(format!("invalid activity metadata: {err}")))?;

    Ok(ClientActivity {
        id: parse_uuid(&id_text, "client_activities.id")?,
        client_id: parse_uuid(&client_text, "client_activities.client_id")?,
        user_id: parse_uuid(&user_text, "client_activities.user_id")?,
        kind,
        title: row.get("title")?,
        content: String::new(),
        metadata,
        created_at: row.get("created_at")?,
    })
}
