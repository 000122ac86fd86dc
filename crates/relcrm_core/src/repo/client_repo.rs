//! Client repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - CRUD over the `clients` table and eager loading of the full aggregate.
//! - Ownership-scoped access checks shared by every sub-entity repository.
//! - Bulk and single-row `client_id` reassignment used by merge.
//! - Keyset-paginated match candidate projection used by duplicate scans.
//!
//! # Invariants
//! - All statements filter on `user_id`; the owner is fixed at construction.
//! - Tags persist as a JSON array and are normalized before every write.
//! - Deleting a client cascades to contacts, activities, reminders and
//!   documents through foreign keys.

use super::{parse_uuid, with_savepoint, EntityKind, RepoError, RepoResult};
use crate::codec::FieldCodec;
use crate::model::client::{
    normalize_tags, Address, Client, ClientAggregate, ClientId, ClientSummary, MatchCandidate,
    Priority, SocialLinks,
};
use crate::model::{now_epoch_ms, UserId};
use crate::repo::activity_repo::ActivityRepository;
use crate::repo::contact_repo::ContactRepository;
use crate::repo::document_repo::DocumentRepository;
use crate::repo::reminder_repo::ReminderRepository;
use log::debug;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use uuid::Uuid;

const CLIENTS_DEFAULT_LIMIT: u32 = 50;
const CLIENTS_LIMIT_MAX: u32 = 200;

const CLIENT_SELECT_SQL: &str = "SELECT
    id,
    user_id,
    name,
    company_name,
    notes,
    industry,
    company_size,
    website,
    budget_range,
    client_type,
    source,
    stage_id,
    priority,
    tags,
    address_line,
    city,
    region,
    postal_code,
    country,
    linkedin,
    twitter,
    instagram,
    facebook,
    created_at,
    updated_at,
    last_contacted_at,
    next_followup_at
FROM clients";

/// Query options for listing clients.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientListQuery {
    /// Case-insensitive substring over name and company name.
    pub search: Option<String>,
    pub stage_id: Option<String>,
    pub priority: Option<Priority>,
    /// Case-insensitive exact tag match.
    pub tag: Option<String>,
    /// Defaults to 50 and clamps to 200.
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Keyset cursor for candidate paging: `(created_at, id)` of the last row.
pub type CandidateCursor = (i64, ClientId);

/// Repository interface for the client aggregate root.
pub trait ClientRepository {
    /// The user every operation is scoped to.
    fn owner(&self) -> UserId;
    fn create_client(&self, client: &Client) -> RepoResult<ClientId>;
    /// Loads the client row without sub-entities.
    fn get_client_row(&self, id: ClientId) -> RepoResult<Client>;
    /// Loads the full decrypted aggregate.
    fn get_client(&self, id: ClientId) -> RepoResult<ClientAggregate>;
    fn update_client(&self, client: &Client) -> RepoResult<()>;
    fn delete_client(&self, id: ClientId) -> RepoResult<()>;
    fn list_clients(&self, query: &ClientListQuery) -> RepoResult<Vec<ClientSummary>>;
    /// Moves one owned sub-entity to another client of the same user.
    fn reassign_ownership(
        &self,
        entity: EntityKind,
        entity_id: Uuid,
        new_client_id: ClientId,
    ) -> RepoResult<()>;
    /// Moves every `entity` row of `from` to `to`; returns rows moved.
    fn reassign_all(&self, entity: EntityKind, from: ClientId, to: ClientId) -> RepoResult<usize>;
    /// Returns up to `limit` candidates ordered by `(created_at, id)` after `after`.
    fn match_candidates_page(
        &self,
        after: Option<CandidateCursor>,
        limit: u32,
    ) -> RepoResult<Vec<MatchCandidate>>;
}

/// SQLite-backed repository for the client aggregate and its sub-entities.
///
/// Works over a plain connection or an open transaction (which derefs to
/// `Connection`), so merge can run every call inside one transaction.
pub struct SqliteClientRepository<'a> {
    pub(crate) conn: &'a Connection,
    pub(crate) owner: UserId,
    pub(crate) codec: &'a FieldCodec,
}

impl<'a> SqliteClientRepository<'a> {
    pub fn new(conn: &'a Connection, owner: UserId, codec: &'a FieldCodec) -> Self {
        Self { conn, owner, codec }
    }

    /// Checks that `id` exists and belongs to the owner.
    ///
    /// Returns the owning client id (the id itself for `EntityKind::Client`).
    pub(crate) fn ensure_access(&self, entity: EntityKind, id: Uuid) -> RepoResult<ClientId> {
        let client_column = match entity {
            EntityKind::Client => "id",
            _ => "client_id",
        };
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                &format!(
                    "SELECT user_id, {client_column} FROM {} WHERE id = ?1;",
                    entity.table()
                ),
                [id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (user_text, client_text) = row.ok_or(RepoError::NotFound { entity, id })?;
        if parse_uuid(&user_text, "user_id")? != self.owner {
            return Err(RepoError::Ownership { entity, id });
        }
        parse_uuid(&client_text, client_column)
    }
}

impl ClientRepository for SqliteClientRepository<'_> {
    fn owner(&self) -> UserId {
        self.owner
    }

    fn create_client(&self, client: &Client) -> RepoResult<ClientId> {
        client.validate()?;
        if client.user_id != self.owner {
            return Err(RepoError::Ownership {
                entity: EntityKind::Client,
                id: client.id,
            });
        }

        self.conn.execute(
            "INSERT INTO clients (
                id, user_id, name, company_name, notes, industry, company_size,
                website, budget_range, client_type, source, stage_id, priority, tags,
                address_line, city, region, postal_code, country,
                linkedin, twitter, instagram, facebook,
                created_at, updated_at, last_contacted_at, next_followup_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27
            );",
            params![
                client.id.to_string(),
                self.owner.to_string(),
                client.name.trim(),
                client.company_name.as_str(),
                client.notes.as_str(),
                client.industry.as_str(),
                client.company_size.as_str(),
                client.website.as_str(),
                client.budget_range.as_str(),
                client.client_type.as_str(),
                client.source.as_str(),
                client.stage_id.as_str(),
                priority_to_db(client.priority),
                tags_to_db(&client.tags)?,
                client.address.line.as_str(),
                client.address.city.as_str(),
                client.address.region.as_str(),
                client.address.postal_code.as_str(),
                client.address.country.as_str(),
                client.social.linkedin.as_str(),
                client.social.twitter.as_str(),
                client.social.instagram.as_str(),
                client.social.facebook.as_str(),
                client.created_at,
                client.updated_at,
                client.last_contacted_at,
                client.next_followup_at,
            ],
        )?;

        debug!(
            "event=client_create module=repo status=ok client_id={}",
            client.id
        );
        Ok(client.id)
    }

    fn get_client_row(&self, id: ClientId) -> RepoResult<Client> {
        self.ensure_access(EntityKind::Client, id)?;
        let mut stmt = self.conn.prepare(&format!(
            "{CLIENT_SELECT_SQL} WHERE id = ?1 AND user_id = ?2;"
        ))?;
        let mut rows = stmt.query(params![id.to_string(), self.owner.to_string()])?;
        if let Some(row) = rows.next()? {
            return parse_client_row(row);
        }
        Err(RepoError::NotFound {
            entity: EntityKind::Client,
            id,
        })
    }

    fn get_client(&self, id: ClientId) -> RepoResult<ClientAggregate> {
        let client = self.get_client_row(id)?;
        let contacts = self.list_contacts(id)?;
        let activities = self.list_activities(id, None)?;
        let reminders = self.list_reminders(id)?;
        let documents = self.list_documents(id)?;
        Ok(ClientAggregate {
            client,
            contacts,
            activities,
            reminders,
            documents,
        })
    }

    fn update_client(&self, client: &Client) -> RepoResult<()> {
        client.validate()?;
        self.ensure_access(EntityKind::Client, client.id)?;

        let changed = self.conn.execute(
            "UPDATE clients
             SET
                name = ?3,
                company_name = ?4,
                notes = ?5,
                industry = ?6,
                company_size = ?7,
                website = ?8,
                budget_range = ?9,
                client_type = ?10,
                source = ?11,
                stage_id = ?12,
                priority = ?13,
                tags = ?14,
                address_line = ?15,
                city = ?16,
                region = ?17,
                postal_code = ?18,
                country = ?19,
                linkedin = ?20,
                twitter = ?21,
                instagram = ?22,
                facebook = ?23,
                last_contacted_at = ?24,
                next_followup_at = ?25,
                updated_at = ?26
             WHERE id = ?1 AND user_id = ?2;",
            params![
                client.id.to_string(),
                self.owner.to_string(),
                client.name.trim(),
                client.company_name.as_str(),
                client.notes.as_str(),
                client.industry.as_str(),
                client.company_size.as_str(),
                client.website.as_str(),
                client.budget_range.as_str(),
                client.client_type.as_str(),
                client.source.as_str(),
                client.stage_id.as_str(),
                priority_to_db(client.priority),
                tags_to_db(&client.tags)?,
                client.address.line.as_str(),
                client.address.city.as_str(),
                client.address.region.as_str(),
                client.address.postal_code.as_str(),
                client.address.country.as_str(),
                client.social.linkedin.as_str(),
                client.social.twitter.as_str(),
                client.social.instagram.as_str(),
                client.social.facebook.as_str(),
                client.last_contacted_at,
                client.next_followup_at,
                now_epoch_ms(),
            ],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: EntityKind::Client,
                id: client.id,
            });
        }
        Ok(())
    }

    fn delete_client(&self, id: ClientId) -> RepoResult<()> {
        self.ensure_access(EntityKind::Client, id)?;
        let changed = self.conn.execute(
            "DELETE FROM clients WHERE id = ?1 AND user_id = ?2;",
            params![id.to_string(), self.owner.to_string()],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: EntityKind::Client,
                id,
            });
        }
        debug!("event=client_delete module=repo status=ok client_id={id}");
        Ok(())
    }

    fn list_clients(&self, query: &ClientListQuery) -> RepoResult<Vec<ClientSummary>> {
        let mut sql = format!("{CLIENT_SELECT_SQL} WHERE user_id = ?");
        let mut bind_values: Vec<Value> = vec![Value::Text(self.owner.to_string())];

        if let Some(search) = query.search.as_deref().map(str::trim) {
            if !search.is_empty() {
                // LIKE is case-insensitive for ASCII by default.
                sql.push_str(" AND (name LIKE ? ESCAPE '\\' OR company_name LIKE ? ESCAPE '\\')");
                let pattern = format!("%{}%", escape_like(search));
                bind_values.push(Value::Text(pattern.clone()));
                bind_values.push(Value::Text(pattern));
            }
        }

        if let Some(stage_id) = query.stage_id.as_ref() {
            sql.push_str(" AND stage_id = ?");
            bind_values.push(Value::Text(stage_id.clone()));
        }

        if let Some(priority) = query.priority {
            sql.push_str(" AND priority = ?");
            bind_values.push(Value::Text(priority_to_db(priority).to_string()));
        }

        if let Some(tag) = query.tag.as_deref().map(str::trim) {
            if !tag.is_empty() {
                sql.push_str(
                    " AND EXISTS (
                        SELECT 1 FROM json_each(clients.tags)
                        WHERE lower(json_each.value) = lower(?)
                    )",
                );
                bind_values.push(Value::Text(tag.to_string()));
            }
        }

        sql.push_str(" ORDER BY created_at DESC, id ASC LIMIT ?");
        bind_values.push(Value::Integer(i64::from(normalize_client_limit(query.limit))));
        if query.offset > 0 {
            sql.push_str(" OFFSET ?");
            bind_values.push(Value::Integer(i64::from(query.offset)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut clients = Vec::new();
        while let Some(row) = rows.next()? {
            let client = parse_client_row(row)?;
            clients.push(ClientSummary::from(&client));
        }
        Ok(clients)
    }

    fn reassign_ownership(
        &self,
        entity: EntityKind,
        entity_id: Uuid,
        new_client_id: ClientId,
    ) -> RepoResult<()> {
        if entity == EntityKind::Client {
            return Err(crate::model::ValidationError::new(
                "entityType",
                "clients cannot be reassigned to another client",
            )
            .into());
        }
        self.ensure_access(EntityKind::Client, new_client_id)?;
        self.ensure_access(entity, entity_id)?;

        with_savepoint(self.conn, "reassign_one", || {
            if entity == EntityKind::Contact {
                // The moved contact may not carry a second primary flag.
                if self.primary_contact_id(new_client_id)?.is_some() {
                    self.conn.execute(
                        "UPDATE client_contacts SET is_primary = 0 WHERE id = ?1;",
                        [entity_id.to_string()],
                    )?;
                }
            }
            self.conn.execute(
                &format!(
                    "UPDATE {} SET client_id = ?1 WHERE id = ?2 AND user_id = ?3;",
                    entity.table()
                ),
                params![
                    new_client_id.to_string(),
                    entity_id.to_string(),
                    self.owner.to_string()
                ],
            )?;
            Ok(())
        })
    }

    fn reassign_all(&self, entity: EntityKind, from: ClientId, to: ClientId) -> RepoResult<usize> {
        if entity == EntityKind::Client {
            return Err(crate::model::ValidationError::new(
                "entityType",
                "clients cannot be reassigned to another client",
            )
            .into());
        }
        self.ensure_access(EntityKind::Client, from)?;
        self.ensure_access(EntityKind::Client, to)?;

        let moved = self.conn.execute(
            &format!(
                "UPDATE {} SET client_id = ?1 WHERE client_id = ?2 AND user_id = ?3;",
                entity.table()
            ),
            params![to.to_string(), from.to_string(), self.owner.to_string()],
        )?;
        Ok(moved)
    }

    fn match_candidates_page(
        &self,
        after: Option<CandidateCursor>,
        limit: u32,
    ) -> RepoResult<Vec<MatchCandidate>> {
        let (after_created, after_id) = match after {
            Some((created_at, id)) => (Some(created_at), Some(id.to_string())),
            None => (None, None),
        };

        let mut stmt = self.conn.prepare(
            "SELECT id, name, company_name, created_at
             FROM clients
             WHERE user_id = ?1
               AND (?2 IS NULL OR created_at > ?2 OR (created_at = ?2 AND id > ?3))
             ORDER BY created_at ASC, id ASC
             LIMIT ?4;",
        )?;
        let mut rows = stmt.query(params![
            self.owner.to_string(),
            after_created,
            after_id,
            i64::from(limit.max(1)),
        ])?;

        let mut candidates = Vec::new();
        while let Some(row) = rows.next()? {
            let id_text: String = row.get("id")?;
            let mut candidate = MatchCandidate::named(
                parse_uuid(&id_text, "clients.id")?,
                row.get::<_, String>("name")?,
                row.get("created_at")?,
            );
            candidate.company_name = row.get("company_name")?;
            candidates.push(candidate);
        }

        if candidates.is_empty() {
            return Ok(candidates);
        }

        let ids: Vec<ClientId> = candidates.iter().map(|candidate| candidate.id).collect();
        let mut channels = self.contact_channels(&ids)?;
        for candidate in &mut candidates {
            if let Some(found) = channels.remove(&candidate.id) {
                candidate.primary_email = found.primary_email;
                candidate.primary_phone = found.primary_phone;
                candidate.emails = found.emails;
            }
        }
        Ok(candidates)
    }
}

/// Decrypted contact channels for one client, as used for matching.
#[derive(Debug, Default)]
pub(crate) struct ContactChannels {
    pub primary_email: Option<String>,
    pub primary_phone: Option<String>,
    pub emails: Vec<String>,
}

impl SqliteClientRepository<'_> {
    /// Loads decrypted email/phone channels for a batch of clients.
    ///
    /// The primary contact is the flagged one, else the earliest created.
    /// Values that fail to decrypt are skipped so they can never produce a
    /// spurious match.
    pub(crate) fn contact_channels(
        &self,
        client_ids: &[ClientId],
    ) -> RepoResult<HashMap<ClientId, ContactChannels>> {
        let placeholders = vec!["?"; client_ids.len()].join(", ");
        let sql = format!(
            "SELECT client_id, id, email, phone
             FROM client_contacts
             WHERE user_id = ? AND client_id IN ({placeholders})
             ORDER BY client_id ASC, is_primary DESC, created_at ASC, id ASC;"
        );
        let mut bind_values: Vec<Value> = vec![Value::Text(self.owner.to_string())];
        bind_values.extend(client_ids.iter().map(|id| Value::Text(id.to_string())));

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut channels: HashMap<ClientId, ContactChannels> = HashMap::new();
        while let Some(row) = rows.next()? {
            let client_id = parse_uuid(&row.get::<_, String>("client_id")?, "client_id")?;
            let contact_id = parse_uuid(&row.get::<_, String>("id")?, "client_contacts.id")?;
            let email = self.decrypt_for_matching(row.get("email")?, contact_id, "email");
            let phone = self.decrypt_for_matching(row.get("phone")?, contact_id, "phone");

            let is_primary_row = !channels.contains_key(&client_id);
            let entry = channels.entry(client_id).or_default();
            if is_primary_row {
                entry.primary_email = email.clone();
                entry.primary_phone = phone;
            }
            if let Some(email) = email {
                entry.emails.push(email);
            }
        }
        Ok(channels)
    }

    fn decrypt_for_matching(
        &self,
        blob: Option<Vec<u8>>,
        contact_id: Uuid,
        field: &'static str,
    ) -> Option<String> {
        let blob = blob?;
        match self.codec.decrypt(&blob) {
            Ok(plain) => Some(plain),
            Err(err) => {
                log::warn!(
                    "event=pii_decrypt module=repo status=skipped entity=contact id={} field={} error={}",
                    contact_id, field, err
                );
                None
            }
        }
    }
}

/// Normalizes list limit according to the client list contract.
pub fn normalize_client_limit(limit: Option<u32>) -> u32 {
    match limit {
        Some(0) | None => CLIENTS_DEFAULT_LIMIT,
        Some(value) if value > CLIENTS_LIMIT_MAX => CLIENTS_LIMIT_MAX,
        Some(value) => value,
    }
}

fn parse_client_row(row: &Row<'_>) -> RepoResult<Client> {
    let id_text: String = row.get("id")?;
    let user_text: String = row.get("user_id")?;
    let priority_text: String = row.get("priority")?;
    let priority = parse_priority(&priority_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid priority `{priority_text}` in clients.priority"))
    })?;
    let tags_text: String = row.get("tags")?;
    let tags: Vec<String> = serde_json::from_str(&tags_text)
        .map_err(|err| RepoError::InvalidData(format!("invalid clients.tags json: {err}")))?;

    Ok(Client {
        id: parse_uuid(&id_text, "clients.id")?,
        user_id: parse_uuid(&user_text, "clients.user_id")?,
        name: row.get("name")?,
        company_name: row.get("company_name")?,
        notes: row.get("notes")?,
        industry: row.get("industry")?,
        company_size: row.get("company_size")?,
        website: row.get("website")?,
        budget_range: row.get("budget_range")?,
        client_type: row.get("client_type")?,
        source: row.get("source")?,
        stage_id: row.get("stage_id")?,
        priority,
        tags,
        address: Address {
            line: row.get("address_line")?,
            city: row.get("city")?,
            region: row.get("region")?,
            postal_code: row.get("postal_code")?,
            country: row.get("country")?,
        },
        social: SocialLinks {
            linkedin: row.get("linkedin")?,
            twitter: row.get("twitter")?,
            instagram: row.get("instagram")?,
            facebook: row.get("facebook")?,
        },
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        last_contacted_at: row.get("last_contacted_at")?,
        next_followup_at: row.get("next_followup_at")?,
    })
}

fn tags_to_db(tags: &[String]) -> RepoResult<String> {
    serde_json::to_string(&normalize_tags(tags))
        .map_err(|err| RepoError::InvalidData(format!("cannot encode tags: {err}")))
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

pub(crate) fn priority_to_db(priority: Priority) -> &'static str {
    match priority {
        Priority::Low => "low",
        Priority::Medium => "medium",
        Priority::High => "high",
        Priority::Vip => "vip",
    }
}

pub(crate) fn parse_priority(value: &str) -> Option<Priority> {
    match value {
        "low" => Some(Priority::Low),
        "medium" => Some(Priority::Medium),
        "high" => Some(Priority::High),
        "vip" => Some(Priority::Vip),
        _ => None,
    }
}
