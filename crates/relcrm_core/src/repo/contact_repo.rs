//! Contact persistence over the scoped client repository.
//!
//! # Invariants
//! - At most one contact per client has `is_primary = 1`; setting the flag
//!   clears it on siblings in the same savepoint.
//! - `email`, `phone`, `whatsapp` reach SQLite only as ciphertext.

use super::client_repo::SqliteClientRepository;
use super::{
    bool_to_int, decrypt_or_redact, decrypt_strict, parse_uuid, with_savepoint, EntityKind,
    RepoError, RepoResult,
};
use crate::model::client::ClientId;
use crate::model::contact::{ClientContact, ContactId, PreferredContact};
use crate::model::ValidationError;
use rusqlite::{params, OptionalExtension, Row};

const CONTACT_SELECT_SQL: &str = "SELECT
    id,
    client_id,
    user_id,
    name,
    role,
    email,
    phone,
    whatsapp,
    is_primary,
    preferred_contact,
    notes,
    created_at
FROM client_contacts";

/// Contact use-cases.
pub trait ContactRepository {
    fn create_contact(&self, contact: &ClientContact) -> RepoResult<ContactId>;
    /// Updates fields in place; the contact stays on its current client.
    fn update_contact(&self, contact: &ClientContact) -> RepoResult<()>;
    fn delete_contact(&self, id: ContactId) -> RepoResult<()>;
    /// Strict read: undecryptable PII fails with `Decryption`.
    fn get_contact(&self, id: ContactId) -> RepoResult<ClientContact>;
    /// Primary first, then oldest first. Undecryptable PII is redacted.
    fn list_contacts(&self, client_id: ClientId) -> RepoResult<Vec<ClientContact>>;
    /// Clears the primary flag on every contact of `client_id`.
    fn clear_primary(&self, client_id: ClientId) -> RepoResult<usize>;
    fn primary_contact_id(&self, client_id: ClientId) -> RepoResult<Option<ContactId>>;
}

impl ContactRepository for SqliteClientRepository<'_> {
    fn create_contact(&self, contact: &ClientContact) -> RepoResult<ContactId> {
        contact.validate()?;
        self.ensure_access(EntityKind::Client, contact.client_id)?;
        if contact.user_id != self.owner {
            return Err(RepoError::Ownership {
                entity: EntityKind::Contact,
                id: contact.id,
            });
        }

        let email = self.codec.encrypt_optional(contact.email.as_deref())?;
        let phone = self.codec.encrypt_optional(contact.phone.as_deref())?;
        let whatsapp = self.codec.encrypt_optional(contact.whatsapp.as_deref())?;

        with_savepoint(self.conn, "contact_create", || {
            if contact.is_primary {
                self.clear_primary(contact.client_id)?;
            }
            self.conn.execute(
                "INSERT INTO client_contacts (
                    id, client_id, user_id, name, role, email, phone, whatsapp,
                    is_primary, preferred_contact, notes, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12);",
                params![
                    contact.id.to_string(),
                    contact.client_id.to_string(),
                    self.owner.to_string(),
                    contact.name.trim(),
                    contact.role.as_str(),
                    email,
                    phone,
                    whatsapp,
                    bool_to_int(contact.is_primary),
                    preferred_to_db(contact.preferred_contact),
                    contact.notes.as_str(),
                    contact.created_at,
                ],
            )?;
            Ok(contact.id)
        })
    }

    fn update_contact(&self, contact: &ClientContact) -> RepoResult<()> {
        contact.validate()?;
        let current_client = self.ensure_access(EntityKind::Contact, contact.id)?;
        if current_client != contact.client_id {
            return Err(ValidationError::new(
                "clientId",
                "contacts move between clients only through merge",
            )
            .into());
        }

        let email = self.codec.encrypt_optional(contact.email.as_deref())?;
        let phone = self.codec.encrypt_optional(contact.phone.as_deref())?;
        let whatsapp = self.codec.encrypt_optional(contact.whatsapp.as_deref())?;

        with_savepoint(self.conn, "contact_update", || {
            if contact.is_primary {
                self.conn.execute(
                    "UPDATE client_contacts SET is_primary = 0
                     WHERE client_id = ?1 AND user_id = ?2 AND id <> ?3;",
                    params![
                        contact.client_id.to_string(),
                        self.owner.to_string(),
                        contact.id.to_string()
                    ],
                )?;
            }
            self.conn.execute(
                "UPDATE client_contacts
                 SET
                    name = ?3,
                    role = ?4,
                    email = ?5,
                    phone = ?6,
                    whatsapp = ?7,
                    is_primary = ?8,
                    preferred_contact = ?9,
                    notes = ?10
                 WHERE id = ?1 AND user_id = ?2;",
                params![
                    contact.id.to_string(),
                    self.owner.to_string(),
                    contact.name.trim(),
                    contact.role.as_str(),
                    email,
                    phone,
                    whatsapp,
                    bool_to_int(contact.is_primary),
                    preferred_to_db(contact.preferred_contact),
                    contact.notes.as_str(),
                ],
            )?;
            Ok(())
        })
    }

    fn delete_contact(&self, id: ContactId) -> RepoResult<()> {
        self.ensure_access(EntityKind::Contact, id)?;
        self.conn.execute(
            "DELETE FROM client_contacts WHERE id = ?1 AND user_id = ?2;",
            params![id.to_string(), self.owner.to_string()],
        )?;
        Ok(())
    }

    fn get_contact(&self, id: ContactId) -> RepoResult<ClientContact> {
        self.ensure_access(EntityKind::Contact, id)?;
        let mut stmt = self.conn.prepare(&format!(
            "{CONTACT_SELECT_SQL} WHERE id = ?1 AND user_id = ?2;"
        ))?;
        let mut rows = stmt.query(params![id.to_string(), self.owner.to_string()])?;
        let row = rows.next()?.ok_or(RepoError::NotFound {
            entity: EntityKind::Contact,
            id,
        })?;

        let mut contact = parse_contact_row(row)?;
        contact.email = decrypt_strict(self.codec, row.get("email")?, EntityKind::Contact, id)?;
        contact.phone = decrypt_strict(self.codec, row.get("phone")?, EntityKind::Contact, id)?;
        contact.whatsapp =
            decrypt_strict(self.codec, row.get("whatsapp")?, EntityKind::Contact, id)?;
        Ok(contact)
    }

    fn list_contacts(&self, client_id: ClientId) -> RepoResult<Vec<ClientContact>> {
        self.ensure_access(EntityKind::Client, client_id)?;
        let mut stmt = self.conn.prepare(&format!(
            "{CONTACT_SELECT_SQL}
             WHERE client_id = ?1 AND user_id = ?2
             ORDER BY is_primary DESC, created_at ASC, id ASC;"
        ))?;
        let mut rows = stmt.query(params![client_id.to_string(), self.owner.to_string()])?;

        let mut contacts = Vec::new();
        while let Some(row) = rows.next()? {
            let mut contact = parse_contact_row(row)?;
            let id = contact.id;
            contact.email =
                decrypt_or_redact(self.codec, row.get("email")?, EntityKind::Contact, id, "email");
            contact.phone =
                decrypt_or_redact(self.codec, row.get("phone")?, EntityKind::Contact, id, "phone");
            contact.whatsapp = decrypt_or_redact(
                self.codec,
                row.get("whatsapp")?,
                EntityKind::Contact,
                id,
                "whatsapp",
            );
            contacts.push(contact);
        }
        Ok(contacts)
    }

    fn clear_primary(&self, client_id: ClientId) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE client_contacts SET is_primary = 0
             WHERE client_id = ?1 AND user_id = ?2 AND is_primary = 1;",
            params![client_id.to_string(), self.owner.to_string()],
        )?;
        Ok(changed)
    }

    fn primary_contact_id(&self, client_id: ClientId) -> RepoResult<Option<ContactId>> {
        let id: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM client_contacts
                 WHERE client_id = ?1 AND user_id = ?2 AND is_primary = 1;",
                params![client_id.to_string(), self.owner.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        id.map(|value| parse_uuid(&value, "client_contacts.id"))
            .transpose()
    }
}

/// Parses non-PII columns; PII fields are left empty for the caller to fill.
fn parse_contact_row(row: &Row<'_>) -> RepoResult<ClientContact> {
    let id_text: String = row.get("id")?;
    let client_text: String = row.get("client_id")?;
    let user_text: String = row.get("user_id")?;
    let preferred_text: String = row.get("preferred_contact")?;
    let preferred_contact = parse_preferred(&preferred_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid preferred_contact `{preferred_text}` in client_contacts"
        ))
    })?;
    let is_primary: i64 = row.get("is_primary")?;

    Ok(ClientContact {
        id: parse_uuid(&id_text, "client_contacts.id")?,
        client_id: parse_uuid(&client_text, "client_contacts.client_id")?,
        user_id: parse_uuid(&user_text, "client_contacts.user_id")?,
        name: row.get("name")?,
        role: row.get("role")?,
        email: None,
        phone: None,
        whatsapp: None,
        is_primary: is_primary != 0,
        preferred_contact,
        notes: row.get("notes")?,
        created_at: row.get("created_at")?,
    })
}

fn preferred_to_db(value: PreferredContact) -> &'static str {
    match value {
        PreferredContact::Email => "email",
        PreferredContact::Phone => "phone",
        PreferredContact::Whatsapp => "whatsapp",
        PreferredContact::Any => "any",
    }
}

fn parse_preferred(value: &str) -> Option<PreferredContact> {
    match value {
        "email" => Some(PreferredContact::Email),
        "phone" => Some(PreferredContact::Phone),
        "whatsapp" => Some(PreferredContact::Whatsapp),
        "any" => Some(PreferredContact::Any),
        _ => None,
    }
}
