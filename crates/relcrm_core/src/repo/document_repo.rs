//! Document metadata persistence.

use super::client_repo::SqliteClientRepository;
use super::{parse_uuid, EntityKind, RepoError, RepoResult};
use crate::model::client::ClientId;
use crate::model::document::{Document, DocumentId};
use rusqlite::{params, Row};

pub trait DocumentRepository {
    fn create_document(&self, document: &Document) -> RepoResult<DocumentId>;
    fn delete_document(&self, id: DocumentId) -> RepoResult<()>;
    /// Oldest first.
    fn list_documents(&self, client_id: ClientId) -> RepoResult<Vec<Document>>;
}

impl DocumentRepository for SqliteClientRepository<'_> {
    fn create_document(&self, document: &Document) -> RepoResult<DocumentId> {
        document.validate()?;
        self.ensure_access(EntityKind::Client, document.client_id)?;
        if document.user_id != self.owner {
            return Err(RepoError::Ownership {
                entity: EntityKind::Document,
                id: document.id,
            });
        }
        let file_size = i64::try_from(document.file_size)
            .map_err(|_| RepoError::InvalidData("file size out of range".to_string()))?;
        self.conn.execute(
            "INSERT INTO documents (
                id, client_id, user_id, file_type, file_size, original_name, storage_key, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                document.id.to_string(),
                document.client_id.to_string(),
                self.owner.to_string(),
                document.file_type.as_str(),
                file_size,
                document.original_name.as_str(),
                document.storage_key.as_str(),
                document.created_at,
            ],
        )?;
        Ok(document.id)
    }

    fn delete_document(&self, id: DocumentId) -> RepoResult<()> {
        self.ensure_access(EntityKind::Document, id)?;
        self.conn.execute(
            "DELETE FROM documents WHERE id = ?1 AND user_id = ?2;",
            params![id.to_string(), self.owner.to_string()],
        )?;
        Ok(())
    }

    fn list_documents(&self, client_id: ClientId) -> RepoResult<Vec<Document>> {
        self.ensure_access(EntityKind::Client, client_id)?;
        let mut stmt = self.conn.prepare(
            "SELECT id, client_id, user_id, file_type, file_size, original_name, storage_key, created_at
             FROM documents
             WHERE client_id = ?1 AND user_id = ?2
             ORDER BY created_at ASC, id ASC;",
        )?;
        let mut rows = stmt.query(params![client_id.to_string(), self.owner.to_string()])?;
        let mut documents = Vec::new();
        while let Some(row) = rows.next()? {
            documents.push(parse_document_row(row)?);
        }
        Ok(documents)
    }
}

fn parse_document_row(row: &Row<'_>) -> RepoResult<Document> {
    let id_text: String = row.get("id")?;
    let client_text: String = row.get("client_id")?;
    let user_text: String = row.get("user_id")?;
    let file_size: i64 = row.get("file_size")?;
    Ok(Document {
        id: parse_uuid(&id_text, "documents.id")?,
        client_id: parse_uuid(&client_text, "documents.client_id")?,
        user_id: parse_uuid(&user_text, "documents.user_id")?,
        file_type: row.get("file_type")?,
        file_size: u64::try_from(file_size)
            .map_err(|_| RepoError::InvalidData("negative documents.file_size".to_string()))?,
        original_name: row.get("original_name")?,
        storage_key: row.get("storage_key")?,
        created_at: row.get("created_at")?,
    })
}
