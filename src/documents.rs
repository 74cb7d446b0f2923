//! Document records and the admin operations on them.
//!
//! Archiving hides a knowledge-base document from retrieval but keeps its
//! chunks so it can be restored. Permanent deletion removes chunks, then
//! the stored original, then the row.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

use concierge_core::error::{Error, Result};
use concierge_core::models::{Document, DocumentStatus, DocumentType};

use crate::clients::Clients;
use crate::db::db_error;

const LIST_COLUMNS: &str = "id, title, description, url, mime_type, size_bytes, status, document_type, created_at, updated_at";

fn parse<T>(row: &SqliteRow, column: &str) -> Result<T>
where
    T: std::str::FromStr<Err = Error>,
{
    let raw: String = row.get(column);
    raw.parse()
        .map_err(|e| Error::upstream("database", format!("column {}: {}", column, e)))
}

fn document_from_row(row: &SqliteRow, with_content: bool) -> Result<Document> {
    Ok(Document {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        url: row.get("url"),
        mime_type: row.get("mime_type"),
        size_bytes: row.get("size_bytes"),
        status: parse(row, "status")?,
        document_type: parse(row, "document_type")?,
        content_text: if with_content {
            row.get("content_text")
        } else {
            None
        },
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn document_not_found() -> Error {
    Error::not_found("Document not found")
}

/// Fields of a document about to be inserted.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub title: String,
    pub url: String,
    pub storage_key: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub document_type: DocumentType,
    pub content_text: Option<String>,
}

pub async fn insert(pool: &SqlitePool, new: &NewDocument) -> Result<Document> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO documents
            (id, title, url, storage_key, mime_type, size_bytes, status, document_type, content_text, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, 'active', ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&new.title)
    .bind(&new.url)
    .bind(&new.storage_key)
    .bind(&new.mime_type)
    .bind(new.size_bytes)
    .bind(new.document_type.as_str())
    .bind(&new.content_text)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .map_err(db_error)?;

    get(pool, &id).await
}

/// A single document including its extracted text.
pub async fn get(pool: &SqlitePool, id: &str) -> Result<Document> {
    let row = sqlx::query(&format!(
        "SELECT {}, content_text FROM documents WHERE id = ?",
        LIST_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(db_error)?
    .ok_or_else(document_not_found)?;
    document_from_row(&row, true)
}

/// Documents of one type, newest first, without their text.
pub async fn list(
    pool: &SqlitePool,
    document_type: DocumentType,
    status: Option<DocumentStatus>,
) -> Result<Vec<Document>> {
    let rows = match status {
        Some(status) => {
            sqlx::query(&format!(
                "SELECT {} FROM documents WHERE document_type = ? AND status = ?
                 ORDER BY created_at DESC, rowid DESC",
                LIST_COLUMNS
            ))
            .bind(document_type.as_str())
            .bind(status.as_str())
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query(&format!(
                "SELECT {} FROM documents WHERE document_type = ?
                 ORDER BY created_at DESC, rowid DESC",
                LIST_COLUMNS
            ))
            .bind(document_type.as_str())
            .fetch_all(pool)
            .await
        }
    }
    .map_err(db_error)?;

    rows.iter().map(|row| document_from_row(row, false)).collect()
}

/// Documents uploaded into a session.
pub async fn list_for_session(pool: &SqlitePool, session_id: &str) -> Result<Vec<Document>> {
    let columns = LIST_COLUMNS
        .split(", ")
        .map(|c| format!("d.{}", c))
        .collect::<Vec<_>>()
        .join(", ");
    let rows = sqlx::query(&format!(
        "SELECT {} FROM documents d
         JOIN session_documents sd ON sd.document_id = d.id
         WHERE sd.session_id = ?
         ORDER BY d.created_at ASC",
        columns
    ))
    .bind(session_id)
    .fetch_all(pool)
    .await
    .map_err(db_error)?;

    rows.iter().map(|row| document_from_row(row, false)).collect()
}

#[derive(Debug, Clone, Default)]
pub struct DocumentUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<DocumentStatus>,
}

/// Change title, description, or status. Restoring an archived document
/// is an update to `active`.
pub async fn update(pool: &SqlitePool, id: &str, update: &DocumentUpdate) -> Result<Document> {
    if let Some(title) = &update.title {
        if title.trim().is_empty() {
            return Err(Error::validation("title must not be empty"));
        }
    }
    let current = get(pool, id).await?;

    sqlx::query(
        "UPDATE documents SET title = ?, description = ?, status = ?, updated_at = ? WHERE id = ?",
    )
    .bind(update.title.as_ref().unwrap_or(&current.title))
    .bind(update.description.as_ref().or(current.description.as_ref()))
    .bind(update.status.unwrap_or(current.status).as_str())
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await
    .map_err(db_error)?;

    get(pool, id).await
}

/// Archive (`permanent == false`) or remove a document.
///
/// Permanent removal deletes chunks, then the stored original, then the
/// row. A storage failure is logged and does not stop the row deletion.
pub async fn delete(clients: &Clients, id: &str, permanent: bool) -> Result<()> {
    let pool = clients.pool();

    if !permanent {
        let update = DocumentUpdate {
            status: Some(DocumentStatus::Archived),
            ..DocumentUpdate::default()
        };
        self::update(pool, id, &update).await?;
        info!(document_id = id, "document archived");
        return Ok(());
    }

    let row = sqlx::query("SELECT document_type, storage_key FROM documents WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(db_error)?
        .ok_or_else(document_not_found)?;
    let document_type: DocumentType = parse(&row, "document_type")?;
    let storage_key: String = row.get("storage_key");

    let removed = clients.knowledge().delete_chunks(id).await?;

    if let Err(e) = clients
        .blobs()
        .remove(document_type.bucket(), &storage_key)
        .await
    {
        warn!(document_id = id, error = %e, "failed to remove stored file");
    }

    sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .map_err(db_error)?;

    info!(document_id = id, chunks = removed, "document deleted");
    Ok(())
}
