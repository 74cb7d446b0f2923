//! Ingestion pipeline: validate → store original → extract → record →
//! chunk → embed → insert.
//!
//! Embedding is per chunk and non-fatal: a chunk whose embedding or insert
//! fails is logged and skipped, and the upload still succeeds. Once the
//! document row exists nothing is rolled back. [`reembed_document`] is the
//! explicit way to retry. A failed row insert removes the stored original.

use serde::Serialize;
use tracing::{info, warn};

use concierge_core::chunk::chunk_text;
use concierge_core::error::{Error, Result};
use concierge_core::models::{Document, DocumentType};

use crate::clients::Clients;
use crate::documents::{self, NewDocument};
use crate::extract::{extract_text_blocking, is_allowed_mime, normalize_mime};
use crate::sessions;

/// A file handed to the pipeline.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub knowledge_base: bool,
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IngestOutcome {
    pub document: Document,
    pub chunks_stored: usize,
    pub chunks_skipped: usize,
}

/// Run the whole pipeline for one upload.
///
/// Size and type are checked before anything is written. A user upload
/// bound to a session requires that session to exist and be paid.
pub async fn ingest_upload(clients: &Clients, upload: Upload) -> Result<IngestOutcome> {
    if upload.bytes.is_empty() {
        return Err(Error::validation("No file provided"));
    }
    let max_bytes = clients.config().uploads.max_bytes;
    if upload.bytes.len() > max_bytes {
        return Err(Error::validation(format!(
            "File too large. Maximum size is {}MB",
            max_bytes / (1024 * 1024)
        )));
    }
    if !is_allowed_mime(&upload.mime_type) {
        return Err(Error::validation(
            "Invalid file type. Allowed: PDF, Word, TXT",
        ));
    }

    let document_type = if upload.knowledge_base {
        DocumentType::KnowledgeBase
    } else {
        DocumentType::UserUpload
    };
    let session_id = match (&upload.session_id, document_type) {
        (Some(id), DocumentType::UserUpload) => {
            let session = sessions::get(clients.pool(), id).await?;
            if !session.is_paid() {
                return Err(Error::business_rule(
                    "Document upload is only available for paid sessions",
                ));
            }
            Some(session.id)
        }
        _ => None,
    };

    let mime_type = normalize_mime(&upload.mime_type);
    let extension = upload
        .file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "bin".to_string());
    let storage_key = format!("{}.{}", uuid::Uuid::new_v4(), extension);

    let size_bytes = upload.bytes.len() as i64;
    let blobs = clients.blobs();
    let url = blobs
        .put(document_type.bucket(), &storage_key, &upload.bytes)
        .await?;

    let content_text = match extract_text_blocking(upload.bytes, mime_type.clone()).await {
        Ok(Some(text)) if !text.trim().is_empty() => Some(text),
        Ok(_) => {
            warn!(file = %upload.file_name, mime = %mime_type, "no text extracted; storing without content");
            None
        }
        Err(e) => {
            warn!(file = %upload.file_name, error = %e, "text extraction failed; storing without content");
            None
        }
    };

    let inserted = documents::insert(
        clients.pool(),
        &NewDocument {
            title: upload.file_name.clone(),
            url,
            storage_key: storage_key.clone(),
            mime_type,
            size_bytes,
            document_type,
            content_text,
        },
    )
    .await;
    let document = match inserted {
        Ok(document) => document,
        Err(e) => {
            match blobs.remove(document_type.bucket(), &storage_key).await {
                Ok(()) => warn!(key = %storage_key, "document insert failed; stored file removed"),
                Err(remove_err) => {
                    warn!(key = %storage_key, error = %remove_err, "document insert failed; stored file left behind")
                }
            }
            return Err(e);
        }
    };

    let (chunks_stored, chunks_skipped) = match (&document.content_text, document_type) {
        (Some(text), DocumentType::KnowledgeBase) => {
            embed_and_store(clients, &document.id, text).await
        }
        _ => (0, 0),
    };

    if let Some(session_id) = &session_id {
        if let Err(e) = sessions::link_document(clients.pool(), session_id, &document.id).await {
            warn!(session_id = %session_id, document_id = %document.id, error = %e, "failed to link document to session");
        }
    }

    info!(
        document_id = %document.id,
        document_type = %document_type,
        chunks_stored,
        chunks_skipped,
        "document ingested"
    );

    Ok(IngestOutcome {
        document,
        chunks_stored,
        chunks_skipped,
    })
}

/// Chunk `text` and embed each chunk in order. Returns `(stored, skipped)`.
pub async fn embed_and_store(clients: &Clients, document_id: &str, text: &str) -> (usize, usize) {
    let chunks = chunk_text(document_id, text, clients.chunking());
    let embedder = clients.embedder();
    let store = clients.knowledge();

    if embedder.dims() == 0 {
        warn!(
            document_id,
            chunks = chunks.len(),
            "embeddings disabled; document stored without chunks"
        );
        return (0, chunks.len());
    }

    let mut stored = 0usize;
    let mut skipped = 0usize;
    for chunk in &chunks {
        let result = match embedder.embed(&chunk.text).await {
            Ok(vector) => store.insert_chunk(chunk, &vector).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => stored += 1,
            Err(e) => {
                warn!(
                    document_id,
                    chunk_index = chunk.chunk_index,
                    error = %e,
                    "chunk skipped"
                );
                skipped += 1;
            }
        }
    }
    (stored, skipped)
}

/// Drop a knowledge-base document's chunks and rebuild them from its
/// stored text.
pub async fn reembed_document(clients: &Clients, document_id: &str) -> Result<IngestOutcome> {
    let document = documents::get(clients.pool(), document_id).await?;
    if document.document_type != DocumentType::KnowledgeBase {
        return Err(Error::validation(
            "Only knowledge base documents have embeddings",
        ));
    }
    let Some(text) = document.content_text.clone() else {
        return Err(Error::validation("Document has no extracted text"));
    };

    let removed = clients.knowledge().delete_chunks(&document.id).await?;
    let (chunks_stored, chunks_skipped) = embed_and_store(clients, &document.id, &text).await;
    info!(
        document_id = %document.id,
        removed,
        chunks_stored,
        chunks_skipped,
        "document re-embedded"
    );

    Ok(IngestOutcome {
        document,
        chunks_stored,
        chunks_skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_clients, FailingEveryNth, KeywordEmbedder};
    use concierge_core::models::SessionMode;
    use concierge_core::prompt::Language;
    use concierge_core::ErrorKind;
    use std::sync::Arc;

    fn text_upload(text: &str, knowledge_base: bool, session_id: Option<String>) -> Upload {
        Upload {
            file_name: "notes.txt".to_string(),
            mime_type: "text/plain".to_string(),
            bytes: text.as_bytes().to_vec(),
            knowledge_base,
            session_id,
        }
    }

    #[tokio::test]
    async fn test_knowledge_base_upload_is_chunked_and_embedded() {
        let (_tmp, clients) = test_clients(|c| c).await;
        let text = "pricing ".repeat(400);
        let outcome = ingest_upload(&clients, text_upload(&text, true, None))
            .await
            .unwrap();

        assert_eq!(outcome.document.document_type, DocumentType::KnowledgeBase);
        assert_eq!(outcome.chunks_stored, 2);
        assert_eq!(outcome.chunks_skipped, 0);
        assert_eq!(
            clients.knowledge().count_chunks(&outcome.document.id).await.unwrap(),
            2
        );
        assert!(outcome.document.url.ends_with(".txt"));
    }

    #[tokio::test]
    async fn test_failed_chunk_is_skipped_not_fatal() {
        let (_tmp, clients) = test_clients(|c| {
            c.with_embedder(Arc::new(FailingEveryNth::new(2)))
        })
        .await;
        let text = "x".repeat(5000);
        let outcome = ingest_upload(&clients, text_upload(&text, true, None))
            .await
            .unwrap();
        // 5000 chars, window 2000, overlap 500 → 3 chunks; the second fails.
        assert_eq!(outcome.chunks_stored, 2);
        assert_eq!(outcome.chunks_skipped, 1);
    }

    #[tokio::test]
    async fn test_validation_happens_before_any_write() {
        let (_tmp, clients) = test_clients(|c| c).await;

        let mut upload = text_upload("hi", true, None);
        upload.mime_type = "image/png".to_string();
        let err = ingest_upload(&clients, upload).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let big = "a".repeat(clients.config().uploads.max_bytes + 1);
        let err = ingest_upload(&clients, text_upload(&big, true, None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = ingest_upload(&clients, text_upload("", true, None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(clients.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_user_upload_requires_paid_session() {
        let (_tmp, clients) = test_clients(|c| c).await;
        let session = sessions::create(clients.pool(), Language::En, serde_json::json!({}))
            .await
            .unwrap();

        let err = ingest_upload(&clients, text_upload("doc", false, Some(session.id.clone())))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BusinessRule);

        let err = ingest_upload(&clients, text_upload("doc", false, Some("missing".into())))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        sessions::update(
            clients.pool(),
            &session.id,
            &sessions::SessionUpdate {
                mode: Some(SessionMode::Paid),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let outcome = ingest_upload(&clients, text_upload("doc", false, Some(session.id.clone())))
            .await
            .unwrap();
        assert_eq!(outcome.chunks_stored, 0);

        let detail = sessions::get_detail(clients.pool(), &session.id).await.unwrap();
        assert_eq!(detail.documents.len(), 1);
        assert_eq!(detail.documents[0].id, outcome.document.id);
    }

    #[tokio::test]
    async fn test_legacy_word_stored_without_chunks() {
        let (_tmp, clients) = test_clients(|c| c).await;
        let upload = Upload {
            file_name: "old.doc".into(),
            mime_type: "application/msword".into(),
            bytes: vec![0xd0, 0xcf, 0x11, 0xe0],
            knowledge_base: true,
            session_id: None,
        };
        let outcome = ingest_upload(&clients, upload).await.unwrap();
        assert!(outcome.document.content_text.is_none());
        assert_eq!(outcome.chunks_stored, 0);
    }

    #[tokio::test]
    async fn test_failed_insert_removes_stored_file() {
        let (tmp, clients) = test_clients(|c| c).await;
        sqlx::query(
            "CREATE TRIGGER reject_documents BEFORE INSERT ON documents
             BEGIN SELECT RAISE(ABORT, 'rejected'); END",
        )
        .execute(clients.pool())
        .await
        .unwrap();

        let err = ingest_upload(&clients, text_upload("pricing", true, None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upstream);

        let bucket = tmp.path().join("files").join(DocumentType::KnowledgeBase.bucket());
        let left = std::fs::read_dir(&bucket).map(|d| d.count()).unwrap_or(0);
        assert_eq!(left, 0);
    }

    #[tokio::test]
    async fn test_reembed_rebuilds_chunks() {
        let (_tmp, clients) = test_clients(|c| c.with_embedder(Arc::new(KeywordEmbedder))).await;
        let outcome = ingest_upload(&clients, text_upload(&"y".repeat(2500), true, None))
            .await
            .unwrap();
        assert_eq!(outcome.chunks_stored, 2);

        let again = reembed_document(&clients, &outcome.document.id).await.unwrap();
        assert_eq!(again.chunks_stored, 2);
        assert_eq!(
            clients.knowledge().count_chunks(&outcome.document.id).await.unwrap(),
            2
        );
    }
}
