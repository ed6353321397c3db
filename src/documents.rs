//! Document registration and the status state machine (spec.md §3.2, §4.8).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use crate::db::schema::DocumentRow;
use crate::error::{EngineError, EngineResult};
use crate::hashid::{content_hash, new_id};
use crate::provenance::{self, NewProvenanceRecord, ProvenanceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Complete,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Complete => "complete",
            DocumentStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub file_path: String,
    pub file_name: String,
    pub file_hash: String,
    pub file_size: i64,
    pub file_type: String,
    pub status: String,
    pub page_count: Option<i64>,
    pub provenance_id: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<DocumentRow> for Document {
    fn from(row: DocumentRow) -> Self {
        Document {
            id: row.id,
            file_path: row.file_path,
            file_name: row.file_name,
            file_hash: row.file_hash,
            file_size: row.file_size,
            file_type: row.file_type,
            status: row.status,
            page_count: row.page_count,
            provenance_id: row.provenance_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Registers a new document. Fails with `VALIDATION_ERROR` if a document
/// with the same `file_hash` is already registered (spec.md §3.2: "file_hash
/// unique per active row").
pub async fn register_document(
    pool: &SqlitePool,
    file_path: &str,
    file_name: &str,
    file_bytes: &[u8],
    file_type: &str,
) -> EngineResult<Document> {
    let file_hash = content_hash(file_bytes);

    let existing: Option<DocumentRow> = sqlx::query_as("SELECT * FROM documents WHERE file_hash = ?")
        .bind(&file_hash)
        .fetch_optional(pool)
        .await?;
    if existing.is_some() {
        return Err(EngineError::Validation(format!(
            "a document with file_hash {file_hash} is already registered"
        )));
    }

    let mut tx = pool.begin().await?;

    let provenance_id = provenance::create(
        pool,
        NewProvenanceRecord {
            kind: ProvenanceKind::Document,
            source_id: None,
            root_document_id: "pending".into(),
            parent_ids: vec![],
            content_hash: file_hash.clone(),
            input_hash: None,
            file_hash: Some(file_hash.clone()),
            processor: "ingest".into(),
            processor_version: "1".into(),
            processing_params: serde_json::json!({}),
            location: None,
            source_file_created_at: None,
            source_file_modified_at: None,
        },
    )
    .await?;

    let id = new_id();
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO documents (
            id, file_path, file_name, file_hash, file_size, file_type,
            status, page_count, provenance_id, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, 'pending', NULL, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(file_path)
    .bind(file_name)
    .bind(&file_hash)
    .bind(file_bytes.len() as i64)
    .bind(file_type)
    .bind(&provenance_id)
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE provenance_records SET root_document_id = ? WHERE id = ?",
    )
    .bind(&id)
    .bind(&provenance_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO uploaded_files (file_hash, original_path, ingested_at) VALUES (?, ?, ?)")
        .bind(&file_hash)
        .bind(file_path)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    get_document(pool, &id)
        .await?
        .ok_or_else(|| EngineError::Internal("document vanished immediately after insert".into()))
}

pub async fn get_document(pool: &SqlitePool, id: &str) -> EngineResult<Option<Document>> {
    let row: Option<DocumentRow> = sqlx::query_as("SELECT * FROM documents WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(Document::from))
}

/// Transitions `pending -> processing`. Reverse or skipped transitions are
/// rejected (spec.md §4.8).
pub async fn transition_status(pool: &SqlitePool, id: &str, to: DocumentStatus) -> EngineResult<()> {
    let doc = get_document(pool, id)
        .await?
        .ok_or_else(|| EngineError::DocumentNotFound(id.to_string()))?;

    let from = match doc.status.as_str() {
        "pending" => DocumentStatus::Pending,
        "processing" => DocumentStatus::Processing,
        "complete" => DocumentStatus::Complete,
        "failed" => DocumentStatus::Failed,
        other => return Err(EngineError::Internal(format!("unknown document status {other}"))),
    };

    let allowed = matches!(
        (from, to),
        (DocumentStatus::Pending, DocumentStatus::Processing)
            | (DocumentStatus::Processing, DocumentStatus::Complete)
            | (DocumentStatus::Processing, DocumentStatus::Failed)
    );
    if !allowed {
        return Err(EngineError::Validation(format!(
            "illegal document status transition {} -> {}",
            from.as_str(),
            to.as_str()
        )));
    }

    let now = Utc::now().to_rfc3339();
    sqlx::query("UPDATE documents SET status = ?, updated_at = ? WHERE id = ?")
        .bind(to.as_str())
        .bind(&now)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Atomically claims one pending document, transitioning it to `processing`
/// in a single conditional update so concurrent workers never double-pick
/// the same document (spec.md §4.8, §5, Glossary "Atomic claim").
pub async fn claim_pending_document(pool: &SqlitePool) -> EngineResult<Option<Document>> {
    let now = Utc::now().to_rfc3339();
    let row = sqlx::query(
        r#"
        UPDATE documents
        SET status = 'processing', updated_at = ?
        WHERE id = (
            SELECT id FROM documents WHERE status = 'pending' ORDER BY created_at ASC LIMIT 1
        )
        AND status = 'pending'
        RETURNING id
        "#,
    )
    .bind(&now)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let id: String = row.try_get("id")?;
    get_document(pool, &id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::db::Database;

    async fn setup() -> SqlitePool {
        Database::open_in_memory(&EngineConfig::default()).await.unwrap().pool().clone()
    }

    #[tokio::test]
    async fn register_then_duplicate_hash_rejected() {
        let pool = setup().await;
        register_document(&pool, "/a.pdf", "a.pdf", b"content", "pdf").await.unwrap();
        let result = register_document(&pool, "/b.pdf", "b.pdf", b"content", "pdf").await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[tokio::test]
    async fn status_transitions_are_forward_only() {
        let pool = setup().await;
        let doc = register_document(&pool, "/a.pdf", "a.pdf", b"x", "pdf").await.unwrap();
        transition_status(&pool, &doc.id, DocumentStatus::Processing).await.unwrap();
        let bad = transition_status(&pool, &doc.id, DocumentStatus::Pending).await;
        assert!(bad.is_err());
        transition_status(&pool, &doc.id, DocumentStatus::Complete).await.unwrap();
    }

    #[tokio::test]
    async fn atomic_claim_hands_out_distinct_documents() {
        let pool = setup().await;
        register_document(&pool, "/a.pdf", "a.pdf", b"a", "pdf").await.unwrap();
        register_document(&pool, "/b.pdf", "b.pdf", b"b", "pdf").await.unwrap();

        let first = claim_pending_document(&pool).await.unwrap().unwrap();
        let second = claim_pending_document(&pool).await.unwrap().unwrap();
        assert_ne!(first.id, second.id);

        let third = claim_pending_document(&pool).await.unwrap();
        assert!(third.is_none());
    }
}
