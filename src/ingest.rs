//! OCR -> chunk -> embed ingestion pipeline (spec.md §4.1 row-level
//! invariants for OcrResult/Chunk/Embedding). Generalized from the teacher's
//! `processing::process_document`: the Tauri event emission and Python
//! sidecar calls are gone, replaced by calls through the `OcrService` /
//! `Chunker` / `Embedder` collaborator traits (`crate::collaborators`).

use chrono::Utc;
use sqlx::SqlitePool;

use crate::collaborators::{ChunkResult, Chunker, Embedder, OcrService};
use crate::documents::{self, Document, DocumentStatus};
use crate::error::{EngineError, EngineResult};
use crate::hashid::{content_hash, new_id};
use crate::provenance::{self, NewProvenanceRecord, ProvenanceKind};

/// Runs OCR, chunking, and embedding for one registered document in order,
/// transitioning its status `pending -> processing -> {complete, failed}`
/// (spec.md §4.8). Returns the document's chunk ids on success.
pub async fn ingest_document(
    pool: &SqlitePool,
    document_id: &str,
    ocr: &dyn OcrService,
    chunker: &dyn Chunker,
    embedder: &dyn Embedder,
) -> EngineResult<Vec<String>> {
    let doc = documents::get_document(pool, document_id)
        .await?
        .ok_or_else(|| EngineError::DocumentNotFound(document_id.to_string()))?;

    documents::transition_status(pool, document_id, DocumentStatus::Processing).await?;

    match run_pipeline(pool, &doc, ocr, chunker, embedder).await {
        Ok(chunk_ids) => {
            documents::transition_status(pool, document_id, DocumentStatus::Complete).await?;
            Ok(chunk_ids)
        }
        Err(e) => {
            // Best-effort: a failure to record the failure transition must
            // not mask the original error.
            let _ = documents::transition_status(pool, document_id, DocumentStatus::Failed).await;
            Err(e)
        }
    }
}

async fn run_pipeline(
    pool: &SqlitePool,
    doc: &Document,
    ocr: &dyn OcrService,
    chunker: &dyn Chunker,
    embedder: &dyn Embedder,
) -> EngineResult<Vec<String>> {
    let file_bytes = std::fs::read(&doc.file_path)?;

    let ocr_output = ocr.process(&file_bytes, &doc.file_name).await?;

    let ocr_content_hash = content_hash(ocr_output.text.as_bytes());
    let ocr_provenance_id = provenance::create(
        pool,
        NewProvenanceRecord {
            kind: ProvenanceKind::OcrResult,
            source_id: Some(doc.provenance_id.clone()),
            root_document_id: doc.id.clone(),
            parent_ids: vec![],
            content_hash: ocr_content_hash.clone(),
            input_hash: None,
            file_hash: Some(doc.file_hash.clone()),
            processor: "ocr".into(),
            processor_version: "1".into(),
            processing_params: serde_json::json!({ "mode": "default" }),
            location: None,
            source_file_created_at: None,
            source_file_modified_at: None,
        },
    )
    .await?;

    let ocr_result_id = new_id();
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO ocr_results (
            id, document_id, extracted_text, text_length, page_count,
            quality_score, mode, cost, content_hash, provenance_id, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&ocr_result_id)
    .bind(&doc.id)
    .bind(&ocr_output.text)
    .bind(ocr_output.text.len() as i64)
    .bind(ocr_output.page_count)
    .bind(ocr_output.quality)
    .bind("default")
    .bind(ocr_output.cost)
    .bind(&ocr_content_hash)
    .bind(&ocr_provenance_id)
    .bind(&now)
    .execute(pool)
    .await?;

    let chunk_results = chunker.chunk(&ocr_output.text, &ocr_output.page_offsets, Some(&ocr_output.blocks_json));
    let mut chunk_ids = Vec::with_capacity(chunk_results.len());

    for (idx, chunk) in chunk_results.iter().enumerate() {
        let chunk_id = insert_chunk(pool, doc, &ocr_result_id, idx as i64, chunk).await?;
        chunk_ids.push(chunk_id);
    }

    if !chunk_ids.is_empty() {
        let texts: Vec<String> = chunk_results.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder
            .embed(&texts)
            .await
            .map_err(|e| EngineError::EmbeddingFailed(e.to_string()))?;

        if vectors.len() != chunk_ids.len() {
            return Err(EngineError::EmbeddingFailed(format!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunk_ids.len()
            )));
        }

        for ((chunk_id, text), vector) in chunk_ids.iter().zip(texts.iter()).zip(vectors.into_iter()) {
            embed_chunk(pool, doc, chunk_id, text, vector, embedder).await?;
        }
    }

    sqlx::query("UPDATE documents SET page_count = ? WHERE id = ?")
        .bind(ocr_output.page_count)
        .bind(&doc.id)
        .execute(pool)
        .await?;

    Ok(chunk_ids)
}

async fn insert_chunk(
    pool: &SqlitePool,
    doc: &Document,
    ocr_result_id: &str,
    chunk_index: i64,
    chunk: &ChunkResult,
) -> EngineResult<String> {
    let chunk_content_hash = content_hash(chunk.text.as_bytes());

    let provenance_id = provenance::create(
        pool,
        NewProvenanceRecord {
            kind: ProvenanceKind::Chunk,
            source_id: None,
            root_document_id: doc.id.clone(),
            parent_ids: vec![ocr_result_id.to_string()],
            content_hash: chunk_content_hash.clone(),
            input_hash: None,
            file_hash: Some(doc.file_hash.clone()),
            processor: "chunker".into(),
            processor_version: "1".into(),
            processing_params: serde_json::json!({}),
            location: None,
            source_file_created_at: None,
            source_file_modified_at: None,
        },
    )
    .await?;

    let chunk_id = new_id();
    let now = Utc::now().to_rfc3339();
    let page_range = chunk.heading_context.as_ref().map(|_| chunk.page_number.map(|p| p.to_string()).unwrap_or_default());

    sqlx::query(
        r#"
        INSERT INTO chunks (
            id, document_id, ocr_result_id, text, text_hash, chunk_index,
            character_start, character_end, page_number, page_range,
            overlap_prev, overlap_next, embedding_status, provenance_id, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0, 'pending', ?, ?)
        "#,
    )
    .bind(&chunk_id)
    .bind(&doc.id)
    .bind(ocr_result_id)
    .bind(&chunk.text)
    .bind(&chunk_content_hash)
    .bind(chunk_index)
    .bind(chunk.character_start as i64)
    .bind(chunk.character_end as i64)
    .bind(chunk.page_number.map(|p| p as i64))
    .bind(page_range)
    .bind(&provenance_id)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(chunk_id)
}

async fn embed_chunk(
    pool: &SqlitePool,
    doc: &Document,
    chunk_id: &str,
    text: &str,
    vector: Vec<f32>,
    embedder: &dyn Embedder,
) -> EngineResult<()> {
    let embedding_content_hash = content_hash(text.as_bytes());

    let provenance_id = provenance::create(
        pool,
        NewProvenanceRecord {
            kind: ProvenanceKind::Embedding,
            source_id: None,
            root_document_id: doc.id.clone(),
            parent_ids: vec![],
            content_hash: embedding_content_hash.clone(),
            input_hash: None,
            file_hash: Some(doc.file_hash.clone()),
            processor: embedder.model_name().to_string(),
            processor_version: embedder.model_version().to_string(),
            processing_params: serde_json::json!({}),
            location: None,
            source_file_created_at: None,
            source_file_modified_at: None,
        },
    )
    .await?;

    let embedding_id = new_id();
    let now = Utc::now().to_rfc3339();

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO embeddings (
            id, document_id, chunk_id, image_id, extraction_id, original_text,
            original_text_length, model_name, model_version, content_hash,
            provenance_id, created_at
        ) VALUES (?, ?, ?, NULL, NULL, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&embedding_id)
    .bind(&doc.id)
    .bind(chunk_id)
    .bind(text)
    .bind(text.len() as i64)
    .bind(embedder.model_name())
    .bind(embedder.model_version())
    .bind(&embedding_content_hash)
    .bind(&provenance_id)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO vectors (embedding_id, vector, dimension) VALUES (?, ?, ?)")
        .bind(&embedding_id)
        .bind(serde_json::to_string(&vector)?)
        .bind(vector.len() as i64)
        .execute(&mut *tx)
        .await?;

    sqlx::query("UPDATE chunks SET embedding_status = 'complete' WHERE id = ?")
        .bind(chunk_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{MockEmbedder, OcrOutput};
    use crate::config::EngineConfig;
    use crate::db::Database;
    use async_trait::async_trait;

    struct FixedOcr {
        text: &'static str,
    }

    #[async_trait]
    impl OcrService for FixedOcr {
        async fn process(&self, _document_bytes: &[u8], _file_name: &str) -> EngineResult<OcrOutput> {
            Ok(OcrOutput {
                text: self.text.to_string(),
                page_count: 1,
                page_offsets: vec![(0, self.text.len(), 1)],
                blocks_json: serde_json::json!({}),
                quality: Some(0.95),
                duration_ms: 10,
                cost: Some(0.0),
            })
        }
    }

    struct WordChunker {
        words_per_chunk: usize,
    }

    impl Chunker for WordChunker {
        fn chunk(
            &self,
            text: &str,
            _page_offsets: &[(usize, usize, u32)],
            _blocks: Option<&serde_json::Value>,
        ) -> Vec<ChunkResult> {
            let words: Vec<&str> = text.split_whitespace().collect();
            words
                .chunks(self.words_per_chunk)
                .map(|w| ChunkResult {
                    text: w.join(" "),
                    character_start: 0,
                    character_end: w.join(" ").len(),
                    page_number: Some(1),
                    heading_context: None,
                    section_path: None,
                    content_type: Some("text".into()),
                    atomic: false,
                })
                .collect()
        }
    }

    async fn setup() -> SqlitePool {
        Database::open_in_memory(&EngineConfig::default()).await.unwrap().pool().clone()
    }

    #[tokio::test]
    async fn ingest_produces_chunks_and_embeddings_and_completes_document() {
        let pool = setup().await;
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), b"raw bytes").unwrap();

        let doc = documents::register_document(
            &pool,
            tmp.path().to_str().unwrap(),
            "memo.txt",
            b"raw bytes",
            "text/plain",
        )
        .await
        .unwrap();

        let ocr = FixedOcr { text: "one two three four five six" };
        let chunker = WordChunker { words_per_chunk: 3 };
        let embedder = MockEmbedder::default();

        let chunk_ids = ingest_document(&pool, &doc.id, &ocr, &chunker, &embedder).await.unwrap();
        assert_eq!(chunk_ids.len(), 2);

        let updated = documents::get_document(&pool, &doc.id).await.unwrap().unwrap();
        assert_eq!(updated.status, "complete");
        assert_eq!(updated.page_count, Some(1));

        let embedding_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings WHERE document_id = ?")
            .bind(&doc.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(embedding_count, 2);

        let vector_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(vector_count, 2);
    }

    #[tokio::test]
    async fn ocr_failure_transitions_document_to_failed() {
        struct FailingOcr;

        #[async_trait]
        impl OcrService for FailingOcr {
            async fn process(&self, _document_bytes: &[u8], _file_name: &str) -> EngineResult<OcrOutput> {
                Err(EngineError::OcrApiError("provider unavailable".into()))
            }
        }

        let pool = setup().await;
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), b"raw bytes").unwrap();

        let doc = documents::register_document(
            &pool,
            tmp.path().to_str().unwrap(),
            "memo.txt",
            b"raw bytes",
            "text/plain",
        )
        .await
        .unwrap();

        let chunker = WordChunker { words_per_chunk: 3 };
        let embedder = MockEmbedder::default();

        let result = ingest_document(&pool, &doc.id, &FailingOcr, &chunker, &embedder).await;
        assert!(matches!(result, Err(EngineError::OcrApiError(_))));

        let updated = documents::get_document(&pool, &doc.id).await.unwrap().unwrap();
        assert_eq!(updated.status, "failed");
    }
}
