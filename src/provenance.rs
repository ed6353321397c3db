//! Provenance ledger: an append-oriented record of every derivation, with
//! enforced depth and parent-chain invariants (spec.md §3.1, §4.1).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::fmt;

use crate::db::schema::ProvenanceRecordRow;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvenanceKind {
    Document,
    OcrResult,
    Chunk,
    Image,
    VlmDescription,
    Embedding,
    Extraction,
    FormFill,
    EntityExtraction,
    Comparison,
    Clustering,
    KnowledgeGraph,
}

impl ProvenanceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvenanceKind::Document => "DOCUMENT",
            ProvenanceKind::OcrResult => "OCR_RESULT",
            ProvenanceKind::Chunk => "CHUNK",
            ProvenanceKind::Image => "IMAGE",
            ProvenanceKind::VlmDescription => "VLM_DESCRIPTION",
            ProvenanceKind::Embedding => "EMBEDDING",
            ProvenanceKind::Extraction => "EXTRACTION",
            ProvenanceKind::FormFill => "FORM_FILL",
            ProvenanceKind::EntityExtraction => "ENTITY_EXTRACTION",
            ProvenanceKind::Comparison => "COMPARISON",
            ProvenanceKind::Clustering => "CLUSTERING",
            ProvenanceKind::KnowledgeGraph => "KNOWLEDGE_GRAPH",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        Some(match s {
            "DOCUMENT" => ProvenanceKind::Document,
            "OCR_RESULT" => ProvenanceKind::OcrResult,
            "CHUNK" => ProvenanceKind::Chunk,
            "IMAGE" => ProvenanceKind::Image,
            "VLM_DESCRIPTION" => ProvenanceKind::VlmDescription,
            "EMBEDDING" => ProvenanceKind::Embedding,
            "EXTRACTION" => ProvenanceKind::Extraction,
            "FORM_FILL" => ProvenanceKind::FormFill,
            "ENTITY_EXTRACTION" => ProvenanceKind::EntityExtraction,
            "COMPARISON" => ProvenanceKind::Comparison,
            "CLUSTERING" => ProvenanceKind::Clustering,
            "KNOWLEDGE_GRAPH" => ProvenanceKind::KnowledgeGraph,
            _ => return None,
        })
    }

    /// Fixed depth lattice (spec.md §3.1): the declared depth of each kind
    /// never varies.
    pub fn lattice_depth(&self) -> i64 {
        match self {
            ProvenanceKind::Document => 0,
            ProvenanceKind::FormFill => 0,
            ProvenanceKind::OcrResult => 1,
            ProvenanceKind::Chunk => 2,
            ProvenanceKind::EntityExtraction => 2,
            ProvenanceKind::KnowledgeGraph => 2,
            ProvenanceKind::Comparison => 2,
            ProvenanceKind::Clustering => 2,
            ProvenanceKind::Embedding => 3,
            // Image/VlmDescription are siblings of Chunk in the extraction
            // lattice: an image is extracted directly from a document.
            ProvenanceKind::Image => 1,
            ProvenanceKind::VlmDescription => 2,
            ProvenanceKind::Extraction => 2,
        }
    }
}

impl fmt::Display for ProvenanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct NewProvenanceRecord {
    pub kind: ProvenanceKind,
    pub source_id: Option<String>,
    pub root_document_id: String,
    pub parent_ids: Vec<String>,
    pub content_hash: String,
    pub input_hash: Option<String>,
    pub file_hash: Option<String>,
    pub processor: String,
    pub processor_version: String,
    pub processing_params: serde_json::Value,
    pub location: Option<serde_json::Value>,
    pub source_file_created_at: Option<String>,
    pub source_file_modified_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub id: String,
    pub kind: ProvenanceKind,
    pub source_id: Option<String>,
    pub root_document_id: String,
    pub parent_ids: Vec<String>,
    pub chain_depth: i64,
    pub chain_path: Vec<String>,
    pub content_hash: String,
    pub input_hash: Option<String>,
    pub file_hash: Option<String>,
    pub processor: String,
    pub processor_version: String,
    pub processing_params: serde_json::Value,
    pub created_at: String,
    pub processed_at: Option<String>,
}

impl TryFrom<ProvenanceRecordRow> for ProvenanceRecord {
    type Error = EngineError;

    fn try_from(row: ProvenanceRecordRow) -> EngineResult<Self> {
        let kind = ProvenanceKind::from_str_loose(&row.kind)
            .ok_or_else(|| EngineError::Internal(format!("unknown provenance kind {}", row.kind)))?;
        Ok(ProvenanceRecord {
            id: row.id,
            kind,
            source_id: row.source_id,
            root_document_id: row.root_document_id,
            parent_ids: serde_json::from_str(&row.parent_ids).unwrap_or_default(),
            chain_depth: row.chain_depth,
            chain_path: row
                .chain_path
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
            content_hash: row.content_hash,
            input_hash: row.input_hash,
            file_hash: row.file_hash,
            processor: row.processor,
            processor_version: row.processor_version,
            processing_params: serde_json::from_str(&row.processing_params).unwrap_or(serde_json::json!({})),
            created_at: row.created_at,
            processed_at: row.processed_at,
        })
    }
}

/// Inserts one provenance record, validating the depth lattice and that
/// `source_id`/`parent_ids` resolve to existing rows. Returns the new id.
pub async fn create(pool: &SqlitePool, record: NewProvenanceRecord) -> EngineResult<String> {
    if record.content_hash.is_empty() || !record.content_hash.contains(':') {
        return Err(EngineError::InvalidChain(
            "content_hash must be non-empty and prefixed (e.g. sha256:...)".into(),
        ));
    }

    let expected_depth = record.kind.lattice_depth();

    let mut parent_kinds: Vec<String> = Vec::new();
    let mut chain_depth = expected_depth;

    if let Some(ref source_id) = record.source_id {
        let source = get(pool, source_id)
            .await?
            .ok_or_else(|| EngineError::InvalidChain(format!("source_id {source_id} does not resolve")))?;
        if source.kind.lattice_depth() >= expected_depth && expected_depth != 0 {
            return Err(EngineError::InvalidChain(format!(
                "source {} (depth {}) cannot precede {} (depth {})",
                source_id,
                source.kind.lattice_depth(),
                record.kind,
                expected_depth
            )));
        }
        parent_kinds = source.chain_path.clone();
        parent_kinds.push(source.kind.as_str().to_string());
        chain_depth = expected_depth;
    }

    for parent_id in &record.parent_ids {
        if get(pool, parent_id).await?.is_none() {
            return Err(EngineError::InvalidChain(format!(
                "parent_id {parent_id} does not resolve to an existing provenance row"
            )));
        }
    }

    if chain_depth != expected_depth {
        return Err(EngineError::InvalidChain(format!(
            "chain_depth {chain_depth} does not match lattice depth {expected_depth} for kind {}",
            record.kind
        )));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO provenance_records (
            id, kind, source_id, root_document_id, parent_ids, chain_depth,
            chain_path, content_hash, input_hash, file_hash, processor,
            processor_version, processing_params, created_at, processed_at,
            source_file_created_at, source_file_modified_at, location
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(record.kind.as_str())
    .bind(&record.source_id)
    .bind(&record.root_document_id)
    .bind(serde_json::to_string(&record.parent_ids)?)
    .bind(chain_depth)
    .bind(serde_json::to_string(&parent_kinds)?)
    .bind(&record.content_hash)
    .bind(&record.input_hash)
    .bind(&record.file_hash)
    .bind(&record.processor)
    .bind(&record.processor_version)
    .bind(record.processing_params.to_string())
    .bind(&now)
    .bind(&now)
    .bind(&record.source_file_created_at)
    .bind(&record.source_file_modified_at)
    .bind(record.location.map(|v| v.to_string()))
    .execute(pool)
    .await?;

    Ok(id)
}

pub async fn get(pool: &SqlitePool, id: &str) -> EngineResult<Option<ProvenanceRecord>> {
    let row: Option<ProvenanceRecordRow> =
        sqlx::query_as("SELECT * FROM provenance_records WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
    row.map(ProvenanceRecord::try_from).transpose()
}

/// Returns the ordered chain from `id` back to its root DOCUMENT, following
/// `source_id` first, then the first entry of `parent_ids`.
pub async fn chain(pool: &SqlitePool, id: &str) -> EngineResult<Vec<ProvenanceRecord>> {
    let mut visited: HashMap<String, ()> = HashMap::new();
    let mut out = Vec::new();
    let mut current_id = id.to_string();

    loop {
        if visited.contains_key(&current_id) {
            return Err(EngineError::ProvenanceChainBroken(format!(
                "cycle detected at {current_id}"
            )));
        }
        visited.insert(current_id.clone(), ());

        let record = get(pool, &current_id)
            .await?
            .ok_or_else(|| EngineError::ProvenanceChainBroken(current_id.clone()))?;

        let next_id = record
            .source_id
            .clone()
            .or_else(|| record.parent_ids.first().cloned());

        let is_root = record.kind == ProvenanceKind::Document;
        out.push(record);

        if is_root {
            break;
        }
        match next_id {
            Some(next) => current_id = next,
            None => return Err(EngineError::ProvenanceChainBroken(current_id)),
        }
    }

    Ok(out)
}
