//! Table definitions for the provenance ledger, the relational store, and
//! the knowledge graph, plus the matching row structs.
//!
//! All primary/foreign keys are TEXT (stringified UUIDs), all timestamps are
//! TEXT (RFC 3339), and all JSON-valued columns are stored as TEXT and
//! parsed on read — the convention the teacher repo uses throughout
//! `db/schema.rs` for `metadata`, `aliases`, and embedding columns.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL
);

INSERT OR IGNORE INTO schema_version (id, version) VALUES (1, 1);

CREATE TABLE IF NOT EXISTS provenance_records (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL CHECK (kind IN (
        'DOCUMENT', 'OCR_RESULT', 'CHUNK', 'IMAGE', 'VLM_DESCRIPTION',
        'EMBEDDING', 'EXTRACTION', 'FORM_FILL', 'ENTITY_EXTRACTION',
        'COMPARISON', 'CLUSTERING', 'KNOWLEDGE_GRAPH'
    )),
    source_id TEXT REFERENCES provenance_records(id),
    root_document_id TEXT NOT NULL,
    parent_ids TEXT NOT NULL DEFAULT '[]',
    chain_depth INTEGER NOT NULL,
    chain_path TEXT,
    content_hash TEXT NOT NULL,
    input_hash TEXT,
    file_hash TEXT,
    processor TEXT NOT NULL,
    processor_version TEXT NOT NULL,
    processing_params TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    processed_at TEXT,
    source_file_created_at TEXT,
    source_file_modified_at TEXT,
    location TEXT
);

CREATE INDEX IF NOT EXISTS idx_provenance_root ON provenance_records(root_document_id);

CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    file_path TEXT NOT NULL,
    file_name TEXT NOT NULL,
    file_hash TEXT NOT NULL UNIQUE,
    file_size INTEGER NOT NULL,
    file_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'processing', 'complete', 'failed')),
    page_count INTEGER,
    provenance_id TEXT NOT NULL REFERENCES provenance_records(id),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ocr_results (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL UNIQUE REFERENCES documents(id),
    extracted_text TEXT NOT NULL,
    text_length INTEGER NOT NULL,
    page_count INTEGER NOT NULL,
    quality_score REAL,
    mode TEXT NOT NULL,
    cost REAL,
    content_hash TEXT NOT NULL,
    provenance_id TEXT NOT NULL REFERENCES provenance_records(id),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES documents(id),
    ocr_result_id TEXT NOT NULL REFERENCES ocr_results(id),
    text TEXT NOT NULL,
    text_hash TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    character_start INTEGER NOT NULL,
    character_end INTEGER NOT NULL,
    page_number INTEGER,
    page_range TEXT,
    overlap_prev INTEGER NOT NULL DEFAULT 0,
    overlap_next INTEGER NOT NULL DEFAULT 0,
    embedding_status TEXT NOT NULL DEFAULT 'pending' CHECK (embedding_status IN ('pending', 'complete', 'failed')),
    provenance_id TEXT NOT NULL REFERENCES provenance_records(id),
    created_at TEXT NOT NULL,
    UNIQUE (document_id, chunk_index)
);

CREATE TABLE IF NOT EXISTS images (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES documents(id),
    page_number INTEGER,
    image_path TEXT NOT NULL,
    description TEXT,
    provenance_id TEXT REFERENCES provenance_records(id),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS extractions (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES documents(id),
    extraction_type TEXT NOT NULL,
    payload TEXT NOT NULL DEFAULT '{}',
    provenance_id TEXT NOT NULL REFERENCES provenance_records(id),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS form_fills (
    id TEXT PRIMARY KEY,
    source_file_hash TEXT NOT NULL,
    form_template TEXT NOT NULL,
    field_values TEXT NOT NULL DEFAULT '{}',
    provenance_id TEXT NOT NULL REFERENCES provenance_records(id),
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_form_fills_source_hash ON form_fills(source_file_hash);

CREATE TABLE IF NOT EXISTS embeddings (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES documents(id),
    chunk_id TEXT REFERENCES chunks(id),
    image_id TEXT REFERENCES images(id),
    extraction_id TEXT REFERENCES extractions(id),
    original_text TEXT NOT NULL,
    original_text_length INTEGER NOT NULL,
    model_name TEXT NOT NULL,
    model_version TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    provenance_id TEXT NOT NULL REFERENCES provenance_records(id),
    created_at TEXT NOT NULL,
    CHECK (
        (chunk_id IS NOT NULL) + (image_id IS NOT NULL) + (extraction_id IS NOT NULL) = 1
    )
);

CREATE TABLE IF NOT EXISTS vectors (
    embedding_id TEXT PRIMARY KEY REFERENCES embeddings(id) ON DELETE CASCADE,
    vector TEXT NOT NULL,
    dimension INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES documents(id),
    entity_type TEXT NOT NULL CHECK (entity_type IN (
        'person', 'organization', 'date', 'amount', 'case_number', 'location',
        'statute', 'exhibit', 'medication', 'diagnosis', 'medical_device', 'other'
    )),
    raw_text TEXT NOT NULL,
    normalized_text TEXT NOT NULL,
    confidence REAL NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    provenance_id TEXT NOT NULL REFERENCES provenance_records(id),
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_entities_document ON entities(document_id);
CREATE INDEX IF NOT EXISTS idx_entities_normalized ON entities(entity_type, normalized_text);

CREATE TABLE IF NOT EXISTS entity_mentions (
    id TEXT PRIMARY KEY,
    entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    document_id TEXT NOT NULL REFERENCES documents(id),
    chunk_id TEXT REFERENCES chunks(id),
    page_number INTEGER,
    char_start INTEGER,
    char_end INTEGER,
    context_text TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_mentions_entity ON entity_mentions(entity_id);

CREATE TABLE IF NOT EXISTS knowledge_nodes (
    id TEXT PRIMARY KEY,
    entity_type TEXT NOT NULL,
    canonical_name TEXT NOT NULL,
    normalized_name TEXT NOT NULL,
    aliases TEXT NOT NULL DEFAULT '[]',
    document_count INTEGER NOT NULL DEFAULT 0 CHECK (document_count >= 0),
    mention_count INTEGER NOT NULL DEFAULT 0,
    edge_count INTEGER NOT NULL DEFAULT 0 CHECK (edge_count >= 0),
    avg_confidence REAL NOT NULL DEFAULT 0,
    metadata TEXT NOT NULL DEFAULT '{}',
    provenance_id TEXT NOT NULL REFERENCES provenance_records(id),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_nodes_type ON knowledge_nodes(entity_type);
CREATE INDEX IF NOT EXISTS idx_nodes_document_count ON knowledge_nodes(document_count DESC);

CREATE VIRTUAL TABLE IF NOT EXISTS knowledge_nodes_fts USING fts5(
    id UNINDEXED,
    canonical_name,
    content = knowledge_nodes,
    content_rowid = rowid,
    tokenize = 'porter unicode61'
);

CREATE TRIGGER IF NOT EXISTS knowledge_nodes_ai AFTER INSERT ON knowledge_nodes BEGIN
    INSERT INTO knowledge_nodes_fts(rowid, id, canonical_name)
    VALUES (new.rowid, new.id, new.canonical_name);
END;

CREATE TRIGGER IF NOT EXISTS knowledge_nodes_ad AFTER DELETE ON knowledge_nodes BEGIN
    INSERT INTO knowledge_nodes_fts(knowledge_nodes_fts, rowid, id, canonical_name)
    VALUES ('delete', old.rowid, old.id, old.canonical_name);
END;

CREATE TRIGGER IF NOT EXISTS knowledge_nodes_au AFTER UPDATE OF canonical_name ON knowledge_nodes BEGIN
    INSERT INTO knowledge_nodes_fts(knowledge_nodes_fts, rowid, id, canonical_name)
    VALUES ('delete', old.rowid, old.id, old.canonical_name);
    INSERT INTO knowledge_nodes_fts(rowid, id, canonical_name)
    VALUES (new.rowid, new.id, new.canonical_name);
END;

CREATE TABLE IF NOT EXISTS node_entity_links (
    id TEXT PRIMARY KEY,
    node_id TEXT NOT NULL REFERENCES knowledge_nodes(id),
    entity_id TEXT NOT NULL UNIQUE REFERENCES entities(id) ON DELETE CASCADE,
    document_id TEXT NOT NULL,
    similarity_score REAL NOT NULL,
    resolution_method TEXT NOT NULL CHECK (resolution_method IN ('exact', 'fuzzy', 'ai')),
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_links_node ON node_entity_links(node_id);

CREATE TABLE IF NOT EXISTS knowledge_edges (
    id TEXT PRIMARY KEY,
    source_node_id TEXT NOT NULL REFERENCES knowledge_nodes(id),
    target_node_id TEXT NOT NULL REFERENCES knowledge_nodes(id),
    relationship_type TEXT NOT NULL CHECK (relationship_type IN (
        'co_mentioned', 'co_located', 'works_at', 'represents', 'located_in',
        'filed_in', 'cites', 'references', 'party_to', 'related_to', 'precedes',
        'occurred_at', 'treated_with', 'administered_via', 'managed_by', 'interacts_with'
    )),
    weight REAL NOT NULL CHECK (weight >= 0 AND weight <= 1),
    evidence_count INTEGER NOT NULL CHECK (evidence_count >= 1),
    document_ids TEXT NOT NULL DEFAULT '[]',
    metadata TEXT NOT NULL DEFAULT '{}',
    provenance_id TEXT NOT NULL REFERENCES provenance_records(id),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK (source_node_id < target_node_id),
    UNIQUE (source_node_id, target_node_id, relationship_type)
);

CREATE INDEX IF NOT EXISTS idx_edges_source ON knowledge_edges(source_node_id);
CREATE INDEX IF NOT EXISTS idx_edges_target ON knowledge_edges(target_node_id);

CREATE TABLE IF NOT EXISTS comparisons (
    id TEXT PRIMARY KEY,
    document_id_a TEXT NOT NULL REFERENCES documents(id),
    document_id_b TEXT NOT NULL REFERENCES documents(id),
    comparison_type TEXT NOT NULL,
    result TEXT NOT NULL DEFAULT '{}',
    provenance_id TEXT NOT NULL REFERENCES provenance_records(id),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS clusters (
    id TEXT PRIMARY KEY,
    classification_tag TEXT NOT NULL,
    provenance_id TEXT NOT NULL REFERENCES provenance_records(id),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS document_clusters (
    document_id TEXT NOT NULL REFERENCES documents(id),
    cluster_id TEXT NOT NULL REFERENCES clusters(id),
    PRIMARY KEY (document_id, cluster_id)
);

CREATE TABLE IF NOT EXISTS uploaded_files (
    file_hash TEXT PRIMARY KEY,
    original_path TEXT NOT NULL,
    ingested_at TEXT NOT NULL
);
"#;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProvenanceRecordRow {
    pub id: String,
    pub kind: String,
    pub source_id: Option<String>,
    pub root_document_id: String,
    pub parent_ids: String,
    pub chain_depth: i64,
    pub chain_path: Option<String>,
    pub content_hash: String,
    pub input_hash: Option<String>,
    pub file_hash: Option<String>,
    pub processor: String,
    pub processor_version: String,
    pub processing_params: String,
    pub created_at: String,
    pub processed_at: Option<String>,
    pub source_file_created_at: Option<String>,
    pub source_file_modified_at: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DocumentRow {
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

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OcrResultRow {
    pub id: String,
    pub document_id: String,
    pub extracted_text: String,
    pub text_length: i64,
    pub page_count: i64,
    pub quality_score: Option<f64>,
    pub mode: String,
    pub cost: Option<f64>,
    pub content_hash: String,
    pub provenance_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChunkRow {
    pub id: String,
    pub document_id: String,
    pub ocr_result_id: String,
    pub text: String,
    pub text_hash: String,
    pub chunk_index: i64,
    pub character_start: i64,
    pub character_end: i64,
    pub page_number: Option<i64>,
    pub page_range: Option<String>,
    pub overlap_prev: i64,
    pub overlap_next: i64,
    pub embedding_status: String,
    pub provenance_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EmbeddingRow {
    pub id: String,
    pub document_id: String,
    pub chunk_id: Option<String>,
    pub image_id: Option<String>,
    pub extraction_id: Option<String>,
    pub original_text: String,
    pub original_text_length: i64,
    pub model_name: String,
    pub model_version: String,
    pub content_hash: String,
    pub provenance_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct VectorRow {
    pub embedding_id: String,
    pub vector: String,
    pub dimension: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EntityRow {
    pub id: String,
    pub document_id: String,
    pub entity_type: String,
    pub raw_text: String,
    pub normalized_text: String,
    pub confidence: f64,
    pub metadata: String,
    pub provenance_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EntityMentionRow {
    pub id: String,
    pub entity_id: String,
    pub document_id: String,
    pub chunk_id: Option<String>,
    pub page_number: Option<i64>,
    pub char_start: Option<i64>,
    pub char_end: Option<i64>,
    pub context_text: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct KnowledgeNodeRow {
    pub id: String,
    pub entity_type: String,
    pub canonical_name: String,
    pub normalized_name: String,
    pub aliases: String,
    pub document_count: i64,
    pub mention_count: i64,
    pub edge_count: i64,
    pub avg_confidence: f64,
    pub metadata: String,
    pub provenance_id: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NodeEntityLinkRow {
    pub id: String,
    pub node_id: String,
    pub entity_id: String,
    pub document_id: String,
    pub similarity_score: f64,
    pub resolution_method: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct KnowledgeEdgeRow {
    pub id: String,
    pub source_node_id: String,
    pub target_node_id: String,
    pub relationship_type: String,
    pub weight: f64,
    pub evidence_count: i64,
    pub document_ids: String,
    pub metadata: String,
    pub provenance_id: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClusterRow {
    pub id: String,
    pub classification_tag: String,
    pub provenance_id: String,
    pub created_at: String,
}
