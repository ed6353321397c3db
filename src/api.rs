//! Transport-neutral tool surface (spec.md §6.3): one function per exposed
//! operation. Every operation returns `Envelope<T>` rather than propagating
//! `EngineError` directly, matching the `{success, data?, error?}` result
//! envelope spec.md §6.3 and §7 describe, so any caller (CLI, IPC, HTTP) sees
//! a uniform shape regardless of transport.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::collaborators::Generator;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::graph::{builder, cascade, classifier, incremental, query};
use crate::resolver::{self, ResolutionMode};

#[derive(Debug, Serialize)]
pub struct ErrorInfo {
    pub category: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl<T: Serialize> Envelope<T> {
    fn from_result(result: EngineResult<T>) -> Self {
        match result {
            Ok(data) => Envelope { success: true, data: Some(data), error: None },
            Err(e) => Envelope {
                success: false,
                data: None,
                error: Some(ErrorInfo { category: e.category().to_string(), message: e.to_string() }),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BuildGraphInput {
    pub document_filter: Option<Vec<String>>,
    pub resolution_mode: ResolutionMode,
    #[serde(default)]
    pub classify_relationships: bool,
    #[serde(default)]
    pub rebuild: bool,
}

#[derive(Debug, Serialize)]
pub struct BuildGraphOutput {
    pub documents_processed: usize,
    pub nodes_touched: usize,
    pub edges_built: usize,
    pub edges_classified: usize,
}

/// spec.md §6.3 `build_graph`: resolves entities for the targeted documents
/// (or every registered document when `document_filter` is absent), rebuilds
/// co-occurrence edges, and optionally runs the relationship classifier.
/// `rebuild=true` first clears derived graph state so the run starts clean.
pub async fn build_graph(
    pool: &SqlitePool,
    generator: &dyn Generator,
    config: &EngineConfig,
    input: BuildGraphInput,
) -> Envelope<BuildGraphOutput> {
    Envelope::from_result(build_graph_inner(pool, generator, config, input).await)
}

async fn build_graph_inner(
    pool: &SqlitePool,
    generator: &dyn Generator,
    config: &EngineConfig,
    input: BuildGraphInput,
) -> EngineResult<BuildGraphOutput> {
    if input.rebuild {
        reset_graph_state(pool).await?;
    }

    let document_ids = match input.document_filter {
        Some(ids) => ids,
        None => all_document_ids(pool).await?,
    };

    let mut touched = std::collections::HashSet::new();
    for doc_id in &document_ids {
        let nodes = resolver::resolve_document_entities(pool, doc_id, input.resolution_mode, generator, config).await?;
        touched.extend(nodes);
    }

    let edges_built = builder::build_cooccurrence_edges(pool, config).await?;

    let edges_classified = if input.classify_relationships {
        classifier::classify_relationships(pool, generator, config, None, 1000, config.classifier_batch_size).await?
    } else {
        0
    };

    Ok(BuildGraphOutput {
        documents_processed: document_ids.len(),
        nodes_touched: touched.len(),
        edges_built,
        edges_classified,
    })
}

async fn all_document_ids(pool: &SqlitePool) -> EngineResult<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM documents").fetch_all(pool).await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

async fn reset_graph_state(pool: &SqlitePool) -> EngineResult<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM knowledge_edges").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM node_entity_links").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM knowledge_nodes").execute(&mut *tx).await?;
    tx.commit().await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct QueryGraphInput {
    pub entity_name: Option<String>,
    pub entity_type: Option<String>,
    pub document_filter: Option<String>,
    pub min_document_count: Option<i64>,
    #[serde(default)]
    pub include_edges: bool,
    #[serde(default)]
    pub include_documents: bool,
    #[serde(default = "default_depth")]
    pub max_depth: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_depth() -> i64 {
    1
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct QueryGraphOutput {
    pub nodes: Vec<crate::db::schema::KnowledgeNodeRow>,
    pub edges: Vec<crate::db::schema::KnowledgeEdgeRow>,
}

/// spec.md §6.3 `query_graph`: filters nodes, then optionally expands the
/// neighborhood around the matched set up to `max_depth` to also return
/// edges.
pub async fn query_graph(pool: &SqlitePool, input: QueryGraphInput) -> Envelope<QueryGraphOutput> {
    Envelope::from_result(query_graph_inner(pool, input).await)
}

async fn query_graph_inner(pool: &SqlitePool, input: QueryGraphInput) -> EngineResult<QueryGraphOutput> {
    let filter = query::NodeFilter {
        entity_type: input.entity_type,
        canonical_name_substring: input.entity_name,
        min_document_count: input.min_document_count,
        document_id: input.document_filter,
        limit: input.limit,
    };
    let nodes = query::list_nodes(pool, filter).await?;

    let edges = if input.include_edges {
        let seed_ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
        let (_expanded_nodes, edges) = query::expand_neighborhood(pool, &seed_ids, input.max_depth, input.limit).await?;
        edges
    } else {
        vec![]
    };

    let _ = input.include_documents; // documents are already denormalized onto nodes/edges via document_ids/members

    Ok(QueryGraphOutput { nodes, edges })
}

/// spec.md §6.3 `node_details` (named `get_node_details` at §4.7).
pub async fn node_details(
    pool: &SqlitePool,
    node_id: &str,
    include_mentions: bool,
    include_provenance: bool,
) -> Envelope<query::NodeDetails> {
    Envelope::from_result(query::get_node_details(pool, node_id, include_mentions, include_provenance).await)
}

#[derive(Debug, Deserialize)]
pub struct FindPathsInput {
    pub source_entity: String,
    pub target_entity: String,
    pub max_hops: i64,
    pub relationship_filter: Option<Vec<String>>,
    #[serde(default)]
    pub include_evidence_chunks: bool,
}

/// spec.md §6.3 `find_paths`.
pub async fn find_paths(pool: &SqlitePool, input: FindPathsInput) -> Envelope<Vec<query::Path>> {
    Envelope::from_result(
        query::find_paths(
            pool,
            &input.source_entity,
            &input.target_entity,
            input.max_hops,
            input.relationship_filter.as_deref(),
            input.include_evidence_chunks,
        )
        .await,
    )
}

/// Ambient addition per SPEC_FULL.md: read-model summary for dashboards and
/// the demo tool surface.
pub async fn graph_stats(pool: &SqlitePool) -> Envelope<query::GraphStats> {
    Envelope::from_result(query::graph_stats(pool).await)
}

#[derive(Debug, Deserialize)]
pub struct DeleteGraphInput {
    pub confirm: bool,
}

/// spec.md §6.3 `delete_graph`: requires `confirm=true`; wipes all derived
/// graph state (nodes, edges, links) but leaves documents/entities/
/// provenance untouched — rerunning `build_graph` reconstructs the graph.
pub async fn delete_graph(pool: &SqlitePool, input: DeleteGraphInput) -> Envelope<()> {
    Envelope::from_result(delete_graph_inner(pool, input).await)
}

async fn delete_graph_inner(pool: &SqlitePool, input: DeleteGraphInput) -> EngineResult<()> {
    if !input.confirm {
        return Err(EngineError::Validation("delete_graph requires confirm=true".into()));
    }
    reset_graph_state(pool).await
}

#[derive(Debug, Deserialize)]
pub struct ClassifyRelationshipsInput {
    pub edge_ids: Option<Vec<String>>,
    #[serde(default = "default_classify_limit")]
    pub limit: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_classify_limit() -> usize {
    1000
}

fn default_batch_size() -> usize {
    20
}

#[derive(Debug, Serialize)]
pub struct ClassifyRelationshipsOutput {
    pub classified_count: usize,
}

/// spec.md §6.3 `classify_relationships`: `limit` saturates at 1000,
/// `batch_size` at 50 (enforced inside `classifier::classify_relationships`
/// via `classifier_batch_hard_cap`).
pub async fn classify_relationships(
    pool: &SqlitePool,
    generator: &dyn Generator,
    config: &EngineConfig,
    input: ClassifyRelationshipsInput,
) -> Envelope<ClassifyRelationshipsOutput> {
    let limit = input.limit.min(1000);
    let batch_size = input.batch_size.min(50);
    Envelope::from_result(
        classifier::classify_relationships(pool, generator, config, input.edge_ids, limit, batch_size)
            .await
            .map(|classified_count| ClassifyRelationshipsOutput { classified_count }),
    )
}

#[derive(Debug, Deserialize)]
pub struct IncrementalInput {
    pub document_id: String,
    #[serde(default)]
    pub resolution_mode: Option<ResolutionMode>,
}

/// spec.md §6.3 `incremental_add`, delegating to §4.5's maintainer.
pub async fn incremental_add(
    pool: &SqlitePool,
    generator: &dyn Generator,
    config: &EngineConfig,
    input: IncrementalInput,
) -> Envelope<Vec<String>> {
    let mode = input.resolution_mode.unwrap_or(ResolutionMode::Exact);
    Envelope::from_result(incremental::add_document(pool, &input.document_id, mode, generator, config, false).await)
}

/// spec.md §6.3 `incremental_remove`, delegating to §4.5's maintainer.
pub async fn incremental_remove(pool: &SqlitePool, input: IncrementalInput) -> Envelope<()> {
    Envelope::from_result(incremental::remove_document(pool, &input.document_id).await)
}

#[derive(Debug, Deserialize)]
pub struct DeleteDocumentInput {
    pub document_id: String,
}

/// spec.md §6.3 `delete_document`, delegating to §4.6's cascade delete.
pub async fn delete_document(pool: &SqlitePool, input: DeleteDocumentInput) -> Envelope<()> {
    Envelope::from_result(cascade::delete_document(pool, &input.document_id).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MockGenerator;
    use crate::db::Database;
    use crate::documents::register_document;

    async fn setup() -> SqlitePool {
        Database::open_in_memory(&EngineConfig::default()).await.unwrap().pool().clone()
    }

    async fn insert_entity(pool: &SqlitePool, document_id: &str, raw_text: &str, entity_type: &str) {
        let id = crate::hashid::new_id();
        let provenance_id = crate::provenance::create(
            pool,
            crate::provenance::NewProvenanceRecord {
                kind: crate::provenance::ProvenanceKind::EntityExtraction,
                source_id: None,
                root_document_id: document_id.to_string(),
                parent_ids: vec![],
                content_hash: crate::hashid::content_hash(raw_text.as_bytes()),
                input_hash: None,
                file_hash: None,
                processor: "test".into(),
                processor_version: "1".into(),
                processing_params: serde_json::json!({}),
                location: None,
                source_file_created_at: None,
                source_file_modified_at: None,
            },
        )
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO entities (id, document_id, entity_type, raw_text, normalized_text, confidence, metadata, provenance_id, created_at) VALUES (?, ?, ?, ?, ?, 1.0, '{}', ?, ?)",
        )
        .bind(&id)
        .bind(document_id)
        .bind(entity_type)
        .bind(raw_text)
        .bind(raw_text.to_lowercase())
        .bind(&provenance_id)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn build_graph_processes_all_documents_when_filter_absent() {
        let pool = setup().await;
        let config = EngineConfig::default();
        let gen = MockGenerator;

        let doc_a = register_document(&pool, "/a", "a", b"a", "pdf").await.unwrap();
        let doc_b = register_document(&pool, "/b", "b", b"b", "pdf").await.unwrap();
        insert_entity(&pool, &doc_a.id, "Alice", "person").await;
        insert_entity(&pool, &doc_b.id, "Alice", "person").await;

        let result = build_graph(
            &pool,
            &gen,
            &config,
            BuildGraphInput {
                document_filter: None,
                resolution_mode: ResolutionMode::Exact,
                classify_relationships: false,
                rebuild: false,
            },
        )
        .await;

        assert!(result.success);
        assert_eq!(result.data.unwrap().documents_processed, 2);
    }

    #[tokio::test]
    async fn delete_graph_without_confirm_is_rejected() {
        let pool = setup().await;
        let result = delete_graph(&pool, DeleteGraphInput { confirm: false }).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().category, "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn delete_graph_with_confirm_clears_nodes() {
        let pool = setup().await;
        let config = EngineConfig::default();
        let gen = MockGenerator;

        let doc = register_document(&pool, "/a", "a", b"a", "pdf").await.unwrap();
        insert_entity(&pool, &doc.id, "Alice", "person").await;
        build_graph(
            &pool,
            &gen,
            &config,
            BuildGraphInput {
                document_filter: None,
                resolution_mode: ResolutionMode::Exact,
                classify_relationships: false,
                rebuild: false,
            },
        )
        .await;

        let result = delete_graph(&pool, DeleteGraphInput { confirm: true }).await;
        assert!(result.success);

        let node_count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM knowledge_nodes").fetch_one(&pool).await.unwrap();
        assert_eq!(node_count.0, 0);
    }

    #[tokio::test]
    async fn find_paths_envelope_reports_missing_endpoint_as_validation_error() {
        let pool = setup().await;
        let result = find_paths(
            &pool,
            FindPathsInput {
                source_entity: "nonexistent".into(),
                target_entity: "also-nonexistent".into(),
                max_hops: 2,
                relationship_filter: None,
                include_evidence_chunks: false,
            },
        )
        .await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().category, "VALIDATION_ERROR");
    }
}
