//! Co-occurrence edge builder (spec.md §4.3): a deterministic edge
//! generator over resolved nodes, bounded by `MAX_COOCCURRENCE_ENTITIES`.

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};

use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::provenance::{self, NewProvenanceRecord, ProvenanceKind};

struct NodeContext {
    id: String,
    documents: HashSet<String>,
    chunks: HashSet<String>,
}

/// Builds `co_mentioned`/`co_located` edges over every node touched in this
/// build, or over the whole graph when `node_ids` is empty.
pub async fn build_cooccurrence_edges(
    pool: &SqlitePool,
    config: &EngineConfig,
) -> EngineResult<usize> {
    let all_nodes: Vec<(String, i64)> =
        sqlx::query_as("SELECT id, document_count FROM knowledge_nodes ORDER BY document_count DESC, id ASC")
            .fetch_all(pool)
            .await?;

    let total = all_nodes.len();
    let selected: Vec<String> = all_nodes
        .into_iter()
        .take(config.max_cooccurrence_entities)
        .map(|(id, _)| id)
        .collect();

    if total > config.max_cooccurrence_entities {
        log::warn!(
            "co-occurrence builder pruned {} of {} nodes to the MAX_COOCCURRENCE_ENTITIES cap of {}",
            total - config.max_cooccurrence_entities,
            total,
            config.max_cooccurrence_entities
        );
    }

    let mut contexts = HashMap::new();
    for node_id in &selected {
        contexts.insert(node_id.clone(), load_node_context(pool, node_id).await?);
    }

    let mut edges_created = 0usize;
    for i in 0..selected.len() {
        for j in (i + 1)..selected.len() {
            let (a_id, b_id) = order_pair(&selected[i], &selected[j]);
            let a = &contexts[&a_id];
            let b = &contexts[&b_id];

            let shared_documents: Vec<String> = {
                let mut v: Vec<String> = a.documents.intersection(&b.documents).cloned().collect();
                v.sort();
                v
            };
            if shared_documents.is_empty() {
                continue;
            }

            let base_weight =
                shared_documents.len() as f64 / a.documents.len().max(b.documents.len()) as f64;
            let co_mentioned_weight = round4(base_weight);

            if upsert_edge(
                pool,
                &a_id,
                &b_id,
                "co_mentioned",
                co_mentioned_weight,
                shared_documents.len() as i64,
                &shared_documents,
                serde_json::json!({}),
            )
            .await?
            {
                edges_created += 1;
            }

            let shared_chunks: Vec<String> = {
                let mut v: Vec<String> = a.chunks.intersection(&b.chunks).cloned().collect();
                v.sort();
                v
            };
            if !shared_chunks.is_empty() {
                let co_located_weight = round4((base_weight * 1.5).min(1.0));
                let capped_chunks: Vec<String> = shared_chunks.iter().take(20).cloned().collect();
                if upsert_edge(
                    pool,
                    &a_id,
                    &b_id,
                    "co_located",
                    co_located_weight,
                    shared_chunks.len() as i64,
                    &shared_documents,
                    serde_json::json!({ "shared_chunk_ids": capped_chunks }),
                )
                .await?
                {
                    edges_created += 1;
                }
            }
        }
    }

    Ok(edges_created)
}

fn order_pair(a: &str, b: &str) -> (String, String) {
    if a < b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

async fn load_node_context(pool: &SqlitePool, node_id: &str) -> EngineResult<NodeContext> {
    let doc_rows = sqlx::query("SELECT DISTINCT document_id FROM node_entity_links WHERE node_id = ?")
        .bind(node_id)
        .fetch_all(pool)
        .await?;
    let documents: HashSet<String> = doc_rows
        .into_iter()
        .map(|r| r.try_get::<String, _>("document_id"))
        .collect::<Result<_, _>>()?;

    let chunk_rows = sqlx::query(
        r#"
        SELECT DISTINCT em.chunk_id FROM entity_mentions em
        JOIN node_entity_links l ON l.entity_id = em.entity_id
        WHERE l.node_id = ? AND em.chunk_id IS NOT NULL
        "#,
    )
    .bind(node_id)
    .fetch_all(pool)
    .await?;
    let chunks: HashSet<String> = chunk_rows
        .into_iter()
        .map(|r| r.try_get::<String, _>("chunk_id"))
        .collect::<Result<_, _>>()?;

    Ok(NodeContext {
        id: node_id.to_string(),
        documents,
        chunks,
    })
}

/// Inserts the edge if `(source, target, relationship_type)` does not
/// already exist. Returns whether a new row was created (idempotence,
/// spec.md §4.3).
#[allow(clippy::too_many_arguments)]
async fn upsert_edge(
    pool: &SqlitePool,
    source_node_id: &str,
    target_node_id: &str,
    relationship_type: &str,
    weight: f64,
    evidence_count: i64,
    document_ids: &[String],
    metadata: serde_json::Value,
) -> EngineResult<bool> {
    let existing: Option<(String,)> = sqlx::query_as(
        "SELECT id FROM knowledge_edges WHERE source_node_id = ? AND target_node_id = ? AND relationship_type = ?",
    )
    .bind(source_node_id)
    .bind(target_node_id)
    .bind(relationship_type)
    .fetch_optional(pool)
    .await?;
    if existing.is_some() {
        return Ok(false);
    }

    let provenance_id = provenance::create(
        pool,
        NewProvenanceRecord {
            kind: ProvenanceKind::KnowledgeGraph,
            source_id: None,
            root_document_id: document_ids.first().cloned().unwrap_or_default(),
            parent_ids: vec![],
            content_hash: crate::hashid::content_hash(
                format!("{source_node_id}:{target_node_id}:{relationship_type}").as_bytes(),
            ),
            input_hash: None,
            file_hash: None,
            processor: "cooccurrence_builder".into(),
            processor_version: "1".into(),
            processing_params: serde_json::json!({}),
            location: None,
            source_file_created_at: None,
            source_file_modified_at: None,
        },
    )
    .await?;

    let id = crate::hashid::new_id();
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO knowledge_edges (
            id, source_node_id, target_node_id, relationship_type, weight,
            evidence_count, document_ids, metadata, provenance_id, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(source_node_id)
    .bind(target_node_id)
    .bind(relationship_type)
    .bind(weight)
    .bind(evidence_count)
    .bind(serde_json::to_string(document_ids)?)
    .bind(metadata.to_string())
    .bind(&provenance_id)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    for node_id in [source_node_id, target_node_id] {
        sqlx::query("UPDATE knowledge_nodes SET edge_count = edge_count + 1 WHERE id = ?")
            .bind(node_id)
            .execute(pool)
            .await?;
    }

    Ok(true)
}
