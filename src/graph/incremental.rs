//! Incremental maintainer (spec.md §4.5): add/remove-one-document
//! operations over the graph with edge reweighting and orphan reclamation.

use sqlx::{Row, SqlitePool};
use std::collections::HashSet;

use crate::collaborators::Generator;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::graph::builder::build_cooccurrence_edges;
use crate::resolver::{resolve_document_entities, ResolutionMode};

/// Resolves `doc_id`'s entities against the existing graph and updates
/// every edge touched by the newly linked nodes. `force` bypasses no
/// additional guard here (the "graph already exists" guard lives at the
/// `build_graph` tool-surface operation, spec.md §6.3) but is accepted for
/// interface parity with that operation.
pub async fn add_document(
    pool: &SqlitePool,
    doc_id: &str,
    mode: ResolutionMode,
    generator: &dyn Generator,
    config: &EngineConfig,
    _force: bool,
) -> EngineResult<Vec<String>> {
    let touched_nodes = resolve_document_entities(pool, doc_id, mode, generator, config).await?;

    reweight_edges_for_nodes(pool, &touched_nodes).await?;
    build_cooccurrence_edges(pool, config).await?;

    Ok(touched_nodes)
}

/// Recomputes weight/evidence_count/document_ids for every edge incident to
/// any of `node_ids`, using the same formula as the builder.
async fn reweight_edges_for_nodes(pool: &SqlitePool, node_ids: &[String]) -> EngineResult<()> {
    for node_id in node_ids {
        let edges: Vec<(String, String, String, String, String)> = sqlx::query_as(
            "SELECT id, source_node_id, target_node_id, relationship_type, document_ids FROM knowledge_edges WHERE source_node_id = ? OR target_node_id = ?",
        )
        .bind(node_id)
        .bind(node_id)
        .fetch_all(pool)
        .await?;

        for (edge_id, source_id, target_id, relationship_type, _document_ids_json) in edges {
            let source_docs = node_document_ids(pool, &source_id).await?;
            let target_docs = node_document_ids(pool, &target_id).await?;
            let shared: Vec<String> = {
                let mut v: Vec<String> = source_docs.intersection(&target_docs).cloned().collect();
                v.sort();
                v
            };
            if shared.is_empty() {
                continue;
            }
            let base = shared.len() as f64 / source_docs.len().max(target_docs.len()) as f64;

            // `evidence_count` on `co_located` tracks the shared-CHUNK count
            // (matching `builder::build_cooccurrence_edges`), not the
            // shared-document count used for every other relationship type.
            let (weight, evidence_count) = if relationship_type == "co_located" {
                let source_chunks = node_chunk_ids(pool, &source_id).await?;
                let target_chunks = node_chunk_ids(pool, &target_id).await?;
                let shared_chunks = source_chunks.intersection(&target_chunks).count();
                ((base * 1.5).min(1.0), shared_chunks as i64)
            } else {
                (base, shared.len() as i64)
            };
            let weight = (weight * 10_000.0).round() / 10_000.0;

            sqlx::query(
                "UPDATE knowledge_edges SET weight = ?, evidence_count = ?, document_ids = ? WHERE id = ?",
            )
            .bind(weight)
            .bind(evidence_count)
            .bind(serde_json::to_string(&shared)?)
            .bind(&edge_id)
            .execute(pool)
            .await?;
        }
    }
    Ok(())
}

async fn node_document_ids(pool: &SqlitePool, node_id: &str) -> EngineResult<HashSet<String>> {
    let rows = sqlx::query("SELECT DISTINCT document_id FROM node_entity_links WHERE node_id = ?")
        .bind(node_id)
        .fetch_all(pool)
        .await?;
    rows.into_iter()
        .map(|r| r.try_get::<String, _>("document_id"))
        .collect::<Result<_, _>>()
        .map_err(Into::into)
}

async fn node_chunk_ids(pool: &SqlitePool, node_id: &str) -> EngineResult<HashSet<String>> {
    let rows = sqlx::query(
        r#"
        SELECT DISTINCT em.chunk_id FROM entity_mentions em
        JOIN node_entity_links l ON l.entity_id = em.entity_id
        WHERE l.node_id = ? AND em.chunk_id IS NOT NULL
        "#,
    )
    .bind(node_id)
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|r| r.try_get::<String, _>("chunk_id"))
        .collect::<Result<_, _>>()
        .map_err(Into::into)
}

/// Removes `doc_id`'s contribution from the graph: prunes or deletes every
/// edge whose `document_ids` contained it, decrements `document_count` on
/// every touched node, and deletes resulting orphans and their incident
/// edges, all in one transaction.
pub async fn remove_document(pool: &SqlitePool, doc_id: &str) -> EngineResult<()> {
    let mut tx = pool.begin().await?;

    let edges: Vec<(String, String, String, f64, i64, String)> = sqlx::query_as(
        "SELECT id, source_node_id, target_node_id, weight, evidence_count, document_ids FROM knowledge_edges",
    )
    .fetch_all(&mut *tx)
    .await?;

    for (edge_id, source, target, weight, evidence_count, document_ids_json) in edges {
        let mut document_ids: Vec<String> = serde_json::from_str(&document_ids_json).unwrap_or_default();
        let old_len = document_ids.len();
        if !document_ids.iter().any(|d| d == doc_id) {
            continue;
        }
        document_ids.retain(|d| d != doc_id);
        let new_len = document_ids.len();

        if new_len == 0 {
            sqlx::query("DELETE FROM knowledge_edges WHERE id = ?")
                .bind(&edge_id)
                .execute(&mut *tx)
                .await?;
            for node_id in [&source, &target] {
                sqlx::query("UPDATE knowledge_nodes SET edge_count = MAX(0, edge_count - 1) WHERE id = ?")
                    .bind(node_id)
                    .execute(&mut *tx)
                    .await?;
            }
            continue;
        }

        let new_weight = weight * (new_len as f64 / old_len as f64);
        let new_weight = (new_weight * 10_000.0).round() / 10_000.0;
        let new_evidence = (evidence_count - 1).max(1);

        sqlx::query(
            "UPDATE knowledge_edges SET weight = ?, evidence_count = ?, document_ids = ? WHERE id = ?",
        )
        .bind(new_weight)
        .bind(new_evidence)
        .bind(serde_json::to_string(&document_ids)?)
        .bind(&edge_id)
        .execute(&mut *tx)
        .await?;
    }

    let affected_node_ids: Vec<String> = sqlx::query(
        r#"
        SELECT DISTINCT l.node_id as node_id FROM node_entity_links l
        JOIN entities e ON e.id = l.entity_id
        WHERE e.document_id = ?
        "#,
    )
    .bind(doc_id)
    .fetch_all(&mut *tx)
    .await?
    .into_iter()
    .map(|r| r.try_get::<String, _>("node_id"))
    .collect::<Result<_, _>>()?;

    sqlx::query(
        r#"
        DELETE FROM node_entity_links WHERE entity_id IN (
            SELECT id FROM entities WHERE document_id = ?
        )
        "#,
    )
    .bind(doc_id)
    .execute(&mut *tx)
    .await?;

    for node_id in &affected_node_ids {
        sqlx::query(
            "UPDATE knowledge_nodes SET document_count = MAX(0, document_count - 1) WHERE id = ?",
        )
        .bind(node_id)
        .execute(&mut *tx)
        .await?;
    }

    let mut orphans = Vec::new();
    for node_id in &affected_node_ids {
        if is_orphan(&mut tx, node_id).await? {
            orphans.push(node_id.clone());
        }
    }

    for orphan_id in &orphans {
        let incident: Vec<(String, String)> = sqlx::query_as(
            "SELECT source_node_id, target_node_id FROM knowledge_edges WHERE source_node_id = ? OR target_node_id = ?",
        )
        .bind(orphan_id)
        .bind(orphan_id)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM knowledge_edges WHERE source_node_id = ? OR target_node_id = ?")
            .bind(orphan_id)
            .bind(orphan_id)
            .execute(&mut *tx)
            .await?;

        for (source, target) in incident {
            let other = if &source == orphan_id { &target } else { &source };
            if orphans.contains(other) {
                continue;
            }
            sqlx::query("UPDATE knowledge_nodes SET edge_count = MAX(0, edge_count - 1) WHERE id = ?")
                .bind(other)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("DELETE FROM knowledge_nodes WHERE id = ?")
            .bind(orphan_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

async fn is_orphan(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, node_id: &str) -> EngineResult<bool> {
    let row = sqlx::query("SELECT document_count FROM knowledge_nodes WHERE id = ?")
        .bind(node_id)
        .fetch_optional(&mut **tx)
        .await?;
    let Some(row) = row else { return Ok(false) };
    let document_count: i64 = row.try_get("document_count")?;
    let link_count_row = sqlx::query("SELECT COUNT(*) as c FROM node_entity_links WHERE node_id = ?")
        .bind(node_id)
        .fetch_one(&mut **tx)
        .await?;
    let link_count: i64 = link_count_row.try_get("c")?;
    Ok(super::model::is_orphan(document_count, link_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MockGenerator;
    use crate::db::Database;
    use crate::documents::register_document;
    use crate::provenance::{self, NewProvenanceRecord, ProvenanceKind};
    use chrono::Utc;

    async fn setup() -> SqlitePool {
        Database::open_in_memory(&EngineConfig::default()).await.unwrap().pool().clone()
    }

    async fn insert_entity(pool: &SqlitePool, document_id: &str, raw_text: &str, entity_type: &str) {
        let id = crate::hashid::new_id();
        let provenance_id = provenance::create(
            pool,
            NewProvenanceRecord {
                kind: ProvenanceKind::EntityExtraction,
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
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO entities (id, document_id, entity_type, raw_text, normalized_text, confidence, metadata, provenance_id, created_at) VALUES (?, ?, ?, ?, ?, 1.0, '{}', ?, ?)",
        )
        .bind(&id)
        .bind(document_id)
        .bind(entity_type)
        .bind(raw_text)
        .bind(raw_text.to_lowercase())
        .bind(&provenance_id)
        .bind(&now)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn add_then_remove_restores_prior_state() {
        let pool = setup().await;
        let config = EngineConfig::default();
        let gen = MockGenerator;

        let doc_a = register_document(&pool, "/a", "a", b"a", "pdf").await.unwrap();
        let doc_b = register_document(&pool, "/b", "b", b"b", "pdf").await.unwrap();
        insert_entity(&pool, &doc_a.id, "Alice", "person").await;
        insert_entity(&pool, &doc_a.id, "Acme", "organization").await;
        insert_entity(&pool, &doc_b.id, "Alice", "person").await;
        insert_entity(&pool, &doc_b.id, "Bob", "person").await;

        add_document(&pool, &doc_a.id, ResolutionMode::Exact, &gen, &config, false).await.unwrap();
        add_document(&pool, &doc_b.id, ResolutionMode::Exact, &gen, &config, false).await.unwrap();

        let before_nodes: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM knowledge_nodes").fetch_one(&pool).await.unwrap();
        assert_eq!(before_nodes.0, 3);

        remove_document(&pool, &doc_a.id).await.unwrap();

        let after_nodes: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM knowledge_nodes").fetch_one(&pool).await.unwrap();
        // Acme becomes an orphan and is deleted; Alice and Bob remain.
        assert_eq!(after_nodes.0, 2);

        let edges: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM knowledge_edges WHERE relationship_type = 'co_mentioned'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(edges.0, 1);
    }
}
