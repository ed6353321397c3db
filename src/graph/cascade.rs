//! Cascade delete engine (spec.md §4.6): ordered removal of a document's
//! entire derivation subtree with graph-side repair, in one transaction.

use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::collections::HashSet;

use crate::error::{EngineError, EngineResult};

/// Deletes `doc_id` and every row it owns, repairs the knowledge graph for
/// any node/edge that becomes orphaned as a result, and leaves provenance
/// records untouched (spec.md §4.6 step 10).
pub async fn delete_document(pool: &SqlitePool, doc_id: &str) -> EngineResult<()> {
    let mut tx = pool.begin().await?;

    let result = run_cascade(&mut tx, doc_id).await;
    match result {
        Ok(()) => {
            tx.commit().await?;
            Ok(())
        }
        Err(e) => {
            tx.rollback().await.ok();
            match e {
                EngineError::Internal(msg) => Err(EngineError::IntegrityVerificationFailed(msg)),
                other => Err(other),
            }
        }
    }
}

async fn run_cascade(tx: &mut Transaction<'_, Sqlite>, doc_id: &str) -> EngineResult<()> {
    // 1. Look up document_id -> file_hash and enumerate entity_ids.
    let file_hash: Option<(String,)> = sqlx::query_as("SELECT file_hash FROM documents WHERE id = ?")
        .bind(doc_id)
        .fetch_optional(&mut **tx)
        .await?;
    let Some((file_hash,)) = file_hash else {
        return Err(EngineError::DocumentNotFound(doc_id.to_string()));
    };

    let entity_ids: Vec<String> = sqlx::query("SELECT id FROM entities WHERE document_id = ?")
        .bind(doc_id)
        .fetch_all(&mut **tx)
        .await?
        .into_iter()
        .map(|r| r.try_get::<String, _>("id"))
        .collect::<Result<_, _>>()?;

    // 2. Identify affected node_ids via NodeEntityLinks whose entity_id is among these.
    let affected_node_ids: Vec<String> = if entity_ids.is_empty() {
        vec![]
    } else {
        query_node_ids_for_entities(tx, &entity_ids).await?
    };

    // 3. Delete NodeEntityLinks for those entities.
    if !entity_ids.is_empty() {
        for entity_id in &entity_ids {
            sqlx::query("DELETE FROM node_entity_links WHERE entity_id = ?")
                .bind(entity_id)
                .execute(&mut **tx)
                .await?;
        }
    }

    // 4. Decrement document_count on each affected node by 1 (floor at 0).
    for node_id in &affected_node_ids {
        sqlx::query(
            "UPDATE knowledge_nodes SET document_count = MAX(0, document_count - 1) WHERE id = ?",
        )
        .bind(node_id)
        .execute(&mut **tx)
        .await?;
    }

    // 5. Compute orphan node_ids (depopulated & link-less among affected).
    let mut orphan_ids = Vec::new();
    for node_id in &affected_node_ids {
        if is_orphan(tx, node_id).await? {
            orphan_ids.push(node_id.clone());
        }
    }
    let orphan_set: HashSet<String> = orphan_ids.iter().cloned().collect();

    // 6. Delete knowledge_edges incident to any orphan (either endpoint),
    // decrementing edge_count on the surviving (non-orphan) endpoint.
    for orphan_id in &orphan_ids {
        let incident: Vec<(String, String)> = sqlx::query_as(
            "SELECT source_node_id, target_node_id FROM knowledge_edges WHERE source_node_id = ? OR target_node_id = ?",
        )
        .bind(orphan_id)
        .bind(orphan_id)
        .fetch_all(&mut **tx)
        .await?;

        sqlx::query("DELETE FROM knowledge_edges WHERE source_node_id = ? OR target_node_id = ?")
            .bind(orphan_id)
            .bind(orphan_id)
            .execute(&mut **tx)
            .await?;

        for (source, target) in incident {
            let other = if &source == orphan_id { &target } else { &source };
            if orphan_set.contains(other.as_str()) {
                continue;
            }
            sqlx::query("UPDATE knowledge_nodes SET edge_count = MAX(0, edge_count - 1) WHERE id = ?")
                .bind(other)
                .execute(&mut **tx)
                .await?;
        }
    }

    // 7. For all non-orphan edges that referenced doc_id in document_ids, prune as in remove_document.
    let remaining_affected: Vec<&String> = affected_node_ids
        .iter()
        .filter(|n| !orphan_set.contains(n.as_str()))
        .collect();
    prune_edges_referencing_document(tx, doc_id, &remaining_affected).await?;

    // 8. Delete orphan knowledge_nodes.
    for orphan_id in &orphan_ids {
        sqlx::query("DELETE FROM knowledge_nodes WHERE id = ?")
            .bind(orphan_id)
            .execute(&mut **tx)
            .await?;
    }

    // 9. Delete rows from dependent tables in dependency order.
    sqlx::query("DELETE FROM entity_mentions WHERE document_id = ?")
        .bind(doc_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM entities WHERE document_id = ?")
        .bind(doc_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM comparisons WHERE document_id_a = ? OR document_id_b = ?")
        .bind(doc_id)
        .bind(doc_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM document_clusters WHERE document_id = ?")
        .bind(doc_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM extractions WHERE document_id = ?")
        .bind(doc_id)
        .execute(&mut **tx)
        .await?;

    let embedding_ids: Vec<String> = sqlx::query("SELECT id FROM embeddings WHERE document_id = ?")
        .bind(doc_id)
        .fetch_all(&mut **tx)
        .await?
        .into_iter()
        .map(|r| r.try_get::<String, _>("id"))
        .collect::<Result<_, _>>()?;
    for embedding_id in &embedding_ids {
        sqlx::query("DELETE FROM vectors WHERE embedding_id = ?")
            .bind(embedding_id)
            .execute(&mut **tx)
            .await?;
    }
    sqlx::query("DELETE FROM embeddings WHERE document_id = ?")
        .bind(doc_id)
        .execute(&mut **tx)
        .await?;

    sqlx::query("DELETE FROM images WHERE document_id = ?")
        .bind(doc_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(doc_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM ocr_results WHERE document_id = ?")
        .bind(doc_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM form_fills WHERE source_file_hash = ?")
        .bind(&file_hash)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM uploaded_files WHERE file_hash = ?")
        .bind(&file_hash)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(doc_id)
        .execute(&mut **tx)
        .await?;

    // 10. Provenance records are intentionally not deleted.
    Ok(())
}

async fn query_node_ids_for_entities(
    tx: &mut Transaction<'_, Sqlite>,
    entity_ids: &[String],
) -> EngineResult<Vec<String>> {
    let mut node_ids = HashSet::new();
    for entity_id in entity_ids {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT node_id FROM node_entity_links WHERE entity_id = ?")
                .bind(entity_id)
                .fetch_optional(&mut **tx)
                .await?;
        if let Some((node_id,)) = row {
            node_ids.insert(node_id);
        }
    }
    Ok(node_ids.into_iter().collect())
}

async fn is_orphan(tx: &mut Transaction<'_, Sqlite>, node_id: &str) -> EngineResult<bool> {
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

/// Same pruning rule as `incremental::remove_document`: drop `doc_id` from
/// `document_ids`, scale weight by `new_len/old_len`, floor evidence_count
/// at 1, delete the edge if the list becomes empty.
async fn prune_edges_referencing_document(
    tx: &mut Transaction<'_, Sqlite>,
    doc_id: &str,
    touched_nodes: &[&String],
) -> EngineResult<()> {
    let touched: HashSet<&str> = touched_nodes.iter().map(|s| s.as_str()).collect();
    if touched.is_empty() {
        return Ok(());
    }

    let edges: Vec<(String, String, String, f64, i64, String)> = sqlx::query_as(
        "SELECT id, source_node_id, target_node_id, weight, evidence_count, document_ids FROM knowledge_edges",
    )
    .fetch_all(&mut **tx)
    .await?;

    for (edge_id, source_id, target_id, weight, evidence_count, document_ids_json) in edges {
        if !touched.contains(source_id.as_str()) && !touched.contains(target_id.as_str()) {
            continue;
        }
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
                .execute(&mut **tx)
                .await?;
            for node_id in [&source_id, &target_id] {
                sqlx::query("UPDATE knowledge_nodes SET edge_count = MAX(0, edge_count - 1) WHERE id = ?")
                    .bind(node_id)
                    .execute(&mut **tx)
                    .await?;
            }
            continue;
        }

        let new_weight = ((weight * (new_len as f64 / old_len as f64)) * 10_000.0).round() / 10_000.0;
        let new_evidence = (evidence_count - 1).max(1);

        sqlx::query(
            "UPDATE knowledge_edges SET weight = ?, evidence_count = ?, document_ids = ? WHERE id = ?",
        )
        .bind(new_weight)
        .bind(new_evidence)
        .bind(serde_json::to_string(&document_ids)?)
        .bind(&edge_id)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}
