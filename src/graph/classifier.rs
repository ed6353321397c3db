//! Relationship classifier (spec.md §4.4): upgrades `co_mentioned`/
//! `co_located` edges to semantic relationship types via a four-stage rule
//! cascade with a generative fallback, preserving an immutable audit trail.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use crate::collaborators::Generator;
use crate::config::EngineConfig;
use crate::error::EngineResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationHistoryEntry {
    pub original_type: String,
    pub classified_type: String,
    pub classified_by: String,
    pub confidence: Option<f64>,
    pub classified_at: String,
}

/// Type-pair matrix excerpt from the Glossary. Order-agnostic: both
/// orderings of a pair are looked up.
fn type_pair_matrix(type_a: &str, type_b: &str) -> Option<(&'static str, f64)> {
    let pair = (type_a, type_b);
    let table: &[((&str, &str), (&str, f64))] = &[
        (("person", "organization"), ("works_at", 0.75)),
        (("organization", "location"), ("located_in", 0.80)),
        (("case_number", "date"), ("filed_in", 0.85)),
        (("statute", "case_number"), ("cites", 0.90)),
        (("person", "case_number"), ("party_to", 0.75)),
        (("organization", "case_number"), ("party_to", 0.75)),
        (("diagnosis", "medication"), ("treated_with", 0.85)),
        (("medication", "medical_device"), ("administered_via", 0.80)),
        (("diagnosis", "medical_device"), ("managed_by", 0.80)),
        (("medication", "medication"), ("interacts_with", 0.75)),
        (("amount", "case_number"), ("party_to", 0.70)),
    ];

    for &((a, b), result) in table {
        if (a, b) == pair || (b, a) == pair {
            return Some(result);
        }
    }

    for date_peer in ["person", "organization", "location"] {
        if (type_a == "date" && type_b == date_peer) || (type_b == "date" && type_a == date_peer) {
            return Some(("occurred_at", 0.70));
        }
    }
    for amount_peer in ["person", "organization"] {
        if (type_a == "amount" && type_b == amount_peer) || (type_b == "amount" && type_a == amount_peer) {
            return Some(("references", 0.65));
        }
    }
    if type_a == "exhibit" || type_b == "exhibit" {
        return Some(("references", 0.70));
    }

    None
}

struct EdgeToClassify {
    id: String,
    source_node_id: String,
    target_node_id: String,
    relationship_type: String,
    metadata: serde_json::Value,
}

/// Runs the cascade over up to `limit` eligible edges (those still carrying
/// `co_mentioned`/`co_located`), in batches of at most `batch_size` capped
/// at the hard cap, for the generative stage.
pub async fn classify_relationships(
    pool: &SqlitePool,
    generator: &dyn Generator,
    config: &EngineConfig,
    edge_ids: Option<Vec<String>>,
    limit: usize,
    batch_size: usize,
) -> EngineResult<usize> {
    let batch_size = batch_size.min(config.classifier_batch_hard_cap).max(1);

    let candidate_edges = load_candidate_edges(pool, edge_ids, limit).await?;
    let mut classified_count = 0usize;

    for batch in candidate_edges.chunks(batch_size) {
        let mut ai_batch = Vec::new();

        for edge in batch {
            if let Some(result) = try_rule_cascade(pool, edge).await? {
                apply_classification(pool, edge, &result.0, &result.1, result.2).await?;
                classified_count += 1;
            } else {
                ai_batch.push(edge);
            }
        }

        if !ai_batch.is_empty() {
            classified_count += run_generative_stage(pool, generator, &ai_batch).await?;
        }
    }

    Ok(classified_count)
}

async fn load_candidate_edges(
    pool: &SqlitePool,
    edge_ids: Option<Vec<String>>,
    limit: usize,
) -> EngineResult<Vec<EdgeToClassify>> {
    let rows = if let Some(ids) = edge_ids {
        let mut out = Vec::new();
        for id in ids.iter().take(limit) {
            let row = sqlx::query(
                "SELECT id, source_node_id, target_node_id, relationship_type, metadata FROM knowledge_edges WHERE id = ? AND relationship_type IN ('co_mentioned','co_located')",
            )
            .bind(id)
            .fetch_optional(pool)
            .await?;
            if let Some(r) = row {
                out.push(r);
            }
        }
        out
    } else {
        sqlx::query(
            "SELECT id, source_node_id, target_node_id, relationship_type, metadata FROM knowledge_edges WHERE relationship_type IN ('co_mentioned','co_located') LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(pool)
        .await?
    };

    rows.into_iter()
        .map(|r| {
            Ok(EdgeToClassify {
                id: r.try_get("id")?,
                source_node_id: r.try_get("source_node_id")?,
                target_node_id: r.try_get("target_node_id")?,
                relationship_type: r.try_get("relationship_type")?,
                metadata: serde_json::from_str(&r.try_get::<String, _>("metadata")?).unwrap_or(serde_json::json!({})),
            })
        })
        .collect()
}

/// Returns `(new_type, classified_by, confidence)` on the first matching
/// rule stage, or `None` if all rule stages miss.
async fn try_rule_cascade(
    pool: &SqlitePool,
    edge: &EdgeToClassify,
) -> EngineResult<Option<(String, String, Option<f64>)>> {
    let (type_a, type_b) = node_types(pool, edge).await?;

    // Stage 1: extraction-schema rule.
    if let Some(shared_extraction) = shared_extraction_id(pool, edge).await? {
        if let Some((rel, conf)) = type_pair_matrix(&type_a, &type_b) {
            let _ = shared_extraction;
            return Ok(Some((rel.to_string(), "rule:extraction_schema".to_string(), Some(conf))));
        }
    }

    // Stage 2: cluster-hint rule.
    if let Some(rel) = cluster_hint_rule(pool, edge, &type_a, &type_b).await? {
        return Ok(Some((rel, "rule:cluster_hint".to_string(), None)));
    }

    // Stage 3: type-pair matrix.
    if let Some((rel, conf)) = type_pair_matrix(&type_a, &type_b) {
        return Ok(Some((rel.to_string(), "rule:type_matrix".to_string(), Some(conf))));
    }

    Ok(None)
}

async fn node_types(pool: &SqlitePool, edge: &EdgeToClassify) -> EngineResult<(String, String)> {
    let row = sqlx::query("SELECT entity_type FROM knowledge_nodes WHERE id = ?")
        .bind(&edge.source_node_id)
        .fetch_one(pool)
        .await?;
    let a: String = row.try_get("entity_type")?;
    let row = sqlx::query("SELECT entity_type FROM knowledge_nodes WHERE id = ?")
        .bind(&edge.target_node_id)
        .fetch_one(pool)
        .await?;
    let b: String = row.try_get("entity_type")?;
    Ok((a, b))
}

async fn shared_extraction_id(pool: &SqlitePool, edge: &EdgeToClassify) -> EngineResult<Option<String>> {
    let rows = sqlx::query(
        r#"
        SELECT e.metadata FROM entities e
        JOIN node_entity_links l ON l.entity_id = e.id
        WHERE l.node_id IN (?, ?)
        "#,
    )
    .bind(&edge.source_node_id)
    .bind(&edge.target_node_id)
    .fetch_all(pool)
    .await?;

    let mut extraction_ids = std::collections::HashSet::new();
    for row in rows {
        let metadata: String = row.try_get("metadata")?;
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&metadata) {
            if let Some(extraction_id) = value.get("extraction_id").and_then(|v| v.as_str()) {
                extraction_ids.insert(extraction_id.to_string());
            }
        }
    }
    Ok(if extraction_ids.len() == 1 {
        extraction_ids.into_iter().next()
    } else {
        None
    })
}

async fn cluster_hint_rule(
    pool: &SqlitePool,
    edge: &EdgeToClassify,
    type_a: &str,
    type_b: &str,
) -> EngineResult<Option<String>> {
    let rows = sqlx::query(
        r#"
        SELECT DISTINCT c.classification_tag FROM node_entity_links l
        JOIN document_clusters dc ON dc.document_id = l.document_id
        JOIN clusters c ON c.id = dc.cluster_id
        WHERE l.node_id IN (?, ?)
        "#,
    )
    .bind(&edge.source_node_id)
    .bind(&edge.target_node_id)
    .fetch_all(pool)
    .await?;

    let tags: Vec<String> = rows
        .into_iter()
        .map(|r| r.try_get::<String, _>("classification_tag"))
        .collect::<Result<_, _>>()?;
    let lower_tags: Vec<String> = tags.iter().map(|t| t.to_lowercase()).collect();

    let types = {
        let mut v = [type_a, type_b];
        v.sort();
        v
    };

    if lower_tags.iter().any(|t| t.contains("employment") || t.contains("hr")) {
        if types == ["organization", "person"] {
            return Ok(Some("works_at".to_string()));
        }
    }
    if lower_tags
        .iter()
        .any(|t| t.contains("litigation") || t.contains("legal") || t.contains("court"))
    {
        return Ok(Some("party_to".to_string()));
    }
    if lower_tags
        .iter()
        .any(|t| t.contains("medical") || t.contains("health") || t.contains("clinical"))
    {
        if types.contains(&"diagnosis") || types.contains(&"medication") {
            return Ok(Some("references".to_string()));
        }
        return Ok(Some("related_to".to_string()));
    }

    Ok(None)
}

const GENERATIVE_LABELS: &[&str] = &[
    "works_at", "represents", "located_in", "filed_in", "cites", "references", "party_to",
    "related_to", "precedes", "occurred_at", "treated_with", "administered_via", "managed_by",
    "interacts_with",
];

async fn run_generative_stage(
    pool: &SqlitePool,
    generator: &dyn Generator,
    batch: &[&EdgeToClassify],
) -> EngineResult<usize> {
    let mut prompt_lines = Vec::new();
    for edge in batch {
        let context = gather_context(pool, edge).await?;
        prompt_lines.push(format!(
            "edge {}: {} <-> {}. context: {}",
            edge.id, edge.source_node_id, edge.target_node_id, context
        ));
    }
    let prompt = format!(
        "For each edge below, return a single relationship label from {:?} or null if none fits.\n{}",
        GENERATIVE_LABELS,
        prompt_lines.join("\n")
    );

    let response = match generator.classify(&prompt, r#"{"labels": {"<edge_id>": "string|null"}}"#).await {
        Ok(v) => v,
        Err(err) => {
            for edge in batch {
                mark_classification_failed(pool, edge, &err.to_string()).await?;
            }
            return Ok(0);
        }
    };

    let labels = response.get("labels").cloned().unwrap_or(serde_json::json!({}));
    let mut classified = 0usize;
    for edge in batch {
        let label = labels.get(&edge.id).and_then(|v| v.as_str());
        match label {
            Some(l) if GENERATIVE_LABELS.contains(&l) => {
                apply_classification(pool, edge, l, "ai", None).await?;
                classified += 1;
            }
            _ => {}
        }
    }
    Ok(classified)
}

async fn gather_context(pool: &SqlitePool, edge: &EdgeToClassify) -> EngineResult<String> {
    let rows = sqlx::query(
        r#"
        SELECT c.text FROM chunks c
        JOIN entity_mentions em ON em.chunk_id = c.id
        JOIN node_entity_links l ON l.entity_id = em.entity_id
        WHERE l.node_id IN (?, ?)
        LIMIT 5
        "#,
    )
    .bind(&edge.source_node_id)
    .bind(&edge.target_node_id)
    .fetch_all(pool)
    .await?;

    let mut snippets = Vec::new();
    for row in rows {
        let text: String = row.try_get("text")?;
        snippets.push(text.chars().take(1500).collect::<String>());
    }
    Ok(snippets.join(" | "))
}

async fn apply_classification(
    pool: &SqlitePool,
    edge: &EdgeToClassify,
    new_type: &str,
    classified_by: &str,
    confidence: Option<f64>,
) -> EngineResult<()> {
    if edge.relationship_type == new_type {
        return Ok(());
    }

    let mut history: Vec<ClassificationHistoryEntry> = edge
        .metadata
        .get("classification_history")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();

    history.push(ClassificationHistoryEntry {
        original_type: edge.relationship_type.clone(),
        classified_type: new_type.to_string(),
        classified_by: classified_by.to_string(),
        confidence,
        classified_at: Utc::now().to_rfc3339(),
    });

    let mut metadata = edge.metadata.clone();
    metadata["classification_history"] = serde_json::to_value(&history)?;

    let now = Utc::now().to_rfc3339();
    sqlx::query("UPDATE knowledge_edges SET relationship_type = ?, metadata = ?, updated_at = ? WHERE id = ?")
        .bind(new_type)
        .bind(metadata.to_string())
        .bind(&now)
        .bind(&edge.id)
        .execute(pool)
        .await?;

    Ok(())
}

async fn mark_classification_failed(pool: &SqlitePool, edge: &EdgeToClassify, error: &str) -> EngineResult<()> {
    let mut metadata = edge.metadata.clone();
    metadata["classification_failed"] = serde_json::json!({
        "error": error,
        "attempted_at": Utc::now().to_rfc3339(),
    });
    let now = Utc::now().to_rfc3339();
    sqlx::query("UPDATE knowledge_edges SET metadata = ?, updated_at = ? WHERE id = ?")
        .bind(metadata.to_string())
        .bind(&now)
        .bind(&edge.id)
        .execute(pool)
        .await?;
    log::warn!("classification batch failed for edge {}: {}", edge.id, error);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_pair_matrix_is_order_agnostic() {
        let direct = type_pair_matrix("person", "organization");
        let reversed = type_pair_matrix("organization", "person");
        assert_eq!(direct, reversed);
        assert_eq!(direct.unwrap().0, "works_at");
    }

    #[test]
    fn unknown_pair_has_no_match() {
        assert!(type_pair_matrix("statute", "location").is_none());
    }
}
