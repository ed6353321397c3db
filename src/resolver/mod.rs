//! Entity resolver: collapses per-document entities into cross-document
//! `KnowledgeNode`s (spec.md §4.2). Generalized from the teacher's
//! `engines::entity::EntityEngine` (AI-backed resolution with a mock
//! fallback) into a three-mode (exact/fuzzy/ai) resolution pipeline.

pub mod similarity;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::collaborators::Generator;
use crate::config::EngineConfig;
use crate::db::schema::EntityRow;
use crate::error::EngineResult;
use crate::provenance::{self, NewProvenanceRecord, ProvenanceKind};

/// Fixed namespace for deterministic node-id derivation under exact/fuzzy
/// resolution (spec.md §8: "byte-identical node ids under exact mode given
/// a deterministic UUID seed").
const NODE_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6b, 0x6e, 0x6f, 0x77, 0x2d, 0x67, 0x72, 0x61, 0x70, 0x68, 0x2d, 0x6e, 0x73, 0x00, 0x00, 0x01,
]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionMode {
    Exact,
    Fuzzy,
    Ai,
}

impl ResolutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionMode::Exact => "exact",
            ResolutionMode::Fuzzy => "fuzzy",
            ResolutionMode::Ai => "ai",
        }
    }
}

struct CandidateNode {
    id: String,
    canonical_name: String,
}

/// Resolves every not-yet-linked entity belonging to `document_id` against
/// the existing graph, creating new nodes or growing existing ones. Returns
/// the set of node ids touched (created or merged into).
pub async fn resolve_document_entities(
    pool: &SqlitePool,
    document_id: &str,
    mode: ResolutionMode,
    generator: &dyn Generator,
    config: &EngineConfig,
) -> EngineResult<Vec<String>> {
    let entities: Vec<EntityRow> = sqlx::query_as(
        r#"
        SELECT e.* FROM entities e
        LEFT JOIN node_entity_links l ON l.entity_id = e.id
        WHERE e.document_id = ? AND l.id IS NULL
        ORDER BY e.created_at ASC
        "#,
    )
    .bind(document_id)
    .fetch_all(pool)
    .await?;

    let doc_cluster_tags = document_cluster_tags(pool, document_id).await?;
    let mut touched = Vec::new();

    for entity in entities {
        let node_id = resolve_one_entity(pool, &entity, mode, generator, config, &doc_cluster_tags).await?;
        touched.push(node_id);
    }

    touched.sort();
    touched.dedup();
    Ok(touched)
}

async fn document_cluster_tags(pool: &SqlitePool, document_id: &str) -> EngineResult<Vec<String>> {
    let rows = sqlx::query(
        r#"
        SELECT c.classification_tag FROM clusters c
        JOIN document_clusters dc ON dc.cluster_id = c.id
        WHERE dc.document_id = ?
        "#,
    )
    .bind(document_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|r| r.try_get::<String, _>("classification_tag"))
        .collect::<Result<Vec<_>, _>>()?)
}

async fn node_shares_cluster_hint(
    pool: &SqlitePool,
    node_id: &str,
    doc_tags: &[String],
) -> EngineResult<bool> {
    if doc_tags.is_empty() {
        return Ok(false);
    }
    let rows = sqlx::query(
        r#"
        SELECT DISTINCT c.classification_tag FROM node_entity_links l
        JOIN document_clusters dc ON dc.document_id = l.document_id
        JOIN clusters c ON c.id = dc.cluster_id
        WHERE l.node_id = ?
        "#,
    )
    .bind(node_id)
    .fetch_all(pool)
    .await?;
    let node_tags: Vec<String> = rows
        .into_iter()
        .map(|r| r.try_get::<String, _>("classification_tag"))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(node_tags.iter().any(|t| doc_tags.contains(t)))
}

async fn resolve_one_entity(
    pool: &SqlitePool,
    entity: &EntityRow,
    mode: ResolutionMode,
    generator: &dyn Generator,
    config: &EngineConfig,
    doc_cluster_tags: &[String],
) -> EngineResult<String> {
    // Stage 1: exact.
    if let Some(node_id) = find_exact_match(pool, entity).await? {
        link_entity_to_node(pool, entity, &node_id, 1.0, "exact").await?;
        return Ok(node_id);
    }

    // Stage 2: fuzzy (also attempted as the fallback stage for ai mode).
    if mode == ResolutionMode::Fuzzy || mode == ResolutionMode::Ai {
        if let Some((node_id, score)) =
            find_fuzzy_match(pool, entity, config, doc_cluster_tags).await?
        {
            link_entity_to_node(pool, entity, &node_id, score, "fuzzy").await?;
            return Ok(node_id);
        }
    }

    // Stage 3: ai.
    if mode == ResolutionMode::Ai {
        if let Some((node_id, confidence)) = find_ai_match(pool, entity, generator, config).await? {
            link_entity_to_node(pool, entity, &node_id, confidence, "ai").await?;
            return Ok(node_id);
        }
    }

    // No match in any attempted stage: mint a new node.
    let node_id = create_node_for_entity(pool, entity, mode).await?;
    link_entity_to_node(pool, entity, &node_id, 1.0, mode.as_str()).await?;
    Ok(node_id)
}

async fn find_exact_match(pool: &SqlitePool, entity: &EntityRow) -> EngineResult<Option<String>> {
    let row = sqlx::query(
        r#"
        SELECT l.node_id as node_id FROM entities e
        JOIN node_entity_links l ON l.entity_id = e.id
        WHERE e.entity_type = ? AND e.normalized_text = ? AND e.id != ?
        LIMIT 1
        "#,
    )
    .bind(&entity.entity_type)
    .bind(&entity.normalized_text)
    .bind(&entity.id)
    .fetch_optional(pool)
    .await?;
    match row {
        Some(r) => Ok(Some(r.try_get::<String, _>("node_id")?)),
        None => Ok(None),
    }
}

async fn find_fuzzy_match(
    pool: &SqlitePool,
    entity: &EntityRow,
    config: &EngineConfig,
    doc_cluster_tags: &[String],
) -> EngineResult<Option<(String, f64)>> {
    let candidates: Vec<CandidateNode> = sqlx::query_as::<_, (String, String)>(
        "SELECT id, canonical_name FROM knowledge_nodes WHERE entity_type = ?",
    )
    .bind(&entity.entity_type)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|(id, canonical_name)| CandidateNode { id, canonical_name })
    .collect();

    let mut best: Option<(String, String, f64)> = None;
    for candidate in candidates {
        let shares_hint = node_shares_cluster_hint(pool, &candidate.id, doc_cluster_tags).await?;
        let score = similarity::similarity_with_cluster_hint(
            &entity.normalized_text,
            &candidate.canonical_name,
            shares_hint,
            config.cluster_hint_boost,
        );
        if score >= config.fuzzy_similarity_threshold {
            best = match best {
                None => Some((candidate.id, candidate.canonical_name, score)),
                Some((_, _, best_score)) if score > best_score => {
                    Some((candidate.id, candidate.canonical_name, score))
                }
                Some((_, best_name, best_score))
                    if score == best_score && candidate.canonical_name < best_name =>
                {
                    Some((candidate.id, candidate.canonical_name, score))
                }
                Some(existing) => Some(existing),
            };
        }
    }
    Ok(best.map(|(id, _, score)| (id, score)))
}

async fn find_ai_match(
    pool: &SqlitePool,
    entity: &EntityRow,
    generator: &dyn Generator,
    config: &EngineConfig,
) -> EngineResult<Option<(String, f64)>> {
    let candidates: Vec<(String, String)> =
        sqlx::query_as("SELECT id, canonical_name FROM knowledge_nodes WHERE entity_type = ?")
            .bind(&entity.entity_type)
            .fetch_all(pool)
            .await?;

    if candidates.is_empty() {
        return Ok(None);
    }

    let prompt = format!(
        "Candidate entity: \"{}\" (type {}).\nExisting nodes:\n{}\nReturn the best-matching node id and a confidence in [0,1], or null if none match.",
        entity.raw_text,
        entity.entity_type,
        candidates
            .iter()
            .map(|(id, name)| format!("- {id}: {name}"))
            .collect::<Vec<_>>()
            .join("\n")
    );

    let schema = r#"{"node_id": "string|null", "confidence": "number"}"#;

    let response = match generator.classify(&prompt, schema).await {
        Ok(v) => v,
        Err(_) => return Ok(None),
    };

    let node_id = response.get("node_id").and_then(|v| v.as_str());
    let confidence = response.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0);

    match node_id {
        Some(id) if confidence >= config.ai_resolution_confidence_threshold => {
            Ok(Some((id.to_string(), confidence)))
        }
        _ => Ok(None),
    }
}

async fn create_node_for_entity(
    pool: &SqlitePool,
    entity: &EntityRow,
    mode: ResolutionMode,
) -> EngineResult<String> {
    let id = if mode == ResolutionMode::Ai {
        uuid::Uuid::new_v4().to_string()
    } else {
        Uuid::new_v5(
            &NODE_ID_NAMESPACE,
            format!("{}:{}", entity.entity_type, entity.normalized_text).as_bytes(),
        )
        .to_string()
    };

    let provenance_id = provenance::create(
        pool,
        NewProvenanceRecord {
            kind: ProvenanceKind::KnowledgeGraph,
            source_id: Some(entity.provenance_id.clone()),
            root_document_id: entity.document_id.clone(),
            parent_ids: vec![],
            content_hash: crate::hashid::content_hash(
                format!("{}:{}", entity.entity_type, entity.normalized_text).as_bytes(),
            ),
            input_hash: None,
            file_hash: None,
            processor: "entity_resolver".into(),
            processor_version: "1".into(),
            processing_params: serde_json::json!({ "mode": mode.as_str() }),
            location: None,
            source_file_created_at: None,
            source_file_modified_at: None,
        },
    )
    .await?;

    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO knowledge_nodes (
            id, entity_type, canonical_name, normalized_name, aliases,
            document_count, mention_count, edge_count, avg_confidence,
            metadata, provenance_id, created_at, updated_at
        ) VALUES (?, ?, ?, ?, '[]', 0, 0, 0, 0, '{}', ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&entity.entity_type)
    .bind(&entity.raw_text)
    .bind(similarity::normalize_name(&entity.raw_text))
    .bind(&provenance_id)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(id)
}

async fn link_entity_to_node(
    pool: &SqlitePool,
    entity: &EntityRow,
    node_id: &str,
    similarity_score: f64,
    method: &str,
) -> EngineResult<()> {
    let id = crate::hashid::new_id();
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO node_entity_links (id, node_id, entity_id, document_id, similarity_score, resolution_method, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(node_id)
    .bind(&entity.id)
    .bind(&entity.document_id)
    .bind(similarity_score)
    .bind(method)
    .bind(&now)
    .execute(pool)
    .await?;

    recompute_node_aggregates(pool, node_id).await
}

/// Canonical name is the longest member raw_text, ties by earliest creation
/// time; aliases is the distinct set of member raw_texts; avg_confidence is
/// the arithmetic mean of member confidences (spec.md §4.2).
pub async fn recompute_node_aggregates(pool: &SqlitePool, node_id: &str) -> EngineResult<()> {
    let members: Vec<(String, f64, String, String)> = sqlx::query_as(
        r#"
        SELECT e.raw_text, e.confidence, e.document_id, e.created_at
        FROM entities e
        JOIN node_entity_links l ON l.entity_id = e.id
        WHERE l.node_id = ?
        "#,
    )
    .bind(node_id)
    .fetch_all(pool)
    .await?;

    if members.is_empty() {
        return Ok(());
    }

    let canonical_name = members
        .iter()
        .max_by(|a, b| {
            a.0.len()
                .cmp(&b.0.len())
                .then_with(|| b.3.cmp(&a.3)) // earlier created_at wins ties
        })
        .map(|m| m.0.clone())
        .unwrap_or_default();

    let mut aliases: Vec<String> = members.iter().map(|m| m.0.clone()).collect();
    aliases.sort();
    aliases.dedup();

    let avg_confidence = members.iter().map(|m| m.1).sum::<f64>() / members.len() as f64;

    let mut doc_ids: Vec<String> = members.iter().map(|m| m.2.clone()).collect();
    doc_ids.sort();
    doc_ids.dedup();
    let document_count = doc_ids.len() as i64;

    let mention_row = sqlx::query(
        r#"
        SELECT COUNT(*) as c FROM entity_mentions em
        JOIN node_entity_links l ON l.entity_id = em.entity_id
        WHERE l.node_id = ?
        "#,
    )
    .bind(node_id)
    .fetch_one(pool)
    .await?;
    let mention_count: i64 = mention_row.try_get("c")?;

    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        UPDATE knowledge_nodes SET
            canonical_name = ?, normalized_name = ?, aliases = ?,
            document_count = ?, mention_count = ?, avg_confidence = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&canonical_name)
    .bind(similarity::normalize_name(&canonical_name))
    .bind(serde_json::to_string(&aliases)?)
    .bind(document_count)
    .bind(mention_count)
    .bind(avg_confidence)
    .bind(&now)
    .bind(node_id)
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MockGenerator;
    use crate::db::Database;
    use crate::documents::register_document;
    use uuid::Uuid as UuidT;

    async fn setup() -> SqlitePool {
        Database::open_in_memory(&EngineConfig::default()).await.unwrap().pool().clone()
    }

    async fn insert_entity(pool: &SqlitePool, document_id: &str, raw_text: &str, entity_type: &str) -> String {
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
        .bind(similarity::normalize_name(raw_text))
        .bind(&provenance_id)
        .bind(&now)
        .execute(pool)
        .await
        .unwrap();
        id
    }

    #[tokio::test]
    async fn exact_mode_merges_identical_entities_across_documents() {
        let pool = setup().await;
        let doc_a = register_document(&pool, "/a", "a", b"a", "pdf").await.unwrap();
        let doc_b = register_document(&pool, "/b", "b", b"b", "pdf").await.unwrap();
        insert_entity(&pool, &doc_a.id, "Alice", "person").await;
        insert_entity(&pool, &doc_b.id, "Alice", "person").await;

        let config = EngineConfig::default();
        let gen = MockGenerator;
        resolve_document_entities(&pool, &doc_a.id, ResolutionMode::Exact, &gen, &config)
            .await
            .unwrap();
        resolve_document_entities(&pool, &doc_b.id, ResolutionMode::Exact, &gen, &config)
            .await
            .unwrap();

        let row = sqlx::query("SELECT COUNT(*) as c FROM knowledge_nodes")
            .fetch_one(&pool)
            .await
            .unwrap();
        let count: i64 = row.try_get("c").unwrap();
        assert_eq!(count, 1);

        let node_row = sqlx::query("SELECT document_count FROM knowledge_nodes")
            .fetch_one(&pool)
            .await
            .unwrap();
        let document_count: i64 = node_row.try_get("document_count").unwrap();
        assert_eq!(document_count, 2);
    }

    #[tokio::test]
    async fn exact_mode_node_ids_are_deterministic_given_same_input() {
        let pool1 = setup().await;
        let doc1 = register_document(&pool1, "/a", "a", b"a", "pdf").await.unwrap();
        insert_entity(&pool1, &doc1.id, "Alice", "person").await;
        let config = EngineConfig::default();
        let gen = MockGenerator;
        resolve_document_entities(&pool1, &doc1.id, ResolutionMode::Exact, &gen, &config)
            .await
            .unwrap();
        let row1 = sqlx::query("SELECT id FROM knowledge_nodes").fetch_one(&pool1).await.unwrap();
        let id1: String = row1.try_get("id").unwrap();

        let pool2 = setup().await;
        let doc2 = register_document(&pool2, "/a", "a", b"a", "pdf").await.unwrap();
        insert_entity(&pool2, &doc2.id, "Alice", "person").await;
        resolve_document_entities(&pool2, &doc2.id, ResolutionMode::Exact, &gen, &config)
            .await
            .unwrap();
        let row2 = sqlx::query("SELECT id FROM knowledge_nodes").fetch_one(&pool2).await.unwrap();
        let id2: String = row2.try_get("id").unwrap();

        assert_eq!(id1, id2);
        assert!(UuidT::parse_str(&id1).is_ok());
    }

    #[tokio::test]
    async fn fuzzy_mode_merges_near_matches_above_threshold() {
        let pool = setup().await;
        let doc_a = register_document(&pool, "/a", "a", b"a", "pdf").await.unwrap();
        let doc_b = register_document(&pool, "/b", "b", b"b", "pdf").await.unwrap();
        insert_entity(&pool, &doc_a.id, "John Smith", "person").await;
        insert_entity(&pool, &doc_b.id, "John Smith Jr", "person").await;

        let config = EngineConfig::default();
        let gen = MockGenerator;
        resolve_document_entities(&pool, &doc_a.id, ResolutionMode::Fuzzy, &gen, &config)
            .await
            .unwrap();
        resolve_document_entities(&pool, &doc_b.id, ResolutionMode::Fuzzy, &gen, &config)
            .await
            .unwrap();

        let row = sqlx::query("SELECT COUNT(*) as c FROM knowledge_nodes")
            .fetch_one(&pool)
            .await
            .unwrap();
        let count: i64 = row.try_get("c").unwrap();
        // "John Smith" vs "John Smith Jr": tokens {john,smith} vs {john,smith,jr}
        // jaccard = 2/3 = 0.667, below the 0.85 threshold -> no merge, 2 nodes.
        assert_eq!(count, 2);
    }
}
