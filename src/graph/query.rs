//! Graph query layer (spec.md §4.7): filtered node/edge retrieval,
//! neighborhood expansion, and bounded-depth path search.

use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::db::schema::{KnowledgeEdgeRow, KnowledgeNodeRow};
use crate::error::{EngineError, EngineResult};

const MAX_DEPTH_CAP: i64 = 3;
const MAX_HOPS_CAP: i64 = 6;
const LIST_LIMIT_CAP: i64 = 200;
const NEIGHBORHOOD_LIMIT_CAP: i64 = 200;
const EVIDENCE_CHUNKS_PER_EDGE: usize = 5;

#[derive(Debug, Default)]
pub struct NodeFilter {
    pub entity_type: Option<String>,
    pub canonical_name_substring: Option<String>,
    pub min_document_count: Option<i64>,
    pub document_id: Option<String>,
    pub limit: i64,
}

/// Filters by entity_type, canonical_name substring (FTS first, LIKE
/// fallback), min_document_count, or document_id membership. Ordered by
/// descending document_count. `limit` saturates at 200.
pub async fn list_nodes(pool: &SqlitePool, filter: NodeFilter) -> EngineResult<Vec<KnowledgeNodeRow>> {
    let limit = filter.limit.clamp(1, LIST_LIMIT_CAP);

    let mut candidate_ids: Option<HashSet<String>> = None;

    if let Some(substring) = &filter.canonical_name_substring {
        let fts_ids = fts_match_node_ids(pool, substring).await?;
        let ids = if fts_ids.is_empty() {
            like_match_node_ids(pool, substring).await?
        } else {
            fts_ids
        };
        candidate_ids = Some(ids);
    }

    if let Some(document_id) = &filter.document_id {
        let rows = sqlx::query("SELECT DISTINCT node_id FROM node_entity_links WHERE document_id = ?")
            .bind(document_id)
            .fetch_all(pool)
            .await?;
        let ids: HashSet<String> = rows
            .into_iter()
            .map(|r| r.try_get::<String, _>("node_id"))
            .collect::<Result<_, _>>()?;
        candidate_ids = Some(match candidate_ids {
            Some(existing) => existing.intersection(&ids).cloned().collect(),
            None => ids,
        });
    }

    let mut nodes: Vec<KnowledgeNodeRow> =
        sqlx::query_as("SELECT * FROM knowledge_nodes ORDER BY document_count DESC, id ASC")
            .fetch_all(pool)
            .await?;

    if let Some(entity_type) = &filter.entity_type {
        nodes.retain(|n| &n.entity_type == entity_type);
    }
    if let Some(min_count) = filter.min_document_count {
        nodes.retain(|n| n.document_count >= min_count);
    }
    if let Some(ids) = &candidate_ids {
        nodes.retain(|n| ids.contains(&n.id));
    }

    nodes.truncate(limit as usize);
    Ok(nodes)
}

async fn fts_match_node_ids(pool: &SqlitePool, substring: &str) -> EngineResult<HashSet<String>> {
    let rows = sqlx::query(
        "SELECT knowledge_nodes.id as id FROM knowledge_nodes_fts JOIN knowledge_nodes ON knowledge_nodes.rowid = knowledge_nodes_fts.rowid WHERE knowledge_nodes_fts MATCH ?",
    )
    .bind(substring)
    .fetch_all(pool)
    .await;
    match rows {
        Ok(rows) => rows
            .into_iter()
            .map(|r| r.try_get::<String, _>("id"))
            .collect::<Result<_, _>>()
            .map_err(Into::into),
        Err(_) => Ok(HashSet::new()),
    }
}

async fn like_match_node_ids(pool: &SqlitePool, substring: &str) -> EngineResult<HashSet<String>> {
    let pattern = format!("%{}%", substring.replace('%', "\\%"));
    let rows = sqlx::query("SELECT id FROM knowledge_nodes WHERE canonical_name LIKE ? ESCAPE '\\'")
        .bind(pattern)
        .fetch_all(pool)
        .await?;
    rows.into_iter()
        .map(|r| r.try_get::<String, _>("id"))
        .collect::<Result<_, _>>()
        .map_err(Into::into)
}

/// Breadth-first expansion from `seed_ids` along edges, returning the
/// induced subgraph of nodes and edges whose endpoints both lie within the
/// visited set. `max_depth` saturates at 3, `limit` at 200.
pub async fn expand_neighborhood(
    pool: &SqlitePool,
    seed_ids: &[String],
    max_depth: i64,
    limit: i64,
) -> EngineResult<(Vec<KnowledgeNodeRow>, Vec<KnowledgeEdgeRow>)> {
    let max_depth = max_depth.clamp(0, MAX_DEPTH_CAP);
    let limit = limit.clamp(1, NEIGHBORHOOD_LIMIT_CAP) as usize;

    let mut visited: HashSet<String> = seed_ids.iter().cloned().collect();
    let mut frontier: VecDeque<(String, i64)> = seed_ids.iter().map(|id| (id.clone(), 0)).collect();

    while let Some((node_id, depth)) = frontier.pop_front() {
        if depth >= max_depth || visited.len() >= limit {
            continue;
        }
        let neighbors = adjacent_node_ids(pool, &node_id).await?;
        for neighbor in neighbors {
            if visited.len() >= limit {
                break;
            }
            if visited.insert(neighbor.clone()) {
                frontier.push_back((neighbor, depth + 1));
            }
        }
    }

    let nodes = fetch_nodes(pool, &visited).await?;
    let edges = fetch_edges_within(pool, &visited).await?;
    Ok((nodes, edges))
}

async fn adjacent_node_ids(pool: &SqlitePool, node_id: &str) -> EngineResult<Vec<String>> {
    let rows = sqlx::query(
        "SELECT source_node_id, target_node_id FROM knowledge_edges WHERE source_node_id = ? OR target_node_id = ?",
    )
    .bind(node_id)
    .bind(node_id)
    .fetch_all(pool)
    .await?;
    let mut out = Vec::new();
    for row in rows {
        let source: String = row.try_get("source_node_id")?;
        let target: String = row.try_get("target_node_id")?;
        out.push(if source == node_id { target } else { source });
    }
    Ok(out)
}

async fn fetch_nodes(pool: &SqlitePool, ids: &HashSet<String>) -> EngineResult<Vec<KnowledgeNodeRow>> {
    let mut nodes = Vec::new();
    for id in ids {
        if let Some(node) = sqlx::query_as::<_, KnowledgeNodeRow>("SELECT * FROM knowledge_nodes WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?
        {
            nodes.push(node);
        }
    }
    nodes.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(nodes)
}

async fn fetch_edges_within(pool: &SqlitePool, ids: &HashSet<String>) -> EngineResult<Vec<KnowledgeEdgeRow>> {
    let all: Vec<KnowledgeEdgeRow> = sqlx::query_as("SELECT * FROM knowledge_edges")
        .fetch_all(pool)
        .await?;
    Ok(all
        .into_iter()
        .filter(|e| ids.contains(&e.source_node_id) && ids.contains(&e.target_node_id))
        .collect())
}

#[derive(Debug, Serialize)]
pub struct MemberEntitySummary {
    pub entity_id: String,
    pub document_id: String,
    pub document_name: String,
    pub raw_text: String,
}

#[derive(Debug, Serialize)]
pub struct ConnectedEdgeSummary {
    pub edge_id: String,
    pub relationship_type: String,
    pub weight: f64,
    pub other_node_id: String,
    pub other_node_canonical_name: String,
}

#[derive(Debug, Serialize)]
pub struct NodeDetails {
    pub node: KnowledgeNodeRow,
    pub members: Vec<MemberEntitySummary>,
    pub edges: Vec<ConnectedEdgeSummary>,
    pub provenance_chain: Option<Vec<crate::provenance::ProvenanceRecord>>,
}

pub async fn get_node_details(
    pool: &SqlitePool,
    node_id: &str,
    include_mentions: bool,
    include_provenance: bool,
) -> EngineResult<NodeDetails> {
    let node: KnowledgeNodeRow = sqlx::query_as("SELECT * FROM knowledge_nodes WHERE id = ?")
        .bind(node_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| EngineError::Validation(format!("knowledge node not found: {node_id}")))?;

    let members = if include_mentions {
        let rows = sqlx::query(
            r#"
            SELECT e.id as entity_id, e.document_id as document_id, d.file_name as document_name, e.raw_text as raw_text
            FROM entities e
            JOIN node_entity_links l ON l.entity_id = e.id
            JOIN documents d ON d.id = e.document_id
            WHERE l.node_id = ?
            "#,
        )
        .bind(node_id)
        .fetch_all(pool)
        .await?;
        rows.into_iter()
            .map(|r| {
                Ok(MemberEntitySummary {
                    entity_id: r.try_get("entity_id")?,
                    document_id: r.try_get("document_id")?,
                    document_name: r.try_get("document_name")?,
                    raw_text: r.try_get("raw_text")?,
                })
            })
            .collect::<EngineResult<Vec<_>>>()?
    } else {
        vec![]
    };

    let edge_rows: Vec<KnowledgeEdgeRow> = sqlx::query_as(
        "SELECT * FROM knowledge_edges WHERE source_node_id = ? OR target_node_id = ?",
    )
    .bind(node_id)
    .bind(node_id)
    .fetch_all(pool)
    .await?;

    let mut edges = Vec::new();
    for edge in edge_rows {
        let other_id = if edge.source_node_id == node_id {
            edge.target_node_id.clone()
        } else {
            edge.source_node_id.clone()
        };
        let other_name: (String,) = sqlx::query_as("SELECT canonical_name FROM knowledge_nodes WHERE id = ?")
            .bind(&other_id)
            .fetch_one(pool)
            .await?;
        edges.push(ConnectedEdgeSummary {
            edge_id: edge.id,
            relationship_type: edge.relationship_type,
            weight: edge.weight,
            other_node_id: other_id,
            other_node_canonical_name: other_name.0,
        });
    }

    let provenance_chain = if include_provenance {
        Some(crate::provenance::chain(pool, &node.provenance_id).await?)
    } else {
        None
    };

    Ok(NodeDetails { node, members, edges, provenance_chain })
}

#[derive(Debug, Serialize)]
pub struct PathEdge {
    pub edge_id: String,
    pub source_node_id: String,
    pub target_node_id: String,
    pub relationship_type: String,
    pub weight: f64,
    pub evidence: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct Path {
    pub node_ids: Vec<String>,
    pub edges: Vec<PathEdge>,
}

/// BFS over all simple paths of length `<= max_hops` between `source` and
/// `target`. Both may be supplied as node ids (UUID-shaped) or as names
/// (FTS then LIKE resolution). Absence of either endpoint is fatal.
pub async fn find_paths(
    pool: &SqlitePool,
    source: &str,
    target: &str,
    max_hops: i64,
    relationship_filter: Option<&[String]>,
    include_evidence: bool,
) -> EngineResult<Vec<Path>> {
    let max_hops = max_hops.clamp(1, MAX_HOPS_CAP);

    let source_id = resolve_node_reference(pool, source).await?;
    let target_id = resolve_node_reference(pool, target).await?;

    let adjacency = load_adjacency(pool, relationship_filter).await?;

    let mut paths = Vec::new();
    let mut queue: std::collections::VecDeque<(String, Vec<String>, Vec<KnowledgeEdgeRow>)> =
        std::collections::VecDeque::new();
    queue.push_back((source_id.clone(), vec![source_id.clone()], vec![]));

    // Breadth-first enumeration of all simple paths up to max_hops: shorter
    // paths are found first, and neighbors are visited in ascending edge id
    // order so ties among equal-length paths are broken deterministically.
    while let Some((current, node_path, edge_path)) = queue.pop_front() {
        if current == target_id && node_path.len() > 1 {
            paths.push((node_path.clone(), edge_path.clone()));
            continue;
        }
        if edge_path.len() as i64 >= max_hops {
            continue;
        }
        if let Some(neighbors) = adjacency.get(&current) {
            for (edge, next) in neighbors {
                if node_path.contains(next) {
                    continue;
                }
                let mut next_node_path = node_path.clone();
                next_node_path.push(next.clone());
                let mut next_edge_path = edge_path.clone();
                next_edge_path.push(edge.clone());
                queue.push_back((next.clone(), next_node_path, next_edge_path));
            }
        }
    }

    let mut result = Vec::new();
    for (node_ids, edges) in paths {
        let mut path_edges = Vec::new();
        for edge in edges {
            let evidence = if include_evidence {
                gather_path_evidence(pool, &edge).await?
            } else {
                vec![]
            };
            path_edges.push(PathEdge {
                edge_id: edge.id,
                source_node_id: edge.source_node_id,
                target_node_id: edge.target_node_id,
                relationship_type: edge.relationship_type,
                weight: edge.weight,
                evidence,
            });
        }
        result.push(Path { node_ids, edges: path_edges });
    }

    Ok(result)
}

async fn gather_path_evidence(pool: &SqlitePool, edge: &KnowledgeEdgeRow) -> EngineResult<Vec<String>> {
    let document_ids: Vec<String> = serde_json::from_str(&edge.document_ids).unwrap_or_default();
    if document_ids.is_empty() {
        return Ok(vec![]);
    }
    let placeholders = document_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "SELECT text FROM chunks WHERE document_id IN ({placeholders}) ORDER BY document_id ASC, chunk_index ASC LIMIT {EVIDENCE_CHUNKS_PER_EDGE}"
    );
    let mut query = sqlx::query(&sql);
    for doc_id in &document_ids {
        query = query.bind(doc_id);
    }
    let rows = query.fetch_all(pool).await?;
    rows.into_iter()
        .map(|r| r.try_get::<String, _>("text"))
        .collect::<Result<_, _>>()
        .map_err(Into::into)
}

async fn load_adjacency(
    pool: &SqlitePool,
    relationship_filter: Option<&[String]>,
) -> EngineResult<HashMap<String, Vec<(KnowledgeEdgeRow, String)>>> {
    let edges: Vec<KnowledgeEdgeRow> = sqlx::query_as("SELECT * FROM knowledge_edges")
        .fetch_all(pool)
        .await?;
    let mut adjacency: HashMap<String, Vec<(KnowledgeEdgeRow, String)>> = HashMap::new();
    for edge in edges {
        if let Some(filter) = relationship_filter {
            if !filter.contains(&edge.relationship_type) {
                continue;
            }
        }
        adjacency
            .entry(edge.source_node_id.clone())
            .or_default()
            .push((edge.clone(), edge.target_node_id.clone()));
        adjacency
            .entry(edge.target_node_id.clone())
            .or_default()
            .push((edge.clone(), edge.source_node_id.clone()));
    }
    for neighbors in adjacency.values_mut() {
        neighbors.sort_by(|(a, _), (b, _)| a.id.cmp(&b.id));
    }
    Ok(adjacency)
}

fn looks_like_uuid(s: &str) -> bool {
    uuid::Uuid::parse_str(s).is_ok()
}

async fn resolve_node_reference(pool: &SqlitePool, reference: &str) -> EngineResult<String> {
    if looks_like_uuid(reference) {
        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM knowledge_nodes WHERE id = ?")
            .bind(reference)
            .fetch_optional(pool)
            .await?;
        return exists
            .map(|(id,)| id)
            .ok_or_else(|| EngineError::Validation(format!("knowledge node not found: {reference}")));
    }

    let fts_ids = fts_match_node_ids(pool, reference).await?;
    let candidate = if !fts_ids.is_empty() {
        fts_ids.into_iter().next()
    } else {
        like_match_node_ids(pool, reference).await?.into_iter().next()
    };

    candidate.ok_or_else(|| EngineError::Validation(format!("knowledge node not found: {reference}")))
}

#[derive(Debug, Serialize)]
pub struct GraphStats {
    pub node_count: i64,
    pub edge_count: i64,
    pub document_count: i64,
    pub relationship_type_counts: HashMap<String, i64>,
    pub orphan_node_count: i64,
}

/// Ambient addition (not named in the upstream spec, see SPEC_FULL.md): a
/// read-model summary used by dashboards and the demo tool surface.
pub async fn graph_stats(pool: &SqlitePool) -> EngineResult<GraphStats> {
    let node_count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM knowledge_nodes").fetch_one(pool).await?;
    let edge_count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM knowledge_edges").fetch_one(pool).await?;
    let document_count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM documents").fetch_one(pool).await?;
    let orphan_count: (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM knowledge_nodes n
        WHERE n.document_count <= 0 AND NOT EXISTS (
            SELECT 1 FROM node_entity_links l WHERE l.node_id = n.id
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    let rows = sqlx::query("SELECT relationship_type, COUNT(*) as c FROM knowledge_edges GROUP BY relationship_type")
        .fetch_all(pool)
        .await?;
    let mut relationship_type_counts = HashMap::new();
    for row in rows {
        let rel: String = row.try_get("relationship_type")?;
        let count: i64 = row.try_get("c")?;
        relationship_type_counts.insert(rel, count);
    }

    Ok(GraphStats {
        node_count: node_count.0,
        edge_count: edge_count.0,
        document_count: document_count.0,
        relationship_type_counts,
        orphan_node_count: orphan_count.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MockGenerator;
    use crate::config::EngineConfig;
    use crate::db::Database;
    use crate::documents::register_document;
    use crate::graph::builder::build_cooccurrence_edges;
    use crate::provenance::{self, NewProvenanceRecord, ProvenanceKind};
    use crate::resolver::{resolve_document_entities, ResolutionMode};
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

    async fn build_three_node_chain(pool: &SqlitePool) {
        let config = EngineConfig::default();
        let gen = MockGenerator;
        let doc_ab = register_document(pool, "/ab", "ab", b"ab", "pdf").await.unwrap();
        let doc_bc = register_document(pool, "/bc", "bc", b"bc", "pdf").await.unwrap();
        insert_entity(pool, &doc_ab.id, "Alice", "person").await;
        insert_entity(pool, &doc_ab.id, "Bob", "person").await;
        insert_entity(pool, &doc_bc.id, "Bob", "person").await;
        insert_entity(pool, &doc_bc.id, "Carol", "person").await;
        resolve_document_entities(pool, &doc_ab.id, ResolutionMode::Exact, &gen, &config).await.unwrap();
        resolve_document_entities(pool, &doc_bc.id, ResolutionMode::Exact, &gen, &config).await.unwrap();
        build_cooccurrence_edges(pool, &config).await.unwrap();
    }

    #[tokio::test]
    async fn find_paths_returns_two_hop_path() {
        let pool = setup().await;
        build_three_node_chain(&pool).await;

        let alice: (String,) = sqlx::query_as("SELECT id FROM knowledge_nodes WHERE canonical_name = 'Alice'")
            .fetch_one(&pool)
            .await
            .unwrap();
        let carol: (String,) = sqlx::query_as("SELECT id FROM knowledge_nodes WHERE canonical_name = 'Carol'")
            .fetch_one(&pool)
            .await
            .unwrap();

        let paths = find_paths(&pool, &alice.0, &carol.0, 2, None, false).await.unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].node_ids.len(), 3);
    }

    #[tokio::test]
    async fn find_paths_missing_endpoint_is_fatal() {
        let pool = setup().await;
        build_three_node_chain(&pool).await;
        let err = find_paths(&pool, "nonexistent-name-xyz", "also-missing", 2, None, false).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn graph_stats_counts_nodes_and_edges() {
        let pool = setup().await;
        build_three_node_chain(&pool).await;
        let stats = graph_stats(&pool).await.unwrap();
        assert_eq!(stats.node_count, 3);
        assert_eq!(stats.edge_count, 2);
    }

    #[tokio::test]
    async fn list_nodes_respects_limit_cap() {
        let pool = setup().await;
        build_three_node_chain(&pool).await;
        let filter = NodeFilter { limit: 1, ..Default::default() };
        let nodes = list_nodes(&pool, filter).await.unwrap();
        assert_eq!(nodes.len(), 1);
    }
}
