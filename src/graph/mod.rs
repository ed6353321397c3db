//! Knowledge graph subsystem: entity resolution, co-occurrence edges,
//! relationship classification, incremental maintenance, cascade delete,
//! and the query layer (spec.md §4.2-§4.7).

pub mod builder;
pub mod cascade;
pub mod classifier;
pub mod incremental;
pub mod model;
pub mod query;

#[cfg(test)]
mod end_to_end_tests {
    use crate::collaborators::MockGenerator;
    use crate::config::EngineConfig;
    use crate::db::Database;
    use crate::documents::register_document;
    use crate::graph::builder::build_cooccurrence_edges;
    use crate::graph::cascade::delete_document;
    use crate::graph::incremental::remove_document;
    use crate::provenance::{self, NewProvenanceRecord, ProvenanceKind};
    use crate::resolver::{resolve_document_entities, ResolutionMode};
    use chrono::Utc;
    use sqlx::SqlitePool;

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

    /// spec.md §8 scenario 1: build from two docs.
    #[tokio::test]
    async fn scenario_build_from_two_docs() {
        let pool = setup().await;
        let config = EngineConfig::default();
        let gen = MockGenerator;

        let doc_a = register_document(&pool, "/a", "a", b"a", "pdf").await.unwrap();
        let doc_b = register_document(&pool, "/b", "b", b"b", "pdf").await.unwrap();
        insert_entity(&pool, &doc_a.id, "Alice", "person").await;
        insert_entity(&pool, &doc_a.id, "Acme", "organization").await;
        insert_entity(&pool, &doc_b.id, "Alice", "person").await;
        insert_entity(&pool, &doc_b.id, "Bob", "person").await;

        resolve_document_entities(&pool, &doc_a.id, ResolutionMode::Exact, &gen, &config).await.unwrap();
        resolve_document_entities(&pool, &doc_b.id, ResolutionMode::Exact, &gen, &config).await.unwrap();
        build_cooccurrence_edges(&pool, &config).await.unwrap();

        let node_count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM knowledge_nodes").fetch_one(&pool).await.unwrap();
        assert_eq!(node_count.0, 3);

        let alice_docs: (i64,) =
            sqlx::query_as("SELECT document_count FROM knowledge_nodes WHERE canonical_name = 'Alice'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(alice_docs.0, 2);

        let edges: Vec<(String, f64)> = sqlx::query_as(
            "SELECT relationship_type, weight FROM knowledge_edges WHERE relationship_type = 'co_mentioned' ORDER BY weight DESC",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].1, 1.0);
        assert_eq!(edges[1].1, 0.5);
    }

    /// spec.md §8 scenario 3: incremental removal.
    #[tokio::test]
    async fn scenario_incremental_removal() {
        let pool = setup().await;
        let config = EngineConfig::default();
        let gen = MockGenerator;

        let doc_a = register_document(&pool, "/a", "a", b"a", "pdf").await.unwrap();
        let doc_b = register_document(&pool, "/b", "b", b"b", "pdf").await.unwrap();
        insert_entity(&pool, &doc_a.id, "Alice", "person").await;
        insert_entity(&pool, &doc_a.id, "Acme", "organization").await;
        insert_entity(&pool, &doc_b.id, "Alice", "person").await;
        insert_entity(&pool, &doc_b.id, "Bob", "person").await;
        resolve_document_entities(&pool, &doc_a.id, ResolutionMode::Exact, &gen, &config).await.unwrap();
        resolve_document_entities(&pool, &doc_b.id, ResolutionMode::Exact, &gen, &config).await.unwrap();
        build_cooccurrence_edges(&pool, &config).await.unwrap();

        remove_document(&pool, &doc_a.id).await.unwrap();

        let acme: Option<(String,)> = sqlx::query_as("SELECT id FROM knowledge_nodes WHERE canonical_name = 'Acme'")
            .fetch_optional(&pool)
            .await
            .unwrap();
        assert!(acme.is_none());

        let alice_docs: (i64,) =
            sqlx::query_as("SELECT document_count FROM knowledge_nodes WHERE canonical_name = 'Alice'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(alice_docs.0, 1);

        let bob_docs: (i64,) =
            sqlx::query_as("SELECT document_count FROM knowledge_nodes WHERE canonical_name = 'Bob'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(bob_docs.0, 1);
    }

    /// spec.md §8 scenario 5: cascade delete correctness.
    #[tokio::test]
    async fn scenario_cascade_delete_removes_singleton_orphans() {
        let pool = setup().await;
        let config = EngineConfig::default();
        let gen = MockGenerator;

        let doc = register_document(&pool, "/d", "d", b"d", "pdf").await.unwrap();
        insert_entity(&pool, &doc.id, "Alice", "person").await;
        insert_entity(&pool, &doc.id, "Acme", "organization").await;
        insert_entity(&pool, &doc.id, "2024-01-01", "date").await;
        resolve_document_entities(&pool, &doc.id, ResolutionMode::Exact, &gen, &config).await.unwrap();
        build_cooccurrence_edges(&pool, &config).await.unwrap();

        delete_document(&pool, &doc.id).await.unwrap();

        let nodes: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM knowledge_nodes").fetch_one(&pool).await.unwrap();
        assert_eq!(nodes.0, 0);
        let edges: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM knowledge_edges").fetch_one(&pool).await.unwrap();
        assert_eq!(edges.0, 0);
        let entities: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entities").fetch_one(&pool).await.unwrap();
        assert_eq!(entities.0, 0);
        let docs: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM documents").fetch_one(&pool).await.unwrap();
        assert_eq!(docs.0, 0);

        let provenance_rows: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM provenance_records").fetch_one(&pool).await.unwrap();
        assert!(provenance_rows.0 > 0);
    }

    /// spec.md §8 scenario 6: atomic claim.
    #[tokio::test]
    async fn scenario_atomic_claim_hands_out_distinct_documents() {
        let pool = setup().await;
        register_document(&pool, "/a", "a", b"a", "pdf").await.unwrap();
        register_document(&pool, "/b", "b", b"b", "pdf").await.unwrap();

        let first = crate::documents::claim_pending_document(&pool).await.unwrap();
        let second = crate::documents::claim_pending_document(&pool).await.unwrap();
        let third = crate::documents::claim_pending_document(&pool).await.unwrap();

        assert!(first.is_some());
        assert!(second.is_some());
        assert_ne!(first.as_ref().unwrap().id, second.as_ref().unwrap().id);
        assert!(third.is_none());
    }
}
