//! Tool surface smoke-test binary.
//!
//! Ingests a handful of in-memory documents through the mock collaborators,
//! builds the knowledge graph, and prints the result of each §6.3 operation.
//! Not a substitute for the crate's own test suite - just a manual check
//! that the pieces wire together end to end.
//!
//! Usage: cargo run --features demo-bin --bin tool_surface_demo

use knowledge_engine::api;
use knowledge_engine::collaborators::{ChunkResult, Chunker, Embedder, Generator, MockEmbedder, MockGenerator, OcrOutput, OcrService};
use knowledge_engine::config::EngineConfig;
use knowledge_engine::db::Database;
use knowledge_engine::documents::register_document;
use knowledge_engine::error::EngineResult;
use knowledge_engine::ingest::ingest_document;
use knowledge_engine::resolver::ResolutionMode;

struct DemoOcr;

#[async_trait::async_trait]
impl OcrService for DemoOcr {
    async fn process(&self, bytes: &[u8], _file_name: &str) -> EngineResult<OcrOutput> {
        let text = String::from_utf8_lossy(bytes).to_string();
        let len = text.len();
        Ok(OcrOutput {
            text,
            page_count: 1,
            page_offsets: vec![(0, len, 1)],
            blocks_json: serde_json::json!([]),
            quality: Some(0.99),
            duration_ms: 1,
            cost: None,
        })
    }
}

struct DemoChunker;

impl Chunker for DemoChunker {
    fn chunk(&self, text: &str, _page_offsets: &[(usize, usize, u32)], _blocks: Option<&serde_json::Value>) -> Vec<ChunkResult> {
        text.split(". ")
            .filter(|s| !s.trim().is_empty())
            .scan(0usize, |offset, sentence| {
                let start = *offset;
                let end = start + sentence.len();
                *offset = end + 2;
                Some(ChunkResult {
                    text: sentence.to_string(),
                    character_start: start,
                    character_end: end,
                    page_number: Some(1),
                    heading_context: None,
                    section_path: None,
                    content_type: None,
                    atomic: false,
                })
            })
            .collect()
    }
}

#[tokio::main]
async fn main() -> EngineResult<()> {
    env_logger::init();

    let config = EngineConfig::default();
    let db = Database::open_in_memory(&config).await?;
    let pool = db.pool().clone();

    let ocr = DemoOcr;
    let chunker = DemoChunker;
    let embedder = MockEmbedder { dimension: config.embedding_dimension };
    let generator = MockGenerator;

    let doc_a = register_document(
        &pool,
        "/demo/memo-a.txt",
        "memo-a.txt",
        b"Alice Johnson met with Bob Smith. Acme Corp signed the contract.",
        "txt",
    )
    .await?;
    let doc_b = register_document(
        &pool,
        "/demo/memo-b.txt",
        "memo-b.txt",
        b"Bob Smith later emailed Acme Corp about the delivery schedule.",
        "txt",
    )
    .await?;

    for doc in [&doc_a, &doc_b] {
        let chunk_ids = ingest_document(&pool, &doc.id, &ocr, &chunker, &embedder).await?;
        println!("ingested {} -> {} chunks", doc.file_name, chunk_ids.len());
    }

    let build_result = api::build_graph(
        &pool,
        &generator,
        &config,
        api::BuildGraphInput {
            document_filter: None,
            resolution_mode: ResolutionMode::Exact,
            classify_relationships: true,
            rebuild: false,
        },
    )
    .await;
    println!("build_graph: {}", serde_json::to_string_pretty(&build_result).unwrap());

    let stats = api::graph_stats(&pool).await;
    println!("graph_stats: {}", serde_json::to_string_pretty(&stats).unwrap());

    let query_result = api::query_graph(
        &pool,
        api::QueryGraphInput {
            entity_name: None,
            entity_type: None,
            document_filter: None,
            min_document_count: None,
            include_edges: true,
            include_documents: false,
            max_depth: 1,
            limit: 50,
        },
    )
    .await;
    println!("query_graph: {}", serde_json::to_string_pretty(&query_result).unwrap());

    Ok(())
}
