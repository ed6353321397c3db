//! External collaborator contracts (spec.md §6.2). These are the boundary
//! the core Knowledge Graph subsystem consumes but does not implement: the
//! OCR service, the embedding model, the generative classifier, and the
//! chunker. Trait shape follows the teacher's `ai::client::AIClient`
//! abstraction-over-a-provider pattern; mocks follow `engines::entity`'s
//! `with_mock_mode`/`mock_resolve_entities`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrOutput {
    pub text: String,
    pub page_count: i64,
    /// Byte offset ranges per page: `(start, end, page_number)`.
    pub page_offsets: Vec<(usize, usize, u32)>,
    pub blocks_json: serde_json::Value,
    pub quality: Option<f64>,
    pub duration_ms: u64,
    pub cost: Option<f64>,
}

#[async_trait]
pub trait OcrService: Send + Sync {
    async fn process(&self, document_bytes: &[u8], file_name: &str) -> EngineResult<OcrOutput>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds a batch of texts into unit vectors of constant dimension.
    async fn embed(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;

    fn model_version(&self) -> &str;
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// Sends `prompt`, asking the model to conform to `response_schema`
    /// (a human-readable schema description, not machine-validated), and
    /// returns the parsed JSON response.
    async fn classify(&self, prompt: &str, response_schema: &str) -> EngineResult<serde_json::Value>;

    /// Describes an image for the vision-model collaborator.
    async fn describe(&self, image_bytes: &[u8], prompt: &str) -> EngineResult<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkResult {
    pub text: String,
    pub character_start: usize,
    pub character_end: usize,
    pub page_number: Option<u32>,
    pub heading_context: Option<String>,
    pub section_path: Option<String>,
    pub content_type: Option<String>,
    pub atomic: bool,
}

pub trait Chunker: Send + Sync {
    fn chunk(
        &self,
        text: &str,
        page_offsets: &[(usize, usize, u32)],
        blocks: Option<&serde_json::Value>,
    ) -> Vec<ChunkResult>;
}

/// Deterministic stand-in for `Embedder`, used in tests so the resolver and
/// ingestion pipeline are exercisable without a live network service.
pub struct MockEmbedder {
    pub dimension: usize,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self { dimension: 8 }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; self.dimension];
                for (i, b) in t.bytes().enumerate() {
                    v[i % self.dimension] += (b as f32) / 255.0;
                }
                let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
                v.iter().map(|x| x / norm).collect()
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock-embedder"
    }

    fn model_version(&self) -> &str {
        "1"
    }
}

/// Generator stand-in that always reports no confident classification,
/// matching spec.md §4.2's "absence of a key or generator failure falls
/// back to leaving the entity unmerged" behavior.
pub struct MockGenerator;

#[async_trait]
impl Generator for MockGenerator {
    async fn classify(&self, _prompt: &str, _response_schema: &str) -> EngineResult<serde_json::Value> {
        Ok(serde_json::json!({ "matches": [] }))
    }

    async fn describe(&self, _image_bytes: &[u8], _prompt: &str) -> EngineResult<String> {
        Ok(String::new())
    }
}
