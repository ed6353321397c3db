//! Adapts `AIClient` to the core's `Generator` collaborator contract
//! (spec.md §6.2): `classify(prompt, schema) -> json`, `describe(image, prompt) -> text`.

use async_trait::async_trait;

use crate::ai::AIClient;
use crate::collaborators::Generator;
use crate::error::{EngineError, EngineResult};

pub struct AnthropicGenerator {
    client: AIClient,
}

impl AnthropicGenerator {
    pub fn new(client: AIClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Generator for AnthropicGenerator {
    async fn classify(&self, prompt: &str, response_schema: &str) -> EngineResult<serde_json::Value> {
        let system = format!(
            "You are a precise classification assistant. Conform exactly to this response schema: {response_schema}"
        );
        self.client
            .prompt_json_with_system::<serde_json::Value>(&system, prompt)
            .await
            .map_err(EngineError::Internal)
    }

    async fn describe(&self, image_bytes: &[u8], prompt: &str) -> EngineResult<String> {
        self.client
            .describe_image(image_bytes, "image/png", prompt)
            .await
            .map_err(EngineError::Internal)
    }
}
