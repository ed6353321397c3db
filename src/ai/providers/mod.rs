//! Provider abstraction behind `AIClient` — one implementation per backend.

mod anthropic;

pub use anthropic::AnthropicProvider;

use async_trait::async_trait;

use super::{AIResponse, Message};

/// Configuration handed to a provider at construction time.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 4096,
            temperature: 0.0,
        }
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    async fn complete(&self, messages: Vec<Message>, system: Option<&str>) -> Result<AIResponse, String>;

    /// Describes an image for the vision-model collaborator (spec.md §6.2).
    /// `media_type` is a MIME type such as `image/png`.
    async fn describe_image(&self, image_bytes: &[u8], media_type: &str, prompt: &str) -> Result<String, String>;

    fn name(&self) -> &'static str;

    fn is_configured(&self) -> bool;
}
