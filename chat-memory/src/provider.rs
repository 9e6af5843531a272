//! Provider trait for the language model behind the summarizer.
//!
//! The model client itself lives outside this crate; anything that can turn
//! a prompt into text implements [`Provider`].

use async_trait::async_trait;
use chat_common::SummarizerConfig;

/// Sampling parameters passed with each prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self::from(&SummarizerConfig::default())
    }
}

impl From<&SummarizerConfig> for GenerationParams {
    fn from(config: &SummarizerConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

/// Language model backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name (e.g., "groq", "openai").
    fn name(&self) -> &str;

    /// Generate a completion for a single prompt.
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> anyhow::Result<String>;
}
