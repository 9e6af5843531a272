//! Summarizer seam and the LLM-backed implementation.

use async_trait::async_trait;
use std::fmt::Write;
use std::sync::Arc;

use crate::provider::{GenerationParams, Provider};
use crate::types::Turn;

const SUMMARY_PROMPT: &str = "Progressively summarize the lines of conversation provided, \
adding onto the previous summary and returning a new summary. Keep the user's goals, \
stated facts and any figures they gave; drop greetings and filler.\n\n\
Current summary:\n{summary}\n\n\
New lines of conversation:\n{new_lines}\n\n\
New summary:";

/// Folds turns into a running summary.
///
/// Implementations may fail; they must not have side effects the memory
/// layer depends on.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Produce a new summary from the prior one (possibly empty) and the
    /// turns that fall out of the recent window, oldest first.
    async fn summarize(&self, prior: &str, turns: &[Turn]) -> anyhow::Result<String>;
}

/// Summarizer that prompts a language model.
pub struct LlmSummarizer {
    provider: Arc<dyn Provider>,
    params: GenerationParams,
}

impl LlmSummarizer {
    pub fn new(provider: Arc<dyn Provider>, params: GenerationParams) -> Self {
        Self { provider, params }
    }

    /// Render the turns as `Human:`/`AI:` lines.
    fn format_lines(turns: &[Turn]) -> String {
        let mut lines = String::new();
        for turn in turns {
            let _ = writeln!(lines, "Human: {}", turn.input);
            let _ = writeln!(lines, "AI: {}", turn.output);
        }
        lines.trim_end().to_string()
    }

    fn build_prompt(prior: &str, turns: &[Turn]) -> String {
        SUMMARY_PROMPT
            .replace("{summary}", prior)
            .replace("{new_lines}", &Self::format_lines(turns))
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, prior: &str, turns: &[Turn]) -> anyhow::Result<String> {
        let prompt = Self::build_prompt(prior, turns);

        tracing::debug!(
            provider = self.provider.name(),
            model = %self.params.model,
            turns = turns.len(),
            "Requesting summary"
        );

        let text = self.provider.generate(&prompt, &self.params).await?;
        Ok(text.trim().to_string())
    }
}
