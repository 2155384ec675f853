//! LLM Collaborator Abstraction
//!
//! Defines the [`LlmCollaborator`] trait: one call analyzes a batch of
//! comment texts and returns one parsed response per text plus token usage.
//!
//! ## Modules
//!
//! - `openai`: Chat Completions collaborator over reqwest
//! - `synthetic`: deterministic local generator used as fallback
//! - `prompt`: analysis prompts in Spanish, English and Guaraní
//! - `parse`: tolerant extraction of per-comment records from a response body

#[cfg(test)]
pub(crate) mod mock;
mod openai;
mod parse;
mod prompt;
mod synthetic;

pub use openai::OpenAiCollaborator;
pub use parse::{JsonRepairer, parse_batch_response};
pub use prompt::{AnalysisPrompt, build_analysis_prompt};
pub use synthetic::SyntheticGenerator;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::config::{LlmConfig, ProviderKind};
use crate::types::{LlmError, ParsedResponse, Result};

// =============================================================================
// Response with Usage Metrics
// =============================================================================

/// Token usage reported by the provider for one call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn from_openai(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            input_tokens: prompt_tokens,
            output_tokens: completion_tokens,
        }
    }
}

/// USD per thousand tokens
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl Pricing {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            input_per_1k: config.cost_per_1k_input,
            output_per_1k: config.cost_per_1k_output,
        }
    }

    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        usage.input_tokens as f64 / 1000.0 * self.input_per_1k
            + usage.output_tokens as f64 / 1000.0 * self.output_per_1k
    }
}

/// Result of one collaborator call
#[derive(Debug, Clone)]
pub struct CollaboratorResponse {
    /// One entry per response item, in the order returned (count not yet checked)
    pub responses: Vec<ParsedResponse>,
    pub usage: TokenUsage,
}

// =============================================================================
// LLM Collaborator Trait
// =============================================================================

#[async_trait]
pub trait LlmCollaborator: Send + Sync {
    /// Analyze `texts` in one call, prompting in `language`.
    ///
    /// Failures carry an [`ErrorCategory`](crate::types::ErrorCategory) so the
    /// invoker can tell throttling, transient and authentication errors apart.
    async fn analyze(
        &self,
        texts: &[String],
        language: &str,
    ) -> std::result::Result<CollaboratorResponse, LlmError>;

    /// Provider name for logging
    fn name(&self) -> &str;

    /// Model name currently in use
    fn model(&self) -> &str;
}

/// Shared collaborator for concurrent batch workers.
pub type SharedCollaborator = Arc<dyn LlmCollaborator>;

/// Build the configured collaborator.
///
/// `synthetic`, or `openai` without an API key, yields no remote collaborator;
/// the invoker then serves every batch from the synthetic generator, or fails
/// pre-flight when fallback is disabled.
pub fn create_collaborator(config: &LlmConfig) -> Result<Option<SharedCollaborator>> {
    match config.provider {
        ProviderKind::Synthetic => Ok(None),
        ProviderKind::OpenAi => {
            openai_collaborator(config, OpenAiCollaborator::resolve_api_key(config))
        }
    }
}

fn openai_collaborator(
    config: &LlmConfig,
    api_key: Option<String>,
) -> Result<Option<SharedCollaborator>> {
    let Some(api_key) = api_key else {
        warn!("No OpenAI API key in llm.api_key or OPENAI_API_KEY, no remote collaborator");
        return Ok(None);
    };
    let collaborator = OpenAiCollaborator::with_api_key(config, api_key)?;
    Ok(Some(Arc::new(collaborator)))
}
