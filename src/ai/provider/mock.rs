//! Scripted collaborator for tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use super::{CollaboratorResponse, LlmCollaborator, SyntheticGenerator, TokenUsage};
use crate::types::{ErrorCategory, LlmError};

type Script =
    Box<dyn Fn(u32, &[String]) -> Result<CollaboratorResponse, LlmError> + Send + Sync>;

/// Collaborator whose replies come from a closure of (call number, texts).
pub(crate) struct MockCollaborator {
    calls: AtomicU32,
    delay: Duration,
    script: Script,
}

impl MockCollaborator {
    pub fn new(
        script: impl Fn(u32, &[String]) -> Result<CollaboratorResponse, LlmError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            calls: AtomicU32::new(0),
            delay: Duration::ZERO,
            script: Box::new(script),
        }
    }

    /// Answers every call with synthetic records and 100 tokens per comment
    pub fn healthy() -> Self {
        Self::new(|_, texts| Ok(Self::reply(texts)))
    }

    /// Fails every call with `category`
    pub fn failing(category: ErrorCategory) -> Self {
        Self::new(move |_, _| Err(LlmError::with_provider(category, "scripted failure", "mock")))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reply(texts: &[String]) -> CollaboratorResponse {
        CollaboratorResponse {
            responses: SyntheticGenerator::new(7).generate_batch(texts),
            usage: TokenUsage {
                input_tokens: 80 * texts.len() as u64,
                output_tokens: 20 * texts.len() as u64,
            },
        }
    }
}

#[async_trait]
impl LlmCollaborator for MockCollaborator {
    async fn analyze(
        &self,
        texts: &[String],
        _language: &str,
    ) -> Result<CollaboratorResponse, LlmError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let result = (self.script)(call, texts);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        result
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }
}
