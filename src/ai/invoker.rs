//! Analysis Invoker
//!
//! Sends one batch to the LLM collaborator under the rate budget, retries
//! throttled and transient failures through [`RetryPolicy`], and falls back
//! to the [`SyntheticGenerator`] when the collaborator is absent or gives up.
//!
//! ## Usage
//!
//! ```ignore
//! let invoker = AnalysisInvoker::new(&config, collaborator, rate, usage);
//! invoker.ensure_usable()?;
//! let analysis = invoker.analyze(&batch).await?;
//! assert_eq!(analysis.responses.len(), batch.len());
//! ```

use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

use super::batcher::{Batch, DynamicBatcher};
use super::provider::{
    CollaboratorResponse, Pricing, SharedCollaborator, SyntheticGenerator, TokenUsage,
};
use super::rate_budget::{RateDecision, SharedRateBudget};
use super::retry::{Outcome, RetryFailure, RetryPolicy, RetryReason};
use super::timeout::with_timeout_map;
use super::usage::{CallOutcome, SharedUsage, UsageSnapshot};
use crate::config::Config;
use crate::types::{
    AnalysisSource, ErrorCategory, LensError, LlmError, ParsedResponse, Result, truncate_chars,
};

/// Parsed responses for one batch, aligned one-to-one with its records
#[derive(Debug, Clone)]
pub struct BatchAnalysis {
    pub batch_index: usize,
    pub responses: Vec<ParsedResponse>,
    pub source: AnalysisSource,
    /// Collaborator attempts made (0 when served synthetically from the start)
    pub attempts: u32,
    pub usage: TokenUsage,
    pub latency: Duration,
}

pub struct AnalysisInvoker {
    collaborator: Option<SharedCollaborator>,
    synthetic: SyntheticGenerator,
    rate: SharedRateBudget,
    usage: SharedUsage,
    policy: RetryPolicy,
    pricing: Pricing,
    batcher: DynamicBatcher,
    max_tokens_per_call: u64,
    call_timeout: Duration,
    fallback_enabled: bool,
    language: String,
    max_comment_chars: usize,
}

impl AnalysisInvoker {
    pub fn new(
        config: &Config,
        collaborator: Option<SharedCollaborator>,
        rate: SharedRateBudget,
        usage: SharedUsage,
    ) -> Self {
        Self {
            collaborator,
            synthetic: SyntheticGenerator::new(config.retry.seed),
            rate,
            usage,
            policy: RetryPolicy::from_config(&config.retry),
            pricing: Pricing::from_config(&config.llm),
            batcher: DynamicBatcher::from_config(&config.batching),
            max_tokens_per_call: config.batching.max_tokens_per_call,
            call_timeout: Duration::from_secs(config.llm.timeout_secs),
            fallback_enabled: config.retry.synthetic_fallback,
            language: config.pipeline.language.clone(),
            max_comment_chars: config.pipeline.max_comment_chars,
        }
    }

    pub fn has_collaborator(&self) -> bool {
        self.collaborator.is_some()
    }

    pub fn fallback_enabled(&self) -> bool {
        self.fallback_enabled
    }

    /// Pre-flight: some generator must be able to serve batches.
    pub fn ensure_usable(&self) -> Result<()> {
        if self.collaborator.is_none() && !self.fallback_enabled {
            return Err(LensError::config(
                "no LLM collaborator configured and synthetic fallback is disabled",
            ));
        }
        Ok(())
    }

    /// Texts as sent: capped at the comment length limit, and cut to the
    /// per-call budget for batches flagged for truncation.
    fn prepare_texts(&self, batch: &Batch) -> Vec<String> {
        batch
            .records
            .iter()
            .map(|record| {
                let text = truncate_chars(&record.text, self.max_comment_chars);
                let text = if batch.truncate {
                    self.batcher.fit_text(text, self.max_tokens_per_call)
                } else {
                    text
                };
                text.to_string()
            })
            .collect()
    }

    #[instrument(skip_all, fields(batch = batch.index, size = batch.len()))]
    pub async fn analyze(&self, batch: &Batch) -> Result<BatchAnalysis> {
        let texts = self.prepare_texts(batch);

        let Some(collaborator) = &self.collaborator else {
            if self.fallback_enabled {
                debug!("No collaborator configured, serving batch synthetically");
                return Ok(self.synthesize(batch, &texts, 0));
            }
            return Err(LensError::config(
                "no LLM collaborator configured and synthetic fallback is disabled",
            ));
        };

        let texts_ref = &texts;
        let result = self
            .policy
            .run(move |attempt| async move {
                self.attempt(collaborator, batch, texts_ref, attempt).await
            })
            .await;

        match result {
            Ok(retried) => {
                let (response, latency) = retried.value;
                let responses = align_responses(response.responses, batch.len(), batch.index);
                info!(
                    attempts = retried.attempts,
                    tokens = response.usage.total(),
                    latency_ms = latency.as_millis() as u64,
                    "Batch analyzed"
                );
                Ok(BatchAnalysis {
                    batch_index: batch.index,
                    responses,
                    source: AnalysisSource::Collaborator,
                    attempts: retried.attempts,
                    usage: response.usage,
                    latency,
                })
            }
            Err(failure) => self.handle_failure(batch, &texts, failure),
        }
    }

    async fn attempt(
        &self,
        collaborator: &SharedCollaborator,
        batch: &Batch,
        texts: &[String],
        attempt: u32,
    ) -> Outcome<(CollaboratorResponse, Duration)> {
        let reservation = match self.rate.reserve(1, batch.estimated_tokens) {
            RateDecision::Allowed(reservation) => reservation,
            RateDecision::Deny { wait } => {
                return Outcome::Retryable(RetryReason::Deny { wait });
            }
        };

        debug!(attempt, "Calling collaborator");
        let started = Instant::now();
        let call = with_timeout_map(
            self.call_timeout,
            collaborator.analyze(texts, &self.language),
            "collaborator call",
        )
        .await;
        let latency = started.elapsed();

        let result = match call {
            Ok(inner) => inner,
            Err(timeout) => Err(LlmError::with_provider(
                ErrorCategory::Network,
                timeout.to_string(),
                collaborator.name(),
            )),
        };

        let outcome = match result {
            Ok(response) => {
                let actual = match response.usage.total() {
                    0 => reservation.estimated_tokens().get(),
                    total => total,
                };
                self.rate.commit(reservation, actual);
                self.usage.record(
                    UsageSnapshot::new(batch.index, batch.len(), CallOutcome::Success)
                        .with_tokens(response.usage.input_tokens, response.usage.output_tokens)
                        .with_latency(latency)
                        .with_cost(self.pricing.cost(&response.usage)),
                );
                Outcome::Success((response, latency))
            }
            Err(err) => {
                let call_outcome = if err.category.is_throttle() {
                    CallOutcome::Throttled
                } else {
                    CallOutcome::Failed
                };
                self.usage.record(
                    UsageSnapshot::new(batch.index, batch.len(), call_outcome)
                        .with_latency(latency),
                );
                warn!(attempt, error = %err, "Collaborator call failed");
                classify_failure(err)
            }
        };

        self.usage.check_alerts();
        outcome
    }

    fn handle_failure(
        &self,
        batch: &Batch,
        texts: &[String],
        failure: RetryFailure,
    ) -> Result<BatchAnalysis> {
        let attempts = failure.attempts();
        let (reason, is_auth) = match &failure {
            RetryFailure::Exhausted { last, .. } => (last.to_string(), false),
            RetryFailure::Fatal { error, .. } => (
                error.to_string(),
                matches!(error, LensError::Llm(e) if e.category.is_configuration()),
            ),
        };

        if self.fallback_enabled {
            warn!(
                attempts,
                reason = %reason,
                "Collaborator unavailable for batch, using synthetic fallback"
            );
            return Ok(self.synthesize(batch, texts, attempts));
        }

        if is_auth {
            error!(reason = %reason, "Collaborator rejected credentials");
            return Err(LensError::Config(format!(
                "collaborator authentication failed: {}",
                reason
            )));
        }

        error!(attempts, reason = %reason, "Batch failed");
        Err(LensError::BatchFailed {
            batch_index: batch.index,
            attempts,
            reason,
        })
    }

    fn synthesize(&self, batch: &Batch, texts: &[String], attempts: u32) -> BatchAnalysis {
        let started = Instant::now();
        let responses = self.synthetic.generate_batch(texts);
        let latency = started.elapsed();
        self.usage.record(
            UsageSnapshot::new(batch.index, batch.len(), CallOutcome::Synthetic)
                .with_latency(latency),
        );
        BatchAnalysis {
            batch_index: batch.index,
            responses,
            source: AnalysisSource::Synthetic,
            attempts,
            usage: TokenUsage::default(),
            latency,
        }
    }
}

/// Route a collaborator error to the retry driver
fn classify_failure(err: LlmError) -> Outcome<(CollaboratorResponse, Duration)> {
    match err.category {
        ErrorCategory::RateLimit => Outcome::Retryable(RetryReason::Throttled {
            retry_after: err.retry_after,
        }),
        category if category.is_retryable() => {
            Outcome::Retryable(RetryReason::Transient(err.to_string()))
        }
        _ => Outcome::Fatal(LensError::Llm(err)),
    }
}

/// Drop surplus responses and pad missing ones with `Malformed`
fn align_responses(
    mut responses: Vec<ParsedResponse>,
    expected: usize,
    batch_index: usize,
) -> Vec<ParsedResponse> {
    if responses.len() != expected {
        warn!(
            batch = batch_index,
            expected,
            returned = responses.len(),
            "Response count mismatch, repairing"
        );
    }
    responses.truncate(expected);
    while responses.len() < expected {
        responses.push(ParsedResponse::malformed("missing from collaborator response"));
    }
    responses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::provider::mock::MockCollaborator;
    use crate::ai::rate_budget::RateBudgetTracker;
    use crate::ai::usage::UsageRecorder;
    use crate::config::TierLimits;
    use crate::types::CommentRecord;
    use std::sync::Arc;

    struct Fixture {
        invoker: AnalysisInvoker,
        rate: SharedRateBudget,
        usage: SharedUsage,
        mock: Option<Arc<MockCollaborator>>,
    }

    fn fixture(mock: Option<MockCollaborator>, fallback: bool) -> Fixture {
        let limits = TierLimits {
            requests_per_minute: 1_000,
            tokens_per_minute: 10_000_000,
        };
        fixture_with_limits(mock, fallback, limits)
    }

    fn fixture_with_limits(
        mock: Option<MockCollaborator>,
        fallback: bool,
        limits: TierLimits,
    ) -> Fixture {
        let mut config = Config::default();
        config.retry.synthetic_fallback = fallback;
        config.retry.base_delay_ms = 1;
        config.retry.max_delay_ms = 5;

        let rate = Arc::new(RateBudgetTracker::new(
            limits,
            Duration::from_secs(60),
            Duration::from_millis(5),
        ));
        let usage = Arc::new(UsageRecorder::new(
            limits,
            Duration::from_secs(60),
            &config.alerts,
        ));
        let mock = mock.map(Arc::new);
        let collaborator = mock.clone().map(|m| m as SharedCollaborator);

        let invoker =
            AnalysisInvoker::new(&config, collaborator, Arc::clone(&rate), Arc::clone(&usage));
        Fixture {
            invoker,
            rate,
            usage,
            mock,
        }
    }

    fn batch(texts: &[&str]) -> Batch {
        Batch {
            index: 0,
            records: texts
                .iter()
                .enumerate()
                .map(|(i, t)| CommentRecord::new(i, *t))
                .collect(),
            estimated_tokens: 1_000,
            truncate: false,
        }
    }

    #[tokio::test]
    async fn test_collaborator_success() {
        let f = fixture(Some(MockCollaborator::healthy()), true);
        let analysis = f.invoker.analyze(&batch(&["bueno", "malo"])).await.unwrap();

        assert_eq!(analysis.source, AnalysisSource::Collaborator);
        assert_eq!(analysis.attempts, 1);
        assert_eq!(analysis.responses.len(), 2);
        assert_eq!(analysis.usage.total(), 200);
        assert_eq!(f.usage.snapshot().successes, 1);
    }

    #[tokio::test]
    async fn test_retries_throttling_then_succeeds() {
        let mock = MockCollaborator::new(|call, texts| {
            if call < 3 {
                Err(LlmError::new(ErrorCategory::RateLimit, "429"))
            } else {
                Ok(MockCollaborator::reply(texts))
            }
        });
        let f = fixture(Some(mock), false);
        let analysis = f.invoker.analyze(&batch(&["hola"])).await.unwrap();

        assert_eq!(analysis.attempts, 3);
        assert_eq!(f.mock.as_ref().unwrap().calls(), 3);
        let totals = f.usage.snapshot();
        assert_eq!(totals.throttled, 2);
        assert_eq!(totals.successes, 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fall_back_to_synthetic() {
        let f = fixture(Some(MockCollaborator::failing(ErrorCategory::Transient)), true);
        let analysis = f.invoker.analyze(&batch(&["hola", "chau"])).await.unwrap();

        assert_eq!(analysis.source, AnalysisSource::Synthetic);
        assert_eq!(analysis.attempts, 3);
        assert!(analysis.responses.iter().all(ParsedResponse::is_valid));
        assert_eq!(f.usage.snapshot().synthetic, 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_without_fallback_fail_the_batch() {
        let f = fixture(Some(MockCollaborator::failing(ErrorCategory::Network)), false);
        let err = f.invoker.analyze(&batch(&["hola"])).await.unwrap_err();
        assert!(matches!(err, LensError::BatchFailed { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_auth_failure_without_fallback_is_fatal() {
        let f = fixture(Some(MockCollaborator::failing(ErrorCategory::Auth)), false);
        let err = f.invoker.analyze(&batch(&["hola"])).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(f.mock.as_ref().unwrap().calls(), 1);
    }

    #[tokio::test]
    async fn test_rate_denials_surface_after_attempt_ceiling() {
        let limits = TierLimits {
            requests_per_minute: 1,
            tokens_per_minute: 10_000_000,
        };
        let f = fixture_with_limits(Some(MockCollaborator::healthy()), false, limits);
        f.invoker.analyze(&batch(&["primero"])).await.unwrap();

        let started = Instant::now();
        let err = f.invoker.analyze(&batch(&["segundo"])).await.unwrap_err();
        assert!(matches!(err, LensError::BatchFailed { attempts: 3, .. }));
        assert_eq!(f.rate.denials(), 3);
        assert_eq!(f.mock.as_ref().unwrap().calls(), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_rate_denials_fall_back_to_synthetic() {
        let limits = TierLimits {
            requests_per_minute: 1,
            tokens_per_minute: 10_000_000,
        };
        let f = fixture_with_limits(Some(MockCollaborator::healthy()), true, limits);
        f.invoker.analyze(&batch(&["primero"])).await.unwrap();

        let analysis = f.invoker.analyze(&batch(&["segundo"])).await.unwrap();
        assert_eq!(analysis.source, AnalysisSource::Synthetic);
        assert_eq!(analysis.attempts, 3);
    }

    #[tokio::test]
    async fn test_no_collaborator() {
        let f = fixture(None, true);
        let analysis = f.invoker.analyze(&batch(&["hola"])).await.unwrap();
        assert_eq!(analysis.source, AnalysisSource::Synthetic);
        assert_eq!(analysis.attempts, 0);

        let f = fixture(None, false);
        assert!(f.invoker.ensure_usable().is_err());
        assert!(f.invoker.analyze(&batch(&["hola"])).await.unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn test_count_mismatch_repaired() {
        let mock = MockCollaborator::new(|_, texts| {
            let mut reply = MockCollaborator::reply(&texts[..1]);
            reply.usage = TokenUsage::default();
            Ok(reply)
        });
        let f = fixture(Some(mock), false);
        let analysis = f.invoker.analyze(&batch(&["uno", "dos", "tres"])).await.unwrap();

        assert_eq!(analysis.responses.len(), 3);
        assert!(analysis.responses[0].is_valid());
        assert!(!analysis.responses[1].is_valid());
        assert!(!analysis.responses[2].is_valid());
    }

    #[test]
    fn test_align_drops_surplus() {
        let responses = vec![ParsedResponse::malformed("a"); 4];
        assert_eq!(align_responses(responses, 2, 0).len(), 2);
    }

    #[tokio::test]
    async fn test_flagged_batch_is_truncated_before_sending() {
        let mock = MockCollaborator::new(|_, texts| {
            assert!(texts[0].chars().count() <= (12_000 - 800) * 4);
            Ok(MockCollaborator::reply(texts))
        });
        let f = fixture(Some(mock), false);
        let mut oversized = batch(&[]);
        oversized.records.push(CommentRecord::new(0, "x".repeat(60_000)));
        oversized.truncate = true;

        let analysis = f.invoker.analyze(&oversized).await.unwrap();
        assert_eq!(analysis.responses.len(), 1);
    }
}
