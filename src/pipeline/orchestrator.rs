//! Pipeline Orchestrator
//!
//! Sequences one analysis run: pre-flight checks, rate-aware batch sizing,
//! parallel batch dispatch through the [`AnalysisInvoker`], reconciliation
//! and merging every row back into input order.
//!
//! ## Usage
//!
//! ```ignore
//! let orchestrator = PipelineOrchestrator::from_config(config)?;
//! let ctx = RunContext::for_comments(&comments);
//! let run = orchestrator.run(&ctx, comments).await;
//! assert_eq!(run.results.len(), run.performance.rows_total);
//! ```
//!
//! Batch failures are contained to their rows (error placeholders); only a
//! configuration error aborts the run.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::progress::{MessageLevel, ProgressTracker};
use super::run::{PerformanceSummary, PipelineRun, RunStatus};
use crate::ai::{
    AnalysisInvoker, Batch, DynamicBatcher, SharedCollaborator, SharedRateBudget, SharedUsage,
    create_collaborator, create_shared_rate_budget, create_shared_usage, recommend_batch_size,
};
use crate::config::Config;
use crate::reconcile::Reconciler;
use crate::types::{
    AnalysisSource, CommentRecord, ErrorPlaceholder, LensError, Result, RowResult, RunId,
    validate_rows,
};

// =============================================================================
// Run Context
// =============================================================================

/// Batch accounting shared between dispatch futures
#[derive(Debug, Default)]
struct RunCounters {
    workers: AtomicUsize,
    batch_size: AtomicUsize,
    batches_total: AtomicUsize,
    batches_completed: AtomicUsize,
    batches_failed: AtomicUsize,
    batches_synthetic: AtomicUsize,
}

impl RunCounters {
    fn summary(&self) -> PerformanceSummary {
        PerformanceSummary {
            workers: self.workers.load(Ordering::SeqCst),
            batch_size: self.batch_size.load(Ordering::SeqCst),
            batches_total: self.batches_total.load(Ordering::SeqCst),
            batches_completed: self.batches_completed.load(Ordering::SeqCst),
            batches_failed: self.batches_failed.load(Ordering::SeqCst),
            batches_synthetic: self.batches_synthetic.load(Ordering::SeqCst),
            ..Default::default()
        }
    }
}

/// State of one run, shared between the orchestrator and whoever hosts it.
///
/// Results land in a lock-free map keyed by row id as batches finish, so a
/// host that aborts the run can still assemble everything completed so far.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: RunId,
    pub cancel: CancellationToken,
    pub progress: ProgressTracker,
    order: Arc<Vec<usize>>,
    results: Arc<DashMap<usize, RowResult>>,
    counters: Arc<RunCounters>,
    started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn for_comments(comments: &[CommentRecord]) -> Self {
        let run_id = RunId::new();
        Self {
            run_id,
            cancel: CancellationToken::new(),
            progress: ProgressTracker::new(run_id),
            order: Arc::new(comments.iter().map(|c| c.row_id).collect()),
            results: Arc::new(DashMap::new()),
            counters: Arc::new(RunCounters::default()),
            started_at: Utc::now(),
        }
    }

    /// Rows with a terminal result so far
    pub fn completed_rows(&self) -> usize {
        self.results.len()
    }

    fn store(&self, row: RowResult) {
        self.results.insert(row.row_id(), row);
    }

    /// Results in input order; rows not yet reached are absent
    fn ordered_results(&self) -> Vec<RowResult> {
        self.order
            .iter()
            .filter_map(|id| self.results.get(id).map(|entry| entry.value().clone()))
            .collect()
    }
}

enum BatchOutcome {
    Completed,
    Failed,
    Skipped,
    Fatal(LensError),
}

// =============================================================================
// Orchestrator
// =============================================================================

pub struct PipelineOrchestrator {
    config: Config,
    invoker: AnalysisInvoker,
    reconciler: Reconciler,
    batcher: DynamicBatcher,
    rate: SharedRateBudget,
    usage: SharedUsage,
}

impl PipelineOrchestrator {
    /// Build with rate and usage state derived from `config`
    pub fn new(config: Config, collaborator: Option<SharedCollaborator>) -> Result<Self> {
        config.validate()?;
        let rate = create_shared_rate_budget(&config.rate)?;
        let limits = config.rate.limits()?;
        let usage = create_shared_usage(limits, config.rate.window(), &config.alerts);
        Ok(Self::with_shared(config, collaborator, rate, usage))
    }

    /// Build around existing rate and usage state (shared across runs)
    pub fn with_shared(
        config: Config,
        collaborator: Option<SharedCollaborator>,
        rate: SharedRateBudget,
        usage: SharedUsage,
    ) -> Self {
        let invoker =
            AnalysisInvoker::new(&config, collaborator, Arc::clone(&rate), Arc::clone(&usage));
        Self {
            reconciler: Reconciler::new(&config),
            batcher: DynamicBatcher::from_config(&config.batching),
            invoker,
            rate,
            usage,
            config,
        }
    }

    /// Build with the collaborator named in `config.llm`
    pub fn from_config(config: Config) -> Result<Self> {
        let collaborator = create_collaborator(&config.llm)?;
        Self::new(config, collaborator)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn usage(&self) -> &SharedUsage {
        &self.usage
    }

    pub fn rate(&self) -> &SharedRateBudget {
        &self.rate
    }

    fn preflight(&self, comments: &[CommentRecord]) -> Result<()> {
        validate_rows(comments)?;
        self.invoker.ensure_usable()
    }

    /// Smallest of the configured ceiling, what fits the token cap under the
    /// current rate window, and what recent call outcomes suggest.
    pub fn target_batch_size(&self, comments: &[CommentRecord]) -> usize {
        let batching = &self.config.batching;
        let avg_tokens = self.batcher.average_tokens(comments);
        let by_rate = self.rate.recommended_batch_size(
            avg_tokens,
            batching.prompt_overhead_tokens,
            batching.max_tokens_per_call,
            batching.max_batch_size,
        );
        let by_history = recommend_batch_size(&self.usage.history(), batching.max_batch_size);

        let size = batching.max_batch_size.min(by_rate).min(by_history).max(1);
        debug!(avg_tokens, by_rate, by_history, size, "Batch size selected");
        size
    }

    #[instrument(skip_all, fields(run_id = %ctx.run_id, rows = comments.len()))]
    pub async fn run(&self, ctx: &RunContext, comments: Vec<CommentRecord>) -> PipelineRun {
        if let Err(err) = self.preflight(&comments) {
            error!(error = %err, "Pre-flight check failed");
            ctx.progress.finish(RunStatus::Failed, &err.to_string());
            return self.assemble(ctx, RunStatus::Failed, Some(err.to_string()));
        }

        let batch_size = self.target_batch_size(&comments);
        let batches = self
            .batcher
            .split(&comments, batch_size, self.config.batching.max_tokens_per_call);
        let workers = self.config.pipeline.effective_workers().min(batches.len()).max(1);

        ctx.counters.workers.store(workers, Ordering::SeqCst);
        ctx.counters.batch_size.store(batch_size, Ordering::SeqCst);
        ctx.counters.batches_total.store(batches.len(), Ordering::SeqCst);
        ctx.progress.start(comments.len(), batches.len(), batch_size, workers);
        info!(batches = batches.len(), batch_size, workers, "Dispatching batches");

        // Fatal errors stop dispatch without marking the run as user-cancelled
        let stop = ctx.cancel.child_token();
        let mut fatal: Option<LensError> = None;
        let mut skipped = 0usize;

        let mut outcomes = stream::iter(0..batches.len())
            .map(|index| self.dispatch(ctx, &stop, &batches[index]))
            .buffer_unordered(workers);

        while let Some(outcome) = outcomes.next().await {
            match outcome {
                BatchOutcome::Completed | BatchOutcome::Failed => {}
                BatchOutcome::Skipped => skipped += 1,
                BatchOutcome::Fatal(err) => {
                    error!(error = %err, "Fatal error, stopping dispatch");
                    stop.cancel();
                    fatal.get_or_insert(err);
                }
            }
        }
        drop(outcomes);

        let (status, error) = match fatal {
            Some(err) => (RunStatus::Failed, Some(err.to_string())),
            None if ctx.cancel.is_cancelled() && skipped > 0 => {
                (RunStatus::Cancelled, Some(LensError::Cancelled.to_string()))
            }
            None => (RunStatus::Succeeded, None),
        };

        let run = self.assemble(ctx, status, error);
        let summary = format!(
            "{} analyzed, {} errored, {} batches in {} ms",
            run.performance.rows_analyzed,
            run.performance.rows_errored,
            run.performance.batches_completed,
            run.performance.elapsed_ms
        );
        ctx.progress.finish(status, &summary);
        info!(status = %status, %summary, "Run finished");
        run
    }

    #[instrument(skip_all, fields(batch = batch.index, size = batch.len()))]
    async fn dispatch(
        &self,
        ctx: &RunContext,
        stop: &CancellationToken,
        batch: &Batch,
    ) -> BatchOutcome {
        if stop.is_cancelled() {
            debug!("Run stopping, batch not dispatched");
            return BatchOutcome::Skipped;
        }

        let outcome = match self.invoker.analyze(batch).await {
            Ok(analysis) => {
                for (record, parsed) in batch.records.iter().zip(analysis.responses) {
                    ctx.store(self.reconciler.reconcile(parsed, record, analysis.source));
                }

                ctx.counters.batches_completed.fetch_add(1, Ordering::SeqCst);
                if analysis.source == AnalysisSource::Synthetic {
                    ctx.counters.batches_synthetic.fetch_add(1, Ordering::SeqCst);
                }
                ctx.progress
                    .batch_completed(batch.index, batch.len(), analysis.source, analysis.attempts);
                BatchOutcome::Completed
            }
            Err(err) if err.is_fatal() => {
                ctx.progress.message(MessageLevel::Error, &err.to_string());
                BatchOutcome::Fatal(err)
            }
            Err(err) => {
                let note = err.to_string();
                warn!(error = %note, "Batch failed, writing error placeholders");
                for record in &batch.records {
                    ctx.store(RowResult::Error(ErrorPlaceholder::new(
                        record.row_id,
                        record.text.clone(),
                        note.clone(),
                    )));
                }

                ctx.counters.batches_completed.fetch_add(1, Ordering::SeqCst);
                ctx.counters.batches_failed.fetch_add(1, Ordering::SeqCst);
                ctx.progress.batch_failed(batch.index, batch.len(), &note, true);
                BatchOutcome::Failed
            }
        };

        ctx.progress.forward_alerts(&self.usage.alerts());
        outcome
    }

    /// Terminal run from whatever the context holds now.
    ///
    /// Also used by the host to salvage partial results after an abort.
    pub fn assemble(
        &self,
        ctx: &RunContext,
        status: RunStatus,
        error: Option<String>,
    ) -> PipelineRun {
        let results = ctx.ordered_results();

        let mut performance = ctx.counters.summary();
        performance.rows_total = ctx.order.len();
        performance.rows_errored = results
            .iter()
            .filter(|r| matches!(r, RowResult::Error(_)))
            .count();
        performance.rows_analyzed = results.len() - performance.rows_errored;
        performance.finalize(ctx.progress.elapsed(), self.config.pipeline.sla_target());

        let progress_fraction = if status == RunStatus::Succeeded {
            1.0
        } else {
            ctx.progress.snapshot().progress_fraction
        };

        PipelineRun {
            run_id: ctx.run_id,
            status,
            progress_fraction,
            results,
            usage: self.usage.snapshot(),
            performance,
            error,
            started_at: Some(ctx.started_at),
            finished_at: Some(Utc::now()),
        }
    }
}

pub type SharedOrchestrator = Arc<PipelineOrchestrator>;

// =============================================================================
// Tests
// =============================================================================
