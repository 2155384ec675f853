//! Background Execution Host
//!
//! Runs the orchestrator on a spawned task and hands back a [`RunHandle`]
//! immediately. The run is wrapped in a hard timeout: on expiry it becomes
//! `Cancelled`, gets a grace period to wind down, then is aborted. Results
//! merged by then are kept.
//!
//! ## Usage
//!
//! ```ignore
//! let timeouts = TimeoutConfig::from_config(&config);
//! let host = BackgroundExecutionHost::new(Arc::new(orchestrator), timeouts);
//! let handle = host.start(comments);
//! let mut snapshots = handle.subscribe();
//! while snapshots.changed().await.is_ok() {
//!     if snapshots.borrow().status.is_terminal() { break; }
//! }
//! let run = handle.wait().await?;
//! ```

use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::orchestrator::{PipelineOrchestrator, RunContext, SharedOrchestrator};
use super::progress::ProgressEvent;
use super::run::{PipelineRun, RunSnapshot, RunStatus};
use crate::ai::TimeoutConfig;
use crate::types::{CommentRecord, LensError, Result, RunId};

pub struct BackgroundExecutionHost {
    orchestrator: SharedOrchestrator,
    timeouts: TimeoutConfig,
}

impl BackgroundExecutionHost {
    pub fn new(orchestrator: SharedOrchestrator, timeouts: TimeoutConfig) -> Self {
        Self {
            orchestrator,
            timeouts,
        }
    }

    /// Host with timeouts taken from the orchestrator's configuration
    pub fn from_orchestrator(orchestrator: PipelineOrchestrator) -> Self {
        let timeouts = TimeoutConfig::from_config(orchestrator.config());
        Self::new(Arc::new(orchestrator), timeouts)
    }

    pub fn orchestrator(&self) -> &SharedOrchestrator {
        &self.orchestrator
    }

    /// Start a run in the background. Must be called within a Tokio runtime.
    pub fn start(&self, comments: Vec<CommentRecord>) -> RunHandle {
        let ctx = RunContext::for_comments(&comments);
        info!(run_id = %ctx.run_id, rows = comments.len(), "Starting background run");

        let join = tokio::spawn(supervise(
            Arc::clone(&self.orchestrator),
            ctx.clone(),
            comments,
            self.timeouts.clone(),
        ));

        RunHandle { ctx, join }
    }
}

/// Drive one run under the hard timeout
async fn supervise(
    orchestrator: SharedOrchestrator,
    ctx: RunContext,
    comments: Vec<CommentRecord>,
    timeouts: TimeoutConfig,
) -> PipelineRun {
    let mut worker = {
        let orchestrator = Arc::clone(&orchestrator);
        let ctx = ctx.clone();
        tokio::spawn(async move { orchestrator.run(&ctx, comments).await })
    };

    match tokio::time::timeout(timeouts.run, &mut worker).await {
        Ok(joined) => return joined_run(&orchestrator, &ctx, joined),
        Err(_) => {
            warn!(
                run_id = %ctx.run_id,
                timeout_ms = timeouts.run.as_millis() as u64,
                "Run timed out, cancelling"
            );
        }
    }

    // Terminal before the worker can publish its own outcome
    let timeout_error = LensError::timeout("pipeline run", timeouts.run).to_string();
    ctx.progress.finish(RunStatus::Cancelled, &timeout_error);
    ctx.cancel.cancel();

    match tokio::time::timeout(timeouts.cancel_grace, &mut worker).await {
        Ok(Err(err)) => {
            error!(run_id = %ctx.run_id, error = %err, "Run task failed after timeout");
        }
        Ok(Ok(run)) => {
            info!(
                run_id = %ctx.run_id,
                outcome = %run.status,
                "Run wound down within grace period"
            );
        }
        Err(_) => {
            worker.abort();
            warn!(
                run_id = %ctx.run_id,
                completed_rows = ctx.completed_rows(),
                "Run ignored cancellation within grace period, aborted"
            );
        }
    }

    orchestrator.assemble(&ctx, RunStatus::Cancelled, Some(timeout_error))
}

fn joined_run(
    orchestrator: &PipelineOrchestrator,
    ctx: &RunContext,
    joined: std::result::Result<PipelineRun, tokio::task::JoinError>,
) -> PipelineRun {
    match joined {
        Ok(run) => run,
        Err(err) => {
            error!(run_id = %ctx.run_id, error = %err, "Run task failed");
            let message = format!("run task failed: {}", err);
            ctx.progress.finish(RunStatus::Failed, &message);
            orchestrator.assemble(ctx, RunStatus::Failed, Some(message))
        }
    }
}

// =============================================================================
// Run Handle
// =============================================================================

/// Caller-side view of a background run
pub struct RunHandle {
    ctx: RunContext,
    join: JoinHandle<PipelineRun>,
}

impl RunHandle {
    pub fn run_id(&self) -> RunId {
        self.ctx.run_id
    }

    /// Latest immutable snapshot
    pub fn snapshot(&self) -> RunSnapshot {
        self.ctx.progress.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunSnapshot> {
        self.ctx.progress.watch()
    }

    pub fn events(&self) -> broadcast::Receiver<ProgressEvent> {
        self.ctx.progress.subscribe()
    }

    /// Request cooperative cancellation; batches already in flight finish
    pub fn cancel(&self) {
        info!(run_id = %self.ctx.run_id, "Cancellation requested");
        self.ctx.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the terminal run
    pub async fn wait(self) -> Result<PipelineRun> {
        self.join
            .await
            .map_err(|e| LensError::Pipeline(format!("run supervisor failed: {}", e)))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::provider::mock::MockCollaborator;
    use crate::config::Config;
    use crate::types::RowResult;
    use std::time::Duration;

    fn config(workers: usize, batch: usize) -> Config {
        let mut config = Config::default();
        config.pipeline.workers = Some(workers);
        config.batching.max_batch_size = batch;
        config
    }

    fn comments(n: usize) -> Vec<CommentRecord> {
        (0..n)
            .map(|i| CommentRecord::new(i, format!("comentario {} excelente atención", i)))
            .collect()
    }

    fn host(
        config: Config,
        mock: MockCollaborator,
        timeouts: TimeoutConfig,
    ) -> BackgroundExecutionHost {
        let orchestrator = PipelineOrchestrator::new(config, Some(Arc::new(mock))).unwrap();
        BackgroundExecutionHost::new(Arc::new(orchestrator), timeouts)
    }

    #[tokio::test]
    async fn test_background_run_succeeds() {
        let host = BackgroundExecutionHost::from_orchestrator(
            PipelineOrchestrator::new(config(2, 10), None).unwrap(),
        );
        let handle = host.start(comments(25));
        let mut snapshots = handle.subscribe();
        let run_id = handle.run_id();

        let run = handle.wait().await.unwrap();
        assert_eq!(run.run_id, run_id);
        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.results.len(), 25);

        let last = snapshots.borrow_and_update().clone();
        assert_eq!(last.status, RunStatus::Succeeded);
        assert_eq!(last.progress_fraction, 1.0);
    }

    #[tokio::test]
    async fn test_handle_cancel_keeps_prefix() {
        let mock = MockCollaborator::healthy().with_delay(Duration::from_millis(100));
        let host = host(config(1, 10), mock, TimeoutConfig::default());
        let handle = host.start(comments(30));

        let mut snapshots = handle.subscribe();
        while snapshots.changed().await.is_ok() {
            if snapshots.borrow().batches_done >= 1 {
                break;
            }
        }
        handle.cancel();

        let run = handle.wait().await.unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(run.results.len() < 30);
        let ids: Vec<usize> = run.results.iter().map(RowResult::row_id).collect();
        assert_eq!(ids, (0..ids.len()).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_timeout_aborts_with_partial_results() {
        let mock = MockCollaborator::healthy().with_delay(Duration::from_millis(200));
        let timeouts = TimeoutConfig {
            collaborator_call: Duration::from_secs(60),
            run: Duration::from_millis(300),
            cancel_grace: Duration::from_millis(20),
        };
        let host = host(config(1, 10), mock, timeouts);
        let handle = host.start(comments(30));

        let run = handle.wait().await.unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(run.results.len(), 10);
        assert!(run.error.unwrap().contains("Timeout"));
    }

    #[tokio::test]
    async fn test_timeout_with_every_batch_in_flight_is_cancelled() {
        let mock = MockCollaborator::healthy().with_delay(Duration::from_millis(300));
        let timeouts = TimeoutConfig {
            collaborator_call: Duration::from_secs(60),
            run: Duration::from_millis(100),
            cancel_grace: Duration::from_secs(1),
        };
        let host = host(config(3, 10), mock, timeouts);
        let handle = host.start(comments(30));
        let snapshots = handle.subscribe();

        let run = handle.wait().await.unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(run.error.unwrap().contains("Timeout"));
        // In-flight batches finished within grace and their rows are kept
        assert_eq!(run.results.len(), 30);
        assert_eq!(snapshots.borrow().status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_before_dispatch() {
        let mock = MockCollaborator::healthy().with_delay(Duration::from_millis(50));
        let host = host(config(1, 10), mock, TimeoutConfig::default());
        let handle = host.start(comments(20));
        handle.cancel();

        let run = handle.wait().await.unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(run.results.is_empty());
    }
}
