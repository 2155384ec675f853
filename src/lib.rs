//! feedlens - Rate-Aware Batch Analysis of Customer Comments
//!
//! Sends customer comments to an LLM collaborator in rate-limited batches,
//! reconciles each answer into a consistent record (16 emotions, NPS
//! category, churn risk, pain points) and aggregates a report.
//!
//! ## Core Features
//!
//! - **Rate Budgeting**: rolling-window request/token reservations per provider tier
//! - **Dynamic Batching**: batch size from token caps, window headroom and recent failures
//! - **Retry + Fallback**: backoff with jitter, deterministic synthetic analysis as a last resort
//! - **Reconciliation**: consistency rules with every correction recorded
//! - **Background Runs**: progress snapshots, cooperative cancellation, hard timeout
//!
//! ## Quick Start
//!
//! ```ignore
//! use feedlens::{BackgroundExecutionHost, ConfigLoader, PipelineOrchestrator};
//!
//! let config = ConfigLoader::load(None)?;
//! let orchestrator = PipelineOrchestrator::from_config(config)?;
//! let host = BackgroundExecutionHost::from_orchestrator(orchestrator);
//! let handle = host.start(comments);
//! let run = handle.wait().await?;
//! ```
//!
//! ## Modules
//!
//! - [`ai`]: rate budget, usage recorder, batcher, invoker, collaborators
//! - [`reconcile`]: emotion, NPS, churn and pain point reconciliation
//! - [`pipeline`]: orchestrator, background host, progress and reports
//! - [`config`]: layered configuration

pub mod ai;
pub mod cli;
pub mod config;
pub mod constants;
pub mod pipeline;
pub mod reconcile;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

// Configuration
pub use config::{Config, ConfigLoader, ProviderKind};

// Error Types
pub use types::error::{ErrorCategory, LensError, Result};

// Domain
pub use types::{AnalysisRecord, CommentRecord, RowResult, RunId};

// =============================================================================
// Pipeline Re-exports
// =============================================================================

pub use pipeline::{
    BackgroundExecutionHost, PipelineOrchestrator, PipelineReport, PipelineRun, RunHandle,
    RunSnapshot, RunStatus,
};

// =============================================================================
// AI Re-exports
// =============================================================================

pub use ai::{
    AnalysisInvoker, DynamicBatcher, LlmCollaborator, RateBudgetTracker, SharedCollaborator,
    SharedRateBudget, SharedUsage, TimeoutConfig, UsageRecorder,
};
