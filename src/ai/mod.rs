//! AI Integration Layer
//!
//! Rate-aware batch analysis against an LLM collaborator: rate budgeting,
//! usage recording, batching, retries and the synthetic fallback.

pub mod batcher;
pub mod invoker;
pub mod provider;
pub mod rate_budget;
pub mod retry;
pub mod timeout;
pub mod usage;

pub use batcher::{Batch, BatchStats, DynamicBatcher};
pub use invoker::{AnalysisInvoker, BatchAnalysis};
pub use provider::{
    AnalysisPrompt, CollaboratorResponse, LlmCollaborator, OpenAiCollaborator, Pricing,
    SharedCollaborator, SyntheticGenerator, TokenUsage, build_analysis_prompt,
    create_collaborator, parse_batch_response,
};
pub use rate_budget::{
    RateBudgetTracker, RateDecision, RateUtilization, Reservation, SharedRateBudget,
    create_shared_rate_budget,
};
pub use retry::{Outcome, Retried, RetryFailure, RetryPolicy, RetryReason};
pub use timeout::{TimeoutConfig, with_timeout_map};
pub use usage::{
    AlertEvent, AlertLevel, CallOutcome, SharedUsage, UsageRecorder, UsageSnapshot, UsageTotals,
    create_shared_usage, recommend_batch_size, recommendations,
};
