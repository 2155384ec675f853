//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// Provider rate-limit constants
pub mod rate {
    /// Requests per minute for the default provider tier
    pub const DEFAULT_REQUESTS_PER_MINUTE: u64 = 450;

    /// Tokens per minute for the default provider tier
    pub const DEFAULT_TOKENS_PER_MINUTE: u64 = 200_000;

    /// Rolling window length (seconds)
    pub const WINDOW_SECS: u64 = 60;

    /// Ceiling on how long a denied reservation is told to wait (milliseconds)
    pub const MAX_WAIT_MS: u64 = 2_000;

    /// Token headroom below which the recommended batch size is halved
    pub const LOW_TOKEN_HEADROOM: f64 = 0.2;

    /// Remaining requests below which the recommended batch size is halved
    pub const LOW_REQUEST_HEADROOM: u64 = 5;
}

/// Batch sizing constants
pub mod batching {
    /// Default maximum comments per LLM call
    pub const MAX_BATCH_SIZE: usize = 100;

    /// Hard upper bound accepted for `max_batch_size`
    pub const MAX_BATCH_SIZE_LIMIT: usize = 1_000;

    /// Default maximum estimated tokens per LLM call
    pub const MAX_TOKENS_PER_CALL: u64 = 12_000;

    /// Accepted range for `max_tokens_per_call`
    pub const MIN_TOKENS_PER_CALL_LIMIT: u64 = 100;
    pub const MAX_TOKENS_PER_CALL_LIMIT: u64 = 100_000;

    /// Tokens spent on the system prompt and framing of every call
    pub const PROMPT_OVERHEAD_TOKENS: u64 = 800;

    /// Average characters per token used for estimates
    pub const CHARS_PER_TOKEN: usize = 4;

    /// Average tokens per comment assumed when no history exists
    pub const AVG_TOKENS_PER_COMMENT: u64 = 150;
}

/// Invoker retry constants
pub mod retry {
    /// Total attempts per batch (first call included)
    pub const MAX_ATTEMPTS: u32 = 3;

    /// Base delay for exponential backoff (milliseconds)
    pub const BASE_DELAY_MS: u64 = 250;

    /// Maximum delay between attempts (milliseconds)
    pub const MAX_DELAY_MS: u64 = 2_000;

    /// Backoff multiplier
    pub const BACKOFF_FACTOR: f64 = 2.0;

    /// Seed mixed into the synthetic generator
    pub const SYNTHETIC_SEED: u64 = 42;
}

/// Usage alert constants
pub mod usage {
    /// Warning threshold (fraction of the provider limit)
    pub const WARNING_THRESHOLD: f64 = 0.75;

    /// Critical threshold (fraction of the provider limit)
    pub const CRITICAL_THRESHOLD: f64 = 0.90;

    /// Snapshots considered by the batch-size recommendation
    pub const RECOMMENDATION_HISTORY: usize = 20;

    /// Average latency above which a recommendation is raised (milliseconds)
    pub const SLOW_CALL_MS: u64 = 30_000;

    /// Error rate above which a recommendation is raised
    pub const HIGH_ERROR_RATE: f64 = 0.10;

    /// Utilization above which concurrency/batch reductions are advised
    pub const HIGH_UTILIZATION: f64 = 0.80;

    /// Average batch size below which larger batches are advised
    pub const SMALL_BATCH: f64 = 20.0;
}

/// Pipeline constants
pub mod pipeline {
    /// Upper bound on the automatic worker ceiling
    pub const MAX_AUTO_WORKERS: usize = 12;

    /// Accepted upper bound for an explicit worker ceiling
    pub const MAX_WORKERS: usize = 50;

    /// Wall-clock SLA target (seconds)
    pub const SLA_TARGET_SECS: u64 = 10;

    /// Hard timeout for a hosted run (seconds)
    pub const RUN_TIMEOUT_SECS: u64 = 300;

    /// Time a timed-out run is given to stop cooperatively (milliseconds)
    pub const CANCEL_GRACE_MS: u64 = 2_000;

    /// Longest comment accepted before truncation (characters)
    pub const MAX_COMMENT_CHARS: usize = 10_000;

    /// Broadcast capacity for progress events
    pub const EVENT_CHANNEL_CAPACITY: usize = 256;

    /// Supported analysis languages
    pub const LANGUAGES: &[&str] = &["es", "en", "gn"];
}

/// Reconciliation constants
pub mod reconcile {
    /// Maximum pain points kept per comment
    pub const MAX_PAIN_POINTS: usize = 5;

    /// Word-overlap similarity above which two pain points are duplicates
    pub const SIMILARITY_THRESHOLD: f64 = 0.7;

    /// Characters of context captured around a detected pain keyword
    pub const CONTEXT_WINDOW_CHARS: usize = 50;

    /// Score above which an emotion counts towards "mixed emotions"
    pub const STRONG_EMOTION: f64 = 0.6;

    /// Score above which an emotion counts as active
    pub const ACTIVE_EMOTION: f64 = 0.1;

    /// Impact above which a pain point counts as high impact
    pub const HIGH_IMPACT: f64 = 0.7;
}
