//! Configuration Types
//!
//! All configuration structures with sensible defaults.
//! Supports global (user config dir) and project (.feedlens/) level configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::constants::{batching, pipeline, rate, reconcile, retry, usage};
use crate::types::{LensError, Result};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// LLM collaborator settings
    pub llm: LlmConfig,

    /// Provider rate limits
    pub rate: RateConfig,

    /// Batch sizing
    pub batching: BatchingConfig,

    /// Invoker retry policy and synthetic fallback
    pub retry: RetryConfig,

    /// Run-level settings
    pub pipeline: PipelineConfig,

    /// Usage alert thresholds
    pub alerts: AlertConfig,

    /// Reconciliation weights and keyword lists
    pub reconcile: ReconcileConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            llm: LlmConfig::default(),
            rate: RateConfig::default(),
            batching: BatchingConfig::default(),
            retry: RetryConfig::default(),
            pipeline: PipelineConfig::default(),
            alerts: AlertConfig::default(),
            reconcile: ReconcileConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    /// Returns `LensError::Config` on validation failure.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(LensError::Config(format!(
                "llm.temperature must be between 0.0 and 2.0, got {}",
                self.llm.temperature
            )));
        }
        if self.llm.timeout_secs == 0 {
            return Err(LensError::config("llm.timeout_secs must be greater than 0"));
        }
        if let Some(base) = &self.llm.api_base {
            url::Url::parse(base)
                .map_err(|e| LensError::Config(format!("llm.api_base '{}': {}", base, e)))?;
        }

        let limits = self.rate.limits()?;
        if limits.requests_per_minute == 0 || limits.tokens_per_minute == 0 {
            return Err(LensError::Config(format!(
                "rate tier '{}' must allow at least one request and one token",
                self.rate.tier
            )));
        }
        if self.rate.window_secs == 0 {
            return Err(LensError::config("rate.window_secs must be greater than 0"));
        }

        if !(1..=batching::MAX_BATCH_SIZE_LIMIT).contains(&self.batching.max_batch_size) {
            return Err(LensError::Config(format!(
                "batching.max_batch_size must be between 1 and {}, got {}",
                batching::MAX_BATCH_SIZE_LIMIT,
                self.batching.max_batch_size
            )));
        }
        if !(batching::MIN_TOKENS_PER_CALL_LIMIT..=batching::MAX_TOKENS_PER_CALL_LIMIT)
            .contains(&self.batching.max_tokens_per_call)
        {
            return Err(LensError::Config(format!(
                "batching.max_tokens_per_call must be between {} and {}, got {}",
                batching::MIN_TOKENS_PER_CALL_LIMIT,
                batching::MAX_TOKENS_PER_CALL_LIMIT,
                self.batching.max_tokens_per_call
            )));
        }
        if self.batching.chars_per_token == 0 {
            return Err(LensError::config("batching.chars_per_token must be greater than 0"));
        }

        if self.retry.max_attempts == 0 {
            return Err(LensError::config("retry.max_attempts must be at least 1"));
        }
        if self.retry.backoff_factor < 1.0 {
            return Err(LensError::config("retry.backoff_factor must be at least 1.0"));
        }

        if let Some(workers) = self.pipeline.workers
            && !(1..=pipeline::MAX_WORKERS).contains(&workers)
        {
            return Err(LensError::Config(format!(
                "pipeline.workers must be between 1 and {}, got {}",
                pipeline::MAX_WORKERS,
                workers
            )));
        }
        if self.pipeline.timeout_secs == 0 {
            return Err(LensError::config("pipeline.timeout_secs must be greater than 0"));
        }
        if !pipeline::LANGUAGES.contains(&self.pipeline.language.as_str()) {
            return Err(LensError::Config(format!(
                "pipeline.language '{}' is not supported (valid: {})",
                self.pipeline.language,
                pipeline::LANGUAGES.join(", ")
            )));
        }

        let alerts = &self.alerts;
        if !(0.0 < alerts.warning_threshold
            && alerts.warning_threshold < alerts.critical_threshold
            && alerts.critical_threshold <= 1.0)
        {
            return Err(LensError::Config(format!(
                "alert thresholds must satisfy 0 < warning < critical <= 1, got {} / {}",
                alerts.warning_threshold, alerts.critical_threshold
            )));
        }

        let total = self.reconcile.churn.weights.total();
        if (total - 1.0).abs() > 1e-6 {
            return Err(LensError::Config(format!(
                "reconcile.churn.weights must sum to 1.0, got {:.3}",
                total
            )));
        }
        if self.reconcile.pain_points.max_pain_points == 0 {
            return Err(LensError::config(
                "reconcile.pain_points.max_pain_points must be at least 1",
            ));
        }

        Ok(())
    }
}

// =============================================================================
// LLM Configuration
// =============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Deterministic local generator; no network access
    #[default]
    Synthetic,
    /// OpenAI-compatible chat completions endpoint
    OpenAi,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Synthetic => write!(f, "synthetic"),
            ProviderKind::OpenAi => write!(f, "openai"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "synthetic" | "mock" => Ok(ProviderKind::Synthetic),
            "openai" => Ok(ProviderKind::OpenAi),
            _ => Err(format!(
                "Unknown provider: {}. Valid values: synthetic, openai",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: ProviderKind,
    pub model: String,
    /// Override for the chat completions base URL
    pub api_base: Option<String>,
    /// API key; falls back to `OPENAI_API_KEY`
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// USD per 1k prompt tokens
    pub cost_per_1k_input: f64,
    /// USD per 1k completion tokens
    pub cost_per_1k_output: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Synthetic,
            model: "gpt-4o-mini".to_string(),
            api_base: None,
            api_key: None,
            timeout_secs: 60,
            temperature: 0.1,
            max_output_tokens: 4096,
            cost_per_1k_input: 0.000_15,
            cost_per_1k_output: 0.000_6,
        }
    }
}

// =============================================================================
// Rate Limits
// =============================================================================

/// Per-minute allowance of a provider tier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierLimits {
    pub requests_per_minute: u64,
    pub tokens_per_minute: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    /// Active tier (key into `tiers`)
    pub tier: String,
    pub tiers: BTreeMap<String, TierLimits>,
    pub window_secs: u64,
    /// Ceiling on the wait suggested by a denied reservation
    pub max_wait_ms: u64,
}

impl Default for RateConfig {
    fn default() -> Self {
        let tiers = [
            ("free", 3, 40_000),
            (
                "standard",
                rate::DEFAULT_REQUESTS_PER_MINUTE,
                rate::DEFAULT_TOKENS_PER_MINUTE,
            ),
            ("tier1", 500, 200_000),
            ("tier2", 5_000, 2_000_000),
        ]
        .into_iter()
        .map(|(name, rpm, tpm)| {
            (
                name.to_string(),
                TierLimits {
                    requests_per_minute: rpm,
                    tokens_per_minute: tpm,
                },
            )
        })
        .collect();

        Self {
            tier: "standard".to_string(),
            tiers,
            window_secs: rate::WINDOW_SECS,
            max_wait_ms: rate::MAX_WAIT_MS,
        }
    }
}

impl RateConfig {
    /// Limits of the active tier
    pub fn limits(&self) -> Result<TierLimits> {
        self.tiers.get(&self.tier).copied().ok_or_else(|| {
            LensError::Config(format!(
                "unknown rate tier '{}' (known: {})",
                self.tier,
                self.tiers.keys().cloned().collect::<Vec<_>>().join(", ")
            ))
        })
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

// =============================================================================
// Batching
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    pub max_batch_size: usize,
    pub max_tokens_per_call: u64,
    pub prompt_overhead_tokens: u64,
    pub chars_per_token: usize,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            max_batch_size: batching::MAX_BATCH_SIZE,
            max_tokens_per_call: batching::MAX_TOKENS_PER_CALL,
            prompt_overhead_tokens: batching::PROMPT_OVERHEAD_TOKENS,
            chars_per_token: batching::CHARS_PER_TOKEN,
        }
    }
}

// =============================================================================
// Retry & Fallback
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per batch, first call included
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    /// Use the synthetic generator when the collaborator is absent or exhausted
    pub synthetic_fallback: bool,
    /// Seed for the synthetic generator
    pub seed: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: retry::MAX_ATTEMPTS,
            base_delay_ms: retry::BASE_DELAY_MS,
            max_delay_ms: retry::MAX_DELAY_MS,
            backoff_factor: retry::BACKOFF_FACTOR,
            synthetic_fallback: true,
            seed: retry::SYNTHETIC_SEED,
        }
    }
}

// =============================================================================
// Pipeline
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Worker ceiling; `None` picks available parallelism capped at 12
    pub workers: Option<usize>,
    /// Prompt language: es, en or gn
    pub language: String,
    /// Informational SLA target, reported as a compliance flag
    pub sla_target_secs: u64,
    /// Hard timeout for a hosted run
    pub timeout_secs: u64,
    /// Time a timed-out run gets to stop on its own before being aborted
    pub cancel_grace_ms: u64,
    /// Comments longer than this are truncated before analysis
    pub max_comment_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: None,
            language: "es".to_string(),
            sla_target_secs: pipeline::SLA_TARGET_SECS,
            timeout_secs: pipeline::RUN_TIMEOUT_SECS,
            cancel_grace_ms: pipeline::CANCEL_GRACE_MS,
            max_comment_chars: pipeline::MAX_COMMENT_CHARS,
        }
    }
}

impl PipelineConfig {
    /// Resolved worker ceiling (never below 1)
    pub fn effective_workers(&self) -> usize {
        match self.workers {
            Some(workers) => workers.max(1),
            None => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .min(pipeline::MAX_AUTO_WORKERS),
        }
    }

    pub fn sla_target(&self) -> Duration {
        Duration::from_secs(self.sla_target_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

// =============================================================================
// Alerts
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub warning_threshold: f64,
    pub critical_threshold: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            warning_threshold: usage::WARNING_THRESHOLD,
            critical_threshold: usage::CRITICAL_THRESHOLD,
        }
    }
}

// =============================================================================
// Reconciliation
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub churn: ChurnConfig,
    pub pain_points: PainPointConfig,
}

/// Weights of the churn composite; must sum to 1.0
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChurnWeights {
    /// Churn risk reported by the collaborator
    pub collaborator: f64,
    /// Emotion polarity
    pub sentiment: f64,
    /// Cancellation / dissatisfaction keywords
    pub keywords: f64,
    /// NPS category and consistency
    pub nps: f64,
    /// Pain point severity
    pub pain_points: f64,
}

impl Default for ChurnWeights {
    fn default() -> Self {
        Self {
            collaborator: 0.30,
            sentiment: 0.25,
            keywords: 0.25,
            nps: 0.15,
            pain_points: 0.05,
        }
    }
}

impl ChurnWeights {
    pub fn total(&self) -> f64 {
        self.collaborator + self.sentiment + self.keywords + self.nps + self.pain_points
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChurnConfig {
    pub weights: ChurnWeights,
    /// Explicit cancellation intent; each hit adds 0.3 to the keyword signal
    pub high_risk_keywords: Vec<String>,
    /// Dissatisfaction markers; each hit adds 0.1 to the keyword signal
    pub medium_risk_keywords: Vec<String>,
}

impl Default for ChurnConfig {
    fn default() -> Self {
        let owned = |words: &[&str]| words.iter().map(|w| w.to_string()).collect::<Vec<_>>();
        Self {
            weights: ChurnWeights::default(),
            high_risk_keywords: owned(&[
                "cancelar",
                "cerrar cuenta",
                "dar de baja",
                "nunca más",
                "no vuelvo",
                "pésimo servicio",
                "horrible",
                "terrible",
                "odio",
                "detesto",
                "cambiar de proveedor",
                "buscar alternativa",
                "competencia",
                "no recomiendo",
                "perdieron un cliente",
                "última vez",
                "cancel my",
                "switch provider",
                "never again",
            ]),
            medium_risk_keywords: owned(&[
                "decepcionado",
                "frustrado",
                "molesto",
                "insatisfecho",
                "problema",
                "queja",
                "reclamo",
                "mal servicio",
                "no cumple",
                "esperaba más",
                "no vale la pena",
                "disappointed",
                "frustrated",
                "complaint",
            ]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PainPointConfig {
    pub max_pain_points: usize,
    /// Word-overlap similarity above which two descriptions are merged
    pub similarity_threshold: f64,
}

impl Default for PainPointConfig {
    fn default() -> Self {
        Self {
            max_pain_points: reconcile::MAX_PAIN_POINTS,
            similarity_threshold: reconcile::SIMILARITY_THRESHOLD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        let limits = config.rate.limits().unwrap();
        assert_eq!(limits.requests_per_minute, 450);
        assert_eq!(limits.tokens_per_minute, 200_000);
    }

    #[test]
    fn test_unknown_tier_rejected() {
        let mut config = Config::default();
        config.rate.tier = "platinum".to_string();
        assert!(matches!(config.validate(), Err(LensError::Config(_))));
    }

    #[test]
    fn test_churn_weights_must_sum_to_one() {
        let mut config = Config::default();
        config.reconcile.churn.weights.keywords = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_alert_threshold_order() {
        let mut config = Config::default();
        config.alerts.warning_threshold = 0.95;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_batch_and_worker_ranges() {
        let mut config = Config::default();
        config.batching.max_batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pipeline.workers = Some(51);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pipeline.workers = Some(1);
        assert_eq!(config.pipeline.effective_workers(), 1);
    }

    #[test]
    fn test_auto_workers_capped() {
        let workers = PipelineConfig::default().effective_workers();
        assert!((1..=pipeline::MAX_AUTO_WORKERS).contains(&workers));
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("OpenAI".parse::<ProviderKind>(), Ok(ProviderKind::OpenAi));
        assert_eq!("mock".parse::<ProviderKind>(), Ok(ProviderKind::Synthetic));
        assert!("gemini".parse::<ProviderKind>().is_err());
    }
}
