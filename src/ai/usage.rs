//! Usage Recording
//!
//! Append-only log of every completed collaborator call with running totals,
//! threshold alerts against the provider tier, and tuning recommendations.
//! Thread-safe for concurrent batch workers.
//!
//! ## Usage
//!
//! ```ignore
//! let usage = create_shared_usage(limits, &config.alerts);
//! usage.record(UsageSnapshot::new(batch.index, batch.len(), CallOutcome::Success)
//!     .with_tokens(input, output)
//!     .with_latency(elapsed));
//! for alert in usage.check_alerts() { /* surface to the operator */ }
//! let next_size = recommend_batch_size(&usage.history(), current_size);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use crate::config::{AlertConfig, TierLimits};
use crate::constants::usage as usage_constants;

// =============================================================================
// Snapshots
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Success,
    /// Remote 429
    Throttled,
    /// Transient or permanent provider failure
    Failed,
    /// Served by the synthetic generator; no provider quota consumed
    Synthetic,
}

impl CallOutcome {
    fn hits_provider(&self) -> bool {
        !matches!(self, Self::Synthetic)
    }
}

/// One completed call. Never mutated after it is recorded.
#[derive(Debug, Clone, Serialize)]
pub struct UsageSnapshot {
    pub timestamp: DateTime<Utc>,
    pub batch_index: usize,
    pub batch_size: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub latency_ms: u64,
    pub cost_usd: f64,
    pub outcome: CallOutcome,
}

impl UsageSnapshot {
    pub fn new(batch_index: usize, batch_size: usize, outcome: CallOutcome) -> Self {
        Self {
            timestamp: Utc::now(),
            batch_index,
            batch_size,
            input_tokens: 0,
            output_tokens: 0,
            latency_ms: 0,
            cost_usd: 0.0,
            outcome,
        }
    }

    pub fn with_tokens(mut self, input: u64, output: u64) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_ms = latency.as_millis() as u64;
        self
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = cost_usd;
        self
    }

    pub fn tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

// =============================================================================
// Alerts
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    #[default]
    None,
    Warning,
    Critical,
}

impl AlertLevel {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Warning,
            _ => Self::Critical,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    pub level: AlertLevel,
    /// "requests" or "tokens", whichever is closer to its limit
    pub metric: &'static str,
    pub utilization: f64,
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Totals
// =============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageTotals {
    pub calls: u64,
    pub successes: u64,
    pub throttled: u64,
    pub failures: u64,
    pub synthetic: u64,
    pub comments: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
    pub avg_latency_ms: f64,
    pub max_latency_ms: u64,
    pub avg_batch_size: f64,
    pub alert_level: AlertLevel,
}

impl UsageTotals {
    /// Share of provider calls that failed or were throttled
    pub fn error_rate(&self) -> f64 {
        let provider_calls = self.calls.saturating_sub(self.synthetic);
        if provider_calls == 0 {
            0.0
        } else {
            (self.failures + self.throttled) as f64 / provider_calls as f64
        }
    }
}

// =============================================================================
// Usage Recorder
// =============================================================================

pub struct UsageRecorder {
    limits: TierLimits,
    window: Duration,
    warning_threshold: f64,
    critical_threshold: f64,
    calls: AtomicU64,
    successes: AtomicU64,
    throttled: AtomicU64,
    failures: AtomicU64,
    synthetic: AtomicU64,
    comments: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    total_latency_ms: AtomicU64,
    max_latency_ms: AtomicU64,
    /// Cost in microdollars for atomic accumulation
    cost_micros: AtomicU64,
    alert_level: AtomicU8,
    history: RwLock<Vec<UsageSnapshot>>,
    alerts: RwLock<Vec<AlertEvent>>,
}

impl UsageRecorder {
    pub fn new(limits: TierLimits, window: Duration, alerts: &AlertConfig) -> Self {
        Self {
            limits,
            window,
            warning_threshold: alerts.warning_threshold,
            critical_threshold: alerts.critical_threshold,
            calls: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            synthetic: AtomicU64::new(0),
            comments: AtomicU64::new(0),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            max_latency_ms: AtomicU64::new(0),
            cost_micros: AtomicU64::new(0),
            alert_level: AtomicU8::new(AlertLevel::None as u8),
            history: RwLock::new(Vec::new()),
            alerts: RwLock::new(Vec::new()),
        }
    }

    fn read_history(&self) -> RwLockReadGuard<'_, Vec<UsageSnapshot>> {
        self.history.read().unwrap_or_else(|poisoned| {
            tracing::error!("Usage history RwLock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write_history(&self) -> RwLockWriteGuard<'_, Vec<UsageSnapshot>> {
        self.history.write().unwrap_or_else(|poisoned| {
            tracing::error!("Usage history RwLock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Append a completed call and fold it into the running totals
    pub fn record(&self, snapshot: UsageSnapshot) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let counter = match snapshot.outcome {
            CallOutcome::Success => &self.successes,
            CallOutcome::Throttled => &self.throttled,
            CallOutcome::Failed => &self.failures,
            CallOutcome::Synthetic => &self.synthetic,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if matches!(snapshot.outcome, CallOutcome::Success | CallOutcome::Synthetic) {
            self.comments
                .fetch_add(snapshot.batch_size as u64, Ordering::Relaxed);
        }
        self.input_tokens
            .fetch_add(snapshot.input_tokens, Ordering::Relaxed);
        self.output_tokens
            .fetch_add(snapshot.output_tokens, Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(snapshot.latency_ms, Ordering::Relaxed);
        self.max_latency_ms
            .fetch_max(snapshot.latency_ms, Ordering::Relaxed);
        self.cost_micros
            .fetch_add((snapshot.cost_usd * 1_000_000.0) as u64, Ordering::Relaxed);

        self.write_history().push(snapshot);
    }

    /// Current totals
    pub fn snapshot(&self) -> UsageTotals {
        let calls = self.calls.load(Ordering::Relaxed);
        let input_tokens = self.input_tokens.load(Ordering::Relaxed);
        let output_tokens = self.output_tokens.load(Ordering::Relaxed);

        let (avg_batch_size, avg_latency_ms) = {
            let history = self.read_history();
            let provider: Vec<&UsageSnapshot> = history
                .iter()
                .filter(|s| s.outcome.hits_provider())
                .collect();
            let avg_batch = if history.is_empty() {
                0.0
            } else {
                history.iter().map(|s| s.batch_size as f64).sum::<f64>() / history.len() as f64
            };
            let avg_latency = if provider.is_empty() {
                0.0
            } else {
                provider.iter().map(|s| s.latency_ms as f64).sum::<f64>() / provider.len() as f64
            };
            (avg_batch, avg_latency)
        };

        UsageTotals {
            calls,
            successes: self.successes.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            synthetic: self.synthetic.load(Ordering::Relaxed),
            comments: self.comments.load(Ordering::Relaxed),
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            cost_usd: self.cost_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            avg_latency_ms,
            max_latency_ms: self.max_latency_ms.load(Ordering::Relaxed),
            avg_batch_size,
            alert_level: self.alert_level(),
        }
    }

    /// Copy of the snapshot log
    pub fn history(&self) -> Vec<UsageSnapshot> {
        self.read_history().clone()
    }

    pub fn alert_level(&self) -> AlertLevel {
        AlertLevel::from_u8(self.alert_level.load(Ordering::Acquire))
    }

    /// Alerts raised so far, oldest first
    pub fn alerts(&self) -> Vec<AlertEvent> {
        self.alerts
            .read()
            .unwrap_or_else(|poisoned| {
                tracing::error!("Usage alerts RwLock poisoned, recovering");
                poisoned.into_inner()
            })
            .clone()
    }

    /// Provider requests and tokens recorded within the trailing window
    pub fn window_usage(&self) -> (u64, u64) {
        let cutoff = chrono::Duration::from_std(self.window)
            .map(|w| Utc::now() - w)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.read_history()
            .iter()
            .filter(|s| s.outcome.hits_provider() && s.timestamp >= cutoff)
            .fold((0, 0), |(requests, tokens), s| {
                (requests + 1, tokens + s.tokens())
            })
    }

    /// Raise alerts for newly crossed thresholds.
    ///
    /// The level only escalates; once critical, no further alerts fire.
    pub fn check_alerts(&self) -> Vec<AlertEvent> {
        let (requests, tokens) = self.window_usage();
        let request_ratio = ratio(requests, self.limits.requests_per_minute);
        let token_ratio = ratio(tokens, self.limits.tokens_per_minute);
        let (metric, utilization) = if request_ratio >= token_ratio {
            ("requests", request_ratio)
        } else {
            ("tokens", token_ratio)
        };

        let target = if utilization >= self.critical_threshold {
            AlertLevel::Critical
        } else if utilization >= self.warning_threshold {
            AlertLevel::Warning
        } else {
            return Vec::new();
        };

        let previous = AlertLevel::from_u8(
            self.alert_level
                .fetch_max(target as u8, Ordering::AcqRel),
        );
        if previous >= target {
            return Vec::new();
        }

        let now = Utc::now();
        let events: Vec<AlertEvent> = [AlertLevel::Warning, AlertLevel::Critical]
            .into_iter()
            .filter(|level| *level > previous && *level <= target)
            .map(|level| AlertEvent {
                level,
                metric,
                utilization,
                timestamp: now,
            })
            .collect();

        for event in &events {
            match event.level {
                AlertLevel::Critical => tracing::error!(
                    metric,
                    utilization = format!("{:.1}%", utilization * 100.0),
                    "CRITICAL: provider usage at critical threshold"
                ),
                _ => tracing::warn!(
                    metric,
                    utilization = format!("{:.1}%", utilization * 100.0),
                    "Provider usage approaching limit"
                ),
            }
        }

        self.alerts
            .write()
            .unwrap_or_else(|poisoned| {
                tracing::error!("Usage alerts RwLock poisoned, recovering");
                poisoned.into_inner()
            })
            .extend(events.iter().cloned());
        events
    }

    /// Tuning hints derived from totals and current window usage
    pub fn recommendations(&self) -> Vec<String> {
        let (requests, tokens) = self.window_usage();
        recommendations(
            &self.snapshot(),
            ratio(requests, self.limits.requests_per_minute),
            ratio(tokens, self.limits.tokens_per_minute),
        )
    }
}

pub type SharedUsage = Arc<UsageRecorder>;

pub fn create_shared_usage(
    limits: TierLimits,
    window: Duration,
    alerts: &AlertConfig,
) -> SharedUsage {
    Arc::new(UsageRecorder::new(limits, window, alerts))
}

fn ratio(used: u64, limit: u64) -> f64 {
    if limit == 0 {
        0.0
    } else {
        used as f64 / limit as f64
    }
}

// =============================================================================
// Recommendations (pure)
// =============================================================================

/// Next batch size given recent call outcomes.
///
/// Looks at the most recent provider calls: a failure/throttle share of 50%
/// or more halves the size, 25% trims it to three quarters, 10% to nine
/// tenths. Never returns less than 1.
pub fn recommend_batch_size(history: &[UsageSnapshot], current: usize) -> usize {
    let recent: Vec<&UsageSnapshot> = history
        .iter()
        .rev()
        .filter(|s| s.outcome.hits_provider())
        .take(usage_constants::RECOMMENDATION_HISTORY)
        .collect();
    if recent.is_empty() {
        return current.max(1);
    }

    let troubled = recent
        .iter()
        .filter(|s| matches!(s.outcome, CallOutcome::Throttled | CallOutcome::Failed))
        .count();
    let share = troubled as f64 / recent.len() as f64;

    let next = if share >= 0.5 {
        current / 2
    } else if share >= 0.25 {
        current * 3 / 4
    } else if share >= 0.1 {
        current * 9 / 10
    } else {
        current
    };
    next.max(1)
}

/// Human-readable tuning hints.
pub fn recommendations(totals: &UsageTotals, request_ratio: f64, token_ratio: f64) -> Vec<String> {
    let mut hints = Vec::new();

    if request_ratio > usage_constants::HIGH_UTILIZATION {
        hints.push(format!(
            "Request rate at {:.0}% of the tier limit; reduce worker concurrency",
            request_ratio * 100.0
        ));
    }
    if token_ratio > usage_constants::HIGH_UTILIZATION {
        hints.push(format!(
            "Token rate at {:.0}% of the tier limit; reduce batch size",
            token_ratio * 100.0
        ));
    }
    if totals.avg_latency_ms > usage_constants::SLOW_CALL_MS as f64 {
        hints.push(format!(
            "Average call latency {:.1}s is high; consider smaller batches",
            totals.avg_latency_ms / 1000.0
        ));
    }
    if totals.throttled > 0 {
        hints.push(format!(
            "{} call(s) were throttled by the provider; lower concurrency or upgrade the tier",
            totals.throttled
        ));
    }
    if totals.error_rate() > usage_constants::HIGH_ERROR_RATE {
        hints.push(format!(
            "Error rate {:.0}% is high; check provider status and credentials",
            totals.error_rate() * 100.0
        ));
    }
    if totals.calls > 0 && totals.avg_batch_size < usage_constants::SMALL_BATCH {
        hints.push(format!(
            "Average batch size {:.0} is small; larger batches reduce per-call overhead",
            totals.avg_batch_size
        ));
    }
    if hints.is_empty() {
        hints.push("Usage is healthy; no changes needed".to_string());
    }
    hints
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(rpm: u64) -> UsageRecorder {
        UsageRecorder::new(
            TierLimits {
                requests_per_minute: rpm,
                tokens_per_minute: 1_000_000,
            },
            Duration::from_secs(60),
            &AlertConfig::default(),
        )
    }

    fn success(index: usize) -> UsageSnapshot {
        UsageSnapshot::new(index, 50, CallOutcome::Success)
            .with_tokens(900, 300)
            .with_latency(Duration::from_millis(400))
            .with_cost(0.001)
    }

    #[test]
    fn test_totals_accumulate() {
        let usage = recorder(100);
        usage.record(success(0));
        usage.record(success(1));
        usage.record(UsageSnapshot::new(2, 50, CallOutcome::Throttled));
        usage.record(UsageSnapshot::new(2, 50, CallOutcome::Synthetic));

        let totals = usage.snapshot();
        assert_eq!(totals.calls, 4);
        assert_eq!(totals.successes, 2);
        assert_eq!(totals.throttled, 1);
        assert_eq!(totals.synthetic, 1);
        assert_eq!(totals.comments, 150);
        assert_eq!(totals.total_tokens, 2_400);
        assert_eq!(totals.max_latency_ms, 400);
        assert!((totals.cost_usd - 0.002).abs() < 1e-9);
        assert!((totals.error_rate() - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(usage.history().len(), 4);
    }

    #[test]
    fn test_alerts_escalate_once_and_never_repeat() {
        let usage = recorder(10);
        for i in 0..7 {
            usage.record(success(i));
        }
        assert!(usage.check_alerts().is_empty());

        usage.record(success(7));
        let alerts = usage.check_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Warning);
        assert_eq!(alerts[0].metric, "requests");
        assert!(usage.check_alerts().is_empty());

        usage.record(success(8));
        let alerts = usage.check_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Critical);
        assert_eq!(usage.alert_level(), AlertLevel::Critical);
        assert_eq!(usage.alerts().len(), 2);
    }

    #[test]
    fn test_jump_to_critical_reports_both_levels() {
        let usage = recorder(4);
        for i in 0..4 {
            usage.record(success(i));
        }
        let levels: Vec<AlertLevel> = usage.check_alerts().iter().map(|a| a.level).collect();
        assert_eq!(levels, vec![AlertLevel::Warning, AlertLevel::Critical]);
    }

    #[test]
    fn test_synthetic_calls_do_not_count_towards_limits() {
        let usage = recorder(2);
        for i in 0..5 {
            usage.record(UsageSnapshot::new(i, 10, CallOutcome::Synthetic));
        }
        assert_eq!(usage.window_usage(), (0, 0));
        assert!(usage.check_alerts().is_empty());
    }

    #[test]
    fn test_recommend_batch_size() {
        let ok = |i| UsageSnapshot::new(i, 100, CallOutcome::Success);
        let bad = |i| UsageSnapshot::new(i, 100, CallOutcome::Throttled);

        assert_eq!(recommend_batch_size(&[], 100), 100);
        assert_eq!(recommend_batch_size(&[ok(0), ok(1)], 100), 100);
        assert_eq!(recommend_batch_size(&[ok(0), bad(1)], 100), 50);
        assert_eq!(
            recommend_batch_size(&[ok(0), ok(1), ok(2), bad(3)], 100),
            75
        );
        let mostly_ok: Vec<_> = (0..9).map(ok).chain([bad(9)]).collect();
        assert_eq!(recommend_batch_size(&mostly_ok, 100), 90);
        assert_eq!(recommend_batch_size(&[bad(0)], 1), 1);
    }

    #[test]
    fn test_recommendations() {
        let healthy = UsageTotals {
            calls: 10,
            successes: 10,
            avg_batch_size: 80.0,
            ..Default::default()
        };
        assert_eq!(
            recommendations(&healthy, 0.2, 0.3),
            vec!["Usage is healthy; no changes needed".to_string()]
        );

        let strained = UsageTotals {
            calls: 10,
            successes: 7,
            throttled: 3,
            avg_batch_size: 10.0,
            ..Default::default()
        };
        let hints = recommendations(&strained, 0.85, 0.9);
        assert!(hints.iter().any(|h| h.contains("reduce worker concurrency")));
        assert!(hints.iter().any(|h| h.contains("reduce batch size")));
        assert!(hints.iter().any(|h| h.contains("throttled")));
        assert!(hints.iter().any(|h| h.contains("Error rate")));
        assert!(hints.iter().any(|h| h.contains("batch size 10")));
    }
}
