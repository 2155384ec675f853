//! Provider Rate Budget
//!
//! Sliding-window accounting of request and token usage against the limits
//! of the configured provider tier. Every call is gated through
//! [`RateBudgetTracker::reserve`]; the returned [`Reservation`] is later
//! reconciled with the real token count via [`RateBudgetTracker::commit`].
//!
//! ## Usage
//!
//! ```ignore
//! let tracker = RateBudgetTracker::from_config(&config.rate)?;
//! match tracker.reserve(1, batch.estimated_tokens) {
//!     RateDecision::Allowed(reservation) => {
//!         let response = collaborator.analyze(..).await?;
//!         tracker.commit(reservation, response.usage.total_tokens);
//!     }
//!     RateDecision::Deny { wait } => tokio::time::sleep(wait).await,
//! }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::{RateConfig, TierLimits};
use crate::constants::rate as rate_constants;
use crate::types::{Result, TokenCount};

// =============================================================================
// Reservation Types
// =============================================================================

/// Debit taken against the window; hand it back to `commit` once the call finishes.
#[derive(Debug)]
pub struct Reservation {
    id: u64,
    requests: u64,
    tokens: TokenCount,
}

impl Reservation {
    pub fn estimated_tokens(&self) -> TokenCount {
        self.tokens
    }

    pub fn requests(&self) -> u64 {
        self.requests
    }
}

#[derive(Debug)]
#[must_use]
pub enum RateDecision {
    Allowed(Reservation),
    /// Try again after `wait` (never longer than the configured ceiling)
    Deny { wait: Duration },
}

/// Point-in-time view of window usage
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RateUtilization {
    pub requests_used: u64,
    pub tokens_used: u64,
    pub requests_limit: u64,
    pub tokens_limit: u64,
}

impl RateUtilization {
    pub fn request_ratio(&self) -> f64 {
        TokenCount::new(self.requests_used).utilization(TokenCount::new(self.requests_limit))
    }

    pub fn token_ratio(&self) -> f64 {
        TokenCount::new(self.tokens_used).utilization(TokenCount::new(self.tokens_limit))
    }

    pub fn remaining_requests(&self) -> u64 {
        self.requests_limit.saturating_sub(self.requests_used)
    }
}

// =============================================================================
// Window State
// =============================================================================

#[derive(Debug)]
struct WindowEntry {
    id: u64,
    at: Instant,
    requests: u64,
    tokens: u64,
}

#[derive(Debug, Default)]
struct WindowState {
    entries: VecDeque<WindowEntry>,
    requests_used: u64,
    tokens_used: u64,
    next_id: u64,
}

impl WindowState {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(front) = self.entries.front() {
            if now.duration_since(front.at) < window {
                break;
            }
            self.requests_used = self.requests_used.saturating_sub(front.requests);
            self.tokens_used = self.tokens_used.saturating_sub(front.tokens);
            self.entries.pop_front();
        }
    }
}

// =============================================================================
// Rate Budget Tracker
// =============================================================================

#[derive(Debug)]
pub struct RateBudgetTracker {
    limits: TierLimits,
    window: Duration,
    max_wait: Duration,
    state: Mutex<WindowState>,
    denials: AtomicU64,
}

impl RateBudgetTracker {
    pub fn new(limits: TierLimits, window: Duration, max_wait: Duration) -> Self {
        Self {
            limits,
            window,
            max_wait,
            state: Mutex::new(WindowState::default()),
            denials: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &RateConfig) -> Result<Self> {
        Ok(Self::new(config.limits()?, config.window(), config.max_wait()))
    }

    pub fn limits(&self) -> TierLimits {
        self.limits
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Rate budget lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Reserve capacity for a call.
    ///
    /// A reservation larger than the whole limit is admitted only into an
    /// empty window, so oversized calls cannot wait forever.
    pub fn reserve(&self, requests: u64, tokens: u64) -> RateDecision {
        let now = Instant::now();
        let mut state = self.lock();
        state.prune(now, self.window);

        let over_requests =
            state.requests_used.saturating_add(requests) > self.limits.requests_per_minute;
        let over_tokens = state.tokens_used.saturating_add(tokens) > self.limits.tokens_per_minute;

        if over_requests || over_tokens {
            if let Some(oldest) = state.entries.front() {
                let expires_in = self.window.saturating_sub(now.duration_since(oldest.at));
                let wait = expires_in.max(Duration::from_millis(1)).min(self.max_wait);
                self.denials.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    requests_used = state.requests_used,
                    tokens_used = state.tokens_used,
                    requested_tokens = tokens,
                    wait_ms = wait.as_millis() as u64,
                    "Rate budget denied reservation"
                );
                return RateDecision::Deny { wait };
            }
            tracing::warn!(
                tokens,
                limit = self.limits.tokens_per_minute,
                "Reservation exceeds the full window limit, admitting into empty window"
            );
        }

        let id = state.next_id;
        state.next_id += 1;
        state.requests_used = state.requests_used.saturating_add(requests);
        state.tokens_used = state.tokens_used.saturating_add(tokens);
        state.entries.push_back(WindowEntry {
            id,
            at: now,
            requests,
            tokens,
        });

        RateDecision::Allowed(Reservation {
            id,
            requests,
            tokens: TokenCount::new(tokens),
        })
    }

    /// Replace the estimated debit with the actual token count.
    ///
    /// Reservations that already left the window are ignored.
    pub fn commit(&self, reservation: Reservation, actual_tokens: u64) {
        let mut state = self.lock();
        let Some(index) = state.entries.iter().position(|e| e.id == reservation.id) else {
            return;
        };
        let previous = state.entries[index].tokens;
        state.entries[index].tokens = actual_tokens;
        state.tokens_used = state
            .tokens_used
            .saturating_sub(previous)
            .saturating_add(actual_tokens);
    }

    pub fn utilization(&self) -> RateUtilization {
        let mut state = self.lock();
        state.prune(Instant::now(), self.window);
        RateUtilization {
            requests_used: state.requests_used,
            tokens_used: state.tokens_used,
            requests_limit: self.limits.requests_per_minute,
            tokens_limit: self.limits.tokens_per_minute,
        }
    }

    /// Number of denied reservations so far
    pub fn denials(&self) -> u64 {
        self.denials.load(Ordering::Relaxed)
    }

    /// Batch size that fits one call's token cap, halved when the window is nearly spent.
    pub fn recommended_batch_size(
        &self,
        avg_tokens_per_comment: u64,
        prompt_overhead: u64,
        max_tokens_per_call: u64,
        max_batch_size: usize,
    ) -> usize {
        let per_comment = avg_tokens_per_comment.max(1);
        let by_tokens = max_tokens_per_call.saturating_sub(prompt_overhead) / per_comment;
        let mut size = (by_tokens as usize).clamp(1, max_batch_size.max(1));

        let usage = self.utilization();
        if 1.0 - usage.token_ratio() < rate_constants::LOW_TOKEN_HEADROOM
            || usage.remaining_requests() < rate_constants::LOW_REQUEST_HEADROOM
        {
            size = (size / 2).max(1);
        }
        size
    }
}

pub type SharedRateBudget = Arc<RateBudgetTracker>;

pub fn create_shared_rate_budget(config: &RateConfig) -> Result<SharedRateBudget> {
    Ok(Arc::new(RateBudgetTracker::from_config(config)?))
}
