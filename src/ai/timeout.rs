//! Timeout Configuration
//!
//! Centralized deadlines for collaborator calls and hosted runs, plus helpers
//! that wrap a future and turn expiry into [`LensError::Timeout`].
//!
//! ## Usage
//!
//! ```ignore
//! use crate::ai::timeout::{TimeoutConfig, with_timeout_map};
//!
//! let timeouts = TimeoutConfig::from_config(&config);
//! let response = with_timeout_map(
//!     timeouts.collaborator_call,
//!     collaborator.analyze(&texts, "es"),
//!     "collaborator call",
//! ).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use crate::config::Config;
use crate::types::{LensError, Result};

#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// One collaborator round trip (default: 60 seconds)
    pub collaborator_call: Duration,
    /// Whole hosted run (default: 5 minutes)
    pub run: Duration,
    /// Time a timed-out run gets to wind down before it is aborted
    pub cancel_grace: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl TimeoutConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            collaborator_call: Duration::from_secs(config.llm.timeout_secs),
            run: config.pipeline.timeout(),
            cancel_grace: config.pipeline.cancel_grace(),
        }
    }
}

/// Execute an async operation with a timeout, wrapping its output in `Ok`
pub async fn with_timeout_map<T, F>(
    timeout: Duration,
    future: F,
    operation_name: &str,
) -> Result<T>
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => Ok(result),
        Err(_) => Err(LensError::timeout(operation_name, timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_config_defaults() {
        let config = TimeoutConfig::default();
        assert_eq!(config.collaborator_call.as_secs(), 60);
        assert_eq!(config.run.as_secs(), 300);
        assert_eq!(config.cancel_grace.as_millis(), 2_000);
    }

    #[tokio::test]
    async fn test_with_timeout_map_success() {
        let result = with_timeout_map(Duration::from_secs(1), async { 42 }, "fast operation").await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_map_expires() {
        let result = with_timeout_map(
            Duration::from_millis(10),
            tokio::time::sleep(Duration::from_secs(1)),
            "slow operation",
        )
        .await;
        assert!(matches!(result, Err(LensError::Timeout { .. })));
    }
}
