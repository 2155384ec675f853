pub mod analysis;
pub mod comment;
pub mod error;
pub mod taxonomy;
pub mod utils;

pub use analysis::{
    AnalysisRecord, AnalysisSource, ChurnAssessment, ChurnComponents, Correction,
    EmotionPatterns, EmotionProfile, ErrorPlaceholder, NpsAssessment, PainOrigin, PainPoint,
    ParsedResponse, RawAnalysisRecord, RawPainPoint, RowResult, SentimentAlignment,
};
pub use comment::{CommentRecord, validate_rows};
pub use error::{
    ErrorCategory, ErrorClassifier, LensError, LlmError, Result, ValidationError,
    ValidationErrorKind,
};
pub use taxonomy::{Emotion, NpsCategory, PainCategory, Polarity, RiskLevel, Severity};
pub use utils::{
    ParseWithDefault, fold_key, lenient_f64, normalize_whitespace, truncate_chars, unit_clamp,
    value_as_f64,
};

// =============================================================================
// Domain Newtypes
// =============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;

/// Type-safe wrapper for pipeline run IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(uuid::Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type-safe wrapper for token counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenCount(u64);

impl TokenCount {
    pub const ZERO: Self = Self(0);

    pub const fn new(count: u64) -> Self {
        Self(count)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Fraction of `limit` consumed (0.0 when the limit is zero)
    pub fn utilization(self, limit: Self) -> f64 {
        if limit.0 == 0 {
            0.0
        } else {
            self.0 as f64 / limit.0 as f64
        }
    }
}

impl fmt::Display for TokenCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TokenCount {
    fn from(count: u64) -> Self {
        Self(count)
    }
}

impl From<usize> for TokenCount {
    fn from(count: usize) -> Self {
        Self(count as u64)
    }
}

#[cfg(test)]
mod newtype_tests {
    use super::*;

    #[test]
    fn test_token_count_saturates() {
        let a = TokenCount::new(100);
        assert_eq!(a.saturating_sub(TokenCount::new(200)), TokenCount::ZERO);
        assert_eq!(a.saturating_add(TokenCount::new(50)).get(), 150);
    }

    #[test]
    fn test_token_count_utilization() {
        let used = TokenCount::new(250);
        assert!((used.utilization(TokenCount::new(1000)) - 0.25).abs() < 1e-9);
        assert_eq!(used.utilization(TokenCount::ZERO), 0.0);
    }

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }
}
