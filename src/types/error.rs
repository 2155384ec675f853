//! Unified Error Type System
//!
//! Centralized error types for the analysis pipeline. Provider failures are
//! classified into categories so the invoker can decide between waiting,
//! retrying, falling back to the synthetic generator, or aborting the run.
//!
//! ## Failure Taxonomy
//!
//! - **RateLimitDeny**: local rate budget refused a reservation (bounded wait, retry)
//! - **ProviderThrottled**: remote 429 ([`ErrorCategory::RateLimit`], backoff with jitter)
//! - **TransientProvider**: network / 5xx ([`ErrorCategory::Network`], [`ErrorCategory::Transient`])
//! - **FatalConfiguration**: no usable collaborator and fallback disabled ([`LensError::Config`])
//! - **Validation**: malformed collaborator output, contained to the affected rows

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Error Categories
// =============================================================================

/// Provider error categories used for retry routing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Remote throttling (HTTP 429) - back off, then retry
    RateLimit,
    /// Request larger than the model context - retrying will not help
    TokenLimit,
    /// Credentials rejected - the collaborator is unusable
    Auth,
    /// Connectivity problem - retry
    Network,
    /// Endpoint or model missing
    Unavailable,
    /// Request rejected as invalid
    BadRequest,
    /// Response could not be decoded
    ParseError,
    /// Temporary server-side failure - retry
    Transient,
    /// Unclassified
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::RateLimit => "RATE_LIMIT",
            Self::TokenLimit => "TOKEN_LIMIT",
            Self::Auth => "AUTH",
            Self::Network => "NETWORK",
            Self::Unavailable => "UNAVAILABLE",
            Self::BadRequest => "BAD_REQUEST",
            Self::ParseError => "PARSE_ERROR",
            Self::Transient => "TRANSIENT",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

impl ErrorCategory {
    /// Whether another attempt against the same collaborator may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::Network | Self::Transient | Self::ParseError | Self::Unknown
        )
    }

    /// Whether the collaborator itself is misconfigured
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Auth)
    }

    /// Whether this is remote throttling
    pub fn is_throttle(&self) -> bool {
        matches!(self, Self::RateLimit)
    }
}

// =============================================================================
// LLM Error
// =============================================================================

/// Collaborator error with category, provider context and retry hint
#[derive(Debug, Clone)]
pub struct LlmError {
    pub category: ErrorCategory,
    pub message: String,
    pub provider: Option<String>,
    /// Server supplied wait hint (`Retry-After` or "try again in" text)
    pub retry_after: Option<Duration>,
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.provider {
            Some(provider) => write!(f, "[{}:{}] {}", provider, self.category, self.message),
            None => write!(f, "[{}] {}", self.category, self.message),
        }
    }
}

impl std::error::Error for LlmError {}

impl LlmError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            provider: None,
            retry_after: None,
        }
    }

    pub fn with_provider(
        category: ErrorCategory,
        message: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self::new(category, message).provider(provider)
    }

    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.category.is_retryable()
    }
}

// =============================================================================
// Error Classifier
// =============================================================================

/// Maps raw provider failures onto [`ErrorCategory`]
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify a free-form error message
    pub fn classify(message: &str, provider: &str) -> LlmError {
        let lower = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        let category = if has(&["rate limit", "429", "too many requests", "quota"]) {
            ErrorCategory::RateLimit
        } else if has(&["context length", "maximum context", "too large"]) {
            ErrorCategory::TokenLimit
        } else if has(&["401", "403", "api key", "unauthorized", "permission denied"]) {
            ErrorCategory::Auth
        } else if has(&["connection", "dns", "timed out", "timeout", "unreachable"]) {
            ErrorCategory::Network
        } else if has(&["502", "503", "504", "500", "overloaded", "server error"]) {
            ErrorCategory::Transient
        } else if has(&["404", "model not found", "does not exist"]) {
            ErrorCategory::Unavailable
        } else if has(&["400", "bad request", "invalid request"]) {
            ErrorCategory::BadRequest
        } else if has(&["json", "parse", "unexpected token", "expected value"]) {
            ErrorCategory::ParseError
        } else {
            ErrorCategory::Unknown
        };

        LlmError::with_provider(category, message, provider)
    }

    /// Classify an HTTP status code (more precise than message matching)
    pub fn classify_http_status(status: u16, message: &str, provider: &str) -> LlmError {
        let category = match status {
            429 => ErrorCategory::RateLimit,
            401 | 403 => ErrorCategory::Auth,
            400 | 422 => ErrorCategory::BadRequest,
            404 => ErrorCategory::Unavailable,
            408 | 409 | 500 | 502 | 503 | 504 => ErrorCategory::Transient,
            _ => ErrorCategory::Unknown,
        };
        LlmError::with_provider(category, message, provider)
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Structured validation error for collaborator output and inputs
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub field: Option<String>,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.field {
            Some(field) => write!(f, "Validation failed for '{}': {}", field, self.message),
            None => write!(f, "Validation failed: {}", self.message),
        }
    }
}

impl std::error::Error for ValidationError {}

impl ValidationError {
    pub fn new(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            field: None,
            message: message.into(),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// Response was not the expected JSON shape
    Schema,
    /// Response carried fewer records than comments sent
    MissingRecord,
    /// Input rows are not usable (empty set, duplicate ids)
    Input,
    /// Value outside its accepted range
    Range,
}

// =============================================================================
// Application Error
// =============================================================================

#[derive(Debug, Error)]
pub enum LensError {
    // -------------------------------------------------------------------------
    // System Errors (auto From impl)
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // -------------------------------------------------------------------------
    // Provider Errors
    // -------------------------------------------------------------------------
    /// Collaborator failure with category and retry hint
    #[error("LLM error: {0}")]
    Llm(LlmError),

    /// Local rate budget refused the reservation
    #[error("Rate budget exhausted, retry in {wait:?}")]
    RateLimitDeny { wait: Duration },

    /// A batch could not be analyzed after every attempt
    #[error("Batch {batch_index} failed after {attempts} attempt(s): {reason}")]
    BatchFailed {
        batch_index: usize,
        attempts: u32,
        reason: String,
    },

    // -------------------------------------------------------------------------
    // Run Errors
    // -------------------------------------------------------------------------
    /// Unusable configuration; aborts the whole run
    #[error("Config error: {0}")]
    Config(String),

    #[error("{0}")]
    Validation(ValidationError),

    #[error("Timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

impl From<LlmError> for LensError {
    fn from(err: LlmError) -> Self {
        LensError::Llm(err)
    }
}

impl From<ValidationError> for LensError {
    fn from(err: ValidationError) -> Self {
        LensError::Validation(err)
    }
}

impl From<figment::Error> for LensError {
    fn from(err: figment::Error) -> Self {
        LensError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LensError>;

// =============================================================================
// Helper Functions
// =============================================================================

impl LensError {
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::Validation(ValidationError::new(ValidationErrorKind::Input, message))
    }

    /// Errors that must abort the run instead of being contained to a batch
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Errors that another attempt may clear
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Llm(e) => e.is_retryable(),
            Self::RateLimitDeny { .. } | Self::Timeout { .. } => true,
            _ => false,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_display() {
        assert_eq!(ErrorCategory::RateLimit.to_string(), "RATE_LIMIT");
        assert_eq!(ErrorCategory::Transient.to_string(), "TRANSIENT");
        assert_eq!(ErrorCategory::Auth.to_string(), "AUTH");
    }

    #[test]
    fn test_error_category_routing() {
        assert!(ErrorCategory::RateLimit.is_retryable());
        assert!(ErrorCategory::RateLimit.is_throttle());
        assert!(ErrorCategory::Network.is_retryable());
        assert!(ErrorCategory::Transient.is_retryable());
        assert!(!ErrorCategory::Auth.is_retryable());
        assert!(ErrorCategory::Auth.is_configuration());
        assert!(!ErrorCategory::BadRequest.is_retryable());
        assert!(!ErrorCategory::TokenLimit.is_retryable());
    }

    #[test]
    fn test_classify_messages() {
        let cases = [
            ("Rate limit reached for gpt-4o-mini", ErrorCategory::RateLimit),
            (
                "This model's maximum context length is 128000",
                ErrorCategory::TokenLimit,
            ),
            ("Incorrect API key provided", ErrorCategory::Auth),
            (
                "error sending request: connection refused",
                ErrorCategory::Network,
            ),
            ("The server is overloaded", ErrorCategory::Transient),
            (
                "expected value at line 1 column 1 (json)",
                ErrorCategory::ParseError,
            ),
            ("Something odd", ErrorCategory::Unknown),
        ];
        for (message, expected) in cases {
            let err = ErrorClassifier::classify(message, "openai");
            assert_eq!(err.category, expected, "message: {}", message);
        }
    }

    #[test]
    fn test_classify_http_status() {
        let throttled = ErrorClassifier::classify_http_status(429, "slow down", "openai");
        assert_eq!(throttled.category, ErrorCategory::RateLimit);

        let auth = ErrorClassifier::classify_http_status(401, "Unauthorized", "openai");
        assert_eq!(auth.category, ErrorCategory::Auth);

        let server = ErrorClassifier::classify_http_status(503, "unavailable", "openai");
        assert_eq!(server.category, ErrorCategory::Transient);
    }

    #[test]
    fn test_llm_error_display() {
        let err = LlmError::with_provider(ErrorCategory::RateLimit, "Too many requests", "openai");
        assert_eq!(err.to_string(), "[openai:RATE_LIMIT] Too many requests");

        let bare = LlmError::new(ErrorCategory::Network, "Connection failed");
        assert_eq!(bare.to_string(), "[NETWORK] Connection failed");
    }

    #[test]
    fn test_lens_error_fatality() {
        assert!(LensError::config("no collaborator").is_fatal());
        assert!(!LensError::Cancelled.is_fatal());
        assert!(
            LensError::RateLimitDeny {
                wait: Duration::from_millis(10)
            }
            .is_recoverable()
        );
        assert!(!LensError::input("empty").is_recoverable());
    }
}
