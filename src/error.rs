//! Error types for the resilience layer.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ResilienceError>;

/// Unified error type covering configuration, transport, and wrapped
/// operation failures.
///
/// Variants are coarse-grained. Finer distinctions (quota vs. auth vs.
/// validation) are made by [`classify`](crate::classify::classify), which
/// inspects an error's [`name`](Self::name) and message the same way for
/// every variant.
#[derive(Debug, Clone, Error)]
pub enum ResilienceError {
    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A non-2xx HTTP response.
    #[error("{message}")]
    Http {
        status: u16,
        message: String,
        /// Parsed JSON body, or the raw text wrapped in a JSON string.
        body: Option<serde_json::Value>,
    },

    /// A transport-level failure (connection refused, DNS, reset, ...).
    #[error("{0}")]
    Network(String),

    /// The request was cancelled after exceeding its timeout.
    #[error("{0}")]
    Timeout(String),

    /// The request was blocked by cross-origin policy.
    #[error("{0}")]
    Cors(String),

    /// A response body could not be decoded.
    #[error("{0}")]
    Decode(String),

    /// Local input validation failed before any I/O happened.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The circuit breaker for `operation` rejected the call.
    #[error("Circuit breaker is OPEN for {operation}. Service temporarily unavailable.")]
    CircuitOpen { operation: String },

    /// Any other failure raised by a wrapped operation.
    #[error("{message}")]
    Operation { name: String, message: String },
}

impl ResilienceError {
    /// Build a generic operation error with the default `"Error"` name.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Operation {
            name: "Error".to_string(),
            message: message.into(),
        }
    }

    /// Build an operation error with an explicit error name.
    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Operation {
            name: name.into(),
            message: message.into(),
        }
    }

    /// The error "name" the classifier keys on. Timeouts report
    /// `AbortError`, matching what a cancelled request surfaces as.
    pub fn name(&self) -> &str {
        match self {
            Self::Config(_) => "ConfigError",
            Self::Http { .. } => "FetchError",
            Self::Network(_) => "NetworkError",
            Self::Timeout(_) => "AbortError",
            Self::Cors(_) => "CorsError",
            Self::Decode(_) => "SyntaxError",
            Self::Validation(_) => "ValidationError",
            Self::CircuitOpen { .. } => "CircuitBreakerError",
            Self::Operation { name, .. } => name,
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns `true` when the default retry predicate would retry this
    /// error. See [`default_retry_condition`](crate::retry::default_retry_condition).
    pub fn is_retryable(&self) -> bool {
        crate::retry::default_retry_condition(self, 0)
    }

    /// Returns `true` for circuit-breaker rejections.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

impl From<serde_json::Error> for ResilienceError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(format!("Malformed JSON: {e}"))
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for ResilienceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(format!("Request timeout: {e}"))
        } else if e.is_decode() {
            Self::Decode(format!("Malformed JSON response: {e}"))
        } else {
            Self::Network(format!("Network error: failed to fetch: {e}"))
        }
    }
}
