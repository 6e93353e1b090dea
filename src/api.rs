//! Public configuration types and the completion-provider payloads.

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::{ResilienceError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding [`ClientConfig::base_url`].
pub const BASE_URL_ENV: &str = "DEVFLOW_API_BASE_URL";

/// Environment variable overriding [`ClientConfig::default_timeout_ms`].
pub const TIMEOUT_ENV: &str = "DEVFLOW_API_TIMEOUT_MS";

/// Longest question accepted by the completion endpoint, in characters.
pub const MAX_QUESTION_CHARS: usize = 2000;

/// Exponential-backoff retry parameters.
///
/// The delay before retry `i` (0-based) is
/// `min(base_delay_ms * backoff_multiplier^i, max_delay_ms)`, scaled by a
/// random factor in `[0.5, 1.0]` when `jitter` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Un-jittered backoff before retry `attempt` (0-based).
    pub fn get_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(crate::classify::capped_exponential(
            self.base_delay_ms as f64,
            self.backoff_multiplier,
            attempt,
            self.max_delay_ms as f64,
        ))
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ResilienceError::Config(format!(
                "max_delay_ms ({}) must be at least base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        if !(self.backoff_multiplier >= 1.0 && self.backoff_multiplier.is_finite()) {
            return Err(ResilienceError::Config(format!(
                "backoff_multiplier must be a finite number >= 1, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }
}

/// Per-request options for tracked fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Cancels the in-flight request after this many milliseconds.
    pub timeout_ms: u64,
    pub retries: u32,
    pub retry_delay_ms: u64,
    /// Log failures to the error log store.
    pub track_errors: bool,
    /// Route through the breaker-then-retry combinator instead of the
    /// simple classifier-driven retry loop.
    pub use_advanced_retry: bool,
    /// Explicit breaker key. Derived from method and URL when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker_key: Option<String>,
    /// Overrides applied on top of `retries` / `retry_delay_ms`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            retries: 3,
            retry_delay_ms: 1000,
            track_errors: true,
            use_advanced_retry: true,
            circuit_breaker_key: None,
            retry: None,
            circuit_breaker: None,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Retry settings in effect: the explicit override, or defaults built
    /// from `retries` and `retry_delay_ms`.
    pub fn effective_retry(&self) -> RetryConfig {
        self.retry.clone().unwrap_or_else(|| RetryConfig {
            max_retries: self.retries,
            base_delay_ms: self.retry_delay_ms,
            ..RetryConfig::default()
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(ResilienceError::Config(
                "Fetch timeout must be greater than 0".to_string(),
            ));
        }
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        if let Some(cb) = &self.circuit_breaker {
            cb.validate()?;
        }
        Ok(())
    }
}

/// Defaults for an [`ApiClient`](crate::api_client::ApiClient).
///
/// # Example JSON
///
/// ```json
/// {
///   "base_url": "https://devflow.example.com",
///   "default_timeout_ms": 30000,
///   "retry": { "max_retries": 3, "base_delay_ms": 1000 },
///   "circuit_breaker": { "failure_threshold": 5, "reset_timeout_ms": 60000 }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub default_timeout_ms: u64,
    pub default_retries: u32,
    pub default_headers: BTreeMap<String, String>,
    pub use_advanced_retry: bool,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            default_timeout_ms: 30_000,
            default_retries: 3,
            default_headers: BTreeMap::new(),
            use_advanced_retry: true,
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Validate invariants: a non-empty http(s) base URL, a non-zero
    /// timeout, and valid retry and breaker settings.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(ResilienceError::Config("base_url cannot be empty".to_string()));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ResilienceError::Config(format!(
                "base_url '{}' must start with http:// or https://",
                self.base_url
            )));
        }
        if self.default_timeout_ms == 0 {
            return Err(ResilienceError::Config(
                "default_timeout_ms must be greater than 0".to_string(),
            ));
        }
        self.retry.validate()?;
        self.circuit_breaker.validate()?;
        Ok(())
    }

    /// Parse and validate a config from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)
            .map_err(|e| ResilienceError::Config(format!("Invalid client config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ResilienceError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&contents)
    }

    /// Apply `DEVFLOW_API_BASE_URL` / `DEVFLOW_API_TIMEOUT_MS` overrides and
    /// re-validate.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            self.base_url = url;
        }
        if let Ok(raw) = std::env::var(TIMEOUT_ENV) {
            self.default_timeout_ms = raw.parse().map_err(|_| {
                ResilienceError::Config(format!("{TIMEOUT_ENV} must be an integer, got '{raw}'"))
            })?;
        }
        self.validate()?;
        Ok(self)
    }
}

/// Body posted to the completion endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub question: String,
}

impl CompletionRequest {
    /// Build a request, rejecting empty or over-long questions.
    pub fn new(question: impl Into<String>) -> Result<Self> {
        let question = question.into();
        let chars = question.chars().count();
        if chars == 0 {
            return Err(ResilienceError::Validation("Question is required".to_string()));
        }
        if chars > MAX_QUESTION_CHARS {
            return Err(ResilienceError::Validation(format!(
                "Question is too long ({chars} > {MAX_QUESTION_CHARS} characters)"
            )));
        }
        Ok(Self { question })
    }
}

/// Reply from the completion endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wire name of an [`ErrorKind`](crate::classify::ErrorKind) on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl CompletionReply {
    pub fn failure(error: impl Into<String>, code: Option<String>) -> Self {
        Self {
            success: false,
            reply: None,
            error: Some(error.into()),
            code,
        }
    }
}
