//! Per-operation circuit breaker and the keyed registry that owns them.

use crate::classify::ErrorKind;
use crate::error::{ResilienceError, Result};
use crate::error_log::{ErrorLogStore, LogContext};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

/// Consecutive half-open successes required to close the breaker again.
pub const HALF_OPEN_SUCCESS_THRESHOLD: u32 = 3;

/// Breaker state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tunable parameters for the circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// Milliseconds to wait in the open state before allowing a probe call.
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(ResilienceError::Config(
                "Circuit breaker failure_threshold must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Read-only snapshot for observability surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_time: Option<SystemTime>,
    pub success_count: u32,
}

struct Inner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    last_failure: Option<Instant>,
    last_failure_wall: Option<SystemTime>,
    config: CircuitBreakerConfig,
}

/// Thread-safe circuit breaker.
///
/// State transitions: **Closed** -> (failures >= threshold) -> **Open** ->
/// (reset timeout elapsed) -> **HalfOpen** -> (3 successes) -> **Closed**.
/// Any failure while half-open reopens the breaker.
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<Mutex<Inner>>,
    key: Arc<str>,
    log: Option<ErrorLogStore>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                last_failure: None,
                last_failure_wall: None,
                config,
            })),
            key: Arc::from("anonymous"),
            log: None,
        }
    }

    /// Label metrics with the registry key `key`.
    pub fn with_key(mut self, key: &str) -> Self {
        self.key = Arc::from(key);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Record breaker openings in `log`.
    pub fn with_error_log(mut self, log: ErrorLogStore) -> Self {
        self.log = Some(log);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Execute `f` through the circuit breaker.
    ///
    /// Returns [`ResilienceError::CircuitOpen`] without invoking `f` while the
    /// breaker is open and the reset timeout has not elapsed.
    pub async fn execute<F, Fut, T>(&self, f: F, operation_name: Option<&str>) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let name = operation_name.unwrap_or("operation");

        // 1. Check state
        {
            let mut inner = self.lock();
            if inner.state == CircuitState::Open {
                let elapsed = inner.last_failure.map(|t| t.elapsed()).unwrap_or(Duration::MAX);
                if elapsed > inner.config.reset_timeout() {
                    inner.state = CircuitState::HalfOpen;
                    inner.successes = 0;
                    tracing::info!(operation = %name, "Circuit breaker half-open, allowing probe");
                    metrics::counter!(
                        "resilience.circuit_breaker.transitions",
                        "key" => self.key.to_string(),
                        "state" => CircuitState::HalfOpen.as_str()
                    )
                    .increment(1);
                } else {
                    metrics::counter!(
                        "resilience.circuit_breaker.rejected",
                        "key" => self.key.to_string()
                    )
                    .increment(1);
                    return Err(ResilienceError::CircuitOpen {
                        operation: name.to_string(),
                    });
                }
            }
        }

        // 2. Execute
        let result = f().await;

        // 3. Update state
        match result {
            Ok(val) => {
                self.on_success(name);
                Ok(val)
            }
            Err(e) => {
                self.on_failure(&e, name);
                Err(e)
            }
        }
    }

    fn on_success(&self, name: &str) {
        let mut inner = self.lock();
        inner.failures = 0;
        if inner.state == CircuitState::HalfOpen {
            inner.successes += 1;
            if inner.successes >= HALF_OPEN_SUCCESS_THRESHOLD {
                inner.state = CircuitState::Closed;
                tracing::info!(operation = %name, "Circuit breaker closed");
                metrics::counter!(
                    "resilience.circuit_breaker.transitions",
                    "key" => self.key.to_string(),
                    "state" => CircuitState::Closed.as_str()
                )
                .increment(1);
            }
        }
    }

    fn on_failure(&self, error: &ResilienceError, name: &str) {
        let opened = {
            let mut inner = self.lock();
            inner.failures += 1;
            inner.last_failure = Some(Instant::now());
            inner.last_failure_wall = Some(SystemTime::now());

            let should_open = match inner.state {
                CircuitState::HalfOpen => true,
                CircuitState::Closed => inner.failures >= inner.config.failure_threshold,
                CircuitState::Open => false,
            };
            if should_open {
                inner.state = CircuitState::Open;
                Some((inner.failures, inner.config.clone()))
            } else {
                None
            }
        };

        let Some((failures, config)) = opened else {
            return;
        };

        metrics::counter!(
            "resilience.circuit_breaker.transitions",
            "key" => self.key.to_string(),
            "state" => CircuitState::Open.as_str()
        )
        .increment(1);

        if let Some(log) = &self.log {
            let mut context = LogContext::new();
            context.insert("failureThreshold".into(), json!(config.failure_threshold));
            context.insert("resetTimeout".into(), json!(config.reset_timeout_ms));
            context.insert("operationName".into(), json!(name));
            context.insert("circuitBreakerState".into(), json!(CircuitState::Open));
            log.log_error(
                ErrorKind::ApiError,
                format!("Circuit breaker opened for {name} after {failures} failures"),
                Some(error),
                Some(context),
            );
        } else {
            tracing::error!(operation = %name, failures, "Circuit breaker opened");
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.lock();
        CircuitBreakerStats {
            state: inner.state,
            failure_count: inner.failures,
            last_failure_time: inner.last_failure_wall,
            success_count: inner.successes,
        }
    }

    /// Force the breaker closed with zeroed counters.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.successes = 0;
        inner.last_failure = None;
        inner.last_failure_wall = None;
    }
}

/// Lazily-populated map from operation key to [`CircuitBreaker`].
///
/// Breakers live as long as the registry; configuration passed on later
/// lookups of an existing key is ignored.
#[derive(Clone, Default)]
pub struct CircuitBreakerRegistry {
    breakers: Arc<Mutex<HashMap<String, CircuitBreaker>>>,
    log: Option<ErrorLogStore>,
}

impl CircuitBreakerRegistry {
    pub fn new(log: ErrorLogStore) -> Self {
        Self {
            breakers: Arc::default(),
            log: Some(log),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CircuitBreaker>> {
        self.breakers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return the breaker for `key`, creating it with `config` (or the
    /// default) on first use.
    pub fn get_or_create(
        &self,
        key: &str,
        config: Option<&CircuitBreakerConfig>,
    ) -> CircuitBreaker {
        let mut breakers = self.lock();
        breakers
            .entry(key.to_string())
            .or_insert_with(|| {
                let breaker =
                    CircuitBreaker::new(config.cloned().unwrap_or_default()).with_key(key);
                match &self.log {
                    Some(log) => breaker.with_error_log(log.clone()),
                    None => breaker,
                }
            })
            .clone()
    }

    pub fn get(&self, key: &str) -> Option<CircuitBreaker> {
        self.lock().get(key).cloned()
    }

    pub fn stats(&self, key: &str) -> Option<CircuitBreakerStats> {
        self.get(key).map(|b| b.stats())
    }

    /// Reset the breaker for `key`, if one exists.
    pub fn reset(&self, key: &str) {
        if let Some(breaker) = self.get(key) {
            breaker.reset();
        }
    }

    pub fn all_stats(&self) -> BTreeMap<String, CircuitBreakerStats> {
        self.lock()
            .iter()
            .map(|(k, b)| (k.clone(), b.stats()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
