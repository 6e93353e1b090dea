//! Retry executor: bounded retries with exponential backoff and jitter, and
//! its composition with the circuit breaker.
//!
//! The combinators nest one way only. [`RetryExecutor::breaker_then_retry`]
//! gates the *whole* retry loop behind a single breaker check, so one run of
//! "retry until success or exhaustion" counts as one breaker outcome.

use crate::api::RetryConfig;
use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use crate::classify::ErrorKind;
use crate::error::{ResilienceError, Result};
use crate::error_log::{ErrorLogStore, LogContext};
use crate::traits::{JitterSource, RandomJitter};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Messages containing any of these are client errors and never retried.
const NON_RETRYABLE_STATUS: [&str; 4] = ["400", "401", "403", "404"];

/// Needles (matched case-insensitively against name and message) that mark
/// an error as transient.
const RETRYABLE_MARKERS: [&str; 13] = [
    "timeout",
    "network",
    "fetch",
    "500",
    "502",
    "503",
    "504",
    "econnrefused",
    "enotfound",
    "etimedout",
    "aborterror",
    "connection_error",
    "service_unavailable",
];

/// Default retry predicate.
///
/// Rejects client errors (`400`, `401`, `403`, `404` in the message) and
/// accepts errors whose name or message mentions a transient failure
/// marker. Everything else is not retried.
pub fn default_retry_condition(error: &ResilienceError, _attempt: u32) -> bool {
    let message = error.to_string();
    if NON_RETRYABLE_STATUS.iter().any(|s| message.contains(s)) {
        return false;
    }
    let message = message.to_lowercase();
    let name = error.name().to_lowercase();
    RETRYABLE_MARKERS
        .iter()
        .any(|m| message.contains(m) || name.contains(m))
}

/// Details of a scheduled retry, handed to the `on_retry` callback.
#[derive(Debug)]
pub struct RetryAttempt<'a> {
    /// 1-based number of the retry about to happen.
    pub attempt_number: u32,
    pub error: &'a ResilienceError,
    pub delay: Duration,
}

/// Decides whether `error` on 0-based `attempt` should be retried.
pub type RetryCondition = Arc<dyn Fn(&ResilienceError, u32) -> bool + Send + Sync>;

/// Observer invoked before each backoff sleep.
pub type OnRetry = Arc<dyn Fn(&RetryAttempt<'_>) + Send + Sync>;

/// Retry configuration plus the optional predicate and observer.
#[derive(Clone, Default)]
pub struct RetryOptions {
    pub config: RetryConfig,
    pub retry_condition: Option<RetryCondition>,
    pub on_retry: Option<OnRetry>,
}

impl RetryOptions {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn with_retry_condition<F>(mut self, f: F) -> Self
    where
        F: Fn(&ResilienceError, u32) -> bool + Send + Sync + 'static,
    {
        self.retry_condition = Some(Arc::new(f));
        self
    }

    pub fn with_on_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(&RetryAttempt<'_>) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(f));
        self
    }

    fn should_retry(&self, error: &ResilienceError, attempt: u32) -> bool {
        match &self.retry_condition {
            Some(condition) => condition(error, attempt),
            None => default_retry_condition(error, attempt),
        }
    }
}

/// Runs operations with retries, optionally behind a keyed circuit breaker.
#[derive(Clone)]
pub struct RetryExecutor {
    log: ErrorLogStore,
    breakers: CircuitBreakerRegistry,
    jitter: Arc<dyn JitterSource>,
}

impl RetryExecutor {
    pub fn new(log: ErrorLogStore, breakers: CircuitBreakerRegistry) -> Self {
        Self {
            log,
            breakers,
            jitter: Arc::new(RandomJitter),
        }
    }

    /// Replace the jitter source (tests use a fixed factor).
    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn error_log(&self) -> &ErrorLogStore {
        &self.log
    }

    /// Delay before retry `attempt` (0-based), jitter included.
    fn delay_for_attempt(&self, config: &RetryConfig, attempt: u32) -> Duration {
        let delay = config.get_backoff(attempt);
        if config.jitter {
            delay.mul_f64(self.jitter.factor())
        } else {
            delay
        }
    }

    /// Run `operation` until it succeeds, the retry budget is spent, or the
    /// retry condition rejects the error.
    ///
    /// Attempts are strictly sequential. On failure the last underlying
    /// error is returned unchanged; exhaustion is visible only in the error
    /// log. Circuit-breaker rejections are never retried.
    pub async fn execute_with_retry<F, Fut, T>(
        &self,
        mut operation: F,
        options: &RetryOptions,
        operation_name: Option<&str>,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let name = operation_name.unwrap_or("operation");
        let max_retries = options.config.max_retries;
        let mut attempt = 0;

        let last_error = loop {
            let error = match operation().await {
                Ok(val) => return Ok(val),
                Err(e) => e,
            };

            if attempt == max_retries
                || error.is_circuit_open()
                || !options.should_retry(&error, attempt)
            {
                break error;
            }

            let delay = self.delay_for_attempt(&options.config, attempt);

            let mut context = LogContext::new();
            context.insert("attempt".into(), json!(attempt + 1));
            context.insert("maxRetries".into(), json!(max_retries + 1));
            context.insert("delay".into(), json!(delay.as_millis() as u64));
            context.insert("operationName".into(), json!(name));
            context.insert("retryAttempt".into(), json!(true));
            self.log.log_error(
                ErrorKind::ApiError,
                format!(
                    "Retrying {name} (attempt {}/{})",
                    attempt + 1,
                    max_retries + 1
                ),
                Some(&error),
                Some(context),
            );
            metrics::counter!("resilience.retry.attempts", "operation" => name.to_string())
                .increment(1);

            if let Some(on_retry) = &options.on_retry {
                on_retry(&RetryAttempt {
                    attempt_number: attempt + 1,
                    error: &error,
                    delay,
                });
            }

            tokio::time::sleep(delay).await;
            attempt += 1;
        };

        let mut context = LogContext::new();
        context.insert("maxRetries".into(), json!(max_retries + 1));
        context.insert("operationName".into(), json!(name));
        context.insert("retryExhausted".into(), json!(true));
        self.log.log_error(
            ErrorKind::ApiError,
            format!("All retry attempts exhausted for {name}"),
            Some(&last_error),
            Some(context),
        );
        metrics::counter!("resilience.retry.exhausted", "operation" => name.to_string())
            .increment(1);

        Err(last_error)
    }

    /// Run `operation` once through the breaker registered under `key`,
    /// creating the breaker with `config` on first use.
    pub async fn execute_with_circuit_breaker<F, Fut, T>(
        &self,
        operation: F,
        key: &str,
        config: Option<&CircuitBreakerConfig>,
        operation_name: Option<&str>,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let breaker = self.breakers.get_or_create(key, config);
        breaker.execute(operation, operation_name).await
    }

    /// Breaker wraps retry: the breaker is consulted once on entry, then the
    /// retry loop runs to completion and its final outcome is recorded as a
    /// single breaker success or failure.
    pub async fn breaker_then_retry<F, Fut, T>(
        &self,
        operation: F,
        key: &str,
        options: &RetryOptions,
        breaker_config: Option<&CircuitBreakerConfig>,
        operation_name: Option<&str>,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.execute_with_circuit_breaker(
            move || self.execute_with_retry(operation, options, operation_name),
            key,
            breaker_config,
            operation_name,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitState;
    use crate::traits::FixedJitter;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn executor() -> RetryExecutor {
        let log = ErrorLogStore::new();
        RetryExecutor::new(log.clone(), CircuitBreakerRegistry::new(log))
            .with_jitter(Arc::new(FixedJitter(1.0)))
    }

    fn fast(max_retries: u32) -> RetryOptions {
        RetryOptions::new(RetryConfig {
            max_retries,
            base_delay_ms: 1,
            max_delay_ms: 5,
            ..Default::default()
        })
    }

    #[test]
    fn default_condition_table() {
        assert!(default_retry_condition(&ResilienceError::other("Network error"), 0));
        assert!(default_retry_condition(&ResilienceError::other("HTTP 503"), 0));
        assert!(default_retry_condition(
            &ResilienceError::named("AbortError", "aborted"),
            0
        ));
        assert!(default_retry_condition(&ResilienceError::other("connect ETIMEDOUT"), 0));
        assert!(!default_retry_condition(&ResilienceError::other("HTTP 404: Not Found"), 0));
        // Client status wins even when a transient marker is present.
        assert!(!default_retry_condition(&ResilienceError::other("fetch failed: 401"), 0));
        assert!(!default_retry_condition(&ResilienceError::other("bad input"), 0));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = executor()
            .execute_with_retry(
                || async {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(ResilienceError::other("Network error"))
                    } else {
                        Ok("ok")
                    }
                },
                &fast(3),
                Some("scenario"),
            )
            .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_invokes_initial_plus_retries() {
        let exec = executor();
        let calls = AtomicU32::new(0);
        let result: Result<()> = exec
            .execute_with_retry(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ResilienceError::other("HTTP 502 from upstream"))
                },
                &fast(2),
                Some("always-failing"),
            )
            .await;
        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "HTTP 502 from upstream");
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let logs = exec.error_log().recent(10);
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[0].message, "Retrying always-failing (attempt 1/3)");
        assert_eq!(logs[1].context.as_ref().unwrap()["attempt"], 2);
        assert_eq!(logs[2].message, "All retry attempts exhausted for always-failing");
        assert_eq!(logs[2].context.as_ref().unwrap()["retryExhausted"], true);
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = executor()
            .execute_with_retry(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ResilienceError::other("HTTP 400: Bad Request"))
                },
                &fast(5),
                None,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn circuit_open_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let options = fast(5).with_retry_condition(|_, _| true);
        let result: Result<()> = executor()
            .execute_with_retry(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ResilienceError::CircuitOpen {
                        operation: "inner".into(),
                    })
                },
                &options,
                None,
            )
            .await;
        assert!(result.unwrap_err().is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn on_retry_sees_attempt_numbers_and_jittered_delays() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let options = RetryOptions::new(RetryConfig {
            max_retries: 3,
            base_delay_ms: 4,
            max_delay_ms: 10,
            backoff_multiplier: 2.0,
            jitter: true,
        })
        .with_on_retry(move |a| {
            sink.lock()
                .unwrap()
                .push((a.attempt_number, a.delay.as_millis() as u64));
        });

        let exec = executor().with_jitter(Arc::new(FixedJitter(0.5)));
        let _: Result<()> = exec
            .execute_with_retry(
                || async { Err(ResilienceError::other("timeout")) },
                &options,
                None,
            )
            .await;

        assert_eq!(*seen.lock().unwrap(), vec![(1, 2), (2, 4), (3, 5)]);
    }

    #[tokio::test]
    async fn custom_condition_receives_zero_based_attempt() {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let sink = attempts.clone();
        let options = fast(5).with_retry_condition(move |_, attempt| {
            sink.lock().unwrap().push(attempt);
            attempt < 1
        });
        let _: Result<()> = executor()
            .execute_with_retry(
                || async { Err(ResilienceError::other("anything")) },
                &options,
                None,
            )
            .await;
        assert_eq!(*attempts.lock().unwrap(), vec![0, 1]);
    }

    #[tokio::test]
    async fn breaker_counts_one_outcome_per_retry_run() {
        let exec = executor();
        let config = CircuitBreakerConfig {
            failure_threshold: 2,
            reset_timeout_ms: 60_000,
        };
        let options = fast(2);
        let calls = AtomicU32::new(0);
        let run = || {
            exec.breaker_then_retry(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(ResilienceError::other("HTTP 503"))
                },
                "svc",
                &options,
                Some(&config),
                Some("svc call"),
            )
        };

        assert!(run().await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let stats = exec.breakers().stats("svc").unwrap();
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.state, CircuitState::Closed);

        assert!(run().await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(exec.breakers().stats("svc").unwrap().state, CircuitState::Open);

        let err = run().await.unwrap_err();
        assert!(err.is_circuit_open());
        assert!(err.to_string().contains("svc call"));
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }
}
