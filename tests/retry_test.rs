//! Retry executor behaviour through the public API.

use devflow_resilience::circuit_breaker::{CircuitBreakerConfig, CircuitState};
use devflow_resilience::classify::ErrorKind;
use devflow_resilience::error::ResilienceError;
use devflow_resilience::retry::default_retry_condition;
mod common;
use common::mock_support::{FlakyOperation, fast_retry, test_resilience};
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn test_network_error_recovers_on_third_attempt() {
    let resilience = test_resilience("http://localhost:3000");
    let op = FlakyOperation::new(2, "Network error");

    let mut options = fast_retry(3);
    options.config.base_delay_ms = 10;
    options.config.max_delay_ms = 100;

    let value = resilience
        .executor()
        .execute_with_retry(|| op.call(), &options, Some("flaky"))
        .await
        .unwrap();

    assert_eq!(value, "ok");
    assert_eq!(op.calls(), 3);
}

#[tokio::test]
async fn test_exhaustion_invokes_one_plus_max_retries() {
    let resilience = test_resilience("http://localhost:3000");
    let op = FlakyOperation::always_failing("HTTP 503: Service Unavailable");

    let err = resilience
        .executor()
        .execute_with_retry(|| op.call(), &fast_retry(2), Some("always down"))
        .await
        .unwrap_err();

    assert_eq!(op.calls(), 3);
    // The caller sees the last underlying error, unchanged.
    assert_eq!(err.to_string(), "HTTP 503: Service Unavailable");
    assert_eq!(err.name(), "Error");

    let logs = resilience.error_log().logs_by_kind(ErrorKind::ApiError);
    let messages: Vec<_> = logs.iter().map(|r| r.message.as_str()).collect();
    assert_eq!(
        messages,
        vec![
            "Retrying always down (attempt 1/3)",
            "Retrying always down (attempt 2/3)",
            "All retry attempts exhausted for always down",
        ]
    );
    let ctx = logs[1].context.as_ref().unwrap();
    assert_eq!(ctx["operationName"], "always down");
    assert_eq!(ctx["maxRetries"], 3);
    assert!(ctx.contains_key("delay"));
}

#[tokio::test]
async fn test_client_error_invoked_once() {
    let resilience = test_resilience("http://localhost:3000");
    let op = FlakyOperation::always_failing("Request failed with 400");

    let result = resilience
        .executor()
        .execute_with_retry(|| op.call(), &fast_retry(10), None)
        .await;

    assert!(result.is_err());
    assert_eq!(op.calls(), 1);
}

#[tokio::test]
async fn test_unrecognised_error_not_retried_by_default() {
    let resilience = test_resilience("http://localhost:3000");
    let op = FlakyOperation::always_failing("division by zero");

    let _ = resilience
        .executor()
        .execute_with_retry(|| op.call(), &fast_retry(3), None)
        .await;

    assert_eq!(op.calls(), 1);
}

#[tokio::test]
async fn test_on_retry_receives_one_based_attempts() {
    let resilience = test_resilience("http://localhost:3000");
    let op = FlakyOperation::new(2, "fetch failed");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    let options = fast_retry(5).with_on_retry(move |attempt| {
        sink.lock()
            .unwrap()
            .push((attempt.attempt_number, attempt.error.to_string()));
    });

    resilience
        .executor()
        .execute_with_retry(|| op.call(), &options, None)
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(
        *seen,
        vec![(1, "fetch failed".to_string()), (2, "fetch failed".to_string())]
    );
}

#[tokio::test]
async fn test_breaker_wraps_whole_retry_run() {
    let resilience = test_resilience("http://localhost:3000");
    let op = FlakyOperation::always_failing("HTTP 502 Bad Gateway");
    let config = CircuitBreakerConfig {
        failure_threshold: 1,
        reset_timeout_ms: 60_000,
    };

    let first = resilience
        .executor()
        .breaker_then_retry(|| op.call(), "gateway", &fast_retry(2), Some(&config), None)
        .await;
    assert!(first.is_err());
    assert_eq!(op.calls(), 3);
    assert_eq!(
        resilience.breakers().stats("gateway").unwrap().state,
        CircuitState::Open
    );

    let second = resilience
        .executor()
        .breaker_then_retry(|| op.call(), "gateway", &fast_retry(2), Some(&config), None)
        .await
        .unwrap_err();
    assert!(second.is_circuit_open());
    assert_eq!(op.calls(), 3);
}

#[test]
fn test_default_condition_matches_names_too() {
    let aborted = ResilienceError::named("AbortError", "The user aborted a request.");
    assert!(default_retry_condition(&aborted, 0));
    assert!(aborted.is_retryable());

    let refused = ResilienceError::other("connect ECONNREFUSED 127.0.0.1:3000");
    assert!(refused.is_retryable());

    let forbidden = ResilienceError::other("network request returned 403");
    assert!(!forbidden.is_retryable());

    let open = ResilienceError::CircuitOpen {
        operation: "x".into(),
    };
    assert!(!open.is_retryable());
}
