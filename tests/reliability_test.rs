//! Metrics emitted by the retry executor, breaker and error log.

use devflow_resilience::circuit_breaker::CircuitBreakerConfig;
mod common;
use common::mock_support::{FlakyOperation, fast_retry, test_resilience};
use metrics_util::debugging::{DebuggingRecorder, Snapshotter};
use std::sync::OnceLock;

static SNAPSHOTTER: OnceLock<Snapshotter> = OnceLock::new();

fn snapshotter() -> &'static Snapshotter {
    SNAPSHOTTER.get_or_init(|| {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let _ = metrics::set_global_recorder(recorder);
        snapshotter
    })
}

/// True when a metric named `name` carries every `(key, value)` label.
fn has_metric(name: &str, labels: &[(&str, &str)]) -> bool {
    snapshotter()
        .snapshot()
        .into_vec()
        .into_iter()
        .any(|(ckey, _, _, _)| {
            ckey.key().name() == name
                && labels.iter().all(|(k, v)| {
                    ckey.key()
                        .labels()
                        .any(|l| l.key() == *k && l.value() == *v)
                })
        })
}

#[tokio::test]
async fn test_retry_metrics() {
    snapshotter();
    let resilience = test_resilience("http://localhost:3000");
    let op = FlakyOperation::always_failing("Network error");

    let _ = resilience
        .executor()
        .execute_with_retry(|| op.call(), &fast_retry(1), Some("metered"))
        .await;

    assert!(
        has_metric("resilience.retry.attempts", &[("operation", "metered")]),
        "retry attempt counter not found"
    );
    assert!(
        has_metric("resilience.retry.exhausted", &[("operation", "metered")]),
        "retry exhaustion counter not found"
    );
    assert!(
        has_metric("resilience.errors.logged", &[("kind", "API_ERROR")]),
        "error log counter not found"
    );
}

#[tokio::test]
async fn test_breaker_metrics() {
    snapshotter();
    let resilience = test_resilience("http://localhost:3000");
    let op = FlakyOperation::always_failing("HTTP 500");
    let cfg = CircuitBreakerConfig {
        failure_threshold: 1,
        reset_timeout_ms: 60_000,
    };

    for _ in 0..2 {
        let _ = resilience
            .executor()
            .execute_with_circuit_breaker(|| op.call(), "metered_key", Some(&cfg), None)
            .await;
    }

    assert!(
        has_metric(
            "resilience.circuit_breaker.transitions",
            &[("key", "metered_key"), ("state", "OPEN")]
        ),
        "open transition not recorded"
    );
    assert!(
        has_metric("resilience.circuit_breaker.rejected", &[("key", "metered_key")]),
        "rejection not recorded"
    );
}
