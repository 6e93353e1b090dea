#![allow(dead_code)]

use devflow_resilience::api::{ClientConfig, RetryConfig};
use devflow_resilience::error::{ResilienceError, Result};
use devflow_resilience::retry::RetryOptions;
use devflow_resilience::runtime::Resilience;
use devflow_resilience::traits::{FixedJitter, StorageArea, StorageError};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Operation that fails a fixed number of times before succeeding, and
/// counts every invocation.
#[derive(Clone)]
pub struct FlakyOperation {
    calls: Arc<AtomicU32>,
    failures: u32,
    message: String,
}

impl FlakyOperation {
    pub fn new(failures: u32, message: &str) -> Self {
        Self {
            calls: Arc::new(AtomicU32::new(0)),
            failures,
            message: message.to_string(),
        }
    }

    pub fn always_failing(message: &str) -> Self {
        Self::new(u32::MAX, message)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn call(&self) -> impl Future<Output = Result<&'static str>> + use<> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let fail = n < self.failures;
        let message = self.message.clone();
        async move {
            if fail {
                Err(ResilienceError::other(message))
            } else {
                Ok("ok")
            }
        }
    }
}

/// Retry options with millisecond delays and no jitter.
pub fn fast_retry(max_retries: u32) -> RetryOptions {
    RetryOptions::new(fast_retry_config(max_retries))
}

pub fn fast_retry_config(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        base_delay_ms: 1,
        max_delay_ms: 5,
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

/// A resilience layer pointed at `base_url` with fast, deterministic retries.
pub fn test_resilience(base_url: &str) -> Resilience {
    Resilience::builder()
        .config(ClientConfig {
            base_url: base_url.to_string(),
            default_timeout_ms: 2_000,
            retry: fast_retry_config(2),
            ..Default::default()
        })
        .jitter(Arc::new(FixedJitter(1.0)))
        .build()
        .expect("valid test config")
}

/// Storage area whose every operation fails, like a browser with storage
/// disabled.
pub struct BrokenStorage;

impl StorageArea for BrokenStorage {
    fn name(&self) -> &str {
        "brokenStorage"
    }

    fn set_item(&self, _key: &str, _value: &str) -> std::result::Result<(), StorageError> {
        Err(StorageError("SecurityError: storage is disabled".to_string()))
    }

    fn remove_item(&self, _key: &str) -> std::result::Result<(), StorageError> {
        Err(StorageError("SecurityError: storage is disabled".to_string()))
    }

    fn keys(&self) -> std::result::Result<Vec<String>, StorageError> {
        Err(StorageError("SecurityError: storage is disabled".to_string()))
    }
}
