//! Read-side view over a keyed circuit breaker, and the banner model a
//! presentation layer renders for a failed call.

use crate::circuit_breaker::{CircuitBreakerRegistry, CircuitBreakerStats, CircuitState};
use crate::classify::{Severity, UserFacingError, format_for_user};
use crate::error::ResilienceError;
use serde::Serialize;
use std::collections::BTreeMap;

/// Breaker status for one operation key.
#[derive(Clone)]
pub struct RetryStatus {
    registry: CircuitBreakerRegistry,
    key: String,
}

impl RetryStatus {
    pub fn for_key(registry: &CircuitBreakerRegistry, key: impl Into<String>) -> Self {
        Self {
            registry: registry.clone(),
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current stats, or `None` when no call has used the key yet.
    pub fn stats(&self) -> Option<CircuitBreakerStats> {
        self.registry.stats(&self.key)
    }

    fn state(&self) -> Option<CircuitState> {
        self.stats().map(|s| s.state)
    }

    pub fn is_open(&self) -> bool {
        self.state() == Some(CircuitState::Open)
    }

    pub fn is_half_open(&self) -> bool {
        self.state() == Some(CircuitState::HalfOpen)
    }

    pub fn can_retry(&self) -> bool {
        !self.is_open()
    }

    pub fn reset(&self) {
        self.registry.reset(&self.key);
    }

    pub fn formatted_error(&self, error: &ResilienceError) -> UserFacingError {
        format_for_user(error, None)
    }

    pub fn all_stats(&self) -> BTreeMap<String, CircuitBreakerStats> {
        self.registry.all_stats()
    }
}

/// A dismissible error banner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBanner {
    pub title: String,
    pub message: String,
    pub actionable: Option<String>,
    pub severity: Severity,
    pub circuit_open: bool,
    /// Whether a "Try Again" control is offered.
    pub show_retry: bool,
}

impl ErrorBanner {
    /// Build the banner for `error`, hiding "Try Again" while the breaker
    /// behind `status` is open.
    pub fn new(error: &ResilienceError, context: Option<&str>, status: Option<&RetryStatus>) -> Self {
        let formatted = format_for_user(error, context);
        let circuit_open = status.is_some_and(RetryStatus::is_open);
        Self {
            title: formatted.title,
            message: formatted.message,
            actionable: formatted.actionable,
            severity: formatted.severity,
            circuit_open,
            show_retry: formatted.can_retry && !circuit_open,
        }
    }
}
