//! Bounded in-memory store of structured error records, read by the
//! operational dashboard.
//!
//! The store is a cheap-to-clone handle over a shared ring buffer. The
//! composition root creates one and hands clones to every component that
//! logs.

use crate::classify::ErrorKind;
use crate::error::ResilienceError;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

/// Number of records kept before the oldest are evicted.
pub const DEFAULT_CAPACITY: usize = 100;

/// Structured context attached to a record.
pub type LogContext = Map<String, Value>;

/// One logged failure.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorLogRecord {
    pub timestamp: SystemTime,
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<LogContext>,
}

/// Request/response details attached to API failures.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApiErrorDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_data: Option<Value>,
}

/// Console level a kind is traced at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
}

impl LogLevel {
    pub fn for_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::QuotaExceeded
            | ErrorKind::CorsError
            | ErrorKind::ApiError
            | ErrorKind::UnknownError => Self::Error,
            ErrorKind::NetworkError
            | ErrorKind::ValidationError
            | ErrorKind::EditorQuotaExceeded
            | ErrorKind::EditorInitError => Self::Warn,
            _ => Self::Info,
        }
    }
}

struct Inner {
    records: VecDeque<ErrorLogRecord>,
    capacity: usize,
}

/// Shared FIFO ring buffer of [`ErrorLogRecord`]s.
#[derive(Clone)]
pub struct ErrorLogStore {
    inner: Arc<Mutex<Inner>>,
}

impl Default for ErrorLogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorLogStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a store holding at most `capacity` records (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                records: VecDeque::with_capacity(capacity),
                capacity,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a record, evict the oldest if over capacity, and trace it at
    /// the kind's level.
    pub fn log_error(
        &self,
        kind: ErrorKind,
        message: impl Into<String>,
        error: Option<&ResilienceError>,
        context: Option<LogContext>,
    ) {
        let record = ErrorLogRecord {
            timestamp: SystemTime::now(),
            kind,
            message: message.into(),
            stack_trace: error.map(|e| format!("{}: {}", e.name(), e)),
            context,
        };

        match LogLevel::for_kind(kind) {
            LogLevel::Error => tracing::error!(
                kind = %record.kind,
                context = ?record.context,
                cause = ?record.stack_trace,
                "[{}] {}", record.kind, record.message
            ),
            LogLevel::Warn => tracing::warn!(
                kind = %record.kind,
                context = ?record.context,
                cause = ?record.stack_trace,
                "[{}] {}", record.kind, record.message
            ),
            LogLevel::Info => tracing::info!(
                kind = %record.kind,
                context = ?record.context,
                cause = ?record.stack_trace,
                "[{}] {}", record.kind, record.message
            ),
        }

        metrics::counter!("resilience.errors.logged", "kind" => kind.as_str()).increment(1);

        let mut inner = self.lock();
        inner.records.push_back(record);
        while inner.records.len() > inner.capacity {
            inner.records.pop_front();
        }
    }

    /// Log an API failure with request/response details under `"api"`.
    pub fn log_api_error(
        &self,
        message: impl Into<String>,
        error: &ResilienceError,
        details: ApiErrorDetails,
    ) {
        let mut context = LogContext::new();
        context.insert("api".to_string(), json!(details));
        self.log_error(ErrorKind::ApiError, message, Some(error), Some(context));
    }

    /// Log a cross-origin rejection under `"cors"`.
    pub fn log_cors_error(
        &self,
        message: impl Into<String>,
        url: &str,
        method: &str,
        error: Option<&ResilienceError>,
    ) {
        let mut context = LogContext::new();
        context.insert("cors".to_string(), json!({ "url": url, "method": method }));
        self.log_error(ErrorKind::CorsError, message, error, Some(context));
    }

    /// Log a rich-editor failure with its configuration under `"editor"`.
    pub fn log_editor_error(
        &self,
        message: impl Into<String>,
        error: Option<&ResilienceError>,
        editor_config: Option<Value>,
    ) {
        let mut context = LogContext::new();
        context.insert(
            "editor".to_string(),
            json!({ "config": editor_config.unwrap_or(Value::Null) }),
        );
        self.log_error(ErrorKind::EditorInitError, message, error, Some(context));
    }

    /// Log a storage-quota failure for the named storage area.
    pub fn log_quota_error(
        &self,
        message: impl Into<String>,
        storage_area: &str,
        error: Option<&ResilienceError>,
    ) {
        let mut context = LogContext::new();
        context.insert("storage".to_string(), json!({ "type": storage_area }));
        self.log_error(ErrorKind::QuotaExceeded, message, error, Some(context));
    }

    /// The `count` most recent records, oldest first.
    pub fn recent(&self, count: usize) -> Vec<ErrorLogRecord> {
        let inner = self.lock();
        let skip = inner.records.len().saturating_sub(count);
        inner.records.iter().skip(skip).cloned().collect()
    }

    /// All records of one kind, oldest first.
    pub fn logs_by_kind(&self, kind: ErrorKind) -> Vec<ErrorLogRecord> {
        let inner = self.lock();
        inner
            .records
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }

    /// Record count per kind. Every kind is present, zero when unseen.
    pub fn stats(&self) -> BTreeMap<ErrorKind, usize> {
        let mut stats: BTreeMap<ErrorKind, usize> =
            ErrorKind::ALL.into_iter().map(|k| (k, 0)).collect();
        let inner = self.lock();
        for record in &inner.records {
            *stats.entry(record.kind).or_default() += 1;
        }
        stats
    }

    pub fn clear(&self) {
        self.lock().records.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }
}
