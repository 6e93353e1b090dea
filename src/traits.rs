//! Seams to the layer's external collaborators: key/value storage for the
//! editor, the randomness used for jitter, and the completion provider.

use crate::api::CompletionReply;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Failure raised by a [`StorageArea`] write.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct StorageError(pub String);

/// A string key/value storage area (a browser's local or session storage,
/// or anything with the same shape).
pub trait StorageArea: Send + Sync {
    /// Human-readable name used in logs (e.g. `"localStorage"`).
    fn name(&self) -> &str;

    fn set_item(&self, key: &str, value: &str) -> std::result::Result<(), StorageError>;

    fn remove_item(&self, key: &str) -> std::result::Result<(), StorageError>;

    fn keys(&self) -> std::result::Result<Vec<String>, StorageError>;
}

/// In-memory [`StorageArea`] with an optional byte quota.
///
/// Writes that would push the total size (keys plus values) above the quota
/// fail with a `QuotaExceededError`-style message.
pub struct MemoryStorage {
    name: String,
    quota_bytes: Option<usize>,
    items: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quota_bytes: None,
            items: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_quota(mut self, quota_bytes: usize) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    pub fn get_item(&self, key: &str) -> Option<String> {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StorageArea for MemoryStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_item(&self, key: &str, value: &str) -> std::result::Result<(), StorageError> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(quota) = self.quota_bytes {
            let used: usize = items
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if used + key.len() + value.len() > quota {
                return Err(StorageError(format!(
                    "QuotaExceededError: {} quota of {} bytes exceeded",
                    self.name, quota
                )));
            }
        }
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> std::result::Result<(), StorageError> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.remove(key);
        Ok(())
    }

    fn keys(&self) -> std::result::Result<Vec<String>, StorageError> {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        Ok(items.keys().cloned().collect())
    }
}

/// Source of the jitter multiplier applied to retry delays.
pub trait JitterSource: Send + Sync {
    /// Return a factor in `[0.5, 1.0]`.
    fn factor(&self) -> f64;
}

/// Uniform random jitter in `[0.5, 1.0]` from the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn factor(&self) -> f64 {
        0.5 + rand::random::<f64>() * 0.5
    }
}

/// Constant jitter factor, clamped into `[0.5, 1.0]`. Useful in tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn factor(&self) -> f64 {
        self.0.clamp(0.5, 1.0)
    }
}

/// The external text-completion service used to draft answers.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Ask for a drafted answer to `question`.
    ///
    /// Transport failures are reported through the reply's `success` and
    /// `error` fields; `Err` is reserved for failures detected before any
    /// request is sent (such as an empty question).
    async fn generate_answer(&self, question: &str) -> Result<CompletionReply>;
}
