//! Decides whether the rich editor can be mounted or the plain-text
//! fallback should be shown instead.
//!
//! The machine has two states, normal and degraded (`use_fallback`). It
//! degrades when a storage probe fails or the rich editor reports an error,
//! and only returns to normal through [`EditorFallback::reset_fallback`].

use crate::error::ResilienceError;
use crate::error_log::ErrorLogStore;
use crate::traits::{StorageArea, StorageError};
use serde::Serialize;
use std::sync::Arc;

/// Editor errors tolerated before retrying the rich editor is disallowed.
pub const MAX_RETRY_ATTEMPTS: u32 = 2;

/// Key written and removed by the storage probe.
pub const QUOTA_TEST_KEY: &str = "tinymce-quota-test";

const QUOTA_TEST_BYTES: usize = 1024;

/// Substrings marking a storage key as cached editor state.
const EDITOR_KEY_MARKERS: [&str; 3] = ["tinymce", "mce", "draft"];

pub const STORAGE_QUOTA_MESSAGE: &str = "Storage quota exceeded - using fallback editor";
pub const LOAD_FAILED_MESSAGE: &str = "Failed to load the rich editor - using fallback editor";
pub const INIT_FAILED_MESSAGE: &str = "Rich editor initialization failed - using fallback editor";
pub const GENERIC_MESSAGE: &str = "Rich editor encountered an error";

/// Snapshot of the fallback decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditorFallbackState {
    pub use_fallback: bool,
    pub error: Option<String>,
    pub is_storage_available: bool,
    pub retry_count: u32,
}

impl Default for EditorFallbackState {
    fn default() -> Self {
        Self {
            use_fallback: false,
            error: None,
            is_storage_available: true,
            retry_count: 0,
        }
    }
}

/// Map a raw editor error message onto the user-facing explanation.
pub fn describe_editor_error(raw: &str) -> &'static str {
    let message = raw.to_lowercase();
    if message.contains("quota") || message.contains("storage") {
        STORAGE_QUOTA_MESSAGE
    } else if message.contains("network") || message.contains("load") {
        LOAD_FAILED_MESSAGE
    } else if message.contains("initialization") || message.contains("init") {
        INIT_FAILED_MESSAGE
    } else {
        GENERIC_MESSAGE
    }
}

/// Editor fallback state machine for one editing session.
pub struct EditorFallback {
    local: Arc<dyn StorageArea>,
    session: Arc<dyn StorageArea>,
    log: Option<ErrorLogStore>,
    state: EditorFallbackState,
}

impl EditorFallback {
    pub fn new(local: Arc<dyn StorageArea>, session: Arc<dyn StorageArea>) -> Self {
        Self {
            local,
            session,
            log: None,
            state: EditorFallbackState::default(),
        }
    }

    /// Record editor and quota failures in `log`.
    pub fn with_error_log(mut self, log: ErrorLogStore) -> Self {
        self.log = Some(log);
        self
    }

    pub fn state(&self) -> &EditorFallbackState {
        &self.state
    }

    pub fn use_fallback(&self) -> bool {
        self.state.use_fallback
    }

    /// The rich editor may be retried while fewer than
    /// [`MAX_RETRY_ATTEMPTS`] errors were seen and storage is usable.
    pub fn can_retry(&self) -> bool {
        self.state.retry_count < MAX_RETRY_ATTEMPTS && self.state.is_storage_available
    }

    /// Probe both storage areas and degrade if either is unusable, then
    /// purge cached editor state. Call once when the editor is mounted.
    pub fn initialize(&mut self) {
        if !self.check_storage_quota() {
            self.state.use_fallback = true;
            self.state.error = Some(STORAGE_QUOTA_MESSAGE.to_string());
            self.state.is_storage_available = false;
        }
        self.clear_editor_storage();
    }

    /// Write and remove a 1 KiB value in both storage areas. Any failure
    /// means storage is unavailable.
    pub fn check_storage_quota(&self) -> bool {
        let payload = "x".repeat(QUOTA_TEST_BYTES);
        for area in [&self.local, &self.session] {
            if let Err(e) = probe(area.as_ref(), &payload) {
                tracing::warn!(storage = %area.name(), error = %e, "Storage quota check failed");
                if let Some(log) = &self.log {
                    log.log_quota_error(
                        format!("Storage quota check failed for {}", area.name()),
                        area.name(),
                        Some(&ResilienceError::named("QuotaExceededError", e.to_string())),
                    );
                }
                return false;
            }
        }
        true
    }

    /// React to an error reported by the rich editor: switch to the
    /// fallback, re-probe storage, count the error, and purge cached
    /// editor state.
    pub fn handle_editor_error(&mut self, raw_message: &str) {
        tracing::error!(error = %raw_message, "Rich editor error detected");
        let message = describe_editor_error(raw_message);

        if let Some(log) = &self.log {
            log.log_editor_error(
                message,
                Some(&ResilienceError::named("EditorError", raw_message)),
                None,
            );
        }

        self.state.use_fallback = true;
        self.state.error = Some(message.to_string());
        self.state.is_storage_available = self.check_storage_quota();
        self.state.retry_count += 1;

        self.clear_editor_storage();
    }

    /// Remove every key containing `tinymce`, `mce` or `draft` from both
    /// storage areas. Best effort: failures are traced and reported as
    /// `false`.
    pub fn clear_editor_storage(&self) -> bool {
        let result = purge(self.local.as_ref()).and_then(|_| purge(self.session.as_ref()));
        match result {
            Ok(removed) => {
                tracing::debug!(removed, "Editor storage cleared");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to clear editor storage");
                false
            }
        }
    }

    /// Return to the rich editor. Storage availability is kept as last
    /// probed.
    pub fn reset_fallback(&mut self) {
        self.state.use_fallback = false;
        self.state.error = None;
        self.state.retry_count = 0;
    }
}

fn probe(area: &dyn StorageArea, payload: &str) -> Result<(), StorageError> {
    area.set_item(QUOTA_TEST_KEY, payload)?;
    area.remove_item(QUOTA_TEST_KEY)
}

fn purge(area: &dyn StorageArea) -> Result<usize, StorageError> {
    let doomed: Vec<String> = area
        .keys()?
        .into_iter()
        .filter(|k| EDITOR_KEY_MARKERS.iter().any(|m| k.contains(m)))
        .collect();
    for key in &doomed {
        area.remove_item(key)?;
    }
    Ok(doomed.len())
}
