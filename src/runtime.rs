//! Composition root: builds the shared error log and breaker registry once
//! and hands clones of them to every component.

use crate::api::ClientConfig;
#[cfg(feature = "http")]
use crate::api_client::ApiClient;
use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::editor_fallback::EditorFallback;
use crate::error::Result;
use crate::error_log::{DEFAULT_CAPACITY, ErrorLogStore};
#[cfg(feature = "http")]
use crate::fetch::TrackedFetch;
use crate::retry::RetryExecutor;
use crate::retry_status::RetryStatus;
use crate::traits::{JitterSource, RandomJitter, StorageArea};
use std::sync::Arc;

/// The resilience layer for one application instance.
///
/// Obtain one via [`Resilience::builder()`]. Every handle returned by the
/// accessors shares the same error log and breaker registry, so a breaker
/// opened through the API client is visible to [`RetryStatus`] and the
/// dashboard stats.
#[derive(Clone)]
pub struct Resilience {
    config: ClientConfig,
    log: ErrorLogStore,
    breakers: CircuitBreakerRegistry,
    executor: RetryExecutor,
    #[cfg(feature = "http")]
    fetch: TrackedFetch,
    #[cfg(feature = "http")]
    client: ApiClient,
}

impl Resilience {
    pub fn builder() -> ResilienceBuilder {
        ResilienceBuilder::default()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn error_log(&self) -> &ErrorLogStore {
        &self.log
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }

    #[cfg(feature = "http")]
    pub fn fetch(&self) -> &TrackedFetch {
        &self.fetch
    }

    #[cfg(feature = "http")]
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Breaker status view for `key`.
    pub fn retry_status(&self, key: &str) -> RetryStatus {
        RetryStatus::for_key(&self.breakers, key)
    }

    /// A fresh editor fallback state machine logging into the shared store.
    pub fn editor_fallback(
        &self,
        local: Arc<dyn StorageArea>,
        session: Arc<dyn StorageArea>,
    ) -> EditorFallback {
        EditorFallback::new(local, session).with_error_log(self.log.clone())
    }
}

/// Builder for [`Resilience`].
pub struct ResilienceBuilder {
    config: ClientConfig,
    jitter: Arc<dyn JitterSource>,
    log_capacity: usize,
    #[cfg(feature = "http")]
    http_client: Option<reqwest::Client>,
}

impl Default for ResilienceBuilder {
    fn default() -> Self {
        Self {
            config: ClientConfig::default(),
            jitter: Arc::new(RandomJitter),
            log_capacity: DEFAULT_CAPACITY,
            #[cfg(feature = "http")]
            http_client: None,
        }
    }
}

impl ResilienceBuilder {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the jitter source used by the retry executor.
    pub fn jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    /// Use a preconfigured `reqwest` client (proxies, TLS roots, ...).
    #[cfg(feature = "http")]
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Validate the configuration and wire the components together.
    pub fn build(self) -> Result<Resilience> {
        self.config.validate()?;

        let log = ErrorLogStore::with_capacity(self.log_capacity);
        let breakers = CircuitBreakerRegistry::new(log.clone());
        let executor = RetryExecutor::new(log.clone(), breakers.clone()).with_jitter(self.jitter);

        #[cfg(feature = "http")]
        let fetch = TrackedFetch::with_client(
            self.http_client.unwrap_or_default(),
            executor.clone(),
        );
        #[cfg(feature = "http")]
        let client = ApiClient::new(self.config.clone(), fetch.clone());

        tracing::debug!(
            base_url = %self.config.base_url,
            log_capacity = log.capacity(),
            "Resilience layer initialised"
        );

        Ok(Resilience {
            config: self.config,
            log,
            breakers,
            executor,
            #[cfg(feature = "http")]
            fetch,
            #[cfg(feature = "http")]
            client,
        })
    }
}
