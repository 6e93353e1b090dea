//! Base-URL API client layered on [`TrackedFetch`], and the completion
//! provider call used to draft answers.

use crate::api::{ClientConfig, CompletionReply, CompletionRequest, FetchConfig, RetryConfig};
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::classify::{classify_message, classify_response};
use crate::error::{ResilienceError, Result};
use crate::fetch::{FetchRequest, FetchResponse, TrackedFetch, sanitize_key};
use crate::traits::CompletionProvider;
use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;

/// Path of the answer-drafting endpoint, relative to the base URL.
pub const COMPLETION_ENDPOINT: &str = "/api/chatgpt";

/// Breaker key shared by every completion call.
pub const COMPLETION_BREAKER_KEY: &str = "completion_api";

const COMPLETION_TIMEOUT_MS: u64 = 30_000;

/// One call through [`ApiClient`]. Unset fields fall back to the client's
/// configured defaults.
#[derive(Debug, Clone, Default)]
pub struct ApiRequest {
    pub endpoint: String,
    /// JSON body; sent only for `POST`, `PUT` and `PATCH`.
    pub data: Option<Value>,
    pub params: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub timeout_ms: Option<u64>,
    pub retries: Option<u32>,
    pub circuit_breaker_key: Option<String>,
    pub retry: Option<RetryConfig>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl ApiRequest {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// HTTP client bound to a base URL with default headers, timeouts, and
/// retry/breaker settings.
#[derive(Clone)]
pub struct ApiClient {
    config: ClientConfig,
    fetch: TrackedFetch,
}

impl ApiClient {
    pub fn new(config: ClientConfig, fetch: TrackedFetch) -> Self {
        Self { config, fetch }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn tracked_fetch(&self) -> &TrackedFetch {
        &self.fetch
    }

    /// `api_{method}_{endpoint}` with the endpoint sanitized.
    pub fn breaker_key(method: &str, endpoint: &str) -> String {
        format!("api_{}_{}", method.to_lowercase(), sanitize_key(endpoint))
    }

    /// Resolve `endpoint` against the base URL and append `params`.
    pub fn build_url(&self, endpoint: &str, params: &BTreeMap<String, String>) -> Result<Url> {
        let base = Url::parse(&self.config.base_url).map_err(|e| {
            ResilienceError::Config(format!("Invalid base_url '{}': {e}", self.config.base_url))
        })?;
        let mut url = base.join(endpoint).map_err(|e| {
            ResilienceError::Config(format!("Invalid endpoint '{endpoint}': {e}"))
        })?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn make_request<T: DeserializeOwned>(
        &self,
        method: &str,
        request: ApiRequest,
    ) -> FetchResponse<T> {
        let url = match self.build_url(&request.endpoint, &request.params) {
            Ok(url) => url,
            Err(e) => {
                return FetchResponse::failure(e.to_string(), None);
            }
        };

        let config = FetchConfig {
            timeout_ms: request.timeout_ms.unwrap_or(self.config.default_timeout_ms),
            retries: request.retries.unwrap_or(self.config.default_retries),
            use_advanced_retry: self.config.use_advanced_retry,
            circuit_breaker_key: Some(
                request
                    .circuit_breaker_key
                    .unwrap_or_else(|| Self::breaker_key(method, &request.endpoint)),
            ),
            retry: Some(request.retry.unwrap_or_else(|| self.config.retry.clone())),
            circuit_breaker: Some(
                request
                    .circuit_breaker
                    .unwrap_or_else(|| self.config.circuit_breaker.clone()),
            ),
            ..FetchConfig::default()
        };

        let mut fetch_request = FetchRequest::new(method)
            .with_headers(self.config.default_headers.clone())
            .with_headers(request.headers);
        let accepts_body = matches!(fetch_request.method.as_str(), "POST" | "PUT" | "PATCH");
        if let Some(data) = request.data.filter(|_| accepts_body) {
            fetch_request = fetch_request.with_json(data);
        }

        self.fetch
            .fetch_tracked(url.as_str(), fetch_request, &config)
            .await
    }

    pub async fn get<T: DeserializeOwned>(&self, request: ApiRequest) -> FetchResponse<T> {
        self.make_request("GET", request).await
    }

    pub async fn post<T: DeserializeOwned>(&self, request: ApiRequest) -> FetchResponse<T> {
        self.make_request("POST", request).await
    }

    pub async fn put<T: DeserializeOwned>(&self, request: ApiRequest) -> FetchResponse<T> {
        self.make_request("PUT", request).await
    }

    pub async fn patch<T: DeserializeOwned>(&self, request: ApiRequest) -> FetchResponse<T> {
        self.make_request("PATCH", request).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, request: ApiRequest) -> FetchResponse<T> {
        self.make_request("DELETE", request).await
    }

    /// Ask the completion endpoint to draft an answer to `question`.
    ///
    /// The question is validated before any request is made. Transport and
    /// HTTP failures come back as a reply with `success == false` and a
    /// `code` naming the classified error kind.
    pub async fn generate_answer(&self, question: &str) -> Result<CompletionReply> {
        let payload = CompletionRequest::new(question)?;

        let request = ApiRequest {
            data: Some(serde_json::to_value(&payload)?),
            timeout_ms: Some(COMPLETION_TIMEOUT_MS),
            circuit_breaker_key: Some(COMPLETION_BREAKER_KEY.to_string()),
            retry: Some(RetryConfig {
                max_retries: 3,
                base_delay_ms: 2000,
                max_delay_ms: 15_000,
                ..self.config.retry.clone()
            }),
            ..ApiRequest::new(COMPLETION_ENDPOINT)
        };

        let response: FetchResponse<CompletionReply> = self.post(request).await;
        match response.data {
            Some(reply) if response.success => Ok(reply),
            _ => {
                let body = response.error_body.as_ref();
                let kind = match (response.status, body) {
                    (Some(status), Some(body)) => classify_response(status, body),
                    _ => classify_message(
                        "FetchError",
                        response.error.as_deref().unwrap_or_default(),
                    ),
                };
                let error = body
                    .and_then(|b| b.get("error"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or(response.error)
                    .unwrap_or_else(|| "Completion request failed".to_string());
                let code = kind.as_str().to_string();
                tracing::warn!(status = ?response.status, code = %code, "Completion request failed");
                Ok(CompletionReply::failure(error, Some(code)))
            }
        }
    }
}

#[async_trait]
impl CompletionProvider for ApiClient {
    async fn generate_answer(&self, question: &str) -> Result<CompletionReply> {
        ApiClient::generate_answer(self, question).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerRegistry;
    use crate::error_log::ErrorLogStore;
    use crate::retry::RetryExecutor;

    fn client(base_url: &str) -> ApiClient {
        let log = ErrorLogStore::new();
        let executor = RetryExecutor::new(log.clone(), CircuitBreakerRegistry::new(log));
        ApiClient::new(
            ClientConfig {
                base_url: base_url.to_string(),
                ..Default::default()
            },
            TrackedFetch::new(executor),
        )
    }

    #[test]
    fn breaker_key_shape() {
        assert_eq!(ApiClient::breaker_key("POST", "/api/chatgpt"), "api_post__api_chatgpt");
        assert_eq!(ApiClient::breaker_key("get", "/questions/1"), "api_get__questions_1");
    }

    #[test]
    fn build_url_joins_and_encodes_params() {
        let c = client("https://devflow.example.com");
        let mut params = BTreeMap::new();
        params.insert("q".to_string(), "rust async".to_string());
        params.insert("page".to_string(), "2".to_string());
        let url = c.build_url("/api/search", &params).unwrap();
        assert_eq!(
            url.as_str(),
            "https://devflow.example.com/api/search?page=2&q=rust+async"
        );
    }

    #[test]
    fn build_url_rejects_bad_base() {
        let c = client("not a url");
        let err = c.build_url("/x", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, ResilienceError::Config(_)));
    }

    #[tokio::test]
    async fn generate_answer_validates_before_io() {
        // Unroutable base URL: validation must fail before any request.
        let c = client("http://127.0.0.1:9");
        let err = c.generate_answer("").await.unwrap_err();
        assert!(matches!(err, ResilienceError::Validation(_)));
        let err = c.generate_answer(&"q".repeat(2001)).await.unwrap_err();
        assert!(matches!(err, ResilienceError::Validation(_)));
        assert!(c.tracked_fetch().executor().breakers().is_empty());
    }
}
