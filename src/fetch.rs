//! Tracked fetch: an HTTP call with a per-attempt timeout, status
//! classification, error logging, and retry/breaker handling.
//!
//! [`TrackedFetch::fetch_tracked`] never returns an error. Every failure is
//! folded into a [`FetchResponse`] with `success == false`.

use crate::api::{FetchConfig, RetryConfig};
use crate::classify::{ErrorKind, classify, delay_for, should_retry_error};
use crate::error::{ResilienceError, Result};
use crate::error_log::{ApiErrorDetails, ErrorLogStore, LogContext};
use crate::retry::{RetryExecutor, RetryOptions};
use reqwest::{Client, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Instant;

/// Outcome of a tracked fetch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Body of the failed response, when the server sent one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_body: Option<Value>,
}

impl<T> FetchResponse<T> {
    fn ok(data: T, status: u16) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            status: Some(status),
            error_body: None,
        }
    }

    pub(crate) fn failure(error: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            status,
            error_body: None,
        }
    }

    /// Fold `error` into a failed result, keeping the HTTP status and body.
    fn from_error(error: &ResilienceError) -> Self {
        let error_body = match error {
            ResilienceError::Http { body, .. } => body.clone(),
            _ => None,
        };
        Self {
            error_body,
            ..Self::failure(error.to_string(), error.status())
        }
    }
}

/// Method, headers and JSON body of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

impl Default for FetchRequest {
    fn default() -> Self {
        Self::new("GET")
    }
}

impl FetchRequest {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into().to_uppercase(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Send `body` as JSON (sets `Content-Type: application/json`).
    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Replace every character outside `[A-Za-z0-9]` with `_`.
pub fn sanitize_key(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Breaker key used when the caller supplies none: `fetch_{METHOD}_{url}`
/// with the URL sanitized.
pub fn default_breaker_key(method: &str, url: &str) -> String {
    format!("fetch_{}_{}", method.to_uppercase(), sanitize_key(url))
}

/// HTTP client wrapper that tracks, retries and gates requests.
#[derive(Clone)]
pub struct TrackedFetch {
    client: Client,
    executor: RetryExecutor,
}

impl TrackedFetch {
    pub fn new(executor: RetryExecutor) -> Self {
        Self::with_client(Client::new(), executor)
    }

    pub fn with_client(client: Client, executor: RetryExecutor) -> Self {
        Self { client, executor }
    }

    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }

    fn log(&self) -> &ErrorLogStore {
        self.executor.error_log()
    }

    /// Perform `request` against `url` under `config`.
    ///
    /// 4xx responses other than 429 come back immediately as failed results
    /// with their status. 5xx, 429, timeouts and transport failures are
    /// retried, through the keyed breaker when `use_advanced_retry` is set.
    pub async fn fetch_tracked<T: DeserializeOwned>(
        &self,
        url: &str,
        request: FetchRequest,
        config: &FetchConfig,
    ) -> FetchResponse<T> {
        let method = match Method::from_bytes(request.method.as_bytes()) {
            Ok(m) => m,
            Err(_) => {
                return FetchResponse::failure(
                    format!("Invalid HTTP method: {}", request.method),
                    None,
                );
            }
        };

        if config.use_advanced_retry {
            self.advanced(url, &method, &request, config).await
        } else {
            self.simple(url, &method, &request, config).await
        }
    }

    async fn advanced<T: DeserializeOwned>(
        &self,
        url: &str,
        method: &Method,
        request: &FetchRequest,
        config: &FetchConfig,
    ) -> FetchResponse<T> {
        let retry = config.effective_retry();
        let options = self.retry_options(retry, method, url, config.track_errors);
        let breaker_config = config.circuit_breaker.clone().unwrap_or_default();
        let key = config
            .circuit_breaker_key
            .clone()
            .unwrap_or_else(|| default_breaker_key(method.as_str(), url));
        let operation_name = format!("{method} {url}");

        let result = self
            .executor
            .breaker_then_retry(
                || self.attempt::<T>(url, method, request, config),
                &key,
                &options,
                Some(&breaker_config),
                Some(&operation_name),
            )
            .await;

        result.unwrap_or_else(|e| FetchResponse::from_error(&e))
    }

    fn retry_options(
        &self,
        retry: RetryConfig,
        method: &Method,
        url: &str,
        track_errors: bool,
    ) -> RetryOptions {
        let log = self.log().clone();
        let method = method.to_string();
        let url = url.to_string();
        let total = retry.max_retries + 1;

        RetryOptions::new(retry)
            .with_retry_condition(|error, _| should_retry_error(error))
            .with_on_retry(move |attempt| {
                if !track_errors {
                    return;
                }
                let title = classify(attempt.error).title;
                let mut context = LogContext::new();
                context.insert("method".into(), json!(method));
                context.insert("url".into(), json!(url));
                context.insert("attempt".into(), json!(attempt.attempt_number));
                context.insert("maxRetries".into(), json!(total));
                context.insert("errorType".into(), json!(title));
                log.log_error(
                    ErrorKind::ApiError,
                    format!(
                        "Retrying {method} {url} (attempt {}/{total}) - {title}",
                        attempt.attempt_number
                    ),
                    Some(attempt.error),
                    Some(context),
                );
            })
    }

    async fn simple<T: DeserializeOwned>(
        &self,
        url: &str,
        method: &Method,
        request: &FetchRequest,
        config: &FetchConfig,
    ) -> FetchResponse<T> {
        let mut attempt = 0;
        let last_error = loop {
            let error = match self.attempt::<T>(url, method, request, config).await {
                Ok(response) => return response,
                Err(e) => e,
            };
            if attempt == config.retries || !should_retry_error(&error) {
                break error;
            }
            tokio::time::sleep(delay_for(&error, attempt)).await;
            attempt += 1;
        };

        FetchResponse::from_error(&last_error)
    }

    /// One request/response round trip, bounded by `config.timeout()`.
    ///
    /// Returns `Ok` for successes and for non-retryable 4xx failures, `Err`
    /// for everything the retry layer should see.
    async fn attempt<T: DeserializeOwned>(
        &self,
        url: &str,
        method: &Method,
        request: &FetchRequest,
        config: &FetchConfig,
    ) -> Result<FetchResponse<T>> {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(
            config.timeout(),
            self.send_once::<T>(url, method, request, config.track_errors),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(ResilienceError::Timeout(format!(
                "Request timeout after {}ms",
                config.timeout_ms
            ))),
        };

        let status = match &outcome {
            Ok(response) => response.status.map(|s| s.to_string()),
            Err(e) => e.status().map(|s| s.to_string()),
        }
        .unwrap_or_else(|| "error".to_string());
        metrics::histogram!("resilience.fetch.duration_seconds", "method" => method.to_string())
            .record(started.elapsed().as_secs_f64());
        metrics::counter!(
            "resilience.fetch.total",
            "method" => method.to_string(),
            "status" => status
        )
        .increment(1);

        if let Err(e) = &outcome {
            // HTTP failures were already logged with their response body.
            if config.track_errors && !matches!(e, ResilienceError::Http { .. }) {
                self.log_transport_failure(e, method, url, request, config);
            }
        }
        outcome
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        url: &str,
        method: &Method,
        request: &FetchRequest,
        track_errors: bool,
    ) -> Result<FetchResponse<T>> {
        let mut builder = self.client.request(method.clone(), url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let code = status.as_u16();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
            let error = ResilienceError::Http {
                status: code,
                message: format!(
                    "HTTP {code}: {}",
                    status.canonical_reason().unwrap_or_default()
                ),
                body: Some(body.clone()),
            };

            if track_errors {
                if code >= 500 {
                    let mut context = LogContext::new();
                    context.insert("method".into(), json!(method.as_str()));
                    context.insert("status".into(), json!(code));
                    self.log().log_error(
                        ErrorKind::NetworkError,
                        format!("Network error for {method} {url}"),
                        Some(&error),
                        Some(context),
                    );
                } else {
                    self.log().log_api_error(
                        format!("API request failed: {method} {url}"),
                        &error,
                        ApiErrorDetails {
                            endpoint: Some(url.to_string()),
                            method: Some(method.to_string()),
                            status_code: Some(code),
                            request_data: request.body.clone(),
                            response_data: Some(body),
                        },
                    );
                }
            }

            if (400..500).contains(&code) && code != 429 {
                return Ok(FetchResponse::from_error(&error));
            }
            return Err(error);
        }

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/json"));
        let text = response.text().await?;
        let value = if is_json {
            serde_json::from_str::<Value>(&text)?
        } else {
            Value::String(text)
        };
        let data = serde_json::from_value::<T>(value)?;
        Ok(FetchResponse::ok(data, code))
    }

    fn log_transport_failure(
        &self,
        error: &ResilienceError,
        method: &Method,
        url: &str,
        request: &FetchRequest,
        config: &FetchConfig,
    ) {
        let message = error.to_string();
        if matches!(error, ResilienceError::Timeout(_)) {
            let mut context = LogContext::new();
            context.insert("method".into(), json!(method.as_str()));
            context.insert("timeout".into(), json!(config.timeout_ms));
            context.insert("errorType".into(), json!("timeout"));
            self.log().log_error(
                ErrorKind::NetworkError,
                format!("Request timeout for {method} {url}"),
                Some(error),
                Some(context),
            );
        } else if message.contains("CORS") {
            self.log().log_cors_error(
                format!("CORS error for {method} {url}"),
                url,
                method.as_str(),
                Some(error),
            );
        } else if message.contains("fetch") {
            let mut context = LogContext::new();
            context.insert("method".into(), json!(method.as_str()));
            context.insert("errorType".into(), json!("network"));
            self.log().log_error(
                ErrorKind::NetworkError,
                format!("Network error for {method} {url}"),
                Some(error),
                Some(context),
            );
        } else {
            self.log().log_api_error(
                format!("Request failed: {method} {url}"),
                error,
                ApiErrorDetails {
                    endpoint: Some(url.to_string()),
                    method: Some(method.to_string()),
                    request_data: request.body.clone(),
                    ..Default::default()
                },
            );
        }
    }

    /// Run `request` with the helper key `{method}_{url}` unless `config`
    /// names a key.
    async fn with_helper_key<T: DeserializeOwned>(
        &self,
        url: &str,
        request: FetchRequest,
        config: &FetchConfig,
    ) -> FetchResponse<T> {
        if config.circuit_breaker_key.is_some() {
            return self.fetch_tracked(url, request, config).await;
        }
        let config = FetchConfig {
            circuit_breaker_key: Some(format!(
                "{}_{}",
                request.method.to_lowercase(),
                sanitize_key(url)
            )),
            ..config.clone()
        };
        self.fetch_tracked(url, request, &config).await
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        config: &FetchConfig,
    ) -> FetchResponse<T> {
        self.with_helper_key(url, FetchRequest::new("GET"), config)
            .await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        url: &str,
        data: Option<Value>,
        config: &FetchConfig,
    ) -> FetchResponse<T> {
        self.with_helper_key(url, with_optional_body("POST", data), config)
            .await
    }

    pub async fn put<T: DeserializeOwned>(
        &self,
        url: &str,
        data: Option<Value>,
        config: &FetchConfig,
    ) -> FetchResponse<T> {
        self.with_helper_key(url, with_optional_body("PUT", data), config)
            .await
    }

    pub async fn patch<T: DeserializeOwned>(
        &self,
        url: &str,
        data: Option<Value>,
        config: &FetchConfig,
    ) -> FetchResponse<T> {
        self.with_helper_key(url, with_optional_body("PATCH", data), config)
            .await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        url: &str,
        config: &FetchConfig,
    ) -> FetchResponse<T> {
        self.with_helper_key(url, FetchRequest::new("DELETE"), config)
            .await
    }
}

fn with_optional_body(method: &str, data: Option<Value>) -> FetchRequest {
    let request = FetchRequest::new(method);
    match data {
        Some(body) => request.with_json(body),
        None => request,
    }
}
