//! Error classification: maps a raw failure to an [`ErrorKind`] and its
//! static, user-facing [`ErrorPolicy`].
//!
//! Classification walks [`RULES`] in order and stops at the first rule that
//! matches. Messages routinely contain several overlapping keywords
//! (`"network timeout"`, `"503 invalid response"`), so the table order is
//! part of the contract.

use crate::error::ResilienceError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Closed set of failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NetworkError,
    Timeout,
    ConnectionError,
    CorsError,
    ApiError,
    ServiceUnavailable,
    QuotaExceeded,
    InvalidApiKey,
    ValidationError,
    InvalidJson,
    CircuitBreakerOpen,
    RetryExhausted,
    EditorQuotaExceeded,
    EditorInitError,
    UnknownError,
    InternalError,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [ErrorKind; 16] = [
        Self::NetworkError,
        Self::Timeout,
        Self::ConnectionError,
        Self::CorsError,
        Self::ApiError,
        Self::ServiceUnavailable,
        Self::QuotaExceeded,
        Self::InvalidApiKey,
        Self::ValidationError,
        Self::InvalidJson,
        Self::CircuitBreakerOpen,
        Self::RetryExhausted,
        Self::EditorQuotaExceeded,
        Self::EditorInitError,
        Self::UnknownError,
        Self::InternalError,
    ];

    /// Wire name, e.g. `"QUOTA_EXCEEDED"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkError => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::ConnectionError => "CONNECTION_ERROR",
            Self::CorsError => "CORS_ERROR",
            Self::ApiError => "API_ERROR",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::InvalidApiKey => "INVALID_API_KEY",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::InvalidJson => "INVALID_JSON",
            Self::CircuitBreakerOpen => "CIRCUIT_BREAKER_OPEN",
            Self::RetryExhausted => "RETRY_EXHAUSTED",
            Self::EditorQuotaExceeded => "EDITOR_QUOTA_EXCEEDED",
            Self::EditorInitError => "EDITOR_INIT_ERROR",
            Self::UnknownError => "UNKNOWN_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Parse a wire name such as the `code` field of a completion reply.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == code)
    }

    /// The static policy attached to this kind.
    pub fn policy(&self) -> &'static ErrorPolicy {
        match self {
            Self::NetworkError => &NETWORK_ERROR,
            Self::Timeout => &TIMEOUT,
            Self::ConnectionError => &CONNECTION_ERROR,
            Self::CorsError => &CORS_ERROR,
            Self::ApiError => &API_ERROR,
            Self::ServiceUnavailable => &SERVICE_UNAVAILABLE,
            Self::QuotaExceeded => &QUOTA_EXCEEDED,
            Self::InvalidApiKey => &INVALID_API_KEY,
            Self::ValidationError => &VALIDATION_ERROR,
            Self::InvalidJson => &INVALID_JSON,
            Self::CircuitBreakerOpen => &CIRCUIT_BREAKER_OPEN,
            Self::RetryExhausted => &RETRY_EXHAUSTED,
            Self::EditorQuotaExceeded => &EDITOR_QUOTA_EXCEEDED,
            Self::EditorInitError => &EDITOR_INIT_ERROR,
            Self::UnknownError => &UNKNOWN_ERROR,
            Self::InternalError => &INTERNAL_ERROR,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// How loudly a failure should be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// User-facing copy and retry semantics for one [`ErrorKind`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPolicy {
    pub kind: ErrorKind,
    pub title: &'static str,
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actionable: Option<&'static str>,
    pub retryable: bool,
    pub severity: Severity,
}

static NETWORK_ERROR: ErrorPolicy = ErrorPolicy {
    kind: ErrorKind::NetworkError,
    title: "Connection Problem",
    message: "Unable to connect to the server. Please check your internet connection.",
    actionable: Some("Try refreshing the page or check your network connection."),
    retryable: true,
    severity: Severity::Medium,
};

static TIMEOUT: ErrorPolicy = ErrorPolicy {
    kind: ErrorKind::Timeout,
    title: "Request Timeout",
    message: "The request took too long to complete.",
    actionable: Some("The server might be busy. Please try again in a moment."),
    retryable: true,
    severity: Severity::Medium,
};

static CONNECTION_ERROR: ErrorPolicy = ErrorPolicy {
    kind: ErrorKind::ConnectionError,
    title: "Connection Failed",
    message: "Failed to establish connection with the server.",
    actionable: Some("Please check your internet connection and try again."),
    retryable: true,
    severity: Severity::Medium,
};

static CORS_ERROR: ErrorPolicy = ErrorPolicy {
    kind: ErrorKind::CorsError,
    title: "Access Blocked",
    message: "The request was blocked due to security restrictions.",
    actionable: Some(
        "This appears to be a configuration issue. Please contact support if the problem persists.",
    ),
    retryable: false,
    severity: Severity::High,
};

static API_ERROR: ErrorPolicy = ErrorPolicy {
    kind: ErrorKind::ApiError,
    title: "Service Error",
    message: "The service encountered an unexpected error.",
    actionable: Some("Please try again. If the problem continues, contact support."),
    retryable: true,
    severity: Severity::Medium,
};

static SERVICE_UNAVAILABLE: ErrorPolicy = ErrorPolicy {
    kind: ErrorKind::ServiceUnavailable,
    title: "Service Temporarily Unavailable",
    message: "The service is currently unavailable.",
    actionable: Some("We're working to restore service. Please try again in a few minutes."),
    retryable: true,
    severity: Severity::High,
};

static QUOTA_EXCEEDED: ErrorPolicy = ErrorPolicy {
    kind: ErrorKind::QuotaExceeded,
    title: "Usage Limit Reached",
    message: "You've reached the usage limit for this service.",
    actionable: Some(
        "Please wait before making more requests, or contact support to increase your limit.",
    ),
    retryable: false,
    severity: Severity::Medium,
};

static INVALID_API_KEY: ErrorPolicy = ErrorPolicy {
    kind: ErrorKind::InvalidApiKey,
    title: "Authentication Error",
    message: "The service authentication failed.",
    actionable: Some("This appears to be a configuration issue. Please contact support."),
    retryable: false,
    severity: Severity::Critical,
};

static VALIDATION_ERROR: ErrorPolicy = ErrorPolicy {
    kind: ErrorKind::ValidationError,
    title: "Invalid Input",
    message: "The provided information is not valid.",
    actionable: Some("Please check your input and try again."),
    retryable: false,
    severity: Severity::Low,
};

static INVALID_JSON: ErrorPolicy = ErrorPolicy {
    kind: ErrorKind::InvalidJson,
    title: "Data Format Error",
    message: "The data format is not valid.",
    actionable: Some("Please refresh the page and try again."),
    retryable: false,
    severity: Severity::Medium,
};

static CIRCUIT_BREAKER_OPEN: ErrorPolicy = ErrorPolicy {
    kind: ErrorKind::CircuitBreakerOpen,
    title: "Service Protection Active",
    message: "The service is temporarily protected due to repeated failures.",
    actionable: Some(
        "Please wait a moment before trying again. The service will automatically recover.",
    ),
    retryable: true,
    severity: Severity::High,
};

static RETRY_EXHAUSTED: ErrorPolicy = ErrorPolicy {
    kind: ErrorKind::RetryExhausted,
    title: "Multiple Attempts Failed",
    message: "We tried multiple times but couldn't complete your request.",
    actionable: Some("Please try again later or contact support if the problem persists."),
    retryable: true,
    severity: Severity::High,
};

static EDITOR_QUOTA_EXCEEDED: ErrorPolicy = ErrorPolicy {
    kind: ErrorKind::EditorQuotaExceeded,
    title: "Editor Storage Full",
    message: "The editor has reached its storage limit.",
    actionable: Some("Try clearing your browser data or use the simplified editor mode."),
    retryable: false,
    severity: Severity::Medium,
};

static EDITOR_INIT_ERROR: ErrorPolicy = ErrorPolicy {
    kind: ErrorKind::EditorInitError,
    title: "Editor Loading Failed",
    message: "The rich text editor failed to load properly.",
    actionable: Some(
        "You can still use the basic text editor. Try refreshing to restore the full editor.",
    ),
    retryable: true,
    severity: Severity::Medium,
};

static UNKNOWN_ERROR: ErrorPolicy = ErrorPolicy {
    kind: ErrorKind::UnknownError,
    title: "Unexpected Error",
    message: "Something unexpected happened.",
    actionable: Some("Please try again. If the problem continues, contact support."),
    retryable: true,
    severity: Severity::Medium,
};

static INTERNAL_ERROR: ErrorPolicy = ErrorPolicy {
    kind: ErrorKind::InternalError,
    title: "Internal Error",
    message: "An internal error occurred while processing your request.",
    actionable: Some("Please try again later. If the problem persists, contact support."),
    retryable: true,
    severity: Severity::High,
};

/// A single test applied to an error's name and lower-cased message.
#[derive(Debug, Clone, Copy)]
pub enum Predicate {
    /// The error name equals this value exactly.
    NameEquals(&'static str),
    /// The lower-cased message contains this (lower-case) needle.
    Contains(&'static str),
    /// The lower-cased message contains every needle.
    ContainsAll(&'static [&'static str]),
}

impl Predicate {
    fn matches(&self, name: &str, lowered: &str) -> bool {
        match self {
            Self::NameEquals(expected) => name == *expected,
            Self::Contains(needle) => lowered.contains(needle),
            Self::ContainsAll(needles) => needles.iter().all(|n| lowered.contains(n)),
        }
    }
}

/// A rule matches when any of its predicates match.
#[derive(Debug, Clone, Copy)]
pub struct ClassificationRule {
    pub predicates: &'static [Predicate],
    pub kind: ErrorKind,
}

impl ClassificationRule {
    pub fn matches(&self, name: &str, lowered: &str) -> bool {
        self.predicates.iter().any(|p| p.matches(name, lowered))
    }
}

use Predicate::{Contains, ContainsAll, NameEquals};

/// Ordered classification table. First match wins.
pub static RULES: &[ClassificationRule] = &[
    ClassificationRule {
        predicates: &[NameEquals("AbortError"), Contains("timeout")],
        kind: ErrorKind::Timeout,
    },
    ClassificationRule {
        predicates: &[
            Contains("network"),
            Contains("fetch"),
            Contains("econnrefused"),
            Contains("enotfound"),
        ],
        kind: ErrorKind::NetworkError,
    },
    ClassificationRule {
        predicates: &[Contains("cors")],
        kind: ErrorKind::CorsError,
    },
    ClassificationRule {
        predicates: &[Contains("quota"), Contains("rate limit")],
        kind: ErrorKind::QuotaExceeded,
    },
    ClassificationRule {
        predicates: &[Contains("api key"), Contains("unauthorized")],
        kind: ErrorKind::InvalidApiKey,
    },
    ClassificationRule {
        predicates: &[Contains("service unavailable"), Contains("503")],
        kind: ErrorKind::ServiceUnavailable,
    },
    ClassificationRule {
        predicates: &[Contains("validation"), Contains("invalid")],
        kind: ErrorKind::ValidationError,
    },
    ClassificationRule {
        predicates: &[Contains("json")],
        kind: ErrorKind::InvalidJson,
    },
    ClassificationRule {
        predicates: &[Contains("circuit breaker")],
        kind: ErrorKind::CircuitBreakerOpen,
    },
    ClassificationRule {
        predicates: &[ContainsAll(&["tinymce", "quota"])],
        kind: ErrorKind::EditorQuotaExceeded,
    },
    ClassificationRule {
        predicates: &[Contains("tinymce")],
        kind: ErrorKind::EditorInitError,
    },
    ClassificationRule {
        predicates: &[Contains("500"), Contains("502"), Contains("504")],
        kind: ErrorKind::InternalError,
    },
];

/// Classify a raw `(name, message)` pair. Pure; falls back to
/// [`ErrorKind::UnknownError`].
pub fn classify_message(name: &str, message: &str) -> ErrorKind {
    let lowered = message.to_lowercase();
    RULES
        .iter()
        .find(|rule| rule.matches(name, &lowered))
        .map(|rule| rule.kind)
        .unwrap_or(ErrorKind::UnknownError)
}

/// Classify a crate error by its name and display message.
pub fn kind_of(error: &ResilienceError) -> ErrorKind {
    classify_message(error.name(), &error.to_string())
}

/// Classify a crate error and return its static policy.
pub fn classify(error: &ResilienceError) -> &'static ErrorPolicy {
    kind_of(error).policy()
}

/// Classify a non-2xx response from its status and body.
///
/// A body carrying a known `code` (as the completion endpoint returns) is
/// trusted directly. Otherwise the status line and any `error`/`message`
/// string in the body are run through the rule table.
pub fn classify_response(status: u16, body: &serde_json::Value) -> ErrorKind {
    if let Some(kind) = body
        .get("code")
        .and_then(|c| c.as_str())
        .and_then(ErrorKind::from_code)
    {
        return kind;
    }

    let detail = body
        .get("error")
        .or_else(|| body.get("message"))
        .and_then(|v| v.as_str())
        .or_else(|| body.as_str())
        .unwrap_or_default();
    classify_message("FetchError", &format!("HTTP {status}: {detail}"))
}

/// Look up a policy by wire code, falling back to `UNKNOWN_ERROR`.
pub fn policy_for_code(code: &str) -> &'static ErrorPolicy {
    ErrorKind::from_code(code)
        .unwrap_or(ErrorKind::UnknownError)
        .policy()
}

/// Returns `true` when the classified policy marks the error retryable.
pub fn should_retry_error(error: &ResilienceError) -> bool {
    classify(error).retryable
}

/// A policy decorated for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserFacingError {
    pub kind: ErrorKind,
    pub title: String,
    pub message: String,
    pub actionable: Option<String>,
    pub can_retry: bool,
    pub severity: Severity,
}

/// Classify `error` and render it for the user, prefixing the message with
/// `"{context}: "` when a context is given.
pub fn format_for_user(error: &ResilienceError, context: Option<&str>) -> UserFacingError {
    let policy = classify(error);
    let message = match context {
        Some(ctx) => format!("{ctx}: {}", policy.message),
        None => policy.message.to_string(),
    };
    UserFacingError {
        kind: policy.kind,
        title: policy.title.to_string(),
        message,
        actionable: policy.actionable.map(str::to_string),
        can_retry: policy.retryable,
        severity: policy.severity,
    }
}

/// Kind-aware backoff for the 0-based `attempt`.
///
/// - quota / rate limit: `min(5000 * 2^attempt, 60000)` ms
/// - network / timeout: `min(1000 * 1.5^attempt, 10000)` ms
/// - everything else: `min(1000 * 2^attempt, 30000)` ms
pub fn delay_for(error: &ResilienceError, attempt: u32) -> Duration {
    let lowered = error.to_string().to_lowercase();
    let (base, factor, cap) = if lowered.contains("quota") || lowered.contains("rate limit") {
        (5_000.0, 2.0, 60_000.0)
    } else if lowered.contains("network") || lowered.contains("timeout") {
        (1_000.0, 1.5, 10_000.0)
    } else {
        (1_000.0, 2.0, 30_000.0)
    };
    Duration::from_millis(capped_exponential(base, factor, attempt, cap))
}

/// `min(base * factor^attempt, cap)` in whole milliseconds, saturating.
pub(crate) fn capped_exponential(base: f64, factor: f64, attempt: u32, cap: f64) -> u64 {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let raw = base * factor.powi(exponent);
    if raw.is_finite() { raw.min(cap) as u64 } else { cap as u64 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(message: &str) -> ResilienceError {
        ResilienceError::other(message)
    }

    #[test]
    fn timeout_beats_network() {
        assert_eq!(kind_of(&err("network timeout while fetching")), ErrorKind::Timeout);
    }

    #[test]
    fn abort_error_name_is_timeout() {
        let e = ResilienceError::named("AbortError", "The operation was aborted");
        assert_eq!(kind_of(&e), ErrorKind::Timeout);
    }

    #[test]
    fn abort_name_is_case_sensitive() {
        let e = ResilienceError::named("aborterror", "aborted");
        assert_eq!(kind_of(&e), ErrorKind::UnknownError);
    }

    #[test]
    fn rules_in_order() {
        let cases = [
            ("Failed to fetch", ErrorKind::NetworkError),
            ("connect ECONNREFUSED 127.0.0.1", ErrorKind::NetworkError),
            ("getaddrinfo ENOTFOUND api.example.com", ErrorKind::NetworkError),
            ("Blocked by CORS policy", ErrorKind::CorsError),
            ("Rate limit reached", ErrorKind::QuotaExceeded),
            ("Invalid API key provided", ErrorKind::InvalidApiKey),
            ("401 Unauthorized", ErrorKind::InvalidApiKey),
            ("HTTP 503: Service Unavailable", ErrorKind::ServiceUnavailable),
            ("Validation failed", ErrorKind::ValidationError),
            ("Unexpected token in JSON", ErrorKind::InvalidJson),
            ("circuit breaker tripped", ErrorKind::CircuitBreakerOpen),
            ("TinyMCE failed to boot", ErrorKind::EditorInitError),
            ("HTTP 502: Bad Gateway", ErrorKind::InternalError),
            ("something odd", ErrorKind::UnknownError),
        ];
        for (message, expected) in cases {
            assert_eq!(kind_of(&err(message)), expected, "message: {message}");
        }
    }

    #[test]
    fn quota_rule_shadows_editor_quota() {
        // "quota" is matched by the generic rule before the editor rules run.
        assert_eq!(kind_of(&err("tinymce quota exceeded")), ErrorKind::QuotaExceeded);
    }

    #[test]
    fn editor_quota_rule_matches_in_isolation() {
        let rule = RULES
            .iter()
            .find(|r| r.kind == ErrorKind::EditorQuotaExceeded)
            .unwrap();
        assert!(rule.matches("Error", "tinymce quota exceeded"));
        assert!(!rule.matches("Error", "tinymce failed"));
    }

    #[test]
    fn classification_is_deterministic() {
        let e = err("HTTP 504: Gateway Timeout");
        assert_eq!(classify(&e), classify(&e));
        assert_eq!(kind_of(&e), ErrorKind::Timeout);
    }

    #[test]
    fn every_kind_has_policy_with_matching_kind() {
        for kind in ErrorKind::ALL {
            assert_eq!(kind.policy().kind, kind);
            assert_eq!(ErrorKind::from_code(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn kind_serializes_as_wire_name() {
        let json = serde_json::to_string(&ErrorKind::CircuitBreakerOpen).unwrap();
        assert_eq!(json, "\"CIRCUIT_BREAKER_OPEN\"");
        let sev = serde_json::to_string(&Severity::Critical).unwrap();
        assert_eq!(sev, "\"critical\"");
    }

    #[test]
    fn response_code_wins_over_status() {
        let body = serde_json::json!({"success": false, "error": "AI service error", "code": "QUOTA_EXCEEDED"});
        assert_eq!(classify_response(400, &body), ErrorKind::QuotaExceeded);
    }

    #[test]
    fn response_without_code_uses_status_line() {
        let body = serde_json::json!({"error": "upstream down"});
        assert_eq!(classify_response(503, &body), ErrorKind::ServiceUnavailable);
        assert_eq!(
            classify_response(404, &serde_json::json!({"error": "not found"})),
            ErrorKind::UnknownError
        );
    }

    #[test]
    fn format_for_user_prefixes_context() {
        let formatted = format_for_user(&err("Rate limit reached"), Some("Generating answer"));
        assert_eq!(formatted.title, "Usage Limit Reached");
        assert_eq!(
            formatted.message,
            "Generating answer: You've reached the usage limit for this service."
        );
        assert!(!formatted.can_retry);
        assert_eq!(formatted.severity, Severity::Medium);

        let plain = format_for_user(&err("Failed to fetch"), None);
        assert_eq!(plain.message, NETWORK_ERROR.message);
        assert!(plain.can_retry);
    }

    #[test]
    fn policy_for_unknown_code_falls_back() {
        assert_eq!(policy_for_code("NOT_A_CODE").kind, ErrorKind::UnknownError);
        assert_eq!(policy_for_code("INVALID_JSON").kind, ErrorKind::InvalidJson);
    }

    #[test]
    fn quota_delays_grow_to_cap() {
        let e = err("quota exceeded");
        let delays: Vec<u64> = (0..=10).map(|a| delay_for(&e, a).as_millis() as u64).collect();
        assert_eq!(&delays[..5], &[5_000, 10_000, 20_000, 40_000, 60_000]);
        for pair in delays[..4].windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert_eq!(delays[10], 60_000);
    }

    #[test]
    fn network_and_default_delays() {
        let net = err("network down");
        assert_eq!(delay_for(&net, 0), Duration::from_millis(1_000));
        assert_eq!(delay_for(&net, 1), Duration::from_millis(1_500));
        assert_eq!(delay_for(&net, 2), Duration::from_millis(2_250));
        assert_eq!(delay_for(&net, 20), Duration::from_millis(10_000));

        let other = err("HTTP 500");
        assert_eq!(delay_for(&other, 3), Duration::from_millis(8_000));
        assert_eq!(delay_for(&other, 40), Duration::from_millis(30_000));
    }

    #[test]
    fn capped_exponential_saturates() {
        assert_eq!(capped_exponential(1_000.0, 2.0, u32::MAX, 30_000.0), 30_000);
    }
}
