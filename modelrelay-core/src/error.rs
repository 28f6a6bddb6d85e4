//! # Error Handling Module
//!
//! Standardized error types for gateway operations and provider
//! interactions, plus the pure status-code classifier the resilience
//! envelope is built on.
//!
//! Two layers mirror the call stack:
//! - [`ProviderError`]: everything that can go wrong talking to one
//!   upstream provider, classified into a stable [`ErrorKind`] taxonomy.
//! - [`ClientError`]: gateway-level failures (routing, cache,
//!   configuration) that wrap provider errors without re-wrapping them.
//!
//! Classification is a pure function of HTTP status ([`classify_status`])
//! so retry decisions are deterministic and testable. The retryable set
//! is exactly rate-limit, timeout, service-unavailable, and network
//! faults; auth, billing, not-found, and validation failures never retry.

use std::time::Duration;
use thiserror::Error;

/// Stable classification of a provider failure.
///
/// Derived from the upstream HTTP status (or the local failure mode) and
/// used by the retry policy, the error tracker, and user-visible error
/// responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 401: credential rejected by the provider
    InvalidApiKey,
    /// 402: account balance or quota exhausted
    InsufficientBalance,
    /// 403: credential valid but not allowed
    AccessForbidden,
    /// 404: model unknown to the provider
    ModelNotFound,
    /// 408 / 504: upstream or local deadline expired
    Timeout,
    /// 429: provider rate limit hit
    RateLimit,
    /// 500 / 502 / 503: provider-side outage
    ServiceUnavailable,
    /// 400: request rejected before or by the provider
    InvalidRequest,
    /// Capability not offered by the resolved provider
    Unsupported,
    /// Usage or request content failed internal validation
    Validation,
    /// Provider returned a response the adapter could not parse
    Protocol,
    /// Transport-level failure (DNS, connect, TLS, reset)
    Network,
    /// Missing credential, cost info, or invalid composition
    Configuration,
    /// Anything else; not tracked
    Unknown,
}

impl ErrorKind {
    /// Whether the resilience envelope may retry a failure of this kind.
    ///
    /// The set is exactly {RateLimit, Timeout, ServiceUnavailable,
    /// Network}; everything else fails fast.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimit
                | ErrorKind::Timeout
                | ErrorKind::ServiceUnavailable
                | ErrorKind::Network
        )
    }

    /// Whether failures of this kind are written to the error tracker.
    pub fn is_tracked(self) -> bool {
        !matches!(self, ErrorKind::Unknown)
    }

    /// Short machine code carried on user-visible error responses.
    pub fn machine_code(self) -> &'static str {
        match self {
            ErrorKind::InvalidApiKey => "invalid_api_key",
            ErrorKind::InsufficientBalance => "insufficient_balance",
            ErrorKind::AccessForbidden => "access_forbidden",
            ErrorKind::ModelNotFound => "model_not_found",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Validation => "validation_failed",
            ErrorKind::Protocol => "provider_protocol_error",
            ErrorKind::Network => "network_error",
            ErrorKind::Configuration => "configuration_error",
            ErrorKind::Unknown => "unknown",
        }
    }
}

/// Classify an upstream HTTP status into an [`ErrorKind`].
///
/// Pure and idempotent: the same status always yields the same kind.
pub fn classify_status(status: u16) -> ErrorKind {
    match status {
        400 => ErrorKind::InvalidRequest,
        401 => ErrorKind::InvalidApiKey,
        402 => ErrorKind::InsufficientBalance,
        403 => ErrorKind::AccessForbidden,
        404 => ErrorKind::ModelNotFound,
        408 | 504 => ErrorKind::Timeout,
        429 => ErrorKind::RateLimit,
        500 | 502 | 503 => ErrorKind::ServiceUnavailable,
        _ => ErrorKind::Unknown,
    }
}

/// Structured rate-limit detail surfaced with 429 responses.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RateLimitDetail {
    /// Limit value reported by the provider, if any
    pub limit: Option<u64>,
    /// Window the limit applies to (e.g. `"1m"`)
    pub window: Option<String>,
    /// Limit type (requests, tokens, ...)
    pub limit_type: Option<String>,
}

/// Provider-facing errors, classified per the gateway taxonomy.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// HTTP client and transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider API error with an unclassified status code
    #[error("API error: {code} - {message}")]
    Api { code: u16, message: String },

    /// 401: credential rejected
    #[error("Invalid API key")]
    InvalidApiKey,

    /// 402: balance or prepaid quota exhausted
    #[error("Insufficient balance")]
    InsufficientBalance,

    /// 403: access forbidden for this credential
    #[error("Access forbidden")]
    AccessForbidden,

    /// 404: requested model unknown upstream
    #[error("Model not found: {model}")]
    ModelNotFound { model: String },

    /// 429: provider rate limit, with optional backoff hint and detail
    #[error("Rate limit exceeded")]
    RateLimit {
        retry_after: Option<Duration>,
        detail: RateLimitDetail,
    },

    /// Request or response deadline expired
    #[error("Timeout")]
    Timeout,

    /// 5xx: provider temporarily unavailable
    #[error("Service unavailable")]
    ServiceUnavailable { reason: Option<String> },

    /// 400: request rejected
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// 413: request body exceeded the provider limit
    #[error("Payload too large: {actual_bytes} bytes (maximum {maximum_bytes})")]
    PayloadTooLarge {
        actual_bytes: u64,
        maximum_bytes: u64,
        content_type: Option<String>,
    },

    /// Capability not offered by this provider
    #[error("Not supported by this provider: {feature}")]
    Unsupported { feature: String },

    /// Internal validation failed before dispatch or costing
    #[error("Validation failed: {}", .messages.join("; "))]
    Validation { messages: Vec<String> },

    /// Provider response did not match its documented wire shape
    #[error("Provider protocol error: {message}")]
    Protocol { message: String },

    /// Transport-level network failure
    #[error("Network error: {message}")]
    Network { message: String },

    /// JSON serialization and deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Missing credential, missing cost info, invalid composition
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl ProviderError {
    /// Build the canonical error for a classified upstream status.
    ///
    /// `message` is the best human-readable detail extracted from the
    /// provider body; `retry_after` comes from the `Retry-After` header.
    pub fn from_status(status: u16, message: String, retry_after: Option<Duration>) -> Self {
        match classify_status(status) {
            ErrorKind::InvalidRequest => ProviderError::InvalidRequest { message },
            ErrorKind::InvalidApiKey => ProviderError::InvalidApiKey,
            ErrorKind::InsufficientBalance => ProviderError::InsufficientBalance,
            ErrorKind::AccessForbidden => ProviderError::AccessForbidden,
            ErrorKind::ModelNotFound => ProviderError::ModelNotFound { model: message },
            ErrorKind::Timeout => ProviderError::Timeout,
            ErrorKind::RateLimit => ProviderError::RateLimit {
                retry_after,
                detail: RateLimitDetail::default(),
            },
            ErrorKind::ServiceUnavailable => ProviderError::ServiceUnavailable {
                reason: (!message.is_empty()).then_some(message),
            },
            _ if status == 413 => ProviderError::PayloadTooLarge {
                actual_bytes: 0,
                maximum_bytes: 0,
                content_type: None,
            },
            _ => ProviderError::Api {
                code: status,
                message,
            },
        }
    }

    /// Classified kind for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Http(e) => {
                if e.is_timeout() {
                    ErrorKind::Timeout
                } else {
                    ErrorKind::Network
                }
            }
            ProviderError::Api { code, .. } => classify_status(*code),
            ProviderError::InvalidApiKey => ErrorKind::InvalidApiKey,
            ProviderError::InsufficientBalance => ErrorKind::InsufficientBalance,
            ProviderError::AccessForbidden => ErrorKind::AccessForbidden,
            ProviderError::ModelNotFound { .. } => ErrorKind::ModelNotFound,
            ProviderError::RateLimit { .. } => ErrorKind::RateLimit,
            ProviderError::Timeout => ErrorKind::Timeout,
            ProviderError::ServiceUnavailable { .. } => ErrorKind::ServiceUnavailable,
            ProviderError::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            ProviderError::PayloadTooLarge { .. } => ErrorKind::InvalidRequest,
            ProviderError::Unsupported { .. } => ErrorKind::Unsupported,
            ProviderError::Validation { .. } => ErrorKind::Validation,
            ProviderError::Protocol { .. } => ErrorKind::Protocol,
            ProviderError::Network { .. } => ErrorKind::Network,
            ProviderError::Serialization(_) => ErrorKind::Protocol,
            ProviderError::Configuration { .. } => ErrorKind::Configuration,
        }
    }

    /// HTTP-like status for the user-visible error response.
    pub fn status_code(&self) -> u16 {
        if let ProviderError::PayloadTooLarge { .. } = self {
            return 413;
        }
        match self.kind() {
            ErrorKind::InvalidApiKey => 401,
            ErrorKind::InsufficientBalance => 402,
            ErrorKind::AccessForbidden => 403,
            ErrorKind::ModelNotFound => 404,
            ErrorKind::Timeout => 504,
            ErrorKind::RateLimit => 429,
            ErrorKind::ServiceUnavailable => 503,
            ErrorKind::InvalidRequest => 400,
            ErrorKind::Unsupported => 400,
            ErrorKind::Validation => 422,
            ErrorKind::Protocol => 502,
            ErrorKind::Network => 502,
            ErrorKind::Configuration => 500,
            ErrorKind::Unknown => match self {
                ProviderError::Api { code, .. } => *code,
                _ => 500,
            },
        }
    }

    /// Whether this error is eligible for retry.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Backoff hint from the provider, when present.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Gateway-level operation errors.
///
/// Wraps [`ProviderError`] without re-classifying it; gateway layers add
/// their own failure modes (routing, cache, composition) but never
/// obscure the innermost provider failure.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Wrapped provider-specific errors
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Provider routing and selection errors
    #[error("Routing error: {message}")]
    Routing { message: String },

    /// Cache operation failures
    #[error("Cache error: {message}")]
    Cache { message: String },

    /// Invalid or missing gateway configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// JSON serialization and deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl ClientError {
    /// The innermost status-bearing provider failure, if any.
    ///
    /// Used by the context-binding layer to tag error-tracker records
    /// with the real upstream status rather than a wrapper's.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            ClientError::Provider(e) => Some(e),
            _ => None,
        }
    }

    /// Classified kind; gateway-local failures map to Configuration.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Provider(e) => e.kind(),
            ClientError::Routing { .. } => ErrorKind::Configuration,
            ClientError::Cache { .. } => ErrorKind::Configuration,
            ClientError::Configuration { .. } => ErrorKind::Configuration,
            ClientError::Serialization { .. } => ErrorKind::Protocol,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_matches_status_table() {
        assert_eq!(classify_status(400), ErrorKind::InvalidRequest);
        assert_eq!(classify_status(401), ErrorKind::InvalidApiKey);
        assert_eq!(classify_status(402), ErrorKind::InsufficientBalance);
        assert_eq!(classify_status(403), ErrorKind::AccessForbidden);
        assert_eq!(classify_status(404), ErrorKind::ModelNotFound);
        assert_eq!(classify_status(408), ErrorKind::Timeout);
        assert_eq!(classify_status(504), ErrorKind::Timeout);
        assert_eq!(classify_status(429), ErrorKind::RateLimit);
        assert_eq!(classify_status(500), ErrorKind::ServiceUnavailable);
        assert_eq!(classify_status(502), ErrorKind::ServiceUnavailable);
        assert_eq!(classify_status(503), ErrorKind::ServiceUnavailable);
        assert_eq!(classify_status(418), ErrorKind::Unknown);
    }

    #[test]
    fn classification_is_idempotent() {
        for status in [400u16, 401, 402, 403, 404, 408, 429, 500, 502, 503, 504, 418] {
            assert_eq!(classify_status(status), classify_status(status));
        }
    }

    #[test]
    fn retry_set_is_exact() {
        let retryable = [
            ErrorKind::RateLimit,
            ErrorKind::Timeout,
            ErrorKind::ServiceUnavailable,
            ErrorKind::Network,
        ];
        let never = [
            ErrorKind::InvalidApiKey,
            ErrorKind::InsufficientBalance,
            ErrorKind::AccessForbidden,
            ErrorKind::ModelNotFound,
            ErrorKind::InvalidRequest,
            ErrorKind::Unsupported,
            ErrorKind::Validation,
            ErrorKind::Configuration,
            ErrorKind::Unknown,
        ];
        for kind in retryable {
            assert!(kind.is_retryable(), "{kind:?} must be retryable");
        }
        for kind in never {
            assert!(!kind.is_retryable(), "{kind:?} must not be retryable");
        }
    }

    #[test]
    fn from_status_builds_classified_variants() {
        let err = ProviderError::from_status(429, "slow down".into(), Some(Duration::from_secs(2)));
        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));

        let err = ProviderError::from_status(503, "overloaded".into(), None);
        match err {
            ProviderError::ServiceUnavailable { reason } => {
                assert_eq!(reason.as_deref(), Some("overloaded"));
            }
            other => panic!("expected ServiceUnavailable, got {other:?}"),
        }

        let err = ProviderError::from_status(418, "teapot".into(), None);
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert!(!err.kind().is_tracked());
    }

    #[test]
    fn unknown_is_not_tracked_everything_else_is() {
        assert!(!ErrorKind::Unknown.is_tracked());
        assert!(ErrorKind::RateLimit.is_tracked());
        assert!(ErrorKind::InvalidApiKey.is_tracked());
    }

    #[test]
    fn client_error_exposes_innermost_provider_error() {
        let inner = ProviderError::ModelNotFound {
            model: "gpt-x".into(),
        };
        let wrapped = ClientError::from(inner);
        let found = wrapped.provider_error().expect("provider error");
        assert_eq!(found.kind(), ErrorKind::ModelNotFound);
        assert_eq!(found.status_code(), 404);
    }
}
