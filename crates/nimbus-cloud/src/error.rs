//! Error types for nimbus-cloud
//!
//! All operations return `Result<T, CloudError>`. Every variant maps to a
//! stable code string consumed by the engine-side error reporting.

use std::time::Duration;

use thiserror::Error;

use crate::config::AuthMethod;
use crate::provider::CloudProvider;

pub type Result<T> = std::result::Result<T, CloudError>;

/// Unified error type for all cloud access operations
#[derive(Error, Debug)]
pub enum CloudError {
    // ─── Transport Errors ───

    #[error("cross-origin access blocked for {url}: {reason}")]
    Cors { url: String, reason: String },

    #[error("all proxy endpoints exhausted for {url}")]
    ProxyFailed { url: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    // ─── Format & Schema Errors ───

    #[error("unsupported file format for {0}")]
    UnsupportedFormat(String),

    #[error("schema inference failed for {url}: {reason}")]
    Schema { url: String, reason: String },

    #[error("all {count} file fetches failed: {first_error}")]
    BatchFailed { count: usize, first_error: String },

    #[error("response body already consumed for {0}")]
    BodyConsumed(String),

    // ─── Credential Errors ───

    #[error("unsupported auth method {method} for provider {provider}")]
    UnsupportedAuthMethod {
        provider: CloudProvider,
        method: AuthMethod,
    },

    #[error("no OAuth2 token available for provider {0}")]
    NoOauth2Token(CloudProvider),

    #[error("token refresh failed for provider {provider}: {reason}")]
    TokenRefreshFailed {
        provider: CloudProvider,
        reason: String,
    },

    #[error("invalid credentials for provider {provider}: {reason}")]
    InvalidCredentials {
        provider: CloudProvider,
        reason: String,
    },

    // ─── Configuration Errors ───

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CloudError {
    /// Stable machine-readable code for this error
    pub fn code(&self) -> String {
        match self {
            Self::Cors { .. } => "CORS_ERROR".into(),
            Self::ProxyFailed { .. } => "PROXY_FAILED".into(),
            Self::Network(_) | Self::Timeout(_) => "NETWORK_ERROR".into(),
            Self::HttpStatus { status, .. } => format!("HTTP_{status}"),
            Self::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT".into(),
            Self::Schema { .. } => "SCHEMA_ERROR".into(),
            Self::BatchFailed { .. } => "BATCH_FAILED".into(),
            Self::BodyConsumed(_) => "BODY_CONSUMED".into(),
            Self::UnsupportedAuthMethod { .. } => "UNSUPPORTED_AUTH_METHOD".into(),
            Self::NoOauth2Token(_) => "NO_OAUTH2_TOKEN".into(),
            Self::TokenRefreshFailed { .. } => "TOKEN_REFRESH_FAILED".into(),
            Self::InvalidCredentials { .. } => "INVALID_CREDENTIALS".into(),
            Self::Config(_) => "CONFIG_ERROR".into(),
        }
    }

    /// Whether a retry could plausibly succeed.
    ///
    /// Matches on the message tokens used by the HTTP client's retry policy:
    /// network, timeout, connection, temporary, service unavailable and
    /// too-many-requests failures retry; CORS and status-class errors do not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::HttpStatus { status, .. } => matches!(status, 429 | 503),
            _ => {
                let message = self.to_string().to_lowercase();
                RETRYABLE_TOKENS.iter().any(|t| message.contains(t))
            }
        }
    }
}

const RETRYABLE_TOKENS: &[&str] = &[
    "network",
    "timeout",
    "timed out",
    "connection",
    "temporary",
    "service unavailable",
    "too many requests",
];

impl From<url::ParseError> for CloudError {
    fn from(err: url::ParseError) -> Self {
        CloudError::Config(format!("URL parse error: {err}"))
    }
}

impl From<serde_json::Error> for CloudError {
    fn from(err: serde_json::Error) -> Self {
        CloudError::Network(format!("response decode error: {err}"))
    }
}
