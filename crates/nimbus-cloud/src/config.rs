//! Configuration for the cloud access layer

use serde::{Deserialize, Serialize};

use crate::credentials::Credentials;

/// Strategy for resolving cross-origin access to a cloud URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorsStrategy {
    /// Probe the URL and pick direct or proxied access automatically
    #[default]
    Auto,
    /// Always issue requests straight to the cloud URL
    Direct,
    /// Always route through a configured proxy endpoint
    Proxy,
}

/// CORS handling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default)]
    pub strategy: CorsStrategy,

    /// Proxy endpoint used when direct access is blocked
    #[serde(default)]
    pub proxy_endpoint: Option<String>,

    /// How long probe verdicts and proxied responses stay cached (seconds)
    #[serde(default = "default_cache_timeout_secs")]
    pub cache_timeout_secs: u64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

fn default_cache_timeout_secs() -> u64 {
    300
}
fn default_retry_attempts() -> u32 {
    3
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            strategy: CorsStrategy::default(),
            proxy_endpoint: None,
            cache_timeout_secs: default_cache_timeout_secs(),
            retry_attempts: default_retry_attempts(),
        }
    }
}

/// Authentication scheme for a cloud provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMethod {
    IamRole,
    ApiKey,
    Oauth2,
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::IamRole => "iam-role",
            Self::ApiKey => "api-key",
            Self::Oauth2 => "oauth2",
        };
        f.write_str(s)
    }
}

/// Per-provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub auth_method: AuthMethod,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub account_id: Option<String>,

    #[serde(default)]
    pub credentials: Option<Credentials>,
}

impl ProviderConfig {
    pub fn new(auth_method: AuthMethod) -> Self {
        Self {
            auth_method,
            region: None,
            account_id: None,
            credentials: None,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// A single externally configured proxy endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyEndpointConfig {
    pub url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Lower values are preferred when health scores tie
    #[serde(default = "default_priority")]
    pub priority: u32,
}

fn default_priority() -> u32 {
    1
}

impl ProxyEndpointConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            priority: default_priority(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

/// Proxy service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub endpoints: Vec<ProxyEndpointConfig>,

    /// TTL for cached proxied responses (seconds)
    #[serde(default = "default_proxy_cache_secs")]
    pub cache_duration_secs: u64,

    /// Response-exposure headers injected on every proxied request
    #[serde(default)]
    pub cors_response_headers: Vec<(String, String)>,
}

fn default_proxy_cache_secs() -> u64 {
    300
}

impl ProxyConfig {
    pub fn new(endpoints: Vec<ProxyEndpointConfig>) -> Self {
        Self {
            endpoints,
            cache_duration_secs: default_proxy_cache_secs(),
            cors_response_headers: Vec::new(),
        }
    }
}
