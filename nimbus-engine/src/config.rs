//! Engine configuration

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use nimbus_cloud::{CloudProvider, CorsConfig, ProviderConfig, ProxyConfig};

/// Log verbosity exposed through configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> LevelFilter {
        match self {
            Self::Debug => LevelFilter::DEBUG,
            Self::Info => LevelFilter::INFO,
            Self::Warn => LevelFilter::WARN,
            Self::Error => LevelFilter::ERROR,
        }
    }
}

/// Dependency loading knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyConfig {
    #[serde(default = "default_dep_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base retry delay; the n-th retry waits `retry_delay_ms × n`
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Dependencies to start loading eagerly
    #[serde(default)]
    pub preload: Vec<String>,

    #[serde(default = "default_true")]
    pub enable_progress_events: bool,
}

fn default_dep_timeout_ms() -> u64 {
    30_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1_000
}
fn default_true() -> bool {
    true
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_dep_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            preload: Vec::new(),
            enable_progress_events: true,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_true")]
    pub enable_compute_module: bool,

    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,

    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    #[serde(default)]
    pub log_level: LogLevel,

    #[serde(default)]
    pub dependencies: DependencyConfig,

    #[serde(default)]
    pub cors: CorsConfig,

    #[serde(default)]
    pub cloud_providers: HashMap<CloudProvider, ProviderConfig>,

    /// Full proxy pool; when absent, `cors.proxy_endpoint` seeds a
    /// single-endpoint pool
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
}

fn default_max_memory_mb() -> u64 {
    4096
}
fn default_query_timeout_ms() -> u64 {
    30_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_compute_module: true,
            max_memory_mb: default_max_memory_mb(),
            query_timeout_ms: default_query_timeout_ms(),
            log_level: LogLevel::default(),
            dependencies: DependencyConfig::default(),
            cors: CorsConfig::default(),
            cloud_providers: HashMap::new(),
            proxy: None,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compute_module(mut self, enabled: bool) -> Self {
        self.enable_compute_module = enabled;
        self
    }

    pub fn with_max_memory_mb(mut self, mb: u64) -> Self {
        self.max_memory_mb = mb;
        self
    }

    pub fn with_query_timeout_ms(mut self, ms: u64) -> Self {
        self.query_timeout_ms = ms;
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn with_dependencies(mut self, dependencies: DependencyConfig) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_cors(mut self, cors: CorsConfig) -> Self {
        self.cors = cors;
        self
    }

    pub fn with_provider(mut self, provider: CloudProvider, config: ProviderConfig) -> Self {
        self.cloud_providers.insert(provider, config);
        self
    }

    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Effective proxy pool: the explicit pool, or one built from the CORS
    /// endpoint
    pub fn effective_proxy(&self) -> Option<ProxyConfig> {
        if let Some(proxy) = &self.proxy {
            return Some(proxy.clone());
        }
        self.cors.proxy_endpoint.as_ref().map(|endpoint| {
            ProxyConfig::new(vec![nimbus_cloud::ProxyEndpointConfig::new(endpoint.clone())])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::default();
        assert!(cfg.enable_compute_module);
        assert_eq!(cfg.max_memory_mb, 4096);
        assert_eq!(cfg.query_timeout_ms, 30_000);
        assert_eq!(cfg.dependencies.timeout_ms, 30_000);
        assert_eq!(cfg.dependencies.max_retries, 3);
        assert!(cfg.effective_proxy().is_none());
    }

    #[test]
    fn test_deserialize_partial() {
        let cfg: EngineConfig = serde_json::from_str(
            r#"{
                "max_memory_mb": 1024,
                "log_level": "warn",
                "cors": { "strategy": "proxy", "proxy_endpoint": "https://proxy.test" }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.max_memory_mb, 1024);
        assert_eq!(cfg.log_level, LogLevel::Warn);

        let proxy = cfg.effective_proxy().unwrap();
        assert_eq!(proxy.endpoints.len(), 1);
        assert_eq!(proxy.endpoints[0].url, "https://proxy.test");
    }

    #[test]
    fn test_builder() {
        let cfg = EngineConfig::new()
            .with_compute_module(false)
            .with_log_level(LogLevel::Debug)
            .with_query_timeout_ms(5_000);
        assert!(!cfg.enable_compute_module);
        assert_eq!(cfg.log_level, LogLevel::Debug);
        assert_eq!(cfg.query_timeout_ms, 5_000);
    }
}
