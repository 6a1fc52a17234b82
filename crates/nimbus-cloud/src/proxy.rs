//! Proxy routing with health-scored endpoint rotation
//!
//! Requests that cannot be made directly are wrapped into
//! `GET <endpoint>/fetch?url=<target>` calls against externally configured
//! proxy endpoints. Endpoint health decays on failure and the selection
//! re-sorts on every request, giving a lightweight circuit-breaker without a
//! separate state machine.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, warn};
use url::form_urlencoded;

use crate::cache::{Cache, CacheConfig};
use crate::config::ProxyConfig;
use crate::error::{CloudError, Result};
use crate::http::RequestOptions;
use crate::transport::{HttpMethod, HttpTransport, TransportRequest, TransportResponse};

const HEALTH_MAX: u8 = 100;
const HEALTH_DECAY: u8 = 10;
const CACHE_CLEANUP_THRESHOLD: usize = 100;

/// A proxy endpoint with its current health score
#[derive(Debug, Clone)]
pub struct ProxyEndpoint {
    pub url: String,
    pub api_key: Option<String>,
    pub priority: u32,
    pub health: u8,
}

/// Routes requests through the healthiest configured proxy endpoint
pub struct ProxyService {
    transport: Arc<dyn HttpTransport>,
    endpoints: RwLock<Vec<ProxyEndpoint>>,
    response_cache: Cache<TransportResponse>,
    cache_duration: Duration,
    cors_response_headers: Vec<(String, String)>,
    default_timeout: Duration,
}

impl ProxyService {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        config: ProxyConfig,
        default_timeout: Duration,
    ) -> Self {
        let endpoints = config
            .endpoints
            .into_iter()
            .map(|ep| ProxyEndpoint {
                url: ep.url.trim_end_matches('/').to_string(),
                api_key: ep.api_key,
                priority: ep.priority,
                health: HEALTH_MAX,
            })
            .collect();

        Self {
            transport,
            endpoints: RwLock::new(endpoints),
            response_cache: Cache::new("proxy-responses", CacheConfig::http_responses()),
            cache_duration: Duration::from_secs(config.cache_duration_secs),
            cors_response_headers: config.cors_response_headers,
            default_timeout,
        }
    }

    /// Pick the best endpoint: highest health first, then lowest priority
    /// value. Endpoints at health 0 are never selected.
    fn select(&self, excluded: &HashSet<String>) -> Option<ProxyEndpoint> {
        let mut candidates: Vec<ProxyEndpoint> = self
            .endpoints
            .read()
            .iter()
            .filter(|ep| ep.health > 0 && !excluded.contains(&ep.url))
            .cloned()
            .collect();
        candidates.sort_by(|a, b| b.health.cmp(&a.health).then(a.priority.cmp(&b.priority)));
        candidates.into_iter().next()
    }

    /// Decay an endpoint's health after a failed request
    fn degrade(&self, endpoint_url: &str) {
        let mut endpoints = self.endpoints.write();
        if let Some(ep) = endpoints.iter_mut().find(|ep| ep.url == endpoint_url) {
            ep.health = ep.health.saturating_sub(HEALTH_DECAY);
            warn!(endpoint = endpoint_url, health = ep.health, "Proxy health degraded");
        }
    }

    /// Current health of an endpoint, if registered
    pub fn endpoint_health(&self, endpoint_url: &str) -> Option<u8> {
        let url = endpoint_url.trim_end_matches('/');
        self.endpoints
            .read()
            .iter()
            .find(|ep| ep.url == url)
            .map(|ep| ep.health)
    }

    pub fn has_available_endpoint(&self) -> bool {
        self.endpoints.read().iter().any(|ep| ep.health > 0)
    }

    fn cache_key(url: &str, options: &RequestOptions) -> String {
        let mut hasher = DefaultHasher::new();
        let mut headers = options.headers.clone();
        headers.sort();
        headers.hash(&mut hasher);
        format!("{}:{}:{:x}", options.method.as_str(), url, hasher.finish())
    }

    fn wrap_request(&self, endpoint: &ProxyEndpoint, url: &str, options: &RequestOptions) -> TransportRequest {
        let encoded: String = form_urlencoded::byte_serialize(url.as_bytes()).collect();
        let proxy_url = format!("{}/fetch?url={}", endpoint.url, encoded);

        let mut request = TransportRequest::new(
            HttpMethod::Get,
            proxy_url,
            options.timeout.unwrap_or(self.default_timeout),
        )
        .with_header("X-Original-URL", url);

        if let Some(key) = &endpoint.api_key {
            request = request.with_header("X-Proxy-Authorization", key.clone());
        }
        for (name, value) in &self.cors_response_headers {
            request = request.with_header(name.clone(), value.clone());
        }
        request = request.with_headers(options.headers.iter().cloned());
        if let Some(range) = options.range {
            request = request.with_header("Range", range.to_header_value());
        }
        request
    }

    /// Fetch `url` through a healthy proxy, rotating on failure.
    ///
    /// Fails with [`CloudError::ProxyFailed`] once every endpoint is either
    /// excluded or at health 0 — without issuing a request in the all-dead
    /// case.
    pub async fn fetch(&self, url: &str, options: &RequestOptions) -> Result<TransportResponse> {
        let cache_key = Self::cache_key(url, options);
        if options.method != HttpMethod::Head {
            if let Some(cached) = self.response_cache.get(&cache_key) {
                debug!(url, "Proxy cache hit");
                return Ok(cached);
            }
        }

        let mut excluded: HashSet<String> = HashSet::new();
        loop {
            let endpoint = match self.select(&excluded) {
                Some(ep) => ep,
                None => {
                    return Err(CloudError::ProxyFailed {
                        url: url.to_string(),
                    })
                }
            };

            let request = self.wrap_request(&endpoint, url, options);
            match self.transport.execute(request).await {
                Ok(response) => {
                    if options.method != HttpMethod::Head && response.is_success() {
                        self.response_cache.set(
                            cache_key.clone(),
                            response.clone(),
                            Some(self.cache_duration),
                        );
                        if self.response_cache.len() > CACHE_CLEANUP_THRESHOLD {
                            self.response_cache.cleanup();
                        }
                    }
                    info!(url, endpoint = %endpoint.url, status = response.status, "Proxied fetch");
                    return Ok(response);
                }
                Err(err) => {
                    warn!(url, endpoint = %endpoint.url, error = %err, "Proxy request failed");
                    self.degrade(&endpoint.url);
                    excluded.insert(endpoint.url);
                }
            }
        }
    }

    // ─── Response cache introspection ───

    pub fn cached_urls(&self) -> Vec<String> {
        self.response_cache.keys()
    }

    pub fn cache_len(&self) -> usize {
        self.response_cache.len()
    }

    pub fn clear_cache(&self) {
        self.response_cache.clear();
    }

    /// Drop expired cached responses, returning how many were removed
    pub fn cleanup_cache(&self) -> usize {
        self.response_cache.cleanup()
    }
}
