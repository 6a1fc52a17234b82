//! CORS-aware HTTP access client
//!
//! Wraps a transport with timeout handling, per-(host, path) CORS capability
//! probing, proxy fallback and token-matched retry with exponential backoff.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, warn};
use url::Url;

use crate::error::{CloudError, Result};
use crate::proxy::ProxyService;
use crate::transport::{
    ByteRange, HttpMethod, HttpTransport, TransportRequest, TransportResponse,
};

/// Cached result of probing whether a URL supports cross-origin direct access
#[derive(Debug, Clone)]
pub struct CorsVerdict {
    pub direct_access: bool,
    pub requires_proxy: bool,
    pub allowed_methods: Vec<String>,
    pub content_length: Option<u64>,
}

/// Per-request options for the access client
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: HttpMethod,
    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    pub range: Option<ByteRange>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: HttpMethod::Get,
            headers: Vec::new(),
            timeout: None,
            range: None,
        }
    }
}

impl RequestOptions {
    pub fn head() -> Self {
        Self {
            method: HttpMethod::Head,
            ..Self::default()
        }
    }

    pub fn with_headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn with_range(mut self, range: ByteRange) -> Self {
        self.range = Some(range);
        self
    }
}

/// HTTP access client with CORS probing and proxy fallback
pub struct HttpAccessClient {
    transport: Arc<dyn HttpTransport>,
    proxy: Option<Arc<ProxyService>>,
    cors_cache: RwLock<HashMap<String, CorsVerdict>>,
    default_timeout: Duration,
    retry_base_delay: Duration,
}

impl HttpAccessClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        proxy: Option<Arc<ProxyService>>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            proxy,
            cors_cache: RwLock::new(HashMap::new()),
            default_timeout,
            retry_base_delay: Duration::from_secs(1),
        }
    }

    /// Override the retry backoff base (used by tests to avoid real sleeps)
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn proxy(&self) -> Option<&Arc<ProxyService>> {
        self.proxy.as_ref()
    }

    /// Cache key for CORS verdicts: host + path, query string ignored
    fn cors_key(url: &str) -> String {
        match Url::parse(url) {
            Ok(parsed) => format!(
                "{}{}",
                parsed.host_str().unwrap_or_default(),
                parsed.path()
            ),
            Err(_) => url.to_string(),
        }
    }

    fn build_request(&self, url: &str, options: &RequestOptions) -> TransportRequest {
        let mut request = TransportRequest::new(
            options.method,
            url,
            options.timeout.unwrap_or(self.default_timeout),
        )
        .with_headers(options.headers.iter().cloned());
        if let Some(range) = options.range {
            request = request.with_header("Range", range.to_header_value());
        }
        request
    }

    /// Plain request straight to the URL, with timeout
    pub async fn fetch(&self, url: &str, options: &RequestOptions) -> Result<TransportResponse> {
        self.transport.execute(self.build_request(url, options)).await
    }

    /// Route the request through the configured proxy service
    pub async fn fetch_via_proxy(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<TransportResponse> {
        match &self.proxy {
            Some(proxy) => proxy.fetch(url, options).await,
            None => Err(CloudError::Config(format!(
                "proxy mode requested for {url} but no proxy endpoint is configured"
            ))),
        }
    }

    /// Probe whether the URL supports cross-origin direct access.
    ///
    /// The verdict is memoized per (host, path); the probe itself is a
    /// single HEAD and is never retried.
    pub async fn test_cors_support(&self, url: &str) -> Result<CorsVerdict> {
        let key = Self::cors_key(url);
        if let Some(verdict) = self.cors_cache.read().get(&key) {
            return Ok(verdict.clone());
        }

        let probe = self.fetch(url, &RequestOptions::head()).await;
        let verdict = match probe {
            Ok(response) if response.is_success() => {
                let allowed_methods = response
                    .header("access-control-allow-methods")
                    .map(|v| {
                        v.split(',')
                            .map(|m| m.trim().to_uppercase())
                            .filter(|m| !m.is_empty())
                            .collect()
                    })
                    .unwrap_or_else(|| vec!["GET".to_string()]);
                CorsVerdict {
                    direct_access: true,
                    requires_proxy: false,
                    allowed_methods,
                    content_length: response.content_length(),
                }
            }
            Ok(response) => {
                debug!(url, status = response.status, "CORS probe rejected");
                CorsVerdict {
                    direct_access: false,
                    requires_proxy: true,
                    allowed_methods: Vec::new(),
                    content_length: None,
                }
            }
            Err(err) => {
                debug!(url, error = %err, "CORS probe failed");
                CorsVerdict {
                    direct_access: false,
                    requires_proxy: true,
                    allowed_methods: Vec::new(),
                    content_length: None,
                }
            }
        };

        self.cors_cache.write().insert(key, verdict.clone());
        Ok(verdict)
    }

    /// Probe, then fetch directly or through the proxy
    pub async fn fetch_with_cors_handling(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<TransportResponse> {
        let verdict = self.test_cors_support(url).await?;
        if verdict.direct_access {
            self.fetch(url, options).await
        } else {
            self.fetch_via_proxy(url, options).await
        }
    }

    /// Retry wrapper over [`Self::fetch_with_cors_handling`].
    ///
    /// Only errors classified retryable by [`CloudError::is_retryable`] are
    /// retried; backoff doubles per completed attempt.
    pub async fn fetch_with_retry(
        &self,
        url: &str,
        options: &RequestOptions,
        retries: u32,
    ) -> Result<TransportResponse> {
        let mut attempts_done: u32 = 0;
        loop {
            match self.fetch_with_cors_handling(url, options).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if attempts_done >= retries || !err.is_retryable() {
                        return Err(err);
                    }
                    let delay = self.retry_base_delay * 2u32.saturating_pow(attempts_done);
                    warn!(
                        url,
                        attempt = attempts_done + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    attempts_done += 1;
                }
            }
        }
    }

    pub fn cached_cors_verdict(&self, url: &str) -> Option<CorsVerdict> {
        self.cors_cache.read().get(&Self::cors_key(url)).cloned()
    }

    pub fn clear_cors_cache(&self) {
        self.cors_cache.write().clear();
    }
}
