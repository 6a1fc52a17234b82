//! Background maintenance for long-lived engines
//!
//! Provides periodic tasks for:
//! - Expired cache entry cleanup (schemas, query results, proxied responses)
//! - OAuth2 token refresh ahead of expiry

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use nimbus_cloud::{
    Cache, CloudFileService, CloudProvider, CredentialManager, ProxyService,
};

use crate::sql::Row;

/// Background maintenance scheduler
pub struct MaintenanceScheduler {
    files: Arc<CloudFileService>,
    credentials: Arc<CredentialManager>,
    result_cache: Arc<Cache<Vec<Row>>>,
    proxy: Option<Arc<ProxyService>>,
    oauth_providers: Vec<CloudProvider>,
    handles: Vec<JoinHandle<()>>,
}

impl MaintenanceScheduler {
    pub fn new(
        files: Arc<CloudFileService>,
        credentials: Arc<CredentialManager>,
        result_cache: Arc<Cache<Vec<Row>>>,
        proxy: Option<Arc<ProxyService>>,
        oauth_providers: Vec<CloudProvider>,
    ) -> Self {
        Self {
            files,
            credentials,
            result_cache,
            proxy,
            oauth_providers,
            handles: Vec::new(),
        }
    }

    /// Start all background tasks
    ///
    /// - Cache cleanup: every 5 minutes
    /// - Token refresh: every minute, for providers using OAuth2
    pub fn start(&mut self) {
        self.start_cache_cleanup(Duration::from_secs(5 * 60));
        if !self.oauth_providers.is_empty() {
            self.start_token_refresh(Duration::from_secs(60));
        }
        info!("Maintenance scheduler started");
    }

    /// Start periodic expired-entry cleanup across every cache tier
    pub fn start_cache_cleanup(&mut self, interval: Duration) {
        let files = Arc::clone(&self.files);
        let result_cache = Arc::clone(&self.result_cache);
        let proxy = self.proxy.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let results = result_cache.cleanup();
                let schemas = files.cleanup_schema_cache();
                let proxied = proxy.as_ref().map(|p| p.cleanup_cache()).unwrap_or(0);
                if results + schemas + proxied > 0 {
                    debug!(results, schemas, proxied, "Expired cache entries dropped");
                }
            }
        });
        self.handles.push(handle);
    }

    /// Start refreshing OAuth2 tokens before they expire
    pub fn start_token_refresh(&mut self, interval: Duration) {
        let credentials = Arc::clone(&self.credentials);
        let providers = self.oauth_providers.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                for provider in &providers {
                    if let Err(e) = credentials.refresh_if_needed(*provider).await {
                        error!(provider = %provider, error = %e, "Token refresh failed");
                    }
                }
            }
        });
        self.handles.push(handle);
    }

    /// Run a one-shot maintenance cycle (useful for tests)
    pub async fn run_once(&self) {
        self.result_cache.cleanup();
        self.files.cleanup_schema_cache();
        if let Some(proxy) = &self.proxy {
            proxy.cleanup_cache();
        }
        for provider in &self.oauth_providers {
            let _ = self.credentials.refresh_if_needed(*provider).await;
        }
        info!("Maintenance cycle complete");
    }

    /// Stop all background tasks
    pub fn stop(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        info!("Maintenance scheduler stopped");
    }
}

impl Drop for MaintenanceScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
