//! Cloud file service — handles, metadata and schema peeking
//!
//! Turns a URL into a [`FileHandle`] (metadata plus a single-shot body)
//! using direct, proxied or auto-probed access, and infers lightweight
//! schemas from small byte ranges.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::{Cache, CacheConfig, CacheStats};
use crate::config::ProviderConfig;
use crate::credentials::{CredentialManager, Credentials};
use crate::error::{CloudError, Result};
use crate::http::{HttpAccessClient, RequestOptions};
use crate::provider::CloudProvider;
use crate::schema::{
    infer_csv_schema, infer_json_schema, placeholder_columnar_schema, FileFormat, FileSchema,
};
use crate::transport::{ByteRange, TransportResponse};

const CSV_SAMPLE_BYTES: u64 = 4 * 1024;
const JSON_SAMPLE_BYTES: u64 = 8 * 1024;
const FOOTER_SAMPLE_BYTES: u64 = 8 * 1024;
const DEFAULT_STREAM_CHUNK: usize = 64 * 1024;

/// How a single file request resolves cross-origin access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorsMode {
    #[default]
    Auto,
    Direct,
    Proxy,
}

/// Options for [`CloudFileService::get_file`]
#[derive(Debug, Clone, Default)]
pub struct GetFileOptions {
    pub cors_handling: CorsMode,
    pub headers: Vec<(String, String)>,
}

/// Object metadata extracted from response headers
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub size: Option<u64>,
    pub content_type: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub provider: CloudProvider,
}

impl FileMetadata {
    fn from_response(response: &TransportResponse, provider: CloudProvider) -> Self {
        Self {
            size: response.content_length(),
            content_type: response
                .header("content-type")
                .unwrap_or("application/octet-stream")
                .to_string(),
            last_modified: response
                .header("last-modified")
                .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            etag: response.header("etag").map(str::to_string),
            provider,
        }
    }
}

/// A fetched remote object: metadata plus a body that can be consumed
/// exactly once (as bytes, text or a chunk stream).
#[derive(Debug)]
pub struct FileHandle {
    url: String,
    provider: CloudProvider,
    metadata: FileMetadata,
    body: Option<Bytes>,
}

impl FileHandle {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn provider(&self) -> CloudProvider {
        self.provider
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    pub fn is_consumed(&self) -> bool {
        self.body.is_none()
    }

    fn take_body(&mut self) -> Result<Bytes> {
        self.body
            .take()
            .ok_or_else(|| CloudError::BodyConsumed(self.url.clone()))
    }

    /// Consume the body as raw bytes
    pub fn as_bytes(&mut self) -> Result<Bytes> {
        self.take_body()
    }

    /// Consume the body as UTF-8 text
    pub fn as_text(&mut self) -> Result<String> {
        let bytes = self.take_body()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CloudError::Schema {
            url: self.url.clone(),
            reason: "body is not valid UTF-8".to_string(),
        })
    }

    /// Consume the body as fixed-size chunks
    pub fn as_chunks(&mut self, chunk_size: usize) -> Result<Vec<Bytes>> {
        let chunk_size = chunk_size.max(1);
        let bytes = self.take_body()?;
        let mut chunks = Vec::with_capacity(bytes.len() / chunk_size + 1);
        let mut offset = 0;
        while offset < bytes.len() {
            let end = (offset + chunk_size).min(bytes.len());
            chunks.push(bytes.slice(offset..end));
            offset = end;
        }
        Ok(chunks)
    }

    /// Consume the body as a stream of chunks
    pub fn as_stream(&mut self, chunk_size: usize) -> Result<impl Stream<Item = Bytes>> {
        Ok(stream::iter(self.as_chunks(chunk_size)?))
    }

    /// Independent handle over the same (unconsumed) body
    pub fn try_clone(&self) -> Result<FileHandle> {
        match &self.body {
            Some(body) => Ok(FileHandle {
                url: self.url.clone(),
                provider: self.provider,
                metadata: self.metadata.clone(),
                body: Some(body.clone()),
            }),
            None => Err(CloudError::BodyConsumed(self.url.clone())),
        }
    }
}

/// URL → file handle resolution with schema peeking
pub struct CloudFileService {
    http: Arc<HttpAccessClient>,
    credentials: Arc<CredentialManager>,
    schema_cache: Cache<FileSchema>,
    providers: parking_lot::RwLock<HashMap<CloudProvider, ProviderConfig>>,
}

impl CloudFileService {
    pub fn new(http: Arc<HttpAccessClient>, credentials: Arc<CredentialManager>) -> Self {
        Self {
            http,
            credentials,
            schema_cache: Cache::new("schemas", CacheConfig::schemas()),
            providers: parking_lot::RwLock::new(HashMap::new()),
        }
    }

    pub fn configure_provider(&self, provider: CloudProvider, config: ProviderConfig) {
        if let Some(credentials) = config.credentials.clone() {
            self.credentials.set_credentials(provider, credentials);
        }
        self.providers.write().insert(provider, config);
        info!(provider = %provider, "Provider configured");
    }

    /// Validate then forward credentials to the credential store
    pub fn set_credentials(&self, provider: CloudProvider, credentials: Credentials) -> Result<()> {
        self.credentials.validate(provider, &credentials)?;
        self.credentials.set_credentials(provider, credentials);
        Ok(())
    }

    async fn auth_headers_for(&self, url: &str) -> Result<Vec<(String, String)>> {
        let provider = CloudProvider::detect(url);
        let config = self.providers.read().get(&provider).cloned();
        match config {
            Some(config) => self.credentials.auth_headers(provider, &config).await,
            None => Ok(Vec::new()),
        }
    }

    async fn fetch_in_mode(
        &self,
        url: &str,
        mode: CorsMode,
        options: &RequestOptions,
    ) -> Result<TransportResponse> {
        match mode {
            CorsMode::Direct => self.http.fetch(url, options).await,
            CorsMode::Proxy => self.http.fetch_via_proxy(url, options).await,
            CorsMode::Auto => self.http.fetch_with_cors_handling(url, options).await,
        }
    }

    /// Fetch a remote object into a [`FileHandle`]
    pub async fn get_file(&self, url: &str, options: &GetFileOptions) -> Result<FileHandle> {
        let provider = CloudProvider::detect(url);
        let mut request = RequestOptions::default().with_headers(options.headers.iter().cloned());
        request.headers.extend(self.auth_headers_for(url).await?);

        let response = self.fetch_in_mode(url, options.cors_handling, &request).await?;
        if !response.is_success() {
            return Err(CloudError::HttpStatus {
                status: response.status,
                url: url.to_string(),
            });
        }

        let metadata = FileMetadata::from_response(&response, provider);
        debug!(
            url,
            provider = %provider,
            size = metadata.size,
            content_type = %metadata.content_type,
            "Fetched cloud file"
        );
        Ok(FileHandle {
            url: url.to_string(),
            provider,
            metadata,
            body: Some(response.body),
        })
    }

    /// Fetch a remote object and return its body as fixed-size chunks
    pub async fn stream_file(
        &self,
        url: &str,
        chunk_size: Option<usize>,
        options: &GetFileOptions,
    ) -> Result<Vec<Bytes>> {
        let mut handle = self.get_file(url, options).await?;
        handle.as_chunks(chunk_size.unwrap_or(DEFAULT_STREAM_CHUNK))
    }

    /// Infer the schema of a remote object, cache-first.
    ///
    /// On a miss this issues a HEAD for the content type (falling back to
    /// the URL suffix) and samples a small byte range per format. Repeated
    /// calls are served from the schema cache with no further network.
    pub async fn get_file_schema(&self, url: &str) -> Result<FileSchema> {
        if let Some(schema) = self.schema_cache.get(url) {
            return Ok(schema);
        }

        let head = self
            .http
            .fetch_with_cors_handling(url, &RequestOptions::head())
            .await;
        let format = head
            .ok()
            .filter(TransportResponse::is_success)
            .and_then(|r| {
                r.header("content-type")
                    .and_then(FileFormat::from_content_type)
            })
            .or_else(|| FileFormat::from_url(url))
            .ok_or_else(|| CloudError::UnsupportedFormat(url.to_string()))?;

        let schema = match format {
            FileFormat::Csv => {
                let sample = self.sample(url, ByteRange::Prefix(CSV_SAMPLE_BYTES)).await?;
                infer_csv_schema(url, &sample)?
            }
            FileFormat::Json => {
                let sample = self.sample(url, ByteRange::Prefix(JSON_SAMPLE_BYTES)).await?;
                infer_json_schema(url, &sample)?
            }
            FileFormat::Parquet | FileFormat::Arrow => {
                // Footer bytes are fetched to confirm readability; parsing
                // them is the SQL engine's job.
                let _footer = self
                    .sample(url, ByteRange::Suffix(FOOTER_SAMPLE_BYTES))
                    .await?;
                placeholder_columnar_schema(format)
            }
        };

        self.schema_cache.set(url.to_string(), schema.clone(), None);
        Ok(schema)
    }

    async fn sample(&self, url: &str, range: ByteRange) -> Result<Bytes> {
        let mut options = RequestOptions::default().with_range(range);
        options.headers.extend(self.auth_headers_for(url).await?);
        let response = self.http.fetch_with_cors_handling(url, &options).await?;
        if !response.is_success() {
            return Err(CloudError::HttpStatus {
                status: response.status,
                url: url.to_string(),
            });
        }
        Ok(response.body)
    }

    /// Fetch several objects in parallel with settle-all semantics:
    /// succeeds while at least one file loads.
    pub async fn get_multiple_files(
        &self,
        urls: &[String],
        options: &GetFileOptions,
    ) -> Result<Vec<FileHandle>> {
        let fetches = urls.iter().map(|url| self.get_file(url, options));
        let outcomes = join_all(fetches).await;

        let mut handles = Vec::new();
        let mut failures = Vec::new();
        for (url, outcome) in urls.iter().zip(outcomes) {
            match outcome {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    warn!(url = %url, error = %err, "File fetch failed");
                    failures.push(err.to_string());
                }
            }
        }

        if handles.is_empty() && !failures.is_empty() {
            return Err(CloudError::BatchFailed {
                count: failures.len(),
                first_error: failures.remove(0),
            });
        }
        Ok(handles)
    }

    pub fn invalidate_schema(&self, url: &str) -> bool {
        self.schema_cache.delete(url)
    }

    pub fn clear_schema_cache(&self) {
        self.schema_cache.clear();
    }

    /// Drop expired schema entries, returning how many were removed
    pub fn cleanup_schema_cache(&self) -> usize {
        self.schema_cache.cleanup()
    }

    pub fn schema_cache_stats(&self) -> CacheStats {
        self.schema_cache.stats()
    }
}
