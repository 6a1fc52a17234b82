//! # Nimbus Cloud
//!
//! CORS-aware access to cloud object stores (S3-compatible, R2, GCS, Azure
//! Blob) for the Nimbus query engine. Turns a URL into bytes, metadata and
//! lightweight schemas regardless of whether the caller can reach the object
//! directly.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              CloudFileService               │
//! │   (file handles, metadata, schema peeking)  │
//! ├──────────────┬──────────────┬───────────────┤
//! │ HttpAccess   │ ProxyService │ Credential    │
//! │ Client       │ (health ×    │ Manager       │
//! │ (CORS probe, │  rotation,   │ (per-provider │
//! │  retry)      │  caching)    │  auth, OAuth2)│
//! ├──────────────┴──────────────┴───────────────┤
//! │        HttpTransport (reqwest / test)       │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use nimbus_cloud::{
//!     CloudFileService, CredentialManager, GetFileOptions, HttpAccessClient,
//!     ReqwestTransport,
//! };
//!
//! # async fn example() -> nimbus_cloud::Result<()> {
//! let transport = Arc::new(ReqwestTransport::new()?);
//! let http = Arc::new(HttpAccessClient::new(
//!     transport.clone(),
//!     None,
//!     Duration::from_secs(30),
//! ));
//! let credentials = Arc::new(CredentialManager::new(transport));
//! let files = CloudFileService::new(http, credentials);
//!
//! let mut handle = files
//!     .get_file("https://bucket.s3.amazonaws.com/data.csv", &GetFileOptions::default())
//!     .await?;
//! let csv = handle.as_text()?;
//! println!("{} bytes of CSV", csv.len());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod credentials;
pub mod error;
pub mod files;
pub mod http;
pub mod provider;
pub mod proxy;
pub mod schema;
pub mod transport;

// Re-exports for convenience
pub use cache::{Cache, CacheConfig, CacheStats, EstimateSize};
pub use config::{
    AuthMethod, CorsConfig, CorsStrategy, ProviderConfig, ProxyConfig, ProxyEndpointConfig,
};
pub use credentials::{CachedToken, CredentialManager, Credentials};
pub use error::{CloudError, Result};
pub use files::{CloudFileService, CorsMode, FileHandle, FileMetadata, GetFileOptions};
pub use http::{CorsVerdict, HttpAccessClient, RequestOptions};
pub use provider::CloudProvider;
pub use proxy::{ProxyEndpoint, ProxyService};
pub use schema::{ColumnDef, ColumnType, FileFormat, FileSchema};
pub use transport::{
    ByteRange, HttpMethod, HttpTransport, ReqwestTransport, TransportRequest, TransportResponse,
};
