//! Remote-table orchestration
//!
//! Binds a cloud URL to a table name inside the embedded SQL engine. Direct
//! registrations read the URL through the engine's own file functions;
//! proxied registrations fetch the object through the cloud file service
//! and register it under a virtual filename. The orchestrator's table map
//! and the engine namespace are kept in lockstep: an entry exists in one
//! iff it exists in the other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use nimbus_cloud::{
    Cache, CloudError, CloudFileService, CloudProvider, CorsMode, Credentials, FileFormat,
    GetFileOptions, HttpAccessClient,
};

use crate::error::{EngineError, Result};
use crate::sql::{run_query, Row, SqlEngine};

/// How a registered table reaches its object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessPath {
    Direct,
    Proxied,
}

/// Options for [`TableOrchestrator::register_cloud_table`]
#[derive(Debug, Clone, Default)]
pub struct CloudTableOptions {
    pub cors_handling: CorsMode,
    pub cache_schema: bool,
    pub streaming: bool,
    pub columns: Option<Vec<String>>,
    pub filter: Option<String>,
}

/// Immutable record of one registered table
#[derive(Debug, Clone)]
pub struct RegisteredTable {
    pub name: String,
    pub url: String,
    pub provider: CloudProvider,
    pub access: AccessPath,
    pub cache_schema: bool,
    pub streaming: bool,
    pub columns: Option<Vec<String>>,
    pub filter: Option<String>,
}

/// Recovery strategies tried in order when a remote-table query fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStrategy {
    /// Re-register the table in proxy mode and retry
    Proxy,
    /// Serve a cached result for the same statement, when one exists
    Cache,
    /// Stop and surface the failure
    Error,
}

/// Initialization options for the orchestrator
#[derive(Default)]
pub struct OrchestratorOptions {
    pub enable_http_extension: bool,
    pub credentials: HashMap<CloudProvider, Credentials>,
}

impl OrchestratorOptions {
    pub fn with_http_extension() -> Self {
        Self {
            enable_http_extension: true,
            credentials: HashMap::new(),
        }
    }
}

pub struct TableOrchestrator {
    sql: Arc<dyn SqlEngine>,
    files: Arc<CloudFileService>,
    http: Arc<HttpAccessClient>,
    tables: tokio::sync::RwLock<HashMap<String, RegisteredTable>>,
    name_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    forced_proxy: AtomicBool,
    proxied_enabled: AtomicBool,
    fallback: parking_lot::RwLock<Vec<FallbackStrategy>>,
    result_cache: Option<Arc<Cache<Vec<Row>>>>,
}

impl TableOrchestrator {
    pub fn new(
        sql: Arc<dyn SqlEngine>,
        files: Arc<CloudFileService>,
        http: Arc<HttpAccessClient>,
        result_cache: Option<Arc<Cache<Vec<Row>>>>,
    ) -> Self {
        Self {
            sql,
            files,
            http,
            tables: tokio::sync::RwLock::new(HashMap::new()),
            name_locks: Mutex::new(HashMap::new()),
            forced_proxy: AtomicBool::new(false),
            proxied_enabled: AtomicBool::new(true),
            fallback: parking_lot::RwLock::new(vec![
                FallbackStrategy::Proxy,
                FallbackStrategy::Cache,
                FallbackStrategy::Error,
            ]),
            result_cache,
        }
    }

    /// Forward credentials and attempt the engine's HTTP filesystem
    /// extension; failure (or opting out) forces proxy mode globally.
    pub async fn initialize(&self, options: OrchestratorOptions) -> Result<()> {
        for (provider, credentials) in options.credentials {
            self.files.set_credentials(provider, credentials)?;
        }

        if options.enable_http_extension {
            match self.try_load_http_extension().await {
                Ok(()) => {
                    self.forced_proxy.store(false, Ordering::SeqCst);
                    info!("SQL engine HTTP filesystem extension loaded");
                }
                Err(err) => {
                    self.forced_proxy.store(true, Ordering::SeqCst);
                    warn!(error = %err, "HTTP filesystem extension unavailable, forcing proxy mode");
                }
            }
        } else {
            self.forced_proxy.store(true, Ordering::SeqCst);
            debug!("HTTP filesystem extension disabled, forcing proxy mode");
        }
        Ok(())
    }

    async fn try_load_http_extension(&self) -> Result<()> {
        let mut conn = self.sql.connect().await?;
        let install = conn.query("INSTALL httpfs").await;
        let outcome = match install {
            Ok(_) => conn.query("LOAD httpfs").await.map(|_| ()),
            Err(err) => Err(err),
        };
        if let Err(err) = conn.close().await {
            warn!(error = %err, "Failed to close SQL connection");
        }
        outcome
    }

    pub fn forced_proxy(&self) -> bool {
        self.forced_proxy.load(Ordering::SeqCst)
    }

    pub fn enable_proxied_access(&self, enabled: bool) {
        self.proxied_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn configure_fallback_strategies(&self, strategies: Vec<FallbackStrategy>) {
        *self.fallback.write() = strategies;
    }

    async fn name_lock(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.name_locks.lock().await;
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Pick direct or proxied access for one registration
    async fn resolve_access(&self, url: &str, mode: CorsMode) -> AccessPath {
        if self.forced_proxy() {
            return AccessPath::Proxied;
        }
        match mode {
            CorsMode::Direct => AccessPath::Direct,
            CorsMode::Proxy => AccessPath::Proxied,
            CorsMode::Auto => match self.http.test_cors_support(url).await {
                Ok(verdict) if verdict.direct_access => AccessPath::Direct,
                _ => AccessPath::Proxied,
            },
        }
    }

    /// Bind a URL to a table name. Re-registration of an existing name
    /// drops and recreates the table.
    pub async fn register_cloud_table(
        &self,
        name: &str,
        url: &str,
        options: &CloudTableOptions,
    ) -> Result<()> {
        validate_identifier(name)?;
        let lock = self.name_lock(name).await;
        let _guard = lock.lock().await;
        self.register_locked(name, url, options).await
    }

    async fn register_locked(
        &self,
        name: &str,
        url: &str,
        options: &CloudTableOptions,
    ) -> Result<()> {
        let format = table_format(url)?;

        if self.tables.read().await.contains_key(name) {
            self.unregister_locked(name).await;
        }

        if options.cache_schema {
            if let Err(err) = self.files.get_file_schema(url).await {
                warn!(table = name, url, error = %err, "Schema prefetch failed");
            }
        }

        let access = self.resolve_access(url, options.cors_handling).await;
        if access == AccessPath::Proxied && !self.proxied_enabled.load(Ordering::SeqCst) {
            return Err(EngineError::TableRegistration {
                table: name.to_string(),
                reason: "proxied access is disabled".to_string(),
            });
        }

        let outcome = match access {
            AccessPath::Direct => self.register_direct(name, url, format, options).await,
            AccessPath::Proxied => self.register_proxied(name, url, format, options).await,
        };

        match outcome {
            Ok(()) => {
                let record = RegisteredTable {
                    name: name.to_string(),
                    url: url.to_string(),
                    provider: CloudProvider::detect(url),
                    access,
                    cache_schema: options.cache_schema,
                    streaming: options.streaming,
                    columns: options.columns.clone(),
                    filter: options.filter.clone(),
                };
                self.tables.write().await.insert(name.to_string(), record);
                info!(table = name, url, access = ?access, "Cloud table registered");
                Ok(())
            }
            Err(err) => {
                // No half-registered state: the engine namespace must not
                // hold a table the registry does not know about.
                let _ = run_query(
                    self.sql.as_ref(),
                    &format!("DROP TABLE IF EXISTS {name}"),
                )
                .await;
                Err(EngineError::TableRegistration {
                    table: name.to_string(),
                    reason: err.to_string(),
                })
            }
        }
    }

    async fn register_direct(
        &self,
        name: &str,
        url: &str,
        format: FileFormat,
        options: &CloudTableOptions,
    ) -> Result<()> {
        let reader = reader_function(format)?;
        let sql = build_create_table(name, &format!("{reader}('{url}')"), options);
        run_query(self.sql.as_ref(), &sql).await?;
        Ok(())
    }

    async fn register_proxied(
        &self,
        name: &str,
        url: &str,
        format: FileFormat,
        options: &CloudTableOptions,
    ) -> Result<()> {
        let get_options = GetFileOptions {
            cors_handling: CorsMode::Proxy,
            ..GetFileOptions::default()
        };
        let mut handle = self.files.get_file(url, &get_options).await?;

        let virtual_name = format!("{name}.{}", format.as_str());
        match format {
            FileFormat::Parquet => {
                let bytes = handle.as_bytes()?;
                self.sql.register_file_buffer(&virtual_name, bytes).await?;
            }
            FileFormat::Csv | FileFormat::Json => {
                let text = handle.as_text()?;
                self.sql.register_file_text(&virtual_name, &text).await?;
            }
            FileFormat::Arrow => {
                return Err(EngineError::Cloud(CloudError::UnsupportedFormat(
                    url.to_string(),
                )))
            }
        }

        let reader = reader_function(format)?;
        let sql = build_create_table(name, &format!("{reader}('{virtual_name}')"), options);
        run_query(self.sql.as_ref(), &sql).await?;
        Ok(())
    }

    /// Run `sql` (or `SELECT * FROM <name>`) against a registered table,
    /// walking the fallback chain on failure.
    pub async fn query_cloud_table(&self, name: &str, sql: Option<&str>) -> Result<Vec<Row>> {
        let record = self
            .tables
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownTable(name.to_string()))?;

        let statement = sql
            .map(str::to_string)
            .unwrap_or_else(|| format!("SELECT * FROM {name}"));
        let cache_key = result_cache_key(name, &statement);

        match run_query(self.sql.as_ref(), &statement).await {
            Ok(rows) => {
                if let Some(cache) = &self.result_cache {
                    cache.set(cache_key, rows.clone(), None);
                }
                Ok(rows)
            }
            Err(err) => {
                warn!(table = name, error = %err, "Cloud table query failed, trying fallbacks");
                self.run_fallback_chain(&record, &statement, &cache_key, err)
                    .await
            }
        }
    }

    async fn run_fallback_chain(
        &self,
        record: &RegisteredTable,
        statement: &str,
        cache_key: &str,
        original: EngineError,
    ) -> Result<Vec<Row>> {
        let chain = self.fallback.read().clone();
        for strategy in chain {
            match strategy {
                FallbackStrategy::Proxy => {
                    debug!(table = %record.name, "Fallback: re-registering via proxy");
                    let options = CloudTableOptions {
                        cors_handling: CorsMode::Proxy,
                        cache_schema: record.cache_schema,
                        streaming: record.streaming,
                        columns: record.columns.clone(),
                        filter: record.filter.clone(),
                    };
                    let reregistered = self
                        .register_cloud_table(&record.name, &record.url, &options)
                        .await;
                    if reregistered.is_ok() {
                        if let Ok(rows) = run_query(self.sql.as_ref(), statement).await {
                            if let Some(cache) = &self.result_cache {
                                cache.set(cache_key.to_string(), rows.clone(), None);
                            }
                            return Ok(rows);
                        }
                    }
                }
                FallbackStrategy::Cache => {
                    if let Some(cache) = &self.result_cache {
                        if let Some(rows) = cache.get(cache_key) {
                            info!(table = %record.name, "Fallback: serving cached result");
                            return Ok(rows);
                        }
                    }
                }
                FallbackStrategy::Error => break,
            }
        }
        Err(EngineError::QueryFailed {
            reason: original.to_string(),
        })
    }

    /// Best-effort DROP followed by registry removal; removal proceeds even
    /// when the DROP fails.
    pub async fn unregister_cloud_table(&self, name: &str) -> Result<()> {
        let lock = self.name_lock(name).await;
        let _guard = lock.lock().await;
        self.unregister_locked(name).await;
        Ok(())
    }

    async fn unregister_locked(&self, name: &str) {
        if let Err(err) =
            run_query(self.sql.as_ref(), &format!("DROP TABLE IF EXISTS {name}")).await
        {
            warn!(table = name, error = %err, "DROP TABLE failed during unregister");
        }
        if self.tables.write().await.remove(name).is_some() {
            info!(table = name, "Cloud table unregistered");
        }
    }

    pub async fn has_table(&self, name: &str) -> bool {
        self.tables.read().await.contains_key(name)
    }

    pub async fn table(&self, name: &str) -> Option<RegisteredTable> {
        self.tables.read().await.get(name).cloned()
    }

    pub async fn registered_tables(&self) -> Vec<RegisteredTable> {
        self.tables.read().await.values().cloned().collect()
    }

    /// Drop registry state without touching the engine (engine teardown
    /// path)
    pub async fn clear(&self) {
        self.tables.write().await.clear();
        self.name_locks.lock().await.clear();
    }
}

fn table_format(url: &str) -> Result<FileFormat> {
    FileFormat::from_url(url)
        .ok_or_else(|| EngineError::Cloud(CloudError::UnsupportedFormat(url.to_string())))
}

fn reader_function(format: FileFormat) -> Result<&'static str> {
    match format {
        FileFormat::Parquet => Ok("read_parquet"),
        FileFormat::Csv => Ok("read_csv_auto"),
        FileFormat::Json => Ok("read_json_auto"),
        FileFormat::Arrow => Err(EngineError::Cloud(CloudError::UnsupportedFormat(
            "arrow".to_string(),
        ))),
    }
}

/// `CREATE TABLE ... AS SELECT` with optional projection and filter applied
/// by textual substitution; column names are not validated here.
fn build_create_table(name: &str, source: &str, options: &CloudTableOptions) -> String {
    let columns = options
        .columns
        .as_ref()
        .filter(|c| !c.is_empty())
        .map(|c| c.join(", "))
        .unwrap_or_else(|| "*".to_string());
    let mut sql = format!("CREATE TABLE {name} AS SELECT {columns} FROM {source}");
    if let Some(filter) = &options.filter {
        sql.push_str(" WHERE ");
        sql.push_str(filter);
    }
    sql
}

fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(EngineError::TableRegistration {
            table: name.to_string(),
            reason: "table name must be a bare SQL identifier".to_string(),
        })
    }
}

fn result_cache_key(table: &str, sql: &str) -> String {
    let normalized = sql.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    format!("{table}:{normalized}")
}
