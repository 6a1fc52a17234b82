//! Engine facade
//!
//! Configures and sequences every subsystem: concurrent dependency
//! startup with the cloud subsystem gated on SQL engine readiness, query
//! routing with optional compute-module post-processing, metrics, status
//! and teardown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use nimbus_cloud::{
    Cache, CacheConfig, CloudFileService, CloudProvider, CorsStrategy, CredentialManager,
    HttpAccessClient, HttpTransport, ProxyService, ReqwestTransport,
};

use crate::compute::{validate_input, ComputeModule, ComputeModuleHandle, ProcessedBatch};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventBus};
use crate::maintenance::MaintenanceScheduler;
use crate::memory::{MemoryStatus, MemoryTracker};
use crate::orchestrator::{
    CloudTableOptions, FallbackStrategy, OrchestratorOptions, RegisteredTable, TableOrchestrator,
};
use crate::registry::{
    DependencyModule, DependencyRegistry, LoadOptions, ModuleLoader, DEP_CLOUD_STORAGE,
    DEP_COLUMNAR_RUNTIME, DEP_COMPUTE_MODULE, DEP_SQL_ENGINE,
};
use crate::runtime::{ColumnarModule, ColumnarRuntimeLoader, RuntimeSource};
use crate::sql::{run_query, Row, SqlEngine, SqlEngineModule};

/// Results above either threshold are offered to the compute module
const LARGE_RESULT_ROWS: usize = 1000;
const LARGE_RESULT_MS: u64 = 1000;

pub type SqlEngineFuture = BoxFuture<'static, Result<Arc<dyn SqlEngine>>>;
pub type SqlEngineLoader = Arc<dyn Fn() -> SqlEngineFuture + Send + Sync>;

pub type ComputeFuture = BoxFuture<'static, Result<Arc<dyn ComputeModule>>>;
pub type ComputeLoader = Arc<dyn Fn() -> ComputeFuture + Send + Sync>;

/// Query result rows plus execution metadata
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub data: Vec<Row>,
    pub metadata: QueryMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryMetadata {
    pub row_count: usize,
    pub execution_time_ms: u64,
    pub post_processed: bool,
    pub compute_time_ms: Option<u64>,
    pub compute_memory_bytes: Option<u64>,
}

/// Aggregate facade status
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub initialized: bool,
    pub sql_engine_ready: bool,
    pub columnar_runtime_ready: bool,
    pub compute_module_ready: bool,
    pub overall_ready: bool,
    pub memory_usage: MemoryStatus,
    pub uptime_ms: u64,
    pub dependency_health_score: u8,
}

/// Rolling query metrics
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineMetrics {
    pub query_count: u64,
    pub total_execution_time_ms: u64,
    pub average_response_time_ms: f64,
    pub memory_peak_bytes: usize,
}

/// Registry module wrapping the cloud subsystem
struct CloudModule {
    orchestrator: Arc<TableOrchestrator>,
}

impl DependencyModule for CloudModule {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Builder wiring collaborator loaders into the facade
pub struct EngineBuilder {
    config: EngineConfig,
    transport: Option<Arc<dyn HttpTransport>>,
    sql_loader: Option<SqlEngineLoader>,
    columnar_sources: Vec<RuntimeSource>,
    compute_loader: Option<ComputeLoader>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            transport: None,
            sql_loader: None,
            columnar_sources: Vec::new(),
            compute_loader: None,
        }
    }

    /// Override the HTTP transport (tests inject scripted transports here)
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_sql_engine_loader(
        mut self,
        loader: impl Fn() -> SqlEngineFuture + Send + Sync + 'static,
    ) -> Self {
        self.sql_loader = Some(Arc::new(loader));
        self
    }

    pub fn with_columnar_sources(mut self, sources: Vec<RuntimeSource>) -> Self {
        self.columnar_sources = sources;
        self
    }

    pub fn with_compute_loader(
        mut self,
        loader: impl Fn() -> ComputeFuture + Send + Sync + 'static,
    ) -> Self {
        self.compute_loader = Some(Arc::new(loader));
        self
    }

    pub fn build(self) -> Result<NimbusEngine> {
        let sql_loader = self
            .sql_loader
            .ok_or_else(|| EngineError::Config("an SQL engine loader is required".into()))?;

        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };

        let request_timeout = Duration::from_millis(self.config.query_timeout_ms);
        let proxy = self
            .config
            .effective_proxy()
            .map(|cfg| Arc::new(ProxyService::new(transport.clone(), cfg, request_timeout)));

        let http = Arc::new(HttpAccessClient::new(
            transport.clone(),
            proxy,
            request_timeout,
        ));
        let credentials = Arc::new(CredentialManager::new(transport.clone()));
        let files = Arc::new(CloudFileService::new(http.clone(), credentials.clone()));

        for (provider, provider_config) in &self.config.cloud_providers {
            files.configure_provider(*provider, provider_config.clone());
        }

        let events = EventBus::new();
        let registry = Arc::new(DependencyRegistry::new(
            events.clone(),
            LoadOptions::from(&self.config.dependencies),
        ));

        let columnar_loader = if self.columnar_sources.is_empty() {
            None
        } else {
            Some(ColumnarRuntimeLoader::new(self.columnar_sources).into_loader())
        };

        let result_cache = Arc::new(Cache::new("query-results", CacheConfig::query_results()));
        let oauth_providers = self
            .config
            .cloud_providers
            .iter()
            .filter(|(_, cfg)| cfg.auth_method == nimbus_cloud::AuthMethod::Oauth2)
            .map(|(provider, _)| *provider)
            .collect();
        let maintenance = MaintenanceScheduler::new(
            files.clone(),
            credentials.clone(),
            result_cache.clone(),
            http.proxy().cloned(),
            oauth_providers,
        );

        Ok(NimbusEngine {
            config: self.config,
            events,
            registry,
            http,
            credentials,
            files,
            result_cache,
            memory: Arc::new(MemoryTracker::new()),
            sql_loader,
            columnar_loader,
            compute_loader: self.compute_loader,
            sql: RwLock::new(None),
            compute: RwLock::new(None),
            columnar: RwLock::new(None),
            orchestrator: RwLock::new(None),
            metrics: RwLock::new(EngineMetrics::default()),
            maintenance: parking_lot::Mutex::new(maintenance),
            started_at: Instant::now(),
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }
}

/// The browser-embeddable analytical query engine facade
pub struct NimbusEngine {
    config: EngineConfig,
    events: EventBus,
    registry: Arc<DependencyRegistry>,
    http: Arc<HttpAccessClient>,
    credentials: Arc<CredentialManager>,
    files: Arc<CloudFileService>,
    result_cache: Arc<Cache<Vec<Row>>>,
    memory: Arc<MemoryTracker>,
    sql_loader: SqlEngineLoader,
    columnar_loader: Option<ModuleLoader>,
    compute_loader: Option<ComputeLoader>,
    sql: RwLock<Option<Arc<dyn SqlEngine>>>,
    compute: RwLock<Option<Arc<dyn ComputeModule>>>,
    columnar: RwLock<Option<Arc<ColumnarModule>>>,
    orchestrator: RwLock<Option<Arc<TableOrchestrator>>>,
    metrics: RwLock<EngineMetrics>,
    maintenance: parking_lot::Mutex<MaintenanceScheduler>,
    started_at: Instant,
    initialized: AtomicBool,
    closed: AtomicBool,
}

impl NimbusEngine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &Arc<DependencyRegistry> {
        &self.registry
    }

    pub fn files(&self) -> &Arc<CloudFileService> {
        &self.files
    }

    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    /// The accepted columnar runtime, once loaded
    pub fn columnar_runtime(&self) -> Option<Arc<ColumnarModule>> {
        self.columnar.read().clone()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(EngineError::Closed)
        } else {
            Ok(())
        }
    }

    fn dependency_timeout(&self) -> Duration {
        Duration::from_millis(self.config.dependencies.timeout_ms)
    }

    /// Start every subsystem concurrently.
    ///
    /// The SQL engine is the only fatal dependency; the columnar runtime
    /// and compute module degrade with a warning, and the cloud subsystem
    /// internally waits on SQL engine readiness before it completes.
    pub async fn initialize(&self) -> Result<()> {
        self.ensure_open()?;
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        let progress = self.config.dependencies.enable_progress_events;
        if progress {
            self.events.emit_progress("initialize", 0);
        }

        let options = LoadOptions::from(&self.config.dependencies);

        let sql_future = self.registry.load(
            DEP_SQL_ENGINE,
            self.sql_module_loader(),
            Some(options.clone()),
        );
        let cloud_future = self.registry.load(
            DEP_CLOUD_STORAGE,
            self.cloud_module_loader(),
            Some(options.clone()),
        );
        let columnar_future = async {
            match &self.columnar_loader {
                Some(loader) => Some(
                    self.registry
                        .load(DEP_COLUMNAR_RUNTIME, loader.clone(), Some(options.clone()))
                        .await,
                ),
                None => None,
            }
        };
        let compute_future = async {
            match (&self.compute_loader, self.config.enable_compute_module) {
                (Some(loader), true) => Some(
                    self.registry
                        .load(DEP_COMPUTE_MODULE, self.compute_module_loader(loader.clone()), Some(options.clone()))
                        .await,
                ),
                _ => None,
            }
        };

        let (sql_outcome, cloud_outcome, columnar_outcome, compute_outcome) =
            futures::join!(sql_future, cloud_future, columnar_future, compute_future);

        let sql_module = sql_outcome?;
        *self.sql.write() = Some(downcast_sql(&sql_module)?);
        if progress {
            self.events.emit_progress("initialize", 50);
        }

        match cloud_outcome {
            Ok(module) => {
                *self.orchestrator.write() = Some(downcast_cloud(&module)?);
            }
            Err(err) => {
                warn!(error = %err, "Cloud subsystem unavailable, remote tables disabled");
            }
        }

        if let Some(outcome) = columnar_outcome {
            match outcome {
                Ok(module) => match downcast_columnar(&module) {
                    Ok(columnar) => *self.columnar.write() = Some(columnar),
                    Err(err) => warn!(error = %err, "Columnar runtime module mismatch"),
                },
                Err(err) => warn!(error = %err, "Columnar runtime unavailable"),
            }
        }

        if let Some(outcome) = compute_outcome {
            match outcome {
                Ok(module) => match downcast_compute(&module) {
                    Ok(compute) => *self.compute.write() = Some(compute),
                    Err(err) => warn!(error = %err, "Compute module mismatch"),
                },
                Err(err) => {
                    warn!(error = %err, "Compute module unavailable, post-processing disabled");
                }
            }
        }

        self.maintenance.lock().start();

        self.initialized.store(true, Ordering::SeqCst);
        if progress {
            self.events.emit_progress("initialize", 100);
        }
        info!(
            sql_ready = self.registry.is_ready(DEP_SQL_ENGINE),
            cloud_ready = self.registry.is_ready(DEP_CLOUD_STORAGE),
            compute_ready = self.registry.is_ready(DEP_COMPUTE_MODULE),
            "Engine initialized"
        );
        Ok(())
    }

    fn sql_module_loader(&self) -> ModuleLoader {
        let sql_loader = self.sql_loader.clone();
        Arc::new(move || {
            let sql_loader = sql_loader.clone();
            Box::pin(async move {
                let engine = sql_loader().await?;
                Ok(Arc::new(SqlEngineModule::new(engine)) as Arc<dyn DependencyModule>)
            })
        })
    }

    fn compute_module_loader(&self, loader: ComputeLoader) -> ModuleLoader {
        Arc::new(move || {
            let loader = loader.clone();
            Box::pin(async move {
                let module = loader().await?;
                Ok(Arc::new(ComputeModuleHandle::new(module)) as Arc<dyn DependencyModule>)
            })
        })
    }

    /// The cloud subsystem's loader blocks on SQL engine readiness before
    /// constructing the orchestrator.
    fn cloud_module_loader(&self) -> ModuleLoader {
        let registry = self.registry.clone();
        let files = self.files.clone();
        let http = self.http.clone();
        let result_cache = self.result_cache.clone();
        let timeout = self.dependency_timeout();
        let enable_http_extension = self.config.cors.strategy != CorsStrategy::Proxy;

        Arc::new(move || {
            let registry = registry.clone();
            let files = files.clone();
            let http = http.clone();
            let result_cache = result_cache.clone();
            Box::pin(async move {
                let module = registry.wait_for(DEP_SQL_ENGINE, timeout).await?;
                let engine = downcast_sql(&module)?;
                let orchestrator = Arc::new(TableOrchestrator::new(
                    engine,
                    files,
                    http,
                    Some(result_cache),
                ));
                orchestrator
                    .initialize(OrchestratorOptions {
                        enable_http_extension,
                        credentials: HashMap::new(),
                    })
                    .await?;
                Ok(Arc::new(CloudModule { orchestrator }) as Arc<dyn DependencyModule>)
            })
        })
    }

    fn sql_engine(&self) -> Result<Arc<dyn SqlEngine>> {
        self.sql.read().clone().ok_or(EngineError::NotInitialized)
    }

    fn table_orchestrator(&self) -> Result<Arc<TableOrchestrator>> {
        self.orchestrator
            .read()
            .clone()
            .ok_or(EngineError::NotInitialized)
    }

    // ─── Readiness ───

    pub async fn wait_for_ready(&self, names: Option<&[&str]>, timeout: Duration) -> Result<()> {
        self.registry.wait_for_all(names, timeout).await.map(|_| ())
    }

    pub async fn wait_for_sql_engine(&self) -> Result<()> {
        self.registry
            .wait_for(DEP_SQL_ENGINE, self.dependency_timeout())
            .await
            .map(|_| ())
    }

    pub async fn wait_for_columnar_runtime(&self) -> Result<()> {
        self.registry
            .wait_for(DEP_COLUMNAR_RUNTIME, self.dependency_timeout())
            .await
            .map(|_| ())
    }

    pub async fn wait_for_compute_module(&self) -> Result<()> {
        self.registry
            .wait_for(DEP_COMPUTE_MODULE, self.dependency_timeout())
            .await
            .map(|_| ())
    }

    /// Start loading the named dependencies eagerly; failures are logged,
    /// not surfaced
    pub async fn preload(&self, names: &[&str]) {
        for name in names {
            let outcome = match *name {
                DEP_SQL_ENGINE => Some(
                    self.registry
                        .load(DEP_SQL_ENGINE, self.sql_module_loader(), None)
                        .await,
                ),
                DEP_COLUMNAR_RUNTIME => match &self.columnar_loader {
                    Some(loader) => Some(
                        self.registry
                            .load(DEP_COLUMNAR_RUNTIME, loader.clone(), None)
                            .await,
                    ),
                    None => None,
                },
                DEP_COMPUTE_MODULE => match &self.compute_loader {
                    Some(loader) => Some(
                        self.registry
                            .load(
                                DEP_COMPUTE_MODULE,
                                self.compute_module_loader(loader.clone()),
                                None,
                            )
                            .await,
                    ),
                    None => None,
                },
                other => {
                    warn!(dependency = other, "Unknown dependency in preload");
                    None
                }
            };
            if let Some(Err(err)) = outcome {
                warn!(dependency = name, error = %err, "Preload failed");
            }
        }
    }

    // ─── Queries ───

    /// Run SQL through the engine; large results are post-processed by the
    /// compute module when it is available, degrading to passthrough on
    /// failure.
    pub async fn query(&self, sql: &str) -> Result<QueryOutcome> {
        self.ensure_open()?;
        self.registry
            .wait_for(DEP_SQL_ENGINE, self.dependency_timeout())
            .await?;
        let engine = self.sql_engine()?;

        let started = Instant::now();
        let rows = run_query(engine.as_ref(), sql).await?;
        let execution_time_ms = started.elapsed().as_millis() as u64;

        let mut outcome = QueryOutcome {
            metadata: QueryMetadata {
                row_count: rows.len(),
                execution_time_ms,
                post_processed: false,
                compute_time_ms: None,
                compute_memory_bytes: None,
            },
            data: rows,
        };

        let is_large = outcome.metadata.row_count > LARGE_RESULT_ROWS
            || execution_time_ms > LARGE_RESULT_MS;
        if is_large {
            let compute = self.compute.read().clone();
            if let Some(compute) = compute {
                match self.post_process(compute.as_ref(), &outcome.data).await {
                    Ok((data, batch)) => {
                        outcome.data = data;
                        outcome.metadata.post_processed = true;
                        outcome.metadata.compute_time_ms = Some(batch.execution_time_ms);
                        outcome.metadata.compute_memory_bytes = Some(batch.memory_used_bytes);
                        self.memory.observe_peak(batch.memory_used_bytes as usize);
                    }
                    Err(err) => {
                        warn!(error = %err, "Post-processing failed, returning raw result");
                    }
                }
            }
        }

        let mut metrics = self.metrics.write();
        metrics.query_count += 1;
        metrics.total_execution_time_ms += execution_time_ms;
        metrics.average_response_time_ms =
            metrics.total_execution_time_ms as f64 / metrics.query_count as f64;
        metrics.memory_peak_bytes = self.memory.peak_usage();
        debug!(
            rows = outcome.metadata.row_count,
            execution_time_ms,
            post_processed = outcome.metadata.post_processed,
            "Query executed"
        );
        Ok(outcome)
    }

    async fn post_process(
        &self,
        compute: &dyn ComputeModule,
        rows: &[Row],
    ) -> Result<(Vec<Row>, ProcessedBatch)> {
        let payload = serde_json::to_vec(rows)
            .map_err(|e| EngineError::Compute(format!("serialization failed: {e}")))?;
        validate_input(&payload)?;
        let memory_cap = self.config.max_memory_mb as usize * 1024 * 1024;
        if payload.len() > memory_cap {
            return Err(EngineError::Compute(format!(
                "result payload of {} bytes exceeds the {} MB memory limit",
                payload.len(),
                self.config.max_memory_mb
            )));
        }

        let buffer = self.memory.allocate(payload.len());
        let outcome = compute.process_data(&payload).await;
        self.memory.release(buffer);

        let batch = outcome?;
        let data: Vec<Row> = serde_json::from_str(&batch.data)
            .map_err(|e| EngineError::Compute(format!("invalid processed payload: {e}")))?;
        Ok((data, batch))
    }

    // ─── Tables ───

    pub async fn register_cloud_table(
        &self,
        name: &str,
        url: &str,
        options: &CloudTableOptions,
    ) -> Result<()> {
        self.ensure_open()?;
        self.registry
            .wait_for(DEP_CLOUD_STORAGE, self.dependency_timeout())
            .await?;
        self.table_orchestrator()?
            .register_cloud_table(name, url, options)
            .await
    }

    pub async fn query_cloud_table(&self, name: &str, sql: Option<&str>) -> Result<Vec<Row>> {
        self.ensure_open()?;
        self.table_orchestrator()?.query_cloud_table(name, sql).await
    }

    pub async fn unregister_cloud_table(&self, name: &str) -> Result<()> {
        self.ensure_open()?;
        self.table_orchestrator()?.unregister_cloud_table(name).await
    }

    pub async fn registered_cloud_tables(&self) -> Result<Vec<RegisteredTable>> {
        Ok(self.table_orchestrator()?.registered_tables().await)
    }

    pub fn configure_fallback_strategies(&self, strategies: Vec<FallbackStrategy>) -> Result<()> {
        self.table_orchestrator()?
            .configure_fallback_strategies(strategies);
        Ok(())
    }

    /// Register in-memory rows as a table through the engine's JSON text
    /// path
    pub async fn load_data(&self, rows: &[Row], table_name: &str) -> Result<()> {
        self.ensure_open()?;
        self.registry
            .wait_for(DEP_SQL_ENGINE, self.dependency_timeout())
            .await?;
        let engine = self.sql_engine()?;

        let virtual_name = format!("{table_name}.json");
        let text = serde_json::to_string(rows)
            .map_err(|e| EngineError::Sql(format!("row serialization failed: {e}")))?;
        engine.register_file_text(&virtual_name, &text).await?;
        run_query(
            engine.as_ref(),
            &format!("DROP TABLE IF EXISTS {table_name}"),
        )
        .await?;
        run_query(
            engine.as_ref(),
            &format!("CREATE TABLE {table_name} AS SELECT * FROM read_json_auto('{virtual_name}')"),
        )
        .await?;
        info!(table = table_name, rows = rows.len(), "In-memory data loaded");
        Ok(())
    }

    pub async fn create_table(&self, name: &str, as_select: &str) -> Result<()> {
        self.ensure_open()?;
        let engine = self.sql_engine()?;
        run_query(
            engine.as_ref(),
            &format!("CREATE TABLE {name} AS {as_select}"),
        )
        .await?;
        Ok(())
    }

    pub async fn list_tables(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        let engine = self.sql_engine()?;
        let rows = run_query(
            engine.as_ref(),
            "SELECT table_name FROM information_schema.tables ORDER BY table_name",
        )
        .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("table_name").and_then(|v| v.as_str()))
            .map(str::to_string)
            .collect())
    }

    pub async fn get_table_info(&self, name: &str) -> Result<Vec<Row>> {
        self.ensure_open()?;
        let engine = self.sql_engine()?;
        run_query(engine.as_ref(), &format!("DESCRIBE {name}")).await
    }

    // ─── Status & Teardown ───

    pub fn status(&self) -> EngineStatus {
        let initialized = self.initialized.load(Ordering::SeqCst);
        let sql_engine_ready = self.registry.is_ready(DEP_SQL_ENGINE);
        EngineStatus {
            initialized,
            sql_engine_ready,
            columnar_runtime_ready: self.registry.is_ready(DEP_COLUMNAR_RUNTIME),
            compute_module_ready: self.registry.is_ready(DEP_COMPUTE_MODULE),
            overall_ready: initialized
                && sql_engine_ready
                && self.registry.is_ready(DEP_CLOUD_STORAGE),
            memory_usage: self.memory.status(),
            uptime_ms: self.started_at.elapsed().as_millis() as u64,
            dependency_health_score: self.registry.health().health_score,
        }
    }

    pub fn metrics(&self) -> EngineMetrics {
        self.metrics.read().clone()
    }

    /// Terminate the SQL engine, destroy every cache and clear all shared
    /// state. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(orchestrator) = self.orchestrator.write().take() {
            orchestrator.clear().await;
        }
        if let Some(engine) = self.sql.write().take() {
            if let Err(err) = engine.terminate().await {
                warn!(error = %err, "SQL engine termination failed");
            }
        }
        *self.compute.write() = None;
        *self.columnar.write() = None;

        self.maintenance.lock().stop();

        self.result_cache.clear();
        self.files.clear_schema_cache();
        self.http.clear_cors_cache();
        if let Some(proxy) = self.http.proxy() {
            proxy.clear_cache();
        }
        self.memory.reset();
        self.registry.clear();
        self.initialized.store(false, Ordering::SeqCst);
        info!("Engine closed");
        Ok(())
    }
}

fn downcast_sql(module: &Arc<dyn DependencyModule>) -> Result<Arc<dyn SqlEngine>> {
    module
        .as_any()
        .downcast_ref::<SqlEngineModule>()
        .map(SqlEngineModule::engine)
        .ok_or_else(|| EngineError::Config("unexpected module type for sql-engine".into()))
}

fn downcast_cloud(module: &Arc<dyn DependencyModule>) -> Result<Arc<TableOrchestrator>> {
    module
        .as_any()
        .downcast_ref::<CloudModule>()
        .map(|m| m.orchestrator.clone())
        .ok_or_else(|| EngineError::Config("unexpected module type for cloud-storage".into()))
}

fn downcast_columnar(module: &Arc<dyn DependencyModule>) -> Result<Arc<ColumnarModule>> {
    // The loader produced the Arc<ColumnarModule> itself; rebuilding one
    // from the trait object keeps the registry signature uniform.
    module
        .as_any()
        .downcast_ref::<ColumnarModule>()
        .map(|m| {
            Arc::new(ColumnarModule::from_parts(
                m.runtime(),
                m.source().to_string(),
            ))
        })
        .ok_or_else(|| EngineError::Config("unexpected module type for columnar-runtime".into()))
}

fn downcast_compute(module: &Arc<dyn DependencyModule>) -> Result<Arc<dyn ComputeModule>> {
    module
        .as_any()
        .downcast_ref::<ComputeModuleHandle>()
        .map(ComputeModuleHandle::module)
        .ok_or_else(|| EngineError::Config("unexpected module type for compute-module".into()))
}
