//! Dependency lifecycle registry
//!
//! Tracks named async dependencies through
//! `initializing → loading → {ready | error | timeout}` with retry-aware
//! loading, per-dependency readiness gates and a typed event stream. At
//! most one load runs per name; concurrent callers share the in-flight
//! outcome.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{try_join_all, BoxFuture};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::DependencyConfig;
use crate::error::{EngineError, Result};
use crate::events::{DependencyTransition, EventBus};

pub const DEP_SQL_ENGINE: &str = "sql-engine";
pub const DEP_COLUMNAR_RUNTIME: &str = "columnar-runtime";
pub const DEP_COMPUTE_MODULE: &str = "compute-module";
pub const DEP_CLOUD_STORAGE: &str = "cloud-storage";

const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Errors carrying these tokens never retry, however many retries remain:
/// the condition will not clear on its own.
const NON_RETRYABLE_TOKENS: &[&str] = &[
    "cors",
    "404",
    "webassembly",
    "shared-array-buffer",
    "sharedarraybuffer",
];

/// A loaded module held by the registry
pub trait DependencyModule: Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;

    /// Version string, when the module exposes one
    fn version(&self) -> Option<String> {
        None
    }
}

impl std::fmt::Debug for dyn DependencyModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyModule")
            .field("version", &self.version())
            .finish()
    }
}

pub type ModuleFuture = BoxFuture<'static, Result<Arc<dyn DependencyModule>>>;
pub type ModuleLoader = Arc<dyn Fn() -> ModuleFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyState {
    Initializing,
    Loading,
    Ready,
    Error,
    Timeout,
}

impl DependencyState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Error | Self::Timeout)
    }
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl From<&DependencyConfig> for LoadOptions {
    fn from(config: &DependencyConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

/// Snapshot of one dependency record
#[derive(Debug, Clone, Serialize)]
pub struct DependencyInfo {
    pub name: String,
    pub state: DependencyState,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub version: Option<String>,
    pub elapsed_ms: u64,
}

/// Aggregate registry health
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryHealth {
    pub total: usize,
    pub ready: usize,
    pub loading: usize,
    pub error: usize,
    pub timeout: usize,
    pub health_score: u8,
}

struct Record {
    state: DependencyState,
    started_at: Instant,
    ended_at: Option<Instant>,
    retry_count: u32,
    options: LoadOptions,
    last_error: Option<String>,
    version: Option<String>,
    module: Option<Arc<dyn DependencyModule>>,
    gate: watch::Sender<DependencyState>,
}

impl Record {
    fn new(options: LoadOptions) -> Self {
        let (gate, _) = watch::channel(DependencyState::Initializing);
        Self {
            state: DependencyState::Initializing,
            started_at: Instant::now(),
            ended_at: None,
            retry_count: 0,
            options,
            last_error: None,
            version: None,
            module: None,
            gate,
        }
    }

    fn set_state(&mut self, state: DependencyState) {
        self.state = state;
        let _ = self.gate.send(state);
    }

    fn elapsed(&self) -> Duration {
        self.ended_at
            .map(|end| end - self.started_at)
            .unwrap_or_else(|| self.started_at.elapsed())
    }
}

enum LoadEntry {
    Run,
    Wait(watch::Receiver<DependencyState>),
    Done(Arc<dyn DependencyModule>),
}

/// Registry of named async dependencies
pub struct DependencyRegistry {
    records: RwLock<HashMap<String, Record>>,
    events: EventBus,
    default_options: LoadOptions,
}

impl DependencyRegistry {
    pub fn new(events: EventBus, default_options: LoadOptions) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            events,
            default_options,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Create a record if absent; idempotent
    pub fn register(&self, name: &str, options: Option<LoadOptions>) -> DependencyInfo {
        let mut records = self.records.write();
        let record = records.entry(name.to_string()).or_insert_with(|| {
            debug!(dependency = name, "Dependency registered");
            Record::new(options.unwrap_or_else(|| self.default_options.clone()))
        });
        Self::info_of(name, record)
    }

    /// Load a dependency with timeout and retry.
    ///
    /// At most one load runs per name; callers arriving while a load is in
    /// flight await its outcome instead of starting another.
    pub async fn load(
        &self,
        name: &str,
        loader: ModuleLoader,
        options: Option<LoadOptions>,
    ) -> Result<Arc<dyn DependencyModule>> {
        let entry = {
            let mut records = self.records.write();
            let record = records.entry(name.to_string()).or_insert_with(|| {
                Record::new(options.clone().unwrap_or_else(|| self.default_options.clone()))
            });
            match record.state {
                DependencyState::Ready => {
                    LoadEntry::Done(record.module.clone().expect("ready module"))
                }
                DependencyState::Loading => LoadEntry::Wait(record.gate.subscribe()),
                _ => {
                    if let Some(options) = options {
                        record.options = options;
                    }
                    record.retry_count = 0;
                    record.started_at = Instant::now();
                    record.ended_at = None;
                    record.last_error = None;
                    record.set_state(DependencyState::Loading);
                    LoadEntry::Run
                }
            }
        };

        match entry {
            LoadEntry::Done(module) => Ok(module),
            LoadEntry::Wait(gate) => self.await_outcome(name, gate).await,
            LoadEntry::Run => {
                self.events
                    .emit_dependency(name, DependencyTransition::Loading, Duration::ZERO);
                self.run_load(name, loader).await
            }
        }
    }

    async fn run_load(
        &self,
        name: &str,
        loader: ModuleLoader,
    ) -> Result<Arc<dyn DependencyModule>> {
        let options = {
            let records = self.records.read();
            records
                .get(name)
                .map(|r| r.options.clone())
                .unwrap_or_else(|| self.default_options.clone())
        };
        let started = Instant::now();

        loop {
            match tokio::time::timeout(options.timeout, loader()).await {
                // Deadline fired before the loader settled.
                Err(_) => {
                    let timeout_ms = options.timeout.as_millis() as u64;
                    {
                        let mut records = self.records.write();
                        if let Some(record) = records.get_mut(name) {
                            record.last_error =
                                Some(format!("timed out after {timeout_ms} ms"));
                            record.ended_at = Some(Instant::now());
                            record.set_state(DependencyState::Timeout);
                        }
                    }
                    self.events.emit_dependency(
                        name,
                        DependencyTransition::Timeout,
                        started.elapsed(),
                    );
                    warn!(dependency = name, timeout_ms, "Dependency load timed out");
                    return Err(EngineError::DependencyTimeout {
                        name: name.to_string(),
                        timeout_ms,
                    });
                }
                Ok(Ok(module)) => {
                    let version = module.version();
                    {
                        let mut records = self.records.write();
                        if let Some(record) = records.get_mut(name) {
                            record.module = Some(module.clone());
                            record.version = version.clone();
                            record.ended_at = Some(Instant::now());
                            record.set_state(DependencyState::Ready);
                        }
                    }
                    self.events.emit_dependency(
                        name,
                        DependencyTransition::Ready {
                            version: version.clone(),
                        },
                        started.elapsed(),
                    );
                    info!(
                        dependency = name,
                        version = version.as_deref().unwrap_or("unknown"),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Dependency ready"
                    );
                    return Ok(module);
                }
                Ok(Err(err)) => {
                    let reason = err.to_string();
                    let (should_retry, attempt) = {
                        let mut records = self.records.write();
                        let record = match records.get_mut(name) {
                            Some(record) => record,
                            None => return Err(EngineError::Closed),
                        };
                        record.retry_count += 1;
                        let attempt = record.retry_count;
                        let should_retry =
                            attempt < options.max_retries && is_retryable_load_error(&reason);
                        if !should_retry {
                            record.last_error = Some(reason.clone());
                            record.ended_at = Some(Instant::now());
                            record.set_state(DependencyState::Error);
                        }
                        (should_retry, attempt)
                    };

                    if should_retry {
                        self.events.emit_dependency(
                            name,
                            DependencyTransition::Retry { attempt },
                            started.elapsed(),
                        );
                        let delay = options
                            .retry_delay
                            .saturating_mul(attempt)
                            .min(MAX_RETRY_DELAY);
                        warn!(
                            dependency = name,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            reason = %reason,
                            "Dependency load failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    self.events.emit_dependency(
                        name,
                        DependencyTransition::Error {
                            message: reason.clone(),
                        },
                        started.elapsed(),
                    );
                    warn!(dependency = name, attempt, reason = %reason, "Dependency load failed");
                    return Err(EngineError::DependencyLoadFailed {
                        name: name.to_string(),
                        retries: attempt,
                        reason,
                    });
                }
            }
        }
    }

    /// Await the terminal outcome of an in-flight load
    async fn await_outcome(
        &self,
        name: &str,
        mut gate: watch::Receiver<DependencyState>,
    ) -> Result<Arc<dyn DependencyModule>> {
        let current = *gate.borrow();
        if !current.is_terminal() {
            gate.wait_for(DependencyState::is_terminal)
                .await
                .map_err(|_| EngineError::Closed)?;
        }
        self.terminal_outcome(name)
    }

    fn terminal_outcome(&self, name: &str) -> Result<Arc<dyn DependencyModule>> {
        let records = self.records.read();
        let record = records
            .get(name)
            .ok_or_else(|| EngineError::UnknownDependency(name.to_string()))?;
        match record.state {
            DependencyState::Ready => Ok(record.module.clone().expect("ready module")),
            DependencyState::Timeout => Err(EngineError::DependencyTimeout {
                name: name.to_string(),
                timeout_ms: record.options.timeout.as_millis() as u64,
            }),
            _ => Err(EngineError::DependencyLoadFailed {
                name: name.to_string(),
                retries: record.retry_count,
                reason: record
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "load failed".to_string()),
            }),
        }
    }

    /// Await readiness of a dependency within `timeout`
    pub async fn wait_for(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Arc<dyn DependencyModule>> {
        let gate = {
            let records = self.records.read();
            let record = records
                .get(name)
                .ok_or_else(|| EngineError::UnknownDependency(name.to_string()))?;
            if record.state == DependencyState::Ready {
                return Ok(record.module.clone().expect("ready module"));
            }
            record.gate.subscribe()
        };

        match tokio::time::timeout(timeout, self.await_outcome(name, gate)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(EngineError::DependencyTimeout {
                name: name.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Await readiness of a set of dependencies (all registered ones when
    /// `names` is `None`) in parallel
    pub async fn wait_for_all(
        &self,
        names: Option<&[&str]>,
        timeout: Duration,
    ) -> Result<Vec<Arc<dyn DependencyModule>>> {
        let names: Vec<String> = match names {
            Some(names) => names.iter().map(|n| n.to_string()).collect(),
            None => self.records.read().keys().cloned().collect(),
        };
        try_join_all(names.iter().map(|name| self.wait_for(name, timeout))).await
    }

    /// Readiness gate as a watch channel (named projection per dependency)
    pub fn watch(&self, name: &str) -> Option<watch::Receiver<DependencyState>> {
        self.records.read().get(name).map(|r| r.gate.subscribe())
    }

    pub fn state(&self, name: &str) -> Option<DependencyState> {
        self.records.read().get(name).map(|r| r.state)
    }

    pub fn is_ready(&self, name: &str) -> bool {
        self.state(name) == Some(DependencyState::Ready)
    }

    pub fn module(&self, name: &str) -> Option<Arc<dyn DependencyModule>> {
        self.records.read().get(name).and_then(|r| r.module.clone())
    }

    pub fn version(&self, name: &str) -> Option<String> {
        self.records.read().get(name).and_then(|r| r.version.clone())
    }

    pub fn snapshot(&self, name: &str) -> Option<DependencyInfo> {
        self.records
            .read()
            .get(name)
            .map(|record| Self::info_of(name, record))
    }

    pub fn names(&self) -> Vec<String> {
        self.records.read().keys().cloned().collect()
    }

    pub fn health(&self) -> RegistryHealth {
        let records = self.records.read();
        let total = records.len();
        let mut health = RegistryHealth {
            total,
            ready: 0,
            loading: 0,
            error: 0,
            timeout: 0,
            health_score: 100,
        };
        for record in records.values() {
            match record.state {
                DependencyState::Ready => health.ready += 1,
                DependencyState::Loading | DependencyState::Initializing => health.loading += 1,
                DependencyState::Error => health.error += 1,
                DependencyState::Timeout => health.timeout += 1,
            }
        }
        if total > 0 {
            health.health_score = (health.ready * 100 / total) as u8;
        }
        health
    }

    /// Drop every record; pending waiters observe a closed gate
    pub fn clear(&self) {
        self.records.write().clear();
    }

    fn info_of(name: &str, record: &Record) -> DependencyInfo {
        DependencyInfo {
            name: name.to_string(),
            state: record.state,
            retry_count: record.retry_count,
            last_error: record.last_error.clone(),
            version: record.version.clone(),
            elapsed_ms: record.elapsed().as_millis() as u64,
        }
    }
}

fn is_retryable_load_error(reason: &str) -> bool {
    let reason = reason.to_lowercase();
    !NON_RETRYABLE_TOKENS.iter().any(|t| reason.contains(t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_retryable_tokens() {
        assert!(!is_retryable_load_error("CORS policy blocked the request"));
        assert!(!is_retryable_load_error("fetch returned HTTP 404"));
        assert!(!is_retryable_load_error("WebAssembly is not available"));
        assert!(!is_retryable_load_error("shared-array-buffer unsupported"));
        assert!(is_retryable_load_error("connection reset by peer"));
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = DependencyRegistry::new(EventBus::new(), LoadOptions::default());
        let first = registry.register("sql-engine", None);
        let second = registry.register("sql-engine", None);
        assert_eq!(first.state, DependencyState::Initializing);
        assert_eq!(second.state, DependencyState::Initializing);
        assert_eq!(registry.names().len(), 1);
    }

    #[test]
    fn test_health_score() {
        let registry = DependencyRegistry::new(EventBus::new(), LoadOptions::default());
        assert_eq!(registry.health().health_score, 100);
        registry.register("a", None);
        registry.register("b", None);
        assert_eq!(registry.health().health_score, 0);
        assert_eq!(registry.health().loading, 2);
    }
}
