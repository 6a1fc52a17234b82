//! Columnar runtime loader
//!
//! The in-process columnar library can arrive from several candidate
//! sources (an already-present global, a bundled import, CDNs). Sources
//! are tried in order; each candidate is validated against the minimal
//! capability surface before being accepted.

use std::any::Any;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::registry::{DependencyModule, ModuleLoader, DEP_COLUMNAR_RUNTIME};

/// Exported names every usable columnar runtime must carry. Presence is
/// the whole check; no methods are invoked.
pub const REQUIRED_EXPORTS: &[&str] = &[
    "Table",
    "RecordBatch",
    "RecordBatchReader",
    "Schema",
    "Field",
    "Vector",
    "Type",
];

/// A loaded columnar runtime candidate
pub trait ColumnarRuntime: Send + Sync + 'static {
    /// Names exported by the module
    fn exports(&self) -> Vec<String>;

    fn version(&self) -> Option<String> {
        None
    }
}

/// Registry wrapper for an accepted runtime
pub struct ColumnarModule {
    runtime: Arc<dyn ColumnarRuntime>,
    source: String,
}

impl std::fmt::Debug for ColumnarModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnarModule")
            .field("source", &self.source)
            .field("version", &self.runtime.version())
            .finish()
    }
}

impl ColumnarModule {
    pub(crate) fn from_parts(runtime: Arc<dyn ColumnarRuntime>, source: String) -> Self {
        Self { runtime, source }
    }

    pub fn runtime(&self) -> Arc<dyn ColumnarRuntime> {
        self.runtime.clone()
    }

    /// Which candidate source produced this runtime
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl DependencyModule for ColumnarModule {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn version(&self) -> Option<String> {
        self.runtime.version()
    }
}

pub type RuntimeFuture = BoxFuture<'static, Result<Arc<dyn ColumnarRuntime>>>;

/// One candidate source in the ordered strategy list
pub struct RuntimeSource {
    pub name: String,
    load: Arc<dyn Fn() -> RuntimeFuture + Send + Sync>,
}

impl RuntimeSource {
    pub fn new(
        name: impl Into<String>,
        load: impl Fn() -> RuntimeFuture + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            load: Arc::new(load),
        }
    }
}

/// Walks candidate sources and validates the capability surface
pub struct ColumnarRuntimeLoader {
    sources: Vec<RuntimeSource>,
}

impl ColumnarRuntimeLoader {
    pub fn new(sources: Vec<RuntimeSource>) -> Self {
        Self { sources }
    }

    /// Exports missing from a candidate, empty when the surface is complete
    pub fn missing_exports(runtime: &dyn ColumnarRuntime) -> Vec<String> {
        let exports = runtime.exports();
        REQUIRED_EXPORTS
            .iter()
            .filter(|required| !exports.iter().any(|e| e == *required))
            .map(|s| s.to_string())
            .collect()
    }

    /// Try each source in order, accepting the first candidate with a
    /// complete capability surface
    pub async fn load(&self) -> Result<Arc<ColumnarModule>> {
        let mut failures: Vec<String> = Vec::new();

        for source in &self.sources {
            match (source.load)().await {
                Ok(runtime) => {
                    let missing = Self::missing_exports(runtime.as_ref());
                    if missing.is_empty() {
                        info!(source = %source.name, "Columnar runtime accepted");
                        return Ok(Arc::new(ColumnarModule {
                            runtime,
                            source: source.name.clone(),
                        }));
                    }
                    warn!(
                        source = %source.name,
                        missing = ?missing,
                        "Columnar runtime candidate rejected"
                    );
                    failures.push(format!("{}: missing exports {missing:?}", source.name));
                }
                Err(err) => {
                    warn!(source = %source.name, error = %err, "Columnar runtime source failed");
                    failures.push(format!("{}: {err}", source.name));
                }
            }
        }

        Err(EngineError::DependencyLoadFailed {
            name: DEP_COLUMNAR_RUNTIME.to_string(),
            retries: 0,
            reason: if failures.is_empty() {
                "no candidate sources configured".to_string()
            } else {
                failures.join("; ")
            },
        })
    }

    /// Adapt this loader into a registry [`ModuleLoader`]
    pub fn into_loader(self) -> ModuleLoader {
        let loader = Arc::new(self);
        Arc::new(move || {
            let loader = loader.clone();
            Box::pin(async move {
                let module = loader.load().await?;
                Ok(module as Arc<dyn DependencyModule>)
            })
        })
    }
}
