//! # Nimbus Engine
//!
//! A cloud-storage-aware analytical query orchestration layer: a URL plus
//! a SQL statement in, tabular results out, whether or not the environment
//! can reach the object directly. The embedded SQL engine, the columnar
//! runtime and the numeric compute module are opaque collaborators loaded
//! through a retry-aware dependency registry.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 NimbusEngine                 │
//! │   (init sequencing, query(), metrics)        │
//! ├──────────────┬───────────────┬───────────────┤
//! │ Dependency   │ TableOrch-    │ Compute       │
//! │ Registry     │ estrator      │ post-process  │
//! │ (load/retry/ │ (URL→table,   │ (large result │
//! │  readiness)  │  fallbacks)   │  accelerator) │
//! ├──────────────┴───────────────┴───────────────┤
//! │       nimbus-cloud (CORS, proxy, cache)      │
//! ├──────────────────────────────────────────────┤
//! │       embedded SQL engine (collaborator)     │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nimbus_engine::{CloudTableOptions, EngineConfig, NimbusEngine};
//! # fn sql_engine_loader() -> nimbus_engine::SqlEngineFuture { unimplemented!() }
//!
//! # async fn example() -> nimbus_engine::Result<()> {
//! let engine = NimbusEngine::builder(EngineConfig::default())
//!     .with_sql_engine_loader(sql_engine_loader)
//!     .build()?;
//! engine.initialize().await?;
//!
//! engine
//!     .register_cloud_table(
//!         "trips",
//!         "https://bucket.s3.amazonaws.com/trips.parquet",
//!         &CloudTableOptions::default(),
//!     )
//!     .await?;
//! let outcome = engine.query("SELECT COUNT(*) AS n FROM trips").await?;
//! println!("{:?}", outcome.data);
//! # Ok(())
//! # }
//! ```

pub mod compute;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod maintenance;
pub mod memory;
pub mod orchestrator;
pub mod registry;
pub mod runtime;
pub mod sql;

// Re-exports for convenience
pub use compute::{ComputeModule, ProcessedBatch, MAX_COMPUTE_INPUT_BYTES};
pub use config::{DependencyConfig, EngineConfig, LogLevel};
pub use engine::{
    ComputeFuture, ComputeLoader, EngineBuilder, EngineMetrics, EngineStatus, NimbusEngine,
    QueryMetadata, QueryOutcome, SqlEngineFuture, SqlEngineLoader,
};
pub use error::{EngineError, ErrorContext, ErrorReport, ErrorSource, Result};
pub use events::{DependencyEvent, DependencyTransition, EngineEvent, EventBus, ProgressEvent};
pub use maintenance::MaintenanceScheduler;
pub use memory::{MemoryStatus, MemoryTracker};
pub use orchestrator::{
    AccessPath, CloudTableOptions, FallbackStrategy, OrchestratorOptions, RegisteredTable,
    TableOrchestrator,
};
pub use registry::{
    DependencyInfo, DependencyModule, DependencyRegistry, DependencyState, LoadOptions,
    ModuleLoader, RegistryHealth, DEP_CLOUD_STORAGE, DEP_COLUMNAR_RUNTIME, DEP_COMPUTE_MODULE,
    DEP_SQL_ENGINE,
};
pub use runtime::{
    ColumnarModule, ColumnarRuntime, ColumnarRuntimeLoader, RuntimeSource, REQUIRED_EXPORTS,
};
pub use sql::{run_query, Row, SqlConnection, SqlEngine};

/// Crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Package name and version as a JSON object
pub fn build_info() -> serde_json::Value {
    serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    })
}
