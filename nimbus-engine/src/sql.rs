//! Embedded SQL engine contract
//!
//! The engine is an opaque collaborator: it connects, runs SQL, registers
//! in-memory buffers under virtual filenames and terminates. Rows cross
//! the boundary as JSON objects.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::warn;

use crate::error::Result;
use crate::registry::DependencyModule;

/// One result row as a JSON object
pub type Row = serde_json::Value;

#[async_trait]
pub trait SqlConnection: Send {
    async fn query(&mut self, sql: &str) -> Result<Vec<Row>>;
    async fn close(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait SqlEngine: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn SqlConnection>>;

    /// Register binary contents under a virtual filename usable in SQL file
    /// functions (`read_parquet` etc.)
    async fn register_file_buffer(&self, name: &str, bytes: Bytes) -> Result<()>;

    /// Register text contents under a virtual filename
    async fn register_file_text(&self, name: &str, text: &str) -> Result<()>;

    async fn terminate(&self) -> Result<()>;

    fn version(&self) -> Option<String> {
        None
    }
}

/// Run one statement on a fresh connection, closing it on every path
pub async fn run_query(engine: &dyn SqlEngine, sql: &str) -> Result<Vec<Row>> {
    let mut conn = engine.connect().await?;
    let outcome = conn.query(sql).await;
    if let Err(err) = conn.close().await {
        warn!(error = %err, "Failed to close SQL connection");
    }
    outcome
}

/// Registry wrapper holding the engine as a loaded module
pub struct SqlEngineModule {
    engine: Arc<dyn SqlEngine>,
}

impl SqlEngineModule {
    pub fn new(engine: Arc<dyn SqlEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> Arc<dyn SqlEngine> {
        self.engine.clone()
    }
}

impl DependencyModule for SqlEngineModule {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn version(&self) -> Option<String> {
        self.engine.version()
    }
}
