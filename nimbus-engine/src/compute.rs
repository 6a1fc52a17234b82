//! Compute module contract
//!
//! An optional post-processing accelerator for large result sets. Bytes go
//! in, a small structured record comes out; failures degrade to
//! passthrough at the call site.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::registry::DependencyModule;

/// Input cap enforced before bytes cross the module boundary
pub const MAX_COMPUTE_INPUT_BYTES: usize = 100_000_000;

/// Structured output of one processing pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedBatch {
    /// Stringified JSON array of processed rows
    pub data: String,
    pub row_count: u64,
    pub execution_time_ms: u64,
    pub memory_used_bytes: u64,
}

#[async_trait]
pub trait ComputeModule: Send + Sync {
    async fn process_data(&self, data: &[u8]) -> Result<ProcessedBatch>;

    fn memory_usage(&self) -> u64;

    fn version(&self) -> Option<String> {
        None
    }
}

/// Validate input before it crosses the module boundary
pub fn validate_input(data: &[u8]) -> Result<()> {
    if data.is_empty() {
        return Err(EngineError::Compute("input data cannot be empty".into()));
    }
    if data.len() > MAX_COMPUTE_INPUT_BYTES {
        return Err(EngineError::Compute(
            "input data exceeds maximum size limit".into(),
        ));
    }
    Ok(())
}

/// Registry wrapper holding the compute module
pub struct ComputeModuleHandle {
    module: Arc<dyn ComputeModule>,
}

impl ComputeModuleHandle {
    pub fn new(module: Arc<dyn ComputeModule>) -> Self {
        Self { module }
    }

    pub fn module(&self) -> Arc<dyn ComputeModule> {
        self.module.clone()
    }
}

impl DependencyModule for ComputeModuleHandle {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn version(&self) -> Option<String> {
        self.module.version()
    }
}
