//! Error taxonomy for the orchestration core
//!
//! Every error carries a stable code, a source component tag and can be
//! rendered into a user-facing report with remediation hints through
//! [`EngineError::report`].

use serde::Serialize;
use thiserror::Error;

use nimbus_cloud::CloudError;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Which subsystem produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorSource {
    Orchestration,
    SqlEngine,
    ComputeModule,
}

/// Unified error type for all engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    // ─── Dependency Lifecycle ───

    #[error("dependency {name} timed out after {timeout_ms} ms")]
    DependencyTimeout { name: String, timeout_ms: u64 },

    #[error("dependency {name} failed to load after {retries} retries: {reason}")]
    DependencyLoadFailed {
        name: String,
        retries: u32,
        reason: String,
    },

    #[error("dependency {0} is not registered")]
    UnknownDependency(String),

    // ─── Table & Query ───

    #[error("table registration failed for {table}: {reason}")]
    TableRegistration { table: String, reason: String },

    #[error("table {0} is not registered")]
    UnknownTable(String),

    #[error("query failed: {reason}")]
    QueryFailed { reason: String },

    // ─── Collaborators ───

    #[error("SQL engine error: {0}")]
    Sql(String),

    #[error("compute module error: {0}")]
    Compute(String),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    // ─── Lifecycle ───

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("engine has been closed")]
    Closed,

    #[error("engine is not initialized; call initialize() first")]
    NotInitialized,
}

impl EngineError {
    /// Stable machine-readable code.
    ///
    /// Dependency lifecycle codes carry a per-dependency prefix, e.g.
    /// `SQL_ENGINE_TIMEOUT` or `COLUMNAR_RUNTIME_LOAD_ERROR`.
    pub fn code(&self) -> String {
        match self {
            Self::DependencyTimeout { name, .. } => {
                format!("{}_TIMEOUT", code_prefix(name))
            }
            Self::DependencyLoadFailed { name, .. } => {
                format!("{}_LOAD_ERROR", code_prefix(name))
            }
            Self::UnknownDependency(_) => "UNKNOWN_DEPENDENCY".into(),
            Self::TableRegistration { .. } => "TABLE_REGISTRATION_FAILED".into(),
            Self::UnknownTable(_) => "UNKNOWN_TABLE".into(),
            Self::QueryFailed { .. } => "QUERY_FAILED".into(),
            Self::Sql(_) => "SQL_ENGINE_ERROR".into(),
            Self::Compute(_) => "COMPUTE_MODULE_ERROR".into(),
            Self::Cloud(inner) => inner.code(),
            Self::Config(_) => "CONFIG_ERROR".into(),
            Self::Closed => "ENGINE_CLOSED".into(),
            Self::NotInitialized => "NOT_INITIALIZED".into(),
        }
    }

    pub fn source_component(&self) -> ErrorSource {
        match self {
            Self::Sql(_) => ErrorSource::SqlEngine,
            Self::Compute(_) => ErrorSource::ComputeModule,
            _ => ErrorSource::Orchestration,
        }
    }

    /// Dependency this error concerns, when any
    pub fn dependency(&self) -> Option<&str> {
        match self {
            Self::DependencyTimeout { name, .. }
            | Self::DependencyLoadFailed { name, .. } => Some(name),
            Self::UnknownDependency(name) => Some(name),
            _ => None,
        }
    }

    pub fn retry_count(&self) -> Option<u32> {
        match self {
            Self::DependencyLoadFailed { retries, .. } => Some(*retries),
            _ => None,
        }
    }

    /// Short remediation bullets for the user-facing report
    pub fn troubleshooting(&self) -> Vec<String> {
        match self {
            Self::DependencyTimeout { name, .. } => vec![
                format!("Check your network connection; {name} is fetched at startup"),
                "Retry initialization; transient congestion often clears".into(),
                "Raise dependency_config.timeout_ms if the environment is slow".into(),
            ],
            Self::DependencyLoadFailed { name, .. } => vec![
                format!("Verify {name} is reachable from this environment"),
                "Inspect the wrapped reason; CORS and 404 failures never retry".into(),
            ],
            Self::TableRegistration { .. } => vec![
                "Confirm the URL is reachable and the file format matches its suffix".into(),
                "If the host blocks cross-origin reads, configure a proxy endpoint".into(),
                "Check provider credentials when the object is private".into(),
            ],
            Self::QueryFailed { .. } => vec![
                "Check the SQL statement against the registered table names".into(),
                "Re-register the table if the engine namespace was reset".into(),
            ],
            Self::Cloud(CloudError::Cors { .. }) | Self::Cloud(CloudError::ProxyFailed { .. }) => {
                vec![
                    "Configure at least one healthy proxy endpoint".into(),
                    "Verify the proxy allows the target host".into(),
                ]
            }
            Self::Cloud(CloudError::HttpStatus { status, .. }) if *status == 403 => vec![
                "Check credentials for the detected provider".into(),
                "Confirm the object key and bucket policy".into(),
            ],
            _ => Vec::new(),
        }
    }

    /// Render the error into a serializable user-facing report
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            message: self.to_string(),
            code: self.code(),
            source: self.source_component(),
            dependency: self.dependency().map(str::to_string),
            retry_count: self.retry_count(),
            troubleshooting: self.troubleshooting(),
            context: ErrorContext::capture(),
        }
    }
}

fn code_prefix(dependency: &str) -> String {
    dependency.to_uppercase().replace(['-', ' '], "_")
}

/// Environment snapshot attached to user-facing reports
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorContext {
    pub load_time_ms: Option<u64>,
    pub runtime: Option<String>,
    pub network_online: Option<bool>,
    pub shared_memory_support: Option<bool>,
}

impl ErrorContext {
    pub fn capture() -> Self {
        Self {
            load_time_ms: None,
            runtime: Some(format!(
                "{}-{}",
                std::env::consts::OS,
                std::env::consts::ARCH
            )),
            network_online: None,
            shared_memory_support: Some(true),
        }
    }

    pub fn with_load_time_ms(mut self, ms: u64) -> Self {
        self.load_time_ms = Some(ms);
        self
    }
}

/// Serializable rendering of an [`EngineError`]
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub message: String,
    pub code: String,
    pub source: ErrorSource,
    pub dependency: Option<String>,
    pub retry_count: Option<u32>,
    pub troubleshooting: Vec<String>,
    pub context: ErrorContext,
}
