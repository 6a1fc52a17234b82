//! Shared test fixtures — scripted SQL engine, transport and compute module

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use nimbus_cloud::{
    CloudError, HttpMethod, HttpTransport, TransportRequest, TransportResponse,
};
use nimbus_engine::{
    ComputeModule, EngineError, ProcessedBatch, Result, Row, SqlConnection, SqlEngine,
};

/// Route test logs through tracing when RUST_LOG is set
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

pub fn rows(json: &str) -> Vec<Row> {
    serde_json::from_str::<serde_json::Value>(json)
        .expect("valid row fixture")
        .as_array()
        .expect("array fixture")
        .clone()
}

// ─── Scripted SQL engine ───

struct FailRule {
    pattern: String,
    remaining: Option<usize>,
}

struct SqlInner {
    tables: HashSet<String>,
    files: HashMap<String, usize>,
    statements: Vec<String>,
    responses: Vec<(String, Vec<Row>)>,
    fail_rules: Vec<FailRule>,
    httpfs_available: bool,
    terminated: bool,
}

/// In-memory stand-in for the embedded SQL engine.
///
/// Executes DDL against a name set, serves scripted responses for queries
/// by substring match, and tracks registered virtual files so tests can
/// assert the orchestrator/engine lockstep invariant.
pub struct MockSqlEngine {
    inner: Arc<Mutex<SqlInner>>,
}

impl MockSqlEngine {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SqlInner {
                tables: HashSet::new(),
                files: HashMap::new(),
                statements: Vec::new(),
                responses: Vec::new(),
                fail_rules: Vec::new(),
                httpfs_available: true,
                terminated: false,
            })),
        }
    }

    pub fn without_httpfs(self) -> Self {
        self.inner.lock().unwrap().httpfs_available = false;
        self
    }

    /// Serve `rows` for statements containing `pattern`
    pub fn respond(self, pattern: &str, response: Vec<Row>) -> Self {
        self.inner
            .lock()
            .unwrap()
            .responses
            .push((pattern.to_string(), response));
        self
    }

    /// Fail statements containing `pattern`; `times` of `None` fails forever
    pub fn fail_matching(&self, pattern: &str, times: Option<usize>) {
        self.inner.lock().unwrap().fail_rules.push(FailRule {
            pattern: pattern.to_string(),
            remaining: times,
        });
    }

    pub fn add_response(&self, pattern: &str, response: Vec<Row>) {
        self.inner
            .lock()
            .unwrap()
            .responses
            .push((pattern.to_string(), response));
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.inner.lock().unwrap().tables.contains(name)
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().unwrap().tables.iter().cloned().collect();
        names.sort();
        names
    }

    pub fn has_file(&self, name: &str) -> bool {
        self.inner.lock().unwrap().files.contains_key(name)
    }

    pub fn statements(&self) -> Vec<String> {
        self.inner.lock().unwrap().statements.clone()
    }

    pub fn terminated(&self) -> bool {
        self.inner.lock().unwrap().terminated
    }

    fn execute(&self, sql: &str) -> Result<Vec<Row>> {
        let mut inner = self.inner.lock().unwrap();
        inner.statements.push(sql.to_string());

        for rule in inner.fail_rules.iter_mut() {
            if sql.contains(&rule.pattern) {
                match &mut rule.remaining {
                    Some(0) => continue,
                    Some(n) => {
                        *n -= 1;
                        return Err(EngineError::Sql(format!("scripted failure for: {sql}")));
                    }
                    None => {
                        return Err(EngineError::Sql(format!("scripted failure for: {sql}")));
                    }
                }
            }
        }

        if sql == "INSTALL httpfs" || sql == "LOAD httpfs" {
            return if inner.httpfs_available {
                Ok(Vec::new())
            } else {
                Err(EngineError::Sql("httpfs extension is not available".into()))
            };
        }

        if let Some(rest) = sql.strip_prefix("DROP TABLE IF EXISTS ") {
            inner.tables.remove(rest.trim());
            return Ok(Vec::new());
        }
        if let Some(rest) = sql.strip_prefix("DROP TABLE ") {
            let name = rest.trim();
            return if inner.tables.remove(name) {
                Ok(Vec::new())
            } else {
                Err(EngineError::Sql(format!("table {name} does not exist")))
            };
        }

        if let Some(rest) = sql.strip_prefix("CREATE TABLE ") {
            let name = rest.split_whitespace().next().unwrap_or_default().to_string();
            // CTAS over a file function must reference either a registered
            // virtual file or (with httpfs) a URL.
            if let Some(path) = sql.split('\'').nth(1) {
                if path.starts_with("http") {
                    if !inner.httpfs_available {
                        return Err(EngineError::Sql(
                            "cannot open remote file without httpfs".into(),
                        ));
                    }
                } else if !inner.files.contains_key(path) {
                    return Err(EngineError::Sql(format!("no such file: {path}")));
                }
            }
            inner.tables.insert(name);
            return Ok(Vec::new());
        }

        if sql.contains("information_schema.tables") {
            let mut names: Vec<String> = inner.tables.iter().cloned().collect();
            names.sort();
            return Ok(names
                .into_iter()
                .map(|n| serde_json::json!({ "table_name": n }))
                .collect());
        }

        for (pattern, response) in &inner.responses {
            if sql.contains(pattern.as_str()) {
                return Ok(response.clone());
            }
        }
        Ok(Vec::new())
    }
}

struct MockConnection {
    engine: Arc<Mutex<SqlInner>>,
}

#[async_trait]
impl SqlConnection for MockConnection {
    async fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        MockSqlEngine {
            inner: self.engine.clone(),
        }
        .execute(sql)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl SqlEngine for MockSqlEngine {
    async fn connect(&self) -> Result<Box<dyn SqlConnection>> {
        if self.inner.lock().unwrap().terminated {
            return Err(EngineError::Sql("engine terminated".into()));
        }
        Ok(Box::new(MockConnection {
            engine: self.inner.clone(),
        }))
    }

    async fn register_file_buffer(&self, name: &str, bytes: Bytes) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .files
            .insert(name.to_string(), bytes.len());
        Ok(())
    }

    async fn register_file_text(&self, name: &str, text: &str) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .files
            .insert(name.to_string(), text.len());
        Ok(())
    }

    async fn terminate(&self) -> Result<()> {
        self.inner.lock().unwrap().terminated = true;
        Ok(())
    }

    fn version(&self) -> Option<String> {
        Some("1.29.0".to_string())
    }
}

impl Clone for MockSqlEngine {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

// ─── Scripted transport ───

#[derive(Clone)]
pub enum Scripted {
    Ok {
        status: u16,
        headers: Vec<(&'static str, &'static str)>,
        body: &'static [u8],
    },
    NetworkError(&'static str),
}

impl Scripted {
    pub fn ok(body: &'static [u8]) -> Self {
        Scripted::Ok {
            status: 200,
            headers: vec![],
            body,
        }
    }

    pub fn ok_with_headers(headers: Vec<(&'static str, &'static str)>, body: &'static [u8]) -> Self {
        Scripted::Ok {
            status: 200,
            headers,
            body,
        }
    }
}

struct TransportRule {
    method: Option<HttpMethod>,
    url_contains: String,
    responses: Mutex<VecDeque<Scripted>>,
}

pub struct ScriptedTransport {
    rules: Vec<TransportRule>,
    log: Mutex<Vec<(HttpMethod, String)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn on(mut self, method: HttpMethod, url_contains: &str, response: Scripted) -> Self {
        self.rules.push(TransportRule {
            method: Some(method),
            url_contains: url_contains.to_string(),
            responses: Mutex::new(vec![response].into()),
        });
        self
    }

    pub fn request_count(&self, method: HttpMethod, url_contains: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, url)| *m == method && url.contains(url_contains))
            .count()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(
        &self,
        request: TransportRequest,
    ) -> nimbus_cloud::Result<TransportResponse> {
        self.log
            .lock()
            .unwrap()
            .push((request.method, request.url.clone()));

        let rule = self
            .rules
            .iter()
            .find(|rule| {
                rule.method.map_or(true, |m| m == request.method)
                    && request.url.contains(&rule.url_contains)
            })
            .unwrap_or_else(|| {
                panic!("no scripted response for {:?} {}", request.method, request.url)
            });

        let scripted = {
            let mut queue = rule.responses.lock().unwrap();
            if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue.front().cloned().expect("scripted rule has a response")
            }
        };

        match scripted {
            Scripted::Ok {
                status,
                headers,
                body,
            } => {
                let headers: HashMap<String, String> = headers
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect();
                Ok(TransportResponse::new(status, headers, Bytes::from_static(body)))
            }
            Scripted::NetworkError(message) => Err(CloudError::Network(message.to_string())),
        }
    }
}

// ─── Scripted compute module ───

/// Compute module that stamps each row, mirroring the passthrough contract
pub struct MockCompute {
    pub fail: bool,
}

#[async_trait]
impl ComputeModule for MockCompute {
    async fn process_data(&self, data: &[u8]) -> Result<ProcessedBatch> {
        if self.fail {
            return Err(EngineError::Compute("scripted compute failure".into()));
        }
        let mut parsed: Vec<Row> = serde_json::from_slice(data)
            .map_err(|e| EngineError::Compute(e.to_string()))?;
        for row in &mut parsed {
            if let Some(object) = row.as_object_mut() {
                object.insert("processed".to_string(), serde_json::Value::Bool(true));
            }
        }
        let row_count = parsed.len() as u64;
        Ok(ProcessedBatch {
            data: serde_json::to_string(&parsed)
                .map_err(|e| EngineError::Compute(e.to_string()))?,
            row_count,
            execution_time_ms: 5,
            memory_used_bytes: data.len() as u64,
        })
    }

    fn memory_usage(&self) -> u64 {
        0
    }

    fn version(&self) -> Option<String> {
        Some("0.4.0".to_string())
    }
}
