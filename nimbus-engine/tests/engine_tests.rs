//! Engine facade integration tests — initialization sequencing, query
//! post-processing, degraded subsystems, teardown

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{rows, MockCompute, MockSqlEngine, Scripted, ScriptedTransport};
use nimbus_cloud::{CorsConfig, CorsStrategy, HttpMethod};
use nimbus_engine::{
    CloudTableOptions, ColumnarRuntime, DependencyConfig, DependencyState, EngineConfig,
    EngineError, EngineEvent, NimbusEngine, Row, RuntimeSource, DEP_CLOUD_STORAGE,
    DEP_COLUMNAR_RUNTIME, DEP_COMPUTE_MODULE, DEP_SQL_ENGINE, REQUIRED_EXPORTS,
};

struct FullRuntime;

impl ColumnarRuntime for FullRuntime {
    fn exports(&self) -> Vec<String> {
        REQUIRED_EXPORTS.iter().map(|s| s.to_string()).collect()
    }

    fn version(&self) -> Option<String> {
        Some("17.0.0".to_string())
    }
}

fn columnar_sources() -> Vec<RuntimeSource> {
    vec![RuntimeSource::new("bundled", || {
        Box::pin(async { Ok(Arc::new(FullRuntime) as Arc<dyn ColumnarRuntime>) })
    })]
}

fn test_config() -> EngineConfig {
    EngineConfig::new()
        .with_dependencies(DependencyConfig {
            timeout_ms: 2_000,
            max_retries: 1,
            retry_delay_ms: 1,
            preload: Vec::new(),
            enable_progress_events: true,
        })
        .with_cors(CorsConfig {
            strategy: CorsStrategy::Auto,
            proxy_endpoint: Some("https://proxy.test".to_string()),
            cache_timeout_secs: 300,
            retry_attempts: 3,
        })
}

fn engine_with(
    sql: MockSqlEngine,
    transport: ScriptedTransport,
    compute_fails: bool,
) -> NimbusEngine {
    NimbusEngine::builder(test_config())
        .with_transport(Arc::new(transport))
        .with_sql_engine_loader(move || {
            let sql = sql.clone();
            Box::pin(async move { Ok(Arc::new(sql) as Arc<dyn nimbus_engine::SqlEngine>) })
        })
        .with_columnar_sources(columnar_sources())
        .with_compute_loader(move || {
            Box::pin(async move {
                Ok(Arc::new(MockCompute {
                    fail: compute_fails,
                }) as Arc<dyn nimbus_engine::ComputeModule>)
            })
        })
        .build()
        .unwrap()
}

fn big_rows(n: usize) -> Vec<Row> {
    (0..n)
        .map(|i| serde_json::json!({ "id": i, "value": format!("row-{i}") }))
        .collect()
}

#[tokio::test]
async fn test_initialize_brings_everything_ready() {
    common::init_tracing();
    let sql = MockSqlEngine::new();
    let engine = engine_with(sql, ScriptedTransport::new(), false);

    engine.initialize().await.unwrap();

    let status = engine.status();
    assert!(status.initialized);
    assert!(status.sql_engine_ready);
    assert!(status.columnar_runtime_ready);
    assert!(status.compute_module_ready);
    assert!(status.overall_ready);
    assert_eq!(status.dependency_health_score, 100);
    assert!(status.memory_usage.system_total_bytes > 0);

    assert_eq!(
        engine.registry().state(DEP_SQL_ENGINE),
        Some(DependencyState::Ready)
    );
    assert_eq!(
        engine.registry().version(DEP_SQL_ENGINE).as_deref(),
        Some("1.29.0")
    );
    assert_eq!(
        engine.registry().state(DEP_CLOUD_STORAGE),
        Some(DependencyState::Ready)
    );

    let columnar = engine.columnar_runtime().unwrap();
    assert_eq!(columnar.source(), "bundled");
}

#[tokio::test]
async fn test_end_to_end_cloud_table_arithmetic() {
    let sql = MockSqlEngine::new().respond(
        "SUM(CAST(a AS INTEGER)) + SUM(CAST(b AS INTEGER))",
        rows(r#"[{"total": 10}]"#),
    );
    let transport = ScriptedTransport::new().on(
        HttpMethod::Head,
        "cors-ok.test/data.csv",
        Scripted::ok_with_headers(vec![("Access-Control-Allow-Methods", "GET, HEAD, OPTIONS")], b""),
    );
    let engine = engine_with(sql, transport, false);
    engine.initialize().await.unwrap();

    engine
        .register_cloud_table(
            "t",
            "https://cors-ok.test/data.csv",
            &CloudTableOptions::default(),
        )
        .await
        .unwrap();

    let outcome = engine
        .query("SELECT SUM(CAST(a AS INTEGER)) + SUM(CAST(b AS INTEGER)) FROM t")
        .await
        .unwrap();
    assert_eq!(outcome.data, rows(r#"[{"total": 10}]"#));
    assert_eq!(outcome.metadata.row_count, 1);
    assert!(!outcome.metadata.post_processed);

    let metrics = engine.metrics();
    assert_eq!(metrics.query_count, 1);
}

#[tokio::test]
async fn test_large_result_is_post_processed() {
    let sql = MockSqlEngine::new().respond("FROM big", big_rows(1500));
    let engine = engine_with(sql, ScriptedTransport::new(), false);
    engine.initialize().await.unwrap();

    let outcome = engine.query("SELECT * FROM big").await.unwrap();
    assert!(outcome.metadata.post_processed);
    assert_eq!(outcome.metadata.row_count, 1500);
    assert!(outcome.metadata.compute_time_ms.is_some());
    assert!(outcome.data.iter().all(|row| row["processed"] == true));

    // Compute memory is folded into the peak metric.
    assert!(engine.metrics().memory_peak_bytes > 0);
}

#[tokio::test]
async fn test_compute_failure_degrades_to_passthrough() {
    let sql = MockSqlEngine::new().respond("FROM big", big_rows(1500));
    let engine = engine_with(sql, ScriptedTransport::new(), true);
    engine.initialize().await.unwrap();

    let outcome = engine.query("SELECT * FROM big").await.unwrap();
    assert!(!outcome.metadata.post_processed);
    assert_eq!(outcome.data.len(), 1500);
    assert!(outcome.data.iter().all(|row| row.get("processed").is_none()));
}

#[tokio::test]
async fn test_small_results_skip_compute() {
    let sql = MockSqlEngine::new().respond("FROM small", big_rows(5));
    let engine = engine_with(sql, ScriptedTransport::new(), false);
    engine.initialize().await.unwrap();

    let outcome = engine.query("SELECT * FROM small").await.unwrap();
    assert!(!outcome.metadata.post_processed);
}

#[tokio::test]
async fn test_sql_engine_failure_is_fatal() {
    let engine = NimbusEngine::builder(test_config())
        .with_transport(Arc::new(ScriptedTransport::new()))
        .with_sql_engine_loader(|| {
            Box::pin(async { Err(EngineError::Config("bundle returned 404".into())) })
        })
        .build()
        .unwrap();

    let err = engine.initialize().await.unwrap_err();
    assert_eq!(err.code(), "SQL_ENGINE_LOAD_ERROR");
    assert!(!engine.status().initialized);
    assert!(!engine.status().overall_ready);
}

#[tokio::test]
async fn test_compute_failure_is_not_fatal() {
    let sql = MockSqlEngine::new();
    let engine = NimbusEngine::builder(test_config())
        .with_transport(Arc::new(ScriptedTransport::new()))
        .with_sql_engine_loader(move || {
            let sql = sql.clone();
            Box::pin(async move { Ok(Arc::new(sql) as Arc<dyn nimbus_engine::SqlEngine>) })
        })
        .with_compute_loader(|| {
            Box::pin(async { Err(EngineError::Config("compute bundle missing".into())) })
        })
        .build()
        .unwrap();

    engine.initialize().await.unwrap();
    let status = engine.status();
    assert!(status.initialized);
    assert!(status.sql_engine_ready);
    assert!(!status.compute_module_ready);
    assert!(status.overall_ready);

    // Queries still run, without post-processing.
    let outcome = engine.query("SELECT 1").await.unwrap();
    assert!(!outcome.metadata.post_processed);
}

#[tokio::test]
async fn test_load_data_and_catalog_queries() {
    let sql = MockSqlEngine::new();
    let engine = engine_with(sql.clone(), ScriptedTransport::new(), false);
    engine.initialize().await.unwrap();

    let data = rows(r#"[{"id": 1, "name": "ada"}, {"id": 2, "name": "grace"}]"#);
    engine.load_data(&data, "people").await.unwrap();

    assert!(sql.has_file("people.json"));
    assert!(sql.has_table("people"));
    assert!(sql.statements().iter().any(|s| s
        == "CREATE TABLE people AS SELECT * FROM read_json_auto('people.json')"));

    let tables = engine.list_tables().await.unwrap();
    assert!(tables.contains(&"people".to_string()));

    sql.add_response("DESCRIBE people", rows(r#"[{"column_name": "id"}]"#));
    let info = engine.get_table_info("people").await.unwrap();
    assert_eq!(info.len(), 1);
}

#[tokio::test]
async fn test_dependency_events_reach_subscribers() {
    let sql = MockSqlEngine::new();
    let engine = engine_with(sql, ScriptedTransport::new(), false);
    let mut events = engine.subscribe_events();

    engine.initialize().await.unwrap();

    let mut saw_sql_ready = false;
    let mut saw_progress_complete = false;
    while let Ok(event) = events.try_recv() {
        match event {
            EngineEvent::Dependency(event) if event.dependency == DEP_SQL_ENGINE => {
                if matches!(
                    event.transition,
                    nimbus_engine::DependencyTransition::Ready { .. }
                ) {
                    saw_sql_ready = true;
                }
            }
            EngineEvent::Progress(progress) if progress.percent == 100 => {
                saw_progress_complete = true;
            }
            _ => {}
        }
    }
    assert!(saw_sql_ready);
    assert!(saw_progress_complete);
}

#[tokio::test]
async fn test_wait_helpers() {
    let sql = MockSqlEngine::new();
    let engine = engine_with(sql, ScriptedTransport::new(), false);
    engine.initialize().await.unwrap();

    engine.wait_for_sql_engine().await.unwrap();
    engine.wait_for_columnar_runtime().await.unwrap();
    engine.wait_for_compute_module().await.unwrap();
    engine
        .wait_for_ready(
            Some(&[DEP_SQL_ENGINE, DEP_COLUMNAR_RUNTIME, DEP_COMPUTE_MODULE]),
            Duration::from_millis(500),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_preload_starts_dependencies() {
    let sql = MockSqlEngine::new();
    let engine = engine_with(sql, ScriptedTransport::new(), false);

    engine.preload(&[DEP_SQL_ENGINE, DEP_COMPUTE_MODULE]).await;
    assert!(engine.registry().is_ready(DEP_SQL_ENGINE));
    assert!(engine.registry().is_ready(DEP_COMPUTE_MODULE));

    // initialize() reuses the preloaded modules.
    engine.initialize().await.unwrap();
    assert!(engine.status().overall_ready);
}

#[tokio::test]
async fn test_close_tears_everything_down() {
    let sql = MockSqlEngine::new();
    let engine = engine_with(sql.clone(), ScriptedTransport::new(), false);
    engine.initialize().await.unwrap();

    engine.close().await.unwrap();
    assert!(sql.terminated());
    assert!(!engine.status().initialized);
    assert!(engine.registry().names().is_empty());

    let err = engine.query("SELECT 1").await.unwrap_err();
    assert_eq!(err.code(), "ENGINE_CLOSED");

    // close() is idempotent.
    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_metrics_accumulate() {
    let sql = MockSqlEngine::new().respond("FROM small", big_rows(3));
    let engine = engine_with(sql, ScriptedTransport::new(), false);
    engine.initialize().await.unwrap();

    engine.query("SELECT * FROM small").await.unwrap();
    engine.query("SELECT * FROM small").await.unwrap();

    let metrics = engine.metrics();
    assert_eq!(metrics.query_count, 2);
    assert!(metrics.average_response_time_ms >= 0.0);
}
