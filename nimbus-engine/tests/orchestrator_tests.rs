//! Remote-table orchestrator integration tests — mode selection, proxied
//! registration, fallback chain, registry/engine lockstep

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{rows, MockSqlEngine, Scripted, ScriptedTransport};
use nimbus_cloud::{
    Cache, CacheConfig, CloudFileService, CorsMode, CredentialManager, HttpAccessClient,
    HttpMethod, ProxyConfig, ProxyEndpointConfig, ProxyService,
};
use nimbus_engine::{
    CloudTableOptions, FallbackStrategy, OrchestratorOptions, Row, SqlEngine, TableOrchestrator,
};

const TIMEOUT: Duration = Duration::from_secs(5);

struct Fixture {
    sql: MockSqlEngine,
    transport: Arc<ScriptedTransport>,
    orchestrator: TableOrchestrator,
}

fn fixture(sql: MockSqlEngine, transport: ScriptedTransport, with_proxy: bool) -> Fixture {
    let transport = Arc::new(transport);
    let proxy = with_proxy.then(|| {
        Arc::new(ProxyService::new(
            transport.clone(),
            ProxyConfig::new(vec![ProxyEndpointConfig::new("https://proxy.test")]),
            TIMEOUT,
        ))
    });
    let http = Arc::new(HttpAccessClient::new(transport.clone(), proxy, TIMEOUT));
    let credentials = Arc::new(CredentialManager::new(transport.clone()));
    let files = Arc::new(CloudFileService::new(http.clone(), credentials));
    let result_cache = Arc::new(Cache::<Vec<Row>>::new(
        "query-results",
        CacheConfig::query_results(),
    ));

    let engine: Arc<dyn SqlEngine> = Arc::new(sql.clone());
    Fixture {
        sql,
        transport: transport.clone(),
        orchestrator: TableOrchestrator::new(engine, files, http, Some(result_cache)),
    }
}

fn cors_ok_csv_transport() -> ScriptedTransport {
    ScriptedTransport::new().on(
        HttpMethod::Head,
        "cors-ok.test/data.csv",
        Scripted::ok_with_headers(vec![("Access-Control-Allow-Methods", "GET, HEAD, OPTIONS")], b""),
    )
}

#[tokio::test]
async fn test_direct_registration_over_cors_friendly_url() {
    let sql = MockSqlEngine::new().respond(
        "SUM(CAST(a AS INTEGER)) + SUM(CAST(b AS INTEGER))",
        rows(r#"[{"total": 10}]"#),
    );
    let f = fixture(sql, cors_ok_csv_transport(), false);
    f.orchestrator
        .initialize(OrchestratorOptions::with_http_extension())
        .await
        .unwrap();

    f.orchestrator
        .register_cloud_table(
            "t",
            "https://cors-ok.test/data.csv",
            &CloudTableOptions::default(),
        )
        .await
        .unwrap();

    assert!(f.orchestrator.has_table("t").await);
    assert!(f.sql.has_table("t"));
    let record = f.orchestrator.table("t").await.unwrap();
    assert_eq!(record.access, nimbus_engine::AccessPath::Direct);

    let result = f
        .orchestrator
        .query_cloud_table(
            "t",
            Some("SELECT SUM(CAST(a AS INTEGER)) + SUM(CAST(b AS INTEGER)) FROM t"),
        )
        .await
        .unwrap();
    assert_eq!(result, rows(r#"[{"total": 10}]"#));

    // The CTAS referenced the URL directly through the engine's reader.
    assert!(f
        .sql
        .statements()
        .iter()
        .any(|s| s == "CREATE TABLE t AS SELECT * FROM read_csv_auto('https://cors-ok.test/data.csv')"));
    // One probe for the host+path, ever.
    assert_eq!(f.transport.request_count(HttpMethod::Head, "cors-ok.test"), 1);
}

#[tokio::test]
async fn test_cors_blocked_parquet_registers_through_proxy() {
    let sql = MockSqlEngine::new().respond("COUNT(*)", rows(r#"[{"n": 3}]"#));
    let transport = ScriptedTransport::new()
        .on(
            HttpMethod::Head,
            "cors-blocked.test/x.parquet",
            Scripted::NetworkError("CORS preflight rejected"),
        )
        .on(HttpMethod::Get, "proxy.test/fetch", Scripted::ok(b"PAR1....PAR1"));
    let f = fixture(sql, transport, true);
    f.orchestrator
        .initialize(OrchestratorOptions::with_http_extension())
        .await
        .unwrap();

    f.orchestrator
        .register_cloud_table(
            "x",
            "https://cors-blocked.test/x.parquet",
            &CloudTableOptions::default(),
        )
        .await
        .unwrap();

    let record = f.orchestrator.table("x").await.unwrap();
    assert_eq!(record.access, nimbus_engine::AccessPath::Proxied);
    // The object landed in the engine as a virtual file.
    assert!(f.sql.has_file("x.parquet"));
    assert!(f
        .sql
        .statements()
        .iter()
        .any(|s| s == "CREATE TABLE x AS SELECT * FROM read_parquet('x.parquet')"));

    let result = f
        .orchestrator
        .query_cloud_table("x", Some("SELECT COUNT(*) FROM x"))
        .await
        .unwrap();
    assert_eq!(result, rows(r#"[{"n": 3}]"#));

    // Verdict memoized: exactly one probe was issued.
    assert_eq!(
        f.transport.request_count(HttpMethod::Head, "cors-blocked.test"),
        1
    );
}

#[tokio::test]
async fn test_forced_proxy_overrides_direct_request() {
    let sql = MockSqlEngine::new().without_httpfs();
    let transport = ScriptedTransport::new().on(
        HttpMethod::Get,
        "proxy.test/fetch",
        Scripted::ok(b"a,b\n1,2\n"),
    );
    let f = fixture(sql, transport, true);
    f.orchestrator
        .initialize(OrchestratorOptions::with_http_extension())
        .await
        .unwrap();
    assert!(f.orchestrator.forced_proxy());

    let options = CloudTableOptions {
        cors_handling: CorsMode::Direct,
        ..CloudTableOptions::default()
    };
    f.orchestrator
        .register_cloud_table("t", "https://anywhere.test/data.csv", &options)
        .await
        .unwrap();

    let record = f.orchestrator.table("t").await.unwrap();
    assert_eq!(record.access, nimbus_engine::AccessPath::Proxied);
    assert!(f.sql.has_file("t.csv"));
    // No probe in forced-proxy mode.
    assert_eq!(f.transport.request_count(HttpMethod::Head, "anywhere.test"), 0);
}

#[tokio::test]
async fn test_projection_and_filter_substitution() {
    let sql = MockSqlEngine::new();
    let f = fixture(sql, cors_ok_csv_transport(), false);
    f.orchestrator
        .initialize(OrchestratorOptions::with_http_extension())
        .await
        .unwrap();

    let options = CloudTableOptions {
        columns: Some(vec!["a".into(), "b".into()]),
        filter: Some("a > 1".into()),
        ..CloudTableOptions::default()
    };
    f.orchestrator
        .register_cloud_table("t", "https://cors-ok.test/data.csv", &options)
        .await
        .unwrap();

    assert!(f.sql.statements().iter().any(|s| s
        == "CREATE TABLE t AS SELECT a, b FROM read_csv_auto('https://cors-ok.test/data.csv') WHERE a > 1"));
}

#[tokio::test]
async fn test_reregistration_drops_and_recreates() {
    let sql = MockSqlEngine::new().respond("FROM t", rows(r#"[{"a": 1}]"#));
    let f = fixture(sql, cors_ok_csv_transport(), false);
    f.orchestrator
        .initialize(OrchestratorOptions::with_http_extension())
        .await
        .unwrap();

    let url = "https://cors-ok.test/data.csv";
    let options = CloudTableOptions::default();

    f.orchestrator.register_cloud_table("t", url, &options).await.unwrap();
    let first = f.orchestrator.query_cloud_table("t", None).await.unwrap();

    f.orchestrator.unregister_cloud_table("t").await.unwrap();
    assert!(!f.orchestrator.has_table("t").await);
    assert!(!f.sql.has_table("t"));

    f.orchestrator.register_cloud_table("t", url, &options).await.unwrap();
    let second = f.orchestrator.query_cloud_table("t", None).await.unwrap();
    assert_eq!(first, second);

    // Registered twice, dropped in between: two CTAS statements.
    let creates = f
        .sql
        .statements()
        .iter()
        .filter(|s| s.starts_with("CREATE TABLE t "))
        .count();
    assert_eq!(creates, 2);
}

#[tokio::test]
async fn test_failed_registration_leaves_no_partial_state() {
    let sql = MockSqlEngine::new();
    sql.fail_matching("CREATE TABLE broken", None);
    let f = fixture(sql, cors_ok_csv_transport(), false);
    f.orchestrator
        .initialize(OrchestratorOptions::with_http_extension())
        .await
        .unwrap();

    let err = f
        .orchestrator
        .register_cloud_table(
            "broken",
            "https://cors-ok.test/data.csv",
            &CloudTableOptions::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TABLE_REGISTRATION_FAILED");

    assert!(!f.orchestrator.has_table("broken").await);
    assert!(!f.sql.has_table("broken"));
}

#[tokio::test]
async fn test_unsupported_suffix() {
    let sql = MockSqlEngine::new();
    let f = fixture(sql, ScriptedTransport::new(), false);
    f.orchestrator
        .initialize(OrchestratorOptions::with_http_extension())
        .await
        .unwrap();

    let err = f
        .orchestrator
        .register_cloud_table(
            "notes",
            "https://cors-ok.test/readme.txt",
            &CloudTableOptions::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "UNSUPPORTED_FORMAT");
}

#[tokio::test]
async fn test_invalid_table_name_rejected() {
    let sql = MockSqlEngine::new();
    let f = fixture(sql, ScriptedTransport::new(), false);

    let err = f
        .orchestrator
        .register_cloud_table(
            "t; DROP TABLE users",
            "https://cors-ok.test/data.csv",
            &CloudTableOptions::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TABLE_REGISTRATION_FAILED");
}

#[tokio::test]
async fn test_fallback_reregisters_through_proxy() {
    let sql = MockSqlEngine::new().respond("FROM flaky", rows(r#"[{"a": 1}]"#));
    // The first SELECT fails once (engine lost the table), then works.
    sql.fail_matching("SELECT * FROM flaky", Some(1));
    let transport = ScriptedTransport::new()
        .on(
            HttpMethod::Head,
            "cors-ok.test/data.csv",
            Scripted::ok(b""),
        )
        .on(HttpMethod::Get, "proxy.test/fetch", Scripted::ok(b"a\n1\n"));
    let f = fixture(sql, transport, true);
    f.orchestrator
        .initialize(OrchestratorOptions::with_http_extension())
        .await
        .unwrap();

    f.orchestrator
        .register_cloud_table(
            "flaky",
            "https://cors-ok.test/data.csv",
            &CloudTableOptions::default(),
        )
        .await
        .unwrap();

    let result = f.orchestrator.query_cloud_table("flaky", None).await.unwrap();
    assert_eq!(result, rows(r#"[{"a": 1}]"#));

    // The fallback re-registered via proxy.
    let record = f.orchestrator.table("flaky").await.unwrap();
    assert_eq!(record.access, nimbus_engine::AccessPath::Proxied);
    assert!(f.sql.has_file("flaky.csv"));
}

#[tokio::test]
async fn test_fallback_serves_cached_result() {
    let sql = MockSqlEngine::new().respond("FROM seeded", rows(r#"[{"a": 42}]"#));
    let f = fixture(sql.clone(), cors_ok_csv_transport(), false);
    f.orchestrator
        .initialize(OrchestratorOptions::with_http_extension())
        .await
        .unwrap();
    f.orchestrator
        .configure_fallback_strategies(vec![FallbackStrategy::Cache, FallbackStrategy::Error]);

    f.orchestrator
        .register_cloud_table(
            "seeded",
            "https://cors-ok.test/data.csv",
            &CloudTableOptions::default(),
        )
        .await
        .unwrap();

    // Seed the result cache with a successful run.
    let first = f.orchestrator.query_cloud_table("seeded", None).await.unwrap();
    assert_eq!(first, rows(r#"[{"a": 42}]"#));

    // The engine now fails permanently; the cached rows still serve.
    sql.fail_matching("SELECT * FROM seeded", None);
    let second = f.orchestrator.query_cloud_table("seeded", None).await.unwrap();
    assert_eq!(second, first);
}

#[tokio::test]
async fn test_fallback_exhaustion_surfaces_query_failed() {
    let sql = MockSqlEngine::new();
    sql.fail_matching("SELECT * FROM gone", None);
    let f = fixture(sql, cors_ok_csv_transport(), false);
    f.orchestrator
        .initialize(OrchestratorOptions::with_http_extension())
        .await
        .unwrap();
    f.orchestrator.configure_fallback_strategies(vec![FallbackStrategy::Error]);

    f.orchestrator
        .register_cloud_table(
            "gone",
            "https://cors-ok.test/data.csv",
            &CloudTableOptions::default(),
        )
        .await
        .unwrap();

    let err = f.orchestrator.query_cloud_table("gone", None).await.unwrap_err();
    assert_eq!(err.code(), "QUERY_FAILED");
}

#[tokio::test]
async fn test_query_unknown_table() {
    let sql = MockSqlEngine::new();
    let f = fixture(sql, ScriptedTransport::new(), false);
    let err = f.orchestrator.query_cloud_table("ghost", None).await.unwrap_err();
    assert_eq!(err.code(), "UNKNOWN_TABLE");
}

#[tokio::test]
async fn test_unregister_proceeds_when_drop_fails() {
    let sql = MockSqlEngine::new();
    let f = fixture(sql.clone(), cors_ok_csv_transport(), false);
    f.orchestrator
        .initialize(OrchestratorOptions::with_http_extension())
        .await
        .unwrap();

    f.orchestrator
        .register_cloud_table(
            "t",
            "https://cors-ok.test/data.csv",
            &CloudTableOptions::default(),
        )
        .await
        .unwrap();

    sql.fail_matching("DROP TABLE IF EXISTS t", None);
    f.orchestrator.unregister_cloud_table("t").await.unwrap();
    assert!(!f.orchestrator.has_table("t").await);
}

#[tokio::test]
async fn test_disabled_proxied_access_rejects_proxy_mode() {
    let sql = MockSqlEngine::new();
    let f = fixture(sql, ScriptedTransport::new(), true);
    f.orchestrator
        .initialize(OrchestratorOptions::with_http_extension())
        .await
        .unwrap();
    f.orchestrator.enable_proxied_access(false);

    let options = CloudTableOptions {
        cors_handling: CorsMode::Proxy,
        ..CloudTableOptions::default()
    };
    let err = f
        .orchestrator
        .register_cloud_table("t", "https://anywhere.test/data.csv", &options)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TABLE_REGISTRATION_FAILED");
}
