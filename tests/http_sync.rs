mod common;

use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chart_sync::chart::sha256_hex;
use chart_sync::config::Config;
use chart_sync::db;
use chart_sync::sqlite_store::SqliteStore;
use chart_sync::sync::run_sync;
use chart_sync_core::models::{Application, SourceRef};
use chart_sync_core::store::{ApplicationStore, VersionStore};

use common::chart_archive;

struct Published {
    version: &'static str,
    created: &'static str,
    bytes: Vec<u8>,
}

fn publish(version: &'static str, created: &'static str) -> Published {
    Published {
        version,
        created,
        bytes: chart_archive("redis", version, &format!("image:\n  tag: \"{}\"\n", version)),
    }
}

fn index_yaml(charts: &[Published], missing: &[&str]) -> String {
    let mut out = String::from("apiVersion: v1\nentries:\n  redis:\n");
    for chart in charts {
        out.push_str(&format!(
            "    - name: redis\n      version: {}\n      appVersion: \"7.{}\"\n      created: \"{}\"\n      digest: {}\n      urls: [\"charts/redis-{}.tgz\"]\n",
            chart.version,
            chart.version,
            chart.created,
            sha256_hex(&chart.bytes),
            chart.version
        ));
    }
    for version in missing {
        out.push_str(&format!(
            "    - name: redis\n      version: {}\n      created: \"2024-01-01T00:00:00Z\"\n      urls: [\"charts/redis-{}.tgz\"]\n",
            version, version
        ));
    }
    out
}

async fn serve(server: &MockServer, charts: &[Published], missing: &[&str]) {
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/index.yaml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(index_yaml(charts, missing)))
        .mount(server)
        .await;
    for chart in charts {
        Mock::given(method("GET"))
            .and(path(format!("/charts/redis-{}.tgz", chart.version)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(chart.bytes.clone()))
            .mount(server)
            .await;
    }
}

fn config(tmp: &TempDir, server: &MockServer) -> Config {
    let content = format!(
        r#"[db]
path = "{}/chart-sync.sqlite"

[sources.http.local]
url = "{}"
timeout_secs = 5
"#,
        tmp.path().display(),
        server.uri()
    );
    Config::from_toml_str(&content).unwrap()
}

async fn redis(store: &SqliteStore) -> Application {
    store
        .find_by_source(&SourceRef::ChartRepo("local".to_string()))
        .await
        .unwrap()
        .into_iter()
        .find(|a| a.name == "redis")
        .unwrap()
}

#[tokio::test]
async fn mirrors_repository_and_tracks_latest() {
    let tmp = TempDir::new().unwrap();
    let server = MockServer::start().await;
    let cfg = config(&tmp, &server);

    serve(
        &server,
        &[
            publish("1.0.0", "2024-01-01T00:00:00Z"),
            publish("1.1.0", "2024-02-01T00:00:00Z"),
        ],
        &[],
    )
    .await;
    let summary = run_sync(&cfg, None).await.unwrap();
    assert!(summary.failed.is_empty());
    assert_eq!(summary.reports[0].versions_inserted, 2);

    let pool = db::connect(&cfg).await.unwrap();
    let store = SqliteStore::new(pool);
    let app = redis(&store).await;
    let latest = store.find_latest(app.id).await.unwrap().unwrap();
    assert_eq!(latest.version, "1.1.0");
    assert_eq!(latest.app_version.as_deref(), Some("7.1.1.0"));
    assert_eq!(latest.readme, "# redis\n");
    let values: serde_json::Value = serde_json::from_str(&latest.values_json).unwrap();
    assert_eq!(values["image"]["tag"], "1.1.0");

    serve(
        &server,
        &[
            publish("1.0.0", "2024-01-01T00:00:00Z"),
            publish("1.1.0", "2024-02-01T00:00:00Z"),
            publish("1.2.0", "2024-03-01T00:00:00Z"),
        ],
        &[],
    )
    .await;
    let summary = run_sync(&cfg, Some("http:local")).await.unwrap();
    assert_eq!(summary.reports[0].new_versions, 1);
    assert_eq!(summary.reports[0].versions_inserted, 1);

    let all = store.find_by_application(app.id).await.unwrap();
    assert_eq!(all.len(), 3);
    let flagged: Vec<&str> = all
        .iter()
        .filter(|v| v.latest)
        .map(|v| v.version.as_str())
        .collect();
    assert_eq!(flagged, vec!["1.2.0"]);
}

#[tokio::test]
async fn unchanged_index_is_a_no_op() {
    let tmp = TempDir::new().unwrap();
    let server = MockServer::start().await;
    let cfg = config(&tmp, &server);
    let charts = [publish("1.0.0", "2024-01-01T00:00:00Z")];

    serve(&server, &charts, &[]).await;
    run_sync(&cfg, Some("local")).await.unwrap();
    let summary = run_sync(&cfg, Some("local")).await.unwrap();

    assert_eq!(summary.reports[0].new_versions, 0);
    assert_eq!(summary.reports[0].versions_inserted, 0);
    assert_eq!(summary.reports[0].latest_updates, 0);
}

#[tokio::test]
async fn broken_chart_download_is_skipped() {
    let tmp = TempDir::new().unwrap();
    let server = MockServer::start().await;
    let cfg = config(&tmp, &server);

    serve(
        &server,
        &[publish("1.0.0", "2024-01-01T00:00:00Z")],
        &["1.3.0"],
    )
    .await;
    let summary = run_sync(&cfg, Some("http")).await.unwrap();
    let report = &summary.reports[0];
    assert_eq!(report.applications_failed, 0);
    assert_eq!(report.new_versions, 2);
    assert_eq!(report.versions_inserted, 1);
    assert_eq!(report.versions_failed, 1);

    let pool = db::connect(&cfg).await.unwrap();
    let store = SqliteStore::new(pool);
    let app = redis(&store).await;
    let latest = store.find_latest(app.id).await.unwrap().unwrap();
    assert_eq!(latest.version, "1.0.0");
}

#[tokio::test]
async fn unreachable_index_fails_only_that_source() {
    let tmp = TempDir::new().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/index.yaml"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let cfg = config(&tmp, &server);

    let summary = run_sync(&cfg, None).await.unwrap();
    assert!(summary.reports.is_empty());
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, SourceRef::ChartRepo("local".to_string()));
}

#[tokio::test]
async fn unknown_selector_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let server = MockServer::start().await;
    let cfg = config(&tmp, &server);
    assert!(run_sync(&cfg, Some("oci:local")).await.is_err());
}
