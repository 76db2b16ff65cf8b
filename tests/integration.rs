use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn chart_sync_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("chart-sync");
    path
}

fn setup_test_env(sources: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/chart-sync.sqlite"

[log]
filter = "warn"

{}
"#,
        root.display(),
        sources
    );

    let config_path = config_dir.join("chart-sync.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_chart_sync(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = chart_sync_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("CHART_PROVIDER_ID")
        .env_remove("APP_STORE_APPLICATION_VERSIONS_SAVE_CHUNK_SIZE")
        .env_remove("PARALLELISM_LIMIT_FOR_TAG_PROCESSING")
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run chart-sync binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

const UNREACHABLE_HTTP: &str = r#"
[sources.http.offline]
url = "http://127.0.0.1:9/charts"
timeout_secs = 1
"#;

#[test]
fn test_init_creates_database() {
    let (tmp, config) = setup_test_env("");
    let (stdout, _, success) = run_chart_sync(&config, &["init"]);
    assert!(success);
    assert!(stdout.contains("Database initialized successfully"));
    assert!(tmp.path().join("data/chart-sync.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config) = setup_test_env("");
    let (_, _, first) = run_chart_sync(&config, &["init"]);
    let (_, _, second) = run_chart_sync(&config, &["init"]);
    assert!(first);
    assert!(second);
}

#[test]
fn test_sources() {
    let sources = r#"
[sources.http.bitnami]
url = "https://charts.bitnami.com/bitnami"

[sources.oci.ghcr]
registry_url = "oci://ghcr.io/acme"
repositories = ["nginx", "redis"]
tag_order = "semver"
"#;
    let (_tmp, config) = setup_test_env(sources);
    let (stdout, _, success) = run_chart_sync(&config, &["sources"]);
    assert!(success);
    assert!(stdout.contains("http:bitnami"));
    assert!(stdout.contains("oci:ghcr"));
    assert!(stdout.contains("repositories=2"));
    assert!(stdout.contains("order=semver"));
}

#[test]
fn test_sync_without_sources() {
    let (_tmp, config) = setup_test_env("");
    let (stdout, _, success) = run_chart_sync(&config, &["sync"]);
    assert!(success);
    assert!(stdout.contains("no sources configured"));
}

#[test]
fn test_default_command_is_sync() {
    let (_tmp, config) = setup_test_env("");
    let (stdout, _, success) = run_chart_sync(&config, &[]);
    assert!(success);
    assert!(stdout.contains("sync *"));
}

#[test]
fn test_unreachable_source_does_not_fail_run() {
    let (_tmp, config) = setup_test_env(UNREACHABLE_HTTP);
    let (stdout, _, success) = run_chart_sync(&config, &["sync", "http:offline"]);
    assert!(success);
    assert!(stdout.contains("sync http:offline"));
    assert!(stdout.contains("failed"));
}

#[test]
fn test_unknown_selector_fails() {
    let (_tmp, config) = setup_test_env(UNREACHABLE_HTTP);
    let (_, stderr, success) = run_chart_sync(&config, &["sync", "oci:offline"]);
    assert!(!success);
    assert!(stderr.contains("offline"));
}

#[test]
fn test_invalid_config_fails() {
    let sources = r#"
[sources.oci.empty]
registry_url = "oci://ghcr.io/acme"
repositories = []
"#;
    let (_tmp, config) = setup_test_env(sources);
    let (_, stderr, success) = run_chart_sync(&config, &["sync"]);
    assert!(!success);
    assert!(stderr.contains("repositories must not be empty"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");
    let (_, stderr, success) = run_chart_sync(&missing, &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_env_override_selects_provider() {
    let (_tmp, config) = setup_test_env(UNREACHABLE_HTTP);
    let output = Command::new(chart_sync_binary())
        .arg("--config")
        .arg(config.to_str().unwrap())
        .env("CHART_PROVIDER_ID", "oci:missing")
        .env_remove("RUST_LOG")
        .output()
        .unwrap();
    assert!(!output.status.success());
}
