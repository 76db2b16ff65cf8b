//! Sync pass orchestration.
//!
//! Resolves the selector to configured sources, makes sure the schema
//! exists, then runs one reconciliation pass per source in order. A source
//! that fails is logged and reported; the run moves on to the next one.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use chart_sync_core::engine::{ReconcileOptions, Reconciler, SourceReport};
use chart_sync_core::models::SourceRef;
use chart_sync_core::source::ArtifactSource;

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::source_http::HttpChartSource;
use crate::source_oci::OciChartSource;
use crate::sqlite_store::SqliteStore;

/// Outcome of a whole run.
#[derive(Debug, Default)]
pub struct SyncSummary {
    pub reports: Vec<SourceReport>,
    /// Sources whose pass aborted, with the rendered error.
    pub failed: Vec<(SourceRef, String)>,
}

/// Instantiate the configured source behind `source`.
pub fn build_source(config: &Config, source: &SourceRef) -> Result<Arc<dyn ArtifactSource>> {
    match source {
        SourceRef::ChartRepo(id) => {
            let cfg = config
                .sources
                .http
                .get(id)
                .ok_or_else(|| anyhow::anyhow!("no http source named '{}'", id))?;
            Ok(Arc::new(HttpChartSource::new(source.clone(), cfg)?))
        }
        SourceRef::OciRegistry(id) => {
            let cfg = config
                .sources
                .oci
                .get(id)
                .ok_or_else(|| anyhow::anyhow!("no oci source named '{}'", id))?;
            Ok(Arc::new(OciChartSource::new(source.clone(), cfg)?))
        }
    }
}

/// Pass options for one source: kind defaults overlaid with `[sync]` and
/// per-source settings.
pub fn options_for(config: &Config, source: &SourceRef) -> ReconcileOptions {
    let mut options = ReconcileOptions::for_kind(source.kind());
    options.chunk_size = config.sync.chunk_size;
    options.parallelism = config.sync.parallelism;
    match source {
        SourceRef::ChartRepo(id) => {
            if let Some(cfg) = config.sources.http.get(id) {
                options.prune_missing = cfg.prune_missing;
            }
        }
        SourceRef::OciRegistry(id) => {
            let order = config
                .sources
                .oci
                .get(id)
                .and_then(|cfg| cfg.tag_order)
                .unwrap_or(config.sync.oci_tag_order);
            options.latest_rule = order.latest_rule();
        }
    }
    options
}

/// Run one pass over every source matching `selector` (defaulting to
/// `sync.provider`).
///
/// # Errors
///
/// Fails for an unresolvable selector or when the database cannot be
/// opened or migrated. Individual source failures are returned in the
/// summary instead.
pub async fn run_sync(config: &Config, selector: Option<&str>) -> Result<SyncSummary> {
    let selector = selector.unwrap_or(&config.sync.provider);
    let targets = config.resolve_selector(selector)?;

    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let store = Arc::new(SqliteStore::new(pool.clone()));
    let reconciler = Reconciler::new(store.clone(), store);

    let mut summary = SyncSummary::default();
    if targets.is_empty() {
        info!(selector, "no sources match");
        println!("sync {}", selector);
        println!("  no sources configured");
        pool.close().await;
        return Ok(summary);
    }

    for target in targets {
        info!(source = %target, "sync started");
        let options = options_for(config, &target);
        let outcome = match build_source(config, &target) {
            Ok(source) => reconciler.reconcile_source(source, &options).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(report) => {
                print_report(&report);
                info!(
                    source = %target,
                    applications = report.applications,
                    inserted = report.versions_inserted,
                    "sync finished"
                );
                summary.reports.push(report);
            }
            Err(e) => {
                let rendered = format!("{:#}", e);
                error!(source = %target, error = %rendered, "sync failed");
                println!("sync {}", target);
                println!("  failed: {}", rendered);
                summary.failed.push((target, rendered));
            }
        }
    }

    let ok = summary.reports.len();
    let failed = summary.failed.len();
    if failed == 0 {
        println!("ok");
    } else {
        println!("done: {} source(s) ok, {} failed", ok, failed);
    }

    pool.close().await;
    Ok(summary)
}

fn print_report(report: &SourceReport) {
    println!("sync {}", report.source);
    println!(
        "  applications: {} (failed: {}, deactivated: {})",
        report.applications, report.applications_failed, report.deactivated
    );
    println!("  new versions: {}", report.new_versions);
    println!(
        "  versions inserted: {} (skipped: {})",
        report.versions_inserted, report.versions_failed
    );
    println!("  latest updates: {}", report.latest_updates);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chart_sync_core::latest::LatestRule;

    const CONFIG: &str = r#"
[db]
path = "/tmp/unused.sqlite"

[sync]
chunk_size = 7
parallelism = 3
oci_tag_order = "semver"

[sources.http.stable]
url = "https://charts.example.com"
prune_missing = true

[sources.oci.ghcr]
registry_url = "oci://ghcr.io/acme"
repositories = ["nginx"]

[sources.oci.local]
registry_url = "localhost:5000"
repositories = ["app"]
tag_order = "registry"
"#;

    #[test]
    fn options_merge_sync_and_source_settings() {
        let config = Config::from_toml_str(CONFIG).unwrap();

        let http = options_for(&config, &SourceRef::ChartRepo("stable".to_string()));
        assert_eq!(http.chunk_size, 7);
        assert_eq!(http.latest_rule, LatestRule::NewestCreated);
        assert!(http.prune_missing);

        let ghcr = options_for(&config, &SourceRef::OciRegistry("ghcr".to_string()));
        assert_eq!(ghcr.parallelism, 3);
        assert_eq!(ghcr.latest_rule, LatestRule::SemVer);
        assert!(ghcr.prune_missing);

        let local = options_for(&config, &SourceRef::OciRegistry("local".to_string()));
        assert_eq!(local.latest_rule, LatestRule::SourceOrder);
    }

    #[test]
    fn builds_configured_sources_only() {
        let config = Config::from_toml_str(CONFIG).unwrap();
        let source = build_source(&config, &SourceRef::OciRegistry("ghcr".to_string())).unwrap();
        assert_eq!(source.source_ref(), &SourceRef::OciRegistry("ghcr".to_string()));
        assert_eq!(source.declared_names(), Some(vec!["nginx".to_string()]));
        assert!(build_source(&config, &SourceRef::ChartRepo("ghcr".to_string())).is_err());
    }
}
