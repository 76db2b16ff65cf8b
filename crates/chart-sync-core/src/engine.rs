//! The version reconciliation engine.
//!
//! Runs one reconciliation pass per source:
//!
//! ```text
//! list catalog ─▶ retire missing apps ─▶ per app: diff ─▶ fetch ─▶ batch insert ─▶ swap latest
//! ```
//!
//! Failures are contained at the narrowest scope that keeps the pass
//! moving: a bad version is skipped, a failed application is logged and the
//! next one proceeds. Only a failed catalog listing or app retirement aborts
//! the source.
//!
//! For OCI sources with a parallelism limit, per-version fetches run as
//! tokio tasks admitted through a [`Semaphore`]. All tasks of one
//! application append into a single [`VersionBatch`] behind a
//! [`Mutex`]; fetches happen outside the lock, only append and flush happen
//! inside it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::batch::{VersionBatch, DEFAULT_CHUNK_SIZE};
use crate::diff::new_versions;
use crate::latest::{candidate_from_remote, plan_swap, LatestRule, LatestState};
use crate::models::{Application, Artifact, NewVersion, SourceKind, SourceRef, VersionRecord};
use crate::source::ArtifactSource;
use crate::store::{ApplicationStore, VersionStore};

/// Per-source knobs for one reconciliation pass.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Records buffered before a batch insert.
    pub chunk_size: usize,
    /// Concurrent fetches per application for OCI sources. `0` fetches
    /// sequentially.
    pub parallelism: usize,
    pub latest_rule: LatestRule,
    /// Mark applications inactive when they disappear from the source.
    pub prune_missing: bool,
}

impl ReconcileOptions {
    /// Defaults for a source kind: HTTP repositories pick latest by
    /// creation time and never prune; OCI registries trust registry order
    /// and prune against their repository list.
    pub fn for_kind(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Http => Self {
                chunk_size: DEFAULT_CHUNK_SIZE,
                parallelism: 0,
                latest_rule: LatestRule::NewestCreated,
                prune_missing: false,
            },
            SourceKind::Oci => Self {
                chunk_size: DEFAULT_CHUNK_SIZE,
                parallelism: 0,
                latest_rule: LatestRule::SourceOrder,
                prune_missing: true,
            },
        }
    }
}

/// Outcome of one application's pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationReport {
    /// Versions found upstream but not stored.
    pub new_versions: usize,
    /// Records handed to the store.
    pub written: u64,
    /// Rows the store actually inserted.
    pub inserted: u64,
    /// Versions skipped because their fetch or parse failed.
    pub failed: u64,
    pub latest_updated: bool,
}

/// Outcome of one source's pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
    pub source: SourceRef,
    pub applications: usize,
    pub applications_failed: usize,
    pub deactivated: usize,
    pub new_versions: usize,
    pub versions_inserted: u64,
    pub versions_failed: u64,
    pub latest_updates: usize,
}

impl SourceReport {
    fn new(source: SourceRef) -> Self {
        Self {
            source,
            applications: 0,
            applications_failed: 0,
            deactivated: 0,
            new_versions: 0,
            versions_inserted: 0,
            versions_failed: 0,
            latest_updates: 0,
        }
    }

    fn absorb(&mut self, app: &ApplicationReport) {
        self.new_versions += app.new_versions;
        self.versions_inserted += app.inserted;
        self.versions_failed += app.failed;
        if app.latest_updated {
            self.latest_updates += 1;
        }
    }
}

/// Map a fetched artifact onto an insertable record.
///
/// Converts the raw values YAML to JSON (an empty document becomes `{}`)
/// and substitutes `now` for a missing or zero creation time.
pub fn build_version(
    application_id: i64,
    version: &str,
    artifact: Artifact,
    now: DateTime<Utc>,
) -> Result<NewVersion> {
    let values: serde_json::Value = if artifact.raw_values.trim().is_empty() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        serde_yaml::from_str(&artifact.raw_values)
            .with_context(|| format!("values.yaml of {} is not valid YAML", version))?
    };
    let values_json = serde_json::to_string(&values)?;
    let chart_json = serde_json::to_string(&artifact.metadata)?;
    let created = match artifact.created {
        Some(ts) if ts.timestamp() > 0 => ts,
        _ => now,
    };

    Ok(NewVersion {
        application_id,
        version: version.to_string(),
        chart_name: artifact.metadata.name,
        app_version: artifact.metadata.app_version,
        description: artifact.metadata.description,
        digest: artifact.digest,
        icon: artifact.metadata.icon,
        home: artifact.metadata.home,
        deprecated: artifact.metadata.deprecated,
        values_json,
        chart_json,
        raw_values: artifact.raw_values,
        readme: artifact.readme,
        values_schema_json: artifact.values_schema_json,
        notes: artifact.notes,
        created,
        fetched_on: now,
    })
}

/// Fetch one version and map it, logging and returning `None` on failure.
async fn fetch_record(
    source: &dyn ArtifactSource,
    app: &Application,
    version: &str,
) -> Option<NewVersion> {
    let artifact = match source.fetch_artifact(&app.name, version).await {
        Ok(a) => a,
        Err(e) => {
            warn!(
                source = %app.source,
                app = %app.name,
                version,
                error = %format!("{:#}", e),
                "skipping version: fetch failed"
            );
            return None;
        }
    };
    match build_version(app.id, version, artifact, Utc::now()) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(
                source = %app.source,
                app = %app.name,
                version,
                error = %format!("{:#}", e),
                "skipping version: payload could not be mapped"
            );
            None
        }
    }
}

/// One parallel fetch: wait for a worker slot, fetch outside the lock,
/// then append under the lock. A failed fetch leaves the batch untouched.
/// Once a write has failed the remaining tasks return without fetching.
async fn fetch_task(
    permits: Arc<Semaphore>,
    source: Arc<dyn ArtifactSource>,
    store: Arc<dyn VersionStore>,
    batch: Arc<Mutex<VersionBatch>>,
    skipped: Arc<AtomicU64>,
    app: Application,
    version: String,
) -> Result<()> {
    let _permit = permits.acquire_owned().await?;
    if batch.lock().await.is_abandoned() {
        return Ok(());
    }
    let Some(record) = fetch_record(source.as_ref(), &app, &version).await else {
        skipped.fetch_add(1, Ordering::Relaxed);
        return Ok(());
    };
    let mut guard = batch.lock().await;
    guard
        .push(store.as_ref(), record)
        .await
        .context("saving chart versions")
}

/// Orchestrates reconciliation passes against an application store and a
/// version store.
#[derive(Clone)]
pub struct Reconciler {
    apps: Arc<dyn ApplicationStore>,
    versions: Arc<dyn VersionStore>,
}

impl Reconciler {
    pub fn new(apps: Arc<dyn ApplicationStore>, versions: Arc<dyn VersionStore>) -> Self {
        Self { apps, versions }
    }

    /// Run one full pass for a source.
    ///
    /// # Errors
    ///
    /// Returns an error only when the catalog cannot be listed or the stored
    /// applications cannot be read or retired. Application and version
    /// failures are logged and counted in the report.
    pub async fn reconcile_source(
        &self,
        source: Arc<dyn ArtifactSource>,
        options: &ReconcileOptions,
    ) -> Result<SourceReport> {
        let source_ref = source.source_ref().clone();
        let mut report = SourceReport::new(source_ref.clone());

        let catalog = source
            .list_catalog()
            .await
            .with_context(|| format!("listing catalog of {}", source_ref))?;
        info!(source = %source_ref, applications = catalog.len(), "catalog listed");

        let known = if options.prune_missing {
            let declared = source
                .declared_names()
                .unwrap_or_else(|| catalog.keys().cloned().collect());
            let (apps, retired) = self
                .deactivate_missing(&source_ref, &declared)
                .await
                .with_context(|| format!("retiring missing applications of {}", source_ref))?;
            report.deactivated = retired;
            apps
        } else {
            self.apps
                .find_by_source(&source_ref)
                .await
                .with_context(|| format!("loading applications of {}", source_ref))?
        };
        let active: HashMap<String, Application> = known
            .into_iter()
            .filter(|a| a.active)
            .map(|a| (a.name.clone(), a))
            .collect();

        for (name, remote) in &catalog {
            report.applications += 1;
            let app = match self.ensure_application(&active, &source_ref, name).await {
                Ok(app) => app,
                Err(e) => {
                    error!(
                        source = %source_ref,
                        app = %name,
                        error = %format!("{:#}", e),
                        "could not register application"
                    );
                    report.applications_failed += 1;
                    continue;
                }
            };

            info!(
                source = %source_ref,
                app = %name,
                versions = remote.len(),
                "handling chart versions"
            );
            match self
                .reconcile_application(Arc::clone(&source), &app, remote, options)
                .await
            {
                Ok(app_report) => report.absorb(&app_report),
                Err(e) => {
                    error!(
                        source = %source_ref,
                        app = %name,
                        error = %format!("{:#}", e),
                        "application pass failed"
                    );
                    report.applications_failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Mark every active application of `source` whose name is absent from
    /// `declared` inactive, in one bulk update.
    ///
    /// Returns all applications of the source after the update, and the
    /// number retired.
    pub async fn deactivate_missing(
        &self,
        source: &SourceRef,
        declared: &[String],
    ) -> Result<(Vec<Application>, usize)> {
        let declared: HashSet<&str> = declared.iter().map(String::as_str).collect();
        let mut apps = self.apps.find_by_source(source).await?;
        let now = Utc::now();

        let mut retired = Vec::new();
        for app in apps.iter_mut() {
            if app.active && !declared.contains(app.name.as_str()) {
                app.active = false;
                app.updated_on = now;
                retired.push(app.clone());
            }
        }

        if !retired.is_empty() {
            info!(
                source = %source,
                retired = retired.len(),
                names = ?retired.iter().map(|a| a.name.as_str()).collect::<Vec<_>>(),
                "marking applications inactive"
            );
            self.apps.update(&retired).await?;
        }
        Ok((apps, retired.len()))
    }

    /// Find the active row for `name`, reactivating or creating it if needed.
    async fn ensure_application(
        &self,
        active: &HashMap<String, Application>,
        source: &SourceRef,
        name: &str,
    ) -> Result<Application> {
        if let Some(app) = active.get(name) {
            return Ok(app.clone());
        }

        let now = Utc::now();
        if let Some(mut app) = self.apps.find_inactive_by_name(source, name).await? {
            app.active = true;
            app.updated_on = now;
            self.apps.update(std::slice::from_ref(&app)).await?;
            info!(source = %source, app = %name, id = app.id, "reactivated application");
            return Ok(app);
        }

        let app = self.apps.save(&Application::new(source.clone(), name, now)).await?;
        info!(source = %source, app = %name, id = app.id, "registered application");
        Ok(app)
    }

    /// Diff, fetch, persist and recompute the latest pointer for one
    /// application.
    ///
    /// # Errors
    ///
    /// Fails when stored versions cannot be read, a batch insert fails, or
    /// the latest pointer cannot be recomputed. Versions inserted before the
    /// failure stay stored.
    pub async fn reconcile_application(
        &self,
        source: Arc<dyn ArtifactSource>,
        app: &Application,
        remote: &[String],
        options: &ReconcileOptions,
    ) -> Result<ApplicationReport> {
        let mut report = ApplicationReport::default();

        let snapshot = self
            .versions
            .find_by_application(app.id)
            .await
            .context("loading stored versions")?;
        let persisted: HashSet<&str> = snapshot.iter().map(|r| r.version.as_str()).collect();
        let fresh: Vec<String> = new_versions(remote, &persisted)
            .into_iter()
            .map(str::to_string)
            .collect();
        report.new_versions = fresh.len();

        if fresh.is_empty() {
            if !snapshot.is_empty() && !snapshot.iter().any(|r| r.latest) {
                info!(
                    source = %app.source,
                    app = %app.name,
                    "no latest version flagged, repairing"
                );
                report.latest_updated = self
                    .update_latest(app, remote, options.latest_rule, &snapshot)
                    .await
                    .context("repairing latest version")?;
            } else {
                debug!(source = %app.source, app = %app.name, "no change");
            }
            return Ok(report);
        }

        let parallel = options.parallelism > 0 && app.source.kind() == SourceKind::Oci;
        let batch = if parallel {
            self.fetch_parallel(source, app, fresh, options).await?
        } else {
            self.fetch_sequential(source.as_ref(), app, &fresh, options.chunk_size)
                .await?
        };
        report.written = batch.written();
        report.inserted = batch.inserted();
        report.failed = report.new_versions as u64 - batch.written();

        if batch.written() == 0 {
            info!(source = %app.source, app = %app.name, "no change");
            return Ok(report);
        }
        info!(
            source = %app.source,
            app = %app.name,
            inserted = batch.inserted(),
            skipped = report.failed,
            "chart versions saved"
        );

        report.latest_updated = self
            .update_latest(app, remote, options.latest_rule, &snapshot)
            .await
            .context("recomputing latest version")?;
        Ok(report)
    }

    async fn fetch_sequential(
        &self,
        source: &dyn ArtifactSource,
        app: &Application,
        fresh: &[String],
        chunk_size: usize,
    ) -> Result<VersionBatch> {
        let mut batch = VersionBatch::new(chunk_size);
        for version in fresh {
            if let Some(record) = fetch_record(source, app, version).await {
                batch
                    .push(self.versions.as_ref(), record)
                    .await
                    .context("saving chart versions")?;
            }
        }
        batch
            .flush(self.versions.as_ref())
            .await
            .context("saving remaining chart versions")?;
        Ok(batch)
    }

    async fn fetch_parallel(
        &self,
        source: Arc<dyn ArtifactSource>,
        app: &Application,
        fresh: Vec<String>,
        options: &ReconcileOptions,
    ) -> Result<VersionBatch> {
        let batch = Arc::new(Mutex::new(VersionBatch::new(options.chunk_size)));
        let permits = Arc::new(Semaphore::new(options.parallelism));
        let skipped = Arc::new(AtomicU64::new(0));
        let mut tasks = JoinSet::new();

        debug!(
            source = %app.source,
            app = %app.name,
            tasks = fresh.len(),
            workers = options.parallelism,
            "fetching versions in parallel"
        );

        for version in fresh {
            tasks.spawn(fetch_task(
                Arc::clone(&permits),
                Arc::clone(&source),
                Arc::clone(&self.versions),
                Arc::clone(&batch),
                Arc::clone(&skipped),
                app.clone(),
                version,
            ));
        }

        let mut first_err: Option<anyhow::Error> = None;
        while let Some(joined) = tasks.join_next().await {
            if first_err.is_some() {
                continue;
            }
            let outcome = joined
                .map_err(|e| anyhow!("fetch task panicked: {}", e))
                .and_then(|r| r);
            if let Err(e) = outcome {
                first_err = Some(e);
                tasks.abort_all();
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }

        let mut guard = batch.lock().await;
        guard
            .flush(self.versions.as_ref())
            .await
            .context("saving remaining chart versions")?;
        debug!(
            source = %app.source,
            app = %app.name,
            skipped = skipped.load(Ordering::Relaxed),
            "parallel fetch finished"
        );

        let mut done = VersionBatch::new(options.chunk_size);
        std::mem::swap(&mut done, &mut *guard);
        Ok(done)
    }

    /// Make the rule's candidate the only latest version. Returns whether an
    /// update was written.
    async fn update_latest(
        &self,
        app: &Application,
        remote: &[String],
        rule: LatestRule,
        snapshot: &[VersionRecord],
    ) -> Result<bool> {
        let candidate = match rule {
            LatestRule::NewestCreated => self.versions.find_most_recently_created(app.id).await?,
            LatestRule::SourceOrder | LatestRule::SemVer => {
                match candidate_from_remote(rule, remote) {
                    Some(version) => {
                        self.versions
                            .find_by_application_and_version(app.id, version)
                            .await?
                    }
                    None => None,
                }
            }
        };
        let Some(candidate) = candidate else {
            warn!(
                source = %app.source,
                app = %app.name,
                "latest candidate is not stored, leaving latest flag unchanged"
            );
            return Ok(false);
        };

        let stale: Vec<VersionRecord> = snapshot
            .iter()
            .filter(|r| r.latest && r.id != candidate.id)
            .cloned()
            .collect();
        if candidate.latest && stale.is_empty() {
            return Ok(false);
        }

        let current = LatestState::from(self.versions.find_latest(app.id).await?);
        let updates = plan_swap(&candidate, &current, &stale, Utc::now());
        if updates.is_empty() {
            return Ok(false);
        }
        self.versions.update(&updates).await?;
        info!(
            source = %app.source,
            app = %app.name,
            latest = %candidate.version,
            "latest version updated"
        );
        Ok(true)
    }
}
