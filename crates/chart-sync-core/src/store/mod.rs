//! Storage abstraction for chart-sync.
//!
//! [`ApplicationStore`] and [`VersionStore`] define every storage operation
//! the reconciliation engine needs, so the engine runs unchanged against
//! SQLite in production and the in-memory stores in tests.
//!
//! Implementations must be `Send + Sync`: the engine shares them across
//! concurrent fetch tasks.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Application, NewVersion, SourceRef, VersionRecord};

/// Registry of mirrored applications.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`find_by_source`](ApplicationStore::find_by_source) | All applications of a source, active or not |
/// | [`find_inactive_by_name`](ApplicationStore::find_inactive_by_name) | Reactivation lookup |
/// | [`save`](ApplicationStore::save) | Upsert on (source, name) |
/// | [`update`](ApplicationStore::update) | Bulk update of active flag and timestamps |
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn find_by_source(&self, source: &SourceRef) -> Result<Vec<Application>>;

    async fn find_inactive_by_name(
        &self,
        source: &SourceRef,
        name: &str,
    ) -> Result<Option<Application>>;

    /// Insert the application, or mark the existing row with the same
    /// natural key active. Returns the stored row with its id.
    async fn save(&self, app: &Application) -> Result<Application>;

    async fn update(&self, apps: &[Application]) -> Result<()>;
}

/// Registry of mirrored version records.
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Every stored version of an application as a summary: id, version,
    /// latest flag and timestamps only. Payload fields are left empty.
    async fn find_by_application(&self, application_id: i64) -> Result<Vec<VersionRecord>>;

    /// Insert a batch. Rows clashing with an existing (application, version)
    /// pair are silently skipped. Returns the number of rows inserted.
    async fn save_batch(&self, versions: &[NewVersion]) -> Result<u64>;

    /// The record currently flagged latest, if any.
    async fn find_latest(&self, application_id: i64) -> Result<Option<VersionRecord>>;

    /// The record with the greatest `created` time, ties broken by highest id.
    async fn find_most_recently_created(
        &self,
        application_id: i64,
    ) -> Result<Option<VersionRecord>>;

    async fn find_by_application_and_version(
        &self,
        application_id: i64,
        version: &str,
    ) -> Result<Option<VersionRecord>>;

    /// Persist the `latest` flag and `updated_on` of each record.
    async fn update(&self, versions: &[VersionRecord]) -> Result<()>;
}
