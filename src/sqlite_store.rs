//! SQLite-backed [`ApplicationStore`] and [`VersionStore`].
//!
//! Timestamps are stored as Unix milliseconds. Batch inserts and bulk
//! updates each run in one transaction.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use chart_sync_core::models::{Application, NewVersion, SourceKind, SourceRef, VersionRecord};
use chart_sync_core::store::{ApplicationStore, VersionStore};

const VERSION_COLUMNS: &str = "id, application_id, version, chart_name, app_version, description, \
     digest, icon, home, deprecated, values_json, chart_json, raw_values, readme, \
     values_schema_json, notes, latest, created, created_on, updated_on";

const SUMMARY_COLUMNS: &str =
    "id, application_id, version, latest, created, created_on, updated_on";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn application_from_row(row: &SqliteRow) -> Result<Application> {
    let kind: String = row.try_get("source_kind")?;
    let kind = SourceKind::parse(&kind)
        .ok_or_else(|| anyhow!("unknown source kind '{}' in applications table", kind))?;
    let source_id: String = row.try_get("source_id")?;
    Ok(Application {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        source: SourceRef::new(kind, source_id),
        active: row.try_get("active")?,
        created_on: from_millis(row.try_get("created_on")?),
        updated_on: from_millis(row.try_get("updated_on")?),
    })
}

fn version_from_row(row: &SqliteRow) -> Result<VersionRecord> {
    Ok(VersionRecord {
        id: row.try_get("id")?,
        application_id: row.try_get("application_id")?,
        version: row.try_get("version")?,
        chart_name: row.try_get("chart_name")?,
        app_version: row.try_get("app_version")?,
        description: row.try_get("description")?,
        digest: row.try_get("digest")?,
        icon: row.try_get("icon")?,
        home: row.try_get("home")?,
        deprecated: row.try_get("deprecated")?,
        values_json: row.try_get("values_json")?,
        chart_json: row.try_get("chart_json")?,
        raw_values: row.try_get("raw_values")?,
        readme: row.try_get("readme")?,
        values_schema_json: row.try_get("values_schema_json")?,
        notes: row.try_get("notes")?,
        latest: row.try_get("latest")?,
        created: from_millis(row.try_get("created")?),
        created_on: from_millis(row.try_get("created_on")?),
        updated_on: from_millis(row.try_get("updated_on")?),
    })
}

fn summary_from_row(row: &SqliteRow) -> Result<VersionRecord> {
    Ok(VersionRecord {
        id: row.try_get("id")?,
        application_id: row.try_get("application_id")?,
        version: row.try_get("version")?,
        latest: row.try_get("latest")?,
        created: from_millis(row.try_get("created")?),
        created_on: from_millis(row.try_get("created_on")?),
        updated_on: from_millis(row.try_get("updated_on")?),
        ..VersionRecord::default()
    })
}

#[async_trait]
impl ApplicationStore for SqliteStore {
    async fn find_by_source(&self, source: &SourceRef) -> Result<Vec<Application>> {
        let rows = sqlx::query(
            "SELECT id, name, source_kind, source_id, active, created_on, updated_on
             FROM applications WHERE source_kind = ? AND source_id = ? ORDER BY id",
        )
        .bind(source.kind().as_str())
        .bind(source.id())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(application_from_row).collect()
    }

    async fn find_inactive_by_name(
        &self,
        source: &SourceRef,
        name: &str,
    ) -> Result<Option<Application>> {
        let row = sqlx::query(
            "SELECT id, name, source_kind, source_id, active, created_on, updated_on
             FROM applications
             WHERE source_kind = ? AND source_id = ? AND name = ? AND active = 0",
        )
        .bind(source.kind().as_str())
        .bind(source.id())
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(application_from_row).transpose()
    }

    async fn save(&self, app: &Application) -> Result<Application> {
        sqlx::query(
            r#"
            INSERT INTO applications (name, source_kind, source_id, active, created_on, updated_on)
            VALUES (?, ?, ?, 1, ?, ?)
            ON CONFLICT(source_kind, source_id, name) DO UPDATE SET
                active = 1,
                updated_on = excluded.updated_on
            "#,
        )
        .bind(&app.name)
        .bind(app.source.kind().as_str())
        .bind(app.source.id())
        .bind(to_millis(app.created_on))
        .bind(to_millis(app.updated_on))
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT id, name, source_kind, source_id, active, created_on, updated_on
             FROM applications WHERE source_kind = ? AND source_id = ? AND name = ?",
        )
        .bind(app.source.kind().as_str())
        .bind(app.source.id())
        .bind(&app.name)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("reading back application '{}'", app.name))?;
        application_from_row(&row)
    }

    async fn update(&self, apps: &[Application]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for app in apps {
            sqlx::query("UPDATE applications SET active = ?, updated_on = ? WHERE id = ?")
                .bind(app.active)
                .bind(to_millis(app.updated_on))
                .bind(app.id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl VersionStore for SqliteStore {
    async fn find_by_application(&self, application_id: i64) -> Result<Vec<VersionRecord>> {
        let sql = format!(
            "SELECT {} FROM application_versions WHERE application_id = ? ORDER BY id",
            SUMMARY_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(application_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(summary_from_row).collect()
    }

    async fn save_batch(&self, versions: &[NewVersion]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for v in versions {
            let result = sqlx::query(
                r#"
                INSERT INTO application_versions (
                    application_id, version, chart_name, app_version, description, digest,
                    icon, home, deprecated, values_json, chart_json, raw_values, readme,
                    values_schema_json, notes, latest, created, created_on, updated_on
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?)
                ON CONFLICT(application_id, version) DO NOTHING
                "#,
            )
            .bind(v.application_id)
            .bind(&v.version)
            .bind(&v.chart_name)
            .bind(&v.app_version)
            .bind(&v.description)
            .bind(&v.digest)
            .bind(&v.icon)
            .bind(&v.home)
            .bind(v.deprecated)
            .bind(&v.values_json)
            .bind(&v.chart_json)
            .bind(&v.raw_values)
            .bind(&v.readme)
            .bind(&v.values_schema_json)
            .bind(&v.notes)
            .bind(to_millis(v.created))
            .bind(to_millis(v.fetched_on))
            .bind(to_millis(v.fetched_on))
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn find_latest(&self, application_id: i64) -> Result<Option<VersionRecord>> {
        let sql = format!(
            "SELECT {} FROM application_versions
             WHERE application_id = ? AND latest = 1 ORDER BY id LIMIT 1",
            VERSION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(application_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(version_from_row).transpose()
    }

    async fn find_most_recently_created(
        &self,
        application_id: i64,
    ) -> Result<Option<VersionRecord>> {
        let sql = format!(
            "SELECT {} FROM application_versions
             WHERE application_id = ? ORDER BY created DESC, id DESC LIMIT 1",
            VERSION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(application_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(version_from_row).transpose()
    }

    async fn find_by_application_and_version(
        &self,
        application_id: i64,
        version: &str,
    ) -> Result<Option<VersionRecord>> {
        let sql = format!(
            "SELECT {} FROM application_versions WHERE application_id = ? AND version = ?",
            VERSION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(application_id)
            .bind(version)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(version_from_row).transpose()
    }

    async fn update(&self, versions: &[VersionRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for v in versions {
            sqlx::query("UPDATE application_versions SET latest = ?, updated_on = ? WHERE id = ?")
                .bind(v.latest)
                .bind(to_millis(v.updated_on))
                .bind(v.id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
