use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS applications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            source_kind TEXT NOT NULL,
            source_id TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_on INTEGER NOT NULL,
            updated_on INTEGER NOT NULL,
            UNIQUE(source_kind, source_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS application_versions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            application_id INTEGER NOT NULL,
            version TEXT NOT NULL,
            chart_name TEXT NOT NULL,
            app_version TEXT,
            description TEXT,
            digest TEXT NOT NULL DEFAULT '',
            icon TEXT,
            home TEXT,
            deprecated INTEGER NOT NULL DEFAULT 0,
            values_json TEXT NOT NULL DEFAULT '{}',
            chart_json TEXT NOT NULL DEFAULT '{}',
            raw_values TEXT NOT NULL DEFAULT '',
            readme TEXT NOT NULL DEFAULT '',
            values_schema_json TEXT NOT NULL DEFAULT '',
            notes TEXT NOT NULL DEFAULT '',
            latest INTEGER NOT NULL DEFAULT 0,
            created INTEGER NOT NULL,
            created_on INTEGER NOT NULL,
            updated_on INTEGER NOT NULL,
            UNIQUE(application_id, version),
            FOREIGN KEY (application_id) REFERENCES applications(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_applications_source ON applications(source_kind, source_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_versions_latest ON application_versions(application_id, latest)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_versions_created ON application_versions(application_id, created DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
