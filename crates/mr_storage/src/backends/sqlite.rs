use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mr_core::{Error, Report, ReportStorage, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use sqlx::Row;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::StorageBackend;

pub const DEFAULT_DB_PATH: &str = "data/mandelareport.sqlite3";

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS reports (
        id TEXT PRIMARY KEY,
        url TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        ttl_expires_at INTEGER NOT NULL,
        body TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_reports_ttl ON reports(ttl_expires_at)",
    // Add future migrations here
];

fn unix_nanos(at: DateTime<Utc>) -> Result<i64> {
    at.timestamp_nanos_opt()
        .ok_or_else(|| Error::Storage(format!("Timestamp out of range: {}", at.to_rfc3339())))
}

fn storage_err(context: &str) -> impl FnOnce(sqlx::Error) -> Error + '_ {
    move |e| Error::Storage(format!("{}: {}", context, e))
}

/// Reports stored as JSON documents; timestamps kept as unix nanoseconds
/// so expiry comparisons are numeric and as precise as `DateTime<Utc>`.
pub struct SQLiteStorage {
    pool: Arc<SqlitePool>,
    db_path: PathBuf,
}

#[async_trait]
impl StorageBackend for SQLiteStorage {
    fn get_error_message() -> &'static str {
        "SQLite database should be writable at ./data/mandelareport.sqlite3"
    }

    async fn connect(target: Option<&str>) -> Result<Self> {
        let db_path = PathBuf::from(target.unwrap_or(DEFAULT_DB_PATH));
        Self::new_with_path(&db_path).await
    }
}

impl SQLiteStorage {
    pub async fn new_with_path(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(storage_err("Failed to connect to database"))?;

        for (i, migration) in MIGRATIONS.iter().enumerate() {
            sqlx::query(migration)
                .execute(&pool)
                .await
                .map_err(|e| Error::Storage(format!("Failed to run migration {}: {}", i, e)))?;
        }

        Ok(Self {
            pool: Arc::new(pool),
            db_path: db_path.to_path_buf(),
        })
    }

    pub fn get_db_path(&self) -> &Path {
        &self.db_path
    }
}

#[async_trait]
impl ReportStorage for SQLiteStorage {
    async fn create_report(&self, report: &Report) -> Result<String> {
        let body = serde_json::to_string(report)?;

        sqlx::query(
            r#"
            INSERT INTO reports (id, url, created_at, ttl_expires_at, body)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&report.id)
        .bind(&report.url)
        .bind(unix_nanos(report.created_at)?)
        .bind(unix_nanos(report.ttl_expires_at)?)
        .bind(body)
        .execute(&*self.pool)
        .await
        .map_err(storage_err("Failed to store report"))?;

        Ok(report.id.clone())
    }

    async fn get_report(&self, id: &str) -> Result<Report> {
        let row = sqlx::query("SELECT body FROM reports WHERE id = ?")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(storage_err("Failed to load report"))?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let body: String = row
            .try_get("body")
            .map_err(storage_err("Failed to read report body"))?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT id FROM reports WHERE ttl_expires_at < ? ORDER BY ttl_expires_at")
            .bind(unix_nanos(now)?)
            .fetch_all(&*self.pool)
            .await
            .map_err(storage_err("Failed to list expired reports"))?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("id")
                    .map_err(storage_err("Failed to read report id"))
            })
            .collect()
    }

    async fn delete_report(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM reports WHERE id = ?")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(storage_err("Failed to delete report"))?;
        Ok(())
    }

    async fn compact(&self) -> Result<()> {
        sqlx::query("VACUUM")
            .execute(&*self.pool)
            .await
            .map_err(storage_err("Failed to vacuum database"))?;
        Ok(())
    }
}
