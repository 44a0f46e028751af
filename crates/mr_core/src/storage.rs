use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crate::types::Report;
use crate::Result;

#[async_trait]
pub trait ReportStorage: Send + Sync {
    /// Persist a new report and return its id
    async fn create_report(&self, report: &Report) -> Result<String>;

    /// Fetch a report, `Error::NotFound` when the id is unknown
    async fn get_report(&self, id: &str) -> Result<Report>;

    /// Ids of reports whose `ttl_expires_at` is strictly before `now`
    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>>;

    /// Delete a report; deleting an unknown id is not an error
    async fn delete_report(&self, id: &str) -> Result<()>;

    /// Reclaim space after a purge
    async fn compact(&self) -> Result<()> {
        Ok(())
    }
}
