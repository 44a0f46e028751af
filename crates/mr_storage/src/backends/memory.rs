use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mr_core::{Error, Report, ReportStorage, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::StorageBackend;

#[derive(Default)]
pub struct MemoryStore {
    reports: BTreeMap<String, Report>,
}

impl MemoryStore {
    pub fn create_report(&mut self, report: &Report) -> Result<String> {
        if self.reports.contains_key(&report.id) {
            return Err(Error::Storage(format!("Report already exists: {}", report.id)));
        }
        self.reports.insert(report.id.clone(), report.clone());
        Ok(report.id.clone())
    }

    pub fn get_report(&self, id: &str) -> Result<Report> {
        self.reports
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    pub fn list_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        self.reports
            .values()
            .filter(|report| report.is_expired(now))
            .map(|report| report.id.clone())
            .collect()
    }

    pub fn delete_report(&mut self, id: &str) {
        self.reports.remove(id);
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }
}

/// Process-local storage; reports are lost on exit.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    store: Arc<RwLock<MemoryStore>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    fn get_error_message() -> &'static str {
        "Memory storage should be available"
    }

    async fn connect(_target: Option<&str>) -> Result<Self> {
        Ok(Self::new())
    }
}

#[async_trait]
impl ReportStorage for MemoryStorage {
    async fn create_report(&self, report: &Report) -> Result<String> {
        let mut store = self.store.write().await;
        store.create_report(report)
    }

    async fn get_report(&self, id: &str) -> Result<Report> {
        let store = self.store.read().await;
        store.get_report(id)
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let store = self.store.read().await;
        Ok(store.list_expired(now))
    }

    async fn delete_report(&self, id: &str) -> Result<()> {
        let mut store = self.store.write().await;
        store.delete_report(id);
        Ok(())
    }
}
