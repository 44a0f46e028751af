use async_trait::async_trait;
use mr_core::{Error, ReportStorage, Result};
use std::sync::Arc;

pub mod backends;
pub mod retention;

pub use backends::*;
pub use retention::{RetentionHandle, RetentionScheduler, SweepOutcome};

#[async_trait]
pub trait StorageBackend: ReportStorage + Sized + 'static {
    fn get_error_message() -> &'static str;

    /// Open the backend; `target` is backend specific (a file path for SQLite)
    async fn connect(target: Option<&str>) -> Result<Self>;
}

async fn open<T: StorageBackend>(target: Option<&str>) -> Result<Arc<dyn ReportStorage>> {
    let storage = T::connect(target)
        .await
        .map_err(|e| Error::Storage(format!("{} ({})", T::get_error_message(), e)))?;
    Ok(Arc::new(storage))
}

/// Open a storage backend by name: `memory`, or `sqlite` when built with it.
pub async fn create_storage(kind: &str, target: Option<&str>) -> Result<Arc<dyn ReportStorage>> {
    match kind {
        "memory" => open::<MemoryStorage>(target).await,
        #[cfg(feature = "sqlite")]
        "sqlite" => open::<SQLiteStorage>(target).await,
        other => Err(Error::Config(format!("Unsupported storage backend: {}", other))),
    }
}

pub mod prelude {
    pub use super::backends::*;
    pub use super::retention::RetentionScheduler;
    pub use super::{create_storage, StorageBackend};
}
