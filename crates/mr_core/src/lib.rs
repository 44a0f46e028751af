pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod storage;
pub mod types;

pub use config::Settings;
pub use error::{Error, ExtractionError, FetchError, Result, SelectorError};
pub use models::CompletionModel;
pub use storage::ReportStorage;
pub use types::*;
