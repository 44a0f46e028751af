use thiserror::Error;

/// Failures while retrieving a live page or an archived capture.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Request timed out after {secs}s: {url}")]
    Timeout { url: String, secs: u64 },

    #[error("Connection error for {url}: {message}")]
    Connection { url: String, message: String },

    #[error("Response larger than {limit} bytes: {url}")]
    TooLarge { url: String, limit: usize },

    #[error("Non-HTML content ({content_type}): {url}")]
    NonHtml { url: String, content_type: String },

    #[error("HTTP {status} for: {url}")]
    Status { url: String, status: u16 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("Input cannot be parsed as HTML: {0}")]
    MalformedMarkup(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("Archive index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Archive index returned an unreadable payload: {0}")]
    MalformedIndex(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Selector error: {0}")]
    Selector(#[from] SelectorError),

    #[error("Live page skipped: {0}")]
    Skipped(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Report not found: {0}")]
    NotFound(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("External error: {0}")]
    External(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
