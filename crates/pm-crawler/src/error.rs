//! Error types for pm-crawler

use pm_browser::BrowserError;
use thiserror::Error;

/// Everything an operation can fail with
#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Browser could not be started: {0}")]
    ResourceInit(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("{0}")]
    Validation(String),

    #[error("Timeout: {0}")]
    WaitTimeout(String),

    #[error("{0}")]
    Extraction(String),

    #[error("Browser driver error: {0}")]
    Driver(String),

    #[error("Service busy: {0}")]
    Busy(String),

    #[error("Download failed: {0}")]
    Fetch(String),

    #[error("Failed to store artifact: {0}")]
    Artifact(String),
}

impl From<BrowserError> for CrawlError {
    fn from(err: BrowserError) -> Self {
        match err {
            BrowserError::Initialization(msg) => CrawlError::ResourceInit(msg),
            BrowserError::Navigation(msg) => CrawlError::Navigation(msg),
            BrowserError::Timeout(msg) => CrawlError::WaitTimeout(msg),
            BrowserError::PoolExhausted(msg) => CrawlError::Busy(msg),
            other => CrawlError::Driver(other.to_string()),
        }
    }
}

impl From<pm_core::Error> for CrawlError {
    fn from(err: pm_core::Error) -> Self {
        match err {
            pm_core::Error::Validation(msg) => CrawlError::Validation(msg),
            pm_core::Error::Io(e) => CrawlError::Artifact(e.to_string()),
            other => CrawlError::Extraction(other.to_string()),
        }
    }
}

/// Result type alias for pm-crawler
pub type Result<T> = std::result::Result<T, CrawlError>;
