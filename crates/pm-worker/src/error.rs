//! Error types for pm-worker

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Job queue is closed")]
    QueueClosed,

    #[error("Job {0} was dropped before it finished")]
    JobDropped(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Crawler error: {0}")]
    Crawl(#[from] pm_crawler::CrawlError),
}

/// Result type alias for pm-worker
pub type Result<T> = std::result::Result<T, WorkerError>;
