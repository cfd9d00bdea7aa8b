//! Error types for pm-browser

use thiserror::Error;

/// pm-browser error type
#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("Browser initialization failed: {0}")]
    Initialization(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("No page available: {0}")]
    PoolExhausted(String),

    #[error("Screenshot failed: {0}")]
    Screenshot(String),

    #[error("Element detached: {0}")]
    Detached(String),

    #[error("Browser driver error: {0}")]
    Driver(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, BrowserError>;
