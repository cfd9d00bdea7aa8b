//! pm-api: HTTP API for pm-crawler
//!
//! One POST endpoint per operation under `/api/crawler`, a job submission
//! endpoint backed by the in-process worker, a health check and the static
//! artifact mount. Built with axum.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;

pub use error::{ApiError, Result};
pub use server::{AppState, router, start_server};
