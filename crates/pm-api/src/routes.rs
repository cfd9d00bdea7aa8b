//! Route definitions

use axum::{
    Router,
    routing::{get, post},
};

use crate::handlers::{
    crawl, crawl_links, extract, extract_pdf, filter, generate_schema, health, screenshot,
    submit_job, to_markdown, to_pdf, verify, wait,
};
use crate::server::AppState;

/// Routes that need the API key when one is configured
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/api/crawler/crawl", post(crawl))
        .route("/api/crawler/extract", post(extract))
        .route("/api/crawler/generate-schema", post(generate_schema))
        .route("/api/crawler/verify", post(verify))
        .route("/api/crawler/crawl-links", post(crawl_links))
        .route("/api/crawler/wait", post(wait))
        .route("/api/crawler/filter", post(filter))
        .route("/api/crawler/screenshot", post(screenshot))
        .route("/api/crawler/extract-pdf", post(extract_pdf))
        .route("/api/crawler/to-markdown", post(to_markdown))
        .route("/api/crawler/to-pdf", post(to_pdf))
        .route("/api/jobs", post(submit_job))
}

/// Public routes
pub fn public_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
