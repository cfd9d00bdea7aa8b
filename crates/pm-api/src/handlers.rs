//! HTTP API handlers
//!
//! Each operation handler forwards its body to the dispatcher. A failed
//! envelope becomes a 500 with the envelope's error as `detail`.

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use pm_core::{
    CrawlLinksParams, CrawlParams, ExtractParams, ExtractPdfParams, FilterParams,
    GenerateSchemaParams, MarkdownParams, OperationRequest, OperationResult, PdfParams,
    ScreenshotParams, VerifyParams, WaitParams,
};

use crate::error::{ApiError, Result};
use crate::server::AppState;

pub const SERVICE_NAME: &str = "pm-crawler";

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub browser: &'static str,
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let browser = state.dispatcher.sessions().status().await;
    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
        browser: browser.as_str(),
    })
}

async fn run(state: &AppState, request: OperationRequest) -> Result<Json<OperationResult>> {
    debug!("HTTP {} request for {}", request.action(), request.url());
    let result = state.dispatcher.dispatch(request).await;
    if result.is_success() {
        Ok(Json(result))
    } else {
        let message = result.error().unwrap_or("Operation failed").to_string();
        Err(ApiError::OperationFailed(message))
    }
}

pub async fn crawl(
    State(state): State<AppState>,
    Json(params): Json<CrawlParams>,
) -> Result<Json<OperationResult>> {
    run(&state, OperationRequest::Crawl(params)).await
}

pub async fn extract(
    State(state): State<AppState>,
    Json(params): Json<ExtractParams>,
) -> Result<Json<OperationResult>> {
    run(&state, OperationRequest::Extract(params)).await
}

pub async fn generate_schema(
    State(state): State<AppState>,
    Json(params): Json<GenerateSchemaParams>,
) -> Result<Json<OperationResult>> {
    run(&state, OperationRequest::GenerateSchema(params)).await
}

pub async fn verify(
    State(state): State<AppState>,
    Json(params): Json<VerifyParams>,
) -> Result<Json<OperationResult>> {
    run(&state, OperationRequest::Verify(params)).await
}

pub async fn wait(
    State(state): State<AppState>,
    Json(params): Json<WaitParams>,
) -> Result<Json<OperationResult>> {
    run(&state, OperationRequest::Wait(params)).await
}

pub async fn filter(
    State(state): State<AppState>,
    Json(params): Json<FilterParams>,
) -> Result<Json<OperationResult>> {
    run(&state, OperationRequest::Filter(params)).await
}

pub async fn crawl_links(
    State(state): State<AppState>,
    Json(params): Json<CrawlLinksParams>,
) -> Result<Json<OperationResult>> {
    run(&state, OperationRequest::CrawlLinks(params)).await
}

pub async fn screenshot(
    State(state): State<AppState>,
    Json(params): Json<ScreenshotParams>,
) -> Result<Json<OperationResult>> {
    run(&state, OperationRequest::Screenshot(params)).await
}

pub async fn extract_pdf(
    State(state): State<AppState>,
    Json(params): Json<ExtractPdfParams>,
) -> Result<Json<OperationResult>> {
    run(&state, OperationRequest::ExtractPdf(params)).await
}

pub async fn to_markdown(
    State(state): State<AppState>,
    Json(params): Json<MarkdownParams>,
) -> Result<Json<OperationResult>> {
    run(&state, OperationRequest::ToMarkdown(params)).await
}

pub async fn to_pdf(
    State(state): State<AppState>,
    Json(params): Json<PdfParams>,
) -> Result<Json<OperationResult>> {
    run(&state, OperationRequest::ToPdf(params)).await
}

/// Response header carrying the job id on `/api/jobs`
pub const JOB_ID_HEADER: &str = "x-job-id";

/// Submit a job to the worker queue and wait for its envelope.
///
/// The envelope is returned as is with a 200, failed ones included.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<(HeaderMap, Json<OperationResult>)> {
    let queue = state.jobs.as_ref().ok_or(ApiError::QueueUnavailable)?;
    let outcome = queue.submit(payload).await?;
    info!(job = %outcome.id, success = outcome.result.is_success(), "Job completed");

    let mut headers = HeaderMap::new();
    if let Ok(id) = HeaderValue::from_str(&outcome.id) {
        headers.insert(JOB_ID_HEADER, id);
    }
    Ok((headers, Json(outcome.result)))
}
