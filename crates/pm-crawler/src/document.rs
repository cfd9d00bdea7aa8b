//! Document download and PDF text decoding for extractPdf

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info};

use crate::error::{CrawlError, Result};

/// Raw response of a document download
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    /// Value of the `Content-Type` header, empty when absent
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl FetchedDocument {
    pub fn is_pdf(&self) -> bool {
        self.content_type
            .to_ascii_lowercase()
            .contains("application/pdf")
    }
}

/// Downloads documents over HTTP
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    /// GET `url`. Non-2xx responses are errors.
    async fn fetch(&self, url: &str) -> Result<FetchedDocument>;
}

/// [`DocumentFetcher`] backed by reqwest
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CrawlError::Fetch(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument> {
        debug!("Downloading {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CrawlError::Fetch(e.to_string()))?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CrawlError::Fetch(e.to_string()))?
            .to_vec();

        info!("Downloaded {} bytes ({}) from {}", bytes.len(), content_type, url);

        Ok(FetchedDocument {
            content_type,
            bytes,
        })
    }
}

/// Turns PDF bytes into per-page text
#[async_trait]
pub trait PdfDecoder: Send + Sync {
    async fn decode(&self, bytes: Vec<u8>) -> Result<Vec<String>>;
}

/// [`PdfDecoder`] backed by pdf-extract
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfTextDecoder;

#[async_trait]
impl PdfDecoder for PdfTextDecoder {
    async fn decode(&self, bytes: Vec<u8>) -> Result<Vec<String>> {
        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .map_err(|e| CrawlError::Extraction(format!("PDF decoder task failed: {}", e)))?
            .map_err(|e| CrawlError::Extraction(format!("Error processing PDF: {}", e)))?;

        Ok(split_pages(&text))
    }
}

/// pdf-extract separates pages with form feeds
fn split_pages(text: &str) -> Vec<String> {
    let pages: Vec<String> = text.split('\x0c').map(str::to_string).collect();
    match pages.last() {
        Some(last) if pages.len() > 1 && last.trim().is_empty() => {
            pages[..pages.len() - 1].to_vec()
        }
        _ => pages,
    }
}

/// Page texts joined by newlines, trimmed
pub fn join_pages(pages: &[String]) -> String {
    let mut text = String::new();
    for page in pages {
        text.push_str(page);
        text.push('\n');
    }
    text.trim().to_string()
}
