//! Operation dispatcher
//!
//! Shared by the HTTP handlers and the job worker, so both surfaces run the
//! exact same code path for a given action.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use pm_browser::SessionManager;
use pm_core::{OperationRequest, OperationResult};

use crate::executor::Operations;

/// Routes requests to [`Operations`]
#[derive(Clone)]
pub struct Dispatcher {
    operations: Arc<Operations>,
}

impl Dispatcher {
    pub fn new(operations: Arc<Operations>) -> Self {
        Self { operations }
    }

    pub fn operations(&self) -> &Operations {
        &self.operations
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        self.operations.sessions()
    }

    /// Run one request. Never fails; errors come back as a failed envelope.
    pub async fn dispatch(&self, request: OperationRequest) -> OperationResult {
        debug!("Dispatching {} for {}", request.action(), request.url());

        let ops = &self.operations;
        match request {
            OperationRequest::Crawl(params) => ops.crawl(params).await,
            OperationRequest::Extract(params) => ops.extract(params).await,
            OperationRequest::GenerateSchema(params) => ops.generate_schema(params).await,
            OperationRequest::Verify(params) => ops.verify(params).await,
            OperationRequest::Wait(params) => ops.wait(params).await,
            OperationRequest::Filter(params) => ops.filter(params).await,
            OperationRequest::CrawlLinks(params) => ops.crawl_links(params).await,
            OperationRequest::Screenshot(params) => ops.screenshot(params).await,
            OperationRequest::ExtractPdf(params) => ops.extract_pdf(params).await,
            OperationRequest::ToMarkdown(params) => ops.to_markdown(params).await,
            OperationRequest::ToPdf(params) => ops.to_pdf(params).await,
        }
    }

    /// Run a job payload `{"type": <action>, ...params}`
    pub async fn dispatch_json(&self, payload: Value) -> OperationResult {
        match OperationRequest::from_job(payload) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => {
                warn!("Rejected job payload: {}", e);
                OperationResult::failure(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pm_browser::BrowserConfig;
    use pm_browser::testing::{FakeElement, FakeLauncher, FakePage, FakeSite};
    use serde_json::json;

    use crate::artifacts::ArtifactStore;
    use crate::document::HttpFetcher;
    use crate::extractor::BrowserExtractor;

    fn dispatcher(launcher: Arc<FakeLauncher>, root: &std::path::Path) -> Dispatcher {
        let sessions = Arc::new(SessionManager::new(BrowserConfig::default(), launcher));
        let extractor = BrowserExtractor::new(Arc::clone(&sessions), None);
        let fetcher = HttpFetcher::new(std::time::Duration::from_secs(1)).unwrap();
        let operations = Operations::new(
            sessions,
            Arc::new(extractor),
            Arc::new(fetcher),
            ArtifactStore::new(root, "/public"),
        );
        Dispatcher::new(Arc::new(operations))
    }

    fn site() -> FakeSite {
        FakeSite::new().page(
            "https://example.com",
            FakePage::new().element(FakeElement::new("h1").text("Welcome")),
        )
    }

    #[tokio::test]
    async fn test_dispatch_json_extract() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(FakeLauncher::new(site()));
        let dispatcher = dispatcher(Arc::clone(&launcher), dir.path());

        let result = dispatcher
            .dispatch_json(json!({
                "type": "extract",
                "url": "https://example.com",
                "selector": "h1"
            }))
            .await;

        assert!(result.is_success());
        assert_eq!(result.data(), Some(&json!(["Welcome"])));
        assert_eq!(launcher.pages_closed(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_json_rejects_bad_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(FakeLauncher::new(site()));
        let dispatcher = dispatcher(Arc::clone(&launcher), dir.path());

        let result = dispatcher.dispatch_json(json!({"url": "https://example.com"})).await;
        assert!(!result.is_success());
        assert_eq!(result.error(), Some("No action type specified"));

        let result = dispatcher
            .dispatch_json(json!({"type": "explode", "url": "https://example.com"}))
            .await;
        assert_eq!(result.error(), Some("Unknown action type: explode"));

        let result = dispatcher
            .dispatch_json(json!({"type": "filter", "url": "https://example.com", "selector": "a"}))
            .await;
        assert_eq!(
            result.error(),
            Some("URL, selector, and condition are required for filter action")
        );

        // nothing touched the browser
        assert_eq!(launcher.launch_count(), 0);
    }

    #[tokio::test]
    async fn test_every_action_yields_an_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(FakeLauncher::new(site()));
        let dispatcher = dispatcher(Arc::clone(&launcher), dir.path());

        for action in pm_core::ActionKind::ALL {
            let result = dispatcher
                .dispatch_json(json!({"type": action.as_str(), "url": "not a url"}))
                .await;
            assert!(!result.is_success(), "{} accepted an invalid url", action);
            assert!(!result.error().unwrap_or_default().is_empty());
        }
    }
}
