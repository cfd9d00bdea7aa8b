//! Operation executor
//!
//! Every public method returns an [`OperationResult`]. Failures below this
//! layer are logged and turned into `{success: false, error}` here, so callers
//! never see a `CrawlError`.
//!
//! Only `wait` has a caller-supplied timeout. Every other operation is bounded
//! by the browser's navigation timeout and the page acquire timeout.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use pm_browser::{Locator, SessionManager};
use pm_core::{
    ActionKind, Config, CrawlLinksParams, CrawlParams, ExtractParams, ExtractPdfParams,
    ExtractionSchema, FilterParams, GenerateSchemaParams, LanguageModel, LlmClient,
    MarkdownParams, OperationResult, PdfParams, ScreenshotParams, StrategyKind, VerifyParams,
    WaitParams,
};

use crate::artifacts::{ArtifactKind, ArtifactStore, screenshot_file_name, unique_file_name};
use crate::condition::FilterCondition;
use crate::document::{DocumentFetcher, HttpFetcher, PdfDecoder, PdfTextDecoder, join_pages};
use crate::error::{CrawlError, Result};
use crate::extractor::{
    BrowserExtractor, ContentExtractor, ExtractionStrategy, parse_json_answer, read_element,
};
use crate::links::LinkSet;
use crate::page::with_page;

const SCHEMA_INSTRUCTION: &str =
    "Analyze this webpage and generate a JSON schema for extracting data.";

/// Runs operations against the shared browser
pub struct Operations {
    sessions: Arc<SessionManager>,
    extractor: Arc<dyn ContentExtractor>,
    fetcher: Arc<dyn DocumentFetcher>,
    decoder: Arc<dyn PdfDecoder>,
    artifacts: ArtifactStore,
    link_concurrency: usize,
}

impl Operations {
    pub fn new(
        sessions: Arc<SessionManager>,
        extractor: Arc<dyn ContentExtractor>,
        fetcher: Arc<dyn DocumentFetcher>,
        artifacts: ArtifactStore,
    ) -> Self {
        Self {
            sessions,
            extractor,
            fetcher,
            decoder: Arc::new(PdfTextDecoder),
            artifacts,
            link_concurrency: 1,
        }
    }

    /// Wire the production collaborators from configuration
    pub fn from_config(config: &Config, sessions: Arc<SessionManager>) -> Result<Self> {
        let llm: Option<Arc<dyn LanguageModel>> = if config.llm.api_key.is_empty() {
            info!("LLM_API_KEY not set; LLM extraction and schema generation are disabled");
            None
        } else {
            let client = LlmClient::new(&config.llm)?;
            Some(Arc::new(client))
        };

        let extractor = BrowserExtractor::new(Arc::clone(&sessions), llm)
            .with_max_page_chars(config.crawl.max_llm_page_chars);
        let fetcher = HttpFetcher::new(Duration::from_secs(config.crawl.fetch_timeout_secs))?;

        Ok(Self::new(
            sessions,
            Arc::new(extractor),
            Arc::new(fetcher),
            ArtifactStore::from_config(&config.artifacts),
        )
        .with_link_concurrency(config.crawl.link_concurrency))
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn PdfDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Links crawled at once by crawl-links, in batches; results keep link order
    pub fn with_link_concurrency(mut self, concurrency: usize) -> Self {
        self.link_concurrency = concurrency.max(1);
        self
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Structured extraction with a schema or the LLM
    pub async fn crawl(&self, params: CrawlParams) -> OperationResult {
        self.try_crawl(params)
            .await
            .unwrap_or_else(|e| failed(ActionKind::Crawl, e))
    }

    /// Text, HTML or an attribute of every matched element
    pub async fn extract(&self, params: ExtractParams) -> OperationResult {
        self.try_extract(params)
            .await
            .unwrap_or_else(|e| failed(ActionKind::Extract, e))
    }

    pub async fn generate_schema(&self, params: GenerateSchemaParams) -> OperationResult {
        self.try_generate_schema(params)
            .await
            .unwrap_or_else(|e| failed(ActionKind::GenerateSchema, e))
    }

    /// Whether the selector matches and, optionally, whether any match
    /// contains the expected text
    pub async fn verify(&self, params: VerifyParams) -> OperationResult {
        self.try_verify(params)
            .await
            .unwrap_or_else(|e| failed(ActionKind::Verify, e))
    }

    pub async fn wait(&self, params: WaitParams) -> OperationResult {
        self.try_wait(params)
            .await
            .unwrap_or_else(|e| failed(ActionKind::Wait, e))
    }

    pub async fn filter(&self, params: FilterParams) -> OperationResult {
        self.try_filter(params)
            .await
            .unwrap_or_else(|e| failed(ActionKind::Filter, e))
    }

    /// Crawl the links found on a page.
    ///
    /// `max_depth` limits how many links are followed. A failing link shows up
    /// as a failed entry and does not stop the others.
    pub async fn crawl_links(&self, params: CrawlLinksParams) -> OperationResult {
        self.try_crawl_links(params)
            .await
            .unwrap_or_else(|e| failed(ActionKind::CrawlLinks, e))
    }

    pub async fn screenshot(&self, params: ScreenshotParams) -> OperationResult {
        self.try_screenshot(params)
            .await
            .unwrap_or_else(|e| failed(ActionKind::Screenshot, e))
    }

    /// Download a PDF and return its text
    pub async fn extract_pdf(&self, params: ExtractPdfParams) -> OperationResult {
        self.try_extract_pdf(params)
            .await
            .unwrap_or_else(|e| failed(ActionKind::ExtractPdf, e))
    }

    pub async fn to_markdown(&self, params: MarkdownParams) -> OperationResult {
        self.try_to_markdown(params)
            .await
            .unwrap_or_else(|e| failed(ActionKind::ToMarkdown, e))
    }

    pub async fn to_pdf(&self, params: PdfParams) -> OperationResult {
        self.try_to_pdf(params)
            .await
            .unwrap_or_else(|e| failed(ActionKind::ToPdf, e))
    }

    // ------------------------------------------------------------------
    // Implementations
    // ------------------------------------------------------------------

    async fn try_crawl(&self, params: CrawlParams) -> Result<OperationResult> {
        params.validate()?;
        info!("Crawling {} ({:?})", params.url, params.strategy);

        let strategy = ExtractionStrategy::from_request(&params);
        let extracted = self.extractor.extract(&params.url, &strategy).await?;

        let data = match extracted.content {
            Value::String(text) => parse_json_answer(&text).unwrap_or(Value::String(text)),
            other => other,
        };

        Ok(OperationResult::success()
            .with_data(data)
            .with_field("url", extracted.url))
    }

    async fn try_extract(&self, params: ExtractParams) -> Result<OperationResult> {
        params.validate()?;
        let locator = Locator::parse(&params.selector);
        let kind = params.kind;
        let attribute = params.attribute.as_deref();

        let values = with_page(&self.sessions, &params.url, |page| async move {
            let elements = page.query_all(&locator).await?;
            let mut values = Vec::with_capacity(elements.len());
            for element in &elements {
                values.push(read_element(element.as_ref(), kind, attribute).await?);
            }
            Ok::<_, CrawlError>(values)
        })
        .await?;

        debug!("extract '{}' on {}: {} values", params.selector, params.url, values.len());
        Ok(OperationResult::success().with_data(Value::Array(values)))
    }

    async fn try_generate_schema(&self, params: GenerateSchemaParams) -> Result<OperationResult> {
        params.validate()?;
        info!("Generating schema for {}", params.url);

        let strategy = ExtractionStrategy::Llm {
            instruction: format!("{} {}", SCHEMA_INSTRUCTION, params.prompt.trim()),
            model: params.model.clone(),
        };
        let extracted = self.extractor.extract(&params.url, &strategy).await?;

        let result = match extracted.content {
            Value::String(text) => match parse_json_answer(&text) {
                Some(schema) => OperationResult::success().with_field("schema", schema),
                None => OperationResult::success()
                    .with_field("text_result", text)
                    .with_field("warning", "Unable to parse result as JSON schema"),
            },
            schema => OperationResult::success().with_field("schema", schema),
        };
        Ok(result)
    }

    async fn try_verify(&self, params: VerifyParams) -> Result<OperationResult> {
        params.validate()?;
        let locator = Locator::parse(&params.selector);
        let expected = params
            .expected
            .as_deref()
            .filter(|e| !e.is_empty())
            .map(str::to_string);

        let (exists, content_matches) = with_page(&self.sessions, &params.url, |page| async move {
            let elements = page.query_all(&locator).await?;
            let exists = !elements.is_empty();

            let content_matches = match expected {
                Some(expected) => {
                    let mut found = false;
                    for element in &elements {
                        let text = element.text_content().await?.unwrap_or_default();
                        if text.contains(&expected) {
                            found = true;
                            break;
                        }
                    }
                    Value::Bool(found)
                }
                None => Value::Null,
            };
            Ok::<_, CrawlError>((exists, content_matches))
        })
        .await?;

        Ok(OperationResult::success()
            .with_field("exists", exists)
            .with_field("content_matches", content_matches))
    }

    async fn try_wait(&self, params: WaitParams) -> Result<OperationResult> {
        params.validate()?;
        let locator = Locator::parse(&params.selector);
        let timeout = Duration::from_millis(params.timeout);
        let selector = params.selector.as_str();

        with_page(&self.sessions, &params.url, |page| async move {
            let visible = tokio::time::timeout(timeout, page.wait_for_visible(&locator, timeout)).await;
            match visible {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => debug!("Visibility wait for '{}' failed, checking presence: {}", selector, e),
                Err(_) => debug!("Visibility wait for '{}' timed out, checking presence", selector),
            }

            if page.query_all(&locator).await?.is_empty() {
                return Err(CrawlError::WaitTimeout(format!(
                    "No elements found for selector '{}' within {}ms",
                    selector,
                    timeout.as_millis()
                )));
            }
            Ok::<_, CrawlError>(())
        })
        .await?;

        Ok(OperationResult::success().with_field(
            "message",
            format!("Element {} appeared within timeout", params.selector),
        ))
    }

    async fn try_filter(&self, params: FilterParams) -> Result<OperationResult> {
        params.validate()?;
        let locator = Locator::parse(&params.selector);
        let condition = FilterCondition::parse(&params.condition);
        debug!("filter condition parsed as {:?}", condition);
        let condition = &condition;

        let kept = with_page(&self.sessions, &params.url, |page| async move {
            let elements = page.query_all(&locator).await?;
            let mut kept = Vec::new();

            for element in &elements {
                let entry = match condition.attribute() {
                    Some(attribute) => {
                        let value = match element.attribute(attribute).await {
                            Ok(Some(value)) if condition.holds(&value) => value,
                            Ok(_) => continue,
                            Err(e) => {
                                debug!("Skipping element without readable {}: {}", attribute, e);
                                continue;
                            }
                        };
                        let text = element.text_content().await.ok().flatten();
                        let mut entry = Map::new();
                        entry.insert("text".to_string(), text.map_or(Value::Null, Value::String));
                        entry.insert(attribute.to_string(), Value::String(value));
                        entry
                    }
                    None => {
                        let text = match element.text_content().await {
                            Ok(Some(text)) if condition.holds(&text) => text,
                            Ok(_) => continue,
                            Err(e) => {
                                debug!("Skipping element without readable text: {}", e);
                                continue;
                            }
                        };
                        let mut entry = Map::new();
                        entry.insert("text".to_string(), Value::String(text));
                        entry
                    }
                };
                kept.push(Value::Object(entry));
            }
            Ok::<_, CrawlError>(kept)
        })
        .await?;

        Ok(OperationResult::success().with_data(Value::Array(kept)))
    }

    async fn try_crawl_links(&self, params: CrawlLinksParams) -> Result<OperationResult> {
        params.validate()?;
        let locator = Locator::parse(&params.link_selector);

        let hrefs = with_page(&self.sessions, &params.url, |page| async move {
            let elements = page.query_all(&locator).await?;
            let mut hrefs = Vec::with_capacity(elements.len());
            for element in &elements {
                hrefs.push(element.attribute("href").await?);
            }
            Ok::<_, CrawlError>(hrefs)
        })
        .await?;

        let links = LinkSet::resolve(&params.url, hrefs, params.max_depth);
        info!(
            "Following {} links from {} (concurrency {})",
            links.len(),
            params.url,
            self.link_concurrency
        );

        let schema = params.schema.as_ref();
        let links = links.into_vec();
        let mut results = Vec::with_capacity(links.len());
        for batch in links.chunks(self.link_concurrency) {
            let crawls = batch.iter().map(|link| self.crawl_link(link, schema));
            results.extend(join_all(crawls).await);
        }

        Ok(OperationResult::success().with_data(Value::Array(results)))
    }

    async fn crawl_link(&self, link: &str, schema: Option<&ExtractionSchema>) -> Value {
        let request = CrawlParams {
            url: link.to_string(),
            schema: schema.cloned(),
            strategy: StrategyKind::JsonCss,
            base_selector: None,
            instruction: None,
            model: None,
        };
        self.crawl(request).await.with_field("url", link).into_value()
    }

    async fn try_screenshot(&self, params: ScreenshotParams) -> Result<OperationResult> {
        params.validate()?;
        let selector = params
            .selector
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let full_page = params.full_page;

        let png = with_page(&self.sessions, &params.url, |page| async move {
            match selector {
                Some(selector) => {
                    let elements = page.query_all(&Locator::parse(selector)).await?;
                    let element = elements.first().ok_or_else(|| {
                        CrawlError::Extraction(format!("No element matches selector '{}'", selector))
                    })?;
                    Ok::<_, CrawlError>(element.screenshot().await?)
                }
                None => Ok(page.screenshot(full_page).await?),
            }
        })
        .await?;

        let name = screenshot_file_name(&params.url, selector, full_page);
        let stored = self
            .artifacts
            .write(ArtifactKind::Screenshot, &name, &png)
            .await?;

        Ok(OperationResult::success()
            .with_field("path", stored.path.display().to_string())
            .with_field("url", stored.url))
    }

    async fn try_extract_pdf(&self, params: ExtractPdfParams) -> Result<OperationResult> {
        params.validate()?;
        info!("Extracting text from PDF URL: {}", params.url);

        let document = self.fetcher.fetch(&params.url).await?;
        if !document.is_pdf() {
            return Err(CrawlError::Validation(format!(
                "URL does not point to a PDF. Content-Type: {}",
                document.content_type
            )));
        }

        let pages = self.decoder.decode(document.bytes).await?;
        let text = join_pages(&pages);
        info!(
            "Extracted {} characters from {} PDF pages: {}",
            text.len(),
            pages.len(),
            params.url
        );

        Ok(OperationResult::success()
            .with_field("text", text)
            .with_field("pages", pages.len()))
    }

    async fn try_to_markdown(&self, params: MarkdownParams) -> Result<OperationResult> {
        params.validate()?;
        let rendered = self.extractor.markdown(&params.url, &params.options).await?;
        if rendered.markdown.trim().is_empty() {
            return Err(CrawlError::Extraction(
                "Markdown generation resulted in empty content".to_string(),
            ));
        }

        let stored = self
            .artifacts
            .write(
                ArtifactKind::Markdown,
                &unique_file_name("md"),
                rendered.markdown.as_bytes(),
            )
            .await?;
        info!("Saved Markdown for {} to {}", params.url, stored.path.display());

        Ok(OperationResult::success()
            .with_field("url", rendered.url)
            .with_field("markdown", rendered.markdown)
            .with_field("path", stored.path.display().to_string())
            .with_field("file_url", stored.url))
    }

    async fn try_to_pdf(&self, params: PdfParams) -> Result<OperationResult> {
        params.validate()?;
        let pdf = self.extractor.pdf(&params.url).await?;
        if pdf.is_empty() {
            return Err(CrawlError::Extraction(
                "PDF data not found in crawl result".to_string(),
            ));
        }

        let stored = self
            .artifacts
            .write(ArtifactKind::Pdf, &unique_file_name("pdf"), &pdf)
            .await?;
        info!("Saved PDF for {} to {}", params.url, stored.path.display());

        Ok(OperationResult::success()
            .with_field("path", stored.path.display().to_string())
            .with_field("url", stored.url))
    }
}

fn failed(action: ActionKind, err: CrawlError) -> OperationResult {
    error!("Error in {} operation: {}", action, err);
    OperationResult::failure(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use pm_browser::BrowserConfig;
    use pm_browser::testing::{
        FAKE_ELEMENT_PNG, FAKE_FULL_PAGE_PNG, FakeElement, FakeLauncher, FakePage, FakeSite,
    };
    use pm_core::CompletionRequest;
    use serde::de::DeserializeOwned;
    use serde_json::json;
    use tempfile::TempDir;

    use crate::document::FetchedDocument;

    const BLOG: &str = "https://example.com/blog";

    struct StaticFetcher {
        content_type: &'static str,
        bytes: &'static [u8],
    }

    #[async_trait]
    impl DocumentFetcher for StaticFetcher {
        async fn fetch(&self, _url: &str) -> Result<FetchedDocument> {
            Ok(FetchedDocument {
                content_type: self.content_type.to_string(),
                bytes: self.bytes.to_vec(),
            })
        }
    }

    #[derive(Default)]
    struct CountingDecoder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PdfDecoder for CountingDecoder {
        async fn decode(&self, _bytes: Vec<u8>) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec!["Page one ".to_string(), "Page two\n".to_string()])
        }
    }

    struct ScriptedModel {
        answer: &'static str,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(&self, request: CompletionRequest) -> pm_core::Result<String> {
            self.prompts.lock().unwrap().push(request.prompt);
            Ok(self.answer.to_string())
        }
    }

    struct Harness {
        ops: Operations,
        launcher: Arc<FakeLauncher>,
        dir: TempDir,
    }

    fn harness_with(
        site: FakeSite,
        llm: Option<Arc<dyn LanguageModel>>,
        fetcher: StaticFetcher,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(FakeLauncher::new(site));
        let config = BrowserConfig::builder().acquire_timeout(5).build();
        let sessions = Arc::new(SessionManager::new(config, launcher.clone()));
        let extractor = BrowserExtractor::new(Arc::clone(&sessions), llm);
        let ops = Operations::new(
            sessions,
            Arc::new(extractor),
            Arc::new(fetcher),
            ArtifactStore::new(dir.path(), "/public"),
        );
        Harness { ops, launcher, dir }
    }

    fn harness(site: FakeSite) -> Harness {
        let fetcher = StaticFetcher {
            content_type: "text/html",
            bytes: b"<html></html>",
        };
        harness_with(site, None, fetcher)
    }

    fn params<T: DeserializeOwned>(value: Value) -> T {
        serde_json::from_value(value).unwrap()
    }

    fn link(href: &str, text: &str) -> FakeElement {
        FakeElement::new("a").text(text).attr("href", href)
    }

    fn blog_site() -> FakeSite {
        FakeSite::new().page(
            BLOG,
            FakePage::new()
                .element(link("/blog/a", "First post"))
                .element(link("/other", "Other"))
                .element(FakeElement::new("a").text("No href"))
                .element(link("/blog/b", "Second post"))
                .element(FakeElement::new("h1").text("Blog"))
                .element(FakeElement::new("#banner").text("Banner").hidden())
                .html("<h1>Blog</h1><p>Hello <b>world</b></p>")
                .pdf(b"%PDF-1.4 fake".to_vec()),
        )
    }

    fn assert_envelope(result: &OperationResult) {
        if result.is_success() {
            assert!(result.error().is_none());
        } else {
            assert!(!result.error().unwrap_or_default().is_empty());
        }
    }

    #[tokio::test]
    async fn test_extract_keeps_order_and_nulls() {
        let h = harness(blog_site());
        let result = h
            .ops
            .extract(params(json!({
                "url": BLOG,
                "selector": "a",
                "type": "attribute",
                "attribute": "href"
            })))
            .await;

        assert_envelope(&result);
        assert_eq!(
            result.data(),
            Some(&json!(["/blog/a", "/other", null, "/blog/b"]))
        );
        assert_eq!(h.launcher.pages_closed(), h.launcher.pages_opened());
    }

    #[tokio::test]
    async fn test_extract_text_is_not_trimmed() {
        let site = FakeSite::new().page(
            BLOG,
            FakePage::new().element(FakeElement::new("p").text("  Hello\n  world  ")),
        );
        let h = harness(site);
        let result = h
            .ops
            .extract(params(json!({"url": BLOG, "selector": "p", "type": "text"})))
            .await;

        assert_envelope(&result);
        assert_eq!(result.data(), Some(&json!(["  Hello\n  world  "])));
    }

    #[tokio::test]
    async fn test_extract_no_match_is_empty_success() {
        let h = harness(blog_site());
        let result = h
            .ops
            .extract(params(json!({"url": BLOG, "selector": ".missing"})))
            .await;

        assert!(result.is_success());
        assert_eq!(result.data(), Some(&json!([])));
    }

    #[tokio::test]
    async fn test_filter_href_condition() {
        let h = harness(blog_site());
        let result = h
            .ops
            .filter(params(json!({
                "url": BLOG,
                "selector": "a",
                "condition": "href.includes(\"/blog/\")"
            })))
            .await;

        assert_eq!(
            result.data(),
            Some(&json!([
                {"text": "First post", "href": "/blog/a"},
                {"text": "Second post", "href": "/blog/b"}
            ]))
        );
    }

    #[tokio::test]
    async fn test_filter_unrecognised_condition_matches_text() {
        let h = harness(blog_site());
        let result = h
            .ops
            .filter(params(json!({"url": BLOG, "selector": "a", "condition": "post"})))
            .await;

        assert_eq!(
            result.data(),
            Some(&json!([{"text": "First post"}, {"text": "Second post"}]))
        );
    }

    #[tokio::test]
    async fn test_verify() {
        let h = harness(blog_site());

        let result = h
            .ops
            .verify(params(json!({"url": BLOG, "selector": "h1"})))
            .await;
        assert_eq!(result.field("exists"), Some(&json!(true)));
        assert_eq!(result.field("content_matches"), Some(&Value::Null));

        let result = h
            .ops
            .verify(params(json!({"url": BLOG, "selector": "a", "expected": "Second"})))
            .await;
        assert_eq!(result.field("content_matches"), Some(&json!(true)));

        let result = h
            .ops
            .verify(params(json!({"url": BLOG, "selector": ".none", "expected": "x"})))
            .await;
        assert_eq!(result.field("exists"), Some(&json!(false)));
        assert_eq!(result.field("content_matches"), Some(&json!(false)));
    }

    #[tokio::test]
    async fn test_wait_for_visible_element() {
        let h = harness(blog_site());
        let result = h
            .ops
            .wait(params(json!({"url": BLOG, "selector": "h1", "timeout": 1000})))
            .await;

        assert!(result.is_success());
        assert_eq!(
            result.field("message"),
            Some(&json!("Element h1 appeared within timeout"))
        );
    }

    #[tokio::test]
    async fn test_wait_times_out_for_missing_element() {
        let h = harness(blog_site());
        let started = tokio::time::Instant::now();
        let result = h
            .ops
            .wait(params(json!({"url": BLOG, "selector": "#never", "timeout": 1})))
            .await;

        assert!(!result.is_success());
        let error = result.error().unwrap();
        assert!(error.contains("Timeout"));
        assert!(error.contains("#never"));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(h.launcher.pages_closed(), 1);
    }

    #[tokio::test]
    async fn test_wait_falls_back_to_presence() {
        // hidden but present
        let h = harness(blog_site());
        let result = h
            .ops
            .wait(params(json!({"url": BLOG, "selector": "#banner", "timeout": 10})))
            .await;
        assert!(result.is_success());

        // visibility wait unavailable
        let h = harness(blog_site().without_visibility_wait());
        let result = h
            .ops
            .wait(params(json!({"url": BLOG, "selector": "h1", "timeout": 10})))
            .await;
        assert!(result.is_success());
    }

    fn links_site(hrefs: &[&str]) -> FakeSite {
        let mut start = FakePage::new();
        for href in hrefs {
            start = start.element(FakeElement::new("a.item").attr("href", *href));
        }
        let mut site = FakeSite::new().page("https://example.com/list", start);
        for n in 1..=5 {
            site = site.page(
                format!("https://example.com/p{}", n),
                FakePage::new().element(FakeElement::new("h1").text(format!("Post {}", n))),
            );
        }
        site
    }

    fn title_schema() -> Value {
        json!({"baseSelector": "h1", "fields": [{"name": "title"}]})
    }

    #[tokio::test]
    async fn test_crawl_links_bounded_by_max_depth() {
        let h = harness(links_site(&["/p1", "/p2", "/p3", "/p4", "/p5"]));
        let result = h
            .ops
            .crawl_links(params(json!({
                "url": "https://example.com/list",
                "link_selector": "a.item",
                "schema": title_schema(),
                "max_depth": 2
            })))
            .await;

        assert!(result.is_success());
        let entries = result.data().unwrap().as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["url"], "https://example.com/p1");
        assert_eq!(entries[0]["data"], json!([{"title": "Post 1"}]));
        assert_eq!(entries[1]["url"], "https://example.com/p2");
    }

    #[tokio::test]
    async fn test_crawl_links_isolates_failures() {
        let h = harness(links_site(&["/missing", "https://example.com/p2"]));
        let result = h
            .ops
            .crawl_links(params(json!({
                "url": "https://example.com/list",
                "linkSelector": "a.item",
                "schema": title_schema(),
                "maxDepth": 5
            })))
            .await;

        let entries = result.data().unwrap().as_array().unwrap();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0]["url"], "https://example.com/missing");
        assert_eq!(entries[0]["success"], false);
        assert!(entries[0]["error"].as_str().unwrap().contains("ERR_NAME_NOT_RESOLVED"));

        assert_eq!(entries[1]["url"], "https://example.com/p2");
        assert_eq!(entries[1]["success"], true);
        assert_eq!(entries[1]["data"], json!([{"title": "Post 2"}]));
        assert!(entries[1].get("error").is_none());

        // every page opened along the way was closed again
        assert_eq!(h.launcher.pages_closed(), h.launcher.pages_opened());
    }

    #[tokio::test]
    async fn test_crawl_links_concurrent_keeps_order() {
        let mut h = harness(links_site(&["/p3", "/p1", "/p2"]));
        h.ops = h.ops.with_link_concurrency(2);
        let result = h
            .ops
            .crawl_links(params(json!({
                "url": "https://example.com/list",
                "link_selector": "a.item",
                "schema": title_schema(),
                "max_depth": 3
            })))
            .await;

        let urls: Vec<&str> = result
            .data()
            .unwrap()
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["url"].as_str().unwrap())
            .collect();
        assert_eq!(
            urls,
            ["https://example.com/p3", "https://example.com/p1", "https://example.com/p2"]
        );
    }

    #[tokio::test]
    async fn test_crawl_with_schema() {
        let h = harness(links_site(&[]));
        let result = h
            .ops
            .crawl(params(json!({"url": "https://example.com/p4", "schema": title_schema()})))
            .await;

        assert!(result.is_success());
        assert_eq!(result.data(), Some(&json!([{"title": "Post 4"}])));
        assert_eq!(result.field("url"), Some(&json!("https://example.com/p4")));
    }

    #[tokio::test]
    async fn test_navigation_failure_releases_page() {
        let h = harness(blog_site());
        let result = h
            .ops
            .extract(params(json!({"url": "https://nowhere.invalid/", "selector": "a"})))
            .await;

        assert!(!result.is_success());
        assert!(result.error().unwrap().starts_with("Navigation failed"));
        assert_eq!(h.launcher.pages_opened(), 1);
        assert_eq!(h.launcher.pages_closed(), 1);
    }

    #[tokio::test]
    async fn test_launch_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(FakeLauncher::new(blog_site()).failing_launches(1));
        let sessions = Arc::new(SessionManager::new(BrowserConfig::default(), launcher));
        let ops = Operations::new(
            Arc::clone(&sessions),
            Arc::new(BrowserExtractor::new(sessions, None)),
            Arc::new(StaticFetcher {
                content_type: "application/pdf",
                bytes: b"",
            }),
            ArtifactStore::new(dir.path(), "/public"),
        );

        let result = ops.verify(params(json!({"url": BLOG, "selector": "h1"}))).await;
        assert!(!result.is_success());
        assert!(result.error().unwrap().contains("Browser could not be started"));

        // the next call relaunches
        let result = ops.verify(params(json!({"url": BLOG, "selector": "h1"}))).await;
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn test_screenshots() {
        let h = harness(blog_site());

        let result = h
            .ops
            .screenshot(params(json!({"url": BLOG, "fullPage": true})))
            .await;
        assert!(result.is_success());
        let url = result.field("url").unwrap().as_str().unwrap();
        assert!(url.starts_with("/public/screenshots/screenshot_"));
        assert!(url.ends_with("_full.png"));
        let path = result.field("path").unwrap().as_str().unwrap();
        assert_eq!(std::fs::read(path).unwrap(), FAKE_FULL_PAGE_PNG);

        let result = h
            .ops
            .screenshot(params(json!({"url": BLOG, "selector": "h1"})))
            .await;
        let path = result.field("path").unwrap().as_str().unwrap();
        assert_eq!(std::fs::read(path).unwrap(), FAKE_ELEMENT_PNG);

        let result = h
            .ops
            .screenshot(params(json!({"url": BLOG, "selector": ".missing"})))
            .await;
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn test_to_markdown_writes_file() {
        let h = harness(blog_site());
        let result = h.ops.to_markdown(params(json!({"url": BLOG}))).await;

        assert!(result.is_success());
        let markdown = result.field("markdown").unwrap().as_str().unwrap();
        assert!(markdown.contains("Blog"));
        assert!(markdown.contains("**world**"));

        let file_url = result.field("file_url").unwrap().as_str().unwrap();
        assert!(file_url.starts_with("/public/markdown/"));
        assert!(file_url.ends_with(".md"));

        let path = result.field("path").unwrap().as_str().unwrap();
        assert!(path.starts_with(h.dir.path().to_str().unwrap()));
        assert_eq!(std::fs::read_to_string(path).unwrap(), markdown);
    }

    #[tokio::test]
    async fn test_empty_markdown_and_pdf_fail() {
        let site = FakeSite::new().page("https://example.com/empty", FakePage::new());
        let h = harness(site);

        let result = h
            .ops
            .to_markdown(params(json!({"url": "https://example.com/empty"})))
            .await;
        assert_eq!(
            result.error(),
            Some("Markdown generation resulted in empty content")
        );

        let result = h
            .ops
            .to_pdf(params(json!({"url": "https://example.com/empty"})))
            .await;
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn test_to_pdf_writes_file() {
        let h = harness(blog_site());
        let result = h.ops.to_pdf(params(json!({"url": BLOG}))).await;

        assert!(result.is_success());
        let url = result.field("url").unwrap().as_str().unwrap();
        assert!(url.starts_with("/public/pdfs/") && url.ends_with(".pdf"));
        let path = result.field("path").unwrap().as_str().unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"%PDF-1.4 fake");
    }

    #[tokio::test]
    async fn test_extract_pdf_rejects_other_content() {
        let decoder = Arc::new(CountingDecoder::default());
        let mut h = harness(blog_site());
        h.ops = h.ops.with_decoder(decoder.clone());

        let result = h
            .ops
            .extract_pdf(params(json!({"url": "https://example.com/doc"})))
            .await;

        assert_eq!(
            result.error(),
            Some("URL does not point to a PDF. Content-Type: text/html")
        );
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.launcher.launch_count(), 0);
    }

    #[tokio::test]
    async fn test_extract_pdf_text() {
        let decoder = Arc::new(CountingDecoder::default());
        let fetcher = StaticFetcher {
            content_type: "application/pdf",
            bytes: b"%PDF",
        };
        let mut h = harness_with(blog_site(), None, fetcher);
        h.ops = h.ops.with_decoder(decoder.clone());

        let result = h
            .ops
            .extract_pdf(params(json!({"url": "https://example.com/doc.pdf"})))
            .await;

        assert!(result.is_success());
        assert_eq!(result.field("text"), Some(&json!("Page one \nPage two")));
        assert_eq!(result.field("pages"), Some(&json!(2)));
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 1);
    }

    fn scripted(answer: &'static str) -> Arc<ScriptedModel> {
        Arc::new(ScriptedModel {
            answer,
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn html_fetcher() -> StaticFetcher {
        StaticFetcher {
            content_type: "text/html",
            bytes: b"",
        }
    }

    #[tokio::test]
    async fn test_generate_schema_parses_json() {
        let site = blog_site().page(
            "https://example.com/shop",
            FakePage::new().element(FakeElement::new("body").text("Shop items")),
        );
        let model = scripted("```json\n{\"baseSelector\": \".item\", \"fields\": []}\n```");
        let h = harness_with(
            site,
            Some(model.clone() as Arc<dyn LanguageModel>),
            html_fetcher(),
        );

        let result = h
            .ops
            .generate_schema(params(json!({
                "url": "https://example.com/shop",
                "prompt": "Products with prices"
            })))
            .await;

        assert!(result.is_success());
        assert_eq!(
            result.field("schema"),
            Some(&json!({"baseSelector": ".item", "fields": []}))
        );
        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].starts_with(
            "Analyze this webpage and generate a JSON schema for extracting data. Products with prices"
        ));
        assert!(prompts[0].contains("Shop items"));
    }

    #[tokio::test]
    async fn test_generate_schema_keeps_text_answer() {
        let model = scripted("I could not find structured data.");
        let h = harness_with(
            blog_site(),
            Some(model as Arc<dyn LanguageModel>),
            html_fetcher(),
        );

        let result = h
            .ops
            .generate_schema(params(json!({"url": BLOG, "prompt": "anything"})))
            .await;

        assert!(result.is_success());
        assert!(result.error().is_none());
        assert_eq!(
            result.field("text_result"),
            Some(&json!("I could not find structured data."))
        );
        assert!(result.field("warning").is_some());
    }

    #[tokio::test]
    async fn test_generate_schema_without_llm() {
        let h = harness(blog_site());
        let result = h
            .ops
            .generate_schema(params(json!({"url": BLOG, "prompt": "anything"})))
            .await;

        assert!(!result.is_success());
        assert!(result.error().unwrap().contains("LLM_API_KEY"));
    }

    #[tokio::test]
    async fn test_llm_crawl_parses_answer() {
        let model = scripted("[{\"title\": \"Blog\"}]");
        let h = harness_with(
            blog_site(),
            Some(model as Arc<dyn LanguageModel>),
            html_fetcher(),
        );

        let result = h
            .ops
            .crawl(params(json!({"url": BLOG, "strategy": "LLMExtractionStrategy"})))
            .await;

        assert_eq!(result.data(), Some(&json!([{"title": "Blog"}])));
    }

    #[tokio::test]
    async fn test_validation_never_touches_browser() {
        let h = harness(blog_site());
        let results = vec![
            h.ops.extract(params(json!({"url": BLOG}))).await,
            h.ops.wait(params(json!({"selector": "h1"}))).await,
            h.ops.screenshot(params(json!({"url": "ftp://example.com"}))).await,
            h.ops.to_pdf(params(json!({}))).await,
        ];

        for result in &results {
            assert!(!result.is_success());
            assert_envelope(result);
        }
        assert_eq!(h.launcher.launch_count(), 0);
    }
}
