//! Content extraction
//!
//! [`ContentExtractor`] covers the heavier conversions an operation can
//! delegate: schema-driven structured extraction, LLM extraction, Markdown
//! rendering and PDF printing. [`BrowserExtractor`] implements it on the
//! shared browser.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info};

use pm_browser::{ElementHandle, Locator, PageDriver, SessionManager};
use pm_core::{
    CompletionRequest, CrawlParams, ExtractKind, ExtractionSchema, LanguageModel, MarkdownOptions,
    SchemaField, StrategyKind,
};

use crate::error::{CrawlError, Result};
use crate::page::with_page;

const DEFAULT_LLM_INSTRUCTION: &str = "Extract structured data from the page";

const LLM_SYSTEM_PROMPT: &str = "You extract information from web pages. \
Answer with JSON only, without commentary.";

/// Tags dropped before any Markdown conversion
const ALWAYS_SKIPPED_TAGS: [&str; 3] = ["script", "style", "noscript"];

/// How `crawl` turns a page into data
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionStrategy {
    /// Schema with CSS selectors
    Css(ExtractionSchema),
    /// Schema with XPath expressions
    XPath(ExtractionSchema),
    /// Page text handed to a language model
    Llm {
        instruction: String,
        model: Option<String>,
    },
}

impl ExtractionStrategy {
    /// Strategy for a crawl request.
    ///
    /// Without a schema the text of the base element is extracted. A request
    /// level `baseSelector` overrides the schema's.
    pub fn from_request(params: &CrawlParams) -> Self {
        let base_override = params
            .base_selector
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let schema = || {
            let mut schema = params
                .schema
                .clone()
                .unwrap_or_else(|| ExtractionSchema::text_of("body"));
            if let Some(base) = base_override {
                schema.base_selector = base.to_string();
            }
            schema
        };

        match params.strategy {
            StrategyKind::JsonCss => ExtractionStrategy::Css(schema()),
            StrategyKind::JsonXPath => ExtractionStrategy::XPath(schema()),
            StrategyKind::Llm => {
                let mut instruction = params
                    .instruction
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .unwrap_or(DEFAULT_LLM_INSTRUCTION)
                    .to_string();
                if let Some(schema) = &params.schema {
                    if let Ok(fields) = serde_json::to_string(&schema.fields) {
                        instruction.push_str("\n\nReturn a JSON array of objects with these fields: ");
                        instruction.push_str(&fields);
                    }
                }
                ExtractionStrategy::Llm {
                    instruction,
                    model: params.model.clone(),
                }
            }
        }
    }

    fn locator(&self, selector: &str) -> Locator {
        match self {
            ExtractionStrategy::XPath(_) => match selector.trim().strip_prefix("xpath=") {
                Some(expr) => Locator::XPath(expr.to_string()),
                None => Locator::XPath(selector.trim().to_string()),
            },
            _ => Locator::parse(selector),
        }
    }
}

/// Result of a structured extraction
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedContent {
    pub url: String,
    /// Records for schema strategies, raw model text for the LLM strategy
    pub content: Value,
}

/// Markdown rendering of a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMarkdown {
    pub url: String,
    pub markdown: String,
}

#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(&self, url: &str, strategy: &ExtractionStrategy) -> Result<ExtractedContent>;

    async fn markdown(&self, url: &str, options: &MarkdownOptions) -> Result<RenderedMarkdown>;

    /// Print the page to PDF
    async fn pdf(&self, url: &str) -> Result<Vec<u8>>;
}

/// [`ContentExtractor`] running on the shared browser
pub struct BrowserExtractor {
    sessions: Arc<SessionManager>,
    llm: Option<Arc<dyn LanguageModel>>,
    max_page_chars: usize,
}

impl BrowserExtractor {
    pub fn new(sessions: Arc<SessionManager>, llm: Option<Arc<dyn LanguageModel>>) -> Self {
        Self {
            sessions,
            llm,
            max_page_chars: 20_000,
        }
    }

    /// Limit on page text sent to the language model
    pub fn with_max_page_chars(mut self, max_page_chars: usize) -> Self {
        self.max_page_chars = max_page_chars.max(1);
        self
    }

    async fn extract_with_schema(
        &self,
        url: &str,
        strategy: &ExtractionStrategy,
        schema: &ExtractionSchema,
    ) -> Result<Value> {
        with_page(&self.sessions, url, |page| async move {
            let bases = page
                .query_all(&strategy.locator(&schema.base_selector))
                .await?;
            debug!(
                "Schema '{}': {} elements match '{}'",
                schema.name,
                bases.len(),
                schema.base_selector
            );

            let mut records = Vec::with_capacity(bases.len());
            for base in &bases {
                let mut record = Map::new();
                for field in &schema.fields {
                    let value = read_schema_field(base.as_ref(), strategy, field).await?;
                    record.insert(field.name.clone(), value);
                }
                records.push(Value::Object(record));
            }
            Ok::<_, CrawlError>(Value::Array(records))
        })
        .await
    }

    async fn extract_with_llm(&self, url: &str, instruction: &str, model: Option<&str>) -> Result<Value> {
        let llm = self.llm.as_ref().ok_or_else(|| {
            CrawlError::Extraction(
                "LLM extraction requires LLM_API_KEY to be configured".to_string(),
            )
        })?;

        let text = with_page(&self.sessions, url, |page| async move { page_text(page.as_ref()).await })
            .await?;
        let text = truncate_chars(&text, self.max_page_chars);

        let request = CompletionRequest::new(format!(
            "{}\n\nURL: {}\n\nPage content:\n{}",
            instruction, url, text
        ))
        .system(LLM_SYSTEM_PROMPT)
        .model(model.map(str::to_string));

        let answer = llm.complete(request).await?;
        info!("LLM extraction for {} returned {} chars", url, answer.len());
        Ok(Value::String(answer))
    }
}

#[async_trait]
impl ContentExtractor for BrowserExtractor {
    async fn extract(&self, url: &str, strategy: &ExtractionStrategy) -> Result<ExtractedContent> {
        let content = match strategy {
            ExtractionStrategy::Css(schema) | ExtractionStrategy::XPath(schema) => {
                self.extract_with_schema(url, strategy, schema).await?
            }
            ExtractionStrategy::Llm { instruction, model } => {
                self.extract_with_llm(url, instruction, model.as_deref()).await?
            }
        };

        Ok(ExtractedContent {
            url: url.to_string(),
            content,
        })
    }

    async fn markdown(&self, url: &str, options: &MarkdownOptions) -> Result<RenderedMarkdown> {
        let html = with_page(&self.sessions, url, |page| async move {
            page.content().await.map_err(CrawlError::from)
        })
        .await?;

        let markdown = html_to_markdown(&html, options)?;
        Ok(RenderedMarkdown {
            url: url.to_string(),
            markdown,
        })
    }

    async fn pdf(&self, url: &str) -> Result<Vec<u8>> {
        with_page(&self.sessions, url, |page| async move {
            page.pdf().await.map_err(CrawlError::from)
        })
        .await
    }
}

/// Value of one schema field below `base`. The first match wins.
async fn read_schema_field(
    base: &dyn ElementHandle,
    strategy: &ExtractionStrategy,
    field: &SchemaField,
) -> Result<Value> {
    let value = if field.selector.trim().is_empty() {
        read_element(base, field.kind, field.attribute.as_deref()).await?
    } else {
        let matches = base.query_all(&strategy.locator(&field.selector)).await?;
        match matches.first() {
            Some(element) => {
                read_element(element.as_ref(), field.kind, field.attribute.as_deref()).await?
            }
            None => Value::Null,
        }
    };

    // schema text fields are whitespace-trimmed
    Ok(match (field.kind, value) {
        (ExtractKind::Text, Value::String(text)) => Value::String(text.trim().to_string()),
        (_, value) => value,
    })
}

/// Read raw text content, inner HTML or an attribute. Missing values are `null`.
pub(crate) async fn read_element(
    element: &dyn ElementHandle,
    kind: ExtractKind,
    attribute: Option<&str>,
) -> Result<Value> {
    let value = match kind {
        ExtractKind::Text => element
            .text_content()
            .await?
            .map(Value::String),
        ExtractKind::Html => Some(Value::String(element.inner_html().await?)),
        ExtractKind::Attribute => match attribute {
            Some(name) => element.attribute(name).await?.map(Value::String),
            None => None,
        },
    };
    Ok(value.unwrap_or(Value::Null))
}

async fn page_text(page: &dyn PageDriver) -> Result<String> {
    let bodies = page.query_all(&Locator::Css("body".to_string())).await?;
    match bodies.first() {
        Some(body) => Ok(body.text_content().await?.unwrap_or_default()),
        None => Ok(String::new()),
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// Convert HTML with htmd, honouring the request options
pub fn html_to_markdown(html: &str, options: &MarkdownOptions) -> Result<String> {
    let mut skip: Vec<&str> = ALWAYS_SKIPPED_TAGS.to_vec();
    if options.ignore_images {
        skip.push("img");
    }
    skip.extend(
        options
            .skip_tags
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty()),
    );

    let converter = htmd::HtmlToMarkdown::builder().skip_tags(skip).build();
    converter
        .convert(html)
        .map(|md| md.trim().to_string())
        .map_err(|e| CrawlError::Extraction(format!("Markdown conversion failed: {}", e)))
}

/// Parse a model answer as JSON, tolerating a Markdown code fence.
///
/// Only objects and arrays count; anything else is `None`.
pub fn parse_json_answer(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    let body = match trimmed.strip_prefix("```") {
        Some(rest) => {
            let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
            rest.strip_suffix("```").unwrap_or(rest).trim()
        }
        None => trimmed,
    };

    match serde_json::from_str::<Value>(body) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => Some(value),
        _ => None,
    }
}
