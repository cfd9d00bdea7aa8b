//! Operation requests
//!
//! HTTP routes deserialize the parameter structs directly; the job surface
//! deserializes a whole [`OperationRequest`] tagged by `type`. Field names
//! accept both the snake_case HTTP spelling and the camelCase spelling used by
//! queue producers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Default timeout for `wait`, in milliseconds
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 30_000;

/// Action names understood by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Crawl,
    Extract,
    GenerateSchema,
    Verify,
    Wait,
    Filter,
    CrawlLinks,
    Screenshot,
    ExtractPdf,
    ToMarkdown,
    ToPdf,
}

impl ActionKind {
    pub const ALL: [ActionKind; 11] = [
        ActionKind::Crawl,
        ActionKind::Extract,
        ActionKind::GenerateSchema,
        ActionKind::Verify,
        ActionKind::Wait,
        ActionKind::Filter,
        ActionKind::CrawlLinks,
        ActionKind::Screenshot,
        ActionKind::ExtractPdf,
        ActionKind::ToMarkdown,
        ActionKind::ToPdf,
    ];

    /// Name used in job payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Crawl => "crawl",
            ActionKind::Extract => "extract",
            ActionKind::GenerateSchema => "generateSchema",
            ActionKind::Verify => "verify",
            ActionKind::Wait => "wait",
            ActionKind::Filter => "filter",
            ActionKind::CrawlLinks => "crawlLinks",
            ActionKind::Screenshot => "screenshot",
            ActionKind::ExtractPdf => "extractPdf",
            ActionKind::ToMarkdown => "toMarkdown",
            ActionKind::ToPdf => "toPdf",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ActionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("Unknown action type: {}", s)))
    }
}

/// What to read from a matched element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractKind {
    #[default]
    Text,
    Html,
    Attribute,
}

/// Extraction strategy used by `crawl`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StrategyKind {
    #[default]
    #[serde(rename = "JsonCssExtractionStrategy", alias = "css")]
    JsonCss,
    #[serde(rename = "JsonXPathExtractionStrategy", alias = "xpath")]
    JsonXPath,
    #[serde(rename = "LLMExtractionStrategy", alias = "llm")]
    Llm,
}

/// Structured extraction schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSchema {
    #[serde(default = "default_schema_name")]
    pub name: String,
    #[serde(
        rename = "baseSelector",
        alias = "base_selector",
        default = "default_base_selector"
    )]
    pub base_selector: String,
    /// Output keys follow this order
    #[serde(default)]
    pub fields: Vec<SchemaField>,
}

/// One field of an [`ExtractionSchema`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    /// Relative to the base element. Empty means the base element itself.
    #[serde(default)]
    pub selector: String,
    #[serde(rename = "type", default)]
    pub kind: ExtractKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

fn default_schema_name() -> String {
    "Extraction".to_string()
}

fn default_base_selector() -> String {
    "body".to_string()
}

impl ExtractionSchema {
    /// Schema that returns the text of every element matching `base_selector`
    pub fn text_of(base_selector: impl Into<String>) -> Self {
        Self {
            name: "Page".to_string(),
            base_selector: base_selector.into(),
            fields: vec![SchemaField {
                name: "text".to_string(),
                selector: String::new(),
                kind: ExtractKind::Text,
                attribute: None,
            }],
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_selector.trim().is_empty() {
            return Err(Error::Validation(format!(
                "Schema '{}' has an empty baseSelector",
                self.name
            )));
        }
        for field in &self.fields {
            if field.name.trim().is_empty() {
                return Err(Error::Validation(format!(
                    "Schema '{}' has a field without a name",
                    self.name
                )));
            }
            if field.kind == ExtractKind::Attribute
                && field.attribute.as_deref().is_none_or(|a| a.trim().is_empty())
            {
                return Err(Error::Validation(format!(
                    "Field '{}' of type 'attribute' needs an attribute name",
                    field.name
                )));
            }
        }
        Ok(())
    }
}

/// Converter options for `toMarkdown`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkdownOptions {
    /// Drop `<img>` elements
    #[serde(default, alias = "ignoreImages")]
    pub ignore_images: bool,
    /// Additional tags removed before conversion
    #[serde(default, alias = "skipTags")]
    pub skip_tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrawlParams {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub schema: Option<ExtractionSchema>,
    #[serde(default)]
    pub strategy: StrategyKind,
    /// Overrides the schema's base selector
    #[serde(default, rename = "baseSelector", alias = "base_selector")]
    pub base_selector: Option<String>,
    /// Instruction for the LLM strategy
    #[serde(default)]
    pub instruction: Option<String>,
    /// `provider/model` for the LLM strategy
    #[serde(default, alias = "provider")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractParams {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub selector: String,
    /// `type` over HTTP; `extractType` in job payloads where `type` is the action
    #[serde(
        default,
        rename = "type",
        alias = "extractType",
        alias = "extract_type"
    )]
    pub kind: ExtractKind,
    #[serde(default)]
    pub attribute: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateSchemaParams {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyParams {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub selector: String,
    #[serde(default)]
    pub expected: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaitParams {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub selector: String,
    /// Milliseconds
    #[serde(default = "default_wait_timeout")]
    pub timeout: u64,
}

fn default_wait_timeout() -> u64 {
    DEFAULT_WAIT_TIMEOUT_MS
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterParams {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub selector: String,
    #[serde(default)]
    pub condition: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrawlLinksParams {
    #[serde(default)]
    pub url: String,
    #[serde(default, alias = "linkSelector")]
    pub link_selector: String,
    #[serde(default)]
    pub schema: Option<ExtractionSchema>,
    /// Number of links followed, not a recursion depth
    #[serde(default = "default_max_depth", alias = "maxDepth")]
    pub max_depth: usize,
}

fn default_max_depth() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScreenshotParams {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default, alias = "fullPage")]
    pub full_page: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractPdfParams {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkdownParams {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub options: MarkdownOptions,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PdfParams {
    #[serde(default)]
    pub url: String,
}

/// Every operation the service can run
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OperationRequest {
    Crawl(CrawlParams),
    Extract(ExtractParams),
    GenerateSchema(GenerateSchemaParams),
    Verify(VerifyParams),
    Wait(WaitParams),
    Filter(FilterParams),
    CrawlLinks(CrawlLinksParams),
    Screenshot(ScreenshotParams),
    ExtractPdf(ExtractPdfParams),
    ToMarkdown(MarkdownParams),
    ToPdf(PdfParams),
}

impl OperationRequest {
    /// Parse a job payload of the form `{"type": <action>, ...params}`
    pub fn from_job(payload: Value) -> Result<Self> {
        let action = match payload.get("type") {
            Some(Value::String(name)) if !name.trim().is_empty() => name.clone(),
            Some(Value::Null) | Some(Value::String(_)) | None => {
                return Err(Error::Validation("No action type specified".to_string()));
            }
            Some(other) => {
                return Err(Error::Validation(format!("Unknown action type: {}", other)));
            }
        };

        let kind: ActionKind = action.parse()?;

        serde_json::from_value(payload).map_err(|e| {
            Error::Validation(format!("Invalid parameters for {} action: {}", kind, e))
        })
    }

    pub fn action(&self) -> ActionKind {
        match self {
            OperationRequest::Crawl(_) => ActionKind::Crawl,
            OperationRequest::Extract(_) => ActionKind::Extract,
            OperationRequest::GenerateSchema(_) => ActionKind::GenerateSchema,
            OperationRequest::Verify(_) => ActionKind::Verify,
            OperationRequest::Wait(_) => ActionKind::Wait,
            OperationRequest::Filter(_) => ActionKind::Filter,
            OperationRequest::CrawlLinks(_) => ActionKind::CrawlLinks,
            OperationRequest::Screenshot(_) => ActionKind::Screenshot,
            OperationRequest::ExtractPdf(_) => ActionKind::ExtractPdf,
            OperationRequest::ToMarkdown(_) => ActionKind::ToMarkdown,
            OperationRequest::ToPdf(_) => ActionKind::ToPdf,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            OperationRequest::Crawl(p) => &p.url,
            OperationRequest::Extract(p) => &p.url,
            OperationRequest::GenerateSchema(p) => &p.url,
            OperationRequest::Verify(p) => &p.url,
            OperationRequest::Wait(p) => &p.url,
            OperationRequest::Filter(p) => &p.url,
            OperationRequest::CrawlLinks(p) => &p.url,
            OperationRequest::Screenshot(p) => &p.url,
            OperationRequest::ExtractPdf(p) => &p.url,
            OperationRequest::ToMarkdown(p) => &p.url,
            OperationRequest::ToPdf(p) => &p.url,
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

/// Reject anything that is not an absolute http(s) URL
pub fn validate_url(url: &str) -> Result<()> {
    let parsed = url::Url::parse(url)
        .map_err(|e| Error::Validation(format!("Invalid URL '{}': {}", url, e)))?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(Error::Validation(format!(
            "Invalid URL '{}': unsupported scheme '{}'",
            url, scheme
        ))),
    }
}

fn require(missing: bool, message: &str) -> Result<()> {
    if missing {
        Err(Error::Validation(message.to_string()))
    } else {
        Ok(())
    }
}

impl CrawlParams {
    pub fn validate(&self) -> Result<()> {
        require(is_blank(&self.url), "URL is required for crawl action")?;
        validate_url(&self.url)?;
        if let Some(schema) = &self.schema {
            schema.validate()?;
        }
        Ok(())
    }
}

impl ExtractParams {
    pub fn validate(&self) -> Result<()> {
        require(
            is_blank(&self.url) || is_blank(&self.selector),
            "URL and selector are required for extract action",
        )?;
        validate_url(&self.url)?;
        require(
            self.kind == ExtractKind::Attribute
                && self.attribute.as_deref().is_none_or(is_blank),
            "Attribute name is required when type is 'attribute'",
        )
    }
}

impl GenerateSchemaParams {
    pub fn validate(&self) -> Result<()> {
        require(
            is_blank(&self.url) || is_blank(&self.prompt),
            "URL and prompt are required for generateSchema action",
        )?;
        validate_url(&self.url)
    }
}

impl VerifyParams {
    pub fn validate(&self) -> Result<()> {
        require(
            is_blank(&self.url) || is_blank(&self.selector),
            "URL and selector are required for verify action",
        )?;
        validate_url(&self.url)
    }
}

impl WaitParams {
    pub fn validate(&self) -> Result<()> {
        require(
            is_blank(&self.url) || is_blank(&self.selector),
            "URL and selector are required for wait action",
        )?;
        validate_url(&self.url)
    }
}

impl FilterParams {
    pub fn validate(&self) -> Result<()> {
        require(
            is_blank(&self.url) || is_blank(&self.selector) || is_blank(&self.condition),
            "URL, selector, and condition are required for filter action",
        )?;
        validate_url(&self.url)
    }
}

impl CrawlLinksParams {
    pub fn validate(&self) -> Result<()> {
        require(
            is_blank(&self.url) || is_blank(&self.link_selector),
            "URL and linkSelector are required for crawlLinks action",
        )?;
        validate_url(&self.url)?;
        if let Some(schema) = &self.schema {
            schema.validate()?;
        }
        Ok(())
    }
}

impl ScreenshotParams {
    pub fn validate(&self) -> Result<()> {
        require(is_blank(&self.url), "URL is required for screenshot action")?;
        validate_url(&self.url)
    }
}

impl ExtractPdfParams {
    pub fn validate(&self) -> Result<()> {
        require(is_blank(&self.url), "URL is required for extractPdf action")?;
        validate_url(&self.url)
    }
}

impl MarkdownParams {
    pub fn validate(&self) -> Result<()> {
        require(is_blank(&self.url), "URL is required for toMarkdown action")?;
        validate_url(&self.url)
    }
}

impl PdfParams {
    pub fn validate(&self) -> Result<()> {
        require(is_blank(&self.url), "URL is required for toPdf action")?;
        validate_url(&self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_names_round_trip() {
        for kind in ActionKind::ALL {
            assert_eq!(kind.as_str().parse::<ActionKind>().unwrap(), kind);
        }
        assert!("crawl-links".parse::<ActionKind>().is_err());
    }

    #[test]
    fn test_from_job_missing_type() {
        let err = OperationRequest::from_job(json!({"url": "https://example.com"})).unwrap_err();
        assert_eq!(err.to_string(), "No action type specified");

        let err = OperationRequest::from_job(json!({"type": ""})).unwrap_err();
        assert_eq!(err.to_string(), "No action type specified");
    }

    #[test]
    fn test_from_job_unknown_type() {
        let err = OperationRequest::from_job(json!({"type": "scrapeEverything"})).unwrap_err();
        assert_eq!(err.to_string(), "Unknown action type: scrapeEverything");
    }

    #[test]
    fn test_from_job_camel_case_fields() {
        let request = OperationRequest::from_job(json!({
            "type": "crawlLinks",
            "url": "https://example.com",
            "linkSelector": "a.next",
            "maxDepth": 3
        }))
        .unwrap();

        match request {
            OperationRequest::CrawlLinks(p) => {
                assert_eq!(p.link_selector, "a.next");
                assert_eq!(p.max_depth, 3);
                assert!(p.schema.is_none());
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_from_job_extract_kind() {
        let request = OperationRequest::from_job(json!({
            "type": "extract",
            "url": "https://example.com",
            "selector": "a",
            "extractType": "attribute",
            "attribute": "href"
        }))
        .unwrap();

        assert_eq!(request.action(), ActionKind::Extract);
        match request {
            OperationRequest::Extract(p) => {
                assert_eq!(p.kind, ExtractKind::Attribute);
                assert_eq!(p.attribute.as_deref(), Some("href"));
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_http_extract_body_uses_type() {
        let params: ExtractParams = serde_json::from_value(json!({
            "url": "https://example.com",
            "selector": "h1",
            "type": "html"
        }))
        .unwrap();
        assert_eq!(params.kind, ExtractKind::Html);
    }

    #[test]
    fn test_defaults() {
        let wait: WaitParams =
            serde_json::from_value(json!({"url": "https://example.com", "selector": "#x"})).unwrap();
        assert_eq!(wait.timeout, DEFAULT_WAIT_TIMEOUT_MS);

        let links: CrawlLinksParams = serde_json::from_value(
            json!({"url": "https://example.com", "link_selector": "a"}),
        )
        .unwrap();
        assert_eq!(links.max_depth, 1);

        let crawl: CrawlParams = serde_json::from_value(json!({"url": "https://example.com"})).unwrap();
        assert_eq!(crawl.strategy, StrategyKind::JsonCss);
    }

    #[test]
    fn test_schema_defaults_and_order() {
        let schema: ExtractionSchema = serde_json::from_value(json!({
            "fields": [
                {"name": "title", "selector": "h2"},
                {"name": "link", "selector": "a", "type": "attribute", "attribute": "href"},
                {"name": "body", "selector": ".content", "type": "html"}
            ]
        }))
        .unwrap();

        assert_eq!(schema.name, "Extraction");
        assert_eq!(schema.base_selector, "body");
        let names: Vec<&str> = schema.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["title", "link", "body"]);
        assert_eq!(schema.fields[0].kind, ExtractKind::Text);
        assert!(schema.validate().is_ok());
    }

    #[test]
    fn test_schema_attribute_field_needs_name() {
        let schema: ExtractionSchema = serde_json::from_value(json!({
            "baseSelector": "li",
            "fields": [{"name": "link", "selector": "a", "type": "attribute"}]
        }))
        .unwrap();
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_strategy_names() {
        let strategy: StrategyKind = serde_json::from_value(json!("LLMExtractionStrategy")).unwrap();
        assert_eq!(strategy, StrategyKind::Llm);
        let strategy: StrategyKind =
            serde_json::from_value(json!("JsonXPathExtractionStrategy")).unwrap();
        assert_eq!(strategy, StrategyKind::JsonXPath);
        assert!(serde_json::from_value::<StrategyKind>(json!("Magic")).is_err());
    }

    #[test]
    fn test_validation_messages() {
        let params = ExtractParams {
            url: "https://example.com".into(),
            selector: String::new(),
            kind: ExtractKind::Text,
            attribute: None,
        };
        assert_eq!(
            params.validate().unwrap_err().to_string(),
            "URL and selector are required for extract action"
        );

        let params = ExtractParams {
            url: "https://example.com".into(),
            selector: "a".into(),
            kind: ExtractKind::Attribute,
            attribute: None,
        };
        assert!(params.validate().is_err());

        let params = FilterParams {
            url: "https://example.com".into(),
            selector: "a".into(),
            condition: " ".into(),
        };
        assert_eq!(
            params.validate().unwrap_err().to_string(),
            "URL, selector, and condition are required for filter action"
        );
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://example.com/page").is_ok());
        assert!(validate_url("http://localhost:8080").is_ok());
        assert!(validate_url("example.com").is_err());
        assert!(validate_url("ftp://example.com/file").is_err());
    }
}
