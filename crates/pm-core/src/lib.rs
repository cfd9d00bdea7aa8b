//! pm-core: shared building blocks for pm-crawler
//!
//! Configuration loading, the operation request/response contract shared by
//! the HTTP and job surfaces, and the LLM client used by schema generation.

pub mod config;
pub mod envelope;
pub mod error;
pub mod llm;
pub mod request;

pub use config::{
    ApiConfig, ArtifactConfig, BrowserSettings, Config, CrawlConfig, LlmConfig, LlmProvider,
    WorkerConfig,
};
pub use envelope::OperationResult;
pub use error::{Error, Result};
pub use llm::{CompletionRequest, LanguageModel, LlmClient};
pub use request::{
    ActionKind, CrawlLinksParams, CrawlParams, ExtractKind, ExtractParams, ExtractPdfParams,
    ExtractionSchema, FilterParams, GenerateSchemaParams, MarkdownOptions, MarkdownParams,
    OperationRequest, PdfParams, SchemaField, ScreenshotParams, StrategyKind, VerifyParams,
    WaitParams,
};
