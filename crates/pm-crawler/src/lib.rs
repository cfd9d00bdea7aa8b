//! pm-crawler: page operations on a shared headless browser
//!
//! [`Operations`] implements every operation on top of the browser session
//! manager from pm-browser. [`Dispatcher`] maps an [`OperationRequest`] or a
//! raw job payload onto it and always answers with an [`OperationResult`].
//!
//! [`OperationRequest`]: pm_core::OperationRequest
//! [`OperationResult`]: pm_core::OperationResult

pub mod artifacts;
pub mod condition;
pub mod dispatcher;
pub mod document;
pub mod error;
pub mod executor;
pub mod extractor;
pub mod links;
pub mod page;

pub use artifacts::{ArtifactKind, ArtifactStore, StoredArtifact};
pub use condition::FilterCondition;
pub use dispatcher::Dispatcher;
pub use document::{DocumentFetcher, FetchedDocument, HttpFetcher, PdfDecoder, PdfTextDecoder};
pub use error::{CrawlError, Result};
pub use executor::Operations;
pub use extractor::{
    BrowserExtractor, ContentExtractor, ExtractedContent, ExtractionStrategy, RenderedMarkdown,
};
pub use links::{LinkSet, resolve_href};
