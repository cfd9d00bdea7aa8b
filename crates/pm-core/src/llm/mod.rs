//! LLM API client and types
//!
//! Supports both the Claude Messages API and OpenAI-compatible APIs.

mod client;
mod types;

pub use client::{CompletionRequest, LanguageModel, LlmClient};
pub use types::*;
