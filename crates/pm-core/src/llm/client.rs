//! LLM API HTTP Client
//!
//! Supports both Claude API and OpenAI-compatible APIs

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::config::{LlmConfig, LlmProvider};
use crate::error::{Error, Result};

use super::types::*;

/// Single-turn completion
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
    /// `provider/model` or bare model name; the configured model when `None`
    pub model: Option<String>,
    pub max_tokens: u64,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            model: None,
            max_tokens: 4096,
        }
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn model(mut self, model: Option<String>) -> Self {
        self.model = model.filter(|m| !m.trim().is_empty());
        self
    }
}

/// Text-in, text-out language model
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

/// LLM API client (supports Claude and OpenAI-compatible APIs)
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    config: LlmConfig,
}

impl LlmClient {
    /// Create a new LLM client
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Provider, model and base URL for one call.
    ///
    /// A custom `base_url` only applies when the call targets the configured
    /// provider.
    fn resolve(&self, model: Option<&str>) -> (LlmProvider, String, String) {
        let (provider, model) = match model {
            Some(spec) => {
                let (provider, name) = LlmProvider::split_model(spec);
                (provider.unwrap_or(self.config.provider), name.to_string())
            }
            None => (self.config.provider, self.config.model.clone()),
        };

        let base_url = match &self.config.base_url {
            Some(url) if provider == self.config.provider => url.trim_end_matches('/').to_string(),
            _ => provider.default_base_url().to_string(),
        };

        (provider, model, base_url)
    }

    /// Send a message to the LLM API
    pub async fn messages(
        &self,
        request: MessagesRequest,
        provider: LlmProvider,
        base_url: &str,
    ) -> Result<MessagesResponse> {
        if self.config.api_key.is_empty() {
            return Err(Error::Config(
                "LLM_API_KEY is not set; LLM features are unavailable".to_string(),
            ));
        }

        match provider {
            LlmProvider::Claude => self.send_claude_request(request, base_url).await,
            LlmProvider::OpenAi => self.send_openai_request(request, base_url).await,
        }
    }

    /// Send request to Claude API
    async fn send_claude_request(
        &self,
        request: MessagesRequest,
        base_url: &str,
    ) -> Result<MessagesResponse> {
        let url = format!("{}/messages", base_url);

        debug!("Sending request to Claude API: {}", url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(Error::Http)?;

        let status = response.status();
        let body = response.text().await.map_err(Error::Http)?;

        if !status.is_success() {
            warn!("Claude API error: {} - {}", status, body);
            return Err(Error::LlmApi(format!("{}: {}", status, body)));
        }

        let parsed: MessagesResponse = serde_json::from_str(&body).map_err(|e| {
            Error::LlmApi(format!("Failed to parse response: {} - {}", e, body))
        })?;

        info!(
            "Claude API response: stop_reason={:?}, tokens={}",
            parsed.stop_reason,
            parsed.usage.as_ref().map(|u| u.output_tokens).unwrap_or(0)
        );

        Ok(parsed)
    }

    /// Send request to OpenAI-compatible API
    async fn send_openai_request(
        &self,
        request: MessagesRequest,
        base_url: &str,
    ) -> Result<MessagesResponse> {
        let url = format!("{}/chat/completions", base_url);

        debug!("Sending request to OpenAI-compatible API: {}", url);

        let openai_request = ChatCompletionRequest::from_claude_request(&request);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("content-type", "application/json")
            .json(&openai_request)
            .send()
            .await
            .map_err(Error::Http)?;

        let status = response.status();
        let body = response.text().await.map_err(Error::Http)?;

        if !status.is_success() {
            warn!("OpenAI API error: {} - {}", status, body);
            return Err(Error::LlmApi(format!("{}: {}", status, body)));
        }

        let openai_response: ChatCompletionResponse = serde_json::from_str(&body).map_err(|e| {
            Error::LlmApi(format!("Failed to parse response: {} - {}", e, body))
        })?;

        let parsed = openai_response.to_claude_response();

        info!(
            "OpenAI API response: stop_reason={:?}, tokens={}",
            parsed.stop_reason,
            parsed.usage.as_ref().map(|u| u.output_tokens).unwrap_or(0)
        );

        Ok(parsed)
    }
}

#[async_trait]
impl LanguageModel for LlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let (provider, model, base_url) = self.resolve(request.model.as_deref());

        let messages_request = MessagesRequest {
            model,
            max_tokens: request.max_tokens,
            system: request.system,
            messages: vec![Message::user(request.prompt)],
        };

        let response = self.messages(messages_request, provider, &base_url).await?;
        let text = response.text();

        if text.trim().is_empty() {
            return Err(Error::LlmApi("LLM returned an empty response".to_string()));
        }

        Ok(text)
    }
}
