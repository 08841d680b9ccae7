mod client;
pub(crate) mod types;

use client::{OpenAiClient, OPENAI_API_URL};
use types::{ChatRequest, WireMessage};

use crate::error::Result;

/// Sampling controls for a single chat completion.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ChatOptions {
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

// =============================================================================
// OpenAi
// =============================================================================

#[derive(Clone)]
pub struct OpenAi {
    api_key: String,
    model: String,
    embedding_model: String,
    base_url: Option<String>,
    http: reqwest::Client,
}

impl OpenAi {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            embedding_model: "text-embedding-3-small".to_string(),
            base_url: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Reuse a caller-configured HTTP client (timeouts, proxies).
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    fn client(&self) -> OpenAiClient<'_> {
        OpenAiClient::new(
            &self.api_key,
            &self.http,
            self.base_url.as_deref().unwrap_or(OPENAI_API_URL),
        )
    }

    /// Single-turn chat completion: one system message, one user message.
    pub async fn chat(
        &self,
        system: impl Into<String>,
        user: impl Into<String>,
        options: ChatOptions,
    ) -> Result<String> {
        let mut request = ChatRequest::new(&self.model)
            .message(WireMessage::system(system))
            .message(WireMessage::user(user));

        if let Some(temperature) = options.temperature {
            request = request.temperature(temperature);
        }
        if let Some(limit) = options.max_tokens {
            request = request.token_limit(limit);
        }

        self.client().chat(&request).await
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.client().embed(&self.embedding_model, text).await
    }
}
