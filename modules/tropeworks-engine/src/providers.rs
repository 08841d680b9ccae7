use std::sync::atomic::{AtomicUsize, Ordering};

use ai_client::{ChatOptions, OpenAi};
use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use tropeworks_common::Config;

use crate::traits::{Embedder, GenerationParams, TextGenerator};

/// Dimension of `text-embedding-3-small`, used until a real vector is seen.
const DEFAULT_EMBEDDING_DIM: usize = 1536;

fn client_from_config(config: &Config) -> Result<OpenAi> {
    let http = reqwest_client(config)?;
    let mut client = OpenAi::new(&config.openai_api_key, &config.chat_model)
        .with_embedding_model(&config.embedding_model)
        .with_http_client(http);
    if let Some(ref base) = config.api_base {
        client = client.with_base_url(base);
    }
    Ok(client)
}

fn reqwest_client(config: &Config) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(config.call_timeout)
        .build()?)
}

// =============================================================================
// OpenAiGenerator
// =============================================================================

pub struct OpenAiGenerator {
    client: OpenAi,
}

impl OpenAiGenerator {
    pub fn new(client: OpenAi) -> Self {
        Self { client }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(client_from_config(config)?))
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn generate(
        &self,
        system: &str,
        user: &str,
        params: GenerationParams,
    ) -> Result<String> {
        let mut options = ChatOptions::default();
        if let Some(t) = params.temperature {
            options = options.temperature(t);
        }
        if let Some(m) = params.max_tokens {
            options = options.max_tokens(m);
        }
        Ok(self.client.chat(system, user, options).await?)
    }
}

// =============================================================================
// OpenAiEmbedder
// =============================================================================

pub struct OpenAiEmbedder {
    client: OpenAi,
    dimension: AtomicUsize,
}

impl OpenAiEmbedder {
    pub fn new(client: OpenAi) -> Self {
        Self {
            client,
            dimension: AtomicUsize::new(DEFAULT_EMBEDDING_DIM),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(client_from_config(config)?))
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Vec<f32> {
        match self.client.embed(text).await {
            Ok(vector) => {
                self.dimension.store(vector.len(), Ordering::Relaxed);
                vector
            }
            Err(e) => {
                warn!(error = %e, model = self.client.embedding_model(), "Embedding failed, using zero vector");
                vec![0.0; self.dimension.load(Ordering::Relaxed)]
            }
        }
    }
}
