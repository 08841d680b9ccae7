//! Collaborator seams. Every external service the pipeline touches sits
//! behind one of these traits so the whole pipeline runs against mocks.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::warn;

use tropeworks_common::GenerationTrajectory;

/// Sampling controls for one generation call.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GenerationParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl GenerationParams {
    pub fn new(temperature: f32, max_tokens: u32) -> Self {
        Self {
            temperature: Some(temperature),
            max_tokens: Some(max_tokens),
        }
    }
}

/// Text generation. Must tolerate many concurrent calls.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, system: &str, user: &str, params: GenerationParams)
        -> Result<String>;
}

/// Text embedding. Never fails: implementations return a zero vector on error.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Vec<f32>;
}

/// Per-device usage counters, keyed by normalized device id.
#[async_trait]
pub trait UsageCounterStore: Send + Sync {
    async fn usage_counts(&self) -> Result<HashMap<String, u32>>;
    async fn increment(&self, device_ids: &[String]) -> Result<()>;
}

/// Append-only sink for completed trajectories.
#[async_trait]
pub trait TrajectoryStore: Send + Sync {
    async fn save(&self, trajectory: &GenerationTrajectory) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Deadline helpers
// ---------------------------------------------------------------------------

/// Run one generation call under a deadline. A timeout is reported as an
/// ordinary error so callers degrade the same way as for any other failure.
pub async fn generate_within(
    generator: &dyn TextGenerator,
    deadline: Duration,
    system: &str,
    user: &str,
    params: GenerationParams,
) -> Result<String> {
    match tokio::time::timeout(deadline, generator.generate(system, user, params)).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!(
            "generation call timed out after {}s",
            deadline.as_secs_f32()
        )),
    }
}

/// Embed under a deadline; a timeout yields an empty vector, which every
/// similarity helper treats as "no signal".
pub async fn embed_within(embedder: &dyn Embedder, deadline: Duration, text: &str) -> Vec<f32> {
    match tokio::time::timeout(deadline, embedder.embed(text)).await {
        Ok(vector) => vector,
        Err(_) => {
            warn!(deadline_secs = deadline.as_secs_f32(), "Embedding call timed out");
            Vec::new()
        }
    }
}

/// Read usage counts, treating a missing or failing store as all zeros.
pub async fn usage_or_empty(store: Option<&dyn UsageCounterStore>) -> HashMap<String, u32> {
    let Some(store) = store else {
        return HashMap::new();
    };
    match store.usage_counts().await {
        Ok(counts) => counts,
        Err(e) => {
            warn!(error = %e, "Failed to read device usage counts, assuming none");
            HashMap::new()
        }
    }
}
