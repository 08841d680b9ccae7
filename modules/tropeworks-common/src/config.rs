use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::TropeworksError;
use crate::types::{CreativityLevel, Strength};

const DEFAULT_CHAT_MODEL: &str = "gpt-4o";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 60;

/// Process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Model provider
    pub openai_api_key: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub api_base: Option<String>,

    // Data
    pub device_corpus_path: Option<PathBuf>,
    pub trajectory_log_path: Option<PathBuf>,

    /// Deadline applied to every external generation/embedding call.
    pub call_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, TropeworksError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, TropeworksError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| {
                    TropeworksError::Config(format!("{key} environment variable is required"))
                })
        };

        let call_timeout = match lookup("TROPEWORKS_CALL_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                TropeworksError::Config(format!(
                    "TROPEWORKS_CALL_TIMEOUT_SECS must be a number, got {raw:?}"
                ))
            })?,
            None => DEFAULT_CALL_TIMEOUT_SECS,
        };

        Ok(Self {
            openai_api_key: required("OPENAI_API_KEY")?,
            chat_model: lookup("TROPEWORKS_CHAT_MODEL")
                .unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            embedding_model: lookup("TROPEWORKS_EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            api_base: lookup("TROPEWORKS_API_BASE"),
            device_corpus_path: lookup("TROPEWORKS_DEVICE_CORPUS").map(PathBuf::from),
            trajectory_log_path: lookup("TROPEWORKS_TRAJECTORY_LOG").map(PathBuf::from),
            call_timeout: Duration::from_secs(call_timeout),
        })
    }

    /// Log the loaded configuration with the API key masked.
    pub fn log_redacted(&self) {
        info!(
            openai_api_key = %redact(&self.openai_api_key),
            chat_model = self.chat_model.as_str(),
            embedding_model = self.embedding_model.as_str(),
            api_base = self.api_base.as_deref().unwrap_or("(default)"),
            device_corpus = ?self.device_corpus_path,
            trajectory_log = ?self.trajectory_log_path,
            call_timeout_secs = self.call_timeout.as_secs(),
            "Loaded configuration"
        );
    }
}

fn redact(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("{visible}****")
    }
}

// =============================================================================
// Orchestrator configuration
// =============================================================================

/// Feature switches and tuning for the generation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub enable_divergent_exploration: bool,
    pub enable_progressive_evolution: bool,
    pub enable_trajectory_capture: bool,
    pub enable_trope_constraints: bool,
    pub fallback_to_legacy: bool,
    pub divergent_pool_size: usize,
    pub max_evolution_cycles: u32,
    pub trope_validation_strength: Strength,
    pub creativity_level: CreativityLevel,
    /// Upper bound on in-flight generation calls per fan-out stage.
    pub fanout_concurrency: usize,
    /// Compute seed embeddings so the similarity dedup check is active.
    pub embed_seeds: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enable_divergent_exploration: true,
            enable_progressive_evolution: false,
            enable_trajectory_capture: true,
            enable_trope_constraints: true,
            fallback_to_legacy: true,
            divergent_pool_size: 15,
            max_evolution_cycles: 50,
            trope_validation_strength: Strength::Moderate,
            creativity_level: CreativityLevel::Balanced,
            fanout_concurrency: 8,
            embed_seeds: false,
        }
    }
}

/// Per-request partial overrides, merged over the orchestrator defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorOverrides {
    pub enable_divergent_exploration: Option<bool>,
    pub enable_progressive_evolution: Option<bool>,
    pub enable_trajectory_capture: Option<bool>,
    pub enable_trope_constraints: Option<bool>,
    pub fallback_to_legacy: Option<bool>,
    pub divergent_pool_size: Option<usize>,
    pub max_evolution_cycles: Option<u32>,
    pub trope_validation_strength: Option<Strength>,
    pub creativity_level: Option<CreativityLevel>,
    pub embed_seeds: Option<bool>,
}

impl OrchestratorConfig {
    pub fn merged(&self, overrides: &OrchestratorOverrides) -> Self {
        Self {
            enable_divergent_exploration: overrides
                .enable_divergent_exploration
                .unwrap_or(self.enable_divergent_exploration),
            enable_progressive_evolution: overrides
                .enable_progressive_evolution
                .unwrap_or(self.enable_progressive_evolution),
            enable_trajectory_capture: overrides
                .enable_trajectory_capture
                .unwrap_or(self.enable_trajectory_capture),
            enable_trope_constraints: overrides
                .enable_trope_constraints
                .unwrap_or(self.enable_trope_constraints),
            fallback_to_legacy: overrides
                .fallback_to_legacy
                .unwrap_or(self.fallback_to_legacy),
            divergent_pool_size: overrides
                .divergent_pool_size
                .unwrap_or(self.divergent_pool_size),
            max_evolution_cycles: overrides
                .max_evolution_cycles
                .unwrap_or(self.max_evolution_cycles),
            trope_validation_strength: overrides
                .trope_validation_strength
                .unwrap_or(self.trope_validation_strength),
            creativity_level: overrides.creativity_level.unwrap_or(self.creativity_level),
            fanout_concurrency: self.fanout_concurrency,
            embed_seeds: overrides.embed_seeds.unwrap_or(self.embed_seeds),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_key_is_set() {
        let config = Config::from_lookup(lookup(&[("OPENAI_API_KEY", "sk-abcdefghijkl")])).unwrap();
        assert_eq!(config.chat_model, "gpt-4o");
        assert_eq!(config.embedding_model, "text-embedding-3-small");
        assert_eq!(config.call_timeout, Duration::from_secs(60));
        assert!(config.api_base.is_none());
        assert!(config.device_corpus_path.is_none());
    }

    #[test]
    fn missing_key_is_a_config_error() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, TropeworksError::Config(_)));
    }

    #[test]
    fn bad_timeout_is_rejected() {
        let err = Config::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-abcdefghijkl"),
            ("TROPEWORKS_CALL_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("TROPEWORKS_CALL_TIMEOUT_SECS"));
    }

    #[test]
    fn overrides_env_values() {
        let config = Config::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-abcdefghijkl"),
            ("TROPEWORKS_CHAT_MODEL", "gpt-4o-mini"),
            ("TROPEWORKS_DEVICE_CORPUS", "/data/figures.json"),
            ("TROPEWORKS_CALL_TIMEOUT_SECS", "15"),
        ]))
        .unwrap();
        assert_eq!(config.chat_model, "gpt-4o-mini");
        assert_eq!(
            config.device_corpus_path,
            Some(PathBuf::from("/data/figures.json"))
        );
        assert_eq!(config.call_timeout, Duration::from_secs(15));
    }

    #[test]
    fn redaction_hides_most_of_the_key() {
        assert_eq!(redact("sk-abcdefghijkl"), "sk-a****");
        assert_eq!(redact("short"), "****");
    }

    #[test]
    fn orchestrator_defaults() {
        let config = OrchestratorConfig::default();
        assert!(config.enable_divergent_exploration);
        assert!(!config.enable_progressive_evolution);
        assert!(config.fallback_to_legacy);
        assert_eq!(config.divergent_pool_size, 15);
        assert_eq!(config.max_evolution_cycles, 50);
    }

    #[test]
    fn overrides_merge_over_defaults() {
        let merged = OrchestratorConfig::default().merged(&OrchestratorOverrides {
            enable_progressive_evolution: Some(true),
            divergent_pool_size: Some(5),
            ..Default::default()
        });
        assert!(merged.enable_progressive_evolution);
        assert_eq!(merged.divergent_pool_size, 5);
        assert!(merged.enable_trajectory_capture);
        assert_eq!(merged.creativity_level, CreativityLevel::Balanced);
    }
}
