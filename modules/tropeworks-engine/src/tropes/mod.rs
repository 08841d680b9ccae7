//! Rhetorical-device validation: structural patterns where we have them,
//! the text-generation service as judge where we don't, and a hybrid when the
//! pattern signal is ambiguous.

pub mod scoring;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::{anyhow, Result};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use ai_client::util::{extract_json_object, truncate_to_char_boundary};
use tropeworks_common::{cosine_similarity, Strength, TropeValidationResult, ValidationMethod};

use crate::deps::EngineDeps;
use crate::devices::{display_name, normalize_device_id, DeviceCorpus, TropePattern};
use crate::traits::{embed_within, generate_within, Embedder, GenerationParams, TextGenerator};

pub use scoring::{
    check_vocabulary_alignment, generate_trope_constraint_prompt, score_trope_alignment,
    trope_details, validate_trope_pattern, PatternMatch, VocabularyAlignment,
};

/// Number of content characters that participate in the cache key.
const CACHE_KEY_PREFIX_CHARS: usize = 100;
/// Below this the pattern score carries no signal worth a model call.
const AMBIGUOUS_FLOOR: f32 = 0.2;
const AI_WEIGHT_IN_HYBRID: f32 = 0.9;
const AI_FAILURE_SUGGESTION: &str = "AI validation failed, using pattern matching only";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOptions {
    pub strength: Strength,
    pub use_ai_fallback: bool,
    /// Replaces the strength-derived threshold when set.
    pub minimum_confidence_override: Option<f32>,
    /// Devices whose miss is an error rather than a warning.
    pub required: Vec<String>,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            strength: Strength::Moderate,
            use_ai_fallback: true,
            minimum_confidence_override: None,
            required: Vec::new(),
        }
    }
}

impl ValidationOptions {
    pub fn with_strength(strength: Strength) -> Self {
        Self {
            strength,
            ..Self::default()
        }
    }

    pub fn threshold(&self) -> f32 {
        self.minimum_confidence_override
            .unwrap_or_else(|| self.strength.threshold())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintViolation {
    pub device_id: String,
    pub reason: String,
    pub severity: Severity,
    pub suggestion: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiValidation {
    pub results: Vec<TropeValidationResult>,
    /// Fraction of devices satisfied, 0 for an empty request.
    pub overall_satisfaction: f32,
    pub violations: Vec<ConstraintViolation>,
}

// ---------------------------------------------------------------------------
// ValidationCache
// ---------------------------------------------------------------------------

/// Process-wide memo of validation results keyed by
/// `(device, content prefix, strength)`.
#[derive(Debug, Default)]
pub struct ValidationCache {
    entries: Mutex<HashMap<String, TropeValidationResult>>,
}

impl ValidationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(device_id: &str, content: &str, strength: Strength) -> String {
        let prefix: String = content.chars().take(CACHE_KEY_PREFIX_CHARS).collect();
        format!("{device_id}:{prefix}:{}", strength.as_str())
    }

    pub fn get(&self, key: &str) -> Option<TropeValidationResult> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    pub fn insert(&self, key: String, result: TropeValidationResult) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, result);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

/// Shape the judge is asked to reply with. Every field is optional on the wire.
#[derive(Debug, Default, Deserialize)]
struct AiVerdict {
    #[serde(default)]
    satisfied: bool,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default)]
    improvements: Vec<String>,
}

// ---------------------------------------------------------------------------
// TropeConstraintEngine
// ---------------------------------------------------------------------------

pub struct TropeConstraintEngine {
    corpus: Arc<DeviceCorpus>,
    generator: Arc<dyn TextGenerator>,
    embedder: Arc<dyn Embedder>,
    cache: Arc<ValidationCache>,
    device_embeddings: RwLock<HashMap<String, Vec<f32>>>,
    call_timeout: Duration,
}

impl TropeConstraintEngine {
    pub fn new(corpus: Arc<DeviceCorpus>, deps: &EngineDeps) -> Self {
        Self::with_cache(corpus, deps, Arc::new(ValidationCache::new()))
    }

    pub fn with_cache(corpus: Arc<DeviceCorpus>, deps: &EngineDeps, cache: Arc<ValidationCache>) -> Self {
        Self {
            corpus,
            generator: deps.generator.clone(),
            embedder: deps.embedder.clone(),
            cache,
            device_embeddings: RwLock::new(HashMap::new()),
            call_timeout: deps.call_timeout,
        }
    }

    pub fn corpus(&self) -> &DeviceCorpus {
        &self.corpus
    }

    pub fn cache(&self) -> &ValidationCache {
        &self.cache
    }

    /// Precompute embeddings of every patterned device for semantic matching.
    pub async fn initialize(&self) {
        let targets: Vec<(&'static str, String)> = crate::devices::TROPE_PATTERNS
            .values()
            .map(|p| {
                (
                    p.id,
                    format!("{}: {}. Examples: {}", p.name, p.description, p.examples.join("; ")),
                )
            })
            .collect();

        let embedded: Vec<(&'static str, Vec<f32>)> = stream::iter(targets)
            .map(|(id, text)| async move {
                (id, embed_within(self.embedder.as_ref(), self.call_timeout, &text).await)
            })
            .buffered(8)
            .collect()
            .await;

        let mut count = 0;
        if let Ok(mut map) = self.device_embeddings.write() {
            for (id, vector) in embedded.into_iter().filter(|(_, v)| !v.is_empty()) {
                map.insert(id.to_string(), vector);
            }
            count = map.len();
        }
        info!(devices = count, "Device embeddings initialized");
    }

    /// Validate `content` against one device. Never fails: model errors degrade
    /// to an unsatisfied result with a fallback suggestion.
    pub async fn validate(
        &self,
        content: &str,
        device_id: &str,
        options: &ValidationOptions,
    ) -> TropeValidationResult {
        let id = normalize_device_id(device_id);
        let key = ValidationCache::key(&id, content, options.strength);
        if let Some(cached) = self.cache.get(&key) {
            debug!(device = %id, "Validation cache hit");
            return cached;
        }

        let Some(pattern) = crate::devices::pattern_for(&id) else {
            if self.corpus.contains(&id) || options.use_ai_fallback {
                let result = self.validate_with_ai(content, &id).await;
                self.cache.insert(key, result.clone());
                return result;
            }
            return TropeValidationResult {
                device_id: id,
                device_name: device_id.to_string(),
                satisfied: false,
                confidence: 0.0,
                evidence: Vec::new(),
                suggestions: vec![format!(
                    "Unknown rhetorical device: {device_id}. Available devices: {}",
                    self.corpus.len()
                )],
                method: ValidationMethod::Pattern,
            };
        };

        let pattern_result = validate_with_patterns(content, pattern, options.threshold());
        let threshold = options.threshold();
        let ambiguous = pattern_result.confidence > AMBIGUOUS_FLOOR
            && pattern_result.confidence < threshold;

        let result = if options.use_ai_fallback && ambiguous {
            let ai = self.validate_with_ai(content, &id).await;
            let mut evidence = pattern_result.evidence;
            evidence.extend(ai.evidence);
            TropeValidationResult {
                device_id: id,
                device_name: pattern.name.to_string(),
                satisfied: pattern_result.satisfied || ai.satisfied,
                confidence: pattern_result
                    .confidence
                    .max(ai.confidence * AI_WEIGHT_IN_HYBRID),
                evidence,
                suggestions: ai.suggestions,
                method: ValidationMethod::Hybrid,
            }
        } else {
            pattern_result
        };

        self.cache.insert(key, result.clone());
        result
    }

    /// Validate several devices in order and collect violations.
    pub async fn validate_many(
        &self,
        content: &str,
        device_ids: &[String],
        options: &ValidationOptions,
    ) -> MultiValidation {
        let mut results = Vec::with_capacity(device_ids.len());
        let mut violations = Vec::new();
        let required: Vec<String> = options.required.iter().map(|d| normalize_device_id(d)).collect();

        for device_id in device_ids {
            let result = self.validate(content, device_id, options).await;
            if !result.satisfied {
                let severity = if required.contains(&normalize_device_id(device_id)) {
                    Severity::Error
                } else {
                    Severity::Warning
                };
                violations.push(ConstraintViolation {
                    device_id: device_id.clone(),
                    reason: format!("Content does not satisfy {} constraints", result.device_name),
                    severity,
                    suggestion: result.suggestions.first().cloned().unwrap_or_else(|| {
                        format!("Consider restructuring to incorporate {}", result.device_name)
                    }),
                });
            }
            results.push(result);
        }

        let overall_satisfaction = if results.is_empty() {
            0.0
        } else {
            results.iter().filter(|r| r.satisfied).count() as f32 / results.len() as f32
        };

        MultiValidation {
            results,
            overall_satisfaction,
            violations,
        }
    }

    /// Sampling weights nudging generation toward a device's vocabulary:
    /// indicator words at 1.5, structural pattern keywords at 1.2.
    pub fn vocabulary_bias(&self, device_id: &str) -> HashMap<String, f32> {
        vocabulary_bias(device_id)
    }

    /// Rank patterned devices by similarity to `content`. Empty until
    /// [`initialize`](Self::initialize) has run.
    pub async fn suggest_matching_tropes(&self, content: &str, top_k: usize) -> Vec<(String, f32)> {
        let query = embed_within(self.embedder.as_ref(), self.call_timeout, content).await;
        let mut ranked: Vec<(String, f32)> = match self.device_embeddings.read() {
            Ok(map) => map
                .iter()
                .map(|(id, v)| (id.clone(), cosine_similarity(&query, v)))
                .collect(),
            Err(_) => return Vec::new(),
        };
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(top_k);
        ranked
    }

    /// Ask the model for `count` rewrites of `content` that lean on a patterned device.
    pub async fn generate_constrained_variations(
        &self,
        content: &str,
        device_id: &str,
        count: usize,
    ) -> Result<Vec<String>> {
        let id = normalize_device_id(device_id);
        let pattern = crate::devices::pattern_for(&id)
            .ok_or_else(|| anyhow!("Unknown trope: {device_id}"))?;

        let examples = pattern
            .examples
            .iter()
            .map(|e| format!("- \"{e}\""))
            .collect::<Vec<_>>()
            .join("\n");
        let system = format!(
            "You are an expert in rhetorical devices. Rewrite content so it strongly exhibits {name}.\n\n\
             {name}: {description}\n\n\
             Examples of {name}:\n{examples}\n\n\
             Vocabulary to incorporate: {vocabulary}",
            name = pattern.name,
            description = pattern.description,
            vocabulary = pattern.vocabulary.join(", "),
        );
        let user = format!(
            "Rewrite this content {count} different ways, each strongly using {}:\n\n\"{content}\"\n\n\
             Return each variation on a new line, numbered 1-{count}.",
            pattern.name
        );

        let response = generate_within(
            self.generator.as_ref(),
            self.call_timeout,
            &system,
            &user,
            GenerationParams::new(0.8, 500),
        )
        .await?;

        Ok(split_numbered(&response)
            .into_iter()
            .filter(|v| v.chars().count() > 10)
            .take(count)
            .collect())
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    async fn validate_with_ai(&self, content: &str, device_id: &str) -> TropeValidationResult {
        let (name, description) = match self.corpus.details(device_id) {
            Some(details) => (details.name.to_string(), details.description.to_string()),
            None => (
                display_name(device_id),
                format!("The rhetorical device known as {device_id}"),
            ),
        };

        let prompt = format!(
            "Analyze if this content exhibits the rhetorical device \"{name}\":\n\n\
             {description}\n\n\
             Content: \"{content}\"\n\n\
             Respond in JSON format:\n\
             {{\n  \"satisfied\": boolean,\n  \"confidence\": number (0.0 to 1.0),\n  \
             \"explanation\": \"brief explanation\",\n  \"improvements\": [\"suggestion 1\", \"suggestion 2\"]\n}}"
        );

        let verdict = generate_within(
            self.generator.as_ref(),
            self.call_timeout,
            "You judge whether text uses a rhetorical device. Reply with JSON only.",
            &prompt,
            GenerationParams::new(0.2, 300),
        )
        .await
        .and_then(|raw| parse_verdict(&raw));

        match verdict {
            Ok(verdict) => TropeValidationResult {
                device_id: device_id.to_string(),
                device_name: name,
                satisfied: verdict.satisfied,
                confidence: verdict.confidence.clamp(0.0, 1.0),
                evidence: verdict.explanation.into_iter().collect(),
                suggestions: verdict.improvements,
                method: ValidationMethod::Ai,
            },
            Err(e) => {
                warn!(device = device_id, error = %e, "AI validation failed");
                TropeValidationResult {
                    device_id: device_id.to_string(),
                    device_name: name,
                    satisfied: false,
                    confidence: 0.0,
                    evidence: Vec::new(),
                    suggestions: vec![AI_FAILURE_SUGGESTION.to_string()],
                    method: ValidationMethod::Ai,
                }
            }
        }
    }
}

fn parse_verdict(raw: &str) -> Result<AiVerdict> {
    let json = extract_json_object(raw).ok_or_else(|| {
        anyhow!(
            "no JSON object in judge response: {}",
            truncate_to_char_boundary(raw, 120)
        )
    })?;
    Ok(serde_json::from_str(json)?)
}

fn validate_with_patterns(content: &str, pattern: &TropePattern, threshold: f32) -> TropeValidationResult {
    let evidence: Vec<String> = pattern
        .patterns
        .iter()
        .filter(|p| p.is_match(content))
        .map(|p| p.source().into_owned())
        .collect();

    let lower = content.to_lowercase();
    let matched_vocab: Vec<&str> = pattern
        .vocabulary
        .iter()
        .copied()
        .filter(|w| lower.contains(&w.to_lowercase()))
        .collect();
    let vocab_score = if pattern.vocabulary.is_empty() {
        0.0
    } else {
        matched_vocab.len() as f32 / pattern.vocabulary.len() as f32
    };

    let structural = (evidence.len() as f32 / 2.0).min(1.0);
    let confidence = structural * 0.7 + vocab_score * 0.3;
    let satisfied = confidence >= threshold;

    let mut suggestions = Vec::new();
    if !satisfied {
        if evidence.is_empty() {
            if let Some(example) = pattern.examples.first() {
                suggestions.push(format!("Try using structural patterns like: {example}"));
            }
        }
        if matched_vocab.len() < 2 {
            let words: Vec<&str> = pattern.vocabulary.iter().copied().take(5).collect();
            suggestions.push(format!("Consider incorporating words like: {}", words.join(", ")));
        }
    }

    TropeValidationResult {
        device_id: pattern.id.to_string(),
        device_name: pattern.name.to_string(),
        satisfied,
        confidence,
        evidence,
        suggestions,
        method: ValidationMethod::Pattern,
    }
}

pub fn vocabulary_bias(device_id: &str) -> HashMap<String, f32> {
    let mut bias = HashMap::new();
    let Some(pattern) = crate::devices::pattern_for(&normalize_device_id(device_id)) else {
        return bias;
    };
    for word in pattern.vocabulary {
        bias.insert(word.to_lowercase(), 1.5);
    }
    for structural in &pattern.patterns {
        for keyword in structural.keywords() {
            bias.entry(keyword).or_insert(1.2);
        }
    }
    bias
}

/// Split "1. foo\n2. bar" style output into its items.
fn split_numbered(response: &str) -> Vec<String> {
    static RE_ITEM: std::sync::LazyLock<regex::Regex> = std::sync::LazyLock::new(|| {
        regex::Regex::new(r"(?m)(?:^|\n)\s*\d+\.\s*").expect("valid numbered-list regex")
    });
    RE_ITEM
        .split(response)
        .map(|v| v.trim().trim_matches('"').trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}
