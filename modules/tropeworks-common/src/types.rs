use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Personas
// =============================================================================

/// A fixed creative viewpoint used to diversify generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub perspective: String,
    pub vocabulary_bias: Vec<String>,
    /// Added to the base sampling temperature.
    pub temperature_modifier: f32,
    /// Appended to the system prompt when this persona is active.
    pub directive: String,
}

// =============================================================================
// Validation settings
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strength {
    Loose,
    #[default]
    Moderate,
    Strict,
}

impl Strength {
    pub fn threshold(self) -> f32 {
        match self {
            Strength::Loose => 0.3,
            Strength::Moderate => 0.5,
            Strength::Strict => 0.7,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Strength::Loose => "loose",
            Strength::Moderate => "moderate",
            Strength::Strict => "strict",
        }
    }
}

impl FromStr for Strength {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "loose" => Ok(Strength::Loose),
            "moderate" => Ok(Strength::Moderate),
            "strict" => Ok(Strength::Strict),
            other => Err(format!("unknown validation strength: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreativityLevel {
    Conservative,
    #[default]
    Balanced,
    Experimental,
}

impl CreativityLevel {
    /// Base sampling temperature for final variant generation.
    pub fn base_temperature(self) -> f32 {
        match self {
            CreativityLevel::Conservative => 0.8,
            CreativityLevel::Balanced => 1.0,
            CreativityLevel::Experimental => 1.3,
        }
    }

    /// Temperature ceiling for divergent exploration.
    pub fn max_divergent_temperature(self) -> f32 {
        match self {
            CreativityLevel::Conservative => 1.2,
            CreativityLevel::Balanced => 1.5,
            CreativityLevel::Experimental => 1.8,
        }
    }
}

impl FromStr for CreativityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "conservative" => Ok(CreativityLevel::Conservative),
            "balanced" => Ok(CreativityLevel::Balanced),
            "experimental" => Ok(CreativityLevel::Experimental),
            other => Err(format!("unknown creativity level: {other}")),
        }
    }
}

// =============================================================================
// Token / block state
// =============================================================================

/// Decoding state of a token or block, ordered from fully masked to decoded.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenState {
    #[default]
    Mask,
    SoftMaskV,
    SoftV,
    Decoded,
}

impl TokenState {
    pub fn rank(self) -> u8 {
        match self {
            TokenState::Mask => 0,
            TokenState::SoftMaskV => 1,
            TokenState::SoftV => 2,
            TokenState::Decoded => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TokenState::Mask => "MASK",
            TokenState::SoftMaskV => "SOFT_MASK_V",
            TokenState::SoftV => "SOFT_V",
            TokenState::Decoded => "DECODED",
        }
    }
}

impl fmt::Display for TokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probability mass over candidate words. Sorted by word for deterministic
/// iteration and serialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VocabDistribution(BTreeMap<String, f32>);

impl VocabDistribution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f32)>,
        S: Into<String>,
    {
        Self(pairs.into_iter().map(|(w, p)| (w.into(), p)).collect())
    }

    pub fn insert(&mut self, word: impl Into<String>, probability: f32) {
        self.0.insert(word.into(), probability);
    }

    pub fn get(&self, word: &str) -> Option<f32> {
        self.0.get(word).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.0.iter().map(|(w, p)| (w.as_str(), *p))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut f32)> {
        self.0.iter_mut()
    }

    pub fn total(&self) -> f32 {
        self.0.values().sum()
    }

    /// Rescale so probabilities sum to 1. A zero-mass distribution is left as is.
    pub fn normalize(&mut self) {
        let total = self.total();
        if total > 0.0 {
            for p in self.0.values_mut() {
                *p /= total;
            }
        }
    }

    /// Highest-probability words, ties broken alphabetically.
    pub fn top(&self, n: usize) -> Vec<(String, f32)> {
        let mut entries: Vec<(String, f32)> =
            self.0.iter().map(|(w, p)| (w.clone(), *p)).collect();
        entries.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries.truncate(n);
        entries
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftToken {
    pub position: usize,
    pub state: TokenState,
    pub distribution: VocabDistribution,
    pub embedding: Vec<f32>,
    /// 1.0 is fully masked, 0.0 fully decoded.
    pub alpha: f32,
    pub committed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlockName {
    Headline,
    Tagline,
    BodyCopy,
    VisualConcept,
    RhetoricalCraft,
    #[serde(untagged)]
    Custom(String),
}

impl BlockName {
    pub const STANDARD: [BlockName; 5] = [
        BlockName::Headline,
        BlockName::Tagline,
        BlockName::BodyCopy,
        BlockName::VisualConcept,
        BlockName::RhetoricalCraft,
    ];

    /// Fixed number of soft tokens allocated for a block of this kind.
    pub fn token_budget(&self) -> usize {
        match self {
            BlockName::Headline => 5,
            BlockName::Tagline => 8,
            BlockName::BodyCopy => 50,
            BlockName::VisualConcept => 30,
            BlockName::RhetoricalCraft => 40,
            BlockName::Custom(_) => 20,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            BlockName::Headline => "headline",
            BlockName::Tagline => "tagline",
            BlockName::BodyCopy => "bodyCopy",
            BlockName::VisualConcept => "visualConcept",
            BlockName::RhetoricalCraft => "rhetoricalCraft",
            BlockName::Custom(name) => name,
        }
    }
}

impl fmt::Display for BlockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named content unit of a concept, evolved independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionBlock {
    pub id: String,
    pub name: BlockName,
    pub tokens: Vec<SoftToken>,
    pub state: TokenState,
    pub trope_constraints: Vec<String>,
    pub coherence: f32,
    pub committed: bool,
    pub content: Option<String>,
    pub regression_count: u32,
}

impl EvolutionBlock {
    /// Mean alpha across tokens, or 1.0 for an empty block.
    pub fn mean_alpha(&self) -> f32 {
        if self.tokens.is_empty() {
            return 1.0;
        }
        self.tokens.iter().map(|t| t.alpha).sum::<f32>() / self.tokens.len() as f32
    }
}

// =============================================================================
// Divergent exploration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreativeSeed {
    pub id: Uuid,
    pub idea: String,
    pub persona_id: String,
    pub distinctiveness: f32,
    pub coherence: f32,
    /// At most five device ids, never empty.
    pub compatible_devices: Vec<String>,
    /// Only populated when seed embedding is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolMetrics {
    pub total_generated: usize,
    pub unique_after_dedup: usize,
    pub average_distinctiveness: f32,
    pub persona_distribution: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivergentPool {
    pub seeds: Vec<CreativeSeed>,
    pub brief: String,
    pub theme: String,
    pub metrics: PoolMetrics,
}

// =============================================================================
// Trope validation
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMethod {
    Pattern,
    Ai,
    Hybrid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TropeValidationResult {
    pub device_id: String,
    pub device_name: String,
    pub satisfied: bool,
    pub confidence: f32,
    pub evidence: Vec<String>,
    pub suggestions: Vec<String>,
    pub method: ValidationMethod,
}

// =============================================================================
// Trajectories
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryStep {
    pub step_index: usize,
    pub block_id: String,
    pub previous_state: TokenState,
    pub new_state: TokenState,
    pub alpha: f32,
    pub arbiter_score: f32,
    pub trope_results: Vec<TropeValidationResult>,
    /// Top candidate words per token position.
    pub token_distributions: Vec<Vec<(String, f32)>>,
    pub selected_tokens: Vec<String>,
    pub loss: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryMetadata {
    pub model_version: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub total_tokens: usize,
    pub evolution_cycles: u32,
    pub regression_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationTrajectory {
    pub id: Uuid,
    pub session_id: String,
    pub brief: String,
    pub theme: String,
    pub seed_id: String,
    pub steps: Vec<TrajectoryStep>,
    pub final_output: String,
    pub final_score: f32,
    pub total_loss: f32,
    pub metadata: TrajectoryMetadata,
}

// =============================================================================
// Concept variants
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantScores {
    pub originality: f32,
    pub trope_alignment: f32,
    pub coherence: f32,
    pub distinctiveness: f32,
    pub overall: f32,
}

impl VariantScores {
    /// Unweighted mean of the four criteria.
    pub fn with_overall(mut self) -> Self {
        self.overall =
            (self.originality + self.trope_alignment + self.coherence + self.distinctiveness) / 4.0;
        self
    }

    pub fn uniform(score: f32) -> Self {
        Self {
            originality: score,
            trope_alignment: score,
            coherence: score,
            distinctiveness: score,
            overall: score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionSummary {
    pub cycles: u32,
    pub regressions: u32,
    pub global_coherence: f32,
    pub blocks: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptVariant {
    pub id: Uuid,
    pub variant_index: usize,
    pub visual_description: String,
    pub headlines: Vec<String>,
    pub tagline: Option<String>,
    pub body_copy: Option<String>,
    pub rhetorical_device: String,
    pub device_definition: String,
    pub rhetorical_analysis: Option<String>,
    pub strategic_impact: Option<String>,
    pub scores: VariantScores,
    pub evolution_path: Option<EvolutionSummary>,
    pub seed_origin: Option<String>,
}

impl ConceptVariant {
    pub fn headline(&self) -> &str {
        self.headlines.first().map(String::as_str).unwrap_or_default()
    }

    /// Every text field joined, for lexical scoring.
    pub fn combined_text(&self) -> String {
        let mut parts: Vec<&str> = self.headlines.iter().map(String::as_str).collect();
        parts.extend(self.tagline.as_deref());
        parts.push(&self.visual_description);
        parts.extend(self.body_copy.as_deref());
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_states_are_ordered_by_decodedness() {
        assert!(TokenState::Mask < TokenState::SoftMaskV);
        assert!(TokenState::SoftMaskV < TokenState::SoftV);
        assert!(TokenState::SoftV < TokenState::Decoded);
        assert_eq!(TokenState::Decoded.rank(), 3);
    }

    #[test]
    fn token_state_serializes_screaming_case() {
        let json = serde_json::to_string(&TokenState::SoftMaskV).unwrap();
        assert_eq!(json, "\"SOFT_MASK_V\"");
    }

    #[test]
    fn block_budgets() {
        assert_eq!(BlockName::Headline.token_budget(), 5);
        assert_eq!(BlockName::Tagline.token_budget(), 8);
        assert_eq!(BlockName::BodyCopy.token_budget(), 50);
        assert_eq!(BlockName::VisualConcept.token_budget(), 30);
        assert_eq!(BlockName::RhetoricalCraft.token_budget(), 40);
        assert_eq!(BlockName::Custom("cta".into()).token_budget(), 20);
    }

    #[test]
    fn distribution_top_and_normalize() {
        let mut dist = VocabDistribution::from_pairs([("yet", 2.0), ("but", 1.0), ("and", 1.0)]);
        dist.normalize();
        assert!((dist.total() - 1.0).abs() < 1e-6);
        let top = dist.top(2);
        assert_eq!(top[0].0, "yet");
        // tie broken alphabetically
        assert_eq!(top[1].0, "and");
    }

    #[test]
    fn strength_thresholds_and_parsing() {
        assert_eq!(Strength::Loose.threshold(), 0.3);
        assert_eq!(Strength::Moderate.threshold(), 0.5);
        assert_eq!(Strength::Strict.threshold(), 0.7);
        assert_eq!("STRICT".parse::<Strength>().unwrap(), Strength::Strict);
        assert!("extreme".parse::<Strength>().is_err());
    }

    #[test]
    fn creativity_temperatures() {
        assert_eq!(CreativityLevel::Conservative.base_temperature(), 0.8);
        assert_eq!(CreativityLevel::Experimental.max_divergent_temperature(), 1.8);
        assert_eq!(CreativityLevel::default(), CreativityLevel::Balanced);
    }

    #[test]
    fn overall_is_mean_of_criteria() {
        let scores = VariantScores {
            originality: 0.8,
            trope_alignment: 0.4,
            coherence: 1.0,
            distinctiveness: 0.6,
            overall: 0.0,
        }
        .with_overall();
        assert!((scores.overall - 0.7).abs() < 1e-6);
    }
}
