//! Top-level generation pipeline.
//!
//! Phases, in order:
//! 1. divergent exploration and seed selection (optional)
//! 2. progressive evolution of the seed (optional, off by default)
//! 3. concurrent variant generation under device constraints
//! 4. scoring, re-validation of requested devices, usage recording
//!
//! Any error out of the phases drops to a single-call-per-variant legacy path
//! when `fallback_to_legacy` is set, so callers get output rather than errors.

pub mod parse;
pub mod scoring;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use tropeworks_common::{
    ConceptVariant, CreativeSeed, DivergentPool, OrchestratorConfig, OrchestratorOverrides,
    Persona, TropeworksError, VariantScores,
};

use crate::deps::EngineDeps;
use crate::devices::variety::{Tone, VarietyOptions, VarietySelector};
use crate::devices::{normalize_device_id, DeviceCorpus};
use crate::divergent::{extract_theme, select_creative_seed, DivergentExplorer, ExploreOptions, SeedCriteria};
use crate::evolution::arbiter::HeuristicArbiter;
use crate::evolution::{EvolutionResult, ProgressiveEvolutionEngine, DEFAULT_MAX_ITERATIONS};
use crate::personas::{persona_by_id, personas};
use crate::traits::{generate_within, GenerationParams};
use crate::trajectory::{KvCacheManager, TrajectoryCapture};
use crate::tropes::{generate_trope_constraint_prompt, TropeConstraintEngine, ValidationOptions};

use self::parse::{parse_variant, ParsedVariant};

const SYSTEM_PROMPT: &str = "You are an award-winning creative director. You write advertising \
concepts that are visually specific, rhetorically deliberate and impossible to mistake for \
anyone else's work.";

const LEGACY_SYSTEM_PROMPT: &str = "You are a creative director writing advertising concepts.";

const VARIANT_MAX_TOKENS: u32 = 800;
const LEGACY_MAX_TOKENS: u32 = 500;
const LEGACY_TEMPERATURE: f32 = 1.0;
const LEGACY_VISUAL_CHARS: usize = 200;
const LEGACY_PLACEHOLDER_VISUAL: &str = "Visual concept unavailable; generation service did not respond.";
const LEGACY_DEVICE: &str = "metaphor";
const NEUTRAL_SCORE: f32 = 0.5;

/// Used when variety selection comes back empty.
const FALLBACK_DEVICES: [&str; 2] = ["metaphor", "antithesis"];

/// One setting per variant index, so no two variants in a batch share a scene.
const VISUAL_SETTINGS: [&str; 10] = [
    "an industrial or mechanical space",
    "a wild natural landscape far from any city",
    "a microscopic or macro-scale world",
    "a specific historical era",
    "a surreal, physically impossible space",
    "a domestic interior with one wrong detail",
    "an underwater or aerial vantage point",
    "a public ritual or crowd event",
    "a laboratory or workshop",
    "a transit space such as a station, port or highway",
];

/// Settings the model falls back to when left alone.
const FORBIDDEN_SETTINGS: [&str; 6] = [
    "a modern office",
    "a coffee shop",
    "a city street at night",
    "a minimalist white studio",
    "a beach at sunset",
    "a person staring at a smartphone",
];

const FLAVORS: [&str; 3] = ["boldest", "most emotionally resonant", "most strategically sharp"];

const RESPONSE_FORMAT: &str = "Respond in exactly this format:
# [Main headline]
## [Tagline]

**Visual Concept:** [one vivid paragraph describing the image]

**Body Copy:** [two or three sentences]

**Headlines:**
- Option 1: [headline]
- Option 2: [headline]
- Option 3: [headline]

**Rhetorical Analysis:** [how the assigned device works in this concept]

**Strategic Impact:** [why this moves the audience]";

// =============================================================================
// Input / output
// =============================================================================

#[derive(Debug, Clone, TypedBuilder, Serialize, Deserialize)]
pub struct GenerationInput {
    #[builder(setter(into))]
    pub brief: String,
    #[builder(default = "creative".to_string(), setter(into))]
    pub tone: String,
    /// Explicit devices; when absent, variety selection picks them.
    #[builder(default, setter(strip_option))]
    pub requested_devices: Option<Vec<String>>,
    #[builder(default = 3)]
    pub variant_count: usize,
    #[builder(default = Uuid::new_v4().to_string(), setter(into))]
    pub session_id: String,
    #[builder(default)]
    pub overrides: OrchestratorOverrides,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    Hybrid,
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetadata {
    pub mode: GenerationMode,
    pub divergent_pool_size: usize,
    pub selected_seed_id: Option<Uuid>,
    pub evolution_cycles: u32,
    pub trajectory_id: Option<Uuid>,
    pub generation_time_ms: u64,
    pub creativity_score: f32,
    pub selected_devices: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    /// Best first, at most the requested count.
    pub variants: Vec<ConceptVariant>,
    pub metadata: GenerationMetadata,
}

// =============================================================================
// Prompting
// =============================================================================

/// Request-wide prompt material shared by every variant.
struct VariantContext<'a> {
    brief: &'a str,
    tone: &'a str,
    seed: Option<&'a CreativeSeed>,
    evolution_draft: Option<String>,
    constraint_prompt: Option<String>,
}

#[derive(Debug, Clone)]
struct VariantPlan {
    index: usize,
    device: String,
    persona: &'static Persona,
}

fn variant_prompt(ctx: &VariantContext<'_>, plan: &VariantPlan) -> String {
    let mut prompt = format!("Brief: {}\nTone: {}\n", ctx.brief, ctx.tone);

    if let Some(seed) = ctx.seed {
        prompt.push_str(&format!("\nCreative seed to build from:\n{}\n", seed.idea));
    }
    if let Some(draft) = &ctx.evolution_draft {
        prompt.push_str(&format!("\nRefined draft to sharpen, not copy:\n{draft}\n"));
    }
    if let Some(constraints) = &ctx.constraint_prompt {
        prompt.push_str(&format!("\n{constraints}\n"));
    }

    prompt.push_str(&format!(
        "\nMANDATORY: the concept must be built on the rhetorical device \"{}\". \
Name it in the rhetorical analysis.\n",
        plan.device
    ));
    prompt.push_str(&format!(
        "Set the visual in {}.\nDo not use any of these settings: {}.\n",
        VISUAL_SETTINGS[plan.index % VISUAL_SETTINGS.len()],
        FORBIDDEN_SETTINGS.join("; ")
    ));
    prompt.push_str(&format!(
        "Make this the {} concept you can write.\n\n{RESPONSE_FORMAT}",
        FLAVORS[plan.index % FLAVORS.len()]
    ));
    prompt
}

fn legacy_prompt(input: &GenerationInput) -> String {
    format!(
        "Create an advertising concept for: {}\nTone: {}\n\nProvide a visual description and 3 headline options.",
        input.brief, input.tone
    )
}

// =============================================================================
// HybridGenerationOrchestrator
// =============================================================================

pub struct HybridGenerationOrchestrator {
    deps: EngineDeps,
    config: OrchestratorConfig,
    corpus: Arc<DeviceCorpus>,
    tropes: Arc<TropeConstraintEngine>,
    explorer: DivergentExplorer,
    variety: VarietySelector,
    kv_cache: Arc<KvCacheManager>,
    initialized: OnceCell<()>,
}

impl HybridGenerationOrchestrator {
    pub fn new(deps: EngineDeps, corpus: Arc<DeviceCorpus>, config: OrchestratorConfig) -> Self {
        Self {
            tropes: Arc::new(TropeConstraintEngine::new(corpus.clone(), &deps)),
            explorer: DivergentExplorer::new(deps.clone(), corpus.clone()),
            variety: VarietySelector::new(corpus.clone(), deps.usage_store.clone()),
            kv_cache: Arc::new(KvCacheManager::default()),
            initialized: OnceCell::new(),
            deps,
            config,
            corpus,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn corpus(&self) -> &DeviceCorpus {
        &self.corpus
    }

    pub fn variety(&self) -> &VarietySelector {
        &self.variety
    }

    pub fn trope_engine(&self) -> &TropeConstraintEngine {
        &self.tropes
    }

    /// Precompute device embeddings. Runs once per orchestrator no matter
    /// how many requests race into it.
    pub async fn initialize(&self) {
        self.initialized
            .get_or_init(|| async {
                info!(devices = self.corpus.len(), "Initializing generation pipeline");
                self.tropes.initialize().await;
            })
            .await;
    }

    pub async fn generate(&self, input: &GenerationInput) -> Result<GenerationOutput, TropeworksError> {
        self.initialize().await;
        let config = self.config.merged(&input.overrides);
        let started = Instant::now();

        match self.generate_hybrid(input, &config, started).await {
            Ok(output) => Ok(output),
            Err(e) if config.fallback_to_legacy => {
                warn!(error = %e, session_id = %input.session_id, "Hybrid generation failed, falling back to legacy");
                Ok(self.legacy_fallback(input, &config, started).await)
            }
            Err(e) => {
                error!(error = %e, session_id = %input.session_id, "Hybrid generation failed");
                Err(e)
            }
        }
    }

    async fn generate_hybrid(
        &self,
        input: &GenerationInput,
        config: &OrchestratorConfig,
        started: Instant,
    ) -> Result<GenerationOutput, TropeworksError> {
        let variant_count = input.variant_count.max(1);
        info!(
            session_id = %input.session_id,
            variants = variant_count,
            explore = config.enable_divergent_exploration,
            evolve = config.enable_progressive_evolution,
            "Starting hybrid generation"
        );

        // Phase 1: divergent exploration
        let (pool, seed) = if config.enable_divergent_exploration {
            let (pool, seed) = self.explore(&input.brief, config).await?;
            (Some(pool), Some(seed))
        } else {
            (None, None)
        };

        let theme = pool
            .as_ref()
            .map(|p| p.theme.clone())
            .unwrap_or_else(|| extract_theme(&input.brief));
        let seed_id = seed.as_ref().map(|s| s.id.to_string());
        let capture = config.enable_trajectory_capture.then(|| {
            Arc::new(TrajectoryCapture::start(
                &input.session_id,
                &input.brief,
                &theme,
                seed_id.as_deref().unwrap_or("legacy"),
            ))
        });

        // Phase 2: progressive evolution
        let evolution = match (&seed, config.enable_progressive_evolution) {
            (Some(seed), true) => Some(self.evolve(seed, config, capture.clone()).await?),
            (None, true) => {
                debug!("Evolution enabled without a seed, skipping");
                None
            }
            _ => None,
        };

        // Phase 3: variant generation
        let devices = self.choose_devices(input, variant_count).await;
        let ctx = VariantContext {
            brief: &input.brief,
            tone: &input.tone,
            seed: seed.as_ref(),
            evolution_draft: evolution
                .as_ref()
                .map(EvolutionResult::final_output)
                .filter(|draft| !draft.is_empty()),
            constraint_prompt: config
                .enable_trope_constraints
                .then(|| generate_trope_constraint_prompt(&self.corpus, &devices)),
        };
        let seed_persona = seed.as_ref().and_then(|s| persona_by_id(&s.persona_id));
        let plans: Vec<VariantPlan> = (0..variant_count)
            .map(|index| VariantPlan {
                index,
                device: devices[index % devices.len()].clone(),
                persona: seed_persona.unwrap_or_else(|| &personas()[index % personas().len()]),
            })
            .collect();

        let parsed: Vec<Option<(VariantPlan, ParsedVariant)>> = stream::iter(plans)
            .map(|plan| {
                let ctx = &ctx;
                async move {
                    let parsed = self.generate_variant(ctx, &plan, config).await?;
                    Some((plan, parsed))
                }
            })
            .buffered(config.fanout_concurrency.max(1))
            .collect()
            .await;

        let evolution_path = evolution.as_ref().map(EvolutionResult::summary);
        let mut variants: Vec<ConceptVariant> = parsed
            .into_iter()
            .flatten()
            .map(|(plan, parsed)| ConceptVariant {
                id: Uuid::new_v4(),
                variant_index: plan.index,
                visual_description: parsed.visual,
                headlines: parsed.headlines,
                tagline: parsed.tagline,
                body_copy: parsed.body_copy,
                device_definition: self.corpus.definition(&plan.device).unwrap_or_default().to_string(),
                rhetorical_device: plan.device,
                rhetorical_analysis: parsed.rhetorical_analysis,
                strategic_impact: parsed.strategic_impact,
                scores: VariantScores::default(),
                evolution_path: evolution_path.clone(),
                seed_origin: seed_id.clone(),
            })
            .collect();

        if variants.is_empty() {
            return Err(TropeworksError::Generation(format!(
                "none of {variant_count} variant responses could be used"
            )));
        }

        // Phase 4: scoring and validation
        scoring::score_batch(&mut variants);
        if let Some(requested) = input.requested_devices.as_ref().filter(|r| !r.is_empty()) {
            if config.enable_trope_constraints {
                self.revalidate(&mut variants, requested, config).await;
            }
        }

        let used: Vec<String> = variants
            .iter()
            .map(|v| v.rhetorical_device.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if let Err(e) = self.variety.record_usage(&used).await {
            warn!(error = %e, devices = used.len(), "Failed to record device usage");
        }

        let trajectory_id = match &capture {
            Some(capture) => self.finish_trajectory(capture, &variants).await,
            None => None,
        };

        variants.sort_by(|a, b| b.scores.overall.total_cmp(&a.scores.overall));
        variants.truncate(variant_count);

        let creativity_score = creativity_score(&variants, pool.as_ref());
        let generation_time_ms = started.elapsed().as_millis() as u64;
        info!(
            session_id = %input.session_id,
            variants = variants.len(),
            creativity_score,
            generation_time_ms,
            "Hybrid generation complete"
        );

        Ok(GenerationOutput {
            metadata: GenerationMetadata {
                mode: GenerationMode::Hybrid,
                divergent_pool_size: pool.as_ref().map(|p| p.seeds.len()).unwrap_or(0),
                selected_seed_id: seed.as_ref().map(|s| s.id),
                evolution_cycles: evolution.as_ref().map(|r| r.iterations).unwrap_or(0),
                trajectory_id,
                generation_time_ms,
                creativity_score,
                selected_devices: devices,
            },
            variants,
        })
    }

    async fn explore(
        &self,
        brief: &str,
        config: &OrchestratorConfig,
    ) -> Result<(DivergentPool, CreativeSeed), TropeworksError> {
        let options = ExploreOptions {
            pool_size: config.divergent_pool_size,
            max_temperature: config.creativity_level.max_divergent_temperature(),
            embed_seeds: config.embed_seeds,
            concurrency: config.fanout_concurrency.max(1),
            ..ExploreOptions::default()
        };
        let pool = self.explorer.explore(brief, &options).await;
        if pool.seeds.is_empty() {
            return Err(TropeworksError::EmptyPool);
        }
        let seed = select_creative_seed(&pool, &SeedCriteria::default())?.clone();
        Ok((pool, seed))
    }

    async fn evolve(
        &self,
        seed: &CreativeSeed,
        config: &OrchestratorConfig,
        capture: Option<Arc<TrajectoryCapture>>,
    ) -> Result<EvolutionResult, TropeworksError> {
        let steps = (config.max_evolution_cycles as usize).clamp(1, DEFAULT_MAX_ITERATIONS);
        let mut engine = ProgressiveEvolutionEngine::for_seed(seed.clone(), steps, self.deps.clone())
            .with_kv_cache(self.kv_cache.clone());
        if config.enable_trope_constraints {
            engine = engine.with_trope_engine(self.tropes.clone());
        }
        if let Some(capture) = capture {
            engine = engine.with_capture(capture);
        }
        engine.run_full_evolution(Arc::new(HeuristicArbiter::default())).await
    }

    async fn choose_devices(&self, input: &GenerationInput, variant_count: usize) -> Vec<String> {
        if let Some(requested) = input.requested_devices.as_ref().filter(|r| !r.is_empty()) {
            return requested.iter().map(|d| normalize_device_id(d)).collect();
        }
        let options = VarietyOptions {
            tone: Tone::parse_lossy(&input.tone),
            ..VarietyOptions::with_count(variant_count.max(3))
        };
        let selected: Vec<String> = self
            .variety
            .select(&options)
            .await
            .into_iter()
            .map(|s| s.device_id)
            .collect();
        if selected.is_empty() {
            warn!("Variety selection returned no devices, using defaults");
            return FALLBACK_DEVICES.iter().map(|d| d.to_string()).collect();
        }
        selected
    }

    /// One variant call. Call and parse failures are logged and yield `None`.
    async fn generate_variant(
        &self,
        ctx: &VariantContext<'_>,
        plan: &VariantPlan,
        config: &OrchestratorConfig,
    ) -> Option<ParsedVariant> {
        let system = format!("{SYSTEM_PROMPT}\n\n{}", plan.persona.directive);
        let prompt = variant_prompt(ctx, plan);
        let temperature = config.creativity_level.base_temperature() + 0.1 * plan.index as f32;

        let response = match generate_within(
            self.deps.generator.as_ref(),
            self.deps.call_timeout,
            &system,
            &prompt,
            GenerationParams::new(temperature, VARIANT_MAX_TOKENS),
        )
        .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(variant = plan.index, device = %plan.device, error = %e, "Variant generation failed");
                return None;
            }
        };

        match parse_variant(&response) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(variant = plan.index, device = %plan.device, error = %e, "Dropping unparseable variant");
                None
            }
        }
    }

    /// Overwrite trope alignment with a full engine check against every
    /// requested device.
    async fn revalidate(&self, variants: &mut [ConceptVariant], requested: &[String], config: &OrchestratorConfig) {
        let options = ValidationOptions::with_strength(config.trope_validation_strength);
        let checks: Vec<f32> = stream::iter(variants.iter())
            .map(|variant| {
                let content = format!("{}\n\n{}", variant.visual_description, variant.headlines.join("\n"));
                let options = &options;
                async move {
                    self.tropes
                        .validate_many(&content, requested, options)
                        .await
                        .overall_satisfaction
                }
            })
            .buffered(config.fanout_concurrency.max(1))
            .collect()
            .await;

        for (variant, satisfaction) in variants.iter_mut().zip(checks) {
            variant.scores.trope_alignment = satisfaction;
            variant.scores = variant.scores.with_overall();
        }
    }

    /// End the capture on the best variant and persist it. Persistence
    /// failures are logged; the trajectory id is still returned.
    async fn finish_trajectory(&self, capture: &TrajectoryCapture, variants: &[ConceptVariant]) -> Option<Uuid> {
        let best = variants
            .iter()
            .max_by(|a, b| a.scores.overall.total_cmp(&b.scores.overall))?;
        let output = format!("{}\n\n{}", best.visual_description, best.headlines.join("\n"));
        let trajectory = capture.end(&output, best.scores.overall)?;

        if let Some(store) = &self.deps.trajectory_store {
            if let Err(e) = store.save(&trajectory).await {
                warn!(trajectory_id = %trajectory.id, error = %e, "Failed to persist trajectory");
            }
        }
        Some(trajectory.id)
    }

    // -------------------------------------------------------------------------
    // Legacy path
    // -------------------------------------------------------------------------

    /// One plain call per variant with placeholder headlines and neutral
    /// scores. Never fails: a failed call becomes a placeholder visual.
    async fn legacy_fallback(
        &self,
        input: &GenerationInput,
        config: &OrchestratorConfig,
        started: Instant,
    ) -> GenerationOutput {
        let count = input.variant_count.max(1);
        let prompt = legacy_prompt(input);
        let definition = self.corpus.definition(LEGACY_DEVICE).unwrap_or_default().to_string();

        let variants: Vec<ConceptVariant> = stream::iter(0..count)
            .map(|index| {
                let prompt = prompt.as_str();
                let definition = definition.clone();
                async move {
                    let visual = match generate_within(
                        self.deps.generator.as_ref(),
                        self.deps.call_timeout,
                        LEGACY_SYSTEM_PROMPT,
                        prompt,
                        GenerationParams::new(LEGACY_TEMPERATURE, LEGACY_MAX_TOKENS),
                    )
                    .await
                    {
                        Ok(text) if !text.trim().is_empty() => text.trim().chars().take(LEGACY_VISUAL_CHARS).collect(),
                        Ok(_) => LEGACY_PLACEHOLDER_VISUAL.to_string(),
                        Err(e) => {
                            warn!(variant = index, error = %e, "Legacy generation failed, using placeholder");
                            LEGACY_PLACEHOLDER_VISUAL.to_string()
                        }
                    };
                    ConceptVariant {
                        id: Uuid::new_v4(),
                        variant_index: index,
                        visual_description: visual,
                        headlines: (1..=3).map(|n| format!("Headline {n}")).collect(),
                        tagline: None,
                        body_copy: None,
                        rhetorical_device: LEGACY_DEVICE.to_string(),
                        device_definition: definition,
                        rhetorical_analysis: None,
                        strategic_impact: None,
                        scores: VariantScores::uniform(NEUTRAL_SCORE),
                        evolution_path: None,
                        seed_origin: None,
                    }
                }
            })
            .buffered(config.fanout_concurrency.max(1))
            .collect()
            .await;

        info!(session_id = %input.session_id, variants = variants.len(), "Legacy generation complete");
        GenerationOutput {
            variants,
            metadata: GenerationMetadata {
                mode: GenerationMode::Legacy,
                divergent_pool_size: 0,
                selected_seed_id: None,
                evolution_cycles: 0,
                trajectory_id: None,
                generation_time_ms: started.elapsed().as_millis() as u64,
                creativity_score: NEUTRAL_SCORE,
                selected_devices: vec![LEGACY_DEVICE.to_string()],
            },
        }
    }
}

/// Mean of variant distinctiveness, variant originality and the pool's
/// average distinctiveness (neutral without a pool).
fn creativity_score(variants: &[ConceptVariant], pool: Option<&DivergentPool>) -> f32 {
    if variants.is_empty() {
        return 0.0;
    }
    let n = variants.len() as f32;
    let distinctiveness = variants.iter().map(|v| v.scores.distinctiveness).sum::<f32>() / n;
    let originality = variants.iter().map(|v| v.scores.originality).sum::<f32>() / n;
    let pool_score = pool
        .map(|p| p.metrics.average_distinctiveness)
        .unwrap_or(NEUTRAL_SCORE);
    (distinctiveness + originality + pool_score) / 3.0
}
