//! Progressive block evolution: every block starts fully masked and is pulled
//! toward model-proposed vocabulary as alpha decays, then committed once an
//! arbiter accepts it (or its regression budget runs out).

pub mod alpha;
pub mod arbiter;
pub mod state;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use ai_client::util::extract_json_object;
use tropeworks_common::{
    blend, cosine_similarity, mean_pairwise_similarity, weighted_average, BlockName,
    CreativeSeed, EvolutionBlock, EvolutionSummary, ParseFailure, SoftToken, TokenState,
    TropeValidationResult, TropeworksError, VocabDistribution,
};

use crate::deps::EngineDeps;
use crate::devices::{normalize_device_id, pattern_for};
use crate::traits::{embed_within, generate_within, GenerationParams};
use crate::trajectory::{KvCacheManager, StepRecord, TrajectoryCapture};
use crate::tropes::{TropeConstraintEngine, ValidationOptions};

pub use alpha::{AlphaScheduler, DecayShape};
pub use arbiter::{ArbiterVerdict, BlockArbiter, HeuristicArbiter};
pub use state::{transition, BlockTrigger};

pub const MASK_MARKER: &str = "[MASK]";
pub const DEFAULT_MAX_ITERATIONS: usize = 5;
pub const DEFAULT_MAX_CYCLES: usize = 50;
pub const DEFAULT_MAX_REGRESSIONS: u32 = 2;

/// Tokens per block whose embeddings are blended each cycle.
const SAMPLED_TOKENS: usize = 5;
/// Distribution words that contribute to the distribution embedding.
const EMBEDDED_WORDS: usize = 10;
/// Leading token embeddings compared for block coherence.
const COHERENCE_WINDOW: usize = 6;
const SOFT_REGRESS_ALPHA_STEP: f32 = 0.2;
const SOFT_REGRESS_ALPHA_CAP: f32 = 0.8;
/// The simplified loop commits a block below this alpha...
const COMMIT_ALPHA: f32 = 0.1;
/// ...once its coherence is above this.
const COMMIT_COHERENCE: f32 = 0.6;

const BIAS_FACTOR: f32 = 1.5;
const BIAS_FLOOR: f32 = 0.01;
const BIAS_CAP: f32 = 0.3;

const FALLBACK_DISTRIBUTION: [(&str, f32); 8] = [
    ("the", 0.10),
    ("a", 0.08),
    ("is", 0.07),
    ("of", 0.06),
    ("and", 0.05),
    ("to", 0.05),
    ("in", 0.04),
    ("for", 0.04),
];

const TROPE_BIAS_WORDS: &[(&str, &[&str])] = &[
    ("antithesis", &["yet", "but", "while", "versus", "against", "however"]),
    ("paradox", &["contradiction", "impossible", "yet", "somehow"]),
    ("metaphor", &["like", "becomes", "transforms", "is"]),
    ("hyperbole", &["never", "always", "infinite", "ultimate", "every"]),
    ("chiasmus", &["first", "last", "begin", "end"]),
    ("oxymoron", &["silent", "loud", "dark", "light", "bitter", "sweet"]),
];

const DISTRIBUTION_SYSTEM: &str = "You generate vocabulary distributions for advertising copy. \
Respond only with a JSON object mapping words to probabilities.";
const DECODE_SYSTEM: &str = "You are a precise advertising copywriter. Return only the requested text.";

// =============================================================================
// Distributions
// =============================================================================

pub fn fallback_distribution() -> VocabDistribution {
    VocabDistribution::from_pairs(FALLBACK_DISTRIBUTION)
}

pub fn mask_distribution() -> VocabDistribution {
    VocabDistribution::from_pairs([(MASK_MARKER, 1.0)])
}

/// Parse a `{"word": probability}` object. Non-numeric, negative and
/// non-finite entries are dropped; the rest is renormalized.
pub fn parse_distribution(response: &str) -> Result<VocabDistribution, ParseFailure> {
    let json = extract_json_object(response)
        .ok_or_else(|| ParseFailure::Malformed("no JSON object in distribution".into()))?;
    let raw: HashMap<String, serde_json::Value> = serde_json::from_str(json)
        .map_err(|e| ParseFailure::Malformed(format!("distribution JSON: {e}")))?;

    let mut distribution = VocabDistribution::new();
    for (word, value) in raw {
        let word = word.trim().to_lowercase();
        let Some(p) = value.as_f64().map(|p| p as f32) else {
            continue;
        };
        if !word.is_empty() && p.is_finite() && p > 0.0 {
            distribution.insert(word, p);
        }
    }
    if distribution.is_empty() {
        return Err(ParseFailure::Malformed("distribution has no usable entries".into()));
    }
    distribution.normalize();
    Ok(distribution)
}

fn bias_words(device_id: &str) -> Vec<String> {
    let id = normalize_device_id(device_id);
    if let Some((_, words)) = TROPE_BIAS_WORDS.iter().find(|(d, _)| *d == id) {
        return words.iter().map(|w| w.to_string()).collect();
    }
    pattern_for(&id)
        .map(|p| p.vocabulary.iter().map(|w| w.to_lowercase()).collect())
        .unwrap_or_default()
}

/// Boost the device's signal words (1.5x, at least a small floor, capped at
/// 0.3) and renormalize. Unknown devices leave the distribution untouched.
pub fn apply_trope_bias(distribution: &mut VocabDistribution, device_id: &str) {
    let words = bias_words(device_id);
    if words.is_empty() {
        return;
    }
    for word in words {
        let current = distribution.get(&word).unwrap_or(BIAS_FLOOR);
        distribution.insert(word, (current * BIAS_FACTOR).min(BIAS_CAP));
    }
    distribution.normalize();
}

// =============================================================================
// Blocks
// =============================================================================

pub fn new_block(name: BlockName, trope_constraints: Vec<String>, mask_embedding: &[f32]) -> EvolutionBlock {
    let tokens = (0..name.token_budget())
        .map(|position| SoftToken {
            position,
            state: TokenState::Mask,
            distribution: mask_distribution(),
            embedding: mask_embedding.to_vec(),
            alpha: 1.0,
            committed: false,
        })
        .collect();
    EvolutionBlock {
        id: name.as_str().to_string(),
        name,
        tokens,
        state: TokenState::Mask,
        trope_constraints,
        coherence: 1.0,
        committed: false,
        content: None,
        regression_count: 0,
    }
}

/// Mean cosine similarity over adjacent pairs of the leading token
/// embeddings. Fewer than two embeddings is fully coherent.
pub fn block_coherence(block: &EvolutionBlock) -> f32 {
    let embeddings: Vec<&[f32]> = block
        .tokens
        .iter()
        .map(|t| t.embedding.as_slice())
        .filter(|e| !e.is_empty())
        .take(COHERENCE_WINDOW)
        .collect();
    if embeddings.len() < 2 {
        return 1.0;
    }
    let pairs = embeddings.len() - 1;
    embeddings
        .windows(2)
        .map(|w| cosine_similarity(w[0], w[1]))
        .sum::<f32>()
        / pairs as f32
}

/// Probability mass of the first ten tokens merged, top five words, mask
/// marker excluded.
fn vocabulary_hints(block: &EvolutionBlock) -> Vec<String> {
    let mut merged = VocabDistribution::new();
    for token in block.tokens.iter().take(10) {
        for (word, p) in token.distribution.iter() {
            if word != MASK_MARKER {
                let current = merged.get(word).unwrap_or(0.0);
                merged.insert(word, current + p);
            }
        }
    }
    merged.top(5).into_iter().map(|(w, _)| w).collect()
}

fn blend_or_keep(alpha: f32, mask: &[f32], target: &[f32]) -> Vec<f32> {
    if target.is_empty() {
        mask.to_vec()
    } else if mask.len() == target.len() {
        blend(alpha, mask, target)
    } else {
        target.to_vec()
    }
}

// =============================================================================
// Result
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvolutionResult {
    pub blocks: Vec<EvolutionBlock>,
    pub iterations: u32,
    pub regressions: u32,
    pub global_coherence: f32,
    pub trope_validation: Vec<TropeValidationResult>,
}

impl EvolutionResult {
    /// Committed block contents in block order, blank-line separated.
    pub fn final_output(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| b.content.as_deref())
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn content(&self, name: &BlockName) -> Option<&str> {
        self.blocks
            .iter()
            .find(|b| &b.name == name)
            .and_then(|b| b.content.as_deref())
    }

    pub fn summary(&self) -> EvolutionSummary {
        EvolutionSummary {
            cycles: self.iterations,
            regressions: self.regressions,
            global_coherence: self.global_coherence,
            blocks: self
                .blocks
                .iter()
                .map(|b| (b.id.clone(), b.content.clone().unwrap_or_default()))
                .collect::<BTreeMap<_, _>>(),
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionOptions {
    /// Iteration cap for the arbiter-gated run.
    pub max_iterations: usize,
    /// Cycle cap for the simplified [`ProgressiveEvolutionEngine::evolve`] loop.
    pub max_cycles: usize,
    pub decay: DecayShape,
    pub max_regressions: u32,
    pub concurrency: usize,
}

impl Default for EvolutionOptions {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_cycles: DEFAULT_MAX_CYCLES,
            decay: DecayShape::Cosine,
            max_regressions: DEFAULT_MAX_REGRESSIONS,
            concurrency: 8,
        }
    }
}

enum Outcome {
    Decode(BlockTrigger),
    Regress(BlockTrigger),
}

pub struct ProgressiveEvolutionEngine {
    deps: EngineDeps,
    options: EvolutionOptions,
    seed: Option<CreativeSeed>,
    trope_engine: Option<Arc<TropeConstraintEngine>>,
    kv_cache: Arc<KvCacheManager>,
    capture: Option<Arc<TrajectoryCapture>>,
}

impl ProgressiveEvolutionEngine {
    /// Engine that evolves the five standard blocks of `seed` over `steps`
    /// arbiter-gated iterations.
    pub fn for_seed(seed: CreativeSeed, steps: usize, deps: EngineDeps) -> Self {
        Self {
            deps,
            options: EvolutionOptions {
                max_iterations: steps.max(1),
                ..EvolutionOptions::default()
            },
            seed: Some(seed),
            trope_engine: None,
            kv_cache: Arc::new(KvCacheManager::default()),
            capture: None,
        }
    }

    /// Engine for caller-supplied blocks.
    pub fn with_options(options: EvolutionOptions, deps: EngineDeps) -> Self {
        Self {
            deps,
            options,
            seed: None,
            trope_engine: None,
            kv_cache: Arc::new(KvCacheManager::default()),
            capture: None,
        }
    }

    pub fn with_trope_engine(mut self, engine: Arc<TropeConstraintEngine>) -> Self {
        self.trope_engine = Some(engine);
        self
    }

    pub fn with_kv_cache(mut self, cache: Arc<KvCacheManager>) -> Self {
        self.kv_cache = cache;
        self
    }

    pub fn with_capture(mut self, capture: Arc<TrajectoryCapture>) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn options(&self) -> &EvolutionOptions {
        &self.options
    }

    pub fn kv_cache(&self) -> &KvCacheManager {
        &self.kv_cache
    }

    async fn mask_embedding(&self) -> Vec<f32> {
        embed_within(self.deps.embedder.as_ref(), self.deps.call_timeout, MASK_MARKER).await
    }

    /// Standard blocks for the seed, devices assigned round-robin from its
    /// compatible list.
    pub fn seed_blocks(seed: &CreativeSeed, mask_embedding: &[f32]) -> Vec<EvolutionBlock> {
        BlockName::STANDARD
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let tropes = if seed.compatible_devices.is_empty() {
                    Vec::new()
                } else {
                    vec![seed.compatible_devices[i % seed.compatible_devices.len()].clone()]
                };
                new_block(name.clone(), tropes, mask_embedding)
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // Arbiter-gated run
    // -------------------------------------------------------------------------

    pub async fn run_full_evolution(
        &self,
        arbiter: Arc<dyn BlockArbiter>,
    ) -> Result<EvolutionResult, TropeworksError> {
        let seed = self
            .seed
            .as_ref()
            .ok_or_else(|| TropeworksError::Config("full evolution needs a seed".into()))?;
        let mask = self.mask_embedding().await;
        let blocks = Self::seed_blocks(seed, &mask);
        info!(
            seed = %seed.id,
            blocks = blocks.len(),
            max_iterations = self.options.max_iterations,
            "Starting progressive evolution"
        );
        self.run_blocks(blocks, &seed.idea, &mask, arbiter).await
    }

    async fn run_blocks(
        &self,
        mut blocks: Vec<EvolutionBlock>,
        idea: &str,
        mask: &[f32],
        arbiter: Arc<dyn BlockArbiter>,
    ) -> Result<EvolutionResult, TropeworksError> {
        let mut scheduler = AlphaScheduler::new(self.options.max_iterations, self.options.decay);
        let mut iterations = 0u32;
        let mut regressions = 0u32;
        let mut trope_validation = Vec::new();

        while (iterations as usize) < self.options.max_iterations && blocks.iter().any(|b| !b.committed) {
            let alpha = scheduler.current_alpha();

            let evolved: Vec<(usize, TokenState)> = stream::iter(
                blocks.iter_mut().enumerate().filter(|(_, b)| !b.committed),
            )
            .map(|(i, block)| async move {
                let previous = block.state;
                self.evolve_block(block, alpha, idea, mask).await.map(|_| (i, previous))
            })
            .buffered(self.options.concurrency.max(1))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_, _>>()?;

            let ready = arbiter.ready_at(alpha);
            let mut verdicts = if ready {
                self.judge(&blocks, &evolved, arbiter.clone()).await
            } else {
                debug!(alpha, "Alpha above arbiter threshold, skipping evaluation");
                HashMap::new()
            };

            let mut outcomes: HashMap<usize, Outcome> = HashMap::new();
            for (i, _) in evolved.iter().filter(|_| ready) {
                let verdict = verdicts
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| ArbiterVerdict::failed("arbiter did not report"));
                let block = &blocks[*i];
                let outcome = if verdict.passed {
                    Outcome::Decode(BlockTrigger::Decode)
                } else if block.regression_count >= self.options.max_regressions {
                    warn!(block = %block.id, regressions = block.regression_count, "Regression budget spent, forcing decode");
                    Outcome::Decode(BlockTrigger::ForceDecode)
                } else if block.regression_count == 0 {
                    Outcome::Regress(BlockTrigger::SoftRegress)
                } else {
                    Outcome::Regress(BlockTrigger::FullRegress)
                };
                outcomes.insert(*i, outcome);
                verdicts.entry(*i).or_insert(verdict);
            }

            for (i, outcome) in &outcomes {
                if let Outcome::Regress(trigger) = outcome {
                    regress_block(&mut blocks[*i], *trigger, mask)?;
                    regressions += 1;
                }
            }

            let decodes: HashMap<usize, BlockTrigger> = outcomes
                .iter()
                .filter_map(|(i, o)| match o {
                    Outcome::Decode(trigger) => Some((*i, *trigger)),
                    Outcome::Regress(_) => None,
                })
                .collect();
            let decoded: Vec<(usize, Result<Vec<TropeValidationResult>, TropeworksError>)> =
                stream::iter(blocks.iter_mut().enumerate().filter(|(i, _)| decodes.contains_key(i)))
                    .map(|(i, block)| {
                        let trigger = decodes[&i];
                        async move { (i, self.decode_block(block, trigger, idea).await) }
                    })
                    .buffered(self.options.concurrency.max(1))
                    .collect()
                    .await;
            let mut block_validation: HashMap<usize, Vec<TropeValidationResult>> = HashMap::new();
            for (i, result) in decoded {
                block_validation.insert(i, result?);
            }

            for (i, previous) in &evolved {
                let score = verdicts.get(i).map(|v| v.score).unwrap_or(0.0);
                let results = block_validation.get(i).map(Vec::as_slice).unwrap_or_default();
                self.record_step(&blocks[*i], *previous, alpha, score, results);
            }
            trope_validation.extend(block_validation.into_values().flatten());

            iterations += 1;
            scheduler.advance();
            debug!(
                iteration = iterations,
                alpha,
                committed = blocks.iter().filter(|b| b.committed).count(),
                "Evolution iteration complete"
            );
        }

        // Out of iterations: whatever is still open is committed as is.
        let open: HashSet<usize> = blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.committed)
            .map(|(i, _)| i)
            .collect();
        if !open.is_empty() {
            warn!(open = open.len(), "Iteration budget exhausted, forcing decode of open blocks");
            let results: Vec<Result<Vec<TropeValidationResult>, TropeworksError>> =
                stream::iter(blocks.iter_mut().enumerate().filter(|(i, _)| open.contains(i)))
                    .map(|(_, block)| self.decode_block(block, BlockTrigger::ForceDecode, idea))
                    .buffered(self.options.concurrency.max(1))
                    .collect()
                    .await;
            for result in results {
                trope_validation.extend(result?);
            }
        }

        let global_coherence = self.global_coherence(&blocks).await;
        info!(iterations, regressions, global_coherence, "Progressive evolution complete");
        Ok(EvolutionResult {
            blocks,
            iterations,
            regressions,
            global_coherence,
            trope_validation,
        })
    }

    /// Evaluate evolved blocks on spawned tasks and wait for every verdict.
    async fn judge(
        &self,
        blocks: &[EvolutionBlock],
        evolved: &[(usize, TokenState)],
        arbiter: Arc<dyn BlockArbiter>,
    ) -> HashMap<usize, ArbiterVerdict> {
        let mut tasks = JoinSet::new();
        for (i, _) in evolved {
            let index = *i;
            let block = blocks[index].clone();
            let arbiter = arbiter.clone();
            tasks.spawn(async move { (index, arbiter.evaluate(&block).await) });
        }

        let mut verdicts = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, verdict)) => {
                    verdicts.insert(index, verdict);
                }
                Err(e) => warn!(error = %e, "Arbiter task failed"),
            }
        }
        verdicts
    }

    async fn evolve_block(
        &self,
        block: &mut EvolutionBlock,
        alpha: f32,
        idea: &str,
        mask: &[f32],
    ) -> Result<(), TropeworksError> {
        let mut distribution = match self.kv_cache.retrieve(idea, std::slice::from_ref(block)) {
            Some(cached) => {
                debug!(block = %block.id, "Distribution served from KV cache");
                cached
            }
            None => {
                let fresh = self.request_distribution(block, idea).await;
                self.kv_cache.store(idea, std::slice::from_ref(block), fresh.clone());
                fresh
            }
        };
        for device in &block.trope_constraints {
            apply_trope_bias(&mut distribution, device);
        }

        let target = self.distribution_embedding(&distribution, mask.len()).await;
        let blended = blend_or_keep(alpha, mask, &target);

        let len = block.tokens.len();
        let sample = SAMPLED_TOKENS.min(len);
        let sampled: HashSet<usize> = (0..sample).map(|i| i * len / sample).collect();
        for token in block.tokens.iter_mut() {
            token.alpha = alpha;
            token.distribution = distribution.clone();
            token.state = transition(token.state, BlockTrigger::Blend(alpha)).unwrap_or(token.state);
            if sampled.contains(&token.position) {
                token.embedding = blended.clone();
            }
        }

        block.state = transition(block.state, BlockTrigger::Blend(alpha))?;
        block.coherence = block_coherence(block);
        debug!(block = %block.id, state = %block.state, alpha, coherence = block.coherence, "Block evolved");
        Ok(())
    }

    async fn request_distribution(&self, block: &EvolutionBlock, idea: &str) -> VocabDistribution {
        let device = block.trope_constraints.first().map(String::as_str).unwrap_or("none");
        let prompt = format!(
            "Seed concept: {idea}\nBlock: {block}\nRhetorical device: {device}\n\n\
             Return a JSON object mapping 20-30 candidate words for this block to their \
             probabilities, for example {{\"word\": 0.1}}. Probabilities should sum to 1.",
            block = block.name,
        );
        let response = generate_within(
            self.deps.generator.as_ref(),
            self.deps.call_timeout,
            DISTRIBUTION_SYSTEM,
            &prompt,
            GenerationParams::new(0.7, 500),
        )
        .await;

        match response
            .map_err(TropeworksError::from)
            .and_then(|r| parse_distribution(&r).map_err(TropeworksError::from))
        {
            Ok(distribution) => distribution,
            Err(e) => {
                warn!(error = %e, block = %block.id, "Vocabulary distribution unavailable, using fallback");
                fallback_distribution()
            }
        }
    }

    /// Probability-weighted mean embedding of the top words.
    async fn distribution_embedding(&self, distribution: &VocabDistribution, dimension: usize) -> Vec<f32> {
        let top = distribution.top(EMBEDDED_WORDS);
        let embedded: Vec<(Vec<f32>, f32)> = stream::iter(top)
            .map(|(word, p)| async move {
                (embed_within(self.deps.embedder.as_ref(), self.deps.call_timeout, &word).await, p)
            })
            .buffered(self.options.concurrency.max(1))
            .collect()
            .await;

        let dimension = if dimension > 0 {
            dimension
        } else {
            embedded.iter().map(|(v, _)| v.len()).max().unwrap_or(0)
        };
        let usable: Vec<(&[f32], f32)> = embedded
            .iter()
            .filter(|(v, _)| v.len() == dimension && dimension > 0)
            .map(|(v, p)| (v.as_slice(), *p))
            .collect();
        if usable.is_empty() {
            return Vec::new();
        }
        weighted_average(&usable, dimension)
    }

    /// Commit a block with sampled text. A failed call commits the
    /// vocabulary hints instead.
    async fn decode_block(
        &self,
        block: &mut EvolutionBlock,
        trigger: BlockTrigger,
        idea: &str,
    ) -> Result<Vec<TropeValidationResult>, TropeworksError> {
        let state = transition(block.state, trigger)?;
        let hints = vocabulary_hints(block);
        let device = block.trope_constraints.first().map(String::as_str).unwrap_or("none");
        let prompt = format!(
            "Generate a {name} for this concept.\nSeed: {idea}\nRhetorical device: {device}\n\
             Vocabulary hints: {hints}\n\nReturn only the {name} text.",
            name = block.name,
            hints = hints.join(", "),
        );
        let max_tokens = if block.name == BlockName::BodyCopy { 200 } else { 50 };

        let content = match generate_within(
            self.deps.generator.as_ref(),
            self.deps.call_timeout,
            DECODE_SYSTEM,
            &prompt,
            GenerationParams::new(0.8, max_tokens),
        )
        .await
        {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => hints.join(" "),
            Err(e) => {
                warn!(error = %e, block = %block.id, "Block decode call failed, committing vocabulary hints");
                hints.join(" ")
            }
        };

        block.state = state;
        block.committed = true;
        for token in block.tokens.iter_mut() {
            token.state = TokenState::Decoded;
            token.committed = true;
        }
        debug!(block = %block.id, %trigger, "Block committed");

        let validation = match &self.trope_engine {
            Some(engine) if !block.trope_constraints.is_empty() => {
                let options = ValidationOptions {
                    use_ai_fallback: false,
                    ..ValidationOptions::default()
                };
                engine
                    .validate_many(&content, &block.trope_constraints, &options)
                    .await
                    .results
            }
            _ => Vec::new(),
        };
        block.content = Some(content);
        Ok(validation)
    }

    fn record_step(
        &self,
        block: &EvolutionBlock,
        previous: TokenState,
        alpha: f32,
        arbiter_score: f32,
        validations: &[TropeValidationResult],
    ) {
        let Some(capture) = &self.capture else {
            return;
        };
        capture.record_step(StepRecord {
            block_id: block.id.clone(),
            previous_state: previous,
            new_state: block.state,
            alpha,
            arbiter_score,
            trope_results: validations.to_vec(),
            token_distributions: block.tokens.iter().map(|t| t.distribution.top(5)).collect(),
            selected_tokens: block
                .tokens
                .iter()
                .filter_map(|t| t.distribution.top(1).into_iter().next().map(|(w, _)| w))
                .collect(),
        });
    }

    async fn global_coherence(&self, blocks: &[EvolutionBlock]) -> f32 {
        let embeddings: Vec<Vec<f32>> = stream::iter(blocks.iter().filter_map(|b| b.content.as_deref()))
            .map(|content| embed_within(self.deps.embedder.as_ref(), self.deps.call_timeout, content))
            .buffered(self.options.concurrency.max(1))
            .collect()
            .await;
        mean_pairwise_similarity(&embeddings)
    }

    // -------------------------------------------------------------------------
    // Simplified loop
    // -------------------------------------------------------------------------

    /// Alpha-only evolution over caller blocks, no model calls and no
    /// arbiter. A block commits once alpha drops below 0.1 with coherence
    /// above 0.6; content is assembled from its tokens' top words.
    pub fn evolve(&self, mut blocks: Vec<EvolutionBlock>) -> Result<EvolutionResult, TropeworksError> {
        let mut scheduler = AlphaScheduler::new(self.options.max_cycles, self.options.decay);
        let mut cycles = 0u32;

        while (cycles as usize) < self.options.max_cycles && blocks.iter().any(|b| !b.committed) {
            let alpha = scheduler.current_alpha();
            for block in blocks.iter_mut().filter(|b| !b.committed) {
                for token in block.tokens.iter_mut() {
                    token.alpha = alpha;
                    token.state = transition(token.state, BlockTrigger::Blend(alpha)).unwrap_or(token.state);
                }
                block.state = transition(block.state, BlockTrigger::Blend(alpha))?;
                block.coherence = (0.3 + 0.7 * (1.0 - alpha)).min(1.0);

                if alpha < COMMIT_ALPHA && block.coherence > COMMIT_COHERENCE {
                    block.state = transition(block.state, BlockTrigger::Decode)?;
                    block.committed = true;
                    let words: Vec<String> = block
                        .tokens
                        .iter_mut()
                        .filter_map(|t| {
                            t.state = TokenState::Decoded;
                            t.committed = true;
                            t.distribution.top(1).into_iter().next().map(|(w, _)| w)
                        })
                        .filter(|w| w != MASK_MARKER)
                        .collect();
                    if !words.is_empty() {
                        block.content = Some(words.join(" "));
                    }
                }
            }
            cycles += 1;
            scheduler.advance();
        }

        let global_coherence = if blocks.is_empty() {
            1.0
        } else {
            blocks.iter().map(|b| b.coherence).sum::<f32>() / blocks.len() as f32
        };
        Ok(EvolutionResult {
            blocks,
            iterations: cycles,
            regressions: 0,
            global_coherence,
            trope_validation: Vec::new(),
        })
    }
}

fn regress_block(block: &mut EvolutionBlock, trigger: BlockTrigger, mask: &[f32]) -> Result<(), TropeworksError> {
    block.state = transition(block.state, trigger)?;
    block.regression_count += 1;
    block.committed = false;
    block.content = None;
    for token in block.tokens.iter_mut() {
        token.committed = false;
        token.state = transition(token.state, trigger).unwrap_or(token.state);
        if trigger == BlockTrigger::FullRegress {
            token.alpha = 1.0;
            token.distribution = mask_distribution();
            token.embedding = mask.to_vec();
        } else {
            token.alpha = (token.alpha + SOFT_REGRESS_ALPHA_STEP).min(SOFT_REGRESS_ALPHA_CAP);
        }
    }
    debug!(block = %block.id, %trigger, regressions = block.regression_count, "Block regressed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::testing::{FixedEmbedder, MockGenerator};

    const DISTRIBUTION: &str = r#"{"yet": 0.3, "still": 0.2, "walk": 0.2, "ground": 0.2, "oddly": "high"}"#;

    struct AlwaysFail;

    #[async_trait::async_trait]
    impl BlockArbiter for AlwaysFail {
        async fn evaluate(&self, _: &EvolutionBlock) -> ArbiterVerdict {
            ArbiterVerdict::failed("never good enough")
        }
    }

    struct AlwaysPass;

    #[async_trait::async_trait]
    impl BlockArbiter for AlwaysPass {
        async fn evaluate(&self, _: &EvolutionBlock) -> ArbiterVerdict {
            ArbiterVerdict {
                passed: true,
                score: 0.9,
                feedback: Vec::new(),
            }
        }
    }

    fn seed() -> CreativeSeed {
        CreativeSeed {
            id: Uuid::new_v4(),
            idea: "Every step unwrites a footprint".into(),
            persona_id: "poet".into(),
            distinctiveness: 0.7,
            coherence: 0.7,
            compatible_devices: vec!["antithesis".into(), "zeugma".into()],
            embedding: None,
            created_at: Utc::now(),
        }
    }

    fn deps(generator: MockGenerator) -> (EngineDeps, Arc<MockGenerator>) {
        let generator = Arc::new(generator);
        let deps = EngineDeps::builder()
            .generator(generator.clone())
            .embedder(Arc::new(FixedEmbedder::new(16)))
            .build();
        (deps, generator)
    }

    fn scripted() -> MockGenerator {
        MockGenerator::new()
            .on(|prompt| prompt.contains("JSON object mapping"), DISTRIBUTION)
            .on_any("Walk lighter, yet leave more.")
    }

    #[test]
    fn distribution_parsing_drops_junk_and_normalizes() {
        let dist = parse_distribution(&format!("Sure:\n{DISTRIBUTION}")).unwrap();
        assert_eq!(dist.len(), 4);
        assert!(dist.get("oddly").is_none());
        assert!((dist.total() - 1.0).abs() < 1e-5);
        assert!(parse_distribution("no json here").is_err());
        assert!(parse_distribution(r#"{"a": -1}"#).is_err());
    }

    #[test]
    fn trope_bias_boosts_signal_words() {
        let mut dist = VocabDistribution::from_pairs([("yet", 0.1), ("shoe", 0.9)]);
        apply_trope_bias(&mut dist, "Antithesis");
        assert!((dist.total() - 1.0).abs() < 1e-5);
        let yet = dist.get("yet").unwrap();
        let versus = dist.get("versus").unwrap();
        assert!(yet > versus);
        assert!(dist.get("shoe").unwrap() < 0.9);

        let mut untouched = VocabDistribution::from_pairs([("shoe", 1.0)]);
        apply_trope_bias(&mut untouched, "not-a-device");
        assert_eq!(untouched.len(), 1);
    }

    #[test]
    fn bias_is_capped() {
        let mut dist = VocabDistribution::from_pairs([("never", 0.9), ("shoe", 0.1)]);
        apply_trope_bias(&mut dist, "hyperbole");
        // 0.9 * 1.5 capped at 0.3 before renormalizing
        assert!(dist.get("never").unwrap() < dist.get("shoe").unwrap() * 3.1);
    }

    #[test]
    fn coherence_of_identical_tokens_is_one() {
        let block = new_block(BlockName::Tagline, Vec::new(), &[1.0, 0.0]);
        assert!((block_coherence(&block) - 1.0).abs() < 1e-6);
        let empty = new_block(BlockName::Tagline, Vec::new(), &[]);
        assert_eq!(block_coherence(&empty), 1.0);
    }

    #[test]
    fn seed_blocks_cover_standard_budgets() {
        let blocks = ProgressiveEvolutionEngine::seed_blocks(&seed(), &[0.0; 4]);
        assert_eq!(blocks.len(), 5);
        assert_eq!(blocks[2].tokens.len(), 50);
        assert_eq!(blocks[0].trope_constraints, vec!["antithesis".to_string()]);
        assert_eq!(blocks[1].trope_constraints, vec!["zeugma".to_string()]);
        assert!(blocks.iter().all(|b| b.state == TokenState::Mask && b.tokens.iter().all(|t| t.alpha == 1.0)));
    }

    #[tokio::test]
    async fn failing_arbiter_still_commits_every_block() {
        let (deps, _) = deps(scripted());
        let engine = ProgressiveEvolutionEngine::for_seed(seed(), 5, deps);
        let result = engine.run_full_evolution(Arc::new(AlwaysFail)).await.unwrap();

        assert!(result.blocks.iter().all(|b| b.committed && b.state == TokenState::Decoded));
        // soft, full, then forced
        assert!(result.blocks.iter().all(|b| b.regression_count == DEFAULT_MAX_REGRESSIONS));
        assert_eq!(result.iterations, 3);
        assert_eq!(result.regressions, 10);
        assert_eq!(
            result.content(&BlockName::Headline),
            Some("Walk lighter, yet leave more.")
        );
    }

    #[tokio::test]
    async fn short_budget_force_decodes_open_blocks() {
        let (deps, _) = deps(scripted());
        let engine = ProgressiveEvolutionEngine::for_seed(seed(), 1, deps);
        let result = engine.run_full_evolution(Arc::new(AlwaysFail)).await.unwrap();
        assert_eq!(result.iterations, 1);
        assert!(result.blocks.iter().all(|b| b.committed));
    }

    #[tokio::test]
    async fn passing_arbiter_commits_in_one_iteration_and_records_steps() {
        let (deps, _) = deps(scripted());
        let capture = Arc::new(TrajectoryCapture::start("s", "brief", "theme", "seed"));
        let engine = ProgressiveEvolutionEngine::for_seed(seed(), 5, deps).with_capture(capture.clone());
        let result = engine.run_full_evolution(Arc::new(AlwaysPass)).await.unwrap();

        assert_eq!(result.iterations, 1);
        assert_eq!(result.regressions, 0);
        assert!(result.final_output().contains("Walk lighter"));
        assert!(result.global_coherence > 0.99);
        assert_eq!(capture.current_state().unwrap().step_count, 5);
        assert_eq!(result.summary().blocks.len(), 5);
    }

    #[tokio::test]
    async fn heuristic_arbiter_waits_for_schedule_before_judging() {
        let (deps, _) = deps(scripted());
        let engine = ProgressiveEvolutionEngine::for_seed(seed(), DEFAULT_MAX_ITERATIONS, deps);
        let result = engine.run_full_evolution(Arc::new(HeuristicArbiter::default())).await.unwrap();

        assert_eq!(result.regressions, 0);
        assert!(result
            .blocks
            .iter()
            .all(|b| b.committed && b.state == TokenState::Decoded && b.regression_count == 0));
        // cosine alphas 1.0 and 0.905 are skipped; 0.655 passes
        assert_eq!(result.iterations, 3);
    }

    #[tokio::test]
    async fn generator_failure_falls_back_to_fixed_vocabulary() {
        let (deps, generator) = deps(MockGenerator::failing());
        let engine = ProgressiveEvolutionEngine::for_seed(seed(), 5, deps);
        let result = engine.run_full_evolution(Arc::new(AlwaysPass)).await.unwrap();

        let headline = result.content(&BlockName::Headline).unwrap();
        assert_eq!(headline, "the a is of and");
        assert!(generator.call_count() >= 10);
    }

    #[tokio::test]
    async fn full_regression_reuses_cached_distribution() {
        let (deps, generator) = deps(scripted());
        let engine = ProgressiveEvolutionEngine::for_seed(seed(), 5, deps);
        engine.run_full_evolution(Arc::new(AlwaysFail)).await.unwrap();
        // Iteration three starts from the all-mask state already seen in
        // iteration one, so only two rounds of distribution calls are made.
        let distribution_calls = generator
            .prompts()
            .iter()
            .filter(|p| p.contains("JSON object mapping"))
            .count();
        assert_eq!(distribution_calls, 10);
        assert!(engine.kv_cache().stats().total_hits >= 5);
    }

    #[tokio::test]
    async fn shared_cache_keeps_seeds_apart() {
        let generator = MockGenerator::new()
            .on(
                |p| p.contains("JSON object mapping") && p.contains("Mortgage"),
                r#"{"bank": 0.6, "loan": 0.4}"#,
            )
            .on(|p| p.contains("JSON object mapping"), r#"{"ocean": 0.6, "sneaker": 0.4}"#)
            .on_any("Walk lighter, yet leave more.");
        let (deps, generator) = deps(generator);
        let cache = Arc::new(KvCacheManager::default());
        let distribution_calls =
            |g: &MockGenerator| g.prompts().iter().filter(|p| p.contains("JSON object mapping")).count();

        let mut ocean = seed();
        ocean.idea = "Sneakers from ocean plastic".into();
        ProgressiveEvolutionEngine::for_seed(ocean, 5, deps.clone())
            .with_kv_cache(cache.clone())
            .run_full_evolution(Arc::new(AlwaysPass))
            .await
            .unwrap();
        let first_calls = distribution_calls(&generator);
        assert_eq!(first_calls, 5);

        let mut mortgage = seed();
        mortgage.idea = "Mortgage bank for students".into();
        let result = ProgressiveEvolutionEngine::for_seed(mortgage, 5, deps)
            .with_kv_cache(cache.clone())
            .run_full_evolution(Arc::new(AlwaysPass))
            .await
            .unwrap();

        assert_eq!(distribution_calls(&generator), first_calls * 2);
        let headline = result.blocks.iter().find(|b| b.name == BlockName::Headline).unwrap();
        let top: Vec<String> = headline.tokens[0].distribution.top(3).into_iter().map(|(w, _)| w).collect();
        assert!(top.contains(&"bank".to_string()));
        assert!(!top.contains(&"ocean".to_string()));
        assert_eq!(cache.stats().total_hits, 0);
    }

    #[tokio::test]
    async fn missing_seed_is_a_config_error() {
        let (deps, _) = deps(scripted());
        let engine = ProgressiveEvolutionEngine::with_options(EvolutionOptions::default(), deps);
        let err = engine.run_full_evolution(Arc::new(AlwaysPass)).await.unwrap_err();
        assert!(matches!(err, TropeworksError::Config(_)));
    }

    #[test]
    fn simplified_loop_commits_late() {
        let (deps, _) = deps(scripted());
        let engine = ProgressiveEvolutionEngine::with_options(EvolutionOptions::default(), deps);
        let mut block = new_block(BlockName::Headline, vec!["antithesis".into()], &[]);
        for token in block.tokens.iter_mut() {
            token.distribution = VocabDistribution::from_pairs([("yet", 0.6), ("still", 0.4)]);
        }
        let result = engine.evolve(vec![block]).unwrap();
        let block = &result.blocks[0];
        assert!(block.committed);
        assert_eq!(block.content.as_deref(), Some("yet yet yet yet yet"));
        assert!(result.iterations > 30 && result.iterations <= 50);
    }
}
