//! Divergent exploration: concurrent persona × device × domain generations
//! that fill a pool of creative seeds, then pick one to build on.

pub mod dedup;
pub mod parse;

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use rand::seq::{IndexedRandom, SliceRandom};
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use tropeworks_common::{CreativeSeed, DivergentPool, Persona, PoolMetrics, TropeworksError};

use crate::deps::EngineDeps;
use crate::devices::{DeviceCorpus, OVERUSED_DEVICES};
use crate::personas::{select_persona, PersonaRotation, PersonaUsage};
use crate::traits::{embed_within, generate_within, GenerationParams};

pub use dedup::{deduplicate_seeds, theme_tags};
pub use parse::{parse_directions, Direction};

/// Directions requested per generation call.
const DIRECTIONS_PER_CALL: usize = 5;
const MAX_COMPATIBLE_DEVICES: usize = 5;
const RARE_PRIORITY_SHARE: f64 = 0.7;

/// Uncommon devices that make for the most surprising anchors.
const PRIORITY_RARE_DEVICES: &[&str] = &[
    "chiasmus",
    "zeugma",
    "anadiplosis",
    "antimetabole",
    "syllepsis",
    "hendiadys",
    "polyptoton",
    "epanalepsis",
    "hypallage",
    "litotes",
    "synecdoche",
    "metonymy",
];

/// Source domains for imagery. Each iteration in a run gets a different one.
const METAPHOR_DOMAINS: &[&str] = &[
    "astronomy",
    "architecture",
    "music",
    "geology",
    "botany",
    "cartography",
    "textiles",
    "clockmaking",
    "mycology",
    "glassblowing",
    "meteorology",
    "beekeeping",
];

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "for", "of", "to", "in", "on", "at", "by", "with",
    "from", "as", "is", "are", "was", "were", "be", "been", "that", "this", "these", "those",
    "it", "its", "our", "your", "their", "we", "you", "they", "i", "me", "my", "create", "make",
    "campaign", "ad", "ads", "advertising", "concept", "concepts", "brief", "about", "into",
    "new", "need", "needs", "want", "wants", "some", "any", "will", "should", "would", "can",
];

/// Keyword cues suggesting which devices an idea already leans toward.
static DEVICE_CUES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("paradox", r"contradict|opposite|\byet\b|\bbut\b|tension"),
        ("metaphor", r"\blike\b|as if|becomes|transforms"),
        ("antithesis", r"versus|against|contrast|between"),
        ("hyperbole", r"\bnever\b|\balways\b|\bevery|ultimate|infinite"),
        ("oxymoron", r"silent.*loud|beautiful.*ugly|dark.*light"),
        ("personification", r"whisper|speaks|breathes|\blives\b"),
        ("chiasmus", r"first.*last|begin.*end|rise.*fall"),
        ("juxtaposition", r"side by side|together|collision"),
    ]
    .into_iter()
    .map(|(device, cue)| {
        (
            device,
            Regex::new(&format!("(?i){cue}")).expect("valid device cue"),
        )
    })
    .collect()
});

const EXPLORATION_PROMPT: &str = "You are in pure exploration mode. Generate surprising, \
unconventional creative directions for the theme below.

Rules for this phase:
1. Ignore advertising conventions and best practices.
2. Do not optimize for clarity or commercial viability.
3. Favor strange connections and unexpected angles.
4. Prioritize surprise and distinctiveness over everything else.

Theme to explore: {theme}

Anchor every direction in imagery from {domain}. Let the structure of {device} \
({device_definition}) shape at least one provocative phrase.

Generate exactly 5 radically different directions. Format each as:
DIRECTION [N]:
Entry Point: [unexpected starting perspective]
Connection: [surprising link to an unrelated domain]
Core Tension: [the paradox or insight at the heart]
Provocative Phrase: [single memorable expression]
Visual Spark: [unexpected imagery]";

/// Knobs for one exploration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExploreOptions {
    pub pool_size: usize,
    pub persona_rotation: PersonaRotation,
    pub max_temperature: f32,
    /// Embed each idea so the similarity dedup check has real input.
    pub embed_seeds: bool,
    pub concurrency: usize,
}

impl Default for ExploreOptions {
    fn default() -> Self {
        Self {
            pool_size: 15,
            persona_rotation: PersonaRotation::Weighted,
            max_temperature: 1.5,
            embed_seeds: false,
            concurrency: 8,
        }
    }
}

/// Everything one iteration needs, fixed before the fan-out starts.
#[derive(Debug, Clone)]
struct IterationPlan {
    index: usize,
    persona: &'static Persona,
    device: String,
    domain: &'static str,
    temperature: f32,
}

/// Weights and floors for [`select_creative_seed`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeedCriteria {
    pub distinctiveness_weight: f32,
    pub coherence_weight: f32,
    pub trope_compatibility_weight: f32,
    pub minimum_distinctiveness: f32,
    pub minimum_coherence: f32,
    pub minimum_compatible_devices: usize,
}

impl Default for SeedCriteria {
    fn default() -> Self {
        Self {
            distinctiveness_weight: 0.4,
            coherence_weight: 0.3,
            trope_compatibility_weight: 0.3,
            minimum_distinctiveness: 0.3,
            minimum_coherence: 0.5,
            minimum_compatible_devices: 1,
        }
    }
}

// =============================================================================
// Free helpers
// =============================================================================

/// First five content words of the brief.
pub fn extract_theme(brief: &str) -> String {
    let words: Vec<String> = brief
        .split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '-'))
        .filter(|w| !w.is_empty())
        .filter(|w| !STOP_WORDS.contains(&w.to_lowercase().as_str()))
        .take(5)
        .map(str::to_string)
        .collect();
    if words.is_empty() {
        brief.split_whitespace().take(5).collect::<Vec<_>>().join(" ")
    } else {
        words.join(" ")
    }
}

/// Devices an idea is compatible with: the anchor device first, then any
/// keyword cues. Falls back to metaphor and hyperbole; never empty.
pub fn compatible_devices(idea: &str, anchor: Option<&str>) -> Vec<String> {
    let mut devices: Vec<String> = anchor.map(str::to_string).into_iter().collect();
    for (device, cue) in DEVICE_CUES.iter() {
        if cue.is_match(idea) && !devices.iter().any(|d| d == device) {
            devices.push(device.to_string());
        }
    }
    if devices.is_empty() {
        devices = vec!["metaphor".to_string(), "hyperbole".to_string()];
    }
    devices.truncate(MAX_COMPATIBLE_DEVICES);
    devices
}

/// Pick the best seed under `criteria`. Falls back to the highest
/// `distinctiveness + coherence` seed when nothing passes the floors. Only an
/// empty pool is an error.
pub fn select_creative_seed<'a>(
    pool: &'a DivergentPool,
    criteria: &SeedCriteria,
) -> Result<&'a CreativeSeed, TropeworksError> {
    let score = |s: &CreativeSeed| {
        s.distinctiveness * criteria.distinctiveness_weight
            + s.coherence * criteria.coherence_weight
            + (s.compatible_devices.len().min(MAX_COMPATIBLE_DEVICES) as f32
                / MAX_COMPATIBLE_DEVICES as f32)
                * criteria.trope_compatibility_weight
    };

    let best_eligible = pool
        .seeds
        .iter()
        .filter(|s| {
            s.distinctiveness >= criteria.minimum_distinctiveness
                && s.coherence >= criteria.minimum_coherence
                && s.compatible_devices.len() >= criteria.minimum_compatible_devices
        })
        .max_by(|a, b| score(a).total_cmp(&score(b)));

    let selected = match best_eligible {
        Some(seed) => seed,
        None => {
            warn!(pool = pool.seeds.len(), "No seed met the selection floors, using best available");
            pool.seeds
                .iter()
                .max_by(|a, b| {
                    (a.distinctiveness + a.coherence).total_cmp(&(b.distinctiveness + b.coherence))
                })
                .ok_or(TropeworksError::EmptyPool)?
        }
    };

    info!(
        seed_id = %selected.id,
        persona = %selected.persona_id,
        distinctiveness = selected.distinctiveness,
        coherence = selected.coherence,
        devices = ?selected.compatible_devices,
        "Selected creative seed"
    );
    Ok(selected)
}

// =============================================================================
// DivergentExplorer
// =============================================================================

pub struct DivergentExplorer {
    deps: EngineDeps,
    corpus: Arc<DeviceCorpus>,
}

impl DivergentExplorer {
    pub fn new(deps: EngineDeps, corpus: Arc<DeviceCorpus>) -> Self {
        Self { deps, corpus }
    }

    /// Build a seed pool for `brief`. Failed or unparseable iterations are
    /// logged and contribute nothing; an all-failed run yields an empty pool.
    pub async fn explore(&self, brief: &str, options: &ExploreOptions) -> DivergentPool {
        let theme = extract_theme(brief);
        let iterations = options.pool_size.div_ceil(DIRECTIONS_PER_CALL).max(1);
        let plans = self.plan_iterations(iterations, options, &mut rand::rng());

        let mut persona_distribution: BTreeMap<String, usize> = BTreeMap::new();
        for plan in &plans {
            *persona_distribution.entry(plan.persona.id.clone()).or_insert(0) += 1;
        }

        info!(
            theme = %theme,
            pool_size = options.pool_size,
            iterations,
            rotation = ?options.persona_rotation,
            "Starting divergent exploration"
        );

        let batches: Vec<Vec<(String, &IterationPlan)>> = stream::iter(plans.iter())
            .map(|plan| {
                let theme = theme.as_str();
                async move { self.run_iteration(theme, plan).await }
            })
            .buffered(options.concurrency.max(1))
            .collect()
            .await;

        let mut seeds: Vec<CreativeSeed> = Vec::new();
        {
            let mut rng = rand::rng();
            for (idea, plan) in batches.into_iter().flatten() {
                if seeds.len() >= options.pool_size {
                    break;
                }
                seeds.push(CreativeSeed {
                    id: Uuid::new_v4(),
                    distinctiveness: rng.random_range(0.5..0.8),
                    coherence: if idea.chars().count() > 20 { 0.7 } else { 0.5 },
                    compatible_devices: compatible_devices(&idea, Some(&plan.device)),
                    persona_id: plan.persona.id.clone(),
                    idea,
                    embedding: None,
                    created_at: Utc::now(),
                });
            }
        }

        if options.embed_seeds {
            self.embed_seeds(&mut seeds, options.concurrency).await;
        }

        let total_generated = seeds.len();
        let unique = deduplicate_seeds(seeds);
        let average_distinctiveness = if unique.is_empty() {
            0.0
        } else {
            unique.iter().map(|s| s.distinctiveness).sum::<f32>() / unique.len() as f32
        };

        let metrics = PoolMetrics {
            total_generated,
            unique_after_dedup: unique.len(),
            average_distinctiveness,
            persona_distribution,
        };

        info!(
            total = metrics.total_generated,
            unique = metrics.unique_after_dedup,
            avg_distinctiveness = metrics.average_distinctiveness,
            "Divergent exploration complete"
        );

        DivergentPool {
            seeds: unique,
            brief: brief.to_string(),
            theme,
            metrics,
        }
    }

    /// Personas, anchor devices and domains for every iteration, chosen up
    /// front so concurrent calls cannot converge on the same combination.
    fn plan_iterations<R: Rng + ?Sized>(
        &self,
        iterations: usize,
        options: &ExploreOptions,
        rng: &mut R,
    ) -> Vec<IterationPlan> {
        let priority: Vec<&str> = PRIORITY_RARE_DEVICES
            .iter()
            .copied()
            .filter(|d| self.corpus.contains(d))
            .collect();
        let uncommon: Vec<&str> = self
            .corpus
            .ids()
            .filter(|d| !OVERUSED_DEVICES.contains(d) && !PRIORITY_RARE_DEVICES.contains(d))
            .collect();

        let mut domains: Vec<&'static str> = METAPHOR_DOMAINS.to_vec();
        domains.shuffle(rng);

        let mut usage = PersonaUsage::new();
        let mut used_devices: Vec<String> = Vec::new();

        (0..iterations)
            .map(|index| {
                let persona = select_persona(index, options.persona_rotation, &usage, rng);
                usage.record(persona);

                let from_priority = rng.random_bool(RARE_PRIORITY_SHARE);
                let device = pick_unused(
                    if from_priority { &priority } else { &uncommon },
                    &used_devices,
                    rng,
                )
                .or_else(|| pick_unused(if from_priority { &uncommon } else { &priority }, &used_devices, rng))
                .unwrap_or("chiasmus")
                .to_string();
                used_devices.push(device.clone());

                IterationPlan {
                    index,
                    persona,
                    device,
                    domain: domains[index % domains.len()],
                    temperature: (1.0 + persona.temperature_modifier).min(options.max_temperature),
                }
            })
            .collect()
    }

    async fn run_iteration<'p>(&self, theme: &str, plan: &'p IterationPlan) -> Vec<(String, &'p IterationPlan)> {
        let definition = self
            .corpus
            .definition(&plan.device)
            .unwrap_or("a rhetorical device");
        let prompt = EXPLORATION_PROMPT
            .replace("{theme}", theme)
            .replace("{domain}", plan.domain)
            .replace("{device_definition}", definition)
            .replace("{device}", &plan.device.replace('_', " "));

        let response = match generate_within(
            self.deps.generator.as_ref(),
            self.deps.call_timeout,
            &plan.persona.directive,
            &prompt,
            GenerationParams::new(plan.temperature, 1500),
        )
        .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    iteration = plan.index,
                    persona = %plan.persona.id,
                    device = %plan.device,
                    error = %e,
                    "Divergent generation failed"
                );
                return Vec::new();
            }
        };

        match parse_directions(&response) {
            Ok(directions) => {
                let ideas: Vec<(String, &IterationPlan)> = directions
                    .iter()
                    .map(Direction::idea)
                    .filter(|idea| idea.chars().count() > 10)
                    .take(DIRECTIONS_PER_CALL)
                    .map(|idea| (idea, plan))
                    .collect();
                debug!(
                    iteration = plan.index,
                    persona = %plan.persona.id,
                    domain = plan.domain,
                    ideas = ideas.len(),
                    "Divergent iteration parsed"
                );
                ideas
            }
            Err(e) => {
                warn!(iteration = plan.index, persona = %plan.persona.id, error = %e, "Unparseable exploration response");
                Vec::new()
            }
        }
    }

    async fn embed_seeds(&self, seeds: &mut [CreativeSeed], concurrency: usize) {
        let embedder = self.deps.embedder.as_ref();
        let timeout = self.deps.call_timeout;
        let vectors: Vec<Vec<f32>> = stream::iter(seeds.iter())
            .map(|seed| embed_within(embedder, timeout, &seed.idea))
            .buffered(concurrency.max(1))
            .collect()
            .await;
        for (seed, vector) in seeds.iter_mut().zip(vectors) {
            seed.embedding = (!vector.is_empty()).then_some(vector);
        }
    }
}

fn pick_unused<'a, R: Rng + ?Sized>(
    candidates: &[&'a str],
    used: &[String],
    rng: &mut R,
) -> Option<&'a str> {
    let fresh: Vec<&'a str> = candidates
        .iter()
        .copied()
        .filter(|c| !used.iter().any(|u| u == c))
        .collect();
    fresh.choose(rng).or_else(|| candidates.choose(rng)).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixedEmbedder, MockGenerator};

    fn seed(distinctiveness: f32, coherence: f32, devices: usize) -> CreativeSeed {
        CreativeSeed {
            id: Uuid::new_v4(),
            idea: "idea".into(),
            persona_id: "poet".into(),
            distinctiveness,
            coherence,
            compatible_devices: (0..devices).map(|i| format!("device_{i}")).collect(),
            embedding: None,
            created_at: Utc::now(),
        }
    }

    fn pool(seeds: Vec<CreativeSeed>) -> DivergentPool {
        DivergentPool {
            seeds,
            brief: "brief".into(),
            theme: "theme".into(),
            metrics: PoolMetrics::default(),
        }
    }

    #[test]
    fn theme_keeps_first_five_content_words() {
        assert_eq!(
            extract_theme("Create a campaign for the sustainable sneakers that are made from ocean plastic"),
            "sustainable sneakers made ocean plastic"
        );
        assert_eq!(extract_theme("sustainable sneakers"), "sustainable sneakers");
    }

    #[test]
    fn compatible_devices_are_capped_and_never_empty() {
        assert_eq!(compatible_devices("a red shoe", None), vec!["metaphor", "hyperbole"]);

        let busy = "Silent yet loud, it becomes everything versus nothing, whispers, \
                    first and last, side by side, never";
        let devices = compatible_devices(busy, Some("zeugma"));
        assert_eq!(devices.len(), MAX_COMPATIBLE_DEVICES);
        assert_eq!(devices[0], "zeugma");
    }

    #[test]
    fn selection_scores_eligible_seeds() {
        let p = pool(vec![seed(0.9, 0.5, 1), seed(0.6, 0.7, 5), seed(0.2, 0.9, 5)]);
        let selected = select_creative_seed(&p, &SeedCriteria::default()).unwrap();
        // 0.24 + 0.21 + 0.30 beats 0.36 + 0.15 + 0.06
        assert_eq!(selected.id, p.seeds[1].id);
    }

    #[test]
    fn selection_falls_back_when_nothing_is_eligible() {
        let p = pool(vec![seed(0.1, 0.2, 0), seed(0.2, 0.3, 0)]);
        let selected = select_creative_seed(&p, &SeedCriteria::default()).unwrap();
        assert_eq!(selected.id, p.seeds[1].id);
    }

    #[test]
    fn empty_pool_is_an_error() {
        assert!(matches!(
            select_creative_seed(&pool(Vec::new()), &SeedCriteria::default()),
            Err(TropeworksError::EmptyPool)
        ));
    }

    fn explorer(generator: MockGenerator) -> DivergentExplorer {
        let deps = EngineDeps::builder()
            .generator(Arc::new(generator))
            .embedder(Arc::new(FixedEmbedder::new(16)))
            .build();
        DivergentExplorer::new(deps, Arc::new(DeviceCorpus::bundled()))
    }

    #[test]
    fn plans_use_distinct_domains_and_devices() {
        let explorer = explorer(MockGenerator::new());
        let plans = explorer.plan_iterations(6, &ExploreOptions::default(), &mut rand::rng());
        let domains: std::collections::HashSet<&str> = plans.iter().map(|p| p.domain).collect();
        let devices: std::collections::HashSet<&str> = plans.iter().map(|p| p.device.as_str()).collect();
        assert_eq!(domains.len(), 6);
        assert_eq!(devices.len(), 6);
        for plan in &plans {
            assert!(!OVERUSED_DEVICES.contains(&plan.device.as_str()));
            assert!(plan.temperature <= 1.5);
        }
    }

    #[tokio::test]
    async fn failed_iterations_yield_an_empty_pool() {
        let pool = explorer(MockGenerator::failing())
            .explore("sustainable sneakers", &ExploreOptions::default())
            .await;
        assert!(pool.seeds.is_empty());
        assert_eq!(pool.metrics.total_generated, 0);
        assert_eq!(pool.metrics.persona_distribution.values().sum::<usize>(), 3);
    }

    #[tokio::test]
    async fn embedded_seeds_carry_vectors() {
        let pool = explorer(MockGenerator::new().on_any(crate::testing::DIRECTIONS_RESPONSE))
            .explore(
                "sustainable sneakers",
                &ExploreOptions {
                    pool_size: 5,
                    embed_seeds: true,
                    ..ExploreOptions::default()
                },
            )
            .await;
        assert!(!pool.seeds.is_empty());
        assert!(pool.seeds.iter().all(|s| s.embedding.as_ref().is_some_and(|e| e.len() == 16)));
    }
}
