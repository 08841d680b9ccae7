//! Usage-aware device selection that pushes generation across the whole
//! corpus instead of the handful of figures everyone already knows.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{display_name, normalize_device_id, DeviceCorpus};
use crate::traits::{usage_or_empty, UsageCounterStore};

/// Devices taught in every school curriculum. Excluded from selection unless
/// the caller asks for them by name.
pub const OVERUSED_DEVICES: [&str; 19] = [
    "metaphor",
    "simile",
    "hyperbole",
    "personification",
    "alliteration",
    "onomatopoeia",
    "oxymoron",
    "irony",
    "paradox",
    "analogy",
    "antithesis",
    "juxtaposition",
    "repetition",
    "rhetorical_question",
    "allusion",
    "imagery",
    "symbolism",
    "foreshadowing",
    "flashback",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    #[default]
    Creative,
    Analytical,
    Conversational,
    Technical,
    Emotional,
    Persuasive,
}

impl Tone {
    /// Devices with a natural affinity for this tone.
    pub fn affine_devices(self) -> &'static [&'static str] {
        match self {
            Tone::Creative => &[
                "metaphor", "paradox", "oxymoron", "synecdoche", "hyperbole", "personification",
                "allegory", "zeugma", "juxtaposition", "alliteration", "assonance", "ekphrasis",
                "paronomasia", "catachresis", "metalepsis", "syllepsis", "antanaclasis",
            ],
            Tone::Analytical => &[
                "antithesis", "chiasmus", "syllogism", "logos", "ethos", "polysyndeton",
                "asyndeton", "epistrophe", "anaphora", "climax", "prolepsis", "isocolon",
                "litotes", "ellipsis", "enthymeme", "epichirema", "sorites", "dilemma",
            ],
            Tone::Conversational => &[
                "rhetorical_question", "irony", "hyperbole", "paronomasia", "hendiadys",
                "anadiplosis", "epizeuxis", "symploce", "alliteration", "assonance", "meiosis",
                "litotes", "aposiopesis", "anacoluthon", "pathos", "apostrophe",
            ],
            Tone::Technical => &[
                "metonymy", "litotes", "synecdoche", "ellipsis", "hendiadys", "chiasmus",
                "climax", "syllogism", "logos", "ethos", "isocolon", "parallelism", "prolepsis",
                "anaphora", "epistrophe", "polysyndeton", "asyndeton", "enumeration",
            ],
            Tone::Emotional => &[
                "pathos", "hyperbole", "exclamation", "apostrophe", "personification",
                "prosopopoeia", "erotema", "ecphonesis", "aposiopesis", "epimone",
                "conduplicatio", "anaphora", "epistrophe", "symploce", "epizeuxis", "ploce",
            ],
            Tone::Persuasive => &[
                "ethos", "pathos", "logos", "antithesis", "chiasmus", "anaphora", "epistrophe",
                "climax", "rhetorical_question", "procatalepsis", "apophasis", "paralepsis",
                "concession", "refutation", "amplification", "diminution",
            ],
        }
    }

    /// Unknown tones read as creative.
    pub fn parse_lossy(raw: &str) -> Self {
        raw.parse().unwrap_or_default()
    }
}

impl FromStr for Tone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "creative" => Ok(Tone::Creative),
            "analytical" => Ok(Tone::Analytical),
            "conversational" => Ok(Tone::Conversational),
            "technical" => Ok(Tone::Technical),
            "emotional" => Ok(Tone::Emotional),
            "persuasive" => Ok(Tone::Persuasive),
            other => Err(format!("unknown tone: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    Unexplored,
    LightlyUsed,
    ModeratelyUsed,
    ToneMatched,
    Random,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TropeSelection {
    pub device_id: String,
    pub device_name: String,
    pub definition: String,
    pub usage_count: u32,
    pub reason: SelectionReason,
}

#[derive(Debug, Clone)]
pub struct VarietyOptions {
    pub tone: Tone,
    pub count: usize,
    pub exclude: Vec<String>,
    /// Overused devices the caller explicitly wants back in the pool.
    pub allow_overused: Vec<String>,
    /// Upper usage bound of the "moderately used" tier.
    pub max_usage_count: u32,
    /// Share of the selection reserved for unexplored/lightly-used devices.
    pub exploration_share: f32,
}

impl Default for VarietyOptions {
    fn default() -> Self {
        Self {
            tone: Tone::Creative,
            count: 3,
            exclude: Vec::new(),
            allow_overused: Vec::new(),
            max_usage_count: 5,
            exploration_share: 0.8,
        }
    }
}

impl VarietyOptions {
    pub fn with_count(count: usize) -> Self {
        Self {
            count,
            ..Self::default()
        }
    }
}

struct Picker<'a> {
    corpus: &'a DeviceCorpus,
    usage: &'a HashMap<String, u32>,
    count: usize,
    selected: Vec<TropeSelection>,
    taken: HashSet<String>,
}

impl Picker<'_> {
    fn full(&self) -> bool {
        self.selected.len() >= self.count
    }

    fn add(&mut self, device_id: &str, reason: SelectionReason) -> bool {
        if self.full() || !self.taken.insert(device_id.to_string()) {
            return false;
        }
        self.selected.push(TropeSelection {
            device_id: device_id.to_string(),
            device_name: display_name(device_id),
            definition: self
                .corpus
                .definition(device_id)
                .unwrap_or("Rhetorical device")
                .to_string(),
            usage_count: self.usage.get(device_id).copied().unwrap_or(0),
            reason,
        });
        true
    }

    fn fill(&mut self, candidates: &[String], reason: SelectionReason, limit: usize) -> usize {
        let mut added = 0;
        for id in candidates {
            if added >= limit || self.full() {
                break;
            }
            if self.add(id, reason) {
                added += 1;
            }
        }
        added
    }
}

fn shuffled<R: Rng + ?Sized>(items: impl IntoIterator<Item = String>, rng: &mut R) -> Vec<String> {
    let mut v: Vec<String> = items.into_iter().collect();
    v.shuffle(rng);
    v
}

/// Greedy quota fill over usage tiers.
///
/// The exploration quota (`ceil(count * exploration_share)`) is filled from
/// unexplored then lightly-used devices regardless of tone. The rest goes to
/// tone-affine devices, then the moderately-used tier, then anything eligible.
/// The result never contains duplicates or non-requested overused devices.
pub fn select_varied_tropes<R: Rng + ?Sized>(
    corpus: &DeviceCorpus,
    usage: &HashMap<String, u32>,
    options: &VarietyOptions,
    rng: &mut R,
) -> Vec<TropeSelection> {
    let excluded: HashSet<String> = options.exclude.iter().map(|d| normalize_device_id(d)).collect();
    let allowed: HashSet<String> = options
        .allow_overused
        .iter()
        .map(|d| normalize_device_id(d))
        .collect();

    let eligible: Vec<String> = corpus
        .ids()
        .filter(|id| !excluded.contains(*id))
        .filter(|id| !OVERUSED_DEVICES.contains(id) || allowed.contains(*id))
        .map(str::to_string)
        .collect();

    let usage_of = |id: &str| usage.get(id).copied().unwrap_or(0);
    let tier = |pred: &dyn Fn(u32) -> bool| -> Vec<String> {
        eligible.iter().filter(|id| pred(usage_of(id))).cloned().collect()
    };
    let unexplored = tier(&|n| n == 0);
    let lightly_used = tier(&|n| (1..=2).contains(&n));
    let moderately_used = tier(&|n| n > 2 && n <= options.max_usage_count);

    debug!(
        eligible = eligible.len(),
        unexplored = unexplored.len(),
        lightly_used = lightly_used.len(),
        moderately_used = moderately_used.len(),
        "Device usage tiers"
    );

    let tone_set: HashSet<&str> = options.tone.affine_devices().iter().copied().collect();
    let tone_filter =
        |ids: &[String]| -> Vec<String> { ids.iter().filter(|id| tone_set.contains(id.as_str())).cloned().collect() };

    let mut picker = Picker {
        corpus,
        usage,
        count: options.count,
        selected: Vec::with_capacity(options.count),
        taken: HashSet::new(),
    };

    // Phase 1: exploration quota, tone-agnostic.
    let quota = (options.count as f32 * options.exploration_share).ceil() as usize;
    let filled = picker.fill(&shuffled(unexplored.clone(), rng), SelectionReason::Unexplored, quota);
    if filled < quota {
        picker.fill(
            &shuffled(lightly_used.clone(), rng),
            SelectionReason::LightlyUsed,
            quota - filled,
        );
    }

    // Phase 2: tone-affine devices, least used first.
    picker.fill(&shuffled(tone_filter(&unexplored), rng), SelectionReason::Unexplored, usize::MAX);
    picker.fill(&shuffled(tone_filter(&lightly_used), rng), SelectionReason::LightlyUsed, usize::MAX);
    picker.fill(&shuffled(tone_filter(&eligible), rng), SelectionReason::ToneMatched, usize::MAX);

    // Phase 3: relax to the next tier, then the full eligible set.
    picker.fill(&shuffled(moderately_used, rng), SelectionReason::ModeratelyUsed, usize::MAX);
    picker.fill(&shuffled(eligible, rng), SelectionReason::Random, usize::MAX);

    picker.selected
}

// =============================================================================
// Exploration stats
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplorationStats {
    pub total_devices: usize,
    pub explored_count: usize,
    pub unexplored_count: usize,
    pub exploration_percentage: f32,
    pub most_used: Vec<(String, u32)>,
    pub never_used: Vec<String>,
}

pub fn exploration_stats(corpus: &DeviceCorpus, usage: &HashMap<String, u32>) -> ExplorationStats {
    let mut used: Vec<(String, u32)> = Vec::new();
    let mut never_used: Vec<String> = Vec::new();

    for id in corpus.ids() {
        match usage.get(id).copied().unwrap_or(0) {
            0 => never_used.push(id.to_string()),
            n => used.push((id.to_string(), n)),
        }
    }

    used.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let explored_count = used.len();
    let unexplored_count = never_used.len();
    let total = corpus.len();

    ExplorationStats {
        total_devices: total,
        explored_count,
        unexplored_count,
        exploration_percentage: if total == 0 {
            0.0
        } else {
            explored_count as f32 / total as f32 * 100.0
        },
        most_used: used.into_iter().take(10).collect(),
        never_used: never_used.into_iter().take(20).collect(),
    }
}

// =============================================================================
// VarietySelector service
// =============================================================================

/// Binds the corpus to the usage store for callers that do not manage
/// usage counts themselves.
#[derive(Clone)]
pub struct VarietySelector {
    corpus: Arc<DeviceCorpus>,
    usage_store: Option<Arc<dyn UsageCounterStore>>,
}

impl VarietySelector {
    pub fn new(corpus: Arc<DeviceCorpus>, usage_store: Option<Arc<dyn UsageCounterStore>>) -> Self {
        Self { corpus, usage_store }
    }

    pub fn corpus(&self) -> &DeviceCorpus {
        &self.corpus
    }

    pub async fn select(&self, options: &VarietyOptions) -> Vec<TropeSelection> {
        let usage = usage_or_empty(self.usage_store.as_deref()).await;
        let selected = select_varied_tropes(&self.corpus, &usage, options, &mut rand::rng());
        info!(
            count = selected.len(),
            unexplored = selected
                .iter()
                .filter(|s| s.reason == SelectionReason::Unexplored)
                .count(),
            devices = ?selected.iter().map(|s| s.device_id.as_str()).collect::<Vec<_>>(),
            "Selected varied devices"
        );
        selected
    }

    /// Only never-used devices make it into the tiered phases.
    pub async fn suggest_devices_to_explore(&self, count: usize, tone: Tone) -> Vec<TropeSelection> {
        self.select(&VarietyOptions {
            tone,
            count,
            max_usage_count: 0,
            ..VarietyOptions::default()
        })
        .await
    }

    pub async fn record_usage(&self, device_ids: &[String]) -> Result<()> {
        let Some(store) = self.usage_store.as_deref() else {
            return Ok(());
        };
        let normalized: Vec<String> = device_ids.iter().map(|d| normalize_device_id(d)).collect();
        store.increment(&normalized).await
    }

    pub async fn exploration_stats(&self) -> ExplorationStats {
        let usage = usage_or_empty(self.usage_store.as_deref()).await;
        exploration_stats(&self.corpus, &usage)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::devices::CorpusEntry;
    use crate::store::InMemoryUsageStore;

    fn corpus_of(names: &[&str]) -> DeviceCorpus {
        DeviceCorpus::from_entries(names.iter().map(|n| CorpusEntry {
            figure_name: n.to_string(),
            definition: format!("{n} definition"),
            examples: Vec::new(),
        }))
    }

    #[test]
    fn never_returns_duplicates_or_overused() {
        let corpus = DeviceCorpus::bundled();
        let usage = HashMap::new();
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            for count in [1, 3, 5, 12] {
                let picks = select_varied_tropes(
                    &corpus,
                    &usage,
                    &VarietyOptions::with_count(count),
                    &mut rng,
                );
                let ids: HashSet<&str> = picks.iter().map(|p| p.device_id.as_str()).collect();
                assert_eq!(ids.len(), picks.len(), "duplicate device selected");
                assert_eq!(picks.len(), count);
                for id in &ids {
                    assert!(!OVERUSED_DEVICES.contains(id), "{id} is overused");
                }
            }
        }
    }

    #[test]
    fn overused_devices_return_when_requested() {
        let corpus = corpus_of(&["Metaphor"]);
        let mut rng = StdRng::seed_from_u64(1);
        let options = VarietyOptions {
            count: TROPE_COUNT_ALL,
            allow_overused: vec!["Metaphor".into()],
            ..VarietyOptions::default()
        };
        let picks = select_varied_tropes(&corpus, &HashMap::new(), &options, &mut rng);
        assert!(picks.iter().any(|p| p.device_id == "metaphor"));
        assert!(!picks.iter().any(|p| p.device_id == "simile"));
    }

    const TROPE_COUNT_ALL: usize = 100;

    #[test]
    fn exploration_quota_prefers_unexplored() {
        let corpus = DeviceCorpus::bundled();
        // every eligible device used heavily except two
        let mut usage: HashMap<String, u32> = corpus.ids().map(|id| (id.to_string(), 4)).collect();
        usage.insert("tmesis".into(), 0);
        usage.insert("hypallage".into(), 0);

        let mut rng = StdRng::seed_from_u64(9);
        let picks = select_varied_tropes(&corpus, &usage, &VarietyOptions::with_count(3), &mut rng);
        let unexplored: HashSet<&str> = picks
            .iter()
            .filter(|p| p.reason == SelectionReason::Unexplored)
            .map(|p| p.device_id.as_str())
            .collect();
        assert_eq!(unexplored, HashSet::from(["tmesis", "hypallage"]));
        assert_eq!(picks.len(), 3);
    }

    #[test]
    fn relaxes_to_full_set_when_tiers_are_exhausted() {
        let corpus = corpus_of(&["Tmesis", "Hypallage"]);
        let usage: HashMap<String, u32> = corpus.ids().map(|id| (id.to_string(), 50)).collect();
        let mut rng = StdRng::seed_from_u64(2);
        let picks = select_varied_tropes(&corpus, &usage, &VarietyOptions::with_count(4), &mut rng);
        assert_eq!(picks.len(), 4);
        assert!(picks
            .iter()
            .all(|p| matches!(p.reason, SelectionReason::Random | SelectionReason::ToneMatched)));
    }

    #[test]
    fn excluded_devices_are_skipped() {
        let corpus = corpus_of(&["Tmesis", "Hypallage"]);
        let options = VarietyOptions {
            count: TROPE_COUNT_ALL,
            exclude: vec!["Tmesis".into()],
            ..VarietyOptions::default()
        };
        let picks =
            select_varied_tropes(&corpus, &HashMap::new(), &options, &mut StdRng::seed_from_u64(5));
        assert!(picks.iter().all(|p| p.device_id != "tmesis"));
        assert!(picks.iter().any(|p| p.device_id == "hypallage"));
    }

    #[test]
    fn unknown_tone_reads_as_creative() {
        assert_eq!(Tone::parse_lossy("whimsical"), Tone::Creative);
        assert_eq!(Tone::parse_lossy("Persuasive"), Tone::Persuasive);
    }

    #[test]
    fn stats_count_explored_devices() {
        let corpus = corpus_of(&["Tmesis", "Hypallage"]);
        let usage = HashMap::from([("tmesis".to_string(), 3), ("zeugma".to_string(), 7)]);
        let stats = exploration_stats(&corpus, &usage);
        assert_eq!(stats.total_devices, corpus.len());
        assert_eq!(stats.explored_count, 2);
        assert_eq!(stats.most_used[0], ("zeugma".to_string(), 7));
        assert!(stats.never_used.len() <= 20);
        assert!(stats.exploration_percentage > 0.0);
    }

    #[tokio::test]
    async fn selector_records_normalized_usage() {
        let store = Arc::new(InMemoryUsageStore::new());
        let selector = VarietySelector::new(Arc::new(DeviceCorpus::bundled()), Some(store.clone()));
        selector
            .record_usage(&["Hendiadys".into(), "hendiadys".into()])
            .await
            .unwrap();
        assert_eq!(store.count("hendiadys"), 2);

        let suggestions = selector.suggest_devices_to_explore(5, Tone::Analytical).await;
        assert_eq!(suggestions.len(), 5);
        assert!(suggestions.iter().all(|s| s.device_id != "hendiadys"
            || s.reason != SelectionReason::Unexplored));
    }
}
