// Test mocks for the generation pipeline.
//
// One mock per collaborator seam:
// - MockGenerator (TextGenerator): predicate-scripted responses, call log
// - FixedEmbedder (Embedder): deterministic hash-based unit vectors
// - InMemoryTrajectoryStore / FailingTrajectoryStore (TrajectoryStore)
// - InMemoryUsageStore (UsageCounterStore), re-exported from the store module
// - FailingUsageStore (UsageCounterStore): counter backend that is down
//
// Plus canned model responses in the shapes the parsers expect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use tropeworks_common::{content_hash, GenerationTrajectory};

use crate::traits::{Embedder, GenerationParams, TextGenerator, TrajectoryStore, UsageCounterStore};

pub use crate::store::InMemoryUsageStore;

// ---------------------------------------------------------------------------
// Canned responses
// ---------------------------------------------------------------------------

/// Five well-formed exploration directions.
pub const DIRECTIONS_RESPONSE: &str = "\
DIRECTION [1]:
Entry Point: The last step a shoe ever takes
Connection: Geology, sediment layers
Core Tension: Walking forward means leaving less behind
Provocative Phrase: Every step unwrites a footprint
Visual Spark: Soles pressing fossils into wet rock

DIRECTION [2]:
Entry Point: A sneaker's afterlife
Connection: Composting, soil microbes
Core Tension: Worn out becomes grown in
Provocative Phrase: Your old pair is somebody's garden
Visual Spark: Moss climbing out of an eyelet

DIRECTION [3]:
Entry Point: The weight of a lace
Connection: Bookkeeping, double-entry ledgers
Core Tension: Style that balances its own books
Provocative Phrase: Debit the planet nothing
Visual Spark: A ledger page stitched into a tongue

DIRECTION [4]:
Entry Point: Silence on a running track
Connection: Acoustics, anechoic chambers
Core Tension: The quietest shoe makes the loudest point
Provocative Phrase: Hear yourself not polluting
Visual Spark: A runner inside a soundproof foam room

DIRECTION [5]:
Entry Point: Borrowed soles
Connection: Libraries, lending cards
Core Tension: Owning less while wearing more
Provocative Phrase: Checked out, never thrown out
Visual Spark: A due-date stamp on a heel
";

/// A variant response in the section format the orchestrator parses.
pub const VARIANT_RESPONSE: &str = "\
# Walk Lighter
## Leave less. Go further.

**Visual Concept:** A lone runner crosses a salt flat at dawn, each footprint filling with seedlings instead of dust.

**Body Copy:** Made from reclaimed ocean plastic, built to be returned, designed to leave nothing behind but distance.

**Headlines:**
- Option 1: **Walk Lighter**
- Option 2: Less Rubber, More Road
- Option 3: The Earth Keeps Score, So Do You

**Rhetorical Analysis:** The headline balances weight against distance, setting lightness against impact.

**Strategic Impact:** Positions sustainability as performance rather than sacrifice.
";

// ---------------------------------------------------------------------------
// MockGenerator
// ---------------------------------------------------------------------------

type Predicate = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Scripted text generator. Rules are checked in registration order against
/// the user prompt; the first match wins. Unmatched prompts fall through to
/// the `on_any` response, or fail when there is none.
/// Builder pattern: `.on()`, `.on_any()`.
pub struct MockGenerator {
    rules: Vec<(Predicate, String)>,
    default: Option<String>,
    always_fail: bool,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            default: None,
            always_fail: false,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Every call errors, as if the service were unreachable.
    pub fn failing() -> Self {
        Self {
            always_fail: true,
            ..Self::new()
        }
    }

    pub fn on<F>(mut self, predicate: F, response: impl Into<String>) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.rules.push((Box::new(predicate), response.into()));
        self
    }

    pub fn on_any(mut self, response: impl Into<String>) -> Self {
        self.default = Some(response.into());
        self
    }

    /// Number of generate calls, failed ones included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// User prompts in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn generate(&self, _system: &str, user: &str, _params: GenerationParams) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(user.to_string());
        }
        if self.always_fail {
            bail!("MockGenerator: service unavailable");
        }
        self.rules
            .iter()
            .find(|(predicate, _)| predicate(user))
            .map(|(_, response)| response.clone())
            .or_else(|| self.default.clone())
            .ok_or_else(|| anyhow!("MockGenerator: no response scripted for prompt"))
    }
}

// ---------------------------------------------------------------------------
// FixedEmbedder
// ---------------------------------------------------------------------------

/// Deterministic embedder: identical text always maps to the same unit
/// vector, different text to an unrelated one.
pub struct FixedEmbedder {
    dimension: usize,
}

impl FixedEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn hash_vector(&self, text: &str) -> Vec<f32> {
        let mut state = content_hash(text);
        let mut vector = vec![0.0f32; self.dimension];
        for v in vector.iter_mut() {
            // LCG step
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            *v = ((state >> 32) as u32 as f32 / u32::MAX as f32) * 2.0 - 1.0;
        }
        tropeworks_common::normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, text: &str) -> Vec<f32> {
        self.hash_vector(text)
    }
}

// ---------------------------------------------------------------------------
// Trajectory stores
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryTrajectoryStore {
    saved: Mutex<Vec<GenerationTrajectory>>,
}

impl InMemoryTrajectoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self) -> Vec<GenerationTrajectory> {
        self.saved.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TrajectoryStore for InMemoryTrajectoryStore {
    async fn save(&self, trajectory: &GenerationTrajectory) -> Result<()> {
        self.saved
            .lock()
            .map_err(|_| anyhow!("trajectory store lock poisoned"))?
            .push(trajectory.clone());
        Ok(())
    }
}

/// Rejects every save.
pub struct FailingTrajectoryStore;

#[async_trait]
impl TrajectoryStore for FailingTrajectoryStore {
    async fn save(&self, _trajectory: &GenerationTrajectory) -> Result<()> {
        bail!("FailingTrajectoryStore: disk full")
    }
}

/// Usage counter backend that is down: reads and increments both error.
pub struct FailingUsageStore;

#[async_trait]
impl UsageCounterStore for FailingUsageStore {
    async fn usage_counts(&self) -> Result<HashMap<String, u32>> {
        bail!("FailingUsageStore: connection refused")
    }

    async fn increment(&self, _device_ids: &[String]) -> Result<()> {
        bail!("FailingUsageStore: connection refused")
    }
}
