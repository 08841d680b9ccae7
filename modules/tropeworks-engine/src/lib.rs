pub mod deps;
pub mod devices;
pub mod divergent;
pub mod evolution;
pub mod orchestrator;
pub mod personas;
pub mod providers;
pub mod store;
pub mod traits;
pub mod trajectory;
pub mod tropes;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use deps::EngineDeps;
pub use orchestrator::{GenerationInput, GenerationOutput, HybridGenerationOrchestrator};
pub use traits::{Embedder, GenerationParams, TextGenerator, TrajectoryStore, UsageCounterStore};
