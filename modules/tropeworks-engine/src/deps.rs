use std::sync::Arc;
use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::traits::{Embedder, TextGenerator, TrajectoryStore, UsageCounterStore};

/// External collaborators shared by every pipeline stage.
#[derive(Clone, TypedBuilder)]
pub struct EngineDeps {
    pub generator: Arc<dyn TextGenerator>,
    pub embedder: Arc<dyn Embedder>,
    /// Absent means every device has a usage count of zero.
    #[builder(default)]
    pub usage_store: Option<Arc<dyn UsageCounterStore>>,
    #[builder(default)]
    pub trajectory_store: Option<Arc<dyn TrajectoryStore>>,
    #[builder(default = Duration::from_secs(60))]
    pub call_timeout: Duration,
}

impl EngineDeps {
    pub fn usage_store(&self) -> Option<&dyn UsageCounterStore> {
        self.usage_store.as_deref()
    }
}
