use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use tropeworks_common::GenerationTrajectory;

use crate::devices::normalize_device_id;
use crate::traits::{TrajectoryStore, UsageCounterStore};

// ---------------------------------------------------------------------------
// InMemoryUsageStore
// ---------------------------------------------------------------------------

/// Process-local usage counters. Last writer wins; counts are advisory.
#[derive(Default)]
pub struct InMemoryUsageStore {
    counts: Mutex<HashMap<String, u32>>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed counts, e.g. to simulate a well-explored corpus in tests.
    pub fn with_counts<I, S>(counts: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: AsRef<str>,
    {
        let map = counts
            .into_iter()
            .map(|(id, n)| (normalize_device_id(id.as_ref()), n))
            .collect();
        Self {
            counts: Mutex::new(map),
        }
    }

    pub fn count(&self, device_id: &str) -> u32 {
        self.counts
            .lock()
            .map(|c| c.get(&normalize_device_id(device_id)).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

#[async_trait]
impl UsageCounterStore for InMemoryUsageStore {
    async fn usage_counts(&self) -> Result<HashMap<String, u32>> {
        self.counts
            .lock()
            .map(|c| c.clone())
            .map_err(|_| anyhow!("usage counter lock poisoned"))
    }

    async fn increment(&self, device_ids: &[String]) -> Result<()> {
        let mut counts = self
            .counts
            .lock()
            .map_err(|_| anyhow!("usage counter lock poisoned"))?;
        for id in device_ids {
            *counts.entry(normalize_device_id(id)).or_insert(0) += 1;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JsonlTrajectoryStore
// ---------------------------------------------------------------------------

/// Appends one JSON object per completed trajectory to a file.
pub struct JsonlTrajectoryStore {
    path: PathBuf,
    write_lock: AsyncMutex<()>,
}

impl JsonlTrajectoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: AsyncMutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TrajectoryStore for JsonlTrajectoryStore {
    async fn save(&self, trajectory: &GenerationTrajectory) -> Result<()> {
        let mut line = serde_json::to_string(trajectory)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening trajectory log {}", self.path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(
            trajectory_id = %trajectory.id,
            steps = trajectory.steps.len(),
            path = %self.path.display(),
            "Trajectory appended"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tropeworks_common::TrajectoryMetadata;
    use uuid::Uuid;

    use super::*;

    fn trajectory(brief: &str) -> GenerationTrajectory {
        GenerationTrajectory {
            id: Uuid::new_v4(),
            session_id: "session-1".into(),
            brief: brief.into(),
            theme: "theme".into(),
            seed_id: "legacy".into(),
            steps: Vec::new(),
            final_output: "out".into(),
            final_score: 0.5,
            total_loss: 0.0,
            metadata: TrajectoryMetadata {
                model_version: "test".into(),
                started_at: Utc::now(),
                ended_at: Some(Utc::now()),
                total_tokens: 0,
                evolution_cycles: 0,
                regression_count: 0,
            },
        }
    }

    #[tokio::test]
    async fn increments_normalize_ids() {
        let store = InMemoryUsageStore::new();
        store
            .increment(&["Rhetorical Question".into(), "rhetorical_question".into()])
            .await
            .unwrap();
        assert_eq!(store.count("rhetorical_question"), 2);
        let counts = store.usage_counts().await.unwrap();
        assert_eq!(counts.get("rhetorical_question"), Some(&2));
    }

    #[tokio::test]
    async fn seeded_counts_are_visible() {
        let store = InMemoryUsageStore::with_counts([("Zeugma", 4)]);
        assert_eq!(store.count("zeugma"), 4);
        assert_eq!(store.count("chiasmus"), 0);
    }

    #[tokio::test]
    async fn jsonl_store_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlTrajectoryStore::new(dir.path().join("trajectories.jsonl"));

        store.save(&trajectory("first")).await.unwrap();
        store.save(&trajectory("second")).await.unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: GenerationTrajectory = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.brief, "second");
    }

    #[tokio::test]
    async fn jsonl_store_reports_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlTrajectoryStore::new(dir.path().join("missing").join("log.jsonl"));
        assert!(store.save(&trajectory("x")).await.is_err());
    }
}
