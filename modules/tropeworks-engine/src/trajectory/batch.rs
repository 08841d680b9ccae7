use serde::Serialize;

use tropeworks_common::GenerationTrajectory;

pub const DEFAULT_BATCH_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LossStats {
    pub mean: f32,
    pub variance: f32,
    pub max: f32,
}

impl LossStats {
    fn from_values(values: &[f32]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let n = values.len() as f32;
        let mean = values.iter().sum::<f32>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
        let max = values.iter().copied().fold(f32::MIN, f32::max);
        Self { mean, variance, max }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchStats {
    pub trajectories: usize,
    /// Mean of the trajectories' cumulative losses.
    pub batch_loss: f32,
    pub mean_final_score: f32,
    /// Statistics over each trajectory's mean step loss.
    pub step_loss: LossStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BufferStatus {
    pub buffered: usize,
    pub batch_size: usize,
    pub ready: bool,
}

/// Buffers completed trajectories and summarizes them in fixed-size batches.
#[derive(Debug)]
pub struct TrainingBatchProcessor {
    batch_size: usize,
    buffer: Vec<GenerationTrajectory>,
}

impl TrainingBatchProcessor {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            buffer: Vec::new(),
        }
    }

    /// Buffer a trajectory. Returns true once a full batch is waiting.
    pub fn add(&mut self, trajectory: GenerationTrajectory) -> bool {
        self.buffer.push(trajectory);
        self.buffer.len() >= self.batch_size
    }

    /// Drain up to one batch from the front of the buffer.
    pub fn process_batch(&mut self) -> Option<BatchStats> {
        if self.buffer.is_empty() {
            return None;
        }
        let take = self.batch_size.min(self.buffer.len());
        let batch: Vec<GenerationTrajectory> = self.buffer.drain(..take).collect();
        let n = batch.len() as f32;

        let step_means: Vec<f32> = batch
            .iter()
            .map(|t| {
                if t.steps.is_empty() {
                    0.0
                } else {
                    t.steps.iter().map(|s| s.loss).sum::<f32>() / t.steps.len() as f32
                }
            })
            .collect();

        Some(BatchStats {
            trajectories: batch.len(),
            batch_loss: batch.iter().map(|t| t.total_loss).sum::<f32>() / n,
            mean_final_score: batch.iter().map(|t| t.final_score).sum::<f32>() / n,
            step_loss: LossStats::from_values(&step_means),
        })
    }

    pub fn status(&self) -> BufferStatus {
        BufferStatus {
            buffered: self.buffer.len(),
            batch_size: self.batch_size,
            ready: self.buffer.len() >= self.batch_size,
        }
    }
}

impl Default for TrainingBatchProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}
