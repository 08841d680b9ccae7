use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayShape {
    Linear,
    Exponential,
    #[default]
    Cosine,
}

impl DecayShape {
    /// Decay value at `t` in [0, 1].
    pub fn at(self, t: f32) -> f32 {
        match self {
            DecayShape::Linear => 1.0 - t,
            DecayShape::Exponential => (-3.0 * t).exp(),
            DecayShape::Cosine => 0.5 * (1.0 + (PI * t).cos()),
        }
    }
}

/// Pre-computed alpha values for one evolution run. `steps + 1` entries,
/// non-increasing, shared by every block.
#[derive(Debug, Clone, PartialEq)]
pub struct AlphaScheduler {
    schedule: Vec<f32>,
    step: usize,
}

impl AlphaScheduler {
    pub fn new(steps: usize, shape: DecayShape) -> Self {
        let steps = steps.max(1);
        let schedule = (0..=steps)
            .map(|i| shape.at(i as f32 / steps as f32).clamp(0.0, 1.0))
            .collect();
        Self { schedule, step: 0 }
    }

    /// Alpha at the current step, held at the last value once exhausted.
    pub fn current_alpha(&self) -> f32 {
        let last = self.schedule.len().saturating_sub(1);
        self.schedule
            .get(self.step.min(last))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn advance(&mut self) -> f32 {
        self.step += 1;
        self.current_alpha()
    }

    pub fn reset(&mut self) {
        self.step = 0;
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn schedule(&self) -> &[f32] {
        &self.schedule
    }
}

impl Default for AlphaScheduler {
    fn default() -> Self {
        Self::new(5, DecayShape::Cosine)
    }
}
