//! Per-session trajectory capture with temporally weighted loss.

pub mod batch;
pub mod kv_cache;

use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use tropeworks_common::{
    GenerationTrajectory, TokenState, TrajectoryMetadata, TrajectoryStep, TropeValidationResult,
};

pub use batch::{BatchStats, BufferStatus, LossStats, TrainingBatchProcessor};
pub use kv_cache::{KvCacheManager, KvCacheStats};

pub const MODEL_VERSION: &str = "tropeworks-evolution-v1";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LossWeights {
    pub state_transition: f32,
    pub trope_alignment: f32,
    pub coherence: f32,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            state_transition: 0.25,
            trope_alignment: 0.30,
            coherence: 0.25,
        }
    }
}

impl LossWeights {
    /// Zero unless the state moved backwards; half a point per rank lost.
    pub fn state_transition_loss(previous: TokenState, new: TokenState) -> f32 {
        if new < previous {
            f32::from(previous.rank() - new.rank()) * 0.5
        } else {
            0.0
        }
    }

    /// One minus mean confidence. No results counts as no alignment.
    pub fn trope_alignment_loss(results: &[TropeValidationResult]) -> f32 {
        if results.is_empty() {
            return 1.0;
        }
        1.0 - results.iter().map(|r| r.confidence).sum::<f32>() / results.len() as f32
    }

    pub fn step_loss(
        &self,
        previous: TokenState,
        new: TokenState,
        trope_results: &[TropeValidationResult],
        arbiter_score: f32,
    ) -> f32 {
        self.state_transition * Self::state_transition_loss(previous, new)
            + self.trope_alignment * Self::trope_alignment_loss(trope_results)
            + self.coherence * (1.0 - arbiter_score)
    }
}

/// Step `i` of `n` weighs `1 + i/n`; the result is normalized by the total
/// weight. An empty trajectory has zero loss.
pub fn cumulative_loss(steps: &[TrajectoryStep]) -> f32 {
    if steps.is_empty() {
        return 0.0;
    }
    let n = steps.len() as f32;
    let (weighted, total_weight) = steps.iter().enumerate().fold((0.0, 0.0), |(sum, w), (i, step)| {
        let weight = 1.0 + i as f32 / n;
        (sum + step.loss * weight, w + weight)
    });
    weighted / total_weight
}

/// One block attempt, as reported by the evolution engine.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub block_id: String,
    pub previous_state: TokenState,
    pub new_state: TokenState,
    pub alpha: f32,
    pub arbiter_score: f32,
    pub trope_results: Vec<TropeValidationResult>,
    pub token_distributions: Vec<Vec<(String, f32)>>,
    pub selected_tokens: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureState {
    pub trajectory_id: Uuid,
    pub step_count: usize,
    pub mean_loss: f32,
}

struct Active {
    trajectory: GenerationTrajectory,
    finished: bool,
}

/// Records one generation session. Created per request by [`start`]; steps
/// recorded after [`end`] are ignored.
///
/// [`start`]: TrajectoryCapture::start
/// [`end`]: TrajectoryCapture::end
pub struct TrajectoryCapture {
    weights: LossWeights,
    inner: Mutex<Active>,
}

impl TrajectoryCapture {
    pub fn start(session_id: &str, brief: &str, theme: &str, seed_id: &str) -> Self {
        Self::start_with_weights(session_id, brief, theme, seed_id, LossWeights::default())
    }

    pub fn start_with_weights(
        session_id: &str,
        brief: &str,
        theme: &str,
        seed_id: &str,
        weights: LossWeights,
    ) -> Self {
        let trajectory = GenerationTrajectory {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            brief: brief.to_string(),
            theme: theme.to_string(),
            seed_id: seed_id.to_string(),
            steps: Vec::new(),
            final_output: String::new(),
            final_score: 0.0,
            total_loss: 0.0,
            metadata: TrajectoryMetadata {
                model_version: MODEL_VERSION.to_string(),
                started_at: Utc::now(),
                ended_at: None,
                total_tokens: 0,
                evolution_cycles: 0,
                regression_count: 0,
            },
        };
        debug!(trajectory_id = %trajectory.id, session_id, seed_id, "Trajectory capture started");
        Self {
            weights,
            inner: Mutex::new(Active {
                trajectory,
                finished: false,
            }),
        }
    }

    pub fn id(&self) -> Option<Uuid> {
        self.inner.lock().ok().map(|a| a.trajectory.id)
    }

    /// Append a step and return its loss.
    pub fn record_step(&self, record: StepRecord) -> Option<f32> {
        let mut active = self.inner.lock().ok()?;
        if active.finished {
            warn!(block = %record.block_id, "Step recorded after trajectory ended, ignoring");
            return None;
        }

        let loss = self.weights.step_loss(
            record.previous_state,
            record.new_state,
            &record.trope_results,
            record.arbiter_score,
        );
        let metadata = &mut active.trajectory.metadata;
        metadata.total_tokens += record.selected_tokens.len();
        if record.new_state != record.previous_state {
            metadata.evolution_cycles += 1;
        }
        if record.new_state < record.previous_state {
            metadata.regression_count += 1;
        }

        let step_index = active.trajectory.steps.len();
        active.trajectory.steps.push(TrajectoryStep {
            step_index,
            block_id: record.block_id,
            previous_state: record.previous_state,
            new_state: record.new_state,
            alpha: record.alpha,
            arbiter_score: record.arbiter_score,
            trope_results: record.trope_results,
            token_distributions: record.token_distributions,
            selected_tokens: record.selected_tokens,
            loss,
        });
        Some(loss)
    }

    pub fn current_state(&self) -> Option<CaptureState> {
        let active = self.inner.lock().ok()?;
        let steps = &active.trajectory.steps;
        let mean_loss = if steps.is_empty() {
            0.0
        } else {
            steps.iter().map(|s| s.loss).sum::<f32>() / steps.len() as f32
        };
        Some(CaptureState {
            trajectory_id: active.trajectory.id,
            step_count: steps.len(),
            mean_loss,
        })
    }

    /// Close the trajectory and return it. Ending twice returns the same
    /// record without touching the final output again.
    pub fn end(&self, final_output: &str, final_score: f32) -> Option<GenerationTrajectory> {
        let mut active = self.inner.lock().ok()?;
        if !active.finished {
            active.finished = true;
            let trajectory = &mut active.trajectory;
            trajectory.final_output = final_output.to_string();
            trajectory.final_score = final_score;
            trajectory.total_loss = cumulative_loss(&trajectory.steps);
            trajectory.metadata.ended_at = Some(Utc::now());
            debug!(
                trajectory_id = %trajectory.id,
                steps = trajectory.steps.len(),
                total_loss = trajectory.total_loss,
                "Trajectory capture ended"
            );
        }
        Some(active.trajectory.clone())
    }
}

#[cfg(test)]
mod tests {
    use tropeworks_common::ValidationMethod;

    use super::*;

    fn result(confidence: f32) -> TropeValidationResult {
        TropeValidationResult {
            device_id: "antithesis".into(),
            device_name: "Antithesis".into(),
            satisfied: confidence >= 0.5,
            confidence,
            evidence: Vec::new(),
            suggestions: Vec::new(),
            method: ValidationMethod::Pattern,
        }
    }

    fn record(previous: TokenState, new: TokenState, arbiter: f32, confidence: f32) -> StepRecord {
        StepRecord {
            block_id: "headline".into(),
            previous_state: previous,
            new_state: new,
            alpha: 0.5,
            arbiter_score: arbiter,
            trope_results: vec![result(confidence)],
            token_distributions: vec![vec![("yet".into(), 0.4)]],
            selected_tokens: vec!["yet".into(), "but".into()],
        }
    }

    #[test]
    fn step_loss_components() {
        let weights = LossWeights::default();
        // advance: no state loss
        let loss = weights.step_loss(TokenState::Mask, TokenState::SoftV, &[result(0.8)], 0.6);
        assert!((loss - (0.30 * 0.2 + 0.25 * 0.4)).abs() < 1e-5);

        // full regression from SOFT_V loses two ranks
        let loss = weights.step_loss(TokenState::SoftV, TokenState::Mask, &[result(1.0)], 1.0);
        assert!((loss - 0.25).abs() < 1e-5);

        // no trope results is full trope loss
        assert_eq!(LossWeights::trope_alignment_loss(&[]), 1.0);
    }

    #[test]
    fn later_steps_weigh_more() {
        let step = |loss: f32| TrajectoryStep {
            step_index: 0,
            block_id: "b".into(),
            previous_state: TokenState::Mask,
            new_state: TokenState::Mask,
            alpha: 1.0,
            arbiter_score: 0.0,
            trope_results: Vec::new(),
            token_distributions: Vec::new(),
            selected_tokens: Vec::new(),
            loss,
        };
        // weights 1.0 and 1.5
        let early_bad = cumulative_loss(&[step(1.0), step(0.0)]);
        let late_bad = cumulative_loss(&[step(0.0), step(1.0)]);
        assert!((early_bad - 0.4).abs() < 1e-5);
        assert!((late_bad - 0.6).abs() < 1e-5);
        assert_eq!(cumulative_loss(&[]), 0.0);
    }

    #[test]
    fn capture_tracks_metadata_and_state() {
        let capture = TrajectoryCapture::start("session-1", "sneakers", "sneakers", "legacy");
        capture.record_step(record(TokenState::Mask, TokenState::SoftMaskV, 0.5, 0.5));
        capture.record_step(record(TokenState::SoftMaskV, TokenState::Mask, 0.2, 0.1));
        capture.record_step(record(TokenState::Mask, TokenState::Mask, 0.2, 0.1));

        let state = capture.current_state().unwrap();
        assert_eq!(state.step_count, 3);
        assert!(state.mean_loss > 0.0);

        let trajectory = capture.end("final text", 0.8).unwrap();
        assert_eq!(trajectory.metadata.total_tokens, 6);
        assert_eq!(trajectory.metadata.evolution_cycles, 2);
        assert_eq!(trajectory.metadata.regression_count, 1);
        assert_eq!(trajectory.metadata.model_version, MODEL_VERSION);
        assert!(trajectory.metadata.ended_at.is_some());
        assert_eq!(trajectory.final_output, "final text");
        assert_eq!(trajectory.steps[2].step_index, 2);
        assert!((trajectory.total_loss - cumulative_loss(&trajectory.steps)).abs() < 1e-6);
    }

    #[test]
    fn steps_after_end_are_ignored() {
        let capture = TrajectoryCapture::start("s", "b", "t", "seed");
        capture.end("done", 0.5);
        assert!(capture
            .record_step(record(TokenState::Mask, TokenState::SoftV, 1.0, 1.0))
            .is_none());
        let again = capture.end("other", 0.9).unwrap();
        assert_eq!(again.final_output, "done");
        assert!(again.steps.is_empty());
    }
}
