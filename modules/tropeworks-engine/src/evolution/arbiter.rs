use async_trait::async_trait;
use serde::Serialize;

use tropeworks_common::EvolutionBlock;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArbiterVerdict {
    pub passed: bool,
    /// In [0, 1].
    pub score: f32,
    pub feedback: Vec<String>,
}

impl ArbiterVerdict {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            score: 0.0,
            feedback: vec![reason.into()],
        }
    }
}

/// Gatekeeper deciding whether an evolved block is ready to commit.
#[async_trait]
pub trait BlockArbiter: Send + Sync {
    async fn evaluate(&self, block: &EvolutionBlock) -> ArbiterVerdict;

    /// Whether blocks at this alpha are worth judging yet. Blocks evolved
    /// at an earlier alpha keep evolving without a verdict or regression.
    fn ready_at(&self, _alpha: f32) -> bool {
        true
    }
}

/// Passes a block once it is coherent enough and mostly unmasked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeuristicArbiter {
    pub min_coherence: f32,
    pub max_alpha: f32,
}

impl Default for HeuristicArbiter {
    fn default() -> Self {
        Self {
            min_coherence: 0.6,
            max_alpha: 0.7,
        }
    }
}

#[async_trait]
impl BlockArbiter for HeuristicArbiter {
    async fn evaluate(&self, block: &EvolutionBlock) -> ArbiterVerdict {
        let alpha = block.mean_alpha();
        let mut feedback = Vec::new();
        if block.coherence < self.min_coherence {
            feedback.push(format!(
                "coherence {:.2} below {:.2}",
                block.coherence, self.min_coherence
            ));
        }
        if alpha > self.max_alpha {
            feedback.push(format!("still {:.0}% masked", alpha * 100.0));
        }
        ArbiterVerdict {
            passed: feedback.is_empty(),
            score: (block.coherence * (1.0 - 0.5 * alpha)).clamp(0.0, 1.0),
            feedback,
        }
    }

    fn ready_at(&self, alpha: f32) -> bool {
        alpha <= self.max_alpha
    }
}
