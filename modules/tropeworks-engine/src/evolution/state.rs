//! Block state machine.
//!
//! | from \ trigger | Blend(a)            | Decode / ForceDecode | SoftRegress | FullRegress |
//! |----------------|---------------------|----------------------|-------------|-------------|
//! | MASK           | by threshold        | DECODED              | MASK        | MASK        |
//! | SOFT_MASK_V    | by threshold        | DECODED              | SOFT_MASK_V | MASK        |
//! | SOFT_V         | SOFT_V              | DECODED              | SOFT_MASK_V | MASK        |
//! | DECODED        | illegal             | illegal              | SOFT_MASK_V | MASK        |
//!
//! Blending never lowers a state; only the regress triggers do.

use std::fmt;

use tropeworks_common::{TokenState, TropeworksError};

/// Below this alpha a blended block is SOFT_V.
pub const SOFT_V_BELOW: f32 = 0.3;
/// Below this alpha a blended block is at least SOFT_MASK_V.
pub const SOFT_MASK_V_BELOW: f32 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlockTrigger {
    Blend(f32),
    Decode,
    /// Commit after the regression budget is spent, whatever the arbiter said.
    ForceDecode,
    SoftRegress,
    FullRegress,
}

impl fmt::Display for BlockTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockTrigger::Blend(alpha) => write!(f, "blend({alpha:.2})"),
            BlockTrigger::Decode => f.write_str("decode"),
            BlockTrigger::ForceDecode => f.write_str("force_decode"),
            BlockTrigger::SoftRegress => f.write_str("soft_regress"),
            BlockTrigger::FullRegress => f.write_str("full_regress"),
        }
    }
}

/// State implied by alpha alone.
pub fn state_for_alpha(alpha: f32) -> Option<TokenState> {
    if alpha < SOFT_V_BELOW {
        Some(TokenState::SoftV)
    } else if alpha < SOFT_MASK_V_BELOW {
        Some(TokenState::SoftMaskV)
    } else {
        None
    }
}

pub fn transition(from: TokenState, trigger: BlockTrigger) -> Result<TokenState, TropeworksError> {
    use BlockTrigger::*;
    use TokenState::*;

    let to = match (from, trigger) {
        (Decoded, Blend(_) | Decode | ForceDecode) => {
            return Err(TropeworksError::IllegalTransition {
                from,
                trigger: trigger.to_string(),
            })
        }
        (_, Blend(alpha)) => state_for_alpha(alpha).map_or(from, |target| target.max(from)),
        (_, Decode | ForceDecode) => Decoded,
        (Mask, SoftRegress) => Mask,
        (_, SoftRegress) => SoftMaskV,
        (_, FullRegress) => Mask,
    };
    Ok(to)
}
