use thiserror::Error;

use crate::types::TokenState;

#[derive(Error, Debug)]
pub enum TropeworksError {
    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseFailure),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Illegal block transition from {from:?} on {trigger}")]
    IllegalTransition { from: TokenState, trigger: String },

    #[error("Creative seed pool is empty")]
    EmptyPool,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Model output that does not match the expected response shape.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    #[error("missing section: {0}")]
    MissingSection(&'static str),

    #[error("no headlines found")]
    NoHeadlines,

    #[error("no directions found")]
    NoDirections,

    #[error("malformed response: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_failures_convert_into_crate_error() {
        let err: TropeworksError = ParseFailure::MissingSection("visual concept").into();
        assert_eq!(err.to_string(), "Parse error: missing section: visual concept");
    }

    #[test]
    fn illegal_transition_names_state_and_trigger() {
        let err = TropeworksError::IllegalTransition {
            from: TokenState::Decoded,
            trigger: "SoftRegress".into(),
        };
        assert!(err.to_string().contains("Decoded"));
        assert!(err.to_string().contains("SoftRegress"));
    }
}
