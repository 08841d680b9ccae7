pub mod config;
pub mod error;
pub mod types;
pub mod vector;

pub use config::{Config, OrchestratorConfig, OrchestratorOverrides};
pub use error::{ParseFailure, TropeworksError};
pub use types::*;
pub use vector::*;

/// FNV-1a hash of a string, used for deterministic cache keys.
pub fn content_hash(text: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in text.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable_and_discriminating() {
        assert_eq!(content_hash("headline"), content_hash("headline"));
        assert_ne!(content_hash("headline"), content_hash("tagline"));
        assert_eq!(content_hash(""), 0xcbf29ce484222325);
    }
}
