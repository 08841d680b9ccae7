//! Bounded cache of vocabulary distributions keyed by block-state signature.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use tropeworks_common::{content_hash, EvolutionBlock, VocabDistribution};

pub const DEFAULT_MAX_ENTRIES: usize = 100;
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

struct CachedState {
    distribution: VocabDistribution,
    inserted_at: Instant,
    hits: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct KvCacheStats {
    pub size: usize,
    pub total_hits: u64,
    pub mean_hits: f32,
}

/// Insertion-time eviction: once full, the oldest entry makes room.
/// Entries older than the TTL read as absent and are dropped on access.
pub struct KvCacheManager {
    entries: Mutex<HashMap<String, CachedState>>,
    max_entries: usize,
    ttl: Duration,
}

impl KvCacheManager {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
            ttl,
        }
    }

    /// Deterministic signature over the scope (the seed idea the blocks
    /// evolve from), every block's id and trope constraints, and its tokens'
    /// (state, alpha) pairs, alpha rounded to two decimals.
    pub fn signature(scope: &str, blocks: &[EvolutionBlock]) -> String {
        let mut text = format!("{scope}#");
        for block in blocks {
            text.push_str(&block.id);
            text.push('|');
            text.push_str(&block.trope_constraints.join(","));
            text.push('|');
            for token in &block.tokens {
                text.push_str(&format!("{}:{:.2},", token.state, token.alpha));
            }
            text.push(';');
        }
        format!("{:016x}", content_hash(&text))
    }

    pub fn store(&self, scope: &str, blocks: &[EvolutionBlock], distribution: VocabDistribution) -> String {
        let key = Self::signature(scope, blocks);
        let Ok(mut entries) = self.entries.lock() else {
            return key;
        };
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                debug!(key = %oldest, "Evicting oldest KV cache entry");
                entries.remove(&oldest);
            }
        }
        entries.insert(
            key.clone(),
            CachedState {
                distribution,
                inserted_at: Instant::now(),
                hits: 0,
            },
        );
        key
    }

    pub fn retrieve(&self, scope: &str, blocks: &[EvolutionBlock]) -> Option<VocabDistribution> {
        self.retrieve_key(&Self::signature(scope, blocks))
    }

    pub fn retrieve_key(&self, key: &str) -> Option<VocabDistribution> {
        let mut entries = self.entries.lock().ok()?;
        let expired = entries.get(key)?.inserted_at.elapsed() >= self.ttl;
        if expired {
            entries.remove(key);
            return None;
        }
        let entry = entries.get_mut(key)?;
        entry.hits += 1;
        Some(entry.distribution.clone())
    }

    pub fn contains(&self, scope: &str, blocks: &[EvolutionBlock]) -> bool {
        let key = Self::signature(scope, blocks);
        self.entries
            .lock()
            .map(|e| e.get(&key).is_some_and(|s| s.inserted_at.elapsed() < self.ttl))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn stats(&self) -> KvCacheStats {
        let Ok(entries) = self.entries.lock() else {
            return KvCacheStats::default();
        };
        let size = entries.len();
        let total_hits: u64 = entries.values().map(|e| e.hits).sum();
        KvCacheStats {
            size,
            total_hits,
            mean_hits: if size == 0 { 0.0 } else { total_hits as f32 / size as f32 },
        }
    }
}

impl Default for KvCacheManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use tropeworks_common::{BlockName, SoftToken, TokenState};

    use super::*;

    fn block(id: &str, state: TokenState, alpha: f32) -> EvolutionBlock {
        EvolutionBlock {
            id: id.to_string(),
            name: BlockName::Headline,
            tokens: (0..3)
                .map(|position| SoftToken {
                    position,
                    state,
                    distribution: VocabDistribution::new(),
                    embedding: Vec::new(),
                    alpha,
                    committed: false,
                })
                .collect(),
            state,
            trope_constraints: Vec::new(),
            coherence: 1.0,
            committed: false,
            content: None,
            regression_count: 0,
        }
    }

    fn dist(word: &str) -> VocabDistribution {
        VocabDistribution::from_pairs([(word, 1.0)])
    }

    const SCOPE: &str = "Sneakers from ocean plastic";

    #[test]
    fn signature_tracks_state_and_rounded_alpha() {
        let a = KvCacheManager::signature(SCOPE, &[block("headline", TokenState::Mask, 1.0)]);
        let b = KvCacheManager::signature(SCOPE, &[block("headline", TokenState::Mask, 0.999)]);
        let c = KvCacheManager::signature(SCOPE, &[block("headline", TokenState::SoftV, 1.0)]);
        let d = KvCacheManager::signature(SCOPE, &[block("tagline", TokenState::Mask, 1.0)]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn signature_separates_seeds_and_devices() {
        let fresh = block("headline", TokenState::Mask, 1.0);
        let mut with_device = fresh.clone();
        with_device.trope_constraints = vec!["antithesis".into()];

        let base = KvCacheManager::signature(SCOPE, std::slice::from_ref(&fresh));
        assert_ne!(base, KvCacheManager::signature("Mortgage bank for students", std::slice::from_ref(&fresh)));
        assert_ne!(base, KvCacheManager::signature(SCOPE, &[with_device]));
    }

    #[test]
    fn other_scope_misses() {
        let cache = KvCacheManager::default();
        let blocks = [block("headline", TokenState::Mask, 1.0)];
        cache.store(SCOPE, &blocks, dist("ocean"));
        assert!(cache.retrieve("Mortgage bank for students", &blocks).is_none());
        assert_eq!(cache.retrieve(SCOPE, &blocks), Some(dist("ocean")));
    }

    #[test]
    fn hits_are_counted() {
        let cache = KvCacheManager::default();
        let blocks = [block("headline", TokenState::Mask, 1.0)];
        assert!(cache.retrieve(SCOPE, &blocks).is_none());
        cache.store(SCOPE, &blocks, dist("yet"));
        assert!(cache.contains(SCOPE, &blocks));
        assert_eq!(cache.retrieve(SCOPE, &blocks), Some(dist("yet")));
        cache.retrieve(SCOPE, &blocks);
        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.total_hits, 2);
        assert_eq!(stats.mean_hits, 2.0);
    }

    #[test]
    fn oldest_entry_is_evicted_when_full() {
        let cache = KvCacheManager::new(2, DEFAULT_TTL);
        let first = [block("a", TokenState::Mask, 1.0)];
        let second = [block("b", TokenState::Mask, 1.0)];
        let third = [block("c", TokenState::Mask, 1.0)];
        cache.store(SCOPE, &first, dist("one"));
        std::thread::sleep(Duration::from_millis(2));
        cache.store(SCOPE, &second, dist("two"));
        std::thread::sleep(Duration::from_millis(2));
        cache.store(SCOPE, &third, dist("three"));
        assert_eq!(cache.len(), 2);
        assert!(cache.retrieve(SCOPE, &first).is_none());
        assert!(cache.retrieve(SCOPE, &third).is_some());
    }

    #[test]
    fn expired_entries_read_as_absent() {
        let cache = KvCacheManager::new(10, Duration::ZERO);
        let blocks = [block("headline", TokenState::Mask, 1.0)];
        cache.store(SCOPE, &blocks, dist("yet"));
        assert!(!cache.contains(SCOPE, &blocks));
        assert!(cache.retrieve(SCOPE, &blocks).is_none());
        assert!(cache.is_empty());
    }
}
