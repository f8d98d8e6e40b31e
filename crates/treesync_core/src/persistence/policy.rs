//! Cache eviction policies.

use std::fmt;

use crate::config::DEFAULT_CACHE_SIZE_BYTES;

const SERVER_UPDATES_BETWEEN_CACHE_SIZE_CHECKS: u64 = 1000;
const MAX_PRUNABLE_QUERIES_TO_KEEP: u64 = 1000;
const PERCENT_OF_QUERIES_TO_PRUNE_AT_ONCE: f64 = 0.2;

/// Decides when the persisted server cache is pruned and how aggressively.
pub trait CachePolicy: fmt::Debug + Send + Sync {
    /// Whether a prune pass should run for the given cache size and number
    /// of evictable queries.
    fn should_prune(&self, current_size_bytes: u64, prunable_queries: u64) -> bool;

    /// Whether the cache size should be measured after this many server
    /// updates.
    fn should_check_cache_size(&self, server_updates_since_last_check: u64) -> bool;

    /// The fraction of evictable queries one pass removes.
    fn percent_to_prune_at_once(&self) -> f64;

    /// The number of evictable queries always retained.
    fn max_queries_to_keep(&self) -> u64;
}

/// The production policy: prune least-recently-used queries once the cache
/// outgrows a size budget.
#[derive(Debug, Clone)]
pub struct LruCachePolicy {
    max_size_bytes: u64,
}

impl LruCachePolicy {
    /// A policy pruning once the cache exceeds `max_size_bytes`.
    #[must_use]
    pub const fn new(max_size_bytes: u64) -> Self {
        Self { max_size_bytes }
    }
}

impl Default for LruCachePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_SIZE_BYTES)
    }
}

impl CachePolicy for LruCachePolicy {
    fn should_prune(&self, current_size_bytes: u64, prunable_queries: u64) -> bool {
        current_size_bytes > self.max_size_bytes
            || prunable_queries > MAX_PRUNABLE_QUERIES_TO_KEEP
    }

    fn should_check_cache_size(&self, server_updates_since_last_check: u64) -> bool {
        server_updates_since_last_check > SERVER_UPDATES_BETWEEN_CACHE_SIZE_CHECKS
    }

    fn percent_to_prune_at_once(&self) -> f64 {
        PERCENT_OF_QUERIES_TO_PRUNE_AT_ONCE
    }

    fn max_queries_to_keep(&self) -> u64 {
        MAX_PRUNABLE_QUERIES_TO_KEEP
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prunes_on_size_or_query_count() {
        let policy = LruCachePolicy::new(1000);
        assert!(!policy.should_prune(1000, 10));
        assert!(policy.should_prune(1001, 10));
        assert!(policy.should_prune(0, MAX_PRUNABLE_QUERIES_TO_KEEP + 1));
    }

    #[test]
    fn checks_size_every_thousand_updates() {
        let policy = LruCachePolicy::default();
        assert!(!policy.should_check_cache_size(1000));
        assert!(policy.should_check_cache_size(1001));
    }
}
