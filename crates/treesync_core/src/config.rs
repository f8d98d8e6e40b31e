//! Engine configuration.

/// Configuration for a sync engine instance.
///
/// # Example
///
/// ```
/// use treesync_core::SyncConfig;
///
/// let config = SyncConfig::default()
///     .with_persistence(true)
///     .with_cache_size(32 * 1024 * 1024);
/// assert!(config.persistence_enabled());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    persistence_enabled: bool,
    cache_size_bytes: u64,
}

/// Default cache budget handed to the LRU policy: 10 MB.
pub const DEFAULT_CACHE_SIZE_BYTES: u64 = 10 * 1024 * 1024;

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            persistence_enabled: false,
            cache_size_bytes: DEFAULT_CACHE_SIZE_BYTES,
        }
    }
}

impl SyncConfig {
    /// Enable or disable durable persistence.
    #[must_use]
    pub const fn with_persistence(mut self, enabled: bool) -> Self {
        self.persistence_enabled = enabled;
        self
    }

    /// Set the cache budget in bytes used by the pruning policy.
    #[must_use]
    pub const fn with_cache_size(mut self, bytes: u64) -> Self {
        self.cache_size_bytes = bytes;
        self
    }

    /// Whether durable persistence is enabled.
    #[must_use]
    pub const fn persistence_enabled(&self) -> bool {
        self.persistence_enabled
    }

    /// The cache budget in bytes.
    #[must_use]
    pub const fn cache_size_bytes(&self) -> u64 {
        self.cache_size_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert!(!config.persistence_enabled());
        assert_eq!(config.cache_size_bytes(), DEFAULT_CACHE_SIZE_BYTES);
    }

    #[test]
    fn builder_sets_fields() {
        let config = SyncConfig::default()
            .with_persistence(true)
            .with_cache_size(1024);
        assert!(config.persistence_enabled());
        assert_eq!(config.cache_size_bytes(), 1024);
    }
}
