//! Store configuration.

use std::path::PathBuf;

/// Default number of fixer attempts before a save gives up.
pub const DEFAULT_MAX_FIX_ATTEMPTS: usize = 100;

/// Configuration for the entity store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the database directory.
    pub path: PathBuf,

    /// Page cache capacity in bytes.
    pub cache_capacity: u64,

    /// Background flush interval in milliseconds. None disables it.
    pub flush_every_ms: Option<u64>,

    /// Enable zstd compression.
    pub compression: bool,

    /// Temporary database (deleted on drop).
    pub temporary: bool,

    /// Fixer attempts per unique set before a save gives up.
    pub max_fix_attempts: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./uniqdb_data"),
            cache_capacity: 256 * 1024 * 1024, // 256MB
            flush_every_ms: Some(1000),        // Flush every second
            compression: true,
            temporary: false,
            max_fix_attempts: DEFAULT_MAX_FIX_ATTEMPTS,
        }
    }
}

impl StoreConfig {
    /// Create a new configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Create a temporary in-memory configuration for testing.
    pub fn temporary() -> Self {
        Self {
            path: PathBuf::from(""),
            temporary: true,
            ..Default::default()
        }
    }

    /// Set the page cache capacity.
    pub fn with_cache_capacity(mut self, bytes: u64) -> Self {
        self.cache_capacity = bytes;
        self
    }

    /// Set the flush interval.
    pub fn with_flush_every_ms(mut self, ms: Option<u64>) -> Self {
        self.flush_every_ms = ms;
        self
    }

    /// Enable or disable compression.
    pub fn with_compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }

    /// Set the number of fixer attempts per unique set.
    pub fn with_max_fix_attempts(mut self, attempts: usize) -> Self {
        self.max_fix_attempts = attempts;
        self
    }

    /// Convert to sled configuration.
    pub(crate) fn to_sled_config(&self) -> sled::Config {
        let mut config = sled::Config::new()
            .cache_capacity(self.cache_capacity)
            .use_compression(self.compression);

        if self.temporary {
            config = config.temporary(true);
        } else {
            config = config.path(&self.path);
        }

        config.flush_every_ms(self.flush_every_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.max_fix_attempts, 100);
        assert!(!config.temporary);
        assert_eq!(config.path, PathBuf::from("./uniqdb_data"));
    }

    #[test]
    fn test_builder() {
        let config = StoreConfig::new("/tmp/data")
            .with_max_fix_attempts(5)
            .with_compression(false)
            .with_flush_every_ms(None);

        assert_eq!(config.path, PathBuf::from("/tmp/data"));
        assert_eq!(config.max_fix_attempts, 5);
        assert!(!config.compression);
        assert!(config.flush_every_ms.is_none());
    }

    #[test]
    fn test_temporary() {
        let config = StoreConfig::temporary();
        assert!(config.temporary);
        assert!(config.to_sled_config().open().is_ok());
    }
}
