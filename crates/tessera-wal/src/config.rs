//! Configuration for the write-ahead log
//!
//! One WalConfig is built per tablet server process and handed to every
//! WalWriter::open call. Zero means "ask the block store" for replication
//! and "derive from max_size" for block size.

use crate::crypto::NULL_CRYPTO_NAME;

/// WAL configuration
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Candidate volume roots a new log file may be placed on
    pub volumes: Vec<String>,
    /// Per-file replication; 0 means use the block store default
    pub replication: u16,
    /// Per-file block size in bytes; 0 means 1.1 x max_size
    pub block_size: u64,
    /// Prefer the durable-sync primitive over flush-to-peers when available
    pub sync_mode: bool,
    /// Target maximum log file size; only used to derive the block size
    pub max_size: u64,
    /// Registry name of the cipher module, embedded verbatim in v3 headers
    pub crypto_module: String,
}

impl WalConfig {
    /// Block size actually requested from the block store.
    ///
    /// A log file should fit in a single block, so the derived size leaves
    /// 10% headroom over max_size.
    pub fn derived_block_size(&self) -> u64 {
        if self.block_size != 0 {
            self.block_size
        } else {
            (self.max_size as f64 * 1.1) as u64
        }
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.volumes.is_empty() {
            return Err("volumes must name at least one candidate directory".into());
        }
        if self.volumes.iter().any(|v| v.is_empty()) {
            return Err("volumes must not contain empty paths".into());
        }
        if self.max_size < 1024 * 1024 {
            return Err("max_size must be >= 1MB".into());
        }
        if self.crypto_module.is_empty() {
            return Err("crypto_module must not be empty".into());
        }
        Ok(())
    }
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            volumes: vec!["wal".to_string()],
            replication: 0,
            block_size: 0,
            sync_mode: true,
            max_size: 1024 * 1024 * 1024,
            crypto_module: NULL_CRYPTO_NAME.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_valid() {
        assert!(WalConfig::default().validate().is_ok());
    }

    #[test]
    fn test_derived_block_size_headroom() {
        let mut config = WalConfig::default();
        config.max_size = 1000 * 1024 * 1024;
        config.block_size = 0;
        assert_eq!(config.derived_block_size(), (1000.0 * 1024.0 * 1024.0 * 1.1) as u64);

        config.block_size = 42;
        assert_eq!(config.derived_block_size(), 42);
    }

    #[test]
    fn test_rejects_empty_volumes() {
        let mut config = WalConfig::default();
        config.volumes.clear();
        assert!(config.validate().is_err());

        config.volumes = vec!["".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_tiny_max_size() {
        let mut config = WalConfig::default();
        config.max_size = 1024;
        assert!(config.validate().is_err());
    }
}
