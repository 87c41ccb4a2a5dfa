//! Engine configuration, consumed once at startup.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Default file-content cache capacity (64 MiB).
pub const DEFAULT_CACHE_CAPACITY_BYTES: u64 = 64 * 1024 * 1024;

/// Default number of concurrently admitted operations.
pub const DEFAULT_PARALLELISM: usize = 10;

/// Default payload size above which responses switch to binary framing (1 MiB).
pub const DEFAULT_BINARY_THRESHOLD: usize = 1024 * 1024;

/// Engine configuration.
///
/// Validated once at engine construction, never re-validated per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Capacity of the file-content cache in bytes.
    pub cache_capacity_bytes: u64,
    /// Maximum number of concurrently executing operations.
    pub parallelism: usize,
    /// Payload size above which responses use binary framing.
    pub binary_threshold: usize,
    /// Base directories operations are allowed to touch.
    /// Empty means open mode: every path is accepted.
    pub allowed_roots: Vec<PathBuf>,
    /// Enables verbose diagnostics in the adapter layer.
    pub debug: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_capacity_bytes: DEFAULT_CACHE_CAPACITY_BYTES,
            parallelism: DEFAULT_PARALLELISM,
            binary_threshold: DEFAULT_BINARY_THRESHOLD,
            allowed_roots: Vec::new(),
            debug: false,
        }
    }
}

impl EngineConfig {
    /// Checks the configuration for values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(EngineError::InvalidConfig(
                "parallelism must be at least 1".to_string(),
            ));
        }
        if self.cache_capacity_bytes == 0 {
            return Err(EngineError::InvalidConfig(
                "cache capacity must be at least 1 byte".to_string(),
            ));
        }
        if self.binary_threshold == 0 {
            return Err(EngineError::InvalidConfig(
                "binary threshold must be at least 1 byte".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_parallelism_is_rejected() {
        let config = EngineConfig {
            parallelism: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn zero_cache_capacity_is_rejected() {
        let config = EngineConfig {
            cache_capacity_bytes: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
