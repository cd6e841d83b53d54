//! Residency configuration
//!
//! Everything the residency manager needs to know up front. Loaded from JSON
//! by the CLI, constructed in code everywhere else.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::PixelFormat;
use crate::memory::CommitBudget;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// What to do with whole slots once every evictable mip is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReclaimPolicy {
    /// Reclaim the least-recently-admitted slot, one per tick
    #[default]
    OldestFirst,
    /// Keep every slot; eviction stops once mips are exhausted
    Disabled,
}

/// What to do when a format has no usable virtual page size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnsupportedFormatPolicy {
    /// Allocate ordinary (fully backed) storage for that slot
    #[default]
    Fallback,
    /// Fail the admission
    Reject,
}

/// How storage is sized for each admitted image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageLayout {
    /// A 2D texture exactly as large as the image
    #[default]
    PerImage,
    /// A fixed-size layered texture; the image is placed in layer 0
    Atlas { width: u32, height: u32, layers: u32 },
}

/// Residency manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResidencyConfig {
    /// Maximum number of admitted slots
    pub admission_cap: usize,
    /// Minimum time between two eviction steps, in milliseconds
    pub tick_interval_ms: u64,
    /// Whole-slot reclamation once mips are exhausted
    pub reclaim_policy: ReclaimPolicy,
    /// Slots that reclamation never goes below
    pub min_resident_slots: usize,
    /// Behavior for formats without sparse support
    pub unsupported_format: UnsupportedFormatPolicy,
    /// Storage sizing
    pub storage: StorageLayout,
    /// Storage texel format
    pub storage_format: PixelFormat,
    /// Committed memory budget (reporting)
    pub budget: CommitBudget,
}

impl Default for ResidencyConfig {
    fn default() -> Self {
        Self {
            admission_cap: 64,
            tick_interval_ms: 500,
            reclaim_policy: ReclaimPolicy::OldestFirst,
            min_resident_slots: 1,
            unsupported_format: UnsupportedFormatPolicy::Fallback,
            storage: StorageLayout::PerImage,
            storage_format: PixelFormat::Rgba8Unorm,
            budget: CommitBudget::default(),
        }
    }
}

impl ResidencyConfig {
    /// Single oversized layered texture, one image per run
    pub fn atlas() -> Self {
        Self {
            admission_cap: 1,
            storage: StorageLayout::Atlas {
                width: 4096,
                height: 4096,
                layers: 2,
            },
            ..Self::default()
        }
    }

    /// Small cap and fast cadence, handy for demos and tests
    pub fn quick() -> Self {
        Self {
            admission_cap: 3,
            tick_interval_ms: 100,
            ..Self::default()
        }
    }

    /// Eviction cadence
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Check the configuration for values the manager cannot work with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.admission_cap == 0 {
            return Err(ConfigError::Invalid("admission_cap must be at least 1".into()));
        }
        if self.min_resident_slots > self.admission_cap {
            return Err(ConfigError::Invalid(format!(
                "min_resident_slots ({}) exceeds admission_cap ({})",
                self.min_resident_slots, self.admission_cap
            )));
        }
        if let StorageLayout::Atlas { width, height, layers } = self.storage {
            if width == 0 || height == 0 || layers == 0 {
                return Err(ConfigError::Invalid("atlas extent must be non-zero".into()));
            }
        }
        if !(0.0..=1.0).contains(&self.budget.warning_threshold) {
            return Err(ConfigError::Invalid(
                "budget.warning_threshold must be within 0.0..=1.0".into(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&text)?;
        log::debug!("Loaded residency config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ResidencyConfig::default();
        assert_eq!(config.admission_cap, 64);
        assert_eq!(config.tick_interval(), Duration::from_millis(500));
        assert_eq!(config.reclaim_policy, ReclaimPolicy::OldestFirst);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = ResidencyConfig::from_json_str(r#"{ "admission_cap": 3 }"#).unwrap();
        assert_eq!(config.admission_cap, 3);
        assert_eq!(config.tick_interval_ms, 500);
        assert_eq!(config.storage, StorageLayout::PerImage);
    }

    #[test]
    fn test_atlas_json() {
        let json = r#"{
            "storage": { "kind": "atlas", "width": 1024, "height": 1024, "layers": 2 },
            "reclaim_policy": "disabled"
        }"#;
        let config = ResidencyConfig::from_json_str(json).unwrap();
        assert_eq!(
            config.storage,
            StorageLayout::Atlas { width: 1024, height: 1024, layers: 2 }
        );
        assert_eq!(config.reclaim_policy, ReclaimPolicy::Disabled);
    }

    #[test]
    fn test_invalid_config() {
        let result = ResidencyConfig::from_json_str(r#"{ "admission_cap": 0 }"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let result = ResidencyConfig::from_json_str(
            r#"{ "admission_cap": 2, "min_resident_slots": 3 }"#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let result = ResidencyConfig::from_json_str("{ not json");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_presets() {
        assert!(ResidencyConfig::atlas().validate().is_ok());
        assert_eq!(ResidencyConfig::quick().admission_cap, 3);
    }
}
