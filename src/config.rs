//! Configuration system.
//!
//! Hierarchical configuration loading from:
//! - `kbpress.toml` (base configuration)
//! - `kbpress.local.toml` (git-ignored local overrides)
//! - environment variables (`KBPRESS_*` prefix, `__` section split)
//!
//! ## Example
//!
//! ```toml
//! # kbpress.toml
//! [paths]
//! base_path = "./kbs"
//! kb_name = "family"
//! dump_path = "./out"
//! dump_name = "family_comp"
//!
//! [mining]
//! beamwidth = 5
//! eval_metric = "compression_ratio"
//! min_fact_coverage = 0.05
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! KBPRESS_MINING__BEAMWIDTH=3
//! KBPRESS_PATHS__DUMP_PATH=/tmp/out
//! ```
//!
//! The coverage thresholds are plain fields handed to the components
//! that need them; nothing reads them through globals.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::rule::EvalMetric;

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub paths: PathsConfig,
    #[serde(default)]
    pub mining: MiningConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Input and output locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory containing the KB directory.
    pub base_path: PathBuf,

    /// Name of the KB (and of its directory under `base_path`).
    pub kb_name: String,

    /// Directory receiving the compressed KB directory.
    pub dump_path: PathBuf,

    /// Name of the compressed KB.
    pub dump_name: String,
}

/// Rule mining parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningConfig {
    /// Max rules kept per beam round (>= 1).
    #[serde(default = "default_beamwidth")]
    pub beamwidth: usize,

    /// Metric governing candidate ranking.
    #[serde(default)]
    pub eval_metric: EvalMetric,

    /// Candidates covering a smaller fraction of head records are
    /// tabu-pruned.
    #[serde(default = "default_min_fact_coverage")]
    pub min_fact_coverage: f64,

    /// Fraction of rows a constant must cover in a column to be
    /// "promising" (a case-5 specialization operand).
    #[serde(default = "default_min_constant_coverage")]
    pub min_constant_coverage: f64,

    /// Stop extending a rule once its compression ratio reaches this.
    #[serde(default = "default_stop_compression_ratio")]
    pub stop_compression_ratio: f64,

    /// Limit on target relations; 0 mines every relation.
    #[serde(default)]
    pub max_relations: usize,

    /// Reconstruct and compare against the original after dumping.
    #[serde(default)]
    pub validation: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_beamwidth() -> usize {
    3
}
fn default_min_fact_coverage() -> f64 {
    0.05
}
fn default_min_constant_coverage() -> f64 {
    0.25
}
fn default_stop_compression_ratio() -> f64 {
    1.0
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for MiningConfig {
    fn default() -> Self {
        MiningConfig {
            beamwidth: default_beamwidth(),
            eval_metric: EvalMetric::default(),
            min_fact_coverage: default_min_fact_coverage(),
            min_constant_coverage: default_min_constant_coverage(),
            stop_compression_ratio: default_stop_compression_ratio(),
            max_relations: 0,
            validation: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

/// A threshold or path that cannot work; reported before mining starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("beamwidth must be at least 1")]
    ZeroBeamwidth,
    #[error("{name} must lie in [0, 1], got {value}")]
    BadRatio { name: &'static str, value: f64 },
    #[error("kb_name must not be empty")]
    EmptyKbName,
    #[error(transparent)]
    Load(#[from] figment::Error),
}

impl Config {
    /// Load configuration from default locations.
    ///
    /// Merges in order:
    /// 1. `kbpress.toml` (base configuration)
    /// 2. `kbpress.local.toml` (local overrides, git-ignored)
    /// 3. Environment variables (`KBPRESS_*` prefix)
    pub fn load() -> Result<Self, ConfigError> {
        let config: Config = Figment::new()
            .merge(Toml::file("kbpress.toml"))
            .merge(Toml::file("kbpress.local.toml"))
            .merge(Env::prefixed("KBPRESS_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let config: Config = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("KBPRESS_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Check thresholds before any mining happens.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mining.beamwidth == 0 {
            return Err(ConfigError::ZeroBeamwidth);
        }
        for (name, value) in [
            ("min_fact_coverage", self.mining.min_fact_coverage),
            ("min_constant_coverage", self.mining.min_constant_coverage),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::BadRatio { name, value });
            }
        }
        if self.paths.kb_name.is_empty() {
            return Err(ConfigError::EmptyKbName);
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            paths: PathsConfig {
                base_path: PathBuf::from("."),
                kb_name: "kb".to_string(),
                dump_path: PathBuf::from("."),
                dump_name: "kb_comp".to_string(),
            },
            mining: MiningConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(3, config.mining.beamwidth);
        assert_eq!(EvalMetric::CompressionRatio, config.mining.eval_metric);
        assert_eq!(0.05, config.mining.min_fact_coverage);
        assert_eq!(0.25, config.mining.min_constant_coverage);
        assert_eq!(0, config.mining.max_relations);
        assert!(!config.mining.validation);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).expect("serializable config");

        // Verify it contains expected sections
        assert!(toml_str.contains("[paths]"));
        assert!(toml_str.contains("[mining]"));
        assert!(toml_str.contains("[logging]"));
    }

    #[test]
    fn test_validation_rejects_bad_thresholds() {
        let mut config = Config::default();
        config.mining.beamwidth = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroBeamwidth)));

        let mut config = Config::default();
        config.mining.min_fact_coverage = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BadRatio { .. })
        ));

        let mut config = Config::default();
        config.paths.kb_name = String::new();
        assert!(matches!(config.validate(), Err(ConfigError::EmptyKbName)));
    }
}
