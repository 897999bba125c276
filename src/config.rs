// config.rs - Tunable search constants and persisted app settings

use crate::batch::DEFAULT_BATCH_SIZE;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Knobs of the size-targeting search.
///
/// The defaults are load-bearing: the attempt ceilings and the scale clamp are
/// what guarantee the searches terminate and make progress each step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Starting quality for the target-size quality search.
    pub initial_quality: f32,
    pub quality_step: f32,
    pub min_quality: f32,
    pub max_quality_attempts: u32,
    /// Longest-side cap applied from the first quality-search attempt.
    /// `None` starts at the image's own size.
    pub target_max_dimension: Option<u32>,
    /// Multiplier for the longest-side cap once quality sits at its floor.
    /// `None` disables dimension shrinking in the quality search.
    pub dimension_decay: Option<f32>,

    pub max_scale_attempts: u32,
    pub min_scale: f64,
    pub min_scale_factor: f64,
    pub max_scale_factor: f64,
    /// Floor for `target / actual` before taking its square root.
    pub ratio_epsilon: f64,
    /// Lower bound, in bytes, of a target derived from a quality percentage.
    pub min_derived_target: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            initial_quality: 0.9,
            quality_step: 0.05,
            min_quality: 0.1,
            max_quality_attempts: 21,
            target_max_dimension: Some(1024),
            dimension_decay: Some(0.9),
            max_scale_attempts: 12,
            min_scale: 0.05,
            min_scale_factor: 0.3,
            max_scale_factor: 0.95,
            ratio_epsilon: 0.001,
            min_derived_target: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub batch_size: usize,
    /// Used when the quality field is empty or out of range.
    pub default_quality_percent: f32,
    pub archive_name: String,
    pub search: SearchConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            default_quality_percent: 90.0,
            archive_name: "compressed-images.zip".to_string(),
            search: SearchConfig::default(),
        }
    }
}

impl SearchConfig {
    /// Reject values that would stall a search or make it panic.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| -> Result<(), ConfigError> { Err(ConfigError::Invalid(msg.to_string())) };
        let unit = |v: f64| v > 0.0 && v <= 1.0;

        if !(self.quality_step > 0.0) {
            return invalid("quality_step must be positive");
        }
        if !unit(self.min_quality as f64) {
            return invalid("min_quality must be in (0, 1]");
        }
        if !(self.initial_quality >= self.min_quality && self.initial_quality <= 1.0) {
            return invalid("initial_quality must be in [min_quality, 1]");
        }
        if let Some(decay) = self.dimension_decay {
            if !(decay > 0.0 && decay < 1.0) {
                return invalid("dimension_decay must be in (0, 1)");
            }
        }
        if !unit(self.min_scale) {
            return invalid("min_scale must be in (0, 1]");
        }
        if !(self.min_scale_factor > 0.0
            && self.min_scale_factor <= self.max_scale_factor
            && self.max_scale_factor < 1.0)
        {
            return invalid("scale factors need 0 < min_scale_factor <= max_scale_factor < 1");
        }
        if !unit(self.ratio_epsilon) {
            return invalid("ratio_epsilon must be in (0, 1]");
        }
        Ok(())
    }
}

impl AppConfig {
    /// Location of the optional settings file, e.g.
    /// `~/.config/image-compressor/config.json` on Linux.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("image-compressor").join("config.json"))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(json)?;
        config.batch_size = config.batch_size.max(1);
        if !(config.default_quality_percent > 0.0 && config.default_quality_percent <= 100.0) {
            return Err(ConfigError::Invalid(
                "default_quality_percent must be in (0, 100]".to_string(),
            ));
        }
        config.search.validate()?;
        Ok(config)
    }

    /// Read the settings file if there is one. A broken file is reported and
    /// the defaults are used instead.
    pub fn load() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::from_file(&path) {
            Ok(config) => {
                log::info!("Loaded settings from {}", path.display());
                config
            }
            Err(e) => {
                log::warn!("Ignoring settings file: {}", e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = AppConfig::from_json(r#"{ "batch_size": 3, "search": { "quality_step": 0.1 } }"#).unwrap();

        assert_eq!(config.batch_size, 3);
        assert_eq!(config.search.quality_step, 0.1);
        assert_eq!(config.search.max_scale_attempts, 12);
        assert_eq!(config.archive_name, "compressed-images.zip");
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let config = AppConfig::from_json(r#"{ "batch_size": 0 }"#).unwrap();
        assert_eq!(config.batch_size, 1);
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(SearchConfig::default().validate().is_ok());
    }

    #[test]
    fn test_values_that_break_the_search_are_rejected() {
        for json in [
            r#"{ "search": { "min_scale_factor": 0.96 } }"#,
            r#"{ "search": { "max_scale_factor": 1.0 } }"#,
            r#"{ "search": { "quality_step": 0.0 } }"#,
            r#"{ "search": { "min_quality": -0.1 } }"#,
            r#"{ "search": { "dimension_decay": 1.0 } }"#,
            r#"{ "search": { "min_scale": 0.0 } }"#,
            r#"{ "search": { "ratio_epsilon": 0.0 } }"#,
            r#"{ "default_quality_percent": 0 }"#,
            r#"{ "default_quality_percent": 150 }"#,
        ] {
            assert!(
                matches!(AppConfig::from_json(json), Err(ConfigError::Invalid(_))),
                "accepted {}",
                json
            );
        }
    }

    #[test]
    fn test_disabled_decay_is_valid() {
        let config = AppConfig::from_json(r#"{ "search": { "dimension_decay": null } }"#).unwrap();
        assert_eq!(config.search.dimension_decay, None);
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(matches!(
            AppConfig::from_json("{ batch_size: "),
            Err(ConfigError::Parse(_))
        ));
    }
}
