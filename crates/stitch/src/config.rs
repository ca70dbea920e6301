use engine::LoadSchedulerConfig;
use serde::{Deserialize, Serialize};

use crate::StitchError;

/// Settings of one stitched image.
///
/// ```toml
/// relative_margin = 0.1
///
/// [scheduler]
/// worker_threads = 4
/// thread_name_prefix = "tile-loader"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StitchConfig {
    /// Padding added on each side of a tile, as a fraction of its size.
    pub relative_margin: f64,
    pub scheduler: LoadSchedulerConfig,
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self {
            relative_margin: 0.0,
            scheduler: LoadSchedulerConfig::default(),
        }
    }
}

impl StitchConfig {
    pub fn no_margin() -> Self {
        Self::default()
    }

    pub fn with_margin(relative_margin: f64) -> Self {
        Self {
            relative_margin,
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, StitchError> {
        let config: Self =
            toml::from_str(text).map_err(|error| StitchError::Config(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, StitchError> {
        toml::to_string(self).map_err(|error| StitchError::Config(error.to_string()))
    }

    pub fn validate(&self) -> Result<(), StitchError> {
        if !self.relative_margin.is_finite() || self.relative_margin < 0.0 {
            return Err(StitchError::Config(format!(
                "relative_margin must be finite and non-negative, got {}",
                self.relative_margin
            )));
        }
        if self.scheduler.worker_threads == 0 {
            return Err(StitchError::Config(
                "scheduler.worker_threads must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}
