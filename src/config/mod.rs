//! Run-time configuration loaded from YAML.
//!
//! Every field has a default, so a configuration file only needs to list the
//! values it changes:
//!
//! ```yaml
//! border_size: 40
//! extrinsic:
//!   default_height: 175.0
//! sampling:
//!   frame_step: 5
//! ```

use crate::autocalib::SamplingSettings;
use crate::calibration::ExtrinsicSettings;
use crate::camera::CalibrationError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Border added around the undistorted image, in pixels.
    pub border_size: i32,
    pub extrinsic: ExtrinsicSettings,
    /// Admissible range of the 2D coordinate system translation, per axis.
    pub translation_min: f64,
    pub translation_max: f64,
    pub sampling: SamplingSettings,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        CalibrationConfig {
            border_size: 0,
            extrinsic: ExtrinsicSettings::default(),
            translation_min: -10000.0,
            translation_max: 10000.0,
            sampling: SamplingSettings::default(),
        }
    }
}

impl CalibrationConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, CalibrationError> {
        let config: CalibrationConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// * [`CalibrationError::IOError`] if the file cannot be read.
    /// * [`CalibrationError::YamlError`] for malformed YAML.
    /// * [`CalibrationError::InvalidParams`] for out-of-range values.
    pub fn load(path: &Path) -> Result<Self, CalibrationError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn save(&self, path: &Path) -> Result<(), CalibrationError> {
        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), CalibrationError> {
        if self.border_size < 0 {
            return Err(CalibrationError::InvalidParams(format!(
                "border_size must not be negative, got {}",
                self.border_size
            )));
        }
        if self.translation_min > self.translation_max {
            return Err(CalibrationError::InvalidParams(format!(
                "translation_min ({}) exceeds translation_max ({})",
                self.translation_min, self.translation_max
            )));
        }
        if !(self.extrinsic.max_point_height_error >= 0.0) {
            return Err(CalibrationError::InvalidParams(
                "max_point_height_error must be non-negative".to_string(),
            ));
        }
        self.sampling.validate()
    }
}
