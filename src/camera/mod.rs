//! Camera optics and pose data.
//!
//! This module holds the plain data types that every other part of the crate
//! builds on: the [`IntrinsicModel`] produced by an intrinsic calibration run,
//! the [`PinholeCamera`] which couples that model with the image border used by
//! the undistortion step, and the [`ExtrinsicParameters`] describing where the
//! camera sits in the world. The crate-wide [`CalibrationError`] lives here as
//! well.

use serde::{Deserialize, Serialize};

pub mod extrinsic;
pub mod intrinsic;
pub mod pinhole;

pub use extrinsic::ExtrinsicParameters;
pub use intrinsic::{IntrinsicModel, PlausibilityWarning};
pub use pinhole::PinholeCamera;

/// Image size in pixels, without the border.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error("Unsupported or unreadable file: {0}")]
    FileFormat(String),
    #[error("Not enough points: found {found}, need at least {required}")]
    InsufficientPoints { found: usize, required: usize },
    #[error("Point count mismatch: {points_3d} world points but {points_2d} image points")]
    CountMismatch { points_3d: usize, points_2d: usize },
    #[error("No point correspondences available")]
    NoCorrespondences,
    #[error("Calibration diverged: average point height error {average:.3} exceeds tolerance")]
    CalibrationDivergence { average: f64 },
    #[error("Operation aborted by user")]
    Aborted,
    #[error("No usable calibration samples found")]
    NoSamplesFound,
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
    #[error("Numerical error in computation: {0}")]
    NumericalError(String),
    #[error("Failed to load YAML: {0}")]
    YamlError(String),
    #[error("Failed to process JSON: {0}")]
    JsonError(String),
    #[error("Image error: {0}")]
    ImageError(String),
    #[error("IO Error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for CalibrationError {
    fn from(err: std::io::Error) -> Self {
        CalibrationError::IOError(err.to_string())
    }
}

impl From<yaml_rust::ScanError> for CalibrationError {
    fn from(err: yaml_rust::ScanError) -> Self {
        CalibrationError::YamlError(err.to_string())
    }
}

impl From<serde_yaml::Error> for CalibrationError {
    fn from(err: serde_yaml::Error) -> Self {
        CalibrationError::YamlError(err.to_string())
    }
}

impl From<serde_json::Error> for CalibrationError {
    fn from(err: serde_json::Error) -> Self {
        CalibrationError::JsonError(err.to_string())
    }
}

impl From<csv::Error> for CalibrationError {
    fn from(err: csv::Error) -> Self {
        CalibrationError::IOError(err.to_string())
    }
}

impl From<image::ImageError> for CalibrationError {
    fn from(err: image::ImageError) -> Self {
        CalibrationError::ImageError(err.to_string())
    }
}
