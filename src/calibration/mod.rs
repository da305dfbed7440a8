//! Extrinsic calibration from 3D-2D point correspondences.
//!
//! The [`ExtrinsicCalibrator`] owns a [`PointCorrespondenceSet`], solves the
//! camera pose with a [`PoseSolver`] (by default [`IterativePnp`]) and keeps
//! the [`ReprojectionError`] statistics of the active pose. Forward and back
//! projection of single points go through a [`WorldProjection`], which binds
//! the camera optics and the user's 3D frame pose together.
//!
//! Everything that needs a user decision (discarding stale image points,
//! confirming an export) goes through the [`UserPrompt`] collaborator;
//! manually clicked image points come from a [`MarkedPointProvider`].

use crate::camera::CalibrationError;
use nalgebra::{Point2, Vector3};

pub mod correspondence;
pub mod extrinsic;
pub mod pnp;
pub mod projection;
pub mod reprojection;

pub use correspondence::PointCorrespondenceSet;
pub use extrinsic::{ExtrinsicCalibrator, ExtrinsicSettings, ExtrinsicSolution};
pub use pnp::IterativePnp;
pub use projection::WorldProjection;
pub use reprojection::{ErrorStatistics, ReprojectionError};

/// A camera pose estimator working on 3D-2D correspondences.
///
/// Implementations first compute a closed-form estimate and then refine it by
/// minimizing the pixel reprojection error.
pub trait PoseSolver {
    /// Closed-form initial pose.
    ///
    /// # Errors
    ///
    /// Returns a [`CalibrationError`] when the point configuration does not
    /// allow a linear solution (too few points, degenerate geometry).
    fn linear_estimation(&mut self) -> Result<(), CalibrationError>;

    /// Non-linear refinement of the current pose.
    ///
    /// # Arguments
    ///
    /// * `verbose` - If `true`, progress is logged at info level.
    fn optimize(&mut self, verbose: bool) -> Result<(), CalibrationError>;

    /// Current estimate as `(rotation vector, translation)` of the
    /// world-to-camera transform `x_cam = R·x_world + t`.
    fn pose(&self) -> Option<(Vector3<f64>, Vector3<f64>)>;
}

/// Modal confirmation and warning collaborator.
pub trait UserPrompt {
    /// Asks a yes/no question. `true` means the user agreed.
    fn confirm(&mut self, title: &str, message: &str) -> bool;

    /// Shows a warning or error that needs no answer.
    fn warn(&mut self, title: &str, message: &str);
}

/// Non-interactive [`UserPrompt`] that logs every message and answers all
/// questions with a fixed value.
#[derive(Debug, Clone, Copy)]
pub struct LogPrompt {
    pub answer: bool,
}

impl Default for LogPrompt {
    fn default() -> Self {
        LogPrompt { answer: true }
    }
}

impl UserPrompt for LogPrompt {
    fn confirm(&mut self, title: &str, message: &str) -> bool {
        log::info!("{title}: {message} -> {}", if self.answer { "yes" } else { "no" });
        self.answer
    }

    fn warn(&mut self, title: &str, message: &str) {
        log::warn!("{title}: {message}");
    }
}

/// Source of manually marked image positions (one per marked person).
pub trait MarkedPointProvider {
    fn count(&self) -> usize;

    /// First marked position of entry `index`, in image pixels.
    fn point(&self, index: usize) -> Option<Point2<f64>>;

    /// Removes the marks once they were copied.
    fn clear_marks(&mut self) {}
}

impl MarkedPointProvider for Vec<Point2<f64>> {
    fn count(&self) -> usize {
        self.len()
    }

    fn point(&self, index: usize) -> Option<Point2<f64>> {
        self.get(index).copied()
    }

    fn clear_marks(&mut self) {
        self.clear();
    }
}
