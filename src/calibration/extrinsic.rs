use crate::calibration::correspondence::{self, PointCorrespondenceSet};
use crate::calibration::{
    IterativePnp, MarkedPointProvider, ReprojectionError, UserPrompt, WorldProjection,
};
use crate::camera::{CalibrationError, ExtrinsicParameters, PinholeCamera};
use crate::frame::CoordPose3D;
use crate::geometry;

use log::{info, warn};
use nalgebra::{Point2, Point3, Rotation3};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Tunables of the extrinsic calibration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtrinsicSettings {
    /// Height used for the default-height reprojection error, in cm.
    pub default_height: f64,
    /// Largest accepted average point-height error.
    pub max_point_height_error: f64,
    pub planarity_threshold: f64,
}

impl Default for ExtrinsicSettings {
    fn default() -> Self {
        ExtrinsicSettings {
            default_height: 180.0,
            max_point_height_error: 20.0,
            planarity_threshold: geometry::PLANARITY_THRESHOLD,
        }
    }
}

/// Outcome of [`ExtrinsicCalibrator::calibrate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtrinsicSolution {
    /// Parameters now active. All zero when the solve was rejected.
    pub params: ExtrinsicParameters,
    /// The pose found by the solver, kept even when rejected.
    pub solved: ExtrinsicParameters,
    pub camera_height: f64,
    pub valid: bool,
}

/// Owns the point correspondences and the extrinsic parameters solved from
/// them.
///
/// Every mutation of the correspondences or of the parameters drops the cached
/// [`ReprojectionError`].
#[derive(Debug, Clone, Default)]
pub struct ExtrinsicCalibrator {
    settings: ExtrinsicSettings,
    points: PointCorrespondenceSet,
    source: Option<PathBuf>,
    params: ExtrinsicParameters,
    rejected: Option<ExtrinsicParameters>,
    camera_height: Option<f64>,
    reprojection: ReprojectionError,
}

impl ExtrinsicCalibrator {
    pub fn new(settings: ExtrinsicSettings) -> Self {
        ExtrinsicCalibrator {
            settings,
            ..Default::default()
        }
    }

    pub fn settings(&self) -> &ExtrinsicSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: ExtrinsicSettings) {
        self.settings = settings;
        self.clear_reprojection_error();
    }

    pub fn correspondences(&self) -> &PointCorrespondenceSet {
        &self.points
    }

    pub fn set_correspondences(&mut self, points: PointCorrespondenceSet) {
        self.points = points;
        self.clear_reprojection_error();
    }

    /// File the correspondences were last loaded from.
    pub fn correspondence_file(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn params(&self) -> &ExtrinsicParameters {
        &self.params
    }

    /// Replaces the active parameters, e.g. when restoring a project.
    pub fn set_params(&mut self, params: ExtrinsicParameters) {
        self.params = params;
        self.rejected = None;
        self.clear_reprojection_error();
    }

    /// Pose of the last solve that exceeded the error tolerance.
    pub fn rejected(&self) -> Option<&ExtrinsicParameters> {
        self.rejected.as_ref()
    }

    /// Camera height above ground of the last accepted solve.
    pub fn camera_height(&self) -> Option<f64> {
        self.camera_height
    }

    /// Cached statistics; invalid until [`Self::compute_reprojection_error`]
    /// ran on the current state.
    pub fn reprojection_error(&self) -> &ReprojectionError {
        &self.reprojection
    }

    /// Projection with the active parameters.
    pub fn projection<'a>(
        &self,
        camera: &'a PinholeCamera,
        frame: &'a CoordPose3D,
    ) -> WorldProjection<'a> {
        WorldProjection::new(camera, frame, self.params)
    }

    /// Pixel of a world point under `params`, or the active parameters.
    pub fn project(
        &self,
        camera: &PinholeCamera,
        frame: &CoordPose3D,
        point: &Point3<f64>,
        params: Option<&ExtrinsicParameters>,
    ) -> Point2<f64> {
        WorldProjection::new(camera, frame, params.copied().unwrap_or(self.params))
            .image_point(point)
    }

    /// World point at `height` seen through `pixel` under `params`, or the
    /// active parameters.
    pub fn unproject(
        &self,
        camera: &PinholeCamera,
        frame: &CoordPose3D,
        pixel: &Point2<f64>,
        height: f64,
        params: Option<&ExtrinsicParameters>,
    ) -> Point3<f64> {
        WorldProjection::new(camera, frame, params.copied().unwrap_or(self.params))
            .world_point(pixel, height)
    }

    /// Drops the cached statistics, e.g. after the optics changed.
    pub fn clear_reprojection_error(&mut self) {
        self.reprojection = ReprojectionError::default();
    }

    /// Installs statistics persisted together with the active parameters.
    pub fn restore_reprojection_error(&mut self, error: ReprojectionError) {
        self.reprojection = error;
    }

    /// Reads a correspondence file into the calibrator without solving.
    ///
    /// If the file holds world points only and image points of a different
    /// count are stored, `prompt` is asked whether to discard them.
    ///
    /// # Errors
    ///
    /// * Any error of [`correspondence::read_correspondence_file`].
    /// * [`CalibrationError::Aborted`] if the user keeps the stored image
    ///   points. The calibrator is left unchanged.
    pub fn load_correspondences(
        &mut self,
        path: &Path,
        prompt: &mut dyn UserPrompt,
    ) -> Result<(), CalibrationError> {
        let file = correspondence::read_correspondence_file(path, self.settings.planarity_threshold)?;

        let stored_2d = self.points.points_2d().len();
        let keep_2d = if file.has_image_points() {
            false
        } else if stored_2d > 0 && stored_2d != file.points_3d.len() {
            let message = format!(
                "Number of 3D points ({}) disagree with number of stored 2D points ({stored_2d})! \
                 The 2D points will be deleted! You have to fetch new ones from the image!",
                file.points_3d.len()
            );
            if !prompt.confirm("Discard image points", &message) {
                return Err(CalibrationError::Aborted);
            }
            false
        } else {
            true
        };

        let points_2d = if keep_2d {
            self.points.points_2d().to_vec()
        } else {
            file.points_2d
        };
        self.points = PointCorrespondenceSet::new(file.points_3d, points_2d)?;
        self.source = Some(path.to_path_buf());
        self.clear_reprojection_error();
        Ok(())
    }

    /// Replaces the image points with the marked positions of `provider` and
    /// calibrates.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::InsufficientPoints`] with fewer than four marks.
    /// * [`CalibrationError::CountMismatch`] if the mark count differs from
    ///   the stored world points.
    pub fn fetch_manual_image_points(
        &mut self,
        provider: &mut dyn MarkedPointProvider,
        camera: &PinholeCamera,
        frame: &CoordPose3D,
    ) -> Result<ExtrinsicSolution, CalibrationError> {
        let count = provider.count();
        if count < correspondence::MIN_PLANAR_POINTS {
            return Err(CalibrationError::InsufficientPoints {
                found: count,
                required: correspondence::MIN_PLANAR_POINTS,
            });
        }
        let stored_3d = self.points.points_3d().len();
        if stored_3d > 0 && stored_3d != count {
            return Err(CalibrationError::CountMismatch {
                points_3d: stored_3d,
                points_2d: count,
            });
        }

        let marks = (0..count)
            .map(|i| {
                provider.point(i).ok_or_else(|| {
                    CalibrationError::InvalidParams(format!("marked point {i} is missing"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.points.set_points_2d(marks)?;
        self.clear_reprojection_error();
        provider.clear_marks();

        self.calibrate(camera, frame)
    }

    /// Solves the camera pose from the stored correspondences.
    ///
    /// A solve whose average point-height error exceeds the tolerance is
    /// rejected: the active parameters become all zero, the error cache is
    /// cleared and the returned solution is marked invalid. The rejected pose
    /// stays available through [`Self::rejected`].
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::NoCorrespondences`] or
    ///   [`CalibrationError::CountMismatch`] if the set is incomplete.
    /// * Solver errors for degenerate point sets.
    pub fn calibrate(
        &mut self,
        camera: &PinholeCamera,
        frame: &CoordPose3D,
    ) -> Result<ExtrinsicSolution, CalibrationError> {
        if !self.points.is_complete() {
            warn!(
                "Invalid point correspondences for camera calibration: 2D points: {}, 3D points: {}",
                self.points.points_2d().len(),
                self.points.points_3d().len()
            );
            return Err(incomplete_error(&self.points));
        }

        let mut pnp = IterativePnp::new(
            self.points.points_3d().to_vec(),
            self.points.points_2d().to_vec(),
            camera,
        )
        .with_planarity_threshold(self.settings.planarity_threshold);
        let (rvec, tvec) = pnp.solve(false)?;

        let rotation = Rotation3::new(rvec);
        let translation = rotation.inverse() * tvec;
        let solved = ExtrinsicParameters::new(rvec, translation);
        let camera_height = translation.z.abs();

        info!("Estimated rotation vector: {:?}", rvec);
        info!("Estimated translation: {:?} (camera height {:.2})", translation, camera_height);

        self.params = solved;
        self.rejected = None;
        let checked = self
            .compute_reprojection_error(camera, frame, None)
            .map(|_| ());
        match checked {
            Ok(()) => {
                self.camera_height = Some(camera_height);
                info!("End of extrinsic calibration");
                Ok(ExtrinsicSolution {
                    params: solved,
                    solved,
                    camera_height,
                    valid: true,
                })
            }
            Err(e) => {
                warn!("Extrinsic calibration not possible ({e}), please select other 2D/3D points");
                self.params = ExtrinsicParameters::zero();
                self.rejected = Some(solved);
                self.clear_reprojection_error();
                Ok(ExtrinsicSolution {
                    params: self.params,
                    solved,
                    camera_height,
                    valid: false,
                })
            }
        }
    }

    /// Computes and caches the reprojection error under `params`, or the
    /// active parameters.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::NoCorrespondences`] or
    ///   [`CalibrationError::CountMismatch`] if the set is incomplete. The
    ///   cache is then invalid.
    /// * [`CalibrationError::CalibrationDivergence`] if the average
    ///   point-height error exceeds the tolerance. The statistics stay cached.
    pub fn compute_reprojection_error(
        &mut self,
        camera: &PinholeCamera,
        frame: &CoordPose3D,
        params: Option<&ExtrinsicParameters>,
    ) -> Result<&ReprojectionError, CalibrationError> {
        if !self.points.is_complete() {
            self.clear_reprojection_error();
            return Err(incomplete_error(&self.points));
        }
        let projection =
            WorldProjection::new(camera, frame, params.copied().unwrap_or(self.params));
        self.reprojection =
            ReprojectionError::evaluate(&projection, &self.points, self.settings.default_height);

        let average = self.reprojection.point_height().average;
        if !(average <= self.settings.max_point_height_error) {
            return Err(CalibrationError::CalibrationDivergence { average });
        }
        Ok(&self.reprojection)
    }

    /// Human-readable listing of the correspondences.
    pub fn correspondence_preview(&self) -> String {
        self.points.preview()
    }

    pub fn save_correspondences(&self, path: &Path) -> Result<(), CalibrationError> {
        self.points.save(path)
    }
}

fn incomplete_error(points: &PointCorrespondenceSet) -> CalibrationError {
    let (n3, n2) = (points.points_3d().len(), points.points_2d().len());
    if n3 == 0 || n2 == 0 {
        CalibrationError::NoCorrespondences
    } else {
        CalibrationError::CountMismatch {
            points_3d: n3,
            points_2d: n2,
        }
    }
}
