//! Iterative Perspective-n-Point solver.
//!
//! The initial pose comes from a closed-form estimate: a plane-induced
//! homography for coplanar points, a normalized DLT otherwise. It is then
//! refined with Levenberg-Marquardt on the pixel residuals, parameterized by
//! the rotation vector and the translation.

use crate::calibration::PoseSolver;
use crate::calibration::correspondence::{MIN_GENERAL_POINTS, MIN_PLANAR_POINTS};
use crate::camera::{CalibrationError, PinholeCamera};
use crate::geometry;

use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector, Matrix3, Matrix3x4, Point2, Point3, Rotation3, Vector2, Vector3};
use std::collections::HashMap;
use tiny_solver::factors::Factor;
use tiny_solver::{LevenbergMarquardtOptimizer, Optimizer as TinySolverOptimizer};

/// Rotates `p` by the axis-angle vector `r`.
fn rotate_point<T: nalgebra::RealField>(r: &Vector3<T>, p: &Vector3<T>) -> Vector3<T> {
    let theta2 = r.norm_squared();
    let eps: T = nalgebra::convert(f64::EPSILON);
    if theta2 > eps {
        let theta = theta2.sqrt();
        let k = r.unscale(theta.clone());
        let (sin, cos) = (theta.clone().sin(), theta.cos());
        let one: T = nalgebra::convert(1.0);
        p * cos.clone() + k.cross(p) * sin + k.clone() * (k.dot(p) * (one - cos))
    } else {
        // first order for tiny angles
        p + r.cross(p)
    }
}

/// Pixel residuals of a pose given fixed intrinsics.
#[derive(Debug, Clone)]
struct PoseCost {
    points3d: Vec<Vector3<f64>>,
    points2d: Vec<Vector2<f64>>,
    focal: Vector2<f64>,
    principal_point: Vector2<f64>,
}

impl<T: nalgebra::RealField> Factor<T> for PoseCost {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        let pose = &params[0];
        let r = Vector3::new(pose[0].clone(), pose[1].clone(), pose[2].clone());
        let t = Vector3::new(pose[3].clone(), pose[4].clone(), pose[5].clone());

        let fx: T = nalgebra::convert(self.focal.x);
        let fy: T = nalgebra::convert(self.focal.y);
        let cx: T = nalgebra::convert(self.principal_point.x);
        let cy: T = nalgebra::convert(self.principal_point.y);

        let mut residuals = DVector::zeros(self.points2d.len() * 2);
        for (i, (p3d, p2d)) in self.points3d.iter().zip(self.points2d.iter()).enumerate() {
            let p: Vector3<T> = Vector3::new(
                nalgebra::convert(p3d.x),
                nalgebra::convert(p3d.y),
                nalgebra::convert(p3d.z),
            );
            let cam = rotate_point(&r, &p) + t.clone();
            let u = fx.clone() * cam.x.clone() / cam.z.clone() + cx.clone();
            let v = fy.clone() * cam.y.clone() / cam.z.clone() + cy.clone();

            residuals[i * 2] = u - nalgebra::convert::<f64, T>(p2d.x);
            residuals[i * 2 + 1] = v - nalgebra::convert::<f64, T>(p2d.y);
        }
        residuals
    }
}

/// Perspective-n-Point solver for a pinhole camera without distortion.
///
/// # Examples
///
/// ```rust
/// use nalgebra::{Point3, Vector3};
/// use worldcam::calibration::{IterativePnp, PoseSolver};
/// use worldcam::camera::{IntrinsicModel, PinholeCamera};
///
/// let camera = PinholeCamera::new(IntrinsicModel::new(800.0, 800.0, 320.0, 240.0), 0);
/// let world = vec![
///     Point3::new(0.0, 0.0, 0.0),
///     Point3::new(100.0, 0.0, 0.0),
///     Point3::new(100.0, 100.0, 0.0),
///     Point3::new(0.0, 100.0, 0.0),
///     Point3::new(50.0, 30.0, 0.0),
/// ];
/// // camera 400 units in front of the plane, looking straight at it
/// let t = Vector3::new(-50.0, -50.0, 400.0);
/// let pixels = world.iter().map(|p| camera.project(&(p.coords + t))).collect();
///
/// let mut pnp = IterativePnp::new(world, pixels, &camera);
/// pnp.linear_estimation().unwrap();
/// pnp.optimize(false).unwrap();
/// let (_, translation) = pnp.pose().unwrap();
/// assert!((translation - t).norm() < 1e-3);
/// ```
#[derive(Debug, Clone)]
pub struct IterativePnp {
    points3d: Vec<Point3<f64>>,
    points2d: Vec<Point2<f64>>,
    camera: PinholeCamera,
    planarity_threshold: f64,
    rotation: Vector3<f64>,
    translation: Vector3<f64>,
    initialized: bool,
}

impl IterativePnp {
    /// Pixels are expected in the bordered image of `camera`.
    pub fn new(
        points3d: Vec<Point3<f64>>,
        points2d: Vec<Point2<f64>>,
        camera: &PinholeCamera,
    ) -> Self {
        IterativePnp {
            points3d,
            points2d,
            camera: camera.clone(),
            planarity_threshold: geometry::PLANARITY_THRESHOLD,
            rotation: Vector3::zeros(),
            translation: Vector3::zeros(),
            initialized: false,
        }
    }

    pub fn with_planarity_threshold(mut self, threshold: f64) -> Self {
        self.planarity_threshold = threshold;
        self
    }

    /// Linear estimate followed by refinement.
    pub fn solve(&mut self, verbose: bool) -> Result<(Vector3<f64>, Vector3<f64>), CalibrationError> {
        self.linear_estimation()?;
        self.optimize(verbose)?;
        self.pose()
            .ok_or_else(|| CalibrationError::NumericalError("no pose after solve".to_string()))
    }

    /// Root mean square pixel error of a pose.
    pub fn rms_error(&self, rotation: &Vector3<f64>, translation: &Vector3<f64>) -> f64 {
        if self.points3d.is_empty() {
            return f64::NAN;
        }
        let r = Rotation3::new(*rotation);
        let sum: f64 = self
            .points3d
            .iter()
            .zip(self.points2d.iter())
            .map(|(p3, p2)| {
                let cam = r * p3.coords + translation;
                (self.camera.project(&cam) - p2).norm_squared()
            })
            .sum();
        (sum / self.points3d.len() as f64).sqrt()
    }

    fn check_input(&self) -> Result<(), CalibrationError> {
        if self.points3d.len() != self.points2d.len() {
            return Err(CalibrationError::CountMismatch {
                points_3d: self.points3d.len(),
                points_2d: self.points2d.len(),
            });
        }
        if self.points3d.len() < MIN_PLANAR_POINTS {
            return Err(CalibrationError::InsufficientPoints {
                found: self.points3d.len(),
                required: MIN_PLANAR_POINTS,
            });
        }
        Ok(())
    }

    fn normalized_image_points(&self) -> Vec<Point2<f64>> {
        self.points2d
            .iter()
            .map(|p| self.camera.normalize(p))
            .collect()
    }

    /// Pose from the homography between the fitted plane and the image.
    fn planar_estimation(&self) -> Result<(Matrix3<f64>, Vector3<f64>), CalibrationError> {
        let (center, frame) = geometry::plane_frame(&self.points3d);
        let plane: Vec<Point2<f64>> = self
            .points3d
            .iter()
            .map(|p| {
                let q = frame.transpose() * (p.coords - center.coords);
                Point2::new(q.x, q.y)
            })
            .collect();
        let image = self.normalized_image_points();

        let h = homography(&plane, &image)?;
        let h1 = h.column(0).into_owned();
        let h2 = h.column(1).into_owned();
        let h3 = h.column(2).into_owned();

        let norm = h1.norm() + h2.norm();
        if norm <= f64::EPSILON {
            return Err(CalibrationError::NumericalError(
                "degenerate homography".to_string(),
            ));
        }
        let mut lambda = 2.0 / norm;
        if (h3 * lambda).z < 0.0 {
            lambda = -lambda;
        }

        let r1 = h1 * lambda;
        let r2 = h2 * lambda;
        let approx = Matrix3::from_columns(&[r1, r2, r1.cross(&r2)]);
        let r_plane = geometry::nearest_rotation(&approx).ok_or_else(|| {
            CalibrationError::NumericalError("SVD failed while orthogonalizing".to_string())
        })?;
        let t_plane = h3 * lambda;

        let rotation = r_plane * frame.transpose();
        let translation = t_plane - rotation * center.coords;
        Ok((rotation, translation))
    }

    /// Pose from the normalized direct linear transform.
    fn dlt_estimation(&self) -> Result<(Matrix3<f64>, Vector3<f64>), CalibrationError> {
        if self.points3d.len() < MIN_GENERAL_POINTS {
            return Err(CalibrationError::InsufficientPoints {
                found: self.points3d.len(),
                required: MIN_GENERAL_POINTS,
            });
        }
        let degenerate = || CalibrationError::NumericalError("degenerate point set".to_string());

        let (world, t_world) = geometry::normalize_points_3d(&self.points3d).ok_or_else(degenerate)?;
        let (image, t_image) =
            geometry::normalize_points_2d(&self.normalized_image_points()).ok_or_else(degenerate)?;

        let n = world.len();
        let mut a = DMatrix::zeros(2 * n, 12);
        for (i, (pw, pi)) in world.iter().zip(image.iter()).enumerate() {
            let x = [pw.x, pw.y, pw.z, 1.0];
            for k in 0..4 {
                a[(2 * i, k)] = x[k];
                a[(2 * i, 8 + k)] = -pi.x * x[k];
                a[(2 * i + 1, 4 + k)] = x[k];
                a[(2 * i + 1, 8 + k)] = -pi.y * x[k];
            }
        }
        let p = geometry::null_vector(&a).ok_or_else(degenerate)?;
        let p_norm = Matrix3x4::from_row_slice(p.as_slice());
        let t_image_inv = t_image.try_inverse().ok_or_else(degenerate)?;
        let projection = t_image_inv * p_norm * t_world;

        let m = projection.fixed_view::<3, 3>(0, 0).into_owned();
        let mut scale = (m.row(0).norm() + m.row(1).norm() + m.row(2).norm()) / 3.0;
        if scale <= f64::EPSILON {
            return Err(degenerate());
        }
        if m.determinant() < 0.0 {
            scale = -scale;
        }
        let rotation = geometry::nearest_rotation(&(m / scale)).ok_or_else(|| {
            CalibrationError::NumericalError("SVD failed while orthogonalizing".to_string())
        })?;
        let translation = projection.column(3).into_owned() / scale;
        Ok((rotation, translation))
    }
}

/// Homography mapping `src` to `dst`, with Hartley normalization.
fn homography(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Result<Matrix3<f64>, CalibrationError> {
    let degenerate = || CalibrationError::NumericalError("degenerate point set".to_string());
    let (src_n, t_src) = geometry::normalize_points_2d(src).ok_or_else(degenerate)?;
    let (dst_n, t_dst) = geometry::normalize_points_2d(dst).ok_or_else(degenerate)?;

    let mut a = DMatrix::zeros(2 * src_n.len(), 9);
    for (i, (s, d)) in src_n.iter().zip(dst_n.iter()).enumerate() {
        let (x, y, u, v) = (s.x, s.y, d.x, d.y);
        let row = 2 * i;
        a[(row, 0)] = -x;
        a[(row, 1)] = -y;
        a[(row, 2)] = -1.0;
        a[(row, 6)] = u * x;
        a[(row, 7)] = u * y;
        a[(row, 8)] = u;
        a[(row + 1, 3)] = -x;
        a[(row + 1, 4)] = -y;
        a[(row + 1, 5)] = -1.0;
        a[(row + 1, 6)] = v * x;
        a[(row + 1, 7)] = v * y;
        a[(row + 1, 8)] = v;
    }
    let h = geometry::null_vector(&a).ok_or_else(degenerate)?;
    let h_norm = Matrix3::from_row_slice(h.as_slice());
    let t_dst_inv = t_dst.try_inverse().ok_or_else(degenerate)?;
    Ok(t_dst_inv * h_norm * t_src)
}

impl PoseSolver for IterativePnp {
    fn linear_estimation(&mut self) -> Result<(), CalibrationError> {
        self.check_input()?;

        let planar = geometry::is_planar(&self.points3d, self.planarity_threshold);
        let (rotation, translation) = if planar {
            self.planar_estimation()?
        } else {
            self.dlt_estimation()?
        };

        self.rotation = geometry::rotation_vector(&rotation);
        self.translation = translation;
        self.initialized = true;
        debug!(
            "Linear {} pose: r = {:?}, t = {:?}, rms = {:.4}px",
            if planar { "planar" } else { "DLT" },
            self.rotation,
            self.translation,
            self.rms_error(&self.rotation, &self.translation)
        );
        Ok(())
    }

    fn optimize(&mut self, verbose: bool) -> Result<(), CalibrationError> {
        self.check_input()?;
        if !self.initialized {
            self.linear_estimation()?;
        }

        let initial_params = DVector::from_vec(vec![
            self.rotation.x,
            self.rotation.y,
            self.rotation.z,
            self.translation.x,
            self.translation.y,
            self.translation.z,
        ]);

        let mut problem = tiny_solver::Problem::new();
        let cost_function = PoseCost {
            points3d: self.points3d.iter().map(|p| p.coords).collect(),
            points2d: self.points2d.iter().map(|p| p.coords).collect(),
            focal: Vector2::new(self.camera.intrinsics.fx(), self.camera.intrinsics.fy()),
            principal_point: self.camera.principal_point().coords,
        };
        let num_residuals = self.points2d.len() * 2;
        problem.add_residual_block(num_residuals, &["pose"], Box::new(cost_function), None);

        let mut initial_values = HashMap::new();
        initial_values.insert("pose".to_string(), initial_params);

        if verbose {
            info!("Starting pose refinement with tiny-solver Levenberg-Marquardt...");
        }

        let optimizer = LevenbergMarquardtOptimizer::default();
        let refined = optimizer
            .optimize(&problem, &initial_values, None)
            .and_then(|result| result.get("pose").cloned());

        let Some(refined) = refined else {
            warn!("Pose refinement failed, keeping the linear estimate");
            return Ok(());
        };

        let rotation = Vector3::new(refined[0], refined[1], refined[2]);
        let translation = Vector3::new(refined[3], refined[4], refined[5]);
        let before = self.rms_error(&self.rotation, &self.translation);
        let after = self.rms_error(&rotation, &translation);

        if after.is_finite() && (!before.is_finite() || after <= before) {
            self.rotation = rotation;
            self.translation = translation;
        } else {
            warn!(
                "Pose refinement did not improve the estimate ({before:.4}px -> {after:.4}px), keeping the linear estimate"
            );
        }

        if verbose {
            info!(
                "Pose refinement finished: rms {:.4}px -> {:.4}px",
                before,
                self.rms_error(&self.rotation, &self.translation)
            );
        }
        Ok(())
    }

    fn pose(&self) -> Option<(Vector3<f64>, Vector3<f64>)> {
        self.initialized.then_some((self.rotation, self.translation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::IntrinsicModel;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn camera() -> PinholeCamera {
        PinholeCamera::new(IntrinsicModel::new(1000.0, 1000.0, 640.0, 360.0), 0)
    }

    /// World-to-camera pose of a camera above the ground looking down.
    fn true_pose() -> (Vector3<f64>, Vector3<f64>) {
        let r = Rotation3::from_euler_angles(PI + 0.08, -0.05, 0.3);
        let center = Vector3::new(50.0, -30.0, 600.0);
        (r.scaled_axis(), -(r * center))
    }

    fn project_all(points: &[Point3<f64>]) -> Vec<Point2<f64>> {
        let (r, t) = true_pose();
        let rot = Rotation3::new(r);
        let camera = camera();
        points
            .iter()
            .map(|p| camera.project(&(rot * p.coords + t)))
            .collect()
    }

    fn ground_grid() -> Vec<Point3<f64>> {
        let mut points = Vec::new();
        for i in 0..3 {
            for j in 0..3 {
                points.push(Point3::new(-150.0 + 150.0 * i as f64, -100.0 + 100.0 * j as f64, 0.0));
            }
        }
        points
    }

    #[test]
    fn test_rotate_point_matches_rodrigues() {
        for r in [
            Vector3::new(0.3, -0.2, 1.1),
            Vector3::new(PI, 0.0, 0.0),
            Vector3::new(1e-12, 0.0, 0.0),
        ] {
            let p = Vector3::new(1.0, -2.0, 3.5);
            assert_relative_eq!(rotate_point(&r, &p), Rotation3::new(r) * p, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_planar_four_points() {
        let world = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(300.0, 0.0, 0.0),
            Point3::new(300.0, 200.0, 0.0),
            Point3::new(0.0, 200.0, 0.0),
        ];
        let pixels = project_all(&world);
        let mut pnp = IterativePnp::new(world, pixels, &camera());
        let (r, t) = pnp.solve(false).unwrap();
        let (r_true, t_true) = true_pose();

        assert_relative_eq!(
            Rotation3::new(r).into_inner(),
            Rotation3::new(r_true).into_inner(),
            epsilon = 1e-6
        );
        assert_relative_eq!(t, t_true, epsilon = 1e-3);
        assert!(pnp.rms_error(&r, &t) < 1e-6);
    }

    #[test]
    fn test_planar_grid_with_noise() {
        let world = ground_grid();
        let mut pixels = project_all(&world);
        for (i, p) in pixels.iter_mut().enumerate() {
            let s = if i % 2 == 0 { 0.3 } else { -0.3 };
            p.x += s;
            p.y -= s;
        }
        let mut pnp = IterativePnp::new(world, pixels, &camera());
        pnp.linear_estimation().unwrap();
        let (r0, t0) = pnp.pose().unwrap();
        let linear_rms = pnp.rms_error(&r0, &t0);

        pnp.optimize(true).unwrap();
        let (r, t) = pnp.pose().unwrap();
        assert!(pnp.rms_error(&r, &t) <= linear_rms + 1e-12);

        let (_, t_true) = true_pose();
        assert!((t - t_true).norm() < 5.0);
    }

    #[test]
    fn test_non_planar_dlt() {
        let mut world = ground_grid();
        world.push(Point3::new(0.0, 0.0, 180.0));
        world.push(Point3::new(100.0, -50.0, 90.0));
        world.push(Point3::new(-120.0, 60.0, 150.0));
        let pixels = project_all(&world);

        let mut pnp = IterativePnp::new(world, pixels, &camera());
        pnp.linear_estimation().unwrap();
        let (r, t) = pnp.pose().unwrap();
        let (r_true, t_true) = true_pose();
        assert_relative_eq!(
            Rotation3::new(r).into_inner(),
            Rotation3::new(r_true).into_inner(),
            epsilon = 1e-6
        );
        assert_relative_eq!(t, t_true, epsilon = 1e-3);
    }

    #[test]
    fn test_border_is_respected() {
        let world = ground_grid();
        let bordered = PinholeCamera::new(camera().intrinsics, 40);
        let pixels: Vec<Point2<f64>> = project_all(&world)
            .into_iter()
            .map(|p| Point2::new(p.x - 40.0, p.y - 40.0))
            .collect();
        let mut pnp = IterativePnp::new(world, pixels, &bordered);
        let (_, t) = pnp.solve(false).unwrap();
        assert_relative_eq!(t, true_pose().1, epsilon = 1e-3);
    }

    #[test]
    fn test_input_errors() {
        let world = vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)];
        let pixels = project_all(&world);
        let mut pnp = IterativePnp::new(world.clone(), pixels, &camera());
        assert!(matches!(
            pnp.linear_estimation(),
            Err(CalibrationError::InsufficientPoints { found: 3, .. })
        ));
        assert!(pnp.pose().is_none());

        let mut pnp = IterativePnp::new(world, vec![Point2::origin()], &camera());
        assert!(matches!(
            pnp.linear_estimation(),
            Err(CalibrationError::CountMismatch { .. })
        ));
    }
}
