//! Distortion-free pinhole projection on the bordered image.
//!
//! All pixel coordinates handled by this crate live in the undistorted image
//! with its border removed, so the principal point used for projection is the
//! calibrated one shifted by the border size. [`PinholeCamera`] keeps that
//! shift in one place.

use crate::camera::IntrinsicModel;
use nalgebra::{Matrix3, Point2, Vector3};
use serde::{Deserialize, Serialize};

/// An [`IntrinsicModel`] together with the image border size.
///
/// # Examples
///
/// ```rust
/// use nalgebra::Vector3;
/// use worldcam::camera::{IntrinsicModel, PinholeCamera};
///
/// let camera = PinholeCamera::new(IntrinsicModel::new(500.0, 500.0, 320.0, 240.0), 10);
/// let pixel = camera.project(&Vector3::new(0.1, 0.2, 1.0));
/// // u = 500 * 0.1 + (320 - 10), v = 500 * 0.2 + (240 - 10)
/// assert!((pixel.x - 360.0).abs() < 1e-9);
/// assert!((pixel.y - 330.0).abs() < 1e-9);
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PinholeCamera {
    pub intrinsics: IntrinsicModel,
    /// Border in pixels added around the image by undistortion.
    pub border: i32,
}

impl PinholeCamera {
    pub fn new(intrinsics: IntrinsicModel, border: i32) -> Self {
        PinholeCamera { intrinsics, border }
    }

    pub fn border(&self) -> f64 {
        self.border as f64
    }

    /// Principal point shifted by the border.
    pub fn principal_point(&self) -> Point2<f64> {
        Point2::new(
            self.intrinsics.cx() - self.border(),
            self.intrinsics.cy() - self.border(),
        )
    }

    /// Camera matrix with the border-shifted principal point.
    pub fn camera_matrix(&self) -> Matrix3<f64> {
        let c = self.principal_point();
        Matrix3::new(
            self.intrinsics.fx(),
            0.0,
            c.x,
            0.0,
            self.intrinsics.fy(),
            c.y,
            0.0,
            0.0,
            1.0,
        )
    }

    /// Projects a camera-frame point to pixel coordinates.
    ///
    /// A point with zero depth has no image and yields the sentinel `(0, 0)`.
    pub fn project(&self, point: &Vector3<f64>) -> Point2<f64> {
        if point.z == 0.0 {
            return Point2::origin();
        }
        let c = self.principal_point();
        Point2::new(
            self.intrinsics.fx() * point.x / point.z + c.x,
            self.intrinsics.fy() * point.y / point.z + c.y,
        )
    }

    /// Normalized image coordinates of a pixel.
    pub fn normalize(&self, pixel: &Point2<f64>) -> Point2<f64> {
        let c = self.principal_point();
        Point2::new(
            (pixel.x - c.x) / self.intrinsics.fx(),
            (pixel.y - c.y) / self.intrinsics.fy(),
        )
    }

    /// Viewing ray through a pixel, scaled to unit depth (`z == 1`).
    pub fn ray(&self, pixel: &Point2<f64>) -> Vector3<f64> {
        let n = self.normalize(pixel);
        Vector3::new(n.x, n.y, 1.0)
    }
}
