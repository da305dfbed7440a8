use crate::camera::{ExtrinsicParameters, PinholeCamera};
use crate::frame::CoordPose3D;
use nalgebra::{Matrix3, Point2, Point3, Vector3};

/// Forward and back projection between user world points and image pixels.
///
/// Binds the optics, the extrinsic pose and the user's 3D frame pose (axis
/// swap and shift) for a series of queries.
#[derive(Debug, Clone, Copy)]
pub struct WorldProjection<'a> {
    camera: &'a PinholeCamera,
    frame: &'a CoordPose3D,
    extrinsics: ExtrinsicParameters,
    rotation: Matrix3<f64>,
}

impl<'a> WorldProjection<'a> {
    pub fn new(
        camera: &'a PinholeCamera,
        frame: &'a CoordPose3D,
        extrinsics: ExtrinsicParameters,
    ) -> Self {
        WorldProjection {
            camera,
            frame,
            extrinsics,
            rotation: extrinsics.rotation_matrix(),
        }
    }

    /// Same optics and frame pose with different extrinsic parameters.
    pub fn with_extrinsics(&self, extrinsics: ExtrinsicParameters) -> Self {
        WorldProjection::new(self.camera, self.frame, extrinsics)
    }

    pub fn camera(&self) -> &PinholeCamera {
        self.camera
    }

    pub fn frame(&self) -> &CoordPose3D {
        self.frame
    }

    pub fn extrinsics(&self) -> &ExtrinsicParameters {
        &self.extrinsics
    }

    /// Pixel of a user world point.
    ///
    /// The point is swapped and shifted into the calibrated frame, rotated into
    /// the camera frame, translated and projected. A point in the camera plane
    /// (`z == 0`) maps to `(0, 0)`.
    pub fn image_point(&self, point: &Point3<f64>) -> Point2<f64> {
        let calibrated = self.frame.to_calibrated(point);
        let cam = self.rotation * calibrated.coords + self.rotation * self.extrinsics.translation;
        self.camera.project(&cam)
    }

    /// World point at height `height` seen through `pixel`.
    ///
    /// The pixel defines the ray `λ·v` in camera space. `height` is a user
    /// frame `z`; it is swapped and shifted into the calibrated frame, the depth
    /// `λ` is chosen so that the ray point reaches it, then the shift and swap
    /// are undone.
    pub fn world_point(&self, pixel: &Point2<f64>, height: f64) -> Point3<f64> {
        let r_inv = self.rotation.transpose();
        let ray = self.camera.ray(pixel);
        let calibrated_height = self.frame.to_calibrated(&Point3::new(0.0, 0.0, height)).z;
        let depth = (calibrated_height + self.extrinsics.translation.z) / (r_inv * ray).z;

        let cam = ray * depth;
        let world = r_inv * (cam - self.rotation * self.extrinsics.translation);
        self.frame.from_calibrated(&Point3::from(world))
    }

    /// Rotates a camera-space direction into world space. Independent of the
    /// translation.
    pub fn cam_to_world_rotation(&self, direction: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.transpose() * direction
    }
}
