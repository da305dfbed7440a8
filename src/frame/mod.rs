//! User-adjustable placement of the world coordinate frame.
//!
//! Two independent poses are kept. The 2D pose places a planar coordinate
//! system on the image (used when no extrinsic calibration is available); the
//! 3D pose shifts and mirrors the calibrated world frame so that it matches an
//! externally chosen convention without redoing the extrinsic calibration.
//!
//! The 2D pose stores the integer-like slider units used by the UI: position
//! in tenths of a pixel, angle in tenths of a degree and scale in tenths of a
//! percent.

use nalgebra::{Matrix3, Point2, Point3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Which coordinate system answers pixel/world queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoordDimension {
    /// Extrinsic calibration drives all mappings.
    #[default]
    ThreeD,
    /// A planar coordinate system with altitude correction.
    TwoD,
}

impl CoordDimension {
    /// Persisted tab index: `0` is 3D, `1` is 2D.
    pub fn index(self) -> i32 {
        match self {
            CoordDimension::ThreeD => 0,
            CoordDimension::TwoD => 1,
        }
    }

    pub fn from_index(index: i32) -> Self {
        if index == 1 {
            CoordDimension::TwoD
        } else {
            CoordDimension::ThreeD
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordPose2D {
    /// Origin in tenths of a pixel.
    pub position: Vector2<f64>,
    /// Rotation in tenths of a degree.
    pub angle: f64,
    /// Scale in tenths of a percent.
    pub scale: f64,
    /// Length in cm represented by one axis unit.
    pub unit: f64,
}

impl Default for CoordPose2D {
    fn default() -> Self {
        CoordPose2D {
            position: Vector2::zeros(),
            angle: 0.0,
            scale: 100.0,
            unit: 100.0,
        }
    }
}

impl CoordPose2D {
    /// Affine image transform of the planar coordinate system.
    ///
    /// Composition is translate, then rotate, then scale, so a point `p` in
    /// coordinate-system units maps to `T · R · S · p` in image pixels.
    pub fn transform(&self) -> Matrix3<f64> {
        let t = self.position / 10.0;
        let angle = (self.angle / 10.0).to_radians();
        let s = self.scale / 10.0 / 100.0;

        let translate = Matrix3::new(1.0, 0.0, t.x, 0.0, 1.0, t.y, 0.0, 0.0, 1.0);
        let (sin, cos) = angle.sin_cos();
        let rotate = Matrix3::new(cos, -sin, 0.0, sin, cos, 0.0, 0.0, 0.0, 1.0);
        let scale = Matrix3::new(s, 0.0, 0.0, 0.0, s, 0.0, 0.0, 0.0, 1.0);
        translate * rotate * scale
    }
}

/// Per-axis sign flips applied to world points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwapAxis {
    pub x: bool,
    pub y: bool,
    pub z: bool,
}

impl SwapAxis {
    pub fn apply(&self, mut p: Point3<f64>) -> Point3<f64> {
        if self.x {
            p.x = -p.x;
        }
        if self.y {
            p.y = -p.y;
        }
        if self.z {
            p.z = -p.z;
        }
        p
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CoordPose3D {
    pub position: Vector3<f64>,
    pub swap: SwapAxis,
}

impl CoordPose3D {
    /// User world point to calibrated world frame: flip, then shift.
    pub fn to_calibrated(&self, p: &Point3<f64>) -> Point3<f64> {
        self.swap.apply(*p) + self.position
    }

    /// Calibrated world frame back to the user frame: unshift, then flip.
    pub fn from_calibrated(&self, p: &Point3<f64>) -> Point3<f64> {
        self.swap.apply(*p - self.position)
    }
}

/// The complete, UI-adjustable coordinate frame state.
///
/// The 2D translation is clamped to `[translation_min, translation_max]` on
/// every write.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateFramePose {
    dimension: CoordDimension,
    pose_2d: CoordPose2D,
    pose_3d: CoordPose3D,
    /// Camera altitude above ground for the planar mapping, in cm.
    pub altitude: f64,
    /// Scale around the calibrated principal point instead of the image centre.
    pub use_intrinsic_center: bool,
    /// Length of the drawn 3D axes.
    pub axis_length: f64,
    translation_min: Vector2<f64>,
    translation_max: Vector2<f64>,
}

impl Default for CoordinateFramePose {
    fn default() -> Self {
        CoordinateFramePose {
            dimension: CoordDimension::default(),
            pose_2d: CoordPose2D::default(),
            pose_3d: CoordPose3D::default(),
            altitude: 535.0,
            use_intrinsic_center: false,
            axis_length: 200.0,
            translation_min: Vector2::repeat(-10000.0),
            translation_max: Vector2::repeat(10000.0),
        }
    }
}

impl CoordinateFramePose {
    pub fn dimension(&self) -> CoordDimension {
        self.dimension
    }

    pub fn set_dimension(&mut self, dimension: CoordDimension) {
        self.dimension = dimension;
    }

    pub fn pose_2d(&self) -> &CoordPose2D {
        &self.pose_2d
    }

    pub fn pose_3d(&self) -> &CoordPose3D {
        &self.pose_3d
    }

    /// Replaces the 2D pose; its position is clamped to the translation range.
    pub fn set_pose_2d(&mut self, pose: CoordPose2D) {
        self.pose_2d = pose;
        self.pose_2d.position = self.clamp_translation(pose.position);
    }

    pub fn set_translation_2d(&mut self, position: Vector2<f64>) {
        self.pose_2d.position = self.clamp_translation(position);
    }

    pub fn set_pose_3d(&mut self, pose: CoordPose3D) {
        self.pose_3d = pose;
    }

    pub fn set_translation_3d(&mut self, position: Vector3<f64>) {
        self.pose_3d.position = position;
    }

    pub fn set_swap(&mut self, swap: SwapAxis) {
        self.pose_3d.swap = swap;
    }

    pub fn translation_range(&self) -> (Vector2<f64>, Vector2<f64>) {
        (self.translation_min, self.translation_max)
    }

    /// Sets the admissible 2D translation range and re-clamps the current
    /// position. Bounds are sorted per component.
    pub fn set_translation_range(&mut self, min: Vector2<f64>, max: Vector2<f64>) {
        self.translation_min = min.inf(&max);
        self.translation_max = min.sup(&max);
        self.pose_2d.position = self.clamp_translation(self.pose_2d.position);
    }

    fn clamp_translation(&self, position: Vector2<f64>) -> Vector2<f64> {
        Vector2::new(
            position.x.clamp(self.translation_min.x, self.translation_max.x),
            position.y.clamp(self.translation_min.y, self.translation_max.y),
        )
    }

    /// Transform used for drawing and for the planar mapping. In 3D mode the
    /// coordinate system is drawn through the calibration and this is the
    /// identity.
    pub fn coord_transform(&self) -> Matrix3<f64> {
        match self.dimension {
            CoordDimension::TwoD => self.pose_2d.transform(),
            CoordDimension::ThreeD => Matrix3::identity(),
        }
    }

    /// Image pixel to coordinate-system units: remove the border, then invert
    /// [`Self::coord_transform`]. `None` for a degenerate (zero scale) pose.
    pub fn image_to_world(&self, border: f64) -> Option<Matrix3<f64>> {
        let unborder = Matrix3::new(1.0, 0.0, -border, 0.0, 1.0, -border, 0.0, 0.0, 1.0);
        let inverse = self.coord_transform().try_inverse()?;
        Some(inverse * unborder)
    }
}

/// Applies a homogeneous 2D transform to a point.
pub fn transform_point(m: &Matrix3<f64>, p: &Point2<f64>) -> Point2<f64> {
    let h = m * Vector3::new(p.x, p.y, 1.0);
    Point2::new(h.x / h.z, h.y / h.z)
}

/// Coordinate attributes persisted on the `EXTRINSIC_PARAMETERS` element.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct CoordinateRecord {
    #[serde(rename = "COORD_DIMENSION")]
    dimension: i32,
    #[serde(rename = "ROTATE")]
    rotate: f64,
    #[serde(rename = "TRANS_X")]
    trans_x: f64,
    #[serde(rename = "TRANS_Y")]
    trans_y: f64,
    #[serde(rename = "SCALE")]
    scale: f64,
    #[serde(rename = "ALTITUDE")]
    altitude: f64,
    #[serde(rename = "UNIT")]
    unit: f64,
    #[serde(rename = "USE_INTRINSIC_CENTER")]
    use_intrinsic_center: bool,
    #[serde(rename = "COORD3D_TRANS_X")]
    trans3d_x: f64,
    #[serde(rename = "COORD3D_TRANS_Y")]
    trans3d_y: f64,
    #[serde(rename = "COORD3D_TRANS_Z")]
    trans3d_z: f64,
    #[serde(rename = "COORD3D_AXIS_LEN")]
    axis_length: f64,
    #[serde(rename = "COORD3D_SWAP_X")]
    swap_x: bool,
    #[serde(rename = "COORD3D_SWAP_Y")]
    swap_y: bool,
    #[serde(rename = "COORD3D_SWAP_Z")]
    swap_z: bool,
}

impl Default for CoordinateRecord {
    fn default() -> Self {
        CoordinateRecord::from(&CoordinateFramePose::default())
    }
}

impl From<&CoordinateFramePose> for CoordinateRecord {
    fn from(f: &CoordinateFramePose) -> Self {
        CoordinateRecord {
            dimension: f.dimension.index(),
            rotate: f.pose_2d.angle,
            trans_x: f.pose_2d.position.x,
            trans_y: f.pose_2d.position.y,
            scale: f.pose_2d.scale,
            altitude: f.altitude,
            unit: f.pose_2d.unit,
            use_intrinsic_center: f.use_intrinsic_center,
            trans3d_x: f.pose_3d.position.x,
            trans3d_y: f.pose_3d.position.y,
            trans3d_z: f.pose_3d.position.z,
            axis_length: f.axis_length,
            swap_x: f.pose_3d.swap.x,
            swap_y: f.pose_3d.swap.y,
            swap_z: f.pose_3d.swap.z,
        }
    }
}

impl CoordinateRecord {
    /// Restores the persisted state into `frame`, keeping its translation range.
    /// A stored translation outside the range widens the range.
    pub(crate) fn apply_to(&self, frame: &mut CoordinateFramePose) {
        let position = Vector2::new(self.trans_x, self.trans_y);
        let (min, max) = frame.translation_range();
        frame.set_translation_range(min.inf(&position), max.sup(&position));

        frame.set_dimension(CoordDimension::from_index(self.dimension));
        frame.set_pose_2d(CoordPose2D {
            position,
            angle: self.rotate,
            scale: self.scale,
            unit: self.unit,
        });
        frame.set_pose_3d(CoordPose3D {
            position: Vector3::new(self.trans3d_x, self.trans3d_y, self.trans3d_z),
            swap: SwapAxis {
                x: self.swap_x,
                y: self.swap_y,
                z: self.swap_z,
            },
        });
        frame.altitude = self.altitude;
        frame.use_intrinsic_center = self.use_intrinsic_center;
        frame.axis_length = self.axis_length;
    }
}
