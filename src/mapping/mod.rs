//! Pixel/world queries over the complete camera geometry.
//!
//! [`WorldImageMapper`] combines the optics, the extrinsic calibration and the
//! user's coordinate frame. Consumers that only need the five mapping queries
//! should depend on the [`WorldImageCorrespondence`] trait.

use crate::calibration::{
    ExtrinsicCalibrator, ExtrinsicSettings, ExtrinsicSolution, MarkedPointProvider,
    PointCorrespondenceSet, ReprojectionError, UserPrompt, WorldProjection,
};
use crate::camera::{
    CalibrationError, ExtrinsicParameters, IntrinsicModel, PinholeCamera, Resolution,
};
use crate::config::CalibrationConfig;
use crate::frame::{CoordDimension, CoordinateFramePose, transform_point};

use log::{info, warn};
use nalgebra::{Point2, Point3, Vector2, Vector3};
use std::fmt;
use std::path::Path;

/// The mapping queries used by overlays, ground projection and trajectory
/// export. Pixel positions include the image border.
pub trait WorldImageCorrespondence {
    /// Edge length of one pixel in cm in the planar coordinate system.
    fn cm_per_pixel(&self) -> f64;

    /// World distance spanned by one pixel step in x and in y at `pixel`, for
    /// points at `height`.
    fn cm_per_pixel_at(&self, pixel: &Point2<f64>, height: f64) -> Vector2<f64>;

    /// Elevation in degrees of the line of sight through `pixel` at `height`.
    /// 90° means straight below the camera.
    fn angle_to_ground(&self, pixel: &Point2<f64>, height: f64) -> f64;

    /// Image position of the world position `pos` at `height`.
    fn pos_image(&self, pos: &Point2<f64>, height: f64) -> Point2<f64>;

    /// World position in cm of `pixel` at `height`.
    fn pos_real(&self, pixel: &Point2<f64>, height: f64) -> Point2<f64>;
}

/// What part of the geometry changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryEvent {
    Intrinsics,
    Correspondences,
    Extrinsics,
    CoordinatePose,
}

type GeometryListener = Box<dyn FnMut(GeometryEvent)>;

pub struct WorldImageMapper {
    camera: PinholeCamera,
    calibrator: ExtrinsicCalibrator,
    frame: CoordinateFramePose,
    image_size: Option<Resolution>,
    listeners: Vec<GeometryListener>,
}

impl fmt::Debug for WorldImageMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorldImageMapper")
            .field("camera", &self.camera)
            .field("calibrator", &self.calibrator)
            .field("frame", &self.frame)
            .field("image_size", &self.image_size)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Default for WorldImageMapper {
    fn default() -> Self {
        WorldImageMapper::new(PinholeCamera::default(), ExtrinsicSettings::default())
    }
}

impl WorldImageMapper {
    pub fn new(camera: PinholeCamera, settings: ExtrinsicSettings) -> Self {
        WorldImageMapper {
            camera,
            calibrator: ExtrinsicCalibrator::new(settings),
            frame: CoordinateFramePose::default(),
            image_size: None,
            listeners: Vec::new(),
        }
    }

    pub fn from_config(intrinsics: IntrinsicModel, config: &CalibrationConfig) -> Self {
        let mut mapper = WorldImageMapper::new(
            PinholeCamera::new(intrinsics, config.border_size),
            config.extrinsic,
        );
        mapper.frame.set_translation_range(
            Vector2::repeat(config.translation_min),
            Vector2::repeat(config.translation_max),
        );
        mapper
    }

    /// Registers a callback run after every geometry mutation.
    pub fn on_geometry_changed<F>(&mut self, listener: F)
    where
        F: FnMut(GeometryEvent) + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    fn notify(&mut self, event: GeometryEvent) {
        for listener in self.listeners.iter_mut() {
            listener(event);
        }
    }

    pub fn camera(&self) -> &PinholeCamera {
        &self.camera
    }

    pub fn intrinsics(&self) -> &IntrinsicModel {
        &self.camera.intrinsics
    }

    /// Replaces the optics. Plausibility problems are logged, not rejected.
    pub fn set_intrinsics(&mut self, intrinsics: IntrinsicModel) {
        intrinsics.check_plausibility();
        self.camera.intrinsics = intrinsics;
        self.calibrator.clear_reprojection_error();
        self.notify(GeometryEvent::Intrinsics);
    }

    pub fn border(&self) -> i32 {
        self.camera.border
    }

    pub fn set_border(&mut self, border: i32) {
        self.camera.border = border;
        self.calibrator.clear_reprojection_error();
        self.notify(GeometryEvent::Intrinsics);
    }

    pub fn image_size(&self) -> Option<Resolution> {
        self.image_size
    }

    pub fn set_image_size(&mut self, size: Option<Resolution>) {
        self.image_size = size;
    }

    pub fn calibrator(&self) -> &ExtrinsicCalibrator {
        &self.calibrator
    }

    pub fn frame(&self) -> &CoordinateFramePose {
        &self.frame
    }

    pub fn set_frame(&mut self, frame: CoordinateFramePose) {
        self.frame = frame;
        self.notify(GeometryEvent::CoordinatePose);
    }

    /// Edits the coordinate frame in place.
    pub fn update_frame<F: FnOnce(&mut CoordinateFramePose)>(&mut self, edit: F) {
        edit(&mut self.frame);
        self.notify(GeometryEvent::CoordinatePose);
    }

    pub fn extrinsic_params(&self) -> &ExtrinsicParameters {
        self.calibrator.params()
    }

    pub fn set_extrinsic_params(&mut self, params: ExtrinsicParameters) {
        self.calibrator.set_params(params);
        self.notify(GeometryEvent::Extrinsics);
    }

    pub fn set_correspondences(&mut self, points: PointCorrespondenceSet) {
        self.calibrator.set_correspondences(points);
        self.notify(GeometryEvent::Correspondences);
    }

    /// Loads a correspondence file and calibrates if it completes the point
    /// pairs. Errors are shown through `prompt` before they are returned.
    pub fn load_correspondences(
        &mut self,
        path: &Path,
        prompt: &mut dyn UserPrompt,
    ) -> Result<Option<ExtrinsicSolution>, CalibrationError> {
        if let Err(e) = self.calibrator.load_correspondences(path, prompt) {
            if !matches!(e, CalibrationError::Aborted) {
                prompt.warn("Extrinsic calibration", &e.to_string());
            }
            return Err(e);
        }
        self.notify(GeometryEvent::Correspondences);

        if self.calibrator.correspondences().is_complete() {
            self.calibrate(prompt).map(Some)
        } else {
            info!("Loaded world points only, fetch image points to calibrate");
            Ok(None)
        }
    }

    /// Takes the image points from the marked positions and calibrates.
    pub fn fetch_manual_image_points(
        &mut self,
        provider: &mut dyn MarkedPointProvider,
        prompt: &mut dyn UserPrompt,
    ) -> Result<ExtrinsicSolution, CalibrationError> {
        let result =
            self.calibrator
                .fetch_manual_image_points(provider, &self.camera, self.frame.pose_3d());
        match result {
            Ok(solution) => {
                self.notify(GeometryEvent::Correspondences);
                self.finish_calibration(solution, prompt);
                Ok(solution)
            }
            Err(e) => {
                prompt.warn("Extrinsic calibration", &e.to_string());
                Err(e)
            }
        }
    }

    /// Solves the extrinsic parameters from the stored correspondences.
    ///
    /// A rejected solve is still `Ok` with `valid == false`, the user is
    /// warned through `prompt`.
    pub fn calibrate(
        &mut self,
        prompt: &mut dyn UserPrompt,
    ) -> Result<ExtrinsicSolution, CalibrationError> {
        match self.calibrator.calibrate(&self.camera, self.frame.pose_3d()) {
            Ok(solution) => {
                self.finish_calibration(solution, prompt);
                Ok(solution)
            }
            Err(e) => {
                prompt.warn("Invalid point correspondences", &e.to_string());
                Err(e)
            }
        }
    }

    fn finish_calibration(&mut self, solution: ExtrinsicSolution, prompt: &mut dyn UserPrompt) {
        if !solution.valid {
            prompt.warn(
                "Extrinsic calibration",
                "Could not calculate extrinsic calibration. Please select other 2D/3D point \
                 correspondences for extrinsic calibration!",
            );
        }
        self.notify(GeometryEvent::Extrinsics);
    }

    /// Reprojection error of the active parameters, recomputed now.
    pub fn compute_reprojection_error(&mut self) -> Result<ReprojectionError, CalibrationError> {
        self.calibrator
            .compute_reprojection_error(&self.camera, self.frame.pose_3d(), None)
            .copied()
    }

    /// Installs statistics stored with a project instead of recomputing them.
    pub fn restore_reprojection_error(&mut self, error: ReprojectionError) {
        self.calibrator.restore_reprojection_error(error);
    }

    /// Writes the correspondences after the user confirmed the preview.
    ///
    /// Without `path` the file they were loaded from is overwritten. Returns
    /// `false` if the user declined.
    pub fn save_correspondences(
        &self,
        path: Option<&Path>,
        prompt: &mut dyn UserPrompt,
    ) -> Result<bool, CalibrationError> {
        let target = path
            .or_else(|| self.calibrator.correspondence_file())
            .ok_or_else(|| {
                CalibrationError::InvalidParams("no file to save the calibration points to".to_string())
            })?;
        let message = format!(
            "The corresponding calibration points have been changed.\n\
             Do you want to save your changes?\n\n{}",
            self.calibrator.correspondence_preview()
        );
        if !prompt.confirm("Save calibration points", &message) {
            return Ok(false);
        }
        self.calibrator.save_correspondences(target)?;
        Ok(true)
    }

    /// Projection through the active calibration and 3D frame pose.
    pub fn projection(&self) -> WorldProjection<'_> {
        self.calibrator.projection(&self.camera, self.frame.pose_3d())
    }

    pub fn image_point(&self, point: &Point3<f64>) -> Point2<f64> {
        self.projection().image_point(point)
    }

    pub fn world_point(&self, pixel: &Point2<f64>, height: f64) -> Point3<f64> {
        self.projection().world_point(pixel, height)
    }

    pub fn cam_to_world_rotation(&self, direction: &Vector3<f64>) -> Vector3<f64> {
        self.projection().cam_to_world_rotation(direction)
    }

    /// `true` for non-finite positions and positions outside the bordered
    /// image. Without a known image size only finiteness is checked.
    pub fn is_outside_image(&self, pixel: &Point2<f64>) -> bool {
        if !pixel.x.is_finite() || !pixel.y.is_finite() {
            return true;
        }
        let Some(size) = self.image_size else {
            return false;
        };
        let b = self.camera.border();
        pixel.x < -b
            || pixel.x >= size.width as f64 - b
            || pixel.y < -b
            || pixel.y >= size.height as f64 - b
    }

    /// Vector from the back-projected point to the camera centre.
    fn line_of_sight(&self, pixel: &Point2<f64>, height: f64) -> Vector3<f64> {
        let b = self.camera.border();
        let camera = -self.frame.pose_3d().position - self.extrinsic_params().translation;
        let point = self.world_point(&Point2::new(pixel.x - b, pixel.y - b), height);
        camera - point.coords
    }

    /// Angle in degrees between the line of sight and the vertical axis.
    /// 0° means straight below the camera.
    pub fn angle_to_vertical(&self, pixel: &Point2<f64>, height: f64) -> f64 {
        let a = self.line_of_sight(pixel, height);
        (a.z / a.norm()).acos().to_degrees()
    }

    /// Camera altitude implied by the planar scale and the focal length.
    pub fn measured_altitude(&self) -> f64 {
        (self.intrinsics().fx() + self.intrinsics().fy()) / 2.0 * self.cm_per_pixel()
    }

    /// Axis lengths of the drawn 3D coordinate system, shortened per axis so
    /// that each axis end stays inside the image.
    ///
    /// `None` if the origin itself is outside the image.
    pub fn visible_axis_lengths(&self) -> Option<Vector3<f64>> {
        let origin = self.image_point(&Point3::origin());
        if self.is_outside_image(&origin) {
            return None;
        }
        let full = self.frame.axis_length;
        let mut lengths = Vector3::zeros();
        for axis in 0..3 {
            let mut length = full + 1.0;
            loop {
                length -= 1.0;
                if length <= 0.0 {
                    length = 0.0;
                    break;
                }
                let mut end = Point3::origin();
                end[axis] = length;
                if !self.is_outside_image(&self.image_point(&end)) {
                    break;
                }
            }
            lengths[axis] = length;
        }
        Some(lengths)
    }

    /// Centre used for the altitude scaling of the planar mapping.
    fn planar_center(&self, size: Resolution) -> Vector2<f64> {
        if self.frame.use_intrinsic_center {
            Vector2::new(self.intrinsics().cx(), self.intrinsics().cy())
        } else {
            Vector2::new(
                size.width as f64 / 2.0 - 0.5,
                size.height as f64 / 2.0 - 0.5,
            )
        }
    }
}

impl WorldImageCorrespondence for WorldImageMapper {
    fn cm_per_pixel(&self) -> f64 {
        let Some(image_to_world) = self.frame.image_to_world(self.camera.border()) else {
            warn!("Coordinate system transform is not invertible");
            return f64::NAN;
        };
        let p1 = transform_point(&image_to_world, &Point2::new(0.0, 0.0));
        let p2 = transform_point(&image_to_world, &Point2::new(1.0, 0.0));
        self.frame.pose_2d().unit * (p2 - p1).norm() / 100.0
    }

    fn cm_per_pixel_at(&self, pixel: &Point2<f64>, height: f64) -> Vector2<f64> {
        let projection = self.projection();
        let x1 = projection.world_point(&Point2::new(pixel.x - 0.5, pixel.y), height);
        let x2 = projection.world_point(&Point2::new(pixel.x + 0.5, pixel.y), height);
        let y1 = projection.world_point(&Point2::new(pixel.x, pixel.y - 0.5), height);
        let y2 = projection.world_point(&Point2::new(pixel.x, pixel.y + 0.5), height);
        Vector2::new((x1 - x2).norm(), (y1 - y2).norm())
    }

    fn angle_to_ground(&self, pixel: &Point2<f64>, height: f64) -> f64 {
        let a = self.line_of_sight(pixel, height);
        (a.z / a.norm()).asin().to_degrees()
    }

    fn pos_image(&self, pos: &Point2<f64>, height: f64) -> Point2<f64> {
        let Some(size) = self.image_size else {
            return *pos;
        };
        match self.frame.dimension() {
            CoordDimension::ThreeD => self.image_point(&Point3::new(pos.x, pos.y, height)),
            CoordDimension::TwoD => {
                let scale = self.frame.pose_2d().unit / 100.0;
                let world = Point2::new(pos.x / scale, -pos.y / scale);
                let Some(world_to_image) = self
                    .frame
                    .image_to_world(self.camera.border())
                    .and_then(|m| m.try_inverse())
                else {
                    return *pos;
                };
                let center = self.planar_center(size);
                let altitude = self.frame.altitude;
                let image = transform_point(&world_to_image, &world);
                Point2::from((image.coords - center) * (altitude / (altitude - height)) + center)
            }
        }
    }

    fn pos_real(&self, pixel: &Point2<f64>, height: f64) -> Point2<f64> {
        let Some(size) = self.image_size else {
            return *pixel;
        };
        match self.frame.dimension() {
            CoordDimension::ThreeD => {
                let b = self.camera.border();
                let p = self.world_point(&Point2::new(pixel.x - b, pixel.y - b), height);
                Point2::new(p.x, p.y)
            }
            CoordDimension::TwoD => {
                let Some(image_to_world) = self.frame.image_to_world(self.camera.border()) else {
                    return *pixel;
                };
                let center = self.planar_center(size);
                let altitude = self.frame.altitude;
                let scaled =
                    Point2::from((pixel.coords - center) * ((altitude - height) / altitude) + center);
                let world = transform_point(&image_to_world, &scaled);
                let scale = self.frame.pose_2d().unit / 100.0;
                Point2::new(world.x * scale, -world.y * scale)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::LogPrompt;
    use crate::frame::{CoordPose2D, CoordPose3D, SwapAxis};
    use approx::assert_relative_eq;
    use std::cell::RefCell;
    use std::f64::consts::PI;
    use std::rc::Rc;

    fn overhead_params() -> ExtrinsicParameters {
        // straight down from 600 units above (50, -30)
        let r = nalgebra::Rotation3::from_euler_angles(PI, 0.0, 0.0);
        ExtrinsicParameters::new(r.scaled_axis(), -Vector3::new(50.0, -30.0, 600.0))
    }

    fn mapper() -> WorldImageMapper {
        let mut mapper = WorldImageMapper::new(
            PinholeCamera::new(IntrinsicModel::new(1000.0, 1000.0, 640.0, 360.0), 0),
            ExtrinsicSettings::default(),
        );
        mapper.set_image_size(Some(Resolution {
            width: 1280,
            height: 720,
        }));
        mapper.set_extrinsic_params(overhead_params());
        mapper
    }

    #[test]
    fn test_angle_to_ground_below_camera() {
        let mapper = mapper();
        let below = mapper.image_point(&Point3::new(50.0, -30.0, 0.0));
        assert_relative_eq!(below, Point2::new(640.0, 360.0), epsilon = 1e-9);
        assert_relative_eq!(mapper.angle_to_ground(&below, 0.0), 90.0, epsilon = 1e-6);
        assert_relative_eq!(mapper.angle_to_vertical(&below, 0.0), 0.0, epsilon = 1e-6);

        // 600 units sideways at 600 units depth is 45°
        let side = mapper.image_point(&Point3::new(650.0, -30.0, 0.0));
        assert_relative_eq!(mapper.angle_to_ground(&side, 0.0), 45.0, epsilon = 1e-6);
        assert_relative_eq!(mapper.angle_to_vertical(&side, 0.0), 45.0, epsilon = 1e-6);
    }

    #[test]
    fn test_cm_per_pixel_at_scales_with_depth() {
        let mapper = mapper();
        let center = Point2::new(640.0, 360.0);
        // depth 600 and f = 1000
        let ground = mapper.cm_per_pixel_at(&center, 0.0);
        assert_relative_eq!(ground, Vector2::new(0.6, 0.6), epsilon = 1e-9);
        let head = mapper.cm_per_pixel_at(&center, 180.0);
        assert_relative_eq!(head, Vector2::new(0.42, 0.42), epsilon = 1e-9);
    }

    #[test]
    fn test_pos_real_pos_image_3d() {
        let mut mapper = mapper();
        mapper.set_border(20);
        let world = Point2::new(120.0, 80.0);
        let pixel = mapper.pos_image(&world, 0.0);
        // pos_image gives the borderless pixel, pos_real expects bordered input
        let bordered = Point2::new(pixel.x + 20.0, pixel.y + 20.0);
        assert_relative_eq!(mapper.pos_real(&bordered, 0.0), world, epsilon = 1e-6);
    }

    #[test]
    fn test_pos_real_pos_image_3d_shifted_swapped_frame() {
        let mut mapper = mapper();
        mapper.update_frame(|frame| {
            frame.set_pose_3d(CoordPose3D {
                position: Vector3::new(35.0, -12.0, 40.0),
                swap: SwapAxis {
                    x: false,
                    y: true,
                    z: true,
                },
            })
        });
        for height in [0.0, 175.0] {
            for world in [Point2::new(120.0, 80.0), Point2::new(-60.0, 15.0)] {
                let pixel = mapper.pos_image(&world, height);
                assert_relative_eq!(mapper.pos_real(&pixel, height), world, epsilon = 1e-6);
            }
        }
        let p = Point3::new(-25.0, 50.0, 175.0);
        let back = mapper.world_point(&mapper.image_point(&p), p.z);
        assert_relative_eq!(back, p, epsilon = 1e-6);
    }

    #[test]
    fn test_pos_real_2d_mode() {
        let mut mapper = mapper();
        mapper.update_frame(|frame| {
            frame.set_dimension(CoordDimension::TwoD);
            frame.set_pose_2d(CoordPose2D {
                position: Vector2::new(6395.0, 3595.0),
                angle: 0.0,
                scale: 500.0,
                unit: 100.0,
            });
            frame.altitude = 500.0;
        });

        // the origin of the coordinate system sits on the image centre
        let origin = mapper.pos_real(&Point2::new(639.5, 359.5), 0.0);
        assert_relative_eq!(origin, Point2::origin(), epsilon = 1e-9);

        // half scale: one pixel is two units, y points up
        let p = mapper.pos_real(&Point2::new(649.5, 349.5), 0.0);
        assert_relative_eq!(p, Point2::new(20.0, 20.0), epsilon = 1e-9);

        // at 250 of 500 altitude the offset from the centre halves
        let p = mapper.pos_real(&Point2::new(649.5, 349.5), 250.0);
        assert_relative_eq!(p, Point2::new(10.0, 10.0), epsilon = 1e-9);

        for height in [0.0, 100.0, 250.0] {
            let pixel = Point2::new(812.25, 100.5);
            let world = mapper.pos_real(&pixel, height);
            assert_relative_eq!(mapper.pos_image(&world, height), pixel, epsilon = 1e-9);
        }

        assert_relative_eq!(mapper.cm_per_pixel(), 2.0, epsilon = 1e-12);
        assert_relative_eq!(mapper.measured_altitude(), 2000.0, epsilon = 1e-9);
    }

    #[test]
    fn test_without_image_size_positions_pass_through() {
        let mut mapper = mapper();
        mapper.set_image_size(None);
        let p = Point2::new(12.0, 34.0);
        assert_eq!(mapper.pos_real(&p, 0.0), p);
        assert_eq!(mapper.pos_image(&p, 0.0), p);
    }

    #[test]
    fn test_is_outside_image() {
        let mut mapper = mapper();
        mapper.set_border(10);
        assert!(!mapper.is_outside_image(&Point2::new(-10.0, -10.0)));
        assert!(mapper.is_outside_image(&Point2::new(-10.5, 0.0)));
        assert!(mapper.is_outside_image(&Point2::new(1270.0, 0.0)));
        assert!(!mapper.is_outside_image(&Point2::new(1269.9, 709.9)));
        assert!(mapper.is_outside_image(&Point2::new(0.0, 710.0)));
        assert!(mapper.is_outside_image(&Point2::new(f64::NAN, 0.0)));
    }

    #[test]
    fn test_visible_axis_lengths() {
        let mut mapper = mapper();
        // the origin projects to (556.7, 310)
        mapper.update_frame(|frame| frame.axis_length = 199.5);
        let lengths = mapper.visible_axis_lengths().unwrap();
        assert_eq!(lengths.x, 199.5);
        // v = 360 - (y + 30) * 1000 / 600 leaves the image above y = 186
        assert_eq!(lengths.y, 185.5);
        assert_eq!(lengths.z, 199.5);

        mapper.update_frame(|frame| frame.axis_length = 999.5);
        let lengths = mapper.visible_axis_lengths().unwrap();
        // u = 640 + (x - 50) * 1000 / 600 leaves the image above x = 434
        assert_eq!(lengths.x, 433.5);
        assert_eq!(lengths.y, 185.5);

        mapper.set_extrinsic_params(ExtrinsicParameters::new(
            overhead_params().rotation,
            -Vector3::new(5000.0, 0.0, 600.0),
        ));
        assert!(mapper.visible_axis_lengths().is_none());
    }

    #[test]
    fn test_geometry_events() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut mapper = WorldImageMapper::default();
        let sink = Rc::clone(&events);
        mapper.on_geometry_changed(move |event| sink.borrow_mut().push(event));

        mapper.set_intrinsics(IntrinsicModel::new(900.0, 900.0, 640.0, 360.0));
        mapper.update_frame(|frame| frame.altitude = 400.0);
        mapper.set_extrinsic_params(overhead_params());
        mapper.set_correspondences(PointCorrespondenceSet::default());

        assert_eq!(
            *events.borrow(),
            vec![
                GeometryEvent::Intrinsics,
                GeometryEvent::CoordinatePose,
                GeometryEvent::Extrinsics,
                GeometryEvent::Correspondences,
            ]
        );
    }

    #[test]
    fn test_load_calibrate_and_save() {
        let mapper_truth = mapper();
        let world = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(300.0, 0.0, 0.0),
            Point3::new(300.0, 200.0, 0.0),
            Point3::new(0.0, 200.0, 0.0),
            Point3::new(-100.0, -150.0, 0.0),
        ];
        let content: String = world
            .iter()
            .map(|p| {
                let px = mapper_truth.image_point(p);
                format!("{} {} {} {} {}\n", p.x, p.y, p.z, px.x, px.y)
            })
            .collect();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ground.3dc");
        std::fs::write(&path, content).unwrap();

        let mut mapper = WorldImageMapper::default();
        mapper.set_intrinsics(mapper_truth.intrinsics().clone());
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        mapper.on_geometry_changed(move |event| sink.borrow_mut().push(event));

        let solution = mapper
            .load_correspondences(&path, &mut LogPrompt::default())
            .unwrap()
            .unwrap();
        assert!(solution.valid);
        assert_relative_eq!(
            mapper.extrinsic_params().translation,
            overhead_params().translation,
            epsilon = 1e-3
        );
        assert!(mapper.compute_reprojection_error().unwrap().is_valid());
        assert_eq!(
            *events.borrow(),
            vec![GeometryEvent::Correspondences, GeometryEvent::Extrinsics]
        );

        let saved = dir.path().join("copy.3dc");
        assert!(!mapper
            .save_correspondences(Some(&saved), &mut LogPrompt { answer: false })
            .unwrap());
        assert!(!saved.exists());
        assert!(mapper
            .save_correspondences(Some(&saved), &mut LogPrompt::default())
            .unwrap());
        assert!(saved.exists());
    }

    #[test]
    fn test_load_error_is_reported() {
        struct Recorder(Vec<String>);
        impl UserPrompt for Recorder {
            fn confirm(&mut self, _title: &str, _message: &str) -> bool {
                true
            }
            fn warn(&mut self, _title: &str, message: &str) {
                self.0.push(message.to_string());
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("few.txt");
        std::fs::write(&path, "0 0 0\n1 0 0\n").unwrap();
        let mut prompt = Recorder(Vec::new());
        let mut mapper = WorldImageMapper::default();
        assert!(mapper.load_correspondences(&path, &mut prompt).is_err());
        assert_eq!(prompt.0.len(), 1);
        assert!(prompt.0[0].contains("Not enough points"));
    }
}
