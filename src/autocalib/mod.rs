//! Selection of diverse chessboard views for intrinsic calibration.
//!
//! A video is sampled every `frame_step` frames. Whenever a chessboard is
//! detected, the view is described by a [`Sample`]: its normalized inner area,
//! its skew and the grid cells its corners fall into. A sample is kept when it
//! differs enough from every sample kept so far, or when it covers enough of
//! the image that no previous sample reached. Kept frames are written out for
//! an external intrinsic solver.

pub mod subpix;

pub use subpix::{refine_corner, refine_corners, SubPixSettings};

use crate::camera::{CalibrationError, Resolution};
use crate::util::{ensure_dir, load_image, rgb_to_grayscale};
use image::{GrayImage, RgbImage};
use log::{debug, info, warn};
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingSettings {
    /// Inner corners per row and per column.
    pub board_size: (u32, u32),
    pub frame_step: usize,
    /// Cells per image axis of the coverage grid.
    pub grid_size: usize,
    /// Minimum `|Δarea| + |Δskew|` to every kept sample.
    pub diversity_threshold: f64,
    /// Minimum fraction of still uncovered cells a sample has to cover.
    pub coverage_threshold: f64,
    pub subpix: SubPixSettings,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        SamplingSettings {
            board_size: (6, 8),
            frame_step: 10,
            grid_size: 10,
            diversity_threshold: 0.1,
            coverage_threshold: 0.1,
            subpix: SubPixSettings::default(),
        }
    }
}

impl SamplingSettings {
    pub fn validate(&self) -> Result<(), CalibrationError> {
        if self.frame_step == 0 {
            return Err(CalibrationError::InvalidParams(
                "frame_step must be at least 1".to_string(),
            ));
        }
        if self.grid_size == 0 {
            return Err(CalibrationError::InvalidParams(
                "grid_size must be at least 1".to_string(),
            ));
        }
        if self.board_size.0 < 2 || self.board_size.1 < 2 {
            return Err(CalibrationError::InvalidParams(format!(
                "board_size must be at least 2x2, got {}x{}",
                self.board_size.0, self.board_size.1
            )));
        }
        Ok(())
    }
}

/// Provides the frames of a recording.
pub trait FrameSource {
    fn frame_count(&self) -> usize;

    /// Frame at `index`, or `None` once the recording ends early.
    fn frame(&mut self, index: usize) -> Result<Option<RgbImage>, CalibrationError>;
}

impl FrameSource for Vec<RgbImage> {
    fn frame_count(&self) -> usize {
        self.len()
    }

    fn frame(&mut self, index: usize) -> Result<Option<RgbImage>, CalibrationError> {
        Ok(self.get(index).cloned())
    }
}

/// Frames stored as individual image files, in order.
#[derive(Debug, Clone, Default)]
pub struct ImageSequence {
    paths: Vec<PathBuf>,
}

impl ImageSequence {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        ImageSequence { paths }
    }

    /// All `png`, `jpg` and `jpeg` files of `dir`, sorted by name.
    pub fn from_dir(dir: &Path) -> Result<Self, CalibrationError> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
                .unwrap_or(false);
            if is_image {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(ImageSequence { paths })
    }
}

impl FrameSource for ImageSequence {
    fn frame_count(&self) -> usize {
        self.paths.len()
    }

    fn frame(&mut self, index: usize) -> Result<Option<RgbImage>, CalibrationError> {
        match self.paths.get(index) {
            Some(path) => load_image(path).map(Some),
            None => Ok(None),
        }
    }
}

/// Finds the inner corners of a chessboard, row by row.
pub trait ChessboardDetector {
    /// Returns `board_size.0 * board_size.1` corners, or `None` when no board
    /// is visible.
    fn detect(&self, image: &GrayImage, board_size: (u32, u32)) -> Option<Vec<Point2<f64>>>;
}

/// Receives the frames of accepted samples.
pub trait SampleSink {
    /// `number` counts accepted samples starting at 1.
    fn write(&mut self, number: usize, frame: &RgbImage) -> Result<PathBuf, CalibrationError>;
}

/// Writes accepted frames as `{dir}/{number}.png`.
#[derive(Debug, Clone)]
pub struct PngSampleWriter {
    dir: PathBuf,
}

impl PngSampleWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CalibrationError> {
        let dir = dir.into();
        ensure_dir(&dir)?;
        Ok(PngSampleWriter { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SampleSink for PngSampleWriter {
    fn write(&mut self, number: usize, frame: &RgbImage) -> Result<PathBuf, CalibrationError> {
        let path = self.dir.join(format!("{number}.png"));
        frame.save(&path)?;
        Ok(path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanProgress {
    pub step: usize,
    pub total_steps: usize,
    pub accepted: usize,
}

/// Checkpoint called once per visited frame. Returning `Break` stops the scan.
pub trait ScanObserver {
    fn progress(&mut self, progress: &ScanProgress) -> ControlFlow<()>;
}

impl<F> ScanObserver for F
where
    F: FnMut(&ScanProgress) -> ControlFlow<()>,
{
    fn progress(&mut self, progress: &ScanProgress) -> ControlFlow<()> {
        self(progress)
    }
}

/// Description of one detected chessboard view.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub corners: Vec<Point2<f64>>,
    /// Board area divided by image area.
    pub area: f64,
    /// Deviation from a right angle at the upper right corner, in radians.
    pub skew: f64,
    /// Row-major `grid_size x grid_size` cell occupancy.
    pub coverage: Vec<bool>,
}

impl Sample {
    /// Returns `None` when the corner count does not match the board.
    pub fn evaluate(
        corners: Vec<Point2<f64>>,
        board_size: (u32, u32),
        image_size: Resolution,
        grid_size: usize,
    ) -> Option<Self> {
        let expected = board_size.0 as usize * board_size.1 as usize;
        if corners.len() != expected || expected == 0 {
            debug!(
                "Ignoring detection with {} corners, expected {}",
                corners.len(),
                expected
            );
            return None;
        }
        let outer = outer_corners(&corners, board_size.0 as usize)?;
        let image_area = image_size.width as f64 * image_size.height as f64;
        if image_area <= 0.0 {
            return None;
        }
        Some(Sample {
            area: inner_area(&outer) / image_area,
            skew: skew(&outer),
            coverage: coverage(&corners, image_size, grid_size),
            corners,
        })
    }

    pub fn difference(&self, other: &Sample) -> f64 {
        (self.area - other.area).abs() + (self.skew - other.skew).abs()
    }
}

/// Upper left, upper right, lower right and lower left corner of the board.
pub fn outer_corners(corners: &[Point2<f64>], board_width: usize) -> Option<[Point2<f64>; 4]> {
    if board_width == 0 || corners.len() < board_width {
        return None;
    }
    let last = corners.len() - 1;
    Some([
        corners[0],
        corners[board_width - 1],
        corners[last],
        corners[corners.len() - board_width],
    ])
}

/// Area of the quadrilateral, half the cross product of its diagonals.
pub fn inner_area(outer: &[Point2<f64>; 4]) -> f64 {
    let a: Vector2<f64> = outer[1] - outer[0];
    let b: Vector2<f64> = outer[2] - outer[1];
    let c: Vector2<f64> = outer[3] - outer[2];
    let p = b + c;
    let q = a + b;
    (p.x * q.y - p.y * q.x).abs() / 2.0
}

pub fn skew(outer: &[Point2<f64>; 4]) -> f64 {
    let ab = outer[0] - outer[1];
    let cb = outer[2] - outer[1];
    let norms = ab.norm() * cb.norm();
    if norms == 0.0 {
        return FRAC_PI_2;
    }
    let cos = (ab.dot(&cb) / norms).clamp(-1.0, 1.0);
    (FRAC_PI_2 - cos.acos()).abs()
}

/// Marks every grid cell holding at least one corner. Corners outside the
/// image count for the nearest border cell.
pub fn coverage(corners: &[Point2<f64>], image_size: Resolution, grid_size: usize) -> Vec<bool> {
    let mut covered = vec![false; grid_size * grid_size];
    if grid_size == 0 {
        return covered;
    }
    let cell_width = (image_size.width as usize / grid_size).max(1) as f64;
    let cell_height = (image_size.height as usize / grid_size).max(1) as f64;
    let last = (grid_size - 1) as f64;

    for corner in corners {
        if !corner.x.is_finite() || !corner.y.is_finite() {
            continue;
        }
        let col = (corner.x / cell_width).floor().clamp(0.0, last) as usize;
        let row = (corner.y / cell_height).floor().clamp(0.0, last) as usize;
        covered[row * grid_size + col] = true;
    }
    covered
}

/// Accumulates accepted samples and their merged coverage.
#[derive(Debug, Clone)]
pub struct SampleSelector {
    settings: SamplingSettings,
    samples: Vec<Sample>,
    coverage: Vec<bool>,
}

/// Outcome of [`SampleSelector::scan`].
#[derive(Debug, Clone)]
pub struct SampleScan {
    pub samples: Vec<Sample>,
    pub written: Vec<PathBuf>,
    pub coverage: Vec<bool>,
    pub cancelled: bool,
}

impl SampleSelector {
    pub fn new(settings: SamplingSettings) -> Result<Self, CalibrationError> {
        settings.validate()?;
        let cells = settings.grid_size * settings.grid_size;
        Ok(SampleSelector {
            settings,
            samples: Vec::new(),
            coverage: vec![false; cells],
        })
    }

    pub fn settings(&self) -> &SamplingSettings {
        &self.settings
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn coverage(&self) -> &[bool] {
        &self.coverage
    }

    pub fn covered_cells(&self) -> usize {
        self.coverage.iter().filter(|&&c| c).count()
    }

    /// Fraction of the still uncovered cells `sample` would cover; zero once
    /// the grid is full.
    pub fn new_coverage(&self, sample: &Sample) -> f64 {
        let not_covered = self.coverage.len() - self.covered_cells();
        if not_covered == 0 {
            return 0.0;
        }
        let newly = self
            .coverage
            .iter()
            .zip(&sample.coverage)
            .filter(|(&total, &cell)| cell && !total)
            .count();
        newly as f64 / not_covered as f64
    }

    pub fn is_good_sample(&self, sample: &Sample) -> bool {
        if self.samples.is_empty() {
            return true;
        }
        let min_difference = self
            .samples
            .iter()
            .map(|good| good.difference(sample))
            .fold(f64::MAX, f64::min);
        min_difference > self.settings.diversity_threshold
            || self.new_coverage(sample) > self.settings.coverage_threshold
    }

    pub fn accept(&mut self, sample: Sample) {
        for (total, &cell) in self.coverage.iter_mut().zip(&sample.coverage) {
            *total |= cell;
        }
        self.samples.push(sample);
    }

    /// Evaluates one frame and keeps it when it is good, returning the
    /// refined sample.
    pub fn consider(
        &mut self,
        frame: &RgbImage,
        detector: &dyn ChessboardDetector,
    ) -> Option<&Sample> {
        let gray = rgb_to_grayscale(frame);
        let (width, height) = frame.dimensions();
        let corners = detector.detect(&gray, self.settings.board_size)?;
        let mut sample = Sample::evaluate(
            corners,
            self.settings.board_size,
            Resolution { width, height },
            self.settings.grid_size,
        )?;
        if !self.is_good_sample(&sample) {
            return None;
        }
        refine_corners(&gray, &mut sample.corners, &self.settings.subpix);
        self.accept(sample);
        self.samples.last()
    }

    /// Walks `source` every `frame_step` frames and writes every accepted
    /// frame to `sink`. Samples accepted before a cancellation are kept.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::NoSamplesFound`] when no frame was accepted.
    /// * Errors of the frame source or the sink.
    pub fn scan(
        mut self,
        source: &mut dyn FrameSource,
        detector: &dyn ChessboardDetector,
        sink: &mut dyn SampleSink,
        observer: &mut dyn ScanObserver,
    ) -> Result<SampleScan, CalibrationError> {
        let frame_count = source.frame_count();
        let step = self.settings.frame_step;
        let total_steps = frame_count / step;
        let mut written = Vec::new();
        let mut cancelled = false;

        info!(
            "Searching {} frames for chessboard samples (step {})",
            frame_count, step
        );
        for (n, index) in (0..frame_count).step_by(step).enumerate() {
            let progress = ScanProgress {
                step: n,
                total_steps,
                accepted: self.samples.len(),
            };
            if observer.progress(&progress).is_break() {
                info!("Sample search cancelled at frame {index}");
                cancelled = true;
                break;
            }

            let Some(frame) = source.frame(index)? else {
                warn!("Frame {index} could not be read, stopping search");
                break;
            };
            if self.consider(&frame, detector).is_some() {
                let path = sink.write(self.samples.len(), &frame)?;
                debug!("Accepted frame {} as {}", index, path.display());
                written.push(path);
            }
        }

        if self.samples.is_empty() {
            return Err(CalibrationError::NoSamplesFound);
        }
        info!(
            "Found {} samples covering {} of {} grid cells",
            self.samples.len(),
            self.covered_cells(),
            self.coverage.len()
        );
        Ok(SampleScan {
            samples: self.samples,
            written,
            coverage: self.coverage,
            cancelled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Rgb;
    use std::collections::HashMap;

    const BOARD: (u32, u32) = (6, 8);

    fn board(x0: f64, y0: f64, spacing: f64) -> Vec<Point2<f64>> {
        let mut corners = Vec::new();
        for row in 0..BOARD.1 {
            for col in 0..BOARD.0 {
                corners.push(Point2::new(x0 + col as f64 * spacing, y0 + row as f64 * spacing));
            }
        }
        corners
    }

    fn vga() -> Resolution {
        Resolution {
            width: 640,
            height: 480,
        }
    }

    /// Looks up corners by the gray value of the top left pixel.
    struct KeyedDetector(HashMap<u8, Vec<Point2<f64>>>);

    impl ChessboardDetector for KeyedDetector {
        fn detect(&self, image: &GrayImage, _board_size: (u32, u32)) -> Option<Vec<Point2<f64>>> {
            self.0.get(&image.get_pixel(0, 0)[0]).cloned()
        }
    }

    fn frames(keys: &[(usize, u8)], count: usize) -> Vec<RgbImage> {
        let mut frames = vec![RgbImage::new(160, 120); count];
        for &(index, key) in keys {
            frames[index] = RgbImage::from_pixel(160, 120, Rgb([key, key, key]));
        }
        frames
    }

    #[test]
    fn test_outer_corners_order() {
        let corners = board(10.0, 20.0, 5.0);
        let outer = outer_corners(&corners, 6).unwrap();
        assert_eq!(outer[0], Point2::new(10.0, 20.0));
        assert_eq!(outer[1], Point2::new(35.0, 20.0));
        assert_eq!(outer[2], Point2::new(35.0, 55.0));
        assert_eq!(outer[3], Point2::new(10.0, 55.0));
        assert!(outer_corners(&corners[..3], 6).is_none());
    }

    #[test]
    fn test_area_and_skew_of_rectangle() {
        let outer = outer_corners(&board(0.0, 0.0, 20.0), 6).unwrap();
        assert_relative_eq!(inner_area(&outer), 100.0 * 140.0, epsilon = 1e-9);
        assert_relative_eq!(skew(&outer), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_skew_of_sheared_board() {
        let outer = [
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(20.0, 10.0),
            Point2::new(10.0, 10.0),
        ];
        assert_relative_eq!(skew(&outer), std::f64::consts::FRAC_PI_4, epsilon = 1e-12);
        assert_relative_eq!(inner_area(&outer), 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_coverage_cells() {
        let covered = coverage(&board(10.0, 10.0, 20.0), vga(), 10);
        assert_eq!(covered.len(), 100);
        assert_eq!(covered.iter().filter(|&&c| c).count(), 8);
        assert!(covered[0]);
        assert!(covered[3 * 10 + 1]);
        assert!(!covered[2]);
    }

    #[test]
    fn test_coverage_clamps_outside_points() {
        let corners = [Point2::new(-5.0, -5.0), Point2::new(700.0, 500.0)];
        let covered = coverage(&corners, vga(), 10);
        assert!(covered[0]);
        assert!(covered[99]);
        assert_eq!(covered.iter().filter(|&&c| c).count(), 2);
    }

    #[test]
    fn test_evaluate_rejects_wrong_corner_count() {
        let mut corners = board(10.0, 10.0, 20.0);
        corners.pop();
        assert!(Sample::evaluate(corners, BOARD, vga(), 10).is_none());
    }

    #[test]
    fn test_first_sample_accepted_identical_rejected() {
        let mut selector = SampleSelector::new(SamplingSettings::default()).unwrap();
        let sample = Sample::evaluate(board(10.0, 10.0, 40.0), BOARD, vga(), 10).unwrap();
        assert!(selector.is_good_sample(&sample));
        selector.accept(sample.clone());
        assert!(!selector.is_good_sample(&sample));
    }

    #[test]
    fn test_new_coverage_accepted() {
        let mut selector = SampleSelector::new(SamplingSettings::default()).unwrap();
        let left = Sample::evaluate(board(10.0, 10.0, 40.0), BOARD, vga(), 10).unwrap();
        let right = Sample::evaluate(board(400.0, 10.0, 40.0), BOARD, vga(), 10).unwrap();
        assert_relative_eq!(left.difference(&right), 0.0, epsilon = 1e-12);

        selector.accept(left);
        assert_eq!(selector.covered_cells(), 28);
        assert_relative_eq!(selector.new_coverage(&right), 28.0 / 72.0, epsilon = 1e-12);
        assert!(selector.is_good_sample(&right));
        selector.accept(right);
        assert_eq!(selector.covered_cells(), 56);
    }

    #[test]
    fn test_small_coverage_gain_rejected() {
        let mut selector = SampleSelector::new(SamplingSettings::default()).unwrap();
        selector.accept(Sample::evaluate(board(10.0, 10.0, 20.0), BOARD, vga(), 10).unwrap());
        let shifted = Sample::evaluate(board(400.0, 300.0, 20.0), BOARD, vga(), 10).unwrap();
        assert!(selector.new_coverage(&shifted) < 0.1);
        assert!(!selector.is_good_sample(&shifted));
    }

    #[test]
    fn test_full_grid_has_no_new_coverage() {
        let settings = SamplingSettings {
            grid_size: 1,
            ..SamplingSettings::default()
        };
        let mut selector = SampleSelector::new(settings).unwrap();
        let res = Resolution {
            width: 100,
            height: 100,
        };
        selector.accept(Sample::evaluate(board(10.0, 10.0, 5.0), BOARD, res, 1).unwrap());
        let again = Sample::evaluate(board(10.0, 10.0, 5.0), BOARD, res, 1).unwrap();
        assert_eq!(selector.new_coverage(&again), 0.0);
        assert!(!selector.is_good_sample(&again));
    }

    #[test]
    fn test_scan_writes_accepted_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = PngSampleWriter::new(dir.path().join("samples")).unwrap();
        let detector = KeyedDetector(HashMap::from([
            (1, board(5.0, 5.0, 10.0)),
            (2, board(5.0, 5.0, 10.0)),
            (3, board(100.0, 5.0, 10.0)),
        ]));
        let mut source = frames(&[(0, 1), (10, 2), (20, 3), (5, 3)], 25);
        let mut visited = Vec::new();
        let mut observer = |p: &ScanProgress| {
            visited.push(p.step);
            ControlFlow::Continue(())
        };

        let scan = SampleSelector::new(SamplingSettings::default())
            .unwrap()
            .scan(&mut source, &detector, &mut sink, &mut observer)
            .unwrap();

        assert_eq!(visited, vec![0, 1, 2]);
        assert!(!scan.cancelled);
        assert_eq!(scan.samples.len(), 2);
        assert_eq!(scan.written.len(), 2);
        assert!(scan.written[0].ends_with("1.png"));
        assert!(scan.written[1].ends_with("2.png"));
        assert!(scan.written.iter().all(|p| p.exists()));
        assert_eq!(scan.coverage.iter().filter(|&&c| c).count(), 56);
    }

    #[test]
    fn test_cancel_keeps_accepted_samples() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = PngSampleWriter::new(dir.path()).unwrap();
        let detector = KeyedDetector(HashMap::from([
            (1, board(5.0, 5.0, 10.0)),
            (3, board(100.0, 5.0, 10.0)),
        ]));
        let mut source = frames(&[(0, 1), (10, 3)], 30);
        let mut observer = |p: &ScanProgress| {
            if p.step >= 1 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        };

        let scan = SampleSelector::new(SamplingSettings::default())
            .unwrap()
            .scan(&mut source, &detector, &mut sink, &mut observer)
            .unwrap();
        assert!(scan.cancelled);
        assert_eq!(scan.samples.len(), 1);
        assert_eq!(scan.written.len(), 1);
    }

    #[test]
    fn test_scan_without_detections_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = PngSampleWriter::new(dir.path()).unwrap();
        let detector = KeyedDetector(HashMap::new());
        let mut source = frames(&[], 12);
        let mut observer = |_: &ScanProgress| ControlFlow::Continue(());
        let result = SampleSelector::new(SamplingSettings::default())
            .unwrap()
            .scan(&mut source, &detector, &mut sink, &mut observer);
        assert!(matches!(result, Err(CalibrationError::NoSamplesFound)));
    }

    #[test]
    fn test_invalid_settings() {
        let settings = SamplingSettings {
            grid_size: 0,
            ..SamplingSettings::default()
        };
        assert!(matches!(
            SampleSelector::new(settings),
            Err(CalibrationError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_image_sequence_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::new(4, 4).save(dir.path().join("b.png")).unwrap();
        RgbImage::new(4, 4).save(dir.path().join("a.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let mut sequence = ImageSequence::from_dir(dir.path()).unwrap();
        assert_eq!(sequence.frame_count(), 2);
        assert_eq!(sequence.frame(1).unwrap().unwrap().dimensions(), (4, 4));
        assert!(sequence.frame(2).unwrap().is_none());
    }
}
