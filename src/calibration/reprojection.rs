//! Reprojection error statistics of an extrinsic calibration.
//!
//! Three error measures are collected per correspondence:
//!
//! * point height (PH): back-project the pixel at the true height of the
//!   world point and compare the ground-plane position, in world units.
//! * default height (DH): back-project both the pixel and the reprojected
//!   world point at a fixed default height and compare them. This measures the
//!   error made when tracking at an assumed constant height.
//! * pixel (PX): distance between the reprojected world point and the pixel.

use crate::calibration::WorldProjection;
use crate::calibration::correspondence::PointCorrespondenceSet;
use log::info;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Average, spread and maximum of one error measure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorStatistics {
    pub average: f64,
    pub std_dev: f64,
    /// Population variance.
    pub variance: f64,
    pub max: f64,
}

impl Default for ErrorStatistics {
    fn default() -> Self {
        ErrorStatistics {
            average: -1.0,
            std_dev: -1.0,
            variance: -1.0,
            max: -1.0,
        }
    }
}

impl ErrorStatistics {
    /// Statistics of a list of errors. Empty input gives the invalid default.
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return ErrorStatistics::default();
        }
        let n = samples.len() as f64;
        let average = samples.iter().sum::<f64>() / n;
        let variance = samples.iter().map(|v| (v - average).powi(2)).sum::<f64>() / n;
        let max = samples.iter().copied().fold(-1.0, f64::max);
        ErrorStatistics {
            average,
            std_dev: variance.sqrt(),
            variance,
            max,
        }
    }

    fn values(&self) -> [f64; 4] {
        [self.average, self.std_dev, self.variance, self.max]
    }

    /// Rebuilds the variance from a persisted standard deviation.
    fn from_persisted(average: f64, std_dev: f64, max: f64) -> Self {
        ErrorStatistics {
            average,
            std_dev,
            variance: if std_dev < 0.0 { -1.0 } else { std_dev * std_dev },
            max,
        }
    }
}

/// Reprojection error of the active extrinsic calibration.
///
/// Valid only if all twelve statistics and the used default height are finite
/// and non-negative. The default value is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "ReprojectionRecord", into = "ReprojectionRecord")]
pub struct ReprojectionError {
    point_height: ErrorStatistics,
    default_height: ErrorStatistics,
    pixel: ErrorStatistics,
    used_height: f64,
    valid: bool,
}

impl Default for ReprojectionError {
    fn default() -> Self {
        ReprojectionError {
            point_height: ErrorStatistics::default(),
            default_height: ErrorStatistics::default(),
            pixel: ErrorStatistics::default(),
            used_height: -1.0,
            valid: false,
        }
    }
}

impl ReprojectionError {
    pub fn new(
        point_height: ErrorStatistics,
        default_height: ErrorStatistics,
        pixel: ErrorStatistics,
        used_height: f64,
    ) -> Self {
        let mut error = ReprojectionError {
            point_height,
            default_height,
            pixel,
            used_height,
            valid: false,
        };
        error.valid = error
            .values()
            .iter()
            .all(|v| v.is_finite() && *v >= 0.0);
        error
    }

    /// Evaluates all correspondences of `points` under `projection`.
    ///
    /// Returns the invalid default if the set is not complete.
    pub fn evaluate(
        projection: &WorldProjection<'_>,
        points: &PointCorrespondenceSet,
        default_height: f64,
    ) -> Self {
        if !points.is_complete() {
            return ReprojectionError::default();
        }

        let shift = projection.frame().position;
        let mut ph = Vec::with_capacity(points.len());
        let mut dh = Vec::with_capacity(points.len());
        let mut px = Vec::with_capacity(points.len());

        for (p3, p2) in points.pairs() {
            let p3 = *p3 - shift;
            let reprojected = projection.image_point(&p3);

            let back = projection.world_point(p2, p3.z);
            ph.push(planar_distance(back.x - p3.x, back.y - p3.y));

            let pixel_at_default = projection.world_point(p2, default_height);
            let reprojected_at_default = projection.world_point(&reprojected, default_height);
            dh.push(planar_distance(
                reprojected_at_default.x - pixel_at_default.x,
                reprojected_at_default.y - pixel_at_default.y,
            ));

            px.push(pixel_distance(&reprojected, p2));
        }

        let error = ReprojectionError::new(
            ErrorStatistics::from_samples(&ph),
            ErrorStatistics::from_samples(&dh),
            ErrorStatistics::from_samples(&px),
            default_height,
        );
        info!(
            "Reprojection error (pointHeight) average: {:.4}cm (standard deviation: {:.4}, variance: {:.4}, max error: {:.4}cm)",
            error.point_height.average,
            error.point_height.std_dev,
            error.point_height.variance,
            error.point_height.max
        );
        info!(
            "Reprojection error (defaultHeight={}) average: {:.4}cm (standard deviation: {:.4}, variance: {:.4}, max error: {:.4}cm)",
            default_height,
            error.default_height.average,
            error.default_height.std_dev,
            error.default_height.variance,
            error.default_height.max
        );
        info!(
            "Reprojection error (pixel) average: {:.4}px (standard deviation: {:.4}, variance: {:.4}, max error: {:.4}px)",
            error.pixel.average, error.pixel.std_dev, error.pixel.variance, error.pixel.max
        );
        error
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn point_height(&self) -> &ErrorStatistics {
        &self.point_height
    }

    pub fn default_height(&self) -> &ErrorStatistics {
        &self.default_height
    }

    pub fn pixel(&self) -> &ErrorStatistics {
        &self.pixel
    }

    pub fn used_height(&self) -> f64 {
        self.used_height
    }

    /// All 13 stored values: PH, DH and PX statistics (average, sd, variance,
    /// max each), then the used default height.
    pub fn values(&self) -> [f64; 13] {
        let mut out = [0.0; 13];
        out[..4].copy_from_slice(&self.point_height.values());
        out[4..8].copy_from_slice(&self.default_height.values());
        out[8..12].copy_from_slice(&self.pixel.values());
        out[12] = self.used_height;
        out
    }

    /// Multi-line human-readable report.
    pub fn summary(&self) -> String {
        if !self.valid {
            return "Reprojection error: not available".to_string();
        }
        self.to_string()
    }
}

impl fmt::Display for ReprojectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let default_name = format!("Default height ({} cm)", self.used_height);
        let rows = [
            ("Point height", &self.point_height, "cm"),
            (default_name.as_str(), &self.default_height, "cm"),
            ("Pixel", &self.pixel, "px"),
        ];
        writeln!(f, "Reprojection error:")?;
        for (name, stats, unit) in rows {
            writeln!(
                f,
                "  {name}: average {:.3}{unit}, sd {:.3}, variance {:.3}, max {:.3}{unit}",
                stats.average, stats.std_dev, stats.variance, stats.max
            )?;
        }
        Ok(())
    }
}

fn planar_distance(dx: f64, dy: f64) -> f64 {
    (dx * dx + dy * dy).sqrt()
}

fn pixel_distance(a: &Point2<f64>, b: &Point2<f64>) -> f64 {
    (a - b).norm()
}

/// Attributes of the `REPROJECTION_ERROR` element. Variances are not stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
struct ReprojectionRecord {
    #[serde(rename = "AVG_PH")]
    avg_ph: f64,
    #[serde(rename = "SD_PH")]
    sd_ph: f64,
    #[serde(rename = "MAX_PH")]
    max_ph: f64,
    #[serde(rename = "AVG_DH")]
    avg_dh: f64,
    #[serde(rename = "SD_DH")]
    sd_dh: f64,
    #[serde(rename = "MAX_DH")]
    max_dh: f64,
    #[serde(rename = "AVG_PX")]
    avg_px: f64,
    #[serde(rename = "SD_PX")]
    sd_px: f64,
    #[serde(rename = "MAX_PX")]
    max_px: f64,
    #[serde(rename = "USED_HEIGHT")]
    used_height: f64,
}

impl Default for ReprojectionRecord {
    fn default() -> Self {
        ReprojectionError::default().into()
    }
}

impl From<ReprojectionError> for ReprojectionRecord {
    fn from(e: ReprojectionError) -> Self {
        ReprojectionRecord {
            avg_ph: e.point_height.average,
            sd_ph: e.point_height.std_dev,
            max_ph: e.point_height.max,
            avg_dh: e.default_height.average,
            sd_dh: e.default_height.std_dev,
            max_dh: e.default_height.max,
            avg_px: e.pixel.average,
            sd_px: e.pixel.std_dev,
            max_px: e.pixel.max,
            used_height: e.used_height,
        }
    }
}

impl From<ReprojectionRecord> for ReprojectionError {
    fn from(r: ReprojectionRecord) -> Self {
        ReprojectionError::new(
            ErrorStatistics::from_persisted(r.avg_ph, r.sd_ph, r.max_ph),
            ErrorStatistics::from_persisted(r.avg_dh, r.sd_dh, r.max_dh),
            ErrorStatistics::from_persisted(r.avg_px, r.sd_px, r.max_px),
            r.used_height,
        )
    }
}
