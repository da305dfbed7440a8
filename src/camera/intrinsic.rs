//! Intrinsic camera model storage.
//!
//! The [`IntrinsicModel`] is the result of an (external) intrinsic calibration:
//! a pinhole camera matrix with zero skew, the fourteen distortion coefficients
//! of the rational/thin-prism/tilted lens model, and the reprojection error the
//! calibration reported. The model is pure data; the only check it performs is
//! the non-fatal plausibility test in [`IntrinsicModel::check_plausibility`].

use crate::camera::CalibrationError;
use log::warn;
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use std::{fmt, fs, io::Write};
use yaml_rust::YamlLoader;

/// Number of distortion coefficients stored by [`IntrinsicModel`].
pub const DISTORTION_COUNT: usize = 14;

/// Named distortion coefficients. The discriminant is the index in the
/// coefficient vector, which follows the OpenCV ordering
/// `r2, r4, tx, ty, r6, k4, k5, k6, s1, s2, s3, s4, taux, tauy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Distortion {
    R2 = 0,
    R4 = 1,
    Tx = 2,
    Ty = 3,
    R6 = 4,
    K4 = 5,
    K5 = 6,
    K6 = 7,
    S1 = 8,
    S2 = 9,
    S3 = 10,
    S4 = 11,
    TauX = 12,
    TauY = 13,
}

impl Distortion {
    pub const ALL: [Distortion; DISTORTION_COUNT] = [
        Distortion::R2,
        Distortion::R4,
        Distortion::Tx,
        Distortion::Ty,
        Distortion::R6,
        Distortion::K4,
        Distortion::K5,
        Distortion::K6,
        Distortion::S1,
        Distortion::S2,
        Distortion::S3,
        Distortion::S4,
        Distortion::TauX,
        Distortion::TauY,
    ];

    /// Position inside the coefficient vector.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Distortion::R2 => "r2",
            Distortion::R4 => "r4",
            Distortion::Tx => "tx",
            Distortion::Ty => "ty",
            Distortion::R6 => "r6",
            Distortion::K4 => "k4",
            Distortion::K5 => "k5",
            Distortion::K6 => "k6",
            Distortion::S1 => "s1",
            Distortion::S2 => "s2",
            Distortion::S3 => "s3",
            Distortion::S4 => "s4",
            Distortion::TauX => "taux",
            Distortion::TauY => "tauy",
        }
    }
}

/// Pinhole camera matrix plus lens distortion.
///
/// Only `fx`, `fy`, `cx` and `cy` of the camera matrix can change; the skew
/// term and the last row stay fixed at `[0 0 1]`. The reprojection error of
/// the producing calibration is optional, `None` meaning "unknown".
///
/// # Examples
///
/// ```rust
/// use worldcam::camera::IntrinsicModel;
/// use worldcam::camera::intrinsic::Distortion;
///
/// let mut model = IntrinsicModel::default();
/// model.set_fx(1000.0);
/// model.set_distortion(Distortion::R2, -0.12);
///
/// assert_eq!(model.fx(), 1000.0);
/// assert_eq!(model.distortion(Distortion::R2), -0.12);
/// assert_eq!(model.camera_matrix()[(0, 1)], 0.0);
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(from = "IntrinsicRecord", into = "IntrinsicRecord")]
pub struct IntrinsicModel {
    camera_matrix: Matrix3<f64>,
    distortion: [f64; DISTORTION_COUNT],
    reprojection_error: Option<f64>,
}

impl Default for IntrinsicModel {
    fn default() -> Self {
        Self::new(881.0, 881.0, 551.5, 383.5)
    }
}

impl IntrinsicModel {
    /// Creates a distortion-free model with unknown reprojection error.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        IntrinsicModel {
            camera_matrix: Matrix3::new(fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0),
            distortion: [0.0; DISTORTION_COUNT],
            reprojection_error: None,
        }
    }

    /// Creates a model from a camera matrix and distortion coefficients.
    ///
    /// Only the focal lengths and the principal point are taken from
    /// `camera_matrix`. `coefficients` may be shorter than fourteen entries,
    /// missing coefficients are zero.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::InvalidParams`] if more than fourteen coefficients
    ///   are given.
    pub fn from_parts(
        camera_matrix: &Matrix3<f64>,
        coefficients: &[f64],
        reprojection_error: Option<f64>,
    ) -> Result<Self, CalibrationError> {
        if coefficients.len() > DISTORTION_COUNT {
            return Err(CalibrationError::InvalidParams(format!(
                "expected at most {DISTORTION_COUNT} distortion coefficients, got {}",
                coefficients.len()
            )));
        }
        let mut model = IntrinsicModel::new(
            camera_matrix[(0, 0)],
            camera_matrix[(1, 1)],
            camera_matrix[(0, 2)],
            camera_matrix[(1, 2)],
        );
        model.distortion[..coefficients.len()].copy_from_slice(coefficients);
        model.set_reprojection_error(reprojection_error);
        Ok(model)
    }

    pub fn fx(&self) -> f64 {
        self.camera_matrix[(0, 0)]
    }

    pub fn fy(&self) -> f64 {
        self.camera_matrix[(1, 1)]
    }

    pub fn cx(&self) -> f64 {
        self.camera_matrix[(0, 2)]
    }

    pub fn cy(&self) -> f64 {
        self.camera_matrix[(1, 2)]
    }

    pub fn set_fx(&mut self, fx: f64) {
        self.camera_matrix[(0, 0)] = fx;
    }

    pub fn set_fy(&mut self, fy: f64) {
        self.camera_matrix[(1, 1)] = fy;
    }

    pub fn set_cx(&mut self, cx: f64) {
        self.camera_matrix[(0, 2)] = cx;
    }

    pub fn set_cy(&mut self, cy: f64) {
        self.camera_matrix[(1, 2)] = cy;
    }

    pub fn camera_matrix(&self) -> &Matrix3<f64> {
        &self.camera_matrix
    }

    pub fn distortion(&self, which: Distortion) -> f64 {
        self.distortion[which.index()]
    }

    pub fn set_distortion(&mut self, which: Distortion, value: f64) {
        self.distortion[which.index()] = value;
    }

    /// All fourteen coefficients in OpenCV order.
    pub fn distortion_coefficients(&self) -> &[f64; DISTORTION_COUNT] {
        &self.distortion
    }

    pub fn reprojection_error(&self) -> Option<f64> {
        self.reprojection_error
    }

    /// Stores the calibration error. Non-finite values mean "unknown".
    pub fn set_reprojection_error(&mut self, error: Option<f64>) {
        self.reprojection_error = error.filter(|e| e.is_finite());
    }

    /// Checks the parameters against loose plausibility ranges.
    ///
    /// Focal lengths and principal point are expected in `[0, 5000]`, every
    /// distortion coefficient in `[-5, 5]`. Violations are logged and returned
    /// but never reject the model.
    pub fn check_plausibility(&self) -> Vec<PlausibilityWarning> {
        const PIXEL_RANGE: (f64, f64) = (0.0, 5000.0);
        const DISTORTION_RANGE: (f64, f64) = (-5.0, 5.0);

        let pixel_params = [
            ("fx", self.fx()),
            ("fy", self.fy()),
            ("cx", self.cx()),
            ("cy", self.cy()),
        ];
        let distortion_params = Distortion::ALL
            .iter()
            .map(|d| (d.name(), self.distortion(*d)));

        let warnings: Vec<PlausibilityWarning> = pixel_params
            .into_iter()
            .map(|(name, value)| (name, value, PIXEL_RANGE))
            .chain(distortion_params.map(|(name, value)| (name, value, DISTORTION_RANGE)))
            .filter(|(_, value, (min, max))| !(*value >= *min && *value <= *max))
            .map(|(parameter, value, (min, max))| PlausibilityWarning {
                parameter,
                value,
                min,
                max,
            })
            .collect();

        for warning in &warnings {
            warn!("{warning}");
        }
        warnings
    }

    /// Loads an intrinsic model from a YAML camera file.
    ///
    /// The file uses the `cam0` layout: `intrinsics: [fx, fy, cx, cy]`, an
    /// optional `distortion_coeffs` list in OpenCV order and an optional
    /// `reprojection_error`.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::IOError`] if the file cannot be read.
    /// * [`CalibrationError::YamlError`] if the content is not YAML.
    /// * [`CalibrationError::InvalidParams`] if fields are missing or of the
    ///   wrong type.
    pub fn load_from_yaml(path: &str) -> Result<Self, CalibrationError> {
        let contents = fs::read_to_string(path)?;
        let docs = YamlLoader::load_from_str(&contents)?;
        let doc = docs.first().ok_or_else(|| {
            CalibrationError::YamlError(format!("{path} contains no YAML document"))
        })?;
        let cam = &doc["cam0"];

        let intrinsics_yaml = cam["intrinsics"].as_vec().ok_or_else(|| {
            CalibrationError::InvalidParams("YAML missing 'intrinsics' or not an array".to_string())
        })?;
        if intrinsics_yaml.len() != 4 {
            return Err(CalibrationError::InvalidParams(format!(
                "'intrinsics' must hold fx, fy, cx, cy, got {} values",
                intrinsics_yaml.len()
            )));
        }
        let mut values = [0.0; 4];
        for (value, (yaml, name)) in values
            .iter_mut()
            .zip(intrinsics_yaml.iter().zip(["fx", "fy", "cx", "cy"]))
        {
            *value = yaml_number(yaml).ok_or_else(|| {
                CalibrationError::InvalidParams(format!("Invalid {name}: not a number"))
            })?;
        }

        let mut coefficients = Vec::new();
        if let Some(list) = cam["distortion_coeffs"].as_vec() {
            for (i, yaml) in list.iter().enumerate() {
                coefficients.push(yaml_number(yaml).ok_or_else(|| {
                    CalibrationError::InvalidParams(format!(
                        "Invalid distortion coefficient {i}: not a number"
                    ))
                })?);
            }
        }

        let [fx, fy, cx, cy] = values;
        let camera_matrix = Matrix3::new(fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0);
        let model = IntrinsicModel::from_parts(
            &camera_matrix,
            &coefficients,
            yaml_number(&cam["reprojection_error"]),
        )?;
        model.check_plausibility();
        Ok(model)
    }

    /// Saves the model in the `cam0` YAML layout read by [`Self::load_from_yaml`].
    pub fn save_to_yaml(&self, path: &str) -> Result<(), CalibrationError> {
        let mut cam = serde_yaml::Mapping::new();
        cam.insert(
            serde_yaml::Value::String("camera_model".to_string()),
            serde_yaml::Value::String("pinhole".to_string()),
        );
        cam.insert(
            serde_yaml::Value::String("intrinsics".to_string()),
            serde_yaml::to_value(vec![self.fx(), self.fy(), self.cx(), self.cy()])?,
        );
        cam.insert(
            serde_yaml::Value::String("distortion_coeffs".to_string()),
            serde_yaml::to_value(self.distortion.to_vec())?,
        );
        if let Some(error) = self.reprojection_error {
            cam.insert(
                serde_yaml::Value::String("reprojection_error".to_string()),
                serde_yaml::Value::from(error),
            );
        }
        let mut root = serde_yaml::Mapping::new();
        root.insert(
            serde_yaml::Value::String("cam0".to_string()),
            serde_yaml::Value::Mapping(cam),
        );

        let yaml_string = serde_yaml::to_string(&root)?;
        let mut file = fs::File::create(path)?;
        file.write_all(yaml_string.as_bytes())?;
        Ok(())
    }
}

fn yaml_number(yaml: &yaml_rust::Yaml) -> Option<f64> {
    yaml.as_f64().or_else(|| yaml.as_i64().map(|v| v as f64))
}

impl PartialEq for IntrinsicModel {
    fn eq(&self, other: &Self) -> bool {
        self.camera_matrix == other.camera_matrix
            && self.distortion == other.distortion
            && self.reprojection_error == other.reprojection_error
    }
}

impl fmt::Debug for IntrinsicModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IntrinsicModel [fx: {} fy: {} cx: {} cy: {} distortion: {:?} error: {:?}]",
            self.fx(),
            self.fy(),
            self.cx(),
            self.cy(),
            self.distortion,
            self.reprojection_error
        )
    }
}

/// A parameter outside its plausible range.
#[derive(Debug, Clone, PartialEq)]
pub struct PlausibilityWarning {
    pub parameter: &'static str,
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

impl fmt::Display for PlausibilityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "intrinsic parameter {} = {} is outside the plausible range [{}, {}]",
            self.parameter, self.value, self.min, self.max
        )
    }
}

/// Persisted attribute layout of the `INTRINSIC_PARAMETERS` element.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct IntrinsicRecord {
    #[serde(rename = "FX")]
    fx: f64,
    #[serde(rename = "FY")]
    fy: f64,
    #[serde(rename = "CX")]
    cx: f64,
    #[serde(rename = "CY")]
    cy: f64,
    #[serde(rename = "R2")]
    r2: f64,
    #[serde(rename = "R4")]
    r4: f64,
    #[serde(rename = "R6")]
    r6: f64,
    #[serde(rename = "TX")]
    tx: f64,
    #[serde(rename = "TY")]
    ty: f64,
    #[serde(rename = "K4")]
    k4: f64,
    #[serde(rename = "K5")]
    k5: f64,
    #[serde(rename = "K6")]
    k6: f64,
    #[serde(rename = "S1")]
    s1: f64,
    #[serde(rename = "S2")]
    s2: f64,
    #[serde(rename = "S3")]
    s3: f64,
    #[serde(rename = "S4")]
    s4: f64,
    #[serde(rename = "TAUX")]
    taux: f64,
    #[serde(rename = "TAUY")]
    tauy: f64,
    #[serde(
        rename = "ReprojectionError",
        skip_serializing_if = "Option::is_none"
    )]
    reprojection_error: Option<f64>,
}

impl Default for IntrinsicRecord {
    fn default() -> Self {
        IntrinsicModel::default().into()
    }
}

impl From<IntrinsicRecord> for IntrinsicModel {
    fn from(r: IntrinsicRecord) -> Self {
        let mut model = IntrinsicModel::new(r.fx, r.fy, r.cx, r.cy);
        model.distortion = [
            r.r2, r.r4, r.tx, r.ty, r.r6, r.k4, r.k5, r.k6, r.s1, r.s2, r.s3, r.s4, r.taux,
            r.tauy,
        ];
        model.set_reprojection_error(r.reprojection_error);
        model
    }
}

impl From<IntrinsicModel> for IntrinsicRecord {
    fn from(m: IntrinsicModel) -> Self {
        let d = m.distortion;
        IntrinsicRecord {
            fx: m.fx(),
            fy: m.fy(),
            cx: m.cx(),
            cy: m.cy(),
            r2: d[0],
            r4: d[1],
            tx: d[2],
            ty: d[3],
            r6: d[4],
            k4: d[5],
            k5: d[6],
            k6: d[7],
            s1: d[8],
            s2: d[9],
            s3: d[10],
            s4: d[11],
            taux: d[12],
            tauy: d[13],
            reprojection_error: m.reprojection_error,
        }
    }
}
