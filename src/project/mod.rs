//! Persistence of the calibration state of a project.
//!
//! A [`CalibrationDocument`] holds the three elements a project stores for the
//! camera geometry: `INTRINSIC_PARAMETERS`, `EXTRINSIC_PARAMETERS` (pose plus
//! the coordinate system attributes) and `REPROJECTION_ERROR`. Attribute names
//! are kept stable across formats, so a document written as YAML reads back
//! from the equivalent JSON and vice versa.

use crate::calibration::ReprojectionError;
use crate::camera::extrinsic::ExtrinsicRecord;
use crate::camera::{CalibrationError, ExtrinsicParameters, IntrinsicModel};
use crate::frame::{CoordinateFramePose, CoordinateRecord};
use crate::mapping::WorldImageMapper;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Json,
}

impl DocumentFormat {
    /// Picks the format from the file extension (`yaml`, `yml` or `json`).
    pub fn from_path(path: &Path) -> Result<Self, CalibrationError> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        match ext.as_deref() {
            Some("yaml") | Some("yml") => Ok(DocumentFormat::Yaml),
            Some("json") => Ok(DocumentFormat::Json),
            _ => Err(CalibrationError::FileFormat(format!(
                "unsupported calibration document {}, expected .yaml, .yml or .json",
                path.display()
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "DocumentRecord", into = "DocumentRecord")]
pub struct CalibrationDocument {
    pub intrinsics: IntrinsicModel,
    pub extrinsics: ExtrinsicParameters,
    pub frame: CoordinateFramePose,
    pub reprojection: ReprojectionError,
}

impl CalibrationDocument {
    /// Snapshot of the current state of `mapper`.
    pub fn from_mapper(mapper: &WorldImageMapper) -> Self {
        CalibrationDocument {
            intrinsics: mapper.intrinsics().clone(),
            extrinsics: *mapper.extrinsic_params(),
            frame: mapper.frame().clone(),
            reprojection: *mapper.calibrator().reprojection_error(),
        }
    }

    /// Restores the stored state into `mapper`. The mapper keeps its own
    /// translation range, widened if the stored 2D translation lies outside.
    pub fn apply_to(&self, mapper: &mut WorldImageMapper) {
        mapper.set_intrinsics(self.intrinsics.clone());
        mapper.set_extrinsic_params(self.extrinsics);
        let coordinates = CoordinateRecord::from(&self.frame);
        mapper.update_frame(|frame| coordinates.apply_to(frame));
        mapper.restore_reprojection_error(self.reprojection);
    }

    pub fn render(&self, format: DocumentFormat) -> Result<String, CalibrationError> {
        Ok(match format {
            DocumentFormat::Yaml => serde_yaml::to_string(self)?,
            DocumentFormat::Json => serde_json::to_string_pretty(self)?,
        })
    }

    pub fn parse(contents: &str, format: DocumentFormat) -> Result<Self, CalibrationError> {
        Ok(match format {
            DocumentFormat::Yaml => serde_yaml::from_str(contents)?,
            DocumentFormat::Json => serde_json::from_str(contents)?,
        })
    }

    /// Writes the document in the format given by the extension of `path`.
    pub fn save(&self, path: &Path) -> Result<(), CalibrationError> {
        let contents = self.render(DocumentFormat::from_path(path)?)?;
        fs::write(path, contents)?;
        info!("Saved calibration to {}", path.display());
        Ok(())
    }

    /// # Errors
    ///
    /// * [`CalibrationError::FileFormat`] for an unknown extension.
    /// * [`CalibrationError::IOError`] if the file cannot be read.
    /// * [`CalibrationError::YamlError`] or [`CalibrationError::JsonError`]
    ///   for malformed contents.
    pub fn load(path: &Path) -> Result<Self, CalibrationError> {
        let format = DocumentFormat::from_path(path)?;
        let contents = fs::read_to_string(path)?;
        let document = Self::parse(&contents, format)?;
        document.intrinsics.check_plausibility();
        info!("Loaded calibration from {}", path.display());
        Ok(document)
    }
}

#[derive(Serialize, Deserialize, Default)]
#[serde(default)]
struct ExtrinsicElement {
    #[serde(flatten)]
    pose: ExtrinsicRecord,
    #[serde(flatten)]
    coordinates: CoordinateRecord,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(default)]
struct DocumentRecord {
    #[serde(rename = "INTRINSIC_PARAMETERS")]
    intrinsics: IntrinsicModel,
    #[serde(rename = "EXTRINSIC_PARAMETERS")]
    extrinsics: ExtrinsicElement,
    #[serde(rename = "REPROJECTION_ERROR")]
    reprojection: ReprojectionError,
}

impl From<DocumentRecord> for CalibrationDocument {
    fn from(r: DocumentRecord) -> Self {
        let mut frame = CoordinateFramePose::default();
        r.extrinsics.coordinates.apply_to(&mut frame);
        CalibrationDocument {
            intrinsics: r.intrinsics,
            extrinsics: r.extrinsics.pose.into(),
            frame,
            reprojection: r.reprojection,
        }
    }
}

impl From<CalibrationDocument> for DocumentRecord {
    fn from(d: CalibrationDocument) -> Self {
        DocumentRecord {
            intrinsics: d.intrinsics,
            extrinsics: ExtrinsicElement {
                pose: d.extrinsics.into(),
                coordinates: CoordinateRecord::from(&d.frame),
            },
            reprojection: d.reprojection,
        }
    }
}
