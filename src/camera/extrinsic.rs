use nalgebra::{Matrix3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

/// Camera pose relative to the world frame.
///
/// `rotation` is an axis-angle vector whose direction is the rotation axis and
/// whose length is the angle in radians. `translation` is expressed in world
/// coordinates: the camera centre sits at `-translation`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "ExtrinsicRecord", into = "ExtrinsicRecord")]
pub struct ExtrinsicParameters {
    pub rotation: Vector3<f64>,
    pub translation: Vector3<f64>,
}

impl Default for ExtrinsicParameters {
    fn default() -> Self {
        ExtrinsicParameters {
            rotation: Vector3::zeros(),
            translation: Vector3::new(0.0, 0.0, -500.0),
        }
    }
}

impl ExtrinsicParameters {
    pub fn new(rotation: Vector3<f64>, translation: Vector3<f64>) -> Self {
        ExtrinsicParameters {
            rotation,
            translation,
        }
    }

    /// The degenerate all-zero pose a rejected calibration falls back to.
    pub fn zero() -> Self {
        ExtrinsicParameters {
            rotation: Vector3::zeros(),
            translation: Vector3::zeros(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.rotation == Vector3::zeros() && self.translation == Vector3::zeros()
    }

    /// World-to-camera rotation matrix (Rodrigues formula).
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        Rotation3::new(self.rotation).into_inner()
    }

    /// Camera centre in world coordinates.
    pub fn camera_position(&self) -> Vector3<f64> {
        -self.translation
    }
}

/// `EXTR_ROT_*` / `EXTR_TRANS_*` attributes of the `EXTRINSIC_PARAMETERS` element.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct ExtrinsicRecord {
    #[serde(rename = "EXTR_ROT_1")]
    rot_1: f64,
    #[serde(rename = "EXTR_ROT_2")]
    rot_2: f64,
    #[serde(rename = "EXTR_ROT_3")]
    rot_3: f64,
    #[serde(rename = "EXTR_TRANS_1")]
    trans_1: f64,
    #[serde(rename = "EXTR_TRANS_2")]
    trans_2: f64,
    #[serde(rename = "EXTR_TRANS_3")]
    trans_3: f64,
}

impl Default for ExtrinsicRecord {
    fn default() -> Self {
        ExtrinsicParameters::default().into()
    }
}

impl From<ExtrinsicRecord> for ExtrinsicParameters {
    fn from(r: ExtrinsicRecord) -> Self {
        ExtrinsicParameters {
            rotation: Vector3::new(r.rot_1, r.rot_2, r.rot_3),
            translation: Vector3::new(r.trans_1, r.trans_2, r.trans_3),
        }
    }
}

impl From<ExtrinsicParameters> for ExtrinsicRecord {
    fn from(p: ExtrinsicParameters) -> Self {
        ExtrinsicRecord {
            rot_1: p.rotation.x,
            rot_2: p.rotation.y,
            rot_3: p.rotation.z,
            trans_1: p.translation.x,
            trans_2: p.translation.y,
            trans_3: p.translation.z,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_default_pose_looks_from_500_units() {
        let params = ExtrinsicParameters::default();
        assert_eq!(params.rotation, Vector3::zeros());
        assert_eq!(params.camera_position(), Vector3::new(0.0, 0.0, 500.0));
        assert!(!params.is_zero());
        assert!(ExtrinsicParameters::zero().is_zero());
    }

    #[test]
    fn test_rotation_matrix_rodrigues() {
        let params = ExtrinsicParameters::new(Vector3::new(0.0, 0.0, FRAC_PI_2), Vector3::zeros());
        let rotated = params.rotation_matrix() * Vector3::new(1.0, 0.0, 0.0);
        assert_relative_eq!(rotated, Vector3::new(0.0, 1.0, 0.0), epsilon = 1e-12);

        let identity = ExtrinsicParameters::zero().rotation_matrix();
        assert_relative_eq!(identity, Matrix3::identity());
    }

    #[test]
    fn test_missing_attributes_use_defaults() {
        let params: ExtrinsicParameters =
            serde_yaml::from_str("EXTR_ROT_1: 0.5\nEXTR_TRANS_1: 12.0\n").unwrap();
        assert_eq!(params.rotation, Vector3::new(0.5, 0.0, 0.0));
        assert_eq!(params.translation, Vector3::new(12.0, 0.0, -500.0));
    }
}
