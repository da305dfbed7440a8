//! World Camera Library
//!
//! Camera calibration and pixel/world correspondence for overhead tracking
//! setups. The library provides:
//! - Intrinsic camera model storage with plausibility checks
//! - Extrinsic pose calibration from 3D-2D point correspondences (PnP)
//! - Forward and back projection with reprojection error statistics
//! - A user-adjustable coordinate frame (2D affine pose, 3D shift and axis swap)
//! - Selection of diverse chessboard views for intrinsic calibration
//!
//! Pose refinement uses the tiny-solver Levenberg-Marquardt optimizer.

pub mod autocalib;
pub mod calibration;
pub mod camera;
pub mod config;
pub mod frame;
pub mod geometry;
pub mod mapping;
pub mod project;
pub mod util;

// Re-export commonly used types
pub use autocalib::{
    ChessboardDetector, FrameSource, PngSampleWriter, Sample, SampleScan, SampleSelector,
    SamplingSettings,
};
pub use calibration::{
    ExtrinsicCalibrator, ExtrinsicSettings, ExtrinsicSolution, IterativePnp,
    PointCorrespondenceSet, PoseSolver, ReprojectionError, UserPrompt,
};
pub use camera::{
    CalibrationError, ExtrinsicParameters, IntrinsicModel, PinholeCamera, Resolution,
};
pub use config::CalibrationConfig;
pub use frame::{CoordDimension, CoordPose2D, CoordPose3D, CoordinateFramePose, SwapAxis};
pub use mapping::{GeometryEvent, WorldImageCorrespondence, WorldImageMapper};
pub use project::{CalibrationDocument, DocumentFormat};
