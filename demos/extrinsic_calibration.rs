//! Extrinsic Calibration Tool
//!
//! Solves the camera pose from a correspondence file and stores the result as
//! a calibration document.
//!
//! Usage:
//! ```bash
//! cargo run --example extrinsic_calibration -- \
//!   --intrinsics samples/intrinsics.yaml \
//!   --points samples/trailing_whitespace.3dc \
//!   --output output/calibration.yaml
//! ```

use clap::Parser;
use flexi_logger::{colored_detailed_format, detailed_format, Duplicate, FileSpec, Logger};
use image::Rgb;
use log::{error, info, warn};
use std::path::PathBuf;
use worldcam::calibration::LogPrompt;
use worldcam::util::{draw_points, ensure_dir, load_image};
use worldcam::{
    CalibrationConfig, CalibrationDocument, IntrinsicModel, WorldImageCorrespondence,
    WorldImageMapper,
};

/// Extrinsic calibration tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the intrinsic model YAML file (cam0 layout)
    #[arg(short = 'i', long)]
    intrinsics: PathBuf,

    /// Correspondence file (.3dc or .txt) with `x y z px py` rows
    #[arg(short = 'p', long)]
    points: PathBuf,

    /// Optional configuration YAML
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Image border in pixels, overrides the configuration
    #[arg(short = 'b', long)]
    border: Option<i32>,

    /// Where to write the calibration document (.yaml or .json)
    #[arg(short = 'o', long, default_value = "output/calibration.yaml")]
    output: PathBuf,

    /// Optional camera image to draw measured and reprojected points on
    #[arg(long)]
    image: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    Logger::try_with_str("info")?
        .log_to_file(
            FileSpec::default()
                .directory("logs")
                .suppress_timestamp()
                .suffix("log"),
        )
        .duplicate_to_stdout(Duplicate::All)
        .format_for_files(detailed_format)
        .format_for_stdout(colored_detailed_format)
        .set_palette("196;208;76;39;178".to_string())
        .start()?;

    let cli = Cli::parse();
    info!("Intrinsics: {:?}", cli.intrinsics);
    info!("Correspondences: {:?}", cli.points);

    let mut config = match &cli.config {
        Some(path) => CalibrationConfig::load(path)?,
        None => CalibrationConfig::default(),
    };
    if let Some(border) = cli.border {
        config.border_size = border;
        config.validate()?;
    }

    let intrinsics_path = cli.intrinsics.to_str().ok_or("Invalid intrinsics path string")?;
    let intrinsics = IntrinsicModel::load_from_yaml(intrinsics_path)?;
    info!("Loaded intrinsics: {:?}", intrinsics);

    let mut mapper = WorldImageMapper::from_config(intrinsics, &config);
    let mut prompt = LogPrompt::default();

    let solution = match mapper.load_correspondences(&cli.points, &mut prompt) {
        Ok(Some(solution)) => solution,
        Ok(None) => {
            warn!("The file holds no image points, nothing to calibrate");
            return Ok(());
        }
        Err(e) => {
            error!("Calibration failed: {e}");
            return Err(e.into());
        }
    };

    println!("\n=== EXTRINSIC CALIBRATION ===");
    println!("Rotation:      {:?}", solution.solved.rotation.as_slice());
    println!("Translation:   {:?}", solution.solved.translation.as_slice());
    println!("Camera height: {:.2}", solution.camera_height);
    println!("Accepted:      {}", solution.valid);
    println!("\n{}", mapper.calibrator().correspondence_preview());

    if solution.valid {
        let error = mapper.compute_reprojection_error()?;
        println!("{}", error.summary());
        let center = mapper.camera().principal_point();
        println!(
            "Angle to ground at the principal point: {:.2} deg",
            mapper.angle_to_ground(&center, 0.0)
        );
    }

    if let Some(dir) = cli.output.parent() {
        ensure_dir(dir)?;
    }
    CalibrationDocument::from_mapper(&mapper).save(&cli.output)?;
    println!("Calibration written to {:?}", cli.output);

    if let Some(image_path) = &cli.image {
        let mut img = load_image(image_path)?;
        let points = mapper.calibrator().correspondences();
        let reprojected: Vec<_> = points
            .points_3d()
            .iter()
            .map(|p| mapper.image_point(p))
            .collect();
        draw_points(&mut img, points.points_2d(), Rgb([0, 255, 0]));
        draw_points(&mut img, &reprojected, Rgb([255, 0, 255]));
        let overlay = cli.output.with_extension("png");
        img.save(&overlay)?;
        println!("📸 Saved reprojection image: {:?}", overlay);
    }
    Ok(())
}
