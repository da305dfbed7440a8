//! Ground Mapping Demo
//!
//! Maps a grid of image positions onto the ground and onto head height, once
//! through the extrinsic calibration (3D) and once through the planar
//! altitude model (2D).
//!
//! Usage:
//! ```bash
//! cargo run --example ground_mapping                        # synthetic overhead camera
//! cargo run --example ground_mapping -- calibration.yaml    # stored calibration
//! ```

use log::info;
use nalgebra::{Point2, Point3, Vector3};
use std::f64::consts::PI;
use std::path::Path;
use worldcam::{
    CalibrationDocument, CoordDimension, ExtrinsicParameters, Resolution,
    WorldImageCorrespondence, WorldImageMapper,
};

const HEAD_HEIGHT: f64 = 175.0;

fn print_grid(mapper: &WorldImageMapper, size: Resolution) {
    println!(
        "{:>16} | {:>20} | {:>20} | {:>8} | {:>14}",
        "pixel", "ground (cm)", "head (cm)", "angle", "cm/px"
    );
    for fy in [0.1, 0.5, 0.9] {
        for fx in [0.1, 0.5, 0.9] {
            let pixel = Point2::new(size.width as f64 * fx, size.height as f64 * fy);
            let ground = mapper.pos_real(&pixel, 0.0);
            let head = mapper.pos_real(&pixel, HEAD_HEIGHT);
            let cm = mapper.cm_per_pixel_at(&pixel, 0.0);
            println!(
                "({:>6.1},{:>6.1}) | ({:>8.1},{:>8.1}) | ({:>8.1},{:>8.1}) | {:>8.2} | ({:>5.2},{:>5.2})",
                pixel.x,
                pixel.y,
                ground.x,
                ground.y,
                head.x,
                head.y,
                mapper.angle_to_ground(&pixel, 0.0),
                cm.x,
                cm.y
            );
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut mapper = WorldImageMapper::default();
    match std::env::args().nth(1) {
        Some(path) => {
            let document = CalibrationDocument::load(Path::new(&path))?;
            document.apply_to(&mut mapper);
            info!("Using calibration from {path}");
        }
        None => {
            // camera 6 m above the origin, looking straight down
            mapper.set_extrinsic_params(ExtrinsicParameters::new(
                Vector3::new(PI, 0.0, 0.0),
                Vector3::new(0.0, 0.0, -600.0),
            ));
            info!("Using a synthetic overhead camera");
        }
    }

    let intrinsics = mapper.intrinsics();
    let size = Resolution {
        width: (2.0 * intrinsics.cx() + 1.0).round() as u32,
        height: (2.0 * intrinsics.cy() + 1.0).round() as u32,
    };
    mapper.set_image_size(Some(size));

    println!("🎯 GROUND MAPPING");
    println!("=================");
    println!("Image size: {}x{}", size.width, size.height);

    mapper.update_frame(|frame| frame.set_dimension(CoordDimension::ThreeD));
    println!("\n📐 3D mapping through the extrinsic calibration");
    print_grid(&mapper, size);

    let origin = mapper.image_point(&Point3::origin());
    println!("\nWorld origin in the image: ({:.1}, {:.1})", origin.x, origin.y);
    match mapper.visible_axis_lengths() {
        Some(lengths) => println!(
            "Visible axis lengths: x {:.0}, y {:.0}, z {:.0}",
            lengths.x, lengths.y, lengths.z
        ),
        None => println!("The world origin lies outside the image"),
    }

    mapper.update_frame(|frame| {
        frame.set_dimension(CoordDimension::TwoD);
        frame.altitude = 600.0;
    });
    println!("\n🗺️  2D mapping through the altitude model");
    print_grid(&mapper, size);
    println!("cm per pixel: {:.4}", mapper.cm_per_pixel());
    println!("Measured altitude: {:.1} cm", mapper.measured_altitude());

    let target = Point2::new(100.0, -50.0);
    let pixel = mapper.pos_image(&target, HEAD_HEIGHT);
    let back = mapper.pos_real(&pixel, HEAD_HEIGHT);
    println!(
        "Round trip of ({:.1}, {:.1}) at head height: pixel ({:.2}, {:.2}) -> ({:.1}, {:.1})",
        target.x, target.y, pixel.x, pixel.y, back.x, back.y
    );

    Ok(())
}
