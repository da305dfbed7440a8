//! Small image and file helpers shared by the sample selector and the demos.

use crate::camera::CalibrationError;
use image::{GrayImage, Rgb, RgbImage};
use nalgebra::Point2;
use std::fs;
use std::path::Path;

/// Creates `dir` and its parents when missing.
pub fn ensure_dir(dir: &Path) -> Result<(), CalibrationError> {
    if !dir.as_os_str().is_empty() && !dir.exists() {
        fs::create_dir_all(dir).map_err(|e| {
            CalibrationError::IOError(format!(
                "Failed to create directory {}: {e}",
                dir.display()
            ))
        })?;
    }
    Ok(())
}

/// Convert RGB image to grayscale
pub fn rgb_to_grayscale(img: &RgbImage) -> GrayImage {
    let (width, height) = img.dimensions();
    let mut gray_img = GrayImage::new(width, height);

    for y in 0..height {
        for x in 0..width {
            let pixel = img.get_pixel(x, y);
            let gray_value = (0.299 * pixel[0] as f64 + 0.587 * pixel[1] as f64 + 0.114 * pixel[2] as f64)
                .round()
                .clamp(0.0, 255.0) as u8;
            gray_img.put_pixel(x, y, image::Luma([gray_value]));
        }
    }

    gray_img
}

/// Load an image from file path as RGB.
pub fn load_image(image_path: &Path) -> Result<RgbImage, CalibrationError> {
    let img = image::open(image_path).map_err(|e| {
        CalibrationError::ImageError(format!(
            "Failed to load image {}: {e}",
            image_path.display()
        ))
    })?;

    Ok(img.to_rgb8())
}

/// Marks each point with a small cross; points outside the image are skipped.
pub fn draw_points(img: &mut RgbImage, points: &[Point2<f64>], color: Rgb<u8>) {
    let (width, height) = img.dimensions();
    for point in points {
        if !point.x.is_finite() || !point.y.is_finite() {
            continue;
        }
        let cx = point.x.round() as i64;
        let cy = point.y.round() as i64;
        for d in -2i64..=2 {
            for (x, y) in [(cx + d, cy), (cx, cy + d)] {
                if x >= 0 && y >= 0 && (x as u32) < width && (y as u32) < height {
                    img.put_pixel(x as u32, y as u32, color);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grayscale_keeps_neutral_values() {
        let img = RgbImage::from_fn(3, 1, |x, _| {
            let v = [0u8, 77, 255][x as usize];
            Rgb([v, v, v])
        });
        let gray = rgb_to_grayscale(&img);
        assert_eq!(gray.get_pixel(0, 0)[0], 0);
        assert_eq!(gray.get_pixel(1, 0)[0], 77);
        assert_eq!(gray.get_pixel(2, 0)[0], 255);
    }

    #[test]
    fn test_draw_points_clips_to_image() {
        let mut img = RgbImage::new(10, 10);
        let red = Rgb([255, 0, 0]);
        draw_points(
            &mut img,
            &[Point2::new(0.0, 0.0), Point2::new(50.0, 50.0), Point2::new(f64::NAN, 1.0)],
            red,
        );
        assert_eq!(*img.get_pixel(0, 0), red);
        assert_eq!(*img.get_pixel(2, 0), red);
        assert_eq!(*img.get_pixel(0, 2), red);
        assert_eq!(*img.get_pixel(5, 5), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_ensure_dir_creates_nested() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
        ensure_dir(&nested).unwrap();
    }

    #[test]
    fn test_load_image_missing_file() {
        let result = load_image(Path::new("samples/does_not_exist.png"));
        assert!(matches!(result, Err(CalibrationError::ImageError(_))));
    }
}
