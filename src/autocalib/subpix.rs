//! Iterative sub-pixel refinement of chessboard corners.
//!
//! At a true corner `q`, every image gradient `g(p)` sampled around it is
//! orthogonal to the vector `p - q`. Summing `g gᵀ (q - p) = 0` over a
//! Gaussian-weighted window gives a 2x2 linear system whose solution is the
//! next corner estimate. Iteration stops after `max_iterations` steps or when
//! the estimate moves less than `epsilon` pixels.

use image::GrayImage;
use log::trace;
use nalgebra::{Matrix2, Point2, Vector2};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubPixSettings {
    /// Half side of the search window; 5 gives an 11x11 window.
    pub half_window: u32,
    pub max_iterations: usize,
    /// Minimum corner shift, in pixels, for another iteration.
    pub epsilon: f64,
}

impl Default for SubPixSettings {
    fn default() -> Self {
        SubPixSettings {
            half_window: 5,
            max_iterations: 30,
            epsilon: 0.1,
        }
    }
}

/// Bilinear intensity lookup with edge clamping.
fn intensity(image: &GrayImage, x: f64, y: f64) -> f64 {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return 0.0;
    }
    let max_x = (width - 1) as f64;
    let max_y = (height - 1) as f64;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let x1 = (x0 + 1.0).min(max_x);
    let y1 = (y0 + 1.0).min(max_y);

    let at = |px: f64, py: f64| image.get_pixel(px as u32, py as u32)[0] as f64;
    let top = at(x0, y0) * (1.0 - fx) + at(x1, y0) * fx;
    let bottom = at(x0, y1) * (1.0 - fx) + at(x1, y1) * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Refines a single corner estimate.
///
/// The estimate is returned unchanged when the window holds no usable
/// gradient, and the original position is restored when the refinement
/// wanders farther than the window half size.
pub fn refine_corner(image: &GrayImage, corner: Point2<f64>, settings: &SubPixSettings) -> Point2<f64> {
    let half = settings.half_window as i32;
    let coeff = 1.0 / (settings.half_window.max(1) as f64).powi(2);
    let eps_sq = settings.epsilon.max(0.0).powi(2);

    let mut current = corner;
    for iteration in 0..settings.max_iterations {
        let mut normal = Matrix2::<f64>::zeros();
        let mut rhs = Vector2::<f64>::zeros();

        for dy in -half..=half {
            for dx in -half..=half {
                let (ox, oy) = (dx as f64, dy as f64);
                let weight = (-(ox * ox + oy * oy) * coeff).exp();
                let px = current.x + ox;
                let py = current.y + oy;

                let gx = 0.5 * (intensity(image, px + 1.0, py) - intensity(image, px - 1.0, py));
                let gy = 0.5 * (intensity(image, px, py + 1.0) - intensity(image, px, py - 1.0));

                let gxx = weight * gx * gx;
                let gxy = weight * gx * gy;
                let gyy = weight * gy * gy;
                normal[(0, 0)] += gxx;
                normal[(0, 1)] += gxy;
                normal[(1, 0)] += gxy;
                normal[(1, 1)] += gyy;
                rhs.x += gxx * px + gxy * py;
                rhs.y += gxy * px + gyy * py;
            }
        }

        if normal.determinant().abs() <= f64::EPSILON * normal.norm_squared().max(1.0) {
            break;
        }
        let Some(inverse) = normal.try_inverse() else {
            break;
        };
        let next = inverse * rhs;
        let shift_sq = (next.x - current.x).powi(2) + (next.y - current.y).powi(2);
        current = Point2::new(next.x, next.y);

        if shift_sq <= eps_sq {
            trace!("Corner converged after {} iterations", iteration + 1);
            break;
        }
    }

    if (current.x - corner.x).abs() > half as f64 || (current.y - corner.y).abs() > half as f64 {
        return corner;
    }
    current
}

/// Refines all corners in place.
pub fn refine_corners(image: &GrayImage, corners: &mut [Point2<f64>], settings: &SubPixSettings) {
    for corner in corners.iter_mut() {
        *corner = refine_corner(image, *corner, settings);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Two dark and two bright quadrants meeting between pixels 19 and 20.
    fn checker_corner() -> GrayImage {
        GrayImage::from_fn(40, 40, |x, y| {
            if (x < 20) == (y < 20) {
                Luma([0])
            } else {
                Luma([255])
            }
        })
    }

    #[test]
    fn test_refine_converges_to_corner() {
        let image = checker_corner();
        let refined = refine_corner(&image, Point2::new(17.0, 18.0), &SubPixSettings::default());
        assert!((refined.x - 19.5).abs() < 0.25, "x = {}", refined.x);
        assert!((refined.y - 19.5).abs() < 0.25, "y = {}", refined.y);
    }

    #[test]
    fn test_flat_image_keeps_estimate() {
        let image = GrayImage::from_pixel(30, 30, Luma([128]));
        let mut corners = vec![Point2::new(10.3, 12.7), Point2::new(0.0, 0.0)];
        refine_corners(&image, &mut corners, &SubPixSettings::default());
        assert_eq!(corners[0], Point2::new(10.3, 12.7));
        assert_eq!(corners[1], Point2::new(0.0, 0.0));
    }

    #[test]
    fn test_intensity_interpolates_and_clamps() {
        let image = GrayImage::from_fn(2, 1, |x, _| Luma([if x == 0 { 0 } else { 100 }]));
        assert_eq!(intensity(&image, 0.5, 0.0), 50.0);
        assert_eq!(intensity(&image, -3.0, 0.0), 0.0);
        assert_eq!(intensity(&image, 7.0, 2.0), 100.0);
    }
}
