//! Shared numerical primitives.
//!
//! Point-set statistics, the planarity test used before every pose solve,
//! Hartley normalization for the linear solvers and conversions between
//! rotation matrices and axis-angle vectors.

use nalgebra::{
    DMatrix, DVector, Matrix3, Matrix4, Point2, Point3, Rotation3, UnitQuaternion, Vector3,
};

/// Singular-value ratio below which a point cloud counts as planar.
pub const PLANARITY_THRESHOLD: f64 = 1e-3;

pub fn centroid(points: &[Point3<f64>]) -> Point3<f64> {
    if points.is_empty() {
        return Point3::origin();
    }
    let sum = points
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + p.coords);
    Point3::from(sum / points.len() as f64)
}

/// Scatter matrix `MᵀM` of the centered points and its eigen decomposition,
/// sorted by decreasing eigenvalue.
fn principal_axes(points: &[Point3<f64>]) -> (Point3<f64>, [f64; 3], Matrix3<f64>) {
    let center = centroid(points);
    let scatter = points.iter().fold(Matrix3::zeros(), |acc, p| {
        let d = p.coords - center.coords;
        acc + d * d.transpose()
    });

    let eigen = scatter.symmetric_eigen();
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

    let values = order.map(|i| eigen.eigenvalues[i].max(0.0));
    let mut axes = Matrix3::zeros();
    for (col, &i) in order.iter().enumerate() {
        axes.set_column(col, &eigen.eigenvectors.column(i));
    }
    (center, values, axes)
}

/// Planarity test on the centered point cloud.
///
/// The singular values `w0 >= w1 >= w2` of `MᵀM`, with `M` the matrix of
/// centered points, are compared: the set is planar when `w2 < w1 * threshold`.
pub fn is_planar(points: &[Point3<f64>], threshold: f64) -> bool {
    if points.len() < 3 {
        return false;
    }
    let (_, w, _) = principal_axes(points);
    w[2] < w[1] * threshold
}

/// Right-handed orthonormal frame fitted to a point cloud.
///
/// Returns the centroid and a rotation whose first two columns span the
/// dominant plane and whose third column is the plane normal.
pub fn plane_frame(points: &[Point3<f64>]) -> (Point3<f64>, Matrix3<f64>) {
    let (center, _, mut axes) = principal_axes(points);
    let normal = axes.column(0).cross(&axes.column(1));
    axes.set_column(2, &normal);
    (center, axes)
}

/// Unit vector spanning the (approximate) null space of `a`.
///
/// Solved through the eigenvector of `AᵀA` with the smallest eigenvalue, which
/// also works for systems with fewer rows than columns.
pub fn null_vector(a: &DMatrix<f64>) -> Option<DVector<f64>> {
    if a.nrows() == 0 || a.ncols() == 0 {
        return None;
    }
    let ata = a.transpose() * a;
    let eigen = ata.symmetric_eigen();
    let (index, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|(_, x), (_, y)| x.total_cmp(y))?;
    let v = eigen.eigenvectors.column(index).into_owned();
    let norm = v.norm();
    if !norm.is_finite() || norm <= f64::EPSILON {
        return None;
    }
    Some(v / norm)
}

/// Hartley normalization of 2D points: centroid at the origin, mean distance
/// `√2`. Returns the normalized points and the similarity `T` with
/// `p_norm = T * p`.
pub fn normalize_points_2d(points: &[Point2<f64>]) -> Option<(Vec<Point2<f64>>, Matrix3<f64>)> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let center = points.iter().fold(Vector3::zeros(), |acc, p| {
        acc + Vector3::new(p.x, p.y, 0.0)
    }) / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p.x - center.x).powi(2) + (p.y - center.y).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist <= f64::EPSILON {
        return None;
    }

    let scale = 2.0_f64.sqrt() / mean_dist;
    let t = Matrix3::new(
        scale,
        0.0,
        -scale * center.x,
        0.0,
        scale,
        -scale * center.y,
        0.0,
        0.0,
        1.0,
    );
    let normalized = points
        .iter()
        .map(|p| Point2::new((p.x - center.x) * scale, (p.y - center.y) * scale))
        .collect();
    Some((normalized, t))
}

/// Hartley normalization of 3D points to mean distance `√3`.
pub fn normalize_points_3d(points: &[Point3<f64>]) -> Option<(Vec<Point3<f64>>, Matrix4<f64>)> {
    if points.is_empty() {
        return None;
    }
    let center = centroid(points);
    let mean_dist =
        points.iter().map(|p| (p.coords - center.coords).norm()).sum::<f64>() / points.len() as f64;
    if mean_dist <= f64::EPSILON {
        return None;
    }

    let scale = 3.0_f64.sqrt() / mean_dist;
    let t = Matrix4::new(
        scale,
        0.0,
        0.0,
        -scale * center.x,
        0.0,
        scale,
        0.0,
        -scale * center.y,
        0.0,
        0.0,
        scale,
        -scale * center.z,
        0.0,
        0.0,
        0.0,
        1.0,
    );
    let normalized = points
        .iter()
        .map(|p| Point3::from((p.coords - center.coords) * scale))
        .collect();
    Some((normalized, t))
}

/// Closest rotation to `m` in the Frobenius sense.
pub fn nearest_rotation(m: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let svd = m.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        r = u_flipped * v_t;
    }
    Some(r)
}

/// Axis-angle vector of a rotation matrix (inverse Rodrigues).
///
/// Goes through a unit quaternion so that rotations by π keep their axis.
pub fn rotation_vector(m: &Matrix3<f64>) -> Vector3<f64> {
    let rotation = Rotation3::from_matrix_unchecked(*m);
    UnitQuaternion::from_rotation_matrix(&rotation).scaled_axis()
}

/// Grid of pixel positions evenly distributed across an image.
///
/// `n` is the approximate number of points; each point sits at the centre of
/// its grid cell.
pub fn sample_points(width: f64, height: f64, n: usize) -> Vec<Point2<f64>> {
    let num_cells_x = ((n as f64 * (width / height)).sqrt().round() as usize).max(1);
    let num_cells_y = ((n as f64 * (height / width)).sqrt().round() as usize).max(1);

    let cell_width = width / num_cells_x as f64;
    let cell_height = height / num_cells_y as f64;

    (0..num_cells_y)
        .flat_map(|i| {
            (0..num_cells_x).map(move |j| {
                Point2::new(
                    (j as f64 + 0.5) * cell_width,
                    (i as f64 + 0.5) * cell_height,
                )
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn ground_points() -> Vec<Point3<f64>> {
        vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(200.0, 0.0, 0.0),
            Point3::new(200.0, 150.0, 0.0),
            Point3::new(0.0, 150.0, 0.0),
            Point3::new(100.0, 75.0, 0.0),
        ]
    }

    #[test]
    fn test_planarity() {
        let mut points = ground_points();
        assert!(is_planar(&points, PLANARITY_THRESHOLD));

        // tilted plane is still a plane
        let tilt = Rotation3::from_euler_angles(0.3, -0.2, 0.7);
        let tilted: Vec<Point3<f64>> = points.iter().map(|p| tilt * p).collect();
        assert!(is_planar(&tilted, PLANARITY_THRESHOLD));

        points.push(Point3::new(50.0, 50.0, 180.0));
        assert!(!is_planar(&points, PLANARITY_THRESHOLD));
    }

    #[test]
    fn test_plane_frame_normal() {
        let (center, frame) = plane_frame(&ground_points());
        assert_relative_eq!(center, Point3::new(100.0, 75.0, 0.0), epsilon = 1e-9);
        assert_relative_eq!(frame[(2, 2)].abs(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(frame.determinant(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_null_vector() {
        // rows orthogonal to (1, 2, 3)
        let a = DMatrix::from_row_slice(2, 3, &[3.0, 0.0, -1.0, 0.0, 3.0, -2.0]);
        let v = null_vector(&a).unwrap();
        let expected = Vector3::new(1.0, 2.0, 3.0).normalize();
        let sign = v[0].signum();
        assert_relative_eq!(v[0] * sign, expected.x, epsilon = 1e-9);
        assert_relative_eq!(v[1] * sign, expected.y, epsilon = 1e-9);
        assert_relative_eq!(v[2] * sign, expected.z, epsilon = 1e-9);
    }

    #[test]
    fn test_hartley_normalization() {
        let points = vec![
            Point2::new(10.0, 10.0),
            Point2::new(30.0, 10.0),
            Point2::new(30.0, 30.0),
            Point2::new(10.0, 30.0),
        ];
        let (normalized, t) = normalize_points_2d(&points).unwrap();
        let mean = normalized
            .iter()
            .map(|p| p.coords.norm())
            .sum::<f64>()
            / 4.0;
        assert_relative_eq!(mean, 2.0_f64.sqrt(), epsilon = 1e-12);
        let mapped = t * Vector3::new(30.0, 30.0, 1.0);
        assert_relative_eq!(mapped.x, normalized[2].x, epsilon = 1e-12);
        assert_relative_eq!(mapped.y, normalized[2].y, epsilon = 1e-12);

        assert!(normalize_points_2d(&[Point2::new(1.0, 1.0)]).is_none());
    }

    #[test]
    fn test_rotation_vector_round_trip() {
        for r in [
            Vector3::new(0.1, -0.4, 0.25),
            Vector3::new(PI, 0.0, 0.0),
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(-2.0, 1.0, 0.5),
        ] {
            let m = Rotation3::new(r).into_inner();
            let back = Rotation3::new(rotation_vector(&m)).into_inner();
            assert_relative_eq!(back, m, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_nearest_rotation() {
        let r = Rotation3::from_euler_angles(0.2, 0.1, -0.3).into_inner();
        let noisy = r * 1.05 + Matrix3::repeat(1e-4);
        let fixed = nearest_rotation(&noisy).unwrap();
        assert_relative_eq!(fixed, r, epsilon = 1e-3);
    }

    #[test]
    fn test_sample_points() {
        let points = sample_points(800.0, 600.0, 100);
        let expected_count = 80..=120;
        assert!(
            expected_count.contains(&points.len()),
            "Expected around 100 points, got {}",
            points.len()
        );
        for point in &points {
            assert!(point.x >= 0.0 && point.x < 800.0);
            assert!(point.y >= 0.0 && point.y < 600.0);
        }
    }
}
