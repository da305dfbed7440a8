//! Paired world/image points and their text file format.
//!
//! A correspondence file (`.3dc` or `.txt`) holds one point per line, either
//! `x y z` or `x y z px py`, whitespace separated. A line with a single number
//! (the point count written by exports) is ignored on any line, not only the
//! first, as are comment lines starting with `#`, `;;`, `//` or `!`. Lines
//! with any other field count are skipped with a warning.

use crate::camera::CalibrationError;
use crate::geometry;
use log::{debug, info, warn};
use nalgebra::{Point2, Point3};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

const COMMENT_PREFIXES: [&str; 4] = ["#", ";;", "//", "!"];
const SUPPORTED_EXTENSIONS: [&str; 2] = ["3dc", "txt"];

/// Minimum point count for a coplanar point set.
pub const MIN_PLANAR_POINTS: usize = 4;
/// Minimum point count for a general (non-coplanar) point set.
pub const MIN_GENERAL_POINTS: usize = 6;

/// Ordered world points with their (optional) image observations.
///
/// When both lists are non-empty they have the same length and are paired by
/// index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCorrespondenceSet {
    points_3d: Vec<Point3<f64>>,
    points_2d: Vec<Point2<f64>>,
}

impl PointCorrespondenceSet {
    /// # Errors
    ///
    /// * [`CalibrationError::CountMismatch`] if both lists are non-empty and
    ///   differ in length.
    pub fn new(
        points_3d: Vec<Point3<f64>>,
        points_2d: Vec<Point2<f64>>,
    ) -> Result<Self, CalibrationError> {
        check_pairing(points_3d.len(), points_2d.len())?;
        Ok(PointCorrespondenceSet {
            points_3d,
            points_2d,
        })
    }

    pub fn points_3d(&self) -> &[Point3<f64>] {
        &self.points_3d
    }

    pub fn points_2d(&self) -> &[Point2<f64>] {
        &self.points_2d
    }

    pub fn len(&self) -> usize {
        self.points_3d.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points_3d.is_empty() && self.points_2d.is_empty()
    }

    /// Both lists present and of equal length.
    pub fn is_complete(&self) -> bool {
        !self.points_3d.is_empty() && self.points_3d.len() == self.points_2d.len()
    }

    /// Replaces the image points, keeping the world points.
    pub fn set_points_2d(&mut self, points_2d: Vec<Point2<f64>>) -> Result<(), CalibrationError> {
        check_pairing(self.points_3d.len(), points_2d.len())?;
        self.points_2d = points_2d;
        Ok(())
    }

    /// Replaces the world points, keeping the image points.
    pub fn set_points_3d(&mut self, points_3d: Vec<Point3<f64>>) -> Result<(), CalibrationError> {
        check_pairing(points_3d.len(), self.points_2d.len())?;
        self.points_3d = points_3d;
        Ok(())
    }

    pub fn clear_points_2d(&mut self) {
        self.points_2d.clear();
    }

    pub fn clear(&mut self) {
        self.points_3d.clear();
        self.points_2d.clear();
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&Point3<f64>, &Point2<f64>)> {
        self.points_3d.iter().zip(self.points_2d.iter())
    }

    /// Human-readable listing, one `[i]: x y z px py` line per point.
    pub fn preview(&self) -> String {
        let mut out = String::new();
        for (i, p3) in self.points_3d.iter().enumerate() {
            out.push_str(&format!("[{}]: {:.1} {:.1} {:.1}", i + 1, p3.x, p3.y, p3.z));
            if let Some(p2) = self.points_2d.get(i) {
                out.push_str(&format!(" {:.3} {:.3}", p2.x, p2.y));
            }
            out.push('\n');
        }
        out
    }

    /// Writes the machine-readable file: a count line, then one
    /// `x y z px py` row per correspondence.
    pub fn save(&self, path: &Path) -> Result<(), CalibrationError> {
        if !self.is_complete() {
            return Err(CalibrationError::CountMismatch {
                points_3d: self.points_3d.len(),
                points_2d: self.points_2d.len(),
            });
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = File::create(path)?;
        writeln!(file, "{}", self.len())?;
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b' ')
            .has_headers(false)
            .from_writer(file);
        for (p3, p2) in self.pairs() {
            writer.serialize((p3.x, p3.y, p3.z, p2.x, p2.y))?;
        }
        writer.flush()?;

        info!("Saved {} calibration points to {}", self.len(), path.display());
        Ok(())
    }
}

fn check_pairing(n3: usize, n2: usize) -> Result<(), CalibrationError> {
    if n3 > 0 && n2 > 0 && n3 != n2 {
        return Err(CalibrationError::CountMismatch {
            points_3d: n3,
            points_2d: n2,
        });
    }
    Ok(())
}

/// Content of a correspondence file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrespondenceFile {
    pub points_3d: Vec<Point3<f64>>,
    /// Empty when the file holds world points only.
    pub points_2d: Vec<Point2<f64>>,
    /// Lines that were skipped because of a wrong field count or bad number.
    pub skipped_lines: Vec<usize>,
}

impl CorrespondenceFile {
    pub fn has_image_points(&self) -> bool {
        !self.points_2d.is_empty()
    }
}

/// Reads and validates a correspondence file.
///
/// # Errors
///
/// * [`CalibrationError::FileFormat`] for an extension other than `.3dc`/`.txt`.
/// * [`CalibrationError::IOError`] if the file cannot be read.
/// * [`CalibrationError::InsufficientPoints`] if the point count is below the
///   minimum for the geometry (see [`check_point_count`]).
/// * [`CalibrationError::CountMismatch`] if image points are present but their
///   number differs from the world points.
pub fn read_correspondence_file(
    path: &Path,
    planarity_threshold: f64,
) -> Result<CorrespondenceFile, CalibrationError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    if !extension
        .as_deref()
        .is_some_and(|e| SUPPORTED_EXTENSIONS.contains(&e))
    {
        return Err(CalibrationError::FileFormat(format!(
            "unsupported file extension: {} (expected .3dc or .txt)",
            path.display()
        )));
    }

    let file = File::open(path)?;
    let parsed = parse_correspondences(BufReader::new(file))?;

    check_point_count(&parsed.points_3d, planarity_threshold)?;
    if parsed.has_image_points() && parsed.points_2d.len() != parsed.points_3d.len() {
        return Err(CalibrationError::CountMismatch {
            points_3d: parsed.points_3d.len(),
            points_2d: parsed.points_2d.len(),
        });
    }

    info!(
        "Read {} world points{} from {}",
        parsed.points_3d.len(),
        if parsed.has_image_points() {
            " with image points"
        } else {
            ""
        },
        path.display()
    );
    Ok(parsed)
}

/// Parses correspondence lines without any count validation.
pub fn parse_correspondences<R: BufRead>(reader: R) -> Result<CorrespondenceFile, CalibrationError> {
    let mut result = CorrespondenceFile::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line_number = index + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if COMMENT_PREFIXES.iter().any(|p| trimmed.starts_with(p)) {
            debug!("Skipping comment line {line_number}");
            continue;
        }

        let values: Result<Vec<f64>, _> = trimmed.split_whitespace().map(str::parse).collect();
        let values = match values {
            Ok(values) => values,
            Err(e) => {
                warn!("Something wrong in line {line_number} ({trimmed}): {e}");
                result.skipped_lines.push(line_number);
                continue;
            }
        };

        match values.as_slice() {
            // a count line may appear anywhere
            [count] => info!("Line {line_number} holds the point count {count}, ignored"),
            [x, y, z] => result.points_3d.push(Point3::new(*x, *y, *z)),
            [x, y, z, px, py] => {
                result.points_3d.push(Point3::new(*x, *y, *z));
                result.points_2d.push(Point2::new(*px, *py));
            }
            other => {
                warn!(
                    "Something wrong in line {line_number} ({trimmed}): {} values, expected 3 or 5",
                    other.len()
                );
                result.skipped_lines.push(line_number);
            }
        }
    }
    Ok(result)
}

/// Checks the minimum point count: four for coplanar sets, six otherwise.
pub fn check_point_count(
    points: &[Point3<f64>],
    planarity_threshold: f64,
) -> Result<(), CalibrationError> {
    if points.len() < MIN_PLANAR_POINTS {
        return Err(CalibrationError::InsufficientPoints {
            found: points.len(),
            required: MIN_PLANAR_POINTS,
        });
    }
    if points.len() < MIN_GENERAL_POINTS && !geometry::is_planar(points, planarity_threshold) {
        return Err(CalibrationError::InsufficientPoints {
            found: points.len(),
            required: MIN_GENERAL_POINTS,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PLANARITY_THRESHOLD;
    use std::io::Cursor;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_trailing_whitespace_is_ignored() {
        let parsed = read_correspondence_file(
            Path::new("samples/trailing_whitespace.3dc"),
            PLANARITY_THRESHOLD,
        )
        .unwrap();
        assert_eq!(parsed.points_3d.len(), 6);
        assert_eq!(parsed.points_2d.len(), 6);
        assert!(parsed.skipped_lines.is_empty());
        assert_eq!(parsed.points_3d[1], Point3::new(300.0, 0.0, 0.0));
        assert_eq!(parsed.points_2d[5], Point2::new(512.25, 300.5));
    }

    #[test]
    fn test_comments_count_line_and_bad_lines() {
        let content = "6\n\
            # world points only\n\
            ;; another comment\n\
            // and another\n\
            ! last style\n\
            0 0 0\n\
            100 0 0\n\
            100 100 0\n\
            0 100 0 12.5\n\
            0 100 0\n\
            50 50 0\n\
            1 2 three\n";
        let parsed = parse_correspondences(Cursor::new(content)).unwrap();
        assert_eq!(parsed.points_3d.len(), 5);
        assert!(!parsed.has_image_points());
        assert_eq!(parsed.skipped_lines, vec![9, 12]);
    }

    #[test]
    fn test_single_number_lines_ignored_anywhere() {
        let content = "2\n0 0 0 10 10\n100 0 0 20 10\n2\n100 100 0 20 20\n0 100 0 10 20\n";
        let parsed = parse_correspondences(Cursor::new(content)).unwrap();
        assert_eq!(parsed.points_3d.len(), 4);
        assert_eq!(parsed.points_2d.len(), 4);
        assert!(parsed.skipped_lines.is_empty());
        assert_eq!(parsed.points_3d[2], Point3::new(100.0, 100.0, 0.0));
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "points.csv", "0 0 0\n");
        let err = read_correspondence_file(&path, PLANARITY_THRESHOLD).unwrap_err();
        assert!(matches!(err, CalibrationError::FileFormat(_)));
    }

    #[test]
    fn test_insufficient_points() {
        let dir = tempfile::tempdir().unwrap();
        let three = write_file(&dir, "three.txt", "0 0 0\n1 0 0\n0 1 0\n");
        assert!(matches!(
            read_correspondence_file(&three, PLANARITY_THRESHOLD),
            Err(CalibrationError::InsufficientPoints {
                found: 3,
                required: 4
            })
        ));

        // five points, not coplanar
        let five = write_file(
            &dir,
            "five.3dc",
            "0 0 0\n100 0 0\n100 100 0\n0 100 0\n50 50 180\n",
        );
        assert!(matches!(
            read_correspondence_file(&five, PLANARITY_THRESHOLD),
            Err(CalibrationError::InsufficientPoints {
                found: 5,
                required: 6
            })
        ));

        // four coplanar points are enough
        let four = write_file(&dir, "four.3DC", "0 0 0\n100 0 0\n100 100 0\n0 100 0\n");
        assert_eq!(
            read_correspondence_file(&four, PLANARITY_THRESHOLD)
                .unwrap()
                .points_3d
                .len(),
            4
        );
    }

    #[test]
    fn test_partial_image_points_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "mixed.txt",
            "0 0 0 10 10\n100 0 0 20 10\n100 100 0\n0 100 0 10 20\n",
        );
        assert!(matches!(
            read_correspondence_file(&path, PLANARITY_THRESHOLD),
            Err(CalibrationError::CountMismatch {
                points_3d: 4,
                points_2d: 3
            })
        ));
    }

    #[test]
    fn test_set_pairing() {
        let mut set = PointCorrespondenceSet::new(
            vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0)],
            Vec::new(),
        )
        .unwrap();
        assert!(!set.is_complete());
        assert!(set.set_points_2d(vec![Point2::origin()]).is_err());
        set.set_points_2d(vec![Point2::origin(), Point2::new(5.0, 0.0)])
            .unwrap();
        assert!(set.is_complete());
        assert_eq!(set.pairs().count(), 2);
    }

    #[test]
    fn test_preview_and_save_round_trip() {
        let set = PointCorrespondenceSet::new(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(120.5, 0.0, 0.0),
                Point3::new(120.5, 80.25, 0.0),
                Point3::new(0.0, 80.25, 0.0),
            ],
            vec![
                Point2::new(100.0, 200.0),
                Point2::new(400.125, 210.5),
                Point2::new(390.0, 420.0),
                Point2::new(110.0, 415.75),
            ],
        )
        .unwrap();

        let preview = set.preview();
        assert!(preview.starts_with("[1]: 0.0 0.0 0.0 100.000 200.000\n"));
        assert!(preview.contains("[2]: 120.5 0.0 0.0 400.125 210.500"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export").join("points.3dc");
        set.save(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("4\n"));

        let parsed = read_correspondence_file(&path, PLANARITY_THRESHOLD).unwrap();
        assert_eq!(parsed.points_3d, set.points_3d());
        assert_eq!(parsed.points_2d, set.points_2d());
    }
}
