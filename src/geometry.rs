//! Parsing of DICOM geometry tags and a few helpers on points and vectors.
//!
//! DICOM stores multi-valued decimal strings separated by backslashes, e.g.
//! Image Position (Patient) as `-120.5\-98.2\34.0`. Parsing here is
//! permissive: a field that is not a number reads as `0.0`, only a missing
//! field makes the whole value unusable.

use nalgebra::{Point3, Vector3};

pub type Point3D = Point3<f64>;
pub type Vector3D = Vector3<f64>;

/// Splits a DICOM multi-value string and parses at most `max_fields` of its
/// components. Malformed numbers become `0.0`.
fn parse_fields(value: &str, max_fields: usize) -> Vec<f64> {
    value
        .split('\\')
        .take(max_fields)
        .map(|field| field.trim().parse::<f64>().unwrap_or(0.0))
        .collect()
}

/// Parses Image Position (Patient) style values.
///
/// Returns `None` if fewer than three fields are present. Additional fields
/// are ignored.
pub fn parse_point3d(value: &str) -> Option<Point3D> {
    let fields = parse_fields(value, 3);
    if fields.len() < 3 {
        return None;
    }
    Some(Point3D::new(fields[0], fields[1], fields[2]))
}

/// Parses Image Orientation (Patient) into the row direction ("right") and
/// the column direction ("up").
///
/// Returns `None` if fewer than six fields are present.
pub fn parse_orientation_vectors(value: &str) -> Option<(Vector3D, Vector3D)> {
    let fields = parse_fields(value, 6);
    if fields.len() < 6 {
        return None;
    }
    let right = Vector3D::new(fields[0], fields[1], fields[2]);
    let up = Vector3D::new(fields[3], fields[4], fields[5]);
    Some((right, up))
}

/// Parses Pixel Spacing as `(row spacing, column spacing)`.
///
/// Components that are missing, malformed or not positive default to `1.0`.
pub fn parse_pixel_spacing(value: &str) -> (f64, f64) {
    let mut spacing = value.split('\\').map(|field| {
        field
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|s| *s > 0.0)
            .unwrap_or(1.0)
    });
    let row = spacing.next().unwrap_or(1.0);
    let col = spacing.next().unwrap_or(1.0);
    (row, col)
}

/// Normal of a slice plane given its row and column directions.
pub fn slice_normal(right: &Vector3D, up: &Vector3D) -> Vector3D {
    right.cross(up)
}

/// Orthogonal projection of `point` onto the line through `line_origin`
/// along `line_direction`. The direction does not need to be normalized.
pub fn project_point_on_line(
    point: &Point3D,
    line_origin: &Point3D,
    line_direction: &Vector3D,
) -> Point3D {
    let origin_to_point = point - line_origin;
    let factor = origin_to_point.dot(line_direction) / line_direction.norm_squared();
    line_origin + line_direction * factor
}
