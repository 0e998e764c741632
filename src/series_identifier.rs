//! Keys that separate slices which can never share one volume.
//!
//! A Series Instance UID alone is not enough: scanners put localizers,
//! different reconstructions or resized images into one series. The key
//! therefore also carries rows, columns, pixel spacing, slice thickness and
//! orientation.

use dicom::core::Tag;
use dicom_dictionary_std::tags;
use thiserror::Error;

use crate::{geometry::parse_orientation_vectors, tags::SliceTagSet};

/// Decimal places of orientation components that take part in the key.
/// Some scanners let the orientation of one series drift in the 7th digit.
pub const ORIENTATION_PRECISION: usize = 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SeriesIdentifierError {
    #[error("Missing Series Instance UID")]
    MissingSeriesUid,

    #[error("Series Instance UID {0:?} has no usable characters")]
    UnusableSeriesUid(String),
}

/// Keeps `[A-Za-z0-9.]` and appends the `.` separator.
///
/// Empty values give an empty part, so absent tags do not change the key.
fn identifier_part(value: &str) -> String {
    let mut part: String = value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '.')
        .collect();
    if !part.is_empty() {
        part.push('.');
    }
    part
}

/// Orientation rounded to [`ORIENTATION_PRECISION`] digits. Signs are
/// spelled out as `n` so that flipped orientations keep different keys.
fn orientation_part(value: &str) -> String {
    let Some((right, up)) = parse_orientation_vectors(value) else {
        return identifier_part(value);
    };
    let simplified = right
        .iter()
        .chain(up.iter())
        .map(|component| {
            let rounded = format!("{component:.ORIENTATION_PRECISION$}");
            match rounded.strip_prefix('-') {
                Some(magnitude) if magnitude.chars().any(|c| c.is_ascii_digit() && c != '0') => {
                    format!("n{magnitude}")
                }
                Some(magnitude) => magnitude.to_string(),
                None => rounded,
            }
        })
        .collect::<Vec<_>>()
        .join("\\");
    identifier_part(&simplified)
}

/// Builds the grouping key of one file.
///
/// `restrictions` are additional tags whose values are appended to the key.
pub fn create_series_identifier(
    tag_set: &SliceTagSet,
    restrictions: &[Tag],
) -> Result<String, SeriesIdentifierError> {
    let uid = tag_set
        .get(tags::SERIES_INSTANCE_UID)
        .ok_or(SeriesIdentifierError::MissingSeriesUid)?;

    let mut identifier = identifier_part(uid);
    if identifier.is_empty() {
        return Err(SeriesIdentifierError::UnusableSeriesUid(uid.to_string()));
    }

    for tag in [
        tags::ROWS,
        tags::COLUMNS,
        tags::PIXEL_SPACING,
        tags::SLICE_THICKNESS,
    ] {
        identifier += &identifier_part(tag_set.get(tag).unwrap_or_default());
    }
    if let Some(orientation) = tag_set.get(tags::IMAGE_ORIENTATION_PATIENT) {
        identifier += &orientation_part(orientation);
    }
    for tag in restrictions {
        identifier += &identifier_part(tag_set.get(*tag).unwrap_or_default());
    }

    identifier.pop();
    Ok(identifier)
}
