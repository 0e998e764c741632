//! Spatial ordering of slices that share one orientation.
//!
//! Slices are ordered by the distance of their origin from the world origin,
//! measured along the common slice normal. Slices at the same position are
//! ordered by acquisition time if all of them carry one, otherwise by
//! acquisition number if all of them carry one, otherwise they keep their
//! input order.

use std::{
    cmp::Ordering,
    path::{Path, PathBuf},
};

use dicom_dictionary_std::tags;
use thiserror::Error;

use crate::{
    geometry::{Point3D, Vector3D, parse_orientation_vectors, parse_point3d, slice_normal},
    tags::TagValueMap,
};

/// Largest per-component difference of two orientations that still counts
/// as the same orientation.
pub const ORIENTATION_TOLERANCE: f64 = 1e-4;

/// Positions closer than this along the normal are treated as equal.
pub const POSITION_EPSILON: f64 = 1e-9;

/// The input was not grouped by orientation before sorting.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SortError {
    #[error("{} has no usable image position or orientation", .0.display())]
    MissingGeometry(PathBuf),

    #[error(
        "{} and {} have different image orientations, group them first",
        .first.display(),
        .second.display()
    )]
    OrientationMismatch { first: PathBuf, second: PathBuf },
}

#[derive(Debug, Clone)]
struct SlicePose {
    origin: Point3D,
    right: Vector3D,
    up: Vector3D,
    acquisition_time: Option<f64>,
    acquisition_number: Option<f64>,
}

impl SlicePose {
    fn read(path: &Path, tag_values: &TagValueMap) -> Result<Self, SortError> {
        let missing = || SortError::MissingGeometry(path.to_path_buf());
        let tag_set = tag_values.get(path).ok_or_else(missing)?;

        let origin = tag_set
            .get(tags::IMAGE_POSITION_PATIENT)
            .and_then(parse_point3d)
            .ok_or_else(missing)?;
        let (right, up) = tag_set
            .get(tags::IMAGE_ORIENTATION_PATIENT)
            .and_then(parse_orientation_vectors)
            .ok_or_else(missing)?;

        Ok(Self {
            origin,
            right,
            up,
            acquisition_time: tag_set.get(tags::ACQUISITION_TIME).and_then(parse_time),
            acquisition_number: tag_set
                .get(tags::ACQUISITION_NUMBER)
                .and_then(|n| n.trim().parse().ok()),
        })
    }

    fn same_orientation(&self, other: &Self) -> bool {
        let close = |a: &Vector3D, b: &Vector3D| {
            a.iter()
                .zip(b.iter())
                .all(|(x, y)| (x - y).abs() <= ORIENTATION_TOLERANCE)
        };
        close(&self.right, &other.right) && close(&self.up, &other.up)
    }

    fn distance_along(&self, normal: &Vector3D) -> f64 {
        self.origin.coords.dot(normal)
    }
}

/// DICOM TM values (`HHMMSS.FFFFFF`, older files use `HH:MM:SS`) compared as
/// numbers.
fn parse_time(value: &str) -> Option<f64> {
    value.trim().replace(':', "").parse().ok()
}

fn tie_break(a: &SlicePose, b: &SlicePose) -> Ordering {
    if let (Some(ta), Some(tb)) = (a.acquisition_time, b.acquisition_time) {
        return ta.total_cmp(&tb);
    }
    if let (Some(na), Some(nb)) = (a.acquisition_number, b.acquisition_number) {
        return na.total_cmp(&nb);
    }
    Ordering::Equal
}

/// Order of a run of slices at one position, chosen for the whole run so
/// that it is a total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TieBreak {
    AcquisitionTime,
    AcquisitionNumber,
    InputOrder,
}

impl TieBreak {
    fn for_run<'a>(run: impl Iterator<Item = &'a SlicePose> + Clone) -> Self {
        if run.clone().all(|pose| pose.acquisition_time.is_some()) {
            Self::AcquisitionTime
        } else if run.clone().all(|pose| pose.acquisition_number.is_some()) {
            Self::AcquisitionNumber
        } else {
            Self::InputOrder
        }
    }

    fn key(self, pose: &SlicePose) -> Option<f64> {
        match self {
            Self::AcquisitionTime => pose.acquisition_time,
            Self::AcquisitionNumber => pose.acquisition_number,
            Self::InputOrder => None,
        }
    }

    fn compare(self, a: &SlicePose, b: &SlicePose) -> Ordering {
        match (self.key(a), self.key(b)) {
            (Some(ka), Some(kb)) => ka.total_cmp(&kb),
            _ => Ordering::Equal,
        }
    }
}

fn compare_poses(a: &SlicePose, b: &SlicePose, normal: &Vector3D) -> Ordering {
    let dist_a = a.distance_along(normal);
    let dist_b = b.distance_along(normal);
    if (dist_a - dist_b).abs() >= POSITION_EPSILON {
        dist_a.total_cmp(&dist_b)
    } else {
        tie_break(a, b)
    }
}

/// Compares two slices of the same orientation.
///
/// At equal positions the pair is compared by acquisition time if both
/// carry one, otherwise by acquisition number. This is not transitive over
/// more than two slices, [`sort_slices`] orders whole runs instead.
///
/// Fails if either slice lacks position or orientation, or if their
/// orientations differ.
pub fn compare_slices(
    a: &Path,
    b: &Path,
    tag_values: &TagValueMap,
) -> Result<Ordering, SortError> {
    let pose_a = SlicePose::read(a, tag_values)?;
    let pose_b = SlicePose::read(b, tag_values)?;
    if !pose_a.same_orientation(&pose_b) {
        return Err(SortError::OrientationMismatch {
            first: a.to_path_buf(),
            second: b.to_path_buf(),
        });
    }
    let normal = slice_normal(&pose_a.right, &pose_a.up);
    Ok(compare_poses(&pose_a, &pose_b, &normal))
}

/// Sorts a pre-grouped list of slices along their common normal.
///
/// The sort is stable: slices that compare equal keep their input order.
pub fn sort_slices(
    files: &[PathBuf],
    tag_values: &TagValueMap,
) -> Result<Vec<PathBuf>, SortError> {
    let mut poses = files
        .iter()
        .map(|path| SlicePose::read(path, tag_values).map(|pose| (path, pose)))
        .collect::<Result<Vec<_>, _>>()?;

    let Some((first_path, first_pose)) = poses.first() else {
        return Ok(Vec::new());
    };
    if let Some((path, _)) = poses
        .iter()
        .find(|(_, pose)| !first_pose.same_orientation(pose))
    {
        return Err(SortError::OrientationMismatch {
            first: first_path.to_path_buf(),
            second: path.to_path_buf(),
        });
    }

    let normal = slice_normal(&first_pose.right, &first_pose.up);
    poses.sort_by(|(_, a), (_, b)| {
        a.distance_along(&normal).total_cmp(&b.distance_along(&normal))
    });

    for run in poses.chunk_by_mut(|(_, a), (_, b)| {
        b.distance_along(&normal) - a.distance_along(&normal) < POSITION_EPSILON
    }) {
        let order = TieBreak::for_run(run.iter().map(|(_, pose)| pose));
        run.sort_by(|(_, a), (_, b)| order.compare(a, b));
    }

    Ok(poses.into_iter().map(|(path, _)| path.clone()).collect())
}
