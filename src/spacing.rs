//! Splitting of a sorted slice list at the first spacing irregularity.
//!
//! Volume assembly takes the offset between the first two slices as the
//! slice step and assumes every following slice continues that pattern.
//! [`analyze_spacing_assumption`] finds the longest prefix (minus repeats of
//! a position) for which this holds and defers everything else.

use std::path::{Path, PathBuf};

use dicom_dictionary_std::tags;
use tracing::debug;

use crate::{
    enums::GantryTiltHandling,
    gantry_tilt::GantryTiltInformation,
    geometry::{Point3D, Vector3D, parse_orientation_vectors, parse_point3d},
    tags::TagValueMap,
};

/// Largest distance in mm between a predicted and an actual origin.
///
/// Keeps the accumulated error below 1/10 mm over 20 slices.
pub const SPACING_TOLERANCE: f64 = 0.005;

/// Largest difference in degrees between the tilt recorded in
/// Gantry/Detector Tilt and the tilt computed from positions.
pub const RECORDED_TILT_TOLERANCE: f64 = 0.25;

/// Outcome of one analysis pass.
///
/// Every analyzed file ends up in exactly one of the two lists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SliceGroupingAnalysisResult {
    fits: Vec<PathBuf>,
    does_not_fit: Vec<PathBuf>,
    gantry_tilt: bool,
}

impl SliceGroupingAnalysisResult {
    /// Files forming one block with uniform spacing, in input order.
    pub fn fits(&self) -> &[PathBuf] {
        &self.fits
    }

    /// Files to analyze again in a following pass, in input order.
    pub fn does_not_fit(&self) -> &[PathBuf] {
        &self.does_not_fit
    }

    /// The accepted block needs gantry tilt correction.
    pub fn contains_gantry_tilt(&self) -> bool {
        self.gantry_tilt
    }

    pub fn into_parts(self) -> (Vec<PathBuf>, Vec<PathBuf>, bool) {
        (self.fits, self.does_not_fit, self.gantry_tilt)
    }

    /// Two slices are not enough evidence for a tilt: give the second one
    /// back for the next pass.
    fn undo_premature_grouping(&mut self) {
        if let Some(last) = self.fits.pop() {
            self.does_not_fit.insert(0, last);
        }
        self.gantry_tilt = false;
    }
}

/// State of the walk over the sorted files.
#[derive(Debug, Default)]
struct SpacingWalk {
    last_origin: Option<Point3D>,
    last_different_origin: Point3D,
    expected_step: Option<Vector3D>,
}

enum Verdict {
    Fits,
    FitsWithTilt,
    DoesNotFit,
}

/// Analyzes files of one orientation/spacing/size group, sorted with
/// [`crate::sorter::sort_slices`].
pub fn analyze_spacing_assumption(
    files: &[PathBuf],
    tilt_handling: GantryTiltHandling,
    tag_values: &TagValueMap,
) -> SliceGroupingAnalysisResult {
    let mut result = SliceGroupingAnalysisResult::default();
    let mut walk = SpacingWalk::default();

    debug!(
        "Analyzing {} files for uniform slice spacing (tilt handling: {tilt_handling:?})",
        files.len()
    );

    for (index, file) in files.iter().enumerate() {
        let Some(this_origin) = tag_values
            .value(file, tags::IMAGE_POSITION_PATIENT)
            .and_then(parse_point3d)
        else {
            if result.fits.is_empty() {
                // nothing with a position yet: this file is a block of its own
                debug!("  {} has no position, loading it as a single slice", file.display());
                result.fits.push(file.clone());
                result.does_not_fit.extend_from_slice(&files[index + 1..]);
                break;
            }
            debug!("  {} has no position, sorting it away", file.display());
            result.does_not_fit.push(file.clone());
            continue;
        };

        debug!("  {index} {} at {:?}", file.display(), this_origin.coords.as_slice());

        let verdict = match (walk.last_origin, walk.expected_step) {
            (None, _) => Verdict::Fits,
            (Some(last), _) if last == this_origin => {
                debug!("    ==> same position as before, sorting away for a separate time step");
                Verdict::DoesNotFit
            }
            (Some(_), None) => {
                walk.expected_step = Some(this_origin - walk.last_different_origin);
                check_tilt(
                    file,
                    &walk.last_different_origin,
                    &this_origin,
                    tilt_handling,
                    tag_values,
                )
            }
            (Some(_), Some(step)) => {
                let assumed_origin = walk.last_different_origin + step;
                let error = (assumed_origin - this_origin).norm();
                if error > SPACING_TOLERANCE {
                    debug!(
                        "    ==> expected {:?}, off by {error}, sorting away",
                        assumed_origin.coords.as_slice()
                    );
                    Verdict::DoesNotFit
                } else {
                    Verdict::Fits
                }
            }
        };

        let fits = match verdict {
            Verdict::Fits => true,
            Verdict::FitsWithTilt => {
                result.gantry_tilt = true;
                true
            }
            Verdict::DoesNotFit => false,
        };
        if fits {
            result.fits.push(file.clone());
        } else {
            result.does_not_fit.push(file.clone());
        }

        let moved = walk.last_origin.is_some_and(|last| last != this_origin);
        if walk.last_origin.is_none() || (fits && moved) {
            walk.last_different_origin = this_origin;
        }
        walk.last_origin = Some(this_origin);
    }

    if result.gantry_tilt && result.fits.len() == 2 {
        debug!("  only two tilted slices, not enough to group them");
        result.undo_premature_grouping();
    }

    result
}

/// Decides about the second distinct position, the one that fixes the step.
fn check_tilt(
    file: &Path,
    last_different_origin: &Point3D,
    this_origin: &Point3D,
    tilt_handling: GantryTiltHandling,
    tag_values: &TagValueMap,
) -> Verdict {
    let Some((right, up)) = tag_values
        .value(file, tags::IMAGE_ORIENTATION_PATIENT)
        .and_then(parse_orientation_vectors)
    else {
        // without an orientation nothing can be said about shearing
        return Verdict::Fits;
    };

    let tilt = GantryTiltInformation::new(last_different_origin, this_origin, &right, &up, 1);
    if !tilt.is_sheared() {
        return Verdict::Fits;
    }

    debug!(
        "    slices are sheared: right {}, up {}, normal {}",
        tilt.shift_right(),
        tilt.shift_up(),
        tilt.shift_normal()
    );

    if tilt_handling != GantryTiltHandling::Group || !tilt.is_regular_gantry_tilt() {
        debug!("    ==> not a groupable gantry tilt, sorting away");
        return Verdict::DoesNotFit;
    }

    let recorded_angle = tag_values
        .value(file, tags::GANTRY_DETECTOR_TILT)
        .and_then(|angle| angle.trim().parse::<f64>().ok());
    if let Some(angle) = recorded_angle {
        let computed = tilt.tilt_angle_degrees();
        debug!("    recorded tilt {angle} deg, computed {computed} deg");
        if (angle.abs() - computed).abs() > RECORDED_TILT_TOLERANCE {
            debug!("    ==> tilt does not match the recorded gantry tilt, sorting away");
            return Verdict::DoesNotFit;
        }
    }

    Verdict::FitsWithTilt
}
