//! Detection of gantry tilt between two slices.
//!
//! Two slices of a rectilinear stack have origins on a common line along
//! the slice normal. With a tilted CT gantry the origins drift along the
//! column direction from slice to slice, any other drift means the stack
//! is sheared irregularly.

use crate::geometry::{Point3D, Vector3D, project_point_on_line, slice_normal};

/// Distance in mm above which two origins count as not aligned.
///
/// Much coarser than floating point precision: sub-millimeter tilts have to
/// be told apart from rounding in the position tags.
pub const TILT_TOLERANCE: f64 = 0.001;

/// Relationship between two slice poses that are `number_of_slices_apart`
/// slice steps away from each other.
///
/// All shift values are totals over that distance. Use the per-slice
/// accessors for values that do not depend on it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GantryTiltInformation {
    shift_up: f64,
    shift_right: f64,
    shift_normal: f64,
    number_of_slices_apart: u32,
}

impl GantryTiltInformation {
    /// `right` and `up` are the row and column directions of the first slice.
    ///
    /// # Panics
    ///
    /// Panics if `number_of_slices_apart` is zero.
    pub fn new(
        origin1: &Point3D,
        origin2: &Point3D,
        right: &Vector3D,
        up: &Vector3D,
        number_of_slices_apart: u32,
    ) -> Self {
        assert!(
            number_of_slices_apart >= 1,
            "slices must be at least one step apart"
        );

        let normal = slice_normal(right, up);
        let projection_normal = project_point_on_line(origin1, origin2, &normal);
        let shift_normal = (projection_normal - origin2).norm();

        let mut info = Self {
            shift_up: 0.0,
            shift_right: 0.0,
            shift_normal,
            number_of_slices_apart,
        };

        // distance of origin1 from the line through origin2 along the normal
        let distance = (origin1 - projection_normal).norm();
        if distance > TILT_TOLERANCE {
            let projection_right = project_point_on_line(origin1, origin2, right);
            info.shift_right = (projection_right - origin2).norm();
            // signed, so that the correction knows the direction of the tilt
            info.shift_up = (origin1 - origin2).dot(up) / up.norm();
        }

        info
    }

    pub fn shift_up(&self) -> f64 {
        self.shift_up
    }

    pub fn shift_right(&self) -> f64 {
        self.shift_right
    }

    pub fn shift_normal(&self) -> f64 {
        self.shift_normal
    }

    pub fn number_of_slices_apart(&self) -> u32 {
        self.number_of_slices_apart
    }

    /// The origins are not on a line along the slice normal.
    pub fn is_sheared(&self) -> bool {
        self.shift_right.abs() > TILT_TOLERANCE || self.shift_up.abs() > TILT_TOLERANCE
    }

    /// Shear purely along the column direction, as produced by a tilted gantry.
    pub fn is_regular_gantry_tilt(&self) -> bool {
        self.shift_right.abs() <= TILT_TOLERANCE && self.shift_up.abs() > TILT_TOLERANCE
    }

    /// Offset in mm along the column direction per slice.
    pub fn matrix_coefficient(&self) -> f64 {
        self.shift_up / f64::from(self.number_of_slices_apart)
    }

    /// Physical distance between neighboring slices along the normal.
    pub fn real_z_spacing(&self) -> f64 {
        self.shift_normal / f64::from(self.number_of_slices_apart)
    }

    /// Extra extent needed along the column direction so that a tilt
    /// corrected volume does not clip.
    pub fn tilt_corrected_additional_size(&self) -> u32 {
        self.shift_up.abs().floor() as u32 + 1
    }

    /// Zero without a shift along the column direction, 90 degrees for a
    /// shift within the slice plane.
    pub fn tilt_angle_degrees(&self) -> f64 {
        if self.shift_up == 0.0 {
            return 0.0;
        }
        (self.shift_up.abs() / self.shift_normal).atan().to_degrees()
    }
}
