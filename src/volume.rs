use crate::enums::Orientation;
use crate::gantry_tilt::GantryTiltInformation;
use crate::geometry::Point3D;

use image::GrayImage;
use nalgebra::Matrix3;
use ndarray::Array4;
use ndarray::ArrayView2;
use ndarray::s;
use rayon::prelude::*;

/// Pixel data of one block together with its placement in patient space.
#[derive(Debug, Clone)]
pub struct Volume {
    /// Indexed as (time, depth, height, width).
    pub data: Array4<u16>,
    /// Spacing in mm as (x, y, z): between columns, between rows, between
    /// slices.
    pub spacing: (f64, f64, f64),
    /// Position of the first voxel of the first slice.
    pub origin: Point3D,
    /// Row direction, column direction and slice normal as columns.
    pub direction: Matrix3<f64>,
    pub gantry_tilt: Option<GantryTiltInformation>,
    value_range: (u16, u16),
}

impl Volume {
    pub fn new(
        data: Array4<u16>,
        spacing: (f64, f64, f64),
        origin: Point3D,
        direction: Matrix3<f64>,
        gantry_tilt: Option<GantryTiltInformation>,
    ) -> Self {
        let value_range = data
            .par_iter()
            .fold(
                || (u16::MAX, u16::MIN),
                |(min, max), &v| (min.min(v), max.max(v)),
            )
            .reduce(
                || (u16::MAX, u16::MIN),
                |(min_a, max_a), (min_b, max_b)| (min_a.min(min_b), max_a.max(max_b)),
            );
        Self {
            data,
            spacing,
            origin,
            direction,
            gantry_tilt,
            value_range,
        }
    }

    /// Get the dimensions of the volume (time, depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize, usize) {
        self.data.dim()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array4<u16> {
        &self.data
    }

    /// Get a mutable reference to the underlying data
    pub fn data_mut(&mut self) -> &mut Array4<u16> {
        &mut self.data
    }

    pub fn number_of_time_steps(&self) -> usize {
        self.data.dim().0
    }

    /// Smallest and largest stored value.
    pub fn value_range(&self) -> (u16, u16) {
        self.value_range
    }

    /// Offset in mm along the column direction that moves slice `index` of
    /// a tilted volume back under the first slice. Zero without tilt.
    pub fn tilt_offset(&self, index: usize) -> f64 {
        self.gantry_tilt
            .map_or(0.0, |tilt| tilt.matrix_coefficient() * index as f64)
    }

    #[inline]
    fn normalize_to_u8(value: u16, (min, max): (u16, u16)) -> u8 {
        if max <= min {
            return 0;
        }
        let scaled = f32::from(value.saturating_sub(min)) / f32::from(max - min);
        (scaled * 255.0).clamp(0.0, 255.0) as u8
    }

    pub fn get_slice_from_axis(
        &self,
        time: usize,
        index: usize,
        orientation: &Orientation,
    ) -> Option<ArrayView2<'_, u16>> {
        if !self.is_valid_index(time, index, orientation) {
            return None;
        }
        let slice_result = match orientation {
            Orientation::Axial => self.data().slice(s![time, index, .., ..]),
            Orientation::Coronal => self.data().slice(s![time, .., index, ..]),
            Orientation::Sagittal => self.data().slice(s![time, .., .., index]),
        };
        Some(slice_result)
    }

    // Stretches the value range of the whole volume onto 0..=255
    fn slice_to_image(&self, slice: &ArrayView2<'_, u16>) -> Option<GrayImage> {
        let (height, width) = slice.dim();
        let range = self.value_range;
        let pixel_data: Vec<u8> = slice
            .into_par_iter()
            .map(|&v| Self::normalize_to_u8(v, range))
            .collect();
        GrayImage::from_raw(width as u32, height as u32, pixel_data)
    }

    /// 8-bit rendering of one slice, without interpolation.
    pub fn get_image_from_axis(
        &self,
        time: usize,
        index: usize,
        orientation: Orientation,
    ) -> Option<GrayImage> {
        let slice = self.get_slice_from_axis(time, index, &orientation)?;
        self.slice_to_image(&slice)
    }

    fn is_valid_index(&self, time: usize, index: usize, orientation: &Orientation) -> bool {
        let dim = self.data.dim();
        let max_index = match orientation {
            Orientation::Axial => dim.1,
            Orientation::Coronal => dim.2,
            Orientation::Sagittal => dim.3,
        };
        time < dim.0 && index < max_index
    }
}
