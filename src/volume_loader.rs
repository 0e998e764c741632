use crate::{
    enums::GantryTiltHandling,
    geometry::{
        Point3D, parse_orientation_vectors, parse_pixel_spacing, parse_point3d, slice_normal,
    },
    series_grouping::{GroupingOptions, ImageBlockDescriptor, get_series_from_directory},
    tags::{DicomTagScanner, ScanError},
    volume::Volume,
};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use nalgebra::Matrix3;
use ndarray::{Array2, Array4, s};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("Block {0} has no files")]
    EmptyBlock(String),

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("Missing position or orientation in {0}")]
    MissingGeometry(PathBuf),

    #[error("Could not decode pixel data of {0}")]
    PixelData(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),
}

/// One decoded slice with the geometry tags volume assembly needs.
struct LoadedSlice {
    image: Array2<u16>,
    origin: Option<Point3D>,
    orientation: Option<String>,
    pixel_spacing: Option<String>,
    slice_thickness: Option<f64>,
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load the pixel data of a grouped block
    ///
    /// # Arguments
    ///
    /// * `block` - Block produced by [`crate::get_series`]
    ///
    /// # Errors
    ///
    /// Returns error if a file cannot be read or decoded, if slice dimensions
    /// differ, or if the first slice has no usable geometry
    pub fn load_block(block: &ImageBlockDescriptor) -> Result<Volume, VolumeLoaderError> {
        if block.files().is_empty() {
            return Err(VolumeLoaderError::EmptyBlock(block.key().to_string()));
        }

        let slices = block
            .files()
            .par_iter()
            .map(|path| Self::load_slice(path))
            .collect::<Result<Vec<_>, _>>()?;

        Self::validate_dimensions(&slices)?;

        let first_path = &block.files()[0];
        let first = &slices[0];
        let missing = || VolumeLoaderError::MissingGeometry(first_path.clone());
        let origin = first.origin.ok_or_else(missing)?;
        let (right, up) = first
            .orientation
            .as_deref()
            .and_then(parse_orientation_vectors)
            .ok_or_else(missing)?;
        let normal = slice_normal(&right, &up).normalize();

        let (row_spacing, col_spacing) = first
            .pixel_spacing
            .as_deref()
            .map_or((1.0, 1.0), parse_pixel_spacing);
        let z_spacing = Self::get_z_spacing(block, &slices, &normal);

        let data = Self::build_volume_array(&slices, block.number_of_time_steps());
        let direction = Matrix3::from_columns(&[right.normalize(), up.normalize(), normal]);

        Ok(Volume::new(
            data,
            (col_spacing, row_spacing, z_spacing),
            origin,
            direction,
            block.gantry_tilt().copied(),
        ))
    }

    /// Group a directory and load every block found in it
    ///
    /// Blocks that cannot be loaded are skipped with a warning.
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        options: &GroupingOptions,
    ) -> Result<Vec<(String, Volume)>, VolumeLoaderError> {
        let grouping = get_series_from_directory(path, &DicomTagScanner, options)?;

        let volumes: Vec<_> = grouping
            .blocks()
            .filter_map(|block| match Self::load_block(block) {
                Ok(volume) => Some((block.key().to_string(), volume)),
                Err(err) => {
                    warn!("Could not load block {}: {err}", block.key());
                    None
                }
            })
            .collect();

        info!("Loaded {} of {} blocks", volumes.len(), grouping.len());
        Ok(volumes)
    }

    /// Load the first block of a directory, with tilted series grouped
    pub fn load_first_from_directory(path: impl AsRef<Path>) -> Result<Volume, VolumeLoaderError> {
        let path = path.as_ref();
        let options = GroupingOptions::new().with_gantry_tilt(GantryTiltHandling::Group);
        let grouping = get_series_from_directory(path, &DicomTagScanner, &options)?;
        let block = grouping
            .blocks()
            .next()
            .ok_or_else(|| VolumeLoaderError::EmptyBlock(path.display().to_string()))?;
        Self::load_block(block)
    }

    fn load_slice(path: &Path) -> Result<LoadedSlice, VolumeLoaderError> {
        let dicom_object = open_file(path)?;
        let image = Self::decode_image(&dicom_object)
            .ok_or_else(|| VolumeLoaderError::PixelData(path.to_path_buf()))?;

        Ok(LoadedSlice {
            image,
            origin: Self::get_string(&dicom_object, tags::IMAGE_POSITION_PATIENT)
                .as_deref()
                .and_then(parse_point3d),
            orientation: Self::get_string(&dicom_object, tags::IMAGE_ORIENTATION_PATIENT),
            pixel_spacing: Self::get_string(&dicom_object, tags::PIXEL_SPACING),
            slice_thickness: Self::get_string(&dicom_object, tags::SLICE_THICKNESS)
                .and_then(|t| t.trim().parse().ok()),
        })
    }

    fn get_string(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        tag: dicom::core::Tag,
    ) -> Option<String> {
        dicom_object
            .element(tag)
            .ok()?
            .to_str()
            .ok()
            .map(|s| s.trim_matches(|c| c == ' ' || c == '\0').to_string())
    }

    fn decode_image(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Array2<u16>> {
        let pixel_data = dicom_object.decode_pixel_data().ok()?;
        let options = ConvertOptions::new()
            .with_modality_lut(ModalityLutOption::None)
            .with_voi_lut(VoiLutOption::Identity);
        pixel_data
            .to_ndarray_with_options::<u16>(&options)
            .ok()
            .map(|arr| arr.slice_move(s![0, .., .., 0]))
    }

    /// Slice distance along the normal. Tilted blocks use the spacing
    /// measured by the tilt analysis, single slices fall back to the slice
    /// thickness.
    fn get_z_spacing(
        block: &ImageBlockDescriptor,
        slices: &[LoadedSlice],
        normal: &nalgebra::Vector3<f64>,
    ) -> f64 {
        if let Some(tilt) = block.gantry_tilt() {
            return tilt.real_z_spacing();
        }
        if block.slices_per_time_step() > 1 {
            if let (Some(first), Some(second)) = (slices[0].origin, slices[1].origin) {
                let distance = (second - first).dot(normal).abs();
                if distance > 0.0 {
                    return distance;
                }
            }
        }
        slices[0].slice_thickness.filter(|t| *t > 0.0).unwrap_or(1.0)
    }

    fn validate_dimensions(slices: &[LoadedSlice]) -> Result<(), VolumeLoaderError> {
        let first_dim = slices[0].image.dim();
        if slices.iter().any(|slice| slice.image.dim() != first_dim) {
            return Err(VolumeLoaderError::InconsistentDimensions);
        }
        Ok(())
    }

    fn build_volume_array(slices: &[LoadedSlice], time_steps: usize) -> Array4<u16> {
        let (height, width) = slices[0].image.dim();
        let depth = slices.len() / time_steps;
        let mut volume = Array4::<u16>::zeros((time_steps, depth, height, width));

        for (i, slice) in slices.iter().enumerate() {
            volume
                .slice_mut(s![i / depth, i % depth, .., ..])
                .assign(&slice.image);
        }

        volume
    }
}
