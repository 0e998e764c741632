//! # DICOM series grouping library
//!
//! This crate sorts a flat list of DICOM files into blocks that can each be
//! loaded as one regular 3D (or 3D+t) volume.
//!
//! Files of one Series Instance UID are not necessarily one volume.
//! Scanners put localizers, resized reconstructions, slices with gaps or
//! several time steps into a single series. Grouping therefore:
//!  - buckets files by a key built from UID, image size, pixel spacing,
//!    slice thickness and orientation
//!  - sorts each bucket along the slice normal
//!  - splits each bucket into blocks of equal slice distance, optionally
//!    keeping CT series acquired with a tilted gantry together
//!  - merges blocks that cover the same positions into 3D+t blocks
//!
//! Tag values are read once per file with dicom-rs, in parallel using rayon.
//! The grouping itself works on the scanned values only, so it can be fed
//! with tag values from any other source through [`TagValueMap`].
//!
//! Blocks are loaded into a [`Volume`] by the [`VolumeLoader`]. Volumes can
//! be sliced in the three medical axes:
//!  - Axial
//!  - Coronal
//!  - Sagittal
//!
//! # Examples
//!
//! ## Grouping a directory
//!
//! Group all files of the dicom/ directory and save the center image of the
//! first block.
//!
//! ```no_run
//! # use dicom_series_grouping::{
//! #     DicomTagScanner, GroupingOptions, Orientation, VolumeLoader, get_series_from_directory,
//! # };
//! let grouping = get_series_from_directory("dicom", &DicomTagScanner, &GroupingOptions::new())
//!     .expect("should have scanned directory");
//! for block in grouping.blocks() {
//!     println!("{}: {} files", block.key(), block.files().len());
//! }
//!
//! let block = grouping.blocks().next().expect("should have found a block");
//! let volume = VolumeLoader::load_block(block).expect("should have loaded block");
//! let image = volume
//!     .get_image_from_axis(0, volume.dim().1 / 2, Orientation::Axial)
//!     .expect("should have returned image at center of volume");
//! image.save("result.png").expect("should have saved image");
//! ```
//!
//! ## Grouping scanned tag values
//!
//! ```
//! # use dicom_series_grouping::{GroupingOptions, SliceTagSet, TagValueMap, get_series};
//! # use dicom_dictionary_std::tags;
//! # use std::path::PathBuf;
//! let slice = |z: f64| {
//!     SliceTagSet::new()
//!         .with(tags::SERIES_INSTANCE_UID, "1.2.3")
//!         .with(tags::IMAGE_ORIENTATION_PATIENT, "1\\0\\0\\0\\1\\0")
//!         .with(tags::IMAGE_POSITION_PATIENT, format!("0\\0\\{z}"))
//! };
//! let tag_values: TagValueMap = [("a", slice(2.0)), ("b", slice(0.0)), ("c", slice(1.0))]
//!     .into_iter()
//!     .collect();
//! let files: Vec<PathBuf> = ["a", "b", "c"].iter().map(PathBuf::from).collect();
//!
//! let grouping = get_series(&files, &tag_values, &GroupingOptions::new());
//! assert_eq!(grouping.len(), 1);
//! let block = grouping.blocks().next().unwrap();
//! assert_eq!(block.files(), &[
//!     PathBuf::from("b"),
//!     PathBuf::from("c"),
//!     PathBuf::from("a")
//! ]);
//! ```

pub mod enums;
pub mod gantry_tilt;
pub mod geometry;
pub mod series_grouping;
pub mod series_identifier;
pub mod sorter;
pub mod spacing;
pub mod tags;
pub mod volume;
pub mod volume_loader;

pub use enums::{GantryTiltHandling, Orientation, TimeSeriesHandling};
pub use gantry_tilt::GantryTiltInformation;
pub use series_grouping::{
    GroupingOptions, ImageBlockDescriptor, SeriesGrouping, UidFileNamesMap, get_series,
    get_series_from_directory, get_series_from_files, list_directory,
};
pub use series_identifier::{SeriesIdentifierError, create_series_identifier};
pub use sorter::{SortError, sort_slices};
pub use spacing::{SliceGroupingAnalysisResult, analyze_spacing_assumption};
pub use tags::{DicomTagScanner, ScanError, SliceTagSet, TagScanner, TagValueMap};
pub use volume::Volume;
pub use volume_loader::{VolumeLoader, VolumeLoaderError};
