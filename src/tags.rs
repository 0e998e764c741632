//! Tag values scanned from DICOM files.
//!
//! The grouping logic never touches DICOM files itself. It works on a
//! [`TagValueMap`], the raw string values of a handful of tags per file,
//! produced once by a [`TagScanner`].

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use dicom::{core::Tag, object::OpenFileOptions};
use dicom_dictionary_std::tags;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, trace};

/// Tags that decide whether two slices can be part of the same volume.
pub const GROUPING_TAGS: [Tag; 6] = [
    tags::SERIES_INSTANCE_UID,
    tags::IMAGE_ORIENTATION_PATIENT,
    tags::PIXEL_SPACING,
    tags::SLICE_THICKNESS,
    tags::ROWS,
    tags::COLUMNS,
];

/// Tags read in the same scan for sorting, spacing analysis and block
/// description. They never separate files on their own.
pub const ANALYSIS_TAGS: [Tag; 7] = [
    tags::IMAGE_POSITION_PATIENT,
    tags::ACQUISITION_TIME,
    tags::ACQUISITION_NUMBER,
    tags::SOP_INSTANCE_UID,
    tags::SOP_CLASS_UID,
    tags::MODALITY,
    tags::GANTRY_DETECTOR_TILT,
];

/// Human readable names for the tags above, used in log output.
const TAG_NAMES: [(Tag, &str); 13] = [
    (tags::SERIES_INSTANCE_UID, "SeriesInstanceUID"),
    (tags::IMAGE_ORIENTATION_PATIENT, "ImageOrientationPatient"),
    (tags::PIXEL_SPACING, "PixelSpacing"),
    (tags::SLICE_THICKNESS, "SliceThickness"),
    (tags::ROWS, "Rows"),
    (tags::COLUMNS, "Columns"),
    (tags::IMAGE_POSITION_PATIENT, "ImagePositionPatient"),
    (tags::ACQUISITION_TIME, "AcquisitionTime"),
    (tags::ACQUISITION_NUMBER, "AcquisitionNumber"),
    (tags::SOP_INSTANCE_UID, "SOPInstanceUID"),
    (tags::SOP_CLASS_UID, "SOPClassUID"),
    (tags::MODALITY, "Modality"),
    (tags::GANTRY_DETECTOR_TILT, "GantryDetectorTilt"),
];

/// Name of a known tag, or its `(gggg,eeee)` form.
pub fn tag_name(tag: Tag) -> String {
    TAG_NAMES
        .iter()
        .find(|(t, _)| *t == tag)
        .map(|(_, name)| (*name).to_string())
        .unwrap_or_else(|| format!("({:04X},{:04X})", tag.group(), tag.element()))
}

/// Every tag a grouping run needs, followed by caller restrictions.
pub fn scan_tags(restrictions: &[Tag]) -> Vec<Tag> {
    let mut scan: Vec<Tag> = GROUPING_TAGS.iter().chain(&ANALYSIS_TAGS).copied().collect();
    for tag in restrictions {
        if !scan.contains(tag) {
            scan.push(*tag);
        }
    }
    scan
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),
}

/// Raw tag values of one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SliceTagSet {
    values: HashMap<Tag, String>,
}

impl SliceTagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder style insert, convenient for tests and pre-scanned data.
    pub fn with(mut self, tag: Tag, value: impl Into<String>) -> Self {
        self.insert(tag, value);
        self
    }

    pub fn insert(&mut self, tag: Tag, value: impl Into<String>) {
        self.values.insert(tag, value.into());
    }

    /// Value of `tag`. Empty values count as absent.
    pub fn get(&self, tag: Tag) -> Option<&str> {
        self.values
            .get(&tag)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.get(tag).is_some()
    }

    fn restricted_to(&self, tags: &[Tag]) -> Self {
        let values = self
            .values
            .iter()
            .filter(|(tag, _)| tags.contains(tag))
            .map(|(tag, value)| (*tag, value.clone()))
            .collect();
        Self { values }
    }
}

/// Scan result: file path to its tag values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagValueMap {
    files: HashMap<PathBuf, SliceTagSet>,
}

impl TagValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, tag_set: SliceTagSet) {
        self.files.insert(path.into(), tag_set);
    }

    pub fn get(&self, path: &Path) -> Option<&SliceTagSet> {
        self.files.get(path)
    }

    /// Value of `tag` in the file at `path`, if both exist.
    pub fn value(&self, path: &Path, tag: Tag) -> Option<&str> {
        self.files.get(path)?.get(tag)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.files.keys()
    }
}

impl From<HashMap<PathBuf, SliceTagSet>> for TagValueMap {
    fn from(files: HashMap<PathBuf, SliceTagSet>) -> Self {
        Self { files }
    }
}

impl<P: Into<PathBuf>> FromIterator<(P, SliceTagSet)> for TagValueMap {
    fn from_iter<I: IntoIterator<Item = (P, SliceTagSet)>>(iter: I) -> Self {
        Self {
            files: iter
                .into_iter()
                .map(|(path, tag_set)| (path.into(), tag_set))
                .collect(),
        }
    }
}

/// Reads the values of a set of tags for a whole list of files at once.
///
/// Files that cannot be read are left out of the result.
pub trait TagScanner {
    fn scan(&self, files: &[PathBuf], tags: &[Tag]) -> TagValueMap;
}

/// An already scanned map serves as its own scanner.
impl TagScanner for TagValueMap {
    fn scan(&self, files: &[PathBuf], tags: &[Tag]) -> TagValueMap {
        files
            .iter()
            .filter_map(|path| {
                self.get(path)
                    .map(|tag_set| (path.clone(), tag_set.restricted_to(tags)))
            })
            .collect()
    }
}

/// Scans DICOM files on disk with dicom-rs, in parallel.
///
/// Each file is only parsed up to the pixel data.
#[derive(Debug, Default, Clone, Copy)]
pub struct DicomTagScanner;

impl DicomTagScanner {
    fn read_tag_set(path: &Path, tags: &[Tag]) -> Result<SliceTagSet, ScanError> {
        let object = OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(path)?;

        let mut tag_set = SliceTagSet::new();
        for &tag in tags {
            let Ok(element) = object.element(tag) else {
                trace!("{} has no {}", path.display(), tag_name(tag));
                continue;
            };
            if let Ok(value) = element.to_str() {
                tag_set.insert(tag, value.trim_matches(|c| c == ' ' || c == '\0'));
            }
        }
        Ok(tag_set)
    }
}

impl TagScanner for DicomTagScanner {
    fn scan(&self, files: &[PathBuf], tags: &[Tag]) -> TagValueMap {
        let scanned: HashMap<PathBuf, SliceTagSet> = files
            .par_iter()
            .filter_map(|path| match Self::read_tag_set(path, tags) {
                Ok(tag_set) => Some((path.clone(), tag_set)),
                Err(err) => {
                    debug!("Skipping {}: {err}", path.display());
                    None
                }
            })
            .collect();
        TagValueMap::from(scanned)
    }
}
