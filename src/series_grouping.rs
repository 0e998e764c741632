//! Grouping of a flat file list into loadable 3D and 3D+t blocks.
//!
//! Grouping runs in four steps:
//!  1. files are bucketed by [`create_series_identifier`], files that can
//!     never be part of the same volume end up in different buckets
//!  2. each bucket is sorted along the slice normal
//!  3. each bucket is split into blocks of uniform slice spacing by
//!     repeating [`analyze_spacing_assumption`] on the leftovers
//!  4. optionally, blocks covering exactly the same positions are merged
//!     into 3D+t blocks
//!
//! A file or bucket that cannot be handled is logged and skipped, the rest of
//! the grouping is still returned.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use dicom::core::Tag;
use dicom_dictionary_std::tags;
use tracing::{debug, error, info, warn};

use crate::{
    enums::{GantryTiltHandling, TimeSeriesHandling},
    gantry_tilt::GantryTiltInformation,
    geometry::{parse_orientation_vectors, parse_point3d},
    series_identifier::create_series_identifier,
    sorter::{SortError, sort_slices},
    spacing::analyze_spacing_assumption,
    tags::{ScanError, TagScanner, TagValueMap, scan_tags},
};

/// Block key to its ordered files.
pub type UidFileNamesMap = BTreeMap<String, Vec<PathBuf>>;

/// Options of a grouping run.
///
/// ```
/// # use dicom_series_grouping::{GroupingOptions, GantryTiltHandling, TimeSeriesHandling};
/// # use dicom_dictionary_std::tags;
/// let options = GroupingOptions::new()
///     .with_gantry_tilt(GantryTiltHandling::Split)
///     .with_time_series(TimeSeriesHandling::Separate)
///     .with_restriction(tags::ECHO_NUMBERS);
/// assert_eq!(options.restrictions(), &[tags::ECHO_NUMBERS]);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupingOptions {
    gantry_tilt: GantryTiltHandling,
    time_series: TimeSeriesHandling,
    restrictions: Vec<Tag>,
}

impl GroupingOptions {
    /// Groups tilted series and merges time steps.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gantry_tilt(mut self, handling: GantryTiltHandling) -> Self {
        self.gantry_tilt = handling;
        self
    }

    pub fn with_time_series(mut self, handling: TimeSeriesHandling) -> Self {
        self.time_series = handling;
        self
    }

    /// Files that differ in `tag` are never grouped together.
    pub fn with_restriction(mut self, tag: Tag) -> Self {
        if !self.restrictions.contains(&tag) {
            self.restrictions.push(tag);
        }
        self
    }

    pub fn gantry_tilt(&self) -> GantryTiltHandling {
        self.gantry_tilt
    }

    pub fn time_series(&self) -> TimeSeriesHandling {
        self.time_series
    }

    pub fn restrictions(&self) -> &[Tag] {
        &self.restrictions
    }
}

/// One loadable block: an ordered list of files plus what is needed to
/// assemble them.
///
/// For 3D+t blocks the files are ordered time step by time step, each time
/// step holding [`Self::slices_per_time_step`] files in spatial order.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBlockDescriptor {
    key: String,
    series_instance_uid: String,
    files: Vec<PathBuf>,
    gantry_tilt: Option<GantryTiltInformation>,
    number_of_time_steps: usize,
    modality: Option<String>,
    sop_class_uid: Option<String>,
}

impl ImageBlockDescriptor {
    fn new(key: String, files: Vec<PathBuf>, tilted: bool, tag_values: &TagValueMap) -> Self {
        let first = files.first().map(PathBuf::as_path);
        let value = |tag: Tag| first.and_then(|path| tag_values.value(path, tag));

        let gantry_tilt = if tilted {
            let tilt = tilt_between_ends(&files, tag_values);
            if tilt.is_none() {
                warn!("Block {key} is tilted but its tilt could not be measured");
            }
            tilt
        } else {
            None
        };

        Self {
            series_instance_uid: value(tags::SERIES_INSTANCE_UID)
                .unwrap_or_default()
                .to_string(),
            modality: value(tags::MODALITY).map(str::to_string),
            sop_class_uid: value(tags::SOP_CLASS_UID).map(str::to_string),
            key,
            files,
            gantry_tilt,
            number_of_time_steps: 1,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn series_instance_uid(&self) -> &str {
        &self.series_instance_uid
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Tilt of the block, measured between its first and last slice.
    pub fn gantry_tilt(&self) -> Option<&GantryTiltInformation> {
        self.gantry_tilt.as_ref()
    }

    pub fn has_gantry_tilt(&self) -> bool {
        self.gantry_tilt.is_some()
    }

    pub fn number_of_time_steps(&self) -> usize {
        self.number_of_time_steps
    }

    pub fn has_multiple_time_points(&self) -> bool {
        self.number_of_time_steps > 1
    }

    pub fn slices_per_time_step(&self) -> usize {
        self.files.len() / self.number_of_time_steps
    }

    /// Files of one time step, `None` past the last one.
    pub fn time_step(&self, index: usize) -> Option<&[PathBuf]> {
        let per_step = self.slices_per_time_step();
        self.files.get(index * per_step..(index + 1) * per_step)
    }

    pub fn modality(&self) -> Option<&str> {
        self.modality.as_deref()
    }

    pub fn sop_class_uid(&self) -> Option<&str> {
        self.sop_class_uid.as_deref()
    }

    /// Same slice count and literally the same first and last position.
    fn covers_same_positions(&self, other: &Self, tag_values: &TagValueMap) -> bool {
        let count = self.slices_per_time_step();
        if count != other.files.len() || count == 0 {
            return false;
        }
        let position = |path: &Path| tag_values.value(path, tags::IMAGE_POSITION_PATIENT);
        let ends = |files: &[PathBuf]| {
            (
                position(files[0].as_path()),
                position(files[count - 1].as_path()),
            )
        };

        match (ends(&self.files[..count]), ends(&other.files)) {
            ((Some(first), Some(last)), (Some(other_first), Some(other_last))) => {
                first == other_first && last == other_last
            }
            _ => false,
        }
    }

    fn add_time_step(&mut self, other: Self) {
        self.files.extend(other.files);
        self.number_of_time_steps += 1;
    }
}

/// Tilt over the whole block, so that per-slice values are averaged over
/// all slices instead of taken from the first pair.
fn tilt_between_ends(
    files: &[PathBuf],
    tag_values: &TagValueMap,
) -> Option<GantryTiltInformation> {
    let (first, last) = (files.first()?, files.last()?);
    let slices_apart = u32::try_from(files.len().checked_sub(1)?).ok()?;
    if slices_apart == 0 {
        return None;
    }
    let origin1 = tag_values
        .value(first, tags::IMAGE_POSITION_PATIENT)
        .and_then(parse_point3d)?;
    let origin2 = tag_values
        .value(last, tags::IMAGE_POSITION_PATIENT)
        .and_then(parse_point3d)?;
    let (right, up) = tag_values
        .value(first, tags::IMAGE_ORIENTATION_PATIENT)
        .and_then(parse_orientation_vectors)?;
    Some(GantryTiltInformation::new(
        &origin1,
        &origin2,
        &right,
        &up,
        slices_apart,
    ))
}

/// Result of a grouping run, keyed by block key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesGrouping {
    blocks: BTreeMap<String, ImageBlockDescriptor>,
}

impl SeriesGrouping {
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&ImageBlockDescriptor> {
        self.blocks.get(key)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &ImageBlockDescriptor> {
        self.blocks.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.blocks.keys().map(String::as_str)
    }

    /// Tilt correction parameters of a block, `None` for untilted blocks.
    pub fn tilt_information(&self, key: &str) -> Option<&GantryTiltInformation> {
        self.blocks.get(key)?.gantry_tilt()
    }

    /// Files of the first block of the series `series_uid`.
    pub fn files_for_series(&self, series_uid: &str) -> Option<&[PathBuf]> {
        self.blocks()
            .find(|block| block.series_instance_uid() == series_uid)
            .map(ImageBlockDescriptor::files)
    }

    pub fn uid_file_names_map(&self) -> UidFileNamesMap {
        self.blocks
            .iter()
            .map(|(key, block)| (key.clone(), block.files.clone()))
            .collect()
    }
}

impl IntoIterator for SeriesGrouping {
    type Item = (String, ImageBlockDescriptor);
    type IntoIter = std::collections::btree_map::IntoIter<String, ImageBlockDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.into_iter()
    }
}

/// Buckets files by series identifier, keeping the input order inside
/// each bucket.
fn bucket_by_identifier(
    files: &[PathBuf],
    tag_values: &TagValueMap,
    restrictions: &[Tag],
) -> BTreeMap<String, Vec<PathBuf>> {
    let mut buckets: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    for file in files {
        if file.file_name().is_some_and(|name| name == "DICOMDIR") {
            debug!("Skipping DICOMDIR {}", file.display());
            continue;
        }
        let Some(tag_set) = tag_values.get(file) else {
            warn!("Skipping {}: no tag values scanned", file.display());
            continue;
        };
        match create_series_identifier(tag_set, restrictions) {
            Ok(identifier) => buckets.entry(identifier).or_default().push(file.clone()),
            Err(err) => warn!("Skipping {}: {err}", file.display()),
        }
    }
    buckets
}

/// Sorts one bucket and peels blocks of uniform spacing off it.
fn split_bucket(
    bucket_id: &str,
    files: &[PathBuf],
    tag_values: &TagValueMap,
    options: &GroupingOptions,
) -> Result<Vec<ImageBlockDescriptor>, SortError> {
    let mut remaining = sort_slices(files, tag_values)?;
    let mut blocks = Vec::new();

    debug!("Analyzing group {bucket_id} of {} files", remaining.len());
    while !remaining.is_empty() {
        let (fits, does_not_fit, tilted) =
            analyze_spacing_assumption(&remaining, options.gantry_tilt, tag_values).into_parts();

        let key = format!("{bucket_id}.{}", blocks.len());
        debug!("  block {key}: {} files, tilted: {tilted}", fits.len());
        blocks.push(ImageBlockDescriptor::new(key, fits, tilted, tag_values));

        remaining = does_not_fit;
    }

    Ok(blocks)
}

/// Merges consecutive blocks that cover the same positions into 3D+t
/// blocks. Blocks are compared with the first time step of the open group.
fn merge_time_steps(
    blocks: Vec<ImageBlockDescriptor>,
    tag_values: &TagValueMap,
) -> Vec<ImageBlockDescriptor> {
    let mut merged: Vec<ImageBlockDescriptor> = Vec::new();
    for block in blocks {
        match merged.last_mut() {
            Some(open) if open.covers_same_positions(&block, tag_values) => {
                debug!("  {} is another time step of {}", block.key, open.key);
                open.add_time_step(block);
            }
            _ => merged.push(block),
        }
    }
    merged
}

/// Groups already scanned files into loadable blocks.
///
/// Block keys are `<series identifier>.<n>`, where `n` counts the blocks
/// split off one identifier. Never fails: unusable files and buckets are
/// logged and left out.
pub fn get_series(
    files: &[PathBuf],
    tag_values: &TagValueMap,
    options: &GroupingOptions,
) -> SeriesGrouping {
    let mut grouping = SeriesGrouping::default();

    for (bucket_id, bucket) in bucket_by_identifier(files, tag_values, &options.restrictions) {
        let blocks = match split_bucket(&bucket_id, &bucket, tag_values, options) {
            Ok(blocks) => blocks,
            Err(err) => {
                error!("Abandoning group {bucket_id} ({} files): {err}", bucket.len());
                continue;
            }
        };

        let blocks = match options.time_series {
            TimeSeriesHandling::Merge => merge_time_steps(blocks, tag_values),
            TimeSeriesHandling::Separate => blocks,
        };
        grouping
            .blocks
            .extend(blocks.into_iter().map(|block| (block.key.clone(), block)));
    }

    info!("Grouped {} files into {} blocks", files.len(), grouping.len());
    grouping
}

/// Scans `files` in one pass and groups them.
pub fn get_series_from_files(
    files: &[PathBuf],
    scanner: &impl TagScanner,
    options: &GroupingOptions,
) -> SeriesGrouping {
    let tag_values = scanner.scan(files, &scan_tags(&options.restrictions));
    get_series(files, &tag_values, options)
}

/// Regular files of a directory, sorted by path. Subdirectories are not
/// entered.
pub fn list_directory(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, ScanError> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir.as_ref())?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}

/// Scans and groups every file of a directory.
pub fn get_series_from_directory(
    dir: impl AsRef<Path>,
    scanner: &impl TagScanner,
    options: &GroupingOptions,
) -> Result<SeriesGrouping, ScanError> {
    let files = list_directory(dir)?;
    Ok(get_series_from_files(&files, scanner, options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::SliceTagSet;

    fn slice(uid: &str, z: f64) -> SliceTagSet {
        SliceTagSet::new()
            .with(tags::SERIES_INSTANCE_UID, uid)
            .with(tags::IMAGE_ORIENTATION_PATIENT, "1\\0\\0\\0\\1\\0")
            .with(tags::IMAGE_POSITION_PATIENT, format!("0\\0\\{z}"))
            .with(tags::MODALITY, "CT")
    }

    #[test]
    fn options_builder() {
        let options = GroupingOptions::new()
            .with_restriction(tags::ECHO_NUMBERS)
            .with_restriction(tags::ECHO_NUMBERS);
        assert_eq!(options.gantry_tilt(), GantryTiltHandling::Group);
        assert_eq!(options.time_series(), TimeSeriesHandling::Merge);
        assert_eq!(options.restrictions(), &[tags::ECHO_NUMBERS]);
    }

    #[test]
    fn empty_input_gives_empty_grouping() {
        let grouping = get_series(&[], &TagValueMap::new(), &GroupingOptions::new());
        assert!(grouping.is_empty());
        assert!(grouping.uid_file_names_map().is_empty());
    }

    #[test]
    fn separates_series_and_skips_unusable_files() {
        let tag_values: TagValueMap = [
            ("a1", slice("A", 0.0)),
            ("b1", slice("B", 0.0)),
            ("a2", slice("A", 1.0)),
            ("anon", SliceTagSet::new().with(tags::ROWS, "8")),
            ("DICOMDIR", slice("A", 2.0)),
        ]
        .into_iter()
        .collect();
        let files: Vec<PathBuf> = ["a2", "b1", "anon", "a1", "DICOMDIR", "unscanned"]
            .iter()
            .map(PathBuf::from)
            .collect();

        let grouping = get_series(&files, &tag_values, &GroupingOptions::new());
        let map = grouping.uid_file_names_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map["A.1.000000.000000.000000.000001.000000.00000.0"], vec![
            PathBuf::from("a1"),
            PathBuf::from("a2")
        ]);
        assert_eq!(grouping.files_for_series("B"), Some(&[PathBuf::from("b1")][..]));
        assert_eq!(grouping.files_for_series("C"), None);
        let block = grouping.blocks().next().unwrap();
        assert_eq!(block.modality(), Some("CT"));
        assert_eq!(block.series_instance_uid(), "A");
    }

    #[test]
    fn time_steps_merge_only_when_requested() {
        let mut tag_values = TagValueMap::new();
        let mut files = Vec::new();
        for t in 0..3 {
            for z in 0..4 {
                let name = format!("t{t}z{z}");
                tag_values.insert(
                    name.as_str(),
                    slice("S", f64::from(z)).with(tags::ACQUISITION_TIME, format!("1200{t}0")),
                );
                files.push(PathBuf::from(name));
            }
        }

        let merged = get_series(&files, &tag_values, &GroupingOptions::new());
        assert_eq!(merged.len(), 1);
        let block = merged.blocks().next().unwrap();
        assert_eq!(block.number_of_time_steps(), 3);
        assert_eq!(block.slices_per_time_step(), 4);
        assert!(block.has_multiple_time_points());
        let expected: Vec<PathBuf> = (0..4).map(|z| PathBuf::from(format!("t1z{z}"))).collect();
        assert_eq!(block.time_step(1), Some(expected.as_slice()));
        assert_eq!(block.time_step(3), None);

        let separate = get_series(
            &files,
            &tag_values,
            &GroupingOptions::new().with_time_series(TimeSeriesHandling::Separate),
        );
        assert_eq!(separate.len(), 3);
        assert!(separate.blocks().all(|b| b.files().len() == 4));
    }

    #[test]
    fn blocks_with_different_extent_are_not_merged() {
        let tag_values: TagValueMap = [
            ("a", slice("S", 0.0)),
            ("b", slice("S", 1.0)),
            ("c", slice("S", 2.0)),
            ("b2", slice("S", 1.0).with(tags::ACQUISITION_TIME, "2")),
            ("c2", slice("S", 2.0).with(tags::ACQUISITION_TIME, "2")),
        ]
        .into_iter()
        .map(|(name, tag_set)| {
            let tag_set = if tag_set.contains(tags::ACQUISITION_TIME) {
                tag_set
            } else {
                tag_set.with(tags::ACQUISITION_TIME, "1")
            };
            (name, tag_set)
        })
        .collect();
        let files: Vec<PathBuf> = ["a", "b", "c", "b2", "c2"]
            .iter()
            .map(PathBuf::from)
            .collect();

        let grouping = get_series(&files, &tag_values, &GroupingOptions::new());
        assert_eq!(grouping.len(), 2);
        assert!(grouping.blocks().all(|b| !b.has_multiple_time_points()));
    }
}
