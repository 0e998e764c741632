use dicom_dictionary_std::tags;
use dicom_series_grouping::{
    GantryTiltHandling, GroupingOptions, SliceTagSet, TagValueMap, TimeSeriesHandling,
    analyze_spacing_assumption, get_series, get_series_from_files, sort_slices,
};
use std::collections::HashSet;
use std::path::PathBuf;

const AXIAL: &str = "1\\0\\0\\0\\1\\0";

fn slice(uid: &str, (x, y, z): (f64, f64, f64)) -> SliceTagSet {
    SliceTagSet::new()
        .with(tags::SERIES_INSTANCE_UID, uid)
        .with(tags::IMAGE_ORIENTATION_PATIENT, AXIAL)
        .with(tags::IMAGE_POSITION_PATIENT, format!("{x}\\{y}\\{z}"))
}

fn paths(names: &[&str]) -> Vec<PathBuf> {
    names.iter().map(PathBuf::from).collect()
}

/// Files named `{prefix}{i}` along z, given in reverse order.
fn stack(prefix: &str, uid: &str, positions: &[(f64, f64, f64)]) -> (Vec<PathBuf>, TagValueMap) {
    let mut tag_values = TagValueMap::new();
    let mut files = Vec::new();
    for (i, position) in positions.iter().enumerate() {
        let name = format!("{prefix}{i}");
        tag_values.insert(name.as_str(), slice(uid, *position));
        files.push(PathBuf::from(name));
    }
    files.reverse();
    (files, tag_values)
}

#[test]
fn regular_series_is_one_block_in_position_order() {
    let positions: Vec<_> = (0..5).map(|z| (0.0, 0.0, f64::from(z))).collect();
    let (files, tag_values) = stack("f", "S1", &positions);

    let grouping = get_series(&files, &tag_values, &GroupingOptions::new());

    assert_eq!(grouping.len(), 1);
    let (key, block_files) = grouping.uid_file_names_map().into_iter().next().unwrap();
    assert_eq!(key, "S1.1.000000.000000.000000.000001.000000.00000.0");
    assert_eq!(block_files, paths(&["f0", "f1", "f2", "f3", "f4"]));

    let block = grouping.get(&key).unwrap();
    assert!(!block.has_gantry_tilt());
    assert!(!block.has_multiple_time_points());
    assert_eq!(block.series_instance_uid(), "S1");
}

#[test]
fn repeated_position_is_split_off() {
    let mut tag_values = TagValueMap::new();
    for (name, z) in [("p0", 0.0), ("p1", 1.0), ("p2", 2.0), ("p3", 3.0), ("p4", 4.0)] {
        tag_values.insert(
            name,
            slice("S1", (0.0, 0.0, z)).with(tags::ACQUISITION_TIME, "100000"),
        );
    }
    tag_values.insert(
        "p2_late",
        slice("S1", (0.0, 0.0, 2.0)).with(tags::ACQUISITION_TIME, "100500"),
    );
    let files = paths(&["p2_late", "p4", "p2", "p0", "p3", "p1"]);

    let sorted = sort_slices(&files, &tag_values).unwrap();
    assert_eq!(sorted, paths(&["p0", "p1", "p2", "p2_late", "p3", "p4"]));

    let grouping = get_series(&files, &tag_values, &GroupingOptions::new());
    let map = grouping.uid_file_names_map();
    assert_eq!(map.len(), 2);
    let blocks: Vec<_> = map.values().cloned().collect();
    assert!(blocks.contains(&paths(&["p0", "p1", "p2", "p3", "p4"])));
    assert!(blocks.contains(&paths(&["p2_late"])));
}

#[test]
fn gap_splits_series() {
    let positions: Vec<_> = [0.0, 1.0, 2.0, 5.0, 6.0, 7.0]
        .iter()
        .map(|z| (0.0, 0.0, *z))
        .collect();
    let (files, tag_values) = stack("g", "S1", &positions);

    let grouping = get_series(&files, &tag_values, &GroupingOptions::new());

    let map = grouping.uid_file_names_map();
    assert_eq!(map.len(), 2);
    let mut blocks = map.into_iter();
    let (first_key, first) = blocks.next().unwrap();
    let (second_key, second) = blocks.next().unwrap();
    assert!(first_key.ends_with(".0"));
    assert!(second_key.ends_with(".1"));
    assert_eq!(first, paths(&["g0", "g1", "g2"]));
    assert_eq!(second, paths(&["g3", "g4", "g5"]));
}

#[test]
fn every_file_ends_up_in_exactly_one_block() {
    let positions: Vec<_> = [0.0, 1.0, 1.0, 2.0, 4.5, 5.0, 6.0, 6.0, 9.0]
        .iter()
        .map(|z| (0.0, 0.0, *z))
        .collect();
    let (mut files, mut tag_values) = stack("c", "S1", &positions);
    let (other_files, other_tags) = stack("o", "S2", &[(0.0, 0.0, 0.0), (0.0, 0.0, 3.0)]);
    for file in &other_files {
        tag_values.insert(file.clone(), other_tags.get(file).unwrap().clone());
    }
    files.extend(other_files);

    for time_series in [TimeSeriesHandling::Merge, TimeSeriesHandling::Separate] {
        let options = GroupingOptions::new().with_time_series(time_series);
        let grouping = get_series(&files, &tag_values, &options);

        let mut seen = HashSet::new();
        for block in grouping.blocks() {
            assert!(!block.files().is_empty());
            for file in block.files() {
                assert!(seen.insert(file.clone()), "{} in two blocks", file.display());
            }
        }
        assert_eq!(seen.len(), files.len());
    }
}

#[test]
fn tilted_series_is_grouped_with_tilt_information() {
    let positions: Vec<_> = (0..5)
        .map(|i| (0.0, 0.5 * f64::from(i), 2.0 * f64::from(i)))
        .collect();
    let (files, tag_values) = stack("t", "CT", &positions);

    let grouping = get_series(&files, &tag_values, &GroupingOptions::new());

    assert_eq!(grouping.len(), 1);
    let key = grouping.keys().next().unwrap().to_string();
    let block = grouping.get(&key).unwrap();
    assert_eq!(block.files(), paths(&["t0", "t1", "t2", "t3", "t4"]).as_slice());

    let tilt = grouping.tilt_information(&key).unwrap();
    assert_eq!(tilt.number_of_slices_apart(), 4);
    assert!((tilt.matrix_coefficient().abs() - 0.5).abs() < 1e-9);
    assert!((tilt.real_z_spacing() - 2.0).abs() < 1e-9);
    assert!((tilt.tilt_angle_degrees() - 0.25_f64.atan().to_degrees()).abs() < 1e-9);
}

#[test]
fn tilted_series_is_split_when_requested() {
    let positions: Vec<_> = (0..4)
        .map(|i| (0.0, 0.5 * f64::from(i), 2.0 * f64::from(i)))
        .collect();
    let (files, tag_values) = stack("t", "CT", &positions);

    let options = GroupingOptions::new().with_gantry_tilt(GantryTiltHandling::Split);
    let grouping = get_series(&files, &tag_values, &options);

    assert_eq!(grouping.len(), 4);
    assert!(grouping.blocks().all(|b| b.files().len() == 1 && !b.has_gantry_tilt()));
}

#[test]
fn shear_along_rows_is_never_grouped() {
    let positions: Vec<_> = (0..3)
        .map(|i| (0.7 * f64::from(i), 0.0, 2.0 * f64::from(i)))
        .collect();
    let (files, tag_values) = stack("s", "CT", &positions);

    let result = analyze_spacing_assumption(
        &sort_slices(&files, &tag_values).unwrap(),
        GantryTiltHandling::Group,
        &tag_values,
    );
    assert_eq!(result.fits(), paths(&["s0"]).as_slice());
    assert!(!result.contains_gantry_tilt());

    let grouping = get_series(&files, &tag_values, &GroupingOptions::new());
    assert_eq!(grouping.len(), 3);
    assert!(grouping.blocks().all(|b| !b.has_gantry_tilt()));
}

#[test]
fn broken_series_is_abandoned_others_survive() {
    let (mut files, mut tag_values) = stack("ok", "GOOD", &[(0.0, 0.0, 0.0), (0.0, 0.0, 1.0)]);
    tag_values.insert("bad0", slice("BAD", (0.0, 0.0, 0.0)));
    tag_values.insert(
        "bad1",
        SliceTagSet::new()
            .with(tags::SERIES_INSTANCE_UID, "BAD")
            .with(tags::IMAGE_ORIENTATION_PATIENT, AXIAL),
    );
    files.extend(paths(&["bad0", "bad1"]));

    let grouping = get_series(&files, &tag_values, &GroupingOptions::new());

    assert_eq!(grouping.len(), 1);
    assert_eq!(grouping.files_for_series("GOOD"), Some(paths(&["ok0", "ok1"]).as_slice()));
    assert_eq!(grouping.files_for_series("BAD"), None);
}

#[test]
fn time_series_becomes_one_block() {
    let mut tag_values = TagValueMap::new();
    let mut files = Vec::new();
    for (t, time) in ["080000", "080010"].iter().enumerate() {
        for z in 0..3 {
            let name = format!("t{t}_z{z}");
            tag_values.insert(
                name.as_str(),
                slice("DYN", (0.0, 0.0, f64::from(z) * 3.0)).with(tags::ACQUISITION_TIME, *time),
            );
            files.push(PathBuf::from(name));
        }
    }

    let merged = get_series(&files, &tag_values, &GroupingOptions::new());
    assert_eq!(merged.len(), 1);
    let block = merged.blocks().next().unwrap();
    assert_eq!(block.number_of_time_steps(), 2);
    assert_eq!(block.time_step(0), Some(paths(&["t0_z0", "t0_z1", "t0_z2"]).as_slice()));
    assert_eq!(block.time_step(1), Some(paths(&["t1_z0", "t1_z1", "t1_z2"]).as_slice()));

    let separate = get_series(
        &files,
        &tag_values,
        &GroupingOptions::new().with_time_series(TimeSeriesHandling::Separate),
    );
    assert_eq!(separate.len(), 2);
}

#[test]
fn restrictions_separate_echoes() {
    let mut tag_values = TagValueMap::new();
    for (name, z, echo) in [
        ("e1a", 0.0, "1"),
        ("e1b", 1.0, "1"),
        ("e2a", 0.0, "2"),
        ("e2b", 1.0, "2"),
    ] {
        tag_values.insert(name, slice("MR", (0.0, 0.0, z)).with(tags::ECHO_NUMBERS, echo));
    }
    let files = paths(&["e1a", "e1b", "e2a", "e2b"]);

    let options = GroupingOptions::new()
        .with_time_series(TimeSeriesHandling::Separate)
        .with_restriction(tags::ECHO_NUMBERS);
    let grouping = get_series_from_files(&files, &tag_values, &options);

    let blocks: Vec<_> = grouping.uid_file_names_map().into_values().collect();
    assert_eq!(blocks, vec![paths(&["e1a", "e1b"]), paths(&["e2a", "e2b"])]);
}

#[test]
fn series_lookup_does_not_match_uid_prefixes() {
    let (files, tag_values) = stack("a", "1.2.34", &[(0.0, 0.0, 0.0), (0.0, 0.0, 1.0)]);
    let grouping = get_series(&files, &tag_values, &GroupingOptions::new());
    assert_eq!(grouping.files_for_series("1.2.3"), None);
    assert_eq!(grouping.files_for_series("1.2.34"), Some(paths(&["a0", "a1"]).as_slice()));

    let (mut files, mut tag_values) = (files, tag_values);
    let (short_files, short_tags) = stack("b", "1.2.3", &[(0.0, 0.0, 0.0), (0.0, 0.0, 1.0)]);
    for file in &short_files {
        tag_values.insert(file.clone(), short_tags.get(file).unwrap().clone());
    }
    files.extend(short_files);

    let grouping = get_series(&files, &tag_values, &GroupingOptions::new());
    assert_eq!(grouping.len(), 2);
    assert_eq!(grouping.files_for_series("1.2.3"), Some(paths(&["b0", "b1"]).as_slice()));
    assert_eq!(grouping.files_for_series("1.2.34"), Some(paths(&["a0", "a1"]).as_slice()));
}

#[test]
fn shared_positions_with_partial_acquisition_tags_are_grouped() {
    let mut tag_values = TagValueMap::new();
    let mut files = Vec::new();
    for i in 0..100_u32 {
        let mut tag_set = slice("MIX", (0.0, 0.0, f64::from(i % 4)));
        if i % 3 != 1 {
            tag_set.insert(tags::ACQUISITION_TIME, (100_000 + (i * 7919) % 5000).to_string());
        }
        if i % 3 != 0 {
            tag_set.insert(tags::ACQUISITION_NUMBER, ((i * 104_729) % 97).to_string());
        }
        let name = format!("m{i:03}");
        tag_values.insert(name.as_str(), tag_set);
        files.push(PathBuf::from(name));
    }

    for time_series in [TimeSeriesHandling::Merge, TimeSeriesHandling::Separate] {
        let options = GroupingOptions::new().with_time_series(time_series);
        let grouping = get_series(&files, &tag_values, &options);

        let grouped: usize = grouping.blocks().map(|block| block.files().len()).sum();
        assert_eq!(grouped, files.len());
    }

    let merged = get_series(&files, &tag_values, &GroupingOptions::new());
    assert_eq!(merged.len(), 1);
    let block = merged.blocks().next().unwrap();
    assert_eq!(block.number_of_time_steps(), 25);
    assert_eq!(block.slices_per_time_step(), 4);
}
