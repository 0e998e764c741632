use std::{error::Error, path::PathBuf};

use clap::Parser;
use dicom_series_grouping::{
    DicomTagScanner, GantryTiltHandling, GroupingOptions, Orientation, TimeSeriesHandling,
    VolumeLoader, get_series_from_directory,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "dicom-series-grouping")]
#[command(about = "Group the DICOM files of a directory into loadable volumes")]
struct Args {
    /// Directory containing the DICOM files
    dir: PathBuf,

    /// Split series acquired with a tilted gantry instead of grouping them
    #[arg(long)]
    split_tilt: bool,

    /// Keep time steps as separate 3D blocks
    #[arg(long = "no-3d-t")]
    no_3d_t: bool,

    /// Save the center axial image of the first block to this file
    #[arg(long)]
    png: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let options = GroupingOptions::new()
        .with_gantry_tilt(if args.split_tilt {
            GantryTiltHandling::Split
        } else {
            GantryTiltHandling::Group
        })
        .with_time_series(if args.no_3d_t {
            TimeSeriesHandling::Separate
        } else {
            TimeSeriesHandling::Merge
        });

    let grouping = get_series_from_directory(&args.dir, &DicomTagScanner, &options)?;

    for block in grouping.blocks() {
        println!(
            "{}\n  modality: {}\n  files: {}\n  time steps: {}",
            block.key(),
            block.modality().unwrap_or("-"),
            block.files().len(),
            block.number_of_time_steps(),
        );
        if let Some(tilt) = block.gantry_tilt() {
            println!(
                "  gantry tilt: {:.2} degrees, {:.3} mm shift per slice",
                tilt.tilt_angle_degrees(),
                tilt.matrix_coefficient(),
            );
        }
    }

    if let Some(png) = args.png {
        let block = grouping
            .blocks()
            .next()
            .ok_or("no block found to render")?;
        let volume = VolumeLoader::load_block(block)?;
        let image = volume
            .get_image_from_axis(0, volume.dim().1 / 2, Orientation::Axial)
            .ok_or("could not render center slice")?;
        image.save(&png)?;
        info!("Saved center slice of {} to {}", block.key(), png.display());
    }

    Ok(())
}
