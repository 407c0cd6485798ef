//! Voxelize a folder holding one DICOM series into a regular grid.
use std::path::PathBuf;

use clap::Parser;
use dicom_voxelize::{OutputFormat, VoxelizeConfig, VoxelizeMode, pipeline};
use tracing::{Level, error};

/// Resample a DICOM series into voxels of a given physical size
#[derive(Debug, Parser)]
#[command(name = "dicom-voxelize", version)]
struct App {
    /// Folder holding the slices of one series
    input_folder: PathBuf,

    /// Path to the output file
    #[arg(short = 'o', long = "out")]
    output: PathBuf,

    /// Average the samples of every voxel of X x Y x Z mm
    #[arg(
        long = "voxelize-mean",
        num_args = 3,
        value_names = ["X", "Y", "Z"],
        conflicts_with = "voxelize_stddev",
        required_unless_present = "voxelize_stddev"
    )]
    voxelize_mean: Option<Vec<f64>>,

    /// Standard deviation of the samples of every voxel of X x Y x Z mm
    #[arg(long = "voxelize-stddev", num_args = 3, value_names = ["X", "Y", "Z"])]
    voxelize_stddev: Option<Vec<f64>>,

    /// Number of decoded slices buffered between reading and voxelizing
    #[arg(long = "queue-capacity", default_value = "100")]
    queue_capacity: usize,

    /// Only read files with this extension (e.g. `dcm`)
    #[arg(long = "extension")]
    extension: Option<String>,

    /// Write an 8 bit grayscale image instead of the raw float dump
    #[arg(long = "preview")]
    preview: bool,

    /// Print more information while voxelizing
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

impl App {
    fn config(self) -> VoxelizeConfig {
        let (mode, size) = match (self.voxelize_mean, self.voxelize_stddev) {
            (Some(size), _) => (VoxelizeMode::Mean, size),
            (None, Some(size)) => (VoxelizeMode::StdDev, size),
            (None, None) => (VoxelizeMode::Mean, Vec::new()),
        };
        let voxel_size = match size.as_slice() {
            &[x, y, z] => [x, y, z],
            _ => [0.0; 3],
        };

        let mut config = VoxelizeConfig::new(self.input_folder, self.output, voxel_size)
            .with_mode(mode)
            .with_queue_capacity(self.queue_capacity)
            .with_output_format(if self.preview {
                OutputFormat::Preview
            } else {
                OutputFormat::Raw
            });
        if let Some(extension) = self.extension {
            config = config.with_extension(extension);
        }
        config
    }
}

fn main() {
    let app = App::parse();

    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(if app.verbose {
                Level::DEBUG
            } else {
                Level::INFO
            })
            .finish(),
    )
    .unwrap_or_else(|e| {
        eprintln!("[ERROR] Could not set up global logging subscriber: {e}");
    });

    let config = app.config();
    if let Err(e) = pipeline::run(&config) {
        error!("{}", e);
        std::process::exit(-1);
    }
}
