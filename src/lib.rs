//! # DICOM-voxelize library
//!
//! This crate resamples a DICOM series into a regular voxel grid of a
//! requested physical size.

//!
//! The slices of a series are read from a folder, ordered by their depth
//! along the slice normal and streamed through a bounded queue into a
//! compute engine that bins every pixel into its voxel. Reading and
//! voxelizing run concurrently on two threads. The result is written as
//! one tiled image in which the depth planes sit side by side. Two
//! reductions are available:
//!  - Mean of the samples of each voxel
//!  - Standard deviation of the samples of each voxel
//!
//! DICOM files are assumed to have the following attributes:
//!  - Explicit VR little endian encoding
//!  - One planar orientation shared by the whole series
//!  - Uncompressed 8 or 16 bit pixel data (only the first sample of a pixel
//!    is used)
//!  - No attributes of interest nested in sequences
//!
//! The attribute decoder is self contained and keeps only the raw bytes of
//! an allow-list of tags, see [`decoder`] and [`DicomFile`].
//!
//! # Examples
//!
//! ## Voxelizing a series into 2 mm voxels
//!
//! Read every ".dcm" file of the dicom/ directory and write the mean of each
//! 2 x 2 x 2 mm voxel as a raw float dump.
//!
//! ```no_run
//! # use dicom_voxelize::{CpuEngine, RawSink, VoxelizeConfig, voxelize};
//! let config = VoxelizeConfig::new("dicom", "volume.raw", [2.0, 2.0, 2.0])
//!     .with_extension("dcm");
//! let report = voxelize(&config, &mut CpuEngine::new(), &mut RawSink)
//!     .expect("should have voxelized the series");
//! println!(
//!     "{}x{}x{} voxels",
//!     report.grid.columns, report.grid.rows, report.grid.depth
//! );
//! ```

pub mod config;
pub mod decoder;
pub mod dicom_file;
pub mod engine;
pub mod enums;
pub mod pipeline;
pub mod property;
pub mod queue;
pub mod scene;
pub mod sink;
pub mod volume;
pub mod volume_loader;

#[cfg(test)]
mod testing;

pub use config::VoxelizeConfig;
pub use dicom_file::DicomFile;
pub use engine::{ComputeEngine, CpuEngine};
pub use enums::{OutputFormat, VoxelizeMode};
pub use pipeline::{PipelineError, VoxelizeReport, voxelize};
pub use queue::PipelineQueue;
pub use sink::{OutputSink, PreviewSink, RawSink, read_raw};
pub use volume::VolumeGrid;
pub use volume_loader::VolumeLoader;
