use crate::enums::{OutputFormat, VoxelizeMode};
use crate::queue::DEFAULT_CAPACITY;

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Voxel size {0:?} must be positive and finite on every axis")]
    InvalidVoxelSize([f64; 3]),

    #[error("Queue capacity must be at least 1")]
    ZeroQueueCapacity,

    #[error("Input directory {0} does not exist")]
    MissingInputDirectory(PathBuf),
}

/// Settings of one voxelization run.
///
/// Built once, validated, then handed to [`crate::pipeline::voxelize`] by
/// reference.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelizeConfig {
    pub input_dir: PathBuf,
    pub output: PathBuf,
    /// Physical voxel size in mm, `[x, y, z]`.
    pub voxel_size: [f64; 3],
    pub mode: VoxelizeMode,
    pub queue_capacity: usize,
    /// Only scan files with this extension (case-insensitive).
    pub extension: Option<String>,
    pub output_format: OutputFormat,
}

impl VoxelizeConfig {
    pub fn new(
        input_dir: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        voxel_size: [f64; 3],
    ) -> Self {
        Self {
            input_dir: input_dir.into(),
            output: output.into(),
            voxel_size,
            mode: VoxelizeMode::default(),
            queue_capacity: DEFAULT_CAPACITY,
            extension: None,
            output_format: OutputFormat::default(),
        }
    }

    pub fn with_mode(mut self, mode: VoxelizeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    pub fn with_output_format(mut self, output_format: OutputFormat) -> Self {
        self.output_format = output_format;
        self
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self
            .voxel_size
            .iter()
            .any(|size| !size.is_finite() || *size <= 0.0)
        {
            return Err(ConfigError::InvalidVoxelSize(self.voxel_size));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if !self.input_dir.is_dir() {
            return Err(ConfigError::MissingInputDirectory(self.input_dir.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults() {
        let config = VoxelizeConfig::new("in", "out.raw", [1.0, 1.0, 1.0]);

        assert_eq!(config.mode, VoxelizeMode::Mean);
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.extension, None);
        assert_eq!(config.output_format, OutputFormat::Raw);
    }

    #[test]
    fn valid_config_passes() {
        let dir = tempfile::tempdir().unwrap();
        let config = VoxelizeConfig::new(dir.path(), "out.raw", [0.5, 0.5, 2.0])
            .with_mode(VoxelizeMode::StdDev)
            .with_extension("dcm")
            .with_queue_capacity(4);

        assert_eq!(config.validate(), Ok(()));
    }

    #[rstest]
    #[case([0.0, 1.0, 1.0])]
    #[case([1.0, -2.0, 1.0])]
    #[case([1.0, 1.0, f64::NAN])]
    #[case([f64::INFINITY, 1.0, 1.0])]
    fn bad_voxel_sizes_fail(#[case] voxel_size: [f64; 3]) {
        let dir = tempfile::tempdir().unwrap();
        let config = VoxelizeConfig::new(dir.path(), "out.raw", voxel_size);

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidVoxelSize(_))
        ));
    }

    #[test]
    fn zero_capacity_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            VoxelizeConfig::new(dir.path(), "out.raw", [1.0; 3]).with_queue_capacity(0);

        assert_eq!(config.validate(), Err(ConfigError::ZeroQueueCapacity));
    }

    #[test]
    fn missing_input_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let config = VoxelizeConfig::new(&missing, "out.raw", [1.0; 3]);

        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingInputDirectory(missing))
        );
    }
}
