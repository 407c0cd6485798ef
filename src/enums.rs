/// Reduction applied to the samples binned into each voxel.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoxelizeMode {
    #[default]
    Mean,
    StdDev,
}

/// Accumulator planes kept per voxel while slices stream in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Accumulator {
    Sum,
    SumOfSquares,
    Count,
}

impl Accumulator {
    /// Contribution of one sample to this accumulator.
    #[inline]
    pub fn weight(self, sample: f64) -> f64 {
        match self {
            Accumulator::Sum => sample,
            Accumulator::SumOfSquares => sample * sample,
            Accumulator::Count => 1.0,
        }
    }
}

impl VoxelizeMode {
    /// Accumulators in the order their buffers are passed to the engine.
    pub fn accumulators(self) -> &'static [Accumulator] {
        match self {
            VoxelizeMode::Mean => &[Accumulator::Sum, Accumulator::Count],
            VoxelizeMode::StdDev => &[
                Accumulator::Sum,
                Accumulator::SumOfSquares,
                Accumulator::Count,
            ],
        }
    }

    pub fn accumulate_kernel(self) -> Kernel {
        match self {
            VoxelizeMode::Mean => Kernel::VoxelizeMeans,
            VoxelizeMode::StdDev => Kernel::VoxelizeStdDev,
        }
    }

    pub fn resolve_kernel(self) -> Kernel {
        match self {
            VoxelizeMode::Mean => Kernel::ResolveMeans,
            VoxelizeMode::StdDev => Kernel::ResolveStdDev,
        }
    }
}

/// Kernels a compute engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kernel {
    /// Bin one slice into sum and count buffers.
    VoxelizeMeans,
    /// Bin one slice into sum, sum of squares and count buffers.
    VoxelizeStdDev,
    /// sum / count
    ResolveMeans,
    /// population standard deviation from sum, sum of squares and count
    ResolveStdDev,
}

impl Kernel {
    /// Accumulators written by an accumulate kernel, read by a resolve one.
    pub fn accumulators(self) -> &'static [Accumulator] {
        match self {
            Kernel::VoxelizeMeans | Kernel::ResolveMeans => VoxelizeMode::Mean.accumulators(),
            Kernel::VoxelizeStdDev | Kernel::ResolveStdDev => {
                VoxelizeMode::StdDev.accumulators()
            }
        }
    }

    pub fn is_resolve(self) -> bool {
        matches!(self, Kernel::ResolveMeans | Kernel::ResolveStdDev)
    }
}

/// How the finished grid is written out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    /// 32 bit float dump with a width/height/bytes-per-pixel header.
    #[default]
    Raw,
    /// 8 bit grayscale preview image.
    Preview,
}
