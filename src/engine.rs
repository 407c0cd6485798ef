//! The compute engine contract and its CPU implementation.
//!
//! The orchestrator only talks to a [`ComputeEngine`]: it asks for
//! accumulation buffers once, dispatches one accumulate kernel per slice and
//! a resolve kernel at the end, then reads the result back. An accelerator
//! backend maps these calls onto buffer creation, a constant buffer upload
//! of [`SliceConstants`] and a compute dispatch. [`CpuEngine`] runs the same
//! kernels in process with rayon.

use crate::enums::{Accumulator, Kernel};
use crate::volume::SliceConstants;

use ndarray::{ArrayView1, ArrayViewMut1, Zip};
use rayon::prelude::*;
use thiserror::Error;
use tracing::trace;

/// Opaque reference to a buffer owned by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(usize);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unsupported buffer element size of {0} bytes")]
    UnsupportedElementSize(usize),

    #[error("Unsupported pixel sample size of {0} bytes")]
    UnsupportedSampleSize(u32),

    #[error("Unknown buffer {0:?}")]
    UnknownBuffer(BufferHandle),

    #[error("Kernel {kernel:?} takes {expected} {what}, got {found}")]
    Arity {
        kernel: Kernel,
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Kernel {0:?} cannot be dispatched this way")]
    WrongKernel(Kernel),

    #[error("Buffer {handle:?} holds {found} elements, kernel needs {expected}")]
    BufferSize {
        handle: BufferHandle,
        expected: usize,
        found: usize,
    },

    #[error("Buffer {0:?} is both read and written")]
    AliasedBuffer(BufferHandle),
}

pub trait ComputeEngine: Send {
    /// Allocate a zeroed buffer of `element_count` elements.
    fn allocate_accumulation_buffer(
        &mut self,
        element_size: usize,
        element_count: usize,
    ) -> Result<BufferHandle, EngineError>;

    /// Run an accumulate kernel over one slice. `inputs` holds the raw
    /// pixel data, `outputs` one buffer per accumulator of the kernel.
    fn accumulate(
        &mut self,
        kernel: Kernel,
        constants: &SliceConstants,
        inputs: &[&[u8]],
        outputs: &[BufferHandle],
    ) -> Result<(), EngineError>;

    /// Run a resolve kernel reading the accumulator `sources` into `target`.
    fn resolve(
        &mut self,
        kernel: Kernel,
        sources: &[BufferHandle],
        target: BufferHandle,
    ) -> Result<(), EngineError>;

    /// Copy a buffer back as bytes.
    fn read_buffer(&self, handle: BufferHandle) -> Result<Vec<u8>, EngineError>;
}

fn check_arity(
    kernel: Kernel,
    what: &'static str,
    expected: usize,
    found: usize,
) -> Result<(), EngineError> {
    if expected != found {
        return Err(EngineError::Arity {
            kernel,
            what,
            expected,
            found,
        });
    }
    Ok(())
}

/// In-process engine.
///
/// Buffers read back as 32 bit floats but accumulate in 64 bit, so sums of
/// squares over thousands of 16 bit samples stay exact.
#[derive(Debug, Default)]
pub struct CpuEngine {
    buffers: Vec<Vec<f64>>,
}

impl CpuEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow a buffer at accumulation precision.
    pub fn buffer(&self, handle: BufferHandle) -> Result<&[f64], EngineError> {
        self.buffers
            .get(handle.0)
            .map(Vec::as_slice)
            .ok_or(EngineError::UnknownBuffer(handle))
    }

    fn sized_buffer(&self, handle: BufferHandle, expected: usize) -> Result<&[f64], EngineError> {
        let buffer = self.buffer(handle)?;
        if buffer.len() != expected {
            return Err(EngineError::BufferSize {
                handle,
                expected,
                found: buffer.len(),
            });
        }
        Ok(buffer)
    }

    /// First sample of each pixel, as floats, for at most
    /// `slice_columns * slice_rows` pixels.
    fn decode_samples(input: &[u8], constants: &SliceConstants) -> Result<Vec<f64>, EngineError> {
        let sample_size = constants.bytes_per_sample as usize;
        let pixel_size = sample_size * constants.samples_per_pixel.max(1) as usize;
        let pixels = constants.slice_columns as usize * constants.slice_rows as usize;

        let samples = input.chunks_exact(pixel_size.max(1)).take(pixels);
        match sample_size {
            1 => Ok(samples.map(|pixel| f64::from(pixel[0])).collect()),
            2 => Ok(samples
                .map(|pixel| f64::from(u16::from_le_bytes([pixel[0], pixel[1]])))
                .collect()),
            other => Err(EngineError::UnsupportedSampleSize(other as u32)),
        }
    }

    /// Add the weighted samples of one slice into plane `z` of `buffer`.
    fn bin_slice(
        buffer: &mut [f64],
        accumulator: Accumulator,
        constants: &SliceConstants,
        samples: &[f64],
        z: u32,
    ) {
        let grid = constants.grid();
        let columns = constants.slice_columns;
        let column_bins: Vec<Option<u32>> =
            (0..columns).map(|c| constants.column_bin(c)).collect();
        // row bins never decrease, rows past the grid sort last
        let row_bins: Vec<u32> = (0..constants.slice_rows)
            .map(|r| constants.row_bin(r).unwrap_or(u32::MAX))
            .collect();

        let row_len = grid.depth as usize * grid.columns as usize;
        if row_len == 0 {
            return;
        }
        let plane = z as usize * grid.columns as usize..(z as usize + 1) * grid.columns as usize;

        buffer
            .par_chunks_mut(row_len)
            .enumerate()
            .for_each(|(y, grid_row)| {
                let y = y as u32;
                let first = row_bins.partition_point(|&bin| bin < y);
                let last = row_bins.partition_point(|&bin| bin <= y);
                let plane_row = &mut grid_row[plane.clone()];

                for r in first..last {
                    let offset = r * columns as usize;
                    for (c, bin) in column_bins.iter().enumerate() {
                        let (Some(x), Some(&sample)) = (bin, samples.get(offset + c)) else {
                            continue;
                        };
                        plane_row[*x as usize] += accumulator.weight(sample);
                    }
                }
            });
    }
}

impl ComputeEngine for CpuEngine {
    fn allocate_accumulation_buffer(
        &mut self,
        element_size: usize,
        element_count: usize,
    ) -> Result<BufferHandle, EngineError> {
        if element_size != size_of::<f32>() {
            return Err(EngineError::UnsupportedElementSize(element_size));
        }
        self.buffers.push(vec![0.0; element_count]);
        Ok(BufferHandle(self.buffers.len() - 1))
    }

    fn accumulate(
        &mut self,
        kernel: Kernel,
        constants: &SliceConstants,
        inputs: &[&[u8]],
        outputs: &[BufferHandle],
    ) -> Result<(), EngineError> {
        if kernel.is_resolve() {
            return Err(EngineError::WrongKernel(kernel));
        }
        let accumulators = kernel.accumulators();
        check_arity(kernel, "inputs", 1, inputs.len())?;
        check_arity(kernel, "outputs", accumulators.len(), outputs.len())?;

        let voxels = constants.grid().voxel_count();
        for &handle in outputs {
            self.sized_buffer(handle, voxels)?;
        }

        let samples = Self::decode_samples(inputs[0], constants)?;
        let Some(z) = constants.depth_bin() else {
            trace!(slice = constants.slice_index, "slice falls outside the grid");
            return Ok(());
        };

        for (&handle, &accumulator) in outputs.iter().zip(accumulators) {
            let buffer = &mut self.buffers[handle.0];
            Self::bin_slice(buffer, accumulator, constants, &samples, z);
        }
        Ok(())
    }

    fn resolve(
        &mut self,
        kernel: Kernel,
        sources: &[BufferHandle],
        target: BufferHandle,
    ) -> Result<(), EngineError> {
        if !kernel.is_resolve() {
            return Err(EngineError::WrongKernel(kernel));
        }
        check_arity(kernel, "sources", kernel.accumulators().len(), sources.len())?;
        if sources.contains(&target) {
            return Err(EngineError::AliasedBuffer(target));
        }

        let len = self.buffer(target)?.len();
        for &handle in sources {
            self.sized_buffer(handle, len)?;
        }

        let mut output = std::mem::take(&mut self.buffers[target.0]);
        {
            let out = ArrayViewMut1::from(output.as_mut_slice());
            let view = |handle: BufferHandle| ArrayView1::from(self.buffers[handle.0].as_slice());

            match kernel {
                Kernel::ResolveMeans => {
                    Zip::from(out)
                        .and(view(sources[0]))
                        .and(view(sources[1]))
                        .par_for_each(|o, &sum, &count| {
                            *o = if count > 0.0 { sum / count } else { 0.0 };
                        });
                }
                Kernel::ResolveStdDev => {
                    Zip::from(out)
                        .and(view(sources[0]))
                        .and(view(sources[1]))
                        .and(view(sources[2]))
                        .par_for_each(|o, &sum, &squares, &count| {
                            *o = if count > 0.0 {
                                let mean = sum / count;
                                (squares / count - mean * mean).max(0.0).sqrt()
                            } else {
                                0.0
                            };
                        });
                }
                // rejected above
                Kernel::VoxelizeMeans | Kernel::VoxelizeStdDev => {}
            }
        }
        self.buffers[target.0] = output;
        Ok(())
    }

    fn read_buffer(&self, handle: BufferHandle) -> Result<Vec<u8>, EngineError> {
        let values: Vec<f32> = self.buffer(handle)?.iter().map(|&v| v as f32).collect();
        Ok(bytemuck::cast_slice(&values).to_vec())
    }
}
