//! Two stage voxelization of a series.
//!
//! The producer reads the metadata of every file in the input directory,
//! orders the slices by depth, then decodes them fully one after another and
//! hands them over through a bounded [`PipelineQueue`]. The consumer sizes the
//! voxel grid from the first slice it receives, accumulates every slice with
//! a [`ComputeEngine`] and finally persists the resolved grid through an
//! [`OutputSink`].
//!
//! The first fatal error of either stage aborts the queue, which unblocks the
//! other stage. Both are joined before [`voxelize`] returns that error.

use crate::config::{ConfigError, VoxelizeConfig};
use crate::dicom_file::DicomFile;
use crate::engine::{BufferHandle, ComputeEngine, CpuEngine, EngineError};
use crate::enums::{Kernel, OutputFormat, VoxelizeMode};
use crate::property::AttributeError;
use crate::queue::{PipelineQueue, QueueError};
use crate::scene::{self, GeometryError};
use crate::sink::{OutputSink, PreviewSink, RawSink, SinkError};
use crate::volume::{SliceConstants, VolumeGrid};
use crate::volume_loader::{LoaderError, VolumeLoader};

use std::{
    mem,
    path::PathBuf,
    thread::{self, ScopedJoinHandle},
};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Bytes per voxel of the resolved grid.
const VOXEL_BYTES: u32 = mem::size_of::<f32>() as u32;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Loading failed: {0}")]
    Loader(#[from] LoaderError),

    #[error("Sequencing failed: {0}")]
    Geometry(#[from] GeometryError),

    #[error("Attribute error: {0}")]
    Attribute(#[from] AttributeError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Compute engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Output error: {0}")]
    Sink(#[from] SinkError),

    #[error("The series holds no slices")]
    NoSlices,

    #[error("The {0} stage panicked")]
    StagePanicked(&'static str),
}

/// A fully decoded slice on its way to the consumer.
#[derive(Debug)]
pub struct SliceItem {
    /// Position of the slice in depth order.
    pub ordinal: u32,
    /// Number of slices in the series.
    pub total: usize,
    pub file: DicomFile,
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelizeReport {
    pub grid: VolumeGrid,
    pub slices: usize,
    pub mode: VoxelizeMode,
    pub output: PathBuf,
}

/// Voxelize with the in-process engine and the sink selected by
/// `config.output_format`.
pub fn run(config: &VoxelizeConfig) -> Result<VoxelizeReport, PipelineError> {
    let mut engine = CpuEngine::new();
    match config.output_format {
        OutputFormat::Raw => voxelize(config, &mut engine, &mut RawSink),
        OutputFormat::Preview => voxelize(config, &mut engine, &mut PreviewSink),
    }
}

/// Run both stages on their own threads and wait for them.
pub fn voxelize<E, S>(
    config: &VoxelizeConfig,
    engine: &mut E,
    sink: &mut S,
) -> Result<VoxelizeReport, PipelineError>
where
    E: ComputeEngine,
    S: OutputSink,
{
    config.validate()?;
    info!(
        "Voxelizing {} into {:?} voxels of {:?} mm",
        config.input_dir().display(),
        config.mode,
        config.voxel_size
    );

    let queue = PipelineQueue::new(config.queue_capacity);
    let queue = &queue;

    let (produced, consumed) = thread::scope(|scope| {
        let producer = scope.spawn(move || run_stage(queue, || produce(config, queue)));
        let consumer =
            scope.spawn(move || run_stage(queue, || consume(config, queue, engine, sink)));
        (join(producer, "producer"), join(consumer, "consumer"))
    });

    let report = first_failure(produced, consumed)?;
    info!(
        "Wrote {}x{}x{} voxels from {} slices to {}",
        report.grid.columns,
        report.grid.rows,
        report.grid.depth,
        report.slices,
        report.output.display()
    );
    Ok(report)
}

/// Aborts the queue when a stage unwinds, so the other stage cannot block
/// forever.
struct AbortOnPanic<'a>(&'a PipelineQueue<SliceItem>);

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.abort();
        }
    }
}

fn run_stage<T>(
    queue: &PipelineQueue<SliceItem>,
    stage: impl FnOnce() -> Result<T, PipelineError>,
) -> Result<T, PipelineError> {
    let _guard = AbortOnPanic(queue);
    let result = stage();
    if result.is_err() {
        queue.abort();
    }
    result
}

fn join<T>(
    handle: ScopedJoinHandle<'_, Result<T, PipelineError>>,
    stage: &'static str,
) -> Result<T, PipelineError> {
    handle
        .join()
        .unwrap_or(Err(PipelineError::StagePanicked(stage)))
}

/// The error that caused the run to fail, rather than the abort it caused
/// in the other stage.
fn first_failure<T>(
    produced: Result<(), PipelineError>,
    consumed: Result<T, PipelineError>,
) -> Result<T, PipelineError> {
    match (produced, consumed) {
        (Ok(()), consumed) => consumed,
        (Err(PipelineError::Queue(QueueError::Aborted)), Err(err)) => Err(err),
        (Err(err), _) => Err(err),
    }
}

fn produce(
    config: &VoxelizeConfig,
    queue: &PipelineQueue<SliceItem>,
) -> Result<(), PipelineError> {
    info!("Scanning {}", config.input_dir().display());
    let files =
        VolumeLoader::load_metadata_from_directory(config.input_dir(), config.extension.as_deref())?;

    let files = scene::sequence(files)?;
    let total = files.len();

    info!("Streaming {} slices", total);
    for (ordinal, file) in (0u32..).zip(files) {
        let file = VolumeLoader::load_full(file.path())?;
        queue.enqueue(SliceItem {
            ordinal,
            total,
            file,
        })?;
    }

    queue.finish();
    Ok(())
}

fn consume<E, S>(
    config: &VoxelizeConfig,
    queue: &PipelineQueue<SliceItem>,
    engine: &mut E,
    sink: &mut S,
) -> Result<VoxelizeReport, PipelineError>
where
    E: ComputeEngine,
    S: OutputSink,
{
    let Some(first) = queue.dequeue()? else {
        return Err(PipelineError::NoSlices);
    };

    let accumulation = Accumulation::allocate(config, &first, engine)?;
    accumulation.add(&first, engine)?;
    let mut slices = 1;

    while let Some(item) = queue.dequeue()? {
        accumulation.add(&item, engine)?;
        slices += 1;
    }

    info!("Resolving {} slices", slices);
    let data = accumulation.resolve(engine)?;
    let grid = accumulation.grid;
    sink.persist(
        &data,
        grid.image_width(),
        grid.image_height(),
        VOXEL_BYTES,
        config.output(),
    )?;

    Ok(VoxelizeReport {
        grid,
        slices,
        mode: config.mode,
        output: config.output().to_path_buf(),
    })
}

/// Engine buffers of one run.
struct Accumulation {
    grid: VolumeGrid,
    voxel_size: [f64; 3],
    mode: VoxelizeMode,
    accumulators: Vec<BufferHandle>,
    target: BufferHandle,
}

impl Accumulation {
    /// Size the grid from the first slice and allocate the accumulator and
    /// output buffers.
    fn allocate<E: ComputeEngine>(
        config: &VoxelizeConfig,
        first: &SliceItem,
        engine: &mut E,
    ) -> Result<Self, PipelineError> {
        let grid = VolumeGrid::from_file(&first.file, first.total, config.voxel_size)?;
        let voxels = grid.voxel_count();
        info!(
            "Allocating {}x{}x{} voxel grid",
            grid.columns, grid.rows, grid.depth
        );

        let accumulators = config
            .mode
            .accumulators()
            .iter()
            .map(|_| engine.allocate_accumulation_buffer(VOXEL_BYTES as usize, voxels))
            .collect::<Result<Vec<_>, _>>()?;
        let target = engine.allocate_accumulation_buffer(VOXEL_BYTES as usize, voxels)?;

        Ok(Self {
            grid,
            voxel_size: config.voxel_size,
            mode: config.mode,
            accumulators,
            target,
        })
    }

    fn add<E: ComputeEngine>(&self, item: &SliceItem, engine: &mut E) -> Result<(), PipelineError> {
        let file = &item.file;
        let constants = SliceConstants::for_slice(file, item.ordinal, self.grid, self.voxel_size)?;

        let pixels = file.pixel_data()?;
        let expected = file.length()?;
        if pixels.len() < expected {
            warn!(
                "{} holds {} bytes of pixel data, expected {}",
                file.path().display(),
                pixels.len(),
                expected
            );
        }

        debug!(
            "Accumulating slice {} of {} ({}) into plane {:?}",
            item.ordinal + 1,
            item.total,
            file.path().display(),
            constants.depth_bin()
        );
        engine.accumulate(
            self.kernel(),
            &constants,
            &[pixels],
            &self.accumulators,
        )?;
        Ok(())
    }

    fn kernel(&self) -> Kernel {
        self.mode.accumulate_kernel()
    }

    fn resolve<E: ComputeEngine>(&self, engine: &mut E) -> Result<Vec<u8>, PipelineError> {
        engine.resolve(self.mode.resolve_kernel(), &self.accumulators, self.target)?;
        Ok(engine.read_buffer(self.target)?)
    }
}
