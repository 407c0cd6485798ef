use crate::dicom_file::DicomFile;
use crate::property::AttributeError;

use bytemuck::{Pod, Zeroable};

/// Relative slack added before flooring a scaled position to a voxel index.
const BIN_SLACK: f64 = 1e-6;

/// Dimensions of the output voxel grid.
///
/// The grid is stored as one tiled image: the `depth` planes sit side by
/// side, so the image is `columns * depth` wide and `rows` high.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VolumeGrid {
    pub columns: u32,
    pub rows: u32,
    pub depth: u32,
}

impl VolumeGrid {
    /// Grid covering `slices` slices of `columns` x `rows` pixels with
    /// physical `spacing`, at the requested physical `voxel_size`.
    ///
    /// Every axis is rounded up. Columns are then rounded up to an even
    /// count, since two 16 bit samples share one 32 bit storage element.
    pub fn new(
        spacing: [f64; 3],
        columns: u32,
        rows: u32,
        slices: usize,
        voxel_size: [f64; 3],
    ) -> Self {
        let extent = |spacing: f64, count: f64, voxel: f64| (spacing * count / voxel).ceil() as u32;

        let raw_columns = extent(spacing[0], f64::from(columns), voxel_size[0]);
        Self {
            columns: raw_columns + raw_columns % 2,
            rows: extent(spacing[1], f64::from(rows), voxel_size[1]),
            depth: extent(spacing[2], slices as f64, voxel_size[2]),
        }
    }

    /// Grid derived from the geometry of one slice of a `slices` long series.
    pub fn from_file(
        file: &DicomFile,
        slices: usize,
        voxel_size: [f64; 3],
    ) -> Result<Self, AttributeError> {
        Ok(Self::new(
            file.spacings()?,
            file.columns()?,
            file.rows()?,
            slices,
            voxel_size,
        ))
    }

    pub fn voxel_count(&self) -> usize {
        self.columns as usize * self.rows as usize * self.depth as usize
    }

    /// Width of the tiled image.
    pub fn image_width(&self) -> u32 {
        self.columns * self.depth
    }

    /// Height of the tiled image.
    pub fn image_height(&self) -> u32 {
        self.rows
    }

    /// Linear index of voxel (x, y, z) in the tiled image.
    #[inline]
    pub fn index(&self, x: u32, y: u32, z: u32) -> usize {
        (y as usize * self.depth as usize + z as usize) * self.columns as usize + x as usize
    }
}

/// Per-slice constants handed to the compute engine with the slice pixels.
///
/// Laid out as a GPU constant buffer: 4 byte fields, padded to 64 bytes.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SliceConstants {
    /// Position of the slice along the series, `slice_index * spacing_z`.
    pub z_position: f32,
    /// Ordinal of the slice in sequence order.
    pub slice_index: u32,
    pub slice_columns: u32,
    pub slice_rows: u32,
    pub bytes_per_sample: u32,
    pub samples_per_pixel: u32,
    pub grid_columns: u32,
    pub grid_rows: u32,
    pub grid_depth: u32,
    pub spacing_x: f32,
    pub spacing_y: f32,
    pub voxel_x: f32,
    pub voxel_y: f32,
    pub voxel_z: f32,
    pub _padding: [u32; 2],
}

impl SliceConstants {
    /// Constants placing `file`, the `slice_index`-th slice of the series,
    /// into `grid`.
    pub fn for_slice(
        file: &DicomFile,
        slice_index: u32,
        grid: VolumeGrid,
        voxel_size: [f64; 3],
    ) -> Result<Self, AttributeError> {
        let [spacing_x, spacing_y, spacing_z] = file.spacings()?;
        Ok(Self {
            z_position: (spacing_z * f64::from(slice_index)) as f32,
            slice_index,
            slice_columns: file.columns()?,
            slice_rows: file.rows()?,
            bytes_per_sample: file.bytes_allocated()?,
            samples_per_pixel: file.samples_per_pixel()?,
            grid_columns: grid.columns,
            grid_rows: grid.rows,
            grid_depth: grid.depth,
            spacing_x: spacing_x as f32,
            spacing_y: spacing_y as f32,
            voxel_x: voxel_size[0] as f32,
            voxel_y: voxel_size[1] as f32,
            voxel_z: voxel_size[2] as f32,
            _padding: [0; 2],
        })
    }

    pub fn grid(&self) -> VolumeGrid {
        VolumeGrid {
            columns: self.grid_columns,
            rows: self.grid_rows,
            depth: self.grid_depth,
        }
    }

    /// Voxel index of a physical `position`, computed in 64 bit. The slack
    /// absorbs the 32 bit rounding of the fields, so a position on a voxel
    /// boundary falls into the upper voxel.
    fn bin(position: f64, voxel: f32, extent: u32) -> Option<u32> {
        let scaled = position / f64::from(voxel);
        let bin = (scaled + scaled.abs() * BIN_SLACK).floor();
        (bin >= 0.0 && bin < f64::from(extent)).then_some(bin as u32)
    }

    /// Grid plane this slice falls into.
    pub fn depth_bin(&self) -> Option<u32> {
        Self::bin(f64::from(self.z_position), self.voxel_z, self.grid_depth)
    }

    /// Grid column of slice column `column`.
    pub fn column_bin(&self, column: u32) -> Option<u32> {
        Self::bin(
            f64::from(column) * f64::from(self.spacing_x),
            self.voxel_x,
            self.grid_columns,
        )
    }

    /// Grid row of slice row `row`.
    pub fn row_bin(&self, row: u32) -> Option<u32> {
        Self::bin(
            f64::from(row) * f64::from(self.spacing_y),
            self.voxel_y,
            self.grid_rows,
        )
    }
}
