//! Output sinks persisting the finished voxel grid.

use image::{ImageBuffer, ImageFormat, Luma};
use rayon::prelude::*;
use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::Path,
};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::info;

/// Size of the raw dump header: width, height and bytes per pixel.
pub const RAW_HEADER_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error(
        "{width}x{height} image with {bytes_per_pixel} bytes per pixel needs {expected} bytes, got {found}"
    )]
    SizeMismatch {
        width: u32,
        height: u32,
        bytes_per_pixel: u32,
        expected: usize,
        found: usize,
    },

    #[error("Raw dump is {0} bytes long, shorter than its header")]
    MissingHeader(usize),

    #[error("Unsupported pixel size of {0} bytes, expected 32 bit floats")]
    UnsupportedPixelSize(u32),
}

fn check_size(data: &[u8], width: u32, height: u32, bytes_per_pixel: u32) -> Result<(), SinkError> {
    let expected = width as usize * height as usize * bytes_per_pixel as usize;
    if data.len() != expected {
        return Err(SinkError::SizeMismatch {
            width,
            height,
            bytes_per_pixel,
            expected,
            found: data.len(),
        });
    }
    Ok(())
}

fn floats(data: &[u8]) -> impl Iterator<Item = f32> + '_ {
    data.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Write through a temporary sibling of `destination` that is renamed into
/// place once complete. A failed write leaves no file behind.
fn write_staged<F>(destination: &Path, write: F) -> Result<(), SinkError>
where
    F: FnOnce(&mut BufWriter<&mut File>) -> Result<(), SinkError>,
{
    let directory = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut staged = NamedTempFile::new_in(directory)?;
    {
        let mut writer = BufWriter::new(staged.as_file_mut());
        write(&mut writer)?;
        writer.flush()?;
    }
    staged.persist(destination).map_err(|e| e.error)?;
    Ok(())
}

pub trait OutputSink: Send {
    /// Write `width` x `height` pixels of `bytes_per_pixel` bytes each.
    fn persist(
        &mut self,
        data: &[u8],
        width: u32,
        height: u32,
        bytes_per_pixel: u32,
        destination: &Path,
    ) -> Result<(), SinkError>;
}

/// Writes the pixels verbatim behind a little endian
/// `width, height, bytes_per_pixel` header.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawSink;

impl OutputSink for RawSink {
    fn persist(
        &mut self,
        data: &[u8],
        width: u32,
        height: u32,
        bytes_per_pixel: u32,
        destination: &Path,
    ) -> Result<(), SinkError> {
        check_size(data, width, height, bytes_per_pixel)?;

        write_staged(destination, |writer| {
            writer.write_all(&width.to_le_bytes())?;
            writer.write_all(&height.to_le_bytes())?;
            writer.write_all(&bytes_per_pixel.to_le_bytes())?;
            writer.write_all(data)?;
            Ok(())
        })?;

        info!(
            "Wrote {}x{} raw image to {}",
            width,
            height,
            destination.display()
        );
        Ok(())
    }
}

/// An image read back from a raw dump.
#[derive(Debug, Clone, PartialEq)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u32,
    pub data: Vec<u8>,
}

impl RawImage {
    /// Pixels as 32 bit floats, if that is what they hold.
    pub fn to_f32(&self) -> Option<Vec<f32>> {
        (self.bytes_per_pixel == 4).then(|| floats(&self.data).collect())
    }
}

/// Read a file written by [`RawSink`].
pub fn read_raw(path: impl AsRef<Path>) -> Result<RawImage, SinkError> {
    let bytes = fs::read(path)?;
    if bytes.len() < RAW_HEADER_LEN {
        return Err(SinkError::MissingHeader(bytes.len()));
    }
    let (header, data) = bytes.split_at(RAW_HEADER_LEN);
    let field = |i: usize| u32::from_le_bytes([header[i], header[i + 1], header[i + 2], header[i + 3]]);
    let (width, height, bytes_per_pixel) = (field(0), field(4), field(8));

    check_size(data, width, height, bytes_per_pixel)?;
    Ok(RawImage {
        width,
        height,
        bytes_per_pixel,
        data: data.to_vec(),
    })
}

/// Writes an 8 bit grayscale preview, stretching the value range to
/// 0..=255. The format follows the destination extension.
#[derive(Debug, Default, Clone, Copy)]
pub struct PreviewSink;

impl PreviewSink {
    #[inline]
    fn normalize_to_u8(value: f32, min: f32, range: f32) -> u8 {
        if range > 0.0 {
            (((value - min) / range) * 255.0).round().clamp(0.0, 255.0) as u8
        } else {
            0
        }
    }
}

impl OutputSink for PreviewSink {
    fn persist(
        &mut self,
        data: &[u8],
        width: u32,
        height: u32,
        bytes_per_pixel: u32,
        destination: &Path,
    ) -> Result<(), SinkError> {
        if bytes_per_pixel != 4 {
            return Err(SinkError::UnsupportedPixelSize(bytes_per_pixel));
        }
        check_size(data, width, height, bytes_per_pixel)?;
        let format = ImageFormat::from_path(destination)?;

        let values: Vec<f32> = floats(data).collect();
        let (min, max) = values
            .iter()
            .filter(|v| v.is_finite())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let range = max - min;

        let pixels: Vec<u8> = values
            .par_iter()
            .map(|&v| Self::normalize_to_u8(v, min, range))
            .collect();

        let image = ImageBuffer::<Luma<u8>, _>::from_raw(width, height, pixels).ok_or(
            SinkError::SizeMismatch {
                width,
                height,
                bytes_per_pixel: 1,
                expected: width as usize * height as usize,
                found: values.len(),
            },
        )?;
        write_staged(destination, |writer| Ok(image.write_to(writer, format)?))?;

        info!(
            "Wrote {}x{} preview to {}",
            width,
            height,
            destination.display()
        );
        Ok(())
    }
}
