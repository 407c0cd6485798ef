//! Synthetic attribute streams for unit tests.

use crate::decoder::PREAMBLE_LEN;
use dicom::core::Tag;
use dicom_dictionary_std::tags;

pub(crate) struct StreamBuilder {
    bytes: Vec<u8>,
}

impl StreamBuilder {
    pub(crate) fn new() -> Self {
        let mut bytes = vec![0u8; PREAMBLE_LEN];
        bytes.extend_from_slice(b"DICM");
        Self { bytes }
    }

    /// Encode a single explicit VR record.
    pub(crate) fn record(tag: Tag, vr: &[u8; 2], value: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(12 + value.len());
        bytes.extend_from_slice(&tag.group().to_le_bytes());
        bytes.extend_from_slice(&tag.element().to_le_bytes());
        bytes.extend_from_slice(vr);
        match vr {
            b"OB" | b"OW" | b"OF" | b"SQ" | b"UT" | b"UN" => {
                bytes.extend_from_slice(&[0, 0]);
                bytes.extend_from_slice(&(value.len() as u32).to_le_bytes());
            }
            _ => bytes.extend_from_slice(&(value.len() as u16).to_le_bytes()),
        }
        bytes.extend_from_slice(value);
        bytes
    }

    pub(crate) fn element(mut self, tag: Tag, vr: &[u8; 2], value: &[u8]) -> Self {
        self.bytes.extend(Self::record(tag, vr, value));
        self
    }

    /// Text value padded to even length.
    pub(crate) fn text(self, tag: Tag, vr: &[u8; 2], value: &str) -> Self {
        let mut value = value.as_bytes().to_vec();
        if value.len() % 2 == 1 {
            value.push(b' ');
        }
        self.element(tag, vr, &value)
    }

    pub(crate) fn us(self, tag: Tag, value: u16) -> Self {
        self.element(tag, b"US", &value.to_le_bytes())
    }

    pub(crate) fn sequence(mut self, tag: Tag, length: u32) -> Self {
        self.bytes.extend_from_slice(&tag.group().to_le_bytes());
        self.bytes.extend_from_slice(&tag.element().to_le_bytes());
        self.bytes.extend_from_slice(b"SQ\0\0");
        self.bytes.extend_from_slice(&length.to_le_bytes());
        self
    }

    pub(crate) fn delimiter(mut self, tag: Tag, length: u32) -> Self {
        self.bytes.extend_from_slice(&tag.group().to_le_bytes());
        self.bytes.extend_from_slice(&tag.element().to_le_bytes());
        self.bytes.extend_from_slice(&length.to_le_bytes());
        self
    }

    pub(crate) fn raw(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub(crate) fn build(self) -> Vec<u8> {
        self.bytes
    }
}

/// A 16 bit axial slice at `position`, columns x rows, filled with `value`.
pub(crate) fn slice_stream(
    columns: u16,
    rows: u16,
    spacing: &str,
    position: &str,
    orientation: &str,
    value: u16,
) -> Vec<u8> {
    let pixels: Vec<u8> = std::iter::repeat_n(value.to_le_bytes(), columns as usize * rows as usize)
        .flatten()
        .collect();
    StreamBuilder::new()
        .text(tags::SLICE_THICKNESS, b"DS", "1")
        .text(tags::IMAGE_POSITION_PATIENT, b"DS", position)
        .text(tags::IMAGE_ORIENTATION_PATIENT, b"DS", orientation)
        .us(tags::SAMPLES_PER_PIXEL, 1)
        .us(tags::ROWS, rows)
        .us(tags::COLUMNS, columns)
        .text(tags::PIXEL_SPACING, b"DS", spacing)
        .us(tags::BITS_ALLOCATED, 16)
        .element(tags::PIXEL_DATA, b"OW", &pixels)
        .build()
}
