//! Typed views over the raw attribute values of a [`DicomFile`].
//!
//! Binary attributes (US/UL) are read as little endian 2 or 4 byte
//! unsigned integers. Decimal strings (DS) are split on the DICOM value
//! separator `\` and parsed component by component.

use crate::dicom_file::DicomFile;

use dicom::core::Tag;
use dicom_dictionary_std::tags;
use thiserror::Error;

/// Separator between the values of a multi-valued string attribute.
pub const VALUE_SEPARATOR: char = '\\';

#[derive(Debug, Error)]
pub enum AttributeError {
    #[error("Attribute {0} not found")]
    NotFound(Tag),

    #[error("Attribute {tag} is {len} bytes long, expected 2 or 4")]
    InvalidLength { tag: Tag, len: usize },

    #[error("Attribute {tag} holds an invalid number: {value:?}")]
    InvalidNumber { tag: Tag, value: String },

    #[error("Attribute {tag} has {found} values, expected {expected}")]
    InvalidMultiplicity {
        tag: Tag,
        expected: usize,
        found: usize,
    },

    #[error("Attribute {tag} value {value} is out of range")]
    OutOfRange { tag: Tag, value: u32 },
}

impl DicomFile {
    /// Raw value bytes, failing when the attribute was not decoded.
    pub fn get_attribute(&self, tag: Tag) -> Result<&[u8], AttributeError> {
        self.attribute(tag).ok_or(AttributeError::NotFound(tag))
    }

    /// A 2 or 4 byte unsigned integer attribute.
    pub fn get_uint(&self, tag: Tag) -> Result<u32, AttributeError> {
        match *self.get_attribute(tag)? {
            [a, b] => Ok(u32::from(u16::from_le_bytes([a, b]))),
            [a, b, c, d] => Ok(u32::from_le_bytes([a, b, c, d])),
            ref other => Err(AttributeError::InvalidLength {
                tag,
                len: other.len(),
            }),
        }
    }

    /// An unsigned integer attribute converted to `T`.
    pub fn get_as<T: TryFrom<u32>>(&self, tag: Tag) -> Result<T, AttributeError> {
        let value = self.get_uint(tag)?;
        T::try_from(value).map_err(|_| AttributeError::OutOfRange { tag, value })
    }

    /// Text value with its trailing padding removed.
    pub fn get_string(&self, tag: Tag) -> Result<String, AttributeError> {
        let bytes = self.get_attribute(tag)?;
        Ok(String::from_utf8_lossy(bytes)
            .trim_end_matches([' ', '\0'])
            .to_string())
    }

    /// All values of a multi-valued decimal string.
    pub fn get_float_vector(&self, tag: Tag) -> Result<Vec<f64>, AttributeError> {
        let text = self.get_string(tag)?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        text.split(VALUE_SEPARATOR)
            .map(|token| {
                let token = token.trim();
                token.parse().map_err(|_| AttributeError::InvalidNumber {
                    tag,
                    value: token.to_string(),
                })
            })
            .collect()
    }

    /// Exactly `N` values of a multi-valued decimal string.
    pub fn get_floats<const N: usize>(&self, tag: Tag) -> Result<[f64; N], AttributeError> {
        let values = self.get_float_vector(tag)?;
        let found = values.len();
        values
            .try_into()
            .map_err(|_| AttributeError::InvalidMultiplicity {
                tag,
                expected: N,
                found,
            })
    }

    /// First value of a decimal string.
    pub fn get_float(&self, tag: Tag) -> Result<f64, AttributeError> {
        self.get_float_vector(tag)?
            .first()
            .copied()
            .ok_or(AttributeError::InvalidMultiplicity {
                tag,
                expected: 1,
                found: 0,
            })
    }

    pub fn columns(&self) -> Result<u32, AttributeError> {
        self.get_uint(tags::COLUMNS)
    }

    pub fn rows(&self) -> Result<u32, AttributeError> {
        self.get_uint(tags::ROWS)
    }

    pub fn samples_per_pixel(&self) -> Result<u32, AttributeError> {
        self.get_uint(tags::SAMPLES_PER_PIXEL)
    }

    pub fn bits_allocated(&self) -> Result<u32, AttributeError> {
        self.get_uint(tags::BITS_ALLOCATED)
    }

    pub fn bytes_allocated(&self) -> Result<u32, AttributeError> {
        Ok(self.bits_allocated()? / 8)
    }

    /// Bytes per row of pixel data.
    pub fn pitch(&self) -> Result<usize, AttributeError> {
        Ok(self.samples_per_pixel()? as usize
            * self.columns()? as usize
            * self.bytes_allocated()? as usize)
    }

    /// Expected size in bytes of the pixel data.
    pub fn length(&self) -> Result<usize, AttributeError> {
        Ok(self.pitch()? * self.rows()? as usize)
    }

    /// Physical spacing `[x, y, z]` in millimeters: the two in-plane values
    /// of PixelSpacing followed by SliceThickness.
    pub fn spacings(&self) -> Result<[f64; 3], AttributeError> {
        let [x, y] = self.get_floats::<2>(tags::PIXEL_SPACING)?;
        let z = self.get_float(tags::SLICE_THICKNESS)?;
        Ok([x, y, z])
    }

    /// Raw ImageOrientationPatient text, as compared across a series.
    pub fn image_orientation(&self) -> Result<String, AttributeError> {
        self.get_string(tags::IMAGE_ORIENTATION_PATIENT)
    }

    /// Row direction cosines followed by column direction cosines.
    pub fn orientation_cosines(&self) -> Result<[f64; 6], AttributeError> {
        self.get_floats(tags::IMAGE_ORIENTATION_PATIENT)
    }

    /// ImagePositionPatient, the world position of the first pixel.
    pub fn position(&self) -> Result<[f64; 3], AttributeError> {
        self.get_floats(tags::IMAGE_POSITION_PATIENT)
    }

    pub fn window_center(&self) -> Result<f64, AttributeError> {
        self.get_float(tags::WINDOW_CENTER)
    }

    pub fn window_width(&self) -> Result<f64, AttributeError> {
        self.get_float(tags::WINDOW_WIDTH)
    }

    /// Borrowed view of the pixel data, which can be large.
    pub fn pixel_data(&self) -> Result<&[u8], AttributeError> {
        self.get_attribute(tags::PIXEL_DATA)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dicom_file::FULL_TAGS;
    use crate::testing::{StreamBuilder, slice_stream};

    fn file(stream: Vec<u8>) -> DicomFile {
        DicomFile::from_reader("test.dcm", stream.as_slice(), FULL_TAGS).unwrap()
    }

    #[test]
    fn reads_unsigned_integers() {
        let file = file(
            StreamBuilder::new()
                .us(tags::ROWS, 512)
                .element(tags::COLUMNS, b"UL", &70_000u32.to_le_bytes())
                .element(tags::BITS_ALLOCATED, b"US", &[1, 2, 3])
                .build(),
        );

        assert_eq!(file.rows().unwrap(), 512);
        assert_eq!(file.get_as::<u16>(tags::ROWS).unwrap(), 512);
        assert_eq!(file.columns().unwrap(), 70_000);
        assert!(matches!(
            file.get_as::<u16>(tags::COLUMNS),
            Err(AttributeError::OutOfRange { value: 70_000, .. })
        ));
        assert!(matches!(
            file.bits_allocated(),
            Err(AttributeError::InvalidLength { len: 3, .. })
        ));
    }

    #[test]
    fn missing_attribute_is_not_found() {
        let file = file(StreamBuilder::new().us(tags::ROWS, 1).build());

        let err = file.columns().unwrap_err();

        assert!(matches!(err, AttributeError::NotFound(tag) if tag == tags::COLUMNS));
        assert!(matches!(
            file.pixel_data(),
            Err(AttributeError::NotFound(_))
        ));
    }

    #[test]
    fn spacings_combine_pixel_spacing_and_thickness() {
        let file = file(
            StreamBuilder::new()
                .text(tags::SLICE_THICKNESS, b"DS", "2.5")
                .text(tags::PIXEL_SPACING, b"DS", "0.7\\0.8")
                .build(),
        );

        assert_eq!(file.spacings().unwrap(), [0.7, 0.8, 2.5]);
    }

    #[test]
    fn strings_lose_padding() {
        let file = file(
            StreamBuilder::new()
                .element(tags::PATIENT_POSITION, b"CS", b"HFS\0")
                .text(tags::IMAGE_ORIENTATION_PATIENT, b"DS", "1\\0\\0\\0\\1\\0")
                .build(),
        );

        assert_eq!(file.get_string(tags::PATIENT_POSITION).unwrap(), "HFS");
        assert_eq!(file.image_orientation().unwrap(), "1\\0\\0\\0\\1\\0");
        assert_eq!(
            file.orientation_cosines().unwrap(),
            [1.0, 0.0, 0.0, 0.0, 1.0, 0.0]
        );
    }

    #[test]
    fn float_vectors_reject_garbage_and_bad_multiplicity() {
        let file = file(
            StreamBuilder::new()
                .text(tags::IMAGE_POSITION_PATIENT, b"DS", "1\\2")
                .text(tags::PIXEL_SPACING, b"DS", "0.5\\abc")
                .element(tags::WINDOW_CENTER, b"DS", &[])
                .text(tags::WINDOW_WIDTH, b"DS", " 400 \\ 350")
                .build(),
        );

        assert!(matches!(
            file.position(),
            Err(AttributeError::InvalidMultiplicity {
                expected: 3,
                found: 2,
                ..
            })
        ));
        assert!(matches!(
            file.spacings(),
            Err(AttributeError::InvalidNumber { ref value, .. }) if value == "abc"
        ));
        assert!(file.get_float_vector(tags::WINDOW_CENTER).unwrap().is_empty());
        assert!(matches!(
            file.window_center(),
            Err(AttributeError::InvalidMultiplicity { found: 0, .. })
        ));
        assert_eq!(file.window_width().unwrap(), 400.0);
    }

    #[test]
    fn derived_sizes_follow_pixel_layout() {
        let file = file(slice_stream(6, 4, "1\\1", "0\\0\\0", "1\\0\\0\\0\\1\\0", 9));

        assert_eq!(file.bytes_allocated().unwrap(), 2);
        assert_eq!(file.pitch().unwrap(), 12);
        assert_eq!(file.length().unwrap(), 48);
        assert_eq!(file.pixel_data().unwrap().len(), 48);
    }
}
