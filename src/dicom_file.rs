use crate::decoder::{Attributes, DecodeError, decode, tag_id};

use dicom::core::Tag;
use dicom_dictionary_std::tags;
use std::{
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
};

/// Tags decoded in the first pass over a directory: enough to place and
/// dimension a slice, without its pixel data.
pub const METADATA_TAGS: &[Tag] = &[
    tags::SAMPLES_PER_PIXEL,
    tags::BITS_ALLOCATED,
    tags::ROWS,
    tags::COLUMNS,
    tags::SLICE_THICKNESS,
    tags::WINDOW_CENTER,
    tags::WINDOW_WIDTH,
    tags::PIXEL_SPACING,
    tags::IMAGE_POSITION_PATIENT,
    tags::IMAGE_ORIENTATION_PATIENT,
    tags::PATIENT_POSITION,
];

/// [`METADATA_TAGS`] plus the pixel data.
pub const FULL_TAGS: &[Tag] = &[
    tags::SAMPLES_PER_PIXEL,
    tags::BITS_ALLOCATED,
    tags::ROWS,
    tags::COLUMNS,
    tags::PIXEL_DATA,
    tags::SLICE_THICKNESS,
    tags::WINDOW_CENTER,
    tags::WINDOW_WIDTH,
    tags::PIXEL_SPACING,
    tags::IMAGE_POSITION_PATIENT,
    tags::IMAGE_ORIENTATION_PATIENT,
    tags::PATIENT_POSITION,
];

/// One member of a series, decoded eagerly on construction.
///
/// A `DicomFile` only exists fully decoded: a stream that fails to decode
/// never yields a value. It is read-only afterwards, see [`crate::property`]
/// for the typed accessors.
#[derive(Debug, Clone)]
pub struct DicomFile {
    path: PathBuf,
    tags: Vec<Tag>,
    attributes: Attributes,
}

impl DicomFile {
    /// Open and decode the file at `path`, keeping the values of `tags`.
    pub fn open(path: impl AsRef<Path>, tags: &[Tag]) -> Result<Self, DecodeError> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        Self::from_reader(path, reader, tags)
    }

    /// Open with the lightweight [`METADATA_TAGS`] allow-list.
    pub fn open_metadata(path: impl AsRef<Path>) -> Result<Self, DecodeError> {
        Self::open(path, METADATA_TAGS)
    }

    /// Open with the [`FULL_TAGS`] allow-list, pixel data included.
    pub fn open_full(path: impl AsRef<Path>) -> Result<Self, DecodeError> {
        Self::open(path, FULL_TAGS)
    }

    /// Decode from any byte stream. `path` only identifies the file.
    pub fn from_reader(
        path: impl Into<PathBuf>,
        reader: impl Read,
        tags: &[Tag],
    ) -> Result<Self, DecodeError> {
        let attributes = decode(reader, tags)?;
        Ok(Self {
            path: path.into(),
            tags: tags.to_vec(),
            attributes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The allow-list this file was decoded with.
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Raw value bytes of `tag`, if it was decoded.
    pub fn attribute(&self, tag: Tag) -> Option<&[u8]> {
        self.attributes.get(&tag_id(tag)).map(Vec::as_slice)
    }

    /// Number of decoded attributes.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::slice_stream;
    use std::io::Write;

    const AXIAL: &str = "1\\0\\0\\0\\1\\0";

    #[test]
    fn metadata_pass_skips_pixel_data() {
        let stream = slice_stream(4, 2, "0.5\\0.5", "0\\0\\0", AXIAL, 7);

        let file = DicomFile::from_reader("a.dcm", stream.as_slice(), METADATA_TAGS).unwrap();

        assert!(file.attribute(tags::PIXEL_DATA).is_none());
        assert!(file.attribute(tags::ROWS).is_some());
        assert_eq!(file.tags(), METADATA_TAGS);
        assert_eq!(file.path(), Path::new("a.dcm"));
    }

    #[test]
    fn full_pass_keeps_pixel_data() {
        let stream = slice_stream(4, 2, "0.5\\0.5", "0\\0\\0", AXIAL, 7);

        let file = DicomFile::from_reader("a.dcm", stream.as_slice(), FULL_TAGS).unwrap();

        assert_eq!(file.attribute(tags::PIXEL_DATA).map(<[u8]>::len), Some(16));
        // PatientPosition and the window attributes are absent from the stream
        assert_eq!(file.len(), 9);
    }

    #[test]
    fn opens_from_disk() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&slice_stream(2, 2, "1\\1", "0\\0\\1", AXIAL, 3))
            .unwrap();

        let file = DicomFile::open_full(tmp.path()).unwrap();

        assert_eq!(file.path(), tmp.path());
        assert_eq!(file.attribute(tags::PIXEL_DATA).unwrap(), [3, 0, 3, 0, 3, 0, 3, 0]);
    }

    #[test]
    fn missing_file_fails() {
        let err = DicomFile::open_metadata("does/not/exist.dcm").unwrap_err();
        assert!(matches!(err, DecodeError::Io(_)));
    }
}
