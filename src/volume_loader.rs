use crate::decoder::DecodeError;
use crate::dicom_file::DicomFile;

use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("No files found in {0}")]
    NoFiles(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// List the regular files of a directory, sorted by path
    ///
    /// # Arguments
    ///
    /// * `path` - Directory holding one series
    /// * `extension` - Only keep files with this extension, compared
    ///   case-insensitively. `None` keeps every file.
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be read or holds no matching file
    pub fn scan_directory(
        path: impl AsRef<Path>,
        extension: Option<&str>,
    ) -> Result<Vec<PathBuf>, LoaderError> {
        let path = path.as_ref();
        let entries = fs::read_dir(path)?.map(|entry| entry.map(|entry| entry.path()));
        let mut paths = Self::matching_files(entries, extension)?;

        if paths.is_empty() {
            return Err(LoaderError::NoFiles(path.to_path_buf()));
        }

        paths.sort();
        debug!("Found {} files in {}", paths.len(), path.display());
        Ok(paths)
    }

    /// Regular files among `entries` with the wanted extension. An entry
    /// that failed to read fails the whole listing.
    fn matching_files(
        entries: impl IntoIterator<Item = io::Result<PathBuf>>,
        extension: Option<&str>,
    ) -> io::Result<Vec<PathBuf>> {
        Ok(entries
            .into_iter()
            .collect::<io::Result<Vec<_>>>()?
            .into_iter()
            .filter(|path| path.is_file())
            .filter(|path| {
                extension.is_none_or(|wanted| {
                    path.extension()
                        .and_then(|s| s.to_str())
                        .is_some_and(|ext| ext.eq_ignore_ascii_case(wanted))
                })
            })
            .collect())
    }

    /// Decode the metadata of each file, keeping the input order
    pub fn load_metadata_files(paths: &[impl AsRef<Path>]) -> Result<Vec<DicomFile>, LoaderError> {
        paths
            .iter()
            .map(|path| Self::decode_with(path.as_ref(), |p| DicomFile::open_metadata(p)))
            .collect()
    }

    /// Scan a directory and decode the metadata of every file found
    pub fn load_metadata_from_directory(
        path: impl AsRef<Path>,
        extension: Option<&str>,
    ) -> Result<Vec<DicomFile>, LoaderError> {
        let paths = Self::scan_directory(&path, extension)?;
        let files = Self::load_metadata_files(&paths)?;
        info!(
            "Read metadata of {} files from {}",
            files.len(),
            path.as_ref().display()
        );
        Ok(files)
    }

    /// Decode a file including its pixel data
    pub fn load_full(path: impl AsRef<Path>) -> Result<DicomFile, LoaderError> {
        Self::decode_with(path.as_ref(), |p| DicomFile::open_full(p))
    }

    fn decode_with<F>(path: &Path, open: F) -> Result<DicomFile, LoaderError>
    where
        F: FnOnce(&Path) -> Result<DicomFile, DecodeError>,
    {
        open(path).map_err(|source| LoaderError::Decode {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::slice_stream;
    use dicom_dictionary_std::tags;
    use std::fs;

    const AXIAL: &str = "1\\0\\0\\0\\1\\0";

    fn write_slice(dir: &Path, name: &str, z: u32) {
        let stream = slice_stream(2, 2, "1\\1", &format!("0\\0\\{z}"), AXIAL, 7);
        fs::write(dir.join(name), stream).unwrap();
    }

    #[test]
    fn scan_keeps_regular_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write_slice(dir.path(), "b.dcm", 1);
        write_slice(dir.path(), "a.DCM", 2);
        write_slice(dir.path(), "c.txt", 3);
        fs::create_dir(dir.path().join("nested.dcm")).unwrap();

        let all = VolumeLoader::scan_directory(dir.path(), None).unwrap();
        let dcm = VolumeLoader::scan_directory(dir.path(), Some("dcm")).unwrap();

        let names = |paths: &[PathBuf]| -> Vec<String> {
            paths
                .iter()
                .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
                .collect()
        };
        assert_eq!(names(&all), ["a.DCM", "b.dcm", "c.txt"]);
        assert_eq!(names(&dcm), ["a.DCM", "b.dcm"]);
    }

    #[test]
    fn empty_directory_has_no_files() {
        let dir = tempfile::tempdir().unwrap();
        write_slice(dir.path(), "slice.ima", 0);

        let err = VolumeLoader::scan_directory(dir.path(), Some("dcm")).unwrap_err();

        assert!(matches!(err, LoaderError::NoFiles(ref p) if p == dir.path()));
    }

    #[test]
    fn missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();

        let err = VolumeLoader::scan_directory(dir.path().join("gone"), None).unwrap_err();

        assert!(matches!(err, LoaderError::Io(_)));
    }

    #[test]
    fn unreadable_entry_fails_the_listing() {
        let dir = tempfile::tempdir().unwrap();
        write_slice(dir.path(), "a.dcm", 0);
        let entries = vec![
            Ok(dir.path().join("a.dcm")),
            Err(io::Error::other("entry vanished")),
        ];

        let err = VolumeLoader::matching_files(entries, None).unwrap_err();

        assert_eq!(err.to_string(), "entry vanished");
    }

    #[test]
    fn metadata_pass_skips_pixel_data() {
        let dir = tempfile::tempdir().unwrap();
        write_slice(dir.path(), "1.dcm", 0);
        write_slice(dir.path(), "2.dcm", 1);

        let files = VolumeLoader::load_metadata_from_directory(dir.path(), None).unwrap();

        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.attribute(tags::PIXEL_DATA).is_none()));
        assert!(files.iter().all(|f| f.attribute(tags::ROWS).is_some()));

        let full = VolumeLoader::load_full(files[0].path()).unwrap();
        assert_eq!(full.attribute(tags::PIXEL_DATA).map(<[u8]>::len), Some(8));
    }

    #[test]
    fn decode_failure_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        write_slice(dir.path(), "good.dcm", 0);
        fs::write(dir.path().join("short.dcm"), [0u8; 40]).unwrap();

        let err = VolumeLoader::load_metadata_from_directory(dir.path(), None).unwrap_err();

        assert!(matches!(
            err,
            LoaderError::Decode { ref path, source: DecodeError::TruncatedStream { .. } }
                if path.ends_with("short.dcm")
        ));
    }
}
