//! Physical ordering of the slices of a series.
//!
//! All slices must share one planar orientation. The first slice defines a
//! reference frame: its row and column direction cosines span the x and y
//! axes, their normalized cross product is the z axis and its position is
//! the origin. Every slice position is mapped into that frame and the
//! slices are ordered by descending z.

use crate::dicom_file::DicomFile;
use crate::property::AttributeError;

use nalgebra::{Matrix4, Point3, Vector3};
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

/// Below this cross product norm the direction cosines count as collinear.
const MIN_NORMAL_NORM: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("Orientation {found:?} of {path} differs from the series orientation {expected:?}")]
    InconsistentOrientation {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("Direction cosines {0:?} do not span a plane")]
    DegenerateGeometry([f64; 6]),

    #[error("{path}: {source}")]
    Attribute {
        path: PathBuf,
        #[source]
        source: AttributeError,
    },
}

trait AttributeContext<T> {
    fn in_file(self, file: &DicomFile) -> Result<T, GeometryError>;
}

impl<T> AttributeContext<T> for Result<T, AttributeError> {
    fn in_file(self, file: &DicomFile) -> Result<T, GeometryError> {
        self.map_err(|source| GeometryError::Attribute {
            path: file.path().to_path_buf(),
            source,
        })
    }
}

/// World to reference frame transform of a series.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneFrame {
    world_to_frame: Matrix4<f64>,
}

impl SceneFrame {
    /// Build the frame from six direction cosines (row then column) and the
    /// world position of its origin.
    pub fn new(orientation: [f64; 6], origin: [f64; 3]) -> Result<Self, GeometryError> {
        let [rx, ry, rz, cx, cy, cz] = orientation;
        let x_axis = Vector3::new(rx, ry, rz);
        let y_axis = Vector3::new(cx, cy, cz);
        let normal = x_axis.cross(&y_axis);
        let norm = normal.norm();
        if !norm.is_finite() || norm < MIN_NORMAL_NORM {
            return Err(GeometryError::DegenerateGeometry(orientation));
        }
        let z_axis = normal / norm;
        let [ox, oy, oz] = origin;

        #[rustfmt::skip]
        let frame_to_world = Matrix4::new(
            x_axis.x, y_axis.x, z_axis.x, ox,
            x_axis.y, y_axis.y, z_axis.y, oy,
            x_axis.z, y_axis.z, z_axis.z, oz,
            0.0,      0.0,      0.0,      1.0,
        );

        let world_to_frame = frame_to_world
            .try_inverse()
            .ok_or(GeometryError::DegenerateGeometry(orientation))?;
        Ok(Self { world_to_frame })
    }

    /// Frame of the slice `file`.
    pub fn from_file(file: &DicomFile) -> Result<Self, GeometryError> {
        let orientation = file.orientation_cosines().in_file(file)?;
        let origin = file.position().in_file(file)?;
        Self::new(orientation, origin)
    }

    /// Coordinates of a world position in this frame.
    pub fn to_frame(&self, position: [f64; 3]) -> [f64; 3] {
        let p = self
            .world_to_frame
            .transform_point(&Point3::new(position[0], position[1], position[2]));
        [p.x, p.y, p.z]
    }

    /// Distance of a world position along the frame normal.
    pub fn depth(&self, position: [f64; 3]) -> f64 {
        self.to_frame(position)[2]
    }
}

/// Check that all files share one orientation, then order them by
/// descending depth along the normal of the first file's frame. Files at
/// equal depth keep their relative order.
pub fn sequence(files: Vec<DicomFile>) -> Result<Vec<DicomFile>, GeometryError> {
    let Some(first) = files.first() else {
        return Ok(files);
    };

    let reference = first.image_orientation().in_file(first)?;
    for file in &files[1..] {
        let orientation = file.image_orientation().in_file(file)?;
        if !orientation.eq_ignore_ascii_case(&reference) {
            return Err(GeometryError::InconsistentOrientation {
                path: file.path().to_path_buf(),
                expected: reference,
                found: orientation,
            });
        }
    }

    let frame = SceneFrame::from_file(first)?;
    let mut keyed = files
        .into_iter()
        .map(|file| -> Result<_, GeometryError> {
            let depth = frame.depth(file.position().in_file(&file)?);
            Ok((depth, file))
        })
        .collect::<Result<Vec<_>, GeometryError>>()?;

    keyed.sort_by(|a, b| b.0.total_cmp(&a.0));

    debug!(
        slices = keyed.len(),
        nearest = keyed.first().map(|(depth, _)| *depth),
        farthest = keyed.last().map(|(depth, _)| *depth),
        "sequenced series"
    );

    Ok(keyed.into_iter().map(|(_, file)| file).collect())
}
