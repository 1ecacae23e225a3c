//! HDF5 pose file reader.
//!
//! Layout: a `poseest` group holding `points`, `confidence`, a `version`
//! attribute (`[major, minor]`), an optional `cm_per_pixel` attribute and,
//! depending on the version, `instance_count`/`instance_track_id` (V3),
//! `id_mask`/`instance_embed_id` (V4, V5) and a `static_objects` group (V5).

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use hdf5_metno::{File, Group, H5Type};
use ndarray::{Array, Array2, Dimension, Ix1, Ix2, Ix3, Ix4};
use sha2::{Digest, Sha256};
use tracing::info;

use super::estimation::{encode_hex, PoseEstimation, PoseFormat};
use super::v3::{self, TrackedInstances};
use super::v4::{self, Detections};
use super::v5;
use crate::error::{Error, Result};

const POSE_GROUP: &str = "poseest";
const STATIC_OBJECTS_GROUP: &str = "static_objects";

/// Open a pose file, dispatching on its major version.
///
/// The version attribute is read first; the datasets are only loaded once a
/// reader has been picked.
pub fn open_pose_file(path: impl AsRef<Path>) -> Result<PoseEstimation> {
    let path = path.as_ref();
    let format = peek_format(path)?;

    let file = open(path)?;
    let group = pose_group(&file, path)?;
    let pose = match format {
        PoseFormat::V3 => v3::reconcile(read_tracked_instances(&group, path)?, path)?,
        PoseFormat::V4 => v4::reconcile(read_detections(&group, path)?, path)?,
        PoseFormat::V5 => {
            let static_objects = read_static_objects(&group, path)?;
            v5::reconcile(read_detections(&group, path)?, static_objects, path)?
        }
    };

    let pose = pose.with_source(path, file_fingerprint(path)?);
    info!(
        path = %path.display(),
        version = format.major_version(),
        frames = pose.num_frames(),
        identities = pose.num_identities(),
        "opened pose file"
    );
    Ok(pose)
}

/// Read only the `version` attribute.
pub fn peek_format(path: impl AsRef<Path>) -> Result<PoseFormat> {
    let path = path.as_ref();
    let file = open(path)?;
    let group = pose_group(&file, path)?;

    if !group
        .attr_names()
        .map_err(|source| hdf5_error(path, source))?
        .iter()
        .any(|name| name == "version")
    {
        return Err(Error::UnsupportedFormat {
            path: path.to_path_buf(),
            reason: "missing version attribute".to_string(),
        });
    }

    let version = group
        .attr("version")
        .and_then(|attr| attr.read_raw::<u16>())
        .map_err(|source| hdf5_error(path, source))?;
    let major = version.first().copied().ok_or_else(|| Error::UnsupportedFormat {
        path: path.to_path_buf(),
        reason: "empty version attribute".to_string(),
    })?;

    PoseFormat::from_major_version(major).ok_or_else(|| Error::UnsupportedFormat {
        path: path.to_path_buf(),
        reason: format!("major version {major}"),
    })
}

/// Number of frames in a pose file without loading the point data.
pub fn frames_in_file(path: impl AsRef<Path>) -> Result<usize> {
    let path = path.as_ref();
    let file = open(path)?;
    let group = pose_group(&file, path)?;
    let points = group
        .dataset("points")
        .map_err(|_| Error::invalid(path, "missing dataset 'poseest/points'"))?;
    Ok(points.shape().first().copied().unwrap_or(0))
}

fn open(path: &Path) -> Result<File> {
    if !path.is_file() {
        return Err(Error::io(
            path,
            io::Error::new(io::ErrorKind::NotFound, "pose file not found"),
        ));
    }
    File::open(path).map_err(|e| Error::invalid(path, format!("not an HDF5 file: {e}")))
}

fn pose_group(file: &File, path: &Path) -> Result<Group> {
    file.group(POSE_GROUP)
        .map_err(|_| Error::invalid(path, format!("missing '{POSE_GROUP}' group")))
}

fn hdf5_error(path: &Path, source: hdf5_metno::Error) -> Error {
    Error::Hdf5 {
        path: path.to_path_buf(),
        source,
    }
}

fn read_array<T: H5Type, D: Dimension>(group: &Group, name: &str, path: &Path) -> Result<Array<T, D>> {
    let dataset = group
        .dataset(name)
        .map_err(|_| Error::invalid(path, format!("missing dataset '{POSE_GROUP}/{name}'")))?;
    if let Some(ndim) = D::NDIM {
        if dataset.ndim() != ndim {
            return Err(Error::invalid(
                path,
                format!(
                    "dataset '{POSE_GROUP}/{name}' has {} dimensions, expected {ndim}",
                    dataset.ndim()
                ),
            ));
        }
    }
    dataset
        .read::<T, D>()
        .map_err(|source| hdf5_error(path, source))
}

fn read_cm_per_pixel(group: &Group, path: &Path) -> Result<Option<f64>> {
    let names = group.attr_names().map_err(|source| hdf5_error(path, source))?;
    if !names.iter().any(|name| name == "cm_per_pixel") {
        return Ok(None);
    }
    let values = group
        .attr("cm_per_pixel")
        .and_then(|attr| attr.read_raw::<f64>())
        .map_err(|source| hdf5_error(path, source))?;
    Ok(values.first().copied())
}

fn read_tracked_instances(group: &Group, path: &Path) -> Result<TrackedInstances> {
    Ok(TrackedInstances {
        points: read_array::<f64, Ix4>(group, "points", path)?,
        confidence: read_array::<f64, Ix3>(group, "confidence", path)?,
        instance_count: read_array::<u32, Ix1>(group, "instance_count", path)?,
        instance_track_id: read_array::<u32, Ix2>(group, "instance_track_id", path)?,
        cm_per_pixel: read_cm_per_pixel(group, path)?,
    })
}

fn read_detections(group: &Group, path: &Path) -> Result<Detections> {
    let id_mask = read_array::<u8, Ix2>(group, "id_mask", path)?;
    Ok(Detections {
        points: read_array::<f64, Ix4>(group, "points", path)?,
        confidence: read_array::<f64, Ix3>(group, "confidence", path)?,
        id_mask: id_mask.mapv(|m| m != 0),
        instance_embed_id: read_array::<u32, Ix2>(group, "instance_embed_id", path)?,
        cm_per_pixel: read_cm_per_pixel(group, path)?,
    })
}

fn read_static_objects(group: &Group, path: &Path) -> Result<BTreeMap<String, Array2<f64>>> {
    let mut objects = BTreeMap::new();
    let members = group.member_names().map_err(|source| hdf5_error(path, source))?;
    if !members.iter().any(|name| name == STATIC_OBJECTS_GROUP) {
        return Ok(objects);
    }

    let static_group = group
        .group(STATIC_OBJECTS_GROUP)
        .map_err(|source| hdf5_error(path, source))?;
    for name in static_group
        .member_names()
        .map_err(|source| hdf5_error(path, source))?
    {
        let object = static_group
            .dataset(&name)
            .and_then(|ds| ds.read_2d::<f64>())
            .map_err(|source| hdf5_error(path, source))?;
        objects.insert(name, object);
    }
    Ok(objects)
}

fn file_fingerprint(path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut file = fs::File::open(path).map_err(|e| Error::io(path, e))?;
    io::copy(&mut file, &mut hasher).map_err(|e| Error::io(path, e))?;
    Ok(encode_hex(&hasher.finalize()))
}
