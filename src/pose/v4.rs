//! Version 4 pose data: per-frame detections mapped to identities through an
//! instance embedding id.

use std::collections::BTreeMap;
use std::path::Path;

use ndarray::{s, Array2, Array3, Array4, Axis};
use tracing::{debug, warn};

use super::estimation::{PoseEstimation, PoseFormat, PoseParts};
use super::keypoint::KeypointIndex;
use crate::error::{Error, Result};

/// Raw detection tables as stored in a V4/V5 file.
#[derive(Debug, Clone)]
pub struct Detections {
    /// (frame, slot, keypoint, 2)
    pub points: Array4<f64>,
    /// (frame, slot, keypoint)
    pub confidence: Array3<f64>,
    /// (frame, slot); `true` flags a detection that must be ignored
    pub id_mask: Array2<bool>,
    /// (frame, slot); 1-based identity of each detection
    pub instance_embed_id: Array2<u32>,
    pub cm_per_pixel: Option<f64>,
}

/// Detections scattered into identity-major arrays.
pub(crate) struct ByIdentity {
    pub points: Array4<f64>,
    pub confidence: Array3<f64>,
    /// (identity, frame) → source slot, -1 where absent
    pub slots: Array2<i64>,
}

impl Detections {
    pub(crate) fn validate(&self, origin: &Path) -> Result<()> {
        let (frames, slots, keypoints, coords) = self.points.dim();
        if coords != 2 {
            return Err(Error::invalid(
                origin,
                format!("points must have 2 coordinates per keypoint, found {coords}"),
            ));
        }
        if keypoints != KeypointIndex::COUNT {
            return Err(Error::invalid(
                origin,
                format!("expected {} keypoints, found {keypoints}", KeypointIndex::COUNT),
            ));
        }
        if self.confidence.dim() != (frames, slots, keypoints) {
            return Err(Error::invalid(
                origin,
                format!(
                    "confidence shape {:?} does not match points {:?}",
                    self.confidence.shape(),
                    self.points.shape()
                ),
            ));
        }
        for (name, dim) in [
            ("id_mask", self.id_mask.dim()),
            ("instance_embed_id", self.instance_embed_id.dim()),
        ] {
            if dim != (frames, slots) {
                return Err(Error::invalid(
                    origin,
                    format!("{name} shape {dim:?} does not match ({frames}, {slots})"),
                ));
            }
        }
        Ok(())
    }

    /// Largest embed id among valid detections.
    ///
    /// Ids are assumed to be packed from 1; unused ids in between become
    /// identities that are never present.
    pub fn num_identities(&self) -> usize {
        self.instance_embed_id
            .iter()
            .zip(self.id_mask.iter())
            .filter(|&(_, &masked)| !masked)
            .map(|(&id, _)| id as usize)
            .max()
            .unwrap_or(0)
    }

    pub(crate) fn scatter(&self) -> ByIdentity {
        let (num_frames, num_slots, num_keypoints, _) = self.points.dim();
        let num_identities = self.num_identities();

        let mut points = Array4::zeros((num_identities, num_frames, num_keypoints, 2));
        let mut confidence = Array3::zeros((num_identities, num_frames, num_keypoints));
        let mut slots = Array2::from_elem((num_identities, num_frames), -1i64);
        let mut unassigned = 0usize;

        for frame in 0..num_frames {
            for slot in 0..num_slots {
                if self.id_mask[[frame, slot]] {
                    continue;
                }
                let embed_id = self.instance_embed_id[[frame, slot]] as usize;
                if embed_id == 0 {
                    unassigned += 1;
                    continue;
                }
                let identity = embed_id - 1;
                points
                    .slice_mut(s![identity, frame, .., ..])
                    .assign(&self.points.slice(s![frame, slot, .., ..]));
                confidence
                    .slice_mut(s![identity, frame, ..])
                    .assign(&self.confidence.slice(s![frame, slot, ..]));
                slots[[identity, frame]] = slot as i64;
            }
        }

        if unassigned > 0 {
            warn!(unassigned, "skipped unmasked detections with embed id 0");
        }

        ByIdentity {
            points,
            confidence,
            slots,
        }
    }
}

pub(crate) fn reconcile(detections: Detections, origin: &Path) -> Result<PoseEstimation> {
    detections.validate(origin)?;
    let by_identity = detections.scatter();
    debug!(
        path = %origin.display(),
        frames = detections.points.len_of(Axis(0)),
        identities = by_identity.points.len_of(Axis(0)),
        "reconciled v4 detections"
    );

    Ok(PoseEstimation::from_parts(PoseParts {
        format: PoseFormat::V4,
        points: by_identity.points,
        confidence: by_identity.confidence,
        identity_to_track: None,
        static_objects: BTreeMap::new(),
        cm_per_pixel: detections.cm_per_pixel,
    }))
}

impl PoseEstimation {
    /// Build a V4 pose from detection tables already in memory.
    pub fn from_v4(detections: Detections) -> Result<Self> {
        reconcile(detections, Path::new("<memory>"))
    }
}
