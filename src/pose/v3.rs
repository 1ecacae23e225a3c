//! Version 3 pose data: instances carry a track id, each distinct track is
//! one identity.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use ndarray::{s, Array1, Array2, Array3, Array4};
use tracing::debug;

use super::estimation::{PoseEstimation, PoseFormat, PoseParts};
use super::keypoint::KeypointIndex;
use crate::error::{Error, Result};

/// Raw instance tables as stored in a V3 file.
#[derive(Debug, Clone)]
pub struct TrackedInstances {
    /// (frame, slot, keypoint, 2)
    pub points: Array4<f64>,
    /// (frame, slot, keypoint)
    pub confidence: Array3<f64>,
    /// (frame,) number of leading slots holding an instance
    pub instance_count: Array1<u32>,
    /// (frame, slot)
    pub instance_track_id: Array2<u32>,
    pub cm_per_pixel: Option<f64>,
}

impl TrackedInstances {
    fn validate(&self, origin: &Path) -> Result<()> {
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
        if self.instance_count.len() != frames {
            return Err(Error::invalid(
                origin,
                format!(
                    "instance_count has {} frames, points has {frames}",
                    self.instance_count.len()
                ),
            ));
        }
        if self.instance_track_id.dim() != (frames, slots) {
            return Err(Error::invalid(
                origin,
                format!(
                    "instance_track_id shape {:?} does not match ({frames}, {slots})",
                    self.instance_track_id.shape()
                ),
            ));
        }
        Ok(())
    }

    fn occupied_slots(&self, frame: usize) -> usize {
        (self.instance_count[frame] as usize).min(self.instance_track_id.ncols())
    }

    /// Distinct track ids in ascending order; identity `i` is the `i`-th.
    pub fn track_ids(&self) -> Vec<u32> {
        let mut tracks = BTreeSet::new();
        for frame in 0..self.instance_count.len() {
            for slot in 0..self.occupied_slots(frame) {
                tracks.insert(self.instance_track_id[[frame, slot]]);
            }
        }
        tracks.into_iter().collect()
    }
}

pub(crate) fn reconcile(instances: TrackedInstances, origin: &Path) -> Result<PoseEstimation> {
    instances.validate(origin)?;

    let (num_frames, _, num_keypoints, _) = instances.points.dim();
    let tracks = instances.track_ids();
    let identity_of: BTreeMap<u32, usize> =
        tracks.iter().enumerate().map(|(i, &t)| (t, i)).collect();
    let num_identities = tracks.len();

    let mut points = Array4::zeros((num_identities, num_frames, num_keypoints, 2));
    let mut confidence = Array3::zeros((num_identities, num_frames, num_keypoints));
    let mut identity_to_track = Array2::from_elem((num_identities, num_frames), -1i64);

    for frame in 0..num_frames {
        for slot in 0..instances.occupied_slots(frame) {
            let track = instances.instance_track_id[[frame, slot]];
            let identity = identity_of[&track];
            points
                .slice_mut(s![identity, frame, .., ..])
                .assign(&instances.points.slice(s![frame, slot, .., ..]));
            confidence
                .slice_mut(s![identity, frame, ..])
                .assign(&instances.confidence.slice(s![frame, slot, ..]));
            identity_to_track[[identity, frame]] = track as i64;
        }
    }

    debug!(
        path = %origin.display(),
        frames = num_frames,
        identities = num_identities,
        "reconciled v3 tracks"
    );

    Ok(PoseEstimation::from_parts(PoseParts {
        format: PoseFormat::V3,
        points,
        confidence,
        identity_to_track: Some(identity_to_track),
        static_objects: BTreeMap::new(),
        cm_per_pixel: instances.cm_per_pixel,
    }))
}

impl PoseEstimation {
    /// Build a V3 pose from instance tables already in memory.
    pub fn from_v3(instances: TrackedInstances) -> Result<Self> {
        reconcile(instances, Path::new("<memory>"))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Mice facing +x. `positions[i]` is the nose x of track `tracks[i]`; all
    /// tracks are present on every frame unless listed in `absent`.
    pub(crate) fn make_instances(
        num_frames: usize,
        tracks: &[u32],
        positions: &[f64],
        absent: &[(u32, std::ops::Range<usize>)],
    ) -> TrackedInstances {
        let k = KeypointIndex::COUNT;
        let slots = tracks.len();
        let mut points = Array4::zeros((num_frames, slots, k, 2));
        let mut confidence = Array3::zeros((num_frames, slots, k));
        let mut count = Array1::zeros(num_frames);
        let mut track_id = Array2::zeros((num_frames, slots));

        for frame in 0..num_frames {
            let mut slot = 0;
            for (&track, &x) in tracks.iter().zip(positions) {
                if absent
                    .iter()
                    .any(|(t, frames)| *t == track && frames.contains(&frame))
                {
                    continue;
                }
                for p in 0..k {
                    // keypoints trail behind the nose along -x
                    points[[frame, slot, p, 0]] = x - 5.0 * p as f64;
                    points[[frame, slot, p, 1]] = 100.0;
                    confidence[[frame, slot, p]] = 0.7;
                }
                track_id[[frame, slot]] = track;
                slot += 1;
            }
            count[frame] = slot as u32;
        }

        TrackedInstances {
            points,
            confidence,
            instance_count: count,
            instance_track_id: track_id,
            cm_per_pixel: Some(0.05),
        }
    }

    #[test]
    fn test_tracks_become_identities() {
        let pose = PoseEstimation::from_v3(make_instances(
            5,
            &[7, 3],
            &[300.0, 100.0],
            &[],
        ))
        .unwrap();
        assert_eq!(pose.format_major_version(), 3);
        assert_eq!(pose.num_identities(), 2);
        assert!(pose.supports_social_features());

        // track 3 sorts first
        let tracks = pose.identity_to_track().unwrap();
        assert_eq!(tracks[[0, 0]], 3);
        assert_eq!(tracks[[1, 0]], 7);
        let (points, _) = pose.get_points(0, 0, None).unwrap();
        assert_eq!(points[[0, 0]], 100.0);
    }

    #[test]
    fn test_slots_beyond_instance_count_ignored() {
        let mut instances = make_instances(4, &[1, 2], &[100.0, 200.0], &[(2, 1..3)]);
        // stale data left in the unused slot
        instances.instance_track_id[[1, 1]] = 9;
        let pose = PoseEstimation::from_v3(instances).unwrap();
        assert_eq!(pose.num_identities(), 2);
        assert!(!pose.is_present(1, 1));
        assert!(!pose.is_present(2, 1));
        assert!(pose.is_present(3, 1));
        assert_eq!(pose.identity_to_track().unwrap()[[1, 1]], -1);
    }

    #[test]
    fn test_instance_count_length_checked() {
        let mut instances = make_instances(4, &[1], &[100.0], &[]);
        instances.instance_count = Array1::zeros(3);
        let err = PoseEstimation::from_v3(instances).unwrap_err();
        assert!(err.to_string().contains("instance_count"));
    }

    #[test]
    fn test_keypoint_count_checked() {
        let mut instances = make_instances(5, &[1], &[100.0], &[]);
        instances.points = instances.points.slice(s![.., .., ..4, ..]).to_owned();
        instances.confidence = instances.confidence.slice(s![.., .., ..4]).to_owned();
        let err = PoseEstimation::from_v3(instances).unwrap_err();
        assert!(matches!(err, Error::InvalidPoseFile { .. }), "{err}");
        assert!(err.to_string().contains("expected 12 keypoints, found 4"), "{err}");
    }
}
