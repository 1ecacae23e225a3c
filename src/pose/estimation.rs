use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::ops::Range;
use std::path::{Path, PathBuf};

use ndarray::{s, Array1, Array2, Array3, Array4, ArrayView1, ArrayView2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::keypoint::KeypointIndex;

/// Pose file schema generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoseFormat {
    /// Per-instance track ids, identities taken directly from the tracks
    V3,
    /// Detections remapped to identities through `instance_embed_id`
    V4,
    /// V4 plus static scene objects and identity-to-track provenance
    V5,
}

impl PoseFormat {
    pub fn from_major_version(version: u16) -> Option<Self> {
        match version {
            3 => Some(Self::V3),
            4 => Some(Self::V4),
            5 => Some(Self::V5),
            _ => None,
        }
    }

    pub fn major_version(self) -> u16 {
        match self {
            Self::V3 => 3,
            Self::V4 => 4,
            Self::V5 => 5,
        }
    }

    /// Only V3 files carry tracks reliable enough for cross-identity features.
    pub fn supports_social_features(self) -> bool {
        matches!(self, Self::V3)
    }
}

/// Normalized pose data, built by one of the format readers.
pub(crate) struct PoseParts {
    pub format: PoseFormat,
    /// (identity, frame, keypoint, 2)
    pub points: Array4<f64>,
    /// (identity, frame, keypoint)
    pub confidence: Array3<f64>,
    pub identity_to_track: Option<Array2<i64>>,
    pub static_objects: BTreeMap<String, Array2<f64>>,
    pub cm_per_pixel: Option<f64>,
}

/// Pose estimation data for one video, indexed by identity.
///
/// All arrays are identity-major. Never mutated after construction.
#[derive(Debug, Clone)]
pub struct PoseEstimation {
    source: Option<PathBuf>,
    format: PoseFormat,
    points: Array4<f64>,
    point_mask: Array3<bool>,
    identity_mask: Array2<bool>,
    identity_to_track: Option<Array2<i64>>,
    static_objects: BTreeMap<String, Array2<f64>>,
    cm_per_pixel: Option<f64>,
    fingerprint: String,
}

impl PoseEstimation {
    pub(crate) fn from_parts(parts: PoseParts) -> Self {
        let point_mask = parts.confidence.mapv(|c| c > 0.0);
        let identity_mask = derive_identity_mask(&point_mask);
        let fingerprint = fingerprint_arrays(&parts, &point_mask);

        Self {
            source: None,
            format: parts.format,
            points: parts.points,
            point_mask,
            identity_mask,
            identity_to_track: parts.identity_to_track,
            static_objects: parts.static_objects,
            cm_per_pixel: parts.cm_per_pixel,
            fingerprint,
        }
    }

    /// Record the file this pose was loaded from; its content hash replaces
    /// the array fingerprint.
    pub(crate) fn with_source(mut self, path: &Path, fingerprint: String) -> Self {
        self.source = Some(path.to_path_buf());
        self.fingerprint = fingerprint;
        self
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn format(&self) -> PoseFormat {
        self.format
    }

    pub fn format_major_version(&self) -> u16 {
        self.format.major_version()
    }

    pub fn num_frames(&self) -> usize {
        self.points.len_of(Axis(1))
    }

    pub fn num_identities(&self) -> usize {
        self.points.len_of(Axis(0))
    }

    pub fn num_keypoints(&self) -> usize {
        self.points.len_of(Axis(2))
    }

    pub fn identities(&self) -> Range<usize> {
        0..self.num_identities()
    }

    pub fn cm_per_pixel(&self) -> Option<f64> {
        self.cm_per_pixel
    }

    /// Static scene objects (e.g. arena `corners`), empty before V5.
    pub fn static_objects(&self) -> &BTreeMap<String, Array2<f64>> {
        &self.static_objects
    }

    /// (identity, frame) → source track or instance slot, -1 where absent
    pub fn identity_to_track(&self) -> Option<ArrayView2<'_, i64>> {
        self.identity_to_track.as_ref().map(|a| a.view())
    }

    /// Hex SHA-256 of the pose file, or of the arrays for in-memory poses
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn supports_social_features(&self) -> bool {
        self.format.supports_social_features()
    }

    pub fn is_present(&self, frame: usize, identity: usize) -> bool {
        self.identity_mask
            .get((identity, frame))
            .copied()
            .unwrap_or(false)
    }

    /// Points and point mask for one identity at one frame.
    ///
    /// Returns `None` when the identity is not present in the frame (or is
    /// out of range). With `scale`, every coordinate is multiplied by it.
    pub fn get_points(
        &self,
        frame: usize,
        identity: usize,
        scale: Option<f64>,
    ) -> Option<(Array2<f64>, Array1<bool>)> {
        if !self.is_present(frame, identity) {
            return None;
        }

        let points = self.points.slice(s![identity, frame, .., ..]);
        let points = match scale {
            Some(scale) => points.mapv(|v| v * scale),
            None => points.to_owned(),
        };
        let mask = self.point_mask.slice(s![identity, frame, ..]).to_owned();
        Some((points, mask))
    }

    /// All frames for one identity: points (frame, keypoint, 2) and mask
    /// (frame, keypoint). Absent frames are zero filled, check
    /// [`Self::identity_mask`].
    ///
    /// Panics if `identity` is out of range.
    pub fn identity_poses(&self, identity: usize) -> (ArrayView3<'_, f64>, ArrayView2<'_, bool>) {
        (
            self.points.index_axis(Axis(0), identity),
            self.point_mask.index_axis(Axis(0), identity),
        )
    }

    pub fn identity_point_mask(&self, identity: usize) -> ArrayView2<'_, bool> {
        self.point_mask.index_axis(Axis(0), identity)
    }

    /// Per-frame presence of one identity
    pub fn identity_mask(&self, identity: usize) -> ArrayView1<'_, bool> {
        self.identity_mask.index_axis(Axis(0), identity)
    }
}

/// An identity is present in a frame when any core keypoint (all but the two
/// distal tail points) is confident.
fn derive_identity_mask(point_mask: &Array3<bool>) -> Array2<bool> {
    let (num_identities, num_frames, num_keypoints) = point_mask.dim();
    let core = KeypointIndex::CORE_COUNT.min(num_keypoints);
    Array2::from_shape_fn((num_identities, num_frames), |(i, f)| {
        point_mask.slice(s![i, f, ..core]).iter().any(|&m| m)
    })
}

fn fingerprint_arrays(parts: &PoseParts, point_mask: &Array3<bool>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parts.format.major_version().to_le_bytes());
    for dim in parts.points.shape() {
        hasher.update((*dim as u64).to_le_bytes());
    }
    for v in parts.points.iter() {
        hasher.update(v.to_le_bytes());
    }
    for &m in point_mask.iter() {
        hasher.update([m as u8]);
    }
    if let Some(scale) = parts.cm_per_pixel {
        hasher.update(scale.to_le_bytes());
    }
    encode_hex(&hasher.finalize())
}

pub(crate) fn encode_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        let _ = write!(&mut s, "{b:02x}");
    }
    s
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Two identities over four frames; identity 1 is absent on frame 2 and
    /// only has tail points on frame 3.
    pub(crate) fn make_pose() -> PoseEstimation {
        let k = KeypointIndex::COUNT;
        let points = Array4::from_shape_fn((2, 4, k, 2), |(i, f, p, c)| {
            (i * 100 + f * 10 + p) as f64 + c as f64 * 0.5
        });
        let mut confidence = Array3::from_elem((2, 4, k), 0.9);
        confidence.slice_mut(s![1, 2, ..]).fill(0.0);
        confidence.slice_mut(s![1, 3, ..KeypointIndex::CORE_COUNT]).fill(0.0);

        PoseEstimation::from_parts(PoseParts {
            format: PoseFormat::V4,
            points,
            confidence,
            identity_to_track: None,
            static_objects: BTreeMap::new(),
            cm_per_pixel: Some(0.03),
        })
    }

    #[test]
    fn test_format_versions() {
        for v in 3..=5 {
            let format = PoseFormat::from_major_version(v).unwrap();
            assert_eq!(format.major_version(), v);
        }
        assert_eq!(PoseFormat::from_major_version(2), None);
        assert_eq!(PoseFormat::from_major_version(6), None);
        assert!(PoseFormat::V3.supports_social_features());
        assert!(!PoseFormat::V4.supports_social_features());
        assert!(!PoseFormat::V5.supports_social_features());
    }

    #[test]
    fn test_dimensions() {
        let pose = make_pose();
        assert_eq!(pose.num_frames(), 4);
        assert_eq!(pose.num_identities(), 2);
        assert_eq!(pose.num_keypoints(), 12);
        assert_eq!(pose.identities().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(pose.format_major_version(), 4);
    }

    #[test]
    fn test_identity_mask_ignores_tail_points() {
        let pose = make_pose();
        assert!(pose.identity_mask(0).iter().all(|&m| m));
        assert_eq!(
            pose.identity_mask(1).to_vec(),
            vec![true, true, false, false]
        );
    }

    #[test]
    fn test_get_points_absent_is_none() {
        let pose = make_pose();
        assert!(pose.get_points(2, 1, None).is_none());
        assert!(pose.get_points(3, 1, Some(2.0)).is_none());
        // out of range identity / frame
        assert!(pose.get_points(0, 5, None).is_none());
        assert!(pose.get_points(40, 0, None).is_none());
    }

    #[test]
    fn test_get_points_matches_identity_poses() {
        let pose = make_pose();
        let (points, mask) = pose.get_points(1, 0, None).unwrap();
        let (all_points, all_mask) = pose.identity_poses(0);
        assert_eq!(points.shape(), &[12, 2]);
        assert_eq!(mask.shape(), &[12]);
        assert_eq!(points, all_points.index_axis(Axis(0), 1));
        assert_eq!(mask, all_mask.index_axis(Axis(0), 1));
    }

    #[test]
    fn test_scaling_is_multiplicative() {
        let pose = make_pose();
        for identity in pose.identities() {
            for frame in 0..pose.num_frames() {
                let Some((points, _)) = pose.get_points(frame, identity, None) else {
                    continue;
                };
                let (scaled, _) = pose.get_points(frame, identity, Some(0.03)).unwrap();
                assert_eq!(points * 0.03, scaled);
            }
        }
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = make_pose();
        let b = make_pose();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);

        let mut parts_points = a.points.clone();
        parts_points[[0, 0, 0, 0]] += 1.0;
        let c = PoseEstimation::from_parts(PoseParts {
            format: PoseFormat::V4,
            points: parts_points,
            confidence: a.point_mask.mapv(|m| if m { 0.9 } else { 0.0 }),
            identity_to_track: None,
            static_objects: BTreeMap::new(),
            cm_per_pixel: Some(0.03),
        });
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
