//! Closest-identity features.
//!
//! [`SocialContext`] is computed once per video: for every identity and
//! frame it records the nearest other identity overall and the nearest one
//! inside the field of view. The social generators only read from it.

use nalgebra::Vector2;
use ndarray::{Array1, Array2};
use tracing::debug;

use super::window::{WindowOp, CIRCULAR_STATISTICS};
use super::{Feature, FeatureContext};
use crate::error::{Error, Result};
use crate::pose::view::signed_angle;
use crate::pose::{IdentityPoseView, KeypointIndex, PoseEstimation};

pub const DEFAULT_HALF_FOV_DEG: f64 = 120.0;

pub(crate) const GENERATOR_NAMES: [&str; 3] = [
    "closest_distances",
    "closest_fov_distances",
    "closest_fov_angles",
];

/// Nearest other identity per frame for one identity.
///
/// Distances and angles are NaN on frames where the identity is absent or no
/// other identity qualifies.
#[derive(Debug, Clone)]
pub struct ClosestIdentityInfo {
    pub closest_identity: Vec<Option<usize>>,
    pub closest_distance: Array1<f64>,
    pub closest_fov_identity: Vec<Option<usize>>,
    pub closest_fov_distance: Array1<f64>,
    /// Angle at the base of the neck from the nose to the other centroid
    pub closest_fov_angle: Array1<f64>,
}

impl ClosestIdentityInfo {
    fn empty(num_frames: usize) -> Self {
        Self {
            closest_identity: vec![None; num_frames],
            closest_distance: Array1::from_elem(num_frames, f64::NAN),
            closest_fov_identity: vec![None; num_frames],
            closest_fov_distance: Array1::from_elem(num_frames, f64::NAN),
            closest_fov_angle: Array1::from_elem(num_frames, f64::NAN),
        }
    }
}

/// Closest-identity information for every identity of one video
#[derive(Debug, Clone)]
pub struct SocialContext {
    half_fov_deg: f64,
    identities: Vec<ClosestIdentityInfo>,
}

impl SocialContext {
    /// Distances use centroids of the core keypoints, scaled by
    /// `pixel_scale`. Ties go to the lower identity.
    pub fn compute(poses: &PoseEstimation, pixel_scale: f64, half_fov_deg: f64) -> Result<Self> {
        let num_frames = poses.num_frames();
        let views = poses
            .identities()
            .map(|i| IdentityPoseView::new(poses, i, pixel_scale))
            .collect::<Result<Vec<_>>>()?;

        // centroids[identity][frame]
        let centroids: Vec<Vec<Option<Vector2<f64>>>> = views
            .iter()
            .map(|v| (0..num_frames).map(|f| v.centroid(f)).collect())
            .collect();

        let mut identities = Vec::with_capacity(views.len());
        for (identity, view) in views.iter().enumerate() {
            let mut info = ClosestIdentityInfo::empty(num_frames);
            for frame in 0..num_frames {
                let Some(own) = centroids[identity][frame] else {
                    continue;
                };
                let nose = view.point(frame, KeypointIndex::Nose);
                let neck = view.point(frame, KeypointIndex::BaseNeck);

                for (other, other_centroids) in centroids.iter().enumerate() {
                    if other == identity {
                        continue;
                    }
                    let Some(other_centroid) = other_centroids[frame] else {
                        continue;
                    };
                    let distance = (other_centroid - own).norm();

                    if info.closest_identity[frame].is_none() || distance < info.closest_distance[frame] {
                        info.closest_identity[frame] = Some(other);
                        info.closest_distance[frame] = distance;
                    }

                    let (Some(nose), Some(neck)) = (nose, neck) else {
                        continue;
                    };
                    let angle = signed_angle(nose, neck, other_centroid);
                    if angle.abs() <= half_fov_deg
                        && (info.closest_fov_identity[frame].is_none()
                            || distance < info.closest_fov_distance[frame])
                    {
                        info.closest_fov_identity[frame] = Some(other);
                        info.closest_fov_distance[frame] = distance;
                        info.closest_fov_angle[frame] = angle;
                    }
                }
            }
            identities.push(info);
        }

        debug!(
            identities = identities.len(),
            frames = num_frames,
            "computed closest identity context"
        );
        Ok(Self {
            half_fov_deg,
            identities,
        })
    }

    pub fn half_fov_deg(&self) -> f64 {
        self.half_fov_deg
    }

    pub fn identity(&self, identity: usize) -> Result<&ClosestIdentityInfo> {
        self.identities
            .get(identity)
            .ok_or(Error::IdentityOutOfRange {
                identity,
                num_identities: self.identities.len(),
            })
    }
}

pub(crate) fn generators<'a>(
    ctx: FeatureContext<'a>,
    social: &'a SocialContext,
) -> Vec<Box<dyn Feature + 'a>> {
    vec![
        Box::new(ClosestDistances { ctx, social }),
        Box::new(ClosestFovDistances { ctx, social }),
        Box::new(ClosestFovAngles { ctx, social }),
    ]
}

fn column(values: &Array1<f64>) -> Array2<f64> {
    values.clone().insert_axis(ndarray::Axis(1))
}

/// Distance to the closest other identity
pub struct ClosestDistances<'a> {
    ctx: FeatureContext<'a>,
    social: &'a SocialContext,
}

impl Feature for ClosestDistances<'_> {
    fn name(&self) -> &'static str {
        GENERATOR_NAMES[0]
    }

    fn feature_names(&self) -> Vec<String> {
        vec!["closest social distance".to_string()]
    }

    fn poses(&self) -> &PoseEstimation {
        self.ctx.poses
    }

    fn per_frame(&self, identity: usize) -> Result<Array2<f64>> {
        Ok(column(&self.social.identity(identity)?.closest_distance))
    }
}

/// Distance to the closest other identity in the field of view
pub struct ClosestFovDistances<'a> {
    ctx: FeatureContext<'a>,
    social: &'a SocialContext,
}

impl Feature for ClosestFovDistances<'_> {
    fn name(&self) -> &'static str {
        GENERATOR_NAMES[1]
    }

    fn feature_names(&self) -> Vec<String> {
        vec!["closest social distance in FoV".to_string()]
    }

    fn poses(&self) -> &PoseEstimation {
        self.ctx.poses
    }

    fn per_frame(&self, identity: usize) -> Result<Array2<f64>> {
        Ok(column(&self.social.identity(identity)?.closest_fov_distance))
    }
}

/// Angle to the closest other identity in the field of view
pub struct ClosestFovAngles<'a> {
    ctx: FeatureContext<'a>,
    social: &'a SocialContext,
}

impl Feature for ClosestFovAngles<'_> {
    fn name(&self) -> &'static str {
        GENERATOR_NAMES[2]
    }

    fn feature_names(&self) -> Vec<String> {
        vec!["angle of closest social distance in FoV".to_string()]
    }

    fn poses(&self) -> &PoseEstimation {
        self.ctx.poses
    }

    fn per_frame(&self, identity: usize) -> Result<Array2<f64>> {
        Ok(column(&self.social.identity(identity)?.closest_fov_angle))
    }

    fn window_statistics(&self) -> &'static [(&'static str, WindowOp)] {
        CIRCULAR_STATISTICS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::v3::tests::make_instances;

    fn approx_eq(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    /// Three mice in a row along x, all facing +x (nose at the largest x).
    /// Track 1 is at x=100, track 2 at x=200, track 3 at x=400.
    fn poses(absent: &[(u32, std::ops::Range<usize>)]) -> PoseEstimation {
        PoseEstimation::from_v3(make_instances(6, &[1, 2, 3], &[100.0, 200.0, 400.0], absent))
            .unwrap()
    }

    #[test]
    fn test_closest_identity_by_distance() {
        let poses = poses(&[]);
        let social = SocialContext::compute(&poses, 1.0, DEFAULT_HALF_FOV_DEG).unwrap();

        let middle = social.identity(1).unwrap();
        assert_eq!(middle.closest_identity[0], Some(0));
        assert!(approx_eq(middle.closest_distance[0], 100.0, 1e-9));

        let last = social.identity(2).unwrap();
        assert_eq!(last.closest_identity[0], Some(1));
        assert!(approx_eq(last.closest_distance[0], 200.0, 1e-9));
    }

    #[test]
    fn test_field_of_view() {
        let poses = poses(&[]);
        let social = SocialContext::compute(&poses, 1.0, DEFAULT_HALF_FOV_DEG).unwrap();

        // identity 0 faces +x, identity 1 is straight ahead
        let first = social.identity(0).unwrap();
        assert_eq!(first.closest_fov_identity[0], Some(1));
        assert!(approx_eq(first.closest_fov_angle[0], 0.0, 1e-9));

        // identity 2 faces away from everyone else
        let last = social.identity(2).unwrap();
        assert_eq!(last.closest_fov_identity[0], None);
        assert!(last.closest_fov_distance[0].is_nan());
        assert!(last.closest_fov_angle[0].is_nan());

        // the middle mouse sees identity 2 ahead, not the closer one behind
        let middle = social.identity(1).unwrap();
        assert_eq!(middle.closest_fov_identity[0], Some(2));
    }

    #[test]
    fn test_no_other_identity_is_nan() {
        // identity 0 is alone on frames 2 and 3
        let poses = poses(&[(2, 2..4), (3, 2..4)]);
        let social = SocialContext::compute(&poses, 1.0, DEFAULT_HALF_FOV_DEG).unwrap();
        let first = social.identity(0).unwrap();
        assert!(first.closest_distance[2].is_nan());
        assert_eq!(first.closest_identity[3], None);
        assert!(first.closest_fov_angle[3].is_nan());
        assert_eq!(first.closest_identity[4], Some(1));
    }

    #[test]
    fn test_distances_scaled() {
        let poses = poses(&[]);
        let social = SocialContext::compute(&poses, 0.05, DEFAULT_HALF_FOV_DEG).unwrap();
        assert!(approx_eq(social.identity(1).unwrap().closest_distance[0], 5.0, 1e-9));
    }

    #[test]
    fn test_generators_read_context() {
        let poses = poses(&[]);
        let social = SocialContext::compute(&poses, 1.0, DEFAULT_HALF_FOV_DEG).unwrap();
        let ctx = FeatureContext {
            poses: &poses,
            pixel_scale: 1.0,
            fps: 30.0,
        };
        let generators = generators(ctx, &social);
        assert_eq!(generators.len(), 3);
        for g in &generators {
            let values = g.per_frame(1).unwrap();
            assert_eq!(values.dim(), (6, 1));
        }
        assert_eq!(generators[2].window_statistics(), CIRCULAR_STATISTICS);
        assert!(generators[0].per_frame(3).is_err());
    }
}
