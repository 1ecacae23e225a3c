use nalgebra::Vector2;
use ndarray::{Array1, Array2, ArrayView1};

use super::estimation::PoseEstimation;
use super::keypoint::KeypointIndex;
use crate::error::{Error, Result};

/// One identity's keypoints with the geometry the feature generators need.
///
/// Coordinates returned from here are multiplied by `pixel_scale`. Anything
/// that cannot be computed for a frame (identity absent, keypoint missing)
/// is `None` or NaN, never zero.
#[derive(Debug, Clone, Copy)]
pub struct IdentityPoseView<'a> {
    poses: &'a PoseEstimation,
    identity: usize,
    pixel_scale: f64,
}

impl<'a> IdentityPoseView<'a> {
    pub fn new(poses: &'a PoseEstimation, identity: usize, pixel_scale: f64) -> Result<Self> {
        if identity >= poses.num_identities() {
            return Err(Error::IdentityOutOfRange {
                identity,
                num_identities: poses.num_identities(),
            });
        }
        Ok(Self {
            poses,
            identity,
            pixel_scale,
        })
    }

    pub fn poses(&self) -> &'a PoseEstimation {
        self.poses
    }

    pub fn identity(&self) -> usize {
        self.identity
    }

    pub fn pixel_scale(&self) -> f64 {
        self.pixel_scale
    }

    pub fn num_frames(&self) -> usize {
        self.poses.num_frames()
    }

    pub fn presence(&self) -> ArrayView1<'a, bool> {
        self.poses.identity_mask(self.identity)
    }

    pub fn is_present(&self, frame: usize) -> bool {
        self.poses.is_present(frame, self.identity)
    }

    /// Scaled points and mask for one frame, `None` when absent
    pub fn points(&self, frame: usize) -> Option<(Array2<f64>, Array1<bool>)> {
        self.poses
            .get_points(frame, self.identity, Some(self.pixel_scale))
    }

    /// One scaled keypoint, `None` if the identity is absent or the point is
    /// not confident.
    pub fn point(&self, frame: usize, keypoint: KeypointIndex) -> Option<Vector2<f64>> {
        if !self.is_present(frame) {
            return None;
        }
        let (points, mask) = self.poses.identity_poses(self.identity);
        let k = keypoint as usize;
        if !mask[[frame, k]] {
            return None;
        }
        Some(Vector2::new(points[[frame, k, 0]], points[[frame, k, 1]]) * self.pixel_scale)
    }

    pub fn distance(&self, frame: usize, a: KeypointIndex, b: KeypointIndex) -> f64 {
        match (self.point(frame, a), self.point(frame, b)) {
            (Some(a), Some(b)) => (a - b).norm(),
            _ => f64::NAN,
        }
    }

    /// Signed angle at `vertex` from `a` to `c`, degrees in [-180, 180)
    pub fn angle(&self, frame: usize, a: KeypointIndex, vertex: KeypointIndex, c: KeypointIndex) -> f64 {
        match (
            self.point(frame, a),
            self.point(frame, vertex),
            self.point(frame, c),
        ) {
            (Some(a), Some(vertex), Some(c)) => signed_angle(a, vertex, c),
            _ => f64::NAN,
        }
    }

    /// Mean of the confident core keypoints
    pub fn centroid(&self, frame: usize) -> Option<Vector2<f64>> {
        let points: Vec<Vector2<f64>> = KeypointIndex::ALL[..KeypointIndex::CORE_COUNT]
            .iter()
            .filter_map(|&kp| self.point(frame, kp))
            .collect();
        if points.is_empty() {
            return None;
        }
        let sum = points.iter().fold(Vector2::zeros(), |acc, p| acc + p);
        Some(sum / points.len() as f64)
    }

    /// Heading of the body (base of tail → base of neck), degrees
    pub fn bearing(&self, frame: usize) -> f64 {
        match (
            self.point(frame, KeypointIndex::BaseTail),
            self.point(frame, KeypointIndex::BaseNeck),
        ) {
            (Some(tail), Some(neck)) => direction_degrees(neck - tail),
            _ => f64::NAN,
        }
    }

    /// Per-frame centroid velocity in scaled units per second.
    ///
    /// Backward difference; frame 0 and frames following an absent frame
    /// are NaN.
    pub fn centroid_velocity(&self, fps: f64) -> Vec<Option<Vector2<f64>>> {
        let centroids: Vec<_> = (0..self.num_frames()).map(|f| self.centroid(f)).collect();
        backward_difference(&centroids, fps)
    }

    /// Per-frame velocity of one keypoint in scaled units per second
    pub fn point_velocity(&self, keypoint: KeypointIndex, fps: f64) -> Vec<Option<Vector2<f64>>> {
        let positions: Vec<_> = (0..self.num_frames())
            .map(|f| self.point(f, keypoint))
            .collect();
        backward_difference(&positions, fps)
    }
}

fn backward_difference(positions: &[Option<Vector2<f64>>], fps: f64) -> Vec<Option<Vector2<f64>>> {
    let mut velocity = vec![None; positions.len()];
    for frame in 1..positions.len() {
        if let (Some(prev), Some(curr)) = (positions[frame - 1], positions[frame]) {
            velocity[frame] = Some((curr - prev) * fps);
        }
    }
    velocity
}

/// Wrap degrees into [-180, 180)
pub fn wrap_degrees(angle: f64) -> f64 {
    let wrapped = (angle + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped >= 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// Direction of a vector, degrees in [-180, 180)
pub fn direction_degrees(v: Vector2<f64>) -> f64 {
    wrap_degrees(v.y.atan2(v.x).to_degrees())
}

/// Signed angle at `vertex` turning from `a` to `c`, degrees in [-180, 180)
pub fn signed_angle(a: Vector2<f64>, vertex: Vector2<f64>, c: Vector2<f64>) -> f64 {
    let to_a = a - vertex;
    let to_c = c - vertex;
    wrap_degrees((to_c.y.atan2(to_c.x) - to_a.y.atan2(to_a.x)).to_degrees())
}
