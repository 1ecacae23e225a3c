//! Features computed from a single identity's keypoints.

use ndarray::Array2;

use super::window::{WindowOp, CIRCULAR_STATISTICS};
use super::{Feature, FeatureContext};
use crate::error::Result;
use crate::pose::view::{direction_degrees, wrap_degrees};
use crate::pose::{IdentityPoseView, KeypointIndex, PoseEstimation};

use crate::pose::KeypointIndex::*;

/// Joint angles, (a, vertex, c)
pub const ANGLES: [(KeypointIndex, KeypointIndex, KeypointIndex); 9] = [
    (Nose, BaseNeck, CenterSpine),
    (LeftEar, BaseNeck, RightEar),
    (LeftFrontPaw, BaseNeck, CenterSpine),
    (RightFrontPaw, BaseNeck, CenterSpine),
    (BaseNeck, CenterSpine, BaseTail),
    (LeftRearPaw, BaseTail, CenterSpine),
    (RightRearPaw, BaseTail, CenterSpine),
    (CenterSpine, BaseTail, MidTail),
    (BaseTail, MidTail, TipTail),
];

pub(crate) fn generators<'a>(ctx: FeatureContext<'a>) -> Vec<Box<dyn Feature + 'a>> {
    vec![
        Box::new(PairwiseDistances { ctx }),
        Box::new(Angles { ctx }),
        Box::new(PointSpeeds { ctx }),
        Box::new(CentroidVelocityMag { ctx }),
        Box::new(CentroidVelocityDir { ctx }),
    ]
}

fn keypoint_pairs() -> Vec<(KeypointIndex, KeypointIndex)> {
    let mut pairs = Vec::new();
    for (i, &a) in KeypointIndex::ALL.iter().enumerate() {
        for &b in &KeypointIndex::ALL[i + 1..] {
            pairs.push((a, b));
        }
    }
    pairs
}

/// Distance between every pair of keypoints
pub struct PairwiseDistances<'a> {
    ctx: FeatureContext<'a>,
}

impl Feature for PairwiseDistances<'_> {
    fn name(&self) -> &'static str {
        "pairwise_distances"
    }

    fn feature_names(&self) -> Vec<String> {
        keypoint_pairs()
            .into_iter()
            .map(|(a, b)| format!("{}-{}", a.name(), b.name()))
            .collect()
    }

    fn poses(&self) -> &PoseEstimation {
        self.ctx.poses
    }

    fn per_frame(&self, identity: usize) -> Result<Array2<f64>> {
        let view = IdentityPoseView::new(self.ctx.poses, identity, self.ctx.pixel_scale)?;
        let pairs = keypoint_pairs();
        let mut values = Array2::from_elem((view.num_frames(), pairs.len()), f64::NAN);
        for frame in 0..view.num_frames() {
            if !view.is_present(frame) {
                continue;
            }
            for (column, &(a, b)) in pairs.iter().enumerate() {
                values[[frame, column]] = view.distance(frame, a, b);
            }
        }
        Ok(values)
    }
}

/// Signed joint angles in degrees
pub struct Angles<'a> {
    ctx: FeatureContext<'a>,
}

impl Feature for Angles<'_> {
    fn name(&self) -> &'static str {
        "angles"
    }

    fn feature_names(&self) -> Vec<String> {
        ANGLES
            .iter()
            .map(|(a, v, c)| format!("angle {}-{}-{}", a.name(), v.name(), c.name()))
            .collect()
    }

    fn poses(&self) -> &PoseEstimation {
        self.ctx.poses
    }

    fn per_frame(&self, identity: usize) -> Result<Array2<f64>> {
        let view = IdentityPoseView::new(self.ctx.poses, identity, self.ctx.pixel_scale)?;
        let mut values = Array2::from_elem((view.num_frames(), ANGLES.len()), f64::NAN);
        for frame in 0..view.num_frames() {
            if !view.is_present(frame) {
                continue;
            }
            for (column, &(a, vertex, c)) in ANGLES.iter().enumerate() {
                values[[frame, column]] = view.angle(frame, a, vertex, c);
            }
        }
        Ok(values)
    }

    fn window_statistics(&self) -> &'static [(&'static str, WindowOp)] {
        CIRCULAR_STATISTICS
    }
}

/// Speed of each keypoint, distance units per second
pub struct PointSpeeds<'a> {
    ctx: FeatureContext<'a>,
}

impl Feature for PointSpeeds<'_> {
    fn name(&self) -> &'static str {
        "point_speeds"
    }

    fn feature_names(&self) -> Vec<String> {
        KeypointIndex::ALL
            .iter()
            .map(|kp| format!("{} speed", kp.name()))
            .collect()
    }

    fn poses(&self) -> &PoseEstimation {
        self.ctx.poses
    }

    fn per_frame(&self, identity: usize) -> Result<Array2<f64>> {
        let view = IdentityPoseView::new(self.ctx.poses, identity, self.ctx.pixel_scale)?;
        let mut values = Array2::from_elem((view.num_frames(), KeypointIndex::COUNT), f64::NAN);
        for kp in KeypointIndex::ALL {
            for (frame, velocity) in view.point_velocity(kp, self.ctx.fps).into_iter().enumerate() {
                if let Some(v) = velocity {
                    values[[frame, kp as usize]] = v.norm();
                }
            }
        }
        Ok(values)
    }
}

/// Magnitude of the centroid velocity
pub struct CentroidVelocityMag<'a> {
    ctx: FeatureContext<'a>,
}

impl Feature for CentroidVelocityMag<'_> {
    fn name(&self) -> &'static str {
        "centroid_velocity_mag"
    }

    fn feature_names(&self) -> Vec<String> {
        vec!["centroid_velocity_mag".to_string()]
    }

    fn poses(&self) -> &PoseEstimation {
        self.ctx.poses
    }

    fn per_frame(&self, identity: usize) -> Result<Array2<f64>> {
        let view = IdentityPoseView::new(self.ctx.poses, identity, self.ctx.pixel_scale)?;
        let mut values = Array2::from_elem((view.num_frames(), 1), f64::NAN);
        for (frame, velocity) in view.centroid_velocity(self.ctx.fps).into_iter().enumerate() {
            if let Some(v) = velocity {
                values[[frame, 0]] = v.norm();
            }
        }
        Ok(values)
    }
}

/// Direction of the centroid velocity relative to the body heading, degrees
pub struct CentroidVelocityDir<'a> {
    ctx: FeatureContext<'a>,
}

impl Feature for CentroidVelocityDir<'_> {
    fn name(&self) -> &'static str {
        "centroid_velocity_dir"
    }

    fn feature_names(&self) -> Vec<String> {
        vec!["centroid_velocity_dir".to_string()]
    }

    fn poses(&self) -> &PoseEstimation {
        self.ctx.poses
    }

    fn per_frame(&self, identity: usize) -> Result<Array2<f64>> {
        let view = IdentityPoseView::new(self.ctx.poses, identity, self.ctx.pixel_scale)?;
        let mut values = Array2::from_elem((view.num_frames(), 1), f64::NAN);
        for (frame, velocity) in view.centroid_velocity(self.ctx.fps).into_iter().enumerate() {
            let Some(v) = velocity else { continue };
            // a stationary centroid has no direction
            if v.norm() == 0.0 {
                continue;
            }
            let bearing = view.bearing(frame);
            if bearing.is_nan() {
                continue;
            }
            values[[frame, 0]] = wrap_degrees(direction_degrees(v) - bearing);
        }
        Ok(values)
    }

    fn window_statistics(&self) -> &'static [(&'static str, WindowOp)] {
        CIRCULAR_STATISTICS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::v4::tests::make_detections;

    fn approx_eq(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    fn pose() -> PoseEstimation {
        PoseEstimation::from_v4(make_detections(12, 2, &[(1, 3..5)])).unwrap()
    }

    fn ctx(poses: &PoseEstimation) -> FeatureContext<'_> {
        FeatureContext {
            poses,
            pixel_scale: 1.0,
            fps: 30.0,
        }
    }

    #[test]
    fn test_output_shapes_match_names() {
        let poses = pose();
        for generator in generators(ctx(&poses)) {
            let values = generator.per_frame(0).unwrap();
            assert_eq!(values.nrows(), 12, "{}", generator.name());
            assert_eq!(values.ncols(), generator.feature_names().len(), "{}", generator.name());
        }
    }

    #[test]
    fn test_pairwise_distance_count() {
        let poses = pose();
        let feature = PairwiseDistances { ctx: ctx(&poses) };
        let names = feature.feature_names();
        assert_eq!(names.len(), 66);
        assert_eq!(names[0], "NOSE-LEFT_EAR");
        assert_eq!(names[65], "MID_TAIL-TIP_TAIL");
    }

    #[test]
    fn test_absent_frames_are_nan() {
        let poses = pose();
        for generator in generators(ctx(&poses)) {
            let values = generator.per_frame(1).unwrap();
            for frame in 3..5 {
                assert!(
                    values.row(frame).iter().all(|v| v.is_nan()),
                    "{} frame {frame}",
                    generator.name()
                );
            }
        }
        let distances = PairwiseDistances { ctx: ctx(&poses) }.per_frame(1).unwrap();
        assert!(distances.row(2).iter().all(|v| v.is_finite()));
        assert!(distances.row(5).iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_speeds_use_fps_and_scale() {
        let poses = pose();
        // every keypoint moves 1 pixel along x per frame
        let speeds = PointSpeeds { ctx: ctx(&poses) }.per_frame(0).unwrap();
        assert!(speeds.row(0).iter().all(|v| v.is_nan()));
        assert!(approx_eq(speeds[[1, 0]], 30.0, 1e-9));

        let scaled = FeatureContext {
            pixel_scale: 0.5,
            ..ctx(&poses)
        };
        let speeds = CentroidVelocityMag { ctx: scaled }.per_frame(0).unwrap();
        assert!(approx_eq(speeds[[1, 0]], 15.0, 1e-9));

        // identity 1 reappears on frame 5 with no previous position
        let speeds = PointSpeeds { ctx: ctx(&poses) }.per_frame(1).unwrap();
        assert!(speeds.row(5).iter().all(|v| v.is_nan()));
        assert!(speeds.row(6).iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_angles_in_range_and_circular() {
        let poses = pose();
        let feature = Angles { ctx: ctx(&poses) };
        assert_eq!(feature.window_statistics(), CIRCULAR_STATISTICS);
        let values = feature.per_frame(0).unwrap();
        for v in values.iter().filter(|v| !v.is_nan()) {
            assert!((-180.0..180.0).contains(v), "{v}");
        }
    }

    #[test]
    fn test_velocity_direction_relative_to_heading() {
        let poses = pose();
        // keypoints are ordered nose → tail along +x, so the body faces -x
        // while the centroid moves +x: moving backwards
        let values = CentroidVelocityDir { ctx: ctx(&poses) }.per_frame(0).unwrap();
        assert!(values[[0, 0]].is_nan());
        assert!(approx_eq(values[[1, 0]].abs(), 180.0, 1e-9), "{}", values[[1, 0]]);
    }
}
