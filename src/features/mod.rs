//! Per-frame and window feature generation.
//!
//! Each [`Feature`] produces a `(num_frames, k)` array for one identity and
//! window statistics over it. [`IdentityFeatures`] runs the whole generator
//! set for one identity, [`FeatureMerger`] stacks identities and videos
//! into training matrices.

pub mod cache;
pub mod identity;
pub mod merge;
pub mod physical;
pub mod social;
pub mod window;

use std::collections::BTreeMap;

use ndarray::{Array2, ArrayView1, ArrayView2};

use crate::error::Result;
use crate::pose::PoseEstimation;

pub use cache::{CacheKey, FeatureCache};
pub use identity::{
    merge_per_frame_features, merge_window_features, per_frame_matrix, split_per_frame_features,
    split_window_features, window_matrix, ExtractionSettings, IdentityFeatures, PresentFrameFeatures,
};
pub use merge::{ExtractionHooks, FeatureMerger, GroupMember, Progress, TrainingData, VideoSource};
pub use social::{ClosestIdentityInfo, SocialContext};
pub use window::{WindowAggregator, WindowOp, WindowStats, CIRCULAR_STATISTICS, LINEAR_STATISTICS};

/// Bumped whenever a generator changes its output; part of every cache key.
pub const FEATURE_SET_VERSION: u32 = 1;

pub const DEFAULT_WINDOW_SIZE: usize = 5;

/// Per-frame features for one identity: feature name → (frames, k)
pub type PerFrameFeatures = BTreeMap<String, Array2<f64>>;

/// Window features for one identity: feature name → statistic → (frames, k)
pub type WindowFeatures = BTreeMap<String, WindowStats>;

/// A single per-frame feature value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeatureValue {
    Value(f64),
    /// The identity is not present in this frame
    Absent,
    /// The identity is present but the value could not be computed (missing
    /// keypoint, no other identity nearby, first frame of a velocity)
    Undefined,
}

impl FeatureValue {
    pub fn classify(value: f64, present: bool) -> Self {
        if !present {
            Self::Absent
        } else if value.is_nan() {
            Self::Undefined
        } else {
            Self::Value(value)
        }
    }

    pub fn value(self) -> Option<f64> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// Inputs shared by every generator for one video.
#[derive(Debug, Clone, Copy)]
pub struct FeatureContext<'a> {
    pub poses: &'a PoseEstimation,
    /// Multiplier from pixels to output distance units
    pub pixel_scale: f64,
    pub fps: f64,
}

pub trait Feature {
    /// Key of this feature in [`PerFrameFeatures`] and [`WindowFeatures`]
    fn name(&self) -> &'static str;

    /// One name per output column
    fn feature_names(&self) -> Vec<String>;

    fn poses(&self) -> &PoseEstimation;

    /// (num_frames, k) values, NaN wherever the value is not computable
    fn per_frame(&self, identity: usize) -> Result<Array2<f64>>;

    /// Statistics used by the default [`Feature::window`]
    fn window_statistics(&self) -> &'static [(&'static str, WindowOp)] {
        LINEAR_STATISTICS
    }

    /// Window statistics over `per_frame_values`, skipping frames where the
    /// identity is absent.
    fn window(
        &self,
        identity: usize,
        window_size: usize,
        per_frame_values: ArrayView2<'_, f64>,
    ) -> WindowStats {
        let presence: ArrayView1<'_, bool> = self.poses().identity_mask(identity);
        WindowAggregator::new(window_size).aggregate(
            per_frame_values,
            presence,
            self.window_statistics(),
        )
    }
}

/// The generators run for one video, ordered by name.
pub struct FeatureGeneratorSet<'a> {
    generators: Vec<Box<dyn Feature + 'a>>,
}

impl<'a> FeatureGeneratorSet<'a> {
    /// Physical features of a single identity
    pub fn base(ctx: FeatureContext<'a>) -> Self {
        Self::from_generators(physical::generators(ctx))
    }

    /// Physical features plus the closest-identity features
    pub fn with_social(ctx: FeatureContext<'a>, social: &'a SocialContext) -> Self {
        let mut generators = physical::generators(ctx);
        generators.extend(social::generators(ctx, social));
        Self::from_generators(generators)
    }

    fn from_generators(mut generators: Vec<Box<dyn Feature + 'a>>) -> Self {
        generators.sort_by_key(|g| g.name());
        Self { generators }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(dyn Feature + 'a)> {
        self.generators.iter().map(|g| g.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.generators.iter().map(|g| g.name().to_string()).collect()
    }

    pub fn has_social(&self) -> bool {
        self.generators
            .iter()
            .any(|g| social::GENERATOR_NAMES.contains(&g.name()))
    }

    /// Column labels in [`per_frame_matrix`] order
    pub fn per_frame_columns(&self) -> Vec<String> {
        self.generators
            .iter()
            .flat_map(|g| g.feature_names())
            .collect()
    }

    /// Column labels in [`window_matrix`] order
    pub fn window_columns(&self) -> Vec<String> {
        let mut columns = Vec::new();
        for g in &self.generators {
            let mut statistics: Vec<&str> = g.window_statistics().iter().map(|(n, _)| *n).collect();
            statistics.sort_unstable();
            for statistic in statistics {
                columns.extend(g.feature_names().into_iter().map(|n| format!("{statistic} {n}")));
            }
        }
        columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_value_classify() {
        assert_eq!(FeatureValue::classify(1.5, true), FeatureValue::Value(1.5));
        assert_eq!(FeatureValue::classify(0.0, true), FeatureValue::Value(0.0));
        assert_eq!(FeatureValue::classify(f64::NAN, true), FeatureValue::Undefined);
        assert_eq!(FeatureValue::classify(0.0, false), FeatureValue::Absent);
        assert_eq!(FeatureValue::Absent.value(), None);
    }
}
