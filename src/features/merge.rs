//! Training matrices across videos and identities.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2};
use tracing::{debug, info};

use super::cache::FeatureCache;
use super::identity::{
    merge_per_frame_features, merge_window_features, per_frame_matrix, window_matrix,
    ExtractionSettings, IdentityFeatures,
};
use super::social::SocialContext;
use super::{PerFrameFeatures, WindowFeatures};
use crate::error::{Error, Result};
use crate::labels::{Label, VideoLabels};
use crate::pose::PoseEstimation;

/// One video's inputs to [`FeatureMerger::labeled_features`].
#[derive(Debug, Clone, Copy)]
pub struct VideoSource<'a> {
    pub name: &'a str,
    pub poses: &'a PoseEstimation,
    pub fps: f64,
    pub labels: &'a VideoLabels,
}

/// Identity whose frames make up one group of the training data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember {
    pub video: String,
    pub identity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Identities finished so far, across all videos
    pub completed: usize,
    pub total: usize,
}

/// Optional callbacks polled once per identity.
#[derive(Default)]
pub struct ExtractionHooks<'h> {
    pub on_progress: Option<Box<dyn FnMut(Progress) + 'h>>,
    pub should_cancel: Option<Box<dyn Fn() -> bool + 'h>>,
}

impl<'h> ExtractionHooks<'h> {
    pub fn on_progress(mut self, callback: impl FnMut(Progress) + 'h) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    pub fn should_cancel(mut self, check: impl Fn() -> bool + 'h) -> Self {
        self.should_cancel = Some(Box::new(check));
        self
    }

    fn cancelled(&self) -> bool {
        self.should_cancel.as_ref().is_some_and(|check| check())
    }

    fn report(&mut self, progress: Progress) {
        if let Some(callback) = self.on_progress.as_mut() {
            callback(progress);
        }
    }
}

/// Labeled frames of a corpus, stacked row-wise.
///
/// Rows are grouped by (video, identity) in traversal order: videos sorted
/// by name, identities ascending.
#[derive(Debug, Clone)]
pub struct TrainingData {
    pub window: Array2<f64>,
    pub per_frame: Array2<f64>,
    /// Label code per row, never NONE
    pub labels: Array1<i8>,
    /// Group id per row
    pub groups: Array1<usize>,
    pub group_mapping: BTreeMap<usize, GroupMember>,
    /// Rows contributed by each group, in group order
    pub block_sizes: Vec<usize>,
    pub per_frame_columns: Vec<String>,
    pub window_columns: Vec<String>,
    pub social_features: bool,
}

impl TrainingData {
    pub fn num_rows(&self) -> usize {
        self.labels.len()
    }
}

pub struct FeatureMerger {
    settings: ExtractionSettings,
    cache: Option<FeatureCache>,
}

impl FeatureMerger {
    pub fn new(settings: ExtractionSettings) -> Self {
        Self {
            settings,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: FeatureCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn labeled_features(
        &self,
        videos: &[VideoSource<'_>],
        behavior: &str,
        window_size: usize,
    ) -> Result<TrainingData> {
        self.labeled_features_with_hooks(videos, behavior, window_size, &mut ExtractionHooks::default())
    }

    /// Closest-identity features are used only if the settings allow them
    /// and every video supports them, so all groups share one feature set.
    pub fn labeled_features_with_hooks(
        &self,
        videos: &[VideoSource<'_>],
        behavior: &str,
        window_size: usize,
        hooks: &mut ExtractionHooks<'_>,
    ) -> Result<TrainingData> {
        let mut videos: Vec<&VideoSource<'_>> = videos.iter().collect();
        videos.sort_by(|a, b| a.name.cmp(b.name));

        let social_features = !videos.is_empty()
            && videos
                .iter()
                .all(|v| self.settings.wants_social(v.poses));
        let total: usize = videos.iter().map(|v| v.poses.num_identities()).sum();

        let mut per_frame: Vec<PerFrameFeatures> = Vec::with_capacity(total);
        let mut window: Vec<WindowFeatures> = Vec::with_capacity(total);
        let mut labels: Vec<i8> = Vec::new();
        let mut groups: Vec<usize> = Vec::new();
        let mut group_mapping = BTreeMap::new();
        let mut block_sizes = Vec::with_capacity(total);
        let mut columns: Option<(Vec<String>, Vec<String>)> = None;
        let mut completed = 0;

        for video in videos {
            let settings = self.settings.with_fps(video.fps);
            let social = if social_features {
                Some(
                    SocialContext::compute(
                        video.poses,
                        settings.pixel_scale(video.poses),
                        settings.half_fov_deg,
                    )
                    .map_err(|e| e.in_video(video.name))?,
                )
            } else {
                None
            };

            for identity in video.poses.identities() {
                if hooks.cancelled() {
                    info!(completed, "feature extraction cancelled");
                    return Err(Error::Cancelled { completed });
                }

                let features = IdentityFeatures::new(
                    video.name,
                    identity,
                    video.poses,
                    social.as_ref(),
                    &settings,
                    self.cache.clone(),
                )?;
                let track = video.labels.labels_for(identity, behavior);

                per_frame.push(
                    features
                        .get_per_frame(Some(track.view()))
                        .map_err(|e| e.in_video(video.name))?,
                );
                window.push(
                    features
                        .get_window_features(window_size, Some(track.view()))
                        .map_err(|e| e.in_video(video.name))?,
                );
                if columns.is_none() {
                    columns = Some((features.per_frame_columns(), features.window_columns()));
                }

                let group = group_mapping.len();
                let block: Vec<i8> = track
                    .iter()
                    .copied()
                    .filter(|&code| code != Label::None.code())
                    .collect();
                groups.extend(std::iter::repeat(group).take(block.len()));
                block_sizes.push(block.len());
                labels.extend(block);
                group_mapping.insert(
                    group,
                    GroupMember {
                        video: video.name.to_string(),
                        identity,
                    },
                );

                completed += 1;
                hooks.report(Progress { completed, total });
                debug!(
                    video = video.name,
                    identity,
                    group,
                    rows = block_sizes[group],
                    "collected labeled features"
                );
            }
        }

        let (per_frame_columns, window_columns) = columns.unwrap_or_default();
        let data = TrainingData {
            window: window_matrix(&merge_window_features(&window)?)?,
            per_frame: per_frame_matrix(&merge_per_frame_features(&per_frame)?)?,
            labels: Array1::from_vec(labels),
            groups: Array1::from_vec(groups),
            group_mapping,
            block_sizes,
            per_frame_columns,
            window_columns,
            social_features,
        };
        info!(
            behavior,
            rows = data.num_rows(),
            groups = data.group_mapping.len(),
            social_features,
            "built training data"
        );
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::v3::tests::make_instances;
    use crate::pose::v4::tests::make_detections;
    use std::cell::Cell;

    const BEHAVIOR: &str = "Grooming";

    fn labels_for(num_frames: usize, spans: &[(usize, usize, usize)]) -> VideoLabels {
        let mut labels = VideoLabels::new("video", num_frames);
        for &(identity, start, end) in spans {
            labels
                .track_mut(identity, BEHAVIOR)
                .label_behavior(start, end);
        }
        labels
    }

    #[test]
    fn test_groups_follow_canonical_order() {
        let pose_b = PoseEstimation::from_v4(make_detections(30, 2, &[])).unwrap();
        let pose_a = PoseEstimation::from_v4(make_detections(30, 2, &[])).unwrap();
        // identity frame counts 4, 6 in video a and 5, 3 in video b
        let labels_a = labels_for(30, &[(0, 0, 3), (1, 10, 15)]);
        let labels_b = labels_for(30, &[(0, 20, 24), (1, 0, 2)]);
        let videos = [
            VideoSource { name: "b.avi", poses: &pose_b, fps: 30.0, labels: &labels_b },
            VideoSource { name: "a.avi", poses: &pose_a, fps: 30.0, labels: &labels_a },
        ];

        let data = FeatureMerger::new(ExtractionSettings::default())
            .labeled_features(&videos, BEHAVIOR, 5)
            .unwrap();

        let expected: Vec<usize> = [(0, 4), (1, 6), (2, 5), (3, 3)]
            .iter()
            .flat_map(|&(g, n)| std::iter::repeat(g).take(n))
            .collect();
        assert_eq!(data.groups.to_vec(), expected);
        assert_eq!(data.block_sizes, vec![4, 6, 5, 3]);
        assert_eq!(data.group_mapping[&0], GroupMember { video: "a.avi".to_string(), identity: 0 });
        assert_eq!(data.group_mapping[&3], GroupMember { video: "b.avi".to_string(), identity: 1 });
        assert!(data.labels.iter().all(|&l| l == Label::Behavior.code()));
        assert_eq!(data.per_frame.nrows(), 18);
        assert_eq!(data.window.nrows(), 18);
        assert_eq!(data.per_frame.ncols(), data.per_frame_columns.len());
        assert_eq!(data.window.ncols(), data.window_columns.len());
        assert!(!data.social_features);
    }

    #[test]
    fn test_social_features_need_every_video() {
        let v3 = PoseEstimation::from_v3(make_instances(10, &[1, 2], &[100.0, 200.0], &[])).unwrap();
        let v4 = PoseEstimation::from_v4(make_detections(10, 2, &[])).unwrap();
        let labels = labels_for(10, &[(0, 0, 9), (1, 0, 9)]);
        let v3_only = [VideoSource { name: "v3.avi", poses: &v3, fps: 30.0, labels: &labels }];
        let mixed = [
            v3_only[0],
            VideoSource { name: "v4.avi", poses: &v4, fps: 30.0, labels: &labels },
        ];
        let merger = FeatureMerger::new(ExtractionSettings::default());

        let social = merger.labeled_features(&v3_only, BEHAVIOR, 5).unwrap();
        let mixed = merger.labeled_features(&mixed, BEHAVIOR, 5).unwrap();
        assert!(social.social_features);
        assert!(!mixed.social_features);
        assert_eq!(social.per_frame_columns.len(), mixed.per_frame_columns.len() + 3);
        assert_eq!(mixed.num_rows(), 40);

        let disabled = FeatureMerger::new(ExtractionSettings::default().with_social_features(false))
            .labeled_features(&v3_only, BEHAVIOR, 5)
            .unwrap();
        assert!(!disabled.social_features);
    }

    #[test]
    fn test_label_mismatch_and_unlabeled_identities() {
        let poses = PoseEstimation::from_v4(make_detections(10, 2, &[])).unwrap();
        let labels = labels_for(10, &[(1, 2, 4)]);
        let videos = [VideoSource { name: "v.avi", poses: &poses, fps: 30.0, labels: &labels }];
        let data = FeatureMerger::new(ExtractionSettings::default())
            .labeled_features(&videos, BEHAVIOR, 5)
            .unwrap();
        // identity 0 has no labels but still owns group 0
        assert_eq!(data.block_sizes, vec![0, 3]);
        assert_eq!(data.groups.to_vec(), vec![1, 1, 1]);

        let short = labels_for(9, &[]);
        let videos = [VideoSource { name: "v.avi", poses: &poses, fps: 30.0, labels: &short }];
        let err = FeatureMerger::new(ExtractionSettings::default())
            .labeled_features(&videos, BEHAVIOR, 5)
            .unwrap_err();
        assert!(matches!(err, Error::LabelLengthMismatch { expected: 10, found: 9, .. }));
    }

    #[test]
    fn test_progress_and_cancel() {
        let poses = PoseEstimation::from_v4(make_detections(10, 3, &[])).unwrap();
        let labels = VideoLabels::new("v.avi", 10);
        let videos = [VideoSource { name: "v.avi", poses: &poses, fps: 30.0, labels: &labels }];
        let merger = FeatureMerger::new(ExtractionSettings::default());

        let mut seen = Vec::new();
        let mut hooks = ExtractionHooks::default().on_progress(|p| seen.push(p));
        merger
            .labeled_features_with_hooks(&videos, BEHAVIOR, 5, &mut hooks)
            .unwrap();
        drop(hooks);
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2], Progress { completed: 3, total: 3 });

        let polls = Cell::new(0);
        let mut hooks = ExtractionHooks::default().should_cancel(|| {
            polls.set(polls.get() + 1);
            polls.get() > 2
        });
        let err = merger
            .labeled_features_with_hooks(&videos, BEHAVIOR, 5, &mut hooks)
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { completed: 2 }));
    }

    #[test]
    fn test_empty_corpus() {
        let data = FeatureMerger::new(ExtractionSettings::default())
            .labeled_features(&[], BEHAVIOR, 5)
            .unwrap();
        assert_eq!(data.num_rows(), 0);
        assert!(data.group_mapping.is_empty());
    }
}
