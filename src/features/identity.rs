use std::collections::BTreeMap;

use ndarray::{concatenate, s, Array2, ArrayView1, ArrayView2, Axis};
use tracing::{debug, warn};

use super::cache::{CacheKey, FeatureCache};
use super::social::{SocialContext, DEFAULT_HALF_FOV_DEG};
use super::window::WindowStats;
use super::{
    FeatureContext, FeatureGeneratorSet, FeatureValue, PerFrameFeatures, WindowFeatures,
    FEATURE_SET_VERSION,
};
use crate::config::{BehaviorConfig, FeatureConfig};
use crate::error::{Error, Result};
use crate::labels::Label;
use crate::pose::PoseEstimation;

/// Numeric inputs to feature extraction for one video.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractionSettings {
    pub fps: f64,
    /// Scale distances by the pose file's `cm_per_pixel` when it has one
    pub use_cm_distances: bool,
    /// Allow closest-identity features where the pose format supports them
    pub social_features: bool,
    pub half_fov_deg: f64,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            fps: 30.0,
            use_cm_distances: true,
            social_features: true,
            half_fov_deg: DEFAULT_HALF_FOV_DEG,
        }
    }
}

impl ExtractionSettings {
    pub fn from_config(features: &FeatureConfig, behavior: &BehaviorConfig, fps: f64) -> Self {
        Self {
            fps,
            use_cm_distances: features.use_cm_distances,
            social_features: behavior.social_features,
            half_fov_deg: features.half_fov_deg,
        }
    }

    pub fn with_fps(self, fps: f64) -> Self {
        Self { fps, ..self }
    }

    pub fn with_social_features(self, social_features: bool) -> Self {
        Self {
            social_features,
            ..self
        }
    }

    /// Multiplier applied to pixel coordinates for this pose file
    pub fn pixel_scale(&self, poses: &PoseEstimation) -> f64 {
        match poses.cm_per_pixel() {
            Some(cm) if self.use_cm_distances => cm,
            _ => 1.0,
        }
    }

    /// Whether closest-identity features are extracted for this pose file
    pub fn wants_social(&self, poses: &PoseEstimation) -> bool {
        self.social_features && poses.supports_social_features()
    }
}

/// Features of every frame in which an identity is present, for inference.
#[derive(Debug, Clone)]
pub struct PresentFrameFeatures {
    pub frames: Vec<usize>,
    pub per_frame: PerFrameFeatures,
    pub window: WindowFeatures,
}

/// All features of one identity in one video.
///
/// Per-frame features are computed (or loaded from the cache) on
/// construction; window features are computed per requested window size.
pub struct IdentityFeatures<'a> {
    video: String,
    identity: usize,
    poses: &'a PoseEstimation,
    ctx: FeatureContext<'a>,
    generators: FeatureGeneratorSet<'a>,
    cache: Option<FeatureCache>,
    per_frame: PerFrameFeatures,
}

impl<'a> IdentityFeatures<'a> {
    /// `social` must come from the same pose data; closest-identity features
    /// are extracted only when it is given.
    pub fn new(
        video: impl Into<String>,
        identity: usize,
        poses: &'a PoseEstimation,
        social: Option<&'a SocialContext>,
        settings: &ExtractionSettings,
        cache: Option<FeatureCache>,
    ) -> Result<Self> {
        let video = video.into();
        if identity >= poses.num_identities() {
            return Err(Error::IdentityOutOfRange {
                identity,
                num_identities: poses.num_identities(),
            }
            .in_video(&video));
        }

        let ctx = FeatureContext {
            poses,
            pixel_scale: settings.pixel_scale(poses),
            fps: settings.fps,
        };
        let generators = match social {
            Some(social) => FeatureGeneratorSet::with_social(ctx, social),
            None => FeatureGeneratorSet::base(ctx),
        };

        let mut features = Self {
            video,
            identity,
            poses,
            ctx,
            generators,
            cache,
            per_frame: PerFrameFeatures::new(),
        };
        features.per_frame = features.load_or_compute(None, |f| f.compute_per_frame())?;
        Ok(features)
    }

    pub fn video(&self) -> &str {
        &self.video
    }

    pub fn identity(&self) -> usize {
        self.identity
    }

    pub fn num_frames(&self) -> usize {
        self.poses.num_frames()
    }

    pub fn has_social_features(&self) -> bool {
        self.generators.has_social()
    }

    /// Generator names, also the keys of the feature maps
    pub fn feature_names(&self) -> Vec<String> {
        self.generators.names()
    }

    pub fn per_frame_columns(&self) -> Vec<String> {
        self.generators.per_frame_columns()
    }

    pub fn window_columns(&self) -> Vec<String> {
        self.generators.window_columns()
    }

    pub fn cache_key(&self, window_size: Option<usize>) -> CacheKey {
        CacheKey {
            video: self.video.clone(),
            identity: self.identity,
            fingerprint: self.poses.fingerprint().to_string(),
            feature_set_version: FEATURE_SET_VERSION,
            generators: self.generators.names(),
            window_size,
            fps_bits: self.ctx.fps.to_bits(),
            pixel_scale_bits: self.ctx.pixel_scale.to_bits(),
            num_frames: self.poses.num_frames(),
        }
    }

    /// Per-frame features, restricted to frames whose label is not NONE when
    /// `labels` is given.
    pub fn get_per_frame(&self, labels: Option<ArrayView1<'_, i8>>) -> Result<PerFrameFeatures> {
        match self.labeled_rows(labels)? {
            Some(rows) => Ok(select_rows(&self.per_frame, &rows)),
            None => Ok(self.per_frame.clone()),
        }
    }

    /// Window features for `window_size`, filtered like [`Self::get_per_frame`].
    pub fn get_window_features(
        &self,
        window_size: usize,
        labels: Option<ArrayView1<'_, i8>>,
    ) -> Result<WindowFeatures> {
        let rows = self.labeled_rows(labels)?;
        let window = self.load_or_compute(Some(window_size), |f| Ok(f.compute_window(window_size)))?;
        match rows {
            Some(rows) => Ok(window
                .into_iter()
                .map(|(name, stats)| (name, select_rows(&stats, &rows)))
                .collect()),
            None => Ok(window),
        }
    }

    /// One per-frame value; `None` for an unknown feature or out of range
    /// index.
    pub fn per_frame_value(&self, feature: &str, frame: usize, column: usize) -> Option<FeatureValue> {
        let values = self.per_frame.get(feature)?;
        let value = *values.get([frame, column])?;
        Some(FeatureValue::classify(
            value,
            self.poses.is_present(frame, self.identity),
        ))
    }

    pub fn present_frame_features(&self, window_size: usize) -> Result<PresentFrameFeatures> {
        let frames: Vec<usize> = self
            .poses
            .identity_mask(self.identity)
            .iter()
            .enumerate()
            .filter_map(|(frame, &present)| present.then_some(frame))
            .collect();
        let window = self.get_window_features(window_size, None)?;
        Ok(PresentFrameFeatures {
            per_frame: select_rows(&self.per_frame, &frames),
            window: window
                .into_iter()
                .map(|(name, stats)| (name, select_rows(&stats, &frames)))
                .collect(),
            frames,
        })
    }

    fn labeled_rows(&self, labels: Option<ArrayView1<'_, i8>>) -> Result<Option<Vec<usize>>> {
        let Some(labels) = labels else {
            return Ok(None);
        };
        if labels.len() != self.num_frames() {
            return Err(Error::LabelLengthMismatch {
                video: self.video.clone(),
                identity: self.identity,
                expected: self.num_frames(),
                found: labels.len(),
            });
        }
        Ok(Some(
            labels
                .iter()
                .enumerate()
                .filter_map(|(frame, &code)| (code != Label::None.code()).then_some(frame))
                .collect(),
        ))
    }

    fn compute_per_frame(&self) -> Result<PerFrameFeatures> {
        let mut features = PerFrameFeatures::new();
        for generator in self.generators.iter() {
            features.insert(generator.name().to_string(), generator.per_frame(self.identity)?);
        }
        Ok(features)
    }

    fn compute_window(&self, window_size: usize) -> WindowFeatures {
        let mut features = WindowFeatures::new();
        for generator in self.generators.iter() {
            if let Some(values) = self.per_frame.get(generator.name()) {
                let stats = generator.window(self.identity, window_size, values.view());
                features.insert(generator.name().to_string(), stats);
            }
        }
        features
    }

    fn load_or_compute<T>(
        &self,
        window_size: Option<usize>,
        compute: impl FnOnce(&Self) -> Result<T>,
    ) -> Result<T>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let Some(cache) = &self.cache else {
            return compute(self);
        };
        let key = self.cache_key(window_size);
        match cache.load(&key) {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => debug!(
                video = %self.video,
                identity = self.identity,
                ?window_size,
                "feature cache miss"
            ),
            Err(e) => warn!(error = %e, "recomputing features"),
        }

        let value = compute(self)?;
        if let Err(e) = cache.store(&key, &value) {
            warn!(error = %e, "failed to write feature cache");
        }
        Ok(value)
    }
}

fn select_rows(features: &BTreeMap<String, Array2<f64>>, rows: &[usize]) -> BTreeMap<String, Array2<f64>> {
    features
        .iter()
        .map(|(name, values)| (name.clone(), values.select(Axis(0), rows)))
        .collect()
}

fn check_keys<V>(maps: &[BTreeMap<String, V>]) -> Result<()> {
    let Some(first) = maps.first() else {
        return Ok(());
    };
    let expected: Vec<String> = first.keys().cloned().collect();
    for (index, map) in maps.iter().enumerate().skip(1) {
        if !map.keys().eq(expected.iter()) {
            return Err(Error::InconsistentFeatureSet {
                index,
                expected,
                found: map.keys().cloned().collect(),
            });
        }
    }
    Ok(())
}

fn stack_rows(feature: &str, arrays: &[ArrayView2<'_, f64>]) -> Result<Array2<f64>> {
    concatenate(Axis(0), arrays).map_err(|source| Error::ShapeMismatch {
        feature: feature.to_string(),
        source,
    })
}

/// Stack per-identity per-frame features along the frame axis.
///
/// Every map must have the same keys, otherwise
/// [`Error::InconsistentFeatureSet`].
pub fn merge_per_frame_features(features: &[PerFrameFeatures]) -> Result<PerFrameFeatures> {
    check_keys(features)?;
    let Some(first) = features.first() else {
        return Ok(PerFrameFeatures::new());
    };
    let mut merged = PerFrameFeatures::new();
    for name in first.keys() {
        let arrays: Vec<ArrayView2<'_, f64>> = features.iter().map(|f| f[name].view()).collect();
        merged.insert(name.clone(), stack_rows(name, &arrays)?);
    }
    Ok(merged)
}

/// Stack per-identity window features along the frame axis, with the same
/// key rule as [`merge_per_frame_features`] on both levels.
pub fn merge_window_features(features: &[WindowFeatures]) -> Result<WindowFeatures> {
    check_keys(features)?;
    let Some(first) = features.first() else {
        return Ok(WindowFeatures::new());
    };
    let mut merged = WindowFeatures::new();
    for name in first.keys() {
        let stats: Vec<WindowStats> = features.iter().map(|f| f[name].clone()).collect();
        check_keys(&stats)?;
        let mut merged_stats = WindowStats::new();
        for statistic in stats[0].keys() {
            let arrays: Vec<ArrayView2<'_, f64>> = stats.iter().map(|s| s[statistic].view()).collect();
            merged_stats.insert(statistic.clone(), stack_rows(name, &arrays)?);
        }
        merged.insert(name.clone(), merged_stats);
    }
    Ok(merged)
}

fn check_split(rows: usize, lengths: &[usize]) -> Result<()> {
    let requested: usize = lengths.iter().sum();
    if requested != rows {
        return Err(Error::SplitMismatch { rows, requested });
    }
    Ok(())
}

fn split_map(features: &BTreeMap<String, Array2<f64>>, lengths: &[usize]) -> Result<Vec<BTreeMap<String, Array2<f64>>>> {
    let mut blocks = vec![BTreeMap::new(); lengths.len()];
    for (name, values) in features {
        check_split(values.nrows(), lengths)?;
        let mut start = 0;
        for (block, &len) in blocks.iter_mut().zip(lengths) {
            block.insert(name.clone(), values.slice(s![start..start + len, ..]).to_owned());
            start += len;
        }
    }
    Ok(blocks)
}

/// Inverse of [`merge_per_frame_features`] given each block's frame count.
pub fn split_per_frame_features(features: &PerFrameFeatures, lengths: &[usize]) -> Result<Vec<PerFrameFeatures>> {
    split_map(features, lengths)
}

/// Inverse of [`merge_window_features`] given each block's frame count.
pub fn split_window_features(features: &WindowFeatures, lengths: &[usize]) -> Result<Vec<WindowFeatures>> {
    let mut blocks = vec![WindowFeatures::new(); lengths.len()];
    for (name, stats) in features {
        for (block, split) in blocks.iter_mut().zip(split_map(stats, lengths)?) {
            block.insert(name.clone(), split);
        }
    }
    Ok(blocks)
}

/// Columns of every feature side by side, in key order.
pub fn per_frame_matrix(features: &PerFrameFeatures) -> Result<Array2<f64>> {
    let arrays: Vec<ArrayView2<'_, f64>> = features.values().map(|v| v.view()).collect();
    stack_columns(&arrays)
}

/// Columns of every (feature, statistic) side by side, in key order.
pub fn window_matrix(features: &WindowFeatures) -> Result<Array2<f64>> {
    let arrays: Vec<ArrayView2<'_, f64>> = features
        .values()
        .flat_map(|stats| stats.values().map(|v| v.view()))
        .collect();
    stack_columns(&arrays)
}

fn stack_columns(arrays: &[ArrayView2<'_, f64>]) -> Result<Array2<f64>> {
    if arrays.is_empty() {
        return Ok(Array2::zeros((0, 0)));
    }
    concatenate(Axis(1), arrays).map_err(|source| Error::ShapeMismatch {
        feature: "feature matrix".to_string(),
        source,
    })
}
