//! Error type shared by the pose readers, feature extraction and the cache.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The `version` attribute is missing or names a schema we cannot read.
    #[error("{}: unsupported pose file format ({reason})", path.display())]
    UnsupportedFormat { path: PathBuf, reason: String },

    /// The file is not a pose file, or a required dataset is absent or has
    /// the wrong shape.
    #[error("{}: invalid pose file: {reason}", path.display())]
    InvalidPoseFile { path: PathBuf, reason: String },

    #[cfg(feature = "hdf5")]
    #[error("{}: hdf5 error: {source}", path.display())]
    Hdf5 {
        path: PathBuf,
        #[source]
        source: hdf5_metno::Error,
    },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A cache entry could not be decoded or belongs to different inputs.
    ///
    /// Never surfaced by [`crate::features::IdentityFeatures`], which falls
    /// back to recomputing.
    #[error("{}: cache entry unusable: {reason}", path.display())]
    CacheCorruption { path: PathBuf, reason: String },

    #[error(
        "{video} identity {identity}: label vector has {found} frames, expected {expected}"
    )]
    LabelLengthMismatch {
        video: String,
        identity: usize,
        expected: usize,
        found: usize,
    },

    /// Per-identity feature sets being merged do not share the same keys.
    #[error("feature set {index} has keys {found:?}, expected {expected:?}")]
    InconsistentFeatureSet {
        index: usize,
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// Arrays stacked under one feature name disagree on their column count.
    #[error("feature '{feature}': {source}")]
    ShapeMismatch {
        feature: String,
        #[source]
        source: ndarray::ShapeError,
    },

    #[error("cannot split {rows} rows into blocks totalling {requested}")]
    SplitMismatch { rows: usize, requested: usize },

    #[error("invalid labels: {reason}")]
    InvalidLabels { reason: String },

    #[error("{}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("identity {identity} out of range (pose has {num_identities} identities)")]
    IdentityOutOfRange {
        identity: usize,
        num_identities: usize,
    },

    #[error("feature extraction cancelled after {completed} identities")]
    Cancelled { completed: usize },

    /// An error raised while processing `video`.
    #[error("{video}: {source}")]
    Video {
        video: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn invalid(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidPoseFile {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Attach the video name unless the error already names it.
    pub(crate) fn in_video(self, video: &str) -> Self {
        match self {
            Self::LabelLengthMismatch { .. } | Self::Cancelled { .. } | Self::Video { .. } => self,
            source => Self::Video {
                video: video.to_string(),
                source: Box::new(source),
            },
        }
    }

    /// The innermost error, looking through [`Error::Video`].
    pub fn root(&self) -> &Error {
        match self {
            Self::Video { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_context() {
        let err = Error::invalid("/data/video1_pose_est_v4.h5", "missing dataset 'points'");
        let msg = err.to_string();
        assert!(msg.contains("video1_pose_est_v4.h5"));
        assert!(msg.contains("points"));

        let err = Error::LabelLengthMismatch {
            video: "video1.avi".to_string(),
            identity: 2,
            expected: 50,
            found: 49,
        };
        assert_eq!(
            err.to_string(),
            "video1.avi identity 2: label vector has 49 frames, expected 50"
        );
    }

    #[test]
    fn test_in_video_wraps_once() {
        let err = Error::IdentityOutOfRange {
            identity: 3,
            num_identities: 2,
        }
        .in_video("video1.avi")
        .in_video("other.avi");
        assert_eq!(
            err.to_string(),
            "video1.avi: identity 3 out of range (pose has 2 identities)"
        );
        assert!(matches!(err.root(), Error::IdentityOutOfRange { identity: 3, .. }));

        let err = Error::Cancelled { completed: 4 }.in_video("video1.avi");
        assert!(matches!(err, Error::Cancelled { completed: 4 }));
    }
}
