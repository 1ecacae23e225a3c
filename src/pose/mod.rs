mod estimation;
#[cfg(feature = "hdf5")]
mod hdf5;
pub mod keypoint;
pub mod v3;
pub mod v4;
pub mod v5;
pub mod view;

pub use estimation::{PoseEstimation, PoseFormat};
pub(crate) use estimation::encode_hex;
#[cfg(feature = "hdf5")]
pub use hdf5::{frames_in_file, open_pose_file, peek_format};
pub use keypoint::KeypointIndex;
pub use v3::TrackedInstances;
pub use v4::Detections;
pub use view::IdentityPoseView;

#[cfg(test)]
pub(crate) use estimation::tests as estimation_tests;
