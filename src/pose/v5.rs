//! Version 5 pose data: V4 detections plus static scene objects.

use std::collections::BTreeMap;
use std::path::Path;

use ndarray::Array2;

use super::estimation::{PoseEstimation, PoseFormat, PoseParts};
use super::v4::Detections;
use crate::error::{Error, Result};

pub(crate) fn reconcile(
    detections: Detections,
    static_objects: BTreeMap<String, Array2<f64>>,
    origin: &Path,
) -> Result<PoseEstimation> {
    detections.validate(origin)?;
    for (name, object) in &static_objects {
        if object.ncols() != 2 {
            return Err(Error::invalid(
                origin,
                format!(
                    "static object '{name}' must be (n, 2) points, found {:?}",
                    object.shape()
                ),
            ));
        }
    }

    let by_identity = detections.scatter();
    Ok(PoseEstimation::from_parts(PoseParts {
        format: PoseFormat::V5,
        points: by_identity.points,
        confidence: by_identity.confidence,
        identity_to_track: Some(by_identity.slots),
        static_objects,
        cm_per_pixel: detections.cm_per_pixel,
    }))
}

impl PoseEstimation {
    /// Build a V5 pose from detection tables and static objects in memory.
    pub fn from_v5(
        detections: Detections,
        static_objects: BTreeMap<String, Array2<f64>>,
    ) -> Result<Self> {
        reconcile(detections, static_objects, Path::new("<memory>"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::v4::tests::make_detections;
    use ndarray::array;

    fn corners() -> BTreeMap<String, Array2<f64>> {
        let mut objects = BTreeMap::new();
        objects.insert(
            "corners".to_string(),
            array![[10.0, 10.0], [10.0, 790.0], [790.0, 790.0], [790.0, 10.0]],
        );
        objects
    }

    #[test]
    fn test_static_objects_exposed() {
        let pose = PoseEstimation::from_v5(make_detections(4, 2, &[]), corners()).unwrap();
        assert_eq!(pose.format_major_version(), 5);
        let corners = &pose.static_objects()["corners"];
        assert_eq!(corners.shape(), &[4, 2]);
    }

    #[test]
    fn test_identity_to_track_records_slots() {
        let pose =
            PoseEstimation::from_v5(make_detections(6, 2, &[(0, 2..3)]), corners()).unwrap();
        let tracks = pose.identity_to_track().unwrap();
        assert_eq!(tracks.shape(), &[2, 6]);
        // identity 0 is stored in slot 1, identity 1 in slot 0
        assert_eq!(tracks[[0, 0]], 1);
        assert_eq!(tracks[[1, 0]], 0);
        assert_eq!(tracks[[0, 2]], -1);
    }

    #[test]
    fn test_malformed_static_object_rejected() {
        let mut objects = corners();
        objects.insert("lixit".to_string(), Array2::zeros((1, 3)));
        let err = PoseEstimation::from_v5(make_detections(2, 1, &[]), objects).unwrap_err();
        assert!(err.to_string().contains("lixit"));
    }
}
