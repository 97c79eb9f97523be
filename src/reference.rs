//! Inline object references.
//!
//! Questions may point at an object with a token like
//! `<c1,CAM_FRONT,0.4886,0.5481>`: a tag, a camera, and a coordinate that is
//! either normalized to [0, 1] or already in pixels.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

use crate::camera::CameraView;
use crate::detect::DistanceBucket;
use crate::scene_graph::{node_id, SceneGraph};

/// Resolution assumed when scaling normalized coordinates to pixels.
pub const ASSUMED_WIDTH: f64 = 1920.0;
pub const ASSUMED_HEIGHT: f64 = 1080.0;

/// Coordinates with both components below this are treated as normalized.
const NORMALIZED_LIMIT: f64 = 2.0;

/// A candidate must be strictly closer than this, in pixels.
pub const MATCH_TOLERANCE_PX: f64 = 100.0;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ObjectReference {
    /// The full token as written in the question.
    pub token: String,
    pub tag: String,
    pub camera: String,
    pub x: f64,
    pub y: f64,
}

impl ObjectReference {
    /// First reference token in `question`, if any.
    pub fn find(question: &str) -> Option<Self> {
        static REFERENCE_RE: OnceLock<Regex> = OnceLock::new();
        let re = REFERENCE_RE.get_or_init(|| {
            Regex::new(r"<(c\d+),([A-Za-z0-9_]+),(\d+(?:\.\d+)?),(\d+(?:\.\d+)?)>").unwrap()
        });
        let caps = re.captures(question)?;
        Some(Self {
            token: caps[0].to_string(),
            tag: caps[1].to_string(),
            camera: caps[2].to_string(),
            x: caps[3].parse().ok()?,
            y: caps[4].parse().ok()?,
        })
    }

    /// Query point in pixel space.
    pub fn pixel_coordinates(&self) -> (f64, f64) {
        if self.x < NORMALIZED_LIMIT && self.y < NORMALIZED_LIMIT {
            (self.x * ASSUMED_WIDTH, self.y * ASSUMED_HEIGHT)
        } else {
            (self.x, self.y)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReferenceResolution {
    Found {
        node_id: String,
        class: String,
        position: String,
        distance: DistanceBucket,
        /// Pixel distance between the query point and the detection center.
        offset_px: f64,
    },
    NotFound,
}

/// Resolve a reference to the nearest detection on its camera.
pub fn resolve(reference: &ObjectReference, graph: &SceneGraph<'_>) -> ReferenceResolution {
    let Some(view) = CameraView::from_label(&reference.camera) else {
        log::debug!("reference {} names unknown camera", reference.token);
        return ReferenceResolution::NotFound;
    };
    let (qx, qy) = reference.pixel_coordinates();

    let nearest = graph
        .perception()
        .detections_in(view)
        .map(|(index, detection)| {
            let dx = detection.center[0] as f64 - qx;
            let dy = detection.center[1] as f64 - qy;
            (index, detection, (dx * dx + dy * dy).sqrt())
        })
        .min_by(|a, b| a.2.total_cmp(&b.2));

    match nearest {
        Some((index, detection, offset)) if offset < MATCH_TOLERANCE_PX => {
            ReferenceResolution::Found {
                node_id: node_id(index),
                class: detection.class.clone(),
                position: detection.position.clone(),
                distance: detection.distance,
                offset_px: offset,
            }
        }
        _ => ReferenceResolution::NotFound,
    }
}

/// One-line rendering for prompts.
pub fn describe(reference: &ObjectReference, resolution: &ReferenceResolution) -> String {
    match resolution {
        ReferenceResolution::Found {
            node_id,
            class,
            position,
            distance,
            ..
        } => format!(
            "{} refers to {}: {} at {} ({} distance)",
            reference.token,
            node_id,
            class,
            position,
            distance.as_str()
        ),
        ReferenceResolution::NotFound => format!("{}: no object found", reference.token),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{normalize, DetectorOutput, RawDetection};
    use crate::perception::PerceptionResult;

    fn perception_with_front_car() -> PerceptionResult {
        let output = DetectorOutput {
            width: 1920,
            height: 1080,
            candidates: vec![RawDetection::new("car", 0.9, [910.0, 490.0, 1010.0, 590.0])],
        };
        let mut detections = normalize(&output, &CameraView::Back).unwrap();
        detections.extend(normalize(&output, &CameraView::Front).unwrap());
        PerceptionResult::from_detections(detections, "stub")
    }

    #[test]
    fn finds_reference_token() {
        let reference =
            ObjectReference::find("What is <c2,CAM_FRONT,0.4886,0.5481> doing?").unwrap();
        assert_eq!(reference.token, "<c2,CAM_FRONT,0.4886,0.5481>");
        assert_eq!(reference.tag, "c2");
        assert_eq!(reference.camera, "CAM_FRONT");
        assert_eq!(reference.x, 0.4886);
        assert!(ObjectReference::find("What is ahead?").is_none());
    }

    #[test]
    fn normalized_coordinates_resolve_to_nearest_detection() {
        let perception = perception_with_front_car();
        let graph = SceneGraph::build(&perception);
        let reference = ObjectReference::find("<c1,CAM_FRONT,0.5,0.5>").unwrap();
        match resolve(&reference, &graph) {
            ReferenceResolution::Found {
                node_id, offset_px, ..
            } => {
                assert_eq!(node_id, "obj_1");
                assert_eq!(offset_px, 0.0);
            }
            ReferenceResolution::NotFound => panic!("expected a match"),
        }
    }

    #[test]
    fn distant_point_is_not_found() {
        let perception = perception_with_front_car();
        let graph = SceneGraph::build(&perception);
        let reference = ObjectReference::find("<c1,CAM_FRONT,0.9,0.9>").unwrap();
        assert_eq!(resolve(&reference, &graph), ReferenceResolution::NotFound);
    }

    #[test]
    fn pixel_coordinates_are_used_as_is() {
        let perception = perception_with_front_car();
        let graph = SceneGraph::build(&perception);
        let near = ObjectReference::find("<c1,CAM_FRONT,1000,600>").unwrap();
        assert!(matches!(resolve(&near, &graph), ReferenceResolution::Found { .. }));
        let at_tolerance = ObjectReference::find("<c1,CAM_FRONT,1060,540>").unwrap();
        assert_eq!(resolve(&at_tolerance, &graph), ReferenceResolution::NotFound);
    }

    #[test]
    fn other_cameras_are_ignored() {
        let perception = perception_with_front_car();
        let graph = SceneGraph::build(&perception);
        let reference = ObjectReference::find("<c1,CAM_BACK_LEFT,0.5,0.5>").unwrap();
        assert_eq!(resolve(&reference, &graph), ReferenceResolution::NotFound);
        let unknown = ObjectReference::find("<c1,LIDAR_TOP,0.5,0.5>").unwrap();
        assert_eq!(resolve(&unknown, &graph), ReferenceResolution::NotFound);
    }

    #[test]
    fn describes_resolution() {
        let perception = perception_with_front_car();
        let graph = SceneGraph::build(&perception);
        let reference = ObjectReference::find("<c1,CAM_FRONT,0.5,0.5>").unwrap();
        let text = describe(&reference, &resolve(&reference, &graph));
        assert_eq!(
            text,
            "<c1,CAM_FRONT,0.5,0.5> refers to obj_1: car at front-center (medium distance)"
        );
        let missing = ObjectReference::find("<c1,CAM_FRONT,0.9,0.9>").unwrap();
        assert_eq!(
            describe(&missing, &ReferenceResolution::NotFound),
            "<c1,CAM_FRONT,0.9,0.9>: no object found"
        );
    }
}
