//! Perception stage.
//!
//! Runs the detector once per camera image, normalizes each image's output,
//! and concatenates the detections in camera slot order. Optionally asks the
//! vision model for additional scene context.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::camera::{CameraView, ImagePaths};
use crate::detect::{self, BackendRegistry, Detection, CONFIDENCE_THRESHOLD};
use crate::generate::{GenerationRequest, Generator};

const MAX_VLM_DETECTIONS: usize = 10;
const VLM_TEMPERATURE: f32 = 0.0;

/// One camera image assigned to a view.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraImage {
    pub view: CameraView,
    pub image: String,
}

/// Arrange a `camera name -> image` mapping into slot order.
///
/// Recognized camera names are ordered front, front_left, front_right, back,
/// back_left, back_right. Unrecognized names follow in input order and are
/// labelled `camera_<n>` by their final position.
pub fn arrange_images(image_paths: &ImagePaths) -> Vec<CameraImage> {
    let mut known: Vec<CameraImage> = Vec::new();
    let mut unknown: Vec<&String> = Vec::new();
    for (name, image) in image_paths {
        match CameraView::from_label(name) {
            Some(view) if !matches!(view, CameraView::Overflow(_)) => known.push(CameraImage {
                view,
                image: image.clone(),
            }),
            _ => unknown.push(image),
        }
    }
    known.sort_by_key(|camera| camera.view.slot());
    let offset = known.len();
    known.extend(unknown.into_iter().enumerate().map(|(i, image)| CameraImage {
        view: CameraView::Overflow(offset + i),
        image: image.clone(),
    }));
    known
}

/// Structured object parsed from `- key: value, key: value` lines of a
/// vision-model reply.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DescribedObject {
    pub fields: BTreeMap<String, String>,
}

impl DescribedObject {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

/// Parse bullet lines of `key: value` pairs. Lines without a pair are skipped.
pub fn parse_described_objects(response: &str) -> Vec<DescribedObject> {
    response
        .trim()
        .lines()
        .filter(|line| line.trim().starts_with('-'))
        .filter_map(|line| {
            let body = line.trim_matches(|c: char| c == '-' || c == ' ');
            let fields: BTreeMap<String, String> = body
                .split(',')
                .filter_map(|part| part.split_once(':'))
                .map(|(key, value)| (key.trim().to_lowercase(), value.trim().to_string()))
                .collect();
            (!fields.is_empty()).then_some(DescribedObject { fields })
        })
        .collect()
}

/// Output of the perception stage. Immutable once produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerceptionResult {
    pub detections: Vec<Detection>,
    pub description: String,
    pub detection_method: String,
    /// Free-text context from the vision model, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlm_context: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<DescribedObject>,
}

impl PerceptionResult {
    pub fn from_detections(detections: Vec<Detection>, detection_method: &str) -> Self {
        let description = detect::describe_detections(&detections);
        Self {
            detections,
            description,
            detection_method: detection_method.to_string(),
            vlm_context: None,
            objects: Vec::new(),
        }
    }

    /// Attach vision-model context, parsing any structured object lines.
    pub fn with_vlm_context(mut self, context: String) -> Self {
        self.objects = parse_described_objects(&context);
        self.vlm_context = Some(context);
        self
    }

    /// Detections seen by `view`, with their index in the full detection list.
    pub fn detections_in(&self, view: CameraView) -> impl Iterator<Item = (usize, &Detection)> {
        self.detections
            .iter()
            .enumerate()
            .filter(move |(_, detection)| detection.camera_view == view)
    }
}

#[derive(Clone, Debug)]
pub struct PerceptionSettings {
    pub vlm_model: String,
    pub use_vlm: bool,
}

/// Stage 1 driver.
pub struct PerceptionStage<'a> {
    detectors: &'a BackendRegistry,
    generator: &'a dyn Generator,
    settings: &'a PerceptionSettings,
}

impl<'a> PerceptionStage<'a> {
    pub fn new(
        detectors: &'a BackendRegistry,
        generator: &'a dyn Generator,
        settings: &'a PerceptionSettings,
    ) -> Self {
        Self {
            detectors,
            generator,
            settings,
        }
    }

    pub fn perceive(&self, images: &[CameraImage], question: &str) -> Result<PerceptionResult> {
        let mut detections = Vec::new();
        for camera in images {
            let output = self
                .detectors
                .detect(&camera.image, CONFIDENCE_THRESHOLD)
                .with_context(|| format!("detection failed on {} camera", camera.view))?;
            let normalized = detect::normalize(&output, &camera.view)?;
            log::debug!(
                "{} camera: {} of {} candidates kept",
                camera.view,
                normalized.len(),
                output.candidates.len()
            );
            detections.extend(normalized);
        }

        let method = self.detectors.default_name().unwrap_or("unknown");
        let result = PerceptionResult::from_detections(detections, method);
        if !self.settings.use_vlm {
            return Ok(result);
        }

        let image_refs: Vec<String> = images.iter().map(|camera| camera.image.clone()).collect();
        let prompt = vlm_context_prompt(&result.detections, question);
        let request = GenerationRequest::text(&self.settings.vlm_model, &prompt, VLM_TEMPERATURE)
            .with_images(&image_refs);
        let context = self
            .generator
            .generate(&request)
            .context("vision context request failed")?;
        Ok(result.with_vlm_context(context))
    }
}

fn format_detections_for_vlm(detections: &[Detection]) -> String {
    if detections.is_empty() {
        return "No objects detected".to_string();
    }
    detections
        .iter()
        .take(MAX_VLM_DETECTIONS)
        .map(|d| format!("- {} at {} ({})", d.class, d.position, d.distance.as_str()))
        .collect::<Vec<String>>()
        .join("\n")
}

fn vlm_context_prompt(detections: &[Detection], question: &str) -> String {
    let focus = if question.is_empty() {
        String::new()
    } else {
        format!("Focus on: {}", question)
    };
    format!(
        "You are analyzing a driving scene. The object detector has detected these objects:\n\
         {}\n\n\
         Provide additional context about:\n\
         - Road conditions and obstacles\n\
         - Movement patterns and behavior of detected objects\n\
         - Any safety concerns or notable scene characteristics\n\n\
         {}\n\n\
         Provide brief additional insights:",
        format_detections_for_vlm(detections),
        focus
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{RawDetection, StubBackend};
    use crate::generate::ScriptedGenerator;

    fn images(pairs: &[(&str, &str)]) -> ImagePaths {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn arranges_images_in_slot_order() {
        let arranged = arrange_images(&images(&[
            ("CAM_BACK", "back.jpg"),
            ("CAM_FRONT_RIGHT", "fr.jpg"),
            ("RADAR_FRONT", "radar.jpg"),
            ("CAM_FRONT", "front.jpg"),
            ("LIDAR_TOP", "lidar.jpg"),
        ]));
        let views: Vec<String> = arranged.iter().map(|c| c.view.label()).collect();
        assert_eq!(views, vec!["front", "front_right", "back", "camera_3", "camera_4"]);
        assert_eq!(arranged[3].image, "radar.jpg");
        assert_eq!(arranged[4].image, "lidar.jpg");
    }

    #[test]
    fn parses_structured_object_lines() {
        let objects = parse_described_objects(
            "Scene notes:\n- object: sedan, color: gray, position: front\n- a car far away\n",
        );
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].get("object"), Some("sedan"));
        assert_eq!(objects[0].get("color"), Some("gray"));
    }

    #[test]
    fn perceives_in_slot_order_and_adds_vlm_context() {
        let mut registry = BackendRegistry::new();
        registry.register(
            StubBackend::new()
                .with_candidates(
                    "back.jpg",
                    vec![RawDetection::new("truck", 0.8, [100.0, 100.0, 300.0, 850.0])],
                )
                .with_candidates(
                    "front.jpg",
                    vec![
                        RawDetection::new("car", 0.9, [700.0, 400.0, 900.0, 600.0]),
                        RawDetection::new("car", 0.2, [0.0, 0.0, 10.0, 10.0]),
                    ],
                ),
        );
        let generator = ScriptedGenerator::new("Wet road.");
        let settings = PerceptionSettings {
            vlm_model: "llava:latest".to_string(),
            use_vlm: true,
        };
        let stage = PerceptionStage::new(&registry, &generator, &settings);
        let arranged = arrange_images(&images(&[("CAM_BACK", "back.jpg"), ("CAM_FRONT", "front.jpg")]));

        let result = stage.perceive(&arranged, "Is it safe?").unwrap();
        assert_eq!(result.detections.len(), 2);
        assert_eq!(result.detections[0].camera_view, CameraView::Front);
        assert_eq!(result.detections[1].camera_view, CameraView::Back);
        assert_eq!(result.detection_method, "stub");
        assert_eq!(result.vlm_context.as_deref(), Some("Wet road."));

        let calls = generator.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].images, vec!["front.jpg", "back.jpg"]);
        assert!(calls[0].prompt.contains("- car at front-center (medium)"));
        assert!(calls[0].prompt.contains("Focus on: Is it safe?"));
    }

    #[test]
    fn skips_vlm_when_disabled() {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::new());
        let generator = ScriptedGenerator::new("unused");
        let settings = PerceptionSettings {
            vlm_model: "llava:latest".to_string(),
            use_vlm: false,
        };
        let stage = PerceptionStage::new(&registry, &generator, &settings);
        let arranged = arrange_images(&images(&[("CAM_FRONT", "front.jpg")]));
        let result = stage.perceive(&arranged, "").unwrap();
        assert!(result.detections.is_empty());
        assert_eq!(result.description, "No objects detected in the scene.");
        assert!(generator.calls().is_empty());
    }
}
