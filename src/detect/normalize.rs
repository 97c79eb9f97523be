//! Detector output normalization.
//!
//! Turns raw per-image candidates into `Detection` records carrying the
//! derived camera position and distance labels. Candidates at or below
//! `CONFIDENCE_THRESHOLD` never produce a record.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use super::result::{DetectorOutput, RawDetection};
use crate::camera::CameraView;

/// Acceptance threshold. Candidates must be strictly above it.
pub const CONFIDENCE_THRESHOLD: f64 = 0.3;

const VEHICLE_CLASSES: [&str; 4] = ["car", "truck", "bus", "motorcycle"];
const TRAFFIC_CLASSES: [&str; 2] = ["traffic light", "stop sign"];
const MAX_DESCRIBED_VEHICLES: usize = 5;
const MAX_DESCRIBED_PEDESTRIANS: usize = 3;

/// Scene description when no detection survived the threshold.
pub const EMPTY_SCENE_DESCRIPTION: &str = "No objects detected in the scene.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HorizontalBucket {
    Left,
    Center,
    Right,
}

/// Exclusive upper bounds as fractions of the image width, first match wins.
const HORIZONTAL_RULES: [(f64, HorizontalBucket); 2] = [
    (0.33, HorizontalBucket::Left),
    (0.66, HorizontalBucket::Center),
];

impl HorizontalBucket {
    pub fn from_center(x: f64, width: u32) -> Self {
        let width = f64::from(width);
        HORIZONTAL_RULES
            .iter()
            .find(|(fraction, _)| x < width * fraction)
            .map(|(_, bucket)| *bucket)
            .unwrap_or(HorizontalBucket::Right)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HorizontalBucket::Left => "left",
            HorizontalBucket::Center => "center",
            HorizontalBucket::Right => "right",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceBucket {
    Close,
    Medium,
    Far,
}

/// Exclusive lower bounds on `bottom edge / image height`, first match wins.
const DISTANCE_RULES: [(f64, DistanceBucket); 2] = [
    (0.8, DistanceBucket::Close),
    (0.5, DistanceBucket::Medium),
];

impl DistanceBucket {
    pub fn from_bottom_edge(bottom_y: f64, height: u32) -> Self {
        let ratio = bottom_y / f64::from(height);
        DISTANCE_RULES
            .iter()
            .find(|(threshold, _)| ratio > *threshold)
            .map(|(_, bucket)| *bucket)
            .unwrap_or(DistanceBucket::Far)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceBucket::Close => "close",
            DistanceBucket::Medium => "medium",
            DistanceBucket::Far => "far",
        }
    }
}

/// Position label relative to the ego vehicle.
///
/// Front and back views collapse a centered object to `<view>-center`; every
/// other view always renders `<view>-<bucket>`.
pub fn position_label(view: &CameraView, bucket: HorizontalBucket) -> String {
    if view.is_axial() && bucket == HorizontalBucket::Center {
        format!("{}-center", view.label())
    } else {
        format!("{}-{}", view.label(), bucket.as_str())
    }
}

/// One object observed in one camera image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: String,
    /// Rounded to three decimals.
    pub confidence: f64,
    /// Pixel box `[x1, y1, x2, y2]`, truncated to integers.
    pub bbox: [i64; 4],
    /// Pixel center, truncated to integers.
    pub center: [i64; 2],
    pub camera_view: CameraView,
    pub position: String,
    pub distance: DistanceBucket,
}

impl Detection {
    fn from_raw(raw: &RawDetection, view: &CameraView, width: u32, height: u32) -> Self {
        let [x1, y1, x2, y2] = raw.bbox;
        let (center_x, center_y) = raw.center();
        let bucket = HorizontalBucket::from_center(center_x, width);
        Self {
            class: raw.label.clone(),
            confidence: (raw.confidence * 1000.0).round() / 1000.0,
            bbox: [x1 as i64, y1 as i64, x2 as i64, y2 as i64],
            center: [center_x as i64, center_y as i64],
            camera_view: *view,
            position: position_label(view, bucket),
            distance: DistanceBucket::from_bottom_edge(y2, height),
        }
    }
}

/// Normalize one image's detector output for the camera `view`.
pub fn normalize(output: &DetectorOutput, view: &CameraView) -> Result<Vec<Detection>> {
    if output.width == 0 || output.height == 0 {
        return Err(anyhow!(
            "detector reported empty image dimensions {}x{} for {} camera",
            output.width,
            output.height,
            view
        ));
    }
    Ok(output
        .candidates
        .iter()
        .filter(|raw| raw.confidence > CONFIDENCE_THRESHOLD)
        .map(|raw| Detection::from_raw(raw, view, output.width, output.height))
        .collect())
}

/// Natural-language summary of the detections, grouped by category.
pub fn describe_detections(detections: &[Detection]) -> String {
    if detections.is_empty() {
        return EMPTY_SCENE_DESCRIPTION.to_string();
    }

    let vehicles: Vec<&Detection> = detections
        .iter()
        .filter(|d| VEHICLE_CLASSES.contains(&d.class.as_str()))
        .collect();
    let pedestrians: Vec<&Detection> = detections.iter().filter(|d| d.class == "person").collect();
    let traffic: Vec<&Detection> = detections
        .iter()
        .filter(|d| TRAFFIC_CLASSES.contains(&d.class.as_str()))
        .collect();

    let mut parts = Vec::new();
    if !vehicles.is_empty() {
        let details: Vec<String> = vehicles
            .iter()
            .take(MAX_DESCRIBED_VEHICLES)
            .map(|v| {
                format!(
                    "{} at {} ({} distance)",
                    v.class,
                    v.position,
                    v.distance.as_str()
                )
            })
            .collect();
        parts.push(format!(
            "Detected {} vehicle(s): {}",
            vehicles.len(),
            details.join(", ")
        ));
    }
    if !pedestrians.is_empty() {
        let details: Vec<String> = pedestrians
            .iter()
            .take(MAX_DESCRIBED_PEDESTRIANS)
            .map(|p| format!("at {} ({} distance)", p.position, p.distance.as_str()))
            .collect();
        parts.push(format!(
            "Detected {} pedestrian(s): {}",
            pedestrians.len(),
            details.join(", ")
        ));
    }
    if !traffic.is_empty() {
        let details: Vec<String> = traffic
            .iter()
            .map(|t| format!("{} at {}", t.class, t.position))
            .collect();
        parts.push(format!("Traffic elements: {}", details.join(", ")));
    }

    format!("{}.", parts.join(". "))
}
