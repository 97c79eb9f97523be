//! Camera mounting positions.
//!
//! The vehicle carries six fixed cameras. Any image slot beyond those six is
//! labelled `camera_<n>` by its slot index.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Camera name -> image reference, in input order.
pub type ImagePaths = IndexMap<String, String>;

/// Canonical slot order used when concatenating per-image detections.
pub const CAMERA_SLOTS: [CameraView; 6] = [
    CameraView::Front,
    CameraView::FrontLeft,
    CameraView::FrontRight,
    CameraView::Back,
    CameraView::BackLeft,
    CameraView::BackRight,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CameraView {
    Front,
    FrontLeft,
    FrontRight,
    Back,
    BackLeft,
    BackRight,
    /// Synthesized `camera_<n>` label for slots past the fixed set.
    Overflow(usize),
}

impl CameraView {
    /// View for an image slot index.
    pub fn for_slot(index: usize) -> Self {
        CAMERA_SLOTS
            .get(index)
            .copied()
            .unwrap_or(CameraView::Overflow(index))
    }

    /// Position of this view in the canonical slot order.
    pub fn slot(&self) -> usize {
        match self {
            CameraView::Front => 0,
            CameraView::FrontLeft => 1,
            CameraView::FrontRight => 2,
            CameraView::Back => 3,
            CameraView::BackLeft => 4,
            CameraView::BackRight => 5,
            CameraView::Overflow(index) => *index,
        }
    }

    pub fn label(&self) -> String {
        match self {
            CameraView::Front => "front".to_string(),
            CameraView::FrontLeft => "front_left".to_string(),
            CameraView::FrontRight => "front_right".to_string(),
            CameraView::Back => "back".to_string(),
            CameraView::BackLeft => "back_left".to_string(),
            CameraView::BackRight => "back_right".to_string(),
            CameraView::Overflow(index) => format!("camera_{}", index),
        }
    }

    /// Front and back views collapse a centered object to `<view>-center`.
    pub fn is_axial(&self) -> bool {
        matches!(self, CameraView::Front | CameraView::Back)
    }

    /// Parse a view label.
    ///
    /// Accepts the short labels (`front_left`), dataset sensor names
    /// (`CAM_FRONT_LEFT`) and synthesized overflow labels (`camera_7`).
    pub fn from_label(label: &str) -> Option<Self> {
        let lower = label.trim().to_lowercase();
        let name = lower.strip_prefix("cam_").unwrap_or(&lower);
        let view = match name {
            "front" => CameraView::Front,
            "front_left" => CameraView::FrontLeft,
            "front_right" => CameraView::FrontRight,
            "back" => CameraView::Back,
            "back_left" => CameraView::BackLeft,
            "back_right" => CameraView::BackRight,
            other => {
                let index = other.strip_prefix("camera_")?.parse::<usize>().ok()?;
                CameraView::Overflow(index)
            }
        };
        Some(view)
    }
}

impl fmt::Display for CameraView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl From<CameraView> for String {
    fn from(view: CameraView) -> Self {
        view.label()
    }
}

impl TryFrom<String> for CameraView {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        CameraView::from_label(&value).ok_or_else(|| format!("unknown camera view '{}'", value))
    }
}
