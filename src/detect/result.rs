use serde::{Deserialize, Serialize};

/// One candidate object reported by a detector, before normalization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    /// Class label (person, car, traffic light, ...).
    pub label: String,
    /// Detector confidence in [0, 1].
    pub confidence: f64,
    /// Pixel box `[x1, y1, x2, y2]`.
    pub bbox: [f64; 4],
}

impl RawDetection {
    pub fn new(label: impl Into<String>, confidence: f64, bbox: [f64; 4]) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        let [x1, y1, x2, y2] = self.bbox;
        ((x1 + x2) / 2.0, (y1 + y2) / 2.0)
    }
}

/// Result of running a detector on one image.
///
/// No ordering of `candidates` is assumed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectorOutput {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    #[serde(default)]
    pub candidates: Vec<RawDetection>,
}

impl DetectorOutput {
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            candidates: Vec::new(),
        }
    }
}
