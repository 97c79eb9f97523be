use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::Path;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::DetectorOutput;

/// Replays precomputed detector outputs.
///
/// The file is a JSON object mapping image reference to
/// `{ "width": .., "height": .., "candidates": [{ "label", "confidence", "bbox" }] }`.
/// Lookup tries the exact reference first, then its file name, so the same
/// file works when the dataset root moves.
pub struct ReplayBackend {
    outputs: HashMap<String, DetectorOutput>,
}

impl ReplayBackend {
    pub fn new(outputs: HashMap<String, DetectorOutput>) -> Self {
        Self { outputs }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read replay file {}: {}", path.display(), e))?;
        let outputs: HashMap<String, DetectorOutput> = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid replay file {}: {}", path.display(), e))?;
        log::debug!(
            "loaded {} replayed detector outputs from {}",
            outputs.len(),
            path.display()
        );
        Ok(Self::new(outputs))
    }

    fn lookup(&self, image: &str) -> Option<&DetectorOutput> {
        self.outputs.get(image).or_else(|| {
            let file_name = Path::new(image).file_name()?.to_str()?;
            self.outputs.get(file_name)
        })
    }
}

impl DetectorBackend for ReplayBackend {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn detect(&mut self, image: &str, _threshold: f64) -> Result<DetectorOutput> {
        self.lookup(image)
            .cloned()
            .ok_or_else(|| anyhow!("no replayed detections for image {}", image))
    }
}
