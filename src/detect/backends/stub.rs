use anyhow::{anyhow, Result};
use std::collections::{HashMap, HashSet};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{DetectorOutput, RawDetection};

/// nuScenes camera resolution, used for images without a scripted output.
pub const STUB_WIDTH: u32 = 1600;
pub const STUB_HEIGHT: u32 = 900;

/// Stub backend for testing. Returns scripted outputs per image reference and
/// an empty output for everything else.
#[derive(Clone, Debug, Default)]
pub struct StubBackend {
    outputs: HashMap<String, DetectorOutput>,
    failing: HashSet<String>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the output returned for `image`.
    pub fn with_output(mut self, image: &str, output: DetectorOutput) -> Self {
        self.outputs.insert(image.to_string(), output);
        self
    }

    /// Script candidates for `image` at the default resolution.
    pub fn with_candidates(self, image: &str, candidates: Vec<RawDetection>) -> Self {
        self.with_output(
            image,
            DetectorOutput {
                width: STUB_WIDTH,
                height: STUB_HEIGHT,
                candidates,
            },
        )
    }

    /// Make detection on `image` fail, simulating a collaborator fault.
    pub fn with_failure(mut self, image: &str) -> Self {
        self.failing.insert(image.to_string());
        self
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, image: &str, _threshold: f64) -> Result<DetectorOutput> {
        if self.failing.contains(image) {
            return Err(anyhow!("stub detector failure for {}", image));
        }
        Ok(self
            .outputs
            .get(image)
            .cloned()
            .unwrap_or_else(|| DetectorOutput::empty(STUB_WIDTH, STUB_HEIGHT)))
    }
}
