use anyhow::Result;

use super::result::DetectorOutput;

/// Object detector seam.
///
/// Backends receive an image reference (a path or a dataset key) and report
/// raw candidates with pixel boxes plus the image dimensions. Filtering by the
/// acceptance threshold still happens during normalization; `threshold` is a
/// hint a backend may use to skip work.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on one image.
    fn detect(&mut self, image: &str, threshold: f64) -> Result<DetectorOutput>;
}
