use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{anyhow, Result};

use super::backend::DetectorBackend;
use super::result::DetectorOutput;

/// Shared handle to a detector backend.
pub type SharedBackend = Arc<Mutex<dyn DetectorBackend>>;

/// Thread-safe registry of detector backends.
///
/// Backends are wrapped in `Mutex` because `DetectorBackend::detect` takes `&mut self`.
pub struct BackendRegistry {
    backends: HashMap<String, SharedBackend>,
    default_name: Option<String>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.backends.keys().collect();
        names.sort();
        f.debug_struct("BackendRegistry")
            .field("backends", &names)
            .field("default_name", &self.default_name)
            .finish()
    }
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Arc::new(Mutex::new(backend)));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// Get backend by name.
    pub fn get(&self, name: &str) -> Option<SharedBackend> {
        self.backends.get(name).cloned()
    }

    /// Name of the default backend.
    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// Get default backend.
    pub fn default_backend(&self) -> Option<SharedBackend> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// List registered backends, sorted by name.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run detection on one image with the default backend.
    pub fn detect(&self, image: &str, threshold: f64) -> Result<DetectorOutput> {
        let backend = self
            .default_backend()
            .ok_or_else(|| anyhow!("no detector backend registered"))?;
        // A backend that panicked mid-detection leaves the lock poisoned; the
        // next image still gets a detector.
        let mut guard = backend.lock().unwrap_or_else(|poisoned| {
            log::warn!("detector backend panicked earlier; clearing poisoned lock");
            backend.clear_poison();
            PoisonError::into_inner(poisoned)
        });
        guard.detect(image, threshold)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{RawDetection, ReplayBackend, StubBackend};

    #[test]
    fn first_registered_backend_is_default() {
        let mut registry = BackendRegistry::new();
        registry.register(
            StubBackend::new().with_candidates(
                "a.jpg",
                vec![RawDetection::new("car", 0.9, [0.0, 0.0, 10.0, 10.0])],
            ),
        );
        registry.register(ReplayBackend::new(HashMap::new()));

        assert_eq!(registry.list(), vec!["replay", "stub"]);
        let output = registry.detect("a.jpg", 0.3).unwrap();
        assert_eq!(output.candidates.len(), 1);

        registry.set_default("replay").unwrap();
        assert!(registry.detect("a.jpg", 0.3).is_err());
        assert!(registry.set_default("tract").is_err());
    }

    struct PanicsOn(&'static str);

    impl DetectorBackend for PanicsOn {
        fn name(&self) -> &'static str {
            "panics"
        }

        fn detect(&mut self, image: &str, _threshold: f64) -> Result<DetectorOutput> {
            if image == self.0 {
                panic!("detector crashed on {}", image);
            }
            Ok(DetectorOutput::empty(640, 480))
        }
    }

    #[test]
    fn panicking_backend_stays_usable() {
        let mut registry = BackendRegistry::new();
        registry.register(PanicsOn("boom.jpg"));

        let crashed = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            registry.detect("boom.jpg", 0.3)
        }));
        assert!(crashed.is_err());

        let output = registry.detect("next.jpg", 0.3).expect("lock recovered");
        assert_eq!((output.width, output.height), (640, 480));
        assert!(!registry.default_backend().unwrap().is_poisoned());
    }

    #[test]
    fn empty_registry_cannot_detect() {
        let registry = BackendRegistry::default();
        assert!(registry.detect("a.jpg", 0.3).is_err());
    }
}
