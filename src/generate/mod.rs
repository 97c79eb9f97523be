//! Text and vision generation collaborators.
//!
//! The pipeline core only sees the `Generator` trait: a prompt, optional
//! images and a sampling temperature go in, one completion string comes out.
//! Timeouts and retries are the adapter's business; the core calls a
//! generator at most once per stage invocation.

pub mod ollama;
pub mod scripted;

use anyhow::Result;

pub use ollama::{OllamaClient, OllamaConfig, DEFAULT_OLLAMA_URL};
pub use scripted::{RecordedCall, ScriptedGenerator};

/// One completion request.
#[derive(Clone, Copy, Debug)]
pub struct GenerationRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    /// Image references (file paths) for vision models; empty for text-only calls.
    pub images: &'a [String],
    pub temperature: f32,
}

impl<'a> GenerationRequest<'a> {
    pub fn text(model: &'a str, prompt: &'a str, temperature: f32) -> Self {
        Self {
            model,
            prompt,
            images: &[],
            temperature,
        }
    }

    pub fn with_images(mut self, images: &'a [String]) -> Self {
        self.images = images;
        self
    }
}

/// Completion endpoint seam.
pub trait Generator: Send + Sync {
    /// Adapter identifier.
    fn name(&self) -> &'static str;

    /// Produce a single completion. May block for several seconds.
    fn generate(&self, request: &GenerationRequest<'_>) -> Result<String>;
}
