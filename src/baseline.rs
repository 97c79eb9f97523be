//! Single-call baseline: the vision model answers straight from the images.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::camera::ImagePaths;
use crate::generate::{GenerationRequest, Generator};
use crate::perception::arrange_images;
use crate::pipeline::QuestionAnswerer;

const BASELINE_TEMPERATURE: f32 = 0.0;

pub struct BaselineVlm {
    generator: Arc<dyn Generator>,
    model: String,
}

impl BaselineVlm {
    pub fn new(generator: Arc<dyn Generator>, model: impl Into<String>) -> Self {
        Self {
            generator,
            model: model.into(),
        }
    }
}

impl QuestionAnswerer for BaselineVlm {
    fn name(&self) -> &str {
        "baseline"
    }

    fn answer_question(
        &self,
        question: &str,
        image_paths: &ImagePaths,
    ) -> Result<String> {
        let images: Vec<String> = arrange_images(image_paths)
            .into_iter()
            .map(|camera| camera.image)
            .collect();
        let prompt = format!(
            "You are an autonomous driving assistant. Analyze the provided camera images and answer the following question accurately and concisely.\n\n\
             Question: {}\n\n\
             Answer:",
            question
        );
        let request = GenerationRequest::text(&self.model, &prompt, BASELINE_TEMPERATURE)
            .with_images(&images);
        let response = self
            .generator
            .generate(&request)
            .context("baseline request failed")?;
        Ok(response.trim().to_string())
    }
}
