//! Verification and finalization.
//!
//! The draft answer is refined by one text generation call. Confidence comes
//! from a pluggable `ConfidenceScorer`; the default reports a fixed value and
//! does not look at the evidence.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::execute::{ExecutionResult, TraceEntry};
use crate::generate::{GenerationRequest, Generator};
use crate::scene_graph::SceneGraph;

const VERIFY_TEMPERATURE: f32 = 0.0;

/// Confidence reported by `FixedConfidence::default()`.
pub const DEFAULT_CONFIDENCE: u8 = 80;

/// Upper bound of the confidence scale.
pub const MAX_CONFIDENCE: u8 = 100;

/// Scores a finalized answer on a 0-100 scale. `Verifier` clamps anything above.
pub trait ConfidenceScorer: Send + Sync {
    fn score(&self, question: &str, execution: &ExecutionResult, graph: &SceneGraph<'_>) -> u8;
}

/// Constant confidence, independent of the evidence.
#[derive(Clone, Copy, Debug)]
pub struct FixedConfidence(pub u8);

impl Default for FixedConfidence {
    fn default() -> Self {
        Self(DEFAULT_CONFIDENCE)
    }
}

impl ConfidenceScorer for FixedConfidence {
    fn score(&self, _question: &str, _execution: &ExecutionResult, _graph: &SceneGraph<'_>) -> u8 {
        self.0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VerifiedAnswer {
    pub is_valid: bool,
    pub confidence: u8,
    pub final_answer: String,
    /// The draft answer that was refined.
    pub reasoning_chain: String,
}

pub struct Verifier {
    llm_model: String,
    scorer: Box<dyn ConfidenceScorer>,
}

impl Verifier {
    pub fn new(llm_model: impl Into<String>) -> Self {
        Self::with_scorer(llm_model, Box::new(FixedConfidence::default()))
    }

    pub fn with_scorer(llm_model: impl Into<String>, scorer: Box<dyn ConfidenceScorer>) -> Self {
        Self {
            llm_model: llm_model.into(),
            scorer,
        }
    }

    pub fn verify(
        &self,
        generator: &dyn Generator,
        question: &str,
        execution: &ExecutionResult,
        graph: &SceneGraph<'_>,
    ) -> Result<VerifiedAnswer> {
        let prompt = refine_prompt(question, &execution.answer);
        let request = GenerationRequest::text(&self.llm_model, &prompt, VERIFY_TEMPERATURE);
        let response = generator
            .generate(&request)
            .context("verification request failed")?;

        Ok(VerifiedAnswer {
            is_valid: true,
            confidence: self
                .scorer
                .score(question, execution, graph)
                .min(MAX_CONFIDENCE),
            final_answer: response.trim().to_string(),
            reasoning_chain: execution.answer.clone(),
        })
    }
}

fn refine_prompt(question: &str, draft: &str) -> String {
    format!(
        "Refine this answer for a driving question. Make it concise and accurate.\n\n\
         Question: {}\n\n\
         Draft Answer: {}\n\n\
         Provide a refined, clear, and concise answer. Don't critique, just give the final answer.\n\n\
         Refined Answer:",
        question, draft
    )
}

/// One line per trace entry: `Step <i>: <description or method> -> <result>`.
pub fn build_reasoning_chain(trace: &[TraceEntry]) -> String {
    trace
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let label = if entry.step.description.is_empty() {
                entry.step.method.name()
            } else {
                entry.step.description.as_str()
            };
            format!("Step {}: {} -> {}", i + 1, label, entry.result)
        })
        .collect::<Vec<String>>()
        .join("\n")
}
