//! Five-stage question answering pipeline.
//!
//! Stages run strictly in order for one question: perception, scene graph,
//! plan, execution, verification. Every intermediate value is created fresh
//! per call, so one `Pipeline` can serve many questions concurrently.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::camera::ImagePaths;
use crate::detect::BackendRegistry;
use crate::execute::{ExecutionResult, Executor, StepExecutor, TraceEntry};
use crate::generate::Generator;
use crate::perception::{arrange_images, PerceptionResult, PerceptionSettings, PerceptionStage};
use crate::plan::{Plan, Planner};
use crate::scene_graph::SceneGraph;
use crate::verify::{ConfidenceScorer, VerifiedAnswer, Verifier};

/// Anything that can answer a question about a set of camera images.
pub trait QuestionAnswerer: Send + Sync {
    fn name(&self) -> &str;

    fn answer_question(&self, question: &str, image_paths: &ImagePaths)
        -> Result<String>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Perception,
    SceneGraph,
    Plan,
    Execute,
    Verify,
}

impl Stage {
    pub fn title(&self) -> &'static str {
        match self {
            Stage::Perception => "Perception",
            Stage::SceneGraph => "Scene graph",
            Stage::Plan => "Planning",
            Stage::Execute => "Execution",
            Stage::Verify => "Verification",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub vlm_model: String,
    pub llm_model: String,
    pub use_vlm: bool,
    /// Attach the diagnostic metadata bundle to each output.
    pub keep_metadata: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            vlm_model: "llava:latest".to_string(),
            llm_model: "gpt-oss:20b".to_string(),
            use_vlm: true,
            keep_metadata: true,
        }
    }
}

/// Result of one question.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub answer: String,
    pub confidence: u8,
    pub reasoning_chain: String,
    /// Executed steps, for local diagnostics.
    #[serde(skip)]
    pub trace: Vec<TraceEntry>,
    /// Diagnostic snapshot of every stage. Not a stable format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Serialize)]
struct Metadata<'a> {
    perception: &'a PerceptionResult,
    scene_graph: &'a SceneGraph<'a>,
    plan: &'a Plan,
    execution: &'a ExecutionResult,
    verification: &'a VerifiedAnswer,
}

pub struct Pipeline {
    detectors: BackendRegistry,
    generator: Arc<dyn Generator>,
    perception: PerceptionSettings,
    planner: Planner,
    executor: Box<dyn Executor>,
    verifier: Verifier,
    keep_metadata: bool,
}

impl Pipeline {
    pub fn new(
        detectors: BackendRegistry,
        generator: Arc<dyn Generator>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            detectors,
            generator,
            perception: PerceptionSettings {
                vlm_model: settings.vlm_model,
                use_vlm: settings.use_vlm,
            },
            planner: Planner::new(settings.llm_model.clone()),
            executor: Box::new(StepExecutor::new()),
            verifier: Verifier::new(settings.llm_model),
            keep_metadata: settings.keep_metadata,
        }
    }

    pub fn with_executor(mut self, executor: Box<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_scorer(mut self, llm_model: &str, scorer: Box<dyn ConfidenceScorer>) -> Self {
        self.verifier = Verifier::with_scorer(llm_model, scorer);
        self
    }

    pub fn process(
        &self,
        question: &str,
        image_paths: &ImagePaths,
    ) -> Result<PipelineOutput> {
        self.process_with(question, image_paths, |_| ())
    }

    /// Like `process`, calling `enter` at the start of each stage and holding
    /// its return value until the stage finishes.
    pub fn process_with<G>(
        &self,
        question: &str,
        image_paths: &ImagePaths,
        mut enter: impl FnMut(Stage) -> G,
    ) -> Result<PipelineOutput> {
        let images = arrange_images(image_paths);
        let generator = self.generator.as_ref();

        let perception = {
            let _stage = enter(Stage::Perception);
            PerceptionStage::new(&self.detectors, generator, &self.perception)
                .perceive(&images, question)
                .context("perception stage failed")?
        };

        let graph = {
            let _stage = enter(Stage::SceneGraph);
            SceneGraph::build(&perception)
        };

        let plan = {
            let _stage = enter(Stage::Plan);
            self.planner
                .plan(generator, question, &graph)
                .context("plan stage failed")?
        };

        let execution = {
            let _stage = enter(Stage::Execute);
            match self.executor.execute(&plan, &graph, &perception) {
                Ok(result) if result.is_well_formed() => result,
                Ok(_) => {
                    log::warn!("execution produced no answer; using plan reasoning");
                    ExecutionResult::fallback(&plan)
                }
                Err(err) => {
                    log::warn!("execution failed ({:#}); using plan reasoning", err);
                    ExecutionResult::fallback(&plan)
                }
            }
        };

        let verified = {
            let _stage = enter(Stage::Verify);
            self.verifier
                .verify(generator, question, &execution, &graph)
                .context("verification stage failed")?
        };

        let metadata = if self.keep_metadata {
            let bundle = Metadata {
                perception: &perception,
                scene_graph: &graph,
                plan: &plan,
                execution: &execution,
                verification: &verified,
            };
            Some(serde_json::to_value(&bundle).context("failed to serialize pipeline metadata")?)
        } else {
            None
        };

        Ok(PipelineOutput {
            answer: verified.final_answer,
            confidence: verified.confidence,
            reasoning_chain: verified.reasoning_chain,
            trace: execution.trace,
            metadata,
        })
    }
}

impl QuestionAnswerer for Pipeline {
    fn name(&self) -> &str {
        "agentic"
    }

    fn answer_question(
        &self,
        question: &str,
        image_paths: &ImagePaths,
    ) -> Result<String> {
        Ok(self.process(question, image_paths)?.answer)
    }
}
