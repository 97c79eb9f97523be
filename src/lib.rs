//! Scene Agent
//!
//! Answers natural-language questions about a multi-camera driving scene by
//! running five stages in order for each question.
//!
//! # Architecture
//!
//! 1. **Perception**: the detector runs on every camera image; raw output is
//!    normalized into `Detection` records (confidence filter, position and
//!    distance buckets) and concatenated in camera slot order.
//! 2. **Scene graph**: one node per detection, one labelled edge per node pair.
//! 3. **Plan**: an optional inline object reference is resolved, then a text
//!    model produces the reasoning (and, sometimes, explicit steps).
//! 4. **Execution**: each step is dispatched to a fixed query method over the
//!    graph and recorded in a trace.
//! 5. **Verification**: the draft answer is refined and given a confidence.
//!
//! Stages 1, 2 and 4 are pure transformations. Stages 3 and 5 (and the
//! optional vision context in stage 1) call a `Generator`.
//!
//! # Module Structure
//!
//! - `camera`: camera views and slot order
//! - `detect`: detector backends and detection normalization
//! - `perception`, `scene_graph`, `reference`, `plan`, `execute`, `verify`: the stages
//! - `generate`: text/vision generation clients
//! - `pipeline`: per-question orchestration
//! - `baseline`: single-call comparison answerer
//! - `batch`: benchmark runs with per-question isolation
//! - `config`: file and environment configuration

pub mod baseline;
pub mod batch;
pub mod camera;
pub mod config;
pub mod detect;
pub mod execute;
pub mod generate;
pub mod perception;
pub mod pipeline;
pub mod plan;
pub mod reference;
pub mod scene_graph;
pub mod verify;

pub use baseline::BaselineVlm;
pub use batch::{BenchmarkRecord, Prediction, PLACEHOLDER_ANSWER};
pub use camera::{CameraView, ImagePaths};
pub use config::PipelineConfig;
pub use detect::{BackendRegistry, Detection, DetectorBackend, DetectorOutput, RawDetection};
pub use execute::{ExecutionResult, Executor, StepExecutor, StepResult, TraceEntry};
pub use generate::{GenerationRequest, Generator, OllamaClient, ScriptedGenerator};
pub use perception::PerceptionResult;
pub use pipeline::{Pipeline, PipelineOutput, PipelineSettings, QuestionAnswerer, Stage};
pub use plan::{Plan, PlanStep, StepMethod};
pub use scene_graph::{Relation, SceneGraph};
pub use verify::{ConfidenceScorer, FixedConfidence, VerifiedAnswer};
