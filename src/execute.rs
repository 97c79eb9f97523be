//! Execution dispatcher.
//!
//! Each plan step is dispatched independently to one query method over the
//! scene graph. Results are appended to the trace in step order; the surfaced
//! answer is the plan's reasoning text.

use anyhow::Result;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;

use crate::detect::DistanceBucket;
use crate::perception::PerceptionResult;
use crate::plan::{Plan, PlanStep, StepMethod};
use crate::scene_graph::SceneGraph;

pub const UNKNOWN_ATTRIBUTE: &str = "unknown";
pub const HIGH_RISK: &str = "High risk - multiple close objects detected";
pub const MODERATE_RISK: &str = "Moderate risk - maintain safe distance";
pub const LOW_RISK: &str = "Safe to proceed with caution";
pub const STATIONARY: &str = "Object appears stationary";

/// Close objects above this count are high risk.
const HIGH_RISK_CLOSE_OBJECTS: usize = 2;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StepResult {
    Count(usize),
    Flag(bool),
    Text(String),
}

impl fmt::Display for StepResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepResult::Count(n) => write!(f, "{}", n),
            StepResult::Flag(b) => write!(f, "{}", b),
            StepResult::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TraceEntry {
    pub step: PlanStep,
    pub result: StepResult,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub answer: String,
    pub reasoning: String,
    pub trace: Vec<TraceEntry>,
}

impl ExecutionResult {
    /// Default record used when execution output cannot be trusted.
    pub fn fallback(plan: &Plan) -> Self {
        Self {
            answer: plan.reasoning.clone(),
            reasoning: plan.reasoning.clone(),
            trace: Vec::new(),
        }
    }

    /// A record is usable downstream only if it carries a draft answer.
    pub fn is_well_formed(&self) -> bool {
        !self.answer.trim().is_empty()
    }
}

pub trait Executor: Send + Sync {
    fn execute(
        &self,
        plan: &Plan,
        graph: &SceneGraph<'_>,
        perception: &PerceptionResult,
    ) -> Result<ExecutionResult>;
}

/// Stateless dispatcher over the fixed method set.
#[derive(Clone, Copy, Debug, Default)]
pub struct StepExecutor;

impl StepExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Run one step. Total over `StepMethod`: unrecognized methods answer directly.
    pub fn run_step(
        &self,
        step: &PlanStep,
        graph: &SceneGraph<'_>,
        perception: &PerceptionResult,
    ) -> StepResult {
        match &step.method {
            StepMethod::CountObjects => StepResult::Count(count_objects(&step.raw, graph)),
            StepMethod::CheckSpatial => StepResult::Flag(!graph.edges.is_empty()),
            StepMethod::GetAttribute => StepResult::Text(get_attribute(&step.raw, graph)),
            StepMethod::CheckSafety => StepResult::Text(check_safety(graph).to_string()),
            StepMethod::PredictBehavior => StepResult::Text(predict_behavior(graph)),
            StepMethod::AnswerDirect | StepMethod::Other(_) => {
                StepResult::Text(answer_direct(perception))
            }
        }
    }
}

impl Executor for StepExecutor {
    fn execute(
        &self,
        plan: &Plan,
        graph: &SceneGraph<'_>,
        perception: &PerceptionResult,
    ) -> Result<ExecutionResult> {
        let trace: Vec<TraceEntry> = plan
            .steps
            .iter()
            .map(|step| {
                let result = self.run_step(step, graph, perception);
                log::debug!("executed {} -> {}", step.method.name(), result);
                TraceEntry {
                    step: step.clone(),
                    result,
                }
            })
            .collect();
        Ok(ExecutionResult {
            answer: plan.reasoning.clone(),
            reasoning: plan.reasoning.clone(),
            trace,
        })
    }
}

fn count_objects(raw: &str, graph: &SceneGraph<'_>) -> usize {
    static COUNT_RE: OnceLock<Regex> = OnceLock::new();
    let re = COUNT_RE.get_or_init(|| Regex::new(r#"count_objects\(["']?(\w+)["']?\)"#).unwrap());
    let Some(caps) = re.captures(raw) else {
        return 0;
    };
    let wanted = caps[1].to_lowercase();
    graph
        .nodes
        .iter()
        .filter(|node| node.kind.to_lowercase().contains(&wanted))
        .count()
}

fn get_attribute(raw: &str, graph: &SceneGraph<'_>) -> String {
    let raw = raw.to_lowercase();
    graph
        .nodes
        .iter()
        .flat_map(|node| node.attributes.truthy_entries())
        .find(|(key, _)| raw.contains(key))
        .map(|(_, value)| value)
        .unwrap_or_else(|| UNKNOWN_ATTRIBUTE.to_string())
}

fn check_safety(graph: &SceneGraph<'_>) -> &'static str {
    let close = graph
        .nodes
        .iter()
        .filter(|node| node.attributes.distance == DistanceBucket::Close)
        .count();
    if close > HIGH_RISK_CLOSE_OBJECTS {
        HIGH_RISK
    } else if close > 0 {
        MODERATE_RISK
    } else {
        LOW_RISK
    }
}

fn predict_behavior(graph: &SceneGraph<'_>) -> String {
    graph
        .nodes
        .iter()
        .find(|node| {
            node.attributes
                .status
                .as_deref()
                .is_some_and(|status| status.to_lowercase().contains("moving"))
        })
        .map(|node| format!("{} is likely to continue moving", node.kind))
        .unwrap_or_else(|| STATIONARY.to_string())
}

fn answer_direct(perception: &PerceptionResult) -> String {
    if perception.objects.is_empty() {
        return perception.vlm_context.clone().unwrap_or_default();
    }
    perception
        .objects
        .iter()
        .map(|object| {
            format!(
                "{} ({}) at {}",
                object.get("object").unwrap_or("object"),
                object.get("color").unwrap_or(""),
                object.get("position").unwrap_or("")
            )
        })
        .collect::<Vec<String>>()
        .join("; ")
}
