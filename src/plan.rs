//! Plan stage.
//!
//! Builds the reasoning prompt from the scene description (plus a resolved
//! object reference, when the question carries one), makes a single text
//! generation call, and parses any `Step <n>: <method>(...) - <description>`
//! lines out of the reply.

use anyhow::{Context, Result};
use serde::{Serialize, Serializer};

use crate::generate::{GenerationRequest, Generator};
use crate::reference::{self, ObjectReference, ReferenceResolution};
use crate::scene_graph::SceneGraph;

const PLAN_TEMPERATURE: f32 = 0.1;

/// Closed set of execution methods. Unrecognized names are kept verbatim in
/// `Other` and execute as `AnswerDirect`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepMethod {
    CountObjects,
    CheckSpatial,
    GetAttribute,
    CheckSafety,
    PredictBehavior,
    AnswerDirect,
    Other(String),
}

impl StepMethod {
    pub fn parse(name: &str) -> Self {
        match name.trim() {
            "count_objects" => StepMethod::CountObjects,
            "check_spatial" => StepMethod::CheckSpatial,
            "get_attribute" => StepMethod::GetAttribute,
            "check_safety" => StepMethod::CheckSafety,
            "predict_behavior" => StepMethod::PredictBehavior,
            "answer_direct" => StepMethod::AnswerDirect,
            other => StepMethod::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            StepMethod::CountObjects => "count_objects",
            StepMethod::CheckSpatial => "check_spatial",
            StepMethod::GetAttribute => "get_attribute",
            StepMethod::CheckSafety => "check_safety",
            StepMethod::PredictBehavior => "predict_behavior",
            StepMethod::AnswerDirect => "answer_direct",
            StepMethod::Other(name) => name,
        }
    }
}

impl Serialize for StepMethod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlanStep {
    pub method: StepMethod,
    /// Invocation text, e.g. `count_objects("car")`.
    pub raw: String,
    pub description: String,
}

impl PlanStep {
    /// Implicit step used when a reply has no parseable steps.
    pub fn answer_direct() -> Self {
        Self {
            method: StepMethod::AnswerDirect,
            raw: "answer_direct()".to_string(),
            description: "Answer directly from perception".to_string(),
        }
    }
}

/// Parse step lines out of a reply. Never empty: falls back to a single
/// `answer_direct` step.
pub fn parse_steps(response: &str) -> Vec<PlanStep> {
    let mut steps: Vec<PlanStep> = response
        .trim()
        .lines()
        .filter(|line| line.trim().starts_with("Step"))
        .filter_map(|line| {
            let (_, rest) = line.split_once(':')?;
            let (method_part, description) = rest.trim().split_once('-')?;
            let raw = method_part.trim();
            let name = raw.split('(').next().unwrap_or(raw);
            Some(PlanStep {
                method: StepMethod::parse(name),
                raw: raw.to_string(),
                description: description.trim().to_string(),
            })
        })
        .collect();
    if steps.is_empty() {
        steps.push(PlanStep::answer_direct());
    }
    steps
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReferenceNote {
    pub reference: ObjectReference,
    pub resolution: ReferenceResolution,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Plan {
    pub reasoning: String,
    pub raw_response: String,
    pub steps: Vec<PlanStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<ReferenceNote>,
}

impl Plan {
    pub fn from_response(response: String, reference: Option<ReferenceNote>) -> Self {
        let steps = parse_steps(&response);
        Self {
            reasoning: response.clone(),
            raw_response: response,
            steps,
            reference,
        }
    }
}

pub struct Planner {
    llm_model: String,
}

impl Planner {
    pub fn new(llm_model: impl Into<String>) -> Self {
        Self {
            llm_model: llm_model.into(),
        }
    }

    pub fn plan(
        &self,
        generator: &dyn Generator,
        question: &str,
        graph: &SceneGraph<'_>,
    ) -> Result<Plan> {
        let reference = ObjectReference::find(question).map(|reference| {
            let resolution = reference::resolve(&reference, graph);
            log::debug!("object reference {} -> {:?}", reference.token, resolution);
            ReferenceNote {
                reference,
                resolution,
            }
        });

        let prompt = planning_prompt(question, &graph.scene_description, reference.as_ref());
        let request = GenerationRequest::text(&self.llm_model, &prompt, PLAN_TEMPERATURE);
        let response = generator
            .generate(&request)
            .context("planning request failed")?;
        let plan = Plan::from_response(response, reference);
        log::debug!("plan parsed into {} step(s)", plan.steps.len());
        Ok(plan)
    }
}

fn planning_prompt(question: &str, scene_description: &str, reference: Option<&ReferenceNote>) -> String {
    let reference_line = reference
        .map(|note| {
            format!(
                "\nReferenced Object:\n{}\n",
                reference::describe(&note.reference, &note.resolution)
            )
        })
        .unwrap_or_default();
    format!(
        "You are an autonomous driving assistant. Analyze the scene and answer the question.\n\n\
         Scene Description:\n\
         {}\n\
         {}\n\
         Question: {}\n\n\
         Provide your reasoning and answer. Be concise and specific.\n\n\
         Answer:",
        scene_description, reference_line, question
    )
}
