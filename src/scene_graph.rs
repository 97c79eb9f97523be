//! Scene graph construction.
//!
//! One node per detection (`obj_<index>`, index in the perception result) and
//! one edge per unordered node pair `i < j`, labelled by the first matching
//! rule in `RELATION_RULES`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::camera::CameraView;
use crate::detect::{Detection, DistanceBucket};
use crate::perception::PerceptionResult;

const SUMMARY_RELATIONS: usize = 3;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NodeAttributes {
    pub position: String,
    pub distance: DistanceBucket,
    pub confidence: f64,
    pub camera_view: CameraView,
    /// Motion status, when an upstream stage provides one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl NodeAttributes {
    fn from_detection(detection: &Detection) -> Self {
        Self {
            position: detection.position.clone(),
            distance: detection.distance,
            confidence: detection.confidence,
            camera_view: detection.camera_view,
            status: None,
        }
    }

    fn position_has(&self, token: &str) -> bool {
        self.position.to_lowercase().contains(token)
    }

    /// Non-empty attribute values as `(key, value)`, in a fixed key order.
    pub fn truthy_entries(&self) -> Vec<(&'static str, String)> {
        let mut entries = Vec::new();
        if !self.position.is_empty() {
            entries.push(("position", self.position.clone()));
        }
        entries.push(("distance", self.distance.as_str().to_string()));
        if self.confidence != 0.0 {
            entries.push(("confidence", self.confidence.to_string()));
        }
        entries.push(("camera_view", self.camera_view.label()));
        if let Some(status) = self.status.as_ref().filter(|s| !s.is_empty()) {
            entries.push(("status", status.clone()));
        }
        entries
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SceneNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub attributes: NodeAttributes,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    InFrontOf,
    Behind,
    LeftOf,
    RightOf,
    CloserThan,
    FartherThan,
    Near,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::InFrontOf => "in_front_of",
            Relation::Behind => "behind",
            Relation::LeftOf => "left_of",
            Relation::RightOf => "right_of",
            Relation::CloserThan => "closer_than",
            Relation::FartherThan => "farther_than",
            Relation::Near => "near",
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type RelationRule = (fn(&NodeAttributes, &NodeAttributes) -> bool, Relation);

fn front_then_back(a: &NodeAttributes, b: &NodeAttributes) -> bool {
    a.position_has("front") && b.position_has("back")
}

fn back_then_front(a: &NodeAttributes, b: &NodeAttributes) -> bool {
    a.position_has("back") && b.position_has("front")
}

fn left_then_right(a: &NodeAttributes, b: &NodeAttributes) -> bool {
    a.position_has("left") && b.position_has("right")
}

fn right_then_left(a: &NodeAttributes, b: &NodeAttributes) -> bool {
    a.position_has("right") && b.position_has("left")
}

fn close_then_far(a: &NodeAttributes, b: &NodeAttributes) -> bool {
    a.distance == DistanceBucket::Close && b.distance == DistanceBucket::Far
}

fn far_then_close(a: &NodeAttributes, b: &NodeAttributes) -> bool {
    a.distance == DistanceBucket::Far && b.distance == DistanceBucket::Close
}

/// Evaluated top-down; the first matching predicate wins. Order is load-bearing.
const RELATION_RULES: [RelationRule; 6] = [
    (front_then_back, Relation::InFrontOf),
    (back_then_front, Relation::Behind),
    (left_then_right, Relation::LeftOf),
    (right_then_left, Relation::RightOf),
    (close_then_far, Relation::CloserThan),
    (far_then_close, Relation::FartherThan),
];

/// Relation of `a` to `b`, `Near` when no rule fires.
pub fn infer_relation(a: &NodeAttributes, b: &NodeAttributes) -> Relation {
    RELATION_RULES
        .iter()
        .find(|(applies, _)| applies(a, b))
        .map(|(_, relation)| *relation)
        .unwrap_or(Relation::Near)
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SceneEdge {
    pub source: String,
    pub target: String,
    pub relation: Relation,
}

/// Nodes, edges and description for one question.
///
/// Holds a read-only view of the perception result it was built from, so
/// reference resolution sees exactly the detections behind the nodes.
#[derive(Clone, Debug, Serialize)]
pub struct SceneGraph<'p> {
    pub scene_description: String,
    pub nodes: Vec<SceneNode>,
    pub edges: Vec<SceneEdge>,
    #[serde(skip)]
    perception: &'p PerceptionResult,
}

impl<'p> SceneGraph<'p> {
    pub fn build(perception: &'p PerceptionResult) -> Self {
        let nodes: Vec<SceneNode> = perception
            .detections
            .iter()
            .enumerate()
            .map(|(index, detection)| SceneNode {
                id: node_id(index),
                kind: detection.class.clone(),
                attributes: NodeAttributes::from_detection(detection),
            })
            .collect();

        let mut edges = Vec::with_capacity(nodes.len() * nodes.len().saturating_sub(1) / 2);
        for (i, a) in nodes.iter().enumerate() {
            for b in &nodes[i + 1..] {
                edges.push(SceneEdge {
                    source: a.id.clone(),
                    target: b.id.clone(),
                    relation: infer_relation(&a.attributes, &b.attributes),
                });
            }
        }

        log::debug!(
            "scene graph built: {} nodes, {} edges",
            nodes.len(),
            edges.len()
        );
        Self {
            scene_description: perception.description.clone(),
            nodes,
            edges,
            perception,
        }
    }

    pub fn perception(&self) -> &'p PerceptionResult {
        self.perception
    }

    pub fn node(&self, id: &str) -> Option<&SceneNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    /// Short text summary: object count, types, and the first few relations.
    pub fn summary(&self) -> String {
        let kinds: Vec<&str> = self.nodes.iter().map(|node| node.kind.as_str()).collect();
        let mut summary = format!(
            "Scene contains {} objects: {}. ",
            self.nodes.len(),
            kinds.join(", ")
        );
        if !self.edges.is_empty() {
            let relations: Vec<String> = self
                .edges
                .iter()
                .take(SUMMARY_RELATIONS)
                .map(|edge| format!("{} {} {}", edge.source, edge.relation, edge.target))
                .collect();
            summary.push_str(&format!("Spatial relations: {}.", relations.join("; ")));
        }
        summary
    }
}

pub fn node_id(index: usize) -> String {
    format!("obj_{}", index)
}
