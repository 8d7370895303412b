//! Plan tree analysis.
//!
//! Reads PostgreSQL `EXPLAIN (FORMAT JSON)` output into a [`PlanNode`]
//! tree and answers two questions about it: which node dominates the
//! plan ([`hotspot`]), and whether a given index is used ([`uses_index`]).
//! Both are pure walks and can run concurrently over independent trees.

use serde::Serialize;
use serde_json::Value;

use crate::error::{AdvisorError, AdvisorResult};

/// Which figure a node is judged by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMetric {
    /// `Total Cost` from the planner's estimate.
    EstimatedCost,
    /// `Actual Total Time`, present only when the plan was executed.
    ActualTime,
}

impl PlanMetric {
    pub fn for_analyze(analyze: bool) -> Self {
        if analyze {
            PlanMetric::ActualTime
        } else {
            PlanMetric::EstimatedCost
        }
    }

    fn key(self) -> &'static str {
        match self {
            PlanMetric::EstimatedCost => "Total Cost",
            PlanMetric::ActualTime => "Actual Total Time",
        }
    }
}

/// One operator in a plan tree.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanNode {
    pub node_type: String,
    pub metric: f64,
    pub relation: Option<String>,
    pub index_name: Option<String>,
    pub children: Vec<PlanNode>,
}

impl PlanNode {
    pub fn new(node_type: impl Into<String>, metric: f64) -> Self {
        Self {
            node_type: node_type.into(),
            metric,
            relation: None,
            index_name: None,
            children: Vec::new(),
        }
    }

    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.relation = Some(relation.into());
        self
    }

    pub fn with_index(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = Some(index_name.into());
        self
    }

    pub fn with_child(mut self, child: PlanNode) -> Self {
        self.children.push(child);
        self
    }

    /// Build a node (and its subtree) from one JSON plan object.
    ///
    /// Missing fields are tolerated: an absent node type reads as
    /// `"Unknown"` and an absent metric as `0.0`.
    pub fn from_json(value: &Value, metric: PlanMetric) -> Self {
        let text = |key: &str| value.get(key).and_then(Value::as_str).map(String::from);

        let children = value
            .get("Plans")
            .and_then(Value::as_array)
            .map(|plans| {
                plans
                    .iter()
                    .map(|child| PlanNode::from_json(child, metric))
                    .collect()
            })
            .unwrap_or_default();

        PlanNode {
            node_type: text("Node Type").unwrap_or_else(|| "Unknown".to_string()),
            metric: value.get(metric.key()).and_then(Value::as_f64).unwrap_or(0.0),
            relation: text("Relation Name"),
            index_name: text("Index Name"),
            children,
        }
    }

    /// True when this node or any descendant scans `index_name`.
    pub fn uses_index(&self, index_name: &str) -> bool {
        self.index_name.as_deref() == Some(index_name)
            || self.children.iter().any(|c| c.uses_index(index_name))
    }
}

/// The `Plan` object of an EXPLAIN document.
///
/// Accepts both the array form PostgreSQL returns (`[{"Plan": ...}]`) and
/// a bare `{"Plan": ...}` object.
pub fn root_plan(document: &Value) -> AdvisorResult<&Value> {
    let wrapper = match document.as_array() {
        Some(arr) => arr.first(),
        None => Some(document),
    };
    wrapper
        .and_then(|w| w.get("Plan"))
        .ok_or_else(|| AdvisorError::InvalidPlan("missing Plan object in EXPLAIN output".into()))
}

/// Parse an EXPLAIN document straight into a tree.
pub fn parse_explain(document: &Value, metric: PlanMetric) -> AdvisorResult<PlanNode> {
    root_plan(document).map(|root| PlanNode::from_json(root, metric))
}

/// The node judged to dominate a plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hotspot {
    pub node_type: String,
    pub metric: f64,
    pub relation: Option<String>,
    pub index_name: Option<String>,
}

impl From<&PlanNode> for Hotspot {
    fn from(node: &PlanNode) -> Self {
        Hotspot {
            node_type: node.node_type.clone(),
            metric: node.metric,
            relation: node.relation.clone(),
            index_name: node.index_name.clone(),
        }
    }
}

/// Find the node with the largest metric.
///
/// Visits parents before children and only replaces the current best on a
/// strictly greater metric, so on a tie the first node visited wins and a
/// child never displaces an equal ancestor.
pub fn hotspot(root: &PlanNode) -> Hotspot {
    Hotspot::from(dominant(root))
}

fn dominant(node: &PlanNode) -> &PlanNode {
    let mut best = node;
    for child in &node.children {
        let candidate = dominant(child);
        if candidate.metric > best.metric {
            best = candidate;
        }
    }
    best
}

/// Index usage check that also covers an absent tree.
pub fn uses_index(root: Option<&PlanNode>, index_name: &str) -> bool {
    root.is_some_and(|node| node.uses_index(index_name))
}

/// Headline figures for an EXPLAIN result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanSummary {
    pub dominant_node: Hotspot,
    pub plan_width: Option<u64>,
    pub startup_cost: Option<f64>,
    pub total_cost: Option<f64>,
    pub actual_rows: Option<f64>,
    pub actual_total_time_ms: Option<f64>,
}

impl PlanSummary {
    /// Summarize a root plan object. Cost fields are reported for
    /// estimate-only plans, actual fields for executed ones.
    pub fn from_root(root: &Value, analyze: bool) -> Self {
        let number = |key: &str| root.get(key).and_then(Value::as_f64);
        let tree = PlanNode::from_json(root, PlanMetric::for_analyze(analyze));

        PlanSummary {
            dominant_node: hotspot(&tree),
            plan_width: root.get("Plan Width").and_then(Value::as_u64),
            startup_cost: (!analyze).then(|| number("Startup Cost")).flatten(),
            total_cost: (!analyze).then(|| number("Total Cost")).flatten(),
            actual_rows: analyze.then(|| number("Actual Rows")).flatten(),
            actual_total_time_ms: analyze.then(|| number("Actual Total Time")).flatten(),
        }
    }
}
