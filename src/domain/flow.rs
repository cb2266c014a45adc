//! Conduct definitions and flow transition entries.
//!
//! The graph itself is walked by the external conduct runner; this module
//! only owns the data shape and the ordering contract of outgoing links.
//! Links are kept sorted ascending by `order` so the runner can evaluate
//! them in sequence without re-sorting.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A workflow definition as stored in the workspace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConductDefinition {
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub enabled: bool,

    /// Nodes of the flow graph
    #[serde(default)]
    pub flow: Vec<FlowNode>,
}

impl ConductDefinition {
    /// Whether any node of this conduct is fed by the given trigger
    pub fn references_trigger(&self, trigger_id: &str) -> bool {
        self.flow
            .iter()
            .any(|node| node.trigger_id.as_deref() == Some(trigger_id))
    }

    pub fn node(&self, flow_id: &str) -> Option<&FlowNode> {
        self.flow.iter().find(|n| n.flow_id == flow_id)
    }

    pub fn node_mut(&mut self, flow_id: &str) -> Option<&mut FlowNode> {
        self.flow.iter_mut().find(|n| n.flow_id == flow_id)
    }
}

/// One node in a conduct's flow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNode {
    #[serde(rename = "flowID")]
    pub flow_id: String,

    /// Set on entry nodes fed by a trigger
    #[serde(rename = "triggerID", default, skip_serializing_if = "Option::is_none")]
    pub trigger_id: Option<String>,

    /// Outgoing links, sorted ascending by order
    #[serde(default)]
    pub next: Vec<FlowLink>,
}

impl FlowNode {
    /// Logic and order of the link to `next_flow_id`
    ///
    /// Unconditional links report `Bool(true)` with order 0.
    pub fn link_logic(&self, next_flow_id: &str) -> Option<(FlowLogic, i64)> {
        self.next
            .iter()
            .find(|link| link.target_id() == next_flow_id)
            .map(|link| match link {
                FlowLink::Unconditional(_) => (FlowLogic::Bool(true), 0),
                FlowLink::Conditional(t) => (t.logic.clone(), t.order),
            })
    }

    /// Replace the logic of one outgoing link and restore the ordering
    pub fn set_link_logic(
        &mut self,
        next_flow_id: &str,
        logic: FlowLogic,
        order: i64,
    ) -> Result<(), FlowError> {
        let link = self
            .next
            .iter_mut()
            .find(|link| link.target_id() == next_flow_id)
            .ok_or_else(|| FlowError::LinkNotFound {
                flow_id: self.flow_id.clone(),
                next_flow_id: next_flow_id.to_string(),
            })?;

        *link = FlowLink::Conditional(FlowTransition {
            target_id: next_flow_id.to_string(),
            logic,
            order,
        });

        self.sort_links();
        Ok(())
    }

    /// Stable ascending sort by order
    pub fn sort_links(&mut self) {
        self.next.sort_by_key(FlowLink::order);
    }
}

/// An outgoing edge from a flow node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlowLink {
    /// Always followed
    Unconditional(String),

    Conditional(FlowTransition),
}

impl FlowLink {
    pub fn target_id(&self) -> &str {
        match self {
            Self::Unconditional(id) => id,
            Self::Conditional(t) => &t.target_id,
        }
    }

    pub fn order(&self) -> i64 {
        match self {
            Self::Unconditional(_) => 0,
            Self::Conditional(t) => t.order,
        }
    }
}

/// A conditional edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowTransition {
    #[serde(rename = "flowID")]
    pub target_id: String,

    pub logic: FlowLogic,

    #[serde(default)]
    pub order: i64,
}

/// Transition logic attached to an edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawLogic", into = "RawLogic")]
pub enum FlowLogic {
    Bool(bool),
    /// Conditional expression, always starts with `if`
    Expression(String),
    Wildcard,
    Priority(i64),
}

impl FlowLogic {
    /// Parse logic as entered by an operator
    pub fn parse(text: &str) -> Result<Self, FlowError> {
        let trimmed = text.trim();
        if trimmed.eq_ignore_ascii_case("true") {
            Ok(Self::Bool(true))
        } else if trimmed.eq_ignore_ascii_case("false") {
            Ok(Self::Bool(false))
        } else if trimmed.starts_with("if") {
            Ok(Self::Expression(trimmed.to_string()))
        } else if trimmed == "*" {
            Ok(Self::Wildcard)
        } else {
            trimmed
                .parse::<i64>()
                .map(Self::Priority)
                .map_err(|_| FlowError::InvalidLogic(text.to_string()))
        }
    }
}

impl std::fmt::Display for FlowLogic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Expression(e) => f.write_str(e),
            Self::Wildcard => f.write_str("*"),
            Self::Priority(p) => write!(f, "{p}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawLogic {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl TryFrom<RawLogic> for FlowLogic {
    type Error = FlowError;

    fn try_from(raw: RawLogic) -> Result<Self, Self::Error> {
        match raw {
            RawLogic::Bool(b) => Ok(Self::Bool(b)),
            RawLogic::Int(i) => Ok(Self::Priority(i)),
            RawLogic::Text(t) if t == "*" => Ok(Self::Wildcard),
            RawLogic::Text(t) if t.starts_with("if") => Ok(Self::Expression(t)),
            RawLogic::Text(t) => Err(FlowError::InvalidLogic(t)),
        }
    }
}

impl From<FlowLogic> for RawLogic {
    fn from(logic: FlowLogic) -> Self {
        match logic {
            FlowLogic::Bool(b) => Self::Bool(b),
            FlowLogic::Priority(i) => Self::Int(i),
            FlowLogic::Wildcard => Self::Text("*".to_string()),
            FlowLogic::Expression(e) => Self::Text(e),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum FlowError {
    #[error("Invalid transition logic: {0}")]
    InvalidLogic(String),

    #[error("Flow '{flow_id}' has no link to '{next_flow_id}'")]
    LinkNotFound { flow_id: String, next_flow_id: String },
}
