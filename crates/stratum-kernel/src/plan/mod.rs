//! Plan data model: steps, dependency references and intake helpers.
//!
//! A plan is the literal JSON the planner emits — an array of step
//! objects. Unknown `type`/`server` strings survive deserialization so
//! the validator owns the error, instead of a bare serde failure.

pub mod intake;
pub mod validate;

pub use intake::extract_plan_text;

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Which backend a step is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    Db,
    File,
    /// Unrecognized server string; rejected by the validator.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerKind::Db => "db",
            ServerKind::File => "file",
            ServerKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// How a step reaches its backend: a tool call or a resource read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Tool,
    Resource,
    /// Unrecognized type string; rejected by the validator.
    #[serde(other)]
    Unknown,
}

/// Top-level `$from` dependency reference.
///
/// A single dependency is a bare string, fan-in is a list, `[]` (or an
/// empty string) means the step depends on nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FromRef {
    One(String),
    Many(Vec<String>),
}

impl FromRef {
    /// The referenced step ids, in declaration order.
    pub fn refs(&self) -> Vec<&str> {
        match self {
            FromRef::One(id) if id.is_empty() => Vec::new(),
            FromRef::One(id) => vec![id.as_str()],
            FromRef::Many(ids) => ids.iter().map(String::as_str).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.refs().is_empty()
    }
}

/// Interpret a JSON value as an in-argument dependency placeholder:
/// `{"$from": "<id>"}` or `{"$from": ["<id>", ...]}`. No other keys are
/// allowed beside `$from`.
pub fn dep_placeholder(value: &Value) -> Option<FromRef> {
    let object = value.as_object()?;
    if object.len() != 1 {
        return None;
    }
    serde_json::from_value(object.get("$from")?.clone()).ok()
}

/// Whether the plan declares dependencies explicitly or leaves them to
/// contract inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyMode {
    /// Every step carries a top-level `$from`; references are
    /// authoritative.
    Explicit,
    /// No step carries `$from`; edges are inferred from contracts.
    Inferred,
}

/// One step of a plan, in the planner's literal JSON form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: StepKind,
    pub server: ServerKind,
    pub tool: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    /// Explicit dependency references; absent in inferred-mode plans.
    #[serde(rename = "$from", default, skip_serializing_if = "Option::is_none")]
    pub from: Option<FromRef>,
    /// Mirror the step output under this extra state key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub produces: Option<String>,
}

/// An ordered sequence of steps. List order is stable and acts as the
/// deterministic tie-break everywhere downstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Plan {
    steps: Vec<Step>,
}

impl Plan {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    /// Parse a plan from its JSON value, normalizing known planner
    /// omissions first (§intake).
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        let mut value = value;
        intake::normalize(&mut value);
        serde_json::from_value(value).map_err(|e| ValidationError::Malformed(e.to_string()))
    }

    /// Parse a plan from JSON text.
    pub fn from_json(text: &str) -> Result<Self, ValidationError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn get(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Index of the step with `id`, if any.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.id == id)
    }

    /// Explicit when every step declares `$from`, inferred when none
    /// does, `None` for a mixed plan (rejected by the validator).
    pub fn dependency_mode(&self) -> Option<DependencyMode> {
        if self.steps.iter().all(|step| step.from.is_none()) {
            Some(DependencyMode::Inferred)
        } else if self.steps.iter().all(|step| step.from.is_some()) {
            Some(DependencyMode::Explicit)
        } else {
            None
        }
    }
}

impl<'a> IntoIterator for &'a Plan {
    type Item = &'a Step;
    type IntoIter = std::slice::Iter<'a, Step>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}
