//! Fact values: computed payloads and structured error records.
//!
//! Validation failures and unmet dependencies are *data*, not Rust errors:
//! they travel through the graph as [`Value::Errors`] so downstream facts
//! can report exactly which inputs and upstream facts were unmet. Fatal
//! conditions (a dependency that is not in the graph at all) are a separate
//! channel; see [`crate::graph::GraphError`].

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::{FactName, ModuleName};
use factgraph_schema::KeyPath;

/// The domain payload of a computed fact.
pub type Payload = serde_json::Value;

/// Structured failure record for one fact.
///
/// At least one of the two maps is non-empty; an empty record never becomes
/// a [`Value::Errors`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Errors {
    /// Schema rejections: failing key path to the set of messages.
    pub bad_inputs: BTreeMap<KeyPath, BTreeSet<String>>,
    /// Upstream facts that resolved to errors, grouped by their module.
    pub dependency_unmet: BTreeMap<ModuleName, BTreeSet<FactName>>,
}

impl Errors {
    pub fn is_empty(&self) -> bool {
        self.bad_inputs.is_empty() && self.dependency_unmet.is_empty()
    }

    pub fn add_bad_input(&mut self, path: KeyPath, text: impl Into<String>) {
        self.bad_inputs.entry(path).or_default().insert(text.into());
    }

    pub fn add_unmet(&mut self, module: ModuleName, fact: FactName) {
        self.dependency_unmet.entry(module).or_default().insert(fact);
    }

    /// Union this record's `bad_inputs` into an accumulator map.
    pub fn merge_bad_inputs_into(&self, acc: &mut BTreeMap<KeyPath, BTreeSet<String>>) {
        for (path, messages) in &self.bad_inputs {
            acc.entry(path.clone())
                .or_default()
                .extend(messages.iter().cloned());
        }
    }
}

/// The result of resolving one fact.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// The resolver ran and produced a domain value.
    Computed(Payload),
    /// Inputs failed validation and/or upstream facts were unmet.
    Errors(Errors),
    /// Sentinel returned by `data_errors()` when a resolver's pattern match
    /// failed and no deferred errors were available. Not an error record:
    /// it does not mark downstream dependencies unmet.
    Incomplete,
}

impl Value {
    pub fn computed(payload: impl Into<Payload>) -> Self {
        Value::Computed(payload.into())
    }

    pub fn is_computed(&self) -> bool {
        matches!(self, Value::Computed(_))
    }

    pub fn is_errors(&self) -> bool {
        matches!(self, Value::Errors(_))
    }

    pub fn as_computed(&self) -> Option<&Payload> {
        match self {
            Value::Computed(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn as_errors(&self) -> Option<&Errors> {
        match self {
            Value::Errors(errors) => Some(errors),
            _ => None,
        }
    }
}
