//! FactGraph: a declarative evaluation engine for policy and eligibility
//! computations.
//!
//! A *fact* is a named value derived from other facts and externally
//! supplied input. Facts are grouped into *modules* and form a directed,
//! acyclic dependency graph. Given an input record, the engine validates
//! inputs against per-fact schemas, resolves each fact at most once, and
//! returns either the computed value or a structured error describing which
//! inputs or upstream facts were unmet.
//!
//! ## Module organization
//!
//! - `registry`: fact declarations, namespaces, and the builder surface
//! - `graph`: materializing declarations into per-entity-expanded graphs
//! - `fact`: instantiated facts and lazy, memoized resolution
//! - `container`: the read-only bundle handed to resolvers
//! - `evaluator`: whole-graph evaluation and the query layer
//! - `value`: computed results and structured error records
//!
//! Evaluation is single-threaded and synchronous within one `evaluate()`
//! call; the results cache guarantees at-most-once resolution per
//! `(module, name[, entity_id])` coordinate.

pub mod container;
pub mod evaluator;
pub mod fact;
pub mod graph;
pub mod registry;
pub mod value;

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use container::{DataContainer, DependencyValue};
pub use evaluator::{Evaluator, ResultSlot, Results};
pub use fact::Fact;
pub use graph::{entity_ids, FactSlot, Graph, GraphBuilder, GraphError};
pub use registry::{FactBuilder, FactDef, InputDef, ModuleScope, Namespace, Registry, Resolver};
pub use value::{Errors, Payload, Value};

// Re-exported so downstream crates can declare schemas without naming the
// schema crate separately.
pub use factgraph_schema as schema;
pub use factgraph_schema::{KeyPath, KeySegment};

/// Index of an entity within its input collection.
pub type EntityId = usize;

/// Identifies a module: the top-level grouping of facts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleName(String);

impl ModuleName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ModuleName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

// Allows `&str` lookups in maps keyed by the newtype.
impl Borrow<str> for ModuleName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies a fact within its module.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactName(String);

impl FactName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FactName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl Borrow<str> for FactName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Names an entity collection in the input record (e.g. `applicants`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityName(String);

impl EntityName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl fmt::Display for EntityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Names a declared input field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputName(String);

impl InputName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for InputName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl fmt::Display for InputName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
