//! Whole-graph evaluation and the query layer.
//!
//! `evaluate` visits every slot in declaration order; memoization makes the
//! effective resolution order dependency-driven, so visitation order only
//! affects result iteration, never correctness.
//!
//! The query operations answer the questions progressive data-collection
//! UIs ask of a fact graph:
//!
//! - which facts read a given input key path (`facts_using_input`),
//! - which facts consume a given fact (`facts_with_dependency`),
//! - which *leaf* facts transitively depend on an input
//!   (`leaf_facts_depending_on_input`), and
//! - which inputs were rejected across an evaluation
//!   (`Results::input_errors`).
//!
//! Queries run against the registry (per-entity facts unexpanded, no input
//! consulted); results are de-duplicated by coordinate and returned in
//! declaration order.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::fact::Fact;
use crate::graph::{FactSlot, Graph, GraphBuilder, GraphError};
use crate::registry::{FactDef, Namespace, Registry};
use crate::value::{Payload, Value};
use crate::{EntityId, FactName, ModuleName};
use factgraph_schema::{KeyPath, Schema};

/// One results-cache entry: a single value, or the per-entity map.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResultSlot {
    One(Value),
    PerEntity(BTreeMap<EntityId, Value>),
}

/// The results cache: `module -> fact name -> (value | entity map)`.
///
/// Created empty at the start of each `evaluate()` call and returned as the
/// result; never shared across calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Results {
    modules: BTreeMap<ModuleName, BTreeMap<FactName, ResultSlot>>,
}

impl Results {
    pub fn get(&self, module: &str, name: &str) -> Option<&ResultSlot> {
        self.modules.get(module)?.get(name)
    }

    /// The value of a non-per-entity fact.
    pub fn value(&self, module: &str, name: &str) -> Option<&Value> {
        match self.get(module, name)? {
            ResultSlot::One(value) => Some(value),
            ResultSlot::PerEntity(_) => None,
        }
    }

    /// The per-entity map of a per-entity fact.
    pub fn entity_values(&self, module: &str, name: &str) -> Option<&BTreeMap<EntityId, Value>> {
        match self.get(module, name)? {
            ResultSlot::One(_) => None,
            ResultSlot::PerEntity(map) => Some(map),
        }
    }

    /// The value of a per-entity fact at one entity id.
    pub fn entity_value(&self, module: &str, name: &str, entity_id: EntityId) -> Option<&Value> {
        self.entity_values(module, name)?.get(&entity_id)
    }

    pub fn modules(&self) -> &BTreeMap<ModuleName, BTreeMap<FactName, ResultSlot>> {
        &self.modules
    }

    /// Every `(module, name)` coordinate with its slot.
    pub fn iter(&self) -> impl Iterator<Item = (&ModuleName, &FactName, &ResultSlot)> {
        self.modules.iter().flat_map(|(module, slots)| {
            slots.iter().map(move |(name, slot)| (module, name, slot))
        })
    }

    /// Union of `bad_inputs` across every cache entry (per-entity entries
    /// included): failing key path to the set of messages.
    pub fn input_errors(&self) -> BTreeMap<KeyPath, BTreeSet<String>> {
        let mut acc: BTreeMap<KeyPath, BTreeSet<String>> = BTreeMap::new();
        for (_, _, slot) in self.iter() {
            match slot {
                ResultSlot::One(value) => merge_value_errors(value, &mut acc),
                ResultSlot::PerEntity(map) => {
                    for value in map.values() {
                        merge_value_errors(value, &mut acc);
                    }
                }
            }
        }
        acc
    }

    pub(crate) fn lookup(
        &self,
        module: &str,
        name: &str,
        entity_id: Option<EntityId>,
    ) -> Option<&Value> {
        match (self.get(module, name)?, entity_id) {
            (ResultSlot::One(value), None) => Some(value),
            (ResultSlot::PerEntity(map), Some(id)) => map.get(&id),
            _ => None,
        }
    }

    pub(crate) fn store(
        &mut self,
        module: ModuleName,
        name: FactName,
        entity_id: Option<EntityId>,
        value: Value,
    ) {
        let slots = self.modules.entry(module).or_default();
        match entity_id {
            None => {
                slots.insert(name, ResultSlot::One(value));
            }
            Some(id) => {
                let slot = slots
                    .entry(name)
                    .or_insert_with(|| ResultSlot::PerEntity(BTreeMap::new()));
                if let ResultSlot::PerEntity(map) = slot {
                    map.insert(id, value);
                }
            }
        }
    }

    /// Materialize an (empty) per-entity slot, so absent entity collections
    /// still surface as empty maps rather than missing keys.
    pub(crate) fn ensure_per_entity(&mut self, module: ModuleName, name: FactName) {
        self.modules
            .entry(module)
            .or_default()
            .entry(name)
            .or_insert_with(|| ResultSlot::PerEntity(BTreeMap::new()));
    }
}

fn merge_value_errors(value: &Value, acc: &mut BTreeMap<KeyPath, BTreeSet<String>>) {
    if let Value::Errors(errors) = value {
        errors.merge_bad_inputs_into(acc);
    }
}

/// Evaluates a registry snapshot against input records, and answers graph
/// queries over it.
#[derive(Debug, Clone)]
pub struct Evaluator {
    registry: Registry,
}

impl Evaluator {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Snapshot the namespace's registry (the union of facts its
    /// sub-namespaces declared).
    pub fn for_namespace(namespace: &Namespace) -> Self {
        Self::new(namespace.registry())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Build the graph for `input`, resolve every fact, and return the
    /// completed cache.
    pub fn evaluate(&self, input: &Payload) -> Result<Results, GraphError> {
        self.evaluate_filtered(input, None)
    }

    /// As `evaluate`, restricted to the named modules.
    pub fn evaluate_modules(
        &self,
        input: &Payload,
        modules: &[ModuleName],
    ) -> Result<Results, GraphError> {
        self.evaluate_filtered(input, Some(modules))
    }

    fn evaluate_filtered(
        &self,
        input: &Payload,
        filter: Option<&[ModuleName]>,
    ) -> Result<Results, GraphError> {
        let registry = self.registry.filtered(filter);
        let graph = GraphBuilder::new(&registry).build(input)?;
        let mut cache = Results::default();

        for (module, name) in graph.order() {
            let Some(slot) = graph.slot(module.as_str(), name.as_str()) else {
                continue;
            };
            match slot {
                FactSlot::One(fact) => {
                    fact.resolve(&graph, input, &mut cache)?;
                }
                FactSlot::PerEntity(instances) => {
                    cache.ensure_per_entity(module.clone(), name.clone());
                    for fact in instances.values() {
                        fact.resolve(&graph, input, &mut cache)?;
                    }
                }
            }
        }

        tracing::debug!(slots = graph.len(), "evaluation complete");
        Ok(cache)
    }

    /// Build the graph without resolving anything; exposed for static
    /// analysis and the optional cycle check.
    pub fn build_graph(&self, input: &Payload) -> Result<Graph, GraphError> {
        GraphBuilder::new(&self.registry).build(input)
    }

    /// Fact instances straight from the registry, per-entity facts
    /// unexpanded. No input is consulted.
    pub fn fact_definitions(
        &self,
        filter: Option<&[ModuleName]>,
    ) -> BTreeMap<ModuleName, BTreeMap<FactName, Fact>> {
        let mut out: BTreeMap<ModuleName, BTreeMap<FactName, Fact>> = BTreeMap::new();
        for def in self.registry.filtered(filter).defs() {
            out.entry(def.module_name.clone())
                .or_default()
                .insert(def.name.clone(), Fact::from_def(def, None));
        }
        out
    }

    /// Every fact any of whose input schemas accepts `path` (structural
    /// prefix matching over the schemas' key maps).
    pub fn facts_using_input(&self, path: &KeyPath) -> Vec<Fact> {
        self.unique_matching(|def| {
            def.inputs
                .iter()
                .any(|input| input.schema.key_map().matches(path))
        })
    }

    /// Every fact whose dependency map contains `name -> module`.
    pub fn facts_with_dependency(&self, module: &ModuleName, name: &FactName) -> Vec<Fact> {
        self.unique_matching(|def| {
            def.dependencies
                .get(name.as_str())
                .is_some_and(|dep_module| dep_module == module)
        })
    }

    /// Worklist traversal: start with the facts using `path`, repeatedly
    /// replace each frontier fact by its consumers; a fact with no
    /// downstream consumers is a leaf and joins the result.
    pub fn leaf_facts_depending_on_input(&self, path: &KeyPath) -> Vec<Fact> {
        let mut visited: BTreeSet<(ModuleName, FactName)> = BTreeSet::new();
        let mut leaves: BTreeSet<(ModuleName, FactName)> = BTreeSet::new();
        let mut frontier = self.facts_using_input(path);

        while let Some(fact) = frontier.pop() {
            let coord = (fact.module_name.clone(), fact.name.clone());
            if !visited.insert(coord.clone()) {
                continue;
            }

            let consumers = self.facts_with_dependency(&fact.module_name, &fact.name);
            if consumers.is_empty() {
                leaves.insert(coord);
            } else {
                frontier.extend(consumers);
            }
        }

        self.unique_matching(|def| {
            leaves.contains(&(def.module_name.clone(), def.name.clone()))
        })
    }

    /// Walk the registry in declaration order, keeping the first definition
    /// at each matching coordinate.
    fn unique_matching(&self, pred: impl Fn(&FactDef) -> bool) -> Vec<Fact> {
        let mut seen: BTreeSet<(ModuleName, FactName)> = BTreeSet::new();
        let mut out = Vec::new();
        for def in self.registry.defs() {
            if !pred(def) {
                continue;
            }
            if seen.insert((def.module_name.clone(), def.name.clone())) {
                out.push(Fact::from_def(def, None));
            }
        }
        out
    }
}
