//! Materializing declarations into an instantiated graph.
//!
//! The builder walks a (filtered) registry in declaration order and, for
//! each declaration, instantiates either a single [`Fact`] or one per
//! entity id of its collection. Per-entity expansion is fan-out, not
//! polymorphism: a slot holds either one fact or an `entity_id -> fact`
//! map, and dependency fetching dispatches on the slot shape plus the
//! consumer's own entity id.
//!
//! Dependency references are verified at build time: a declaration naming a
//! target that is not in the graph is a fatal [`GraphError`], distinct from
//! the structured `dependency_unmet` records produced during evaluation.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::fact::Fact;
use crate::registry::Registry;
use crate::value::Payload;
use crate::{EntityId, EntityName, FactName, ModuleName};

/// Fatal graph conditions. These abort evaluation; they never occur for
/// well-formed declaration sets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error(
        "fact `{module}.{fact}` depends on `{missing_module}.{missing_name}`, \
         which is not in the graph"
    )]
    MissingDependency {
        module: ModuleName,
        fact: FactName,
        missing_module: ModuleName,
        missing_name: FactName,
    },

    #[error(
        "fact `{module}.{fact}` (entity {entity_id}) depends on per-entity fact \
         `{dep_module}.{dep_name}`, which has no instance at entity {entity_id}"
    )]
    MissingEntityInstance {
        module: ModuleName,
        fact: FactName,
        entity_id: EntityId,
        dep_module: ModuleName,
        dep_name: FactName,
    },
}

/// The ids of an entity collection in the input record: `[0, N)` for an
/// array of length `N` at `input[entity_name]`, empty when the key is
/// absent.
///
/// This is the single extensibility point for switching to keyed entities.
pub fn entity_ids(input: &Payload, entity: &EntityName) -> Vec<EntityId> {
    match input.get(entity.as_str()) {
        Some(Payload::Array(items)) => (0..items.len()).collect(),
        _ => Vec::new(),
    }
}

/// One slot of the built graph: a single fact, or its per-entity expansion.
#[derive(Debug, Clone)]
pub enum FactSlot {
    One(Fact),
    PerEntity(BTreeMap<EntityId, Fact>),
}

impl FactSlot {
    /// The dependency map shared by every instance in this slot, if any
    /// instance exists.
    fn dependencies(&self) -> Option<&BTreeMap<FactName, ModuleName>> {
        match self {
            FactSlot::One(fact) => Some(&fact.dependencies),
            FactSlot::PerEntity(map) => map.values().next().map(|fact| &fact.dependencies),
        }
    }
}

/// The instantiated graph: `module -> fact name -> slot`, plus the
/// declaration-order visitation list.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    modules: BTreeMap<ModuleName, BTreeMap<FactName, FactSlot>>,
    order: Vec<(ModuleName, FactName)>,
}

impl Graph {
    pub fn slot(&self, module: &str, name: &str) -> Option<&FactSlot> {
        self.modules.get(module)?.get(name)
    }

    /// Declaration order of the slots (redeclarations keep their first
    /// position).
    pub fn order(&self) -> &[(ModuleName, FactName)] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Depth-first cycle finder over `(module, name)` coordinates.
    ///
    /// Returns the coordinates of one dependency cycle, if any. Never
    /// invoked by `evaluate()`; the evaluation contract is an acyclic
    /// declaration set, and a cycle there manifests as unbounded recursion.
    /// Slots with empty per-entity expansions carry no instances and are
    /// skipped.
    pub fn find_cycle(&self) -> Option<Vec<(ModuleName, FactName)>> {
        let mut done: BTreeSet<(ModuleName, FactName)> = BTreeSet::new();
        let mut path: Vec<(ModuleName, FactName)> = Vec::new();
        let mut on_path: BTreeSet<(ModuleName, FactName)> = BTreeSet::new();

        for coord in &self.order {
            if let Some(cycle) = self.visit(coord, &mut done, &mut path, &mut on_path) {
                return Some(cycle);
            }
        }
        None
    }

    fn visit(
        &self,
        coord: &(ModuleName, FactName),
        done: &mut BTreeSet<(ModuleName, FactName)>,
        path: &mut Vec<(ModuleName, FactName)>,
        on_path: &mut BTreeSet<(ModuleName, FactName)>,
    ) -> Option<Vec<(ModuleName, FactName)>> {
        if done.contains(coord) {
            return None;
        }
        if on_path.contains(coord) {
            let start = path.iter().position(|c| c == coord).unwrap_or(0);
            return Some(path[start..].to_vec());
        }

        let slot = self.slot(coord.0.as_str(), coord.1.as_str())?;
        let Some(dependencies) = slot.dependencies() else {
            done.insert(coord.clone());
            return None;
        };

        path.push(coord.clone());
        on_path.insert(coord.clone());
        for (dep_name, dep_module) in dependencies {
            let dep_coord = (dep_module.clone(), dep_name.clone());
            if let Some(cycle) = self.visit(&dep_coord, done, path, on_path) {
                return Some(cycle);
            }
        }
        path.pop();
        on_path.remove(coord);
        done.insert(coord.clone());
        None
    }
}

/// Builds a [`Graph`] from a registry and an input record.
pub struct GraphBuilder<'a> {
    registry: &'a Registry,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Instantiate every declaration against `input`, then verify that all
    /// dependency references resolve.
    pub fn build(&self, input: &Payload) -> Result<Graph, GraphError> {
        let mut graph = Graph::default();

        for def in self.registry.defs() {
            let slot = match &def.per_entity {
                Some(entity) => {
                    let ids = entity_ids(input, entity);
                    let mut instances = BTreeMap::new();
                    for id in ids {
                        instances.insert(id, Fact::from_def(def, Some(id)));
                    }
                    // An absent collection still materializes the slot, as
                    // an empty expansion.
                    FactSlot::PerEntity(instances)
                }
                None => FactSlot::One(Fact::from_def(def, None)),
            };

            let module_slots = graph.modules.entry(def.module_name.clone()).or_default();
            let replaced = module_slots.insert(def.name.clone(), slot).is_some();
            if !replaced {
                graph
                    .order
                    .push((def.module_name.clone(), def.name.clone()));
            }
        }

        self.verify_references(&graph)?;

        tracing::debug!(slots = graph.order.len(), "graph built");
        Ok(graph)
    }

    fn verify_references(&self, graph: &Graph) -> Result<(), GraphError> {
        for (module, name) in &graph.order {
            let Some(slot) = graph.slot(module.as_str(), name.as_str()) else {
                continue;
            };
            let facts: Vec<&Fact> = match slot {
                FactSlot::One(fact) => vec![fact],
                FactSlot::PerEntity(map) => map.values().collect(),
            };

            for fact in facts {
                for (dep_name, dep_module) in &fact.dependencies {
                    let target = graph.slot(dep_module.as_str(), dep_name.as_str()).ok_or_else(
                        || GraphError::MissingDependency {
                            module: module.clone(),
                            fact: name.clone(),
                            missing_module: dep_module.clone(),
                            missing_name: dep_name.clone(),
                        },
                    )?;

                    // A per-entity consumer of a per-entity target must have
                    // a paired instance to resolve.
                    if let (FactSlot::PerEntity(instances), Some(entity_id)) =
                        (target, fact.entity_id)
                    {
                        if !instances.contains_key(&entity_id) {
                            return Err(GraphError::MissingEntityInstance {
                                module: module.clone(),
                                fact: name.clone(),
                                entity_id,
                                dep_module: dep_module.clone(),
                                dep_name: dep_name.clone(),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
