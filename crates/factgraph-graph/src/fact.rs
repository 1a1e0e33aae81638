//! Instantiated facts and lazy, memoized resolution.
//!
//! `resolve` is the engine's inner loop. For one `(module, name[, entity])`
//! coordinate it:
//!
//! 1. returns the cached value if the coordinate was already resolved,
//! 2. short-circuits constants,
//! 3. recursively resolves dependencies, dispatching on slot shape and the
//!    consumer's entity id (paired index for per-entity-to-per-entity,
//!    whole fan-out for aggregators),
//! 4. filters the input record down to declared keys (with per-entity
//!    substitution) projected through each schema's key map,
//! 5. validates each declared input against its schema,
//! 6. records every erroring dependency as unmet, grouped by module,
//! 7. either invokes the resolver, stores the error record, or (under
//!    `allow_unmet_dependencies`) invokes the resolver with the errors
//!    deferred, and
//! 8. writes the result into the cache at its coordinate.

use std::collections::BTreeMap;

use factgraph_schema::Schema;

use crate::container::{DataContainer, DependencyValue};
use crate::evaluator::Results;
use crate::graph::{FactSlot, Graph, GraphError};
use crate::registry::{FactDef, InputDef, Resolver};
use crate::value::{Errors, Payload, Value};
use crate::{EntityId, EntityName, FactName, ModuleName};

/// A concrete node of a built graph: a declaration bound to at most one
/// entity id.
#[derive(Debug, Clone)]
pub struct Fact {
    pub module_name: ModuleName,
    pub name: FactName,
    pub per_entity: Option<EntityName>,
    /// Present iff `per_entity` is set and the graph was built against
    /// input.
    pub entity_id: Option<EntityId>,
    pub allow_unmet_dependencies: bool,
    pub resolver: Resolver,
    pub inputs: Vec<InputDef>,
    pub dependencies: BTreeMap<FactName, ModuleName>,
    pub source_location: Option<(String, u32)>,
}

impl Fact {
    pub fn from_def(def: &FactDef, entity_id: Option<EntityId>) -> Self {
        Self {
            module_name: def.module_name.clone(),
            name: def.name.clone(),
            per_entity: def.per_entity.clone(),
            entity_id,
            allow_unmet_dependencies: def.allow_unmet_dependencies,
            resolver: def.resolver.clone(),
            inputs: def.inputs.clone(),
            dependencies: def.dependencies.clone(),
            source_location: def.source_location.clone(),
        }
    }

    /// Resolve this fact, writing the value into `cache` at its coordinate.
    /// Idempotent within one cache.
    pub fn resolve(
        &self,
        graph: &Graph,
        input: &Payload,
        cache: &mut Results,
    ) -> Result<Value, GraphError> {
        if let Some(value) =
            cache.lookup(self.module_name.as_str(), self.name.as_str(), self.entity_id)
        {
            return Ok(value.clone());
        }

        if let Resolver::Constant(payload) = &self.resolver {
            let value = Value::Computed(payload.clone());
            cache.store(
                self.module_name.clone(),
                self.name.clone(),
                self.entity_id,
                value.clone(),
            );
            return Ok(value);
        }

        let mut errors = Errors::default();
        let dependencies = self.resolve_dependencies(graph, input, cache, &mut errors)?;

        let filtered = self.filtered_input(input);
        self.validate_inputs(&filtered, &mut errors);

        tracing::trace!(
            module = %self.module_name,
            fact = %self.name,
            entity_id = ?self.entity_id,
            clean = errors.is_empty(),
            "resolving fact"
        );

        let value = if errors.is_empty() {
            self.invoke(&DataContainer::new(filtered, dependencies))
        } else if !self.allow_unmet_dependencies {
            Value::Errors(errors)
        } else {
            self.invoke(&DataContainer::with_deferred(filtered, dependencies, errors))
        };

        cache.store(
            self.module_name.clone(),
            self.name.clone(),
            self.entity_id,
            value.clone(),
        );
        Ok(value)
    }

    fn invoke(&self, container: &DataContainer) -> Value {
        match &self.resolver {
            Resolver::Constant(payload) => Value::Computed(payload.clone()),
            Resolver::Function(f) => f(container),
        }
    }

    /// Resolve every declared dependency, recording erroring ones as unmet.
    fn resolve_dependencies(
        &self,
        graph: &Graph,
        input: &Payload,
        cache: &mut Results,
        errors: &mut Errors,
    ) -> Result<BTreeMap<FactName, DependencyValue>, GraphError> {
        let mut resolved = BTreeMap::new();

        for (dep_name, dep_module) in &self.dependencies {
            let Some(slot) = graph.slot(dep_module.as_str(), dep_name.as_str()) else {
                return Err(GraphError::MissingDependency {
                    module: self.module_name.clone(),
                    fact: self.name.clone(),
                    missing_module: dep_module.clone(),
                    missing_name: dep_name.clone(),
                });
            };

            let value = match (slot, self.entity_id) {
                (FactSlot::One(fact), _) => {
                    DependencyValue::One(fact.resolve(graph, input, cache)?)
                }
                // Paired index: a per-entity consumer sees the target at its
                // own entity id, as a scalar.
                (FactSlot::PerEntity(instances), Some(entity_id)) => {
                    let Some(fact) = instances.get(&entity_id) else {
                        return Err(GraphError::MissingEntityInstance {
                            module: self.module_name.clone(),
                            fact: self.name.clone(),
                            entity_id,
                            dep_module: dep_module.clone(),
                            dep_name: dep_name.clone(),
                        });
                    };
                    DependencyValue::One(fact.resolve(graph, input, cache)?)
                }
                // Aggregator: a non-per-entity consumer sees the whole
                // fan-out.
                (FactSlot::PerEntity(instances), None) => {
                    let mut fan_out = BTreeMap::new();
                    for (id, fact) in instances {
                        fan_out.insert(*id, fact.resolve(graph, input, cache)?);
                    }
                    DependencyValue::PerEntity(fan_out)
                }
            };

            if value.has_errors() {
                errors.add_unmet(dep_module.clone(), dep_name.clone());
            }
            resolved.insert(dep_name.clone(), value);
        }

        Ok(resolved)
    }

    /// Keep only declared input keys, substituting per-entity values, and
    /// project each through its schema's accepted key paths.
    fn filtered_input(&self, input: &Payload) -> Payload {
        let mut out = serde_json::Map::new();

        for input_def in &self.inputs {
            let fetched = self.fetch_input(input, input_def);
            let Some(value) = fetched else {
                continue;
            };

            let mut single = serde_json::Map::new();
            single.insert(input_def.name.as_str().to_string(), value.clone());
            let projected = input_def.schema.key_map().write(&Payload::Object(single));

            if let Some(projected_value) = projected.get(input_def.name.as_str()) {
                out.insert(input_def.name.as_str().to_string(), projected_value.clone());
            }
        }

        Payload::Object(out)
    }

    fn fetch_input<'i>(&self, input: &'i Payload, input_def: &InputDef) -> Option<&'i Payload> {
        if input_def.per_entity {
            // `input[entity_name][entity_id][name]`; a non-per-entity fact
            // has no entity id to substitute, so the fetch yields nothing
            // and validation reports the schema's type message.
            let entity = self.per_entity.as_ref()?;
            let entity_id = self.entity_id?;
            input
                .get(entity.as_str())?
                .get(entity_id)?
                .get(input_def.name.as_str())
        } else {
            input.get(input_def.name.as_str())
        }
    }

    /// Validate each declared input on its single-key sub-record.
    fn validate_inputs(&self, filtered: &Payload, errors: &mut Errors) {
        for input_def in &self.inputs {
            let mut record = serde_json::Map::new();
            if let Some(value) = filtered.get(input_def.name.as_str()) {
                record.insert(input_def.name.as_str().to_string(), value.clone());
            }

            let result = input_def.schema.call(&Payload::Object(record));
            for error in result.errors {
                errors.add_bad_input(error.path, error.text);
            }
        }
    }
}
