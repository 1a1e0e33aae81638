//! The read-only bundle handed to resolvers.
//!
//! A resolver sees exactly three things: its fact's filtered input record,
//! its resolved dependencies, and, only when the fact was declared with
//! `allow_unmet_dependencies`, the deferred error record via
//! [`DataContainer::data_errors`]. Resolvers must be pure functions of this
//! container; they cannot observe cache state for other facts.

use std::collections::BTreeMap;

use crate::value::{Errors, Payload, Value};
use crate::{EntityId, FactName};

/// A resolved dependency: a single value, or the whole per-entity fan-out
/// when a non-per-entity fact depends on a per-entity one.
#[derive(Debug, Clone, PartialEq)]
pub enum DependencyValue {
    One(Value),
    PerEntity(BTreeMap<EntityId, Value>),
}

impl DependencyValue {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            DependencyValue::One(value) => Some(value),
            DependencyValue::PerEntity(_) => None,
        }
    }

    pub fn as_fan_out(&self) -> Option<&BTreeMap<EntityId, Value>> {
        match self {
            DependencyValue::One(_) => None,
            DependencyValue::PerEntity(map) => Some(map),
        }
    }

    /// True when any contained value is an `Errors` record.
    pub fn has_errors(&self) -> bool {
        match self {
            DependencyValue::One(value) => value.is_errors(),
            DependencyValue::PerEntity(map) => map.values().any(Value::is_errors),
        }
    }
}

/// Read-only data for one resolver invocation.
#[derive(Debug, Clone)]
pub struct DataContainer {
    input: Payload,
    dependencies: BTreeMap<FactName, DependencyValue>,
    deferred_errors: Option<Errors>,
}

impl DataContainer {
    pub fn new(input: Payload, dependencies: BTreeMap<FactName, DependencyValue>) -> Self {
        Self {
            input,
            dependencies,
            deferred_errors: None,
        }
    }

    pub fn with_deferred(
        input: Payload,
        dependencies: BTreeMap<FactName, DependencyValue>,
        errors: Errors,
    ) -> Self {
        Self {
            input,
            dependencies,
            deferred_errors: Some(errors),
        }
    }

    /// The filtered input record (declared keys only).
    pub fn input(&self) -> &Payload {
        &self.input
    }

    /// One filtered input field.
    pub fn input_value(&self, name: &str) -> Option<&Payload> {
        self.input.get(name)
    }

    pub fn dependency(&self, name: &str) -> Option<&DependencyValue> {
        self.dependencies.get(name)
    }

    /// The computed payload of a scalar dependency, if it computed.
    pub fn dependency_computed(&self, name: &str) -> Option<&Payload> {
        self.dependency(name)?.as_value()?.as_computed()
    }

    /// The whole `entity_id -> value` map of a per-entity dependency.
    pub fn dependency_fan_out(&self, name: &str) -> Option<&BTreeMap<EntityId, Value>> {
        self.dependency(name)?.as_fan_out()
    }

    pub fn deferred_errors(&self) -> Option<&Errors> {
        self.deferred_errors.as_ref()
    }

    /// The deferred error record as a [`Value`], or the
    /// `incomplete_definition` sentinel when there is none.
    ///
    /// Only meaningful for facts declared with `allow_unmet_dependencies`;
    /// elsewhere a resolver only runs once its errors are empty.
    pub fn data_errors(&self) -> Value {
        match &self.deferred_errors {
            Some(errors) => Value::Errors(errors.clone()),
            None => Value::Incomplete,
        }
    }

    /// Run a destructuring closure; on match failure (`None`), fall through
    /// to [`DataContainer::data_errors`].
    ///
    /// This lets resolvers destructure their inputs with `?` and return the
    /// deferred errors automatically when something was unmet:
    ///
    /// ```ignore
    /// data.must_match(|d| {
    ///     let income = d.dependency_computed("income")?.as_i64()?;
    ///     Some(Value::computed(serde_json::json!(income < 100)))
    /// })
    /// ```
    pub fn must_match<F>(&self, f: F) -> Value
    where
        F: FnOnce(&DataContainer) -> Option<Value>,
    {
        match f(self) {
            Some(value) => value,
            None => self.data_errors(),
        }
    }
}
