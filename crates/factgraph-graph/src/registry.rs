//! Fact declarations, registries, and namespaces.
//!
//! Declarations are collected at load time and never mutated afterwards. A
//! [`Namespace`] holds two registry handles:
//!
//! - its *own* registry, which is where its sub-namespaces declare into, and
//! - its *target* registry, the parent's own registry (a root namespace
//!   targets itself).
//!
//! Declaring a fact appends to the target. This is the cooperative
//! composition pattern: several sub-namespaces contribute facts, and callers
//! evaluate against the parent to see the union. The target is an explicit
//! handle, not a reflective walk over any inheritance chain.
//!
//! The module name for a declaration comes from the enclosing
//! [`ModuleScope`] opened with `in_module`; scopes nest lexically, which
//! gives the push/run/pop module-override discipline without mutable state.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::Location;
use std::sync::{Arc, RwLock};

use factgraph_schema::Schema;

use crate::container::DataContainer;
use crate::value::{Payload, Value};
use crate::{EntityName, FactName, InputName, ModuleName};

pub type SharedSchema = Arc<dyn Schema>;
pub type ResolverFn = Arc<dyn Fn(&DataContainer) -> Value + Send + Sync>;

/// How a fact produces its value: a pure constant, or a function of its
/// [`DataContainer`].
#[derive(Clone)]
pub enum Resolver {
    Constant(Payload),
    Function(ResolverFn),
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolver::Constant(payload) => f.debug_tuple("Constant").field(payload).finish(),
            Resolver::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// One declared input field of a fact.
#[derive(Debug, Clone)]
pub struct InputDef {
    pub name: InputName,
    /// When true, the value is fetched from
    /// `input[entity_name][entity_id][name]` instead of `input[name]`.
    pub per_entity: bool,
    pub schema: SharedSchema,
}

/// An immutable fact declaration, registered at load time.
#[derive(Debug, Clone)]
pub struct FactDef {
    pub module_name: ModuleName,
    pub name: FactName,
    pub per_entity: Option<EntityName>,
    pub allow_unmet_dependencies: bool,
    pub resolver: Resolver,
    pub inputs: Vec<InputDef>,
    /// Dependency name to the module it lives in.
    pub dependencies: BTreeMap<FactName, ModuleName>,
    /// Declaration site, for diagnostics.
    pub source_location: Option<(String, u32)>,
}

/// An ordered collection of fact declarations.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    defs: Vec<FactDef>,
}

impl Registry {
    pub fn push(&mut self, def: FactDef) {
        self.defs.push(def);
    }

    pub fn defs(&self) -> &[FactDef] {
        &self.defs
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn clear(&mut self) {
        self.defs.clear();
    }

    /// Restrict to the named modules; `None` keeps everything.
    pub fn filtered(&self, modules: Option<&[ModuleName]>) -> Registry {
        let Some(modules) = modules else {
            return self.clone();
        };
        Registry {
            defs: self
                .defs
                .iter()
                .filter(|def| modules.contains(&def.module_name))
                .cloned()
                .collect(),
        }
    }
}

/// A declaration namespace. See the module docs for the target-registry
/// discipline.
#[derive(Debug, Clone)]
pub struct Namespace {
    name: String,
    registry: Arc<RwLock<Registry>>,
    target: Arc<RwLock<Registry>>,
}

impl Namespace {
    /// A root namespace: declarations land in its own registry.
    pub fn root(name: impl Into<String>) -> Self {
        let registry = Arc::new(RwLock::new(Registry::default()));
        Self {
            name: name.into(),
            target: Arc::clone(&registry),
            registry,
        }
    }

    /// A sub-namespace with a fresh, empty registry of its own. Facts
    /// declared in it land in *this* namespace's registry.
    pub fn sub_namespace(&self, name: impl Into<String>) -> Namespace {
        Namespace {
            name: name.into(),
            registry: Arc::new(RwLock::new(Registry::default())),
            target: Arc::clone(&self.registry),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of this namespace's own registry (the union of declarations
    /// contributed by its sub-namespaces, plus its own when it is a root).
    pub fn registry(&self) -> Registry {
        self.registry.read().expect("registry lock poisoned").clone()
    }

    /// Test support. Undefined if it races an `evaluate()` call.
    pub fn reset_registry(&self) {
        self.registry.write().expect("registry lock poisoned").clear();
    }

    /// Open a lexical module scope for declarations.
    pub fn in_module<R>(
        &self,
        module: impl Into<ModuleName>,
        f: impl FnOnce(&ModuleScope<'_>) -> R,
    ) -> R {
        let scope = ModuleScope {
            namespace: self,
            module: module.into(),
        };
        f(&scope)
    }

    fn declare(&self, def: FactDef) {
        tracing::debug!(
            module = %def.module_name,
            fact = %def.name,
            namespace = %self.name,
            "declared fact"
        );
        self.target.write().expect("registry lock poisoned").push(def);
    }
}

/// A lexical module scope: every fact declared through it belongs to the
/// scope's module.
#[derive(Debug)]
pub struct ModuleScope<'ns> {
    namespace: &'ns Namespace,
    module: ModuleName,
}

impl ModuleScope<'_> {
    pub fn module(&self) -> &ModuleName {
        &self.module
    }

    /// Override the module name for declarations inside `f`.
    pub fn in_module<R>(
        &self,
        module: impl Into<ModuleName>,
        f: impl FnOnce(&ModuleScope<'_>) -> R,
    ) -> R {
        self.namespace.in_module(module, f)
    }

    /// Declare a fact. The closure configures inputs, dependencies, and the
    /// resolver on a [`FactBuilder`].
    #[track_caller]
    pub fn fact(&self, name: impl Into<FactName>, configure: impl FnOnce(&mut FactBuilder)) {
        let location = Location::caller();
        let mut builder = FactBuilder::new(self.module.clone(), name.into(), location);
        configure(&mut builder);
        self.namespace.declare(builder.into_def());
    }

    /// Shorthand for a fact whose resolver is a pure value: no inputs, no
    /// dependencies.
    #[track_caller]
    pub fn constant(&self, name: impl Into<FactName>, payload: impl Into<Payload>) {
        let location = Location::caller();
        let builder = FactBuilder::constant(self.module.clone(), name.into(), payload, location);
        self.namespace.declare(builder.into_def());
    }
}

/// Accumulates one fact declaration.
pub struct FactBuilder {
    module_name: ModuleName,
    name: FactName,
    per_entity: Option<EntityName>,
    allow_unmet_dependencies: bool,
    inputs: Vec<InputDef>,
    dependencies: BTreeMap<FactName, ModuleName>,
    resolver: Option<Resolver>,
    source_location: Option<(String, u32)>,
}

impl FactBuilder {
    fn new(module_name: ModuleName, name: FactName, location: &Location<'_>) -> Self {
        Self {
            module_name,
            name,
            per_entity: None,
            allow_unmet_dependencies: false,
            inputs: Vec::new(),
            dependencies: BTreeMap::new(),
            resolver: None,
            source_location: Some((location.file().to_string(), location.line())),
        }
    }

    fn constant(
        module_name: ModuleName,
        name: FactName,
        payload: impl Into<Payload>,
        location: &Location<'_>,
    ) -> Self {
        let mut builder = Self::new(module_name, name, location);
        builder.resolver = Some(Resolver::Constant(payload.into()));
        builder
    }

    /// Declare one instance of this fact per element of the named entity
    /// collection.
    pub fn per_entity(&mut self, entity: impl Into<EntityName>) -> &mut Self {
        self.per_entity = Some(entity.into());
        self
    }

    /// Let the resolver run even when inputs or dependencies are unmet; it
    /// receives the errors via `data_errors()` and decides what to return.
    pub fn allow_unmet_dependencies(&mut self) -> &mut Self {
        self.allow_unmet_dependencies = true;
        self
    }

    pub fn input(&mut self, name: impl Into<InputName>, schema: impl Schema + 'static) -> &mut Self {
        self.inputs.push(InputDef {
            name: name.into(),
            per_entity: false,
            schema: Arc::new(schema),
        });
        self
    }

    /// An input fetched per entity: `input[entity_name][entity_id][name]`.
    pub fn input_per_entity(
        &mut self,
        name: impl Into<InputName>,
        schema: impl Schema + 'static,
    ) -> &mut Self {
        self.inputs.push(InputDef {
            name: name.into(),
            per_entity: true,
            schema: Arc::new(schema),
        });
        self
    }

    /// Depend on a fact in the containing module.
    pub fn dependency(&mut self, name: impl Into<FactName>) -> &mut Self {
        let module = self.module_name.clone();
        self.dependency_from(name, module)
    }

    /// Depend on a fact in another module.
    pub fn dependency_from(
        &mut self,
        name: impl Into<FactName>,
        module: impl Into<ModuleName>,
    ) -> &mut Self {
        self.dependencies.insert(name.into(), module.into());
        self
    }

    pub fn resolver(
        &mut self,
        f: impl Fn(&DataContainer) -> Value + Send + Sync + 'static,
    ) -> &mut Self {
        self.resolver = Some(Resolver::Function(Arc::new(f)));
        self
    }

    fn into_def(self) -> FactDef {
        let resolver = match self.resolver {
            Some(resolver) => resolver,
            None => {
                tracing::warn!(
                    module = %self.module_name,
                    fact = %self.name,
                    "fact declared without a resolver; defaulting to null constant"
                );
                Resolver::Constant(Payload::Null)
            }
        };
        FactDef {
            module_name: self.module_name,
            name: self.name,
            per_entity: self.per_entity,
            allow_unmet_dependencies: self.allow_unmet_dependencies,
            resolver,
            inputs: self.inputs,
            dependencies: self.dependencies,
            source_location: self.source_location,
        }
    }
}
