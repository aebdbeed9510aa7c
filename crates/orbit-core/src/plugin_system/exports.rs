//! Values a plugin exposes to its dependents.
//!
//! A started plugin publishes an [`ExportMap`]. Dependents never see the map
//! directly; [`PluginContext::require`](crate::plugin_system::PluginContext::require)
//! hands them a [`RequireView`] in which every function is bound to the
//! exporting plugin's own context.
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use serde_json::Value;

use crate::plugin_system::context::PluginContext;
use crate::plugin_system::error::BoxError;
use crate::plugin_system::identity::Identity;
use crate::plugin_system::plugin::Plugin;

/// An exported function. The context passed in is always the exporter's.
pub type ExportFn = Arc<dyn Fn(&PluginContext, &[Value]) -> Result<Value, BoxError> + Send + Sync>;

#[derive(Clone)]
pub enum Export {
    /// Plain data, passed through as is
    Value(Value),
    /// Any shared Rust object, passed through by reference
    Object(Arc<dyn Any + Send + Sync>),
    Function(ExportFn),
}

impl fmt::Debug for Export {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Export::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Export::Object(_) => f.write_str("Object(..)"),
            Export::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// Named exports published by a started plugin
#[derive(Debug, Clone, Default)]
pub struct ExportMap {
    entries: BTreeMap<String, Export>,
}

impl ExportMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.insert(name, Export::Value(value.into()));
        self
    }

    pub fn with_object<T: Any + Send + Sync>(mut self, name: &str, object: Arc<T>) -> Self {
        self.insert(name, Export::Object(object));
        self
    }

    pub fn with_fn<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&PluginContext, &[Value]) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        self.insert(name, Export::Function(Arc::new(f)));
        self
    }

    pub fn insert(&mut self, name: &str, export: Export) -> Option<Export> {
        self.entries.insert(name.to_string(), export)
    }

    pub fn get(&self, name: &str) -> Option<&Export> {
        self.entries.get(name)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Export)> {
        self.entries.iter()
    }
}

/// An exported function bound to the plugin that exported it.
#[derive(Clone)]
pub struct BoundFn {
    exporter: Arc<Plugin>,
    name: String,
    f: ExportFn,
}

impl BoundFn {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, BoxError> {
        (self.f)(self.exporter.context(), args)
    }
}

impl fmt::Debug for BoundFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoundFn({}::{})", self.exporter.identity(), self.name)
    }
}

/// What `require` returns: a dependency's exports, functions bound to it.
#[derive(Clone)]
pub struct RequireView {
    exporter: Arc<Plugin>,
    exports: Arc<ExportMap>,
}

impl RequireView {
    pub(crate) fn new(exporter: Arc<Plugin>) -> Self {
        let exports = exporter.exports();
        Self { exporter, exports }
    }

    /// Identity of the plugin behind this view
    pub fn identity(&self) -> &Identity {
        self.exporter.identity()
    }

    pub fn plugin(&self) -> &Arc<Plugin> {
        &self.exporter
    }

    pub fn keys(&self) -> Vec<String> {
        self.exports.keys()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.exports.get(name).is_some()
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.exports.get(name) {
            Some(Export::Value(value)) => Some(value),
            _ => None,
        }
    }

    /// Downcast an exported object.
    pub fn object<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        match self.exports.get(name) {
            Some(Export::Object(object)) => object.clone().downcast::<T>().ok(),
            _ => None,
        }
    }

    pub fn function(&self, name: &str) -> Option<BoundFn> {
        match self.exports.get(name) {
            Some(Export::Function(f)) => Some(BoundFn {
                exporter: self.exporter.clone(),
                name: name.to_string(),
                f: f.clone(),
            }),
            _ => None,
        }
    }

    /// Call an exported function with the exporter as receiver.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, BoxError> {
        match self.function(name) {
            Some(f) => f.call(args),
            None => Err(format!("'{}' exports no function named '{}'", self.identity(), name).into()),
        }
    }
}

impl fmt::Debug for RequireView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequireView")
            .field("exporter", &self.exporter.identity().to_string())
            .field("exports", &self.exports.keys())
            .finish()
    }
}
