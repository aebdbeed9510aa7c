//! Plugin entry points and how they are obtained.
//!
//! The lifecycle engine only ever talks to an [`Activator`]. Where an
//! activator comes from is the [`CodeLoader`]'s business: the bundled
//! [`StaticCodeLoader`] looks activators up in a registry filled at compile
//! time, other loaders may open shared libraries or embed a script engine.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::plugin_system::context::PluginContext;
use crate::plugin_system::error::{BoxError, PluginSystemError};
use crate::plugin_system::exports::ExportMap;
use crate::plugin_system::manifest::PluginManifest;

/// Start (required) and stop (optional) behavior of a plugin.
pub trait Activator: Send + Sync {
    /// Runs when the plugin starts. The returned map replaces the plugin's exports.
    fn start(&self, context: &PluginContext) -> Result<ExportMap, BoxError>;

    fn stop(&self, _context: &PluginContext) -> Result<(), BoxError> {
        Ok(())
    }
}

type StartFn = Box<dyn Fn(&PluginContext) -> Result<ExportMap, BoxError> + Send + Sync>;
type StopFn = Box<dyn Fn(&PluginContext) -> Result<(), BoxError> + Send + Sync>;

/// Activator assembled from closures.
pub struct FnActivator {
    start: StartFn,
    stop: Option<StopFn>,
}

impl FnActivator {
    /// A single callable is treated as the start entry point.
    pub fn new<F>(start: F) -> Self
    where
        F: Fn(&PluginContext) -> Result<ExportMap, BoxError> + Send + Sync + 'static,
    {
        Self {
            start: Box::new(start),
            stop: None,
        }
    }

    pub fn with_stop<F>(mut self, stop: F) -> Self
    where
        F: Fn(&PluginContext) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.stop = Some(Box::new(stop));
        self
    }
}

impl Activator for FnActivator {
    fn start(&self, context: &PluginContext) -> Result<ExportMap, BoxError> {
        (self.start)(context)
    }

    fn stop(&self, context: &PluginContext) -> Result<(), BoxError> {
        match &self.stop {
            Some(stop) => stop(context),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for FnActivator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnActivator")
            .field("has_stop", &self.stop.is_some())
            .finish()
    }
}

/// Turns a manifest's `activator` entry into runnable code.
pub trait CodeLoader: Send + Sync {
    /// Load the activator named by `manifest.activator` (relative to `manifest.dir`).
    fn load(&self, manifest: &PluginManifest, activator: &str) -> Result<Arc<dyn Activator>, PluginSystemError>;
}

type ActivatorFactory = Arc<dyn Fn(&PluginManifest) -> Arc<dyn Activator> + Send + Sync>;

/// Compile-time registry of activator factories.
///
/// Lookup order for a manifest is `name@version`, then `name`, then the
/// activator path itself.
#[derive(Clone, Default)]
pub struct StaticCodeLoader {
    factories: HashMap<String, ActivatorFactory>,
}

impl StaticCodeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a plugin id or activator path.
    pub fn register<F>(&mut self, key: &str, factory: F) -> &mut Self
    where
        F: Fn(&PluginManifest) -> Arc<dyn Activator> + Send + Sync + 'static,
    {
        self.factories.insert(key.to_string(), Arc::new(factory));
        self
    }

    /// Register one shared activator instance.
    pub fn with_activator(mut self, key: &str, activator: Arc<dyn Activator>) -> Self {
        self.register(key, move |_| activator.clone());
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }
}

impl CodeLoader for StaticCodeLoader {
    fn load(&self, manifest: &PluginManifest, activator: &str) -> Result<Arc<dyn Activator>, PluginSystemError> {
        let id = manifest.identity.to_string();
        [id.as_str(), manifest.name(), activator]
            .iter()
            .find_map(|key| self.factories.get(*key))
            .map(|factory| factory(manifest))
            .ok_or_else(|| PluginSystemError::Loading {
                plugin_id: id.clone(),
                activator: activator.to_string(),
                message: "no activator registered under this plugin id or path".to_string(),
            })
    }
}

impl fmt::Debug for StaticCodeLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.factories.keys().collect();
        keys.sort();
        f.debug_struct("StaticCodeLoader").field("keys", &keys).finish()
    }
}
