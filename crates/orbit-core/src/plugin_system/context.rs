use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use serde_json::Value;

use crate::event::PluginEvent;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::exports::RequireView;
use crate::plugin_system::identity::{Identifier, Identity};
use crate::plugin_system::manager::Runtime;
use crate::plugin_system::manifest::PluginManifest;
use crate::plugin_system::plugin::{start_cycle_to, Plugin, PluginStatus};
use crate::plugin_system::version::VersionMatch;
use crate::storage::config::Environment;

/// The façade a plugin's own code sees.
///
/// Everything a plugin reaches outside itself goes through here, and
/// [`require`](Self::require) only hands out plugins the manifest declares
/// (or anything, for `dynamic` plugins).
#[derive(Clone)]
pub struct PluginContext {
    plugin: Weak<Plugin>,
    manifest: Arc<PluginManifest>,
    runtime: Weak<Runtime>,
}

impl PluginContext {
    pub(crate) fn new(plugin: Weak<Plugin>, manifest: Arc<PluginManifest>, runtime: Weak<Runtime>) -> Self {
        Self {
            plugin,
            manifest,
            runtime,
        }
    }

    fn runtime(&self) -> Result<Arc<Runtime>, PluginSystemError> {
        self.runtime.upgrade().ok_or_else(|| self.detached("runtime"))
    }

    fn owner(&self) -> Result<Arc<Plugin>, PluginSystemError> {
        self.plugin.upgrade().ok_or_else(|| self.detached("plugin"))
    }

    fn detached(&self, what: &str) -> PluginSystemError {
        PluginSystemError::Lifecycle {
            plugin_id: self.identity().to_string(),
            operation: "context".to_string(),
            message: format!("the {} behind this context has been dropped", what),
            source: None,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.manifest.identity
    }

    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    /// Directory the plugin was loaded from
    pub fn dir(&self) -> &Path {
        &self.manifest.dir
    }

    /// The plugin's workspace directory, created on first call
    pub fn workspace(&self) -> Result<PathBuf, PluginSystemError> {
        let plugin = self.owner()?;
        let dir = plugin.workspace();
        dir.ensure()
            .map(Path::to_path_buf)
            .map_err(|e| PluginSystemError::io(e, "create_workspace", dir.path()))
    }

    /// The plugin's log directory, created on first call
    pub fn log_dir(&self) -> Result<PathBuf, PluginSystemError> {
        let plugin = self.owner()?;
        let dir = plugin.log_dir();
        dir.ensure()
            .map(Path::to_path_buf)
            .map_err(|e| PluginSystemError::io(e, "create_log_dir", dir.path()))
    }

    pub fn preference(&self) -> Option<Value> {
        self.runtime
            .upgrade()
            .and_then(|runtime| runtime.preferences.preference(self.identity()))
    }

    pub fn environment(&self) -> Option<Environment> {
        self.runtime.upgrade().map(|runtime| runtime.environment.clone())
    }

    /// The query `require` would use for `identifier`, after access control.
    fn resolve_range(&self, identifier: &Identifier) -> Result<VersionMatch, PluginSystemError> {
        let declared = self.manifest.dependency(identifier.name());
        if declared.is_none() && !self.manifest.dynamic {
            return Err(PluginSystemError::AccessDenied {
                plugin_id: self.identity().to_string(),
                dependency: identifier.name().to_string(),
            });
        }
        Ok(identifier
            .version()
            .or(declared.map(|dependency| &dependency.spec))
            .cloned()
            .unwrap_or(VersionMatch::Latest))
    }

    /// Look up a plugin with the same access and range rules as `require`,
    /// without starting it.
    pub fn plugin(&self, request: &str) -> Result<Arc<Plugin>, PluginSystemError> {
        self.lookup(&Identifier::parse(request)?)
    }

    fn lookup(&self, identifier: &Identifier) -> Result<Arc<Plugin>, PluginSystemError> {
        let range = self.resolve_range(identifier)?;
        let runtime = self.runtime()?;
        runtime
            .max_satisfy(identifier.name(), &range)
            .ok_or_else(|| PluginSystemError::DependencyNotFound {
                plugin_id: self.identity().to_string(),
                dependency: identifier.name().to_string(),
                range: range.to_string(),
            })
    }

    /// Resolve a dependency, start it if needed and return its exports.
    ///
    /// The range comes from the request (`name@range`) if given, else from
    /// the manifest declaration, else `latest`. The highest satisfying
    /// version wins.
    pub fn require(&self, request: &str) -> Result<RequireView, PluginSystemError> {
        let identifier = Identifier::parse(request)?;
        let target = self.lookup(&identifier)?;
        let target_id = target.identity().to_string();
        log::debug!("{} requires {} -> {}", self.identity(), identifier, target_id);

        match target.status() {
            PluginStatus::Started => {}
            PluginStatus::Error => return Err(self.error_state(&target)),
            PluginStatus::Starting => {
                return Err(match start_cycle_to(&target_id) {
                    Some(cycle) => PluginSystemError::CyclicDependency(cycle),
                    None => self.not_started(&target),
                });
            }
            _ => {
                target.start();
                match target.status() {
                    PluginStatus::Started => {}
                    PluginStatus::Error => return Err(self.error_state(&target)),
                    _ => return Err(self.not_started(&target)),
                }
            }
        }

        let view = RequireView::new(target.clone());
        if let Ok(runtime) = self.runtime() {
            runtime.emit(PluginEvent::Require {
                name: identifier.name().to_string(),
                target: target.identity().clone(),
                caller: self.identity().clone(),
                exports: view.keys(),
            });
        }
        Ok(view)
    }

    /// A cycle stays a cycle for every plugin on it; other causes are wrapped.
    fn error_state(&self, target: &Plugin) -> PluginSystemError {
        if let Some(error) = target.last_error() {
            if let PluginSystemError::CyclicDependency(cycle) = error.as_ref() {
                return PluginSystemError::CyclicDependency(cycle.clone());
            }
        }
        PluginSystemError::DependencyErrorState {
            plugin_id: self.identity().to_string(),
            dependency: target.identity().to_string(),
            cause: target
                .last_error()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown cause".to_string()),
        }
    }

    fn not_started(&self, target: &Plugin) -> PluginSystemError {
        PluginSystemError::Lifecycle {
            plugin_id: target.identity().to_string(),
            operation: "start".to_string(),
            message: format!(
                "required by {} but it is {}",
                self.identity(),
                target.status()
            ),
            source: None,
        }
    }
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin", &self.identity().to_string())
            .field("dynamic", &self.manifest.dynamic)
            .finish()
    }
}
