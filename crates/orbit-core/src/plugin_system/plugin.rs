//! The runtime instance of a plugin and its lifecycle state machine.
//!
//! ```text
//! Detected --start--> Starting --ok--> Started --stop--> Stopping --ok--> Stopped
//!                        |                                   |              |
//!                        +--fail--> Error <--------fail------+              |
//!                                                                          start
//! ```
//!
//! `start` and `stop` never propagate activator failures or panics. They
//! return `false`, move the plugin to `Error`, record the cause and emit
//! `starterror`/`stoperror`.
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use semver::Version;
use serde_json::Value;

use crate::event::PluginEvent;
use crate::plugin_system::activator::Activator;
use crate::plugin_system::context::PluginContext;
use crate::plugin_system::dependency::PluginDependency;
use crate::plugin_system::error::{BoxError, PluginSystemError};
use crate::plugin_system::exports::ExportMap;
use crate::plugin_system::identity::Identity;
use crate::plugin_system::manager::Runtime;
use crate::plugin_system::manifest::PluginManifest;
use crate::storage::workspace::ScopedDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginStatus {
    Detected,
    Starting,
    Started,
    Stopping,
    Stopped,
    Error,
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PluginStatus::Detected => "detected",
            PluginStatus::Starting => "starting",
            PluginStatus::Started => "started",
            PluginStatus::Stopping => "stopping",
            PluginStatus::Stopped => "stopped",
            PluginStatus::Error => "error",
        };
        f.write_str(name)
    }
}

thread_local! {
    /// Plugins whose `start` is running on this thread, outermost first.
    static START_CHAIN: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Keeps a plugin on the start chain for the duration of its `start`.
struct StartFrame;

impl StartFrame {
    fn enter(id: String) -> Self {
        START_CHAIN.with(|chain| chain.borrow_mut().push(id));
        StartFrame
    }
}

impl Drop for StartFrame {
    fn drop(&mut self) {
        START_CHAIN.with(|chain| {
            chain.borrow_mut().pop();
        });
    }
}

/// If `id` is being started further up this thread's call stack, the cycle
/// from it back to itself.
pub(crate) fn start_cycle_to(id: &str) -> Option<Vec<String>> {
    START_CHAIN.with(|chain| {
        let chain = chain.borrow();
        chain.iter().position(|entry| entry == id).map(|pos| {
            let mut cycle = chain[pos..].to_vec();
            cycle.push(id.to_string());
            cycle
        })
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic reason".to_string()
    }
}

#[derive(Debug)]
struct PluginState {
    status: PluginStatus,
    last_error: Option<Arc<PluginSystemError>>,
    exports: Arc<ExportMap>,
}

pub struct Plugin {
    manifest: Arc<PluginManifest>,
    activator: Option<Arc<dyn Activator>>,
    state: Mutex<PluginState>,
    workspace: ScopedDir,
    log_dir: ScopedDir,
    context: PluginContext,
    runtime: Weak<Runtime>,
}

impl Plugin {
    /// Build the instance, loading its activator. Emits `detected`.
    pub(crate) fn new(manifest: Arc<PluginManifest>, runtime: &Arc<Runtime>) -> Result<Arc<Self>, PluginSystemError> {
        let activator = match &manifest.activator {
            Some(path) => Some(runtime.loader.load(&manifest, path)?),
            None => None,
        };

        let id = manifest.identity.to_string();
        let environment = &runtime.environment;
        let workspace = ScopedDir::new(environment.workspace_dir.join(&id));
        let log_dir = ScopedDir::new(environment.log_dir.join(&id));
        let context_manifest = manifest.clone();
        let runtime_ref = Arc::downgrade(runtime);

        let plugin = Arc::new_cyclic(|weak: &Weak<Plugin>| Plugin {
            context: PluginContext::new(weak.clone(), context_manifest, runtime_ref.clone()),
            manifest,
            activator,
            state: Mutex::new(PluginState {
                status: PluginStatus::Detected,
                last_error: None,
                exports: Arc::new(ExportMap::new()),
            }),
            workspace,
            log_dir,
            runtime: runtime_ref,
        });

        log::debug!("Detected plugin {} at {}", id, plugin.dir().display());
        runtime.emit(PluginEvent::Detected {
            plugin: plugin.identity().clone(),
        });
        Ok(plugin)
    }

    fn state(&self) -> MutexGuard<'_, PluginState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: PluginEvent) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.emit(event);
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.manifest.identity
    }

    pub fn name(&self) -> &str {
        self.manifest.name()
    }

    pub fn version(&self) -> &Version {
        &self.manifest.version
    }

    pub fn manifest(&self) -> &Arc<PluginManifest> {
        &self.manifest
    }

    pub fn dir(&self) -> &Path {
        &self.manifest.dir
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &PluginDependency> {
        self.manifest.dependencies.values()
    }

    pub fn is_singleton(&self) -> bool {
        self.manifest.singleton
    }

    pub fn status(&self) -> PluginStatus {
        self.state().status
    }

    /// Cause of the most recent failed start or stop
    pub fn last_error(&self) -> Option<Arc<PluginSystemError>> {
        self.state().last_error.clone()
    }

    /// The current exports; empty before the first successful start.
    pub fn exports(&self) -> Arc<ExportMap> {
        self.state().exports.clone()
    }

    pub fn context(&self) -> &PluginContext {
        &self.context
    }

    pub fn workspace(&self) -> &ScopedDir {
        &self.workspace
    }

    pub fn log_dir(&self) -> &ScopedDir {
        &self.log_dir
    }

    /// Looked up on every call, so preference changes are picked up.
    pub fn preference(&self) -> Option<Value> {
        self.runtime
            .upgrade()
            .and_then(|runtime| runtime.preferences.preference(self.identity()))
    }

    /// Start the plugin, resolving its declared dependencies first.
    ///
    /// Returns `false` without doing anything when the plugin is already
    /// started, mid-transition, or in `Error`. Returns `false` after moving to
    /// `Error` when anything fails.
    pub fn start(&self) -> bool {
        {
            let mut state = self.state();
            match state.status {
                PluginStatus::Detected | PluginStatus::Stopped => {}
                _ => return false,
            }
            state.status = PluginStatus::Starting;
            state.exports = Arc::new(ExportMap::new());
        }

        let id = self.identity().to_string();
        let _frame = StartFrame::enter(id.clone());
        log::info!("Starting plugin {}", id);

        match self.run_start() {
            Ok(exports) => {
                {
                    let mut state = self.state();
                    state.status = PluginStatus::Started;
                    state.last_error = None;
                    state.exports = Arc::new(exports);
                }
                log::info!("Plugin {} started", id);
                self.emit(PluginEvent::Started {
                    plugin: self.identity().clone(),
                });
                true
            }
            Err(error) => {
                let error = Arc::new(error);
                {
                    let mut state = self.state();
                    state.status = PluginStatus::Error;
                    state.last_error = Some(error.clone());
                }
                log::error!("Plugin {} failed to start: {}", id, error);
                self.emit(PluginEvent::StartError {
                    plugin: self.identity().clone(),
                    error,
                });
                false
            }
        }
    }

    fn run_start(&self) -> Result<ExportMap, PluginSystemError> {
        for dependency in self.manifest.dependencies.values() {
            if dependency.name == self.name() {
                continue;
            }
            self.context.require(&dependency.name)?;
        }
        match &self.activator {
            Some(activator) => self.guarded("start", || activator.start(&self.context)),
            None => Ok(ExportMap::new()),
        }
    }

    /// Stop the plugin. A no-op returning `false` unless it is `Started`.
    pub fn stop(&self) -> bool {
        {
            let mut state = self.state();
            if state.status != PluginStatus::Started {
                return false;
            }
            state.status = PluginStatus::Stopping;
        }

        let id = self.identity().to_string();
        log::info!("Stopping plugin {}", id);
        let result = match &self.activator {
            Some(activator) => self.guarded("stop", || activator.stop(&self.context)),
            None => Ok(()),
        };

        match result {
            Ok(()) => {
                self.state().status = PluginStatus::Stopped;
                self.emit(PluginEvent::Stopped {
                    plugin: self.identity().clone(),
                });
                true
            }
            Err(error) => {
                let error = Arc::new(error);
                {
                    let mut state = self.state();
                    state.status = PluginStatus::Error;
                    state.last_error = Some(error.clone());
                }
                log::error!("Plugin {} failed to stop: {}", id, error);
                self.emit(PluginEvent::StopError {
                    plugin: self.identity().clone(),
                    error,
                });
                false
            }
        }
    }

    /// Run activator code, turning returned errors and panics into lifecycle errors.
    fn guarded<T>(&self, operation: &str, f: impl FnOnce() -> Result<T, BoxError>) -> Result<T, PluginSystemError> {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(PluginSystemError::Lifecycle {
                plugin_id: self.identity().to_string(),
                operation: operation.to_string(),
                message: source.to_string(),
                source: Some(source),
            }),
            Err(payload) => Err(PluginSystemError::Lifecycle {
                plugin_id: self.identity().to_string(),
                operation: operation.to_string(),
                message: format!("panic: {}", panic_message(payload.as_ref())),
                source: None,
            }),
        }
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("identity", &self.identity().to_string())
            .field("dir", &self.dir())
            .field("status", &self.status())
            .field("has_activator", &self.activator.is_some())
            .finish()
    }
}
