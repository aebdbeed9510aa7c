use std::fmt;
use std::sync::Arc;

use crate::event::Event;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::identity::Identity;

/// Notifications emitted by plugins and the manager
#[derive(Debug, Clone)]
pub enum PluginEvent {
    /// A plugin instance was constructed
    Detected { plugin: Identity },
    /// A plugin was added to the registry
    Bound { plugin: Identity },
    Started { plugin: Identity },
    Stopped { plugin: Identity },
    StartError { plugin: Identity, error: Arc<PluginSystemError> },
    StopError { plugin: Identity, error: Arc<PluginSystemError> },
    /// `caller` resolved `name` to `target`; `exports` lists what it got
    Require {
        name: String,
        target: Identity,
        caller: Identity,
        exports: Vec<String>,
    },
    Installed { plugin: Identity, from: String },
    Uninstalled { plugin: Identity },
    /// The plugin declares an engine range the running runtime is outside of
    EngineMismatch { plugin: Identity, required: String, runtime: String },
}

impl PluginEvent {
    /// The plugin the event is about (the resolved target for `Require`).
    pub fn plugin(&self) -> &Identity {
        match self {
            PluginEvent::Detected { plugin }
            | PluginEvent::Bound { plugin }
            | PluginEvent::Started { plugin }
            | PluginEvent::Stopped { plugin }
            | PluginEvent::StartError { plugin, .. }
            | PluginEvent::StopError { plugin, .. }
            | PluginEvent::Installed { plugin, .. }
            | PluginEvent::Uninstalled { plugin }
            | PluginEvent::EngineMismatch { plugin, .. } => plugin,
            PluginEvent::Require { target, .. } => target,
        }
    }
}

impl Event for PluginEvent {
    fn name(&self) -> &'static str {
        match self {
            PluginEvent::Detected { .. } => "detected",
            PluginEvent::Bound { .. } => "bound",
            PluginEvent::Started { .. } => "started",
            PluginEvent::Stopped { .. } => "stopped",
            PluginEvent::StartError { .. } => "starterror",
            PluginEvent::StopError { .. } => "stoperror",
            PluginEvent::Require { .. } => "require",
            PluginEvent::Installed { .. } => "installed",
            PluginEvent::Uninstalled { .. } => "uninstalled",
            PluginEvent::EngineMismatch { .. } => "engine-mismatch",
        }
    }
}

impl fmt::Display for PluginEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginEvent::StartError { plugin, error } | PluginEvent::StopError { plugin, error } => {
                write!(f, "{} {}: {}", self.name(), plugin, error)
            }
            PluginEvent::Require { name, target, caller, .. } => {
                write!(f, "require {} -> {} (by {})", name, target, caller)
            }
            PluginEvent::Installed { plugin, from } => write!(f, "installed {} from {}", plugin, from),
            PluginEvent::EngineMismatch { plugin, required, runtime } => {
                write!(f, "engine-mismatch {}: requires {}, runtime is {}", plugin, required, runtime)
            }
            other => write!(f, "{} {}", other.name(), other.plugin()),
        }
    }
}
