//! # Orbit Core Plugin System Errors
//!
//! [`PluginSystemError`] covers everything the registry, lifecycle engine,
//! dependency façade and install pipeline can report. Each variant carries
//! the identifier or path involved so a failure can be diagnosed from the
//! message alone.
use std::path::PathBuf;

use crate::plugin_system::identity::IdentityError;
use crate::plugin_system::install::InstalledPlugin;
use crate::plugin_system::version::VersionError;

/// Boxed error returned by activator code and fetchers
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum PluginSystemError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("Plugin manifest error for '{}': {message}", path.display())]
    Manifest {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Plugin '{plugin_id}' cannot join group '{group}': {message}")]
    IncompatiblePlugin {
        plugin_id: String,
        group: String,
        message: String,
    },

    #[error("Plugin '{plugin_id}' requires '{dependency}@{range}' but no registered version satisfies it")]
    DependencyNotFound {
        plugin_id: String,
        dependency: String,
        range: String,
    },

    #[error("Plugin '{plugin_id}' requires '{dependency}', which is in error state: {cause}")]
    DependencyErrorState {
        plugin_id: String,
        dependency: String,
        cause: String,
    },

    #[error("Plugin '{plugin_id}' may not require undeclared dependency '{dependency}'")]
    AccessDenied {
        plugin_id: String,
        dependency: String,
    },

    #[error("Circular dependency detected: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("Install of '{identifier}' failed after {} completed task(s): {message}", completed.len())]
    Install {
        identifier: String,
        message: String,
        completed: Vec<InstalledPlugin>,
        #[source]
        source: Option<Box<PluginSystemError>>,
    },

    #[error("Uninstall of '{identifier}' failed: {message}")]
    Uninstall {
        identifier: String,
        message: String,
    },

    #[error("No registered plugin matches '{identifier}'")]
    NotFound { identifier: String },

    #[error("Plugin '{plugin_id}' failed during {operation}: {message}")]
    Lifecycle {
        plugin_id: String,
        operation: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Could not load activator '{activator}' for plugin '{plugin_id}': {message}")]
    Loading {
        plugin_id: String,
        activator: String,
        message: String,
    },

    #[error("I/O error during '{operation}' on '{}': {source}", path.display())]
    Io {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Version error: {0}")]
    Version(#[from] VersionError),
}

impl PluginSystemError {
    pub fn io(source: std::io::Error, operation: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        PluginSystemError::Io {
            operation: operation.into(),
            path: path.into(),
            source,
        }
    }

    pub fn manifest(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        PluginSystemError::Manifest {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }
}
