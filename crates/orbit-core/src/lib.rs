//! # Orbit Core
//!
//! Registry and lifecycle engine for versioned, self-describing plugins.
//! Plugins are discovered from disk or installed through a [`Fetcher`],
//! bucketed by name into version-sorted groups, started on demand when a
//! dependent requires them, and exposed to each other only through the
//! capability view their declared dependencies allow.
pub mod event;
pub mod kernel;
pub mod plugin_system;
pub mod storage;
pub mod utils;

pub use kernel::Application;
pub use kernel::error::Error as KernelError;
pub use plugin_system::{
    Activator, CodeLoader, ExportMap, Fetcher, Identifier, Identity, Plugin, PluginContext,
    PluginManager, PluginManifest, PluginStatus, RequireView,
};
pub use event::{EventSink, PluginEvent};

#[cfg(test)]
mod tests;
