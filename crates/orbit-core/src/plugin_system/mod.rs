//! # Orbit Core Plugin System
//!
//! Discovery, version resolution, lifecycle and installation of plugins.
//!
//! ## Key Submodules and Responsibilities:
//!
//! - **[`version`]** and **[`identity`]**: semantic versions, the range dialect
//!   manifests use, [`Identity`] (`name@version`) and [`Identifier`] queries.
//! - **[`manifest`]** and **[`descriptor`]**: reading and validating
//!   `manifest.json`, and building exactly one [`Plugin`] per descriptor.
//! - **[`plugin`]**: the runtime instance and its start/stop state machine.
//! - **[`context`]** and **[`exports`]**: the façade a plugin's code sees,
//!   `require` access control, and the bound views dependents receive.
//! - **[`activator`]**: the [`Activator`] entry-point trait and the
//!   [`CodeLoader`] that produces activators.
//! - **[`group`]** and **[`registry`]**: per-name version buckets and the
//!   registry holding them plus the host plugin.
//! - **[`manager`]**: [`PluginManager`], the public face of the registry.
//! - **[`install`]**: the sequential install/uninstall pipeline and the
//!   [`Fetcher`] it stages packages with.
//! - **[`error`]**: [`PluginSystemError`](error::PluginSystemError).
pub mod activator;
pub mod context;
pub mod dependency;
pub mod descriptor;
pub mod error;
pub mod exports;
pub mod group;
pub mod identity;
pub mod install;
pub mod manager;
pub mod manifest;
pub mod plugin;
pub mod registry;
pub mod version;

pub use activator::{Activator, CodeLoader, FnActivator, StaticCodeLoader};
pub use context::PluginContext;
pub use dependency::PluginDependency;
pub use descriptor::PluginDescriptor;
pub use error::PluginSystemError;
pub use exports::{BoundFn, Export, ExportMap, RequireView};
pub use group::PluginGroup;
pub use identity::{Identifier, Identity, IdentityError};
pub use install::{
    DirectoryFetcher, Fetcher, InstallReport, InstalledPlugin, UninstallPolicy, UninstallReport,
    UninstalledPlugin,
};
pub use manager::{DiscoveryReport, PluginManager, PluginManagerBuilder};
pub use manifest::{ManifestBuilder, PluginManifest};
pub use plugin::{Plugin, PluginStatus};
pub use registry::PluginRegistry;
pub use version::{VersionError, VersionMatch, VersionRange};
// Test module declaration
#[cfg(test)]
mod tests;
