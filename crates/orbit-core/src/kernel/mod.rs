//! # Orbit Core Kernel
//!
//! The `kernel` module ties the plugin engine to a home directory and runs
//! it as a single unit.
//!
//! ## Key Responsibilities & Components:
//!
//! - **Application Bootstrapping**: [`Application`](bootstrap::Application) loads
//!   settings, builds the host plugin and the [`PluginManager`](crate::plugin_system::PluginManager),
//!   registers linked and installed plugins, and drives start/stop.
//! - **Component Lifecycle**: the [`KernelComponent`](component::KernelComponent) trait
//!   shared by anything the application initializes, starts and stops.
//! - **Core Constants**: names, file names and default directories in `constants`.
//! - **Error Handling**: kernel-level [`Error`](error::Error) and the `Result` alias.
pub mod bootstrap;
pub mod component;
pub mod constants;
pub mod error;

pub use bootstrap::{Application, ApplicationBuilder};
pub use component::KernelComponent;
pub use error::{Error, Result};
// Test module declaration
#[cfg(test)]
mod tests;
