//! # Orbit Core Storage
//!
//! Settings and per-plugin directories.
//!
//! - **[`config`]**: the settings file in the home directory ([`Settings`]),
//!   the directory layout ([`Environment`]), placeholder substitution and the
//!   per-plugin [`Preferences`] lookup.
//! - **[`workspace`]**: [`ScopedDir`], a lazily created directory owned by a
//!   single plugin.
pub mod config;
pub mod workspace;

pub use config::{ConfigFormat, Environment, PreferenceStore, Preferences, Settings};
pub use workspace::ScopedDir;
