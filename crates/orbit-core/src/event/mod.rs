//! # Orbit Core Event System
//!
//! Fire-and-forget notifications about plugin lifecycle, dependency
//! resolution and installation. The engine never reads them back; an
//! [`EventSink`] handed to the [`PluginManager`](crate::plugin_system::PluginManager)
//! at construction decides where they go.
//!
//! - **[`types`]**: [`PluginEvent`] and the [`Event`] naming trait.
//! - **[`sink`]**: the [`EventSink`] trait and stock sinks (discard, log,
//!   channel, fan-out).
pub mod sink;
pub mod types;

pub use sink::{ChannelSink, EventSink, LogSink, NoopSink, SinkSet};
pub use types::PluginEvent;

/// Anything that can be identified by a stable event name
pub trait Event {
    fn name(&self) -> &'static str;
}
