use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::event::types::PluginEvent;
use crate::event::Event;

/// Outbound notification channel injected into the manager
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PluginEvent);
}

impl<F> EventSink for F
where
    F: Fn(&PluginEvent) + Send + Sync,
{
    fn emit(&self, event: PluginEvent) {
        self(&event)
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: PluginEvent) {}
}

/// Writes every notification to the `log` facade at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: PluginEvent) {
        log::debug!(target: "orbit::event", "{}", event);
    }
}

/// Forwards notifications to every subscribed stream.
///
/// Subscribers whose stream was dropped are pruned on the next emit.
#[derive(Default)]
pub struct ChannelSink {
    senders: Mutex<Vec<UnboundedSender<PluginEvent>>>,
}

impl ChannelSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> UnboundedReceiverStream<PluginEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        UnboundedReceiverStream::new(rx)
    }

    pub fn subscriber_count(&self) -> usize {
        self.senders.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: PluginEvent) {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        senders.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl fmt::Debug for ChannelSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSink")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Fan-out over several sinks, in registration order
#[derive(Default, Clone)]
pub struct SinkSet {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for SinkSet {
    fn emit(&self, event: PluginEvent) {
        log::trace!("dispatching '{}' to {} sink(s)", event.name(), self.sinks.len());
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}
