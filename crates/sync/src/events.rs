//! Synchronous event publication.

/// Receiver for the two events the synchronizer produces. Emission happens
/// inline from the synchronizer's task; handlers must not re-enter it.
pub trait ChainEventSink: Send + Sync {
    /// The chain tip moved (one block imported or reverted).
    fn new_height(&self);

    /// The coin set of `address` changed.
    fn touched_address(&self, address: &str);
}

#[derive(Default)]
pub struct Publisher {
    sinks: Vec<Box<dyn ChainEventSink>>,
}

impl Publisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, sink: Box<dyn ChainEventSink>) {
        self.sinks.push(sink);
    }

    pub fn emit_new_height(&self) {
        for sink in &self.sinks {
            sink.new_height();
        }
    }

    pub fn emit_touched_address(&self, address: &str) {
        for sink in &self.sinks {
            sink.touched_address(address);
        }
    }
}
