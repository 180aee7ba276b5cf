use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

pub const EVENT_ACCEPT: &str = "netboot.accept";
pub const EVENT_REVOKE: &str = "netboot.revoke";
pub const EVENT_COMMAND_SET: &str = "netboot.command_set";
pub const EVENT_COMMAND_UNSET: &str = "netboot.command_unset";
pub const EVENT_COMMAND_LOG: &str = "netboot.command_log";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GatewayEvent {
    pub event: String,
    pub seq: u64,
    pub payload: Value,
}

/// Receives notifications produced by handlers and background tasks.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &str, payload: Value);
}

/// Fan-out of gateway events to every connected subscriber.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<GatewayEvent>,
    seq: Arc<AtomicU64>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: &str, payload: Value) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        // No subscribers is not an error: nobody is listening yet.
        let _ = self.sender.send(GatewayEvent {
            event: event.to_owned(),
            seq,
            payload,
        });
    }
}
