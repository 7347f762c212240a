use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Notification events emitted by the forwarding engine and its
/// collaborators. Subscribers (desktop notifier, tests) may come and go;
/// events sent with no receiver are dropped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum DnsEvent {
    ServiceStarted { listen: String },
    ServiceStopped,
    /// Answer came from a different resolver than the system primary.
    DnsChanged { from: String, to: String },
    /// Every upstream failed for this query; no reply was sent.
    ResolutionFailed { qname: String },
    UpstreamFailoverUsed { name: String },
    /// The content classifier flagged a resolved domain.
    InappropriateContent { domain: String, reason: String },
    ConfigError { message: String },
}

/// Broadcast bus connecting the engine to observers.
pub struct EventBus {
    sender: broadcast::Sender<DnsEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(64).0,
        }
    }

    pub fn emit(&self, event: DnsEvent) {
        // No receivers is fine; notifications are best-effort.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DnsEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
