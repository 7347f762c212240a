//! Fire-and-forget bridge between the forwarding engine and the
//! classifier. The engine submits domain names on a channel and moves on;
//! a background worker performs the slow HTTP call and raises an
//! InappropriateContent event when a domain is flagged.

use std::sync::Arc;

use rustc_hash::FxHashSet;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use dsh_common::events::{DnsEvent, EventBus};

use crate::classifier::{DomainClassifier, Verdict};

/// Cap on the remembered-domains set before it is reset.
const SEEN_LIMIT: usize = 4096;

#[derive(Clone)]
pub struct ClassifierHandle {
    sender: mpsc::UnboundedSender<String>,
}

impl ClassifierHandle {
    /// Spawn the background worker and return its submission handle.
    pub fn spawn(classifier: DomainClassifier, events: Arc<EventBus>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let mut seen: FxHashSet<String> = FxHashSet::default();
            while let Some(domain) = receiver.recv().await {
                if !seen.insert(domain.clone()) {
                    continue;
                }
                if seen.len() > SEEN_LIMIT {
                    seen.clear();
                }
                let result = classifier.classify(&domain).await;
                if result.verdict == Verdict::Inappropriate {
                    warn!(
                        "domain {} flagged as inappropriate ({}): {}",
                        domain, result.category, result.reason
                    );
                    events.emit(DnsEvent::InappropriateContent {
                        domain,
                        reason: result.reason,
                    });
                }
            }
        });

        Self { sender }
    }

    /// Build a handle around an existing channel, leaving the receiving
    /// side to the caller. Used by tests and custom sinks.
    pub fn from_sender(sender: mpsc::UnboundedSender<String>) -> Self {
        Self { sender }
    }

    /// Queue a domain for classification. Never blocks.
    pub fn submit(&self, domain: String) {
        if self.sender.send(domain).is_err() {
            debug!("classifier worker stopped, dropping submission");
        }
    }
}
