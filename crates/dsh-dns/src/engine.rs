//! Per-request coordinator: cache lookup, ordered upstream walk driven by
//! the attempt Outcome, answer caching, and observability events. A reply
//! of None means the datagram is dropped and the client retries on its
//! own timer; the proxy never synthesizes SERVFAIL or NXDOMAIN.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use dsh_classify::ClassifierHandle;
use dsh_common::events::{DnsEvent, EventBus};

use crate::cache::ResponseCache;
use crate::logging::QueryLogger;
use crate::packet::{Header, Question};
use crate::upstream::{Outcome, Upstream, UpstreamResolver};

pub struct ForwardingEngine {
    /// Ordered resolver list: the discovered primary first, then the
    /// configured fallbacks. Immutable for the process lifetime.
    upstreams: Vec<Upstream>,
    resolver: UpstreamResolver,
    cache: ResponseCache,
    events: Arc<EventBus>,
    classifier: Option<ClassifierHandle>,
    query_log: Option<QueryLogger>,
}

impl ForwardingEngine {
    pub fn new(
        upstreams: Vec<Upstream>,
        resolver: UpstreamResolver,
        cache: ResponseCache,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            upstreams,
            resolver,
            cache,
            events,
            classifier: None,
            query_log: None,
        }
    }

    pub fn with_classifier(mut self, handle: ClassifierHandle) -> Self {
        self.classifier = Some(handle);
        self
    }

    pub fn with_query_log(mut self, logger: QueryLogger) -> Self {
        self.query_log = Some(logger);
        self
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Process one client datagram. Returns the reply to transmit, or
    /// None when the packet is dropped.
    pub async fn handle(&self, query: &[u8], client: SocketAddr) -> Option<Vec<u8>> {
        let start = Instant::now();

        let header = match Header::parse(query) {
            Ok(h) => h,
            Err(e) => {
                debug!("dropping malformed packet from {}: {}", client, e);
                return None;
            }
        };
        if header.is_response() {
            debug!("dropping non-query packet from {}", client);
            return None;
        }
        let question = match Question::extract(query) {
            Ok(q) => q,
            Err(e) => {
                debug!("dropping unparseable query from {}: {}", client, e);
                return None;
            }
        };
        let qname = question.name.to_string().to_ascii_lowercase();
        let key = question.key();

        if let Some(mut reply) = self.cache.get(&key).await {
            // The stored template carries a redacted transaction ID.
            reply[0..2].copy_from_slice(&query[0..2]);
            debug!("resolved {} from cache", qname);
            self.log(&question, client, "cached", None, start);
            return Some(reply);
        }

        for (i, upstream) in self.upstreams.iter().enumerate() {
            match self.resolver.resolve(query, upstream).await {
                Outcome::Answered(response) => {
                    self.cache.set(key, &response).await;
                    if i > 0 {
                        self.events.emit(DnsEvent::DnsChanged {
                            from: self.upstreams[0].label.clone(),
                            to: upstream.label.clone(),
                        });
                        self.events.emit(DnsEvent::UpstreamFailoverUsed {
                            name: upstream.label.clone(),
                        });
                        // Fallback answers get an advisory content check;
                        // the reply does not wait for the verdict. The
                        // primary is the user's own resolver and is not
                        // second-guessed.
                        if let Some(classifier) = &self.classifier {
                            classifier.submit(qname.clone());
                        }
                    }
                    debug!("resolved {} via {}", qname, upstream);
                    self.log(&question, client, "answered", Some(&upstream.label), start);
                    return Some(response);
                }
                outcome => {
                    debug!("{} gave {:?} for {}, trying next", upstream, outcome, qname);
                }
            }
        }

        warn!("all upstreams failed for {}", qname);
        self.events.emit(DnsEvent::ResolutionFailed { qname });
        self.log(&question, client, "dropped", None, start);
        None
    }

    fn log(
        &self,
        question: &Question,
        client: SocketAddr,
        outcome: &str,
        upstream: Option<&str>,
        start: Instant,
    ) {
        if let Some(logger) = &self.query_log {
            logger.log(
                &question.name.to_string().to_ascii_lowercase(),
                &question.qtype.to_string(),
                &client.ip().to_string(),
                outcome,
                upstream,
                start.elapsed().as_millis() as u64,
            );
        }
    }
}
