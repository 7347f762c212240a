//! Single-attempt upstream exchange: one datagram out on a fresh
//! ephemeral socket, one datagram in, validated against the block policy.
//! No connection state survives between attempts.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

use dsh_policy::{BlockPolicy, BlockReason};

use crate::MAX_UDP_PACKET;
use crate::packet::{self, AnswerIter, HEADER_LEN, Header, RecordType};

/// One entry in the ordered resolver list.
#[derive(Debug, Clone)]
pub struct Upstream {
    pub addr: SocketAddr,
    pub label: String,
}

impl Upstream {
    pub fn new(addr: SocketAddr, label: impl Into<String>) -> Self {
        Self {
            addr,
            label: label.into(),
        }
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.addr)
    }
}

/// Result of one upstream attempt. The engine's failover walk is a
/// deterministic switch over this type.
#[derive(Debug)]
pub enum Outcome {
    /// Well-formed reply with AN ≥ 1 whose A/AAAA literals all pass the
    /// block policy.
    Answered(Vec<u8>),
    /// Well-formed reply with AN = 0 ("this resolver does not know").
    Empty,
    /// Well-formed reply carrying at least one blocked literal.
    Blocked(BlockReason),
    /// No usable reply within the deadline (includes discarded packets
    /// with a wrong transaction ID or source, and socket errors).
    Timeout,
    /// Reply failed wire-format parsing.
    Malformed,
}

pub struct UpstreamResolver {
    policy: Arc<BlockPolicy>,
    timeout: Duration,
}

impl UpstreamResolver {
    pub fn new(policy: Arc<BlockPolicy>, timeout: Duration) -> Self {
        Self { policy, timeout }
    }

    /// Forward `query` verbatim to one upstream and classify the result.
    pub async fn resolve(&self, query: &[u8], upstream: &Upstream) -> Outcome {
        match self.exchange(query, upstream).await {
            Ok(Some(response)) => self.validate(response),
            Ok(None) => Outcome::Timeout,
            Err(e) => {
                debug!("socket error talking to {}: {}", upstream, e);
                Outcome::Timeout
            }
        }
    }

    /// One send/recv round trip. Returns None on deadline expiry or when
    /// the reply had to be discarded (wrong source or transaction ID).
    async fn exchange(
        &self,
        query: &[u8],
        upstream: &Upstream,
    ) -> std::io::Result<Option<Vec<u8>>> {
        let bind_addr: SocketAddr = if upstream.addr.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.send_to(query, upstream.addr).await?;

        let mut buf = vec![0u8; MAX_UDP_PACKET];
        let (len, src) = match timeout(self.timeout, socket.recv_from(&mut buf)).await {
            Ok(result) => result?,
            Err(_) => {
                debug!("{} timed out after {:?}", upstream, self.timeout);
                return Ok(None);
            }
        };
        buf.truncate(len);

        // RFC 5452: the reply must come from the address we queried and
        // echo our transaction ID, otherwise it is discarded.
        if src.ip() != upstream.addr.ip() {
            debug!("{}: reply from unexpected source {}", upstream, src.ip());
            return Ok(None);
        }
        if buf.len() >= 2 && query.len() >= 2 && buf[0..2] != query[0..2] {
            debug!("{}: transaction ID mismatch, discarding", upstream);
            return Ok(None);
        }

        Ok(Some(buf))
    }

    /// Classify a received reply. RDATA is inspected, never modified.
    fn validate(&self, response: Vec<u8>) -> Outcome {
        let header = match Header::parse(&response) {
            Ok(h) => h,
            Err(e) => {
                debug!("unparseable upstream reply: {}", e);
                return Outcome::Malformed;
            }
        };
        if !header.is_response() {
            return Outcome::Malformed;
        }
        if header.an_count == 0 {
            return Outcome::Empty;
        }

        let answers_start = match packet::skip_questions(&response, HEADER_LEN, header.qd_count) {
            Ok(offset) => offset,
            Err(e) => {
                debug!("bad question section in upstream reply: {}", e);
                return Outcome::Malformed;
            }
        };

        for record in AnswerIter::new(&response, answers_start, header.an_count) {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    debug!("bad answer record in upstream reply: {}", e);
                    return Outcome::Malformed;
                }
            };
            // An address record with the wrong RDLENGTH is not something
            // the policy can judge; reject the reply outright.
            match record.rtype {
                RecordType::A if record.rdata.len() != 4 => return Outcome::Malformed,
                RecordType::AAAA if record.rdata.len() != 16 => return Outcome::Malformed,
                _ => {}
            }
            if let Some(ip) = record.ip() {
                if let Some(reason) = self.policy.check(ip) {
                    return Outcome::Blocked(reason);
                }
            }
        }

        Outcome::Answered(response)
    }
}
