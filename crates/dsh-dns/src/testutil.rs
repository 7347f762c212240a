//! Packet builders and scripted upstreams shared by the module tests.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::net::UdpSocket;

use crate::packet::encode_name;

/// Build a query packet with one question (IN class, RD set).
pub fn build_query(txid: u16, name: &str, qtype: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(&txid.to_be_bytes());
    buf.extend_from_slice(&[0x01, 0x00]); // RD
    buf.extend_from_slice(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    encode_name(name, &mut buf);
    buf.extend_from_slice(&qtype.to_be_bytes());
    buf.extend_from_slice(&[0x00, 0x01]); // IN
    buf
}

/// Build a response to `query` answering with the given address literals
/// (A or AAAA records chosen per literal, TTL 300, name compressed to the
/// question name).
pub fn build_response(query: &[u8], addrs: &[&str]) -> Vec<u8> {
    let mut buf = query.to_vec();
    buf[2] = 0x81; // QR + RD
    buf[3] = 0x80; // RA
    buf[6] = (addrs.len() >> 8) as u8;
    buf[7] = addrs.len() as u8;

    for addr in addrs {
        let ip: IpAddr = addr.parse().unwrap();
        buf.extend_from_slice(&[0xC0, 0x0C]); // pointer to question name
        match ip {
            IpAddr::V4(v4) => {
                buf.extend_from_slice(&1u16.to_be_bytes());
                buf.extend_from_slice(&1u16.to_be_bytes());
                buf.extend_from_slice(&300u32.to_be_bytes());
                buf.extend_from_slice(&4u16.to_be_bytes());
                buf.extend_from_slice(&v4.octets());
            }
            IpAddr::V6(v6) => {
                buf.extend_from_slice(&28u16.to_be_bytes());
                buf.extend_from_slice(&1u16.to_be_bytes());
                buf.extend_from_slice(&300u32.to_be_bytes());
                buf.extend_from_slice(&16u16.to_be_bytes());
                buf.extend_from_slice(&v6.octets());
            }
        }
    }
    buf
}

/// Build an AN=0 response to `query` (NOERROR).
pub fn build_empty_response(query: &[u8]) -> Vec<u8> {
    let mut buf = query.to_vec();
    buf[2] = 0x81;
    buf[3] = 0x80;
    buf[6] = 0;
    buf[7] = 0;
    buf
}

/// What a scripted upstream does with one received query.
#[derive(Clone)]
pub enum FakeBehavior {
    /// Answer with these address literals.
    Answer(Vec<&'static str>),
    /// Answer with AN=0.
    Empty,
    /// Never reply.
    Silent,
    /// Reply with a truncated garbage packet (correct transaction ID so
    /// it is not discarded before parsing).
    Garbage,
    /// Reply with the answer but a corrupted transaction ID.
    WrongTxid(Vec<&'static str>),
}

/// Bind a scripted upstream on the loopback interface. Returns its
/// address and a counter of received queries. Behaviors are applied in
/// order; the last one repeats.
pub async fn spawn_fake_upstream(behaviors: Vec<FakeBehavior>) -> (SocketAddr, Arc<AtomicUsize>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_task = hits.clone();

    tokio::spawn(async move {
        let mut buf = [0u8; crate::MAX_UDP_PACKET];
        loop {
            let Ok((len, src)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let n = hits_task.fetch_add(1, Ordering::SeqCst);
            let query = buf[..len].to_vec();
            let behavior = behaviors
                .get(n)
                .or_else(|| behaviors.last())
                .cloned()
                .unwrap_or(FakeBehavior::Silent);
            let reply = match behavior {
                FakeBehavior::Answer(addrs) => Some(build_response(&query, &addrs)),
                FakeBehavior::Empty => Some(build_empty_response(&query)),
                FakeBehavior::Silent => None,
                FakeBehavior::Garbage => {
                    let mut reply = query[..2.min(query.len())].to_vec();
                    reply.extend_from_slice(&[0xDE, 0xAD, 0xBE]);
                    Some(reply)
                }
                FakeBehavior::WrongTxid(addrs) => {
                    let mut response = build_response(&query, &addrs);
                    response[0] ^= 0xFF;
                    Some(response)
                }
            };
            if let Some(reply) = reply {
                let _ = socket.send_to(&reply, src).await;
            }
        }
    });

    (addr, hits)
}
