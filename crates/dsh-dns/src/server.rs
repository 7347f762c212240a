//! UDP listener: receives datagrams up to the 512-byte DNS limit and
//! hands each one to a bounded pool of engine workers. Replies are sent
//! on the shared listening socket, which is safe for UDP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::MAX_UDP_PACKET;
use crate::engine::ForwardingEngine;

/// How long in-flight queries may keep running after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Bind the listening socket with address reuse enabled.
pub fn bind_udp(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

/// Run the accept loop until the shutdown signal fires, then drain
/// in-flight workers within the grace period. Worker panics are isolated
/// from the listener and from each other.
pub async fn run_udp_server(
    socket: Arc<UdpSocket>,
    engine: Arc<ForwardingEngine>,
    max_inflight: usize,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let local = socket
        .local_addr()
        .context("listening socket has no local address")?;
    info!("DNS UDP server listening on {}", local);

    let limiter = Arc::new(Semaphore::new(max_inflight));
    let mut workers: JoinSet<()> = JoinSet::new();
    let mut buf = [0u8; MAX_UDP_PACKET];

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, src) = match received {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("UDP recv error: {}", e);
                        continue;
                    }
                };
                let Ok(permit) = limiter.clone().try_acquire_owned() else {
                    debug!("worker limit reached, dropping datagram from {}", src);
                    continue;
                };
                let packet = buf[..len].to_vec();
                let engine = engine.clone();
                let socket = socket.clone();
                workers.spawn(async move {
                    let _permit = permit;
                    if let Some(reply) = engine.handle(&packet, src).await {
                        if let Err(e) = socket.send_to(&reply, src).await {
                            debug!("failed to send reply to {}: {}", src, e);
                        }
                    }
                });
            }
            _ = shutdown.changed() => break,
            Some(result) = workers.join_next(), if !workers.is_empty() => {
                if let Err(e) = result {
                    if e.is_panic() {
                        warn!("query worker panicked: {}", e);
                    }
                }
            }
        }
    }

    if !workers.is_empty() {
        info!("draining {} in-flight queries", workers.len());
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while let Some(result) = workers.join_next().await {
                if let Err(e) = result {
                    if e.is_panic() {
                        warn!("query worker panicked: {}", e);
                    }
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!("shutdown grace expired, aborting {} workers", workers.len());
            workers.shutdown().await;
        }
    }

    info!("DNS UDP server stopped");
    Ok(())
}
