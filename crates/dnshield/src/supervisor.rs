//! Keeps this binary's two long-running services alive. While the proxy
//! runs, the host's DNS points at it, so a dead listener means no name
//! resolution at all: the DNS server restarts for as long as the process
//! lives. The desktop notifier is a convenience and is dropped after a
//! few failures rather than kept in a restart loop.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// What to do when a supervised service fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Restart {
    /// Restart indefinitely with a short, capped delay (dns-udp).
    Always,
    /// Retry at most this many consecutive times, ten seconds apart,
    /// then give the service up (notifier).
    UpTo(u32),
}

/// A service that ran for at least this long is considered to have been
/// healthy; its failure streak starts over.
const HEALTHY_RUN: Duration = Duration::from_secs(60);

/// Run `factory`'s future in its own task, restarting it per `restart`
/// whenever it fails or panics. Returning Ok(()) ends supervision.
pub fn keep_alive<F, Fut>(name: &'static str, restart: Restart, factory: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut failures: u32 = 0;

        loop {
            let started = Instant::now();
            // The extra task boundary contains panics inside the service.
            match tokio::spawn(factory()).await {
                Ok(Ok(())) => {
                    info!("{name} finished");
                    return;
                }
                Ok(Err(e)) => error!("{name} failed: {e:#}"),
                Err(join_error) => error!("{name} panicked: {join_error}"),
            }

            if started.elapsed() > HEALTHY_RUN {
                failures = 0;
            }
            failures = failures.saturating_add(1);

            let delay = match restart {
                Restart::Always => Duration::from_millis((100 * failures as u64).min(5_000)),
                Restart::UpTo(limit) => {
                    if failures > limit {
                        warn!("{name} failed {failures} times, giving it up");
                        return;
                    }
                    Duration::from_secs(10)
                }
            };
            warn!("restarting {name} in {delay:?} (failure {failures})");
            tokio::time::sleep(delay).await;
        }
    })
}
