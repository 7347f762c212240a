//! Desktop notification sink: subscribes to the event bus and renders a
//! subset of events as OS notifications. Delivery is best-effort; a
//! missing notification tool only produces a log line.

use tokio::sync::broadcast;
use tracing::{debug, info};

use dsh_common::events::DnsEvent;

pub async fn run_notifier(mut events: broadcast::Receiver<DnsEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Some((title, body)) = render_event(&event) {
                    deliver(title, &body).await;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("notifier lagged, skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Events worth interrupting the user for. Failover noise and per-query
/// failures stay in the logs.
fn render_event(event: &DnsEvent) -> Option<(&'static str, String)> {
    match event {
        DnsEvent::ServiceStarted { listen } => {
            Some(("DNS Shield", format!("Protection active on {}", listen)))
        }
        DnsEvent::ServiceStopped => Some((
            "DNS Shield",
            "Protection stopped, system DNS restored".to_string(),
        )),
        DnsEvent::DnsChanged { from, to } => Some((
            "DNS Server Changed",
            format!("DNS server changed from {} to {}", from, to),
        )),
        DnsEvent::InappropriateContent { domain, reason } => Some((
            "Unsafe Site Detected",
            format!("Domain: {}\n{}", domain, reason),
        )),
        DnsEvent::ConfigError { message } => Some(("DNS Shield Error", message.clone())),
        DnsEvent::ResolutionFailed { .. } | DnsEvent::UpstreamFailoverUsed { .. } => None,
    }
}

#[cfg(target_os = "linux")]
async fn deliver(title: &str, body: &str) {
    if let Err(e) = crate::exec::run_command("notify-send", &[title, body]).await {
        debug!("desktop notification failed: {:#}", e);
        info!("{}: {}", title, body);
    }
}

#[cfg(target_os = "macos")]
async fn deliver(title: &str, body: &str) {
    let script = format!(
        "display notification \"{}\" with title \"{}\"",
        body.replace('"', "'"),
        title.replace('"', "'")
    );
    if let Err(e) = crate::exec::run_command("osascript", &["-e", &script]).await {
        debug!("desktop notification failed: {:#}", e);
        info!("{}: {}", title, body);
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
async fn deliver(title: &str, body: &str) {
    info!("{}: {}", title, body);
}
