mod supervisor;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use dsh_classify::{ClassifierConfig, ClassifierHandle, DomainClassifier};
use dsh_common::events::{DnsEvent, EventBus};
use dsh_common::{EnvConfig, StartupError};
use dsh_dns::cache::ResponseCache;
use dsh_dns::logging::QueryLogger;
use dsh_dns::upstream::{Upstream, UpstreamResolver};
use dsh_dns::{ForwarderConfig, ForwardingEngine};
use dsh_policy::BlockPolicy;
use dsh_system::{ResolverHandler, notify};
use supervisor::{Restart, keep_alive};

/// Config file layout: one JSON document holding each service's section.
#[derive(serde::Deserialize, Default)]
struct AppConfig {
    #[serde(default)]
    dns: ForwarderConfig,
    #[serde(default)]
    classifier: ClassifierConfig,
}

impl AppConfig {
    fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            info!("No config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dnshield=debug".parse().unwrap()),
        )
        .init();

    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(e.exit_code());
    }
}

/// Build a fatal configuration error, surfacing it on the event bus too.
fn config_error(events: &EventBus, message: String) -> StartupError {
    events.emit(DnsEvent::ConfigError {
        message: message.clone(),
    });
    StartupError::Config(message)
}

async fn run() -> Result<(), StartupError> {
    info!("dnshield starting...");

    let events = Arc::new(EventBus::new());

    // Desktop notifications
    {
        let events = events.clone();
        keep_alive("notifier", Restart::UpTo(3), move || {
            let rx = events.subscribe();
            async move {
                notify::run_notifier(rx).await;
                Ok::<(), anyhow::Error>(())
            }
        });
    }

    let env = EnvConfig::load(None);
    let config = AppConfig::load(&env.config_path)
        .map_err(|e| config_error(&events, format!("{:#}", e)))?;

    // ── Block policy ───────────────────────────────────────────────────

    let mut known_bad = Vec::with_capacity(config.dns.known_bad_ips.len());
    for literal in &config.dns.known_bad_ips {
        let ip: IpAddr = literal.parse().map_err(|_| {
            config_error(&events, format!("invalid blocked IP literal: {}", literal))
        })?;
        known_bad.push(ip);
    }
    let policy = Arc::new(BlockPolicy::with_known_bad(known_bad));

    // ── Upstream list: discovered primary, then configured fallbacks ───

    let mut fallbacks = Vec::with_capacity(config.dns.fallbacks.len());
    for entry in &config.dns.fallbacks {
        fallbacks.push(entry.to_upstream().map_err(|_| {
            config_error(&events, format!("invalid upstream literal: {}", entry.host))
        })?);
    }

    let os_handler = Arc::new(ResolverHandler::new());
    let primary = os_handler.primary_resolver().await;
    let mut upstreams = Vec::with_capacity(fallbacks.len() + 1);
    match primary {
        Some(addr) => {
            info!("Discovered system resolver: {}", addr);
            upstreams.push(Upstream::new(SocketAddr::new(addr, 53), "system-primary"));
        }
        None => {
            warn!("Could not discover the system resolver, using fallbacks only");
            if let Some(first) = fallbacks.first() {
                events.emit(DnsEvent::DnsChanged {
                    from: "unknown".to_string(),
                    to: first.label.clone(),
                });
            }
        }
    }
    upstreams.extend(fallbacks);
    if upstreams.is_empty() {
        return Err(config_error(
            &events,
            "no upstream resolvers configured".to_string(),
        ));
    }
    info!(
        "Upstreams: {}",
        upstreams
            .iter()
            .map(|u| u.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    // ── Engine assembly ────────────────────────────────────────────────

    let resolver = UpstreamResolver::new(
        policy,
        Duration::from_millis(config.dns.upstream_timeout_ms),
    );
    let cache = ResponseCache::new(
        config.dns.cache_size,
        Duration::from_secs(config.dns.cache_ttl_secs),
    );

    let mut engine = ForwardingEngine::new(upstreams, resolver, cache, events.clone());
    if config.classifier.enabled {
        let classifier =
            DomainClassifier::new(config.classifier.clone(), env.classifier_api_key.clone())
                .map_err(|e| config_error(&events, format!("classifier setup failed: {:#}", e)))?;
        engine = engine.with_classifier(ClassifierHandle::spawn(classifier, events.clone()));
    }
    if !config.dns.query_log_path.is_empty() {
        engine = engine.with_query_log(QueryLogger::new(&config.dns.query_log_path));
    }
    let engine = Arc::new(engine);

    // ── Listening socket ───────────────────────────────────────────────

    // Bind before touching the system DNS so a bind failure leaves the
    // host's settings untouched.
    let listen_addr = config.dns.listen_addr().map_err(|_| {
        config_error(
            &events,
            format!("invalid listen address: {}", config.dns.listen_address),
        )
    })?;
    let socket = Arc::new(dsh_dns::server::bind_udp(listen_addr).map_err(StartupError::Bind)?);

    // ── Point the OS at the proxy ──────────────────────────────────────

    if config.dns.rewrite_system_dns {
        let mut servers = vec![IpAddr::V4(Ipv4Addr::LOCALHOST)];
        if let Some(addr) = primary {
            servers.push(addr);
        }
        os_handler
            .set_resolver(&servers)
            .await
            .map_err(|e| StartupError::OsHandler(format!("{:#}", e)))?;
    }

    // ── Supervised DNS server ──────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let max_inflight = config.dns.max_inflight;
    let server_handle = {
        let engine = engine.clone();
        let socket = socket.clone();
        keep_alive("dns-udp", Restart::Always, move || {
            let engine = engine.clone();
            let socket = socket.clone();
            let shutdown = shutdown_rx.clone();
            async move { dsh_dns::server::run_udp_server(socket, engine, max_inflight, shutdown).await }
        })
    };

    // Cache purge (every 30s)
    {
        let engine = engine.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(30)).await;
                let purged = engine.cache().purge_expired().await;
                if purged > 0 {
                    info!("Purged {} expired DNS cache entries", purged);
                }
            }
        });
    }

    events.emit(DnsEvent::ServiceStarted {
        listen: listen_addr.to_string(),
    });
    info!("dnshield started successfully");
    info!("  DNS: listening on {}", listen_addr);
    info!(
        "  Cache: {} entries, {}s TTL",
        config.dns.cache_size, config.dns.cache_ttl_secs
    );
    info!(
        "  Classifier: {}",
        if config.classifier.enabled && env.classifier_api_key.is_some() {
            "enabled"
        } else {
            "disabled"
        }
    );

    // Wait for shutdown signal
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to wait for shutdown signal: {}", e);
    }
    info!("Shutting down...");

    // Stop accepting queries; the server drains in-flight workers within
    // its own grace period.
    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(Duration::from_secs(3), server_handle)
        .await
        .is_err()
    {
        warn!("DNS server did not stop within the shutdown deadline");
    }

    if config.dns.rewrite_system_dns {
        match os_handler.restore_resolver().await {
            Ok(()) => info!("System DNS restored"),
            Err(e) => warn!("Failed to restore system DNS: {:#}", e),
        }
    }

    events.emit(DnsEvent::ServiceStopped);
    // Give the notifier a moment to deliver the shutdown notice.
    tokio::time::sleep(Duration::from_millis(200)).await;

    info!("dnshield stopped");
    Ok(())
}
