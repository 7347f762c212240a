use std::net::{AddrParseError, IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::upstream::Upstream;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    #[serde(default = "default_dns_port")]
    pub port: u16,
    /// Ordered retry list tried after the discovered primary.
    #[serde(default = "default_fallbacks")]
    pub fallbacks: Vec<UpstreamEntry>,
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_ms: u64,
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// Soft cap on simultaneous query workers (and thus ephemeral sockets).
    #[serde(default = "default_max_inflight")]
    pub max_inflight: usize,
    /// Extra literals for the block policy's known-bad set.
    #[serde(default = "default_known_bad_ips")]
    pub known_bad_ips: Vec<String>,
    #[serde(default)]
    pub query_log_path: String,
    /// Point the OS at this proxy on startup and restore on shutdown.
    #[serde(default = "default_true")]
    pub rewrite_system_dns: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamEntry {
    pub host: String,
    #[serde(default = "default_dns_port")]
    pub port: u16,
    pub label: String,
}

impl UpstreamEntry {
    pub fn to_upstream(&self) -> Result<Upstream, AddrParseError> {
        let ip: IpAddr = self.host.parse()?;
        Ok(Upstream::new(SocketAddr::new(ip, self.port), self.label.clone()))
    }
}

impl ForwarderConfig {
    pub fn listen_addr(&self) -> Result<SocketAddr, AddrParseError> {
        // IPv6 addresses need brackets: [addr]:port
        if self.listen_address.contains(':') {
            format!("[{}]:{}", self.listen_address, self.port).parse()
        } else {
            format!("{}:{}", self.listen_address, self.port).parse()
        }
    }
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}
fn default_dns_port() -> u16 {
    53
}
fn default_fallbacks() -> Vec<UpstreamEntry> {
    [
        ("8.8.8.8", "google-a"),
        ("8.8.4.4", "google-b"),
        ("1.1.1.1", "cloudflare-a"),
        ("1.0.0.1", "cloudflare-b"),
    ]
    .iter()
    .map(|(host, label)| UpstreamEntry {
        host: host.to_string(),
        port: 53,
        label: label.to_string(),
    })
    .collect()
}
fn default_upstream_timeout() -> u64 {
    5000
}
fn default_cache_size() -> usize {
    1000
}
fn default_cache_ttl() -> u64 {
    300
}
fn default_max_inflight() -> usize {
    1024
}
fn default_known_bad_ips() -> Vec<String> {
    // CPE addresses and ISP redirect targets commonly returned for
    // unresolvable names.
    vec![
        "192.168.0.1".to_string(),
        "192.168.1.1".to_string(),
        "203.98.7.65".to_string(),
    ]
}
fn default_true() -> bool {
    true
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        serde_json::from_str("{}").unwrap()
    }
}
