//! OS resolver handler: discovers the system's configured DNS server,
//! points the OS at the proxy, and restores the previous settings on
//! shutdown. All edits are remembered in-process; restore is a no-op if
//! set_resolver never ran.

use std::net::IpAddr;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::info;

pub struct ResolverHandler {
    previous: Mutex<Option<platform::Snapshot>>,
}

impl ResolverHandler {
    pub fn new() -> Self {
        Self {
            previous: Mutex::new(None),
        }
    }

    /// The system's currently configured resolver, if one can be found.
    /// Loopback entries are skipped so the proxy never forwards to itself.
    pub async fn primary_resolver(&self) -> Option<IpAddr> {
        platform::discover().await
    }

    /// Point the OS at the given servers, remembering what was replaced.
    pub async fn set_resolver(&self, servers: &[IpAddr]) -> Result<()> {
        let snapshot = platform::set(servers).await?;
        *self.previous.lock().await = Some(snapshot);
        info!(
            "System DNS set to {}",
            servers
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(())
    }

    /// Undo set_resolver. Safe to call on every exit path.
    pub async fn restore_resolver(&self) -> Result<()> {
        match self.previous.lock().await.take() {
            Some(snapshot) => platform::restore(snapshot).await,
            None => Ok(()),
        }
    }
}

impl Default for ResolverHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
mod platform {
    use super::*;
    use anyhow::Context;

    const RESOLV_CONF: &str = "/etc/resolv.conf";

    pub(super) struct Snapshot {
        resolv_conf: String,
    }

    pub(super) async fn discover() -> Option<IpAddr> {
        let contents = tokio::fs::read_to_string(RESOLV_CONF).await.ok()?;
        parse_resolv_conf(&contents)
    }

    pub(super) fn parse_resolv_conf(contents: &str) -> Option<IpAddr> {
        for line in contents.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 2 && parts[0] == "nameserver" {
                if let Ok(ip) = parts[1].parse::<IpAddr>() {
                    if !ip.is_loopback() {
                        return Some(ip);
                    }
                }
            }
        }
        None
    }

    pub(super) async fn set(servers: &[IpAddr]) -> Result<Snapshot> {
        let previous = tokio::fs::read_to_string(RESOLV_CONF)
            .await
            .unwrap_or_default();
        let mut contents = String::new();
        for server in servers {
            contents.push_str(&format!("nameserver {}\n", server));
        }
        tokio::fs::write(RESOLV_CONF, contents)
            .await
            .with_context(|| format!("writing {}", RESOLV_CONF))?;
        Ok(Snapshot {
            resolv_conf: previous,
        })
    }

    pub(super) async fn restore(snapshot: Snapshot) -> Result<()> {
        if snapshot.resolv_conf.is_empty() {
            return Ok(());
        }
        tokio::fs::write(RESOLV_CONF, snapshot.resolv_conf)
            .await
            .context("restoring resolv.conf")?;
        Ok(())
    }

}

#[cfg(target_os = "macos")]
mod platform {
    use super::*;
    use crate::exec::run_command;

    pub(super) struct Snapshot {
        /// (network service, servers it had; empty = DHCP-provided)
        services: Vec<(String, Vec<String>)>,
    }

    pub(super) async fn discover() -> Option<IpAddr> {
        let output = run_command("scutil", &["--dns"]).await.ok()?;
        parse_scutil_dns(&output)
    }

    pub(super) fn parse_scutil_dns(output: &str) -> Option<IpAddr> {
        for line in output.lines() {
            let line = line.trim();
            if line.starts_with("nameserver[") {
                if let Some((_, addr)) = line.split_once(" : ") {
                    if let Ok(ip) = addr.trim().parse::<IpAddr>() {
                        if !ip.is_loopback() {
                            return Some(ip);
                        }
                    }
                }
            }
        }
        None
    }

    async fn network_services() -> Result<Vec<String>> {
        let output = run_command("networksetup", &["-listallnetworkservices"]).await?;
        Ok(output
            .lines()
            .skip(1) // banner line
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('*')) // '*' marks disabled
            .map(str::to_string)
            .collect())
    }

    async fn current_servers(service: &str) -> Vec<String> {
        match run_command("networksetup", &["-getdnsservers", service]).await {
            Ok(output) => output
                .lines()
                .filter_map(|l| l.trim().parse::<IpAddr>().ok().map(|ip| ip.to_string()))
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    pub(super) async fn set(servers: &[IpAddr]) -> Result<Snapshot> {
        let mut snapshot = Snapshot {
            services: Vec::new(),
        };
        let addrs: Vec<String> = servers.iter().map(|s| s.to_string()).collect();
        for service in network_services().await? {
            let previous = current_servers(&service).await;
            let mut args = vec!["-setdnsservers", service.as_str()];
            args.extend(addrs.iter().map(|a| a.as_str()));
            run_command("networksetup", &args).await?;
            snapshot.services.push((service, previous));
        }
        Ok(snapshot)
    }

    pub(super) async fn restore(snapshot: Snapshot) -> Result<()> {
        for (service, servers) in snapshot.services {
            let mut args = vec!["-setdnsservers", service.as_str()];
            if servers.is_empty() {
                // "Empty" reverts the service to DHCP-provided DNS.
                args.push("Empty");
            } else {
                args.extend(servers.iter().map(|s| s.as_str()));
            }
            run_command("networksetup", &args).await?;
        }
        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_parse_scutil_dns() {
            let output = "DNS configuration\n\nresolver #1\n  nameserver[0] : 192.168.1.1\n  nameserver[1] : 8.8.8.8\n";
            assert_eq!(
                parse_scutil_dns(output),
                Some("192.168.1.1".parse().unwrap())
            );
        }
    }
}

#[cfg(target_os = "windows")]
mod platform {
    use super::*;
    use crate::exec::run_command;

    pub(super) struct Snapshot {
        /// Interfaces switched to a static DNS entry; restore reverts
        /// them to DHCP-provided DNS.
        interfaces: Vec<String>,
    }

    pub(super) async fn discover() -> Option<IpAddr> {
        let output = run_command("ipconfig", &["/all"]).await.ok()?;
        parse_ipconfig_dns(&output)
    }

    pub(super) fn parse_ipconfig_dns(output: &str) -> Option<IpAddr> {
        let lines: Vec<&str> = output.lines().collect();
        for (i, line) in lines.iter().enumerate() {
            if !line.contains("DNS Servers") {
                continue;
            }
            // The first server follows the colon; more may continue on
            // the indented lines below.
            for candidate in lines[i..].iter().take(4) {
                let tail = candidate.rsplit(':').next().unwrap_or("");
                if let Ok(ip) = tail.trim().parse::<IpAddr>() {
                    if !ip.is_loopback() {
                        return Some(ip);
                    }
                }
            }
        }
        None
    }

    pub(super) fn parse_active_interfaces(output: &str) -> Vec<String> {
        let mut interfaces = Vec::new();
        let mut current: Option<String> = None;
        for line in output.lines() {
            if line.to_lowercase().contains("adapter") && line.trim_end().ends_with(':') {
                let name = line
                    .trim_end()
                    .trim_end_matches(':')
                    .rsplit("adapter ")
                    .next()
                    .unwrap_or("")
                    .to_string();
                current = if name.is_empty() { None } else { Some(name) };
            } else if line.contains("IPv4") {
                if let Some(name) = current.take() {
                    interfaces.push(name);
                }
            }
        }
        interfaces
    }

    pub(super) async fn set(servers: &[IpAddr]) -> Result<Snapshot> {
        let Some(first) = servers.first() else {
            anyhow::bail!("no DNS servers given");
        };
        let output = run_command("ipconfig", &[]).await?;
        let interfaces = parse_active_interfaces(&output);
        if interfaces.is_empty() {
            anyhow::bail!("no active network interface found");
        }
        let addr = first.to_string();
        for interface in &interfaces {
            let name_arg = format!("name={}", interface);
            let addr_arg = format!("addr={}", addr);
            run_command(
                "netsh",
                &[
                    "interface",
                    "ip",
                    "set",
                    "dns",
                    &name_arg,
                    "source=static",
                    &addr_arg,
                ],
            )
            .await?;
        }
        Ok(Snapshot { interfaces })
    }

    pub(super) async fn restore(snapshot: Snapshot) -> Result<()> {
        for interface in snapshot.interfaces {
            let name_arg = format!("name={}", interface);
            run_command(
                "netsh",
                &["interface", "ip", "set", "dns", &name_arg, "source=dhcp"],
            )
            .await?;
        }
        Ok(())
    }

}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
mod platform {
    use super::*;

    pub(super) struct Snapshot;

    pub(super) async fn discover() -> Option<IpAddr> {
        None
    }

    pub(super) async fn set(_servers: &[IpAddr]) -> Result<Snapshot> {
        anyhow::bail!("resolver rewriting is not supported on this platform")
    }

    pub(super) async fn restore(_snapshot: Snapshot) -> Result<()> {
        Ok(())
    }
}
