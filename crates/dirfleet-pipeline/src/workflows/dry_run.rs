//! Port reachability diagnostics

use crate::error::Result;
use crate::job::ProvisioningJob;
use crate::orchestrator::Orchestrator;
use dirfleet_core::{NodeId, TaskLogger};
use dirfleet_remote::{HostTarget, PRODUCT_PORTS, PortProbe, RemoteHost};
use serde::Serialize;
use std::collections::BTreeMap;

/// Reachability seen from one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostPortReport {
    pub hostname: String,
    pub ssh: bool,
    pub ports: BTreeMap<u16, bool>,
}

impl HostPortReport {
    fn unreachable(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ssh: false,
            ports: BTreeMap::new(),
        }
    }

    pub fn open_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.ports.iter().filter(|(_, open)| **open).map(|(port, _)| *port)
    }
}

/// Port table for a node and, when configured, its proxy tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DryRunReport {
    pub node: HostPortReport,
    pub proxy: Option<HostPortReport>,
}

impl Orchestrator {
    pub(crate) async fn run_dry_run(
        &self,
        job: &mut ProvisioningJob,
        log: &TaskLogger,
        id: NodeId,
    ) -> Result<DryRunReport> {
        let topology = self.topology().await?;
        let node = Self::require_node(&topology, id)?;

        job.advance(log, Some(id));
        let target = HostTarget::for_node(&node, &self.cluster);
        let host = self.open_host(&target, Some(id), log).await?;
        log.success(Some(id), format!("SSH connection to {} succeeded", node.hostname));

        let mut local = HostPortReport {
            hostname: node.hostname.clone(),
            ssh: true,
            ports: BTreeMap::new(),
        };
        let probe = self.probe_from(&host);
        for port in PRODUCT_PORTS {
            let open = probe.probe_port(&node.ip, port).await?;
            log.debug(Some(id), format!("Port {} on {}: {}", port, node.ip, state(open)));
            local.ports.insert(port, open);
        }

        job.advance(log, Some(id));
        let proxy = match self.proxy_tier_target() {
            None => {
                log.info(Some(id), "No proxy tier configured, skipping remote probes");
                None
            }
            Some(target) => Some(self.probe_from_proxy(&target, &host, &node.ip, &local, log, id).await?),
        };
        host.close().await?;

        Ok(DryRunReport { node: local, proxy })
    }

    fn probe_from<'a>(&self, host: &'a RemoteHost) -> PortProbe<'a> {
        PortProbe::new(host)
            .with_attempts(self.options.probe_attempts)
            .with_interval(self.options.probe_interval)
    }

    /// The proxy host, or the cache host behind an external balancer
    fn proxy_tier_target(&self) -> Option<HostTarget> {
        let (host, ip) = if self.cluster.external_load_balancer {
            (&self.cluster.cache_host, &self.cluster.cache_ip)
        } else {
            (&self.cluster.load_balancer_host, &self.cluster.load_balancer_ip)
        };
        host.as_ref().map(|h| {
            HostTarget::new(h)
                .with_ip(ip.clone())
                .with_user(&self.cluster.ssh_user)
        })
    }

    async fn probe_from_proxy(
        &self,
        target: &HostTarget,
        node_host: &RemoteHost,
        node_ip: &str,
        local: &HostPortReport,
        log: &TaskLogger,
        id: NodeId,
    ) -> Result<HostPortReport> {
        let proxy = match self.open_host(target, None, log).await {
            Ok(proxy) => proxy,
            Err(e) => {
                log.warning(
                    Some(id),
                    format!("Cannot reach {} for remote probes: {}", target.hostname, e),
                );
                return Ok(HostPortReport::unreachable(&target.hostname));
            }
        };

        let mut report = HostPortReport {
            hostname: target.hostname.clone(),
            ssh: true,
            ports: BTreeMap::new(),
        };
        let probe = self.probe_from(&proxy);
        for port in PRODUCT_PORTS {
            let open = if local.ports.get(&port).copied().unwrap_or(false) {
                probe.wait_for_port(node_ip, port).await?
            } else {
                probe.probe_with_listener(node_host, node_ip, port).await?
            };
            let message = format!(
                "Port {} on {} from {}: {}",
                port, node_ip, target.hostname, state(open)
            );
            if open {
                log.success(Some(id), message);
            } else {
                log.warning(Some(id), message);
            }
            report.ports.insert(port, open);
        }
        proxy.close().await?;
        Ok(report)
    }
}

fn state(open: bool) -> &'static str {
    if open { "open" } else { "closed" }
}
