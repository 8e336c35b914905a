//! Front proxy deployment

use crate::error::{PipelineError, Result};
use crate::job::ProvisioningJob;
use crate::orchestrator::Orchestrator;
use dirfleet_core::{
    Component, Configurator, Node, OsFamily, TaskLogger, Topology, merge_host_aliases,
    render_proxy_config,
};
use dirfleet_remote::{HostTarget, NodeSession, ServiceAction};
use std::path::Path;

const PROXY_BINARY: &str = "/usr/sbin/nginx";
const PROXY_SSL_DIR: &str = "/etc/nginx/ssl";
const PROXY_CONFIG_PATH: &str = "/etc/nginx/nginx.conf";
const PROXY_SERVICE: &str = "nginx";
const TLS_FILES: [&str; 2] = ["httpd.crt", "httpd.key"];
const HOSTS_PATH: &str = "/etc/hosts";

impl Orchestrator {
    pub(crate) async fn run_deploy_proxy(
        &self,
        job: &mut ProvisioningJob,
        log: &TaskLogger,
        update_host_aliases: bool,
    ) -> Result<()> {
        if self.cluster.external_load_balancer {
            return Err(PipelineError::Precondition(
                "An external load balancer is configured; nothing to deploy".to_string(),
            ));
        }
        let topology = self.topology().await?;
        let primary = Self::require_primary(&topology)?;
        if !primary.is_installed() {
            return Err(PipelineError::Precondition(format!(
                "Primary server {} is not installed",
                primary.hostname
            )));
        }

        job.advance(log, None);
        let proxy = self.open_proxy_session(log).await?;
        let proxy_host = proxy.node().hostname.clone();
        if proxy.host().path_exists(Path::new(PROXY_BINARY)).await? {
            log.debug(None, format!("nginx is already installed on {}", proxy_host));
        } else {
            if proxy.dialect().os().family() == OsFamily::RedHat {
                log.info(None, "Installing epel-release");
                proxy.ensure_package("epel-release").await?;
            }
            log.info(None, format!("Installing nginx on {}", proxy_host));
            proxy.ensure_package(PROXY_SERVICE).await?;
        }

        job.advance(log, None);
        proxy.host().ensure_dir(Path::new(PROXY_SSL_DIR)).await?;
        let primary_session = self.open_session(&primary, log).await?;
        for name in TLS_FILES {
            let content = primary_session
                .read_file(&format!("etc/certs/{}", name))
                .await?;
            proxy
                .host()
                .write_file(&Path::new(PROXY_SSL_DIR).join(name), &content)
                .await?;
            log.debug(None, format!("{} copied from primary server", name));
        }
        primary_session.close().await?;

        job.advance(log, None);
        let backends = Configurator::new(&topology, &self.cluster).proxy_backends(None);
        self.write_proxy_config(&proxy, &backends, log).await?;

        job.advance(log, None);
        if let Err(e) = proxy.control_service(PROXY_SERVICE, ServiceAction::Enable).await {
            log.debug(None, e.to_string());
        }
        proxy
            .control_service(PROXY_SERVICE, ServiceAction::Restart)
            .await?;
        proxy.close().await?;
        log.success(None, format!("nginx is running on {}", proxy_host));

        if update_host_aliases {
            self.update_host_aliases(&topology, log).await;
        }

        for node in topology.nodes().filter(|n| n.hostname == proxy_host) {
            let mut updated = node.clone();
            updated.installed_components.insert(Component::Proxy);
            self.commit(&updated).await?;
        }
        Ok(())
    }

    /// Session on the proxy host, which is not a managed node
    pub(crate) async fn open_proxy_session(&self, log: &TaskLogger) -> Result<NodeSession> {
        let Some(hostname) = self.cluster.load_balancer_host.clone() else {
            return Err(PipelineError::Precondition(
                "No load balancer host is configured".to_string(),
            ));
        };
        let target = HostTarget::new(&hostname)
            .with_ip(self.cluster.load_balancer_ip.clone())
            .with_user(&self.cluster.ssh_user);
        let host = self.open_host(&target, None, log).await?;
        let os = host.detect_os().await?;
        let ip = self.cluster.load_balancer_ip.clone().unwrap_or_default();
        let node = Node::new(0, hostname, ip)
            .with_os(os)
            .with_containerized(false);
        Ok(NodeSession::new(host, &node, &self.cluster)?)
    }

    /// Render the proxy configuration for `backends` and reload the proxy
    pub(crate) async fn push_proxy_config(&self, backends: &[&Node], log: &TaskLogger) -> Result<()> {
        let proxy = self.open_proxy_session(log).await?;
        self.write_proxy_config(&proxy, backends, log).await?;
        proxy
            .control_service(PROXY_SERVICE, ServiceAction::Restart)
            .await?;
        proxy.close().await?;
        Ok(())
    }

    async fn write_proxy_config(
        &self,
        proxy: &NodeSession,
        backends: &[&Node],
        log: &TaskLogger,
    ) -> Result<()> {
        let config = render_proxy_config(
            self.inputs.proxy_template.as_deref(),
            &proxy.node().hostname,
            backends,
        )?;
        proxy
            .host()
            .write_file(Path::new(PROXY_CONFIG_PATH), config.as_bytes())
            .await?;
        log.success(
            None,
            format!(
                "nginx.conf on {} lists {} backends",
                proxy.node().hostname,
                backends.len()
            ),
        );
        Ok(())
    }

    /// Merge fleet host aliases into every node's hosts table
    async fn update_host_aliases(&self, topology: &Topology, log: &TaskLogger) {
        let mut entries: Vec<(&str, &str)> = topology
            .nodes()
            .map(|n| (n.ip.as_str(), n.hostname.as_str()))
            .collect();
        if let (Some(host), Some(ip)) = (
            self.cluster.load_balancer_host.as_deref(),
            self.cluster.load_balancer_ip.as_deref(),
        ) {
            entries.push((ip, host));
        }

        for node in topology.nodes() {
            let result = async {
                let session = self.open_session(node, log).await?;
                let mut paths = vec![Path::new(HOSTS_PATH).to_path_buf()];
                if session.dialect().is_containerized() {
                    paths.push(session.host_path("etc/hosts"));
                }
                for path in paths {
                    let current = if session.host().path_exists(&path).await? {
                        session.host().read_to_string(&path).await?
                    } else {
                        String::new()
                    };
                    let merged = merge_host_aliases(&current, &entries);
                    if merged != current {
                        session.host().write_file(&path, merged.as_bytes()).await?;
                    }
                }
                session.close().await?;
                Ok::<_, PipelineError>(())
            }
            .await;
            match result {
                Ok(()) => log.success(
                    Some(node.id),
                    format!("Host aliases updated on {}", node.hostname),
                ),
                Err(e) => log.warning(
                    Some(node.id),
                    format!("Host aliases were not updated on {}: {}", node.hostname, e),
                ),
            }
        }
    }
}
