//! Node inspection

use crate::error::Result;
use crate::job::ProvisioningJob;
use crate::orchestrator::Orchestrator;
use dirfleet_core::{Component, NodeId, TaskLogger};
use dirfleet_remote::{HostTarget, NodeSession};
use std::path::Path;

impl Orchestrator {
    /// Refresh a node's OS, layout and installed components from the host
    pub(crate) async fn run_inspect_node(
        &self,
        job: &mut ProvisioningJob,
        log: &TaskLogger,
        id: NodeId,
    ) -> Result<()> {
        let topology = self.topology().await?;
        let mut node = Self::require_node(&topology, id)?;

        job.advance(log, Some(id));
        let target = HostTarget::for_node(&node, &self.cluster);
        let host = self.open_host(&target, Some(id), log).await?;

        job.advance(log, Some(id));
        let os = host.detect_os().await?;
        log.success(Some(id), format!("OS type of {} is {}", node.hostname, os));
        node.os = Some(os);

        if host.path_exists(&self.cluster.container_root()).await? {
            node.containerized = true;
        } else if let Some(marker) = Component::Product.marker_path()
            && host.path_exists(&Path::new("/").join(marker)).await?
        {
            node.containerized = false;
        }

        job.advance(log, Some(id));
        let session = NodeSession::new(host, &node, &self.cluster)?;
        let detected = session.detect_components().await?;
        session.close().await?;

        let kept = node
            .installed_components
            .iter()
            .copied()
            .filter(|c| c.marker_path().is_none());
        node.installed_components = detected.into_iter().chain(kept).collect();
        self.commit(&node).await?;

        let names: Vec<_> = node.installed_components.iter().map(|c| c.as_str()).collect();
        log.info(
            Some(id),
            format!("Installed components on {}: {}", node.hostname, names.join(", ")),
        );
        Ok(())
    }
}
