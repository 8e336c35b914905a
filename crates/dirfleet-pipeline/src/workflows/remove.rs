//! Node removal

use crate::error::{PipelineError, Result};
use crate::job::ProvisioningJob;
use crate::orchestrator::{Orchestrator, store_error};
use crate::workflows::file_sync::SYNC_CONFIG_PATH;
use crate::workflows::first_failure;
use dirfleet_core::{Component, Configurator, NodeId, TaskLogger};

impl Orchestrator {
    /// Take a node out of the fleet
    ///
    /// Replication is disabled through the primary first. File sync and proxy
    /// configuration are rewritten without the node, the survivors are
    /// restarted, and the record is deleted only when all of that worked.
    pub(crate) async fn run_remove_node(
        &self,
        job: &mut ProvisioningJob,
        log: &TaskLogger,
        id: NodeId,
    ) -> Result<()> {
        let topology = self.topology().await?;
        let node = Self::require_node(&topology, id)?;
        if node.is_primary && topology.len() > 1 {
            return Err(PipelineError::InvariantViolation(format!(
                "{} is the primary server; designate another primary before removing it",
                node.hostname
            )));
        }

        job.advance(log, Some(id));
        let mut failures = Vec::new();
        if node.replication_enabled {
            self.disable_on_primary(id, log).await?;
            failures.extend(self.push_peer_lists(&self.topology().await?, log).await);
        } else {
            log.debug(
                Some(id),
                format!("Replication is not enabled on {}", node.hostname),
            );
        }

        job.advance(log, Some(id));
        let remaining = self.topology().await?.without(id);
        let configurator = Configurator::new(&remaining, &self.cluster);

        if node.has_component(Component::FileSync) {
            let config = self.render_sync_config(&remaining, Some(node.hostname.as_str()))?;
            for member in remaining
                .nodes()
                .filter(|n| n.has_component(Component::FileSync))
            {
                let result = async {
                    let session = self.open_session(member, log).await?;
                    session
                        .write_file(SYNC_CONFIG_PATH, config.as_bytes())
                        .await?;
                    session.close().await?;
                    Ok::<_, PipelineError>(())
                }
                .await;
                match result {
                    Ok(()) => log.success(
                        Some(member.id),
                        format!("csync2.cfg on {} no longer lists {}", member.hostname, node.hostname),
                    ),
                    Err(e) => {
                        log.warning(Some(member.id), e.to_string());
                        failures.push((member.id, e));
                    }
                }
            }
        }

        if !self.cluster.external_load_balancer && self.cluster.load_balancer_host.is_some() {
            let backends = configurator.proxy_backends(None);
            if let Err(e) = self.push_proxy_config(&backends, log).await {
                log.warning(Some(id), format!("Proxy configuration was not updated: {}", e));
                failures.push((id, e));
            }
        }

        job.advance(log, Some(id));
        let survivors: Vec<_> = remaining.nodes().filter(|n| n.is_installed()).collect();
        failures.extend(self.restart_products(&survivors, log).await);

        job.advance(log, Some(id));
        if !failures.is_empty() {
            log.warning(
                Some(id),
                format!("Record of {} was kept because some steps failed", node.hostname),
            );
            return first_failure(failures);
        }
        self.store.delete_node(id).await.map_err(store_error)?;
        log.success(Some(id), format!("{} was removed from the fleet", node.hostname));
        Ok(())
    }
}
