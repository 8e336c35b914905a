//! Pipeline workflows
//!
//! Each workflow is an `impl Orchestrator` block. Steps run strictly in
//! order, one node at a time; node flags are committed as soon as the step
//! that changes them succeeds.

pub mod dry_run;
pub(crate) mod file_sync;
pub(crate) mod inspect;
pub(crate) mod install;
pub(crate) mod proxy;
pub(crate) mod remove;
pub mod replication;

use crate::error::{PipelineError, Result};
use crate::orchestrator::Orchestrator;
use dirfleet_core::{
    Configurator, LogLevel, Node, NodeId, PEER_PROPERTIES_PATH, TaskLogger, Topology,
    rewrite_peer_properties,
};
use dirfleet_remote::{NodeSession, ServiceAction, StderrAllowList};

impl Orchestrator {
    /// Rewrite the peer list of one member
    pub(crate) async fn push_peer_list(
        &self,
        session: &NodeSession,
        endpoints: &[String],
        log: &TaskLogger,
    ) -> Result<()> {
        let node = session.node();
        let current = session.read_to_string(PEER_PROPERTIES_PATH).await?;
        let updated = rewrite_peer_properties(&current, endpoints);
        session
            .write_file(PEER_PROPERTIES_PATH, updated.as_bytes())
            .await?;
        log.success(
            Some(node.id),
            format!(
                "ox-ldap.properties file on {} modified to include all providers",
                node.hostname
            ),
        );
        Ok(())
    }

    /// Push recomputed peer lists to every active member
    ///
    /// Failures are logged per member and returned; the caller decides
    /// whether they end the pipeline.
    pub(crate) async fn push_peer_lists(
        &self,
        topology: &Topology,
        log: &TaskLogger,
    ) -> Vec<(NodeId, PipelineError)> {
        let configurator = Configurator::new(topology, &self.cluster);
        let mut failures = Vec::new();

        for (id, endpoints) in configurator.peer_map() {
            let Some(member) = topology.get(id) else {
                continue;
            };
            let result = async {
                let session = self.open_session(member, log).await?;
                self.push_peer_list(&session, &endpoints, log).await?;
                session.close().await?;
                Ok::<_, PipelineError>(())
            }
            .await;

            if let Err(e) = result {
                log.warning(
                    Some(id),
                    format!(
                        "ox-ldap.properties file on {} was not modified to include all providers: {}",
                        member.hostname, e
                    ),
                );
                failures.push((id, e));
            }
        }
        failures
    }

    /// Restart the product on each node; failures are logged and returned
    pub(crate) async fn restart_products(
        &self,
        nodes: &[&Node],
        log: &TaskLogger,
    ) -> Vec<(NodeId, PipelineError)> {
        let mut failures = Vec::new();
        for node in nodes {
            log.info(
                Some(node.id),
                format!("Restarting {} on {}", self.cluster.product_package(), node.hostname),
            );
            let result = async {
                let session = self.open_session(node, log).await?;
                session
                    .control_product(&self.cluster, ServiceAction::Restart)
                    .await?;
                session.close().await?;
                Ok::<_, PipelineError>(())
            }
            .await;

            if let Err(e) = result {
                log.warning(
                    Some(node.id),
                    format!("Restart on {} failed: {}", node.hostname, e),
                );
                failures.push((node.id, e));
            }
        }
        failures
    }

    /// Run a command whose failure only warrants a warning
    pub(crate) async fn soft(
        &self,
        session: &NodeSession,
        command: &str,
        log: &TaskLogger,
    ) {
        if let Err(e) = session
            .run_raw(command, &StderrAllowList::standard(), LogLevel::Debug)
            .await
        {
            log.warning(Some(session.node().id), e.to_string());
        }
    }
}

/// First failure of a fan-out step, if any
pub(crate) fn first_failure(failures: Vec<(NodeId, PipelineError)>) -> Result<()> {
    match failures.into_iter().next() {
        Some((_, e)) => Err(e),
        None => Ok(()),
    }
}
