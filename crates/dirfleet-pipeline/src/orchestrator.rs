//! Orchestrator entry points
//!
//! One async method per pipeline kind. Every run gets its own task id and
//! log stream; failures end up as a terminal `Error` entry in that stream
//! and `success = false` in the returned [`PipelineOutcome`].

use crate::error::{PipelineError, Result, StoreError};
use crate::job::{JobKind, PipelineOutcome, ProvisioningJob, Target};
use crate::store::NodeStore;
use crate::workflows::dry_run::DryRunReport;
use dirfleet_config::DataDir;
use dirfleet_core::{ClusterConfig, LogSink, Node, NodeId, TaskLogger, Topology};
use dirfleet_remote::{HostTarget, NodeSession, RemoteHost, TransportFactory};
use std::sync::Arc;
use std::time::Duration;

/// Controller-side files a pipeline reads
#[derive(Debug, Clone, Default)]
pub struct PipelineInputs {
    /// Installer parameters uploaded to the primary
    pub setup_properties: Option<String>,
    /// Custom schema files pushed to the primary
    pub schema_files: Vec<(String, Vec<u8>)>,
    /// Paths kept in sync across nodes
    pub file_sync_paths: Vec<String>,
    /// Proxy configuration template override
    pub proxy_template: Option<String>,
}

impl PipelineInputs {
    pub fn from_data_dir(data_dir: &DataDir) -> dirfleet_config::Result<Self> {
        Ok(Self {
            setup_properties: data_dir.setup_properties()?,
            schema_files: data_dir.schema_files()?,
            file_sync_paths: data_dir.file_sync_paths()?,
            proxy_template: data_dir.proxy_template()?,
        })
    }
}

/// Timing knobs
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Wait after starting a console-login container
    pub settle_delay: Duration,
    /// Port polls per probe, clamped to 1..=5
    pub probe_attempts: u32,
    pub probe_interval: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(10),
            probe_attempts: dirfleet_remote::probe::MAX_ATTEMPTS,
            probe_interval: Duration::from_millis(100),
        }
    }
}

/// Runs provisioning pipelines against the fleet
pub struct Orchestrator {
    pub(crate) cluster: ClusterConfig,
    pub(crate) store: Arc<dyn NodeStore>,
    pub(crate) transports: Arc<dyn TransportFactory>,
    pub(crate) sink: Arc<dyn LogSink>,
    pub(crate) inputs: PipelineInputs,
    pub(crate) options: PipelineOptions,
}

impl Orchestrator {
    pub fn new(
        cluster: ClusterConfig,
        store: Arc<dyn NodeStore>,
        transports: Arc<dyn TransportFactory>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            cluster,
            store,
            transports,
            sink,
            inputs: PipelineInputs::default(),
            options: PipelineOptions::default(),
        }
    }

    pub fn with_inputs(mut self, inputs: PipelineInputs) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn cluster(&self) -> &ClusterConfig {
        &self.cluster
    }

    /// Current topology from the store
    pub async fn topology(&self) -> Result<Topology> {
        self.store.load().await.map_err(store_error)
    }

    /// Run any job by kind
    pub async fn run(&self, mut job: ProvisioningJob) -> PipelineOutcome {
        let log = TaskLogger::new(job.task_id.clone(), self.sink.clone());
        tracing::info!(task = %job.task_id, kind = %job.kind, target = %job.target, "Pipeline started");

        let result = match job.kind {
            JobKind::Install => match self.single_target(&job) {
                Ok(id) => self.run_install(&mut job, &log, id).await,
                Err(e) => Err(e),
            },
            JobKind::EnableReplication => self.run_enable_replication(&mut job, &log).await,
            JobKind::DisableReplication => match self.single_target(&job) {
                Ok(id) => {
                    let delete_record = job.delete_record;
                    self.run_disable_replication(&mut job, &log, id, delete_record)
                        .await
                }
                Err(e) => Err(e),
            },
            JobKind::RemoveNode => match self.single_target(&job) {
                Ok(id) => self.run_remove_node(&mut job, &log, id).await,
                Err(e) => Err(e),
            },
            JobKind::DeployProxy => {
                let update_host_aliases = job.update_host_aliases;
                self.run_deploy_proxy(&mut job, &log, update_host_aliases)
                    .await
            }
            JobKind::InspectNode => match self.single_target(&job) {
                Ok(id) => self.run_inspect_node(&mut job, &log, id).await,
                Err(e) => Err(e),
            },
            JobKind::SetupFileSync => self.run_setup_file_sync(&mut job, &log).await,
            JobKind::DryRun => match self.single_target(&job) {
                Ok(id) => self.run_dry_run(&mut job, &log, id).await.map(|_| ()),
                Err(e) => Err(e),
            },
            JobKind::SetPrimary => match self.single_target(&job) {
                Ok(id) => self.run_set_primary(&mut job, &log, id).await,
                Err(e) => Err(e),
            },
        };
        self.finish(&job, &log, result)
    }

    fn finish(&self, job: &ProvisioningJob, log: &TaskLogger, result: Result<()>) -> PipelineOutcome {
        let server_id = job.target.node();
        let success = match result {
            Ok(()) => {
                log.success(server_id, format!("{} finished", job.kind));
                true
            }
            Err(e) => {
                tracing::warn!(task = %job.task_id, kind = %job.kind, error = %e, "Pipeline failed");
                log.error(server_id, e.to_string());
                log.error(server_id, format!("Ending {} process.", job.kind));
                false
            }
        };
        PipelineOutcome {
            task_id: job.task_id.clone(),
            kind: job.kind,
            success,
        }
    }

    fn single_target(&self, job: &ProvisioningJob) -> Result<NodeId> {
        job.target.node().ok_or_else(|| {
            PipelineError::Precondition(format!("{} needs a single target node", job.kind))
        })
    }

    pub async fn install(&self, id: NodeId) -> PipelineOutcome {
        self.run(ProvisioningJob::new(JobKind::Install, id)).await
    }

    pub async fn enable_replication(&self, target: Target) -> PipelineOutcome {
        self.run(ProvisioningJob::new(JobKind::EnableReplication, target))
            .await
    }

    /// Disable replication; with `delete_record` the node record is removed
    /// once every surviving member has its new peer list
    pub async fn disable_replication(&self, id: NodeId, delete_record: bool) -> PipelineOutcome {
        self.run(ProvisioningJob::new(JobKind::DisableReplication, id).with_delete_record(delete_record))
            .await
    }

    pub async fn remove_node(&self, id: NodeId) -> PipelineOutcome {
        self.run(ProvisioningJob::new(JobKind::RemoveNode, id)).await
    }

    pub async fn deploy_proxy(&self, update_host_aliases: bool) -> PipelineOutcome {
        self.run(
            ProvisioningJob::new(JobKind::DeployProxy, Target::All)
                .with_host_aliases(update_host_aliases),
        )
        .await
    }

    pub async fn inspect_node(&self, id: NodeId) -> PipelineOutcome {
        self.run(ProvisioningJob::new(JobKind::InspectNode, id)).await
    }

    pub async fn setup_file_sync(&self) -> PipelineOutcome {
        self.run(ProvisioningJob::new(JobKind::SetupFileSync, Target::All))
            .await
    }

    /// Diagnostic port checks; the report is `None` when the run failed
    pub async fn dry_run(&self, id: NodeId) -> (PipelineOutcome, Option<DryRunReport>) {
        self.dry_run_job(ProvisioningJob::new(JobKind::DryRun, id)).await
    }

    /// [`Self::dry_run`] with a caller-built job
    pub async fn dry_run_job(
        &self,
        mut job: ProvisioningJob,
    ) -> (PipelineOutcome, Option<DryRunReport>) {
        let log = TaskLogger::new(job.task_id.clone(), self.sink.clone());
        let result = match self.single_target(&job) {
            Ok(id) => self.run_dry_run(&mut job, &log, id).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(report) => (self.finish(&job, &log, Ok(())), Some(report)),
            Err(e) => (self.finish(&job, &log, Err(e)), None),
        }
    }

    pub async fn set_primary(&self, id: NodeId) -> PipelineOutcome {
        self.run(ProvisioningJob::new(JobKind::SetPrimary, id)).await
    }

    async fn run_set_primary(
        &self,
        job: &mut ProvisioningJob,
        log: &TaskLogger,
        id: NodeId,
    ) -> Result<()> {
        job.advance(log, Some(id));
        self.store.set_primary(id).await.map_err(store_error)?;
        let topology = self.topology().await?;
        if let Some(node) = topology.get(id) {
            log.info(Some(id), format!("Server {} was set as primary server", node.hostname));
        }
        Ok(())
    }

    // Shared helpers for the workflows

    pub(crate) fn require_node(topology: &Topology, id: NodeId) -> Result<Node> {
        topology
            .get(id)
            .cloned()
            .ok_or_else(|| PipelineError::Precondition(format!("Node {} is not registered", id)))
    }

    pub(crate) fn require_primary(topology: &Topology) -> Result<Node> {
        topology
            .primary()
            .cloned()
            .ok_or_else(|| PipelineError::Precondition("No primary server is designated".to_string()))
    }

    pub(crate) async fn open_session(&self, node: &Node, log: &TaskLogger) -> Result<NodeSession> {
        Ok(NodeSession::open(self.transports.as_ref(), node, &self.cluster, log.clone()).await?)
    }

    pub(crate) async fn open_host(
        &self,
        target: &HostTarget,
        server_id: Option<NodeId>,
        log: &TaskLogger,
    ) -> Result<RemoteHost> {
        Ok(RemoteHost::connect(self.transports.as_ref(), target, server_id, log.clone()).await?)
    }

    /// Commit a node-flag mutation
    pub(crate) async fn commit(&self, node: &Node) -> Result<()> {
        self.store.save_node(node).await.map_err(store_error)
    }

    pub(crate) async fn settle(&self, node: &Node, log: &TaskLogger) {
        if node.os.is_some_and(|os| os.uses_console_login()) && !self.options.settle_delay.is_zero() {
            log.info(
                Some(node.id),
                format!(
                    "Waiting {}s for the container to finish starting",
                    self.options.settle_delay.as_secs()
                ),
            );
            tokio::time::sleep(self.options.settle_delay).await;
        }
    }
}

/// Topology violations from the store surface as invariant violations
pub(crate) fn store_error(err: StoreError) -> PipelineError {
    match err {
        StoreError::Topology(e) => e.into(),
        other => PipelineError::Store(other),
    }
}
