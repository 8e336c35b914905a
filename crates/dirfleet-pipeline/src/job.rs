//! Provisioning jobs
//!
//! A [`ProvisioningJob`] lives for one pipeline run and is never persisted.

use dirfleet_core::{NodeId, TaskId, TaskLogger, Topology};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    Install,
    EnableReplication,
    DisableReplication,
    RemoveNode,
    DeployProxy,
    InspectNode,
    SetupFileSync,
    DryRun,
    SetPrimary,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::EnableReplication => "enable-replication",
            Self::DisableReplication => "disable-replication",
            Self::RemoveNode => "remove-node",
            Self::DeployProxy => "deploy-proxy",
            Self::InspectNode => "inspect-node",
            Self::SetupFileSync => "setup-file-sync",
            Self::DryRun => "dry-run",
            Self::SetPrimary => "set-primary",
        }
    }

    /// Named checkpoints, in order
    pub fn steps(&self) -> &'static [&'static str] {
        match self {
            Self::Install => &[
                "Prepare server",
                "Install product package",
                "Run installer",
                "Post installation",
            ],
            Self::EnableReplication => &[
                "Check primary",
                "Enable replication",
                "Update peer lists",
                "Restart services",
            ],
            Self::DisableReplication => &["Disable replication", "Update peer lists"],
            Self::RemoveNode => &[
                "Disable replication",
                "Reconfigure file sync and proxy",
                "Restart remaining nodes",
                "Delete node record",
            ],
            Self::DeployProxy => &[
                "Install proxy",
                "Fetch TLS material",
                "Push proxy configuration",
                "Start proxy",
            ],
            Self::InspectNode => &["Connect", "Detect OS", "Detect components"],
            Self::SetupFileSync => &["Install sync agent", "Distribute configuration"],
            Self::DryRun => &["Probe node ports", "Probe from proxy tier"],
            Self::SetPrimary => &["Set primary"],
        }
    }
}

impl JobKind {
    /// Kinds that rewrite state on nodes other than the target
    ///
    /// Peer lists, proxy backends and sync groups are derived from the whole
    /// fleet, so two such jobs must not overlap anywhere.
    pub fn changes_membership(&self) -> bool {
        matches!(
            self,
            Self::EnableReplication
                | Self::DisableReplication
                | Self::RemoveNode
                | Self::DeployProxy
                | Self::SetupFileSync
        )
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a job runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    Node(NodeId),
    All,
}

impl Target {
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::Node(id) => Some(*id),
            Self::All => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(id) => write!(f, "node {}", id),
            Self::All => f.write_str("all nodes"),
        }
    }
}

impl From<NodeId> for Target {
    fn from(id: NodeId) -> Self {
        Self::Node(id)
    }
}

/// One pipeline invocation
#[derive(Debug, Clone)]
pub struct ProvisioningJob {
    pub task_id: TaskId,
    pub target: Target,
    pub kind: JobKind,
    /// 1-based index into `kind.steps()`, 0 before the first checkpoint
    pub current_step: usize,
    /// DisableReplication: delete the record once peers are updated
    pub delete_record: bool,
    /// DeployProxy: merge fleet host aliases into every node
    pub update_host_aliases: bool,
}

impl ProvisioningJob {
    pub fn new(kind: JobKind, target: impl Into<Target>) -> Self {
        Self {
            task_id: TaskId::new(),
            target: target.into(),
            kind,
            current_step: 0,
            delete_record: false,
            update_host_aliases: false,
        }
    }

    pub fn with_delete_record(mut self, delete_record: bool) -> Self {
        self.delete_record = delete_record;
        self
    }

    pub fn with_host_aliases(mut self, update_host_aliases: bool) -> Self {
        self.update_host_aliases = update_host_aliases;
        self
    }

    /// Use a task id supplied by the caller's job queue
    pub fn with_task_id(mut self, task_id: TaskId) -> Self {
        self.task_id = task_id;
        self
    }

    /// Nodes this job must hold exclusively while it runs
    pub fn lock_scope(&self, topology: &Topology) -> Vec<NodeId> {
        match self.target {
            Target::Node(id) if !self.kind.changes_membership() => vec![id],
            Target::Node(id) => {
                let mut ids: Vec<NodeId> = topology.nodes().map(|n| n.id).collect();
                if !ids.contains(&id) {
                    ids.push(id);
                }
                ids
            }
            Target::All => topology.nodes().map(|n| n.id).collect(),
        }
    }

    /// Move to the next checkpoint and report it
    pub(crate) fn advance(&mut self, log: &TaskLogger, server_id: Option<NodeId>) {
        let steps = self.kind.steps();
        self.current_step = (self.current_step + 1).min(steps.len());
        if let Some(name) = self.current_step.checked_sub(1).and_then(|i| steps.get(i)) {
            log.info(
                server_id,
                format!("Step {}/{}: {}", self.current_step, steps.len(), name),
            );
        }
    }
}

/// Result returned to the caller
///
/// Details of a failure are in the task's log stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub task_id: TaskId,
    pub kind: JobKind,
    pub success: bool,
}
