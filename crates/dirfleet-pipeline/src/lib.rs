//! Provisioning pipelines
//!
//! Multi-step workflows that bring nodes into the fleet, wire up
//! replication and take nodes back out. Each run is a [`ProvisioningJob`]
//! with its own task id; progress and failures go to the task's log stream
//! and node-flag changes are committed to a [`NodeStore`] step by step.
//!
//! ```text
//! Orchestrator ──▶ NodeStore        (topology, committed flags)
//!      │
//!      ├────────▶ TransportFactory  (one session per node per step)
//!      │
//!      └────────▶ LogSink           (task-scoped log stream)
//! ```

pub mod error;
pub mod job;
pub mod lock;
pub mod orchestrator;
pub mod store;
pub mod workflows;

pub use error::{PipelineError, Result, StoreError};
pub use job::{JobKind, PipelineOutcome, ProvisioningJob, Target};
pub use lock::NodeLock;
pub use orchestrator::{Orchestrator, PipelineInputs, PipelineOptions};
pub use store::{JsonFileStore, MemoryStore, NodeStore};
pub use workflows::dry_run::{DryRunReport, HostPortReport};
pub use workflows::replication::ReplicationCommands;
