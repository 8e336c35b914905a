//! Node store
//!
//! Every pipeline step commits its node-flag mutations through a
//! [`NodeStore`] before the next step runs. The JSON store keeps
//! `.dirfleet/nodes.json` next to the inventory, with a backup of the
//! previous state.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dirfleet_core::{Node, NodeId, Topology};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::fs;

const STORE_VERSION: u32 = 1;
const STORE_FILE: &str = "nodes.json";
const STORE_BACKUP: &str = "nodes.json.backup";

/// Persistence for node records
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Current topology
    async fn load(&self) -> std::result::Result<Topology, StoreError>;

    /// Insert or replace a node
    ///
    /// Rejected with an invariant violation if it would leave two primaries.
    async fn save_node(&self, node: &Node) -> std::result::Result<(), StoreError>;

    /// Delete a node record
    async fn delete_node(&self, id: NodeId) -> std::result::Result<(), StoreError>;

    /// Make `id` the only primary
    async fn set_primary(&self, id: NodeId) -> std::result::Result<(), StoreError>;
}

fn upsert(topology: &mut Topology, node: &Node) -> std::result::Result<(), StoreError> {
    if topology.contains(node.id) {
        topology.replace_node(node.clone())?;
    } else {
        topology.add_node(node.clone())?;
    }
    Ok(())
}

/// In-memory store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    topology: Arc<Mutex<Topology>>,
}

impl MemoryStore {
    pub fn new(topology: Topology) -> Self {
        Self {
            topology: Arc::new(Mutex::new(topology)),
        }
    }

    fn topology(&self) -> MutexGuard<'_, Topology> {
        self.topology.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot without going through the async trait
    pub fn snapshot(&self) -> Topology {
        self.topology().clone()
    }
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn load(&self) -> std::result::Result<Topology, StoreError> {
        Ok(self.snapshot())
    }

    async fn save_node(&self, node: &Node) -> std::result::Result<(), StoreError> {
        upsert(&mut self.topology(), node)
    }

    async fn delete_node(&self, id: NodeId) -> std::result::Result<(), StoreError> {
        let mut topology = self.topology();
        if topology.contains(id) {
            topology.remove_node(id)?;
        }
        Ok(())
    }

    async fn set_primary(&self, id: NodeId) -> std::result::Result<(), StoreError> {
        Ok(self.topology().set_primary(id)?)
    }
}

/// On-disk layout of the JSON store
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    updated_at: DateTime<Utc>,
    nodes: Vec<Node>,
    /// Ids removed by a pipeline; never re-seeded from the inventory
    #[serde(default)]
    removed: BTreeSet<NodeId>,
}

impl Default for StoreFile {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            updated_at: Utc::now(),
            nodes: Vec::new(),
            removed: BTreeSet::new(),
        }
    }
}

/// JSON file store under `<root>/.dirfleet/`
///
/// Nodes listed in the inventory but not yet in the file are seeded on load.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    state_dir: PathBuf,
    seed: Vec<Node>,
}

impl JsonFileStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            state_dir: root.as_ref().join(dirfleet_config::STATE_DIR),
            seed: Vec::new(),
        }
    }

    pub fn with_seed(mut self, nodes: Vec<Node>) -> Self {
        self.seed = nodes;
        self
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn store_path(&self) -> PathBuf {
        self.state_dir.join(STORE_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.state_dir.join(STORE_BACKUP)
    }

    async fn read(&self) -> std::result::Result<StoreFile, StoreError> {
        let path = self.store_path();
        let mut file = if path.exists() {
            let content = fs::read_to_string(&path).await?;
            let file: StoreFile = serde_json::from_str(&content)?;
            if file.version > STORE_VERSION {
                return Err(StoreError::UnsupportedVersion {
                    found: file.version,
                    supported: STORE_VERSION,
                });
            }
            file
        } else {
            tracing::debug!("Node store not found, starting from the inventory");
            StoreFile::default()
        };

        for node in &self.seed {
            let known = file.nodes.iter().any(|n| n.id == node.id);
            if !known && !file.removed.contains(&node.id) {
                file.nodes.push(node.clone());
            }
        }
        Ok(file)
    }

    async fn write(&self, mut file: StoreFile) -> std::result::Result<(), StoreError> {
        if !self.state_dir.exists() {
            fs::create_dir_all(&self.state_dir).await?;
            tracing::debug!("Created state directory: {}", self.state_dir.display());
        }

        let path = self.store_path();
        let backup = self.backup_path();
        if path.exists() {
            if backup.exists() {
                fs::remove_file(&backup).await?;
            }
            fs::rename(&path, &backup).await?;
        }

        file.nodes.sort_by_key(|n| n.id);
        file.updated_at = Utc::now();
        let content = serde_json::to_string_pretty(&file)?;
        fs::write(&path, content).await?;
        tracing::debug!(nodes = file.nodes.len(), "Saved node store");
        Ok(())
    }

    async fn update(
        &self,
        f: impl FnOnce(&mut Topology, &mut BTreeSet<NodeId>) -> std::result::Result<(), StoreError> + Send,
    ) -> std::result::Result<(), StoreError> {
        let mut file = self.read().await?;
        let mut topology = Topology::from_nodes(file.nodes.drain(..))?;
        f(&mut topology, &mut file.removed)?;
        file.nodes = topology.nodes().cloned().collect();
        self.write(file).await
    }
}

#[async_trait]
impl NodeStore for JsonFileStore {
    async fn load(&self) -> std::result::Result<Topology, StoreError> {
        let file = self.read().await?;
        let topology = Topology::from_nodes(file.nodes)?;
        tracing::debug!(nodes = topology.len(), "Loaded node store");
        Ok(topology)
    }

    async fn save_node(&self, node: &Node) -> std::result::Result<(), StoreError> {
        self.update(|topology, removed| {
            removed.remove(&node.id);
            upsert(topology, node)
        })
        .await
    }

    async fn delete_node(&self, id: NodeId) -> std::result::Result<(), StoreError> {
        self.update(|topology, removed| {
            if topology.contains(id) {
                topology.remove_node(id)?;
            }
            removed.insert(id);
            Ok(())
        })
        .await
    }

    async fn set_primary(&self, id: NodeId) -> std::result::Result<(), StoreError> {
        self.update(|topology, _| Ok(topology.set_primary(id)?)).await
    }
}
