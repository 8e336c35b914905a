//! Per-node pipeline locks
//!
//! Only one pipeline may run against a node at a time. Callers take a
//! [`NodeLock`] for every node a job targets before starting it.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use dirfleet_core::NodeId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Locks older than this are considered stale
const STALE_AFTER_HOURS: i64 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    task_id: String,
    acquired_at: DateTime<Utc>,
}

/// RAII guard for a node lock
#[derive(Debug)]
pub struct NodeLock {
    lock_path: PathBuf,
    released: bool,
}

impl NodeLock {
    fn path(state_dir: &Path, id: NodeId) -> PathBuf {
        state_dir.join(format!("node-{}.lock", id))
    }

    /// Take the lock for `id` under `state_dir`
    pub async fn acquire(
        state_dir: &Path,
        id: NodeId,
        task_id: &str,
    ) -> std::result::Result<Self, StoreError> {
        if !state_dir.exists() {
            fs::create_dir_all(state_dir).await?;
        }
        let lock_path = Self::path(state_dir, id);

        if lock_path.exists() {
            let content = fs::read_to_string(&lock_path).await?;
            let info: LockInfo = serde_json::from_str(&content)?;
            let age = Utc::now().signed_duration_since(info.acquired_at);
            if age.num_hours() < STALE_AFTER_HOURS {
                return Err(StoreError::Locked(
                    id,
                    format!(
                        "task {} on {} since {}",
                        info.task_id, info.holder, info.acquired_at
                    ),
                ));
            }
            tracing::warn!(node = %id, holder = %info.holder, "Removing stale node lock");
        }

        let info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            task_id: task_id.to_string(),
            acquired_at: Utc::now(),
        };
        fs::write(&lock_path, serde_json::to_string_pretty(&info)?).await?;
        tracing::debug!(node = %id, "Acquired node lock");

        Ok(Self {
            lock_path,
            released: false,
        })
    }

    /// Release the lock
    pub async fn release(mut self) -> std::result::Result<(), StoreError> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("Released node lock");
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for NodeLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_second_acquire_is_rejected() {
        let temp_dir = tempdir().unwrap();
        let lock = NodeLock::acquire(temp_dir.path(), NodeId(1), "t1").await.unwrap();

        let err = NodeLock::acquire(temp_dir.path(), NodeId(1), "t2")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Locked(NodeId(1), _)));

        // other nodes are independent
        let other = NodeLock::acquire(temp_dir.path(), NodeId(2), "t3").await.unwrap();

        lock.release().await.unwrap();
        drop(other);
        assert!(NodeLock::acquire(temp_dir.path(), NodeId(1), "t4").await.is_ok());
    }

    #[tokio::test]
    async fn test_stale_lock_is_replaced() {
        let temp_dir = tempdir().unwrap();
        let stale = LockInfo {
            holder: "old".to_string(),
            task_id: "t0".to_string(),
            acquired_at: Utc::now() - chrono::Duration::hours(2),
        };
        std::fs::write(
            temp_dir.path().join("node-1.lock"),
            serde_json::to_string(&stale).unwrap(),
        )
        .unwrap();

        assert!(NodeLock::acquire(temp_dir.path(), NodeId(1), "t1").await.is_ok());
    }
}
