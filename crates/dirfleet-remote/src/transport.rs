//! Remote-execution transport contract

use crate::error::TransportError;
use async_trait::async_trait;
use dirfleet_core::{ClusterConfig, Node};
use serde::{Deserialize, Serialize};

/// Where to connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostTarget {
    pub hostname: String,
    pub ip: Option<String>,
    pub user: String,
}

impl HostTarget {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ip: None,
            user: "root".to_string(),
        }
    }

    pub fn with_ip(mut self, ip: Option<String>) -> Self {
        self.ip = ip.filter(|ip| !ip.is_empty());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Target for a managed node
    pub fn for_node(node: &Node, cluster: &ClusterConfig) -> Self {
        Self::new(&node.hostname)
            .with_ip(Some(node.ip.clone()))
            .with_user(&cluster.ssh_user)
    }

    /// Address used for the connection (ip when known)
    pub fn address(&self) -> &str {
        self.ip.as_deref().unwrap_or(&self.hostname)
    }
}

/// Result of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(exit_status: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Connection to one remote host
///
/// Implementations must not panic on remote failures; every failure to reach
/// the host surfaces as a [`TransportError`].
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Host this transport talks to
    fn host(&self) -> &str;

    /// Verify the host is reachable
    async fn connect(&self) -> Result<(), TransportError>;

    /// Run a shell command
    async fn run(&self, command: &str) -> Result<CommandOutput, TransportError>;

    /// Write bytes to a remote path, creating parent directories
    async fn upload(&self, content: &[u8], remote_path: &str) -> Result<(), TransportError>;

    /// Read a remote file
    async fn download(&self, remote_path: &str) -> Result<Vec<u8>, TransportError>;

    async fn path_exists(&self, path: &str) -> Result<bool, TransportError>;

    async fn list_dir(&self, path: &str) -> Result<Vec<String>, TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

/// Opens connected transports
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open(&self, target: &HostTarget) -> Result<Box<dyn RemoteTransport>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_target_address() {
        let target = HostTarget::new("a.example.org");
        assert_eq!(target.address(), "a.example.org");

        let target = target.with_ip(Some("10.0.0.1".to_string()));
        assert_eq!(target.address(), "10.0.0.1");

        let target = HostTarget::new("b").with_ip(Some(String::new()));
        assert_eq!(target.address(), "b");
    }

    #[test]
    fn test_host_target_for_node() {
        let cluster = ClusterConfig {
            ssh_user: "deploy".to_string(),
            ..Default::default()
        };
        let node = Node::new(1, "a.example.org", "10.0.0.1");
        let target = HostTarget::for_node(&node, &cluster);
        assert_eq!(target.user, "deploy");
        assert_eq!(target.address(), "10.0.0.1");
    }
}
