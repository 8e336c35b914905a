//! `ssh` CLI transport
//!
//! Each call spawns the system `ssh` binary; key management and host
//! verification are left to the operator's ssh configuration.

use crate::error::TransportError;
use crate::transport::{CommandOutput, HostTarget, RemoteTransport, TransportFactory};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// ssh exits with 255 when the connection itself failed
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Quote a string for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Transport backed by the `ssh` command
#[derive(Debug, Clone)]
pub struct SshTransport {
    target: HostTarget,
    connect_timeout: u32,
}

impl SshTransport {
    pub fn new(target: HostTarget) -> Self {
        Self {
            target,
            connect_timeout: 10,
        }
    }

    pub fn with_connect_timeout(mut self, seconds: u32) -> Self {
        self.connect_timeout = seconds;
        self
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.target.user, self.target.address())
    }

    fn command(&self, remote: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout))
            .arg(self.destination())
            .arg(remote);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd
    }

    fn connection_failed(&self, stderr: &str) -> TransportError {
        TransportError::Connect {
            host: self.target.hostname.clone(),
            message: stderr.trim().to_string(),
        }
    }
}

#[async_trait]
impl RemoteTransport for SshTransport {
    fn host(&self) -> &str {
        &self.target.hostname
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let output = self.run("true").await?;
        if !output.success() {
            return Err(self.connection_failed(&output.stderr));
        }
        Ok(())
    }

    async fn run(&self, command: &str) -> Result<CommandOutput, TransportError> {
        tracing::debug!("Running: ssh {} {}", self.destination(), command);

        let output = self
            .command(command)
            .output()
            .await
            .map_err(|e| TransportError::Command {
                host: self.target.hostname.clone(),
                message: e.to_string(),
            })?;

        let exit_status = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if exit_status == SSH_CONNECTION_FAILURE {
            return Err(self.connection_failed(&stderr));
        }

        Ok(CommandOutput {
            exit_status,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
        })
    }

    async fn upload(&self, content: &[u8], remote_path: &str) -> Result<(), TransportError> {
        let quoted = shell_quote(remote_path);
        let remote = format!("mkdir -p \"$(dirname {quoted})\" && cat > {quoted}");
        tracing::debug!("Uploading {} bytes to {}:{}", content.len(), self.target.hostname, remote_path);

        let mut cmd = self.command(&remote);
        cmd.stdin(Stdio::piped());
        let mut child = cmd.spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(content).await?;
            stdin.shutdown().await?;
        }
        let output = child.wait_with_output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            if output.status.code() == Some(SSH_CONNECTION_FAILURE) {
                return Err(self.connection_failed(&stderr));
            }
            return Err(TransportError::Transfer {
                host: self.target.hostname.clone(),
                path: remote_path.to_string(),
                message: stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    async fn download(&self, remote_path: &str) -> Result<Vec<u8>, TransportError> {
        let output = self
            .command(&format!("cat {}", shell_quote(remote_path)))
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            if output.status.code() == Some(SSH_CONNECTION_FAILURE) {
                return Err(self.connection_failed(&stderr));
            }
            return Err(TransportError::Transfer {
                host: self.target.hostname.clone(),
                path: remote_path.to_string(),
                message: stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    async fn path_exists(&self, path: &str) -> Result<bool, TransportError> {
        let output = self.run(&format!("test -e {}", shell_quote(path))).await?;
        Ok(output.success())
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<String>, TransportError> {
        let output = self.run(&format!("ls -1A {}", shell_quote(path))).await?;
        if !output.success() {
            return Err(TransportError::Transfer {
                host: self.target.hostname.clone(),
                path: path.to_string(),
                message: output.stderr.trim().to_string(),
            });
        }
        Ok(output
            .stdout
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn close(&self) -> Result<(), TransportError> {
        // every ssh invocation has already exited
        Ok(())
    }
}

/// Opens [`SshTransport`]s and verifies reachability
#[derive(Debug, Clone, Default)]
pub struct SshTransportFactory {
    connect_timeout: Option<u32>,
}

impl SshTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, seconds: u32) -> Self {
        self.connect_timeout = Some(seconds);
        self
    }
}

#[async_trait]
impl TransportFactory for SshTransportFactory {
    async fn open(&self, target: &HostTarget) -> Result<Box<dyn RemoteTransport>, TransportError> {
        let mut transport = SshTransport::new(target.clone());
        if let Some(seconds) = self.connect_timeout {
            transport = transport.with_connect_timeout(seconds);
        }
        transport.connect().await?;
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/etc/hosts"), "'/etc/hosts'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_destination() {
        let transport = SshTransport::new(
            HostTarget::new("a.example.org")
                .with_ip(Some("10.0.0.1".to_string()))
                .with_user("admin"),
        );
        assert_eq!(transport.destination(), "admin@10.0.0.1");
        assert_eq!(transport.host(), "a.example.org");
    }
}
