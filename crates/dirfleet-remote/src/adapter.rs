//! Remote provisioning adapter
//!
//! [`RemoteHost`] runs commands and classifies their output into the task log.
//! [`NodeSession`] adds the node's [`Dialect`] and the idempotent primitives
//! every pipeline step is built from.

use crate::classify::StderrAllowList;
use crate::dialect::{Dialect, ServiceAction};
use crate::error::{RemoteError, Result};
use crate::transport::{CommandOutput, HostTarget, RemoteTransport, TransportFactory};
use dirfleet_core::{ClusterConfig, Component, LogLevel, Node, NodeId, OsVersion, TaskLogger};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// A connected host with task logging
pub struct RemoteHost {
    transport: Box<dyn RemoteTransport>,
    server_id: Option<NodeId>,
    log: TaskLogger,
}

impl RemoteHost {
    /// Connect to a host; failures are logged and returned as transport errors
    pub async fn connect(
        factory: &dyn TransportFactory,
        target: &HostTarget,
        server_id: Option<NodeId>,
        log: TaskLogger,
    ) -> Result<Self> {
        log.info(
            server_id,
            format!("Making SSH connection to {}", target.hostname),
        );
        match factory.open(target).await {
            Ok(transport) => Ok(Self {
                transport,
                server_id,
                log,
            }),
            Err(e) => {
                log.warning(server_id, format!("Cannot establish SSH connection: {}", e));
                Err(e.into())
            }
        }
    }

    pub fn hostname(&self) -> &str {
        self.transport.host()
    }

    pub fn server_id(&self) -> Option<NodeId> {
        self.server_id
    }

    pub fn log(&self) -> &TaskLogger {
        &self.log
    }

    /// Run a host-level command and log its output
    ///
    /// Non-zero exits are not errors here; stderr is classified against
    /// `allow` and logged at `severity` when nothing matches.
    pub async fn run(
        &self,
        command: &str,
        allow: &StderrAllowList,
        severity: LogLevel,
    ) -> Result<CommandOutput> {
        self.log.debug(self.server_id, command);
        let output = self.transport.run(command).await?;
        if !output.stdout.trim().is_empty() {
            self.log.debug(self.server_id, output.stdout.trim());
        }
        if !output.stderr.trim().is_empty() {
            let level = allow.classify(&output.stderr, severity);
            self.log.log(self.server_id, level, output.stderr.trim());
        }
        Ok(output)
    }

    /// Run a host-level command that must succeed
    ///
    /// A non-zero exit is tolerated only when its stderr matches `allow`.
    pub async fn run_checked(&self, command: &str, allow: &StderrAllowList) -> Result<CommandOutput> {
        let output = self.run(command, allow, LogLevel::Error).await?;
        if !output.success() && !allow.is_allowed(&output.stderr) {
            return Err(RemoteError::Command {
                host: self.hostname().to_string(),
                command: command.to_string(),
                status: output.exit_status,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }

    pub async fn path_exists(&self, path: &Path) -> Result<bool> {
        Ok(self.transport.path_exists(&path.to_string_lossy()).await?)
    }

    pub async fn list_dir(&self, path: &Path) -> Result<Vec<String>> {
        Ok(self.transport.list_dir(&path.to_string_lossy()).await?)
    }

    pub async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(self.transport.download(&path.to_string_lossy()).await?)
    }

    pub async fn read_to_string(&self, path: &Path) -> Result<String> {
        let bytes = self.read_file(path).await?;
        Ok(String::from_utf8_lossy(&bytes).to_string())
    }

    /// Overwrite a host file
    pub async fn write_file(&self, path: &Path, content: &[u8]) -> Result<()> {
        self.transport
            .upload(content, &path.to_string_lossy())
            .await?;
        self.log
            .debug(self.server_id, format!("File {} uploaded", path.display()));
        Ok(())
    }

    /// Create a host directory unless it exists; re-checked afterwards
    pub async fn ensure_dir(&self, path: &Path) -> Result<bool> {
        if self.path_exists(path).await? {
            self.log
                .debug(self.server_id, format!("Directory {} exists", path.display()));
            return Ok(false);
        }
        let command = format!("mkdir -p {}", crate::ssh::shell_quote(&path.to_string_lossy()));
        self.run(&command, &StderrAllowList::standard(), LogLevel::Error)
            .await?;
        if !self.path_exists(path).await? {
            return Err(RemoteError::Postcondition {
                host: self.hostname().to_string(),
                message: format!("{} was not created", path.display()),
            });
        }
        self.log
            .success(self.server_id, format!("{} was created", path.display()));
        Ok(true)
    }

    /// Detect the OS from `/etc/*release`
    pub async fn detect_os(&self) -> Result<OsVersion> {
        let etc = Path::new("/etc");
        let mut release_files: Vec<String> = self
            .list_dir(etc)
            .await?
            .into_iter()
            .filter(|name| name.ends_with("release"))
            .collect();
        release_files.sort();

        for name in release_files {
            let text = self.read_to_string(&etc.join(&name)).await?;
            if let Some(os) = OsVersion::from_release_text(&text) {
                self.log
                    .debug(self.server_id, format!("OS is determined as {}", os));
                return Ok(os);
            }
        }
        Err(RemoteError::Precondition(format!(
            "OS of {} could not be determined",
            self.hostname()
        )))
    }

    pub async fn close(self) -> Result<()> {
        Ok(self.transport.close().await?)
    }
}

/// A node with its resolved dialect
///
/// Every primitive checks existing state before acting, so re-running a step
/// that already succeeded issues no mutating command.
pub struct NodeSession {
    host: RemoteHost,
    node: Node,
    dialect: Dialect,
}

impl NodeSession {
    /// Wrap a connected host; the node's OS must be known
    pub fn new(host: RemoteHost, node: &Node, cluster: &ClusterConfig) -> Result<Self> {
        let dialect = Dialect::for_node(node, cluster)?;
        Ok(Self {
            host,
            node: node.clone(),
            dialect,
        })
    }

    /// Connect to a node and resolve its dialect
    pub async fn open(
        factory: &dyn TransportFactory,
        node: &Node,
        cluster: &ClusterConfig,
        log: TaskLogger,
    ) -> Result<Self> {
        let dialect = Dialect::for_node(node, cluster)?;
        let target = HostTarget::for_node(node, cluster);
        let host = RemoteHost::connect(factory, &target, Some(node.id), log).await?;
        Ok(Self {
            host,
            node: node.clone(),
            dialect,
        })
    }

    pub fn host(&self) -> &RemoteHost {
        &self.host
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    /// Host path of a container-relative path
    pub fn host_path(&self, path: &str) -> PathBuf {
        self.dialect.host_path(path)
    }

    /// Run a command inside the node's container
    pub async fn run_raw(
        &self,
        command: &str,
        allow: &StderrAllowList,
        severity: LogLevel,
    ) -> Result<CommandOutput> {
        self.host
            .run(&self.dialect.wrap(command), allow, severity)
            .await
    }

    /// Run a command inside the container that must succeed
    pub async fn run_checked(&self, command: &str, allow: &StderrAllowList) -> Result<CommandOutput> {
        self.host
            .run_checked(&self.dialect.wrap(command), allow)
            .await
    }

    async fn run_scoped(
        &self,
        command: &str,
        in_container: bool,
        allow: &StderrAllowList,
        severity: LogLevel,
    ) -> Result<CommandOutput> {
        if in_container {
            self.run_raw(command, allow, severity).await
        } else {
            self.host.run(command, allow, severity).await
        }
    }

    async fn query_package(&self, package: &str, in_container: bool) -> Result<bool> {
        let output = self
            .run_scoped(
                &self.dialect.package_query(package),
                in_container,
                &StderrAllowList::standard(),
                LogLevel::Debug,
            )
            .await?;
        Ok(self
            .dialect
            .package_installed(output.exit_status, &output.stdout))
    }

    async fn install_package(&self, package: &str, in_container: bool) -> Result<bool> {
        if self.query_package(package, in_container).await? {
            self.host.log.debug(
                Some(self.node.id),
                format!("{} is already installed", package),
            );
            return Ok(false);
        }

        let allow = StderrAllowList::standard();
        let output = self
            .run_scoped(
                &self.dialect.install_command(package),
                in_container,
                &allow,
                LogLevel::Debug,
            )
            .await?;
        if output.stdout.contains("half-installed") || output.stderr.contains("half-installed") {
            self.host.log.warning(
                Some(self.node.id),
                format!("{} is half-installed, reinstalling", package),
            );
            self.run_scoped(
                &self.dialect.reinstall_command(package),
                in_container,
                &allow,
                LogLevel::Debug,
            )
            .await?;
        }

        if !self.query_package(package, in_container).await? {
            return Err(RemoteError::Postcondition {
                host: self.host.hostname().to_string(),
                message: format!("package {} is not installed", package),
            });
        }
        self.host
            .log
            .success(Some(self.node.id), format!("{} was installed", package));
        Ok(true)
    }

    /// Whether a package is installed inside the container
    pub async fn package_installed(&self, package: &str) -> Result<bool> {
        self.query_package(package, true).await
    }

    /// Install a package inside the container unless already present
    ///
    /// Returns `true` when an install command was issued.
    pub async fn ensure_package(&self, package: &str) -> Result<bool> {
        self.install_package(package, true).await
    }

    /// Install a package on the host itself unless already present
    pub async fn ensure_host_package(&self, package: &str) -> Result<bool> {
        self.install_package(package, false).await
    }

    /// Ensure a container-relative directory exists
    pub async fn ensure_path(&self, path: &str) -> Result<bool> {
        self.host.ensure_dir(&self.host_path(path)).await
    }

    pub async fn path_exists(&self, path: &str) -> Result<bool> {
        self.host.path_exists(&self.host_path(path)).await
    }

    /// Overwrite a container-relative file
    pub async fn write_file(&self, path: &str, content: &[u8]) -> Result<()> {
        self.host.write_file(&self.host_path(path), content).await
    }

    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.host.read_file(&self.host_path(path)).await
    }

    pub async fn read_to_string(&self, path: &str) -> Result<String> {
        self.host.read_to_string(&self.host_path(path)).await
    }

    /// Control a service inside the container
    pub async fn control_service(&self, service: &str, action: ServiceAction) -> Result<()> {
        self.run_checked(
            &self.dialect.service_command(service, action),
            &StderrAllowList::standard(),
        )
        .await?;
        Ok(())
    }

    /// Control a host service (outside the container)
    pub async fn control_host_service(&self, service: &str, action: ServiceAction) -> Result<()> {
        self.host
            .run_checked(
                &self.dialect.service_command(service, action),
                &StderrAllowList::standard(),
            )
            .await?;
        Ok(())
    }

    /// Control the product container itself
    pub async fn control_product(&self, cluster: &ClusterConfig, action: ServiceAction) -> Result<()> {
        match self.dialect.product_service_command(cluster, action) {
            Some(command) => {
                self.host
                    .run_checked(&command, &StderrAllowList::standard())
                    .await?;
            }
            None => self.host.log.debug(
                Some(self.node.id),
                format!("{} is a no-op on {}", action, self.dialect.os()),
            ),
        }
        Ok(())
    }

    /// Components found by their marker paths
    pub async fn detect_components(&self) -> Result<BTreeSet<Component>> {
        let mut found = BTreeSet::new();
        for component in Component::DETECTABLE {
            if let Some(marker) = component.marker_path()
                && self.path_exists(marker).await?
            {
                found.insert(component);
            }
        }
        Ok(found)
    }

    pub async fn close(self) -> Result<()> {
        self.host.close().await
    }
}
