//! In-memory fleet for tests
//!
//! [`FakeFleet`] implements [`TransportFactory`] over a set of [`FakeHost`]s.
//! Commands are journaled per host; package queries, installs and
//! `mkdir -p` are simulated, everything else answers with a canned
//! response or an empty success.

use crate::error::TransportError;
use crate::transport::{CommandOutput, HostTarget, RemoteTransport, TransportFactory};
use async_trait::async_trait;
use dirfleet_core::OsVersion;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One simulated host
#[derive(Debug, Clone)]
pub struct FakeHost {
    hostname: String,
    reachable: bool,
    broken_package_manager: bool,
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    packages: BTreeSet<String>,
    responses: Vec<(String, CommandOutput)>,
    effects: Vec<(String, String, Vec<u8>)>,
}

impl FakeHost {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            reachable: true,
            broken_package_manager: false,
            files: BTreeMap::new(),
            dirs: BTreeSet::new(),
            packages: BTreeSet::new(),
            responses: Vec::new(),
            effects: Vec::new(),
        }
    }

    pub fn with_file(mut self, path: impl Into<String>, content: impl AsRef<[u8]>) -> Self {
        self.files.insert(path.into(), content.as_ref().to_vec());
        self
    }

    pub fn with_dir(mut self, path: impl Into<String>) -> Self {
        self.dirs.insert(path.into());
        self
    }

    /// Add the `/etc/*release` file a real host of `os` carries
    pub fn with_os_release(self, os: OsVersion) -> Self {
        let (path, content) = match os {
            OsVersion::Ubuntu14 => ("/etc/lsb-release", "DISTRIB_ID=Ubuntu\nDISTRIB_RELEASE=14.04\n"),
            OsVersion::Ubuntu16 => ("/etc/lsb-release", "DISTRIB_ID=Ubuntu\nDISTRIB_RELEASE=16.04\n"),
            OsVersion::CentOS6 => ("/etc/centos-release", "CentOS release 6.9 (Final)\n"),
            OsVersion::CentOS7 => ("/etc/centos-release", "CentOS Linux release 7.4.1708 (Core)\n"),
            OsVersion::Rhel7 => (
                "/etc/redhat-release",
                "Red Hat Enterprise Linux Server release 7.4 (Maipo)\n",
            ),
            OsVersion::Debian8 => ("/etc/os-release", "PRETTY_NAME=\"Debian GNU/Linux 8 (jessie)\"\n"),
            OsVersion::Debian9 => ("/etc/os-release", "PRETTY_NAME=\"Debian GNU/Linux 9 (stretch)\"\n"),
        };
        self.with_file(path, content)
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.packages.insert(package.into());
        self
    }

    /// Answer every command containing `needle`; earlier rules win
    pub fn with_response(mut self, needle: impl Into<String>, output: CommandOutput) -> Self {
        self.responses.push((needle.into(), output));
        self
    }

    /// Create `path` whenever a command containing `needle` runs
    pub fn with_side_effect(
        mut self,
        needle: impl Into<String>,
        path: impl Into<String>,
        content: impl AsRef<[u8]>,
    ) -> Self {
        self.effects
            .push((needle.into(), path.into(), content.as_ref().to_vec()));
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    /// Installs run but never leave the package installed
    pub fn with_broken_package_manager(mut self) -> Self {
        self.broken_package_manager = true;
        self
    }

    fn path_exists(&self, path: &str) -> bool {
        let path = path.trim_end_matches('/');
        let prefix = format!("{}/", path);
        self.files.contains_key(path)
            || self.dirs.contains(path)
            || self.files.keys().any(|p| p.starts_with(&prefix))
            || self.dirs.iter().any(|p| p.starts_with(&prefix))
    }

    fn list_dir(&self, path: &str) -> Vec<String> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let children: BTreeSet<String> = self
            .files
            .keys()
            .chain(self.dirs.iter())
            .filter_map(|p| p.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        children.into_iter().collect()
    }

    fn execute(&mut self, command: &str) -> CommandOutput {
        for (needle, path, content) in &self.effects {
            if command.contains(needle.as_str()) {
                self.files.insert(path.clone(), content.clone());
            }
        }

        if let Some((_, output)) = self
            .responses
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
        {
            return output.clone();
        }

        if command.contains("dpkg-query -W") {
            let package = last_token(command);
            return if self.packages.contains(&package) {
                CommandOutput::ok("install ok installed")
            } else {
                CommandOutput::failed(1, format!("dpkg-query: no packages found matching {}", package))
            };
        }
        if command.contains("rpm -q ") {
            let package = last_token(command);
            return if self.packages.contains(&package) {
                CommandOutput::ok(format!("{}-1.0", package))
            } else {
                CommandOutput {
                    exit_status: 1,
                    stdout: format!("package {} is not installed", package),
                    stderr: String::new(),
                }
            };
        }
        if command.contains("apt-get install") || command.contains("yum install") || command.contains("yum reinstall") {
            if !self.broken_package_manager {
                self.packages.insert(last_token(command));
            }
            return CommandOutput::ok("");
        }
        if command.contains("apt-get remove") || command.contains("yum remove") {
            self.packages.remove(&last_token(command));
            return CommandOutput::ok("");
        }
        if let Some(rest) = command.strip_prefix("mkdir -p ")
            && let Some(path) = rest.split_whitespace().next()
        {
            self.dirs.insert(unquote(path));
            return CommandOutput::ok("");
        }
        CommandOutput::ok("")
    }
}

fn unquote(token: &str) -> String {
    token.trim_matches(|c| c == '\'' || c == '"').to_string()
}

fn last_token(command: &str) -> String {
    command
        .split_whitespace()
        .last()
        .map(unquote)
        .unwrap_or_default()
}

#[derive(Debug, Default)]
struct FleetState {
    hosts: BTreeMap<String, FakeHost>,
    journal: Vec<(String, String)>,
}

/// Shared in-memory fleet
#[derive(Debug, Clone, Default)]
pub struct FakeFleet {
    state: Arc<Mutex<FleetState>>,
}

impl FakeFleet {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FleetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_host(&self, host: FakeHost) {
        self.state().hosts.insert(host.hostname.clone(), host);
    }

    pub fn set_reachable(&self, hostname: &str, reachable: bool) {
        if let Some(host) = self.state().hosts.get_mut(hostname) {
            host.reachable = reachable;
        }
    }

    /// Add or replace a canned response on a host
    pub fn respond(&self, hostname: &str, needle: &str, output: CommandOutput) {
        if let Some(host) = self.state().hosts.get_mut(hostname) {
            host.responses.retain(|(n, _)| n != needle);
            host.responses.insert(0, (needle.to_string(), output));
        }
    }

    pub fn put_file(&self, hostname: &str, path: &str, content: impl AsRef<[u8]>) {
        if let Some(host) = self.state().hosts.get_mut(hostname) {
            host.files.insert(path.to_string(), content.as_ref().to_vec());
        }
    }

    /// Every command run on `hostname`, in order
    pub fn commands(&self, hostname: &str) -> Vec<String> {
        self.state()
            .journal
            .iter()
            .filter(|(host, _)| host == hostname)
            .map(|(_, command)| command.clone())
            .collect()
    }

    /// Every (host, command) pair, in order
    pub fn journal(&self) -> Vec<(String, String)> {
        self.state().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.state().journal.clear();
    }

    pub fn file(&self, hostname: &str, path: &str) -> Option<Vec<u8>> {
        self.state()
            .hosts
            .get(hostname)
            .and_then(|host| host.files.get(path).cloned())
    }

    pub fn file_string(&self, hostname: &str, path: &str) -> Option<String> {
        self.file(hostname, path)
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
    }

    pub fn has_path(&self, hostname: &str, path: &str) -> bool {
        self.state()
            .hosts
            .get(hostname)
            .is_some_and(|host| host.path_exists(path))
    }

    pub fn has_package(&self, hostname: &str, package: &str) -> bool {
        self.state()
            .hosts
            .get(hostname)
            .is_some_and(|host| host.packages.contains(package))
    }

    fn with_host<T>(
        &self,
        hostname: &str,
        f: impl FnOnce(&mut FakeHost) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let mut state = self.state();
        match state.hosts.get_mut(hostname) {
            Some(host) if host.reachable => f(host),
            _ => Err(TransportError::Connect {
                host: hostname.to_string(),
                message: "connection refused".to_string(),
            }),
        }
    }
}

#[async_trait]
impl TransportFactory for FakeFleet {
    async fn open(&self, target: &HostTarget) -> Result<Box<dyn RemoteTransport>, TransportError> {
        let transport = FakeTransport {
            hostname: target.hostname.clone(),
            fleet: self.clone(),
        };
        transport.connect().await?;
        Ok(Box::new(transport))
    }
}

/// Transport into a [`FakeFleet`] host
#[derive(Debug, Clone)]
pub struct FakeTransport {
    hostname: String,
    fleet: FakeFleet,
}

#[async_trait]
impl RemoteTransport for FakeTransport {
    fn host(&self) -> &str {
        &self.hostname
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.fleet.with_host(&self.hostname, |_| Ok(()))
    }

    async fn run(&self, command: &str) -> Result<CommandOutput, TransportError> {
        let output = self
            .fleet
            .with_host(&self.hostname, |host| Ok(host.execute(command)))?;
        self.fleet
            .state()
            .journal
            .push((self.hostname.clone(), command.to_string()));
        Ok(output)
    }

    async fn upload(&self, content: &[u8], remote_path: &str) -> Result<(), TransportError> {
        self.fleet.with_host(&self.hostname, |host| {
            host.files.insert(remote_path.to_string(), content.to_vec());
            Ok(())
        })
    }

    async fn download(&self, remote_path: &str) -> Result<Vec<u8>, TransportError> {
        self.fleet.with_host(&self.hostname, |host| {
            host.files
                .get(remote_path)
                .cloned()
                .ok_or_else(|| TransportError::Transfer {
                    host: host.hostname.clone(),
                    path: remote_path.to_string(),
                    message: "No such file or directory".to_string(),
                })
        })
    }

    async fn path_exists(&self, path: &str) -> Result<bool, TransportError> {
        self.fleet
            .with_host(&self.hostname, |host| Ok(host.path_exists(path)))
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<String>, TransportError> {
        self.fleet
            .with_host(&self.hostname, |host| Ok(host.list_dir(path)))
    }

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_package_simulation() {
        let fleet = FakeFleet::new();
        fleet.add_host(FakeHost::new("a").with_package("curl"));
        let t = fleet.open(&HostTarget::new("a")).await.unwrap();

        let out = t.run("dpkg-query -W -f='${Status}' curl").await.unwrap();
        assert!(out.stdout.contains("install ok installed"));
        let out = t.run("rpm -q nginx").await.unwrap();
        assert_eq!(out.exit_status, 1);

        t.run("yum install -y nginx").await.unwrap();
        assert!(fleet.has_package("a", "nginx"));
        assert_eq!(fleet.commands("a").len(), 3);
    }

    #[tokio::test]
    async fn test_fake_files() {
        let fleet = FakeFleet::new();
        fleet.add_host(FakeHost::new("a").with_file("/etc/hosts", "127.0.0.1 localhost\n"));
        let t = fleet.open(&HostTarget::new("a")).await.unwrap();

        assert!(t.path_exists("/etc").await.unwrap());
        assert!(!t.path_exists("/et").await.unwrap());
        assert_eq!(t.list_dir("/etc").await.unwrap(), vec!["hosts"]);

        t.upload(b"x", "/tmp/x").await.unwrap();
        assert_eq!(fleet.file_string("a", "/tmp/x").as_deref(), Some("x"));
        assert!(t.download("/tmp/missing").await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_and_unreachable_hosts() {
        let fleet = FakeFleet::new();
        fleet.add_host(FakeHost::new("down").unreachable());
        assert!(fleet.open(&HostTarget::new("down")).await.is_err());
        assert!(fleet.open(&HostTarget::new("nowhere")).await.is_err());
    }
}
