//! OS dialects
//!
//! A node resolves to exactly one [`Dialect`] which decides the package
//! manager, how container-scoped commands are wrapped, and which service
//! manager family is used. Selected once per node and held as a value.

use crate::error::{RemoteError, Result};
use dirfleet_core::{ClusterConfig, Node, OsFamily, OsVersion};
use std::fmt;
use std::path::{Path, PathBuf};

/// Console login used instead of `chroot` on systemd-based containers
pub const CONSOLE_LOGIN_PREFIX: &str = "ssh -o IdentityFile=/etc/gluu/keys/gluu-console \
     -o Port=60022 -o LogLevel=QUIET -o StrictHostKeyChecking=no \
     -o UserKnownHostsFile=/dev/null -o PubkeyAuthentication=yes root@localhost";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Yum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
    Reload,
    Enable,
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Reload => "reload",
            Self::Enable => "enable",
        }
    }
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command dialect of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dialect {
    /// Ubuntu / Debian: apt, `service`, chroot into the container
    Apt { os: OsVersion, root: PathBuf },
    /// CentOS 6: yum, `service`, chroot into the container
    YumSysV { root: PathBuf },
    /// CentOS 7 / RHEL 7: yum, `systemctl`, console login into the container
    YumSystemd { os: OsVersion, root: PathBuf },
}

impl Dialect {
    pub fn new(os: OsVersion, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        match os {
            OsVersion::CentOS6 => Self::YumSysV { root },
            OsVersion::CentOS7 | OsVersion::Rhel7 => Self::YumSystemd { os, root },
            _ => Self::Apt { os, root },
        }
    }

    /// Resolve the dialect of a node; the OS must already be detected
    pub fn for_node(node: &Node, cluster: &ClusterConfig) -> Result<Self> {
        let os = node.os.ok_or_else(|| {
            RemoteError::Precondition(format!("OS of {} has not been detected", node.hostname))
        })?;
        Ok(Self::new(os, node.container_root(cluster)))
    }

    pub fn os(&self) -> OsVersion {
        match self {
            Self::Apt { os, .. } | Self::YumSystemd { os, .. } => *os,
            Self::YumSysV { .. } => OsVersion::CentOS6,
        }
    }

    /// Filesystem root of the container (`/` for bare nodes)
    pub fn root(&self) -> &Path {
        match self {
            Self::Apt { root, .. } | Self::YumSysV { root } | Self::YumSystemd { root, .. } => root,
        }
    }

    pub fn is_containerized(&self) -> bool {
        self.root() != Path::new("/")
    }

    pub fn package_manager(&self) -> PackageManager {
        match self.os().family() {
            OsFamily::Debian => PackageManager::Apt,
            OsFamily::RedHat => PackageManager::Yum,
        }
    }

    /// Host path of a container-relative path
    pub fn host_path(&self, path: &str) -> PathBuf {
        self.root().join(path.trim_start_matches('/'))
    }

    /// Wrap a command so it executes inside the container
    pub fn wrap(&self, command: &str) -> String {
        if !self.is_containerized() {
            return command.to_string();
        }
        match self {
            Self::YumSystemd { .. } => format!(
                "{} '{}'",
                CONSOLE_LOGIN_PREFIX,
                command.replace('\'', r"'\''")
            ),
            Self::Apt { .. } | Self::YumSysV { .. } => format!(
                "chroot {} /bin/bash -c \"{}\"",
                self.root().display(),
                escape_double_quoted(command)
            ),
        }
    }

    pub fn install_command(&self, package: &str) -> String {
        match self.package_manager() {
            PackageManager::Apt => {
                format!("DEBIAN_FRONTEND=noninteractive apt-get install -y {}", package)
            }
            PackageManager::Yum => format!("yum install -y {}", package),
        }
    }

    pub fn reinstall_command(&self, package: &str) -> String {
        match self.package_manager() {
            PackageManager::Apt => format!(
                "DEBIAN_FRONTEND=noninteractive apt-get install --reinstall -y {}",
                package
            ),
            PackageManager::Yum => format!("yum reinstall -y {}", package),
        }
    }

    pub fn remove_command(&self, package: &str) -> String {
        match self.package_manager() {
            PackageManager::Apt => {
                format!("DEBIAN_FRONTEND=noninteractive apt-get remove -y {}", package)
            }
            PackageManager::Yum => format!("yum remove -y {}", package),
        }
    }

    /// Query whose stdout tells whether a package is installed
    pub fn package_query(&self, package: &str) -> String {
        match self.package_manager() {
            PackageManager::Apt => format!("dpkg-query -W -f='${{Status}}' {}", package),
            PackageManager::Yum => format!("rpm -q {}", package),
        }
    }

    /// Interpret the output of [`Dialect::package_query`]
    pub fn package_installed(&self, exit_status: i32, stdout: &str) -> bool {
        match self.package_manager() {
            PackageManager::Apt => exit_status == 0 && stdout.contains("install ok installed"),
            PackageManager::Yum => exit_status == 0 && !stdout.contains("is not installed"),
        }
    }

    /// Unwrapped service control command
    pub fn service_command(&self, service: &str, action: ServiceAction) -> String {
        match (self, action) {
            (Self::YumSystemd { .. }, action) => format!("systemctl {} {}", action, service),
            (Self::Apt { .. }, ServiceAction::Enable) => {
                format!("update-rc.d {} defaults", service)
            }
            (Self::YumSysV { .. }, ServiceAction::Enable) => format!("chkconfig {} on", service),
            (_, action) => format!("service {} {}", service, action),
        }
    }

    /// Host-level control of the product container
    ///
    /// Returns `None` when the action is a no-op for this dialect.
    pub fn product_service_command(
        &self,
        cluster: &ClusterConfig,
        action: ServiceAction,
    ) -> Option<String> {
        let package = cluster.product_package();
        if !self.is_containerized() {
            return Some(self.service_command(&package, action));
        }
        match (self, action) {
            (Self::YumSystemd { .. }, action) => Some(format!(
                "/sbin/{}d-{} {}",
                cluster.product_name, cluster.product_version, action
            )),
            (_, ServiceAction::Enable) => None,
            (_, action) => Some(format!("service {} {}", package, action)),
        }
    }

    /// Name of the cron service
    pub fn cron_service(&self) -> &'static str {
        match self.package_manager() {
            PackageManager::Apt => "cron",
            PackageManager::Yum => "crond",
        }
    }

    /// Name of the inetd flavour used for the file-sync listener
    pub fn inetd_service(&self) -> &'static str {
        match self.package_manager() {
            PackageManager::Apt => "openbsd-inetd",
            PackageManager::Yum => "xinetd",
        }
    }
}

fn escape_double_quoted(command: &str) -> String {
    let mut out = String::with_capacity(command.len());
    for c in command.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster() -> ClusterConfig {
        ClusterConfig {
            product_version: "3.1.6".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_dialect_selection() {
        let cluster = cluster();
        let node = Node::new(1, "a", "10.0.0.1").with_os(OsVersion::Ubuntu16);
        let dialect = Dialect::for_node(&node, &cluster).unwrap();
        assert!(matches!(dialect, Dialect::Apt { .. }));
        assert_eq!(dialect.package_manager(), PackageManager::Apt);

        let node = node.with_os(OsVersion::CentOS6);
        assert!(matches!(
            Dialect::for_node(&node, &cluster).unwrap(),
            Dialect::YumSysV { .. }
        ));

        let node = node.with_os(OsVersion::Rhel7);
        let dialect = Dialect::for_node(&node, &cluster).unwrap();
        assert!(matches!(dialect, Dialect::YumSystemd { .. }));
        assert_eq!(dialect.os(), OsVersion::Rhel7);
    }

    #[test]
    fn test_undetected_os_is_precondition() {
        let node = Node::new(1, "a", "10.0.0.1");
        assert!(matches!(
            Dialect::for_node(&node, &cluster()),
            Err(RemoteError::Precondition(_))
        ));
    }

    #[test]
    fn test_ubuntu_service_goes_through_chroot() {
        let node = Node::new(1, "a", "10.0.0.1").with_os(OsVersion::Ubuntu16);
        let dialect = Dialect::for_node(&node, &cluster()).unwrap();
        let cmd = dialect.wrap(&dialect.service_command("solserver", ServiceAction::Restart));
        assert_eq!(
            cmd,
            "chroot /opt/gluu-server-3.1.6 /bin/bash -c \"service solserver restart\""
        );
    }

    #[test]
    fn test_centos7_service_goes_through_console() {
        let node = Node::new(1, "a", "10.0.0.1").with_os(OsVersion::CentOS7);
        let dialect = Dialect::for_node(&node, &cluster()).unwrap();
        let cmd = dialect.wrap(&dialect.service_command("opendj", ServiceAction::Restart));
        assert!(cmd.starts_with("ssh -o IdentityFile=/etc/gluu/keys/gluu-console"));
        assert!(cmd.ends_with("root@localhost 'systemctl restart opendj'"));
        assert!(!cmd.contains("chroot"));
    }

    #[test]
    fn test_bare_node_is_not_wrapped() {
        let node = Node::new(1, "a", "10.0.0.1")
            .with_os(OsVersion::CentOS7)
            .with_containerized(false);
        let dialect = Dialect::for_node(&node, &cluster()).unwrap();
        assert_eq!(dialect.wrap("ls /"), "ls /");
        assert_eq!(dialect.host_path("/etc/hosts"), PathBuf::from("/etc/hosts"));
    }

    #[test]
    fn test_wrap_escaping() {
        let chroot = Dialect::new(OsVersion::Debian9, "/opt/c");
        assert_eq!(
            chroot.wrap(r#"echo "$HOME""#),
            r#"chroot /opt/c /bin/bash -c "echo \"\$HOME\"""#
        );

        let console = Dialect::new(OsVersion::CentOS7, "/opt/c");
        assert!(console.wrap("echo 'x'").ends_with(r"'echo '\''x'\'''"));
    }

    #[test]
    fn test_package_commands() {
        let apt = Dialect::new(OsVersion::Debian8, "/");
        assert_eq!(
            apt.install_command("ntpdate"),
            "DEBIAN_FRONTEND=noninteractive apt-get install -y ntpdate"
        );
        assert_eq!(
            apt.package_query("ntpdate"),
            "dpkg-query -W -f='${Status}' ntpdate"
        );
        assert!(apt.package_installed(0, "install ok installed"));
        assert!(!apt.package_installed(0, "deinstall ok config-files"));
        assert!(!apt.package_installed(1, ""));

        let yum = Dialect::new(OsVersion::CentOS6, "/");
        assert_eq!(yum.install_command("nginx"), "yum install -y nginx");
        assert!(yum.package_installed(0, "nginx-1.12.2-2.el7.x86_64"));
        assert!(!yum.package_installed(1, "package nginx is not installed"));
    }

    #[test]
    fn test_enable_commands() {
        assert_eq!(
            Dialect::new(OsVersion::Ubuntu14, "/").service_command("cron", ServiceAction::Enable),
            "update-rc.d cron defaults"
        );
        assert_eq!(
            Dialect::new(OsVersion::CentOS6, "/").service_command("crond", ServiceAction::Enable),
            "chkconfig crond on"
        );
        assert_eq!(
            Dialect::new(OsVersion::CentOS7, "/").service_command("nginx", ServiceAction::Enable),
            "systemctl enable nginx"
        );
    }

    #[test]
    fn test_product_service_command() {
        let cluster = cluster();
        let console = Dialect::new(OsVersion::CentOS7, cluster.container_root());
        assert_eq!(
            console
                .product_service_command(&cluster, ServiceAction::Restart)
                .as_deref(),
            Some("/sbin/gluu-serverd-3.1.6 restart")
        );
        assert_eq!(
            console
                .product_service_command(&cluster, ServiceAction::Enable)
                .as_deref(),
            Some("/sbin/gluu-serverd-3.1.6 enable")
        );

        let apt = Dialect::new(OsVersion::Ubuntu16, cluster.container_root());
        assert_eq!(
            apt.product_service_command(&cluster, ServiceAction::Start)
                .as_deref(),
            Some("service gluu-server-3.1.6 start")
        );
        assert!(
            apt.product_service_command(&cluster, ServiceAction::Enable)
                .is_none()
        );
    }
}
