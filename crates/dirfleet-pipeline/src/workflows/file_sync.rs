//! File synchronisation agent setup

use crate::error::{PipelineError, Result};
use crate::job::ProvisioningJob;
use crate::orchestrator::Orchestrator;
use dirfleet_core::{
    Component, Configurator, Node, OsFamily, OsVersion, SYNC_EXCLUDES, SyncGroupSpec, TaskLogger,
    Topology, render_sync_group, rewrite_inetd_conf, sync_cron_entry, xinetd_sync_entry,
};
use dirfleet_remote::{NodeSession, ServiceAction};

pub(crate) const SYNC_GROUP: &str = "gluucluster";
pub(crate) const SYNC_CONFIG_PATH: &str = "etc/csync2.cfg";
const SYNC_KEY_PATH: &str = "etc/csync2.key";
const SYNC_SSL_FILES: [&str; 3] = [
    "etc/csync2_ssl_cert.csr",
    "etc/csync2_ssl_cert.pem",
    "etc/csync2_ssl_key.pem",
];
const SYNC_DATABASE_RESET: &str = "rm -f /var/lib/csync2/*.db3";
const INETD_CONF_PATH: &str = "etc/inetd.conf";
const XINETD_ENTRY_PATH: &str = "etc/xinetd.d/csync2";
const SYNC_CRON_PATH: &str = "etc/cron.d/csync2";

impl Orchestrator {
    /// Sync group configuration for the current membership
    pub(crate) fn render_sync_config(
        &self,
        topology: &Topology,
        exclude_hostname: Option<&str>,
    ) -> Result<String> {
        let configurator = Configurator::new(topology, &self.cluster);
        let members = configurator.sync_group_members(exclude_hostname);
        let spec = SyncGroupSpec::new(SYNC_GROUP, &members)
            .with_includes(self.inputs.file_sync_paths.iter().cloned())
            .with_excludes(
                std::iter::once("*~ .*")
                    .chain(SYNC_EXCLUDES)
                    .map(str::to_string),
            );
        Ok(render_sync_group(&spec)?)
    }

    pub(crate) async fn run_setup_file_sync(
        &self,
        job: &mut ProvisioningJob,
        log: &TaskLogger,
    ) -> Result<()> {
        let topology = self.topology().await?;
        let primary = Self::require_primary(&topology)?;
        if let Some(node) = topology.nodes().find(|n| n.os.is_none()) {
            return Err(PipelineError::Precondition(format!(
                "OS type of {} has not been identified",
                node.hostname
            )));
        }

        job.advance(log, None);
        let primary_session = self.open_session(&primary, log).await?;
        if !primary_session.path_exists(SYNC_KEY_PATH).await? {
            return Err(PipelineError::Precondition(format!(
                "File sync key is missing on primary server {}",
                primary.hostname
            )));
        }

        // Primary first; the others copy its configuration
        let mut ordered: Vec<&Node> = vec![&primary];
        ordered.extend(topology.nodes().filter(|n| n.id != primary.id));

        job.advance(log, None);
        for node in ordered {
            log.info(
                Some(node.id),
                format!("Setting up file synchronization on {}", node.hostname),
            );
            let session = self.open_session(node, log).await?;
            self.install_sync_agent(&session, log).await?;

            if node.is_primary {
                let config = self.render_sync_config(&topology, None)?;
                log.debug(Some(node.id), "Uploading csync2.cfg");
                session
                    .write_file(SYNC_CONFIG_PATH, config.as_bytes())
                    .await?;
            } else {
                self.copy_sync_files(&primary_session, &session, log).await?;
            }

            self.configure_sync_listener(&session, log).await?;

            let mut updated = node.clone();
            updated.installed_components.insert(Component::FileSync);
            self.commit(&updated).await?;
            session.close().await?;
            log.success(
                Some(node.id),
                format!("File synchronization is configured on {}", node.hostname),
            );
        }

        primary_session.close().await?;
        Ok(())
    }

    async fn install_sync_agent(&self, session: &NodeSession, log: &TaskLogger) -> Result<()> {
        let id = session.node().id;
        log.info(Some(id), "Installing csync2");
        session.ensure_package("csync2").await?;
        if session.dialect().os() == OsVersion::CentOS6
            && let Err(e) = session.ensure_package("crontabs").await
        {
            log.warning(Some(id), e.to_string());
        }
        self.soft(session, SYNC_DATABASE_RESET, log).await;
        Ok(())
    }

    async fn copy_sync_files(
        &self,
        primary: &NodeSession,
        session: &NodeSession,
        log: &TaskLogger,
    ) -> Result<()> {
        let id = session.node().id;
        log.debug(
            Some(id),
            "Downloading csync2.cfg, csync2.key and ssl files from primary server and uploading",
        );
        for path in [SYNC_CONFIG_PATH, SYNC_KEY_PATH] {
            let content = primary.read_file(path).await?;
            session.write_file(path, &content).await?;
        }
        for path in SYNC_SSL_FILES {
            if !primary.path_exists(path).await? {
                log.debug(Some(id), format!("{} not present on primary server", path));
                continue;
            }
            let content = primary.read_file(path).await?;
            session.write_file(path, &content).await?;
        }
        Ok(())
    }

    /// inetd entry, cron entry, then service reloads
    async fn configure_sync_listener(&self, session: &NodeSession, log: &TaskLogger) -> Result<()> {
        let node = session.node();
        let dialect = session.dialect();
        match dialect.os().family() {
            OsFamily::Debian => {
                let current = if session.path_exists(INETD_CONF_PATH).await? {
                    session.read_to_string(INETD_CONF_PATH).await?
                } else {
                    String::new()
                };
                let updated = rewrite_inetd_conf(&current, &node.hostname);
                session
                    .write_file(INETD_CONF_PATH, updated.as_bytes())
                    .await?;
            }
            OsFamily::RedHat => {
                session
                    .write_file(
                        XINETD_ENTRY_PATH,
                        xinetd_sync_entry(&node.hostname).as_bytes(),
                    )
                    .await?;
            }
        }

        session
            .write_file(SYNC_CRON_PATH, sync_cron_entry(&node.hostname).as_bytes())
            .await?;
        log.debug(
            Some(node.id),
            "Crontab entry was created to sync files in every minute",
        );

        for (service, action) in [
            (dialect.cron_service(), ServiceAction::Reload),
            (dialect.inetd_service(), ServiceAction::Restart),
        ] {
            if let Err(e) = session.control_service(service, action).await {
                log.warning(Some(node.id), e.to_string());
            }
        }
        Ok(())
    }
}
