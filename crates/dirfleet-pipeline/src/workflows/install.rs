//! Product installation

use crate::error::{PipelineError, Result};
use crate::job::ProvisioningJob;
use crate::orchestrator::Orchestrator;
use dirfleet_core::{
    ClusterConfig, Component, LogLevel, Node, SETUP_PROPERTIES_LAST_PATH, SETUP_PROPERTIES_PATH,
    Secret, TIME_SYNC_CRON_ENTRY, TaskLogger, property_value, rewrite_setup_properties,
};
use dirfleet_remote::{NodeSession, ServiceAction, StderrAllowList};
use regex::Regex;
use std::path::Path;

const INSTALLER_COMMAND: &str = "cd /install/community-edition-setup/ && ./setup.py -n";
const SCHEMA_DIR: &str = "opt/gluu/schema/openldap";

/// Certificates re-imported into the JVM trust store after a cert sync
const CERT_SUFFIXES: [&str; 5] = ["httpd", "shibIDP", "idp-encryption", "asimba", "opendj"];
const KEYTOOL: &str = "/opt/jre/bin/keytool";
const TRUST_STORE: &str = "/opt/jre/jre/lib/security/cacerts";
const TRUST_STORE_PASSWORD: &str = "changeit";

fn keytool_delete(alias: &str) -> String {
    format!(
        "{} -delete -alias {} -keystore {} -storepass {}",
        KEYTOOL, alias, TRUST_STORE, TRUST_STORE_PASSWORD
    )
}

fn keytool_import(alias: &str, suffix: &str) -> String {
    format!(
        "{} -import -trustcacerts -alias {} -file /etc/certs/{}.crt -keystore {} -storepass {} -noprompt",
        KEYTOOL, alias, suffix, TRUST_STORE, TRUST_STORE_PASSWORD
    )
}

/// Product versions under `/opt` other than the configured one
pub(crate) fn stale_installations(cluster: &ClusterConfig, entries: &[String]) -> Vec<String> {
    let pattern = format!(r"^{}-(\d+)\.(\d+)\.(\d+)$", regex::escape(&cluster.product_name));
    let Ok(re) = Regex::new(&pattern) else {
        return Vec::new();
    };
    let current = cluster.product_package();
    entries
        .iter()
        .filter(|name| re.is_match(name) && **name != current)
        .cloned()
        .collect()
}

impl Orchestrator {
    pub(crate) async fn run_install(
        &self,
        job: &mut ProvisioningJob,
        log: &TaskLogger,
        id: dirfleet_core::NodeId,
    ) -> Result<()> {
        let topology = self.topology().await?;
        let mut node = Self::require_node(&topology, id)?;
        if node.os.is_none() {
            return Err(PipelineError::Precondition(
                "OS type has not been identified".to_string(),
            ));
        }

        // Step 1: preconditions before anything is touched
        job.advance(log, Some(id));
        let primary_session = if node.is_primary {
            if self.inputs.setup_properties.is_none() {
                return Err(PipelineError::Precondition(
                    "setup.properties is missing from the data directory".to_string(),
                ));
            }
            None
        } else {
            let primary = Self::require_primary(&topology)?;
            log.info(Some(id), "Check if primary server is installed");
            let session = self.open_session(&primary, log).await?;
            if !session.path_exists(SETUP_PROPERTIES_LAST_PATH).await? {
                return Err(PipelineError::Precondition(
                    "Primary server is not installed. Please first install the primary server"
                        .to_string(),
                ));
            }
            log.success(Some(id), "Primary server is installed");
            Some(session)
        };

        log.info(Some(id), format!("Making SSH connection to {}", node.hostname));
        let session = self.open_session(&node, log).await?;
        self.remove_stale_installations(&session, log).await?;

        // Step 2: product package and container service
        job.advance(log, Some(id));
        let package = self.cluster.product_package();
        log.info(Some(id), format!("Installing {}", package));
        session.ensure_host_package(&package).await?;
        if let Err(e) = session
            .control_product(&self.cluster, ServiceAction::Enable)
            .await
        {
            log.debug(Some(id), e.to_string());
        }
        session
            .control_product(&self.cluster, ServiceAction::Start)
            .await?;
        self.settle(&node, log).await;

        // Step 3: installer parameters, then the installer itself
        job.advance(log, Some(id));
        match &primary_session {
            None => {
                log.info(Some(id), "Uploading setup.properties");
                let content = self.inputs.setup_properties.clone().unwrap_or_default();
                if let Some(password) = property_value(&content, "ldapPass") {
                    node.credentials.bind_password = Secret::new(password);
                }
                session
                    .write_file(SETUP_PROPERTIES_PATH, content.as_bytes())
                    .await?;
            }
            Some(primary) => {
                log.debug(Some(id), "Downloading setup.properties.last from primary server");
                let last = primary.read_to_string(SETUP_PROPERTIES_LAST_PATH).await?;
                if let Some(password) = property_value(&last, "ldapPass") {
                    node.credentials.bind_password = Secret::new(password);
                }
                let content = rewrite_setup_properties(&last, &node);
                log.debug(Some(id), "Uploading setup.properties");
                session
                    .write_file(SETUP_PROPERTIES_PATH, content.as_bytes())
                    .await?;
            }
        }

        log.info(
            Some(id),
            "Running setup.py - Be patient this process will take a while ...",
        );
        session
            .run_raw(INSTALLER_COMMAND, &StderrAllowList::standard(), LogLevel::Debug)
            .await?;
        if !session.path_exists(SETUP_PROPERTIES_LAST_PATH).await? {
            return Err(PipelineError::Postcondition {
                host: node.hostname.clone(),
                message: "installer did not complete".to_string(),
            });
        }
        node.installed_components.insert(Component::Product);
        self.commit(&node).await?;

        // Step 4: soft post-install steps
        job.advance(log, Some(id));
        match &primary_session {
            None => self.push_local_schema(&session, log).await,
            Some(primary) => {
                self.copy_schema_from_primary(primary, &session, log).await;
                self.sync_certificates(job, primary, &session, log).await;
            }
        }
        self.configure_time_sync(&session, log).await;

        match session.detect_components().await {
            Ok(found) => node.installed_components.extend(found),
            Err(e) => log.warning(Some(id), format!("Component detection failed: {}", e)),
        }
        self.commit(&node).await?;

        if let Some(primary) = primary_session {
            primary.close().await?;
        }
        session.close().await?;
        log.success(Some(id), format!("{} successfully installed", package));
        Ok(())
    }

    async fn remove_stale_installations(&self, session: &NodeSession, log: &TaskLogger) -> Result<()> {
        let id = session.node().id;
        log.info(Some(id), "Check if the product was installed");
        let entries = session.host().list_dir(Path::new("/opt")).await?;
        let stale = stale_installations(&self.cluster, &entries);
        if stale.is_empty() {
            log.debug(Some(id), "No other product version was previously installed");
            return Ok(());
        }

        let allow = StderrAllowList::standard();
        for package in stale {
            log.info(Some(id), format!("Removing {}", package));
            let version = package
                .strip_prefix(&format!("{}-", self.cluster.product_name))
                .unwrap_or_default()
                .to_string();
            let old = ClusterConfig {
                product_version: version,
                ..self.cluster.clone()
            };
            if let Some(stop) = session.dialect().product_service_command(&old, ServiceAction::Stop) {
                session.host().run(&stop, &allow, LogLevel::Debug).await?;
            }
            if let Err(e) = session
                .host()
                .run_checked(&session.dialect().remove_command(&package), &allow)
                .await
            {
                log.warning(Some(id), format!("Can't remove {}: {}", package, e));
            }
        }
        Ok(())
    }

    async fn push_local_schema(&self, session: &NodeSession, log: &TaskLogger) {
        let id = session.node().id;
        if self.inputs.schema_files.is_empty() {
            return;
        }
        if let Err(e) = session.ensure_path(SCHEMA_DIR).await {
            log.error(Some(id), format!("Can't create {}: {}", SCHEMA_DIR, e));
            return;
        }
        for (name, content) in &self.inputs.schema_files {
            let path = format!("{}/{}", SCHEMA_DIR, name);
            match session.write_file(&path, content).await {
                Ok(()) => log.success(Some(id), format!("Custom schema file {} uploaded", name)),
                Err(e) => log.error(
                    Some(id),
                    format!("Can't upload custom schema file {}: {}", name, e),
                ),
            }
        }
    }

    async fn copy_schema_from_primary(
        &self,
        primary: &NodeSession,
        session: &NodeSession,
        log: &TaskLogger,
    ) {
        let id = session.node().id;
        log.info(
            Some(id),
            "Downloading custom schema files from primary server and uploading to this server",
        );
        let names = match primary.host().list_dir(&primary.host_path(SCHEMA_DIR)).await {
            Ok(names) => names,
            Err(e) => {
                log.debug(Some(id), format!("No custom schema on primary: {}", e));
                return;
            }
        };
        for name in names {
            let path = format!("{}/{}", SCHEMA_DIR, name);
            let result = async {
                let content = primary.read_file(&path).await?;
                session.write_file(&path, &content).await
            }
            .await;
            match result {
                Ok(()) => log.debug(
                    Some(id),
                    format!("{} downloaded from primary and uploaded", name),
                ),
                Err(e) => log.error(Some(id), format!("Can't copy schema {}: {}", name, e)),
            }
        }
    }

    /// Copy the primary's certificates and re-import them into the trust store
    async fn sync_certificates(
        &self,
        job: &ProvisioningJob,
        primary: &NodeSession,
        session: &NodeSession,
        log: &TaskLogger,
    ) {
        let id = session.node().id;
        log.info(
            Some(id),
            "Downloading certificates from primary server and uploading to this server",
        );
        let archive = format!(
            "/tmp/certs_{}.tgz",
            job.task_id.as_str().chars().take(8).collect::<String>()
        );
        let certs = primary.host_path("etc/certs/");
        let allow = StderrAllowList::standard();

        let result = async {
            primary
                .host()
                .run(
                    &format!("tar -zcf {} {}", archive, certs.display()),
                    &allow,
                    LogLevel::Debug,
                )
                .await?;
            let bundle = primary.host().read_file(Path::new(&archive)).await?;
            session
                .host()
                .write_file(Path::new("/tmp/certs.tgz"), &bundle)
                .await?;
            session
                .host()
                .run_checked("tar -zxf /tmp/certs.tgz -C /", &allow)
                .await?;
            Ok::<_, PipelineError>(())
        }
        .await;
        for (host, path) in [
            (primary.host(), archive.as_str()),
            (session.host(), "/tmp/certs.tgz"),
        ] {
            if let Err(e) = host
                .run(&format!("rm -f {}", path), &allow, LogLevel::Debug)
                .await
            {
                log.warning(Some(id), format!("Could not remove {}: {}", path, e));
            }
        }
        if let Err(e) = result {
            log.error(Some(id), format!("Certificate synchronization failed: {}", e));
            return;
        }
        log.success(Some(id), "Certificates copied from primary server");

        let Some(alias_host) = self.cluster.load_balancer_host.as_deref() else {
            log.warning(
                Some(id),
                "No load balancer host configured, skipping trust store update",
            );
            return;
        };
        log.info(Some(id), "Updating trust store");
        for suffix in CERT_SUFFIXES {
            let alias = format!("{}_{}", alias_host, suffix);
            if matches!(
                session.path_exists(&format!("etc/certs/{}.crt", suffix)).await,
                Ok(true)
            ) {
                self.soft(session, &keytool_delete(&alias), log).await;
            }
            self.soft(session, &keytool_import(&alias, suffix), log).await;
        }
    }

    /// Install ntpdate and a one-minute cron entry on the host
    async fn configure_time_sync(&self, session: &NodeSession, log: &TaskLogger) {
        let id = session.node().id;
        log.info(Some(id), "Checking if ntp is installed and configured");
        let host = session.host();
        let result = async {
            if host.path_exists(Path::new("/usr/sbin/ntpdate")).await? {
                log.success(Some(id), "ntp was installed");
            } else {
                session.ensure_host_package("ntpdate").await?;
            }
            host.write_file(
                Path::new("/etc/cron.d/setdate"),
                TIME_SYNC_CRON_ENTRY.as_bytes(),
            )
            .await?;
            log.debug(
                Some(id),
                "Crontab entry was created to update time in every minute",
            );
            host.run(
                &session
                    .dialect()
                    .service_command(session.dialect().cron_service(), ServiceAction::Reload),
                &StderrAllowList::standard(),
                LogLevel::Debug,
            )
            .await?;
            Ok::<_, PipelineError>(())
        }
        .await;
        if let Err(e) = result {
            log.warning(Some(id), format!("Time synchronization setup failed: {}", e));
        }
    }
}
