//! Enable / disable multi-master replication

use crate::error::{PipelineError, Result};
use crate::job::{ProvisioningJob, Target};
use crate::orchestrator::Orchestrator;
use crate::workflows::first_failure;
use dirfleet_core::{ClusterConfig, Component, Configurator, LogLevel, Node, NodeId, TaskLogger};
use dirfleet_remote::{NodeSession, StderrAllowList};

const DS_BIN: &str = "/opt/opendj/bin";
const ADMIN_PORT: u16 = 4444;
const REPLICATION_PORT: u16 = 8989;
const STATUS_PORT: u16 = 1444;
const ADMIN_UID: &str = "admin";

/// Directory TLS material copied from the primary to new members
pub const TLS_MATERIAL: [&str; 3] = [
    "opt/opendj/config/keystore",
    "opt/opendj/config/keystore.pin",
    "opt/opendj/config/truststore",
];

/// Directory-server replication command lines
///
/// All commands run on the primary.
pub struct ReplicationCommands<'a> {
    cluster: &'a ClusterConfig,
    primary: &'a Node,
}

impl<'a> ReplicationCommands<'a> {
    pub fn new(cluster: &'a ClusterConfig, primary: &'a Node) -> Self {
        Self { cluster, primary }
    }

    fn password(&self) -> &str {
        self.cluster.replication_password.expose()
    }

    pub fn enable(&self, target: &Node, base_dn: &str) -> String {
        format!(
            "{bin}/dsreplication enable --host1 {p} --port1 {admin} --bindDN1 '{dn}' \
             --bindPassword1 {ppw} --replicationPort1 {rep} --host2 {t} --port2 {admin} \
             --bindDN2 '{dn}' --bindPassword2 {tpw} --replicationPort2 {rep} \
             --adminUID {uid} --adminPassword {rpw} --baseDN '{base}' --trustAll -X -n",
            bin = DS_BIN,
            p = self.primary.hostname,
            admin = ADMIN_PORT,
            dn = self.cluster.replication_bind_dn,
            ppw = self.primary.credentials.bind_password.expose(),
            rep = REPLICATION_PORT,
            t = target.hostname,
            tpw = target.credentials.bind_password.expose(),
            uid = ADMIN_UID,
            rpw = self.password(),
            base = base_dn,
        )
    }

    pub fn initialize(&self, target: &Node, base_dn: &str) -> String {
        format!(
            "{bin}/dsreplication initialize --baseDN '{base}' --adminUID {uid} \
             --adminPassword {rpw} --hostSource {p} --portSource {admin} \
             --hostDestination {t} --portDestination {admin} --trustAll -X -n",
            bin = DS_BIN,
            base = base_dn,
            uid = ADMIN_UID,
            rpw = self.password(),
            p = self.primary.hostname,
            admin = ADMIN_PORT,
            t = target.hostname,
        )
    }

    /// Turn on TLS for the replication channel of `node`
    pub fn secure(&self, node: &Node) -> String {
        format!(
            "{bin}/dsconfig -h {h} -p {admin} -D '{dn}' -w {pw} --trustAll -n \
             set-crypto-manager-prop --set ssl-encryption:true",
            bin = DS_BIN,
            h = node.hostname,
            admin = ADMIN_PORT,
            dn = self.cluster.replication_bind_dn,
            pw = node.credentials.bind_password.expose(),
        )
    }

    pub fn disable(&self, target: &Node) -> String {
        format!(
            "{bin}/dsreplication disable --disableAll --port {admin} --hostname {t} \
             --adminUID {uid} --adminPassword {rpw} --trustAll --no-prompt",
            bin = DS_BIN,
            admin = ADMIN_PORT,
            t = target.hostname,
            uid = ADMIN_UID,
            rpw = self.password(),
        )
    }

    pub fn status(&self) -> String {
        format!(
            "{bin}/dsreplication status -n -X -h {p} -p {port} -I {uid} -w {rpw}",
            bin = DS_BIN,
            p = self.primary.hostname,
            port = STATUS_PORT,
            uid = ADMIN_UID,
            rpw = self.password(),
        )
    }
}

impl Orchestrator {
    pub(crate) async fn run_enable_replication(
        &self,
        job: &mut ProvisioningJob,
        log: &TaskLogger,
    ) -> Result<()> {
        let topology = self.topology().await?;
        let primary = Self::require_primary(&topology)?;

        let targets: Vec<Node> = match job.target {
            Target::All => topology.nodes().filter(|n| !n.is_primary).cloned().collect(),
            Target::Node(id) => {
                let node = Self::require_node(&topology, id)?;
                if node.is_primary {
                    return Err(PipelineError::Precondition(format!(
                        "{} is the primary server and the replication source",
                        node.hostname
                    )));
                }
                vec![node]
            }
        };
        if targets.is_empty() {
            return Err(PipelineError::Precondition(
                "No servers to enable replication on".to_string(),
            ));
        }
        for node in std::iter::once(&primary).chain(targets.iter()) {
            if !node.is_installed() {
                return Err(PipelineError::Precondition(format!(
                    "{} is not installed",
                    node.hostname
                )));
            }
            // OpenLDAP (slapd.d / OLC) multi-master is not driven from here
            if node.has_component(Component::OpenLdap) && !node.has_component(Component::OpenDj) {
                return Err(PipelineError::Precondition(format!(
                    "{} runs the OpenLDAP backend; only OpenDJ replication is supported",
                    node.hostname
                )));
            }
        }

        // Step 1: primary must be reachable and hold the TLS material
        job.advance(log, Some(primary.id));
        log.info(
            Some(primary.id),
            format!("Making SSH connection to the primary server {}", primary.hostname),
        );
        let primary_session = self.open_session(&primary, log).await?;
        if primary.containerized
            && !primary_session
                .host()
                .path_exists(primary_session.dialect().root())
                .await?
        {
            return Err(PipelineError::Precondition(format!(
                "{} is not a product server",
                primary.hostname
            )));
        }
        log.info(Some(primary.id), "Downloading directory certificates");
        let mut tls_material = Vec::with_capacity(TLS_MATERIAL.len());
        for path in TLS_MATERIAL {
            tls_material.push((path, primary_session.read_file(path).await?));
        }

        // Step 2: pairwise enable + initialize; flags committed per target
        job.advance(log, Some(primary.id));
        let commands = ReplicationCommands::new(&self.cluster, &primary);
        let allow = StderrAllowList::replication();
        let mut primary_secured = false;
        let mut enabled: Vec<NodeId> = Vec::new();

        for target in &targets {
            log.info(
                Some(target.id),
                format!("Enabling replication on server {}", target.hostname),
            );
            for base_dn in &self.cluster.base_dns {
                primary_session
                    .run_checked(&commands.enable(target, base_dn), &allow)
                    .await?;
            }
            log.info(
                Some(target.id),
                format!("Initializing replication on server {}", target.hostname),
            );
            for base_dn in &self.cluster.base_dns {
                primary_session
                    .run_checked(&commands.initialize(target, base_dn), &allow)
                    .await?;
            }

            if !primary_secured {
                log.info(
                    Some(primary.id),
                    format!("Securing replication on primary server {}", primary.hostname),
                );
                primary_session
                    .run_checked(&commands.secure(&primary), &allow)
                    .await?;
                primary_secured = true;
                if let Some(mut p) = self.topology().await?.get(primary.id).cloned() {
                    p.replication_enabled = true;
                    self.commit(&p).await?;
                }
            }

            log.info(
                Some(target.id),
                format!("Securing replication on server {}", target.hostname),
            );
            primary_session
                .run_checked(&commands.secure(target), &allow)
                .await?;

            if let Some(mut node) = self.topology().await?.get(target.id).cloned() {
                node.replication_enabled = true;
                self.commit(&node).await?;
            }
            enabled.push(target.id);
        }

        // Step 3: peer lists to every active member, TLS material to new ones
        job.advance(log, None);
        let topology = self.topology().await?;
        let providers = Configurator::new(&topology, &self.cluster).authentication_endpoints();
        log.debug(None, format!("Directory providers: {}", providers.join(",")));

        let mut failures = self.push_peer_lists(&topology, log).await;
        for id in &enabled {
            let Some(node) = topology.get(*id) else {
                continue;
            };
            log.info(Some(node.id), "Uploading directory certificate files");
            let result = async {
                let session = self.open_session(node, log).await?;
                for (path, content) in &tls_material {
                    session.write_file(path, content).await?;
                }
                session.close().await?;
                Ok::<_, PipelineError>(())
            }
            .await;
            if let Err(e) = result {
                log.error(
                    Some(node.id),
                    format!("An error occurred while uploading directory certificates: {}", e),
                );
                failures.push((node.id, e));
            }
        }

        // Step 4: restart every active member
        job.advance(log, None);
        let active = topology.active_replication_set();
        failures.extend(self.restart_products(&active, log).await);

        self.settle(&primary, log).await;
        self.check_replication_status(&primary_session, &commands, log)
            .await;
        primary_session.close().await?;

        first_failure(failures)
    }

    pub(crate) async fn run_disable_replication(
        &self,
        job: &mut ProvisioningJob,
        log: &TaskLogger,
        id: NodeId,
        delete_record: bool,
    ) -> Result<()> {
        job.advance(log, Some(id));
        let disabled = self.disable_on_primary(id, log).await?;

        job.advance(log, Some(id));
        let topology = self.topology().await?;
        let failures = self.push_peer_lists(&topology, log).await;

        if delete_record {
            if failures.is_empty() {
                self.store
                    .delete_node(id)
                    .await
                    .map_err(crate::orchestrator::store_error)?;
                log.info(Some(id), format!("Server {} was removed", disabled.hostname));
            } else {
                log.warning(
                    Some(id),
                    format!(
                        "Record of {} kept because the peer lists were not updated everywhere",
                        disabled.hostname
                    ),
                );
            }
        }
        first_failure(failures)
    }

    /// Disable replication for `id` against the primary and commit the flag
    pub(crate) async fn disable_on_primary(&self, id: NodeId, log: &TaskLogger) -> Result<Node> {
        let topology = self.topology().await?;
        let primary = Self::require_primary(&topology)?;
        let mut node = Self::require_node(&topology, id)?;
        if node.is_primary && topology.active_replication_set().iter().any(|n| n.id != id) {
            return Err(PipelineError::InvariantViolation(format!(
                "{} is the primary server; disable replication on the other members first",
                node.hostname
            )));
        }

        log.info(
            Some(primary.id),
            format!("Making SSH connection to primary server {}", primary.hostname),
        );
        let primary_session = self.open_session(&primary, log).await?;
        let commands = ReplicationCommands::new(&self.cluster, &primary);

        log.info(
            Some(id),
            format!("Disabling replication for {}", node.hostname),
        );
        primary_session
            .run_checked(&commands.disable(&node), &StderrAllowList::replication())
            .await?;

        node.replication_enabled = false;
        self.commit(&node).await?;
        log.success(
            Some(id),
            format!("Replication disabled for {}", node.hostname),
        );

        self.check_replication_status(&primary_session, &commands, log)
            .await;
        primary_session.close().await?;
        Ok(node)
    }

    async fn check_replication_status(
        &self,
        primary: &NodeSession,
        commands: &ReplicationCommands<'_>,
        log: &TaskLogger,
    ) {
        log.info(Some(primary.node().id), "Checking replication status");
        if let Err(e) = primary
            .run_raw(&commands.status(), &StderrAllowList::replication(), LogLevel::Warning)
            .await
        {
            log.warning(Some(primary.node().id), e.to_string());
        }
    }
}
