use dirfleet_core::{
    ClusterConfig, Component, LogLevel, MemorySink, Node, NodeId, OsVersion, Secret, Topology,
};
use dirfleet_pipeline::{MemoryStore, Orchestrator, PipelineInputs, PipelineOptions, Target};
use dirfleet_remote::CommandOutput;
use dirfleet_remote::testing::{FakeFleet, FakeHost};
use std::sync::Arc;
use std::time::Duration;

const PEERS: &str = "/etc/gluu/conf/ox-ldap.properties";
const KEYSTORE: &str = "/opt/opendj/config/keystore";
const INITIAL_PEERS: &str = "bindDN: cn=directory manager\nservers: localhost:1636\n";
const LB: &str = "lb.example.org";

struct Harness {
    fleet: FakeFleet,
    store: Arc<MemoryStore>,
    sink: MemorySink,
    orchestrator: Orchestrator,
}

impl Harness {
    fn new(nodes: Vec<Node>) -> Self {
        Self::with_inputs(nodes, PipelineInputs::default())
    }

    fn with_inputs(nodes: Vec<Node>, inputs: PipelineInputs) -> Self {
        let fleet = FakeFleet::new();
        for node in &nodes {
            let mut host = FakeHost::new(&node.hostname)
                .with_os_release(OsVersion::Ubuntu16)
                .with_file(PEERS, INITIAL_PEERS);
            if node.is_primary {
                host = host
                    .with_file(KEYSTORE, "primary-keystore")
                    .with_file("/opt/opendj/config/keystore.pin", "pin")
                    .with_file("/opt/opendj/config/truststore", "truststore");
            }
            fleet.add_host(host);
        }
        fleet.add_host(FakeHost::new(LB).with_os_release(OsVersion::Ubuntu16));

        let store = Arc::new(MemoryStore::new(Topology::from_nodes(nodes).unwrap()));
        let sink = MemorySink::new();
        let orchestrator = Orchestrator::new(
            cluster(),
            store.clone(),
            Arc::new(fleet.clone()),
            Arc::new(sink.clone()),
        )
        .with_inputs(inputs)
        .with_options(PipelineOptions {
            settle_delay: Duration::ZERO,
            probe_attempts: 2,
            probe_interval: Duration::from_millis(1),
        });

        Self {
            fleet,
            store,
            sink,
            orchestrator,
        }
    }

    fn node(&self, id: u32) -> Option<Node> {
        self.store.snapshot().get(NodeId(id)).cloned()
    }

    fn peers(&self, hostname: &str) -> String {
        self.fleet.file_string(hostname, PEERS).unwrap_or_default()
    }
}

fn cluster() -> ClusterConfig {
    ClusterConfig {
        name: "test".to_string(),
        product_version: "3.1.6".to_string(),
        replication_password: Secret::new("rpw"),
        load_balancer_host: Some(LB.to_string()),
        load_balancer_ip: Some("10.0.0.9".to_string()),
        ..Default::default()
    }
}

fn node(id: u32, name: &str) -> Node {
    Node::new(id, format!("{}.example.org", name), format!("10.0.0.{}", id))
        .with_os(OsVersion::Ubuntu16)
        .with_containerized(false)
        .with_component(Component::Product)
        .with_bind_password("pw")
}

fn servers(hosts: &[&str]) -> String {
    let endpoints: Vec<String> = std::iter::once("localhost:1636".to_string())
        .chain(hosts.iter().map(|h| format!("{}.example.org:1636", h)))
        .collect();
    format!("servers: {}\n", endpoints.join(","))
}

/// Enabling every non-primary node pushes self-first peer lists everywhere
#[tokio::test]
async fn test_enable_replication_all() {
    let h = Harness::new(vec![node(1, "a").as_primary(), node(2, "b"), node(3, "c")]);

    let outcome = h.orchestrator.enable_replication(Target::All).await;
    assert!(outcome.success);

    for id in 1..=3 {
        assert!(h.node(id).unwrap().replication_enabled);
    }
    assert!(h.peers("a.example.org").contains(&servers(&["a", "b", "c"])));
    assert!(h.peers("b.example.org").contains(&servers(&["b", "a", "c"])));
    assert!(h.peers("c.example.org").contains(&servers(&["c", "a", "b"])));
    assert!(h.peers("b.example.org").starts_with("bindDN: cn=directory manager\n"));

    assert_eq!(
        h.fleet.file_string("b.example.org", KEYSTORE).as_deref(),
        Some("primary-keystore")
    );
    let primary_commands = h.fleet.commands("a.example.org");
    assert!(primary_commands.iter().any(|c| c.contains("dsreplication enable") && c.contains("--host2 b.example.org")));
    assert!(primary_commands.iter().any(|c| c.contains("dsreplication initialize") && c.contains("--hostDestination c.example.org")));
    assert!(h.sink.contains(LogLevel::Success, "enable-replication finished"));
}

/// A failed initialize leaves the flag down and touches no peer list
#[tokio::test]
async fn test_enable_replication_fails_at_initialize() {
    let h = Harness::new(vec![
        node(1, "a").as_primary().with_replication(true),
        node(2, "b"),
        node(3, "c").with_replication(true),
    ]);
    h.fleet.respond(
        "a.example.org",
        "dsreplication initialize",
        CommandOutput::failed(1, "The server is not responding"),
    );

    let outcome = h.orchestrator.enable_replication(Target::Node(NodeId(2))).await;
    assert!(!outcome.success);

    assert!(!h.node(2).unwrap().replication_enabled);
    assert_eq!(h.peers("a.example.org"), INITIAL_PEERS);
    assert_eq!(h.peers("c.example.org"), INITIAL_PEERS);
    assert!(h.fleet.commands("c.example.org").is_empty());
    assert!(h.sink.contains(LogLevel::Error, "Ending enable-replication process."));
}

/// Running the same enable twice converges to the same files
#[tokio::test]
async fn test_enable_replication_rerun_is_stable() {
    let h = Harness::new(vec![node(1, "a").as_primary(), node(2, "b")]);

    assert!(h.orchestrator.enable_replication(Target::Node(NodeId(2))).await.success);
    let first = (h.peers("a.example.org"), h.peers("b.example.org"));
    assert!(h.orchestrator.enable_replication(Target::Node(NodeId(2))).await.success);
    let second = (h.peers("a.example.org"), h.peers("b.example.org"));

    assert_eq!(first, second);
    assert_eq!(first.0.matches("servers:").count(), 1);
}

/// The primary is the replication source, never a target
#[tokio::test]
async fn test_enable_replication_rejects_primary_target() {
    let h = Harness::new(vec![node(1, "a").as_primary(), node(2, "b")]);

    let outcome = h.orchestrator.enable_replication(Target::Node(NodeId(1))).await;
    assert!(!outcome.success);
    assert!(h.fleet.journal().is_empty());
}

/// An unreachable member fails only its own push
#[tokio::test]
async fn test_unreachable_member_is_contained() {
    let h = Harness::new(vec![
        node(1, "a").as_primary().with_replication(true),
        node(2, "b"),
        node(3, "c").with_replication(true),
    ]);
    h.fleet.set_reachable("c.example.org", false);

    let outcome = h.orchestrator.enable_replication(Target::Node(NodeId(2))).await;
    assert!(!outcome.success);

    assert!(h.node(2).unwrap().replication_enabled);
    assert!(h.peers("a.example.org").contains(&servers(&["a", "b", "c"])));
    assert!(h.peers("b.example.org").contains(&servers(&["b", "a", "c"])));
    assert!(h.sink.contains(LogLevel::Warning, "was not modified to include all providers"));
}

/// Removing C shrinks peer lists and proxy backends to A and B
#[tokio::test]
async fn test_remove_node() {
    let h = Harness::new(vec![
        node(1, "a").as_primary().with_replication(true),
        node(2, "b").with_replication(true),
        node(3, "c").with_replication(true),
    ]);

    let outcome = h.orchestrator.remove_node(NodeId(3)).await;
    assert!(outcome.success);

    let topology = h.store.snapshot();
    assert!(!topology.contains(NodeId(3)));
    assert_eq!(topology.active_replication_set().len(), 2);
    assert!(h.peers("a.example.org").contains(&servers(&["a", "b"])));
    assert!(h.peers("b.example.org").contains(&servers(&["b", "a"])));

    let proxy = h.fleet.file_string(LB, "/etc/nginx/nginx.conf").unwrap();
    assert!(proxy.contains("server a.example.org:443"));
    assert!(proxy.contains("server b.example.org:443"));
    assert!(!proxy.contains("c.example.org"));

    assert!(
        h.fleet
            .commands("a.example.org")
            .iter()
            .any(|c| c.contains("dsreplication disable") && c.contains("--hostname c.example.org"))
    );
}

/// The primary cannot be removed while other nodes exist
#[tokio::test]
async fn test_remove_primary_rejected() {
    let h = Harness::new(vec![node(1, "a").as_primary(), node(2, "b")]);

    let outcome = h.orchestrator.remove_node(NodeId(1)).await;
    assert!(!outcome.success);
    assert!(h.store.snapshot().contains(NodeId(1)));
    assert!(h.fleet.journal().is_empty());
}

/// Disabling with delete drops the record after the peer push
#[tokio::test]
async fn test_disable_replication_with_delete() {
    let h = Harness::new(vec![
        node(1, "a").as_primary().with_replication(true),
        node(2, "b").with_replication(true),
    ]);

    let outcome = h.orchestrator.disable_replication(NodeId(2), true).await;
    assert!(outcome.success);
    assert!(!h.store.snapshot().contains(NodeId(2)));
    assert!(h.peers("a.example.org").contains(&servers(&["a"])));
}

/// Disabling without delete keeps the record with the flag down
#[tokio::test]
async fn test_disable_replication_keeps_record() {
    let h = Harness::new(vec![
        node(1, "a").as_primary().with_replication(true),
        node(2, "b").with_replication(true),
    ]);

    assert!(h.orchestrator.disable_replication(NodeId(2), false).await.success);
    let b = h.node(2).unwrap();
    assert!(!b.replication_enabled);
}

/// The primary keeps replicating while other members are active
#[tokio::test]
async fn test_disable_replication_rejects_primary_with_members() {
    let h = Harness::new(vec![
        node(1, "a").as_primary().with_replication(true),
        node(2, "b").with_replication(true),
        node(3, "c").with_replication(true),
    ]);

    let outcome = h.orchestrator.disable_replication(NodeId(1), false).await;
    assert!(!outcome.success);
    assert!(h.node(1).unwrap().replication_enabled);
    assert!(h.fleet.journal().is_empty());
    assert!(h.peers("b.example.org").contains(INITIAL_PEERS));
}

/// A failed peer push keeps the record even with delete requested
#[tokio::test]
async fn test_disable_replication_delete_kept_on_push_failure() {
    let h = Harness::new(vec![
        node(1, "a").as_primary().with_replication(true),
        node(2, "b").with_replication(true),
        node(3, "c").with_replication(true),
    ]);
    h.fleet.set_reachable("c.example.org", false);

    let outcome = h.orchestrator.disable_replication(NodeId(2), true).await;
    assert!(!outcome.success);

    let b = h.node(2).unwrap();
    assert!(!b.replication_enabled);
    assert!(h.peers("a.example.org").contains(&servers(&["a", "c"])));
    assert!(h.sink.contains(LogLevel::Warning, "Record of b.example.org kept"));
}

/// An unreachable proxy host keeps the removed node's record
#[tokio::test]
async fn test_remove_node_kept_on_proxy_failure() {
    let h = Harness::new(vec![
        node(1, "a").as_primary().with_replication(true),
        node(2, "b").with_replication(true),
        node(3, "c").with_replication(true),
    ]);
    h.fleet.set_reachable(LB, false);

    let outcome = h.orchestrator.remove_node(NodeId(3)).await;
    assert!(!outcome.success);

    let topology = h.store.snapshot();
    assert!(topology.contains(NodeId(3)));
    assert!(!h.node(3).unwrap().replication_enabled);
    assert!(h.peers("a.example.org").contains(&servers(&["a", "b"])));
    assert!(h.sink.contains(LogLevel::Warning, "Record of c.example.org was kept"));
}

/// OpenLDAP-backed members are refused before any remote command
#[tokio::test]
async fn test_enable_replication_rejects_openldap_backend() {
    let h = Harness::new(vec![
        node(1, "a").as_primary().with_component(Component::OpenDj),
        node(2, "b").with_component(Component::OpenLdap),
    ]);

    let outcome = h.orchestrator.enable_replication(Target::Node(NodeId(2))).await;
    assert!(!outcome.success);
    assert!(!h.node(2).unwrap().replication_enabled);
    assert!(h.fleet.journal().is_empty());
    assert!(h.sink.contains(LogLevel::Error, "only OpenDJ replication is supported"));
}

/// Installing the primary uploads the installer parameters and records the product
#[tokio::test]
async fn test_install_primary() {
    let a = Node::new(1, "a.example.org", "10.0.0.1")
        .as_primary()
        .with_os(OsVersion::Ubuntu16)
        .with_containerized(false);
    let inputs = PipelineInputs {
        setup_properties: Some("ip=10.0.0.1\nldapPass=secret\n".to_string()),
        schema_files: vec![("99-custom.schema".to_string(), b"schema".to_vec())],
        ..Default::default()
    };
    let h = Harness::with_inputs(vec![a], inputs);
    h.fleet.add_host(
        FakeHost::new("a.example.org")
            .with_os_release(OsVersion::Ubuntu16)
            .with_dir("/opt/gluu-server-3.1.5")
            .with_side_effect(
                "setup.py",
                "/install/community-edition-setup/setup.properties.last",
                "ip=10.0.0.1\nldapPass=secret\n",
            ),
    );

    let outcome = h.orchestrator.install(NodeId(1)).await;
    assert!(outcome.success);

    assert!(h.fleet.has_package("a.example.org", "gluu-server-3.1.6"));
    assert!(h.fleet.has_package("a.example.org", "ntpdate"));
    assert!(
        h.fleet
            .commands("a.example.org")
            .iter()
            .any(|c| c.contains("apt-get remove -y gluu-server-3.1.5"))
    );
    assert_eq!(
        h.fleet
            .file_string("a.example.org", "/install/community-edition-setup/setup.properties")
            .as_deref(),
        Some("ip=10.0.0.1\nldapPass=secret\n")
    );
    assert!(h.fleet.has_path("a.example.org", "/opt/gluu/schema/openldap/99-custom.schema"));
    assert!(h.fleet.has_path("a.example.org", "/etc/cron.d/setdate"));

    let a = h.node(1).unwrap();
    assert!(a.is_installed());
    assert_eq!(a.credentials.bind_password.expose(), "secret");
}

/// A non-primary install derives its parameters from the primary
#[tokio::test]
async fn test_install_secondary_rewrites_ip() {
    let b = Node::new(2, "b.example.org", "10.0.0.2")
        .with_os(OsVersion::Ubuntu16)
        .with_containerized(false);
    let h = Harness::new(vec![node(1, "a").as_primary(), b]);
    h.fleet.put_file(
        "a.example.org",
        "/install/community-edition-setup/setup.properties.last",
        "ip=10.0.0.1\nldapPass=secret\n",
    );
    h.fleet.respond(
        "b.example.org",
        "setup.py",
        CommandOutput::ok("Installation complete"),
    );
    h.fleet.put_file(
        "b.example.org",
        "/install/community-edition-setup/setup.properties.last",
        "ip=10.0.0.2\n",
    );

    let outcome = h.orchestrator.install(NodeId(2)).await;
    assert!(outcome.success);
    assert_eq!(
        h.fleet
            .file_string("b.example.org", "/install/community-edition-setup/setup.properties")
            .as_deref(),
        Some("ip=10.0.0.2\nldapPass=secret\n")
    );
    assert_eq!(h.node(2).unwrap().credentials.bind_password.expose(), "secret");

    assert!(h.fleet.commands("a.example.org").iter().any(|c| c.starts_with("rm -f /tmp/certs_")));
    assert!(h.fleet.commands("b.example.org").iter().any(|c| c == "rm -f /tmp/certs.tgz"));
}

/// A non-primary install needs an installed primary
#[tokio::test]
async fn test_install_requires_installed_primary() {
    let b = Node::new(2, "b.example.org", "10.0.0.2")
        .with_os(OsVersion::Ubuntu16)
        .with_containerized(false);
    let h = Harness::new(vec![node(1, "a").as_primary(), b]);

    let outcome = h.orchestrator.install(NodeId(2)).await;
    assert!(!outcome.success);
    assert!(h.sink.contains(LogLevel::Error, "Primary server is not installed"));
    assert!(h.fleet.commands("b.example.org").is_empty());
}

/// Proxy deployment installs nginx and lists every node as a backend
#[tokio::test]
async fn test_deploy_proxy() {
    let h = Harness::new(vec![node(1, "a").as_primary(), node(2, "b")]);
    h.fleet.put_file("a.example.org", "/etc/certs/httpd.crt", "crt");
    h.fleet.put_file("a.example.org", "/etc/certs/httpd.key", "key");
    h.fleet.put_file("b.example.org", "/etc/hosts", "127.0.0.1 localhost\n");

    let outcome = h.orchestrator.deploy_proxy(true).await;
    assert!(outcome.success);

    assert!(h.fleet.has_package(LB, "nginx"));
    assert_eq!(h.fleet.file_string(LB, "/etc/nginx/ssl/httpd.key").as_deref(), Some("key"));
    let config = h.fleet.file_string(LB, "/etc/nginx/nginx.conf").unwrap();
    assert!(config.contains("server a.example.org:443 max_fails=2 fail_timeout=10s;"));
    assert!(config.contains("server b.example.org:443 max_fails=2 fail_timeout=10s;"));

    let hosts = h.fleet.file_string("b.example.org", "/etc/hosts").unwrap();
    assert!(hosts.starts_with("127.0.0.1 localhost\n"));
    assert!(hosts.contains("10.0.0.1 a.example.org\n"));
    assert!(hosts.contains("10.0.0.9 lb.example.org\n"));
}

/// File sync needs the key on the primary
#[tokio::test]
async fn test_file_sync_requires_key() {
    let h = Harness::new(vec![node(1, "a").as_primary(), node(2, "b")]);

    let outcome = h.orchestrator.setup_file_sync().await;
    assert!(!outcome.success);
    assert!(h.sink.contains(LogLevel::Error, "File sync key is missing"));
    assert!(!h.node(1).unwrap().has_component(Component::FileSync));
}

/// File sync configures the primary and copies its files to the others
#[tokio::test]
async fn test_file_sync() {
    let inputs = PipelineInputs {
        file_sync_paths: vec!["/opt/gluu/jetty/identity/conf/shibboleth3/idp".to_string()],
        ..Default::default()
    };
    let h = Harness::with_inputs(vec![node(1, "a").as_primary(), node(2, "b")], inputs);
    h.fleet.put_file("a.example.org", "/etc/csync2.key", "sync-key");

    let outcome = h.orchestrator.setup_file_sync().await;
    assert!(outcome.success);

    let config = h.fleet.file_string("a.example.org", "/etc/csync2.cfg").unwrap();
    assert!(config.contains("host a.example.org;"));
    assert!(config.contains("host b.example.org;"));
    assert!(config.contains("include /opt/gluu/jetty/identity/conf/shibboleth3/idp;"));
    assert_eq!(
        h.fleet.file_string("b.example.org", "/etc/csync2.cfg").as_deref(),
        Some(config.as_str())
    );
    assert_eq!(
        h.fleet.file_string("b.example.org", "/etc/csync2.key").as_deref(),
        Some("sync-key")
    );
    assert!(
        h.fleet
            .file_string("b.example.org", "/etc/inetd.conf")
            .unwrap()
            .contains("csync2 -i -N b.example.org")
    );
    assert!(h.fleet.has_path("b.example.org", "/etc/cron.d/csync2"));
    assert!(h.node(2).unwrap().has_component(Component::FileSync));
}

/// Dry run reports ports seen locally and from the proxy tier
#[tokio::test]
async fn test_dry_run_report() {
    let h = Harness::new(vec![node(1, "a").as_primary()]);
    h.fleet.respond("a.example.org", "</dev/tcp/10.0.0.1/443'", CommandOutput::ok("0\n"));
    h.fleet.respond(LB, "</dev/tcp/10.0.0.1/443'", CommandOutput::ok("0\n"));

    let (outcome, report) = h.orchestrator.dry_run(NodeId(1)).await;
    assert!(outcome.success);
    let report = report.unwrap();

    assert!(report.node.ssh);
    assert_eq!(report.node.open_ports().collect::<Vec<_>>(), vec![443]);
    let proxy = report.proxy.unwrap();
    assert_eq!(proxy.hostname, LB);
    assert_eq!(proxy.ports.get(&443), Some(&true));
    assert_eq!(proxy.ports.get(&80), Some(&false));
    assert!(
        h.fleet
            .commands("a.example.org")
            .iter()
            .any(|c| c.contains("sock.bind(('10.0.0.1', 80))"))
    );
}

/// An unreachable node ends the dry run without a report
#[tokio::test]
async fn test_dry_run_unreachable() {
    let h = Harness::new(vec![node(1, "a").as_primary()]);
    h.fleet.set_reachable("a.example.org", false);

    let (outcome, report) = h.orchestrator.dry_run(NodeId(1)).await;
    assert!(!outcome.success);
    assert!(report.is_none());
}

/// Inspection refreshes the OS and detected components
#[tokio::test]
async fn test_inspect_node() {
    let a = Node::new(1, "a.example.org", "10.0.0.1")
        .as_primary()
        .with_component(Component::FileSync);
    let h = Harness::new(vec![a]);
    h.fleet.add_host(
        FakeHost::new("a.example.org")
            .with_os_release(OsVersion::CentOS7)
            .with_dir("/opt/gluu-server-3.1.6/opt/opendj")
            .with_file(
                "/opt/gluu-server-3.1.6/install/community-edition-setup/setup.properties.last",
                "ip=10.0.0.1\n",
            ),
    );

    let outcome = h.orchestrator.inspect_node(NodeId(1)).await;
    assert!(outcome.success);

    let a = h.node(1).unwrap();
    assert_eq!(a.os, Some(OsVersion::CentOS7));
    assert!(a.containerized);
    assert!(a.is_installed());
    assert!(a.has_component(Component::OpenDj));
    assert!(a.has_component(Component::FileSync));
}

/// Switching the primary keeps exactly one
#[tokio::test]
async fn test_set_primary() {
    let h = Harness::new(vec![node(1, "a").as_primary(), node(2, "b")]);

    assert!(h.orchestrator.set_primary(NodeId(2)).await.success);
    let topology = h.store.snapshot();
    assert_eq!(topology.primary().map(|n| n.id), Some(NodeId(2)));
    assert_eq!(topology.nodes().filter(|n| n.is_primary).count(), 1);
}
