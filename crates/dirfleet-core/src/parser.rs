//! dirfleet.kdl インベントリパーサー
//!
//! `cluster` ブロックでクラスタ共通設定を、`node <id>` ブロックで各ノードを定義する。
//! 不明なノードはスキップする。

use crate::error::{FleetError, Result};
use crate::model::{ClusterConfig, Node, OsVersion, Secret};
use crate::topology::Topology;
use kdl::{KdlDocument, KdlNode};
use std::path::Path;

/// パース済みインベントリ
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub cluster: ClusterConfig,
    pub nodes: Vec<Node>,
}

impl Inventory {
    /// ノード定義からトポロジーを構築
    pub fn topology(&self) -> Result<Topology> {
        Topology::from_nodes(self.nodes.iter().cloned())
    }
}

/// KDLファイルを Inventory にパース
pub fn parse_inventory_file(path: &Path) -> Result<Inventory> {
    let content = std::fs::read_to_string(path)?;
    parse_inventory(&content)
}

/// KDL文字列を Inventory にパース
pub fn parse_inventory(content: &str) -> Result<Inventory> {
    let doc: KdlDocument = content.parse()?;

    let mut cluster = None;
    let mut nodes = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "cluster" => cluster = Some(parse_cluster(node)?),
            "node" => nodes.push(parse_node(node)?),
            _ => {
                // 不明なノードはスキップ
            }
        }
    }

    let cluster = cluster
        .ok_or_else(|| FleetError::InvalidConfig("cluster ノードが必要です".to_string()))?;

    let inventory = Inventory { cluster, nodes };
    // 重複 ID・プライマリ重複をここで弾く
    inventory.topology()?;
    Ok(inventory)
}

fn first_string(node: &KdlNode) -> Option<String> {
    node.entries()
        .first()
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn first_bool(node: &KdlNode) -> Option<bool> {
    node.entries().first().and_then(|e| e.value().as_bool())
}

fn named_string(node: &KdlNode, key: &str) -> Option<String> {
    node.entries().iter().find_map(|entry| {
        let name = entry.name()?;
        if name.value() == key {
            entry.value().as_string().map(|s| s.to_string())
        } else {
            None
        }
    })
}

/// cluster ノードをパース
fn parse_cluster(node: &KdlNode) -> Result<ClusterConfig> {
    let mut cluster = ClusterConfig {
        name: first_string(node)
            .ok_or_else(|| FleetError::InvalidConfig("cluster には名前が必要です".to_string()))?,
        ..Default::default()
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "product" => {
                    if let Some(name) = first_string(child) {
                        cluster.product_name = name;
                    }
                    if let Some(version) = named_string(child, "version") {
                        cluster.product_version = version;
                    }
                }
                "use-ip-for-peers" => {
                    cluster.use_ip_for_peer_addresses = first_bool(child).unwrap_or(false);
                }
                "replication-dn" => {
                    if let Some(dn) = first_string(child) {
                        cluster.replication_bind_dn = dn;
                    }
                }
                "replication-password" => {
                    if let Some(pw) = first_string(child) {
                        cluster.replication_password = Secret::new(pw);
                    }
                }
                "base-dn" => {
                    let dns: Vec<String> = child
                        .entries()
                        .iter()
                        .filter(|e| e.name().is_none())
                        .filter_map(|e| e.value().as_string().map(|s| s.to_string()))
                        .collect();
                    if !dns.is_empty() {
                        cluster.base_dns = dns;
                    }
                }
                "load-balancer" => {
                    cluster.load_balancer_host = first_string(child);
                    cluster.load_balancer_ip = named_string(child, "ip");
                }
                "cache" => {
                    cluster.cache_host = first_string(child);
                    cluster.cache_ip = named_string(child, "ip");
                }
                "external-load-balancer" => {
                    cluster.external_load_balancer = first_bool(child).unwrap_or(false);
                }
                "ssh-user" => {
                    if let Some(user) = first_string(child) {
                        cluster.ssh_user = user;
                    }
                }
                _ => {}
            }
        }
    }

    if cluster.product_version.is_empty() {
        return Err(FleetError::InvalidConfig(format!(
            "cluster '{}' に product version が指定されていません",
            cluster.name
        )));
    }

    Ok(cluster)
}

/// node ノードをパース
fn parse_node(node: &KdlNode) -> Result<Node> {
    let id = node
        .entries()
        .first()
        .and_then(|e| e.value().as_integer())
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| FleetError::InvalidConfig("node には数値 ID が必要です".to_string()))?;

    let mut hostname = None;
    let mut ip = None;
    let mut parsed = Node::new(id, "", "");

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "hostname" => hostname = first_string(child),
                "ip" => ip = first_string(child),
                "os" => {
                    if let Some(os) = first_string(child) {
                        parsed.os = Some(os.parse::<OsVersion>()?);
                    }
                }
                "primary" => parsed.is_primary = first_bool(child).unwrap_or(true),
                "containerized" => parsed.containerized = first_bool(child).unwrap_or(true),
                "bind-password" => {
                    if let Some(pw) = first_string(child) {
                        parsed.credentials.bind_password = Secret::new(pw);
                    }
                }
                _ => {}
            }
        }
    }

    parsed.hostname = hostname.ok_or_else(|| {
        FleetError::InvalidConfig(format!("node {} に hostname が必要です", id))
    })?;
    parsed.ip =
        ip.ok_or_else(|| FleetError::InvalidConfig(format!("node {} に ip が必要です", id)))?;

    Ok(parsed)
}
