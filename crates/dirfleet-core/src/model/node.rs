//! ノード定義

use super::{ClusterConfig, Component, OsVersion, Secret};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// ノード ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ノードの認証情報（コアからは不透明）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// ディレクトリサーバーのバインドパスワード
    pub bind_password: Secret,
}

/// ディレクトリサービス fleet を構成するサーバー
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub hostname: String,
    pub ip: String,

    /// 検出済み OS（未検出なら None）
    #[serde(default)]
    pub os: Option<OsVersion>,

    #[serde(default)]
    pub is_primary: bool,

    /// ディレクトリサーバーをファイルシステムコンテナ内で動かしているか
    #[serde(default = "default_containerized")]
    pub containerized: bool,

    /// マルチマスターレプリケーション有効フラグ
    #[serde(default)]
    pub replication_enabled: bool,

    #[serde(default)]
    pub installed_components: BTreeSet<Component>,

    #[serde(default)]
    pub credentials: Credentials,
}

fn default_containerized() -> bool {
    true
}

impl Node {
    pub fn new(id: u32, hostname: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            id: NodeId(id),
            hostname: hostname.into(),
            ip: ip.into(),
            os: None,
            is_primary: false,
            containerized: true,
            replication_enabled: false,
            installed_components: BTreeSet::new(),
            credentials: Credentials::default(),
        }
    }

    pub fn with_os(mut self, os: OsVersion) -> Self {
        self.os = Some(os);
        self
    }

    pub fn as_primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    pub fn with_containerized(mut self, containerized: bool) -> Self {
        self.containerized = containerized;
        self
    }

    pub fn with_replication(mut self, enabled: bool) -> Self {
        self.replication_enabled = enabled;
        self
    }

    pub fn with_component(mut self, component: Component) -> Self {
        self.installed_components.insert(component);
        self
    }

    pub fn with_bind_password(mut self, password: impl Into<String>) -> Self {
        self.credentials.bind_password = Secret::new(password);
        self
    }

    /// コマンド実行時のルート（非コンテナなら `/`）
    pub fn container_root(&self, cluster: &ClusterConfig) -> PathBuf {
        if self.containerized {
            cluster.container_root()
        } else {
            PathBuf::from("/")
        }
    }

    /// ピア指定に使うアドレス
    pub fn peer_address<'a>(&'a self, cluster: &ClusterConfig) -> &'a str {
        if cluster.use_ip_for_peer_addresses {
            &self.ip
        } else {
            &self.hostname
        }
    }

    pub fn has_component(&self, component: Component) -> bool {
        self.installed_components.contains(&component)
    }

    /// プロダクトのインストーラが完了しているか
    pub fn is_installed(&self) -> bool {
        self.has_component(Component::Product)
    }
}
