//! レプリケーショントポロジーの派生値計算
//!
//! すべて `Topology::active_replication_set()` と `ClusterConfig` からの純関数。
//! ノードを除外したい場合は文字列フィルタではなく `Topology::without` で
//! 集合を作り直してから再計算する。

use crate::error::{FleetError, Result};
use crate::model::{ClusterConfig, Node, NodeId};
use crate::topology::Topology;
use std::collections::BTreeMap;

/// ディレクトリサーバーの LDAPS ポート
pub const DIRECTORY_PORT: u16 = 1636;

/// ピアリスト先頭に必ず入るループバック
pub const LOOPBACK_ENDPOINT: &str = "localhost:1636";

/// トポロジーから派生設定を計算する
#[derive(Debug, Clone, Copy)]
pub struct Configurator<'a> {
    topology: &'a Topology,
    cluster: &'a ClusterConfig,
}

impl<'a> Configurator<'a> {
    pub fn new(topology: &'a Topology, cluster: &'a ClusterConfig) -> Self {
        Self { topology, cluster }
    }

    /// `<address>:1636`
    pub fn endpoint(&self, node: &Node) -> String {
        format!("{}:{}", node.peer_address(self.cluster), DIRECTORY_PORT)
    }

    /// ノードのピアエンドポイント列
    ///
    /// 順序: ループバック、自ノード、残りの有効メンバー（ID 昇順）。
    /// 対象ノードが有効集合に含まれない場合は `NotInActiveSet`。
    pub fn peer_endpoints(&self, id: NodeId) -> Result<Vec<String>> {
        let active = self.topology.active_replication_set();
        let own = active
            .iter()
            .find(|n| n.id == id)
            .ok_or(FleetError::NotInActiveSet(id))?;

        let mut endpoints = Vec::with_capacity(active.len() + 1);
        endpoints.push(LOOPBACK_ENDPOINT.to_string());
        endpoints.push(self.endpoint(own));
        endpoints.extend(
            active
                .iter()
                .filter(|n| n.id != id)
                .map(|n| self.endpoint(n)),
        );
        Ok(endpoints)
    }

    /// 有効メンバー全員分のピアエンドポイント
    pub fn peer_map(&self) -> BTreeMap<NodeId, Vec<String>> {
        self.topology
            .active_replication_set()
            .into_iter()
            .filter_map(|n| self.peer_endpoints(n.id).ok().map(|eps| (n.id, eps)))
            .collect()
    }

    /// 認証サーバーが参照する LDAP プロバイダ一覧
    ///
    /// ループバックの後に有効メンバーを ID 昇順で並べる。
    pub fn authentication_endpoints(&self) -> Vec<String> {
        std::iter::once(LOOPBACK_ENDPOINT.to_string())
            .chain(
                self.topology
                    .active_replication_set()
                    .into_iter()
                    .map(|n| self.endpoint(n)),
            )
            .collect()
    }

    /// ファイル同期グループのメンバー（ID 昇順）
    pub fn sync_group_members(&self, exclude_hostname: Option<&str>) -> Vec<&'a Node> {
        self.topology
            .nodes()
            .filter(|n| Some(n.hostname.as_str()) != exclude_hostname)
            .collect()
    }

    /// プロキシのバックエンド（ID 昇順）
    pub fn proxy_backends(&self, exclude: Option<NodeId>) -> Vec<&'a Node> {
        self.topology
            .nodes()
            .filter(|n| Some(n.id) != exclude)
            .collect()
    }
}
