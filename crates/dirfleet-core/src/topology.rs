//! トポロジーモデル
//!
//! ノード集合とその役割を保持する。ミューテータはリモート状態に一切触れず、
//! メモリ上のフラグだけを更新する。

use crate::error::{FleetError, Result};
use crate::model::{Node, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// ノード集合
///
/// ID 順の `BTreeMap` で保持するため、走査順は常に決定的。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    nodes: BTreeMap<NodeId, Node>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// ノード列からトポロジーを構築（不変条件を検証）
    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Result<Self> {
        let mut topology = Self::new();
        for node in nodes {
            topology.add_node(node)?;
        }
        Ok(topology)
    }

    /// ノードを追加
    ///
    /// ID の重複、または 2 台目のプライマリは `InvariantViolation`。
    pub fn add_node(&mut self, node: Node) -> Result<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(FleetError::InvariantViolation(format!(
                "ノード ID {} は既に登録されています",
                node.id
            )));
        }
        if node.is_primary
            && let Some(current) = self.primary()
        {
            return Err(FleetError::InvariantViolation(format!(
                "プライマリは既に {} ({}) です",
                current.hostname, current.id
            )));
        }
        self.nodes.insert(node.id, node);
        Ok(())
    }

    /// 既存ノードを置き換える
    pub fn replace_node(&mut self, node: Node) -> Result<()> {
        if !self.nodes.contains_key(&node.id) {
            return Err(FleetError::NodeNotFound(node.id));
        }
        if node.is_primary
            && let Some(current) = self.primary()
            && current.id != node.id
        {
            return Err(FleetError::InvariantViolation(format!(
                "プライマリは既に {} ({}) です",
                current.hostname, current.id
            )));
        }
        self.nodes.insert(node.id, node);
        Ok(())
    }

    /// ノードを削除
    ///
    /// 他のノードが残っている間はプライマリを削除できない。
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node> {
        let node = self.nodes.get(&id).ok_or(FleetError::NodeNotFound(id))?;
        if node.is_primary && self.nodes.len() > 1 {
            return Err(FleetError::InvariantViolation(format!(
                "プライマリ {} は他のノードを先に削除するまで削除できません",
                node.hostname
            )));
        }
        self.nodes.remove(&id).ok_or(FleetError::NodeNotFound(id))
    }

    /// プライマリを付け替える
    ///
    /// 存在しない ID を指定するとプライマリが 0 台になるため拒否する。
    pub fn set_primary(&mut self, id: NodeId) -> Result<()> {
        if !self.nodes.contains_key(&id) {
            return Err(FleetError::InvariantViolation(format!(
                "ノード {} が存在しないためプライマリに設定できません",
                id
            )));
        }
        for node in self.nodes.values_mut() {
            node.is_primary = node.id == id;
        }
        Ok(())
    }

    /// レプリケーション有効なノード（ID 昇順）
    ///
    /// ピア・バックエンド計算の唯一の入力。
    pub fn active_replication_set(&self) -> Vec<&Node> {
        self.nodes
            .values()
            .filter(|n| n.replication_enabled)
            .collect()
    }

    pub fn primary(&self) -> Option<&Node> {
        self.nodes.values().find(|n| n.is_primary)
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn find_by_hostname(&self, hostname: &str) -> Option<&Node> {
        self.nodes.values().find(|n| n.hostname == hostname)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// 全ノード（ID 昇順）
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 指定ノードを除いたトポロジー
    ///
    /// 除外計算は必ずこのトポロジーから派生値を再計算して行う。
    pub fn without(&self, id: NodeId) -> Topology {
        let mut nodes = self.nodes.clone();
        nodes.remove(&id);
        Topology { nodes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_nodes() -> Topology {
        Topology::from_nodes([
            Node::new(1, "A", "10.0.0.1").as_primary().with_replication(true),
            Node::new(2, "B", "10.0.0.2").with_replication(true),
            Node::new(3, "C", "10.0.0.3"),
        ])
        .unwrap()
    }

    #[test]
    fn test_add_duplicate_id() {
        let mut topology = three_nodes();
        let err = topology.add_node(Node::new(2, "B2", "10.0.0.9")).unwrap_err();
        assert!(matches!(err, FleetError::InvariantViolation(_)));
    }

    #[test]
    fn test_add_second_primary() {
        let mut topology = three_nodes();
        let err = topology
            .add_node(Node::new(4, "D", "10.0.0.4").as_primary())
            .unwrap_err();
        assert!(matches!(err, FleetError::InvariantViolation(_)));
        assert_eq!(topology.len(), 3);
    }

    #[test]
    fn test_from_nodes_rejects_double_primary() {
        let result = Topology::from_nodes([
            Node::new(1, "A", "10.0.0.1").as_primary(),
            Node::new(2, "B", "10.0.0.2").as_primary(),
        ]);
        assert!(matches!(result, Err(FleetError::InvariantViolation(_))));
    }

    #[test]
    fn test_set_primary_moves_flag() {
        let mut topology = three_nodes();
        topology.set_primary(NodeId(3)).unwrap();
        assert_eq!(topology.primary().unwrap().id, NodeId(3));
        assert_eq!(topology.nodes().filter(|n| n.is_primary).count(), 1);
    }

    #[test]
    fn test_set_primary_unknown_node() {
        let mut topology = three_nodes();
        let err = topology.set_primary(NodeId(42)).unwrap_err();
        assert!(matches!(err, FleetError::InvariantViolation(_)));
        assert_eq!(topology.primary().unwrap().id, NodeId(1));
    }

    #[test]
    fn test_remove_primary_with_others() {
        let mut topology = three_nodes();
        let err = topology.remove_node(NodeId(1)).unwrap_err();
        assert!(matches!(err, FleetError::InvariantViolation(_)));

        topology.remove_node(NodeId(2)).unwrap();
        topology.remove_node(NodeId(3)).unwrap();
        topology.remove_node(NodeId(1)).unwrap();
        assert!(topology.is_empty());
    }

    #[test]
    fn test_active_replication_set_sorted() {
        let topology = Topology::from_nodes([
            Node::new(5, "E", "10.0.0.5").with_replication(true),
            Node::new(2, "B", "10.0.0.2").with_replication(true),
            Node::new(3, "C", "10.0.0.3"),
        ])
        .unwrap();
        let ids: Vec<_> = topology
            .active_replication_set()
            .iter()
            .map(|n| n.id.0)
            .collect();
        assert_eq!(ids, vec![2, 5]);
    }

    #[test]
    fn test_replace_node_keeps_single_primary() {
        let mut topology = three_nodes();
        let promoted = topology.get(NodeId(2)).unwrap().clone().as_primary();
        assert!(topology.replace_node(promoted).is_err());

        let updated = topology.get(NodeId(3)).unwrap().clone().with_replication(true);
        topology.replace_node(updated).unwrap();
        assert_eq!(topology.active_replication_set().len(), 3);
    }

    #[test]
    fn test_without() {
        let topology = three_nodes();
        let reduced = topology.without(NodeId(2));
        assert_eq!(reduced.len(), 2);
        assert!(!reduced.contains(NodeId(2)));
        assert_eq!(topology.len(), 3);
    }
}
