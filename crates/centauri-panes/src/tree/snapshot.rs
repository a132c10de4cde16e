use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{Direction, NodeId, PaneNode, PaneTree};
use crate::error::SnapshotError;
use crate::host::SessionId;

/// Per-node payload of a [`PaneNodeSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaneData {
    pub node_id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

/// Nested, serializable form of a [`PaneTree`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaneNodeSnapshot {
    pub data: PaneData,
    #[serde(default)]
    pub child_nodes: Vec<PaneNodeSnapshot>,
}

impl PaneTree {
    pub fn snapshot(&self) -> PaneNodeSnapshot {
        self.snapshot_from(self.root)
    }

    fn snapshot_from(&self, id: NodeId) -> PaneNodeSnapshot {
        let Some(node) = self.nodes.get(&id) else {
            return PaneNodeSnapshot {
                data: PaneData {
                    node_id: id,
                    parent_node_id: None,
                    direction: None,
                    session_id: None,
                },
                child_nodes: Vec::new(),
            };
        };
        PaneNodeSnapshot {
            data: PaneData {
                node_id: node.node_id,
                parent_node_id: node.parent_node_id,
                direction: node.direction,
                session_id: node.session_id,
            },
            child_nodes: node
                .child_nodes
                .iter()
                .map(|&child| self.snapshot_from(child))
                .collect(),
        }
    }

    /// Rebuild a tree from its snapshot, rejecting structures that break the
    /// at-rest invariants.
    pub fn from_snapshot(snapshot: &PaneNodeSnapshot) -> Result<Self, SnapshotError> {
        let mut nodes = HashMap::new();
        let mut stack = vec![snapshot];
        while let Some(current) = stack.pop() {
            let data = &current.data;
            let node = PaneNode {
                node_id: data.node_id,
                parent_node_id: data.parent_node_id,
                direction: data.direction,
                session_id: data.session_id,
                child_nodes: current
                    .child_nodes
                    .iter()
                    .map(|child| child.data.node_id)
                    .collect(),
            };
            if nodes.insert(data.node_id, node).is_some() {
                return Err(SnapshotError::DuplicateNodeId(data.node_id));
            }
            stack.extend(current.child_nodes.iter());
        }

        let tree = Self {
            root: snapshot.data.node_id,
            nodes,
        };
        tree.validate()?;
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(id: NodeId, session: SessionId) -> PaneNode {
        PaneNode {
            session_id: Some(session),
            ..PaneNode::new(id)
        }
    }

    fn sample() -> PaneTree {
        // root(1, h) -> [2 (v) -> [4, 5], 3]
        let mut tree = PaneTree::new(leaf(1, 10));
        tree.split_node(1, Direction::Horizontal, 2, leaf(3, 11));
        tree.split_node(2, Direction::Vertical, 4, leaf(5, 12));
        tree
    }

    #[test]
    fn test_snapshot_round_trip() {
        let tree = sample();
        let rebuilt = PaneTree::from_snapshot(&tree.snapshot()).unwrap();
        assert_eq!(rebuilt, tree);
        assert_eq!(rebuilt.snapshot(), tree.snapshot());
    }

    #[test]
    fn test_snapshot_json_shape() {
        let json = serde_json::to_value(sample().snapshot()).unwrap();

        assert_eq!(json["data"]["nodeId"], 1);
        assert_eq!(json["data"]["direction"], "horizontal");
        assert!(json["data"].get("sessionId").is_none());
        assert_eq!(json["childNodes"][0]["data"]["direction"], "vertical");
        assert_eq!(json["childNodes"][0]["childNodes"][1]["data"]["sessionId"], 12);
        assert_eq!(json["childNodes"][1]["data"]["parentNodeId"], 1);
    }

    #[test]
    fn test_snapshot_json_round_trip_preserves_child_order() {
        let tree = sample();
        let text = serde_json::to_string(&tree.snapshot()).unwrap();
        let parsed: PaneNodeSnapshot = serde_json::from_str(&text).unwrap();
        let rebuilt = PaneTree::from_snapshot(&parsed).unwrap();
        assert_eq!(rebuilt.root().child_nodes, vec![2, 3]);
        assert_eq!(rebuilt.node(2).unwrap().child_nodes, vec![4, 5]);
    }

    #[test]
    fn test_from_snapshot_rejects_duplicate_ids() {
        let mut snapshot = sample().snapshot();
        snapshot.child_nodes[1].data.node_id = 4;
        assert_eq!(
            PaneTree::from_snapshot(&snapshot),
            Err(SnapshotError::DuplicateNodeId(4))
        );
    }

    #[test]
    fn test_from_snapshot_rejects_broken_invariants() {
        let mut snapshot = sample().snapshot();
        snapshot.child_nodes[1].data.session_id = None;
        assert_eq!(
            PaneTree::from_snapshot(&snapshot),
            Err(SnapshotError::LeafWithoutSession(3))
        );

        let mut snapshot = sample().snapshot();
        snapshot.data.session_id = Some(99);
        assert_eq!(
            PaneTree::from_snapshot(&snapshot),
            Err(SnapshotError::InternalWithSession(1))
        );

        let mut snapshot = sample().snapshot();
        snapshot.child_nodes[1].data.parent_node_id = Some(2);
        assert!(matches!(
            PaneTree::from_snapshot(&snapshot),
            Err(SnapshotError::ParentMismatch { node: 3, .. })
        ));

        let mut snapshot = sample().snapshot();
        snapshot.child_nodes.pop();
        assert_eq!(
            PaneTree::from_snapshot(&snapshot),
            Err(SnapshotError::SingleChild(1))
        );
    }
}
