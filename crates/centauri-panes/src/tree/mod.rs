//! Pane layout trees.
//!
//! A tab's layout is an n-ary tree stored as an arena: nodes live in a flat
//! table keyed by [`NodeId`], and parent/child links are ids. A node's
//! `child_nodes` order is its on-screen order (left to right for
//! [`Direction::Horizontal`], top to bottom for [`Direction::Vertical`]).
//!
//! At rest every leaf holds exactly one session and no internal node holds
//! one. The structural algorithms here keep that true; [`engine`] pairs them
//! with session acquisition and disposal.

pub mod engine;
pub mod snapshot;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::SnapshotError;
use crate::host::SessionId;

pub use engine::{AddOutcome, CreateNodeOptions, NodeIdAllocator, PaneTreeEngine, RemoveOutcome};
pub use snapshot::{PaneData, PaneNodeSnapshot};

/// Globally unique, never reused pane identifier.
pub type NodeId = u64;

/// Layout axis of a node's children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Children side by side.
    Horizontal,
    /// Children stacked.
    Vertical,
}

/// One pane in the layout tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneNode {
    pub node_id: NodeId,
    /// Back-reference only; the parent's `child_nodes` is what owns this node.
    pub parent_node_id: Option<NodeId>,
    pub direction: Option<Direction>,
    pub session_id: Option<SessionId>,
    pub child_nodes: Vec<NodeId>,
}

impl PaneNode {
    /// A fresh leaf with no parent, direction or session yet.
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            parent_node_id: None,
            direction: None,
            session_id: None,
            child_nodes: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.child_nodes.is_empty()
    }
}

/// What [`PaneTree::detach_leaf`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detached {
    /// The leaf was removed. `collapsed` is set when its parent was left with
    /// one child and absorbed it.
    Leaf {
        session_id: Option<SessionId>,
        collapsed: bool,
    },
    /// The leaf was the root; the tree is now empty and should be dropped.
    Root { session_id: Option<SessionId> },
    NotALeaf,
    NotFound,
}

/// The layout tree of one tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneTree {
    root: NodeId,
    nodes: HashMap<NodeId, PaneNode>,
}

impl PaneTree {
    /// A tree consisting of `root` alone.
    pub fn new(mut root: PaneNode) -> Self {
        root.parent_node_id = None;
        root.child_nodes.clear();
        let id = root.node_id;
        Self {
            root: id,
            nodes: HashMap::from([(id, root)]),
        }
    }

    pub fn root_id(&self) -> NodeId {
        self.root
    }

    pub fn root(&self) -> &PaneNode {
        &self.nodes[&self.root]
    }

    pub fn node(&self, id: NodeId) -> Option<&PaneNode> {
        self.nodes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Depth-first search from the root in child order.
    ///
    /// Returns `(None, None)` when `node_id` is not in the tree, `(None, root)`
    /// for the root, and `(parent, node)` otherwise.
    pub fn find_node(&self, node_id: NodeId) -> (Option<&PaneNode>, Option<&PaneNode>) {
        self.find_from(self.root, None, node_id)
    }

    fn find_from(
        &self,
        current: NodeId,
        parent: Option<NodeId>,
        target: NodeId,
    ) -> (Option<&PaneNode>, Option<&PaneNode>) {
        let Some(node) = self.nodes.get(&current) else {
            return (None, None);
        };
        if node.node_id == target {
            return (parent.and_then(|id| self.nodes.get(&id)), Some(node));
        }
        for &child in &node.child_nodes {
            let found = self.find_from(child, Some(current), target);
            if found.1.is_some() {
                return found;
            }
        }
        (None, None)
    }

    /// Node ids in depth-first order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.get(&id) {
                ids.push(id);
                stack.extend(node.child_nodes.iter().rev());
            }
        }
        ids
    }

    /// Leaves in on-screen order.
    pub fn leaves(&self) -> Vec<&PaneNode> {
        self.node_ids()
            .into_iter()
            .filter_map(|id| self.nodes.get(&id))
            .filter(|node| node.is_leaf())
            .collect()
    }

    /// Sessions bound anywhere in the tree, in on-screen order.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.node_ids()
            .into_iter()
            .filter_map(|id| self.nodes.get(&id).and_then(|node| node.session_id))
            .collect()
    }

    /// Check the at-rest invariants: parent back-references match, leaves
    /// hold a session, internal nodes hold none and have at least two children.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        let mut stack = vec![(self.root, None)];
        while let Some((id, parent)) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            if node.parent_node_id != parent {
                return Err(SnapshotError::ParentMismatch {
                    node: id,
                    recorded: node.parent_node_id,
                    actual: parent,
                });
            }
            match (node.is_leaf(), node.session_id) {
                (true, None) => return Err(SnapshotError::LeafWithoutSession(id)),
                (false, Some(_)) => return Err(SnapshotError::InternalWithSession(id)),
                _ => {}
            }
            if node.child_nodes.len() == 1 {
                return Err(SnapshotError::SingleChild(id));
            }
            stack.extend(node.child_nodes.iter().map(|&child| (child, Some(id))));
        }
        Ok(())
    }

    /// Append `child` as the last child of `parent`.
    pub(crate) fn attach_child(&mut self, parent: NodeId, mut child: PaneNode) -> bool {
        let Some(parent_node) = self.nodes.get_mut(&parent) else {
            return false;
        };
        parent_node.child_nodes.push(child.node_id);
        child.parent_node_id = Some(parent);
        self.nodes.insert(child.node_id, child);
        true
    }

    /// Turn `target` into an internal node laid out along `direction`.
    ///
    /// Whatever `target` held (its session, or its children and their
    /// direction) moves down into a new first child `handed_down`. `new_leaf`
    /// becomes the second child.
    pub(crate) fn split_node(
        &mut self,
        target: NodeId,
        direction: Direction,
        handed_down: NodeId,
        mut new_leaf: PaneNode,
    ) -> bool {
        let Some(target_node) = self.nodes.get_mut(&target) else {
            return false;
        };

        let moved_children = std::mem::take(&mut target_node.child_nodes);
        let first = PaneNode {
            node_id: handed_down,
            parent_node_id: Some(target),
            direction: if moved_children.is_empty() {
                None
            } else {
                target_node.direction
            },
            session_id: target_node.session_id.take(),
            child_nodes: moved_children,
        };
        new_leaf.parent_node_id = Some(target);
        target_node.direction = Some(direction);
        target_node.child_nodes = vec![handed_down, new_leaf.node_id];

        for child in &first.child_nodes {
            if let Some(grandchild) = self.nodes.get_mut(child) {
                grandchild.parent_node_id = Some(handed_down);
            }
        }
        self.nodes.insert(handed_down, first);
        self.nodes.insert(new_leaf.node_id, new_leaf);
        true
    }

    /// Remove the leaf `node_id`, collapsing its parent if only one child is left.
    ///
    /// The removed leaf's session id is handed back for disposal; this method
    /// does not touch sessions itself.
    pub(crate) fn detach_leaf(&mut self, node_id: NodeId) -> Detached {
        let parent_id = match self.find_node(node_id) {
            (_, None) => return Detached::NotFound,
            (_, Some(node)) if !node.is_leaf() => return Detached::NotALeaf,
            (parent, Some(_)) => parent.map(|parent| parent.node_id),
        };

        let Some(parent_id) = parent_id else {
            let session_id = self
                .nodes
                .get_mut(&node_id)
                .and_then(|root| root.session_id.take());
            return Detached::Root { session_id };
        };

        let session_id = self.nodes.remove(&node_id).and_then(|node| node.session_id);
        let Some(parent) = self.nodes.get_mut(&parent_id) else {
            return Detached::Leaf {
                session_id,
                collapsed: false,
            };
        };
        parent.child_nodes.retain(|&child| child != node_id);

        let collapsed = parent.child_nodes.len() == 1;
        if collapsed {
            self.collapse_into_parent(parent_id);
        }
        Detached::Leaf {
            session_id,
            collapsed,
        }
    }

    /// Replace a single-child node's contents with its child's.
    fn collapse_into_parent(&mut self, parent_id: NodeId) {
        let Some(only_child) = self
            .nodes
            .get(&parent_id)
            .and_then(|parent| parent.child_nodes.first().copied())
        else {
            return;
        };
        let Some(child) = self.nodes.remove(&only_child) else {
            return;
        };

        for grandchild in &child.child_nodes {
            if let Some(node) = self.nodes.get_mut(grandchild) {
                node.parent_node_id = Some(parent_id);
            }
        }
        if let Some(parent) = self.nodes.get_mut(&parent_id) {
            parent.direction = child.direction;
            parent.session_id = child.session_id;
            parent.child_nodes = child.child_nodes;
        }
    }

    /// Clear and return every session id in the subtree rooted at `root`.
    pub(crate) fn take_sessions(&mut self, root: NodeId) -> Vec<SessionId> {
        let mut sessions = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(&id) {
                sessions.extend(node.session_id.take());
                stack.extend(node.child_nodes.iter().rev());
            }
        }
        sessions
    }
}
