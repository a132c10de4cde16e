use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{Detached, Direction, NodeId, PaneNode, PaneTree};
use crate::error::SessionError;
use crate::host::{SessionHost, SessionId};
use crate::registry::SessionRegistry;
use crate::session::SessionOptions;

/// Hands out node ids. Ids are never reused, even after their tab is closed.
#[derive(Debug)]
pub struct NodeIdAllocator {
    next: AtomicU64,
}

impl NodeIdAllocator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: NodeId) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn next(&self) -> NodeId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for NodeIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateNodeOptions {
    pub parent_node_id: Option<NodeId>,
    /// Bind an existing session instead of creating one.
    pub session_id: Option<SessionId>,
    pub referring_session_id: Option<SessionId>,
    pub create_new_session: bool,
}

impl Default for CreateNodeOptions {
    fn default() -> Self {
        Self {
            parent_node_id: None,
            session_id: None,
            referring_session_id: None,
            create_new_session: true,
        }
    }
}

/// Result of [`PaneTreeEngine::add_node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The new leaf was appended under the target's parent.
    Sibling { node_id: NodeId },
    /// The target became internal. `handed_down` holds what the target held
    /// before; `node_id` is the new leaf.
    Split { node_id: NodeId, handed_down: NodeId },
    NotFound,
}

impl AddOutcome {
    /// The freshly created leaf, if any.
    pub fn new_node(&self) -> Option<NodeId> {
        match *self {
            Self::Sibling { node_id } | Self::Split { node_id, .. } => Some(node_id),
            Self::NotFound => None,
        }
    }
}

/// Result of [`PaneTreeEngine::remove_leaf_node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed { collapsed: bool },
    /// The root leaf was removed; the owning tab must go too.
    TreeRemoved,
    NotALeaf,
    NotFound,
}

/// Tree mutations paired with session acquisition and release.
///
/// The engine never talks to the host directly. New sessions come from, and
/// dead ones go back to, the shared [`SessionRegistry`].
pub struct PaneTreeEngine<H: SessionHost> {
    sessions: Arc<SessionRegistry<H>>,
    node_ids: NodeIdAllocator,
    shell_env: BTreeMap<String, String>,
}

impl<H: SessionHost> PaneTreeEngine<H> {
    pub fn new(sessions: Arc<SessionRegistry<H>>) -> Self {
        Self {
            sessions,
            node_ids: NodeIdAllocator::new(),
            shell_env: BTreeMap::new(),
        }
    }

    /// Environment seeded into every new session.
    pub fn with_shell_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.shell_env = env;
        self
    }

    pub fn with_node_ids(mut self, node_ids: NodeIdAllocator) -> Self {
        self.node_ids = node_ids;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry<H>> {
        &self.sessions
    }

    /// Allocate a node, creating and starting a session for it unless one is
    /// supplied or `create_new_session` is off.
    pub async fn create_single_node(
        &self,
        options: CreateNodeOptions,
    ) -> Result<PaneNode, SessionError> {
        let node_id = self.node_ids.next();

        let session_id = match options.session_id {
            Some(id) => Some(id),
            None if options.create_new_session => {
                let cwd = options
                    .referring_session_id
                    .and_then(|id| self.sessions.get(id))
                    .and_then(|session| session.working_directory().map(str::to_string));
                let session = self
                    .sessions
                    .create_session(SessionOptions {
                        env: (!self.shell_env.is_empty()).then(|| self.shell_env.clone()),
                        current_working_directory: cwd,
                        referring_session_id: options.referring_session_id,
                        ..Default::default()
                    })
                    .await?;
                session.start();
                Some(session.id())
            }
            None => None,
        };

        Ok(PaneNode {
            parent_node_id: options.parent_node_id,
            session_id,
            ..PaneNode::new(node_id)
        })
    }

    /// A single-leaf tree with a fresh session.
    pub async fn create_tree(
        &self,
        referring_session_id: Option<SessionId>,
    ) -> Result<PaneTree, SessionError> {
        let root = self
            .create_single_node(CreateNodeOptions {
                referring_session_id,
                ..Default::default()
            })
            .await?;
        Ok(PaneTree::new(root))
    }

    /// Split the pane `start_node_id` along `direction`.
    ///
    /// The new session is acquired before the tree is touched, so a failed
    /// creation leaves `tree` unchanged. Without an explicit referring
    /// session the target's own session is used.
    pub async fn add_node(
        &self,
        tree: &mut PaneTree,
        start_node_id: NodeId,
        direction: Direction,
        referring_session_id: Option<SessionId>,
    ) -> Result<AddOutcome, SessionError> {
        let (sibling_of, target_session) = match tree.find_node(start_node_id) {
            (_, None) => {
                log::debug!("add_node: node {start_node_id} not found");
                return Ok(AddOutcome::NotFound);
            }
            (parent, Some(target)) => (
                parent
                    .filter(|parent| parent.direction == Some(direction))
                    .map(|parent| parent.node_id),
                target.session_id,
            ),
        };

        let new_leaf = self
            .create_single_node(CreateNodeOptions {
                parent_node_id: Some(sibling_of.unwrap_or(start_node_id)),
                referring_session_id: referring_session_id.or(target_session),
                ..Default::default()
            })
            .await?;
        let node_id = new_leaf.node_id;
        let session_id = new_leaf.session_id;

        let outcome = match sibling_of {
            Some(parent) => tree
                .attach_child(parent, new_leaf)
                .then_some(AddOutcome::Sibling { node_id }),
            None => {
                let handed_down = self.node_ids.next();
                tree.split_node(start_node_id, direction, handed_down, new_leaf)
                    .then_some(AddOutcome::Split {
                        node_id,
                        handed_down,
                    })
            }
        };

        match outcome {
            Some(outcome) => {
                log::debug!("add_node: {start_node_id} {direction:?} -> {outcome:?}");
                Ok(outcome)
            }
            None => {
                if let Some(id) = session_id {
                    self.sessions.remove(id);
                }
                Ok(AddOutcome::NotFound)
            }
        }
    }

    /// Remove a leaf and dispose its session. Internal nodes are left alone.
    pub fn remove_leaf_node(&self, tree: &mut PaneTree, node_id: NodeId) -> RemoveOutcome {
        let outcome = match tree.detach_leaf(node_id) {
            Detached::Leaf {
                session_id,
                collapsed,
            } => {
                self.release(session_id);
                RemoveOutcome::Removed { collapsed }
            }
            Detached::Root { session_id } => {
                self.release(session_id);
                RemoveOutcome::TreeRemoved
            }
            Detached::NotALeaf => RemoveOutcome::NotALeaf,
            Detached::NotFound => RemoveOutcome::NotFound,
        };
        log::debug!("remove_leaf_node: {node_id} -> {outcome:?}");
        outcome
    }

    /// Dispose every session bound in the subtree rooted at `subtree_root`.
    pub fn terminate_sessions(&self, tree: &mut PaneTree, subtree_root: NodeId) {
        for id in tree.take_sessions(subtree_root) {
            self.sessions.remove(id);
        }
    }

    pub fn terminate_all(&self, tree: &mut PaneTree) {
        self.terminate_sessions(tree, tree.root_id());
    }

    fn release(&self, session_id: Option<SessionId>) {
        if let Some(id) = session_id {
            self.sessions.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionPhase;
    use crate::testing::{settle, HostCall, MockHost};

    struct Fixture {
        host: Arc<MockHost>,
        engine: PaneTreeEngine<MockHost>,
    }

    fn fixture() -> Fixture {
        let host = Arc::new(MockHost::new());
        let sessions = Arc::new(SessionRegistry::new(Arc::clone(&host)));
        Fixture {
            host,
            engine: PaneTreeEngine::new(sessions),
        }
    }

    /// root(h) -> [a, b, c]
    async fn row_of_three(engine: &PaneTreeEngine<MockHost>) -> PaneTree {
        let mut tree = engine.create_tree(None).await.unwrap();
        let root = tree.root_id();
        let AddOutcome::Split { handed_down, .. } = engine
            .add_node(&mut tree, root, Direction::Horizontal, None)
            .await
            .unwrap()
        else {
            panic!("expected a split");
        };
        engine
            .add_node(&mut tree, handed_down, Direction::Horizontal, None)
            .await
            .unwrap();
        tree
    }

    #[tokio::test]
    async fn test_create_single_node_creates_and_starts_session() {
        let Fixture { host, engine } = fixture();

        let node = engine
            .create_single_node(CreateNodeOptions::default())
            .await
            .unwrap();

        let id = node.session_id.unwrap();
        assert_eq!(host.created(), 1);
        assert_eq!(
            engine.sessions().get(id).unwrap().phase(),
            SessionPhase::Active
        );
    }

    #[tokio::test]
    async fn test_create_single_node_without_session() {
        let Fixture { host, engine } = fixture();

        let bound = engine
            .create_single_node(CreateNodeOptions {
                session_id: Some(77),
                ..Default::default()
            })
            .await
            .unwrap();
        let bare = engine
            .create_single_node(CreateNodeOptions {
                create_new_session: false,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(bound.session_id, Some(77));
        assert_eq!(bare.session_id, None);
        assert_ne!(bound.node_id, bare.node_id);
        assert_eq!(host.created(), 0);
    }

    #[tokio::test]
    async fn test_new_sessions_get_env_and_referring_directory() {
        let host = Arc::new(MockHost::new());
        let sessions = Arc::new(SessionRegistry::new(Arc::clone(&host)));
        let engine = PaneTreeEngine::new(Arc::clone(&sessions))
            .with_shell_env(BTreeMap::from([("TERM".to_string(), "xterm".to_string())]));
        let parent = sessions
            .create_session(SessionOptions {
                current_working_directory: Some("/srv".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        engine
            .create_single_node(CreateNodeOptions {
                referring_session_id: Some(parent.id()),
                ..Default::default()
            })
            .await
            .unwrap();

        let Some(HostCall::Create(request)) = host.calls().into_iter().last() else {
            panic!("expected a create call");
        };
        assert_eq!(request.cwd.as_deref(), Some("/srv"));
        assert_eq!(request.referring_session_id, Some(parent.id()));
        assert_eq!(request.env.unwrap()["TERM"], "xterm");
    }

    #[tokio::test]
    async fn test_split_root_leaf() {
        let host = Arc::new(MockHost::new());
        let sessions = Arc::new(SessionRegistry::new(Arc::clone(&host)));
        let engine =
            PaneTreeEngine::new(sessions).with_node_ids(NodeIdAllocator::starting_at(5));
        let mut tree = engine.create_tree(None).await.unwrap();
        let original = tree.root().session_id;
        assert_eq!(tree.root_id(), 5);

        let outcome = engine
            .add_node(&mut tree, 5, Direction::Horizontal, None)
            .await
            .unwrap();

        let AddOutcome::Split {
            node_id,
            handed_down,
        } = outcome
        else {
            panic!("expected a split, got {outcome:?}");
        };
        let root = tree.root();
        assert_eq!(root.direction, Some(Direction::Horizontal));
        assert_eq!(root.session_id, None);
        assert_eq!(root.child_nodes, vec![handed_down, node_id]);
        assert_eq!(tree.node(handed_down).unwrap().session_id, original);
        assert!(tree.node(node_id).unwrap().session_id.is_some());
        assert_eq!(host.created(), 2);
        assert!(host.ended().is_empty());
        assert!(tree.validate().is_ok());
    }

    #[tokio::test]
    async fn test_add_node_appends_sibling_for_same_direction() {
        let Fixture { host, engine } = fixture();
        let mut tree = engine.create_tree(None).await.unwrap();
        let root = tree.root_id();
        engine
            .add_node(&mut tree, root, Direction::Horizontal, None)
            .await
            .unwrap();
        let target = tree.root().child_nodes[1];
        let target_session = tree.node(target).unwrap().session_id;

        let outcome = engine
            .add_node(&mut tree, target, Direction::Horizontal, None)
            .await
            .unwrap();

        let AddOutcome::Sibling { node_id } = outcome else {
            panic!("expected a sibling, got {outcome:?}");
        };
        assert_eq!(tree.root().child_nodes.len(), 3);
        assert_eq!(tree.root().child_nodes[2], node_id);
        assert_eq!(tree.node(target).unwrap().session_id, target_session);
        assert!(tree.node(target).unwrap().is_leaf());
        assert_eq!(host.created(), 3);
        assert!(tree.validate().is_ok());
    }

    #[tokio::test]
    async fn test_add_node_splits_for_other_direction() {
        let Fixture { engine, .. } = fixture();
        let mut tree = row_of_three(&engine).await;
        let target = tree.root().child_nodes[1];
        let original = tree.node(target).unwrap().session_id;

        let outcome = engine
            .add_node(&mut tree, target, Direction::Vertical, None)
            .await
            .unwrap();

        let AddOutcome::Split { handed_down, .. } = outcome else {
            panic!("expected a split, got {outcome:?}");
        };
        let column = tree.node(target).unwrap();
        assert_eq!(column.direction, Some(Direction::Vertical));
        assert_eq!(column.child_nodes.len(), 2);
        assert_eq!(column.session_id, None);
        assert_eq!(tree.node(handed_down).unwrap().session_id, original);
        assert_eq!(tree.root().child_nodes.len(), 3);
        assert!(tree.validate().is_ok());
    }

    #[tokio::test]
    async fn test_add_node_defaults_referring_session_to_target() {
        let Fixture { host, engine } = fixture();
        let mut tree = engine.create_tree(None).await.unwrap();
        let root = tree.root_id();
        let root_session = tree.root().session_id;

        engine
            .add_node(&mut tree, root, Direction::Vertical, None)
            .await
            .unwrap();

        let Some(HostCall::Create(request)) = host.calls().into_iter().last() else {
            panic!("expected a create call");
        };
        assert_eq!(request.referring_session_id, root_session);
    }

    #[tokio::test]
    async fn test_add_node_unknown_target_is_a_noop() {
        let Fixture { host, engine } = fixture();
        let mut tree = engine.create_tree(None).await.unwrap();
        let before = tree.clone();

        let outcome = engine
            .add_node(&mut tree, 999, Direction::Vertical, None)
            .await
            .unwrap();

        assert_eq!(outcome, AddOutcome::NotFound);
        assert_eq!(tree, before);
        assert_eq!(host.created(), 1);
    }

    #[tokio::test]
    async fn test_failed_session_creation_leaves_tree_untouched() {
        let Fixture { host, engine } = fixture();
        let mut tree = engine.create_tree(None).await.unwrap();
        let before = tree.clone();
        host.set_fail_create(true);

        let root = tree.root_id();
        let result = engine
            .add_node(&mut tree, root, Direction::Horizontal, None)
            .await;

        assert!(matches!(result, Err(SessionError::Creation(_))));
        assert_eq!(tree, before);
    }

    #[tokio::test]
    async fn test_missing_identifier_is_a_creation_error() {
        let Fixture { host, engine } = fixture();
        host.set_return_no_id(true);

        let result = engine.create_tree(None).await;

        assert!(matches!(result, Err(SessionError::NoIdentifier)));
    }

    #[tokio::test]
    async fn test_remove_middle_leaf_of_row() {
        let Fixture { host, engine } = fixture();
        let mut tree = row_of_three(&engine).await;
        let middle = tree.root().child_nodes[1];
        let middle_session = tree.node(middle).unwrap().session_id.unwrap();

        let outcome = engine.remove_leaf_node(&mut tree, middle);
        settle().await;

        assert_eq!(outcome, RemoveOutcome::Removed { collapsed: false });
        assert_eq!(tree.root().child_nodes.len(), 2);
        assert_eq!(host.ended(), vec![middle_session]);
        assert!(!engine.sessions().contains(middle_session));
        assert!(tree.validate().is_ok());
    }

    #[tokio::test]
    async fn test_remove_collapses_row_into_column() {
        let Fixture { engine, .. } = fixture();
        // root(h) -> [column(v) -> [top, bottom], right]
        let mut tree = engine.create_tree(None).await.unwrap();
        let root = tree.root_id();
        let AddOutcome::Split {
            node_id: right,
            handed_down: left,
        } = engine
            .add_node(&mut tree, root, Direction::Horizontal, None)
            .await
            .unwrap()
        else {
            panic!("expected a split");
        };
        engine
            .add_node(&mut tree, left, Direction::Vertical, None)
            .await
            .unwrap();
        let column_children = tree.node(left).unwrap().child_nodes.clone();

        let outcome = engine.remove_leaf_node(&mut tree, right);

        assert_eq!(outcome, RemoveOutcome::Removed { collapsed: true });
        let root = tree.root();
        assert_eq!(root.direction, Some(Direction::Vertical));
        assert_eq!(root.session_id, None);
        assert_eq!(root.child_nodes, column_children);
        assert!(tree.node(left).is_none());
        assert!(tree.validate().is_ok());
    }

    #[tokio::test]
    async fn test_remove_collapses_into_surviving_leaf() {
        let Fixture { engine, .. } = fixture();
        let mut tree = engine.create_tree(None).await.unwrap();
        let root = tree.root_id();
        let AddOutcome::Split {
            node_id,
            handed_down,
        } = engine
            .add_node(&mut tree, root, Direction::Vertical, None)
            .await
            .unwrap()
        else {
            panic!("expected a split");
        };
        let survivor = tree.node(node_id).unwrap().session_id;

        engine.remove_leaf_node(&mut tree, handed_down);

        assert!(tree.root().is_leaf());
        assert_eq!(tree.root().session_id, survivor);
        assert_eq!(tree.root().direction, None);
        assert_eq!(tree.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_sole_root_leaf_removes_tree() {
        let Fixture { host, engine } = fixture();
        let mut tree = engine.create_tree(None).await.unwrap();
        let root = tree.root_id();

        let outcome = engine.remove_leaf_node(&mut tree, root);
        settle().await;

        assert_eq!(outcome, RemoveOutcome::TreeRemoved);
        assert_eq!(host.ended().len(), 1);
        assert!(engine.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_remove_internal_or_unknown_node_is_a_noop() {
        let Fixture { host, engine } = fixture();
        let mut tree = row_of_three(&engine).await;
        let before = tree.clone();

        let root = tree.root_id();
        assert_eq!(engine.remove_leaf_node(&mut tree, root), RemoveOutcome::NotALeaf);
        assert_eq!(engine.remove_leaf_node(&mut tree, 999), RemoveOutcome::NotFound);
        settle().await;

        assert_eq!(tree, before);
        assert!(host.ended().is_empty());
    }

    #[tokio::test]
    async fn test_terminate_sessions_disposes_subtree() {
        let Fixture { host, engine } = fixture();
        let mut tree = row_of_three(&engine).await;
        let first = tree.root().child_nodes[0];
        engine
            .add_node(&mut tree, first, Direction::Vertical, None)
            .await
            .unwrap();

        engine.terminate_sessions(&mut tree, first);
        settle().await;
        assert_eq!(host.ended().len(), 2);
        assert_eq!(engine.sessions().len(), 2);

        engine.terminate_all(&mut tree);
        settle().await;
        assert_eq!(host.ended().len(), 4);
        assert!(engine.sessions().is_empty());
    }

    #[test]
    fn test_node_ids_are_monotonic() {
        let ids = NodeIdAllocator::starting_at(10);
        assert_eq!(ids.next(), 10);
        assert_eq!(ids.next(), 11);
        assert_eq!(ids.next(), 12);
    }
}
