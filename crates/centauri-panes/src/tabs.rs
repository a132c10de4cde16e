//! The tab collection.
//!
//! Every tab's tree is owned by one worker task. All reads and writes of that
//! tree are requests on the tab's channel, so a split that is waiting on the
//! host for its new session holds off every later request for the same tab.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::error::SessionError;
use crate::host::{SessionHost, SessionId};
use crate::tree::{
    AddOutcome, Direction, NodeId, PaneNodeSnapshot, PaneTree, PaneTreeEngine, RemoveOutcome,
};

pub type TabId = String;

pub const DEFAULT_TAB_NAME: &str = "New Tab";

const TAB_QUEUE_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub id: TabId,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTabOptions {
    pub name: Option<String>,
    pub referring_session_id: Option<SessionId>,
}

enum TabRequest {
    AddNode {
        node_id: NodeId,
        direction: Direction,
        referring_session_id: Option<SessionId>,
        reply: oneshot::Sender<Result<AddOutcome, SessionError>>,
    },
    RemoveLeaf {
        node_id: NodeId,
        reply: oneshot::Sender<LeafRemoval>,
    },
    Snapshot {
        reply: oneshot::Sender<PaneNodeSnapshot>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Result of a pane removal as seen by the registry.
struct LeafRemoval {
    outcome: RemoveOutcome,
    /// Session that was bound to the removed pane.
    released: Option<SessionId>,
    /// First session still on screen in the tab.
    survivor: Option<SessionId>,
}

struct TabHandle {
    info: TabInfo,
    requests: mpsc::Sender<TabRequest>,
}

pub struct TabRegistry<H: SessionHost> {
    engine: Arc<PaneTreeEngine<H>>,
    tabs: Mutex<Vec<TabHandle>>,
    active_sessions: Mutex<HashMap<TabId, SessionId>>,
    focused_tab: Mutex<Option<TabId>>,
    last_tab_id: Mutex<u64>,
}

impl<H: SessionHost> TabRegistry<H> {
    pub fn new(engine: Arc<PaneTreeEngine<H>>) -> Self {
        Self {
            engine,
            tabs: Mutex::new(Vec::new()),
            active_sessions: Mutex::new(HashMap::new()),
            focused_tab: Mutex::new(None),
            last_tab_id: Mutex::new(0),
        }
    }

    pub fn engine(&self) -> &Arc<PaneTreeEngine<H>> {
        &self.engine
    }

    /// Open a tab holding a single pane with a fresh session.
    pub async fn create_tab(&self, options: NewTabOptions) -> Result<TabId, SessionError> {
        let tree = self.engine.create_tree(options.referring_session_id).await?;
        let root_session = tree.root().session_id;

        let id = self.next_tab_id();
        let name = options.name.unwrap_or_else(|| DEFAULT_TAB_NAME.to_string());
        let (requests, rx) = mpsc::channel(TAB_QUEUE_DEPTH);
        tokio::spawn(run_tab(id.clone(), Arc::clone(&self.engine), tree, rx));

        self.handles().push(TabHandle {
            info: TabInfo {
                id: id.clone(),
                name,
            },
            requests,
        });
        if let Some(session) = root_session {
            self.set_active_session(&id, session);
        }
        log::info!("Opened tab {id}");
        Ok(id)
    }

    /// Split `node_id` in tab `tab_id`. Unknown tabs and nodes are no-ops.
    pub async fn add_node(
        &self,
        tab_id: &str,
        node_id: NodeId,
        direction: Direction,
        referring_session_id: Option<SessionId>,
    ) -> Result<AddOutcome, SessionError> {
        let (reply, response) = oneshot::channel();
        let request = TabRequest::AddNode {
            node_id,
            direction,
            referring_session_id,
            reply,
        };
        if !self.send(tab_id, request).await {
            return Ok(AddOutcome::NotFound);
        }
        response.await.unwrap_or(Ok(AddOutcome::NotFound))
    }

    /// Close one pane. Returns `false` when the tab no longer exists
    /// afterwards, either because it was unknown or because the pane was its
    /// last one.
    pub async fn remove_leaf_node(&self, tab_id: &str, node_id: NodeId) -> bool {
        let (reply, response) = oneshot::channel();
        if !self.send(tab_id, TabRequest::RemoveLeaf { node_id, reply }).await {
            return false;
        }
        let Ok(removal) = response.await else {
            self.forget(tab_id);
            return false;
        };
        match removal.outcome {
            RemoveOutcome::TreeRemoved => {
                self.forget(tab_id);
                log::info!("Closed tab {tab_id} with its last pane");
                false
            }
            RemoveOutcome::Removed { .. } => {
                let mut active = self.active_sessions();
                if removal.released.is_some() && active.get(tab_id) == removal.released.as_ref() {
                    match removal.survivor {
                        Some(session) => {
                            active.insert(tab_id.to_string(), session);
                        }
                        None => {
                            active.remove(tab_id);
                        }
                    }
                }
                true
            }
            RemoveOutcome::NotALeaf | RemoveOutcome::NotFound => true,
        }
    }

    /// Dispose every session in the tab and drop it. Returns `false` for an
    /// unknown tab.
    pub async fn close_tab(&self, tab_id: &str) -> bool {
        let Some(handle) = self.forget(tab_id) else {
            return false;
        };
        close(handle).await;
        log::info!("Closed tab {tab_id}");
        true
    }

    pub async fn close_all(&self) {
        let handles = std::mem::take(&mut *self.handles());
        self.active_sessions().clear();
        self.focused_tab().take();
        let count = handles.len();
        for handle in handles {
            close(handle).await;
        }
        log::info!("Closed all {count} tabs");
    }

    /// Open tabs in creation order.
    pub fn tabs(&self) -> Vec<TabInfo> {
        self.handles()
            .iter()
            .map(|handle| handle.info.clone())
            .collect()
    }

    pub fn contains(&self, tab_id: &str) -> bool {
        self.handles().iter().any(|handle| handle.info.id == tab_id)
    }

    pub fn len(&self) -> usize {
        self.handles().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles().is_empty()
    }

    /// Current layout of a tab.
    pub async fn tree(&self, tab_id: &str) -> Option<PaneNodeSnapshot> {
        let (reply, response) = oneshot::channel();
        if !self.send(tab_id, TabRequest::Snapshot { reply }).await {
            return None;
        }
        response.await.ok()
    }

    /// Find the tab and pane a session is bound to.
    pub async fn locate_session(&self, session_id: SessionId) -> Option<(TabId, NodeId)> {
        for TabInfo { id, .. } in self.tabs() {
            let Some(snapshot) = self.tree(&id).await else {
                continue;
            };
            if let Some(node_id) = find_session(&snapshot, session_id) {
                return Some((id, node_id));
            }
        }
        None
    }

    /// Record the focused session of `tab_id` and make that tab the focused one.
    pub fn set_active_session(&self, tab_id: &str, session_id: SessionId) {
        self.active_sessions().insert(tab_id.to_string(), session_id);
        *self.focused_tab() = Some(tab_id.to_string());
    }

    pub fn active_session(&self, tab_id: &str) -> Option<SessionId> {
        self.active_sessions().get(tab_id).copied()
    }

    /// Active session of the most recently focused tab that is still open.
    pub fn focused_session(&self) -> Option<SessionId> {
        let tab = self.focused_tab().clone()?;
        self.active_session(&tab)
    }

    async fn send(&self, tab_id: &str, request: TabRequest) -> bool {
        let Some(requests) = self
            .handles()
            .iter()
            .find(|handle| handle.info.id == tab_id)
            .map(|handle| handle.requests.clone())
        else {
            log::debug!("No tab {tab_id}");
            return false;
        };
        requests.send(request).await.is_ok()
    }

    fn forget(&self, tab_id: &str) -> Option<TabHandle> {
        self.active_sessions().remove(tab_id);
        {
            let mut focused = self.focused_tab();
            if focused.as_deref() == Some(tab_id) {
                *focused = None;
            }
        }
        let mut tabs = self.handles();
        let index = tabs.iter().position(|handle| handle.info.id == tab_id)?;
        Some(tabs.remove(index))
    }

    /// Millisecond timestamp, bumped past the previous id on collision.
    fn next_tab_id(&self) -> TabId {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();
        let mut last = self.last_tab_id.lock().unwrap_or_else(PoisonError::into_inner);
        *last = now.max(*last + 1);
        last.to_string()
    }

    fn handles(&self) -> MutexGuard<'_, Vec<TabHandle>> {
        self.tabs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn active_sessions(&self) -> MutexGuard<'_, HashMap<TabId, SessionId>> {
        self.active_sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn focused_tab(&self) -> MutexGuard<'_, Option<TabId>> {
        self.focused_tab.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn close(handle: TabHandle) {
    let (reply, response) = oneshot::channel();
    if handle.requests.send(TabRequest::Close { reply }).await.is_ok() {
        let _ = response.await;
    }
}

fn find_session(snapshot: &PaneNodeSnapshot, session_id: SessionId) -> Option<NodeId> {
    if snapshot.data.session_id == Some(session_id) {
        return Some(snapshot.data.node_id);
    }
    snapshot
        .child_nodes
        .iter()
        .find_map(|child| find_session(child, session_id))
}

/// Owns one tab's tree until the tab is closed, its last pane is removed, or
/// the registry goes away. Sessions still in the tree are disposed on the way out.
async fn run_tab<H: SessionHost>(
    tab_id: TabId,
    engine: Arc<PaneTreeEngine<H>>,
    mut tree: PaneTree,
    mut requests: mpsc::Receiver<TabRequest>,
) {
    let mut close_reply = None;
    while let Some(request) = requests.recv().await {
        match request {
            TabRequest::AddNode {
                node_id,
                direction,
                referring_session_id,
                reply,
            } => {
                let result = engine
                    .add_node(&mut tree, node_id, direction, referring_session_id)
                    .await;
                if let Err(e) = &result {
                    log::warn!("Tab {tab_id}: splitting node {node_id} failed: {e}");
                }
                let _ = reply.send(result);
            }
            TabRequest::RemoveLeaf { node_id, reply } => {
                let released = tree.node(node_id).and_then(|node| node.session_id);
                let outcome = engine.remove_leaf_node(&mut tree, node_id);
                let survivor = match outcome {
                    RemoveOutcome::Removed { .. } => tree.session_ids().first().copied(),
                    _ => None,
                };
                let _ = reply.send(LeafRemoval {
                    outcome,
                    released,
                    survivor,
                });
                if outcome == RemoveOutcome::TreeRemoved {
                    break;
                }
            }
            TabRequest::Snapshot { reply } => {
                let _ = reply.send(tree.snapshot());
            }
            TabRequest::Close { reply } => {
                close_reply = Some(reply);
                break;
            }
        }
    }

    engine.terminate_all(&mut tree);
    log::debug!("Tab {tab_id} worker stopped");
    if let Some(reply) = close_reply {
        let _ = reply.send(());
    }
}
