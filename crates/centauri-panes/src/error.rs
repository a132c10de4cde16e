//! Error types shared across the pane core.
//!
//! Only genuinely exceptional conditions live here. Looking up a node that no
//! longer exists, disposing a session twice, or removing a pane that is not a
//! leaf are ordinary outcomes and are reported through return values instead.

use thiserror::Error;

use crate::host::SessionId;
use crate::tree::NodeId;

/// Errors reported by a [`SessionHost`](crate::host::SessionHost) call.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    #[error("failed to spawn session: {0}")]
    Spawn(String),
    #[error("session I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to resize session: {0}")]
    Resize(String),
    #[error("host unavailable: {0}")]
    Unavailable(String),
}

/// Failure to acquire a new session from the host.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("host refused to create a session: {0}")]
    Creation(#[from] HostError),
    #[error("host returned no session identifier")]
    NoIdentifier,
}

/// Errors loading or saving the user configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read configuration file: {0}")]
    Read(String),
    #[error("unable to save configuration file: {0}")]
    Write(String),
    #[error("configuration file found but could not be parsed: {0}")]
    Parse(String),
}

/// Structural problems found while rebuilding a tree from a snapshot.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("node id {0} appears more than once")]
    DuplicateNodeId(NodeId),
    #[error("node {node} records parent {recorded:?} but is stored under {actual:?}")]
    ParentMismatch {
        node: NodeId,
        recorded: Option<NodeId>,
        actual: Option<NodeId>,
    },
    #[error("leaf node {0} has no session")]
    LeafWithoutSession(NodeId),
    #[error("internal node {0} still holds a session")]
    InternalWithSession(NodeId),
    #[error("internal node {0} has a single child")]
    SingleChild(NodeId),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown command: {0}")]
pub struct UnknownCommand(pub String);
