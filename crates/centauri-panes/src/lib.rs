//! centauri-panes: tab and split-pane layout with shell session lifecycle.
//!
//! Each tab owns a tree of panes. Every leaf pane is bound to exactly one
//! shell session running on a [`SessionHost`]. Splitting a pane acquires a new
//! session and closing one disposes it.
//!
//! # Architecture
//!
//! - [`SessionHost`]: the RPC surface of the process host (create, write,
//!   resize, end, read, wait for exit).
//! - [`Session`]: one shell process with output and exit fan-out.
//! - [`SessionRegistry`]: the table of live sessions; the only way panes
//!   acquire or release one.
//! - [`PaneTree`] and [`PaneTreeEngine`]: the arena tree and the split,
//!   remove and collapse algorithms over it.
//! - [`TabRegistry`]: the tabs, each tree owned by its own worker task.
//! - [`CommandDispatcher`]: window commands from the keymap.

pub mod commands;
pub mod config;
pub mod error;
pub mod host;
pub mod registry;
pub mod session;
pub mod tabs;
pub mod tree;

#[cfg(test)]
mod testing;

pub use commands::{CommandDispatcher, CommandOutcome, Focus, WindowCommand};
pub use config::{KeyCommandMap, ShellConfig, UserConfig};
pub use error::{ConfigError, HostError, SessionError, SnapshotError, UnknownCommand};
pub use host::{CreateSessionRequest, SessionHost, SessionId};
pub use registry::SessionRegistry;
pub use session::{ExitPolicy, ExitStatus, Session, SessionOptions, SessionPhase, SubscriptionId};
pub use tabs::{NewTabOptions, TabId, TabInfo, TabRegistry};
pub use tree::{
    AddOutcome, CreateNodeOptions, Direction, NodeId, NodeIdAllocator, PaneNode, PaneNodeSnapshot,
    PaneTree, PaneTreeEngine, RemoveOutcome,
};
