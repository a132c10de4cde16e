//! Window commands bound in the keymap, and their dispatch onto the tab registry.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{SessionError, UnknownCommand};
use crate::host::{SessionHost, SessionId};
use crate::tabs::{NewTabOptions, TabId, TabRegistry};
use crate::tree::{AddOutcome, Direction, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowCommand {
    NewTab,
    SplitRight,
    SplitDown,
    ClosePane,
    CloseTab,
    CloseAllTabs,
}

impl WindowCommand {
    pub const ALL: [WindowCommand; 6] = [
        Self::NewTab,
        Self::SplitRight,
        Self::SplitDown,
        Self::ClosePane,
        Self::CloseTab,
        Self::CloseAllTabs,
    ];

    /// Keymap name of the command.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewTab => "window:new_tab",
            Self::SplitRight => "window:split_right",
            Self::SplitDown => "window:split_down",
            Self::ClosePane => "window:close_pane",
            Self::CloseTab => "window:close_tab",
            Self::CloseAllTabs => "window:close_all_tabs",
        }
    }

    /// Layout direction for the split commands. Splitting right puts the new
    /// pane beside the focused one; splitting down puts it below.
    pub fn split_direction(&self) -> Option<Direction> {
        match self {
            Self::SplitRight => Some(Direction::Horizontal),
            Self::SplitDown => Some(Direction::Vertical),
            _ => None,
        }
    }
}

impl fmt::Display for WindowCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WindowCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|command| command.as_str() == s)
            .ok_or_else(|| UnknownCommand(s.to_string()))
    }
}

/// The pane a command applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Focus {
    pub tab_id: TabId,
    pub node_id: NodeId,
    pub session_id: Option<SessionId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    TabOpened(TabId),
    Split(AddOutcome),
    PaneClosed { tab_open: bool },
    TabClosed(bool),
    AllTabsClosed,
    /// The command needs a focused pane and none was given.
    NoFocus,
}

pub struct CommandDispatcher<H: SessionHost> {
    tabs: Arc<TabRegistry<H>>,
}

impl<H: SessionHost> CommandDispatcher<H> {
    pub fn new(tabs: Arc<TabRegistry<H>>) -> Self {
        Self { tabs }
    }

    pub fn tabs(&self) -> &Arc<TabRegistry<H>> {
        &self.tabs
    }

    /// Run `command` against `focus`. The focused session seeds the working
    /// directory of any pane the command creates.
    pub async fn execute(
        &self,
        command: WindowCommand,
        focus: Option<&Focus>,
    ) -> Result<CommandOutcome, SessionError> {
        log::debug!("Executing {command} with focus {focus:?}");

        if command == WindowCommand::NewTab {
            let id = self
                .tabs
                .create_tab(NewTabOptions {
                    referring_session_id: focus.and_then(|focus| focus.session_id),
                    ..Default::default()
                })
                .await?;
            return Ok(CommandOutcome::TabOpened(id));
        }
        if command == WindowCommand::CloseAllTabs {
            self.tabs.close_all().await;
            return Ok(CommandOutcome::AllTabsClosed);
        }

        let Some(focus) = focus else {
            return Ok(CommandOutcome::NoFocus);
        };
        if let Some(direction) = command.split_direction() {
            let outcome = self
                .tabs
                .add_node(&focus.tab_id, focus.node_id, direction, focus.session_id)
                .await?;
            return Ok(CommandOutcome::Split(outcome));
        }

        Ok(match command {
            WindowCommand::ClosePane => CommandOutcome::PaneClosed {
                tab_open: self
                    .tabs
                    .remove_leaf_node(&focus.tab_id, focus.node_id)
                    .await,
            },
            _ => CommandOutcome::TabClosed(self.tabs.close_tab(&focus.tab_id).await),
        })
    }
}
