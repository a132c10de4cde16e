//! Line-oriented command console on stdin.

use anyhow::{anyhow, bail, Context};
use centauri_panes::config::control_sequence;
use centauri_panes::{
    CommandOutcome, Focus, NewTabOptions, NodeId, PaneNodeSnapshot, SessionId, TabId,
    WindowCommand,
};

use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    NewTab(Option<String>),
    Split {
        tab: TabId,
        node: NodeId,
        command: WindowCommand,
    },
    ClosePane {
        tab: TabId,
        node: NodeId,
    },
    CloseTab(TabId),
    CloseAll,
    Tabs,
    Tree(TabId),
    Write {
        session: SessionId,
        text: String,
    },
    Key {
        combo: String,
        tab: TabId,
        node: NodeId,
    },
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  new-tab [name]
  split <tab> <node> right|down
  close-pane <tab> <node>
  close-tab <tab>
  close-all
  tabs
  tree <tab>
  write <session> <text>
  key <combo> <tab> <node>
  quit";

/// Parse one console line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> anyhow::Result<Option<ConsoleCommand>> {
    let line = line.trim();
    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim_start();
    let args: Vec<&str> = rest.split_whitespace().collect();

    let command = match (verb, args.as_slice()) {
        ("", _) => return Ok(None),
        ("new-tab", []) => ConsoleCommand::NewTab(None),
        ("new-tab", _) => ConsoleCommand::NewTab(Some(rest.to_string())),
        ("split", [tab, node, side]) => ConsoleCommand::Split {
            tab: tab.to_string(),
            node: parse_node(node)?,
            command: match *side {
                "right" => WindowCommand::SplitRight,
                "down" => WindowCommand::SplitDown,
                other => bail!("split direction must be right or down, got {other:?}"),
            },
        },
        ("close-pane", [tab, node]) => ConsoleCommand::ClosePane {
            tab: tab.to_string(),
            node: parse_node(node)?,
        },
        ("close-tab", [tab]) => ConsoleCommand::CloseTab(tab.to_string()),
        ("close-all", []) => ConsoleCommand::CloseAll,
        ("tabs", []) => ConsoleCommand::Tabs,
        ("tree", [tab]) => ConsoleCommand::Tree(tab.to_string()),
        ("write", [session, ..]) => {
            let text = rest[session.len()..].trim_start().to_string();
            ConsoleCommand::Write {
                session: session
                    .parse()
                    .with_context(|| format!("invalid session id {session:?}"))?,
                text,
            }
        }
        ("key", [combo, tab, node]) => ConsoleCommand::Key {
            combo: combo.to_string(),
            tab: tab.to_string(),
            node: parse_node(node)?,
        },
        ("help", []) => ConsoleCommand::Help,
        ("quit" | "exit", []) => ConsoleCommand::Quit,
        _ => bail!("unrecognized command {line:?} (try `help`)"),
    };
    Ok(Some(command))
}

fn parse_node(node: &str) -> anyhow::Result<NodeId> {
    node.parse()
        .with_context(|| format!("invalid node id {node:?}"))
}

/// Run one command. Returns `false` once the console should stop.
pub async fn execute(state: &AppState, command: ConsoleCommand) -> anyhow::Result<bool> {
    match command {
        ConsoleCommand::NewTab(name) => {
            let id = state
                .tabs()
                .create_tab(NewTabOptions {
                    name,
                    referring_session_id: state.tabs().focused_session(),
                })
                .await?;
            println!("opened tab {id}");
        }
        ConsoleCommand::Split { tab, node, command } => {
            let focus = focus(state, &tab, node).await?;
            report(state.dispatcher.execute(command, Some(&focus)).await?);
        }
        ConsoleCommand::ClosePane { tab, node } => {
            let focus = focus(state, &tab, node).await?;
            report(
                state
                    .dispatcher
                    .execute(WindowCommand::ClosePane, Some(&focus))
                    .await?,
            );
        }
        ConsoleCommand::CloseTab(tab) => {
            let focus = tab_focus(&tab);
            report(
                state
                    .dispatcher
                    .execute(WindowCommand::CloseTab, Some(&focus))
                    .await?,
            );
        }
        ConsoleCommand::CloseAll => {
            report(state.dispatcher.execute(WindowCommand::CloseAllTabs, None).await?);
        }
        ConsoleCommand::Tabs => {
            println!("{}", serde_json::to_string_pretty(&state.tabs().tabs())?);
        }
        ConsoleCommand::Tree(tab) => {
            let tree = state
                .tabs()
                .tree(&tab)
                .await
                .ok_or_else(|| anyhow!("no tab {tab}"))?;
            println!("{}", serde_json::to_string_pretty(&tree)?);
        }
        ConsoleCommand::Write { session, text } => {
            let session = state
                .sessions()
                .get(session)
                .ok_or_else(|| anyhow!("no session {session}"))?;
            session.write(format!("{text}\n"));
        }
        ConsoleCommand::Key { combo, tab, node } => {
            let name = state
                .config
                .command_for_key(&combo)
                .ok_or_else(|| anyhow!("{combo} is not bound"))?;
            let focus = focus(state, &tab, node).await?;
            run_bound_command(state, &name, &focus).await?;
        }
        ConsoleCommand::Help => println!("{HELP}"),
        ConsoleCommand::Quit => return Ok(false),
    }
    state.watch_new_sessions();
    Ok(true)
}

async fn run_bound_command(state: &AppState, name: &str, focus: &Focus) -> anyhow::Result<()> {
    if let Ok(command) = name.parse::<WindowCommand>() {
        report(state.dispatcher.execute(command, Some(focus)).await?);
        return Ok(());
    }
    if let Some(bytes) = control_sequence(name) {
        let session = focus
            .session_id
            .and_then(|id| state.sessions().get(id))
            .ok_or_else(|| anyhow!("node {} has no session", focus.node_id))?;
        session.write(bytes);
        return Ok(());
    }
    bail!("{name} is not available in the console")
}

/// Resolve the pane `node` of `tab` and mark its session active.
async fn focus(state: &AppState, tab: &str, node: NodeId) -> anyhow::Result<Focus> {
    let tree = state
        .tabs()
        .tree(tab)
        .await
        .ok_or_else(|| anyhow!("no tab {tab}"))?;
    let pane = find_node(&tree, node).ok_or_else(|| anyhow!("no node {node} in tab {tab}"))?;
    let session_id = pane.data.session_id;
    if let Some(session) = session_id {
        state.tabs().set_active_session(tab, session);
    }
    Ok(Focus {
        tab_id: tab.to_string(),
        node_id: node,
        session_id,
    })
}

fn tab_focus(tab: &str) -> Focus {
    Focus {
        tab_id: tab.to_string(),
        node_id: 0,
        session_id: None,
    }
}

fn find_node(tree: &PaneNodeSnapshot, node: NodeId) -> Option<&PaneNodeSnapshot> {
    if tree.data.node_id == node {
        return Some(tree);
    }
    tree.child_nodes
        .iter()
        .find_map(|child| find_node(child, node))
}

fn report(outcome: CommandOutcome) {
    match outcome {
        CommandOutcome::TabOpened(id) => println!("opened tab {id}"),
        CommandOutcome::Split(outcome) => match outcome.new_node() {
            Some(node) => println!("new pane {node}"),
            None => println!("no such pane"),
        },
        CommandOutcome::PaneClosed { tab_open: true } => println!("closed pane"),
        CommandOutcome::PaneClosed { tab_open: false } => println!("closed pane and its tab"),
        CommandOutcome::TabClosed(true) => println!("closed tab"),
        CommandOutcome::TabClosed(false) => println!("no such tab"),
        CommandOutcome::AllTabsClosed => println!("closed all tabs"),
        CommandOutcome::NoFocus => println!("nothing focused"),
    }
}
