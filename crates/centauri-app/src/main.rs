mod cli;
mod console;
mod logger;
mod state;

use anyhow::Context;
use centauri_panes::config::{default_config_path, load_user_config};
use centauri_panes::{NewTabOptions, UserConfig};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use cli::Cli;
use state::{AppEvent, AppState};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_path = logger::init(cli.log_level())?;

    let config_path = cli.config_file.clone().unwrap_or_else(default_config_path);
    let config = match load_user_config(&config_path, cli.config_file.is_none()) {
        Ok(config) => config,
        Err(e) => {
            log::warn!("{e}; falling back to the default configuration");
            eprintln!("warning: {e}; using defaults");
            UserConfig::default()
        }
    };

    // Sessions, tabs and the console all share one thread.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    runtime.block_on(run(config))?;

    log::info!("centauri exiting");
    eprintln!("log written to {}", log_path.display());
    Ok(())
}

async fn run(config: UserConfig) -> anyhow::Result<()> {
    let (events, mut event_rx) = mpsc::unbounded_channel();
    let state = AppState::new(config, events);

    let tab = state
        .tabs()
        .create_tab(NewTabOptions::default())
        .await
        .context("failed to open the first tab")?;
    state.watch_new_sessions();
    println!("opened tab {tab}");
    println!("{}", console::HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                let command = match console::parse_line(&line) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(e) => {
                        println!("error: {e:#}");
                        continue;
                    }
                };
                match console::execute(&state, command).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => println!("error: {e:#}"),
                }
            }
            Some(event) = event_rx.recv() => handle_event(&state, event).await,
        }
    }

    state.tabs().close_all().await;
    Ok(())
}

/// Close the pane of a session whose shell exited on its own.
async fn handle_event(state: &AppState, event: AppEvent) {
    match event {
        AppEvent::SessionExited(session) => {
            let Some((tab, node)) = state.tabs().locate_session(session).await else {
                return;
            };
            let tab_open = state.tabs().remove_leaf_node(&tab, node).await;
            println!("session {session} exited, closed pane {node}");
            if !tab_open {
                println!("closed tab {tab}");
            }
        }
    }
}
