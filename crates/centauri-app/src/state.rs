//! Application state shared between the console loop and session callbacks.

use std::collections::HashSet;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use centauri_panes::{
    CommandDispatcher, PaneTreeEngine, SessionId, SessionRegistry, TabRegistry, UserConfig,
};
use centauri_pty::PtyHost;
use tokio::sync::mpsc;

/// Something a session reported outside of a console command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEvent {
    SessionExited(SessionId),
}

pub struct AppState {
    pub config: UserConfig,
    pub dispatcher: CommandDispatcher<PtyHost>,
    events: mpsc::UnboundedSender<AppEvent>,
    /// Sessions whose output and exit are already wired to the console.
    watched: Mutex<HashSet<SessionId>>,
}

impl AppState {
    /// Build the host, registries and dispatcher from `config`.
    pub fn new(config: UserConfig, events: mpsc::UnboundedSender<AppEvent>) -> Self {
        let host = Arc::new(PtyHost::new(config.shell.clone()));
        let sessions = Arc::new(SessionRegistry::with_exit_policy(
            host,
            config.shell.exit_policy(),
        ));
        let engine = PaneTreeEngine::new(sessions).with_shell_env(config.shell.env.clone());
        let tabs = Arc::new(TabRegistry::new(Arc::new(engine)));
        Self {
            config,
            dispatcher: CommandDispatcher::new(tabs),
            events,
            watched: Mutex::new(HashSet::new()),
        }
    }

    pub fn tabs(&self) -> &Arc<TabRegistry<PtyHost>> {
        self.dispatcher.tabs()
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry<PtyHost>> {
        self.tabs().engine().sessions()
    }

    /// Echo output of any session not seen before and report its exit.
    pub fn watch_new_sessions(&self) {
        let mut watched = self.watched.lock().unwrap_or_else(PoisonError::into_inner);
        let live = self.sessions().ids();
        watched.retain(|id| live.contains(id));

        for id in live {
            if !watched.insert(id) {
                continue;
            }
            let Some(session) = self.sessions().get(id) else {
                continue;
            };
            session.subscribe_output(move |chunk| {
                let mut out = std::io::stdout().lock();
                let _ = write!(out, "[{id}] {}", String::from_utf8_lossy(chunk));
                let _ = out.flush();
            });
            let events = self.events.clone();
            session.subscribe_exit(move |status| {
                log::info!("Session {id} ended: {status:?}");
                let _ = events.send(AppEvent::SessionExited(id));
            });
        }
    }
}
