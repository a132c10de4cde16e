//! [`SessionHost`] backed by local PTYs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use centauri_panes::{CreateSessionRequest, HostError, SessionHost, SessionId, ShellConfig};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

use crate::pty::{PtyProcess, ShellCommand};

pub const DEFAULT_COLS: u16 = 200;
pub const DEFAULT_ROWS: u16 = 100;

/// Spawns shells on PTYs and serves the session RPCs, keyed by child pid.
pub struct PtyHost {
    shell: ShellConfig,
    sessions: Mutex<HashMap<SessionId, Arc<PtyProcess>>>,
}

impl PtyHost {
    pub fn new(shell: ShellConfig) -> Self {
        Self {
            shell,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }

    fn command_for(&self, request: CreateSessionRequest) -> ShellCommand {
        let cwd = request
            .cwd
            .map(PathBuf::from)
            .filter(|path| path.exists())
            .or_else(|| request.referring_session_id.and_then(process_cwd));

        ShellCommand {
            program: self.shell.program.clone(),
            args: request.args.unwrap_or_else(|| self.shell.args.clone()),
            cwd,
            env: request.env.unwrap_or_else(|| self.shell.env.clone()),
            cols: request.cols.unwrap_or(DEFAULT_COLS),
            rows: request.rows.unwrap_or(DEFAULT_ROWS),
        }
    }

    fn get(&self, id: SessionId) -> Result<Arc<PtyProcess>, HostError> {
        self.sessions()
            .get(&id)
            .cloned()
            .ok_or(HostError::SessionNotFound(id))
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<PtyProcess>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Current directory of a running process, if it can be read and still exists.
fn process_cwd(pid: SessionId) -> Option<PathBuf> {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        false,
        ProcessRefreshKind::nothing().with_cwd(UpdateKind::Always),
    );
    system
        .process(pid)
        .and_then(|process| process.cwd())
        .filter(|cwd| cwd.exists())
        .map(Path::to_path_buf)
}

/// Run blocking PTY work off the async threads.
async fn blocking<T, F>(work: F) -> Result<T, HostError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, HostError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| HostError::Unavailable(format!("PTY worker failed: {e}")))?
}

impl SessionHost for PtyHost {
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<Option<SessionId>, HostError> {
        let command = self.command_for(request);
        log::debug!(
            "Spawning {:?} in {:?}",
            if command.program.is_empty() {
                "default shell"
            } else {
                command.program.as_str()
            },
            command.cwd
        );

        let process = blocking(move || PtyProcess::spawn(&command)).await?;
        let pid = process.pid();
        self.sessions().insert(pid, process);
        log::info!("Spawned shell with pid {pid}");
        Ok(Some(pid))
    }

    async fn resize(&self, id: SessionId, cols: u16, rows: u16) -> Result<(), HostError> {
        self.get(id)?.resize(cols, rows)
    }

    async fn write(&self, id: SessionId, data: Vec<u8>) -> Result<(), HostError> {
        let process = self.get(id)?;
        blocking(move || process.write(&data)).await
    }

    async fn end_session(&self, id: SessionId) -> Result<(), HostError> {
        let process = self.sessions().remove(&id);
        let Some(process) = process else {
            return Err(HostError::SessionNotFound(id));
        };
        log::debug!("Killing pid {id}");
        process.kill()
    }

    async fn read_chunk(&self, id: SessionId) -> Result<Vec<u8>, HostError> {
        let process = self.get(id)?;
        blocking(move || process.read_chunk()).await
    }

    async fn wait_for_exit(&self, id: SessionId) -> Result<u32, HostError> {
        let process = self.get(id)?;
        let code = blocking(move || process.wait()).await?;
        self.sessions().remove(&id);
        log::debug!("pid {id} exited with {code}");
        Ok(code)
    }
}
