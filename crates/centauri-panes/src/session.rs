//! A single host-managed shell session.
//!
//! A [`Session`] mediates every interaction with one shell process: input,
//! resizing, termination, and the fan-out of its output and exit status to any
//! number of subscribers. After [`Session::start`], two tasks run for the life
//! of the session. One pulls output chunks from the host while someone is
//! listening. The other waits for the process to exit. Both stop as soon as
//! the session is disposed.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::error::{HostError, SessionError};
use crate::host::{CreateSessionRequest, SessionHost, SessionId};

/// How long a cached scrollback chunk stays available for replay.
pub const SCROLLBACK_TTL: Duration = Duration::from_secs(5);

/// How long the exit task waits for the reader to drain before broadcasting.
pub const EXIT_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Identifies a registered output or exit subscriber.
pub type SubscriptionId = u64;

type OutputCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;
type ExitCallback = Box<dyn FnOnce(ExitStatus) + Send>;

/// Options for creating a session. Unset fields use host defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    pub args: Option<Vec<String>>,
    pub env: Option<BTreeMap<String, String>>,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
    pub current_working_directory: Option<String>,
    pub referring_session_id: Option<SessionId>,
}

impl SessionOptions {
    fn to_request(&self) -> CreateSessionRequest {
        CreateSessionRequest {
            args: self.args.clone(),
            cols: self.cols,
            rows: self.rows,
            cwd: self.current_working_directory.clone(),
            env: self.env.clone(),
            referring_session_id: self.referring_session_id,
        }
    }
}

/// Lifecycle of a session. `Disposed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Created,
    Active,
    Exiting,
    Disposed,
}

/// Result delivered to exit subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitStatus {
    pub exit_code: Option<u32>,
    pub success: bool,
}

/// Decides whether an exit code counts as a successful termination.
///
/// Code 0 is always a success. Codes in `kill_exit_codes` are a success only
/// when this side asked the host to end the session, since hosts report a
/// requested kill with their own convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitPolicy {
    kill_exit_codes: Vec<u32>,
}

impl ExitPolicy {
    pub fn new(kill_exit_codes: Vec<u32>) -> Self {
        Self { kill_exit_codes }
    }

    pub fn kill_exit_codes(&self) -> &[u32] {
        &self.kill_exit_codes
    }

    pub fn classify(&self, exit_code: Option<u32>, kill_requested: bool) -> ExitStatus {
        let success = match exit_code {
            Some(0) => true,
            Some(code) => kill_requested && self.kill_exit_codes.contains(&code),
            None => false,
        };
        ExitStatus { exit_code, success }
    }
}

impl Default for ExitPolicy {
    fn default() -> Self {
        Self::new(vec![1])
    }
}

struct SessionState {
    phase: SessionPhase,
    kill_requested: bool,
    exit_status: Option<ExitStatus>,
    next_subscription: SubscriptionId,
    output_subscribers: Vec<(SubscriptionId, OutputCallback)>,
    exit_subscribers: Vec<(SubscriptionId, ExitCallback)>,
    scrollback: Option<Vec<u8>>,
    scrollback_generation: u64,
}

impl SessionState {
    fn next_subscription_id(&mut self) -> SubscriptionId {
        self.next_subscription += 1;
        self.next_subscription
    }
}

/// Handle to one running shell process on the host.
pub struct Session<H: SessionHost> {
    id: SessionId,
    working_directory: Option<String>,
    host: Arc<H>,
    policy: ExitPolicy,
    state: Mutex<SessionState>,
    /// Wakes an idle reader when a subscriber arrives or the session winds down.
    wake: Notify,
    shutdown: watch::Sender<bool>,
}

impl<H: SessionHost> std::fmt::Debug for Session<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("working_directory", &self.working_directory)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl<H: SessionHost> Session<H> {
    /// Ask the host for a new shell process.
    pub async fn create(
        host: Arc<H>,
        options: SessionOptions,
        policy: ExitPolicy,
    ) -> Result<Arc<Self>, SessionError> {
        let id = host
            .create_session(options.to_request())
            .await?
            .ok_or(SessionError::NoIdentifier)?;

        log::info!("Created session {id}");

        let (shutdown, _) = watch::channel(false);
        Ok(Arc::new(Self {
            id,
            working_directory: options.current_working_directory,
            host,
            policy,
            state: Mutex::new(SessionState {
                phase: SessionPhase::Created,
                kill_requested: false,
                exit_status: None,
                next_subscription: 0,
                output_subscribers: Vec::new(),
                exit_subscribers: Vec::new(),
                scrollback: None,
                scrollback_generation: 0,
            }),
            wake: Notify::new(),
            shutdown,
        }))
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Best-effort starting directory, used to seed sessions split from this one.
    pub fn working_directory(&self) -> Option<&str> {
        self.working_directory.as_deref()
    }

    pub fn phase(&self) -> SessionPhase {
        self.state().phase
    }

    /// `true` until the session is disposed.
    pub fn is_active(&self) -> bool {
        self.phase() != SessionPhase::Disposed
    }

    /// `true` once the host has reported that the process terminated.
    pub fn has_exited(&self) -> bool {
        self.state().exit_status.is_some()
    }

    pub fn kill_requested(&self) -> bool {
        self.state().kill_requested
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.state().exit_status
    }

    pub fn resize(&self, cols: u16, rows: u16) {
        if !self.is_active() {
            return;
        }
        let host = Arc::clone(&self.host);
        let id = self.id;
        self.send_request("resize", async move { host.resize(id, cols, rows).await });
    }

    pub fn write(&self, data: impl AsRef<[u8]>) {
        if !self.is_active() {
            return;
        }
        let host = Arc::clone(&self.host);
        let id = self.id;
        let data = data.as_ref().to_vec();
        self.send_request("write", async move { host.write(id, data).await });
    }

    /// Ask the host to terminate the process.
    pub fn kill(&self) {
        {
            let mut state = self.state();
            if state.phase == SessionPhase::Disposed {
                return;
            }
            state.kill_requested = true;
        }
        let host = Arc::clone(&self.host);
        let id = self.id;
        self.send_request("end session", async move { host.end_session(id).await });
    }

    /// Register an output listener. The cached scrollback chunk, if any, is
    /// replayed to it immediately.
    pub fn subscribe_output<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        let callback: OutputCallback = Arc::new(callback);
        let (id, replay) = {
            let mut state = self.state();
            let id = state.next_subscription_id();
            if state.phase == SessionPhase::Disposed {
                return id;
            }
            state.output_subscribers.push((id, Arc::clone(&callback)));
            (id, state.scrollback.clone())
        };

        if let Some(chunk) = replay {
            callback(&chunk);
        }
        self.wake.notify_waiters();
        id
    }

    pub fn unsubscribe_output(&self, subscription: SubscriptionId) {
        self.state()
            .output_subscribers
            .retain(|(id, _)| *id != subscription);
    }

    /// Register an exit listener, invoked at most once.
    ///
    /// If the exit has already been broadcast the listener runs immediately.
    pub fn subscribe_exit<F>(&self, callback: F) -> SubscriptionId
    where
        F: FnOnce(ExitStatus) + Send + 'static,
    {
        let (id, already_exited) = {
            let mut state = self.state();
            let id = state.next_subscription_id();
            match (state.phase, state.exit_status) {
                (SessionPhase::Disposed, _) => return id,
                (_, Some(status)) => (id, status),
                (_, None) => {
                    state.exit_subscribers.push((id, Box::new(callback)));
                    return id;
                }
            }
        };
        callback(already_exited);
        id
    }

    pub fn unsubscribe_exit(&self, subscription: SubscriptionId) {
        self.state()
            .exit_subscribers
            .retain(|(id, _)| *id != subscription);
    }

    /// Keep `chunk` for replay to late subscribers for [`SCROLLBACK_TTL`].
    pub fn cache_scrollback(self: &Arc<Self>, chunk: impl Into<Vec<u8>>) {
        let generation = {
            let mut state = self.state();
            if state.phase == SessionPhase::Disposed {
                return;
            }
            state.scrollback = Some(chunk.into());
            state.scrollback_generation += 1;
            state.scrollback_generation
        };

        let Ok(runtime) = Handle::try_current() else {
            log::warn!("Session {}: no runtime to expire scrollback cache", self.id);
            return;
        };
        let session = Arc::downgrade(self);
        runtime.spawn(expire_scrollback(session, generation));
    }

    /// Currently cached scrollback chunk, if it has not expired.
    pub fn scrollback(&self) -> Option<Vec<u8>> {
        self.state().scrollback.clone()
    }

    /// Start the output reader and exit watcher. Only the first call has any
    /// effect, and a disposed session is never started.
    pub fn start(self: &Arc<Self>) {
        let Ok(runtime) = Handle::try_current() else {
            log::error!("Session {}: cannot start outside a tokio runtime", self.id);
            return;
        };

        {
            let mut state = self.state();
            if state.phase != SessionPhase::Created {
                return;
            }
            state.phase = SessionPhase::Active;
        }

        let reader = runtime.spawn(Arc::clone(self).read_loop(self.shutdown.subscribe()));
        runtime.spawn(Arc::clone(self).exit_loop(self.shutdown.subscribe(), reader));
        log::debug!("Session {} started", self.id);
    }

    /// Terminate the process (unless already requested) and silence the
    /// session. Safe to call any number of times.
    pub fn dispose(&self) {
        let needs_kill = {
            let state = self.state();
            if state.phase == SessionPhase::Disposed {
                return;
            }
            !state.kill_requested && state.exit_status.is_none()
        };
        if needs_kill {
            self.kill();
        }

        {
            let mut state = self.state();
            state.phase = SessionPhase::Disposed;
            state.output_subscribers.clear();
            state.exit_subscribers.clear();
            state.scrollback = None;
        }
        self.shutdown.send_replace(true);
        self.wake.notify_waiters();
        log::info!("Disposed session {}", self.id);
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send_request<F>(&self, what: &'static str, request: F)
    where
        F: Future<Output = Result<(), HostError>> + Send + 'static,
    {
        let id = self.id;
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = request.await {
                        log::warn!("Session {id}: {what} request failed: {e}");
                    }
                });
            }
            Err(_) => log::warn!("Session {id}: no runtime to send {what} request"),
        }
    }

    fn broadcast_output(&self, chunk: &[u8]) {
        let subscribers: Vec<OutputCallback> = {
            let state = self.state();
            if state.phase == SessionPhase::Disposed {
                return;
            }
            state
                .output_subscribers
                .iter()
                .map(|(_, callback)| Arc::clone(callback))
                .collect()
        };
        for callback in subscribers {
            callback(chunk);
        }
    }

    fn broadcast_exit(&self, status: ExitStatus) {
        let subscribers = {
            let mut state = self.state();
            if state.phase == SessionPhase::Disposed {
                return;
            }
            state.exit_status = Some(status);
            std::mem::take(&mut state.exit_subscribers)
        };
        log::info!(
            "Session {} exited with {:?} (success={})",
            self.id,
            status.exit_code,
            status.success
        );
        for (_, callback) in subscribers {
            callback(status);
        }
    }

    async fn read_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            // Registered before the state check so a wake-up in between is not lost.
            let wake = self.wake.notified();
            let idle = {
                let state = self.state();
                let idle = state.output_subscribers.is_empty();
                match state.phase {
                    SessionPhase::Disposed => break,
                    SessionPhase::Exiting if idle => break,
                    _ => idle,
                }
            };

            if idle {
                tokio::select! {
                    _ = wake => continue,
                    _ = shutdown.changed() => break,
                }
            }

            let chunk = tokio::select! {
                chunk = self.host.read_chunk(self.id) => chunk,
                _ = shutdown.changed() => break,
            };
            match chunk {
                Ok(chunk) if chunk.is_empty() => {
                    log::debug!("Session {}: output stream closed", self.id);
                    break;
                }
                Ok(chunk) => self.broadcast_output(&chunk),
                Err(e) => {
                    log::warn!("Session {}: reading output failed: {e}", self.id);
                    break;
                }
            }
        }
    }

    async fn exit_loop(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
        mut reader: JoinHandle<()>,
    ) {
        let exit_code = tokio::select! {
            result = self.host.wait_for_exit(self.id) => match result {
                Ok(code) => Some(code),
                Err(e) => {
                    log::warn!("Session {}: waiting for exit failed: {e}", self.id);
                    None
                }
            },
            _ = shutdown.changed() => return,
        };

        let status = {
            let mut state = self.state();
            if state.phase == SessionPhase::Disposed {
                return;
            }
            state.phase = SessionPhase::Exiting;
            self.policy.classify(exit_code, state.kill_requested)
        };
        self.wake.notify_waiters();

        if tokio::time::timeout(EXIT_DRAIN_TIMEOUT, &mut reader)
            .await
            .is_err()
        {
            log::debug!("Session {}: reader still busy after exit, stopping it", self.id);
            reader.abort();
        }

        self.broadcast_exit(status);
    }
}

async fn expire_scrollback<H: SessionHost>(session: Weak<Session<H>>, generation: u64) {
    tokio::time::sleep(SCROLLBACK_TTL).await;
    if let Some(session) = session.upgrade() {
        let mut state = session.state();
        if state.scrollback_generation == generation {
            state.scrollback = None;
        }
    }
}
