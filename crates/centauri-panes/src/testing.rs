//! In-memory host used by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};

use crate::error::HostError;
use crate::host::{CreateSessionRequest, SessionHost, SessionId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HostCall {
    Create(CreateSessionRequest),
    Resize { id: SessionId, cols: u16, rows: u16 },
    Write { id: SessionId, data: Vec<u8> },
    End(SessionId),
}

type Output = Result<Vec<u8>, String>;
type OutputReceiver = Arc<AsyncMutex<mpsc::UnboundedReceiver<Output>>>;

struct HostedSession {
    output_tx: Option<mpsc::UnboundedSender<Output>>,
    output_rx: Option<OutputReceiver>,
    exit_tx: Option<watch::Sender<Option<Result<u32, String>>>>,
    reads: usize,
}

/// Scriptable [`SessionHost`]: records every call and lets tests feed output
/// and exit codes per session.
pub(crate) struct MockHost {
    next_id: AtomicU32,
    fail_create: AtomicBool,
    return_no_id: AtomicBool,
    calls: Mutex<Vec<HostCall>>,
    sessions: Mutex<HashMap<SessionId, HostedSession>>,
}

impl MockHost {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1000),
            fail_create: AtomicBool::new(false),
            return_no_id: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_return_no_id(&self, none: bool) {
        self.return_no_id.store(none, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn created(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, HostCall::Create(_)))
            .count()
    }

    pub(crate) fn ended(&self) -> Vec<SessionId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                HostCall::End(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn reads(&self, id: SessionId) -> usize {
        self.sessions
            .lock()
            .unwrap()
            .get(&id)
            .map_or(0, |session| session.reads)
    }

    pub(crate) fn push_output(&self, id: SessionId, chunk: &[u8]) {
        self.send_output(id, Ok(chunk.to_vec()));
    }

    /// Make the next read of `id` fail.
    pub(crate) fn fail_read(&self, id: SessionId) {
        self.send_output(id, Err("pty read failed".to_string()));
    }

    fn send_output(&self, id: SessionId, output: Output) {
        if let Some(tx) = self
            .sessions
            .lock()
            .unwrap()
            .get(&id)
            .and_then(|session| session.output_tx.as_ref())
        {
            let _ = tx.send(output);
        }
    }

    pub(crate) fn exit(&self, id: SessionId, code: u32) {
        self.finish(id, Ok(code));
    }

    pub(crate) fn fail_exit(&self, id: SessionId) {
        self.finish(id, Err("child vanished".to_string()));
    }

    fn finish(&self, id: SessionId, outcome: Result<u32, String>) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(session) = sessions.get_mut(&id) {
            // Closing the output stream mirrors a PTY hitting EOF on exit.
            session.output_tx = None;
            if let Some(tx) = &session.exit_tx {
                tx.send_replace(Some(outcome));
            }
        }
    }

    fn record(&self, call: HostCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl SessionHost for MockHost {
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<Option<SessionId>, HostError> {
        self.record(HostCall::Create(request));
        // Creation is a suspension point on a real host.
        tokio::task::yield_now().await;

        if self.fail_create.load(Ordering::SeqCst) {
            return Err(HostError::Spawn("mock refused".to_string()));
        }
        if self.return_no_id.load(Ordering::SeqCst) {
            return Ok(None);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (exit_tx, _) = watch::channel(None);
        self.sessions.lock().unwrap().insert(
            id,
            HostedSession {
                output_tx: Some(output_tx),
                output_rx: Some(Arc::new(AsyncMutex::new(output_rx))),
                exit_tx: Some(exit_tx),
                reads: 0,
            },
        );
        Ok(Some(id))
    }

    async fn resize(&self, id: SessionId, cols: u16, rows: u16) -> Result<(), HostError> {
        self.record(HostCall::Resize { id, cols, rows });
        Ok(())
    }

    async fn write(&self, id: SessionId, data: Vec<u8>) -> Result<(), HostError> {
        self.record(HostCall::Write { id, data });
        Ok(())
    }

    async fn end_session(&self, id: SessionId) -> Result<(), HostError> {
        self.record(HostCall::End(id));
        Ok(())
    }

    async fn read_chunk(&self, id: SessionId) -> Result<Vec<u8>, HostError> {
        let rx = {
            let mut sessions = self.sessions.lock().unwrap();
            let session = sessions.get_mut(&id).ok_or(HostError::SessionNotFound(id))?;
            session.reads += 1;
            session.output_rx.clone().ok_or(HostError::SessionNotFound(id))?
        };
        let result = match rx.lock().await.recv().await {
            Some(output) => output.map_err(HostError::Unavailable),
            None => Ok(Vec::new()),
        };
        result
    }

    async fn wait_for_exit(&self, id: SessionId) -> Result<u32, HostError> {
        let mut rx = self
            .sessions
            .lock()
            .unwrap()
            .get(&id)
            .and_then(|session| session.exit_tx.as_ref())
            .map(watch::Sender::subscribe)
            .ok_or(HostError::SessionNotFound(id))?;
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(outcome) = current {
                return outcome.map_err(HostError::Unavailable);
            }
            if rx.changed().await.is_err() {
                return Err(HostError::Unavailable("mock host dropped".to_string()));
            }
        }
    }
}

/// Let spawned tasks run until they block again.
pub(crate) async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
