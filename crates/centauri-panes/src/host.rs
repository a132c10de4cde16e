//! The session-lifecycle contract between the pane core and the process host.
//!
//! The host owns the real shell processes. The core never touches a PTY; it
//! only issues these requests, keyed by the identifier the host handed back
//! from [`SessionHost::create_session`].

use std::collections::BTreeMap;
use std::future::Future;

use crate::error::HostError;

/// Identifier of a host-managed shell session (the child's process id).
pub type SessionId = u32;

/// Parameters for a new shell session. Unset fields fall back to host defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateSessionRequest {
    pub args: Option<Vec<String>>,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
    pub cwd: Option<String>,
    pub env: Option<BTreeMap<String, String>>,
    /// Session whose working directory the host may use when `cwd` is unset.
    pub referring_session_id: Option<SessionId>,
}

/// RPC surface of the process host.
///
/// Every call is a suspension point. `read_chunk` and `wait_for_exit` may stay
/// pending for the lifetime of the process.
pub trait SessionHost: Send + Sync + 'static {
    /// Start a new shell. `Ok(None)` means the host accepted the request but
    /// could not produce an identifier.
    fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> impl Future<Output = Result<Option<SessionId>, HostError>> + Send;

    fn resize(
        &self,
        id: SessionId,
        cols: u16,
        rows: u16,
    ) -> impl Future<Output = Result<(), HostError>> + Send;

    fn write(&self, id: SessionId, data: Vec<u8>)
        -> impl Future<Output = Result<(), HostError>> + Send;

    fn end_session(&self, id: SessionId) -> impl Future<Output = Result<(), HostError>> + Send;

    /// Next chunk of output. An empty chunk signals end of stream.
    fn read_chunk(&self, id: SessionId) -> impl Future<Output = Result<Vec<u8>, HostError>> + Send;

    /// Resolves with the process exit code once it terminates.
    fn wait_for_exit(&self, id: SessionId) -> impl Future<Output = Result<u32, HostError>> + Send;
}
