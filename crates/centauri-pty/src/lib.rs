//! centauri-pty: the process host behind centauri's pane sessions.
//!
//! Shells run on local PTYs via `portable-pty`. [`PtyHost`] implements the
//! [`SessionHost`](centauri_panes::SessionHost) contract on top of them, so
//! the pane core can create, drive and reap sessions by pid.
//!
//! # Architecture
//!
//! - [`PtyProcess`]: one child process on its own PTY (spawn, read, write,
//!   resize, wait, kill). All of it is blocking.
//! - [`PtyHost`]: the table of live processes, running the blocking calls on
//!   tokio's blocking pool.

pub mod host;
pub mod pty;

pub use host::{PtyHost, DEFAULT_COLS, DEFAULT_ROWS};
pub use pty::{PtyProcess, ShellCommand};
