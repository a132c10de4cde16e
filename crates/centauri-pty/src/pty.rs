use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use centauri_panes::HostError;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};

/// Size of one read from the PTY master.
pub const READ_CHUNK_SIZE: usize = 4096;

const EIO: i32 = 5;

/// What to run on a new PTY.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellCommand {
    /// Empty means the platform default shell.
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub cols: u16,
    pub rows: u16,
}

impl ShellCommand {
    fn to_builder(&self) -> CommandBuilder {
        let mut cmd = if self.program.is_empty() {
            CommandBuilder::new_default_prog()
        } else {
            CommandBuilder::new(&self.program)
        };
        cmd.args(&self.args);
        if let Some(cwd) = &self.cwd {
            cmd.cwd(cwd);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

/// A shell running on its own PTY.
///
/// Each part sits behind its own lock so a blocked read or wait never holds
/// up a write, resize, or kill.
pub struct PtyProcess {
    pid: u32,
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    reader: Mutex<Box<dyn Read + Send>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
}

impl PtyProcess {
    /// Open a PTY and spawn `command` on it.
    pub fn spawn(command: &ShellCommand) -> Result<Arc<Self>, HostError> {
        let pair = native_pty_system()
            .openpty(pty_size(command.cols, command.rows))
            .map_err(|e| HostError::Spawn(format!("failed to open PTY: {e}")))?;

        let child = pair
            .slave
            .spawn_command(command.to_builder())
            .map_err(|e| HostError::Spawn(format!("failed to spawn command: {e}")))?;
        drop(pair.slave);

        let pid = child
            .process_id()
            .ok_or_else(|| HostError::Spawn("spawned child has no pid".to_string()))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| HostError::Spawn(format!("failed to clone reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| HostError::Spawn(format!("failed to take writer: {e}")))?;
        let killer = child.clone_killer();

        Ok(Arc::new(Self {
            pid,
            master: Mutex::new(pair.master),
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            child: Mutex::new(child),
            killer: Mutex::new(killer),
        }))
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), HostError> {
        lock(&self.master)
            .resize(pty_size(cols, rows))
            .map_err(|e| HostError::Resize(e.to_string()))
    }

    pub fn write(&self, data: &[u8]) -> Result<(), HostError> {
        let mut writer = lock(&self.writer);
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    /// Blocking read of the next chunk of output. Empty at end of stream.
    pub fn read_chunk(&self) -> Result<Vec<u8>, HostError> {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        match lock(&self.reader).read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            // Linux reports EIO on the master once the slave side is gone.
            Err(e) if e.raw_os_error() == Some(EIO) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Blocking wait for the child to exit.
    pub fn wait(&self) -> Result<u32, HostError> {
        let status = lock(&self.child).wait()?;
        Ok(status.exit_code())
    }

    pub fn kill(&self) -> Result<(), HostError> {
        lock(&self.killer).kill()?;
        Ok(())
    }
}

fn pty_size(cols: u16, rows: u16) -> PtySize {
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
