//! PTY process spawning and I/O.
//!
//! A [`PtyProcess`] is the control half of a pseudo-terminal child (input,
//! resize, kill). The matching [`PtyOutput`] is the read half; it is handed
//! to a dedicated thread that drains output until the child exits.

use std::io::{Read, Write};
use std::sync::Mutex;

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use protocol::ExitInfo;
use thiserror::Error;

use super::command::LaunchPlan;

/// Unique identifier for a session.
pub type SessionId = String;

/// Buffer size for reading from PTY.
const READ_BUFFER_SIZE: usize = 4096;

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The requested model is not on the allow-list.
    #[error("Invalid model: \"{model}\". Allowed: {}", allowed.join(", "))]
    InvalidModel { model: String, allowed: Vec<String> },

    /// Failed to start the process.
    #[error("failed to spawn `{command}`: {reason}")]
    SpawnFailed { command: String, reason: String },

    /// Failed to write to the PTY.
    #[error("failed to write to PTY: {0}")]
    WriteFailed(String),

    /// Failed to resize the PTY.
    #[error("failed to resize PTY: {0}")]
    ResizeFailed(String),

    /// Failed to signal the process.
    #[error("failed to kill session: {0}")]
    KillFailed(String),

    /// A background task died before finishing.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Control handle for a running PTY child.
pub struct PtyProcess {
    pid: u32,
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
}

/// Read half of a PTY child: its output stream and its exit status.
pub struct PtyOutput {
    reader: Box<dyn Read + Send>,
    child: Box<dyn Child + Send + Sync>,
}

impl PtyProcess {
    /// Opens a PTY and starts `plan` inside it.
    pub fn spawn(plan: &LaunchPlan) -> Result<(Self, PtyOutput), SessionError> {
        let spawn_err = |e: &dyn std::fmt::Display| SessionError::SpawnFailed {
            command: plan.command_line(),
            reason: e.to_string(),
        };

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: plan.rows,
                cols: plan.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| spawn_err(&e))?;

        let mut cmd = CommandBuilder::new(&plan.program);
        cmd.args(&plan.args);
        cmd.cwd(&plan.cwd);
        for (key, value) in &plan.env {
            cmd.env(key, value);
        }

        let child = pair.slave.spawn_command(cmd).map_err(|e| spawn_err(&e))?;
        // The child holds its own copy; ours would keep the master from seeing EOF.
        drop(pair.slave);

        let pid = child.process_id().unwrap_or(0);
        let killer = child.clone_killer();
        let reader = pair.master.try_clone_reader().map_err(|e| spawn_err(&e))?;
        let writer = pair.master.take_writer().map_err(|e| spawn_err(&e))?;

        let process = PtyProcess {
            pid,
            master: Mutex::new(pair.master),
            writer: Mutex::new(writer),
            killer: Mutex::new(killer),
        };

        Ok((process, PtyOutput { reader, child }))
    }

    /// Returns the OS process id (0 if the platform did not report one).
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Writes input to the child.
    pub fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writer
            .write_all(data)
            .and_then(|_| writer.flush())
            .map_err(|e| SessionError::WriteFailed(e.to_string()))
    }

    /// Changes the terminal geometry.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        let master = self.master.lock().unwrap_or_else(|e| e.into_inner());
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::ResizeFailed(e.to_string()))
    }

    /// Signals the child to terminate. Does not wait for it.
    pub fn kill(&self) -> Result<(), SessionError> {
        let mut killer = self.killer.lock().unwrap_or_else(|e| e.into_inner());
        killer
            .kill()
            .map_err(|e| SessionError::KillFailed(e.to_string()))
    }
}

impl PtyOutput {
    /// Drains output until end-of-stream, then reaps the child.
    ///
    /// `on_data` receives every chunk in the order it was read. Blocks the
    /// calling thread for the lifetime of the process.
    pub fn drain(mut self, session_id: &str, mut on_data: impl FnMut(String)) -> ExitInfo {
        let mut decoder = Utf8Decoder::default();
        let mut buffer = [0u8; READ_BUFFER_SIZE];

        loop {
            match self.reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    let text = decoder.decode(&buffer[..n]);
                    if !text.is_empty() {
                        on_data(text);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // Linux reports EIO on the master once the child side closes.
                    if e.raw_os_error() == Some(nix::errno::Errno::EIO as i32) {
                        tracing::trace!(session_id = %session_id, "PTY closed");
                    } else {
                        tracing::warn!(session_id = %session_id, error = %e, "Error reading from PTY");
                    }
                    break;
                }
            }
        }

        let tail = decoder.finish();
        if !tail.is_empty() {
            on_data(tail);
        }

        match self.child.wait() {
            Ok(status) => ExitInfo {
                exit_code: status.exit_code() as i32,
                signal: status.signal().map(str::to_string),
            },
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to collect exit status");
                ExitInfo::unknown()
            }
        }
    }
}

/// Incremental UTF-8 decoder that never splits a character across chunks.
///
/// An incomplete sequence at the end of the input is held back until the
/// next call. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let split = self.pending.len() - incomplete_tail_len(&self.pending);
        let text = String::from_utf8_lossy(&self.pending[..split]).into_owned();
        self.pending.drain(..split);
        text
    }

    /// Flushes whatever is still held back.
    pub fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

/// Length of a truncated multi-byte sequence at the end of `buf`, if any.
fn incomplete_tail_len(buf: &[u8]) -> usize {
    let len = buf.len();
    for back in 1..=len.min(3) {
        let byte = buf[len - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = if byte & 0b1110_0000 == 0b1100_0000 {
            2
        } else if byte & 0b1111_0000 == 0b1110_0000 {
            3
        } else if byte & 0b1111_1000 == 0b1111_0000 {
            4
        } else {
            1
        };
        return if needed > back { back } else { 0 };
    }
    0
}
