//! Engine process on a pseudo-terminal.
//!
//! testpmd only shows its interactive prompt on a terminal, so the child gets
//! the pty slave as stdin/stdout/stderr. Echo is switched off on the slave
//! and carriage returns are dropped from the output. A reader thread drains
//! the master into a channel so [`Transport::expect`] can wait with a
//! deadline.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use nix::pty::openpty;
use nix::sys::signal::{Signal, killpg};
use nix::sys::termios::{LocalFlags, SetArg, tcgetattr, tcsetattr};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::engine::cmdline::EngineCommand;
use crate::engine::transport::Transport;
use crate::error::{Error, Result};

const READ_CHUNK: usize = 4096;
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct PtyTransport {
    child: Child,
    writer: File,
    output: Receiver<Vec<u8>>,
    buffer: Vec<u8>,
    eof: bool,
}

impl PtyTransport {
    /// Spawn the engine in its own process group, attached to a new pty.
    pub fn spawn(command: &EngineCommand) -> Result<Self> {
        let pty = openpty(None, None).map_err(|e| Error::Transport(e.into()))?;

        let mut termios = tcgetattr(&pty.slave).map_err(|e| Error::Transport(e.into()))?;
        termios.local_flags.remove(LocalFlags::ECHO);
        tcsetattr(&pty.slave, SetArg::TCSANOW, &termios)
            .map_err(|e| Error::Transport(e.into()))?;

        let program = command.program().to_string_lossy().to_string();
        let spawn_err = |source| Error::ProcessSpawn {
            program: program.clone(),
            source,
        };

        let mut cmd = Command::new(command.program());
        cmd.args(command.args())
            .stdin(Stdio::from(pty.slave.try_clone().map_err(spawn_err)?))
            .stdout(Stdio::from(pty.slave.try_clone().map_err(spawn_err)?))
            .stderr(Stdio::from(pty.slave))
            .process_group(0);
        let child = cmd.spawn().map_err(spawn_err)?;
        // the master sees EOF only once no slave fd is left open here
        drop(cmd);
        info!(pid = child.id(), program = %program, "Engine spawned");

        let writer = File::from(pty.master);
        let reader = writer.try_clone().map_err(Error::Transport)?;
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("engine-pty".to_string())
            .spawn(move || pump(reader, tx))
            .map_err(Error::Transport)?;

        Ok(Self {
            child,
            writer,
            output: rx,
            buffer: Vec::new(),
            eof: false,
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// SIGKILL the engine's process group and reap the child.
    fn kill(&mut self) {
        // the child leads its own group, so its pid is the group id
        let group = Pid::from_raw(self.child.id() as i32);
        if let Err(e) = killpg(group, Signal::SIGKILL) {
            warn!(error = %e, "Failed to kill engine process group");
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }

    /// Take everything before the first `prompt` out of the buffer.
    fn take_until(&mut self, prompt: &[u8]) -> Option<String> {
        if prompt.is_empty() {
            return None;
        }
        let pos = self
            .buffer
            .windows(prompt.len())
            .position(|w| w == prompt)?;
        let out = String::from_utf8_lossy(&self.buffer[..pos]).to_string();
        self.buffer.drain(..pos + prompt.len());
        Some(out)
    }
}

/// Copy pty output into the channel until EOF (EIO once the child is gone).
fn pump(mut reader: File, tx: mpsc::Sender<Vec<u8>>) {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                let bytes: Vec<u8> = chunk[..n].iter().copied().filter(|&b| b != b'\r').collect();
                if tx.send(bytes).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(error = %e, "Engine output closed");
                break;
            }
        }
    }
}

impl Transport for PtyTransport {
    fn send(&mut self, line: &str) -> Result<()> {
        debug!(line, "Sending to engine");
        self.writer
            .write_all(format!("{}\n", line).as_bytes())
            .and_then(|_| self.writer.flush())
            .map_err(|e| match e.kind() {
                io::ErrorKind::BrokenPipe => Error::EngineExited,
                _ => Error::Transport(e),
            })
    }

    fn expect(&mut self, prompt: &str, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(out) = self.take_until(prompt.as_bytes()) {
                return Ok(out);
            }
            if self.eof {
                return Err(Error::EngineExited);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::PromptTimeout { waited: timeout });
            }
            match self.output.recv_timeout(remaining) {
                Ok(bytes) => self.buffer.extend_from_slice(&bytes),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(Error::PromptTimeout { waited: timeout });
                }
                Err(RecvTimeoutError::Disconnected) => self.eof = true,
            }
        }
    }

    fn close(&mut self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    info!(pid = self.child.id(), %status, "Engine exited");
                    return;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(EXIT_POLL_INTERVAL),
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to poll engine");
                    break;
                }
            }
        }

        warn!(pid = self.child.id(), waited = ?timeout, "Engine did not exit, killing");
        self.kill();
    }
}

impl Drop for PtyTransport {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            warn!(pid = self.child.id(), "Engine still running on drop, killing");
            self.kill();
        }
    }
}
