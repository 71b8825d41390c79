//! One running engine and its command channel.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::engine::cpuset::allowed_cpus;
use crate::engine::launch::{LaunchPlan, PlacedDevice};
use crate::engine::pty::PtyTransport;
use crate::engine::transport::Transport;
use crate::error::{Error, Result};
use crate::pci::{PciAddress, PciBus};

/// A started engine.
///
/// Commands run strictly one at a time: [`execute`](Self::execute) takes
/// `&mut self` and returns only after the prompt came back or the command
/// timed out. Dropping the session stops the engine.
pub struct EngineSession {
    transport: Box<dyn Transport>,
    tag: String,
    prompt: String,
    command_timeout: Duration,
    stop_timeout: Duration,
    hugepage_dir: PathBuf,
    ready: bool,
    stopped: bool,
}

impl EngineSession {
    /// Plan resources for `addresses`, spawn the engine on a pty and wait for
    /// its first prompt.
    pub fn start<B: PciBus>(
        settings: &Settings,
        bus: &B,
        addresses: &[PciAddress],
        queues: u32,
        ring_size: u32,
        engine_path: &Path,
    ) -> Result<Self> {
        let devices = addresses
            .iter()
            .map(|pci| {
                Ok(PlacedDevice {
                    address: pci.clone(),
                    numa_node: bus.numa_node(pci)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let allowed = match &settings.cpus {
            Some(cpus) => cpus.clone(),
            None => allowed_cpus()?,
        };
        let plan = LaunchPlan::build(&devices, queues, ring_size, &allowed, settings)?;

        let command = plan.command(engine_path, settings);
        info!(
            program = ?command.program(),
            args = ?command.args(),
            tag = %plan.tag,
            "Starting engine"
        );
        let transport = PtyTransport::spawn(&command)?;
        Self::attach(transport, plan.tag, settings)
    }

    /// Wrap an already running engine and wait for its first prompt.
    ///
    /// On failure the transport is closed before returning.
    pub fn attach(
        transport: impl Transport + 'static,
        tag: impl Into<String>,
        settings: &Settings,
    ) -> Result<Self> {
        let mut session = Self {
            transport: Box::new(transport),
            tag: tag.into(),
            prompt: settings.prompt.clone(),
            command_timeout: settings.command_timeout,
            stop_timeout: settings.stop_timeout,
            hugepage_dir: settings.hugepage_dir.clone(),
            ready: false,
            stopped: false,
        };

        match session
            .transport
            .expect(&session.prompt, settings.start_timeout)
        {
            Ok(banner) => {
                debug!(banner = %banner.trim_end(), "Engine banner");
                info!(tag = %session.tag, "Engine ready");
                session.ready = true;
                Ok(session)
            }
            Err(e) => {
                error!(error = %e, "Engine never reached its prompt");
                session.shutdown();
                Err(e)
            }
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Whether the last exchange ended at the prompt.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Run one command and return its output, without prompt or echo.
    pub fn execute(&mut self, command: &str) -> Result<String> {
        if self.stopped {
            return Err(Error::NoSession);
        }
        if !self.ready {
            warn!(command, "Session is suspect after an earlier failure");
        }

        debug!(command, "Executing engine command");
        match self
            .transport
            .send_and_await(command, &self.prompt, self.command_timeout)
        {
            Ok(output) => {
                self.ready = true;
                Ok(strip_echo(command, &output).to_string())
            }
            Err(Error::PromptTimeout { waited }) => {
                self.ready = false;
                warn!(command, ?waited, "Engine command timed out");
                Err(Error::CommandTimeout {
                    command: command.to_string(),
                    waited,
                })
            }
            Err(e) => {
                self.ready = false;
                Err(e)
            }
        }
    }

    /// Quit the engine and remove its hugepage files. Never fails.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.ready = false;

        info!(tag = %self.tag, "Stopping engine");
        if let Err(e) = self.transport.send("quit") {
            debug!(error = %e, "quit not delivered");
        }
        self.transport.close(self.stop_timeout);

        let removed = remove_hugepage_files(&self.hugepage_dir, &self.tag);
        info!(tag = %self.tag, removed, "Engine stopped");
    }
}

impl Drop for EngineSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Drop a leading echo of `command` from `output`.
fn strip_echo<'a>(command: &str, output: &'a str) -> &'a str {
    match output.split_once('\n') {
        Some((first, rest)) if first.trim() == command.trim() => rest,
        None if output.trim() == command.trim() => "",
        _ => output,
    }
}

/// Remove files in `dir` whose name starts with `tag`. Returns how many went.
fn remove_hugepage_files(dir: &Path, tag: &str) -> usize {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Cannot list hugepage dir");
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        if !entry.file_name().to_string_lossy().starts_with(tag) {
            continue;
        }
        let path = entry.path();
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "Removed hugepage file");
                removed += 1;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove hugepage file"),
        }
    }
    removed
}
