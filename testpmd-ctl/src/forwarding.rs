//! Forwarding mode state machine over an engine session.
//!
//! testpmd only accepts a mode or peer change while forwarding is stopped,
//! so every transition goes stop → change → (start). A mode change always
//! restarts forwarding, even into the current mode.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::info;

use crate::engine::EngineSession;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardMode {
    Io,
    Mac,
    IcmpEcho,
}

impl ForwardMode {
    /// Name used by `set fwd`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ForwardMode::Io => "io",
            ForwardMode::Mac => "mac",
            ForwardMode::IcmpEcho => "icmpecho",
        }
    }
}

impl fmt::Display for ForwardMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ForwardMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "io" => Ok(ForwardMode::Io),
            "mac" => Ok(ForwardMode::Mac),
            "icmp" | "icmpecho" => Ok(ForwardMode::IcmpEcho),
            other => Err(Error::config(format!("unknown forwarding mode {:?}", other))),
        }
    }
}

/// Last configured mode (`None` until the first `set fwd`) and whether
/// forwarding is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ForwardingState {
    pub mode: Option<ForwardMode>,
    pub running: bool,
}

pub struct ForwardingController {
    session: EngineSession,
    state: ForwardingState,
}

impl ForwardingController {
    pub fn new(session: EngineSession) -> Self {
        Self {
            session,
            state: ForwardingState::default(),
        }
    }

    pub fn state(&self) -> ForwardingState {
        self.state
    }

    pub fn session(&self) -> &EngineSession {
        &self.session
    }

    /// Stop if running, select `mode`, start.
    pub fn set_mode(&mut self, mode: ForwardMode) -> Result<()> {
        self.stop_forwarding()?;
        self.session.execute(&format!("set fwd {}", mode))?;
        self.session.execute("start")?;
        self.state = ForwardingState {
            mode: Some(mode),
            running: true,
        };
        info!(%mode, "Forwarding started");
        Ok(())
    }

    /// Stop if running and set the peer MAC for `port`. Forwarding stays
    /// stopped until the next [`set_mode`](Self::set_mode).
    pub fn set_peer_address(&mut self, port: u16, peer: &str) -> Result<()> {
        self.stop_forwarding()?;
        self.session
            .execute(&format!("set eth-peer {} {}", port, peer))?;
        info!(port, peer, "Peer address set");
        Ok(())
    }

    /// Read-only passthrough; forwarding state is untouched.
    ///
    /// Commands that would start, stop or reconfigure forwarding (or end the
    /// engine) are refused with `Configuration`; use
    /// [`set_mode`](Self::set_mode) and
    /// [`set_peer_address`](Self::set_peer_address) instead.
    pub fn query(&mut self, command: &str) -> Result<String> {
        if changes_forwarding(command) {
            return Err(Error::config(format!(
                "{:?} changes forwarding state and is not a query",
                command.trim()
            )));
        }
        self.session.execute(command)
    }

    /// Hand the session back, e.g. to stop it.
    pub fn into_session(self) -> EngineSession {
        self.session
    }

    fn stop_forwarding(&mut self) -> Result<()> {
        if self.state.running {
            self.session.execute("stop")?;
            self.state.running = false;
            info!("Forwarding stopped");
        }
        Ok(())
    }
}

/// Whether `command` would move the engine away from [`ForwardingState`].
fn changes_forwarding(command: &str) -> bool {
    let words: Vec<String> = command
        .split_whitespace()
        .take(2)
        .map(str::to_ascii_lowercase)
        .collect();
    match words.as_slice() {
        [first, ..] if matches!(first.as_str(), "start" | "stop" | "quit") => true,
        [set, what] if set == "set" => matches!(what.as_str(), "fwd" | "eth-peer"),
        _ => false,
    }
}
