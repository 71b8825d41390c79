//! The external testpmd process: command line, launch plan, pty channel and
//! the prompt-driven session on top of it.

pub mod cmdline;
pub mod cpuset;
pub mod launch;
pub mod pty;
pub mod session;
pub mod transport;

pub use cmdline::EngineCommand;
pub use launch::LaunchPlan;
pub use pty::PtyTransport;
pub use session::EngineSession;
pub use transport::Transport;
