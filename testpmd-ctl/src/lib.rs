//! Control an external DPDK testpmd process.
//!
//! - [`pci`]: move NICs between their kernel driver and the user-space I/O
//!   driver testpmd needs, and back.
//! - [`engine`]: spawn testpmd on a pty and run prompt-delimited commands.
//! - [`forwarding`]: the stop/switch/start protocol for forwarding modes.
//! - [`service`]: everything above behind one [`Testpmd`] handle.

pub mod config;
pub mod engine;
pub mod error;
pub mod forwarding;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod parse;
pub mod pci;
pub mod service;

pub use config::Settings;
pub use error::{Error, Result};
pub use forwarding::{ForwardMode, ForwardingState};
pub use pci::{PciAddress, SysfsBus};
pub use service::{PeerAddress, Testpmd};
