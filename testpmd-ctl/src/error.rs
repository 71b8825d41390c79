//! Error types for testpmd-ctl.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for testpmd-ctl operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (fatal, abort startup)
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("invalid pci address: {address} (expected: 0000:01:00.0)")]
    InvalidPciAddress { address: String },

    #[error("no driver mapping for vendor {vendor} device {device}")]
    UnknownVendor { vendor: String, device: String },

    // Device control errors (fatal, device state indeterminate)
    #[error("device i/o error: {path:?}: {source}")]
    DeviceIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("devices are already acquired")]
    AlreadyAcquired,

    // Engine process errors
    #[error("failed to spawn {program}: {source}")]
    ProcessSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine prompt not seen within {waited:?}")]
    PromptTimeout { waited: Duration },

    #[error("command {command:?} timed out after {waited:?}")]
    CommandTimeout { command: String, waited: Duration },

    #[error("engine output stream closed")]
    EngineExited,

    #[error("engine transport error: {0}")]
    Transport(#[source] std::io::Error),

    #[error("no engine session is running")]
    NoSession,

    #[error("an engine session is already running")]
    SessionActive,

    // Console output extraction
    #[error("failed to find {field} in engine output")]
    Parse { field: &'static str, output: String },

    #[error("controller lock poisoned")]
    Poisoned,
}

impl Error {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Error::Configuration {
            reason: reason.into(),
        }
    }

    pub(crate) fn device_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::DeviceIo {
            path: path.into(),
            source,
        }
    }

    /// Whether the error leaves the devices or the engine session unusable.
    ///
    /// Command timeouts and parse failures are reported per request; the
    /// session stays up (though a timed out session is suspect).
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::CommandTimeout { .. }
                | Error::Parse { .. }
                | Error::NoSession
                | Error::SessionActive
                | Error::AlreadyAcquired
        )
    }
}
