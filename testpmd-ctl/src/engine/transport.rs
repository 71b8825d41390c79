//! Line-oriented, prompt-delimited channel to the engine.

use std::time::Duration;

use crate::error::Result;

/// Ordered byte stream to an interactive engine.
///
/// There is no request correlation: the output read after a `send` belongs
/// to that line only if nothing else was sent in between. Callers keep at
/// most one command in flight.
pub trait Transport: Send {
    /// Write one line; the transport adds the line terminator.
    fn send(&mut self, line: &str) -> Result<()>;

    /// Read until `prompt` appears or `timeout` elapses.
    ///
    /// Returns everything read before the prompt; the prompt itself is
    /// consumed. Fails with `PromptTimeout` or `EngineExited`.
    fn expect(&mut self, prompt: &str, timeout: Duration) -> Result<String>;

    /// Send a line and wait for the next prompt.
    fn send_and_await(&mut self, line: &str, prompt: &str, timeout: Duration) -> Result<String> {
        self.send(line)?;
        self.expect(prompt, timeout)
    }

    /// Shut the engine down, waiting at most `timeout`. Best effort.
    fn close(&mut self, timeout: Duration);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, line: &str) -> Result<()> {
        (**self).send(line)
    }

    fn expect(&mut self, prompt: &str, timeout: Duration) -> Result<String> {
        (**self).expect(prompt, timeout)
    }

    fn send_and_await(&mut self, line: &str, prompt: &str, timeout: Duration) -> Result<String> {
        (**self).send_and_await(line, prompt, timeout)
    }

    fn close(&mut self, timeout: Duration) {
        (**self).close(timeout)
    }
}
