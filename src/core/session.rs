//! Session management
//!
//! A [`TerminalSession`] owns the two pipes, the pseudo console and the child
//! process started inside it.

use std::sync::Arc;

use tracing::{debug, info};

use super::error::{Error, Result};
use super::launcher::{ChildLauncher, ChildProcess};
use super::pipe::{DuplexPipe, PipeReader, PipeWriter};
use super::pty::PtySession;

/// A child process running in a pseudo console
pub struct TerminalSession {
    /// Child process, shared with exit waiters
    child: Option<Arc<ChildProcess>>,
    /// Pseudo console
    pty: Option<PtySession>,
    /// Input write end, until handed to the caller
    input: Option<PipeWriter>,
    /// Output read end, until handed to the caller
    output: Option<PipeReader>,
    disposed: bool,
}

impl TerminalSession {
    /// Start `command_line` in a `width` x `height` pseudo console
    pub fn start(command_line: &str, width: i16, height: i16) -> Result<Self> {
        if command_line.trim().is_empty() {
            return Err(Error::EmptyCommand);
        }

        // Input pipe (we write, PTY reads)
        let (input_read, input_write) = DuplexPipe::create()?.into_parts();
        // Output pipe (PTY writes, we read)
        let (output_read, output_write) = DuplexPipe::create()?.into_parts();

        let pty = PtySession::create(input_read, output_write, width, height)?;
        let child = ChildLauncher::start(command_line, &pty)?;

        info!("Session started: pid={} size={}x{}", child.id(), width, height);

        Ok(Self {
            child: Some(Arc::new(child)),
            pty: Some(pty),
            input: Some(input_write),
            output: Some(output_read),
            disposed: false,
        })
    }

    /// Take the stream that feeds the child's console input
    pub fn take_input(&mut self) -> Option<PipeWriter> {
        self.input.take()
    }

    /// Take the stream carrying the child's console output
    pub fn take_output(&mut self) -> Option<PipeReader> {
        self.output.take()
    }

    pub fn child(&self) -> Option<Arc<ChildProcess>> {
        self.child.clone()
    }

    pub fn process_id(&self) -> Option<u32> {
        self.child.as_ref().map(|c| c.id())
    }

    /// Resize the pseudo console
    pub fn resize(&self, width: i16, height: i16) -> Result<()> {
        match &self.pty {
            Some(pty) => pty.resize(width, height),
            None => Err(Error::SessionTerminated),
        }
    }

    /// Block until the child exits
    pub fn wait_for_exit(&self) -> Result<()> {
        match &self.child {
            Some(child) => child.wait(),
            None => Err(Error::SessionTerminated),
        }
    }

    /// Exit code of the child, `None` while it is still running
    pub fn try_get_exit_code(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.try_exit_code())
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Close the pseudo console without waiting for the child
    pub fn kill_console(&mut self) {
        if let Some(mut pty) = self.pty.take() {
            info!("Killing console");
            pty.dispose();
        }
    }

    /// Release the process handles, the console, then our pipe ends.
    /// Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        self.child = None;
        self.kill_console();
        self.input = None;
        self.output = None;

        debug!("Session disposed");
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        self.dispose();
    }
}
