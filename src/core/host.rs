//! Console host
//!
//! Runs a [`TerminalSession`] with its output monitored on a background
//! thread and its exit awaited on another, and delivers everything through a
//! single event channel.
//!
//! ```text
//! ConsoleHost
//! ├── TerminalSession (pipes, pseudo console, child)
//! ├── reader thread:  OutputMonitor ──┐
//! └── exit thread:    wait + exit code ┴──> Receiver<SessionEvent>
//! ```

use crate::config::Config;
use crate::core::monitor::{MonitorEvent, DEFAULT_MAX_TITLE_LEN};

/// Session events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Title reported by the console at startup
    TitleChanged(String),
    /// Output text
    Output(String),
    /// Error occurred; the session keeps running
    Error(String),
    /// Process has exited, with its exit code if it could be read
    Exited(Option<u32>),
    /// Output stream closed
    Ended,
}

impl From<MonitorEvent> for SessionEvent {
    fn from(event: MonitorEvent) -> Self {
        match event {
            MonitorEvent::Title(title) => SessionEvent::TitleChanged(title),
            MonitorEvent::Output(text) => SessionEvent::Output(text),
            MonitorEvent::Error(e) => SessionEvent::Error(e.to_string()),
            MonitorEvent::Ended => SessionEvent::Ended,
        }
    }
}

/// Options for starting a [`ConsoleHost`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostOptions {
    pub width: i16,
    pub height: i16,
    /// Strip ANSI control sequences from output events
    pub filter_control_sequences: bool,
    pub max_title_len: usize,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            width: 120,
            height: 30,
            filter_control_sequences: false,
            max_title_len: DEFAULT_MAX_TITLE_LEN,
        }
    }
}

impl From<&Config> for HostOptions {
    fn from(config: &Config) -> Self {
        Self {
            width: config.width,
            height: config.height,
            filter_control_sequences: config.filter_control_sequences,
            max_title_len: config.max_title_len,
        }
    }
}

#[cfg(windows)]
pub use self::windows_host::ConsoleHost;

#[cfg(windows)]
mod windows_host {
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc::{self, Receiver, TryRecvError};
    use std::sync::{Arc, Mutex, MutexGuard};
    use std::thread::{self, JoinHandle};
    use std::time::{Duration, Instant};

    use tracing::{debug, info, warn};

    use super::{HostOptions, SessionEvent};
    use crate::core::error::{Error, Result};
    use crate::core::launcher::ChildProcess;
    use crate::core::monitor::OutputMonitor;
    use crate::core::pipe::PipeWriter;
    use crate::core::session::TerminalSession;

    /// How often the exit waiter re-checks the shutdown flag
    const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

    fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A pseudo console session with event delivery
    pub struct ConsoleHost {
        session: Mutex<TerminalSession>,
        input: Mutex<Option<PipeWriter>>,
        child: Option<Arc<ChildProcess>>,
        events: Receiver<SessionEvent>,
        shutdown: Arc<AtomicBool>,
        reader_thread: Option<JoinHandle<()>>,
        exit_thread: Option<JoinHandle<()>>,
        pid: u32,
    }

    impl ConsoleHost {
        /// Start `command_line` and begin monitoring it
        pub fn start(command_line: &str, options: &HostOptions) -> Result<Self> {
            let mut session = TerminalSession::start(command_line, options.width, options.height)?;

            let input = session.take_input();
            let output = session.take_output().ok_or(Error::SessionTerminated)?;
            let child = session.child().ok_or(Error::SessionTerminated)?;
            let pid = child.id();

            let shutdown = Arc::new(AtomicBool::new(false));
            let (tx, rx) = mpsc::channel::<SessionEvent>();

            // Output reader
            let monitor = OutputMonitor::new(options.filter_control_sequences)
                .with_max_title_len(options.max_title_len)
                .with_shutdown_flag(shutdown.clone());
            let output_tx = tx.clone();
            let reader_thread = thread::Builder::new()
                .name(format!("conpty-output-{}", pid))
                .spawn(move || {
                    monitor.run(output, |event| output_tx.send(event.into()).is_ok());
                    debug!("Output reader finished");
                })?;

            // Exit waiter; gives up its process reference on shutdown
            let waiter_child = child.clone();
            let waiter_shutdown = shutdown.clone();
            let exit_thread = thread::Builder::new()
                .name(format!("conpty-exit-{}", pid))
                .spawn(move || {
                    let exit_code = loop {
                        if waiter_shutdown.load(Ordering::SeqCst) {
                            debug!("Exit waiter stopped: pid={}", pid);
                            return;
                        }
                        match waiter_child.wait_timeout(EXIT_POLL_INTERVAL) {
                            Ok(true) => break waiter_child.try_exit_code(),
                            Ok(false) => continue,
                            Err(e) => {
                                warn!("Waiting for process {} failed: {}", pid, e);
                                break None;
                            }
                        }
                    };
                    info!("Process {} exited: {:?}", pid, exit_code);

                    if !waiter_shutdown.load(Ordering::SeqCst) {
                        let _ = tx.send(SessionEvent::Exited(exit_code));
                    }
                })?;

            Ok(Self {
                session: Mutex::new(session),
                input: Mutex::new(input),
                child: Some(child),
                events: rx,
                shutdown,
                reader_thread: Some(reader_thread),
                exit_thread: Some(exit_thread),
                pid,
            })
        }

        pub fn process_id(&self) -> u32 {
            self.pid
        }

        /// Event stream; title always arrives before the first output
        pub fn events(&self) -> &Receiver<SessionEvent> {
            &self.events
        }

        /// Next event if one is ready
        pub fn try_recv(&self) -> Option<SessionEvent> {
            match self.events.try_recv() {
                Ok(event) => Some(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
            }
        }

        /// Write raw bytes to the console input
        pub fn write_bytes(&self, data: &[u8]) -> Result<()> {
            let guard = lock_or_recover(&self.input);
            let mut writer = guard.as_ref().ok_or(Error::SessionTerminated)?;

            writer
                .write_all(data)
                .and_then(|()| writer.flush())
                .map_err(|e| match Error::Io(e) {
                    err if err.is_session_end() => Error::SessionTerminated,
                    err => err,
                })
        }

        /// Write text to the console input
        pub fn write(&self, data: &str) -> Result<()> {
            self.write_bytes(data.as_bytes())
        }

        /// Write text followed by a carriage return
        pub fn write_line(&self, data: &str) -> Result<()> {
            let mut line = String::with_capacity(data.len() + 1);
            line.push_str(data);
            line.push('\r');
            self.write_bytes(line.as_bytes())
        }

        /// Resize the pseudo console
        pub fn resize(&self, width: i16, height: i16) -> Result<()> {
            lock_or_recover(&self.session).resize(width, height)
        }

        /// Block until the child exits
        pub fn wait_for_exit(&self) -> Result<()> {
            match &self.child {
                Some(child) => child.wait(),
                None => Err(Error::SessionTerminated),
            }
        }

        pub fn try_get_exit_code(&self) -> Option<u32> {
            self.child.as_ref().and_then(|c| c.try_exit_code())
        }

        pub fn is_disposed(&self) -> bool {
            self.shutdown.load(Ordering::SeqCst)
        }

        /// Close the pseudo console and collect the events still in flight,
        /// up to and including `Ended`.
        ///
        /// Call after `Exited` so output written just before the exit is not
        /// lost. Gives up after `timeout`, which is also what happens if
        /// `Ended` was already received.
        pub fn close_and_drain(&self, timeout: Duration) -> Vec<SessionEvent> {
            lock_or_recover(&self.session).kill_console();

            let deadline = Instant::now() + timeout;
            let mut events = Vec::new();
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match self.events.recv_timeout(remaining) {
                    Ok(SessionEvent::Ended) => {
                        events.push(SessionEvent::Ended);
                        break;
                    }
                    Ok(event) => events.push(event),
                    Err(e) => {
                        debug!("Drain stopped before end of output: {}", e);
                        break;
                    }
                }
            }
            events
        }

        /// Stop event delivery and release the session.
        ///
        /// The exit waiter is joined first so the process handle goes before
        /// the console. Closing the console makes the pending output read
        /// return, so the reader thread is joined last. Safe to call more
        /// than once.
        pub fn dispose(&mut self) {
            if self.shutdown.swap(true, Ordering::SeqCst) {
                return;
            }

            self.child = None;
            if let Some(handle) = self.exit_thread.take() {
                let _ = handle.join();
            }

            lock_or_recover(&self.session).dispose();
            *lock_or_recover(&self.input) = None;

            if let Some(handle) = self.reader_thread.take() {
                let _ = handle.join();
            }

            info!("Console host disposed: pid={}", self.pid);
        }
    }

    impl Drop for ConsoleHost {
        fn drop(&mut self) {
            self.dispose();
        }
    }
}
