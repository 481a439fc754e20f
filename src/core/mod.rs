//! Core pseudo console components.
//!
//! - **pipe**: anonymous pipes with single-owner read/write ends
//! - **pty**: Windows ConPTY handle wrapper
//! - **launcher**: spawns a child process attached to a pseudo console
//! - **session**: pipes + pseudo console + child, with ordered teardown
//! - **monitor**: splits the startup title from the output stream
//! - **ansi**: control sequence stripping
//! - **host**: session plus background reader/exit threads and an event channel
//!
//! # Architecture
//!
//! ```text
//! ConsoleHost
//! └── TerminalSession
//!     ├── DuplexPipe (input)  ── read end ──┐
//!     ├── DuplexPipe (output) ── write end ─┴─> PtySession
//!     └── ChildProcess (ChildLauncher)
//! ```
//!
//! Only `monitor`, `ansi`, `error` and the event types in `host` are
//! available off Windows.

pub mod ansi;
pub mod error;
pub mod host;
pub mod monitor;

#[cfg(windows)]
pub mod launcher;
#[cfg(windows)]
pub mod pipe;
#[cfg(windows)]
pub mod pty;
#[cfg(windows)]
pub mod session;
