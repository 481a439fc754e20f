//! conpty-host - run a child process inside a Windows pseudo console
//!
//! The crate creates a ConPTY, launches a process attached to it, and exposes
//! the process's console I/O as byte streams. On top of the raw streams it
//! extracts the title the console reports at startup and optionally strips
//! ANSI control sequences from the output.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(windows)]
//! # fn main() -> conpty_host::Result<()> {
//! use conpty_host::{ConsoleHost, HostOptions, SessionEvent};
//!
//! let host = ConsoleHost::start("cmd.exe /c echo hello", &HostOptions::default())?;
//! for event in host.events() {
//!     match event {
//!         SessionEvent::TitleChanged(title) => println!("title: {}", title),
//!         SessionEvent::Output(text) => print!("{}", text),
//!         SessionEvent::Exited(code) => {
//!             println!("exited: {:?}", code);
//!             break;
//!         }
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! # #[cfg(not(windows))]
//! # fn main() {}
//! ```

pub mod config;
pub mod core;
pub mod ui;

pub use crate::config::Config;
pub use crate::core::ansi::strip_control_sequences;
pub use crate::core::error::{Error, Resource, Result};
pub use crate::core::host::{HostOptions, SessionEvent};
pub use crate::core::monitor::{MonitorEvent, MonitorState, OutputMonitor, TitleSplitter};

#[cfg(windows)]
pub use crate::core::host::ConsoleHost;
#[cfg(windows)]
pub use crate::core::launcher::{ChildLauncher, ChildProcess};
#[cfg(windows)]
pub use crate::core::pipe::{DuplexPipe, PipeReader, PipeWriter};
#[cfg(windows)]
pub use crate::core::pty::PtySession;
#[cfg(windows)]
pub use crate::core::session::TerminalSession;
