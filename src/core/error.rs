//! Error types shared by the pipe, console, launcher and monitor layers.
//!
//! Every failing OS call is translated here into an [`Error`] carrying the
//! Win32 error code, so callers never see raw `HRESULT`s.

use std::fmt;
use std::io;
use thiserror::Error;

/// OS resource that failed to allocate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Pipe,
    PseudoConsole,
    AttributeList,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resource::Pipe => "pipe",
            Resource::PseudoConsole => "pseudo console",
            Resource::AttributeList => "process attribute list",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to create {resource} (os error {code})")]
    ResourceCreation { resource: Resource, code: i32 },

    #[error("Failed to launch process (os error {code})")]
    ProcessLaunch { code: i32 },

    #[error("Failed to resize pseudo console (os error {code})")]
    Resize { code: i32 },

    #[error("Session has been terminated")]
    SessionTerminated,

    #[error("No title marker found within the first {limit} bytes of output")]
    TitleParse { limit: usize },

    #[error("Invalid console size {width}x{height}")]
    InvalidSize { width: i32, height: i32 },

    #[error("Command line is empty")]
    EmptyCommand,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Win32 error code carried by this error, if any
    pub fn code(&self) -> Option<i32> {
        match self {
            Error::ResourceCreation { code, .. }
            | Error::ProcessLaunch { code }
            | Error::Resize { code } => Some(*code),
            Error::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }

    /// Whether this error only signals that the session ended
    pub fn is_session_end(&self) -> bool {
        match self {
            Error::SessionTerminated => true,
            Error::Io(e) => is_closed_handle(e),
            _ => false,
        }
    }
}

/// Win32 codes that mean "the other side is gone" rather than a failure.
const ERROR_INVALID_HANDLE: i32 = 6;
const ERROR_BROKEN_PIPE: i32 = 109;
const ERROR_NO_DATA: i32 = 232;
const ERROR_PIPE_NOT_CONNECTED: i32 = 233;
const ERROR_OPERATION_ABORTED: i32 = 995;

/// Check whether an I/O error is a closed-handle condition
pub fn is_closed_handle(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof | io::ErrorKind::NotConnected
    ) {
        return true;
    }
    // Raw codes are only meaningful on Windows; elsewhere the kind check covers it.
    cfg!(windows)
        && matches!(
            err.raw_os_error(),
            Some(
                ERROR_INVALID_HANDLE
                    | ERROR_BROKEN_PIPE
                    | ERROR_NO_DATA
                    | ERROR_PIPE_NOT_CONNECTED
                    | ERROR_OPERATION_ABORTED
            )
        )
}

/// Extract the Win32 error code from an `HRESULT`.
///
/// `HRESULT_FROM_WIN32` packs the code as `0x8007xxxx`; anything else is
/// returned unchanged.
pub fn win32_code(hresult: i32) -> i32 {
    const FACILITY_WIN32: u32 = 7;
    let hr = hresult as u32;
    if hr & 0x8000_0000 != 0 && (hr >> 16) & 0x1FFF == FACILITY_WIN32 {
        (hr & 0xFFFF) as i32
    } else {
        hresult
    }
}

#[cfg(windows)]
pub(crate) fn os_code(err: &windows::core::Error) -> i32 {
    win32_code(err.code().0)
}

#[cfg(windows)]
pub(crate) fn io_error(err: &windows::core::Error) -> io::Error {
    io::Error::from_raw_os_error(os_code(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_win32_code_unwraps_hresult() {
        // HRESULT_FROM_WIN32(ERROR_BROKEN_PIPE)
        assert_eq!(win32_code(0x8007_006Du32 as i32), 109);
        // E_INVALIDARG
        assert_eq!(win32_code(0x8007_0057u32 as i32), 87);
        // E_FAIL has no Win32 facility
        assert_eq!(win32_code(0x8000_4005u32 as i32), 0x8000_4005u32 as i32);
        assert_eq!(win32_code(0), 0);
    }

    #[test]
    fn test_error_code() {
        let err = Error::ResourceCreation {
            resource: Resource::Pipe,
            code: 5,
        };
        assert_eq!(err.code(), Some(5));
        assert_eq!(Error::ProcessLaunch { code: 2 }.code(), Some(2));
        assert_eq!(Error::SessionTerminated.code(), None);
        assert_eq!(Error::TitleParse { limit: 10 }.code(), None);
    }

    #[test]
    fn test_error_display() {
        let err = Error::ResourceCreation {
            resource: Resource::PseudoConsole,
            code: 87,
        };
        assert_eq!(err.to_string(), "Failed to create pseudo console (os error 87)");

        let err = Error::ResourceCreation {
            resource: Resource::AttributeList,
            code: 0,
        };
        assert!(err.to_string().contains("process attribute list"));

        let err = Error::TitleParse { limit: 65536 };
        assert_eq!(err.to_string(), "No title marker found within the first 65536 bytes of output");
    }

    #[test]
    fn test_session_end_detection() {
        assert!(Error::SessionTerminated.is_session_end());
        assert!(Error::Io(io::Error::from(io::ErrorKind::BrokenPipe)).is_session_end());
        assert!(!Error::Io(io::Error::from(io::ErrorKind::PermissionDenied)).is_session_end());
        assert!(!Error::ProcessLaunch { code: 2 }.is_session_end());
    }
}
