//! Child process launch
//!
//! Spawns a process whose console is the given pseudo console. The console is
//! attached through a process thread attribute list passed with
//! `EXTENDED_STARTUPINFO_PRESENT`.

use std::mem;
use std::time::Duration;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle};

use tracing::{debug, info};
use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::HANDLE;
use windows::Win32::Security::SECURITY_ATTRIBUTES;
use windows::Win32::System::Console::HPCON;
use windows::Win32::System::Threading::{
    CreateProcessW, DeleteProcThreadAttributeList, GetExitCodeProcess,
    InitializeProcThreadAttributeList, UpdateProcThreadAttribute, WaitForSingleObject,
    EXTENDED_STARTUPINFO_PRESENT, INFINITE, LPPROC_THREAD_ATTRIBUTE_LIST, PROCESS_INFORMATION,
    STARTUPINFOEXW, STARTUPINFOW,
};

use super::error::{os_code, Error, Resource, Result};
use super::pty::PtySession;

const PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE: usize = 0x00020016;
const WAIT_OBJECT_0: u32 = 0;
const WAIT_TIMEOUT: u32 = 0x0000_0102;
const WAIT_FAILED: u32 = 0xFFFF_FFFF;

fn attribute_error(code: i32) -> Error {
    Error::ResourceCreation {
        resource: Resource::AttributeList,
        code,
    }
}

/// Attribute list carrying the pseudo console
struct ProcThreadAttributeList {
    // usize words keep the buffer pointer aligned
    buffer: Vec<usize>,
    initialized: bool,
}

impl ProcThreadAttributeList {
    /// Size, allocate, initialize and populate the list in one go
    fn with_pseudo_console(hpc: HPCON) -> Result<Self> {
        let mut size: usize = 0;

        // Only the required size is wanted here; success would be a surprise
        let probe = unsafe {
            InitializeProcThreadAttributeList(LPPROC_THREAD_ATTRIBUTE_LIST::default(), 1, 0, &mut size)
        };
        if probe.is_ok() || size == 0 {
            let code = probe.err().map(|e| os_code(&e)).unwrap_or(0);
            return Err(attribute_error(code));
        }

        let words = (size + mem::size_of::<usize>() - 1) / mem::size_of::<usize>();
        let mut list = Self {
            buffer: vec![0usize; words],
            initialized: false,
        };

        unsafe {
            InitializeProcThreadAttributeList(list.as_raw(), 1, 0, &mut size)
                .map_err(|e| attribute_error(os_code(&e)))?;
        }
        list.initialized = true;

        unsafe {
            UpdateProcThreadAttribute(
                list.as_raw(),
                0,
                PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE,
                Some(hpc.0 as *const _),
                mem::size_of::<HPCON>(),
                None,
                None,
            )
            .map_err(|e| attribute_error(os_code(&e)))?;
        }

        Ok(list)
    }

    fn as_raw(&self) -> LPPROC_THREAD_ATTRIBUTE_LIST {
        LPPROC_THREAD_ATTRIBUTE_LIST(self.buffer.as_ptr() as *mut _)
    }
}

impl Drop for ProcThreadAttributeList {
    fn drop(&mut self) {
        if self.initialized {
            unsafe {
                DeleteProcThreadAttributeList(self.as_raw());
            }
        }
    }
}

/// A running (or exited) child process
#[derive(Debug)]
pub struct ChildProcess {
    pid: u32,
    tid: u32,
    process: OwnedHandle,
    #[allow(dead_code)]
    thread: OwnedHandle,
}

impl ChildProcess {
    pub fn id(&self) -> u32 {
        self.pid
    }

    pub fn thread_id(&self) -> u32 {
        self.tid
    }

    fn raw(&self) -> HANDLE {
        HANDLE(self.process.as_raw_handle() as _)
    }

    /// Block until the process exits
    pub fn wait(&self) -> Result<()> {
        let result = unsafe { WaitForSingleObject(self.raw(), INFINITE) };
        if result.0 == WAIT_FAILED {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Wait up to `timeout`; `true` once the process has exited
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(INFINITE - 1);
        let result = unsafe { WaitForSingleObject(self.raw(), millis) };
        match result.0 {
            WAIT_OBJECT_0 => Ok(true),
            WAIT_TIMEOUT => Ok(false),
            _ => Err(Error::Io(std::io::Error::last_os_error())),
        }
    }

    pub fn has_exited(&self) -> bool {
        let result = unsafe { WaitForSingleObject(self.raw(), 0) };
        result.0 == WAIT_OBJECT_0
    }

    /// Exit code, or `None` while running or if the query fails
    pub fn try_exit_code(&self) -> Option<u32> {
        if !self.has_exited() {
            return None;
        }

        let mut exit_code: u32 = 0;
        unsafe {
            GetExitCodeProcess(self.raw(), &mut exit_code).ok()?;
        }
        Some(exit_code)
    }
}

/// Spawns processes attached to a pseudo console
pub struct ChildLauncher;

impl ChildLauncher {
    /// Start `command_line` with `pty` as its console
    pub fn start(command_line: &str, pty: &PtySession) -> Result<ChildProcess> {
        if command_line.trim().is_empty() {
            return Err(Error::EmptyCommand);
        }
        let hpc = pty.handle().ok_or(Error::SessionTerminated)?;

        let attributes = ProcThreadAttributeList::with_pseudo_console(hpc)?;

        let startup_info = STARTUPINFOEXW {
            StartupInfo: STARTUPINFOW {
                cb: mem::size_of::<STARTUPINFOEXW>() as u32,
                ..Default::default()
            },
            lpAttributeList: attributes.as_raw(),
        };

        let security = SECURITY_ATTRIBUTES {
            nLength: mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
            ..Default::default()
        };

        // CreateProcessW may modify the command line buffer in place
        let mut cmd_wide: Vec<u16> = command_line
            .encode_utf16()
            .chain(std::iter::once(0))
            .collect();
        let mut process_info = PROCESS_INFORMATION::default();

        unsafe {
            CreateProcessW(
                PCWSTR::null(),
                PWSTR(cmd_wide.as_mut_ptr()),
                Some(&security),
                Some(&security),
                false,
                EXTENDED_STARTUPINFO_PRESENT,
                None,
                PCWSTR::null(),
                &startup_info.StartupInfo,
                &mut process_info,
            )
            .map_err(|e| Error::ProcessLaunch { code: os_code(&e) })?;
        }

        drop(attributes);

        info!(
            "Process started: pid={} tid={}",
            process_info.dwProcessId, process_info.dwThreadId
        );
        debug!("Command line: {}", command_line);

        // Safety: CreateProcessW succeeded and handed us both handles
        unsafe {
            Ok(ChildProcess {
                pid: process_info.dwProcessId,
                tid: process_info.dwThreadId,
                process: OwnedHandle::from_raw_handle(process_info.hProcess.0 as _),
                thread: OwnedHandle::from_raw_handle(process_info.hThread.0 as _),
            })
        }
    }
}
