//! Anonymous pipes for pseudo console I/O
//!
//! Each end is a single-owner handle guard; dropping the end closes the
//! handle exactly once.

use std::io::{self, Read, Write};
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle};

use tracing::debug;
use windows::Win32::Foundation::{ERROR_BROKEN_PIPE, HANDLE};
use windows::Win32::Storage::FileSystem::{ReadFile, WriteFile};
use windows::Win32::System::Pipes::CreatePipe;

use super::error::{io_error, os_code, Error, Resource, Result};

/// Read end of a pipe
#[derive(Debug)]
pub struct PipeReader {
    handle: OwnedHandle,
}

/// Write end of a pipe
#[derive(Debug)]
pub struct PipeWriter {
    handle: OwnedHandle,
}

/// A read/write pair created together
#[derive(Debug)]
pub struct DuplexPipe {
    pub reader: PipeReader,
    pub writer: PipeWriter,
}

impl DuplexPipe {
    /// Create an anonymous, non-inheritable pipe
    pub fn create() -> Result<Self> {
        let mut read = HANDLE::default();
        let mut write = HANDLE::default();

        unsafe {
            CreatePipe(&mut read, &mut write, None, 0).map_err(|e| Error::ResourceCreation {
                resource: Resource::Pipe,
                code: os_code(&e),
            })?;
        }

        debug!("Pipe created");

        // Safety: CreatePipe succeeded, both handles are fresh and owned by us
        unsafe {
            Ok(Self {
                reader: PipeReader {
                    handle: OwnedHandle::from_raw_handle(read.0 as _),
                },
                writer: PipeWriter {
                    handle: OwnedHandle::from_raw_handle(write.0 as _),
                },
            })
        }
    }

    /// Split into independently owned ends
    pub fn into_parts(self) -> (PipeReader, PipeWriter) {
        (self.reader, self.writer)
    }
}

impl PipeReader {
    pub(crate) fn raw(&self) -> HANDLE {
        HANDLE(self.handle.as_raw_handle() as _)
    }

    fn read_handle(&self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len().min(u32::MAX as usize);
        let mut read: u32 = 0;

        unsafe {
            match ReadFile(self.raw(), Some(&mut buf[..len]), Some(&mut read), None) {
                Ok(()) => Ok(read as usize),
                // Writer side closed: end of stream
                Err(e) if os_code(&e) == ERROR_BROKEN_PIPE.0 as i32 => Ok(0),
                Err(e) => Err(io_error(&e)),
            }
        }
    }
}

impl PipeWriter {
    pub(crate) fn raw(&self) -> HANDLE {
        HANDLE(self.handle.as_raw_handle() as _)
    }

    fn write_handle(&self, data: &[u8]) -> io::Result<usize> {
        let len = data.len().min(u32::MAX as usize);
        let mut written: u32 = 0;

        unsafe {
            WriteFile(self.raw(), Some(&data[..len]), Some(&mut written), None)
                .map_err(|e| io_error(&e))?;
        }

        Ok(written as usize)
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_handle(buf)
    }
}

impl Read for &PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_handle(buf)
    }
}

impl Write for PipeWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.write_handle(data)
    }

    // Writes go straight to the pipe, nothing is buffered here
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Write for &PipeWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.write_handle(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
