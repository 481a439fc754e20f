//! ConPTY wrapper for Windows
//!
//! This module provides a safe wrapper around the Windows pseudo console
//! handle. The console is created from one pipe's read end (its input) and
//! another pipe's write end (its output).

use tracing::{debug, info};
use windows::Win32::System::Console::{
    ClosePseudoConsole, CreatePseudoConsole, ResizePseudoConsole, COORD, HPCON,
};

use super::error::{os_code, Error, Resource, Result};
use super::pipe::{PipeReader, PipeWriter};

/// Pseudo console handle wrapper
#[derive(Debug)]
pub struct PtySession {
    hpc: Option<HPCON>,
}

// Safety: an HPCON may be used from any thread; close is guarded by &mut self
unsafe impl Send for PtySession {}
unsafe impl Sync for PtySession {}

/// Check that a size fits in a console coordinate
pub(crate) fn validate_size(width: i16, height: i16) -> Result<COORD> {
    if width < 1 || height < 1 {
        return Err(Error::InvalidSize {
            width: width as i32,
            height: height as i32,
        });
    }
    Ok(COORD {
        X: width,
        Y: height,
    })
}

impl PtySession {
    /// Create a pseudo console of `width` x `height` cells.
    ///
    /// Both pipe ends are consumed: the console keeps its own duplicates, and
    /// ours are closed before returning, on success or failure.
    pub fn create(input: PipeReader, output: PipeWriter, width: i16, height: i16) -> Result<Self> {
        let size = validate_size(width, height)?;

        let result = unsafe { CreatePseudoConsole(size, input.raw(), output.raw(), 0) };

        drop(input);
        drop(output);

        let hpc = result.map_err(|e| Error::ResourceCreation {
            resource: Resource::PseudoConsole,
            code: os_code(&e),
        })?;

        info!("Pseudo console created: {}x{}", width, height);
        Ok(Self { hpc: Some(hpc) })
    }

    /// Resize the pseudo console
    pub fn resize(&self, width: i16, height: i16) -> Result<()> {
        let size = validate_size(width, height)?;
        let hpc = self.hpc.ok_or(Error::SessionTerminated)?;

        unsafe {
            ResizePseudoConsole(hpc, size).map_err(|e| Error::Resize { code: os_code(&e) })?;
        }

        debug!("Pseudo console resized: {}x{}", width, height);
        Ok(())
    }

    pub(crate) fn handle(&self) -> Option<HPCON> {
        self.hpc
    }

    pub fn is_closed(&self) -> bool {
        self.hpc.is_none()
    }

    /// Close the pseudo console. Safe to call more than once.
    pub fn dispose(&mut self) {
        if let Some(hpc) = self.hpc.take() {
            unsafe {
                ClosePseudoConsole(hpc);
            }
            debug!("Pseudo console closed");
        }
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pipe::DuplexPipe;

    fn create(width: i16, height: i16) -> Result<PtySession> {
        let (input_read, _input_write) = DuplexPipe::create()?.into_parts();
        let (_output_read, output_write) = DuplexPipe::create()?.into_parts();
        PtySession::create(input_read, output_write, width, height)
    }

    #[test]
    fn test_create_and_dispose() {
        for (w, h) in [(1, 1), (80, 24), (120, 30), (i16::MAX, i16::MAX)] {
            let mut pty = create(w, h).unwrap();
            assert!(!pty.is_closed());
            pty.dispose();
            assert!(pty.is_closed());
            pty.dispose();
        }
    }

    #[test]
    fn test_resize() {
        let pty = create(80, 24).unwrap();
        pty.resize(100, 40).unwrap();
        assert!(matches!(pty.resize(0, 40), Err(Error::InvalidSize { .. })));
    }

    #[test]
    fn test_resize_after_dispose() {
        let mut pty = create(80, 24).unwrap();
        pty.dispose();
        assert!(matches!(pty.resize(80, 24), Err(Error::SessionTerminated)));
    }

    #[test]
    fn test_invalid_size() {
        assert!(matches!(create(0, 24), Err(Error::InvalidSize { width: 0, height: 24 })));
        assert!(matches!(create(80, -1), Err(Error::InvalidSize { .. })));
    }
}
