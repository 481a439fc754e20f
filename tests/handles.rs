//! Handle accounting across create/dispose cycles (Windows only)
//!
//! Lives in its own test binary: the handle count is process-wide, so no
//! other test may open handles while it runs.

#![cfg(windows)]

use windows::Win32::System::Threading::{GetCurrentProcess, GetProcessHandleCount};

use conpty_host::{ConsoleHost, DuplexPipe, HostOptions, PtySession};

fn handle_count() -> u32 {
    let mut count = 0u32;
    unsafe { GetProcessHandleCount(GetCurrentProcess(), &mut count) }.unwrap();
    count
}

fn pty_cycle(width: i16, height: i16) {
    let (input_read, input_write) = DuplexPipe::create().unwrap().into_parts();
    let (output_read, output_write) = DuplexPipe::create().unwrap().into_parts();

    let mut pty = PtySession::create(input_read, output_write, width, height).unwrap();
    pty.dispose();

    drop(input_write);
    drop(output_read);
}

fn host_cycle(command_line: &str) {
    let mut host = ConsoleHost::start(command_line, &HostOptions::default()).unwrap();
    host.write_line("exit 0").unwrap();
    host.wait_for_exit().unwrap();
    host.dispose();
}

#[test]
fn create_dispose_cycles_release_handles() {
    // Process-wide handles opened lazily on first use
    for _ in 0..2 {
        pty_cycle(80, 24);
        host_cycle("cmd.exe /q /k");
    }

    let before = handle_count();

    for (width, height) in [(1, 1), (80, 24), (120, 30), (500, 200)] {
        pty_cycle(width, height);
    }
    for _ in 0..5 {
        host_cycle("cmd.exe /q /k");
    }

    assert_eq!(handle_count(), before);
}
