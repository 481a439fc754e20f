//! conpty-host - relay a console program through a Windows pseudo console
//!
//! Runs a command inside a ConPTY sized to the current terminal, forwards
//! keyboard input to it, writes its output to stdout and exits with the
//! child's exit code.
//!
//! # Quick Start
//!
//! ```text
//! conpty-host                          # Run the configured command (or cmd.exe)
//! conpty-host steamcmd.exe +quit       # Run a specific command line
//! conpty-host -f -- ping localhost     # Strip control sequences from output
//! ```

use std::env;
use std::path::PathBuf;

use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use conpty_host::config::{app_dir, Config};

/// Command line options
#[derive(Debug, Default, PartialEq)]
#[cfg_attr(not(windows), allow(dead_code))]
struct Args {
    /// Command line to run
    command: Option<String>,
    width: Option<i16>,
    height: Option<i16>,
    filter: bool,
}

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(windows)]
const DEFAULT_COMMAND: &str = "cmd.exe";

fn print_version() {
    eprintln!("conpty-host {}", VERSION);
}

fn print_help() {
    eprintln!("conpty-host {} - Run a console program in a pseudo console", VERSION);
    eprintln!();
    eprintln!("Usage: conpty-host [OPTIONS] [--] [COMMAND LINE...]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -W, --width <COLS>    Console width (default: terminal width)");
    eprintln!("  -H, --height <ROWS>   Console height (default: terminal height)");
    eprintln!("  -f, --filter          Strip ANSI control sequences from output");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Without a command line, the configured command or cmd.exe is run.");
    eprintln!("Ctrl+C is forwarded to the child instead of stopping conpty-host.");
    eprintln!();
    eprintln!("Configuration: ~/.conpty-host/config.toml");
    eprintln!("Log file:      ~/.conpty-host/conpty-host.log");
}

fn parse_size(flag: &str, value: Option<&String>) -> Result<i16, String> {
    let value = value.ok_or_else(|| format!("Missing value for {}", flag))?;
    match value.parse::<i16>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("Invalid value for {}: {}", flag, value)),
    }
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut parsed = Args::default();
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-W" | "--width" => {
                i += 1;
                parsed.width = Some(parse_size("--width", args.get(i))?);
            }
            "-H" | "--height" => {
                i += 1;
                parsed.height = Some(parse_size("--height", args.get(i))?);
            }
            "-f" | "--filter" => {
                parsed.filter = true;
            }
            "--" => {
                i += 1;
                break;
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
            _ => break,
        }
        i += 1;
    }

    if i < args.len() {
        parsed.command = Some(args[i..].join(" "));
    }

    Ok(parsed)
}

fn log_path() -> PathBuf {
    app_dir()
        .map(|dir| dir.join("conpty-host.log"))
        .unwrap_or_else(|| PathBuf::from("conpty-host.log"))
}

/// Log to file; RUST_LOG overrides the configured level
fn init_logging(config: &Config) {
    let log_path = log_path();
    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.log_level))
            .unwrap_or_else(|_| EnvFilter::new(Level::INFO.as_str()));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn main() -> anyhow::Result<()> {
    let raw_args: Vec<String> = env::args().skip(1).collect();
    let args = match parse_args(&raw_args) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    let config = Config::load();
    init_logging(&config);
    tracing::info!("conpty-host {} starting...", VERSION);

    #[cfg(not(windows))]
    {
        let _ = args;
        eprintln!("conpty-host requires Windows 10 1809 or later (ConPTY).");
        std::process::exit(1);
    }

    #[cfg(windows)]
    {
        let exit_code = relay::run(args, &config)?;
        std::process::exit(exit_code);
    }
}

#[cfg(windows)]
mod relay {
    use std::io::{Stdout, Write};
    use std::time::Duration;

    use anyhow::Context;
    use crossterm::event::{self, Event};
    use crossterm::terminal::{self, SetTitle};
    use crossterm::execute;
    use tracing::{error, info, warn};

    use conpty_host::config::Config;
    use conpty_host::ui::KeyMapper;
    use conpty_host::{ConsoleHost, HostOptions, SessionEvent};

    use super::{Args, DEFAULT_COMMAND};

    /// Restores the host terminal on scope exit
    struct RawModeGuard;

    impl RawModeGuard {
        fn enable() -> anyhow::Result<Self> {
            terminal::enable_raw_mode().context("Failed to enable raw mode")?;
            Ok(Self)
        }
    }

    impl Drop for RawModeGuard {
        fn drop(&mut self) {
            let _ = terminal::disable_raw_mode();
        }
    }

    /// Upper bound on waiting for output after the child exits
    const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

    fn clamp_size(value: u16) -> i16 {
        value.clamp(1, i16::MAX as u16) as i16
    }

    /// Run the relay; returns the exit code to report
    pub fn run(args: Args, config: &Config) -> anyhow::Result<i32> {
        let command = args
            .command
            .clone()
            .or_else(|| config.command.clone())
            .unwrap_or_else(|| DEFAULT_COMMAND.to_string());

        let mut options = HostOptions::from(config);
        if let Ok((cols, rows)) = terminal::size() {
            options.width = clamp_size(cols);
            options.height = clamp_size(rows);
        }
        if let Some(width) = args.width {
            options.width = width;
        }
        if let Some(height) = args.height {
            options.height = height;
        }
        options.filter_control_sequences |= args.filter;

        info!("Command: {}", command);
        info!("Console size: {}x{}", options.width, options.height);

        let mut host = match ConsoleHost::start(&command, &options) {
            Ok(host) => host,
            Err(e) => {
                error!(code = ?e.code(), "Failed to start console host: {}", e);
                return Err(e).with_context(|| format!("Failed to start `{}`", command));
            }
        };
        info!("Started pid {}", host.process_id());

        let exit_code = {
            let _raw = RawModeGuard::enable()?;
            main_loop(&host)?
        };

        host.dispose();
        info!("Exit code: {:?}", exit_code);
        Ok(exit_code.map(|c| c as i32).unwrap_or(-1))
    }

    /// Relay one event to the host terminal; returns the exit status once
    /// the child has exited
    fn relay_event(stdout: &mut Stdout, event: SessionEvent) -> anyhow::Result<Option<Option<u32>>> {
        match event {
            SessionEvent::TitleChanged(title) => {
                let _ = execute!(stdout, SetTitle(&title));
            }
            SessionEvent::Output(text) => {
                stdout.write_all(text.as_bytes())?;
                stdout.flush()?;
            }
            SessionEvent::Error(message) => {
                warn!("Session error: {}", message);
            }
            SessionEvent::Exited(code) => return Ok(Some(code)),
            SessionEvent::Ended => {
                info!("Output stream ended");
            }
        }
        Ok(None)
    }

    fn main_loop(host: &ConsoleHost) -> anyhow::Result<Option<u32>> {
        let poll_timeout = Duration::from_millis(10);
        let mut stdout = std::io::stdout();
        let mut output_ended = false;

        loop {
            // Drain console events
            while let Some(session_event) = host.try_recv() {
                output_ended |= session_event == SessionEvent::Ended;
                if let Some(code) = relay_event(&mut stdout, session_event)? {
                    // Output the reader has not reached yet
                    if !output_ended {
                        for event in host.close_and_drain(DRAIN_TIMEOUT) {
                            relay_event(&mut stdout, event)?;
                        }
                    }
                    return Ok(code);
                }
            }

            // Forward host input
            if event::poll(poll_timeout)? {
                match event::read()? {
                    Event::Key(key_event) => {
                        if let Some(bytes) = KeyMapper::map(&key_event) {
                            if let Err(e) = host.write_bytes(&bytes) {
                                error!("Failed to write to console: {}", e);
                            }
                        }
                    }
                    Event::Paste(text) => {
                        if let Err(e) = host.write_bytes(&KeyMapper::map_paste(&text)) {
                            error!("Failed to paste: {}", e);
                        }
                    }
                    Event::Resize(cols, rows) => {
                        info!("Resize: {}x{}", cols, rows);
                        if let Err(e) = host.resize(clamp_size(cols), clamp_size(rows)) {
                            error!("Failed to resize: {}", e);
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_no_args() {
        assert_eq!(parse_args(&[]).unwrap(), Args::default());
    }

    #[test]
    fn test_command_line_joined() {
        let parsed = parse_args(&args(&["steamcmd.exe", "+login", "anonymous", "+quit"])).unwrap();
        assert_eq!(parsed.command.as_deref(), Some("steamcmd.exe +login anonymous +quit"));
    }

    #[test]
    fn test_options_before_command() {
        let parsed = parse_args(&args(&["-W", "100", "--height", "40", "-f", "--", "ping", "-n", "1"])).unwrap();
        assert_eq!(parsed.width, Some(100));
        assert_eq!(parsed.height, Some(40));
        assert!(parsed.filter);
        assert_eq!(parsed.command.as_deref(), Some("ping -n 1"));
    }

    #[test]
    fn test_command_flags_not_parsed() {
        let parsed = parse_args(&args(&["cmd.exe", "-f"])).unwrap();
        assert!(!parsed.filter);
        assert_eq!(parsed.command.as_deref(), Some("cmd.exe -f"));
    }

    #[test]
    fn test_invalid_options() {
        assert!(parse_args(&args(&["--bogus"])).is_err());
        assert!(parse_args(&args(&["-W"])).is_err());
        assert!(parse_args(&args(&["-W", "0"])).is_err());
        assert!(parse_args(&args(&["-H", "40000"])).is_err());
    }
}
