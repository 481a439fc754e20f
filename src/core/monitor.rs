//! Output monitor
//!
//! Reads the pseudo console output stream, splits the startup title sequence
//! from the rest of the output and republishes the remainder.
//!
//! ConPTY opens every session with an OSC title (`ESC ] 0 ; title BEL`)
//! followed by a cursor visibility sequence. Everything up to that cursor
//! sequence is treated as the title; the cursor sequence and everything after
//! it is regular output.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use super::ansi::{has_control_sequences, incomplete_sequence_start, strip_control_sequences};
use super::error::{is_closed_handle, Error};

/// Bytes requested per read
pub const READ_CHUNK_SIZE: usize = 1024;

/// Default bound on the title buffer before giving up on the marker
pub const DEFAULT_MAX_TITLE_LEN: usize = 64 * 1024;

/// Longest unfinished control sequence held back for the next chunk
const MAX_PENDING_SEQUENCE: usize = 256;

const CURSOR_HIDE: &str = "\x1b[?25l";
const CURSOR_SHOW: &str = "\x1b[?25h";
const BEL: char = '\x07';

/// Events produced while monitoring output
#[derive(Debug)]
pub enum MonitorEvent {
    /// Title extracted from the startup sequence (emitted at most once)
    Title(String),
    /// Output text following the title
    Output(String),
    /// A failure that did not stop the session
    Error(Error),
    /// The output stream closed
    Ended,
}

/// Title extraction state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MonitorState {
    #[default]
    AwaitingTitle,
    Passthrough,
}

/// The title/output split, without any I/O
#[derive(Debug)]
pub struct TitleSplitter {
    state: MonitorState,
    title_buffer: String,
    /// Unfinished control sequence from the previous chunk (filter mode)
    pending_sequence: String,
    filter: bool,
    max_title_len: usize,
}

impl TitleSplitter {
    pub fn new(filter_control_sequences: bool) -> Self {
        Self {
            state: MonitorState::AwaitingTitle,
            title_buffer: String::new(),
            pending_sequence: String::new(),
            filter: filter_control_sequences,
            max_title_len: DEFAULT_MAX_TITLE_LEN,
        }
    }

    pub fn with_max_title_len(mut self, max_title_len: usize) -> Self {
        self.max_title_len = max_title_len;
        self
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Feed one decoded chunk and collect the events it produces
    pub fn feed(&mut self, chunk: &str) -> Vec<MonitorEvent> {
        let mut events = Vec::new();

        match self.state {
            MonitorState::Passthrough => self.push_output(chunk, &mut events),
            MonitorState::AwaitingTitle => {
                self.title_buffer.push_str(chunk);

                if let Some(pos) = find_marker(&self.title_buffer) {
                    // The marker stays at the front of the first output
                    let rest = self.title_buffer.split_off(pos);
                    let head = std::mem::take(&mut self.title_buffer);
                    self.state = MonitorState::Passthrough;

                    let title = extract_title(&head);
                    debug!("Title received: {:?}", title);
                    events.push(MonitorEvent::Title(title));
                    self.push_output(&rest, &mut events);
                } else if self.title_buffer.len() > self.max_title_len {
                    let pending = std::mem::take(&mut self.title_buffer);
                    self.state = MonitorState::Passthrough;

                    warn!("No title marker within {} bytes, passing output through", self.max_title_len);
                    events.push(MonitorEvent::Error(Error::TitleParse {
                        limit: self.max_title_len,
                    }));
                    self.push_output(&pending, &mut events);
                }
            }
        }

        events
    }

    /// Flush whatever is still waiting for a title marker or a sequence end
    pub fn finish(&mut self) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        if self.state == MonitorState::AwaitingTitle && !self.title_buffer.is_empty() {
            let pending = std::mem::take(&mut self.title_buffer);
            self.state = MonitorState::Passthrough;
            self.push_output(&pending, &mut events);
        }
        // Never completed, so there is nothing to strip
        if !self.pending_sequence.is_empty() {
            events.push(MonitorEvent::Output(std::mem::take(&mut self.pending_sequence)));
        }
        events
    }

    fn push_output(&mut self, text: &str, events: &mut Vec<MonitorEvent>) {
        let text = if self.filter {
            let mut text = std::mem::take(&mut self.pending_sequence) + text;
            if let Some(start) = incomplete_sequence_start(&text) {
                if text.len() - start <= MAX_PENDING_SEQUENCE {
                    self.pending_sequence = text.split_off(start);
                }
            }
            if has_control_sequences(&text) {
                strip_control_sequences(&text)
            } else {
                text
            }
        } else {
            text.to_string()
        };

        if !text.is_empty() {
            events.push(MonitorEvent::Output(text));
        }
    }
}

/// Position of the first cursor hide/show sequence
fn find_marker(buffer: &str) -> Option<usize> {
    match (buffer.find(CURSOR_HIDE), buffer.find(CURSOR_SHOW)) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Reduce the raw title sequence to its text
pub fn extract_title(raw: &str) -> String {
    let title = strip_control_sequences(raw);
    let title = title.trim_end_matches(BEL);
    title.strip_prefix("0;").unwrap_or(title).to_string()
}

/// Incremental UTF-8 decoder that tolerates sequences split across reads
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much as possible, keeping an incomplete tail for later
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.pending.len());

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Flush a dangling partial sequence
    pub fn finish(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        out
    }
}

/// Reads an output stream and turns it into [`MonitorEvent`]s
pub struct OutputMonitor {
    splitter: TitleSplitter,
    decoder: Utf8Decoder,
    shutdown: Arc<AtomicBool>,
}

impl OutputMonitor {
    pub fn new(filter_control_sequences: bool) -> Self {
        Self {
            splitter: TitleSplitter::new(filter_control_sequences),
            decoder: Utf8Decoder::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_max_title_len(mut self, max_title_len: usize) -> Self {
        self.splitter = self.splitter.with_max_title_len(max_title_len);
        self
    }

    /// Share a shutdown flag; once set, read errors count as a normal end
    /// and no further events are emitted.
    pub fn with_shutdown_flag(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Run the read loop until the stream closes.
    ///
    /// `emit` returns `false` to stop early (e.g. the receiver went away).
    pub fn run<R, F>(mut self, mut reader: R, mut emit: F)
    where
        R: Read,
        F: FnMut(MonitorEvent) -> bool,
    {
        let mut buffer = [0u8; READ_CHUNK_SIZE];

        loop {
            match reader.read(&mut buffer) {
                Ok(0) => {
                    debug!("Output stream closed");
                    break;
                }
                Ok(n) => {
                    let text = self.decoder.decode(&buffer[..n]);
                    if text.is_empty() {
                        continue;
                    }
                    for event in self.splitter.feed(&text) {
                        if self.is_shutdown() || !emit(event) {
                            return;
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    if self.is_shutdown() || is_closed_handle(&e) {
                        debug!("Output stream ended: {}", e);
                    } else {
                        warn!("Output read failed: {}", e);
                        if !emit(MonitorEvent::Error(Error::Io(e))) {
                            return;
                        }
                    }
                    break;
                }
            }
        }

        let tail = self.decoder.finish();
        let mut events = if tail.is_empty() {
            Vec::new()
        } else {
            self.splitter.feed(&tail)
        };
        events.extend(self.splitter.finish());
        events.push(MonitorEvent::Ended);

        for event in events {
            if self.is_shutdown() || !emit(event) {
                return;
            }
        }
    }

    /// Run the read loop on a background thread
    pub fn spawn<R>(self, reader: R) -> (Receiver<MonitorEvent>, JoinHandle<()>)
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            self.run(reader, |event| tx.send(event).is_ok());
        });
        (rx, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn outputs(events: &[MonitorEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                MonitorEvent::Output(s) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }

    fn titles(events: &[MonitorEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                MonitorEvent::Title(s) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Reader that hands out one predefined chunk per call
    struct ChunkedReader {
        chunks: Vec<Vec<u8>>,
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.chunks.is_empty() {
                return Ok(0);
            }
            let chunk = self.chunks.remove(0);
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    /// Reader that yields some data, then fails
    struct FailingReader {
        data: Option<Vec<u8>>,
        error: Option<io::Error>,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if let Some(data) = self.data.take() {
                buf[..data.len()].copy_from_slice(&data);
                return Ok(data.len());
            }
            Err(self.error.take().unwrap_or_else(|| io::Error::from(io::ErrorKind::Other)))
        }
    }

    fn collect<R: Read>(monitor: OutputMonitor, reader: R) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        monitor.run(reader, |e| {
            events.push(e);
            true
        });
        events
    }

    #[test]
    fn test_title_then_output() {
        let mut splitter = TitleSplitter::new(false);
        let events = splitter.feed("\x1b]0;MyTitle\x07\x1b[?25lHello");

        assert_eq!(titles(&events), vec!["MyTitle"]);
        assert_eq!(outputs(&events), vec!["\x1b[?25lHello"]);
        assert!(matches!(events[0], MonitorEvent::Title(_)));
        assert_eq!(splitter.state(), MonitorState::Passthrough);
    }

    #[test]
    fn test_cursor_show_marker_kept() {
        let mut splitter = TitleSplitter::new(false);
        let events = splitter.feed("\x1b]0;cmd\x07\x1b[?25hC:\\>");

        assert_eq!(titles(&events), vec!["cmd"]);
        assert_eq!(outputs(&events), vec!["\x1b[?25hC:\\>"]);
    }

    #[test]
    fn test_earliest_marker_wins() {
        let mut splitter = TitleSplitter::new(false);
        let events = splitter.feed("\x1b]0;T\x07\x1b[?25habc\x1b[?25l");

        assert_eq!(titles(&events), vec!["T"]);
        assert_eq!(outputs(&events), vec!["\x1b[?25habc\x1b[?25l"]);
    }

    #[test]
    fn test_title_qualifier_stripped_once() {
        let mut splitter = TitleSplitter::new(false);
        let events = splitter.feed("\x1b]0;0;MyTitle\x07\x1b[?25l");
        assert_eq!(titles(&events), vec!["0;MyTitle"]);

        let mut splitter = TitleSplitter::new(false);
        let events = splitter.feed("\x1b]MyTitle\x07\x07\x1b[?25l");
        assert_eq!(titles(&events), vec!["MyTitle"]);
    }

    #[test]
    fn test_title_split_across_chunks() {
        let mut splitter = TitleSplitter::new(false);

        assert!(splitter.feed("\x1b]0;Steam").is_empty());
        assert!(splitter.feed("CMD\x07\x1b[?2").is_empty());
        let events = splitter.feed("5lLoading...");

        assert_eq!(titles(&events), vec!["SteamCMD"]);
        assert_eq!(outputs(&events), vec!["\x1b[?25lLoading..."]);
    }

    #[test]
    fn test_title_emitted_once() {
        let mut splitter = TitleSplitter::new(false);
        splitter.feed("\x1b]0;First\x07\x1b[?25l");
        let events = splitter.feed("\x1b]0;Second\x07\x1b[?25lmore");

        assert!(titles(&events).is_empty());
        assert_eq!(outputs(&events), vec!["\x1b]0;Second\x07\x1b[?25lmore"]);
    }

    #[test]
    fn test_filter_passthrough() {
        let mut splitter = TitleSplitter::new(true);
        splitter.feed("\x1b]0;MyTitle\x07\x1b[?25l");
        let events = splitter.feed("\x1b[31mRED\x1b[0m");

        assert_eq!(outputs(&events), vec!["RED"]);
    }

    #[test]
    fn test_filter_first_output() {
        let mut splitter = TitleSplitter::new(true);
        let events = splitter.feed("\x1b]0;MyTitle\x07\x1b[?25lHello");

        assert_eq!(titles(&events), vec!["MyTitle"]);
        assert_eq!(outputs(&events), vec!["Hello"]);
    }

    #[test]
    fn test_marker_only_emits_no_empty_output_when_filtered() {
        let mut splitter = TitleSplitter::new(true);
        let events = splitter.feed("\x1b]0;T\x07\x1b[?25l");

        assert_eq!(titles(&events), vec!["T"]);
        assert!(outputs(&events).is_empty());
    }

    #[test]
    fn test_title_overflow() {
        let mut splitter = TitleSplitter::new(false).with_max_title_len(8);

        assert!(splitter.feed("abcd").is_empty());
        let events = splitter.feed("efghij");

        assert!(matches!(events[0], MonitorEvent::Error(Error::TitleParse { limit: 8 })));
        assert_eq!(outputs(&events), vec!["abcdefghij"]);
        assert_eq!(splitter.state(), MonitorState::Passthrough);

        // Passthrough from here on, no second error
        let events = splitter.feed("\x1b[?25lk");
        assert_eq!(events.len(), 1);
        assert_eq!(outputs(&events), vec!["\x1b[?25lk"]);
    }

    #[test]
    fn test_filter_sequence_split_across_chunks() {
        let mut splitter = TitleSplitter::new(true);
        splitter.feed("\x1b]0;T\x07\x1b[?25l");

        assert_eq!(outputs(&splitter.feed("abc\x1b[3")), vec!["abc"]);
        assert_eq!(outputs(&splitter.feed("1mRED\x1b")), vec!["RED"]);
        assert_eq!(outputs(&splitter.feed("[0mdone")), vec!["done"]);
        assert!(splitter.finish().is_empty());
    }

    #[test]
    fn test_unfinished_sequence_flushed_at_end() {
        let mut splitter = TitleSplitter::new(true);
        splitter.feed("\x1b]0;T\x07\x1b[?25lbye\x1b[");

        assert_eq!(outputs(&splitter.finish()), vec!["\x1b["]);
    }

    #[test]
    fn test_unfiltered_split_sequence_passed_as_is() {
        let mut splitter = TitleSplitter::new(false);
        splitter.feed("\x1b]0;T\x07\x1b[?25l");

        assert_eq!(outputs(&splitter.feed("abc\x1b[3")), vec!["abc\x1b[3"]);
        assert!(splitter.finish().is_empty());
    }

    #[test]
    fn test_finish_flushes_pending() {
        let mut splitter = TitleSplitter::new(false);
        splitter.feed("no marker here");
        let events = splitter.finish();

        assert_eq!(outputs(&events), vec!["no marker here"]);
        assert!(splitter.finish().is_empty());
    }

    #[test]
    fn test_utf8_split_sequence() {
        let mut decoder = Utf8Decoder::new();
        let bytes = "é✓".as_bytes();

        assert_eq!(decoder.decode(&bytes[..1]), "");
        assert_eq!(decoder.decode(&bytes[1..3]), "é");
        assert_eq!(decoder.decode(&bytes[3..]), "✓");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_utf8_invalid_bytes() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{FFFD}b");

        assert_eq!(decoder.decode(b"c\xe2\x9c"), "c");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }

    #[test]
    fn test_run_event_order() {
        let reader = ChunkedReader {
            chunks: vec![
                b"\x1b]0;MyTitle\x07".to_vec(),
                b"\x1b[?25lHello".to_vec(),
                b" world".to_vec(),
            ],
        };
        let events = collect(OutputMonitor::new(false), reader);

        assert!(matches!(&events[0], MonitorEvent::Title(t) if t == "MyTitle"));
        assert!(matches!(&events[1], MonitorEvent::Output(o) if o == "\x1b[?25lHello"));
        assert!(matches!(&events[2], MonitorEvent::Output(o) if o == " world"));
        assert!(matches!(events[3], MonitorEvent::Ended));
        assert_eq!(events.len(), 4);
    }

    #[test]
    fn test_run_large_stream() {
        let mut data = b"\x1b]0;T\x07\x1b[?25l".to_vec();
        data.extend(std::iter::repeat(b'x').take(5000));
        let events = collect(OutputMonitor::new(false), Cursor::new(data));

        let total: usize = outputs(&events).iter().map(|s| s.len()).sum();
        assert_eq!(total, "\x1b[?25l".len() + 5000);
        assert!(matches!(events.last(), Some(MonitorEvent::Ended)));
    }

    #[test]
    fn test_run_filters_sequence_on_read_boundary() {
        let prefix = "\x1b]0;T\x07\x1b[?25l";
        let mut data = prefix.as_bytes().to_vec();
        // SGR starts two bytes before the end of the first read
        let padding = READ_CHUNK_SIZE - 2 - prefix.len();
        data.extend(std::iter::repeat(b'x').take(padding));
        data.extend_from_slice(b"\x1b[31mRED\x1b[0m");

        let events = collect(OutputMonitor::new(true), Cursor::new(data));
        let text: String = outputs(&events).concat();

        assert_eq!(text, format!("{}RED", "x".repeat(padding)));
        assert!(matches!(events.last(), Some(MonitorEvent::Ended)));
    }

    #[test]
    fn test_run_closed_handle_is_normal_end() {
        let reader = FailingReader {
            data: Some(b"\x1b]0;T\x07\x1b[?25lx".to_vec()),
            error: Some(io::Error::from(io::ErrorKind::BrokenPipe)),
        };
        let events = collect(OutputMonitor::new(false), reader);

        assert!(!events.iter().any(|e| matches!(e, MonitorEvent::Error(_))));
        assert!(matches!(events.last(), Some(MonitorEvent::Ended)));
    }

    #[test]
    fn test_run_io_error_surfaced_once() {
        let reader = FailingReader {
            data: None,
            error: Some(io::Error::from(io::ErrorKind::PermissionDenied)),
        };
        let events = collect(OutputMonitor::new(false), reader);

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], MonitorEvent::Error(Error::Io(_))));
        assert!(matches!(events[1], MonitorEvent::Ended));
    }

    #[test]
    fn test_run_after_shutdown_is_silent() {
        let monitor = OutputMonitor::new(false);
        monitor.shutdown_flag().store(true, Ordering::SeqCst);

        let reader = FailingReader {
            data: Some(b"late output".to_vec()),
            error: Some(io::Error::from(io::ErrorKind::PermissionDenied)),
        };
        let events = collect(monitor, reader);

        assert!(events.is_empty());
    }

    #[test]
    fn test_spawn_channel() {
        let data = b"\x1b]0;Spawned\x07\x1b[?25hready".to_vec();
        let (rx, handle) = OutputMonitor::new(false).spawn(Cursor::new(data));
        let events: Vec<MonitorEvent> = rx.iter().collect();
        handle.join().unwrap();

        assert_eq!(titles(&events), vec!["Spawned"]);
        assert_eq!(outputs(&events), vec!["\x1b[?25hready"]);
        assert!(matches!(events.last(), Some(MonitorEvent::Ended)));
    }
}
