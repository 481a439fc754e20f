//! ANSI control sequence stripping.

use once_cell::sync::Lazy;
use regex::Regex;

/// ESC followed by a single-byte command (`@`-`Z`, `\`-`_`), or a CSI
/// sequence: `ESC [`, parameter bytes, intermediate bytes, final byte.
static CONTROL_SEQUENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("control sequence pattern")
});

/// Remove every control sequence from `text`
pub fn strip_control_sequences(text: &str) -> String {
    CONTROL_SEQUENCE.replace_all(text, "").into_owned()
}

/// Check whether `text` contains at least one control sequence
pub fn has_control_sequences(text: &str) -> bool {
    CONTROL_SEQUENCE.is_match(text)
}

/// Byte offset of an unfinished control sequence at the end of `text`.
///
/// A lone trailing `ESC`, or `ESC [` followed only by parameter and
/// intermediate bytes, may still be completed by the next chunk.
pub fn incomplete_sequence_start(text: &str) -> Option<usize> {
    let start = text.rfind('\x1b')?;
    match text.as_bytes()[start + 1..].split_first() {
        None => Some(start),
        Some((b'[', rest)) => {
            let params = rest.iter().take_while(|b| (0x30..=0x3F).contains(*b)).count();
            let intermediates = rest[params..]
                .iter()
                .take_while(|b| (0x20..=0x2F).contains(*b))
                .count();
            (params + intermediates == rest.len()).then_some(start)
        }
        Some(_) => None,
    }
}
