//! Key mapping for console input
//!
//! Turns host key events into the bytes a Windows console application expects
//! on its input pipe.

use bitflags::bitflags;
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

bitflags! {
    /// Modifier keys
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
    }
}

impl From<KeyModifiers> for Modifiers {
    fn from(mods: KeyModifiers) -> Self {
        let mut result = Modifiers::empty();
        if mods.contains(KeyModifiers::SHIFT) {
            result |= Modifiers::SHIFT;
        }
        if mods.contains(KeyModifiers::CONTROL) {
            result |= Modifiers::CTRL;
        }
        if mods.contains(KeyModifiers::ALT) {
            result |= Modifiers::ALT;
        }
        result
    }
}

/// ETX, sent for Ctrl+C instead of interrupting the relay
pub const CTRL_C: u8 = 0x03;
const ESC: u8 = 0x1B;
const DEL: u8 = 0x7F;

/// Key mapper for converting key events to console input bytes
pub struct KeyMapper;

impl KeyMapper {
    /// Map a key event; releases and unmapped keys yield `None`
    pub fn map(event: &KeyEvent) -> Option<Vec<u8>> {
        if event.kind == KeyEventKind::Release {
            return None;
        }
        let mods = Modifiers::from(event.modifiers);

        match event.code {
            KeyCode::Char(ch) => Some(Self::map_char(ch, mods)),
            KeyCode::Enter => Some(vec![b'\r']),
            // Consoles treat DEL as backspace
            KeyCode::Backspace if mods.contains(Modifiers::ALT) => Some(vec![ESC, DEL]),
            KeyCode::Backspace => Some(vec![DEL]),
            KeyCode::Tab if mods.contains(Modifiers::SHIFT) => Some(b"\x1b[Z".to_vec()),
            KeyCode::Tab => Some(vec![b'\t']),
            KeyCode::BackTab => Some(b"\x1b[Z".to_vec()),
            KeyCode::Esc => Some(vec![ESC]),

            KeyCode::Up => Some(Self::csi_key(b'A', mods)),
            KeyCode::Down => Some(Self::csi_key(b'B', mods)),
            KeyCode::Right => Some(Self::csi_key(b'C', mods)),
            KeyCode::Left => Some(Self::csi_key(b'D', mods)),
            KeyCode::Home => Some(Self::csi_key(b'H', mods)),
            KeyCode::End => Some(Self::csi_key(b'F', mods)),

            KeyCode::Insert => Some(Self::tilde_key(2, mods)),
            KeyCode::Delete => Some(Self::tilde_key(3, mods)),
            KeyCode::PageUp => Some(Self::tilde_key(5, mods)),
            KeyCode::PageDown => Some(Self::tilde_key(6, mods)),

            KeyCode::F(n) => Self::function_key(n, mods),

            _ => None,
        }
    }

    /// Map pasted text; line endings become carriage returns
    pub fn map_paste(text: &str) -> Vec<u8> {
        text.replace("\r\n", "\r").replace('\n', "\r").into_bytes()
    }

    fn map_char(ch: char, mods: Modifiers) -> Vec<u8> {
        let ctrl = mods.contains(Modifiers::CTRL);
        let alt = mods.contains(Modifiers::ALT);

        if ctrl {
            if let Some(code) = Self::control_code(ch) {
                return if alt { vec![ESC, code] } else { vec![code] };
            }
        }

        let mut bytes = Vec::with_capacity(5);
        if alt && !ctrl {
            bytes.push(ESC);
        }
        let mut utf8 = [0u8; 4];
        bytes.extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes());
        bytes
    }

    /// C0 control code for Ctrl+`ch`
    fn control_code(ch: char) -> Option<u8> {
        match ch {
            'a'..='z' => Some(ch as u8 - b'a' + 1),
            'A'..='Z' => Some(ch as u8 - b'A' + 1),
            '@' | '`' | ' ' | '2' => Some(0x00),
            '[' | '3' => Some(ESC),
            '\\' | '4' => Some(0x1C),
            ']' | '5' => Some(0x1D),
            '^' | '~' | '6' => Some(0x1E),
            '_' | '?' | '7' => Some(0x1F),
            _ => None,
        }
    }

    /// `ESC [ key`, or `ESC [ 1 ; mod key` with modifiers
    fn csi_key(key: u8, mods: Modifiers) -> Vec<u8> {
        if mods.is_empty() {
            vec![ESC, b'[', key]
        } else {
            format!("\x1b[1;{}{}", Self::modifier_code(mods), key as char).into_bytes()
        }
    }

    /// `ESC [ code ~`, or `ESC [ code ; mod ~` with modifiers
    fn tilde_key(code: u8, mods: Modifiers) -> Vec<u8> {
        if mods.is_empty() {
            format!("\x1b[{}~", code).into_bytes()
        } else {
            format!("\x1b[{};{}~", code, Self::modifier_code(mods)).into_bytes()
        }
    }

    fn function_key(n: u8, mods: Modifiers) -> Option<Vec<u8>> {
        // F1-F4 use SS3 unmodified
        let ss3 = match n {
            1 => Some(b'P'),
            2 => Some(b'Q'),
            3 => Some(b'R'),
            4 => Some(b'S'),
            _ => None,
        };
        if let Some(key) = ss3 {
            return Some(if mods.is_empty() {
                vec![ESC, b'O', key]
            } else {
                Self::csi_key(key, mods)
            });
        }

        let code = match n {
            5 => 15,
            6 => 17,
            7 => 18,
            8 => 19,
            9 => 20,
            10 => 21,
            11 => 23,
            12 => 24,
            _ => return None,
        };
        Some(Self::tilde_key(code, mods))
    }

    /// xterm modifier parameter
    fn modifier_code(mods: Modifiers) -> u8 {
        1 + if mods.contains(Modifiers::SHIFT) { 1 } else { 0 }
            + if mods.contains(Modifiers::ALT) { 2 } else { 0 }
            + if mods.contains(Modifiers::CTRL) { 4 } else { 0 }
    }
}
