//! Raw-mode input assembly state machine (SPEC_FULL §4.4).
//!
//! Grounded on `parser/read_buffer.rs`'s double-buffered reader: bytes accumulate across
//! calls until a line boundary completes, and a partial escape sequence is held in exactly
//! the same "not enough bytes yet, wait for the next feed" shape as that reader holds a
//! partial wire record.

use std::collections::VecDeque;

const MAX_HISTORY: usize = 200;

/// What a completed byte produced, beyond the echo bytes returned alongside it.
#[derive(Debug, PartialEq, Eq)]
pub enum LineEvent {
    /// `\r` or `\n` completed a line.
    Ready(String),
    /// Ctrl-C discarded the in-progress buffer.
    CtrlC,
    /// Ctrl-D on an empty buffer: the session should end.
    EndOfSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EscapeState {
    None,
    SawEsc,
    SawBracket,
}

/// Converts a raw input byte stream from an SSH channel into line-ready events, producing
/// the bytes a real terminal would echo back along the way. One instance per session.
pub struct LineDiscipline {
    buffer: String,
    escape: EscapeState,
    history: VecDeque<String>,
    /// Index into `history` the last `ESC [ A`/`ESC [ B` landed on; `None` means the user
    /// hasn't started recalling history since the last line.
    history_cursor: Option<usize>,
}

impl LineDiscipline {
    pub fn new() -> LineDiscipline {
        LineDiscipline {
            buffer: String::new(),
            escape: EscapeState::None,
            history: VecDeque::new(),
            history_cursor: None,
        }
    }

    /// Feeds one input byte, returning the bytes to echo and, if the byte completed
    /// something, the resulting event.
    pub fn feed(&mut self, byte: u8) -> (Vec<u8>, Option<LineEvent>) {
        match self.escape {
            EscapeState::SawEsc => {
                self.escape = if byte == b'[' { EscapeState::SawBracket } else { EscapeState::None };
                return (Vec::new(), None);
            }
            EscapeState::SawBracket => {
                self.escape = EscapeState::None;
                return match byte {
                    b'A' => (self.recall(-1), None),
                    b'B' => (self.recall(1), None),
                    _ => (Vec::new(), None),
                };
            }
            EscapeState::None => {}
        }

        match byte {
            b'\r' | b'\n' => {
                let line = std::mem::take(&mut self.buffer);
                self.history_cursor = None;
                if !line.is_empty() {
                    self.push_history(line.clone());
                }
                (b"\r\n".to_vec(), Some(LineEvent::Ready(line)))
            }
            0x03 => {
                self.buffer.clear();
                self.history_cursor = None;
                (b"^C\r\n".to_vec(), Some(LineEvent::CtrlC))
            }
            0x04 if self.buffer.is_empty() => (Vec::new(), Some(LineEvent::EndOfSession)),
            0x04 => (Vec::new(), None),
            0x7f => {
                if self.buffer.pop().is_some() {
                    (b"\x08 \x08".to_vec(), None)
                } else {
                    (Vec::new(), None)
                }
            }
            0x1b => {
                self.escape = EscapeState::SawEsc;
                (Vec::new(), None)
            }
            b'\t' => (Vec::new(), None),
            visible if visible >= 0x20 => {
                self.buffer.push(visible as char);
                (vec![visible], None)
            }
            _ => (Vec::new(), None),
        }
    }

    fn push_history(&mut self, line: String) {
        self.history.push_back(line);
        if self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }
    }

    /// Recalls history relative to the current cursor (`-1` previous, `1` next), returning
    /// the bytes that erase the on-screen buffer and redraw the recalled line in its place.
    fn recall(&mut self, direction: i32) -> Vec<u8> {
        if self.history.is_empty() {
            return Vec::new();
        }
        let len = self.history.len();
        let next_index = match (self.history_cursor, direction) {
            (None, -1) => len - 1,
            (None, 1) => return Vec::new(),
            (Some(i), -1) => i.saturating_sub(1),
            (Some(i), 1) if i + 1 < len => i + 1,
            (Some(_), 1) => return Vec::new(),
            _ => return Vec::new(),
        };
        self.history_cursor = Some(next_index);
        let recalled = self.history[next_index].clone();
        let mut out = "\x08 \x08".repeat(self.buffer.len()).into_bytes();
        out.extend_from_slice(recalled.as_bytes());
        self.buffer = recalled;
        out
    }
}

impl Default for LineDiscipline {
    fn default() -> LineDiscipline {
        LineDiscipline::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_str(disc: &mut LineDiscipline, s: &str) -> Option<LineEvent> {
        let mut last = None;
        for b in s.bytes() {
            let (_, event) = disc.feed(b);
            if event.is_some() {
                last = event;
            }
        }
        last
    }

    #[test]
    fn visible_bytes_accumulate_and_echo() {
        let mut disc = LineDiscipline::new();
        let (echo, event) = disc.feed(b'a');
        assert_eq!(echo, vec![b'a']);
        assert!(event.is_none());
    }

    #[test]
    fn cr_completes_a_line() {
        let mut disc = LineDiscipline::new();
        let event = feed_str(&mut disc, "ls\r");
        assert_eq!(event, Some(LineEvent::Ready("ls".to_string())));
    }

    #[test]
    fn ctrl_c_discards_the_buffer() {
        let mut disc = LineDiscipline::new();
        feed_str(&mut disc, "abc");
        let (echo, event) = disc.feed(0x03);
        assert_eq!(echo, b"^C\r\n".to_vec());
        assert_eq!(event, Some(LineEvent::CtrlC));
        let event = feed_str(&mut disc, "\r");
        assert_eq!(event, Some(LineEvent::Ready(String::new())));
    }

    #[test]
    fn ctrl_d_on_empty_buffer_ends_the_session() {
        let mut disc = LineDiscipline::new();
        let (_, event) = disc.feed(0x04);
        assert_eq!(event, Some(LineEvent::EndOfSession));
    }

    #[test]
    fn ctrl_d_mid_line_is_a_no_op() {
        let mut disc = LineDiscipline::new();
        feed_str(&mut disc, "ab");
        let (_, event) = disc.feed(0x04);
        assert!(event.is_none());
    }

    #[test]
    fn del_erases_one_byte_left() {
        let mut disc = LineDiscipline::new();
        feed_str(&mut disc, "ab");
        let (echo, _) = disc.feed(0x7f);
        assert_eq!(echo, b"\x08 \x08".to_vec());
        let event = feed_str(&mut disc, "\r");
        assert_eq!(event, Some(LineEvent::Ready("a".to_string())));
    }

    #[test]
    fn arrow_up_recalls_previous_history_entry() {
        let mut disc = LineDiscipline::new();
        feed_str(&mut disc, "ls -la\r");
        feed_str(&mut disc, "pwd\r");
        disc.feed(0x1b);
        disc.feed(b'[');
        let (echo, event) = disc.feed(b'A');
        assert!(event.is_none());
        assert!(echo.ends_with(b"pwd"));
        let ready = feed_str(&mut disc, "\r");
        assert_eq!(ready, Some(LineEvent::Ready("pwd".to_string())));
    }

    #[test]
    fn tab_is_a_no_op() {
        let mut disc = LineDiscipline::new();
        let (echo, event) = disc.feed(b'\t');
        assert!(echo.is_empty());
        assert!(event.is_none());
    }
}
