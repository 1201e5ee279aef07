// src/channel/line_buffer.rs

use std::collections::VecDeque;

/// Accumulates raw bytes from a pipe and splits them into `'\n'`-terminated
/// lines.
///
/// `search_pos` remembers how far the buffer has already been scanned for a
/// terminator, so repeated probes while a long line trickles in stay O(new
/// bytes) instead of rescanning from the start.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buf: VecDeque<u8>,
    search_pos: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend(bytes.iter().copied());
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// True if a complete line is buffered. Advances the scan cursor as a
    /// side effect; a later `pop_line` or `has_line` resumes from there.
    pub fn has_line(&mut self) -> bool {
        match self.find_newline() {
            Some(pos) => {
                self.search_pos = pos;
                true
            }
            None => {
                self.search_pos = self.buf.len();
                false
            }
        }
    }

    /// Removes and returns the next complete line, terminator included.
    pub fn pop_line(&mut self) -> Option<String> {
        let pos = self.find_newline()?;
        let line: Vec<u8> = self.buf.drain(..=pos).collect();
        self.search_pos = 0;
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Removes and returns whatever is left, for the final unterminated line
    /// at end of stream.
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest: Vec<u8> = self.buf.drain(..).collect();
        self.search_pos = 0;
        Some(String::from_utf8_lossy(&rest).into_owned())
    }

    fn find_newline(&self) -> Option<usize> {
        (self.search_pos..self.buf.len()).find(|&i| self.buf[i] == b'\n')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_lines_with_terminator() {
        let mut lb = LineBuffer::new();
        lb.extend(b"one\ntwo\nthr");
        assert_eq!(lb.pop_line().as_deref(), Some("one\n"));
        assert_eq!(lb.pop_line().as_deref(), Some("two\n"));
        assert_eq!(lb.pop_line(), None);
        lb.extend(b"ee\n");
        assert_eq!(lb.pop_line().as_deref(), Some("three\n"));
        assert!(lb.is_empty());
    }

    #[test]
    fn has_line_resumes_scan_after_new_bytes() {
        let mut lb = LineBuffer::new();
        lb.extend(b"partial");
        assert!(!lb.has_line());
        lb.extend(b" still partial");
        assert!(!lb.has_line());
        lb.extend(b" done\n");
        assert!(lb.has_line());
        assert_eq!(lb.pop_line().as_deref(), Some("partial still partial done\n"));
    }

    #[test]
    fn remainder_returns_trailing_partial_once() {
        let mut lb = LineBuffer::new();
        lb.extend(b"a\nb");
        assert_eq!(lb.pop_line().as_deref(), Some("a\n"));
        assert_eq!(lb.take_remainder().as_deref(), Some("b"));
        assert_eq!(lb.take_remainder(), None);
    }

    #[test]
    fn empty_line_is_a_line() {
        let mut lb = LineBuffer::new();
        lb.extend(b"\n");
        assert!(lb.has_line());
        assert_eq!(lb.pop_line().as_deref(), Some("\n"));
    }
}
