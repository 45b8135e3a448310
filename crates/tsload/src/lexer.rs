// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Record splitter.
//!
//! Splits a byte buffer into line protocol records. A record ends at the
//! first `\n` that is neither escaped nor inside a quoted string field value.
//! Blank records and `#` comments are skipped. The lexer never fails: a
//! malformed record is still yielded and rejected later by the scanners.

/// One record, borrowed from the input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawLine<'a> {
    /// 1-based line number where the record starts.
    pub line: usize,
    /// Record bytes, leading whitespace and terminator stripped.
    pub bytes: &'a [u8],
}

/// Iterator over the records of a buffer.
///
/// Used as a plain [`Iterator`] the final unterminated record is yielded
/// too. Streaming callers use [`LineLexer::next_terminated`] instead and
/// carry the bytes after [`LineLexer::consumed`] into the next chunk.
#[derive(Debug, Clone)]
pub struct LineLexer<'a> {
    buf: &'a [u8],
    pos: usize,
    line: usize,
}

struct Span {
    end: usize,
    next: usize,
    terminated: bool,
    newlines: usize,
}

impl<'a> LineLexer<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self::starting_at(buf, 1)
    }

    /// Lex `buf` whose first byte sits on line `line`.
    pub fn starting_at(buf: &'a [u8], line: usize) -> Self {
        Self { buf, pos: 0, line }
    }

    /// Bytes fully consumed so far.
    pub fn consumed(&self) -> usize {
        self.pos
    }

    /// Line number of the next unconsumed byte.
    pub fn line(&self) -> usize {
        self.line
    }

    /// Next record that is known to be complete.
    ///
    /// Returns `None` at an unterminated tail, leaving it unconsumed.
    pub fn next_terminated(&mut self) -> Option<RawLine<'a>> {
        self.advance(false)
    }

    fn advance(&mut self, allow_tail: bool) -> Option<RawLine<'a>> {
        while self.pos < self.buf.len() {
            let start = self.pos;
            let span = scan_record(self.buf, start);
            if !span.terminated && !allow_tail {
                return None;
            }
            // "\\\n" at the very end may still become an escape once more
            // input arrives.
            if !allow_tail
                && span.next == self.buf.len()
                && span.end > start
                && self.buf[span.end - 1] == b'\\'
            {
                return None;
            }

            let line = self.line;
            self.pos = span.next;
            self.line += span.newlines + usize::from(span.terminated);

            let record = &self.buf[start..span.end];
            let first = skip_whitespace(record, 0);
            if first >= record.len() || record[first] == b'#' {
                continue;
            }
            return Some(RawLine {
                line,
                bytes: &record[first..],
            });
        }
        None
    }
}

impl<'a> Iterator for LineLexer<'a> {
    type Item = RawLine<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.advance(true)
    }
}

/// Index of the first byte at or after `i` that is not space, tab or NUL.
pub(crate) fn skip_whitespace(buf: &[u8], mut i: usize) -> usize {
    while i < buf.len() {
        if buf[i] != b' ' && buf[i] != b'\t' && buf[i] != 0 {
            break;
        }
        i += 1;
    }
    i
}

fn scan_record(buf: &[u8], start: usize) -> Span {
    let mut i = start;
    let mut fields = false;
    let mut quoted = false;
    let mut equals = 0usize;
    let mut commas = 0usize;
    let mut newlines = 0usize;

    while i < buf.len() {
        let b = buf[i];

        if b == b'\\' && i + 2 < buf.len() {
            if buf[i + 1] == b'\n' {
                newlines += 1;
            }
            i += 2;
            continue;
        }

        if b == b' ' {
            fields = true;
        }

        if fields {
            if !quoted && b == b'=' {
                equals += 1;
                i += 1;
                continue;
            }
            if !quoted && b == b',' {
                commas += 1;
                i += 1;
                continue;
            }
            if b == b'"' && equals > commas {
                quoted = !quoted;
                i += 1;
                continue;
            }
        }

        if b == b'\n' {
            if !quoted {
                return Span {
                    end: i,
                    next: i + 1,
                    terminated: true,
                    newlines,
                };
            }
            newlines += 1;
        }
        i += 1;
    }

    Span {
        end: buf.len(),
        next: buf.len(),
        terminated: false,
        newlines,
    }
}
