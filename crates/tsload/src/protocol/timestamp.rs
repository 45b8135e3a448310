// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Timestamp scanner.

use crate::error::ParseErrorKind;
use crate::lexer::skip_whitespace;

/// Scan the nanosecond timestamp that follows the field section.
///
/// An optional leading `-` is followed by ASCII digits up to the end of the
/// record or a space. Only whitespace may follow.
pub(crate) fn scan_time(buf: &[u8], i: usize) -> Result<i64, ParseErrorKind> {
    let start = skip_whitespace(buf, i);
    let mut i = start;

    while i < buf.len() {
        let b = buf[i];
        if b == b'\n' || b == b' ' {
            break;
        }
        if i == start && b == b'-' {
            i += 1;
            continue;
        }
        if !b.is_ascii_digit() {
            return Err(ParseErrorKind::BadTimestamp);
        }
        i += 1;
    }

    let literal = &buf[start..i];
    if literal.is_empty() {
        return Err(ParseErrorKind::MissingTimestamp);
    }

    let rest = &buf[i..];
    if !rest.iter().all(|b| matches!(b, b' ' | b'\t' | b'\n' | 0)) {
        return Err(ParseErrorKind::BadTimestamp);
    }

    std::str::from_utf8(literal)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(ParseErrorKind::BadTimestamp)
}
