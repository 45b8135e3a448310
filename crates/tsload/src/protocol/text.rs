// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Line protocol escaping.
//!
//! ```text
//! measurement   , and space
//! tag key/value , = and space
//! field key     , = and space
//! string value  " and \
//! ```

use std::borrow::Cow;

pub(crate) const MEASUREMENT_SPECIALS: &[u8] = b", ";
pub(crate) const TAG_SPECIALS: &[u8] = b",= ";
pub(crate) const STRING_SPECIALS: &[u8] = b"\"\\";

/// Drop the backslash in front of any byte of `specials`.
///
/// Backslashes in front of other bytes are kept. Borrows when there is
/// nothing to unescape.
pub(crate) fn unescape<'a>(raw: &'a [u8], specials: &[u8]) -> Cow<'a, [u8]> {
    if !raw.contains(&b'\\') {
        return Cow::Borrowed(raw);
    }
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\\' && i + 1 < raw.len() && specials.contains(&raw[i + 1]) {
            out.push(raw[i + 1]);
            i += 2;
            continue;
        }
        out.push(raw[i]);
        i += 1;
    }
    Cow::Owned(out)
}

/// Append `value` to `out`, backslash-escaping any byte of `specials`.
pub(crate) fn escape_into(out: &mut Vec<u8>, value: &[u8], specials: &[u8]) {
    for &b in value {
        if specials.contains(&b) {
            out.push(b'\\');
        }
        out.push(b);
    }
}
