// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Key scanner: `measurement[,tag=value...]`.
//!
//! Tags are usually emitted already sorted, so ordering is checked with one
//! linear pass over adjacent pairs. Only an out-of-order set pays for an
//! insertion sort and a second duplicate pass.

use std::borrow::Cow;
use std::cmp::Ordering;

use super::point::{Key, Tag};
use super::text::{unescape, MEASUREMENT_SPECIALS, TAG_SPECIALS};
use crate::error::ParseErrorKind;
use crate::lexer::skip_whitespace;

/// Longest accepted series key, in bytes.
pub const MAX_KEY_LEN: usize = 65535;

const RESERVED_TAG_KEYS: [&[u8]; 5] = [b"\xff", b"\x00", b"_field", b"_measurement", b"time"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    Tags,
    Fields,
}

struct TagSpan<'a> {
    /// Raw `key=value` segment.
    raw: &'a [u8],
    key: Cow<'a, [u8]>,
    value: Cow<'a, [u8]>,
}

/// Scanned key plus the offset where the field section begins.
pub(crate) struct ScannedKey {
    pub key: Key,
    pub end: usize,
}

pub(crate) fn check_reserved(key: &[u8]) -> Result<(), ParseErrorKind> {
    if RESERVED_TAG_KEYS.contains(&key) {
        return Err(ParseErrorKind::ReservedTagKey(
            String::from_utf8_lossy(key).into_owned(),
        ));
    }
    Ok(())
}

pub(crate) fn scan_key(buf: &[u8]) -> Result<ScannedKey, ParseErrorKind> {
    let start = skip_whitespace(buf, 0);

    let (mut next, mut i) = scan_measurement(buf, start)?;
    let measurement_end = if next == Next::Tags { i - 1 } else { i };
    let measurement = &buf[start..measurement_end];

    let mut tags: Vec<TagSpan<'_>> = Vec::new();
    while next == Next::Tags {
        let tag_start = i;
        let eq = scan_tag_key(buf, i)?;
        let (after, delim) = scan_tag_value(buf, eq + 1)?;
        tags.push(TagSpan {
            raw: &buf[tag_start..delim],
            key: unescape(&buf[tag_start..eq], TAG_SPECIALS),
            value: unescape(&buf[eq + 1..delim], TAG_SPECIALS),
        });
        next = after;
        i = if next == Next::Tags { delim + 1 } else { delim };
    }

    let key_len = i - start;
    if key_len > MAX_KEY_LEN {
        return Err(ParseErrorKind::KeyTooLong(key_len));
    }

    for tag in &tags {
        check_reserved(&tag.key)?;
    }

    let mut sorted = true;
    for pair in tags.windows(2) {
        match pair[0].key.cmp(&pair[1].key) {
            Ordering::Less => {}
            Ordering::Equal => return Err(ParseErrorKind::DuplicateTags),
            Ordering::Greater => {
                sorted = false;
                break;
            }
        }
    }

    let series_key = if sorted {
        buf[start..i].to_vec()
    } else {
        insertion_sort(&mut tags);
        if tags.windows(2).any(|w| w[0].key == w[1].key) {
            return Err(ParseErrorKind::DuplicateTags);
        }
        let mut series_key = Vec::with_capacity(key_len);
        series_key.extend_from_slice(measurement);
        for tag in &tags {
            series_key.push(b',');
            series_key.extend_from_slice(tag.raw);
        }
        series_key
    };

    let tags = tags
        .into_iter()
        .map(|t| Tag {
            key: t.key.into_owned(),
            value: t.value.into_owned(),
        })
        .collect();
    let measurement = unescape(measurement, MEASUREMENT_SPECIALS).into_owned();

    Ok(ScannedKey {
        key: Key::from_scanned(measurement, tags, series_key),
        end: i,
    })
}

fn insertion_sort(tags: &mut [TagSpan<'_>]) {
    for i in 1..tags.len() {
        let mut j = i;
        while j > 0 && tags[j - 1].key > tags[j].key {
            tags.swap(j - 1, j);
            j -= 1;
        }
    }
}

fn is_unescaped(buf: &[u8], i: usize, b: u8) -> bool {
    buf[i] == b && buf[i - 1] != b'\\'
}

/// Returns what follows the measurement and the index where it starts.
fn scan_measurement(buf: &[u8], mut i: usize) -> Result<(Next, usize), ParseErrorKind> {
    if i >= buf.len() || buf[i] == b',' {
        return Err(ParseErrorKind::MissingMeasurement);
    }

    loop {
        i += 1;
        if i >= buf.len() {
            return Err(ParseErrorKind::MissingFields);
        }
        if buf[i - 1] == b'\\' {
            continue;
        }
        if buf[i] == b',' {
            return Ok((Next::Tags, i + 1));
        }
        if buf[i] == b' ' {
            return Ok((Next::Fields, i));
        }
    }
}

/// Returns the index of the `=` ending the tag key.
fn scan_tag_key(buf: &[u8], mut i: usize) -> Result<usize, ParseErrorKind> {
    if i >= buf.len() || matches!(buf[i], b' ' | b',' | b'=') {
        return Err(ParseErrorKind::MissingTagKey);
    }

    loop {
        i += 1;
        if i >= buf.len() || is_unescaped(buf, i, b' ') || is_unescaped(buf, i, b',') {
            return Err(ParseErrorKind::MissingTagValue);
        }
        if is_unescaped(buf, i, b'=') {
            return Ok(i);
        }
    }
}

/// Returns what follows the tag value and the index of its delimiter.
fn scan_tag_value(buf: &[u8], mut i: usize) -> Result<(Next, usize), ParseErrorKind> {
    if i >= buf.len() || buf[i] == b',' || buf[i] == b' ' {
        return Err(ParseErrorKind::MissingTagValue);
    }

    loop {
        i += 1;
        if i >= buf.len() {
            return Err(ParseErrorKind::MissingFields);
        }
        if is_unescaped(buf, i, b'=') {
            return Err(ParseErrorKind::InvalidTagFormat);
        }
        if is_unescaped(buf, i, b',') {
            return Ok((Next::Tags, i));
        }
        if is_unescaped(buf, i, b' ') {
            return Ok((Next::Fields, i));
        }
    }
}
