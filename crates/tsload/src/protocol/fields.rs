// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Field scanner and type inference.
//!
//! The type of each value is decided by its literal:
//!
//! | Literal                         | Type     |
//! |---------------------------------|----------|
//! | `-12i`                          | integer  |
//! | `12u`                           | unsigned |
//! | `12`, `-1.5`, `.5`, `1e-3`      | float    |
//! | `t T true True TRUE` and false  | boolean  |
//! | `"text"`                        | string   |
//!
//! Short numeric literals cannot overflow their type, so range checks only
//! run once a literal reaches the digit-count thresholds below.

use super::point::{Field, FieldType, FieldValue};
use super::text::{unescape, STRING_SPECIALS, TAG_SPECIALS};
use crate::error::ParseErrorKind;
use crate::lexer::skip_whitespace;

const MAX_INT64_DIGITS: usize = 19;
const MAX_UINT64_DIGITS: usize = 20;
const MAX_FLOAT64_DIGITS: usize = 25;

fn is_numeric(b: u8) -> bool {
    b.is_ascii_digit() || b == b'.'
}

/// Scan the field section starting at `i`.
///
/// Returns the offset just past the section and the typed fields in scan
/// order.
pub(crate) fn scan_fields(buf: &[u8], i: usize) -> Result<(usize, Vec<Field>), ParseErrorKind> {
    let start = skip_whitespace(buf, i);
    let mut i = start;
    let mut quoted = false;
    let mut equals = 0usize;
    let mut commas = 0usize;
    let mut types = Vec::new();

    while i < buf.len() {
        if buf[i] == b'\\' && i + 1 < buf.len() {
            i += 2;
            continue;
        }

        if buf[i] == b'"' && equals > commas {
            quoted = !quoted;
            i += 1;
            continue;
        }

        if buf[i] == b'=' && !quoted {
            equals += 1;

            if i == start {
                return Err(ParseErrorKind::MissingFieldKey);
            }
            let prev = buf[i - 1];
            if (prev == b' ' || prev == b',') && !(i >= 2 && buf[i - 2] == b'\\') {
                return Err(ParseErrorKind::MissingFieldKey);
            }

            if i + 1 >= buf.len() {
                return Err(ParseErrorKind::MissingFieldValue);
            }
            let next = buf[i + 1];
            if next == b',' || next == b' ' {
                return Err(ParseErrorKind::MissingFieldValue);
            }

            if is_numeric(next) || matches!(next, b'-' | b'N' | b'n') {
                let (ty, end) = scan_number(buf, i + 1)?;
                types.push(ty);
                i = end;
                continue;
            }

            if next != b'"' {
                i = scan_boolean(buf, i + 1)?;
                types.push(FieldType::Boolean);
                continue;
            }

            types.push(FieldType::String);
        }

        if buf[i] == b',' && !quoted {
            commas += 1;
        }

        if buf[i] == b' ' && !quoted {
            break;
        }
        i += 1;
    }

    if quoted {
        return Err(ParseErrorKind::UnbalancedQuotes);
    }
    if equals == 0 {
        return Err(ParseErrorKind::MissingFields);
    }
    if commas != equals - 1 {
        return Err(ParseErrorKind::InvalidFieldFormat);
    }

    let fields = walk_fields(&buf[start..i], &types)?;
    Ok((i, fields))
}

/// Split a validated field section into typed fields.
fn walk_fields(section: &[u8], types: &[FieldType]) -> Result<Vec<Field>, ParseErrorKind> {
    let mut fields = Vec::with_capacity(types.len());
    let mut i = 0;
    for &ty in types {
        let key_end = scan_to(section, i, b'=');
        let value_start = key_end + 1;
        if value_start > section.len() {
            return Err(ParseErrorKind::InvalidFieldFormat);
        }
        let value_end = scan_field_value(section, value_start);
        let key = unescape(&section[i..key_end], TAG_SPECIALS).into_owned();
        let value = convert(ty, &section[value_start..value_end])?;
        fields.push(Field { key, value });
        i = value_end + 1;
    }
    Ok(fields)
}

/// Index of the first unescaped `stop` at or after `i`.
fn scan_to(buf: &[u8], mut i: usize, stop: u8) -> usize {
    while i < buf.len() {
        if buf[i] == stop && (i == 0 || buf[i - 1] != b'\\') {
            break;
        }
        i += 1;
    }
    i
}

/// End of a field value: the first `,` outside quotes.
fn scan_field_value(buf: &[u8], mut i: usize) -> usize {
    let mut quoted = false;
    while i < buf.len() {
        if buf[i] == b'\\' && i + 1 < buf.len() && matches!(buf[i + 1], b'"' | b'\\') {
            i += 2;
            continue;
        }
        if buf[i] == b'"' {
            quoted = !quoted;
        } else if buf[i] == b',' && !quoted {
            break;
        }
        i += 1;
    }
    i
}

/// Validate a numeric literal starting at `i` and infer its type.
fn scan_number(buf: &[u8], mut i: usize) -> Result<(FieldType, usize), ParseErrorKind> {
    let start = i;
    let mut is_int = false;
    let mut is_uint = false;

    if buf[i] == b'-' {
        i += 1;
        if i == buf.len() {
            return Err(ParseErrorKind::InvalidNumber);
        }
    }

    let mut decimal = false;
    let mut scientific = false;

    while i < buf.len() {
        let b = buf[i];
        if b == b',' || b == b' ' {
            break;
        }

        if b == b'i' && i > start && !(is_int || is_uint) {
            is_int = true;
            i += 1;
            continue;
        }
        if b == b'u' && i > start && !(is_int || is_uint) {
            is_uint = true;
            i += 1;
            continue;
        }

        if b == b'.' {
            if decimal {
                return Err(ParseErrorKind::InvalidNumber);
            }
            decimal = true;
        }

        if (b == b'e' || b == b'E') && i > start {
            scientific = true;
            i += 1;
            continue;
        }

        if (b == b'+' || b == b'-') && matches!(buf[i - 1], b'e' | b'E') {
            i += 1;
            continue;
        }

        if b == b'N' || b == b'n' {
            return Err(ParseErrorKind::NanUnsupported);
        }

        if !is_numeric(b) {
            return Err(ParseErrorKind::InvalidNumber);
        }
        i += 1;
    }

    if (is_int || is_uint) && (decimal || scientific) {
        return Err(ParseErrorKind::InvalidNumber);
    }

    let mut digits = i - start;
    if is_int || is_uint {
        digits -= 1;
    }
    if buf[start] == b'-' {
        digits -= 1;
    }
    if decimal {
        digits -= 1;
    }
    if digits == 0 {
        return Err(ParseErrorKind::InvalidNumber);
    }

    if is_int {
        if buf[i - 1] != b'i' {
            return Err(ParseErrorKind::InvalidNumber);
        }
        let literal = &buf[start..i - 1];
        // Literals shorter than 19 characters always fit in an i64.
        if literal.len() >= MAX_INT64_DIGITS {
            parse_int(literal)?;
        }
        return Ok((FieldType::Integer, i));
    }

    if is_uint {
        if buf[i - 1] != b'u' || buf[start] == b'-' {
            return Err(ParseErrorKind::InvalidNumber);
        }
        let literal = &buf[start..i - 1];
        if literal.len() >= MAX_UINT64_DIGITS {
            parse_uint(literal)?;
        }
        return Ok((FieldType::Unsigned, i));
    }

    let literal = &buf[start..i];
    // Plain decimals shorter than 25 characters always fit in an f64.
    if scientific || literal.len() >= MAX_FLOAT64_DIGITS {
        parse_float(literal)?;
    }
    Ok((FieldType::Float, i))
}

/// Accepts `t T true True TRUE f F false False FALSE`.
fn scan_boolean(buf: &[u8], i: usize) -> Result<usize, ParseErrorKind> {
    let end = buf[i..]
        .iter()
        .position(|&b| b == b',' || b == b' ')
        .map_or(buf.len(), |p| i + p);

    match &buf[i..end] {
        b"t" | b"T" | b"true" | b"True" | b"TRUE" | b"f" | b"F" | b"false" | b"False"
        | b"FALSE" => Ok(end),
        _ => Err(ParseErrorKind::InvalidBoolean),
    }
}

fn parse_int(literal: &[u8]) -> Result<i64, ParseErrorKind> {
    std::str::from_utf8(literal)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ParseErrorKind::integer_range(literal))
}

fn parse_uint(literal: &[u8]) -> Result<u64, ParseErrorKind> {
    std::str::from_utf8(literal)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ParseErrorKind::unsigned_range(literal))
}

fn parse_float(literal: &[u8]) -> Result<f64, ParseErrorKind> {
    std::str::from_utf8(literal)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .ok_or_else(|| ParseErrorKind::float_range(literal))
}

/// Turn a scanned value literal into its typed value.
fn convert(ty: FieldType, raw: &[u8]) -> Result<FieldValue, ParseErrorKind> {
    Ok(match ty {
        FieldType::Integer => FieldValue::Integer(parse_int(&raw[..raw.len() - 1])?),
        FieldType::Unsigned => FieldValue::Unsigned(parse_uint(&raw[..raw.len() - 1])?),
        FieldType::Float => FieldValue::Float(parse_float(raw)?),
        FieldType::Boolean => FieldValue::Boolean(matches!(raw.first(), Some(&(b't' | b'T')))),
        FieldType::String => {
            if raw.len() < 2 {
                return Err(ParseErrorKind::UnbalancedQuotes);
            }
            FieldValue::String(unescape(&raw[1..raw.len() - 1], STRING_SPECIALS).into_owned())
        }
    })
}
