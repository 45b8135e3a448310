// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed point model.
//!
//! ```text
//! measurement,tag1=val1,tag2=val2 field1=val1,field2=val2 timestamp_ns
//! ```

use std::fmt;

use super::key;
use super::text::{escape_into, MEASUREMENT_SPECIALS, STRING_SPECIALS, TAG_SPECIALS};
use crate::error::ParseErrorKind;

/// One `key=value` pair of the tag set, unescaped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Tag {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Series identity: measurement plus canonically ordered tags.
///
/// Tags are sorted ascending by key bytes, contain no duplicate and no
/// reserved key. `series_key` is the escaped text form of the whole key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    measurement: Vec<u8>,
    tags: Vec<Tag>,
    series_key: Vec<u8>,
}

impl Key {
    /// Build a key from unescaped parts, sorting and validating the tags.
    pub fn new(measurement: impl Into<Vec<u8>>, mut tags: Vec<Tag>) -> Result<Self, ParseErrorKind> {
        let measurement = measurement.into();
        if measurement.is_empty() {
            return Err(ParseErrorKind::MissingMeasurement);
        }
        for tag in &tags {
            if tag.key.is_empty() {
                return Err(ParseErrorKind::MissingTagKey);
            }
            if tag.value.is_empty() {
                return Err(ParseErrorKind::MissingTagValue);
            }
            key::check_reserved(&tag.key)?;
        }
        tags.sort_by(|a, b| a.key.cmp(&b.key));
        if tags.windows(2).any(|w| w[0].key == w[1].key) {
            return Err(ParseErrorKind::DuplicateTags);
        }

        let mut series_key = Vec::with_capacity(measurement.len() + tags.len() * 16);
        escape_into(&mut series_key, &measurement, MEASUREMENT_SPECIALS);
        for tag in &tags {
            series_key.push(b',');
            escape_into(&mut series_key, &tag.key, TAG_SPECIALS);
            series_key.push(b'=');
            escape_into(&mut series_key, &tag.value, TAG_SPECIALS);
        }
        if series_key.len() > key::MAX_KEY_LEN {
            return Err(ParseErrorKind::KeyTooLong(series_key.len()));
        }

        Ok(Self {
            measurement,
            tags,
            series_key,
        })
    }

    /// Assemble a key the scanner has already validated.
    pub(crate) fn from_scanned(measurement: Vec<u8>, tags: Vec<Tag>, series_key: Vec<u8>) -> Self {
        Self {
            measurement,
            tags,
            series_key,
        }
    }

    pub fn measurement(&self) -> &[u8] {
        &self.measurement
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Escaped canonical text, e.g. `cpu,host=a,region=b`.
    pub fn series_key(&self) -> &[u8] {
        &self.series_key
    }

    /// Value of the tag named `key`.
    pub fn tag(&self, key: &[u8]) -> Option<&[u8]> {
        self.tags
            .binary_search_by(|t| t.key.as_slice().cmp(key))
            .ok()
            .map(|i| self.tags[i].value.as_slice())
    }
}

/// Inferred field type. The discriminant is the binary type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    Integer = 1,
    Unsigned = 2,
    Float = 3,
    Boolean = 4,
    String = 5,
}

impl FieldType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Integer),
            2 => Some(Self::Unsigned),
            3 => Some(Self::Float),
            4 => Some(Self::Boolean),
            5 => Some(Self::String),
            _ => None,
        }
    }
}

/// A typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Boolean(bool),
    String(Vec<u8>),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            Self::Integer(_) => FieldType::Integer,
            Self::Unsigned(_) => FieldType::Unsigned,
            Self::Float(_) => FieldType::Float,
            Self::Boolean(_) => FieldType::Boolean,
            Self::String(_) => FieldType::String,
        }
    }

    /// Append the line protocol literal.
    ///
    /// - Integer: suffixed with `i` (e.g., `42i`)
    /// - Unsigned: suffixed with `u` (e.g., `42u`)
    /// - Float: shortest round-tripping form (e.g., `3.0`, `1e300`)
    /// - String: quoted, inner quotes and backslashes escaped
    /// - Boolean: `true` or `false`
    pub fn write_line_protocol(&self, out: &mut Vec<u8>) {
        match self {
            Self::Integer(v) => {
                out.extend_from_slice(v.to_string().as_bytes());
                out.push(b'i');
            }
            Self::Unsigned(v) => {
                out.extend_from_slice(v.to_string().as_bytes());
                out.push(b'u');
            }
            Self::Float(v) => out.extend_from_slice(format!("{v:?}").as_bytes()),
            Self::Boolean(v) => out.extend_from_slice(if *v { b"true" } else { b"false" }),
            Self::String(v) => {
                out.push(b'"');
                escape_into(out, v, STRING_SPECIALS);
                out.push(b'"');
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub key: Vec<u8>,
    pub value: FieldValue,
}

impl Field {
    pub fn new(key: impl Into<Vec<u8>>, value: FieldValue) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// A validated point: key, at least one field, nanosecond timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    key: Key,
    fields: Vec<Field>,
    timestamp: i64,
}

impl Point {
    /// Fails with `missing fields` when `fields` is empty.
    pub fn new(key: Key, fields: Vec<Field>, timestamp: i64) -> Result<Self, ParseErrorKind> {
        if fields.is_empty() {
            return Err(ParseErrorKind::MissingFields);
        }
        Ok(Self {
            key,
            fields,
            timestamp,
        })
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn measurement(&self) -> &[u8] {
        self.key.measurement()
    }

    pub fn tags(&self) -> &[Tag] {
        self.key.tags()
    }

    /// Fields in scan order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Append the canonical line protocol record, without terminator.
    pub fn write_line_protocol(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.key.series_key());
        out.push(b' ');
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                out.push(b',');
            }
            escape_into(out, &field.key, TAG_SPECIALS);
            out.push(b'=');
            field.value.write_line_protocol(out);
        }
        out.push(b' ');
        out.extend_from_slice(self.timestamp.to_string().as_bytes());
    }

    pub fn to_line_protocol(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.key.series_key().len() + 64);
        self.write_line_protocol(&mut out);
        out
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.to_line_protocol()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu_key() -> Key {
        Key::new("cpu", vec![Tag::new("region", "us-west"), Tag::new("host", "server01")])
            .expect("valid key")
    }

    #[test]
    fn test_key_sorts_tags() {
        let key = cpu_key();
        assert_eq!(key.tags()[0].key, b"host");
        assert_eq!(key.series_key(), b"cpu,host=server01,region=us-west");
    }

    #[test]
    fn test_key_lookup() {
        let key = cpu_key();
        assert_eq!(key.tag(b"region"), Some(&b"us-west"[..]));
        assert_eq!(key.tag(b"rack"), None);
    }

    #[test]
    fn test_key_rejects_duplicates() {
        let err = Key::new("cpu", vec![Tag::new("a", "1"), Tag::new("a", "2")]);
        assert_eq!(err, Err(ParseErrorKind::DuplicateTags));
    }

    #[test]
    fn test_key_rejects_reserved() {
        let err = Key::new("cpu", vec![Tag::new("_field", "x")]);
        assert!(matches!(err, Err(ParseErrorKind::ReservedTagKey(_))));
    }

    #[test]
    fn test_key_escapes_series() {
        let key = Key::new("cpu load", vec![Tag::new("host name", "a,b")]).expect("valid key");
        assert_eq!(key.series_key(), b"cpu\\ load,host\\ name=a\\,b");
    }

    #[test]
    fn test_point_requires_fields() {
        assert_eq!(Point::new(cpu_key(), vec![], 0), Err(ParseErrorKind::MissingFields));
    }

    #[test]
    fn test_field_value_literals() {
        let render = |v: FieldValue| {
            let mut out = Vec::new();
            v.write_line_protocol(&mut out);
            String::from_utf8(out).expect("utf8")
        };
        assert_eq!(render(FieldValue::Integer(-42)), "-42i");
        assert_eq!(render(FieldValue::Unsigned(42)), "42u");
        assert_eq!(render(FieldValue::Float(3.0)), "3.0");
        assert_eq!(render(FieldValue::Float(1e300)), "1e300");
        assert_eq!(render(FieldValue::Boolean(false)), "false");
        assert_eq!(render(FieldValue::String(b"a \"b\"".to_vec())), "\"a \\\"b\\\"\"");
    }

    #[test]
    fn test_point_line_protocol() {
        let point = Point::new(
            cpu_key(),
            vec![
                Field::new("usage", FieldValue::Float(12.5)),
                Field::new("cores", FieldValue::Integer(8)),
            ],
            1_609_459_200_000_000_000,
        )
        .expect("valid point");
        assert_eq!(
            point.to_string(),
            "cpu,host=server01,region=us-west usage=12.5,cores=8i 1609459200000000000"
        );
    }

    #[test]
    fn test_field_type_codes() {
        for ty in [
            FieldType::Integer,
            FieldType::Unsigned,
            FieldType::Float,
            FieldType::Boolean,
            FieldType::String,
        ] {
            assert_eq!(FieldType::from_code(ty.code()), Some(ty));
        }
        assert_eq!(FieldType::from_code(0), None);
    }
}
