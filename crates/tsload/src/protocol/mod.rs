// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Line protocol scanning.
//!
//! One record goes through three scanners in order and comes out as a typed
//! [`Point`]:
//!
//! ```text
//! cpu,host=a,region=b usage=12.5,cores=8i 1609459200000000000
//! \_________________/ \_________________/ \_________________/
//!        key                fields             timestamp
//! ```

pub mod key;
mod fields;
mod point;
pub(crate) mod text;
mod timestamp;

pub use point::{Field, FieldType, FieldValue, Key, Point, Tag};

use crate::error::{ParseError, ParseErrorKind};
use crate::lexer::RawLine;

/// Parse one record into a validated point.
pub fn parse_point(buf: &[u8]) -> Result<Point, ParseErrorKind> {
    let scanned = key::scan_key(buf)?;
    let (end, fields) = fields::scan_fields(buf, scanned.end)?;
    let timestamp = timestamp::scan_time(buf, end)?;
    Point::new(scanned.key, fields, timestamp)
}

/// Parse a lexed record, attaching its line number to any error.
pub fn encode(raw: &RawLine<'_>) -> Result<Point, ParseError> {
    parse_point(raw.bytes).map_err(|kind| ParseError::new(raw.line, kind, raw.bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::LineLexer;

    fn parse(line: &str) -> Result<Point, ParseErrorKind> {
        parse_point(line.as_bytes())
    }

    #[test]
    fn test_full_record() {
        let point = parse("cpu,region=us-west,host=server01 usage=12.5,cores=8i,up=t,name=\"n1\" 1609459200000000000")
            .expect("valid point");
        assert_eq!(point.measurement(), b"cpu");
        assert_eq!(point.key().series_key(), b"cpu,host=server01,region=us-west");
        assert_eq!(point.fields().len(), 4);
        assert_eq!(point.fields()[1].value, FieldValue::Integer(8));
        assert_eq!(point.fields()[2].value, FieldValue::Boolean(true));
        assert_eq!(point.timestamp(), 1_609_459_200_000_000_000);
    }

    #[test]
    fn test_key_only_is_missing_fields() {
        assert_eq!(parse("cpu,host=a").err(), Some(ParseErrorKind::MissingFields));
    }

    #[test]
    fn test_missing_timestamp() {
        assert_eq!(parse("cpu v=1").err(), Some(ParseErrorKind::MissingTimestamp));
    }

    #[test]
    fn test_canonical_text_reparses() {
        let point = parse("m,z=1,a=2 s=\"q \\\"x\\\"\",f=-0.5,i=-3i,u=7u,b=FALSE -5").expect("valid point");
        let text = point.to_line_protocol();
        let again = parse_point(&text).expect("canonical text parses");
        assert_eq!(point, again);
    }

    #[test]
    fn test_encode_reports_line_number() {
        let input = b"cpu v=1 1\ncpu,time=x v=1 2\n";
        let errors: Vec<_> = LineLexer::new(input)
            .filter_map(|raw| encode(&raw).err())
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line, 2);
        assert!(errors[0].to_string().contains("reserved tag key"));
    }
}
