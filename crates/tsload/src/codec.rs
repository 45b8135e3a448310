// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Batch wire formats.
//!
//! # Binary batch
//!
//! ```text
//! +---------------------------------------------------------+
//! | magic "TSLB" (4) | version (1) | db_len (2) | db (var)  |
//! | point_count (4)       <- patched when the batch seals   |
//! +---------------------------------------------------------+
//! | Point 0                                                 |
//! | Point 1                                                 |
//! | ...                                                     |
//! +---------------------------------------------------------+
//! ```
//!
//! # Point
//!
//! ```text
//! +---------------------------------------------------------+
//! | db_len (2) | db | meas_len (2) | measurement            |
//! | tag_count (2) | { key_len (2) | key | val_len (2) | val }|
//! | field_count (2) | { name_len (2) | name | type (1) | v } |
//! | timestamp (8)                                           |
//! +---------------------------------------------------------+
//!
//! v: integer, unsigned, float bits = 8 bytes; boolean = 1 byte;
//!    string = len (4) | bytes
//! ```
//!
//! All integers are big-endian.

use std::io::{self, Cursor, Read, Write};

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use crate::protocol::{Field, FieldType, FieldValue, Key, Point, Tag};

/// Magic bytes: "TSLB"
pub const MAGIC: [u8; 4] = *b"TSLB";

/// Current format version.
pub const FORMAT_VERSION: u8 = 1;

/// Codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{what} too long: {len} bytes")]
    TooLong { what: &'static str, len: usize },

    #[error("too many {what}: {count}")]
    TooMany { what: &'static str, count: usize },

    #[error("Invalid batch format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u8, got: u8 },

    #[error("unknown field type code {0}")]
    UnknownFieldType(u8),
}

/// Turns points into the bytes a sink ingests.
pub trait PointFormat: Send + Sync {
    /// Write the batch preamble into an empty buffer.
    fn begin_batch(&self, database: &str, out: &mut Vec<u8>) -> Result<(), CodecError>;

    /// Append one point. On error `out` may hold a partial record; callers
    /// truncate it back.
    fn encode_point(&self, database: &str, point: &Point, out: &mut Vec<u8>) -> Result<(), CodecError>;

    /// Seal a batch holding `points` points.
    fn finish_batch(&self, database: &str, points: u32, out: &mut Vec<u8>) -> Result<(), CodecError>;

    /// HTTP content type of a sealed batch.
    fn content_type(&self) -> &'static str;
}

/// Length-prefixed binary format.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryFormat;

impl BinaryFormat {
    fn count_offset(database: &str) -> usize {
        MAGIC.len() + 1 + 2 + database.len()
    }
}

impl PointFormat for BinaryFormat {
    fn begin_batch(&self, database: &str, out: &mut Vec<u8>) -> Result<(), CodecError> {
        out.write_all(&MAGIC)?;
        out.write_u8(FORMAT_VERSION)?;
        write_short_bytes(out, "database", database.as_bytes())?;
        // Placeholder, rewritten by finish_batch
        out.write_u32::<BigEndian>(0)?;
        Ok(())
    }

    fn encode_point(&self, database: &str, point: &Point, out: &mut Vec<u8>) -> Result<(), CodecError> {
        write_short_bytes(out, "database", database.as_bytes())?;
        write_short_bytes(out, "measurement", point.measurement())?;

        write_count(out, "tags", point.tags().len())?;
        for tag in point.tags() {
            write_short_bytes(out, "tag key", &tag.key)?;
            write_short_bytes(out, "tag value", &tag.value)?;
        }

        write_count(out, "fields", point.fields().len())?;
        for field in point.fields() {
            write_short_bytes(out, "field key", &field.key)?;
            out.write_u8(field.value.field_type().code())?;
            match &field.value {
                FieldValue::Integer(v) => out.write_i64::<BigEndian>(*v)?,
                FieldValue::Unsigned(v) => out.write_u64::<BigEndian>(*v)?,
                FieldValue::Float(v) => out.write_u64::<BigEndian>(v.to_bits())?,
                FieldValue::Boolean(v) => out.write_u8(u8::from(*v))?,
                FieldValue::String(v) => {
                    let len = u32::try_from(v.len()).map_err(|_| CodecError::TooLong {
                        what: "string field",
                        len: v.len(),
                    })?;
                    out.write_u32::<BigEndian>(len)?;
                    out.write_all(v)?;
                }
            }
        }

        out.write_i64::<BigEndian>(point.timestamp())?;
        Ok(())
    }

    fn finish_batch(&self, database: &str, points: u32, out: &mut Vec<u8>) -> Result<(), CodecError> {
        let offset = Self::count_offset(database);
        let Some(slot) = out.get_mut(offset..offset + 4) else {
            return Err(CodecError::InvalidFormat("batch header missing".into()));
        };
        BigEndian::write_u32(slot, points);
        Ok(())
    }

    fn content_type(&self) -> &'static str {
        "application/octet-stream"
    }
}

/// Canonical line protocol text, one point per line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineProtocolFormat;

impl PointFormat for LineProtocolFormat {
    fn begin_batch(&self, _database: &str, _out: &mut Vec<u8>) -> Result<(), CodecError> {
        Ok(())
    }

    fn encode_point(&self, _database: &str, point: &Point, out: &mut Vec<u8>) -> Result<(), CodecError> {
        point.write_line_protocol(out);
        out.push(b'\n');
        Ok(())
    }

    fn finish_batch(&self, _database: &str, _points: u32, _out: &mut Vec<u8>) -> Result<(), CodecError> {
        Ok(())
    }

    fn content_type(&self) -> &'static str {
        "text/plain; charset=utf-8"
    }
}

fn write_short_bytes(out: &mut Vec<u8>, what: &'static str, bytes: &[u8]) -> Result<(), CodecError> {
    let len = u16::try_from(bytes.len()).map_err(|_| CodecError::TooLong {
        what,
        len: bytes.len(),
    })?;
    out.write_u16::<BigEndian>(len)?;
    out.write_all(bytes)?;
    Ok(())
}

fn write_count(out: &mut Vec<u8>, what: &'static str, count: usize) -> Result<(), CodecError> {
    let count16 = u16::try_from(count).map_err(|_| CodecError::TooMany { what, count })?;
    out.write_u16::<BigEndian>(count16)?;
    Ok(())
}

/// A binary batch read back into points.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBatch {
    pub database: String,
    pub points: Vec<Point>,
}

/// Decode a sealed binary batch.
pub fn decode_batch(bytes: &[u8]) -> Result<DecodedBatch, CodecError> {
    let mut r = Cursor::new(bytes);

    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(CodecError::InvalidFormat("bad batch magic".into()));
    }
    let version = r.read_u8()?;
    if version != FORMAT_VERSION {
        return Err(CodecError::VersionMismatch {
            expected: FORMAT_VERSION,
            got: version,
        });
    }
    let database = read_string(&mut r)?;
    let count = r.read_u32::<BigEndian>()?;

    let mut points = Vec::with_capacity((count as usize).min(4096));
    for _ in 0..count {
        let point_db = read_string(&mut r)?;
        if point_db != database {
            return Err(CodecError::InvalidFormat(format!(
                "point database {point_db:?} in batch for {database:?}"
            )));
        }
        points.push(read_point(&mut r)?);
    }

    if (r.position() as usize) != bytes.len() {
        return Err(CodecError::InvalidFormat("trailing bytes after last point".into()));
    }

    Ok(DecodedBatch { database, points })
}

fn read_point<R: Read>(r: &mut R) -> Result<Point, CodecError> {
    let measurement = read_short_bytes(r)?;

    let tag_count = r.read_u16::<BigEndian>()?;
    let mut tags = Vec::with_capacity(tag_count as usize);
    for _ in 0..tag_count {
        let key = read_short_bytes(r)?;
        let value = read_short_bytes(r)?;
        tags.push(Tag { key, value });
    }

    let field_count = r.read_u16::<BigEndian>()?;
    let mut fields = Vec::with_capacity(field_count as usize);
    for _ in 0..field_count {
        let key = read_short_bytes(r)?;
        let code = r.read_u8()?;
        let ty = FieldType::from_code(code).ok_or(CodecError::UnknownFieldType(code))?;
        let value = match ty {
            FieldType::Integer => FieldValue::Integer(r.read_i64::<BigEndian>()?),
            FieldType::Unsigned => FieldValue::Unsigned(r.read_u64::<BigEndian>()?),
            FieldType::Float => FieldValue::Float(f64::from_bits(r.read_u64::<BigEndian>()?)),
            FieldType::Boolean => FieldValue::Boolean(r.read_u8()? != 0),
            FieldType::String => {
                let len = r.read_u32::<BigEndian>()? as usize;
                let mut value = vec![0u8; len];
                r.read_exact(&mut value)?;
                FieldValue::String(value)
            }
        };
        fields.push(Field { key, value });
    }

    let timestamp = r.read_i64::<BigEndian>()?;

    let key = Key::new(measurement, tags).map_err(|e| CodecError::InvalidFormat(e.to_string()))?;
    Point::new(key, fields, timestamp).map_err(|e| CodecError::InvalidFormat(e.to_string()))
}

fn read_short_bytes<R: Read>(r: &mut R) -> Result<Vec<u8>, CodecError> {
    let len = r.read_u16::<BigEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_string<R: Read>(r: &mut R) -> Result<String, CodecError> {
    String::from_utf8(read_short_bytes(r)?)
        .map_err(|_| CodecError::InvalidFormat("database name is not UTF-8".into()))
}
