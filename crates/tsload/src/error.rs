// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Parse errors.
//!
//! Every error is fatal to the one line that produced it. Whether the whole
//! input is aborted or the line is skipped is decided by the loader.

use thiserror::Error;

/// Longest slice of the offending line kept in a [`ParseError`].
const MAX_ERROR_TEXT: usize = 256;

/// Why a line was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    #[error("missing measurement")]
    MissingMeasurement,

    #[error("missing tag key")]
    MissingTagKey,

    #[error("missing tag value")]
    MissingTagValue,

    #[error("invalid tag format")]
    InvalidTagFormat,

    #[error("cannot use reserved tag key {0:?}")]
    ReservedTagKey(String),

    #[error("duplicate tags")]
    DuplicateTags,

    #[error("max key length exceeded: {0} > 65535")]
    KeyTooLong(usize),

    #[error("missing fields")]
    MissingFields,

    #[error("missing field key")]
    MissingFieldKey,

    #[error("missing field value")]
    MissingFieldValue,

    #[error("invalid field format")]
    InvalidFieldFormat,

    #[error("unbalanced quotes")]
    UnbalancedQuotes,

    #[error("invalid number")]
    InvalidNumber,

    #[error("NaN is not supported")]
    NanUnsupported,

    #[error("unable to parse integer {0}: value out of range")]
    IntegerOutOfRange(String),

    #[error("unable to parse unsigned {0}: value out of range")]
    UnsignedOutOfRange(String),

    #[error("invalid float {0}: value out of range")]
    FloatOutOfRange(String),

    #[error("invalid boolean")]
    InvalidBoolean,

    #[error("missing timestamp")]
    MissingTimestamp,

    #[error("bad timestamp")]
    BadTimestamp,
}

/// Error taxonomy used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed key, tags, fields or timestamp.
    Syntax,
    /// Reserved or duplicate tag key, point without fields.
    Semantic,
    /// Literal does not fit its inferred type.
    Range,
}

impl ParseErrorKind {
    /// Category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ReservedTagKey(_) | Self::DuplicateTags | Self::MissingFields => {
                ErrorCategory::Semantic
            }
            Self::IntegerOutOfRange(_) | Self::UnsignedOutOfRange(_) | Self::FloatOutOfRange(_) => {
                ErrorCategory::Range
            }
            _ => ErrorCategory::Syntax,
        }
    }

    pub(crate) fn integer_range(literal: &[u8]) -> Self {
        Self::IntegerOutOfRange(String::from_utf8_lossy(literal).into_owned())
    }

    pub(crate) fn unsigned_range(literal: &[u8]) -> Self {
        Self::UnsignedOutOfRange(String::from_utf8_lossy(literal).into_owned())
    }

    pub(crate) fn float_range(literal: &[u8]) -> Self {
        Self::FloatOutOfRange(String::from_utf8_lossy(literal).into_owned())
    }
}

/// A rejected line: where, why, and what it looked like.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {kind}: {text}")]
pub struct ParseError {
    /// 1-based line number where the record starts.
    pub line: usize,
    /// Reason.
    pub kind: ParseErrorKind,
    /// The record (truncated).
    pub text: String,
}

impl ParseError {
    /// Build an error for `line` starting at line number `line_no`.
    pub fn new(line_no: usize, kind: ParseErrorKind, line: &[u8]) -> Self {
        let end = line.len().min(MAX_ERROR_TEXT);
        Self {
            line: line_no,
            kind,
            text: String::from_utf8_lossy(&line[..end]).into_owned(),
        }
    }
}
