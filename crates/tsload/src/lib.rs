// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! tsload - line protocol bulk loader
//!
//! Turns line protocol text into validated, canonical, binary-encoded
//! batches and writes them to a time-series backend with one resilient
//! writer per worker.
//!
//! # Pipeline
//!
//! ```text
//! bytes --> LineLexer --> protocol::encode --> BatchAssembler --> WorkerPool
//!              |               |                    |                |
//!           RawLine          Point            Batch (pooled)   ResilientWriter
//!                                                               + BackoffTracker
//! ```
//!
//! # Line Protocol
//!
//! ```text
//! cpu,host=server01,region=us-west idle=64,usage=12.3,running=true 1609459200000000000
//! ```
//!
//! Tags are canonicalised (sorted by key, duplicates and reserved keys
//! rejected). Field types are inferred from the literal: `3i` integer, `3u`
//! unsigned, `3` / `3.0` / `3e2` float, `t` / `true` / `FALSE` boolean,
//! `"..."` string.
//!
//! # Quick Start
//!
//! ```bash
//! # Load a file into the default database
//! tsload --file data.lp --urls http://localhost:8902 --workers 4
//!
//! # Parse and validate only
//! tsload check --file data.lp
//!
//! # Using a config file
//! tsload --config tsload.toml
//! ```

pub mod backoff;
pub mod backpressure;
pub mod batch;
pub mod codec;
pub mod config;
pub mod error;
pub mod lexer;
pub mod loader;
pub mod pool;
pub mod protocol;
pub mod shutdown;
pub mod stats;
pub mod worker;
pub mod writer;

pub use backpressure::{BackpressurePredicate, BackpressureProfile, ProfileError};
pub use batch::{Batch, BatchAssembler};
pub use codec::{BinaryFormat, LineProtocolFormat, PointFormat};
pub use config::LoadConfig;
pub use error::{ParseError, ParseErrorKind};
pub use lexer::{LineLexer, RawLine};
pub use loader::{Loader, RunContext, RunReport};
pub use protocol::{encode, Field, FieldValue, Key, Point, Tag};
pub use shutdown::ShutdownSignal;
pub use stats::{LoadStats, LoadStatsSnapshot};
pub use worker::{BatchOutcome, Worker, WorkerPool};
pub use writer::{DbManager, HttpTransport, ResilientWriter, SqlExecutor, Transport, WriteError};
