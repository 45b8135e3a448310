// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Batch assembly.
//!
//! Encoded points accumulate in a pooled buffer per partition. A batch seals
//! right after the append that reaches either the point or the byte limit,
//! or when the optional flush interval has elapsed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::codec::{CodecError, PointFormat};
use crate::pool::BufferPool;
use crate::protocol::Point;

/// Size and time limits of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Seal after this many points.
    pub max_points: usize,
    /// Seal once the encoded body reaches this many bytes.
    pub max_bytes: usize,
    /// Seal non-empty batches this long after the previous flush.
    pub flush_interval: Option<Duration>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_points: 10_000,
            max_bytes: 4 * 1024 * 1024,
            flush_interval: None,
        }
    }
}

/// A sealed batch ready to be written.
#[derive(Debug)]
pub struct Batch {
    database: Arc<str>,
    partition: usize,
    body: Vec<u8>,
    points: u32,
    fields: u64,
    content_type: &'static str,
}

/// Counters of a batch, kept after its body is gone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchMeta {
    pub points: u32,
    pub fields: u64,
    pub bytes: usize,
}

impl Batch {
    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn partition(&self) -> usize {
        self.partition
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn points(&self) -> u32 {
        self.points
    }

    pub fn fields(&self) -> u64 {
        self.fields
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    pub fn meta(&self) -> BatchMeta {
        BatchMeta {
            points: self.points,
            fields: self.fields,
            bytes: self.body.len(),
        }
    }

    /// Give the body back, e.g. to return it to the pool.
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}

/// Maps a point to a partition index in `0..partitions()`.
pub trait PointIndexer: Send {
    fn partitions(&self) -> usize;
    fn partition(&self, point: &Point) -> usize;
}

/// Everything goes to partition 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantIndexer;

impl PointIndexer for ConstantIndexer {
    fn partitions(&self) -> usize {
        1
    }

    fn partition(&self, _point: &Point) -> usize {
        0
    }
}

/// Partitions by the hash of one tag's value.
///
/// Points without the tag hash their series key instead, so one series
/// always lands on the same partition.
#[derive(Debug, Clone)]
pub struct TagHashIndexer {
    tag: Vec<u8>,
    partitions: usize,
}

impl TagHashIndexer {
    pub fn new(tag: impl Into<Vec<u8>>, partitions: usize) -> Self {
        Self {
            tag: tag.into(),
            partitions: partitions.max(1),
        }
    }
}

impl PointIndexer for TagHashIndexer {
    fn partitions(&self) -> usize {
        self.partitions
    }

    fn partition(&self, point: &Point) -> usize {
        let bytes = point
            .key()
            .tag(&self.tag)
            .unwrap_or_else(|| point.key().series_key());
        fnv1a_hash(bytes) as usize % self.partitions
    }
}

struct OpenBatch {
    body: Vec<u8>,
    points: u32,
    fields: u64,
}

/// Accumulates encoded points into batches.
pub struct BatchAssembler {
    format: Arc<dyn PointFormat>,
    database: Arc<str>,
    config: BatchConfig,
    indexer: Box<dyn PointIndexer>,
    pool: Arc<BufferPool>,
    open: Vec<Option<OpenBatch>>,
    last_flush: Instant,
}

impl BatchAssembler {
    pub fn new(
        format: Arc<dyn PointFormat>,
        database: &str,
        config: BatchConfig,
        pool: Arc<BufferPool>,
    ) -> Self {
        Self {
            format,
            database: Arc::from(database),
            config,
            indexer: Box::new(ConstantIndexer),
            pool,
            open: vec![None],
            last_flush: Instant::now(),
        }
    }

    /// Replace the partitioning scheme. Open batches are kept.
    pub fn with_indexer(mut self, indexer: Box<dyn PointIndexer>) -> Self {
        let partitions = indexer.partitions().max(1);
        if partitions > self.open.len() {
            self.open.resize_with(partitions, || None);
        }
        self.indexer = indexer;
        self
    }

    pub fn partitions(&self) -> usize {
        self.indexer.partitions().max(1)
    }

    pub fn flush_interval(&self) -> Option<Duration> {
        self.config.flush_interval
    }

    /// Append a point, returning the batch it sealed, if any.
    ///
    /// A point that fails to encode leaves its batch untouched.
    pub fn push(&mut self, point: &Point) -> Result<Option<Batch>, CodecError> {
        let partition = self.indexer.partition(point) % self.partitions();
        let mut open = match self.open[partition].take() {
            Some(open) => open,
            None => open_batch(&self.pool, self.format.as_ref(), &self.database)?,
        };

        let mark = open.body.len();
        if let Err(e) = self.format.encode_point(&self.database, point, &mut open.body) {
            open.body.truncate(mark);
            self.open[partition] = Some(open);
            return Err(e);
        }
        open.points += 1;
        open.fields += point.fields().len() as u64;

        if open.points as usize >= self.config.max_points || open.body.len() >= self.config.max_bytes {
            return self.seal(partition, open).map(Some);
        }
        self.open[partition] = Some(open);
        Ok(None)
    }

    /// True when the flush interval has elapsed and something is buffered.
    pub fn should_flush(&self) -> bool {
        match self.config.flush_interval {
            Some(interval) => {
                self.pending_points() > 0 && self.last_flush.elapsed() >= interval
            }
            None => false,
        }
    }

    /// Seal every non-empty batch and reset the flush timer.
    pub fn flush(&mut self) -> Result<Vec<Batch>, CodecError> {
        self.last_flush = Instant::now();
        let mut sealed = Vec::new();
        for partition in 0..self.open.len() {
            let Some(open) = self.open[partition].take() else {
                continue;
            };
            if open.points == 0 {
                self.pool.release(open.body);
                continue;
            }
            sealed.push(self.seal(partition, open)?);
        }
        Ok(sealed)
    }

    /// Points buffered across all open batches.
    pub fn pending_points(&self) -> usize {
        self.open
            .iter()
            .flatten()
            .map(|open| open.points as usize)
            .sum()
    }

    fn seal(&self, partition: usize, mut open: OpenBatch) -> Result<Batch, CodecError> {
        if let Err(e) = self.format.finish_batch(&self.database, open.points, &mut open.body) {
            self.pool.release(open.body);
            return Err(e);
        }
        Ok(Batch {
            database: Arc::clone(&self.database),
            partition,
            body: open.body,
            points: open.points,
            fields: open.fields,
            content_type: self.format.content_type(),
        })
    }
}

fn open_batch(
    pool: &BufferPool,
    format: &dyn PointFormat,
    database: &str,
) -> Result<OpenBatch, CodecError> {
    let mut body = pool.acquire();
    if let Err(e) = format.begin_batch(database, &mut body) {
        pool.release(body);
        return Err(e);
    }
    Ok(OpenBatch {
        body,
        points: 0,
        fields: 0,
    })
}

fn fnv1a_hash(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c9dc5;
    for &byte in bytes {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x01000193);
    }
    hash
}
