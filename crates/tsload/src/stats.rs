// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Run statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::batch::BatchMeta;
use crate::worker::{BatchOutcome, OutcomeSink};

/// Counters of one load run, shared by the loader and every worker.
#[derive(Debug)]
pub struct LoadStats {
    /// Records handed out by the lexer.
    pub lines_read: AtomicU64,

    /// Records that became points.
    pub points_parsed: AtomicU64,

    /// Records rejected by the scanners or the encoder.
    pub parse_errors: AtomicU64,

    /// Batches handed to the worker pool.
    pub batches_sealed: AtomicU64,

    /// Batches acknowledged by the backend.
    pub batches_committed: AtomicU64,

    /// Points (rows) in committed batches.
    pub points_committed: AtomicU64,

    /// Fields (metrics) in committed batches.
    pub fields_committed: AtomicU64,

    /// Body bytes of committed batches, before compression.
    pub bytes_committed: AtomicU64,

    /// Sum of write latencies of committed batches.
    pub latency_nanos: AtomicU64,

    /// Write attempts answered with backpressure.
    pub backoff_responses: AtomicU64,

    /// Batches abandoned with a fatal error.
    pub batches_failed: AtomicU64,

    /// Run start.
    pub started: Instant,
}

impl Default for LoadStats {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadStats {
    pub fn new() -> Self {
        Self {
            lines_read: AtomicU64::new(0),
            points_parsed: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            batches_sealed: AtomicU64::new(0),
            batches_committed: AtomicU64::new(0),
            points_committed: AtomicU64::new(0),
            fields_committed: AtomicU64::new(0),
            bytes_committed: AtomicU64::new(0),
            latency_nanos: AtomicU64::new(0),
            backoff_responses: AtomicU64::new(0),
            batches_failed: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn record_line(&self) {
        self.lines_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_point(&self) {
        self.points_parsed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sealed(&self) {
        self.batches_sealed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> LoadStatsSnapshot {
        LoadStatsSnapshot {
            lines_read: self.lines_read.load(Ordering::Relaxed),
            points_parsed: self.points_parsed.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            batches_sealed: self.batches_sealed.load(Ordering::Relaxed),
            batches_committed: self.batches_committed.load(Ordering::Relaxed),
            points_committed: self.points_committed.load(Ordering::Relaxed),
            fields_committed: self.fields_committed.load(Ordering::Relaxed),
            bytes_committed: self.bytes_committed.load(Ordering::Relaxed),
            latency_nanos: self.latency_nanos.load(Ordering::Relaxed),
            backoff_responses: self.backoff_responses.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            elapsed: self.started.elapsed(),
        }
    }
}

impl OutcomeSink for LoadStats {
    fn report(&self, _worker_id: usize, batch: BatchMeta, outcome: &BatchOutcome) {
        match outcome {
            BatchOutcome::Committed(latency) => {
                self.batches_committed.fetch_add(1, Ordering::Relaxed);
                self.points_committed
                    .fetch_add(u64::from(batch.points), Ordering::Relaxed);
                self.fields_committed.fetch_add(batch.fields, Ordering::Relaxed);
                self.bytes_committed
                    .fetch_add(batch.bytes as u64, Ordering::Relaxed);
                let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
                self.latency_nanos.fetch_add(nanos, Ordering::Relaxed);
            }
            BatchOutcome::RetryingBackoff(_) => {
                self.backoff_responses.fetch_add(1, Ordering::Relaxed);
            }
            BatchOutcome::Fatal(_) => {
                self.batches_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Snapshot of load statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadStatsSnapshot {
    pub lines_read: u64,
    pub points_parsed: u64,
    pub parse_errors: u64,
    pub batches_sealed: u64,
    pub batches_committed: u64,
    pub points_committed: u64,
    pub fields_committed: u64,
    pub bytes_committed: u64,
    pub latency_nanos: u64,
    pub backoff_responses: u64,
    pub batches_failed: u64,
    pub elapsed: Duration,
}

impl LoadStatsSnapshot {
    /// Calculate committed rows per second.
    pub fn rows_per_second(&self) -> f64 {
        rate(self.points_committed, self.elapsed)
    }

    /// Calculate committed metrics per second.
    pub fn metrics_per_second(&self) -> f64 {
        rate(self.fields_committed, self.elapsed)
    }

    /// Mean write latency of committed batches.
    pub fn mean_latency(&self) -> Duration {
        if self.batches_committed == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.latency_nanos / self.batches_committed)
    }

    /// The final one-line report.
    pub fn summary_line(&self, workers: usize) -> String {
        format!(
            "loaded {} metrics in {:.3}sec with {} workers (mean rate {:.2} metrics/sec); \
             loaded {} rows (mean rate {:.2} rows/sec)",
            self.fields_committed,
            self.elapsed.as_secs_f64(),
            workers,
            self.metrics_per_second(),
            self.points_committed,
            self.rows_per_second()
        )
    }
}

fn rate(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::WriteError;
    use std::sync::Arc;

    fn meta(points: u32, fields: u64) -> BatchMeta {
        BatchMeta {
            points,
            fields,
            bytes: 100,
        }
    }

    #[test]
    fn test_committed_outcomes_accumulate() {
        let stats = LoadStats::new();
        stats.report(0, meta(10, 30), &BatchOutcome::Committed(Duration::from_millis(4)));
        stats.report(1, meta(5, 5), &BatchOutcome::Committed(Duration::from_millis(2)));
        let snap = stats.snapshot();
        assert_eq!(snap.batches_committed, 2);
        assert_eq!(snap.points_committed, 15);
        assert_eq!(snap.fields_committed, 35);
        assert_eq!(snap.bytes_committed, 200);
        assert_eq!(snap.mean_latency(), Duration::from_millis(3));
    }

    #[test]
    fn test_backoff_and_fatal_counted() {
        let stats = LoadStats::new();
        stats.report(0, meta(1, 1), &BatchOutcome::RetryingBackoff(Duration::ZERO));
        stats.report(0, meta(1, 1), &BatchOutcome::Fatal(Arc::new(WriteError::Shutdown)));
        let snap = stats.snapshot();
        assert_eq!(snap.backoff_responses, 1);
        assert_eq!(snap.batches_failed, 1);
        assert_eq!(snap.points_committed, 0);
    }

    #[test]
    fn test_rates() {
        let snap = LoadStatsSnapshot {
            points_committed: 100,
            fields_committed: 400,
            elapsed: Duration::from_secs(2),
            ..Default::default()
        };
        assert_eq!(snap.rows_per_second(), 50.0);
        assert_eq!(snap.metrics_per_second(), 200.0);
        assert_eq!(LoadStatsSnapshot::default().rows_per_second(), 0.0);
    }

    #[test]
    fn test_summary_line() {
        let snap = LoadStatsSnapshot {
            points_committed: 10,
            fields_committed: 20,
            elapsed: Duration::from_secs(1),
            ..Default::default()
        };
        let line = snap.summary_line(4);
        assert!(line.starts_with("loaded 20 metrics in 1.000sec with 4 workers"));
        assert!(line.contains("loaded 10 rows"));
    }

    #[test]
    fn test_parse_counters() {
        let stats = LoadStats::new();
        stats.record_line();
        stats.record_line();
        stats.record_point();
        stats.record_parse_error();
        stats.record_sealed();
        let snap = stats.snapshot();
        assert_eq!((snap.lines_read, snap.points_parsed, snap.parse_errors), (2, 1, 1));
        assert_eq!(snap.batches_sealed, 1);
    }
}
