// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-worker backoff accounting.
//!
//! The worker reports one event per write attempt: `true` when the attempt
//! was told to back off, `false` otherwise. A run of consecutive `true`
//! events is one backoff interval, timed from its first `true` to the next
//! `false`.
//!
//! ```text
//! events:  F  T  T  T  T  T  F  F  T  F
//!             |______________|     |__|
//!               interval 1       interval 2
//! ```

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Capacity of the event channel between a worker and its monitor.
pub const BACKOFF_CHANNEL_CAPACITY: usize = 100;

/// One write attempt result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffEvent {
    pub backing_off: bool,
    pub at: Instant,
}

/// Backoff totals of one worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackoffSummary {
    pub worker_id: usize,
    /// Completed or still-open backoff runs.
    pub intervals: u64,
    pub total: Duration,
    pub longest: Duration,
}

/// Collapses attempt events into backoff intervals.
#[derive(Debug, Clone)]
pub struct BackoffTracker {
    worker_id: usize,
    run_start: Option<Instant>,
    summary: BackoffSummary,
}

impl BackoffTracker {
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            run_start: None,
            summary: BackoffSummary {
                worker_id,
                ..Default::default()
            },
        }
    }

    pub fn is_backing_off(&self) -> bool {
        self.run_start.is_some()
    }

    /// Feed one event. Returns the interval length when a run ends.
    pub fn observe(&mut self, event: BackoffEvent) -> Option<Duration> {
        match (event.backing_off, self.run_start) {
            (true, None) => {
                self.run_start = Some(event.at);
                None
            }
            (false, Some(start)) => {
                self.run_start = None;
                let took = event.at.saturating_duration_since(start);
                self.record(took);
                Some(took)
            }
            _ => None,
        }
    }

    /// Close the tracker. A run still open at `now` is counted up to `now`.
    pub fn finish(mut self, now: Instant) -> BackoffSummary {
        if let Some(start) = self.run_start.take() {
            let took = now.saturating_duration_since(start);
            warn!(
                "[worker {}] backoff still active at close after {:.02}sec",
                self.worker_id,
                took.as_secs_f64()
            );
            self.record(took);
        }
        self.summary
    }

    fn record(&mut self, took: Duration) {
        self.summary.intervals += 1;
        self.summary.total += took;
        self.summary.longest = self.summary.longest.max(took);
    }
}

/// Sending half, owned by the worker.
#[derive(Debug, Clone)]
pub struct BackoffReporter {
    tx: mpsc::Sender<BackoffEvent>,
}

impl BackoffReporter {
    /// Report an attempt. Waits when the monitor lags behind.
    pub async fn record(&self, backing_off: bool) {
        let event = BackoffEvent {
            backing_off,
            at: Instant::now(),
        };
        // The monitor only stops after every reporter is dropped.
        let _ = self.tx.send(event).await;
    }
}

/// Receiving half: a task folding events into a [`BackoffSummary`].
pub struct BackoffMonitor {
    worker_id: usize,
    handle: JoinHandle<BackoffSummary>,
}

impl BackoffMonitor {
    /// Start a monitor for `worker_id`.
    pub fn spawn(worker_id: usize) -> (BackoffReporter, BackoffMonitor) {
        let (tx, mut rx) = mpsc::channel::<BackoffEvent>(BACKOFF_CHANNEL_CAPACITY);
        let handle = tokio::spawn(async move {
            let mut tracker = BackoffTracker::new(worker_id);
            while let Some(event) = rx.recv().await {
                if let Some(took) = tracker.observe(event) {
                    info!("[worker {}] backoff took {:.02}sec", worker_id, took.as_secs_f64());
                }
            }
            let summary = tracker.finish(Instant::now());
            info!(
                "[worker {}] backoffs took a total of {:.06}sec of runtime",
                worker_id,
                summary.total.as_secs_f64()
            );
            summary
        });
        (BackoffReporter { tx }, BackoffMonitor { worker_id, handle })
    }

    /// Wait for the summary. Every reporter must be dropped first.
    pub async fn finish(self) -> BackoffSummary {
        match self.handle.await {
            Ok(summary) => summary,
            Err(e) => {
                warn!("[worker {}] backoff monitor failed: {}", self.worker_id, e);
                BackoffSummary {
                    worker_id: self.worker_id,
                    ..Default::default()
                }
            }
        }
    }
}
