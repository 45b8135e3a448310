// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Write workers.
//!
//! Each worker owns one [`ResilientWriter`] and one backoff monitor, and
//! drains its own bounded batch queue:
//!
//! ```text
//! queue --> [gzip] --> write --+--> committed ----------------> next batch
//!                       ^      |
//!                       |      +--> backoff --> sleep --+
//!                       +-------------------------------+
//!                              +--> fatal -------------------> abort worker
//! ```

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::backoff::{BackoffMonitor, BackoffReporter, BackoffSummary};
use crate::batch::{Batch, BatchMeta};
use crate::pool::BufferPool;
use crate::shutdown::ShutdownSignal;
use crate::writer::{ResilientWriter, Transport, WriteError};

/// What happened to a batch.
#[derive(Debug, Clone)]
pub enum BatchOutcome {
    /// Acknowledged by the backend after this write latency.
    Committed(Duration),
    /// Told to back off; time since the first backoff of this batch.
    RetryingBackoff(Duration),
    /// Abandoned.
    Fatal(Arc<WriteError>),
}

/// Receives every batch outcome of every worker.
pub trait OutcomeSink: Send + Sync {
    fn report(&self, worker_id: usize, batch: BatchMeta, outcome: &BatchOutcome);
}

/// Worker behaviour knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Pause between attempts when the backend asks to back off.
    pub backoff: Duration,
    /// Gzip batch bodies before sending.
    pub gzip: bool,
    /// When false, batches are counted as committed without being sent.
    pub do_load: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(1),
            gzip: false,
            do_load: true,
        }
    }
}

/// Totals of one worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub worker_id: usize,
    pub batches: u64,
    pub points: u64,
    pub fields: u64,
    /// Queued batches dropped on shutdown or abort.
    pub abandoned: u64,
    pub backoff: BackoffSummary,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker {worker_id} aborted: {source}")]
    Aborted {
        worker_id: usize,
        summary: WorkerSummary,
        #[source]
        source: Arc<WriteError>,
    },

    #[error("worker {0} panicked: {1}")]
    Panicked(usize, String),
}

impl WorkerError {
    pub fn worker_id(&self) -> usize {
        match self {
            Self::Aborted { worker_id, .. } => *worker_id,
            Self::Panicked(id, _) => *id,
        }
    }
}

/// One write worker.
pub struct Worker<T: Transport> {
    id: usize,
    writer: ResilientWriter<T>,
    settings: WorkerSettings,
    pool: Arc<BufferPool>,
    sink: Arc<dyn OutcomeSink>,
    shutdown: ShutdownSignal,
}

impl<T: Transport> Worker<T> {
    pub fn new(
        id: usize,
        writer: ResilientWriter<T>,
        settings: WorkerSettings,
        pool: Arc<BufferPool>,
        sink: Arc<dyn OutcomeSink>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            id,
            writer,
            settings,
            pool,
            sink,
            shutdown,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Drain `rx` until it closes, shutdown is triggered or a batch fails.
    ///
    /// The backoff summary is collected on every exit path.
    pub async fn run(mut self, mut rx: mpsc::Receiver<Batch>) -> Result<WorkerSummary, WorkerError> {
        let (reporter, monitor) = BackoffMonitor::spawn(self.id);
        let mut summary = WorkerSummary {
            worker_id: self.id,
            ..Default::default()
        };

        let result = loop {
            if self.shutdown.is_triggered() {
                break Ok(());
            }
            let next = tokio::select! {
                batch = rx.recv() => batch,
                _ = self.shutdown.wait() => None,
            };
            let Some(batch) = next else {
                break Ok(());
            };
            match self.process(batch, &reporter).await {
                Ok(meta) => {
                    summary.batches += 1;
                    summary.points += u64::from(meta.points);
                    summary.fields += meta.fields;
                }
                Err(e) => break Err(e),
            }
        };

        drop(reporter);
        summary.backoff = monitor.finish().await;

        rx.close();
        while let Ok(batch) = rx.try_recv() {
            summary.abandoned += 1;
            self.pool.release(batch.into_body());
        }

        info!(
            "[worker {}] done: {} batches, {} rows, {} abandoned",
            self.id, summary.batches, summary.points, summary.abandoned
        );

        match result {
            Ok(()) => Ok(summary),
            Err(source) => Err(WorkerError::Aborted {
                worker_id: self.id,
                summary,
                source,
            }),
        }
    }

    async fn process(&mut self, batch: Batch, reporter: &BackoffReporter) -> Result<BatchMeta, Arc<WriteError>> {
        let meta = batch.meta();

        if !self.settings.do_load {
            self.sink
                .report(self.id, meta, &BatchOutcome::Committed(Duration::ZERO));
            self.pool.release(batch.into_body());
            return Ok(meta);
        }

        let result = if self.settings.gzip {
            match self.compress(batch.body()) {
                Ok(gz) => {
                    let result = self.send_with_retry(&gz, true, meta, reporter).await;
                    self.pool.release(gz);
                    result
                }
                Err(e) => Err(WriteError::Compression(e)),
            }
        } else {
            self.send_with_retry(batch.body(), false, meta, reporter).await
        };
        self.pool.release(batch.into_body());

        match result {
            Ok(latency) => {
                self.sink.report(self.id, meta, &BatchOutcome::Committed(latency));
                Ok(meta)
            }
            Err(e) => {
                error!("[worker {}] error writing: {}", self.id, e);
                let e = Arc::new(e);
                self.sink
                    .report(self.id, meta, &BatchOutcome::Fatal(Arc::clone(&e)));
                Err(e)
            }
        }
    }

    /// Write until the backend stops asking to back off.
    async fn send_with_retry(
        &mut self,
        body: &[u8],
        compressed: bool,
        meta: BatchMeta,
        reporter: &BackoffReporter,
    ) -> Result<Duration, WriteError> {
        let mut first_backoff: Option<Instant> = None;
        loop {
            match self.writer.write_batch(body, compressed).await {
                Err(WriteError::Backoff) => {
                    reporter.record(true).await;
                    let now = Instant::now();
                    let since = *first_backoff.get_or_insert(now);
                    self.sink.report(
                        self.id,
                        meta,
                        &BatchOutcome::RetryingBackoff(now.saturating_duration_since(since)),
                    );
                    debug!(
                        "[worker {}] backpressure from {}, retrying in {:?}",
                        self.id,
                        self.writer.transport().endpoint(),
                        self.settings.backoff
                    );
                    if !self.shutdown.sleep(self.settings.backoff).await {
                        return Err(WriteError::Shutdown);
                    }
                }
                result => {
                    reporter.record(false).await;
                    return result;
                }
            }
        }
    }

    fn compress(&self, body: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(self.pool.acquire(), Compression::default());
        encoder.write_all(body)?;
        encoder.finish()
    }
}

/// How sealed batches are assigned to workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dispatch {
    #[default]
    RoundRobin,
    /// `batch.partition() % workers`, so a partition always hits one worker.
    ByPartition,
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker {worker} stopped accepting batches")]
    WorkerStopped { worker: usize, batch: Batch },

    #[error("worker pool has no workers")]
    Empty(Batch),
}

impl PoolError {
    /// The batch that could not be queued.
    pub fn into_batch(self) -> Batch {
        match self {
            Self::WorkerStopped { batch, .. } | Self::Empty(batch) => batch,
        }
    }
}

/// A set of running workers, one bounded queue each.
pub struct WorkerPool {
    senders: Vec<mpsc::Sender<Batch>>,
    handles: Vec<JoinHandle<Result<WorkerSummary, WorkerError>>>,
    dispatch: Dispatch,
    next: usize,
}

impl WorkerPool {
    /// Spawn one task per worker, each with a queue of `queue_capacity`.
    pub fn spawn<T: Transport + 'static>(workers: Vec<Worker<T>>, queue_capacity: usize, dispatch: Dispatch) -> Self {
        let mut senders = Vec::with_capacity(workers.len());
        let mut handles = Vec::with_capacity(workers.len());
        for worker in workers {
            let (tx, rx) = mpsc::channel(queue_capacity.max(1));
            senders.push(tx);
            handles.push(tokio::spawn(worker.run(rx)));
        }
        Self {
            senders,
            handles,
            dispatch,
            next: 0,
        }
    }

    pub fn workers(&self) -> usize {
        self.senders.len()
    }

    /// Queue a batch, waiting while the target queue is full.
    pub async fn submit(&mut self, batch: Batch) -> Result<(), PoolError> {
        if self.senders.is_empty() {
            return Err(PoolError::Empty(batch));
        }
        let worker = match self.dispatch {
            Dispatch::RoundRobin => {
                let worker = self.next;
                self.next = (self.next + 1) % self.senders.len();
                worker
            }
            Dispatch::ByPartition => batch.partition() % self.senders.len(),
        };
        self.senders[worker]
            .send(batch)
            .await
            .map_err(|e| PoolError::WorkerStopped { worker, batch: e.0 })
    }

    /// Close every queue and wait for all workers.
    pub async fn join(self) -> Vec<Result<WorkerSummary, WorkerError>> {
        let Self { senders, handles, .. } = self;
        drop(senders);

        let mut results = Vec::with_capacity(handles.len());
        for (id, handle) in handles.into_iter().enumerate() {
            results.push(match handle.await {
                Ok(result) => result,
                Err(e) => Err(WorkerError::Panicked(id, e.to_string())),
            });
        }
        results
    }
}
