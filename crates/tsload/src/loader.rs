// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Load driver.
//!
//! Reads input in chunks, lexes complete records, encodes them into points,
//! feeds the batch assembler and hands sealed batches to the worker pool.
//! An unterminated record at the end of a chunk is carried into the next
//! one.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use crate::batch::{Batch, BatchAssembler};
use crate::codec::CodecError;
use crate::config::{ConfigError, LoadConfig, ParseErrorPolicy};
use crate::error::ParseError;
use crate::lexer::{LineLexer, RawLine};
use crate::pool::BufferPool;
use crate::protocol::encode;
use crate::shutdown::ShutdownSignal;
use crate::stats::{LoadStats, LoadStatsSnapshot};
use crate::worker::{PoolError, Worker, WorkerError, WorkerPool, WorkerSummary};
use crate::writer::{DbAction, DbError, DbManager, ResilientWriter, SqlExecutor, Transport};

/// Resources shared by every component of one run.
#[derive(Clone)]
pub struct RunContext {
    pub pool: Arc<BufferPool>,
    pub stats: Arc<LoadStats>,
    pub shutdown: ShutdownSignal,
}

impl RunContext {
    pub fn new(pool_buffers: usize, buffer_size: usize) -> Self {
        Self {
            pool: Arc::new(BufferPool::new(pool_buffers, buffer_size)),
            stats: Arc::new(LoadStats::new()),
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn from_config(config: &LoadConfig) -> Self {
        Self::new(config.loader.pool_buffers, config.loader.batch_bytes)
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error("line {line}: {source}")]
    Encode {
        line: usize,
        #[source]
        source: CodecError,
    },

    #[error("batch error: {0}")]
    Codec(#[from] CodecError),

    #[error("worker {0} stopped accepting batches")]
    WorkerStopped(usize),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("database setup failed: {0}")]
    Database(#[from] DbError),
}

/// Result of a completed or interrupted run.
#[derive(Debug)]
pub struct RunReport {
    pub stats: LoadStatsSnapshot,
    /// Workers that drained their queue.
    pub workers: Vec<WorkerSummary>,
    /// Workers that aborted or panicked.
    pub errors: Vec<WorkerError>,
    /// Input stopped early because of shutdown.
    pub interrupted: bool,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && !self.interrupted
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len() + self.errors.len()
    }

    /// Backoff time summed over every worker.
    pub fn backoff_total(&self) -> Duration {
        let aborted = self.errors.iter().filter_map(|e| match e {
            WorkerError::Aborted { summary, .. } => Some(summary.backoff.total),
            WorkerError::Panicked(..) => None,
        });
        self.workers
            .iter()
            .map(|w| w.backoff.total)
            .chain(aborted)
            .sum()
    }

    pub fn summary_line(&self) -> String {
        self.stats.summary_line(self.worker_count())
    }
}

/// Drives one run from input to committed batches.
pub struct Loader {
    ctx: RunContext,
    assembler: BatchAssembler,
    workers: WorkerPool,
    policy: ParseErrorPolicy,
    chunk_size: usize,
}

impl Loader {
    pub fn new(
        ctx: RunContext,
        assembler: BatchAssembler,
        workers: WorkerPool,
        policy: ParseErrorPolicy,
        chunk_size: usize,
    ) -> Self {
        Self {
            ctx,
            assembler,
            workers,
            policy,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Create, recreate or keep the target database as configured.
    ///
    /// Call before [`Loader::from_config`] spawns the workers.
    pub async fn prepare_database<C: SqlExecutor>(
        config: &LoadConfig,
        manager: &mut DbManager<C>,
    ) -> Result<DbAction, LoadError> {
        let action = manager
            .prepare(&config.loader.database, &config.db_setup())
            .await?;
        debug!("database '{}': {:?}", config.loader.database, action);
        Ok(action)
    }

    /// Build the assembler and spawn one worker per transport.
    ///
    /// Must be called inside a tokio runtime.
    pub fn from_config<T: Transport + 'static>(
        config: &LoadConfig,
        ctx: RunContext,
        transports: Vec<T>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if transports.len() != config.loader.workers {
            return Err(ConfigError::Invalid(format!(
                "{} transports for {} workers",
                transports.len(),
                config.loader.workers
            )));
        }

        let predicate = Arc::new(config.resolve_backpressure()?);
        let settings = config.worker_settings();
        let workers: Vec<Worker<T>> = transports
            .into_iter()
            .enumerate()
            .map(|(id, transport)| {
                let debug_info = format!("worker #{}, dest url: {}", id, transport.endpoint());
                debug!("{}", debug_info);
                let writer = ResilientWriter::new(transport, predicate.clone(), debug_info)
                    .with_success_statuses(config.target.success_status.clone());
                Worker::new(
                    id,
                    writer,
                    settings,
                    Arc::clone(&ctx.pool),
                    ctx.stats.clone(),
                    ctx.shutdown.clone(),
                )
            })
            .collect();
        let pool = WorkerPool::spawn(workers, config.loader.queue_capacity, config.dispatch());

        let assembler = BatchAssembler::new(
            config.point_format(),
            &config.loader.database,
            config.batch_config(),
            Arc::clone(&ctx.pool),
        )
        .with_indexer(config.indexer());

        Ok(Self::new(
            ctx,
            assembler,
            pool,
            config.loader.on_parse_error,
            config.loader.read_chunk_bytes,
        ))
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Load everything from `input`, then wait for the workers.
    ///
    /// A worker failure ends the run early and is reported in
    /// [`RunReport::errors`]. Input, parse (with [`ParseErrorPolicy::Abort`])
    /// and encode failures stop the workers and are returned as `Err`.
    pub async fn run<R: AsyncRead + Unpin>(mut self, input: R) -> Result<RunReport, LoadError> {
        let fed = self.feed(input).await;
        let interrupted = self.ctx.shutdown.is_triggered();

        match &fed {
            Ok(()) => {}
            Err(LoadError::WorkerStopped(worker)) => {
                warn!("worker {} stopped, ending the run", worker);
                self.ctx.shutdown.trigger();
            }
            Err(e) => {
                warn!("loading stopped: {}", e);
                self.ctx.shutdown.trigger();
            }
        }

        let mut workers = Vec::new();
        let mut errors = Vec::new();
        for result in self.workers.join().await {
            match result {
                Ok(summary) => workers.push(summary),
                Err(e) => errors.push(e),
            }
        }

        match fed {
            Ok(()) | Err(LoadError::WorkerStopped(_)) => Ok(RunReport {
                stats: self.ctx.stats.snapshot(),
                workers,
                errors,
                interrupted,
            }),
            Err(e) => Err(e),
        }
    }

    async fn feed<R: AsyncRead + Unpin>(&mut self, mut input: R) -> Result<(), LoadError> {
        let shutdown = self.ctx.shutdown.clone();
        let interval = self.assembler.flush_interval();
        let mut chunk = vec![0u8; self.chunk_size];
        let mut pending: Vec<u8> = Vec::with_capacity(self.chunk_size);
        let mut line = 1;

        loop {
            if shutdown.is_triggered() {
                return Ok(());
            }
            let read = tokio::select! {
                n = input.read(&mut chunk) => Some(n?),
                _ = tokio::time::sleep(interval.unwrap_or(Duration::from_secs(3600))), if interval.is_some() => None,
                _ = shutdown.wait() => return Ok(()),
            };

            match read {
                Some(0) => break,
                Some(n) => {
                    pending.extend_from_slice(&chunk[..n]);
                    let (consumed, next_line) = self.drain(&pending, line, false).await?;
                    pending.drain(..consumed);
                    line = next_line;
                }
                None => {}
            }

            if self.assembler.should_flush() {
                debug!("flush interval elapsed, {} points pending", self.assembler.pending_points());
                self.flush().await?;
            }
        }

        self.drain(&pending, line, true).await?;
        if shutdown.is_triggered() {
            return Ok(());
        }
        self.flush().await?;
        info!("input exhausted after {} lines", line.saturating_sub(1));
        Ok(())
    }

    /// Handle every record of `buf`. Returns bytes consumed and the next
    /// line number.
    async fn drain(&mut self, buf: &[u8], line: usize, at_eof: bool) -> Result<(usize, usize), LoadError> {
        let mut lexer = LineLexer::starting_at(buf, line);
        loop {
            let next = if at_eof {
                lexer.next()
            } else {
                lexer.next_terminated()
            };
            let Some(raw) = next else {
                break;
            };
            self.handle(&raw).await?;
            if self.ctx.shutdown.is_triggered() {
                break;
            }
        }
        Ok((lexer.consumed(), lexer.line()))
    }

    async fn handle(&mut self, raw: &RawLine<'_>) -> Result<(), LoadError> {
        let stats = &self.ctx.stats;
        stats.record_line();

        let point = match encode(raw) {
            Ok(point) => point,
            Err(e) => {
                stats.record_parse_error();
                return match self.policy {
                    ParseErrorPolicy::Skip => {
                        warn!("skipping {}", e);
                        Ok(())
                    }
                    ParseErrorPolicy::Abort => Err(e.into()),
                };
            }
        };
        stats.record_point();

        match self.assembler.push(&point) {
            Ok(Some(batch)) => self.submit(batch).await,
            Ok(None) => Ok(()),
            Err(source) => {
                stats.record_parse_error();
                match self.policy {
                    ParseErrorPolicy::Skip => {
                        warn!("skipping line {}: {}", raw.line, source);
                        Ok(())
                    }
                    ParseErrorPolicy::Abort => Err(LoadError::Encode {
                        line: raw.line,
                        source,
                    }),
                }
            }
        }
    }

    async fn flush(&mut self) -> Result<(), LoadError> {
        for batch in self.assembler.flush()? {
            self.submit(batch).await?;
        }
        Ok(())
    }

    async fn submit(&mut self, batch: Batch) -> Result<(), LoadError> {
        self.ctx.stats.record_sealed();
        self.workers.submit(batch).await.map_err(|e| {
            let worker = match &e {
                PoolError::WorkerStopped { worker, .. } => *worker,
                PoolError::Empty(_) => 0,
            };
            self.ctx.pool.release(e.into_batch().into_body());
            LoadError::WorkerStopped(worker)
        })
    }
}
