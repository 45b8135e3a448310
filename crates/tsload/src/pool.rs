// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lock-free buffer pool for batch bodies.
//!
//! The assembler acquires a buffer per batch, the worker releases it once
//! the batch is committed or abandoned. Gzip output buffers come from the
//! same pool. One pool lives for one run.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

/// Buffers grown past this multiple of the nominal size are not retained.
const MAX_RETAINED_FACTOR: usize = 4;

/// Pool of reusable byte buffers.
///
/// # Design
/// - **Lock-free:** crossbeam `ArrayQueue` freelist, shared by every worker
/// - **Never blocks:** an empty freelist allocates, a full one drops
/// - **Metrics:** allocations, reuses and drops
pub struct BufferPool {
    freelist: ArrayQueue<Vec<u8>>,
    buffer_size: usize,
    allocated: AtomicU64,
    reused: AtomicU64,
    dropped: AtomicU64,
}

/// Pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub allocated: u64,
    pub reused: u64,
    pub dropped: u64,
    pub available: usize,
}

impl BufferPool {
    /// Create a pool retaining at most `capacity` buffers of `buffer_size`
    /// bytes. Buffers are allocated lazily.
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        Self {
            freelist: ArrayQueue::new(capacity.max(1)),
            buffer_size,
            allocated: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Get an empty buffer.
    pub fn acquire(&self) -> Vec<u8> {
        match self.freelist.pop() {
            Some(buf) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                Vec::with_capacity(self.buffer_size)
            }
        }
    }

    /// Return a buffer. Oversized buffers and buffers beyond capacity are
    /// dropped.
    pub fn release(&self, mut buf: Vec<u8>) {
        if buf.capacity() > self.buffer_size.saturating_mul(MAX_RETAINED_FACTOR) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        buf.clear();
        if self.freelist.push(buf).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of buffers ready for reuse.
    pub fn available(&self) -> usize {
        self.freelist.len()
    }

    pub fn capacity(&self) -> usize {
        self.freelist.capacity()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            available: self.available(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_acquire_allocates_when_empty() {
        let pool = BufferPool::new(4, 1024);
        let buf = pool.acquire();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 1024);
        assert_eq!(pool.stats().allocated, 1);
    }

    #[test]
    fn test_release_then_reuse() {
        let pool = BufferPool::new(4, 64);
        let mut buf = pool.acquire();
        buf.extend_from_slice(b"payload");
        pool.release(buf);
        assert_eq!(pool.available(), 1);

        let again = pool.acquire();
        assert!(again.is_empty());
        assert_eq!(pool.stats().reused, 1);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_release_beyond_capacity_drops() {
        let pool = BufferPool::new(1, 64);
        pool.release(Vec::with_capacity(64));
        pool.release(Vec::with_capacity(64));
        let stats = pool.stats();
        assert_eq!(stats.available, 1);
        assert_eq!(stats.dropped, 1);
    }

    #[test]
    fn test_oversized_buffer_not_retained() {
        let pool = BufferPool::new(4, 16);
        pool.release(Vec::with_capacity(16 * MAX_RETAINED_FACTOR + 1));
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.stats().dropped, 1);
    }

    #[test]
    fn test_concurrent_acquire_release() {
        let pool = Arc::new(BufferPool::new(8, 128));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let buf = pool.acquire();
                        pool.release(buf);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread should not panic");
        }
        let stats = pool.stats();
        assert_eq!(stats.allocated + stats.reused, 4000);
        assert!(stats.available <= 8);
    }
}
