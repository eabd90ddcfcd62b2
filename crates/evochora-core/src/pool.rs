// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Deterministic worker pool for range-partitioned dispatch.
//!
//! The pool has a fixed capacity chosen at construction; a dispatch fans a
//! job list out over scoped worker threads (at most one per capacity slot)
//! and blocks until every job has finished — the single blocking point of
//! a tick. Worker `i` always receives worker index `i`, so pre-allocated
//! per-thread contexts can be indexed stably. Shutdown is idempotent and
//! merely fences off further dispatches; callers never shut down while a
//! tick is in flight.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised by the pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool was shut down before the dispatch.
    #[error("worker pool is shut down")]
    ShutDown,
    /// More jobs were submitted than the pool has capacity slots.
    #[error("{jobs} jobs exceed pool capacity {capacity}")]
    OverCapacity {
        /// Submitted job count.
        jobs: usize,
        /// Pool capacity.
        capacity: usize,
    },
}

/// Fixed-capacity deterministic dispatcher.
#[derive(Debug)]
pub struct WorkerPool {
    capacity: usize,
    down: AtomicBool,
}

impl WorkerPool {
    /// Creates a pool with `capacity` worker slots.
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(Self {
            capacity,
            down: AtomicBool::new(false),
        })
    }

    /// Number of worker slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the pool has been shut down.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.down.load(Ordering::Acquire)
    }

    /// Fences off further dispatches. Idempotent.
    pub fn shutdown(&self) {
        self.down.store(true, Ordering::Release);
    }

    /// Splits `[0, total)` into `parts` contiguous slices of near-equal
    /// size; the first `total % parts` slices carry one extra element.
    #[must_use]
    pub fn partition(total: usize, parts: usize) -> Vec<Range<usize>> {
        let parts = parts.max(1);
        let base = total / parts;
        let extra = total % parts;
        let mut ranges = Vec::with_capacity(parts);
        let mut start = 0;
        for i in 0..parts {
            let len = base + usize::from(i < extra);
            ranges.push(start..start + len);
            start += len;
        }
        ranges
    }

    /// Runs every job on its own worker, blocking until all complete.
    ///
    /// Job `i` observes worker index `i`. A single job runs inline on the
    /// calling thread (still as worker 0).
    pub fn dispatch<F>(&self, jobs: Vec<F>) -> Result<(), PoolError>
    where
        F: FnOnce(usize) + Send,
    {
        if self.is_shut_down() {
            return Err(PoolError::ShutDown);
        }
        if jobs.len() > self.capacity {
            return Err(PoolError::OverCapacity {
                jobs: jobs.len(),
                capacity: self.capacity,
            });
        }
        if jobs.len() <= 1 {
            for job in jobs {
                job(0);
            }
            return Ok(());
        }
        std::thread::scope(|scope| {
            for (index, job) in jobs.into_iter().enumerate() {
                scope.spawn(move || job(index));
            }
        });
        Ok(())
    }
}
