//! # Admission Queue
//!
//! The FIFO boundary between caller threads and the batching worker.
//! `enqueue` never fails and never blocks beyond the queue lock; batching
//! policy (how many requests, whether they fit a scratch buffer) lives in
//! `pull_batch` so the worker loop stays a plain pump.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

use crate::request::{lock_ignore_poison, wait_ignore_poison, CryptoRequest};

// =============================================================================
// WORKER STATE
// =============================================================================

/// Batching worker state, visible for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Worker is parked waiting for admissions
    Idle,
    /// Worker is pulling batches from the queue
    Draining,
}

// =============================================================================
// PULLED BATCH
// =============================================================================

/// Result of one `pull_batch` pass
#[derive(Debug, Default)]
pub(crate) struct PulledBatch {
    /// Requests admitted to this batch, in FIFO order
    pub batch: Vec<CryptoRequest>,
    /// Requests whose payload can never fit a scratch buffer
    pub oversized: Vec<CryptoRequest>,
}

// =============================================================================
// ADMISSION QUEUE
// =============================================================================

#[derive(Debug)]
struct QueueInner {
    requests: VecDeque<CryptoRequest>,
    state: WorkerState,
    shutdown: bool,
}

/// FIFO admission queue shared by callers and the worker
#[derive(Debug)]
pub(crate) struct AdmissionQueue {
    inner: Mutex<QueueInner>,
    cv: Condvar,
    enqueued: AtomicU64,
}

impl AdmissionQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                requests: VecDeque::new(),
                state: WorkerState::Idle,
                shutdown: false,
            }),
            cv: Condvar::new(),
            enqueued: AtomicU64::new(0),
        }
    }

    /// Admit a request. Always succeeds; if the device is tearing down the
    /// request completes immediately with `ShuttingDown` instead of queuing.
    pub fn enqueue(&self, request: CryptoRequest) {
        let mut inner = lock_ignore_poison(&self.inner);
        if inner.shutdown {
            drop(inner);
            request.fail(krypton_core::Error::ShuttingDown);
            return;
        }
        inner.requests.push_back(request);
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        if inner.state == WorkerState::Idle {
            self.cv.notify_one();
        }
    }

    /// Current queue depth
    pub fn len(&self) -> usize {
        lock_ignore_poison(&self.inner).requests.len()
    }

    /// Total admissions so far
    pub fn enqueued_total(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Worker state snapshot
    pub fn worker_state(&self) -> WorkerState {
        lock_ignore_poison(&self.inner).state
    }

    /// Worker side: park until work arrives or shutdown.
    ///
    /// Returns `false` on shutdown; otherwise flips the worker to Draining.
    pub fn wait_for_work(&self) -> bool {
        let mut inner = lock_ignore_poison(&self.inner);
        while !inner.shutdown && inner.requests.is_empty() {
            inner = wait_ignore_poison(&self.cv, inner);
        }
        if inner.shutdown {
            return false;
        }
        inner.state = WorkerState::Draining;
        true
    }

    /// Worker side: return to Idle after a drain pass
    pub fn set_idle(&self) {
        lock_ignore_poison(&self.inner).state = WorkerState::Idle;
    }

    /// Pull the next batch under the queue lock.
    ///
    /// Takes requests in FIFO order while the batch stays under `max_batch`
    /// entries and the combined payload fits `capacity` bytes. A request
    /// that does not fit the current batch stays queued for the next pull;
    /// a request that can never fit is pulled into `oversized` so it cannot
    /// wedge the queue head.
    pub fn pull_batch(&self, max_batch: usize, capacity: usize) -> PulledBatch {
        let mut inner = lock_ignore_poison(&self.inner);
        let mut pulled = PulledBatch::default();
        let mut staged = 0usize;

        while pulled.batch.len() < max_batch {
            let len = match inner.requests.front() {
                Some(front) => front.payload_len(),
                None => break,
            };
            if len > capacity {
                // Unbatchable at any fill level.
                if let Some(request) = inner.requests.pop_front() {
                    pulled.oversized.push(request);
                }
                continue;
            }
            if staged + len > capacity {
                break;
            }
            if let Some(request) = inner.requests.pop_front() {
                staged += len;
                pulled.batch.push(request);
            }
        }
        pulled
    }

    /// Begin teardown: refuse new work, wake the worker, and hand back
    /// whatever never reached a batch.
    pub fn shutdown(&self) -> Vec<CryptoRequest> {
        let mut inner = lock_ignore_poison(&self.inner);
        inner.shutdown = true;
        let leftovers = inner.requests.drain(..).collect();
        self.cv.notify_all();
        leftovers
    }
}
