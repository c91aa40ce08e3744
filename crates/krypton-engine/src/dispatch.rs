//! # Completion Dispatcher
//!
//! Demultiplexes fence-reached notifications back to the submissions they
//! complete. Runs inline in the channel's notification context, so the
//! fence table sits behind a spin lock that is never held across a
//! completion resolution, and nothing here blocks.
//!
//! Per-submission lifecycle: Submitted → Completed → Released (terminal).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use krypton_core::{Error, FenceValue, Result};
use krypton_pool::{CmdBufHandle, ScratchHandle};

use crate::device::DevicePools;
use crate::request::CompletionSender;
use crate::submit::InflightGate;

// =============================================================================
// SUBMISSION
// =============================================================================

/// Submission lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubmissionState {
    /// Handed to the hardware channel, fence pending
    Submitted,
    /// Fence reached (or the submission was reclaimed); teardown running
    Completed,
    /// Resources returned, completions delivered
    Released,
}

/// One batched request inside a submission
pub(crate) struct SubmissionPart {
    /// Byte offset of this request's extent in the scratch buffer
    pub offset: usize,
    /// Extent length in bytes
    pub len: usize,
    /// The request's completion sender
    pub completion: CompletionSender,
}

/// The unit of hardware work: one command-buffer slot, at most one scratch
/// buffer, and the ordered requests it batches. The dispatcher is its sole
/// destroyer.
pub(crate) struct Submission {
    pub fence: FenceValue,
    pub cmdbuf: CmdBufHandle,
    pub scratch: Option<ScratchHandle>,
    pub parts: Vec<SubmissionPart>,
    pub state: SubmissionState,
}

// =============================================================================
// DISPATCHER
// =============================================================================

#[derive(Debug, Default)]
struct DispatchCounters {
    registered: AtomicU64,
    completed_requests: AtomicU64,
    failed_requests: AtomicU64,
    stale_completions: AtomicU64,
    reclaimed: AtomicU64,
}

/// Completion dispatcher for one device context
pub(crate) struct Dispatcher {
    table: spin::Mutex<BTreeMap<FenceValue, Submission>>,
    pools: Arc<DevicePools>,
    gate: Arc<InflightGate>,
    counters: DispatchCounters,
}

impl Dispatcher {
    pub fn new(pools: Arc<DevicePools>, gate: Arc<InflightGate>) -> Self {
        Self {
            table: spin::Mutex::new(BTreeMap::new()),
            pools,
            gate,
            counters: DispatchCounters::default(),
        }
    }

    /// Track a submission until its fence arrives
    pub fn register(&self, sub: Submission) {
        self.counters.registered.fetch_add(1, Ordering::Relaxed);
        self.table.lock().insert(sub.fence, sub);
    }

    /// Untrack a submission (submit-error unwind)
    pub fn withdraw(&self, fence: FenceValue) -> Option<Submission> {
        self.table.lock().remove(&fence)
    }

    /// Fence-reached notification entry point.
    ///
    /// Completes every tracked submission with fence ≤ the notified value,
    /// oldest first. A notification matching nothing is an internal
    /// consistency error: logged, counted, and acted on no further.
    pub fn on_fence(&self, fence: FenceValue) {
        let mut ready = Vec::new();
        {
            let mut table = self.table.lock();
            while let Some(entry) = table.first_entry() {
                if *entry.key() <= fence {
                    ready.push(entry.remove());
                } else {
                    break;
                }
            }
        }

        if ready.is_empty() {
            self.counters.stale_completions.fetch_add(1, Ordering::Relaxed);
            log::error!("completion for fence {} matches no submission", fence);
            return;
        }

        for sub in ready {
            self.retire(sub, Ok(()));
        }
    }

    /// Reclaim the oldest tracked submission with `err`.
    ///
    /// Used by the worker's timeout watchdog and by device teardown. Returns
    /// whether anything was reclaimed.
    pub fn reclaim_oldest(&self, err: Error) -> bool {
        let sub = {
            let mut table = self.table.lock();
            table.first_entry().map(|entry| entry.remove())
        };
        match sub {
            Some(sub) => {
                self.counters.reclaimed.fetch_add(1, Ordering::Relaxed);
                log::error!("reclaiming submission at fence {}: {}", sub.fence, err);
                self.retire(sub, Err(err));
                true
            }
            None => false,
        }
    }

    /// Reclaim everything still tracked (teardown)
    pub fn fail_all(&self, err: Error) {
        while self.reclaim_oldest(err) {}
    }

    /// Tear down a submission that owns the in-flight slot.
    pub fn retire(&self, sub: Submission, outcome: core::result::Result<(), Error>) {
        self.teardown(sub, outcome, true);
    }

    /// Tear down a submission that never made it past the gate, so the
    /// actual in-flight holder keeps its slot.
    pub fn fail_unsubmitted(&self, sub: Submission, err: Error) {
        self.teardown(sub, Err(err), false);
    }

    /// Deliver a submission's results and return its resources.
    ///
    /// Order matters: staged output is copied out first, then every claimed
    /// resource returns to its pool, then the in-flight gate opens, and only
    /// then do completions fire — so no completion ever observes a pool its
    /// own submission is still holding, and the gate is never held across a
    /// callback.
    fn teardown(
        &self,
        mut sub: Submission,
        outcome: core::result::Result<(), Error>,
        release_gate: bool,
    ) {
        sub.state = SubmissionState::Completed;

        let mut results: Vec<Result<Vec<u8>>> = Vec::with_capacity(sub.parts.len());
        match outcome {
            Ok(()) => {
                for part in &sub.parts {
                    let data = match &sub.scratch {
                        Some(scratch) => {
                            scratch.as_slice()[part.offset..part.offset + part.len].to_vec()
                        }
                        None => Vec::new(),
                    };
                    results.push(Ok(data));
                }
            }
            Err(err) => {
                for _ in &sub.parts {
                    results.push(Err(err));
                }
            }
        }

        sub.state = SubmissionState::Released;
        let Submission {
            fence,
            cmdbuf,
            scratch,
            parts,
            ..
        } = sub;

        self.pools.cmdbuf.free(cmdbuf);
        if let Some(scratch) = scratch {
            self.pools.scratch.free(scratch);
        }
        if release_gate {
            self.gate.release();
        }

        for (part, result) in parts.into_iter().zip(results) {
            if result.is_ok() {
                self.counters.completed_requests.fetch_add(1, Ordering::Relaxed);
            } else {
                self.counters.failed_requests.fetch_add(1, Ordering::Relaxed);
            }
            part.completion.resolve(result);
        }

        log::debug!("submission at fence {} released", fence);
    }

    /// Submissions currently tracked
    pub fn tracked(&self) -> usize {
        self.table.lock().len()
    }

    pub fn registered_total(&self) -> u64 {
        self.counters.registered.load(Ordering::Relaxed)
    }

    pub fn completed_requests_total(&self) -> u64 {
        self.counters.completed_requests.load(Ordering::Relaxed)
    }

    pub fn failed_requests_total(&self) -> u64 {
        self.counters.failed_requests.load(Ordering::Relaxed)
    }

    pub fn stale_completions_total(&self) -> u64 {
        self.counters.stale_completions.load(Ordering::Relaxed)
    }

    pub fn reclaimed_total(&self) -> u64 {
        self.counters.reclaimed.load(Ordering::Relaxed)
    }
}
