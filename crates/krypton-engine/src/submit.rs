//! # Hardware Channel Submitter
//!
//! The only path by which an instruction sequence reaches the channel. The
//! in-flight gate serializes submissions (one per device at a time); fence
//! values commit in lock-step with what the hardware will count, including
//! rolling back when the channel refuses work.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use krypton_core::{DmaAddr, Error, FenceCounter, FenceValue, Result};
use krypton_hal::{HardwareChannel, SubmitFlags};

use crate::dispatch::{Dispatcher, Submission};
use crate::request::{lock_ignore_poison, wait_timeout_ignore_poison};

// =============================================================================
// IN-FLIGHT GATE
// =============================================================================

/// The device's hardware-access serialization point.
///
/// A condvar-guarded flag rather than a held mutex guard: synchronous
/// submitters keep it marked busy across the fence poll, asynchronous ones
/// until the dispatcher retires their submission — but no lock is ever held
/// across a hardware wait or a completion callback.
#[derive(Debug)]
pub(crate) struct InflightGate {
    busy: Mutex<bool>,
    cv: Condvar,
}

impl InflightGate {
    pub fn new() -> Self {
        Self {
            busy: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    /// Mark the gate busy, waiting up to `timeout` for it to free up
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut busy = lock_ignore_poison(&self.busy);
        while *busy {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            busy = wait_timeout_ignore_poison(&self.cv, busy, deadline - now);
        }
        *busy = true;
        true
    }

    /// Wait (without acquiring) up to `timeout` for the gate to free up
    pub fn wait_free(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut busy = lock_ignore_poison(&self.busy);
        while *busy {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            busy = wait_timeout_ignore_poison(&self.cv, busy, deadline - now);
        }
        true
    }

    /// Open the gate for the next submission
    pub fn release(&self) {
        *lock_ignore_poison(&self.busy) = false;
        self.cv.notify_all();
    }

    /// Snapshot (diagnostics only; stale the moment it returns)
    pub fn is_busy(&self) -> bool {
        *lock_ignore_poison(&self.busy)
    }
}

// =============================================================================
// SUBMITTER
// =============================================================================

/// Backoff bounds for the synchronous fence poll
const POLL_INITIAL: Duration = Duration::from_micros(1);
const POLL_MAX: Duration = Duration::from_micros(256);

/// Hands finished instruction streams to the hardware channel
pub struct Submitter {
    channel: Arc<dyn HardwareChannel>,
    fence: FenceCounter,
    gate: Arc<InflightGate>,
    dispatcher: Arc<Dispatcher>,
    submit_timeout: Duration,
}

impl Submitter {
    pub(crate) fn new(
        channel: Arc<dyn HardwareChannel>,
        gate: Arc<InflightGate>,
        dispatcher: Arc<Dispatcher>,
        submit_timeout: Duration,
    ) -> Self {
        Self {
            channel,
            fence: FenceCounter::new(),
            gate,
            dispatcher,
            submit_timeout,
        }
    }

    /// Last fence value handed out
    pub fn current_fence(&self) -> FenceValue {
        self.fence.current()
    }

    /// Submit a chain and block until the hardware reaches its fence.
    ///
    /// For one-off operations driven directly by the algorithm layer. The
    /// caller keeps ownership of the command-buffer slot backing `words`
    /// and frees it after this returns; no dispatcher bookkeeping exists
    /// for synchronous submissions.
    pub fn submit_sync(&self, words: &[u32], dma: DmaAddr) -> Result<FenceValue> {
        if !self.gate.acquire_timeout(self.submit_timeout) {
            return Err(Error::ChannelNotReady);
        }
        let fence = self.fence.next();

        if let Err(err) = self.channel.enqueue(words, dma, SubmitFlags::empty()) {
            self.fence.rollback_one();
            self.gate.release();
            return Err(err);
        }

        let outcome = self.poll_fence(fence);
        self.gate.release();
        outcome.map(|_| fence)
    }

    /// Submit a batch asynchronously.
    ///
    /// Registers the submission with the dispatcher *before* touching the
    /// channel so a completion arriving inline always finds it. On channel
    /// rejection the registration is withdrawn and the submission retires
    /// with the error — resources released, completions delivered — before
    /// this returns.
    pub(crate) fn submit_async(&self, mut sub: Submission) -> Result<FenceValue> {
        if !self.gate.acquire_timeout(self.submit_timeout) {
            // Never reached the channel; the gate still belongs to whoever
            // holds it.
            self.dispatcher.fail_unsubmitted(sub, Error::ChannelNotReady);
            return Err(Error::ChannelNotReady);
        }

        let fence = self.fence.next();
        sub.fence = fence;
        let dma = sub.cmdbuf.dma_addr();
        let words_ptr = sub.cmdbuf.words().as_ptr();
        let words_len = sub.cmdbuf.len_words();

        self.dispatcher.register(sub);

        // SAFETY: the words live in the command-buffer arena, whose slot is
        // exclusively owned by the submission just registered. The channel
        // consumes the stream before signaling its fence, and the dispatcher
        // frees the slot only after that fence, so the region cannot be
        // rewritten while `enqueue` still reads it.
        let words = unsafe { core::slice::from_raw_parts(words_ptr, words_len) };

        match self.channel.enqueue(words, dma, SubmitFlags::NOTIFY) {
            Ok(()) => Ok(fence),
            Err(err) => {
                self.fence.rollback_one();
                match self.dispatcher.withdraw(fence) {
                    Some(sub) => self.dispatcher.retire(sub, Err(err)),
                    // An inline completion raced the failure report; the
                    // submission already retired.
                    None => log::warn!("submission at fence {} vanished during unwind", fence),
                }
                Err(err)
            }
        }
    }

    /// Poll the completion counter with exponential backoff until `fence`
    /// is reached or the submit timeout expires.
    fn poll_fence(&self, fence: FenceValue) -> Result<()> {
        let deadline = Instant::now() + self.submit_timeout;
        let mut backoff = POLL_INITIAL;
        loop {
            if self.channel.completed_fence() >= fence {
                return Ok(());
            }
            if Instant::now() >= deadline {
                log::error!(
                    "fence {} not reached within {:?}",
                    fence,
                    self.submit_timeout
                );
                return Err(Error::FenceTimeout);
            }
            std::thread::sleep(backoff);
            backoff = (backoff * 2).min(POLL_MAX);
        }
    }
}
