//! # Simulated Channel
//!
//! A software model of the hardware channel for tests and bring-up on
//! machines without the accelerator. Accepts well-formed instruction
//! streams, advances the completion counter one fence per submission, and
//! drives the registered notifier from whichever thread completes the work,
//! which is exactly the "not a caller thread" contract the dispatcher must
//! survive.

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use krypton_cmd::sequence::unpack_header;
use krypton_cmd::RegisterMap;
use krypton_core::{DmaAddr, EngineGeneration, Error, FenceValue, Result};

use crate::channel::{ChannelState, CompletionNotifier, HardwareChannel, SubmitFlags};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Simulated channel configuration
#[derive(Debug, Clone)]
pub struct SimChannelConfig {
    /// Hardware generation to present
    pub generation: EngineGeneration,
    /// Complete each submission inline during `enqueue`
    pub auto_complete: bool,
    /// Maximum queued submissions before the channel pushes back
    pub queue_depth: usize,
    /// Reject streams that do not end with a fence increment
    pub strict: bool,
}

impl Default for SimChannelConfig {
    fn default() -> Self {
        Self {
            generation: EngineGeneration::Gen2,
            auto_complete: false,
            queue_depth: 8,
            strict: true,
        }
    }
}

// =============================================================================
// QUEUED SUBMISSION
// =============================================================================

/// One submission held by the simulated channel
#[derive(Debug, Clone)]
pub struct SimSubmission {
    /// Copy of the instruction stream
    pub words: Vec<u32>,
    /// Bus address the stream claimed to live at
    pub dma: DmaAddr,
    /// Flags it was enqueued with
    pub flags: SubmitFlags,
    /// Fence the completion counter reaches when this finishes
    pub fence: FenceValue,
}

// =============================================================================
// SIMULATED CHANNEL
// =============================================================================

/// Software stand-in for the hardware channel
pub struct SimChannel {
    config: SimChannelConfig,
    queued: spin::Mutex<VecDeque<SimSubmission>>,
    state: spin::Mutex<ChannelState>,
    completed: AtomicU64,
    notifier: spin::Mutex<Option<CompletionNotifier>>,
    fail_next: AtomicBool,
}

impl SimChannel {
    /// Create a simulated channel
    pub fn new(config: SimChannelConfig) -> Self {
        Self {
            config,
            queued: spin::Mutex::new(VecDeque::new()),
            state: spin::Mutex::new(ChannelState::Ready),
            completed: AtomicU64::new(0),
            notifier: spin::Mutex::new(None),
            fail_next: AtomicBool::new(false),
        }
    }

    /// Number of submissions the hardware has not yet consumed
    pub fn queued_len(&self) -> usize {
        self.queued.lock().len()
    }

    /// Make the next `enqueue` fail with `ChannelRejected`
    pub fn inject_failure(&self) {
        self.fail_next.store(true, Ordering::Release);
    }

    /// Latch a fault; all further submissions are refused
    pub fn fault(&self) {
        *self.state.lock() = ChannelState::Faulted;
    }

    /// Complete the oldest queued submission.
    ///
    /// Advances the completion counter and, for `NOTIFY` submissions, runs
    /// the notifier inline on the calling thread.
    pub fn complete_next(&self) -> Option<FenceValue> {
        let sub = {
            let mut queued = self.queued.lock();
            let sub = queued.pop_front()?;
            if queued.is_empty() {
                *self.state.lock() = ChannelState::Ready;
            }
            sub
        };
        self.completed.store(sub.fence, Ordering::Release);
        if sub.flags.contains(SubmitFlags::NOTIFY) {
            self.notify(sub.fence);
        }
        Some(sub.fence)
    }

    /// Complete everything queued, oldest first
    pub fn complete_all(&self) {
        while self.complete_next().is_some() {}
    }

    /// Deliver a notification for `fence` with no backing submission.
    ///
    /// Models the interrupt-bookkeeping corruption the dispatcher must log
    /// and refuse to act on.
    pub fn raise_spurious(&self, fence: FenceValue) {
        self.notify(fence);
    }

    fn notify(&self, fence: FenceValue) {
        let notifier = self.notifier.lock().clone();
        if let Some(notifier) = notifier {
            notifier(fence);
        }
    }

    /// Check the stream parses as headers + operands and, in strict mode,
    /// that its final instruction is the chain's fence increment.
    fn validate_stream(&self, words: &[u32]) -> Result<()> {
        if words.is_empty() {
            return Err(Error::InvalidCommand);
        }
        let map = RegisterMap::for_generation(self.config.generation);
        let mut i = 0;
        let mut last_header = 0u32;
        while i < words.len() {
            let (_, _, count) = unpack_header(words[i]);
            last_header = words[i];
            i += 1 + count as usize;
        }
        if i != words.len() {
            return Err(Error::InvalidCommand);
        }
        if self.config.strict && !map.is_fence_increment(last_header) {
            return Err(Error::InvalidCommand);
        }
        Ok(())
    }
}

impl HardwareChannel for SimChannel {
    fn generation(&self) -> EngineGeneration {
        self.config.generation
    }

    fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    fn enqueue(&self, words: &[u32], dma: DmaAddr, flags: SubmitFlags) -> Result<()> {
        if !self.state().can_submit() {
            return Err(Error::ChannelNotReady);
        }
        if self.fail_next.swap(false, Ordering::AcqRel) {
            log::debug!("sim channel: injected rejection");
            return Err(Error::ChannelRejected);
        }
        self.validate_stream(words)?;

        {
            let mut queued = self.queued.lock();
            if queued.len() >= self.config.queue_depth {
                return Err(Error::ChannelNotReady);
            }
            let fence = self.completed.load(Ordering::Acquire) + queued.len() as u64 + 1;
            queued.push_back(SimSubmission {
                words: words.to_vec(),
                dma,
                flags,
                fence,
            });
            *self.state.lock() = ChannelState::Running;
        }

        if self.config.auto_complete {
            self.complete_next();
        }
        Ok(())
    }

    fn completed_fence(&self) -> FenceValue {
        self.completed.load(Ordering::Acquire)
    }

    fn set_notifier(&self, notifier: CompletionNotifier) {
        *self.notifier.lock() = Some(notifier);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;
    use core::sync::atomic::AtomicUsize;

    use krypton_cmd::sequence::InstructionSequence;
    use krypton_cmd::Sequencer;
    use krypton_core::{DmaSegment, KeySlotIndex, OperationKind};

    fn valid_stream(generation: EngineGeneration) -> Vec<u32> {
        let sequencer = Sequencer::new(generation);
        let src = [DmaSegment::new(DmaAddr::new(0x8000), 64)];
        let desc = krypton_cmd::OperationDescriptor {
            kind: OperationKind::Digest,
            key_slot: KeySlotIndex::new(1),
            iv: None,
            src: &src,
            dst: DmaSegment::new(DmaAddr::new(0x8000), 64),
        };
        let mut seq = InstructionSequence::new(128);
        sequencer
            .append_operation(
                &mut seq,
                &desc,
                krypton_cmd::ChainFlags::FIRST | krypton_cmd::ChainFlags::LAST,
            )
            .unwrap();
        seq.words().to_vec()
    }

    #[test]
    fn test_enqueue_complete_advances_fence() {
        let chan = SimChannel::new(SimChannelConfig::default());
        let words = valid_stream(chan.generation());
        chan.enqueue(&words, DmaAddr::new(0x9000), SubmitFlags::empty())
            .unwrap();
        assert_eq!(chan.completed_fence(), 0);
        assert_eq!(chan.complete_next(), Some(1));
        assert_eq!(chan.completed_fence(), 1);
    }

    #[test]
    fn test_notifier_fires_only_for_notify_flag() {
        let chan = SimChannel::new(SimChannelConfig::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&hits);
        chan.set_notifier(Arc::new(move |_| {
            observed.fetch_add(1, Ordering::SeqCst);
        }));

        let words = valid_stream(chan.generation());
        chan.enqueue(&words, DmaAddr::null(), SubmitFlags::empty())
            .unwrap();
        chan.enqueue(&words, DmaAddr::null(), SubmitFlags::NOTIFY)
            .unwrap();
        chan.complete_all();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_strict_mode_rejects_unfenced_stream() {
        let chan = SimChannel::new(SimChannelConfig::default());
        // A lone register write with no trailing fence increment.
        let words = {
            let mut seq = InstructionSequence::new(8);
            seq.push_write(0x0, 0x1).unwrap();
            seq.words().to_vec()
        };
        assert_eq!(
            chan.enqueue(&words, DmaAddr::null(), SubmitFlags::empty()),
            Err(Error::InvalidCommand)
        );
    }

    #[test]
    fn test_truncated_stream_rejected() {
        let chan = SimChannel::new(SimChannelConfig::default());
        // Header claims 4 operands but only 1 follows.
        let header = krypton_cmd::sequence::pack_header(
            krypton_cmd::sequence::OPC_INCR_WRITE,
            0x10,
            4,
        )
        .unwrap();
        let words = [header, 0xAB];
        assert_eq!(
            chan.enqueue(&words, DmaAddr::null(), SubmitFlags::empty()),
            Err(Error::InvalidCommand)
        );
    }

    #[test]
    fn test_injected_failure_hits_once() {
        let chan = SimChannel::new(SimChannelConfig::default());
        let words = valid_stream(chan.generation());
        chan.inject_failure();
        assert_eq!(
            chan.enqueue(&words, DmaAddr::null(), SubmitFlags::empty()),
            Err(Error::ChannelRejected)
        );
        assert!(chan
            .enqueue(&words, DmaAddr::null(), SubmitFlags::empty())
            .is_ok());
    }

    #[test]
    fn test_faulted_channel_refuses_work() {
        let chan = SimChannel::new(SimChannelConfig::default());
        chan.fault();
        let words = valid_stream(chan.generation());
        assert_eq!(
            chan.enqueue(&words, DmaAddr::null(), SubmitFlags::empty()),
            Err(Error::ChannelNotReady)
        );
    }

    #[test]
    fn test_spurious_notification_reaches_notifier() {
        let chan = SimChannel::new(SimChannelConfig::default());
        let seen = Arc::new(AtomicU64::new(0));
        let observed = Arc::clone(&seen);
        chan.set_notifier(Arc::new(move |fence| {
            observed.store(fence, Ordering::SeqCst);
        }));
        chan.raise_spurious(99);
        assert_eq!(seen.load(Ordering::SeqCst), 99);
        assert_eq!(chan.completed_fence(), 0);
    }
}
