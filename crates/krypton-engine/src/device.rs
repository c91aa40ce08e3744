//! # Device Context
//!
//! One `DeviceContext` per physical engine instance. An explicit value, not
//! a global: it owns the three resource pools, the admission queue, the
//! in-flight gate, the fence counter (inside the submitter), and the worker
//! thread, and it wires the channel's completion notifier to the dispatcher.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use krypton_cmd::Sequencer;
use krypton_core::{DmaAddr, Error, Result};
use krypton_hal::HardwareChannel;
use krypton_pool::{
    CmdBufConfig, CmdBufPool, KeySlotConfig, KeySlotPool, ScratchConfig, ScratchPool,
};

use crate::dispatch::Dispatcher;
use crate::queue::{AdmissionQueue, WorkerState};
use crate::request::CryptoRequest;
use crate::submit::{InflightGate, Submitter};
use crate::worker;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum requests merged into one submission
    pub max_batch: usize,
    /// Key-slot pool parameters
    pub key_slots: KeySlotConfig,
    /// Scratch pool geometry
    pub scratch: ScratchConfig,
    /// Command-buffer pool geometry
    pub cmdbuf: CmdBufConfig,
    /// Bus address the scratch arena is mapped at
    pub scratch_dma_base: DmaAddr,
    /// Bus address the command-buffer arena is mapped at
    pub cmdbuf_dma_base: DmaAddr,
    /// Bound on synchronous fence waits and on async completion arrival
    pub submit_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_batch: 4,
            key_slots: KeySlotConfig::default(),
            scratch: ScratchConfig::default(),
            cmdbuf: CmdBufConfig::default(),
            scratch_dma_base: DmaAddr::new(0x8000_0000),
            cmdbuf_dma_base: DmaAddr::new(0x9000_0000),
            submit_timeout: Duration::from_millis(500),
        }
    }
}

impl EngineConfig {
    /// Validate batching parameters (pool geometry validates at pool build)
    pub fn validate(&self) -> Result<()> {
        if self.max_batch == 0 || self.submit_timeout.is_zero() {
            return Err(Error::InvalidParameter);
        }
        Ok(())
    }
}

// =============================================================================
// DEVICE POOLS
// =============================================================================

/// The three resource pools of one device.
///
/// Exposed to the algorithm layer for context setup and teardown (key-slot
/// allocate/free, reserved-slot binding) and for one-off direct submissions.
#[derive(Debug)]
pub struct DevicePools {
    /// Hardware key slots
    pub key_slots: KeySlotPool,
    /// DMA staging buffers
    pub scratch: ScratchPool,
    /// Command-buffer slots
    pub cmdbuf: CmdBufPool,
}

// =============================================================================
// ENGINE SHARED STATE
// =============================================================================

/// State shared by callers, the worker thread, and the notification context
pub(crate) struct EngineShared {
    pub config: EngineConfig,
    pub pools: Arc<DevicePools>,
    pub queue: AdmissionQueue,
    pub gate: Arc<InflightGate>,
    pub dispatcher: Arc<Dispatcher>,
    pub submitter: Submitter,
    pub sequencer: Sequencer,
}

// =============================================================================
// ENGINE STATISTICS
// =============================================================================

/// Aggregated engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Requests admitted
    pub enqueued: u64,
    /// Submissions handed to the hardware
    pub submissions: u64,
    /// Requests completed successfully
    pub completed: u64,
    /// Requests completed with an error
    pub failed: u64,
    /// Completion notifications that matched no submission
    pub stale_completions: u64,
    /// Submissions reclaimed by timeout or teardown
    pub reclaimed: u64,
}

// =============================================================================
// DEVICE CONTEXT
// =============================================================================

/// Per-hardware-instance engine front end
pub struct DeviceContext {
    shared: Arc<EngineShared>,
    worker: Option<JoinHandle<()>>,
}

impl DeviceContext {
    /// Bring the engine up over a hardware channel.
    ///
    /// Builds the pools, wires the channel's completion notifier to the
    /// dispatcher, and starts the batching worker.
    pub fn new(config: EngineConfig, channel: Arc<dyn HardwareChannel>) -> Result<Self> {
        config.validate()?;

        let pools = Arc::new(DevicePools {
            key_slots: KeySlotPool::new(config.key_slots.clone())?,
            scratch: ScratchPool::new(config.scratch.clone(), config.scratch_dma_base)?,
            cmdbuf: CmdBufPool::new(config.cmdbuf.clone(), config.cmdbuf_dma_base)?,
        });
        let gate = Arc::new(InflightGate::new());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&pools), Arc::clone(&gate)));
        let submitter = Submitter::new(
            Arc::clone(&channel),
            Arc::clone(&gate),
            Arc::clone(&dispatcher),
            config.submit_timeout,
        );
        let sequencer = Sequencer::new(channel.generation());

        {
            let dispatcher = Arc::clone(&dispatcher);
            channel.set_notifier(Arc::new(move |fence| dispatcher.on_fence(fence)));
        }

        let shared = Arc::new(EngineShared {
            config,
            pools,
            queue: AdmissionQueue::new(),
            gate,
            dispatcher,
            submitter,
            sequencer,
        });

        let worker = std::thread::Builder::new()
            .name("krypton-worker".into())
            .spawn({
                let shared = Arc::clone(&shared);
                move || worker::run(shared)
            })
            .map_err(|_| Error::InvalidState)?;

        log::info!(
            "krypton device ready: {} generation, {} scratch x {} B, batch {}",
            channel.generation().name(),
            shared.config.scratch.buffers,
            shared.config.scratch.buffer_size,
            shared.config.max_batch,
        );

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Admit a request. Always succeeds immediately; hardware work starts
    /// when the worker drains it into a batch.
    pub fn enqueue(&self, request: CryptoRequest) {
        self.shared.queue.enqueue(request);
    }

    /// The device's resource pools
    pub fn pools(&self) -> &DevicePools {
        &self.shared.pools
    }

    /// The device's submitter, for direct synchronous chains
    pub fn submitter(&self) -> &Submitter {
        &self.shared.submitter
    }

    /// The sequencer matching the channel's hardware generation
    pub fn sequencer(&self) -> &Sequencer {
        &self.shared.sequencer
    }

    /// Batching worker state
    pub fn worker_state(&self) -> WorkerState {
        self.shared.queue.worker_state()
    }

    /// Whether a submission currently holds the in-flight slot.
    ///
    /// Diagnostic only; stale the moment it returns.
    pub fn hardware_busy(&self) -> bool {
        self.shared.gate.is_busy()
    }

    /// Current admission queue depth
    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    /// Aggregated counters
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            enqueued: self.shared.queue.enqueued_total(),
            submissions: self.shared.dispatcher.registered_total(),
            completed: self.shared.dispatcher.completed_requests_total(),
            failed: self.shared.dispatcher.failed_requests_total(),
            stale_completions: self.shared.dispatcher.stale_completions_total(),
            reclaimed: self.shared.dispatcher.reclaimed_total(),
        }
    }
}

impl Drop for DeviceContext {
    /// Teardown keeps the at-least-once completion guarantee: the worker is
    /// stopped, every request still queued completes with `ShuttingDown`,
    /// and any submission still tracked is reclaimed the same way.
    fn drop(&mut self) {
        let leftovers = self.shared.queue.shutdown();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("batching worker panicked during teardown");
            }
        }
        for request in leftovers {
            request.fail(Error::ShuttingDown);
        }
        let tracked = self.shared.dispatcher.tracked();
        if tracked > 0 {
            log::warn!("{} submissions still tracked at teardown", tracked);
        }
        self.shared.dispatcher.fail_all(Error::ShuttingDown);
        log::info!("krypton device torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex as StdMutex;

    use krypton_cmd::sequence::InstructionSequence;
    use krypton_cmd::{ChainFlags, OperationDescriptor};
    use krypton_core::{DmaSegment, KeySlotIndex, OperationKind, PoolKind};
    use krypton_hal::{SimChannel, SimChannelConfig};
    use krypton_pool::PoolConfig;

    use crate::request::CompletionHandle;

    fn test_config() -> EngineConfig {
        EngineConfig {
            max_batch: 3,
            scratch: ScratchConfig {
                buffers: 4,
                buffer_size: 1024,
                pool: PoolConfig::new(PoolKind::Scratch, 4),
            },
            cmdbuf: CmdBufConfig {
                slots: 4,
                words_per_slot: 512,
                pool: PoolConfig::new(PoolKind::CmdBuf, 4),
            },
            submit_timeout: Duration::from_secs(2),
            ..EngineConfig::default()
        }
    }

    fn request(payload: Vec<u8>) -> (CryptoRequest, CompletionHandle) {
        CryptoRequest::new(
            OperationKind::CipherEncrypt,
            KeySlotIndex::new(3),
            Some([1, 2, 3, 4]),
            payload,
        )
    }

    fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(
                std::time::Instant::now() < deadline,
                "timed out waiting for {}",
                what
            );
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_single_request_round_trip() {
        let chan = Arc::new(SimChannel::new(SimChannelConfig {
            auto_complete: true,
            ..SimChannelConfig::default()
        }));
        let ctx = DeviceContext::new(test_config(), chan).unwrap();

        let payload = vec![0x5A; 100];
        let (req, handle) = request(payload.clone());
        ctx.enqueue(req);

        // Staged in, operated on in place, copied back out.
        assert_eq!(handle.wait().unwrap(), payload);
        let stats = ctx.stats();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.submissions, 1);
    }

    #[test]
    fn test_five_requests_two_batches_in_order() {
        let chan = Arc::new(SimChannel::new(SimChannelConfig::default()));
        let ctx = DeviceContext::new(test_config(), chan.clone()).unwrap();

        // Plug the in-flight slot so the five requests accumulate in the
        // queue and drain in exactly two pulls once the plug completes.
        let (plug, plug_handle) = request(vec![0u8; 8]);
        ctx.enqueue(plug);
        wait_until("plug submitted", || chan.queued_len() == 1);

        let order = Arc::new(StdMutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..5usize {
            let order = Arc::clone(&order);
            // Each payload is a quarter of one scratch buffer; max_batch
            // caps the first batch at three requests.
            let (req, handle) = CryptoRequest::with_callback(
                OperationKind::CipherEncrypt,
                KeySlotIndex::new(3),
                None,
                vec![i as u8; 256],
                Box::new(move |result| {
                    assert!(result.is_ok());
                    order.lock().unwrap().push(i);
                }),
            );
            ctx.enqueue(req);
            handles.push(handle);
        }
        wait_until("five queued", || ctx.queue_len() == 5);

        chan.complete_next(); // plug
        assert!(plug_handle.wait().is_ok());
        wait_until("batch one submitted", || chan.queued_len() == 1);
        chan.complete_next();
        wait_until("batch two submitted", || chan.queued_len() == 1);
        chan.complete_next();

        for (i, handle) in handles.into_iter().enumerate() {
            let data = handle.wait().unwrap();
            assert_eq!(data, vec![i as u8; 256]);
        }

        // Exactly two submissions for the five requests (plus the plug),
        // callbacks in original enqueue order across both batches.
        assert_eq!(ctx.stats().submissions, 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_submit_failure_fails_batch_and_frees_pools() {
        let chan = Arc::new(SimChannel::new(SimChannelConfig::default()));
        let ctx = DeviceContext::new(test_config(), chan.clone()).unwrap();

        let pools = Arc::clone(&ctx.shared.pools);
        let freed_before_callback = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let observed = Arc::clone(&freed_before_callback);

        chan.inject_failure();
        let (req, handle) = CryptoRequest::with_callback(
            OperationKind::CipherEncrypt,
            KeySlotIndex::new(3),
            None,
            vec![1, 2, 3],
            Box::new(move |result| {
                assert!(result.is_err());
                // Both pool slots are back before the error callback runs.
                observed.store(
                    pools.scratch.free_count() == 4 && pools.cmdbuf.free_count() == 4,
                    Ordering::SeqCst,
                );
            }),
        );
        ctx.enqueue(req);

        assert_eq!(handle.wait().unwrap_err(), Error::ChannelRejected);
        assert!(freed_before_callback.load(Ordering::SeqCst));
        assert_eq!(ctx.pools().scratch.free_count(), 4);
        assert_eq!(ctx.pools().cmdbuf.free_count(), 4);
        assert_eq!(ctx.stats().failed, 1);
    }

    #[test]
    fn test_oversized_request_fails_without_wedging() {
        let chan = Arc::new(SimChannel::new(SimChannelConfig {
            auto_complete: true,
            ..SimChannelConfig::default()
        }));
        let ctx = DeviceContext::new(test_config(), chan).unwrap();

        let (big, big_handle) = request(vec![0u8; 4096]);
        let (small, small_handle) = request(vec![0xAB; 16]);
        ctx.enqueue(big);
        ctx.enqueue(small);

        assert_eq!(big_handle.wait().unwrap_err(), Error::PayloadTooLarge);
        assert_eq!(small_handle.wait().unwrap(), vec![0xAB; 16]);
    }

    #[test]
    fn test_stale_completion_logged_without_pool_mutation() {
        let chan = Arc::new(SimChannel::new(SimChannelConfig::default()));
        let ctx = DeviceContext::new(test_config(), chan.clone()).unwrap();

        let free_scratch = ctx.pools().scratch.free_count();
        let free_cmdbuf = ctx.pools().cmdbuf.free_count();

        chan.raise_spurious(42);

        wait_until("stale completion counted", || {
            ctx.stats().stale_completions == 1
        });
        assert_eq!(ctx.pools().scratch.free_count(), free_scratch);
        assert_eq!(ctx.pools().cmdbuf.free_count(), free_cmdbuf);
    }

    #[test]
    fn test_timed_out_submission_reclaimed() {
        let chan = Arc::new(SimChannel::new(SimChannelConfig::default()));
        let config = EngineConfig {
            submit_timeout: Duration::from_millis(30),
            ..test_config()
        };
        let ctx = DeviceContext::new(config, chan.clone()).unwrap();

        // First request submits and its completion never arrives.
        let (stuck, stuck_handle) = request(vec![1; 8]);
        ctx.enqueue(stuck);
        wait_until("first submitted", || chan.queued_len() == 1);

        // The second batch's gate wait expires and reclaims the first.
        let (next, next_handle) = request(vec![2; 8]);
        ctx.enqueue(next);

        assert_eq!(stuck_handle.wait().unwrap_err(), Error::FenceTimeout);

        // The hardware later completes both queued submissions; the first's
        // notification is stale by then, the second's delivers normally.
        wait_until("second submitted", || chan.queued_len() == 2);
        chan.complete_all();
        assert_eq!(next_handle.wait().unwrap(), vec![2; 8]);

        let stats = ctx.stats();
        assert_eq!(stats.reclaimed, 1);
        assert_eq!(stats.stale_completions, 1);
    }

    #[test]
    fn test_sync_submit_round_trip() {
        let chan = Arc::new(SimChannel::new(SimChannelConfig {
            auto_complete: true,
            ..SimChannelConfig::default()
        }));
        let ctx = DeviceContext::new(test_config(), chan).unwrap();

        // The algorithm layer's one-off path: own slot, own chain, blocking
        // wait, caller frees the slot afterwards.
        let mut cmdbuf = ctx.pools().cmdbuf.allocate().unwrap();
        let extent = DmaSegment::new(DmaAddr::new(0xA000), 64);
        let desc = OperationDescriptor {
            kind: OperationKind::Digest,
            key_slot: KeySlotIndex::new(0),
            iv: None,
            src: core::slice::from_ref(&extent),
            dst: extent,
        };
        let mut seq = InstructionSequence::new(cmdbuf.capacity_words());
        ctx.sequencer()
            .append_operation(&mut seq, &desc, ChainFlags::FIRST | ChainFlags::LAST)
            .unwrap();
        cmdbuf.write(seq.words()).unwrap();

        let fence = ctx
            .submitter()
            .submit_sync(cmdbuf.words(), cmdbuf.dma_addr())
            .unwrap();
        assert_eq!(fence, 1);
        ctx.pools().cmdbuf.free(cmdbuf);
        assert_eq!(ctx.pools().cmdbuf.free_count(), 4);
    }

    #[test]
    fn test_sync_submit_times_out() {
        let chan = Arc::new(SimChannel::new(SimChannelConfig::default()));
        let config = EngineConfig {
            submit_timeout: Duration::from_millis(20),
            ..test_config()
        };
        let ctx = DeviceContext::new(config, chan).unwrap();

        let mut cmdbuf = ctx.pools().cmdbuf.allocate().unwrap();
        let extent = DmaSegment::new(DmaAddr::new(0xA000), 64);
        let desc = OperationDescriptor {
            kind: OperationKind::Digest,
            key_slot: KeySlotIndex::new(0),
            iv: None,
            src: core::slice::from_ref(&extent),
            dst: extent,
        };
        let mut seq = InstructionSequence::new(cmdbuf.capacity_words());
        ctx.sequencer()
            .append_operation(&mut seq, &desc, ChainFlags::FIRST | ChainFlags::LAST)
            .unwrap();
        cmdbuf.write(seq.words()).unwrap();

        let err = ctx
            .submitter()
            .submit_sync(cmdbuf.words(), cmdbuf.dma_addr())
            .unwrap_err();
        assert_eq!(err, Error::FenceTimeout);
        ctx.pools().cmdbuf.free(cmdbuf);
    }

    #[test]
    fn test_shutdown_fails_everything_pending() {
        let chan = Arc::new(SimChannel::new(SimChannelConfig::default()));
        let config = EngineConfig {
            submit_timeout: Duration::from_millis(50),
            ..test_config()
        };
        let ctx = DeviceContext::new(config, chan.clone()).unwrap();

        let mut handles = Vec::new();
        for i in 0..3 {
            let (req, handle) = request(vec![i; 32]);
            ctx.enqueue(req);
            handles.push(handle);
        }
        wait_until("first submission in flight", || chan.queued_len() >= 1);

        drop(ctx);

        // Exactly-once even across teardown: every handle resolves, with an
        // error.
        for handle in handles {
            assert!(handle.wait().is_err());
        }
    }

    #[test]
    fn test_key_slot_exhaustion_is_bounded() {
        let chan = Arc::new(SimChannel::new(SimChannelConfig::default()));
        let ctx = DeviceContext::new(test_config(), chan).unwrap();

        let mut held = Vec::new();
        while let Ok(handle) = ctx.pools().key_slots.try_allocate() {
            held.push(handle);
        }
        let started = std::time::Instant::now();
        let err = ctx.pools().key_slots.allocate().unwrap_err();
        assert_eq!(err, Error::PoolExhausted(PoolKind::KeySlot));
        assert!(started.elapsed() < Duration::from_secs(1));

        for handle in held {
            ctx.pools().key_slots.free(handle);
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let chan = Arc::new(SimChannel::new(SimChannelConfig::default()));
        let config = EngineConfig {
            max_batch: 0,
            ..EngineConfig::default()
        };
        assert!(DeviceContext::new(config, chan).is_err());
    }
}
