//! # Batching Worker
//!
//! The single drain loop per device: pulls FIFO batches from the admission
//! queue, stages their payloads into one scratch buffer, sequences the whole
//! batch into one command-buffer slot, and submits it asynchronously.
//!
//! The worker doubles as the async-completion watchdog: before each
//! submission it bounds its wait for the in-flight gate, and on expiry it
//! reclaims the wedged submission so the device keeps making progress.

use std::sync::Arc;

use krypton_cmd::{ChainFlags, OperationDescriptor};
use krypton_cmd::sequence::InstructionSequence;
use krypton_core::{DmaSegment, Error};

use crate::device::EngineShared;
use crate::dispatch::{Submission, SubmissionPart, SubmissionState};
use crate::request::CryptoRequest;

/// Worker thread entry point
pub(crate) fn run(shared: Arc<EngineShared>) {
    log::debug!("batching worker started");
    loop {
        if !shared.queue.wait_for_work() {
            break;
        }
        loop {
            if shared.queue.len() == 0 {
                break;
            }

            // Bound the wait for the in-flight slot before pulling, so the
            // batch window stays open while the previous submission drains.
            // If its completion never arrives, reclaim it and move on.
            if !shared.gate.wait_free(shared.config.submit_timeout)
                && shared.dispatcher.reclaim_oldest(Error::FenceTimeout)
            {
                log::warn!("in-flight submission timed out; reclaimed");
            }

            let pulled = shared
                .queue
                .pull_batch(shared.config.max_batch, shared.pools.scratch.buffer_size());

            for request in pulled.oversized {
                log::warn!(
                    "request payload of {} bytes exceeds scratch capacity",
                    request.payload_len()
                );
                request.fail(Error::PayloadTooLarge);
            }

            if !pulled.batch.is_empty() {
                run_batch(&shared, pulled.batch);
            }
        }
        shared.queue.set_idle();
    }
    log::debug!("batching worker stopped");
}

/// Build and submit one batch; on any failure every request in the batch
/// completes with that error and every claimed resource is back in its pool
/// before the error completions fire.
fn run_batch(shared: &Arc<EngineShared>, batch: Vec<CryptoRequest>) {
    let mut scratch = match shared.pools.scratch.allocate() {
        Ok(scratch) => scratch,
        Err(err) => return fail_batch(batch, err),
    };

    // Stage payloads contiguously, remembering each request's extent for
    // result splitting at completion time.
    let mut extents = Vec::with_capacity(batch.len());
    {
        let staging = scratch.as_mut_slice();
        let mut offset = 0usize;
        for request in &batch {
            let len = request.payload.len();
            staging[offset..offset + len].copy_from_slice(&request.payload);
            extents.push((offset, len));
            offset += len;
        }
    }

    let mut cmdbuf = match shared.pools.cmdbuf.allocate() {
        Ok(cmdbuf) => cmdbuf,
        Err(err) => {
            shared.pools.scratch.free(scratch);
            return fail_batch(batch, err);
        }
    };

    // One sequencer chain across the batch: LAST only on the final request,
    // which also closes the chain with the fence increment.
    let mut seq = InstructionSequence::new(cmdbuf.capacity_words());
    let last = batch.len() - 1;
    let mut build_result = Ok(());
    for (i, request) in batch.iter().enumerate() {
        let (offset, len) = extents[i];
        let extent = DmaSegment::new(scratch.dma_addr().offset(offset as u64), len as u32);
        let desc = OperationDescriptor {
            kind: request.kind,
            key_slot: request.key_slot,
            iv: request.iv,
            src: core::slice::from_ref(&extent),
            dst: extent,
        };
        let mut chain = ChainFlags::empty();
        if i == 0 {
            chain |= ChainFlags::FIRST;
        }
        if i == last {
            chain |= ChainFlags::LAST;
        }
        if let Err(err) = shared.sequencer.append_operation(&mut seq, &desc, chain) {
            build_result = Err(err);
            break;
        }
    }
    if build_result.is_ok() {
        build_result = cmdbuf.write(seq.words());
    }
    if let Err(err) = build_result {
        shared.pools.cmdbuf.free(cmdbuf);
        shared.pools.scratch.free(scratch);
        return fail_batch(batch, err);
    }

    let parts = batch
        .into_iter()
        .zip(extents)
        .map(|(request, (offset, len))| SubmissionPart {
            offset,
            len,
            completion: request.completion,
        })
        .collect();

    let submission = Submission {
        fence: 0,
        cmdbuf,
        scratch: Some(scratch),
        parts,
        state: SubmissionState::Submitted,
    };

    match shared.submitter.submit_async(submission) {
        Ok(fence) => log::debug!("batch submitted at fence {}", fence),
        // The submitter already retired the submission: resources released,
        // every request completed with the error.
        Err(err) => log::warn!("batch submission failed: {}", err),
    }
}

/// Complete every request in a failed batch, in FIFO order
fn fail_batch(batch: Vec<CryptoRequest>, err: Error) {
    log::warn!("failing batch of {}: {}", batch.len(), err);
    for request in batch {
        request.fail(err);
    }
}
