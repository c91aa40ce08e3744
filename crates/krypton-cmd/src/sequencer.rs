//! # Command Sequencer
//!
//! Chain composition: turns a batch of logical operations into one
//! instruction stream. Pure over its inputs and the generation's register
//! table; no I/O, no resource-pool access.
//!
//! The sequencer owns three invariants:
//! - a payload spanning more scatter/gather segments than one operation
//!   instruction can address is split across several instructions
//! - exactly one instruction in the whole chain carries LAST_BUFFER
//! - the chain ends with exactly one fence-increment instruction

use arrayvec::ArrayVec;
use bitflags::bitflags;

use krypton_core::{
    DmaSegment, EngineGeneration, Error, IvSeed, KeySlotIndex, OperationKind, Result,
    MAX_OP_SEGMENTS,
};

use crate::encoder::encoder_for;
use crate::regs::{op, RegisterMap};
use crate::sequence::InstructionSequence;

// =============================================================================
// CHAIN FLAGS
// =============================================================================

bitflags! {
    /// Position of an operation within a submission chain
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChainFlags: u8 {
        /// First operation of the chain
        const FIRST = 1 << 0;
        /// Last operation of the chain (closes it with the fence increment)
        const LAST = 1 << 1;
    }
}

// =============================================================================
// OPERATION DESCRIPTOR
// =============================================================================

/// One logical operation to append to a chain
#[derive(Debug, Clone)]
pub struct OperationDescriptor<'a> {
    /// Algorithm tag (routes to the matching encoder)
    pub kind: OperationKind,
    /// Hardware key slot the operation uses
    pub key_slot: KeySlotIndex,
    /// IV/counter seed, if the mode takes one
    pub iv: Option<IvSeed>,
    /// Source scatter/gather list
    pub src: &'a [DmaSegment],
    /// Destination extent (staged contiguously)
    pub dst: DmaSegment,
}

// =============================================================================
// SEQUENCER
// =============================================================================

/// Chain-composing command sequencer for one hardware generation
#[derive(Debug, Clone, Copy)]
pub struct Sequencer {
    map: &'static RegisterMap,
    max_segments: usize,
}

impl Sequencer {
    /// Create a sequencer for a hardware generation
    pub fn new(generation: EngineGeneration) -> Self {
        Self {
            map: RegisterMap::for_generation(generation),
            max_segments: generation.max_op_segments(),
        }
    }

    /// The generation's register table
    #[inline]
    pub fn register_map(&self) -> &'static RegisterMap {
        self.map
    }

    /// Append one logical operation to the chain.
    ///
    /// Delegates algorithm framing to the operation's encoder, then emits one
    /// operation instruction per segment group. When `chain` contains `LAST`,
    /// the final operation instruction carries LAST_BUFFER and the fence
    /// increment is appended behind it.
    pub fn append_operation(
        &self,
        seq: &mut InstructionSequence,
        desc: &OperationDescriptor<'_>,
        chain: ChainFlags,
    ) -> Result<()> {
        if desc.src.is_empty() || desc.dst.len == 0 {
            return Err(Error::InvalidParameter);
        }

        encoder_for(desc.kind).encode_setup(self.map, desc, seq)?;

        // Destination extent is programmed once; split source instructions
        // stream into it in order.
        seq.push_incr(self.map.dst, &segment_words(&desc.dst))?;

        let groups = desc.src.chunks(self.max_segments);
        let last_group = groups.len() - 1;
        if last_group > 0 {
            log::trace!(
                "splitting {} segments across {} operation instructions",
                desc.src.len(),
                last_group + 1
            );
        }
        for (gi, group) in groups.enumerate() {
            let mut words: ArrayVec<u32, { MAX_OP_SEGMENTS * 3 }> = ArrayVec::new();
            for seg in group {
                words.extend(segment_words(seg));
            }
            seq.push_incr(self.map.src_seg_at(0), &words)?;

            let mut trigger = op::START;
            if gi > 0 {
                trigger |= op::CONTINUE;
            }
            if gi == last_group && chain.contains(ChainFlags::LAST) {
                trigger |= op::LAST_BUFFER;
            }
            seq.push_nonincr(self.map.operation, &[trigger])?;
        }

        if chain.contains(ChainFlags::LAST) {
            self.append_fence_increment(seq)?;
        }
        Ok(())
    }

    /// Append the chain-closing fence increment.
    ///
    /// Public for callers composing a chain by hand (the synchronous one-off
    /// submission path); `append_operation` emits it itself for `LAST`.
    pub fn append_fence_increment(&self, seq: &mut InstructionSequence) -> Result<()> {
        seq.push_nonincr(self.map.fence_incr, &[1])
    }
}

#[inline]
fn segment_words(seg: &DmaSegment) -> [u32; 3] {
    [
        seg.addr.raw() as u32,
        (seg.addr.raw() >> 32) as u32,
        seg.len,
    ]
}
