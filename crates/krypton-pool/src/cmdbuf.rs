//! # Command Buffer Pool
//!
//! Pre-allocated word arenas holding the instruction sequences handed to the
//! hardware channel. Same lifecycle discipline as the scratch pool: allocate
//! before building instructions, free only after the hardware consumed the
//! slot (completion) or the submission unwound.

use alloc::boxed::Box;
use alloc::vec;
use core::cell::UnsafeCell;

use krypton_core::{DmaAddr, Error, PoolKind, Result};

use crate::pool::{PoolConfig, PoolStats, SlotHandle, SlotPool};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Command-buffer pool configuration
#[derive(Debug, Clone)]
pub struct CmdBufConfig {
    /// Number of command-buffer slots
    pub slots: usize,
    /// Capacity of each slot in 32-bit words
    pub words_per_slot: usize,
    /// Pool scan/retry parameters
    pub pool: PoolConfig,
}

impl Default for CmdBufConfig {
    fn default() -> Self {
        Self {
            slots: 16,
            words_per_slot: 1024,
            pool: PoolConfig::new(PoolKind::CmdBuf, 16),
        }
    }
}

impl CmdBufConfig {
    /// Validate slot geometry against the pool config
    pub fn validate(&self) -> Result<()> {
        if self.words_per_slot == 0 || self.slots != self.pool.capacity {
            return Err(Error::InvalidParameter);
        }
        self.pool.validate()
    }
}

// =============================================================================
// COMMAND BUFFER HANDLE
// =============================================================================

/// Owned, move-only reference to one command-buffer slot
#[derive(Debug)]
pub struct CmdBufHandle {
    slot: usize,
    ptr: *mut u32,
    capacity_words: usize,
    len_words: usize,
    dma: DmaAddr,
}

// SAFETY: the handle is the sole reference to its word region; the bitmap
// guarantees no aliasing holder exists until it is freed.
unsafe impl Send for CmdBufHandle {}

impl CmdBufHandle {
    /// Slot index within the pool
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Bus address of the slot
    #[inline]
    pub fn dma_addr(&self) -> DmaAddr {
        self.dma
    }

    /// Slot capacity in words
    #[inline]
    pub fn capacity_words(&self) -> usize {
        self.capacity_words
    }

    /// Number of words written so far
    #[inline]
    pub fn len_words(&self) -> usize {
        self.len_words
    }

    /// Copy a finished instruction stream into the slot
    pub fn write(&mut self, words: &[u32]) -> Result<()> {
        if words.len() > self.capacity_words {
            return Err(Error::SequenceOverflow);
        }
        // SAFETY: exclusive ownership per the handle contract; length checked
        // against the slot capacity above.
        unsafe {
            core::ptr::copy_nonoverlapping(words.as_ptr(), self.ptr, words.len());
        }
        self.len_words = words.len();
        Ok(())
    }

    /// View the written instruction stream
    #[inline]
    pub fn words(&self) -> &[u32] {
        // SAFETY: exclusive ownership; len_words never exceeds capacity.
        unsafe { core::slice::from_raw_parts(self.ptr, self.len_words) }
    }
}

// =============================================================================
// COMMAND BUFFER POOL
// =============================================================================

/// Pool of command-buffer slots backed by one contiguous word arena
#[derive(Debug)]
pub struct CmdBufPool {
    pool: SlotPool,
    arena: UnsafeCell<Box<[u32]>>,
    dma_base: DmaAddr,
    words_per_slot: usize,
}

// SAFETY: the arena is only ever touched through `CmdBufHandle`s, and the
// atomic bitmap hands each slot's region to at most one holder at a time.
unsafe impl Sync for CmdBufPool {}
// SAFETY: ownership of the arena moves with the pool; no thread affinity.
unsafe impl Send for CmdBufPool {}

impl CmdBufPool {
    /// Create the pool; slot N sits at `dma_base + N * words_per_slot * 4`
    pub fn new(config: CmdBufConfig, dma_base: DmaAddr) -> Result<Self> {
        config.validate()?;
        let arena = vec![0u32; config.slots * config.words_per_slot].into_boxed_slice();
        Ok(Self {
            pool: SlotPool::new(config.pool)?,
            arena: UnsafeCell::new(arena),
            dma_base,
            words_per_slot: config.words_per_slot,
        })
    }

    /// Capacity of each slot in words
    #[inline]
    pub fn words_per_slot(&self) -> usize {
        self.words_per_slot
    }

    /// Number of slots currently free
    #[inline]
    pub fn free_count(&self) -> usize {
        self.pool.free_count()
    }

    /// Allocate a slot with bounded retry
    #[cfg(feature = "std")]
    pub fn allocate(&self) -> Result<CmdBufHandle> {
        self.pool.allocate().map(|h| self.wrap(h))
    }

    /// Allocate a slot without retrying
    pub fn try_allocate(&self) -> Result<CmdBufHandle> {
        self.pool.try_allocate().map(|h| self.wrap(h))
    }

    /// Return a slot to the pool
    pub fn free(&self, handle: CmdBufHandle) {
        self.pool.free(SlotPool::handle_from_index(handle.slot));
    }

    /// Snapshot pool counters
    #[inline]
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    fn wrap(&self, slot: SlotHandle) -> CmdBufHandle {
        let index = slot.index();
        let offset = index * self.words_per_slot;
        // SAFETY: index < capacity, so the offset stays inside the arena;
        // the resulting region is disjoint from every other slot's region.
        let ptr = unsafe { (*self.arena.get()).as_mut_ptr().add(offset) };
        let _ = slot;
        CmdBufHandle {
            slot: index,
            ptr,
            capacity_words: self.words_per_slot,
            len_words: 0,
            dma: self.dma_base.offset((offset * 4) as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn small_pool() -> CmdBufPool {
        let config = CmdBufConfig {
            slots: 2,
            words_per_slot: 8,
            pool: PoolConfig::new(PoolKind::CmdBuf, 2),
        };
        CmdBufPool::new(config, DmaAddr::new(0x9000_0000)).unwrap()
    }

    #[test]
    fn test_write_and_read_back() {
        let pool = small_pool();
        let mut handle = pool.try_allocate().unwrap();
        handle.write(&[1, 2, 3]).unwrap();
        assert_eq!(handle.words(), &[1, 2, 3]);
        assert_eq!(handle.len_words(), 3);
        pool.free(handle);
    }

    #[test]
    fn test_overlong_stream_rejected() {
        let pool = small_pool();
        let mut handle = pool.try_allocate().unwrap();
        let too_long: Vec<u32> = (0..9).collect();
        assert_eq!(handle.write(&too_long), Err(Error::SequenceOverflow));
        pool.free(handle);
    }

    #[test]
    fn test_slot_dma_spacing() {
        let pool = small_pool();
        let a = pool.try_allocate().unwrap();
        let b = pool.try_allocate().unwrap();
        let distance = a.dma_addr().raw().abs_diff(b.dma_addr().raw());
        assert_eq!(distance, 8 * 4);
        pool.free(a);
        pool.free(b);
    }
}
