//! # Scratch Buffer Pool
//!
//! Pre-allocated, DMA-capable staging regions. The batching worker copies
//! request payloads into one scratch buffer contiguously so the hardware
//! sees a single extent; the completion dispatcher copies results back out
//! and returns the buffer.

use alloc::boxed::Box;
use alloc::vec;
use core::cell::UnsafeCell;

use krypton_core::{DmaAddr, Error, PoolKind, Result};

use crate::pool::{PoolConfig, PoolStats, SlotHandle, SlotPool};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Scratch pool configuration
#[derive(Debug, Clone)]
pub struct ScratchConfig {
    /// Number of scratch buffers
    pub buffers: usize,
    /// Size of each buffer in bytes
    pub buffer_size: usize,
    /// Pool scan/retry parameters
    pub pool: PoolConfig,
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            buffers: 8,
            buffer_size: 64 * 1024,
            pool: PoolConfig::new(PoolKind::Scratch, 8),
        }
    }
}

impl ScratchConfig {
    /// Validate buffer geometry against the pool config
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 || self.buffers != self.pool.capacity {
            return Err(Error::InvalidParameter);
        }
        self.pool.validate()
    }
}

// =============================================================================
// SCRATCH HANDLE
// =============================================================================

/// Owned, move-only reference to one scratch buffer.
///
/// Grants exclusive access to the buffer's bytes for as long as the handle
/// lives; the pool hands a slot to at most one holder at a time.
#[derive(Debug)]
pub struct ScratchHandle {
    slot: usize,
    ptr: *mut u8,
    capacity: usize,
    dma: DmaAddr,
}

// SAFETY: the handle is the sole reference to its buffer region; the bitmap
// guarantees no aliasing holder exists until it is freed.
unsafe impl Send for ScratchHandle {}

impl ScratchHandle {
    /// Slot index within the pool
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Bus address of the buffer
    #[inline]
    pub fn dma_addr(&self) -> DmaAddr {
        self.dma
    }

    /// Buffer capacity in bytes
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// View the staged bytes
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: exclusive ownership per the handle contract; the region
        // stays alive for the pool's lifetime, which outlives every handle.
        unsafe { core::slice::from_raw_parts(self.ptr, self.capacity) }
    }

    /// Stage bytes into the buffer
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, plus `&mut self` forbids concurrent readers.
        unsafe { core::slice::from_raw_parts_mut(self.ptr, self.capacity) }
    }
}

// =============================================================================
// SCRATCH POOL
// =============================================================================

/// Pool of DMA staging buffers backed by one contiguous arena
#[derive(Debug)]
pub struct ScratchPool {
    pool: SlotPool,
    arena: UnsafeCell<Box<[u8]>>,
    dma_base: DmaAddr,
    buffer_size: usize,
}

// SAFETY: the arena is only ever touched through `ScratchHandle`s, and the
// atomic bitmap hands each slot's region to at most one holder at a time.
unsafe impl Sync for ScratchPool {}
// SAFETY: ownership of the arena moves with the pool; no thread affinity.
unsafe impl Send for ScratchPool {}

impl ScratchPool {
    /// Create the pool.
    ///
    /// `dma_base` is the bus address the platform layer mapped the arena at;
    /// slot N's buffer sits at `dma_base + N * buffer_size`.
    pub fn new(config: ScratchConfig, dma_base: DmaAddr) -> Result<Self> {
        config.validate()?;
        let arena = vec![0u8; config.buffers * config.buffer_size].into_boxed_slice();
        Ok(Self {
            pool: SlotPool::new(config.pool)?,
            arena: UnsafeCell::new(arena),
            dma_base,
            buffer_size: config.buffer_size,
        })
    }

    /// Size of each buffer in bytes
    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Number of buffers currently free
    #[inline]
    pub fn free_count(&self) -> usize {
        self.pool.free_count()
    }

    /// Allocate a buffer with bounded retry
    #[cfg(feature = "std")]
    pub fn allocate(&self) -> Result<ScratchHandle> {
        self.pool.allocate().map(|h| self.wrap(h))
    }

    /// Allocate a buffer without retrying
    pub fn try_allocate(&self) -> Result<ScratchHandle> {
        self.pool.try_allocate().map(|h| self.wrap(h))
    }

    /// Return a buffer to the pool
    pub fn free(&self, handle: ScratchHandle) {
        self.pool.free(SlotPool::handle_from_index(handle.slot));
    }

    /// Snapshot pool counters
    #[inline]
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    fn wrap(&self, slot: SlotHandle) -> ScratchHandle {
        let index = slot.index();
        let offset = index * self.buffer_size;
        // SAFETY: index < capacity, so the offset stays inside the arena;
        // the resulting region is disjoint from every other slot's region.
        let ptr = unsafe { (*self.arena.get()).as_mut_ptr().add(offset) };
        // The SlotHandle's bookkeeping is carried by the ScratchHandle from
        // here on; the index round-trips through `free`.
        let _ = slot;
        ScratchHandle {
            slot: index,
            ptr,
            capacity: self.buffer_size,
            dma: self.dma_base.offset(offset as u64),
        }
    }
}
