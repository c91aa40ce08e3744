//! # Key Slot Pool
//!
//! Hardware key-storage slots. A small number of indices are permanently
//! reserved for fixed purposes and never enter the free pool; contexts that
//! need one obtain a binding through a separate path that bypasses the pool.

use krypton_core::{Error, KeySlotIndex, PoolKind, Result};

use crate::pool::{PoolConfig, PoolStats, SlotPool};

// =============================================================================
// KEY SLOT LAYOUT
// =============================================================================

/// Number of hardware key slots
pub const KEY_SLOT_COUNT: usize = 16;

/// Key slots withheld from the free pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReservedKeySlot {
    /// Device-secret slot programmed at boot
    Secure = 0,
    /// Slot backed by an in-memory key manifest rather than fused storage
    ScratchKey = 15,
}

impl ReservedKeySlot {
    /// The reserved slot's index
    #[inline]
    pub const fn index(self) -> KeySlotIndex {
        KeySlotIndex::new(self as u8)
    }
}

const fn reserved_mask() -> u64 {
    (1u64 << ReservedKeySlot::Secure as u8) | (1u64 << ReservedKeySlot::ScratchKey as u8)
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Key-slot pool configuration
#[derive(Debug, Clone)]
pub struct KeySlotConfig {
    /// Pool scan/retry parameters
    pub pool: PoolConfig,
}

impl Default for KeySlotConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::new(PoolKind::KeySlot, KEY_SLOT_COUNT),
        }
    }
}

// =============================================================================
// HANDLES
// =============================================================================

/// Owned, move-only reference to an allocated key slot.
///
/// Held by exactly one algorithm context from set-key until context
/// destruction or rekey.
#[derive(Debug)]
pub struct KeySlotHandle {
    index: KeySlotIndex,
}

impl KeySlotHandle {
    /// The slot's hardware index
    #[inline]
    pub fn index(&self) -> KeySlotIndex {
        self.index
    }
}

/// Binding to a permanently reserved key slot.
///
/// Obtained outside the pool; carries no pool bookkeeping and therefore may
/// be copied freely and never needs freeing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservedBinding {
    index: KeySlotIndex,
}

impl ReservedBinding {
    /// The bound slot's hardware index
    #[inline]
    pub const fn index(&self) -> KeySlotIndex {
        self.index
    }
}

// =============================================================================
// KEY SLOT POOL
// =============================================================================

/// Pool of allocatable hardware key slots
#[derive(Debug)]
pub struct KeySlotPool {
    pool: SlotPool,
}

impl KeySlotPool {
    /// Create the pool with the reserved indices withheld
    pub fn new(config: KeySlotConfig) -> Result<Self> {
        if config.pool.capacity != KEY_SLOT_COUNT {
            return Err(Error::InvalidParameter);
        }
        Ok(Self {
            pool: SlotPool::with_reserved(config.pool, reserved_mask())?,
        })
    }

    /// Allocate a key slot with bounded retry
    #[cfg(feature = "std")]
    pub fn allocate(&self) -> Result<KeySlotHandle> {
        self.pool.allocate().map(|h| KeySlotHandle {
            index: KeySlotIndex::new(h.index() as u8),
        })
    }

    /// Allocate a key slot without retrying
    pub fn try_allocate(&self) -> Result<KeySlotHandle> {
        self.pool.try_allocate().map(|h| KeySlotHandle {
            index: KeySlotIndex::new(h.index() as u8),
        })
    }

    /// Release a key slot (context destroyed or rekeyed)
    pub fn free(&self, handle: KeySlotHandle) {
        self.pool
            .free(SlotPool::handle_from_index(handle.index.raw() as usize));
    }

    /// Bind to a reserved slot, bypassing the pool
    pub fn bind_reserved(&self, slot: ReservedKeySlot) -> ReservedBinding {
        ReservedBinding {
            index: slot.index(),
        }
    }

    /// Number of allocatable slots currently free
    #[inline]
    pub fn free_count(&self) -> usize {
        self.pool.free_count()
    }

    /// Snapshot pool counters
    #[inline]
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn test_reserved_slots_never_allocated() {
        let pool = KeySlotPool::new(KeySlotConfig::default()).unwrap();
        let mut handles = Vec::new();
        while let Ok(handle) = pool.try_allocate() {
            handles.push(handle);
        }
        // 16 slots minus the two reserved indices.
        assert_eq!(handles.len(), KEY_SLOT_COUNT - 2);
        for handle in &handles {
            let raw = handle.index().raw();
            assert_ne!(raw, ReservedKeySlot::Secure as u8);
            assert_ne!(raw, ReservedKeySlot::ScratchKey as u8);
        }
        for handle in handles {
            pool.free(handle);
        }
    }

    #[test]
    fn test_bind_reserved_bypasses_pool() {
        let pool = KeySlotPool::new(KeySlotConfig::default()).unwrap();
        let before = pool.free_count();
        let binding = pool.bind_reserved(ReservedKeySlot::Secure);
        assert_eq!(binding.index().raw(), 0);
        assert_eq!(pool.free_count(), before);
    }

    #[test]
    fn test_exhaustion_then_release_cycle() {
        let pool = KeySlotPool::new(KeySlotConfig::default()).unwrap();
        let handles: Vec<_> = (0..KEY_SLOT_COUNT - 2)
            .map(|_| pool.try_allocate().unwrap())
            .collect();
        assert!(matches!(
            pool.try_allocate(),
            Err(Error::PoolExhausted(PoolKind::KeySlot))
        ));
        for handle in handles {
            pool.free(handle);
        }
        assert!(pool.try_allocate().is_ok());
    }
}
