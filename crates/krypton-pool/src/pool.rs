//! # Slot Pool
//!
//! The generic fixed-capacity pool underneath all three resource pools.
//!
//! Availability lives in one atomic bitmap word, so allocate and free are
//! lock-free and safe to call from the completion-notification context.
//! Round-robin scanning starts just past the last handed-out index.

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use core::time::Duration;

use krypton_core::{Error, PoolKind, Result};

// =============================================================================
// POOL LIMITS
// =============================================================================

/// Maximum slots a pool can manage (one bitmap word)
pub const MAX_POOL_SLOTS: usize = 64;

static_assertions::const_assert!(MAX_POOL_SLOTS <= u64::BITS as usize);

// =============================================================================
// POOL CONFIGURATION
// =============================================================================

/// Slot pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Which resource this pool manages (for error tagging and logs)
    pub kind: PoolKind,
    /// Number of slots
    pub capacity: usize,
    /// Sleep between retry passes of the blocking allocator
    pub retry_interval: Duration,
    /// Wall-clock bound on the blocking allocator
    pub retry_timeout: Duration,
}

impl PoolConfig {
    /// Create a config with the default retry cadence
    pub const fn new(kind: PoolKind, capacity: usize) -> Self {
        Self {
            kind,
            capacity,
            retry_interval: Duration::from_micros(200),
            retry_timeout: Duration::from_millis(20),
        }
    }

    /// Validate capacity bounds
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 || self.capacity > MAX_POOL_SLOTS {
            return Err(Error::InvalidParameter);
        }
        Ok(())
    }
}

// =============================================================================
// SLOT HANDLE
// =============================================================================

/// Owned reference to an allocated slot.
///
/// Move-only: the type has no `Copy`/`Clone`, so a handle can be returned to
/// the pool at most once without going through `free` twice in source code.
#[derive(Debug, PartialEq, Eq)]
pub struct SlotHandle {
    index: usize,
}

impl SlotHandle {
    /// Slot index within the pool
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }
}

// =============================================================================
// POOL STATISTICS
// =============================================================================

/// Snapshot of pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Successful allocations
    pub allocs: u64,
    /// Frees
    pub frees: u64,
    /// Retry passes taken by the blocking allocator
    pub retries: u64,
    /// Allocations that failed after the retry window
    pub exhaustions: u64,
    /// Frees of slots that were already free
    pub double_frees: u64,
}

#[derive(Debug, Default)]
struct PoolCounters {
    allocs: AtomicU64,
    frees: AtomicU64,
    retries: AtomicU64,
    exhaustions: AtomicU64,
    double_frees: AtomicU64,
}

// =============================================================================
// SLOT POOL
// =============================================================================

/// Fixed-capacity slot pool with round-robin allocation
#[derive(Debug)]
pub struct SlotPool {
    config: PoolConfig,
    /// Bit set = slot taken. Reserved bits are pre-set and never cleared.
    bitmap: AtomicU64,
    /// Bits that never enter the free pool
    reserved: u64,
    /// Last handed-out index; the next scan starts just past it
    cursor: AtomicUsize,
    counters: PoolCounters,
}

impl SlotPool {
    /// Create a pool with every slot free
    pub fn new(config: PoolConfig) -> Result<Self> {
        Self::with_reserved(config, 0)
    }

    /// Create a pool with `reserved` bits permanently withheld
    pub fn with_reserved(config: PoolConfig, reserved: u64) -> Result<Self> {
        config.validate()?;
        let valid = mask(config.capacity);
        if reserved & !valid != 0 {
            return Err(Error::InvalidParameter);
        }
        Ok(Self {
            bitmap: AtomicU64::new(reserved),
            reserved,
            cursor: AtomicUsize::new(config.capacity - 1),
            config,
            counters: PoolCounters::default(),
        })
    }

    /// Pool capacity (including reserved slots)
    #[inline]
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Which resource this pool manages
    #[inline]
    pub fn kind(&self) -> PoolKind {
        self.config.kind
    }

    /// Whether `index` is permanently reserved
    #[inline]
    pub fn is_reserved(&self, index: usize) -> bool {
        index < self.config.capacity && self.reserved & bit(index) != 0
    }

    /// Whether `index` is currently allocated (reserved slots count as taken)
    #[inline]
    pub fn is_allocated(&self, index: usize) -> bool {
        index < self.config.capacity && self.bitmap.load(Ordering::Acquire) & bit(index) != 0
    }

    /// Number of slots currently handed out (excluding reserved)
    pub fn used_count(&self) -> usize {
        (self.bitmap.load(Ordering::Acquire) & !self.reserved).count_ones() as usize
    }

    /// Number of slots currently free
    pub fn free_count(&self) -> usize {
        self.config.capacity - self.reserved.count_ones() as usize - self.used_count()
    }

    /// One round-robin pass over the bitmap.
    ///
    /// Returns `PoolExhausted` immediately if no slot is free; never sleeps.
    pub fn try_allocate(&self) -> Result<SlotHandle> {
        let cap = self.config.capacity;
        let start = (self.cursor.load(Ordering::Relaxed) + 1) % cap;

        for i in 0..cap {
            let index = (start + i) % cap;
            let b = bit(index);
            if self.reserved & b != 0 {
                continue;
            }
            if self.bitmap.fetch_or(b, Ordering::AcqRel) & b == 0 {
                self.cursor.store(index, Ordering::Relaxed);
                self.counters.allocs.fetch_add(1, Ordering::Relaxed);
                return Ok(SlotHandle { index });
            }
        }

        Err(Error::PoolExhausted(self.config.kind))
    }

    /// Allocate with bounded retry.
    ///
    /// Retries `try_allocate` with a short sleep until the configured
    /// wall-clock deadline, then reports exhaustion. Exhaustion is always
    /// recoverable for the caller; it is never treated as fatal here.
    #[cfg(feature = "std")]
    pub fn allocate(&self) -> Result<SlotHandle> {
        let deadline = std::time::Instant::now() + self.config.retry_timeout;
        loop {
            match self.try_allocate() {
                Ok(handle) => return Ok(handle),
                Err(err) => {
                    if std::time::Instant::now() >= deadline {
                        self.counters.exhaustions.fetch_add(1, Ordering::Relaxed);
                        log::debug!(
                            "{} pool exhausted after {:?}",
                            self.config.kind,
                            self.config.retry_timeout
                        );
                        return Err(err);
                    }
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    std::thread::sleep(self.config.retry_interval);
                }
            }
        }
    }

    /// Return a slot to the pool, consuming its handle.
    ///
    /// A handle for a slot that is already free indicates broken ownership
    /// discipline upstream; it is logged and the bitmap is left untouched
    /// (the clear is idempotent, so pool state cannot be corrupted).
    pub fn free(&self, handle: SlotHandle) {
        let b = bit(handle.index);
        debug_assert_eq!(self.reserved & b, 0);
        let prev = self.bitmap.fetch_and(!b, Ordering::AcqRel);
        if prev & b == 0 {
            self.counters.double_frees.fetch_add(1, Ordering::Relaxed);
            log::error!(
                "double free of {} slot {}",
                self.config.kind,
                handle.index
            );
            return;
        }
        self.counters.frees.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the pool counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocs: self.counters.allocs.load(Ordering::Relaxed),
            frees: self.counters.frees.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            exhaustions: self.counters.exhaustions.load(Ordering::Relaxed),
            double_frees: self.counters.double_frees.load(Ordering::Relaxed),
        }
    }

    /// Rebuild a handle from a raw index.
    ///
    /// For the typed pools layered on top, which split a handle from its
    /// backing storage and rejoin them at free time.
    pub(crate) fn handle_from_index(index: usize) -> SlotHandle {
        SlotHandle { index }
    }
}

#[inline]
const fn bit(index: usize) -> u64 {
    1u64 << index
}

#[inline]
const fn mask(capacity: usize) -> u64 {
    if capacity >= 64 {
        u64::MAX
    } else {
        (1u64 << capacity) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn quick_config(capacity: usize) -> PoolConfig {
        PoolConfig {
            kind: PoolKind::Scratch,
            capacity,
            retry_interval: Duration::from_micros(50),
            retry_timeout: Duration::from_millis(2),
        }
    }

    #[test]
    fn test_conservation_under_alloc_free() {
        let pool = SlotPool::new(quick_config(4)).unwrap();

        let mut held = Vec::new();
        for _ in 0..4 {
            held.push(pool.try_allocate().unwrap());
        }
        assert_eq!(pool.used_count(), 4);
        assert!(pool.try_allocate().is_err());

        // All outstanding handles are distinct.
        let mut indices: Vec<usize> = held.iter().map(|h| h.index()).collect();
        indices.sort_unstable();
        indices.dedup();
        assert_eq!(indices.len(), 4);

        for handle in held {
            pool.free(handle);
        }
        assert_eq!(pool.used_count(), 0);
    }

    #[test]
    fn test_round_robin_visits_every_slot() {
        let capacity = 5;
        let pool = SlotPool::new(quick_config(capacity)).unwrap();

        let mut seen = [false; 5];
        for _ in 0..capacity {
            let handle = pool.try_allocate().unwrap();
            seen[handle.index()] = true;
            pool.free(handle);
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_exhaustion_reports_without_hang() {
        let pool = SlotPool::new(quick_config(2)).unwrap();
        let a = pool.try_allocate().unwrap();
        let b = pool.try_allocate().unwrap();

        let started = std::time::Instant::now();
        let err = pool.allocate().unwrap_err();
        assert_eq!(err, Error::PoolExhausted(PoolKind::Scratch));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(pool.stats().exhaustions >= 1);

        pool.free(a);
        pool.free(b);
    }

    #[test]
    fn test_allocate_succeeds_after_retry() {
        use std::sync::Arc;

        let pool = Arc::new(SlotPool::new(PoolConfig {
            retry_timeout: Duration::from_millis(500),
            ..quick_config(1)
        })
        .unwrap());
        let handle = pool.try_allocate().unwrap();

        let releaser = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(5));
                pool.free(handle);
            })
        };

        let reacquired = pool.allocate().unwrap();
        assert_eq!(reacquired.index(), 0);
        releaser.join().unwrap();
        pool.free(reacquired);
    }

    #[test]
    fn test_double_free_is_idempotent() {
        let pool = SlotPool::new(quick_config(2)).unwrap();
        let handle = pool.try_allocate().unwrap();
        let index = handle.index();
        pool.free(handle);

        // Simulate a stale handle reappearing.
        pool.free(SlotPool::handle_from_index(index));
        assert_eq!(pool.stats().double_frees, 1);
        assert_eq!(pool.used_count(), 0);

        // The slot is still usable afterwards.
        let again = pool.try_allocate().unwrap();
        pool.free(again);
    }

    #[test]
    fn test_reserved_bits_never_handed_out() {
        let pool = SlotPool::with_reserved(quick_config(4), 0b0101).unwrap();
        let a = pool.try_allocate().unwrap();
        let b = pool.try_allocate().unwrap();
        assert!(a.index() == 1 || a.index() == 3);
        assert!(b.index() == 1 || b.index() == 3);
        assert!(pool.try_allocate().is_err());
        pool.free(a);
        pool.free(b);
    }

    #[test]
    fn test_invalid_configs_rejected() {
        assert!(SlotPool::new(quick_config(0)).is_err());
        assert!(SlotPool::new(quick_config(65)).is_err());
        assert!(SlotPool::with_reserved(quick_config(4), 0b1_0000).is_err());
    }
}
