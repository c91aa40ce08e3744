//! # KRYPTON Resource Pools
//!
//! Fixed-capacity pools for the three scarce hardware resources: key slots,
//! scratch (bounce) buffers, and command-buffer slots.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     KRYPTON Resource Pools                      │
//! │                                                                 │
//! │  ┌──────────────┐   ┌───────────────┐   ┌───────────────────┐   │
//! │  │  KeySlotPool │   │  ScratchPool  │   │    CmdBufPool     │   │
//! │  │  (≤16 slots, │   │ (DMA staging  │   │ (instruction word │   │
//! │  │   reserved   │   │    arenas)    │   │      arenas)      │   │
//! │  │   indices)   │   │               │   │                   │   │
//! │  └──────┬───────┘   └───────┬───────┘   └─────────┬─────────┘   │
//! │         └───────────────────┼─────────────────────┘             │
//! │                     ┌───────▼───────┐                           │
//! │                     │    SlotPool   │                           │
//! │                     │ (atomic bitmap│                           │
//! │                     │  round-robin) │                           │
//! │                     └───────────────┘                           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Allocation Discipline
//!
//! Allocation scans round-robin from just past the last handed-out index so
//! sustained load does not starve the same low indices. A single pass that
//! finds nothing free reports exhaustion; the blocking variant retries with
//! a short sleep under a wall-clock deadline. Handles are move-only and are
//! consumed by `free`; returning a slot that is already free is logged and
//! leaves the bitmap untouched.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

#[cfg(any(feature = "std", test))]
extern crate std;

pub mod cmdbuf;
pub mod keyslot;
pub mod pool;
pub mod scratch;

// Re-exports
pub use cmdbuf::{CmdBufConfig, CmdBufHandle, CmdBufPool};
pub use keyslot::{KeySlotConfig, KeySlotHandle, KeySlotPool, ReservedBinding, ReservedKeySlot};
pub use pool::{PoolConfig, PoolStats, SlotHandle, SlotPool};
pub use scratch::{ScratchConfig, ScratchHandle, ScratchPool};
