//! # KRYPTON Core
//!
//! Foundational types and abstractions for the KRYPTON crypto engine driver.
//!
//! This crate provides the type-system foundations shared by every layer of
//! the driver: strongly-typed DMA addresses and slot indices, the unified
//! error enum, and the monotonically increasing completion fence counter.
//!
//! ## Design Principles
//!
//! 1. **Zero-Cost Abstractions**: newtypes compile away entirely
//! 2. **Type-State Safety**: a key-slot index cannot be confused with a
//!    scratch-buffer index or a raw integer
//! 3. **Generational Compatibility**: nothing here depends on one hardware
//!    generation's register layout
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      krypton-core                           │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │   Types     │  │   Fence     │  │     Error           │  │
//! │  │ (DmaAddr,   │  │  Counter    │  │   Handling          │  │
//! │  │  KeySlot)   │  │             │  │                     │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::new_without_default)]

extern crate alloc;

#[cfg(any(feature = "std", test))]
extern crate std;

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod error;
pub mod fence;
pub mod types;

// Re-exports for convenience
pub use error::{Error, PoolKind, Result};
pub use fence::FenceCounter;
pub use types::*;
