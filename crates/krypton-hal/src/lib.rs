//! # KRYPTON Hardware Abstraction Layer
//!
//! The hardware channel interface: how a finished instruction stream reaches
//! the accelerator, how the completion counter is read back, and how the
//! asynchronous completion notification is delivered.
//!
//! A platform port implements [`channel::HardwareChannel`] over its MMIO
//! window and interrupt plumbing; [`sim::SimChannel`] implements the same
//! trait in software and is the hardware double the engine tests run on.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

#[cfg(any(feature = "std", test))]
extern crate std;

pub mod channel;
pub mod regs;
pub mod sim;

// Re-exports
pub use channel::{ChannelState, CompletionNotifier, HardwareChannel, SubmitFlags};
pub use sim::{SimChannel, SimChannelConfig};
