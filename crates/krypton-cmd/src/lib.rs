//! # KRYPTON Command Layer
//!
//! Instruction sequences, per-algorithm encoders, and chain composition.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                     Command Build Pipeline                        │
//! │                                                                   │
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────────┐     │
//! │  │  Algorithm   │    │  Sequencer   │    │   Instruction    │     │
//! │  │  Encoders    │───▶│   (chain     │───▶│    Sequence      │     │
//! │  │ (framing)    │    │ composition) │    │  (word stream)   │     │
//! │  └──────────────┘    └──────────────┘    └────────┬─────────┘     │
//! │                                                   │               │
//! │                                          ┌────────▼─────────┐     │
//! │                                          │ Command-buffer   │     │
//! │                                          │      slot        │     │
//! │                                          └──────────────────┘     │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Build Flow
//!
//! 1. The batching worker stages payloads and picks DMA extents
//! 2. Per request, the matching encoder frames the operation (config word,
//!    key manifest, IV seed)
//! 3. The sequencer splits the payload across operation instructions and
//!    marks exactly one instruction LAST_BUFFER at the end of the chain
//! 4. The sequencer closes the chain with one fence-increment instruction

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

#[cfg(any(feature = "std", test))]
extern crate std;

pub mod encoder;
pub mod regs;
pub mod sequence;
pub mod sequencer;

// Re-exports
pub use encoder::{encoder_for, AlgorithmEncoder};
pub use regs::RegisterMap;
pub use sequence::InstructionSequence;
pub use sequencer::{ChainFlags, OperationDescriptor, Sequencer};
