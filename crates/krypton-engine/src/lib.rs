//! # KRYPTON Engine
//!
//! The request admission, batching, submission, and completion core.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        Request Pipeline                           │
//! │                                                                   │
//! │  callers ──▶ ┌───────────┐   ┌───────────┐   ┌───────────────┐    │
//! │              │ Admission │──▶│ Batching  │──▶│   Submitter   │    │
//! │              │   Queue   │   │  Worker   │   │ (fence + gate)│    │
//! │              └───────────┘   └───────────┘   └───────┬───────┘    │
//! │                                    ▲                 │            │
//! │                              resource pools          ▼            │
//! │                                    │         hardware channel     │
//! │              ┌───────────┐         │                 │            │
//! │  callers ◀── │Completion │◀────────┴─────────────────┘            │
//! │              │Dispatcher │   (notification context)               │
//! │              └───────────┘                                        │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! This is the hosted half of the driver: it owns the worker thread, the
//! condvar-guarded admission queue, and the wall-clock deadlines, so unlike
//! the lower layers it requires `std`.
//!
//! ## Guarantees
//!
//! - every admitted request completes exactly once (success, error, or
//!   timeout), even across submit failures and shutdown
//! - requests batch in FIFO order; completions within a batch fire in batch
//!   order; at most one submission is in flight per device
//! - no error path leaks a pool slot

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod dispatch;
pub mod queue;
pub mod request;
pub mod submit;
pub mod worker;

// Re-exports
pub use device::{DeviceContext, DevicePools, EngineConfig, EngineStats};
pub use queue::WorkerState;
pub use request::{CompletionHandle, CryptoRequest};
pub use submit::Submitter;
