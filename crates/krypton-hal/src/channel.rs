//! # Hardware Channel
//!
//! The single path by which an instruction stream reaches the accelerator.
//! One channel per engine instance; the engine's in-flight gate guarantees
//! at most one submission is being handed over at a time.

use alloc::sync::Arc;

use bitflags::bitflags;

use krypton_core::{DmaAddr, EngineGeneration, FenceValue, Result};

// =============================================================================
// SUBMIT FLAGS
// =============================================================================

bitflags! {
    /// Per-submission channel flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SubmitFlags: u32 {
        /// Deliver a completion notification for this submission's fence.
        ///
        /// Synchronous submitters poll the counter instead and omit this, so
        /// the notifier only ever fires for fences the dispatcher owns.
        const NOTIFY = 1 << 0;
    }
}

// =============================================================================
// CHANNEL STATE
// =============================================================================

/// Hardware channel state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Channel ready for submissions
    Ready,
    /// Channel is executing queued work
    Running,
    /// Channel is in error state
    Faulted,
    /// Channel is closed
    Closed,
}

impl ChannelState {
    /// Check if the channel can accept submissions
    #[inline]
    pub fn can_submit(&self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }
}

// =============================================================================
// COMPLETION NOTIFIER
// =============================================================================

/// Callback invoked from the channel's notification context once the
/// completion counter reaches a notified fence.
///
/// Runs inline in that context; implementations must not block.
pub type CompletionNotifier = Arc<dyn Fn(FenceValue) + Send + Sync>;

// =============================================================================
// HARDWARE CHANNEL TRAIT
// =============================================================================

/// Trait a platform port implements over its channel hardware
pub trait HardwareChannel: Send + Sync {
    /// Hardware generation behind this channel
    fn generation(&self) -> EngineGeneration;

    /// Current channel state
    fn state(&self) -> ChannelState;

    /// Hand an instruction stream to the hardware.
    ///
    /// `dma` is the bus address of the command-buffer slot holding `words`.
    /// Returns as soon as the channel accepted the work; completion is
    /// observed through [`completed_fence`](Self::completed_fence) or, for
    /// `NOTIFY` submissions, through the registered notifier.
    fn enqueue(&self, words: &[u32], dma: DmaAddr, flags: SubmitFlags) -> Result<()>;

    /// Read the hardware completion counter
    fn completed_fence(&self) -> FenceValue;

    /// Register the completion notifier (replaces any previous one)
    fn set_notifier(&self, notifier: CompletionNotifier);
}
