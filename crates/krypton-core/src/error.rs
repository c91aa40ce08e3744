//! # KRYPTON Error Handling
//!
//! Unified error types for the crypto engine driver stack.
//!
//! Error handling in KRYPTON follows these principles:
//! - Errors are typed and categorized by subsystem
//! - No panics in production code paths
//! - Pool exhaustion is always recoverable; it is never classified as fatal
//! - Consistency errors are logged, never retried, and never corrupt state

use core::fmt;

// =============================================================================
// RESULT TYPE
// =============================================================================

/// KRYPTON Result type alias
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// POOL KIND
// =============================================================================

/// Which of the three fixed-capacity resource pools an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    /// Hardware key-storage slots
    KeySlot,
    /// DMA-capable scratch (bounce) buffers
    Scratch,
    /// Command-buffer slots
    CmdBuf,
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeySlot => write!(f, "key-slot"),
            Self::Scratch => write!(f, "scratch"),
            Self::CmdBuf => write!(f, "cmdbuf"),
        }
    }
}

// =============================================================================
// ERROR ENUM
// =============================================================================

/// KRYPTON unified error type
///
/// This enum covers all error conditions across the driver stack.
/// Errors are categorized by subsystem for easier debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Generic Errors
    // =========================================================================
    /// Invalid parameter provided
    InvalidParameter,
    /// Operation attempted in the wrong state
    InvalidState,
    /// Operation not supported on this hardware generation
    NotSupported,

    // =========================================================================
    // Resource Pool Errors
    // =========================================================================
    /// A pool had no free slot after the bounded retry window.
    ///
    /// Always recoverable: the caller may retry later.
    PoolExhausted(PoolKind),
    /// A slot handle was returned to a pool that already marked it free
    DoubleFree(PoolKind),
    /// A slot index is out of range or refers to a reserved slot
    InvalidSlot(PoolKind),

    // =========================================================================
    // Admission Errors
    // =========================================================================
    /// A request's payload exceeds the largest scratch buffer
    PayloadTooLarge,
    /// The device context is shutting down; the request was not admitted
    ShuttingDown,

    // =========================================================================
    // Command Sequencing Errors
    // =========================================================================
    /// An instruction sequence outgrew its command-buffer slot
    SequenceOverflow,
    /// A malformed instruction stream was handed to the channel
    InvalidCommand,

    // =========================================================================
    // Channel Submission Errors
    // =========================================================================
    /// The hardware channel is not ready to accept work
    ChannelNotReady,
    /// The hardware channel rejected the submission
    ChannelRejected,
    /// DMA mapping of a submission buffer failed
    DmaMapFailed,

    // =========================================================================
    // Completion Errors
    // =========================================================================
    /// A fence was not reached within the bounded timeout.
    ///
    /// Fatal for the affected submission only; the device keeps operating.
    FenceTimeout,
    /// A completion notification referenced no known submission
    StaleCompletion,
}

impl Error {
    /// Whether the caller may simply retry later.
    ///
    /// Pool exhaustion is the only transient error class; everything else
    /// requires the caller to give up on the affected request.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::PoolExhausted(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Generic
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::InvalidState => write!(f, "invalid state"),
            Self::NotSupported => write!(f, "operation not supported"),

            // Pools
            Self::PoolExhausted(kind) => write!(f, "{} pool exhausted", kind),
            Self::DoubleFree(kind) => write!(f, "{} slot double-freed", kind),
            Self::InvalidSlot(kind) => write!(f, "invalid {} slot", kind),

            // Admission
            Self::PayloadTooLarge => write!(f, "payload exceeds scratch capacity"),
            Self::ShuttingDown => write!(f, "device context shutting down"),

            // Command
            Self::SequenceOverflow => write!(f, "instruction sequence overflow"),
            Self::InvalidCommand => write!(f, "malformed instruction stream"),

            // Channel
            Self::ChannelNotReady => write!(f, "hardware channel not ready"),
            Self::ChannelRejected => write!(f, "hardware channel rejected submission"),
            Self::DmaMapFailed => write!(f, "DMA mapping failed"),

            // Completion
            Self::FenceTimeout => write!(f, "fence wait timeout"),
            Self::StaleCompletion => write!(f, "completion for unknown submission"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_exhausted_is_recoverable() {
        assert!(Error::PoolExhausted(PoolKind::KeySlot).is_recoverable());
        assert!(Error::PoolExhausted(PoolKind::Scratch).is_recoverable());
    }

    #[test]
    fn test_fatal_classes_are_not_recoverable() {
        assert!(!Error::FenceTimeout.is_recoverable());
        assert!(!Error::StaleCompletion.is_recoverable());
        assert!(!Error::ChannelRejected.is_recoverable());
    }

    #[test]
    fn test_display_names_the_pool() {
        let s = std::format!("{}", Error::PoolExhausted(PoolKind::CmdBuf));
        assert!(s.contains("cmdbuf"));
    }
}
