//! # Channel Register Window
//!
//! Register offsets of the channel interface itself (as opposed to the
//! engine registers the command layer targets). A platform port drives
//! these through its MMIO mapping; the simulated channel has no use for
//! them.

/// Gen1 channel window offsets (bytes from the channel base)
pub mod gen1 {
    //! Gen1 channel register constants

    /// Doorbell: write the command-buffer bus address to start a fetch
    pub const DOORBELL: u32 = 0x000;
    /// Stream length in words
    pub const STREAM_LEN: u32 = 0x004;
    /// Completion counter (read-only, monotonically increasing)
    pub const FENCE_COUNT: u32 = 0x010;
    /// Channel status
    pub const STATUS: u32 = 0x014;
    /// Interrupt enable
    pub const IRQ_ENABLE: u32 = 0x020;
    /// Interrupt status (write-1-to-clear)
    pub const IRQ_STATUS: u32 = 0x024;
}

/// Gen2 channel window offsets (bytes from the channel base)
pub mod gen2 {
    //! Gen2 channel register constants

    /// Doorbell
    pub const DOORBELL: u32 = 0x000;
    /// Stream length in words
    pub const STREAM_LEN: u32 = 0x008;
    /// Completion counter (read-only, monotonically increasing)
    pub const FENCE_COUNT: u32 = 0x020;
    /// Channel status
    pub const STATUS: u32 = 0x024;
    /// Interrupt enable
    pub const IRQ_ENABLE: u32 = 0x040;
    /// Interrupt status (write-1-to-clear)
    pub const IRQ_STATUS: u32 = 0x044;
}

/// Channel status bits (common across generations)
pub mod status {
    //! Status register bit positions

    /// Channel idle
    pub const IDLE: u32 = 1 << 0;
    /// Fetch in progress
    pub const BUSY: u32 = 1 << 1;
    /// DMA fault latched
    pub const DMA_FAULT: u32 = 1 << 8;
    /// Illegal instruction latched
    pub const BAD_OPCODE: u32 = 1 << 9;
}

/// Interrupt bits (enable and status share positions)
pub mod irq {
    //! Interrupt register bit positions

    /// Completion counter advanced
    pub const FENCE: u32 = 1 << 0;
    /// Channel fault
    pub const FAULT: u32 = 1 << 1;
}
