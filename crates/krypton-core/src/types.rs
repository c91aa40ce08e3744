//! # KRYPTON Core Types
//!
//! Fundamental type definitions used across the entire driver stack.
//!
//! These types provide:
//! - Strong typing for DMA addresses (never confused with CPU pointers)
//! - Hardware-specific identifiers (key slots, engine generations)
//! - Size guarantees for staging buffers

use core::fmt;
use core::ops::Add;

// =============================================================================
// DMA ADDRESS
// =============================================================================

/// Bus address of a DMA-mapped region
///
/// This is an address in the accelerator's bus address space.
/// It is NOT a CPU pointer and cannot be dereferenced directly.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct DmaAddr(u64);

impl DmaAddr {
    /// Create a new DMA address
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Create a null DMA address
    #[inline]
    pub const fn null() -> Self {
        Self(0)
    }

    /// Get the raw u64 value
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Check if null
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Check alignment
    #[inline]
    pub const fn is_aligned(self, alignment: u64) -> bool {
        self.0 & (alignment - 1) == 0
    }

    /// Offset by bytes
    #[inline]
    pub const fn offset(self, bytes: u64) -> Self {
        Self(self.0.wrapping_add(bytes))
    }
}

impl Add<u64> for DmaAddr {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0.wrapping_add(rhs))
    }
}

impl fmt::Debug for DmaAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DmaAddr(0x{:016x})", self.0)
    }
}

impl fmt::Display for DmaAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

// =============================================================================
// DMA SEGMENT
// =============================================================================

/// One contiguous extent of a scatter/gather list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaSegment {
    /// Bus address of the extent
    pub addr: DmaAddr,
    /// Length in bytes
    pub len: u32,
}

impl DmaSegment {
    /// Create a new segment
    #[inline]
    pub const fn new(addr: DmaAddr, len: u32) -> Self {
        Self { addr, len }
    }
}

// =============================================================================
// BYTE SIZE
// =============================================================================

/// Size in bytes (for staging buffer capacities)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct ByteSize(u64);

impl ByteSize {
    /// Zero size
    pub const ZERO: Self = Self(0);
    /// 4 KiB
    pub const KIB_4: Self = Self(4 * 1024);
    /// 64 KiB
    pub const KIB_64: Self = Self(64 * 1024);

    /// Create from bytes
    #[inline]
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Create from KiB
    #[inline]
    pub const fn from_kib(kib: u64) -> Self {
        Self(kib * 1024)
    }

    /// Get as bytes
    #[inline]
    pub const fn as_bytes(self) -> u64 {
        self.0
    }

    /// Get as usize (saturating on 32-bit hosts)
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Align up
    #[inline]
    pub const fn align_up(self, alignment: u64) -> Self {
        let mask = alignment - 1;
        Self((self.0 + mask) & !mask)
    }
}

impl fmt::Debug for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1024 * 1024 {
            write!(f, "{} MiB", self.0 / (1024 * 1024))
        } else if self.0 >= 1024 {
            write!(f, "{} KiB", self.0 / 1024)
        } else {
            write!(f, "{} B", self.0)
        }
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// =============================================================================
// FENCE VALUE
// =============================================================================

/// Monotonically increasing completion counter value.
///
/// The hardware increments its counter once per completed submission; a
/// submission is complete when the counter reaches the fence value assigned
/// at submit time.
pub type FenceValue = u64;

// =============================================================================
// KEY SLOT INDEX
// =============================================================================

/// Index of a hardware key-storage slot
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct KeySlotIndex(u8);

impl KeySlotIndex {
    /// Create a new key slot index
    #[inline]
    pub const fn new(index: u8) -> Self {
        Self(index)
    }

    /// Get the raw index
    #[inline]
    pub const fn raw(self) -> u8 {
        self.0
    }
}

impl fmt::Debug for KeySlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeySlot({})", self.0)
    }
}

impl fmt::Display for KeySlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// IV SEED
// =============================================================================

/// Number of 32-bit words in an IV/counter seed
pub const IV_SEED_WORDS: usize = 4;

/// IV or counter seed programmed before a cipher operation
pub type IvSeed = [u32; IV_SEED_WORDS];

// =============================================================================
// ENGINE GENERATION
// =============================================================================

/// Crypto engine hardware generation
///
/// Generations differ in register offsets and in how many scatter/gather
/// segments one operation instruction can address; the per-generation tables
/// live in the command layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum EngineGeneration {
    /// First generation (4 segments per operation)
    Gen1 = 0x10,
    /// Second generation (8 segments per operation)
    Gen2 = 0x20,
}

/// Upper bound on scatter/gather segments per operation across generations
pub const MAX_OP_SEGMENTS: usize = 8;

impl EngineGeneration {
    /// Scatter/gather segments one operation instruction can address
    #[inline]
    pub const fn max_op_segments(self) -> usize {
        match self {
            Self::Gen1 => 4,
            Self::Gen2 => 8,
        }
    }

    /// Human-readable generation name
    pub const fn name(self) -> &'static str {
        match self {
            Self::Gen1 => "gen1",
            Self::Gen2 => "gen2",
        }
    }
}

static_assertions::const_assert!(EngineGeneration::Gen1.max_op_segments() <= MAX_OP_SEGMENTS);
static_assertions::const_assert!(EngineGeneration::Gen2.max_op_segments() <= MAX_OP_SEGMENTS);

// =============================================================================
// OPERATION KIND
// =============================================================================

/// Engine functional unit an operation runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineUnit {
    /// Block cipher / AEAD unit
    Cipher,
    /// Hash / MAC unit
    Digest,
    /// RSA / DH unit
    Asymmetric,
}

/// Opaque algorithm tag carried by a request.
///
/// The core never interprets the tag beyond routing it to the matching
/// algorithm encoder; the encoders own the per-mode framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Block cipher encryption (CBC/ECB/CTR/OFB/XTS selected by the encoder)
    CipherEncrypt,
    /// Block cipher decryption
    CipherDecrypt,
    /// Plain hash (SHA family)
    Digest,
    /// Keyed MAC (CMAC/HMAC)
    Mac,
    /// AEAD seal (GCM/CCM)
    AeadSeal,
    /// AEAD open
    AeadOpen,
    /// RSA modular exponentiation
    RsaModExp,
    /// DH shared-secret agreement
    DhAgree,
}

impl OperationKind {
    /// Which functional unit handles this operation
    #[inline]
    pub const fn unit(self) -> EngineUnit {
        match self {
            Self::CipherEncrypt | Self::CipherDecrypt | Self::AeadSeal | Self::AeadOpen => {
                EngineUnit::Cipher
            }
            Self::Digest | Self::Mac => EngineUnit::Digest,
            Self::RsaModExp | Self::DhAgree => EngineUnit::Asymmetric,
        }
    }

    /// Whether the operation consumes a hardware key slot
    #[inline]
    pub const fn uses_key_slot(self) -> bool {
        !matches!(self, Self::Digest)
    }
}
