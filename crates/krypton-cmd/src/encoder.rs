//! # Algorithm Encoders
//!
//! Per-algorithm framing: configuration word, key manifest, IV/counter seed.
//! The sequencer owns chain composition; encoders own everything that is
//! specific to one operation family.

use krypton_core::{OperationKind, Result};

use crate::regs::{cfg, key_purpose, manifest_word, RegisterMap};
use crate::sequence::InstructionSequence;
use crate::sequencer::OperationDescriptor;

// =============================================================================
// ENCODER TRAIT
// =============================================================================

/// Trait for algorithm-family encoders
pub trait AlgorithmEncoder: Send + Sync {
    /// Emit the operation's framing ahead of its data instructions
    fn encode_setup(
        &self,
        map: &RegisterMap,
        desc: &OperationDescriptor<'_>,
        seq: &mut InstructionSequence,
    ) -> Result<()>;

    /// Get encoder name
    fn name(&self) -> &'static str;
}

/// Select the encoder for an operation kind
pub fn encoder_for(kind: OperationKind) -> &'static dyn AlgorithmEncoder {
    match kind {
        OperationKind::CipherEncrypt
        | OperationKind::CipherDecrypt
        | OperationKind::AeadSeal
        | OperationKind::AeadOpen => &CipherEncoder,
        OperationKind::Digest | OperationKind::Mac => &DigestEncoder,
        OperationKind::RsaModExp | OperationKind::DhAgree => &AsymEncoder,
    }
}

// =============================================================================
// CIPHER ENCODER
// =============================================================================

/// Block cipher / AEAD framing
#[derive(Debug)]
pub struct CipherEncoder;

impl AlgorithmEncoder for CipherEncoder {
    fn encode_setup(
        &self,
        map: &RegisterMap,
        desc: &OperationDescriptor<'_>,
        seq: &mut InstructionSequence,
    ) -> Result<()> {
        let mut config = cfg::UNIT_CIPHER;
        if matches!(desc.kind, OperationKind::CipherDecrypt | OperationKind::AeadOpen) {
            config |= cfg::DECRYPT;
        }
        if matches!(desc.kind, OperationKind::AeadSeal | OperationKind::AeadOpen) {
            config |= cfg::AEAD;
        }
        seq.push_write(map.config, config)?;
        seq.push_write(
            map.key_manifest,
            manifest_word(desc.key_slot.raw(), key_purpose::CIPHER),
        )?;
        if let Some(iv) = &desc.iv {
            seq.push_incr(map.iv_seed, iv)?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "cipher"
    }
}

// =============================================================================
// DIGEST ENCODER
// =============================================================================

/// Hash / MAC framing
#[derive(Debug)]
pub struct DigestEncoder;

impl AlgorithmEncoder for DigestEncoder {
    fn encode_setup(
        &self,
        map: &RegisterMap,
        desc: &OperationDescriptor<'_>,
        seq: &mut InstructionSequence,
    ) -> Result<()> {
        let mut config = cfg::UNIT_DIGEST;
        if desc.kind == OperationKind::Mac {
            config |= cfg::KEYED;
        }
        seq.push_write(map.config, config)?;
        // Plain digests run keyless; only MACs program a manifest.
        if desc.kind == OperationKind::Mac {
            seq.push_write(
                map.key_manifest,
                manifest_word(desc.key_slot.raw(), key_purpose::MAC),
            )?;
        }
        if let Some(iv) = &desc.iv {
            seq.push_incr(map.iv_seed, iv)?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "digest"
    }
}

// =============================================================================
// ASYMMETRIC ENCODER
// =============================================================================

/// RSA / DH operand framing
#[derive(Debug)]
pub struct AsymEncoder;

impl AlgorithmEncoder for AsymEncoder {
    fn encode_setup(
        &self,
        map: &RegisterMap,
        desc: &OperationDescriptor<'_>,
        seq: &mut InstructionSequence,
    ) -> Result<()> {
        seq.push_write(map.config, cfg::UNIT_ASYM)?;
        seq.push_write(
            map.key_manifest,
            manifest_word(desc.key_slot.raw(), key_purpose::ASYM),
        )?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "asym"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krypton_core::{DmaAddr, DmaSegment, EngineGeneration, KeySlotIndex};

    use crate::sequence::unpack_header;

    fn desc(kind: OperationKind) -> OperationDescriptor<'static> {
        static SRC: [DmaSegment; 1] = [DmaSegment {
            addr: DmaAddr::new(0x8000),
            len: 64,
        }];
        OperationDescriptor {
            kind,
            key_slot: KeySlotIndex::new(7),
            iv: None,
            src: &SRC,
            dst: DmaSegment::new(DmaAddr::new(0x9000), 64),
        }
    }

    fn first_config_word(seq: &InstructionSequence, map: &RegisterMap) -> u32 {
        let words = seq.words();
        let (_, reg, _) = unpack_header(words[0]);
        assert_eq!(reg, map.config);
        words[1]
    }

    #[test]
    fn test_cipher_direction_bits() {
        let map = RegisterMap::for_generation(EngineGeneration::Gen1);
        let mut seq = InstructionSequence::new(64);
        CipherEncoder
            .encode_setup(map, &desc(OperationKind::CipherDecrypt), &mut seq)
            .unwrap();
        let config = first_config_word(&seq, map);
        assert!(config & cfg::UNIT_CIPHER != 0);
        assert!(config & cfg::DECRYPT != 0);
        assert!(config & cfg::AEAD == 0);
    }

    #[test]
    fn test_aead_sets_both_bits() {
        let map = RegisterMap::for_generation(EngineGeneration::Gen1);
        let mut seq = InstructionSequence::new(64);
        CipherEncoder
            .encode_setup(map, &desc(OperationKind::AeadSeal), &mut seq)
            .unwrap();
        let config = first_config_word(&seq, map);
        assert!(config & cfg::AEAD != 0);
        assert!(config & cfg::DECRYPT == 0);
    }

    #[test]
    fn test_plain_digest_skips_key_manifest() {
        let map = RegisterMap::for_generation(EngineGeneration::Gen2);
        let mut seq = InstructionSequence::new(64);
        DigestEncoder
            .encode_setup(map, &desc(OperationKind::Digest), &mut seq)
            .unwrap();
        // config write only: one header + one operand.
        assert_eq!(seq.len_words(), 2);
    }

    #[test]
    fn test_mac_programs_manifest() {
        let map = RegisterMap::for_generation(EngineGeneration::Gen2);
        let mut seq = InstructionSequence::new(64);
        DigestEncoder
            .encode_setup(map, &desc(OperationKind::Mac), &mut seq)
            .unwrap();
        let words = seq.words();
        let (_, reg, _) = unpack_header(words[2]);
        assert_eq!(reg, map.key_manifest);
        assert_eq!(words[3] & 0xFF, 7);
    }

    #[test]
    fn test_encoder_routing() {
        assert_eq!(encoder_for(OperationKind::CipherEncrypt).name(), "cipher");
        assert_eq!(encoder_for(OperationKind::Digest).name(), "digest");
        assert_eq!(encoder_for(OperationKind::DhAgree).name(), "asym");
    }
}
