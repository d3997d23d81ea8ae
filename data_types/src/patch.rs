//! Raw, undecoded records of a microcode patch
//!
//! These are the plain integer forms the patch file stores. Decoding them into
//! micro-op and sequencing-word views is the job of `ucode_codec`.

/// Number of micro-op slots in a quad group
pub const QUAD_SLOTS: usize = 4;

/// Size of one quad group on disk: four 64-bit micro-ops and the 32-bit sequencing word
pub const RAW_QUAD_SIZE: usize = QUAD_SLOTS * 8 + 4;

/// A quad of micro-ops with its sequencing word, as stored in the patch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RawQuad {
    /// Four 64-bit micro-ops
    pub instructions: [u64; QUAD_SLOTS],
    /// 32-bit sequencing word
    pub sequence_word: u32,
}

impl RawQuad {
    /// Reads a quad from its little-endian on-disk form
    pub fn from_le_bytes(bytes: &[u8; RAW_QUAD_SIZE]) -> RawQuad {
        let mut instructions = [0u64; QUAD_SLOTS];
        for (slot, chunk) in instructions.iter_mut().zip(bytes.chunks_exact(8)) {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            *slot = u64::from_le_bytes(word);
        }

        let mut seq = [0u8; 4];
        seq.copy_from_slice(&bytes[QUAD_SLOTS * 8..]);

        RawQuad {
            instructions,
            sequence_word: u32::from_le_bytes(seq),
        }
    }

    /// Writes the quad in its little-endian on-disk form
    pub fn to_le_bytes(&self) -> [u8; RAW_QUAD_SIZE] {
        let mut bytes = [0u8; RAW_QUAD_SIZE];
        for (chunk, insn) in bytes.chunks_exact_mut(8).zip(self.instructions.iter()) {
            chunk.copy_from_slice(&insn.to_le_bytes());
        }
        bytes[QUAD_SLOTS * 8..].copy_from_slice(&self.sequence_word.to_le_bytes());
        bytes
    }
}
