//! # Micro-op codec
//!
//! Bit-exact views of the 64-bit micro-op words and the 32-bit sequence words
//! a microcode patch program is made of. Nothing in here validates: any word
//! can be disassembled into every view and assembled back unchanged.
#![cfg_attr(not(test), no_std)]

extern crate core;

use crate::sequence_word::SequenceWord;
use core::fmt;
use core::fmt::{Display, Formatter};
use data_types::patch::QUAD_SLOTS;
use serde::{Deserialize, Serialize};

pub mod instruction;
pub mod sequence_word;
pub mod views;

pub use instruction::{DecodedOp, MicroOp, OpClass};
pub use sequence_word::{SequenceAction, SequenceTarget};
pub use views::{BranchOp, LoadStoreOp, OpView, RegisterOp, ShortRegisterOp, SpecialOp};

/// A quad group: four micro-ops and the sequence word directing what runs next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuadGroup {
    pub instructions: [MicroOp; QUAD_SLOTS],
    pub sequence_word: SequenceWord,
}

impl QuadGroup {
    /// Four NOPs and a zero sequence word
    pub const NOP: QuadGroup = QuadGroup {
        instructions: [MicroOp::NOP; QUAD_SLOTS],
        sequence_word: SequenceWord::NOP,
    };

    pub fn assemble(&self) -> data_types::RawQuad {
        data_types::RawQuad {
            instructions: self.instructions.map(|op| op.assemble()),
            sequence_word: self.sequence_word.assemble(),
        }
    }

    pub fn disassemble(raw: data_types::RawQuad) -> QuadGroup {
        QuadGroup {
            instructions: raw.instructions.map(MicroOp::disassemble),
            sequence_word: SequenceWord::disassemble(raw.sequence_word),
        }
    }
}

impl Default for QuadGroup {
    fn default() -> Self {
        QuadGroup::NOP
    }
}

impl From<data_types::RawQuad> for QuadGroup {
    fn from(value: data_types::RawQuad) -> Self {
        QuadGroup::disassemble(value)
    }
}

impl From<QuadGroup> for data_types::RawQuad {
    fn from(value: QuadGroup) -> Self {
        value.assemble()
    }
}

impl Display for QuadGroup {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ; {} ; {} ; {} ; {}",
            self.instructions[0],
            self.instructions[1],
            self.instructions[2],
            self.instructions[3],
            self.sequence_word
        )
    }
}
