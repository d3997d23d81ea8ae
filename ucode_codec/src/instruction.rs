//! Micro-op Module
//!
//! This module provides the 64-bit micro-op word and its raw integer views.
//! The class discriminator sits at the same position in every instruction class,
//! so a word can always be classified before it is reinterpreted.

use crate::views::{BranchOp, LoadStoreOp, OpView, RegisterOp, ShortRegisterOp, SpecialOp};
use core::fmt;
use core::fmt::Display;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

/// Bit position of the 3-bit class discriminator
pub const CLASS_SHIFT: u32 = 59;
/// Mask of the class discriminator after shifting
pub const CLASS_MASK: u64 = 0b111;

/// Instruction classes selected by the class discriminator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, FromPrimitive)]
pub enum OpClass {
    /// Register-op
    Register = 0,
    /// Register-op with a 10-bit immediate
    ShortRegister = 1,
    /// Special-op
    Special = 2,
    /// Branch-op
    Branch = 3,
    /// Load/Store-op
    LoadStore = 4,
}

impl OpClass {
    /// Maps a raw discriminator to a known class
    ///
    /// # Returns
    ///
    /// Returns `None` for the discriminator values without an assigned class
    pub fn from_bits(bits: u8) -> Option<OpClass> {
        OpClass::from_u8(bits)
    }

    /// The raw discriminator of this class
    pub const fn bits(&self) -> u8 {
        *self as u8
    }
}

/// A microcode operation
///
/// This type represents a single 64-bit micro-op word. Every bit is kept,
/// including the ones without a known meaning, so assembling a disassembled
/// word always reproduces the input.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Ord, PartialOrd)]
#[serde(transparent)]
#[repr(transparent)]
pub struct MicroOp {
    /// The raw micro-op value
    raw: u64,
}

impl MicroOp {
    /// A no-operation micro-op, used as filler for unused quad slots
    pub const NOP: MicroOp = MicroOp::disassemble(0x007f_9c00_0000_0000);

    /// Creates a micro-op from its raw 64-bit value
    pub const fn disassemble(raw: u64) -> MicroOp {
        MicroOp { raw }
    }

    /// Returns the raw 64-bit value
    pub const fn assemble(&self) -> u64 {
        self.raw
    }

    /// Creates a micro-op from its two 32-bit halves, low half first
    pub const fn from_dwords(dwords: [u32; 2]) -> MicroOp {
        MicroOp::disassemble((dwords[0] as u64) | ((dwords[1] as u64) << 32))
    }

    /// The two 32-bit halves, low half first
    pub const fn dwords(&self) -> [u32; 2] {
        [self.raw as u32, (self.raw >> 32) as u32]
    }

    /// Creates a micro-op from its four 16-bit quarters, lowest first
    pub const fn from_words(words: [u16; 4]) -> MicroOp {
        MicroOp::disassemble(
            (words[0] as u64)
                | ((words[1] as u64) << 16)
                | ((words[2] as u64) << 32)
                | ((words[3] as u64) << 48),
        )
    }

    /// The four 16-bit quarters, lowest first
    pub const fn words(&self) -> [u16; 4] {
        [
            self.raw as u16,
            (self.raw >> 16) as u16,
            (self.raw >> 32) as u16,
            (self.raw >> 48) as u16,
        ]
    }

    /// Creates a micro-op from its little-endian bytes
    pub const fn from_bytes(bytes: [u8; 8]) -> MicroOp {
        MicroOp::disassemble(u64::from_le_bytes(bytes))
    }

    /// The eight bytes of the micro-op in little-endian order
    pub const fn bytes(&self) -> [u8; 8] {
        self.raw.to_le_bytes()
    }

    /// The raw 3-bit class discriminator
    pub const fn class_bits(&self) -> u8 {
        ((self.raw >> CLASS_SHIFT) & CLASS_MASK) as u8
    }

    /// The class of this micro-op, if the discriminator is assigned
    pub fn class(&self) -> Option<OpClass> {
        OpClass::from_bits(self.class_bits())
    }

    /// Checks if this is the no-operation constant
    pub fn is_nop(&self) -> bool {
        *self == MicroOp::NOP
    }

    /// Decodes the micro-op into the view selected by its class discriminator
    pub fn decode(&self) -> DecodedOp {
        match self.class() {
            Some(OpClass::Register) => DecodedOp::Register(self.view()),
            Some(OpClass::ShortRegister) => DecodedOp::ShortRegister(self.view()),
            Some(OpClass::Special) => DecodedOp::Special(self.view()),
            Some(OpClass::Branch) => DecodedOp::Branch(self.view()),
            Some(OpClass::LoadStore) => DecodedOp::LoadStore(self.view()),
            None => DecodedOp::Unknown(*self),
        }
    }

    /// Reinterprets the micro-op as the given class view, regardless of its discriminator
    pub fn view<V: OpView>(&self) -> V {
        V::from_micro_op(*self)
    }
}

impl fmt::Debug for MicroOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MicroOp({:#018x})", self.raw)
    }
}

impl Display for MicroOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nop() {
            write!(f, "NOP")
        } else {
            write!(f, "{:016x}", self.raw)
        }
    }
}

impl From<u64> for MicroOp {
    fn from(raw: u64) -> Self {
        MicroOp::disassemble(raw)
    }
}

impl From<MicroOp> for u64 {
    fn from(op: MicroOp) -> Self {
        op.assemble()
    }
}

/// A micro-op decoded into the view of its class
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DecodedOp {
    Register(RegisterOp),
    ShortRegister(ShortRegisterOp),
    Special(SpecialOp),
    Branch(BranchOp),
    LoadStore(LoadStoreOp),
    /// Discriminator without an assigned class; the word is kept as is
    Unknown(MicroOp),
}

impl DecodedOp {
    /// Packs the decoded view back into a micro-op
    pub fn encode(&self) -> MicroOp {
        match self {
            DecodedOp::Register(op) => op.micro_op(),
            DecodedOp::ShortRegister(op) => op.micro_op(),
            DecodedOp::Special(op) => op.micro_op(),
            DecodedOp::Branch(op) => op.micro_op(),
            DecodedOp::LoadStore(op) => op.micro_op(),
            DecodedOp::Unknown(op) => *op,
        }
    }

    /// The class discriminator as read from the view
    pub fn class_bits(&self) -> u8 {
        match self {
            DecodedOp::Register(op) => op.class(),
            DecodedOp::ShortRegister(op) => op.class(),
            DecodedOp::Special(op) => op.class(),
            DecodedOp::Branch(op) => op.class(),
            DecodedOp::LoadStore(op) => op.class(),
            DecodedOp::Unknown(op) => op.class_bits(),
        }
    }
}

impl Display for DecodedOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedOp::Register(op) => write!(f, "{}", op),
            DecodedOp::ShortRegister(op) => write!(f, "{}", op),
            DecodedOp::Special(op) => write!(f, "{}", op),
            DecodedOp::Branch(op) => write!(f, "{}", op),
            DecodedOp::LoadStore(op) => write!(f, "{}", op),
            DecodedOp::Unknown(op) => write!(f, "class{} {:016x}", op.class_bits(), op.assemble()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn nop_constant() {
        let nop = MicroOp::NOP;
        assert_eq!(nop.assemble(), 0x007f9c0000000000);
        assert_eq!(nop.class(), Some(OpClass::Register));
        assert!(nop.is_nop());
        assert_eq!(format!("{}", nop), "NOP");

        let DecodedOp::Register(reg) = nop.decode() else {
            panic!("NOP must decode as a register op");
        };
        assert_eq!(reg.op_type(), 0xff);
        assert_eq!(reg.size(), 3);
        assert!(reg.size_msb());
        assert_eq!(reg.micro_op(), MicroOp::NOP);
    }

    #[test]
    fn raw_views_are_little_endian() {
        let op = MicroOp::disassemble(0x1122334455667788);
        assert_eq!(op.dwords(), [0x55667788, 0x11223344]);
        assert_eq!(op.words(), [0x7788, 0x5566, 0x3344, 0x1122]);
        assert_eq!(op.bytes(), [0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11]);
    }

    #[test]
    fn unassigned_classes_are_preserved() {
        for class in 5u64..8 {
            let raw = (class << CLASS_SHIFT) | 0xc000_0000_dead_beef;
            let op = MicroOp::disassemble(raw);
            assert_eq!(op.class(), None);
            assert_eq!(op.decode(), DecodedOp::Unknown(op));
            assert_eq!(op.decode().encode().assemble(), raw);
        }
    }

    #[test]
    fn serde_is_the_raw_word() {
        let json = serde_json::to_string(&MicroOp::NOP).unwrap();
        assert_eq!(json, format!("{}", 0x007f9c0000000000u64));
        let back: MicroOp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, MicroOp::NOP);
    }

    proptest! {
        #[test]
        fn decode_encode_is_identity(raw in any::<u64>()) {
            let op = MicroOp::disassemble(raw);
            prop_assert_eq!(op.decode().encode().assemble(), raw);
            prop_assert_eq!(op.decode().class_bits(), op.class_bits());
        }

        #[test]
        fn raw_views_round_trip(raw in any::<u64>()) {
            let op = MicroOp::disassemble(raw);
            prop_assert_eq!(MicroOp::from_dwords(op.dwords()), op);
            prop_assert_eq!(MicroOp::from_words(op.words()), op);
            prop_assert_eq!(MicroOp::from_bytes(op.bytes()), op);
        }
    }
}
